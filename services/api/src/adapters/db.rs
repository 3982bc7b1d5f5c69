//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scribeloop_core::domain::{
    Annotation, AnnotationRecord, Chapter, ChapterStatus, ChapterUpdate, MetadataUpdate,
    NewChapter, ProjectMetadata, Reader, ReaderCredentials,
};
use scribeloop_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use tracing::{debug, warn};
use uuid::Uuid;

const BOOK_TITLE_KEY: &str = "book_title";
const TOTAL_CHAPTERS_KEY: &str = "total_chapters";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    /// Returned for metadata keys that were never written.
    defaults: ProjectMetadata,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool, defaults: ProjectMetadata) -> Self {
        Self { pool, defaults }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(what: String) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn to_db_offset(offset: Option<usize>) -> PortResult<Option<i32>> {
    offset
        .map(|o| {
            i32::try_from(o)
                .map_err(|_| PortError::Invalid(format!("Offset {} is out of range", o)))
        })
        .transpose()
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ChapterRow {
    id: Uuid,
    title: String,
    content_md: String,
    status: String,
    sort_order: i32,
    created_at: DateTime<Utc>,
}
impl ChapterRow {
    fn to_domain(self) -> PortResult<Chapter> {
        let status = self.status.parse::<ChapterStatus>().map_err(|_| {
            PortError::Unexpected(format!(
                "Chapter {} has unknown status '{}'",
                self.id, self.status
            ))
        })?;
        Ok(Chapter {
            id: self.id,
            title: self.title,
            content_md: self.content_md,
            status,
            sort_order: self.sort_order,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct AnnotationRow {
    id: Uuid,
    chapter_id: Uuid,
    parent_id: Option<Uuid>,
    author: String,
    comment: String,
    quote: Option<String>,
    start_offset: Option<i32>,
    end_offset: Option<i32>,
    created_at: DateTime<Utc>,
}
impl AnnotationRow {
    fn to_domain(self) -> Annotation {
        Annotation {
            id: self.id,
            chapter_id: self.chapter_id,
            parent_id: self.parent_id,
            author: self.author,
            comment: self.comment,
            quote: self.quote,
            start_offset: self.start_offset.and_then(|o| usize::try_from(o).ok()),
            end_offset: self.end_offset.and_then(|o| usize::try_from(o).ok()),
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct MetadataRow {
    key: String,
    value: String,
}

#[derive(FromRow)]
struct ReaderRow {
    pseudo: String,
    hashed_password: String,
}

const CHAPTER_COLUMNS: &str = "id, title, content_md, status, sort_order, created_at";
const ANNOTATION_COLUMNS: &str =
    "id, chapter_id, parent_id, author, comment, quote, start_offset, end_offset, created_at";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn list_chapters(&self) -> PortResult<Vec<Chapter>> {
        let rows = sqlx::query_as::<_, ChapterRow>(&format!(
            "SELECT {} FROM chapters ORDER BY sort_order ASC, created_at ASC",
            CHAPTER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        rows.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_chapter(&self, chapter_id: Uuid) -> PortResult<Chapter> {
        sqlx::query_as::<_, ChapterRow>(&format!(
            "SELECT {} FROM chapters WHERE id = $1",
            CHAPTER_COLUMNS
        ))
        .bind(chapter_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("Chapter {} not found", chapter_id)))?
        .to_domain()
    }

    async fn create_chapter(&self, chapter: NewChapter) -> PortResult<Chapter> {
        chapter.validate()?;
        let status = chapter.status.unwrap_or_default();
        let row = sqlx::query_as::<_, ChapterRow>(&format!(
            "INSERT INTO chapters (id, title, content_md, status, sort_order)
             VALUES ($1, $2, $3, $4,
                     COALESCE($5, (SELECT COALESCE(MAX(sort_order) + 1, 0) FROM chapters)))
             RETURNING {}",
            CHAPTER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(chapter.title.trim())
        .bind(&chapter.content_md)
        .bind(status.as_str())
        .bind(chapter.sort_order)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        row.to_domain()
    }

    async fn update_chapter(&self, chapter_id: Uuid, update: ChapterUpdate) -> PortResult<Chapter> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let mut chapter = sqlx::query_as::<_, ChapterRow>(&format!(
            "SELECT {} FROM chapters WHERE id = $1 FOR UPDATE",
            CHAPTER_COLUMNS
        ))
        .bind(chapter_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(not_found_or_unexpected(format!("Chapter {} not found", chapter_id)))?
        .to_domain()?;

        let annotated: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM annotations WHERE chapter_id = $1)")
                .bind(chapter_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(unexpected)?;

        chapter.check_update(&update, annotated)?;
        chapter.apply(update);

        sqlx::query(
            "UPDATE chapters SET title = $1, content_md = $2, status = $3, sort_order = $4
             WHERE id = $5",
        )
        .bind(&chapter.title)
        .bind(&chapter.content_md)
        .bind(chapter.status.as_str())
        .bind(chapter.sort_order)
        .bind(chapter_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(chapter)
    }

    async fn delete_chapter(&self, chapter_id: Uuid) -> PortResult<usize> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let removed = sqlx::query("DELETE FROM annotations WHERE chapter_id = $1")
            .bind(chapter_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?
            .rows_affected();

        let deleted = sqlx::query("DELETE FROM chapters WHERE id = $1")
            .bind(chapter_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?
            .rows_affected();
        if deleted == 0 {
            return Err(PortError::NotFound(format!("Chapter {} not found", chapter_id)));
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(removed as usize)
    }

    async fn count_published_chapters(&self) -> PortResult<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chapters WHERE status IN ('awaiting_feedback', 'validated')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_annotations(&self, chapter_id: Uuid) -> PortResult<Vec<Annotation>> {
        let rows = sqlx::query_as::<_, AnnotationRow>(&format!(
            "SELECT {} FROM annotations WHERE chapter_id = $1 ORDER BY created_at ASC",
            ANNOTATION_COLUMNS
        ))
        .bind(chapter_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(rows.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_annotation(&self, annotation_id: Uuid) -> PortResult<Annotation> {
        let row = sqlx::query_as::<_, AnnotationRow>(&format!(
            "SELECT {} FROM annotations WHERE id = $1",
            ANNOTATION_COLUMNS
        ))
        .bind(annotation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!(
            "Annotation {} not found",
            annotation_id
        )))?;
        Ok(row.to_domain())
    }

    async fn insert_annotation(&self, record: AnnotationRecord) -> PortResult<Annotation> {
        let start_offset = to_db_offset(record.start_offset)?;
        let end_offset = to_db_offset(record.end_offset)?;
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // FOR SHARE blocks a concurrent update_chapter until this commits.
        let content_md: String =
            sqlx::query_scalar("SELECT content_md FROM chapters WHERE id = $1 FOR SHARE")
                .bind(record.chapter_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(not_found_or_unexpected(format!(
                    "Chapter {} not found",
                    record.chapter_id
                )))?;
        record.check_anchor(&content_md)?;

        let row = sqlx::query_as::<_, AnnotationRow>(&format!(
            "INSERT INTO annotations
                (id, chapter_id, parent_id, author, comment, quote, start_offset, end_offset)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {}",
            ANNOTATION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(record.chapter_id)
        .bind(record.parent_id)
        .bind(&record.author)
        .bind(&record.comment)
        .bind(&record.quote)
        .bind(start_offset)
        .bind(end_offset)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_foreign_key_violation() {
                    return PortError::NotFound(
                        "Chapter or parent annotation not found".to_string(),
                    );
                }
            }
            unexpected(e)
        })?;

        tx.commit().await.map_err(unexpected)?;
        Ok(row.to_domain())
    }

    async fn delete_annotation_tree(&self, annotation_id: Uuid) -> PortResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "WITH RECURSIVE subtree(id) AS (
                 SELECT id FROM annotations WHERE id = $1
                 UNION
                 SELECT a.id FROM annotations a JOIN subtree s ON a.parent_id = s.id
             )
             DELETE FROM annotations WHERE id IN (SELECT id FROM subtree)
             RETURNING id",
        )
        .bind(annotation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        if ids.is_empty() {
            return Err(PortError::NotFound(format!(
                "Annotation {} not found",
                annotation_id
            )));
        }
        debug!("Deleted {} annotation(s) under {}", ids.len(), annotation_id);
        Ok(ids)
    }

    async fn get_metadata(&self) -> PortResult<ProjectMetadata> {
        let rows = sqlx::query_as::<_, MetadataRow>("SELECT key, value FROM metadata")
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut metadata = self.defaults.clone();
        for row in rows {
            match row.key.as_str() {
                BOOK_TITLE_KEY => metadata.book_title = row.value,
                TOTAL_CHAPTERS_KEY => match row.value.parse::<u32>() {
                    Ok(total) => metadata.total_chapters = total,
                    Err(_) => warn!("Ignoring stored total_chapters '{}'", row.value),
                },
                _ => {}
            }
        }
        Ok(metadata)
    }

    async fn update_metadata(&self, update: MetadataUpdate) -> PortResult<ProjectMetadata> {
        let update = update.normalized()?;
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let mut pairs = Vec::new();
        if let Some(title) = &update.book_title {
            pairs.push((BOOK_TITLE_KEY, title.clone()));
        }
        if let Some(total) = update.total_chapters {
            pairs.push((TOTAL_CHAPTERS_KEY, total.to_string()));
        }
        for (key, value) in pairs {
            sqlx::query(
                "INSERT INTO metadata (key, value) VALUES ($1, $2)
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        self.get_metadata().await
    }

    async fn create_reader(&self, pseudo: &str, hashed_password: &str) -> PortResult<Reader> {
        let result = sqlx::query(
            "INSERT INTO readers (pseudo_key, pseudo, hashed_password) VALUES ($1, $2, $3)",
        )
        .bind(Reader::key(pseudo))
        .bind(pseudo.trim())
        .bind(hashed_password)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Reader {
                pseudo: pseudo.trim().to_string(),
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                PortError::Invalid(format!("Pseudo '{}' is already taken", pseudo.trim())),
            ),
            Err(e) => Err(unexpected(e)),
        }
    }

    async fn get_reader_credentials(&self, pseudo: &str) -> PortResult<ReaderCredentials> {
        let row = sqlx::query_as::<_, ReaderRow>(
            "SELECT pseudo, hashed_password FROM readers WHERE pseudo_key = $1",
        )
        .bind(Reader::key(pseudo))
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("Reader {} not found", pseudo)))?;

        Ok(ReaderCredentials {
            pseudo: row.pseudo,
            hashed_password: row.hashed_password,
        })
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        pseudo: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let purged = sqlx::query("DELETE FROM auth_sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(unexpected)?
            .rows_affected();
        if purged > 0 {
            debug!("Purged {} expired session(s)", purged);
        }

        sqlx::query("INSERT INTO auth_sessions (id, pseudo_key, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(Reader::key(pseudo))
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Reader> {
        let pseudo: Option<String> = sqlx::query_scalar(
            "SELECT r.pseudo FROM auth_sessions s
             JOIN readers r ON r.pseudo_key = s.pseudo_key
             WHERE s.id = $1 AND s.expires_at > NOW()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        pseudo
            .map(|pseudo| Reader { pseudo })
            .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
