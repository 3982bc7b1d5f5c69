//! services/api/src/adapters/memory.rs
//!
//! An in-memory implementation of the `DatabaseService` port. Used when no
//! `DATABASE_URL` is configured, and by the API tests. Nothing survives a
//! restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scribeloop_core::domain::{
    Annotation, AnnotationRecord, Chapter, ChapterUpdate, MetadataUpdate, NewChapter,
    ProjectMetadata, Reader, ReaderCredentials,
};
use scribeloop_core::ports::{DatabaseService, PortError, PortResult};
use scribeloop_core::thread::cascade_scope;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

struct AuthSessionEntry {
    pseudo_key: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Store {
    chapters: Vec<Chapter>,
    /// Insertion order, which is also creation order.
    annotations: Vec<Annotation>,
    metadata: Option<ProjectMetadata>,
    readers: HashMap<String, ReaderCredentials>,
    auth_sessions: HashMap<String, AuthSessionEntry>,
}

/// A `DatabaseService` backed by process memory.
#[derive(Clone)]
pub struct MemoryAdapter {
    store: Arc<RwLock<Store>>,
    defaults: ProjectMetadata,
}

impl MemoryAdapter {
    pub fn new(defaults: ProjectMetadata) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            defaults,
        }
    }
}

fn chapter_not_found(chapter_id: Uuid) -> PortError {
    PortError::NotFound(format!("Chapter {} not found", chapter_id))
}

fn annotation_not_found(annotation_id: Uuid) -> PortError {
    PortError::NotFound(format!("Annotation {} not found", annotation_id))
}

#[async_trait]
impl DatabaseService for MemoryAdapter {
    async fn list_chapters(&self) -> PortResult<Vec<Chapter>> {
        let store = self.store.read().await;
        let mut chapters = store.chapters.clone();
        chapters.sort_by_key(|c| (c.sort_order, c.created_at));
        Ok(chapters)
    }

    async fn get_chapter(&self, chapter_id: Uuid) -> PortResult<Chapter> {
        let store = self.store.read().await;
        store
            .chapters
            .iter()
            .find(|c| c.id == chapter_id)
            .cloned()
            .ok_or_else(|| chapter_not_found(chapter_id))
    }

    async fn create_chapter(&self, chapter: NewChapter) -> PortResult<Chapter> {
        chapter.validate()?;
        let mut store = self.store.write().await;
        let sort_order = chapter.sort_order.unwrap_or_else(|| {
            store
                .chapters
                .iter()
                .map(|c| c.sort_order + 1)
                .max()
                .unwrap_or(0)
        });
        let created = Chapter {
            id: Uuid::new_v4(),
            title: chapter.title.trim().to_string(),
            content_md: chapter.content_md,
            status: chapter.status.unwrap_or_default(),
            sort_order,
            created_at: Utc::now(),
        };
        store.chapters.push(created.clone());
        Ok(created)
    }

    async fn update_chapter(&self, chapter_id: Uuid, update: ChapterUpdate) -> PortResult<Chapter> {
        let mut store = self.store.write().await;
        let annotated = store.annotations.iter().any(|a| a.chapter_id == chapter_id);
        let chapter = store
            .chapters
            .iter_mut()
            .find(|c| c.id == chapter_id)
            .ok_or_else(|| chapter_not_found(chapter_id))?;
        chapter.check_update(&update, annotated)?;
        chapter.apply(update);
        Ok(chapter.clone())
    }

    async fn delete_chapter(&self, chapter_id: Uuid) -> PortResult<usize> {
        let mut store = self.store.write().await;
        let before = store.chapters.len();
        store.chapters.retain(|c| c.id != chapter_id);
        if store.chapters.len() == before {
            return Err(chapter_not_found(chapter_id));
        }
        let annotations = store.annotations.len();
        store.annotations.retain(|a| a.chapter_id != chapter_id);
        Ok(annotations - store.annotations.len())
    }

    async fn count_published_chapters(&self) -> PortResult<u32> {
        let store = self.store.read().await;
        let count = store
            .chapters
            .iter()
            .filter(|c| c.status.is_published())
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_annotations(&self, chapter_id: Uuid) -> PortResult<Vec<Annotation>> {
        let store = self.store.read().await;
        Ok(store
            .annotations
            .iter()
            .filter(|a| a.chapter_id == chapter_id)
            .cloned()
            .collect())
    }

    async fn get_annotation(&self, annotation_id: Uuid) -> PortResult<Annotation> {
        let store = self.store.read().await;
        store
            .annotations
            .iter()
            .find(|a| a.id == annotation_id)
            .cloned()
            .ok_or_else(|| annotation_not_found(annotation_id))
    }

    async fn insert_annotation(&self, record: AnnotationRecord) -> PortResult<Annotation> {
        let mut store = self.store.write().await;
        let chapter = store
            .chapters
            .iter()
            .find(|c| c.id == record.chapter_id)
            .ok_or_else(|| chapter_not_found(record.chapter_id))?;
        record.check_anchor(&chapter.content_md)?;
        if let Some(parent_id) = record.parent_id {
            if !store.annotations.iter().any(|a| a.id == parent_id) {
                return Err(annotation_not_found(parent_id));
            }
        }
        let annotation = record.into_annotation(Uuid::new_v4(), Utc::now());
        store.annotations.push(annotation.clone());
        Ok(annotation)
    }

    async fn delete_annotation_tree(&self, annotation_id: Uuid) -> PortResult<Vec<Uuid>> {
        let mut store = self.store.write().await;
        let scope = cascade_scope(&store.annotations, annotation_id);
        if scope.is_empty() {
            return Err(annotation_not_found(annotation_id));
        }
        let doomed: HashSet<Uuid> = scope.iter().copied().collect();
        store.annotations.retain(|a| !doomed.contains(&a.id));
        debug!("Deleted {} annotation(s) under {}", scope.len(), annotation_id);
        Ok(scope)
    }

    async fn get_metadata(&self) -> PortResult<ProjectMetadata> {
        let store = self.store.read().await;
        Ok(store
            .metadata
            .clone()
            .unwrap_or_else(|| self.defaults.clone()))
    }

    async fn update_metadata(&self, update: MetadataUpdate) -> PortResult<ProjectMetadata> {
        let update = update.normalized()?;
        let mut store = self.store.write().await;
        let mut metadata = store
            .metadata
            .clone()
            .unwrap_or_else(|| self.defaults.clone());
        update.apply_to(&mut metadata);
        store.metadata = Some(metadata.clone());
        Ok(metadata)
    }

    async fn create_reader(&self, pseudo: &str, hashed_password: &str) -> PortResult<Reader> {
        let mut store = self.store.write().await;
        let key = Reader::key(pseudo);
        if store.readers.contains_key(&key) {
            return Err(PortError::Invalid(format!(
                "Pseudo '{}' is already taken",
                pseudo.trim()
            )));
        }
        let pseudo = pseudo.trim().to_string();
        store.readers.insert(
            key,
            ReaderCredentials {
                pseudo: pseudo.clone(),
                hashed_password: hashed_password.to_string(),
            },
        );
        Ok(Reader { pseudo })
    }

    async fn get_reader_credentials(&self, pseudo: &str) -> PortResult<ReaderCredentials> {
        let store = self.store.read().await;
        store
            .readers
            .get(&Reader::key(pseudo))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Reader {} not found", pseudo)))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        pseudo: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut store = self.store.write().await;
        let pseudo_key = Reader::key(pseudo);
        if !store.readers.contains_key(&pseudo_key) {
            return Err(PortError::NotFound(format!("Reader {} not found", pseudo)));
        }
        let now = Utc::now();
        let before = store.auth_sessions.len();
        store.auth_sessions.retain(|_, s| s.expires_at > now);
        if store.auth_sessions.len() < before {
            debug!("Purged {} expired session(s)", before - store.auth_sessions.len());
        }
        store.auth_sessions.insert(
            session_id.to_string(),
            AuthSessionEntry {
                pseudo_key,
                expires_at,
            },
        );
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Reader> {
        let store = self.store.read().await;
        let session = store
            .auth_sessions
            .get(session_id)
            .filter(|s| s.expires_at > Utc::now())
            .ok_or(PortError::Unauthorized)?;
        store
            .readers
            .get(&session.pseudo_key)
            .map(|credentials| Reader {
                pseudo: credentials.pseudo.clone(),
            })
            .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        let mut store = self.store.write().await;
        store.auth_sessions.remove(session_id);
        Ok(())
    }
}
