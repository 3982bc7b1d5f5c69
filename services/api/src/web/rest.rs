//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the chapter and metadata endpoints and the
//! master definition for the OpenAPI specification.

use crate::error::reject;
use crate::web::annotations::{
    __path_create_annotation_handler, __path_create_reply_handler,
    __path_delete_annotation_handler, __path_get_thread_handler,
    __path_list_annotations_flat_handler, __path_list_annotations_handler,
    __path_rendered_chapter_handler, AnnotationResponse, CreateAnnotationRequest, CreateReplyRequest,
    DeletedResponse, RenderedChapterResponse, ThreadResponse,
};
use crate::web::auth::{__path_login_handler, __path_logout_handler, LoginRequest, ReaderResponse};
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use scribeloop_core::domain::{
    Chapter, ChapterStatus, ChapterUpdate, MetadataUpdate, NewChapter, ProgressSummary,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_chapters_handler,
        get_chapter_handler,
        create_chapter_handler,
        update_chapter_handler,
        delete_chapter_handler,
        rendered_chapter_handler,
        list_annotations_handler,
        list_annotations_flat_handler,
        create_annotation_handler,
        create_reply_handler,
        delete_annotation_handler,
        get_thread_handler,
        get_metadata_handler,
        update_metadata_handler,
        login_handler,
        logout_handler,
    ),
    components(
        schemas(
            ChapterSummaryResponse,
            ChapterResponse,
            CreateChapterRequest,
            UpdateChapterRequest,
            CreatedResponse,
            MessageResponse,
            MetadataResponse,
            UpdateMetadataRequest,
            RenderedChapterResponse,
            AnnotationResponse,
            ThreadResponse,
            CreateAnnotationRequest,
            CreateReplyRequest,
            DeletedResponse,
            LoginRequest,
            ReaderResponse,
        )
    ),
    tags(
        (name = "ScribeLoop API", description = "Manuscript chapters and anchored reader annotations.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A chapter as listed in the table of contents (no body).
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChapterSummaryResponse {
    pub id: Uuid,
    pub title: String,
    /// One of `planned`, `awaiting_feedback`, `validated`.
    pub status: String,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

impl From<Chapter> for ChapterSummaryResponse {
    fn from(chapter: Chapter) -> Self {
        Self {
            id: chapter.id,
            title: chapter.title,
            status: chapter.status.to_string(),
            sort_order: chapter.sort_order,
            created_at: chapter.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChapterResponse {
    pub id: Uuid,
    pub title: String,
    pub content_md: String,
    pub status: String,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

impl From<Chapter> for ChapterResponse {
    fn from(chapter: Chapter) -> Self {
        Self {
            id: chapter.id,
            title: chapter.title,
            content_md: chapter.content_md,
            status: chapter.status.to_string(),
            sort_order: chapter.sort_order,
            created_at: chapter.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateChapterRequest {
    pub title: String,
    pub content_md: String,
    pub status: Option<String>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateChapterRequest {
    pub title: Option<String>,
    pub content_md: Option<String>,
    pub status: Option<String>,
    pub sort_order: Option<i32>,
}

/// Returned when a resource was created.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedResponse {
    pub id: Uuid,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MetadataResponse {
    pub book_title: String,
    pub total_chapters: u32,
    pub published_chapters: u32,
    pub progress_percent: u32,
}

impl From<ProgressSummary> for MetadataResponse {
    fn from(summary: ProgressSummary) -> Self {
        Self {
            book_title: summary.book_title,
            total_chapters: summary.total_chapters,
            published_chapters: summary.published_chapters,
            progress_percent: summary.progress_percent,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateMetadataRequest {
    pub book_title: Option<String>,
    pub total_chapters: Option<i64>,
}

fn parse_status(status: Option<String>) -> Result<Option<ChapterStatus>, (StatusCode, String)> {
    status
        .map(|s| s.parse::<ChapterStatus>())
        .transpose()
        .map_err(reject)
}

//=========================================================================================
// Chapter Handlers
//=========================================================================================

/// List all chapters in reading order.
#[utoipa::path(
    get,
    path = "/api/chapters",
    responses(
        (status = 200, description = "Chapters ordered by sort_order", body = [ChapterSummaryResponse]),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_chapters_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let chapters = app_state.db.list_chapters().await.map_err(|e| {
        error!("Failed to list chapters: {:?}", e);
        reject(e)
    })?;
    let body: Vec<ChapterSummaryResponse> = chapters.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

/// Get a single chapter with its markdown body.
#[utoipa::path(
    get,
    path = "/api/chapters/{id}",
    params(("id" = Uuid, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "The chapter", body = ChapterResponse),
        (status = 404, description = "Chapter not found")
    )
)]
pub async fn get_chapter_handler(
    State(app_state): State<Arc<AppState>>,
    Path(chapter_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let chapter = app_state.db.get_chapter(chapter_id).await.map_err(|e| {
        error!("Failed to get chapter {}: {:?}", chapter_id, e);
        reject(e)
    })?;
    Ok(Json(ChapterResponse::from(chapter)))
}

/// Create a chapter (admin only).
#[utoipa::path(
    post,
    path = "/api/chapters",
    request_body = CreateChapterRequest,
    params(("x-admin-token" = String, Header, description = "Admin secret")),
    responses(
        (status = 201, description = "Chapter created", body = CreatedResponse),
        (status = 400, description = "Missing title or content, or unknown status"),
        (status = 401, description = "Missing or wrong admin token")
    )
)]
pub async fn create_chapter_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<CreateChapterRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let new_chapter = NewChapter {
        title: req.title,
        content_md: req.content_md,
        status: parse_status(req.status)?,
        sort_order: req.sort_order,
    };
    let chapter = app_state
        .db
        .create_chapter(new_chapter)
        .await
        .map_err(|e| {
            error!("Failed to create chapter: {:?}", e);
            reject(e)
        })?;

    info!("Created chapter {} ({})", chapter.id, chapter.title);
    Ok((
        StatusCode::CREATED,
        Json(CreatedResponse {
            id: chapter.id,
            message: "Chapter created".to_string(),
        }),
    ))
}

/// Update a chapter (admin only). The body of a chapter awaiting feedback
/// cannot change.
#[utoipa::path(
    put,
    path = "/api/chapters/{id}",
    request_body = UpdateChapterRequest,
    params(
        ("id" = Uuid, Path, description = "Chapter id"),
        ("x-admin-token" = String, Header, description = "Admin secret")
    ),
    responses(
        (status = 200, description = "Chapter updated", body = ChapterResponse),
        (status = 400, description = "Invalid update"),
        (status = 401, description = "Missing or wrong admin token"),
        (status = 404, description = "Chapter not found")
    )
)]
pub async fn update_chapter_handler(
    State(app_state): State<Arc<AppState>>,
    Path(chapter_id): Path<Uuid>,
    Json(req): Json<UpdateChapterRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let update = ChapterUpdate {
        title: req.title,
        content_md: req.content_md,
        status: parse_status(req.status)?,
        sort_order: req.sort_order,
    };
    let chapter = app_state
        .db
        .update_chapter(chapter_id, update)
        .await
        .map_err(|e| {
            error!("Failed to update chapter {}: {:?}", chapter_id, e);
            reject(e)
        })?;
    Ok(Json(ChapterResponse::from(chapter)))
}

/// Delete a chapter and all of its annotations (admin only).
#[utoipa::path(
    delete,
    path = "/api/chapters/{id}",
    params(
        ("id" = Uuid, Path, description = "Chapter id"),
        ("x-admin-token" = String, Header, description = "Admin secret")
    ),
    responses(
        (status = 200, description = "Chapter deleted", body = MessageResponse),
        (status = 401, description = "Missing or wrong admin token"),
        (status = 404, description = "Chapter not found")
    )
)]
pub async fn delete_chapter_handler(
    State(app_state): State<Arc<AppState>>,
    Path(chapter_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let removed = app_state.db.delete_chapter(chapter_id).await.map_err(|e| {
        error!("Failed to delete chapter {}: {:?}", chapter_id, e);
        reject(e)
    })?;

    info!(
        "Deleted chapter {} along with {} annotation(s)",
        chapter_id, removed
    );
    Ok(Json(MessageResponse {
        message: "Chapter deleted".to_string(),
    }))
}

//=========================================================================================
// Metadata Handlers
//=========================================================================================

/// Project metadata with the computed publication progress.
#[utoipa::path(
    get,
    path = "/api/metadata",
    responses(
        (status = 200, description = "Metadata and progress", body = MetadataResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_metadata_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let summary = progress_summary(&app_state).await.map_err(|e| {
        error!("Failed to fetch metadata: {:?}", e);
        reject(e)
    })?;
    Ok(Json(MetadataResponse::from(summary)))
}

/// Update the book title and/or planned chapter count (admin only).
#[utoipa::path(
    put,
    path = "/api/metadata",
    request_body = UpdateMetadataRequest,
    params(("x-admin-token" = String, Header, description = "Admin secret")),
    responses(
        (status = 200, description = "Updated metadata and progress", body = MetadataResponse),
        (status = 400, description = "Invalid title or chapter count"),
        (status = 401, description = "Missing or wrong admin token")
    )
)]
pub async fn update_metadata_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<UpdateMetadataRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let update = MetadataUpdate {
        book_title: req.book_title,
        total_chapters: req.total_chapters,
    };
    let result = async {
        app_state.db.update_metadata(update).await?;
        progress_summary(&app_state).await
    }
    .await;

    match result {
        Ok(summary) => Ok(Json(MetadataResponse::from(summary))),
        Err(e) => {
            error!("Failed to update metadata: {:?}", e);
            Err(reject(e))
        }
    }
}

async fn progress_summary(
    app_state: &AppState,
) -> scribeloop_core::ports::PortResult<ProgressSummary> {
    let metadata = app_state.db.get_metadata().await?;
    let published = app_state.db.count_published_chapters().await?;
    Ok(ProgressSummary::compute(metadata, published))
}
