//! services/api/src/web/annotations.rs
//!
//! Handlers for reader annotations: creation, replies, threads, cascade
//! deletion, and the highlighted rendering of a chapter.

use crate::error::reject;
use crate::web::middleware::{admin_token, current_reader};
use crate::web::rest::CreatedResponse;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use scribeloop_core::domain::{Annotation, NewAnnotation, NewReply, Reader};
use scribeloop_core::highlight::apply_highlights;
use scribeloop_core::markdown;
use scribeloop_core::offsets;
use scribeloop_core::ports::PortError;
use scribeloop_core::thread::{assemble_thread, assemble_threads, depth_of, AnnotationThread};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AnnotationResponse {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub pseudo: String,
    pub comment: String,
    pub selected_text: Option<String>,
    pub start_offset: Option<usize>,
    pub end_offset: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl From<Annotation> for AnnotationResponse {
    fn from(annotation: Annotation) -> Self {
        Self {
            id: annotation.id,
            chapter_id: annotation.chapter_id,
            parent_id: annotation.parent_id,
            pseudo: annotation.author,
            comment: annotation.comment,
            selected_text: annotation.quote,
            start_offset: annotation.start_offset,
            end_offset: annotation.end_offset,
            created_at: annotation.created_at,
        }
    }
}

/// An annotation with its nested replies, oldest first.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(no_recursion)]
pub struct ThreadResponse {
    pub annotation: AnnotationResponse,
    pub replies: Vec<ThreadResponse>,
}

impl From<AnnotationThread> for ThreadResponse {
    fn from(thread: AnnotationThread) -> Self {
        Self {
            annotation: thread.annotation.into(),
            replies: thread.replies.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateAnnotationRequest {
    /// Defaults to the logged-in reader's pseudo.
    pub pseudo: Option<String>,
    pub comment: String,
    pub start_offset: Option<usize>,
    pub end_offset: Option<usize>,
    /// Only used for annotations without offsets; anchored annotations quote
    /// the rendered chapter text.
    pub selected_text: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct CreateReplyRequest {
    pub pseudo: Option<String>,
    pub comment: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeletedResponse {
    pub message: String,
    /// The annotation and every reply removed with it.
    pub deleted: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RenderedChapterResponse {
    /// Chapter body as HTML, annotated ranges wrapped in `<mark>` elements.
    pub html: String,
    /// Normalized text length: the upper bound for annotation offsets.
    pub text_length: usize,
}

/// The pseudo from the request body, falling back to the session's reader.
async fn resolve_author(state: &AppState, headers: &HeaderMap, pseudo: Option<String>) -> String {
    match pseudo.filter(|p| !p.trim().is_empty()) {
        Some(pseudo) => pseudo,
        None => current_reader(state, headers)
            .await
            .map(|reader| reader.pseudo)
            .unwrap_or_default(),
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Render a chapter to HTML with every anchored annotation highlighted.
#[utoipa::path(
    get,
    path = "/api/chapters/{id}/rendered",
    params(("id" = Uuid, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Highlighted HTML", body = RenderedChapterResponse),
        (status = 404, description = "Chapter not found")
    )
)]
pub async fn rendered_chapter_handler(
    State(app_state): State<Arc<AppState>>,
    Path(chapter_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let result = async {
        let chapter = app_state.db.get_chapter(chapter_id).await?;
        let annotations = app_state.db.list_annotations(chapter_id).await?;
        Ok::<_, PortError>((chapter, annotations))
    }
    .await;
    let (chapter, annotations) = result.map_err(|e| {
        error!("Failed to load chapter {} for rendering: {:?}", chapter_id, e);
        reject(e)
    })?;

    let mut tree = markdown::render(&chapter.content_md);
    let text_length = offsets::text_length(&tree);
    let highlights = apply_highlights(&annotations, &mut tree);
    if highlights.is_empty() && annotations.iter().any(|a| a.anchor().is_some()) {
        warn!("No annotation of chapter {} matched its text", chapter_id);
    }

    Ok(Json(RenderedChapterResponse {
        html: tree.to_html(),
        text_length,
    }))
}

/// The annotations of a chapter as a forest of threads.
#[utoipa::path(
    get,
    path = "/api/chapters/{id}/annotations",
    params(("id" = Uuid, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Root annotations with nested replies", body = [ThreadResponse]),
        (status = 404, description = "Chapter not found")
    )
)]
pub async fn list_annotations_handler(
    State(app_state): State<Arc<AppState>>,
    Path(chapter_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let annotations = chapter_annotations(&app_state, chapter_id).await?;
    let threads: Vec<ThreadResponse> = assemble_threads(&annotations)
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(threads))
}

/// The annotations of a chapter as a flat list, oldest first.
#[utoipa::path(
    get,
    path = "/api/chapters/{id}/annotations/flat",
    params(("id" = Uuid, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Flat annotation list", body = [AnnotationResponse]),
        (status = 404, description = "Chapter not found")
    )
)]
pub async fn list_annotations_flat_handler(
    State(app_state): State<Arc<AppState>>,
    Path(chapter_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let annotations = chapter_annotations(&app_state, chapter_id).await?;
    let body: Vec<AnnotationResponse> = annotations.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

async fn chapter_annotations(
    app_state: &AppState,
    chapter_id: Uuid,
) -> Result<Vec<Annotation>, (StatusCode, String)> {
    let result = async {
        app_state.db.get_chapter(chapter_id).await?;
        app_state.db.list_annotations(chapter_id).await
    }
    .await;
    result.map_err(|e| {
        error!("Failed to list annotations of chapter {}: {:?}", chapter_id, e);
        reject(e)
    })
}

/// Create a root annotation on a chapter.
#[utoipa::path(
    post,
    path = "/api/chapters/{id}/annotations",
    request_body = CreateAnnotationRequest,
    params(("id" = Uuid, Path, description = "Chapter id")),
    responses(
        (status = 201, description = "Annotation created", body = CreatedResponse),
        (status = 400, description = "Missing pseudo or comment, invalid offsets, or validated chapter"),
        (status = 404, description = "Chapter not found")
    )
)]
pub async fn create_annotation_handler(
    State(app_state): State<Arc<AppState>>,
    Path(chapter_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<CreateAnnotationRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let author = resolve_author(&app_state, &headers, req.pseudo).await;

    let result = async {
        let chapter = app_state.db.get_chapter(chapter_id).await?;
        let text: Vec<char> = offsets::text_content(&markdown::render(&chapter.content_md))
            .chars()
            .collect();

        let quote = match (req.start_offset, req.end_offset) {
            (Some(start), Some(end)) if start < end && end <= text.len() => {
                Some(text[start..end].iter().collect())
            }
            _ => req.selected_text.filter(|t| !t.is_empty()),
        };
        let annotation = NewAnnotation {
            author,
            comment: req.comment,
            quote,
            start_offset: req.start_offset,
            end_offset: req.end_offset,
        };
        annotation.validate(&chapter, text.len())?;
        app_state
            .db
            .insert_annotation(annotation.into_record(&chapter))
            .await
    }
    .await;

    match result {
        Ok(annotation) => {
            info!(
                "Annotation {} created on chapter {} by {}",
                annotation.id, chapter_id, annotation.author
            );
            Ok((
                StatusCode::CREATED,
                Json(CreatedResponse {
                    id: annotation.id,
                    message: "Annotation created".to_string(),
                }),
            ))
        }
        Err(e) => {
            error!("Failed to create annotation: {:?}", e);
            Err(reject(e))
        }
    }
}

/// Reply to an annotation or to another reply.
#[utoipa::path(
    post,
    path = "/api/annotations/{id}/reply",
    request_body = CreateReplyRequest,
    params(("id" = Uuid, Path, description = "Parent annotation id")),
    responses(
        (status = 201, description = "Reply created", body = CreatedResponse),
        (status = 400, description = "Missing pseudo or comment, validated chapter, or thread too deep"),
        (status = 404, description = "Parent annotation not found")
    )
)]
pub async fn create_reply_handler(
    State(app_state): State<Arc<AppState>>,
    Path(parent_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<CreateReplyRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let author = resolve_author(&app_state, &headers, req.pseudo).await;

    let result = async {
        let parent = app_state
            .db
            .get_annotation(parent_id)
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => {
                    PortError::NotFound("Parent annotation not found".to_string())
                }
                other => other,
            })?;
        let chapter = app_state.db.get_chapter(parent.chapter_id).await?;
        let siblings = app_state.db.list_annotations(parent.chapter_id).await?;
        let parent_depth = depth_of(&siblings, parent.id).unwrap_or_default();
        let reply = NewReply {
            author,
            comment: req.comment,
        };
        reply.validate(&chapter, parent_depth)?;
        app_state.db.insert_annotation(reply.into_record(&parent)).await
    }
    .await;

    match result {
        Ok(reply) => {
            info!("Reply {} created under {}", reply.id, parent_id);
            Ok((
                StatusCode::CREATED,
                Json(CreatedResponse {
                    id: reply.id,
                    message: "Reply created".to_string(),
                }),
            ))
        }
        Err(e) => {
            error!("Failed to create reply: {:?}", e);
            Err(reject(e))
        }
    }
}

/// Delete an annotation together with all of its replies. Allowed for the
/// annotation's author (session cookie) and for admins.
#[utoipa::path(
    delete,
    path = "/api/annotations/{id}",
    params(
        ("id" = Uuid, Path, description = "Annotation id"),
        ("x-admin-token" = Option<String>, Header, description = "Admin secret")
    ),
    responses(
        (status = 200, description = "Annotation and replies deleted", body = DeletedResponse),
        (status = 401, description = "Neither a reader session nor an admin token"),
        (status = 403, description = "Not the author of the annotation"),
        (status = 404, description = "Annotation not found")
    )
)]
pub async fn delete_annotation_handler(
    State(app_state): State<Arc<AppState>>,
    Path(annotation_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let is_admin = app_state.is_admin_token(admin_token(&headers));
    let reader = current_reader(&app_state, &headers).await;

    let result = async {
        let annotation = app_state.db.get_annotation(annotation_id).await?;
        if !Reader::may_delete(reader.as_ref(), &annotation, is_admin) {
            return Err(match reader {
                None => PortError::Unauthorized,
                Some(_) => PortError::Forbidden(
                    "Only the author or an admin can delete this annotation".to_string(),
                ),
            });
        }
        app_state.db.delete_annotation_tree(annotation_id).await
    }
    .await;

    match result {
        Ok(deleted) => {
            info!(
                "Deleted annotation {} and {} repl(ies)",
                annotation_id,
                deleted.len().saturating_sub(1)
            );
            Ok(Json(DeletedResponse {
                message: "Annotation deleted".to_string(),
                deleted,
            }))
        }
        Err(e) => {
            error!("Failed to delete annotation {}: {:?}", annotation_id, e);
            Err(reject(e))
        }
    }
}

/// The thread rooted at an annotation.
#[utoipa::path(
    get,
    path = "/api/annotations/{id}/thread",
    params(("id" = Uuid, Path, description = "Annotation id")),
    responses(
        (status = 200, description = "The annotation with nested replies", body = ThreadResponse),
        (status = 404, description = "Annotation not found")
    )
)]
pub async fn get_thread_handler(
    State(app_state): State<Arc<AppState>>,
    Path(annotation_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let result = async {
        let annotation = app_state.db.get_annotation(annotation_id).await?;
        let annotations = app_state.db.list_annotations(annotation.chapter_id).await?;
        assemble_thread(&annotations, annotation_id)
            .ok_or_else(|| PortError::NotFound(format!("Annotation {} not found", annotation_id)))
    }
    .await;

    match result {
        Ok(thread) => Ok(Json(ThreadResponse::from(thread))),
        Err(e) => {
            error!("Failed to load thread {}: {:?}", annotation_id, e);
            Err(reject(e))
        }
    }
}
