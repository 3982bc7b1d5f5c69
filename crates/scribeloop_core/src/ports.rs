//! crates/scribeloop_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific storage choices (PostgreSQL, in-memory, ...).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Annotation, AnnotationRecord, Chapter, ChapterUpdate, MetadataUpdate, NewChapter,
    ProjectMetadata, Reader, ReaderCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    Invalid(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Chapters ---
    /// All chapters ordered by `sort_order`.
    async fn list_chapters(&self) -> PortResult<Vec<Chapter>>;

    async fn get_chapter(&self, chapter_id: Uuid) -> PortResult<Chapter>;

    async fn create_chapter(&self, chapter: NewChapter) -> PortResult<Chapter>;

    async fn update_chapter(&self, chapter_id: Uuid, update: ChapterUpdate) -> PortResult<Chapter>;

    /// Deletes the chapter and its annotations, returning how many annotations went with it.
    async fn delete_chapter(&self, chapter_id: Uuid) -> PortResult<usize>;

    async fn count_published_chapters(&self) -> PortResult<u32>;

    // --- Annotations ---
    /// The flat annotation list of one chapter, oldest first.
    async fn list_annotations(&self, chapter_id: Uuid) -> PortResult<Vec<Annotation>>;

    async fn get_annotation(&self, annotation_id: Uuid) -> PortResult<Annotation>;

    async fn insert_annotation(&self, record: AnnotationRecord) -> PortResult<Annotation>;

    /// Deletes an annotation together with every descendant reply.
    /// Returns the ids that were removed.
    async fn delete_annotation_tree(&self, annotation_id: Uuid) -> PortResult<Vec<Uuid>>;

    // --- Project metadata ---
    async fn get_metadata(&self) -> PortResult<ProjectMetadata>;

    async fn update_metadata(&self, update: MetadataUpdate) -> PortResult<ProjectMetadata>;

    // --- Readers ---
    async fn create_reader(&self, pseudo: &str, hashed_password: &str) -> PortResult<Reader>;

    async fn get_reader_credentials(&self, pseudo: &str) -> PortResult<ReaderCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        pseudo: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Reader>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;
}
