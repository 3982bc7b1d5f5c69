//! crates/scribeloop_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application along with the
//! business rules that apply to them. These structs are independent of any
//! database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use uuid::Uuid;

use crate::ports::{PortError, PortResult};
use crate::thread::MAX_THREAD_DEPTH;

/// Display name used when a reader submits without a pseudo.
pub const ANONYMOUS_AUTHOR: &str = "Anonymous";

//=========================================================================================
// Chapters
//=========================================================================================

/// Publication state of a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChapterStatus {
    #[default]
    Planned,
    AwaitingFeedback,
    Validated,
}

impl ChapterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterStatus::Planned => "planned",
            ChapterStatus::AwaitingFeedback => "awaiting_feedback",
            ChapterStatus::Validated => "validated",
        }
    }

    /// Published chapters count towards the progress summary.
    pub fn is_published(&self) -> bool {
        matches!(
            self,
            ChapterStatus::AwaitingFeedback | ChapterStatus::Validated
        )
    }
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChapterStatus {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(ChapterStatus::Planned),
            "awaiting_feedback" => Ok(ChapterStatus::AwaitingFeedback),
            "validated" => Ok(ChapterStatus::Validated),
            other => Err(PortError::Invalid(format!(
                "Unknown chapter status '{}'",
                other
            ))),
        }
    }
}

/// A manuscript chapter. The body is markdown.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub id: Uuid,
    pub title: String,
    pub content_md: String,
    pub status: ChapterStatus,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

impl Chapter {
    /// Validated chapters are closed: no new annotations or replies.
    pub fn accepts_feedback(&self) -> bool {
        self.status != ChapterStatus::Validated
    }

    pub fn ensure_accepts_feedback(&self) -> PortResult<()> {
        if self.accepts_feedback() {
            Ok(())
        } else {
            Err(PortError::Invalid(
                "Cannot annotate a validated chapter".to_string(),
            ))
        }
    }

    /// Checks an update against the immutability rule: the body is frozen
    /// while the chapter awaits feedback, and for good once `annotated` is
    /// true, since stored offsets point into it.
    pub fn check_update(&self, update: &ChapterUpdate, annotated: bool) -> PortResult<()> {
        if let Some(content_md) = &update.content_md {
            if *content_md != self.content_md {
                if annotated {
                    return Err(PortError::Invalid(
                        "Cannot modify content of an annotated chapter".to_string(),
                    ));
                }
                if self.status == ChapterStatus::AwaitingFeedback {
                    return Err(PortError::Invalid(
                        "Cannot modify content of a chapter awaiting feedback".to_string(),
                    ));
                }
            }
            if content_md.trim().is_empty() {
                return Err(PortError::Invalid("content_md cannot be empty".to_string()));
            }
        }
        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                return Err(PortError::Invalid("title cannot be empty".to_string()));
            }
        }
        Ok(())
    }

    /// Applies the present fields of `update` in place.
    pub fn apply(&mut self, update: ChapterUpdate) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(content_md) = update.content_md {
            self.content_md = content_md;
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(sort_order) = update.sort_order {
            self.sort_order = sort_order;
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewChapter {
    pub title: String,
    pub content_md: String,
    pub status: Option<ChapterStatus>,
    /// `None` appends the chapter after the current last one.
    pub sort_order: Option<i32>,
}

impl NewChapter {
    pub fn validate(&self) -> PortResult<()> {
        if self.title.trim().is_empty() || self.content_md.trim().is_empty() {
            return Err(PortError::Invalid(
                "Title and content_md are required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChapterUpdate {
    pub title: Option<String>,
    pub content_md: Option<String>,
    pub status: Option<ChapterStatus>,
    pub sort_order: Option<i32>,
}

//=========================================================================================
// Annotations
//=========================================================================================

/// A reader comment. Roots carry a `[start, end)` range in normalized chapter
/// text; replies point at a parent and carry no offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub author: String,
    pub comment: String,
    /// Text covered at creation time, kept for display only.
    pub quote: Option<String>,
    pub start_offset: Option<usize>,
    pub end_offset: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl Annotation {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// The highlight range, present only for roots that carry both offsets.
    pub fn anchor(&self) -> Option<Range<usize>> {
        if !self.is_root() {
            return None;
        }
        match (self.start_offset, self.end_offset) {
            (Some(start), Some(end)) => Some(start..end),
            _ => None,
        }
    }
}

/// The offsets and text captured from a reader selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionOffsets {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// A root annotation as submitted by a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnnotation {
    pub author: String,
    pub comment: String,
    pub quote: Option<String>,
    pub start_offset: Option<usize>,
    pub end_offset: Option<usize>,
}

impl NewAnnotation {
    /// Validates the submission against the chapter it targets.
    /// `text_length` is the normalized length of the rendered chapter body.
    pub fn validate(&self, chapter: &Chapter, text_length: usize) -> PortResult<()> {
        chapter.ensure_accepts_feedback()?;
        require_author_and_comment(&self.author, &self.comment)?;

        match (self.start_offset, self.end_offset) {
            (None, None) => Ok(()),
            (Some(start), Some(end)) if start < end && end <= text_length => Ok(()),
            (Some(_), Some(_)) => Err(PortError::Invalid("Invalid offsets".to_string())),
            _ => Err(PortError::Invalid(
                "start_offset and end_offset must be given together".to_string(),
            )),
        }
    }

    /// Builds the stored record. Anchored annotations keep the body their
    /// offsets were checked against, so the store can refuse the insert if
    /// the chapter changed in between.
    pub fn into_record(self, chapter: &Chapter) -> AnnotationRecord {
        let anchored_to = self
            .start_offset
            .is_some()
            .then(|| chapter.content_md.clone());
        AnnotationRecord {
            chapter_id: chapter.id,
            parent_id: None,
            author: self.author.trim().to_string(),
            comment: self.comment.trim().to_string(),
            quote: self.quote,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            anchored_to,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReply {
    pub author: String,
    pub comment: String,
}

impl NewReply {
    /// `parent_depth` is the depth of the annotation replied to, its root
    /// being at depth 0.
    pub fn validate(&self, chapter: &Chapter, parent_depth: usize) -> PortResult<()> {
        chapter.ensure_accepts_feedback()?;
        require_author_and_comment(&self.author, &self.comment)?;
        if parent_depth >= MAX_THREAD_DEPTH {
            return Err(PortError::Invalid(format!(
                "Threads are limited to {} levels of replies",
                MAX_THREAD_DEPTH
            )));
        }
        Ok(())
    }

    /// Builds the stored record. The quote is inherited from the parent so
    /// the thread can be displayed without walking back to the root.
    pub fn into_record(self, parent: &Annotation) -> AnnotationRecord {
        AnnotationRecord {
            chapter_id: parent.chapter_id,
            parent_id: Some(parent.id),
            author: self.author.trim().to_string(),
            comment: self.comment.trim().to_string(),
            quote: parent.quote.clone(),
            start_offset: None,
            end_offset: None,
            anchored_to: None,
        }
    }
}

/// An annotation ready to be persisted; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct AnnotationRecord {
    pub chapter_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub author: String,
    pub comment: String,
    pub quote: Option<String>,
    pub start_offset: Option<usize>,
    pub end_offset: Option<usize>,
    /// Chapter body the offsets were validated against. Not persisted.
    pub anchored_to: Option<String>,
}

impl AnnotationRecord {
    /// Fails when the chapter body no longer matches the one the offsets
    /// were computed from.
    pub fn check_anchor(&self, content_md: &str) -> PortResult<()> {
        match &self.anchored_to {
            Some(anchored) if anchored != content_md => Err(PortError::Invalid(
                "Chapter content changed while annotating, reload and try again".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn into_annotation(self, id: Uuid, created_at: DateTime<Utc>) -> Annotation {
        Annotation {
            id,
            chapter_id: self.chapter_id,
            parent_id: self.parent_id,
            author: self.author,
            comment: self.comment,
            quote: self.quote,
            start_offset: self.start_offset,
            end_offset: self.end_offset,
            created_at,
        }
    }
}

fn require_author_and_comment(author: &str, comment: &str) -> PortResult<()> {
    if author.trim().is_empty() || comment.trim().is_empty() {
        return Err(PortError::Invalid(
            "Pseudo and comment are required".to_string(),
        ));
    }
    Ok(())
}

//=========================================================================================
// Project metadata
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub book_title: String,
    pub total_chapters: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub book_title: Option<String>,
    pub total_chapters: Option<i64>,
}

impl MetadataUpdate {
    /// Validates and normalizes the update (the title is trimmed).
    pub fn normalized(self) -> PortResult<Self> {
        let book_title = match self.book_title {
            Some(title) if title.trim().is_empty() => {
                return Err(PortError::Invalid(
                    "book_title must be a non-empty string".to_string(),
                ))
            }
            Some(title) => Some(title.trim().to_string()),
            None => None,
        };
        if let Some(total) = self.total_chapters {
            if total < 0 || total > i64::from(u32::MAX) {
                return Err(PortError::Invalid(
                    "total_chapters must be a non-negative integer".to_string(),
                ));
            }
        }
        Ok(Self {
            book_title,
            total_chapters: self.total_chapters,
        })
    }

    pub fn apply_to(&self, metadata: &mut ProjectMetadata) {
        if let Some(title) = &self.book_title {
            metadata.book_title = title.clone();
        }
        if let Some(total) = self.total_chapters {
            metadata.total_chapters = total as u32;
        }
    }
}

/// Metadata plus the computed publication progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSummary {
    pub book_title: String,
    pub total_chapters: u32,
    pub published_chapters: u32,
    pub progress_percent: u32,
}

impl ProgressSummary {
    pub fn compute(metadata: ProjectMetadata, published_chapters: u32) -> Self {
        let progress_percent = if metadata.total_chapters == 0 {
            0
        } else {
            let ratio = f64::from(published_chapters) / f64::from(metadata.total_chapters);
            (ratio * 100.0).round() as u32
        };
        Self {
            book_title: metadata.book_title,
            total_chapters: metadata.total_chapters,
            published_chapters,
            progress_percent,
        }
    }
}

//=========================================================================================
// Readers
//=========================================================================================

// Represents a reader - used throughout app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reader {
    pub pseudo: String,
}

impl Reader {
    /// Lookup key for a pseudo: pseudos are unique regardless of case.
    pub fn key(pseudo: &str) -> String {
        pseudo.trim().to_lowercase()
    }

    /// Authors may delete their own annotations; admins may delete any.
    pub fn may_delete(reader: Option<&Reader>, annotation: &Annotation, is_admin: bool) -> bool {
        is_admin || reader.is_some_and(|r| r.pseudo == annotation.author)
    }
}

// Only used internally for login - contains sensitive data
#[derive(Debug, Clone)]
pub struct ReaderCredentials {
    pub pseudo: String,
    pub hashed_password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn chapter(status: ChapterStatus) -> Chapter {
        Chapter {
            id: Uuid::new_v4(),
            title: "One".to_string(),
            content_md: "Hello world".to_string(),
            status,
            sort_order: 0,
            created_at: Utc::now(),
        }
    }

    fn new_annotation(start: Option<usize>, end: Option<usize>) -> NewAnnotation {
        NewAnnotation {
            author: "ada".to_string(),
            comment: "nice".to_string(),
            quote: None,
            start_offset: start,
            end_offset: end,
        }
    }

    #[rstest]
    #[case(Some(0), Some(5), true)]
    #[case(Some(6), Some(11), true)]
    #[case(None, None, true)]
    #[case(Some(5), Some(5), false)]
    #[case(Some(6), Some(3), false)]
    #[case(Some(0), Some(12), false)]
    #[case(Some(0), None, false)]
    fn test_annotation_offsets_are_validated(
        #[case] start: Option<usize>,
        #[case] end: Option<usize>,
        #[case] valid: bool,
    ) {
        let chapter = chapter(ChapterStatus::AwaitingFeedback);
        let result = new_annotation(start, end).validate(&chapter, 11);
        assert_eq!(result.is_ok(), valid, "{:?}", result);
    }

    #[test]
    fn test_validated_chapter_rejects_feedback() {
        let chapter = chapter(ChapterStatus::Validated);
        assert!(new_annotation(Some(0), Some(1)).validate(&chapter, 11).is_err());
        let reply = NewReply {
            author: "ada".to_string(),
            comment: "agreed".to_string(),
        };
        assert!(reply.validate(&chapter, 0).is_err());
    }

    #[test]
    fn test_reply_depth_is_capped() {
        let chapter = chapter(ChapterStatus::AwaitingFeedback);
        let reply = NewReply {
            author: "ada".to_string(),
            comment: "deeper".to_string(),
        };
        assert!(reply.validate(&chapter, 0).is_ok());
        assert!(reply.validate(&chapter, MAX_THREAD_DEPTH - 1).is_ok());
        assert!(matches!(
            reply.validate(&chapter, MAX_THREAD_DEPTH),
            Err(PortError::Invalid(_))
        ));
    }

    #[test]
    fn test_blank_comment_is_rejected() {
        let chapter = chapter(ChapterStatus::AwaitingFeedback);
        let mut annotation = new_annotation(None, None);
        annotation.comment = "   ".to_string();
        assert!(matches!(
            annotation.validate(&chapter, 11),
            Err(PortError::Invalid(_))
        ));
    }

    #[test]
    fn test_body_is_frozen_while_awaiting_feedback() {
        let chapter = chapter(ChapterStatus::AwaitingFeedback);
        let changed = ChapterUpdate {
            content_md: Some("Changed".to_string()),
            ..Default::default()
        };
        assert!(chapter.check_update(&changed, false).is_err());

        let identical = ChapterUpdate {
            content_md: Some("Hello world".to_string()),
            status: Some(ChapterStatus::Validated),
            ..Default::default()
        };
        assert!(chapter.check_update(&identical, false).is_ok());

        let planned = self::chapter(ChapterStatus::Planned);
        assert!(planned.check_update(&changed, false).is_ok());
    }

    #[rstest]
    #[case(ChapterStatus::Planned)]
    #[case(ChapterStatus::AwaitingFeedback)]
    #[case(ChapterStatus::Validated)]
    fn test_body_is_frozen_once_annotated(#[case] status: ChapterStatus) {
        let chapter = chapter(status);
        let changed = ChapterUpdate {
            content_md: Some("Changed".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            chapter.check_update(&changed, true),
            Err(PortError::Invalid(_))
        ));

        let retitled = ChapterUpdate {
            title: Some("Renamed".to_string()),
            content_md: Some("Hello world".to_string()),
            status: Some(ChapterStatus::Planned),
            ..Default::default()
        };
        assert!(chapter.check_update(&retitled, true).is_ok());
    }

    #[test]
    fn test_anchored_record_remembers_the_body() {
        let chapter = chapter(ChapterStatus::AwaitingFeedback);
        let record = new_annotation(Some(0), Some(5)).into_record(&chapter);
        assert_eq!(record.chapter_id, chapter.id);
        assert!(record.check_anchor("Hello world").is_ok());
        assert!(record.check_anchor("Goodbye world").is_err());

        let unanchored = new_annotation(None, None).into_record(&chapter);
        assert_eq!(unanchored.anchored_to, None);
        assert!(unanchored.check_anchor("Goodbye world").is_ok());
    }

    #[test]
    fn test_reply_inherits_parent_quote_without_offsets() {
        let parent = Annotation {
            id: Uuid::new_v4(),
            chapter_id: Uuid::new_v4(),
            parent_id: None,
            author: "ada".to_string(),
            comment: "root".to_string(),
            quote: Some("world".to_string()),
            start_offset: Some(6),
            end_offset: Some(11),
            created_at: Utc::now(),
        };
        let record = NewReply {
            author: " bob ".to_string(),
            comment: "reply".to_string(),
        }
        .into_record(&parent);

        assert_eq!(record.parent_id, Some(parent.id));
        assert_eq!(record.chapter_id, parent.chapter_id);
        assert_eq!(record.quote.as_deref(), Some("world"));
        assert_eq!(record.author, "bob");
        assert_eq!(record.start_offset, None);
        assert_eq!(record.end_offset, None);
    }

    #[rstest]
    #[case(10, 3, 30)]
    #[case(3, 2, 67)]
    #[case(0, 4, 0)]
    #[case(4, 4, 100)]
    fn test_progress_percent(#[case] total: u32, #[case] published: u32, #[case] percent: u32) {
        let metadata = ProjectMetadata {
            book_title: "Book".to_string(),
            total_chapters: total,
        };
        let summary = ProgressSummary::compute(metadata, published);
        assert_eq!(summary.progress_percent, percent);
    }

    #[test]
    fn test_metadata_update_validation() {
        let blank = MetadataUpdate {
            book_title: Some("  ".to_string()),
            total_chapters: None,
        };
        assert!(blank.normalized().is_err());

        let negative = MetadataUpdate {
            book_title: None,
            total_chapters: Some(-1),
        };
        assert!(negative.normalized().is_err());

        let update = MetadataUpdate {
            book_title: Some("  My Book ".to_string()),
            total_chapters: Some(12),
        }
        .normalized()
        .unwrap();
        let mut metadata = ProjectMetadata {
            book_title: "Old".to_string(),
            total_chapters: 1,
        };
        update.apply_to(&mut metadata);
        assert_eq!(metadata.book_title, "My Book");
        assert_eq!(metadata.total_chapters, 12);
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            ChapterStatus::Planned,
            ChapterStatus::AwaitingFeedback,
            ChapterStatus::Validated,
        ] {
            assert_eq!(status.as_str().parse::<ChapterStatus>().unwrap(), status);
        }
        assert!("draft".parse::<ChapterStatus>().is_err());
    }

    #[test]
    fn test_only_author_or_admin_may_delete() {
        let annotation = Annotation {
            id: Uuid::new_v4(),
            chapter_id: Uuid::new_v4(),
            parent_id: None,
            author: "ada".to_string(),
            comment: "c".to_string(),
            quote: None,
            start_offset: None,
            end_offset: None,
            created_at: Utc::now(),
        };
        let ada = Reader {
            pseudo: "ada".to_string(),
        };
        let bob = Reader {
            pseudo: "bob".to_string(),
        };
        assert!(Reader::may_delete(Some(&ada), &annotation, false));
        assert!(!Reader::may_delete(Some(&bob), &annotation, false));
        assert!(!Reader::may_delete(None, &annotation, false));
        assert!(Reader::may_delete(None, &annotation, true));
    }
}
