//! crates/scribeloop_core/src/sidecar.rs
//!
//! The annotation sidecar: the state behind the reading view. It turns reader
//! events (mouse-up, context menu, touch selection changes, highlight clicks,
//! form submissions) into offsets, threads and submissions, and tells the
//! view which UI effects to show.
//!
//! All state lives in [`Sidecar`], owned by whoever drives the view; nothing
//! here is global.

use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::domain::{
    Annotation, ChapterStatus, NewAnnotation, NewReply, SelectionOffsets, ANONYMOUS_AUTHOR,
};
use crate::highlight::{apply_highlights, Highlights};
use crate::offsets::{selection_offsets, TextRange};
use crate::thread::{assemble_thread, AnnotationThread};
use crate::tree::TextTree;

/// Touch selections settle for this long before they are captured.
pub const SELECTION_DEBOUNCE: Duration = Duration::from_millis(500);

/// What the view should do in response to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ShowContextMenu { x: i32, y: i32 },
    HideContextMenu,
    ShowFab,
    HideFab,
    OpenSidebar,
    CloseSidebar,
}

/// The comment form's target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    /// A new root annotation over the captured selection.
    Annotation(SelectionOffsets),
    Reply {
        parent_id: Uuid,
        quote: Option<String>,
    },
}

/// A completed form, ready for the persistence API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Annotation {
        chapter_id: Uuid,
        annotation: NewAnnotation,
    },
    Reply {
        parent_id: Uuid,
        reply: NewReply,
    },
}

pub struct Sidecar<N> {
    chapter_id: Uuid,
    status: ChapterStatus,
    touch: bool,
    debounce: Duration,
    annotations: Vec<Annotation>,
    highlights: Highlights<N>,
    selection: Option<SelectionOffsets>,
    draft: Option<Draft>,
    active: Option<Uuid>,
    pending_since: Option<Instant>,
}

impl<N: Copy + Eq + std::hash::Hash> Sidecar<N> {
    pub fn new(chapter_id: Uuid, status: ChapterStatus) -> Self {
        Self {
            chapter_id,
            status,
            touch: false,
            debounce: SELECTION_DEBOUNCE,
            annotations: Vec::new(),
            highlights: Highlights::default(),
            selection: None,
            draft: None,
            active: None,
            pending_since: None,
        }
    }

    /// Enables debounced capture of selection changes (touch devices).
    pub fn with_touch(mut self, touch: bool) -> Self {
        self.touch = touch;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Selections are only captured on chapters open for feedback.
    pub fn is_enabled(&self) -> bool {
        self.status == ChapterStatus::AwaitingFeedback
    }

    pub fn chapter_id(&self) -> Uuid {
        self.chapter_id
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn highlights(&self) -> &Highlights<N> {
        &self.highlights
    }

    pub fn selection(&self) -> Option<&SelectionOffsets> {
        self.selection.as_ref()
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn active(&self) -> Option<Uuid> {
        self.active
    }

    /// Marker nodes of the active annotation, for the view to emphasise.
    pub fn active_markers(&self) -> Vec<N> {
        self.active
            .map(|id| self.highlights.markers_for(id))
            .unwrap_or_default()
    }

    /// Replaces the annotation snapshot and highlights a freshly rendered
    /// tree with it. Returns the number of markers inserted.
    pub fn load<T>(&mut self, tree: &mut T, annotations: Vec<Annotation>) -> usize
    where
        T: TextTree<Node = N>,
    {
        self.highlights = apply_highlights(&annotations, tree);
        self.annotations = annotations;
        if let Some(active) = self.active {
            if !self.annotations.iter().any(|a| a.id == active) {
                self.active = None;
            }
        }
        self.highlights.len()
    }

    /// Captures a finished mouse selection. Collapsed selections keep the
    /// previously captured one.
    pub fn mouse_up<T>(&mut self, tree: &T, selection: Option<&TextRange<N>>) -> Option<&SelectionOffsets>
    where
        T: TextTree<Node = N>,
    {
        if !self.is_enabled() {
            return None;
        }
        if let Some(offsets) = selection_offsets(tree, selection) {
            self.selection = Some(offsets);
        }
        self.selection.as_ref()
    }

    /// Right click: with an actionable selection the context menu opens at
    /// the pointer; otherwise the browser's own menu is left alone.
    pub fn context_menu<T>(
        &mut self,
        tree: &T,
        selection: Option<&TextRange<N>>,
        x: i32,
        y: i32,
    ) -> Vec<Effect>
    where
        T: TextTree<Node = N>,
    {
        if !self.is_enabled() {
            return Vec::new();
        }
        match selection_offsets(tree, selection) {
            Some(offsets) => {
                self.selection = Some(offsets);
                vec![Effect::ShowContextMenu { x, y }]
            }
            None => Vec::new(),
        }
    }

    /// Records a selection change; on touch devices this (re)starts the
    /// debounce window.
    pub fn selection_changed(&mut self, now: Instant) {
        if self.touch && self.is_enabled() {
            self.pending_since = Some(now);
        }
    }

    /// Captures the settled selection once the debounce window has passed.
    pub fn poll<T>(&mut self, tree: &T, selection: Option<&TextRange<N>>, now: Instant) -> Vec<Effect>
    where
        T: TextTree<Node = N>,
    {
        let Some(since) = self.pending_since else {
            return Vec::new();
        };
        if now.saturating_duration_since(since) < self.debounce {
            return Vec::new();
        }
        self.pending_since = None;

        match selection_offsets(tree, selection) {
            Some(offsets) => {
                self.selection = Some(offsets);
                vec![Effect::ShowFab]
            }
            None => vec![Effect::HideFab],
        }
    }

    /// Starts a new annotation over the captured selection.
    pub fn annotate(&mut self) -> Vec<Effect> {
        let Some(selection) = self.selection.clone() else {
            return Vec::new();
        };
        self.draft = Some(Draft::Annotation(selection));
        self.active = None;
        vec![Effect::HideContextMenu, Effect::HideFab, Effect::OpenSidebar]
    }

    /// A click somewhere in the content. If it lands in a highlight, the
    /// annotation's thread is returned and a reply to it is drafted.
    pub fn highlight_clicked<T>(&mut self, tree: &T, target: N) -> Option<AnnotationThread>
    where
        T: TextTree<Node = N>,
    {
        let mut clicked = None;
        self.highlights
            .click(tree, target, |annotation| clicked = Some(annotation.id));
        self.open_thread(clicked?)
    }

    /// Shows the thread of `annotation_id` from the current snapshot and
    /// drafts a reply to it.
    pub fn open_thread(&mut self, annotation_id: Uuid) -> Option<AnnotationThread> {
        let thread = assemble_thread(&self.annotations, annotation_id)?;
        self.draft = Some(Draft::Reply {
            parent_id: annotation_id,
            quote: thread.annotation.quote.clone(),
        });
        self.active = Some(annotation_id);
        Some(thread)
    }

    /// Points the form at a reply inside the open thread.
    pub fn reply_to(&mut self, annotation_id: Uuid) -> bool {
        let Some(target) = self.annotations.iter().find(|a| a.id == annotation_id) else {
            return false;
        };
        self.draft = Some(Draft::Reply {
            parent_id: annotation_id,
            quote: target.quote.clone(),
        });
        true
    }

    /// Turns the current draft and form input into a submission. Blank
    /// comments submit nothing; a blank author posts anonymously.
    pub fn submit(&self, author: &str, comment: &str) -> Option<Submission> {
        if self.status == ChapterStatus::Validated {
            return None;
        }
        let comment = comment.trim();
        if comment.is_empty() {
            return None;
        }
        let author = match author.trim() {
            "" => ANONYMOUS_AUTHOR.to_string(),
            author => author.to_string(),
        };

        match self.draft.as_ref()? {
            Draft::Annotation(selection) => Some(Submission::Annotation {
                chapter_id: self.chapter_id,
                annotation: NewAnnotation {
                    author,
                    comment: comment.to_string(),
                    quote: Some(selection.text.clone()),
                    start_offset: Some(selection.start),
                    end_offset: Some(selection.end),
                },
            }),
            Draft::Reply { parent_id, .. } => Some(Submission::Reply {
                parent_id: *parent_id,
                reply: NewReply {
                    author,
                    comment: comment.to_string(),
                },
            }),
        }
    }

    /// After a submission was stored and the snapshot reloaded, reopens the
    /// thread the reader was working in.
    pub fn reopen(&mut self, submission: &Submission, created_id: Uuid) -> Option<AnnotationThread> {
        self.selection = None;
        match submission {
            Submission::Reply { parent_id, .. } => self.open_thread(*parent_id),
            Submission::Annotation { .. } => self.open_thread(created_id),
        }
    }

    pub fn close(&mut self) -> Vec<Effect> {
        self.draft = None;
        self.active = None;
        self.selection = None;
        vec![Effect::CloseSidebar]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::render;
    use crate::offsets::{point_at, TextRange};
    use crate::tree::{ContentTree, NodeId};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    const BODY: &str = "It was a dark and stormy night.\n\nThe rain fell in torrents.";

    fn annotation(n: u128, parent: Option<u128>, range: Option<(usize, usize)>, created: i64) -> Annotation {
        Annotation {
            id: Uuid::from_u128(n),
            chapter_id: Uuid::nil(),
            parent_id: parent.map(Uuid::from_u128),
            author: "ada".to_string(),
            comment: format!("comment {}", n),
            quote: range.map(|_| "quoted".to_string()),
            start_offset: range.map(|r| r.0),
            end_offset: range.map(|r| r.1),
            created_at: Utc.timestamp_opt(1_700_000_000 + created, 0).unwrap(),
        }
    }

    fn select(tree: &ContentTree, start: usize, end: usize) -> TextRange<NodeId> {
        TextRange::new(point_at(tree, start).unwrap(), point_at(tree, end).unwrap())
    }

    fn sidecar(status: ChapterStatus) -> Sidecar<NodeId> {
        Sidecar::new(Uuid::nil(), status)
    }

    #[test]
    fn test_selection_to_submission() {
        let tree = render(BODY);
        let mut sidecar = sidecar(ChapterStatus::AwaitingFeedback);

        let captured = sidecar.mouse_up(&tree, Some(&select(&tree, 9, 13))).cloned();
        assert_eq!(
            captured,
            Some(SelectionOffsets {
                start: 9,
                end: 13,
                text: "dark".to_string(),
            })
        );
        assert_eq!(
            sidecar.annotate(),
            vec![Effect::HideContextMenu, Effect::HideFab, Effect::OpenSidebar]
        );

        assert_eq!(sidecar.submit("ada", "   "), None);
        assert_eq!(
            sidecar.submit("  ", " Love it "),
            Some(Submission::Annotation {
                chapter_id: Uuid::nil(),
                annotation: NewAnnotation {
                    author: ANONYMOUS_AUTHOR.to_string(),
                    comment: "Love it".to_string(),
                    quote: Some("dark".to_string()),
                    start_offset: Some(9),
                    end_offset: Some(13),
                },
            })
        );
    }

    #[test]
    fn test_collapsed_mouse_up_keeps_previous_selection() {
        let tree = render(BODY);
        let mut sidecar = sidecar(ChapterStatus::AwaitingFeedback);
        sidecar.mouse_up(&tree, Some(&select(&tree, 0, 2)));
        let collapsed = select(&tree, 5, 5);
        let kept = sidecar.mouse_up(&tree, Some(&collapsed)).cloned();
        assert_eq!(kept.map(|s| s.text), Some("It".to_string()));
    }

    #[test]
    fn test_locked_chapter_ignores_selections() {
        let tree = render(BODY);
        let mut sidecar = sidecar(ChapterStatus::Validated);
        assert_eq!(sidecar.mouse_up(&tree, Some(&select(&tree, 0, 2))), None);
        assert!(sidecar
            .context_menu(&tree, Some(&select(&tree, 0, 2)), 10, 10)
            .is_empty());
        assert!(sidecar.annotate().is_empty());
    }

    #[test]
    fn test_context_menu_opens_at_pointer() {
        let tree = render(BODY);
        let mut sidecar = sidecar(ChapterStatus::AwaitingFeedback);
        assert!(sidecar.context_menu(&tree, None, 3, 4).is_empty());
        assert_eq!(
            sidecar.context_menu(&tree, Some(&select(&tree, 0, 2)), 3, 4),
            vec![Effect::ShowContextMenu { x: 3, y: 4 }]
        );
        assert_eq!(sidecar.selection().map(|s| s.end), Some(2));
    }

    #[test]
    fn test_touch_selection_is_debounced() {
        let tree = render(BODY);
        let mut sidecar = sidecar(ChapterStatus::AwaitingFeedback).with_touch(true);
        let t0 = Instant::now();
        let settled = select(&tree, 18, 25);

        sidecar.selection_changed(t0);
        sidecar.selection_changed(t0 + Duration::from_millis(300));
        assert!(sidecar
            .poll(&tree, Some(&settled), t0 + Duration::from_millis(600))
            .is_empty());
        assert_eq!(
            sidecar.poll(&tree, Some(&settled), t0 + Duration::from_millis(800)),
            vec![Effect::ShowFab]
        );
        assert_eq!(sidecar.selection().map(|s| s.text.as_str()), Some("stormy "));

        // Once consumed, polling again does nothing until the next change.
        assert!(sidecar
            .poll(&tree, None, t0 + Duration::from_secs(5))
            .is_empty());
        sidecar.selection_changed(t0 + Duration::from_secs(6));
        assert_eq!(
            sidecar.poll(&tree, None, t0 + Duration::from_secs(7)),
            vec![Effect::HideFab]
        );
    }

    #[test]
    fn test_desktop_ignores_selection_changes() {
        let tree = render(BODY);
        let mut sidecar = sidecar(ChapterStatus::AwaitingFeedback);
        let t0 = Instant::now();
        sidecar.selection_changed(t0);
        assert!(sidecar
            .poll(&tree, Some(&select(&tree, 0, 2)), t0 + Duration::from_secs(1))
            .is_empty());
    }

    #[test]
    fn test_highlight_click_opens_thread_and_drafts_reply() {
        let mut tree = render(BODY);
        let mut sidecar = sidecar(ChapterStatus::AwaitingFeedback);
        let annotations = vec![
            annotation(1, None, Some((9, 13)), 0),
            annotation(2, Some(1), None, 1),
            annotation(3, Some(2), None, 2),
            annotation(4, None, Some((36, 40)), 3),
        ];
        assert_eq!(sidecar.load(&mut tree, annotations), 2);

        let marker = sidecar.highlights().markers_for(Uuid::from_u128(1))[0];
        let inner = *tree.children(marker).first().unwrap();
        let thread = sidecar.highlight_clicked(&tree, inner).unwrap();

        assert_eq!(thread.annotation.id, Uuid::from_u128(1));
        assert_eq!(thread.reply_count(), 2);
        assert_eq!(sidecar.active(), Some(Uuid::from_u128(1)));
        assert_eq!(sidecar.active_markers(), vec![marker]);
        assert_eq!(
            sidecar.draft(),
            Some(&Draft::Reply {
                parent_id: Uuid::from_u128(1),
                quote: Some("quoted".to_string()),
            })
        );

        assert!(sidecar.reply_to(Uuid::from_u128(3)));
        assert!(!sidecar.reply_to(Uuid::from_u128(99)));
        let submission = sidecar.submit("bob", "indeed").unwrap();
        assert_eq!(
            submission,
            Submission::Reply {
                parent_id: Uuid::from_u128(3),
                reply: NewReply {
                    author: "bob".to_string(),
                    comment: "indeed".to_string(),
                },
            }
        );

        // Clicking plain text does nothing.
        let plain = tree.text_nodes()[0];
        assert_eq!(sidecar.highlight_clicked(&tree, plain), None);
    }

    #[test]
    fn test_reopen_after_reload() {
        let mut sidecar = sidecar(ChapterStatus::AwaitingFeedback);
        let mut tree = render(BODY);
        sidecar.load(&mut tree, vec![annotation(1, None, Some((0, 2)), 0)]);
        let reply = Submission::Reply {
            parent_id: Uuid::from_u128(1),
            reply: NewReply {
                author: "bob".to_string(),
                comment: "yes".to_string(),
            },
        };

        let mut fresh = render(BODY);
        sidecar.load(
            &mut fresh,
            vec![
                annotation(1, None, Some((0, 2)), 0),
                annotation(2, Some(1), None, 1),
            ],
        );
        let thread = sidecar.reopen(&reply, Uuid::from_u128(2)).unwrap();
        assert_eq!(thread.annotation.id, Uuid::from_u128(1));
        assert_eq!(thread.reply_count(), 1);

        assert_eq!(sidecar.close(), vec![Effect::CloseSidebar]);
        assert_eq!(sidecar.draft(), None);
        assert_eq!(sidecar.active(), None);
    }

    #[test]
    fn test_reload_drops_deleted_active_annotation() {
        let mut sidecar = sidecar(ChapterStatus::AwaitingFeedback);
        let mut tree = render(BODY);
        sidecar.load(&mut tree, vec![annotation(1, None, Some((0, 2)), 0)]);
        sidecar.open_thread(Uuid::from_u128(1));

        let mut fresh = render(BODY);
        assert_eq!(sidecar.load(&mut fresh, Vec::new()), 0);
        assert_eq!(sidecar.active(), None);
        assert_eq!(sidecar.open_thread(Uuid::from_u128(1)), None);
    }
}
