//! crates/scribeloop_core/src/highlight.rs
//!
//! Re-inserts highlight markers for stored annotations into a rendered tree.
//!
//! Annotations are applied from the highest start offset down. Wrapping a
//! range splits a text leaf into up to three pieces; going right to left keeps
//! the leaves to the left of the current range untouched for the ranges that
//! are still to come. Every annotation re-walks the current leaves, so
//! overlapping ranges end up as separate, nested markers.

use std::collections::HashMap;
use std::ops::Range;
use tracing::debug;
use uuid::Uuid;

use crate::domain::Annotation;
use crate::offsets::{normalized_len, raw_offset};
use crate::tree::{Fragment, TextTree};

/// Where, inside one text leaf, an annotation range begins and ends.
/// Local offsets are in normalized chars of that leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightMatch<N> {
    pub node: N,
    pub local_start: usize,
    pub local_end: usize,
}

/// Walks the text leaves of `tree` and returns the local intersection of
/// `range` with each leaf it touches. Ranges outside the text produce no
/// matches.
pub fn collect_matches<T: TextTree>(tree: &T, range: Range<usize>) -> Vec<HighlightMatch<T::Node>> {
    let mut matches = Vec::new();
    let mut cursor = 0;

    for node in tree.text_nodes() {
        let len = tree.text(node).map(normalized_len).unwrap_or(0);
        let node_start = cursor;
        let node_end = cursor + len;
        cursor = node_end;

        if node_end <= range.start || node_start >= range.end {
            continue;
        }

        let local_start = range.start.saturating_sub(node_start);
        let local_end = len.min(range.end - node_start);
        if local_start < local_end {
            matches.push(HighlightMatch {
                node,
                local_start,
                local_end,
            });
        }
    }

    matches
}

/// The markers inserted by one reconciliation pass, keyed by marker node.
#[derive(Debug, Clone)]
pub struct Highlights<N> {
    markers: HashMap<N, Annotation>,
    order: Vec<N>,
}

impl<N: Copy + Eq + std::hash::Hash> Default for Highlights<N> {
    fn default() -> Self {
        Self {
            markers: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<N: Copy + Eq + std::hash::Hash> Highlights<N> {
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of marker nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Marker nodes in insertion order.
    pub fn markers(&self) -> &[N] {
        &self.order
    }

    pub fn annotation(&self, marker: N) -> Option<&Annotation> {
        self.markers.get(&marker)
    }

    /// Marker nodes belonging to one annotation.
    pub fn markers_for(&self, annotation_id: Uuid) -> Vec<N> {
        self.order
            .iter()
            .copied()
            .filter(|marker| self.markers[marker].id == annotation_id)
            .collect()
    }

    /// Dispatches a click on `target`: the nearest enclosing marker handles it
    /// and the click goes no further, so nested markers fire independently.
    /// Returns whether a marker handled the click.
    pub fn click<T, F>(&self, tree: &T, target: N, on_click: F) -> bool
    where
        T: TextTree<Node = N>,
        F: FnOnce(&Annotation),
    {
        let mut current = Some(target);
        while let Some(node) = current {
            if let Some(annotation) = self.markers.get(&node) {
                on_click(annotation);
                return true;
            }
            current = tree.parent(node);
        }
        false
    }

    fn insert(&mut self, marker: N, annotation: &Annotation) {
        self.markers.insert(marker, annotation.clone());
        self.order.push(marker);
    }
}

/// Wraps the text covered by every root annotation in a marker.
///
/// Replies and roots without both offsets are ignored; when nothing
/// qualifies the tree is left untouched.
pub fn apply_highlights<T: TextTree>(annotations: &[Annotation], tree: &mut T) -> Highlights<T::Node> {
    let mut highlights = Highlights::default();

    let mut candidates: Vec<(&Annotation, Range<usize>)> = annotations
        .iter()
        .filter_map(|annotation| annotation.anchor().map(|range| (annotation, range)))
        .collect();
    if candidates.is_empty() {
        return highlights;
    }
    candidates.sort_by_key(|(_, range)| range.start);

    for (annotation, range) in candidates.into_iter().rev() {
        // Collect against the unmodified tree before splitting anything.
        let matches = collect_matches(tree, range.clone());
        if matches.is_empty() {
            debug!(
                "Annotation {} ({}..{}) matched no text",
                annotation.id, range.start, range.end
            );
            continue;
        }

        for m in matches {
            if !tree.is_attached(m.node) {
                debug!("Skipping detached text node {:?}", m.node);
                continue;
            }
            let Some(raw) = tree.text(m.node).map(str::to_owned) else {
                continue;
            };
            let fragments = split_fragments(&raw, m.local_start, m.local_end, annotation.id);
            let Some(inserted) = tree.replace_text(m.node, fragments.clone()) else {
                continue;
            };
            for (node, fragment) in inserted.into_iter().zip(&fragments) {
                if matches!(fragment, Fragment::Marker { .. }) {
                    highlights.insert(node, annotation);
                }
            }
        }
    }

    highlights
}

/// Splits a leaf's raw text into before / marker / after fragments, dropping
/// empty text pieces.
fn split_fragments(raw: &str, local_start: usize, local_end: usize, annotation_id: Uuid) -> Vec<Fragment> {
    let start = raw_offset(raw, local_start);
    let end = raw_offset(raw, local_end);
    let chars: Vec<char> = raw.chars().collect();

    let before: String = chars[..start].iter().collect();
    let marked: String = chars[start..end].iter().collect();
    let after: String = chars[end..].iter().collect();

    let mut fragments = Vec::with_capacity(3);
    if !before.is_empty() {
        fragments.push(Fragment::Text(before));
    }
    fragments.push(Fragment::Marker {
        annotation_id,
        text: marked,
    });
    if !after.is_empty() {
        fragments.push(Fragment::Text(after));
    }
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offsets::{text_content, TextRange};
    use crate::tree::{ContentTree, NodeId};
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn root(start: usize, end: usize) -> Annotation {
        Annotation {
            id: Uuid::new_v4(),
            chapter_id: Uuid::nil(),
            parent_id: None,
            author: "ada".to_string(),
            comment: "note".to_string(),
            quote: None,
            start_offset: Some(start),
            end_offset: Some(end),
            created_at: at(0),
        }
    }

    fn tree_of(parts: &[&str]) -> (ContentTree, Vec<NodeId>) {
        let mut tree = ContentTree::new();
        let p = tree.append_element(tree.root(), "p");
        let nodes = parts.iter().map(|part| tree.append_text(p, part)).collect();
        (tree, nodes)
    }

    fn marked_text(tree: &ContentTree, highlights: &Highlights<NodeId>, id: Uuid) -> String {
        highlights
            .markers_for(id)
            .into_iter()
            .map(|marker| tree.text_content(marker))
            .collect()
    }

    #[test]
    fn test_empty_annotation_list_leaves_tree_untouched() {
        let mut tree = crate::markdown::render("# Title\n\nSome *text* here.");
        let before = tree.to_html();
        let highlights = apply_highlights(&[], &mut tree);
        assert!(highlights.is_empty());
        assert_eq!(tree.to_html(), before);
    }

    #[test]
    fn test_replies_and_unanchored_roots_are_not_highlighted() {
        let (mut tree, _) = tree_of(&["Hello world"]);
        let before = tree.to_html();

        let mut reply = root(0, 5);
        reply.parent_id = Some(Uuid::new_v4());
        let mut unanchored = root(0, 5);
        unanchored.end_offset = None;

        let highlights = apply_highlights(&[reply, unanchored], &mut tree);
        assert!(highlights.is_empty());
        assert_eq!(tree.to_html(), before);
    }

    #[test]
    fn test_out_of_bounds_annotation_matches_nothing() {
        let (mut tree, _) = tree_of(&["Hello"]);
        assert!(collect_matches(&tree, 5..9).is_empty());
        let highlights = apply_highlights(&[root(7, 9)], &mut tree);
        assert!(highlights.is_empty());
        assert_eq!(tree.to_html(), "<p>Hello</p>");
    }

    #[test]
    fn test_range_across_two_boundaries_matches_three_leaves() {
        let (tree, nodes) = tree_of(&["abcd", "efgh", "ijkl", "mnop"]);
        let matches = collect_matches(&tree, 2..10);
        assert_eq!(
            matches,
            vec![
                HighlightMatch {
                    node: nodes[0],
                    local_start: 2,
                    local_end: 4,
                },
                HighlightMatch {
                    node: nodes[1],
                    local_start: 0,
                    local_end: 4,
                },
                HighlightMatch {
                    node: nodes[2],
                    local_start: 0,
                    local_end: 2,
                },
            ]
        );
        let total: usize = matches.iter().map(|m| m.local_end - m.local_start).sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn test_single_annotation_is_fully_covered() {
        let mut tree = crate::markdown::render("The *quick* brown\n\nfox **jumps** over");
        let text = text_content(&tree);
        let annotation = root(6, 24);
        let expected: String = text.chars().skip(6).take(18).collect();

        let highlights = apply_highlights(std::slice::from_ref(&annotation), &mut tree);

        assert_eq!(marked_text(&tree, &highlights, annotation.id), expected);
        assert_eq!(text_content(&tree), text);
        assert!(highlights.len() > 1);
    }

    #[test]
    fn test_marker_splits_leaf_and_is_tagged() {
        let (mut tree, _) = tree_of(&["Hello world"]);
        let annotation = root(6, 11);
        apply_highlights(std::slice::from_ref(&annotation), &mut tree);
        assert_eq!(
            tree.to_html(),
            format!(
                "<p>Hello <mark class=\"highlight\" data-annotation-id=\"{}\">world</mark></p>",
                annotation.id
            )
        );
    }

    #[test]
    fn test_carriage_returns_do_not_shift_markers() {
        let (mut tree, _) = tree_of(&["ab\r\ncd\ref"]);
        // Normalized text is "ab\ncd\nef"; cover "cd\ne".
        let annotation = root(3, 7);
        let highlights = apply_highlights(std::slice::from_ref(&annotation), &mut tree);
        assert_eq!(marked_text(&tree, &highlights, annotation.id), "cd\re");
    }

    #[test]
    fn test_overlapping_annotations_get_independent_markers() {
        let (mut tree, _) = tree_of(&["0123456789abcdefghij"]);
        let left = root(0, 10);
        let right = root(5, 15);
        let highlights = apply_highlights(&[left.clone(), right.clone()], &mut tree);

        assert_eq!(marked_text(&tree, &highlights, left.id), "0123456789");
        assert_eq!(marked_text(&tree, &highlights, right.id), "56789abcde");

        let clicked = RefCell::new(Vec::new());
        let record = |annotation: &Annotation| clicked.borrow_mut().push(annotation.id);

        // A leaf only inside the right marker.
        let right_only = tree
            .text_nodes()
            .into_iter()
            .find(|node| tree.text(*node) == Some("abcde"))
            .unwrap();
        assert!(highlights.click(&tree, right_only, record));
        assert_eq!(*clicked.borrow(), vec![right.id]);

        // The shared leaf sits in the left marker nested inside the right one:
        // only the innermost marker fires.
        clicked.borrow_mut().clear();
        let shared = tree
            .text_nodes()
            .into_iter()
            .find(|node| tree.text(*node) == Some("56789"))
            .unwrap();
        assert!(highlights.click(&tree, shared, record));
        assert_eq!(*clicked.borrow(), vec![left.id]);

        // Text outside every marker fires nothing.
        clicked.borrow_mut().clear();
        let outside = tree
            .text_nodes()
            .into_iter()
            .find(|node| tree.text(*node) == Some("fghij"))
            .unwrap();
        assert!(!highlights.click(&tree, outside, record));
        assert!(clicked.borrow().is_empty());
    }

    #[test]
    fn test_click_hands_over_full_record() {
        let (mut tree, _) = tree_of(&["Hello world"]);
        let mut annotation = root(0, 5);
        annotation.comment = "greeting".to_string();
        annotation.quote = Some("Hello".to_string());
        let highlights = apply_highlights(std::slice::from_ref(&annotation), &mut tree);

        let marker = highlights.markers()[0];
        let mut seen = None;
        highlights.click(&tree, marker, |a| seen = Some(a.clone()));
        assert_eq!(seen, Some(annotation));
    }

    #[test]
    fn test_highlights_survive_selection_mapping() {
        // Offsets taken from a highlighted tree still line up with the text.
        let (mut tree, _) = tree_of(&["Hello brave new world"]);
        apply_highlights(&[root(6, 11)], &mut tree);
        let start = crate::offsets::point_at(&tree, 12).unwrap();
        let end = crate::offsets::point_at(&tree, 15).unwrap();
        let selection = TextRange::new(start, end);
        let offsets = crate::offsets::selection_offsets(&tree, Some(&selection)).unwrap();
        assert_eq!((offsets.start, offsets.end), (12, 15));
        assert_eq!(offsets.text, "new");
    }
}
