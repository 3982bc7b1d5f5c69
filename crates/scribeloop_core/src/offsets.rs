//! crates/scribeloop_core/src/offsets.rs
//!
//! Maps reader selections to content-relative character offsets.
//!
//! Offsets count Unicode scalar values of *normalized* text: every `\r\n`
//! collapses to `\n` and any remaining `\r` becomes `\n`. Normalization is
//! applied per text leaf, here and in the highlight reconciler, so offsets
//! computed at selection time and at render time always agree.

use std::borrow::Cow;

use crate::domain::SelectionOffsets;
use crate::tree::TextTree;

/// A position inside a text leaf. `offset` is a char index into the leaf's
/// raw (unnormalized) text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPoint<N> {
    pub node: N,
    pub offset: usize,
}

/// A reader selection between two text positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange<N> {
    pub start: TextPoint<N>,
    pub end: TextPoint<N>,
}

impl<N: PartialEq> TextRange<N> {
    pub fn new(start: TextPoint<N>, end: TextPoint<N>) -> Self {
        Self { start, end }
    }

    /// Same node and offset on both ends.
    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }
}

/// Collapses line-break variants to `\n`.
pub fn normalize_text(text: &str) -> Cow<'_, str> {
    if !text.contains('\r') {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Length of `text` once normalized, in chars.
pub fn normalized_len(text: &str) -> usize {
    let mut len = 0;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' && chars.peek() == Some(&'\n') {
            chars.next();
        }
        len += 1;
    }
    len
}

/// Translates a char index in normalized text back to the raw text it came
/// from. A `\r\n` pair counts as one normalized char and is never split.
pub fn raw_offset(raw: &str, normalized: usize) -> usize {
    let mut seen = 0;
    let mut chars = raw.chars().enumerate().peekable();
    while let Some((index, c)) = chars.next() {
        if seen == normalized {
            return index;
        }
        if c == '\r' && matches!(chars.peek(), Some((_, '\n'))) {
            chars.next();
        }
        seen += 1;
    }
    raw.chars().count()
}

/// Total normalized text length of the tree.
pub fn text_length<T: TextTree>(tree: &T) -> usize {
    tree.text_nodes()
        .into_iter()
        .filter_map(|node| tree.text(node))
        .map(normalized_len)
        .sum()
}

/// Normalized text of the whole tree.
pub fn text_content<T: TextTree>(tree: &T) -> String {
    tree.text_nodes()
        .into_iter()
        .filter_map(|node| tree.text(node))
        .map(normalize_text)
        .collect()
}

/// Computes `{start, end, text}` for a selection made inside `tree`.
///
/// Returns `None` for an absent or collapsed selection, for boundaries that do
/// not lie in the tree's text leaves, and for selections covering no text.
pub fn selection_offsets<T: TextTree>(
    tree: &T,
    selection: Option<&TextRange<T::Node>>,
) -> Option<SelectionOffsets> {
    let range = selection?;
    if range.is_collapsed() {
        return None;
    }

    let nodes = tree.text_nodes();
    let mut start = resolve(tree, &nodes, range.start)?;
    let mut end = resolve(tree, &nodes, range.end)?;
    if end < start {
        std::mem::swap(&mut start, &mut end);
    }

    // Everything from the start of the container up to the selection start.
    let mut prefix = 0;
    for node in &nodes[..start.0] {
        prefix += tree.text(*node).map(normalized_len).unwrap_or(0);
    }
    let start_raw = tree.text(nodes[start.0]).unwrap_or("");
    prefix += normalized_len(char_slice(start_raw, 0, start.1));

    let mut text = String::new();
    for (index, node) in nodes.iter().enumerate().take(end.0 + 1).skip(start.0) {
        let raw = tree.text(*node).unwrap_or("");
        let from = if index == start.0 { start.1 } else { 0 };
        let to = if index == end.0 { end.1 } else { usize::MAX };
        text.push_str(&normalize_text(char_slice(raw, from, to)));
    }

    if text.is_empty() {
        return None;
    }

    let len = text.chars().count();
    Some(SelectionOffsets {
        start: prefix,
        end: prefix + len,
        text,
    })
}

/// The inverse mapping: the text position holding normalized offset
/// `offset`. Positions on a leaf boundary resolve to the end of the earlier
/// leaf. `None` past the end of the text.
pub fn point_at<T: TextTree>(tree: &T, offset: usize) -> Option<TextPoint<T::Node>> {
    let mut cursor = 0;
    for node in tree.text_nodes() {
        let raw = tree.text(node).unwrap_or("");
        let len = normalized_len(raw);
        if offset <= cursor + len {
            return Some(TextPoint {
                node,
                offset: raw_offset(raw, offset - cursor),
            });
        }
        cursor += len;
    }
    None
}

/// Resolves a point to (leaf index, raw char offset), clamping the offset
/// to the leaf and snapping it out of the middle of a `\r\n` pair.
fn resolve<T: TextTree>(
    tree: &T,
    nodes: &[T::Node],
    point: TextPoint<T::Node>,
) -> Option<(usize, usize)> {
    let index = nodes.iter().position(|node| *node == point.node)?;
    let raw = tree.text(point.node)?;
    let chars: Vec<char> = raw.chars().collect();
    let mut offset = point.offset.min(chars.len());
    if offset > 0 && offset < chars.len() && chars[offset - 1] == '\r' && chars[offset] == '\n' {
        offset += 1;
    }
    Some((index, offset))
}

/// `text[from..to]` by char index, clamped to the text.
fn char_slice(text: &str, from: usize, to: usize) -> &str {
    let byte_at = |char_index: usize| {
        text.char_indices()
            .nth(char_index)
            .map(|(byte, _)| byte)
            .unwrap_or(text.len())
    };
    let start = byte_at(from);
    let end = byte_at(to).max(start);
    &text[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ContentTree, NodeId};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    /// A paragraph whose text is split across the given leaves.
    fn tree_of(parts: &[&str]) -> (ContentTree, Vec<NodeId>) {
        let mut tree = ContentTree::new();
        let p = tree.append_element(tree.root(), "p");
        let nodes = parts.iter().map(|part| tree.append_text(p, part)).collect();
        (tree, nodes)
    }

    fn range(start: (NodeId, usize), end: (NodeId, usize)) -> TextRange<NodeId> {
        TextRange::new(
            TextPoint {
                node: start.0,
                offset: start.1,
            },
            TextPoint {
                node: end.0,
                offset: end.1,
            },
        )
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("a\r\nb", "a\nb")]
    #[case("a\rb", "a\nb")]
    #[case("a\nb", "a\nb")]
    #[case("\r\r\n\n", "\n\n\n")]
    #[case("\r\n\r", "\n\n")]
    fn test_normalize_text(#[case] input: &str, #[case] expected: &str) {
        let once = normalize_text(input);
        assert_eq!(once, expected);
        assert_eq!(normalize_text(&once), once);
        assert_eq!(normalized_len(input), expected.chars().count());
    }

    #[rstest]
    #[case("abc", 2, 2)]
    #[case("a\r\nb", 1, 1)]
    #[case("a\r\nb", 2, 3)]
    #[case("a\r\nb", 3, 4)]
    #[case("é\r\nx", 2, 3)]
    fn test_raw_offset(#[case] raw: &str, #[case] normalized: usize, #[case] expected: usize) {
        assert_eq!(raw_offset(raw, normalized), expected);
    }

    #[test]
    fn test_absent_or_collapsed_selection_is_none() {
        let (tree, nodes) = tree_of(&["Hello world"]);
        assert_eq!(selection_offsets(&tree, None), None);
        let collapsed = range((nodes[0], 3), (nodes[0], 3));
        assert_eq!(selection_offsets(&tree, Some(&collapsed)), None);
    }

    #[test]
    fn test_selection_within_one_leaf() {
        let (tree, nodes) = tree_of(&["Hello world"]);
        let selection = range((nodes[0], 6), (nodes[0], 11));
        assert_eq!(
            selection_offsets(&tree, Some(&selection)),
            Some(SelectionOffsets {
                start: 6,
                end: 11,
                text: "world".to_string(),
            })
        );
    }

    #[test]
    fn test_selection_across_leaves_and_backwards() {
        let (tree, nodes) = tree_of(&["Hello ", "brave ", "new world"]);
        let expected = Some(SelectionOffsets {
            start: 3,
            end: 16,
            text: "lo brave new ".to_string(),
        });
        let forwards = range((nodes[0], 3), (nodes[2], 4));
        assert_eq!(selection_offsets(&tree, Some(&forwards)), expected);
        let backwards = range((nodes[2], 4), (nodes[0], 3));
        assert_eq!(selection_offsets(&tree, Some(&backwards)), expected);
    }

    #[test]
    fn test_carriage_returns_are_counted_once() {
        let (tree, nodes) = tree_of(&["one\r\ntwo\r", "three"]);
        let selection = range((nodes[0], 5), (nodes[1], 2));
        assert_eq!(
            selection_offsets(&tree, Some(&selection)),
            Some(SelectionOffsets {
                start: 4,
                end: 10,
                text: "two\nth".to_string(),
            })
        );
    }

    #[test]
    fn test_boundary_inside_crlf_pair_snaps_forward() {
        let (tree, nodes) = tree_of(&["ab\r\ncd"]);
        let selection = range((nodes[0], 3), (nodes[0], 6));
        assert_eq!(
            selection_offsets(&tree, Some(&selection)),
            Some(SelectionOffsets {
                start: 3,
                end: 5,
                text: "cd".to_string(),
            })
        );
    }

    #[test]
    fn test_selection_outside_tree_is_none() {
        let (tree, nodes) = tree_of(&["Hello"]);
        let (_, foreign) = tree_of(&["x", "y", "z"]);
        let selection = range((nodes[0], 0), (foreign[2], 1));
        assert_eq!(selection_offsets(&tree, Some(&selection)), None);
    }

    #[test]
    fn test_selection_over_empty_leaves_is_none() {
        let (tree, nodes) = tree_of(&["", ""]);
        let selection = range((nodes[0], 0), (nodes[1], 0));
        assert_eq!(selection_offsets(&tree, Some(&selection)), None);
    }

    #[test]
    fn test_every_range_round_trips() {
        let (tree, _) = tree_of(&["Il était\r\n", "", "une fois", "\rla fin"]);
        let text = text_content(&tree);
        let chars: Vec<char> = text.chars().collect();
        assert_eq!(text_length(&tree), chars.len());

        for s in 0..chars.len() {
            for e in (s + 1)..=chars.len() {
                let start = point_at(&tree, s).unwrap();
                let end = point_at(&tree, e).unwrap();
                let selection = TextRange::new(start, end);
                let expected: String = chars[s..e].iter().collect();
                assert_eq!(
                    selection_offsets(&tree, Some(&selection)),
                    Some(SelectionOffsets {
                        start: s,
                        end: e,
                        text: expected,
                    }),
                    "range {}..{}",
                    s,
                    e
                );
            }
        }
    }

    #[test]
    fn test_offsets_are_stable_across_rerenders() {
        let first = crate::markdown::render("Some *styled* text");
        let second = crate::markdown::render("Some *styled* text");
        let pick = |tree: &ContentTree| {
            let nodes = tree.text_nodes();
            let selection = TextRange::new(
                TextPoint {
                    node: nodes[1],
                    offset: 1,
                },
                TextPoint {
                    node: nodes[2],
                    offset: 3,
                },
            );
            selection_offsets(tree, Some(&selection))
        };
        assert_eq!(pick(&first), pick(&second));
        assert_eq!(pick(&first).unwrap().text, "tyled te");
    }
}
