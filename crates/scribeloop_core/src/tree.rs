//! crates/scribeloop_core/src/tree.rs
//!
//! The text tree abstraction the offset mapper and the highlight reconciler
//! work against, plus `ContentTree`, an arena-backed implementation that can
//! be serialized to HTML.
//!
//! Any rendering technology can implement [`TextTree`]: all the algorithms
//! need is the ordered list of text leaves, their text, their parents, and a
//! way to replace one leaf by a sequence of text and marker fragments.

use std::fmt::Debug;
use std::hash::Hash;
use uuid::Uuid;

/// A piece of content that replaces a text leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    /// A highlight marker wrapping `text`, tagged with the owning annotation.
    Marker { annotation_id: Uuid, text: String },
}

pub trait TextTree {
    /// Stable handle of a node. Handles of detached nodes stay valid but
    /// report `is_attached() == false`.
    type Node: Copy + Eq + Hash + Debug;

    /// Text-bearing leaves of the root container, in document order.
    fn text_nodes(&self) -> Vec<Self::Node>;

    /// Raw text of a text leaf; `None` for other nodes or unknown handles.
    fn text(&self, node: Self::Node) -> Option<&str>;

    fn parent(&self, node: Self::Node) -> Option<Self::Node>;

    /// Whether the node can still be reached from the root container.
    fn is_attached(&self, node: Self::Node) -> bool;

    /// Replaces a text leaf, in place, by `fragments`. Returns the handles of
    /// the inserted nodes in fragment order (markers are returned as the
    /// marker node, not its inner text). `None` if the leaf is detached.
    fn replace_text(
        &mut self,
        node: Self::Node,
        fragments: Vec<Fragment>,
    ) -> Option<Vec<Self::Node>>;
}

//=========================================================================================
// ContentTree
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    Marker {
        annotation_id: Uuid,
    },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// An in-memory document: a root container element holding elements, text
/// leaves and highlight markers.
#[derive(Debug, Clone)]
pub struct ContentTree {
    nodes: Vec<Node>,
}

impl Default for ContentTree {
    fn default() -> Self {
        Self::new()
    }
}

const VOID_TAGS: [&str; 3] = ["br", "hr", "img"];

impl ContentTree {
    /// Creates a tree whose root is an empty `div` container.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Element {
                    tag: "div".to_string(),
                    attrs: Vec::new(),
                },
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node.0).map(|n| &n.kind)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn append_element(&mut self, parent: NodeId, tag: &str) -> NodeId {
        self.append(
            parent,
            NodeKind::Element {
                tag: tag.to_string(),
                attrs: Vec::new(),
            },
        )
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.append(parent, NodeKind::Text(text.to_string()))
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let Some(NodeKind::Element { attrs, .. }) = self.nodes.get_mut(node.0).map(|n| &mut n.kind) {
            attrs.push((name.to_string(), value.to_string()));
        }
    }

    /// The annotation a marker node belongs to.
    pub fn marker_annotation(&self, node: NodeId) -> Option<Uuid> {
        match self.kind(node) {
            Some(NodeKind::Marker { annotation_id }) => Some(*annotation_id),
            _ => None,
        }
    }

    /// Concatenated raw text below `node`.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        match self.kind(node) {
            Some(NodeKind::Text(text)) => out.push_str(text),
            Some(_) => {
                for child in self.children(node) {
                    self.collect_text(*child, out);
                }
            }
            None => {}
        }
    }

    /// Serializes the content of the root container (its inner HTML).
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root()) {
            self.write_html(*child, &mut out);
        }
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        let Some(kind) = self.kind(node) else {
            return;
        };
        match kind {
            NodeKind::Text(text) => out.push_str(&html_escape::encode_text(text)),
            NodeKind::Marker { annotation_id } => {
                out.push_str("<mark class=\"highlight\" data-annotation-id=\"");
                out.push_str(&annotation_id.to_string());
                out.push_str("\">");
                for child in self.children(node) {
                    self.write_html(*child, out);
                }
                out.push_str("</mark>");
            }
            NodeKind::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&html_escape::encode_double_quoted_attribute(value));
                    out.push('"');
                }
                out.push('>');
                if VOID_TAGS.contains(&tag.as_str()) {
                    return;
                }
                for child in self.children(node) {
                    self.write_html(*child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.push_detached(kind);
        self.nodes[id.0].parent = Some(parent);
        self.nodes[parent.0].children.push(id);
        id
    }

    fn push_detached(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn collect_text_nodes(&self, node: NodeId, out: &mut Vec<NodeId>) {
        match self.kind(node) {
            Some(NodeKind::Text(_)) => out.push(node),
            Some(_) => {
                for child in self.children(node) {
                    self.collect_text_nodes(*child, out);
                }
            }
            None => {}
        }
    }
}

impl TextTree for ContentTree {
    type Node = NodeId;

    fn text_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_text_nodes(self.root(), &mut out);
        out
    }

    fn text(&self, node: NodeId) -> Option<&str> {
        match self.kind(node) {
            Some(NodeKind::Text(text)) => Some(text),
            _ => None,
        }
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    fn is_attached(&self, node: NodeId) -> bool {
        if node.0 >= self.nodes.len() {
            return false;
        }
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        current == self.root()
    }

    fn replace_text(&mut self, node: NodeId, fragments: Vec<Fragment>) -> Option<Vec<NodeId>> {
        if self.text(node).is_none() || !self.is_attached(node) {
            return None;
        }
        let parent = self.parent(node)?;
        let position = self.nodes[parent.0]
            .children
            .iter()
            .position(|child| *child == node)?;

        let mut inserted = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let id = match fragment {
                Fragment::Text(text) => self.push_detached(NodeKind::Text(text)),
                Fragment::Marker {
                    annotation_id,
                    text,
                } => {
                    let marker = self.push_detached(NodeKind::Marker { annotation_id });
                    let inner = self.push_detached(NodeKind::Text(text));
                    self.nodes[inner.0].parent = Some(marker);
                    self.nodes[marker.0].children.push(inner);
                    marker
                }
            };
            self.nodes[id.0].parent = Some(parent);
            inserted.push(id);
        }

        self.nodes[parent.0]
            .children
            .splice(position..=position, inserted.iter().copied());
        self.nodes[node.0].parent = None;
        Some(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> (ContentTree, NodeId, NodeId) {
        let mut tree = ContentTree::new();
        let p = tree.append_element(tree.root(), "p");
        let first = tree.append_text(p, "Hello ");
        let em = tree.append_element(p, "em");
        let second = tree.append_text(em, "<world>");
        (tree, first, second)
    }

    #[test]
    fn test_text_nodes_in_document_order() {
        let (tree, first, second) = sample();
        assert_eq!(tree.text_nodes(), vec![first, second]);
        assert_eq!(tree.text_content(tree.root()), "Hello <world>");
    }

    #[test]
    fn test_html_is_escaped() {
        let (tree, _, _) = sample();
        assert_eq!(tree.to_html(), "<p>Hello <em>&lt;world&gt;</em></p>");
    }

    #[test]
    fn test_replace_text_splices_and_detaches() {
        let (mut tree, first, _) = sample();
        let id = Uuid::nil();
        let inserted = tree
            .replace_text(
                first,
                vec![
                    Fragment::Text("He".to_string()),
                    Fragment::Marker {
                        annotation_id: id,
                        text: "llo".to_string(),
                    },
                    Fragment::Text(" ".to_string()),
                ],
            )
            .unwrap();

        assert_eq!(inserted.len(), 3);
        assert!(!tree.is_attached(first));
        assert_eq!(tree.marker_annotation(inserted[1]), Some(id));
        assert_eq!(
            tree.to_html(),
            format!(
                "<p>He<mark class=\"highlight\" data-annotation-id=\"{}\">llo</mark> <em>&lt;world&gt;</em></p>",
                id
            )
        );
        assert_eq!(tree.text_content(tree.root()), "Hello <world>");

        // A detached leaf cannot be replaced a second time.
        assert_eq!(tree.replace_text(first, vec![]), None);
    }

    #[test]
    fn test_void_elements_have_no_closing_tag() {
        let mut tree = ContentTree::new();
        let p = tree.append_element(tree.root(), "p");
        tree.append_text(p, "a");
        tree.append_element(p, "br");
        tree.append_text(p, "b");
        assert_eq!(tree.to_html(), "<p>a<br>b</p>");
    }
}
