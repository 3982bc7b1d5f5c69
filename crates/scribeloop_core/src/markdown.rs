//! crates/scribeloop_core/src/markdown.rs
//!
//! Renders a chapter's markdown body into a [`ContentTree`]. The rendered
//! tree is what readers select text in, so its text content is the basis of
//! every stored offset.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag};

use crate::offsets;
use crate::tree::{ContentTree, NodeId};

/// Renders markdown into a fresh content tree.
///
/// Top-level blocks are separated by a `"\n"` text node and soft line breaks
/// become `"\n"`, so the rendered text keeps the paragraph structure of the
/// source. Raw HTML is dropped.
pub fn render(markdown: &str) -> ContentTree {
    let mut tree = ContentTree::new();
    let root = tree.root();
    let mut stack: Vec<NodeId> = vec![root];

    let parser = Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH);
    for event in parser {
        let parent = *stack.last().unwrap_or(&root);
        match event {
            Event::Start(Tag::HtmlBlock) => stack.push(parent),
            Event::Start(tag) => {
                if parent == root && !tree.children(root).is_empty() {
                    tree.append_text(root, "\n");
                }
                let element = open_element(&mut tree, parent, tag);
                stack.push(element);
            }
            Event::End(_) => {
                if stack.len() > 1 {
                    stack.pop();
                }
            }
            Event::Text(text) => {
                tree.append_text(parent, &text);
            }
            Event::Code(code) => {
                let element = tree.append_element(parent, "code");
                tree.append_text(element, &code);
            }
            Event::SoftBreak => {
                tree.append_text(parent, "\n");
            }
            Event::HardBreak => {
                tree.append_element(parent, "br");
            }
            Event::Rule => {
                if parent == root && !tree.children(root).is_empty() {
                    tree.append_text(root, "\n");
                }
                tree.append_element(parent, "hr");
            }
            _ => {}
        }
    }

    tree
}

/// Normalized text length of a rendered markdown body: the upper bound for
/// annotation offsets against that body.
pub fn text_length(markdown: &str) -> usize {
    offsets::text_length(&render(markdown))
}

fn open_element(tree: &mut ContentTree, parent: NodeId, tag: Tag<'_>) -> NodeId {
    match tag {
        Tag::Paragraph => tree.append_element(parent, "p"),
        Tag::Heading { level, .. } => tree.append_element(parent, heading_tag(level)),
        Tag::BlockQuote(_) => tree.append_element(parent, "blockquote"),
        Tag::CodeBlock(kind) => {
            let pre = tree.append_element(parent, "pre");
            let code = tree.append_element(pre, "code");
            if let CodeBlockKind::Fenced(lang) = kind {
                if !lang.is_empty() {
                    tree.set_attr(code, "class", &format!("language-{}", lang));
                }
            }
            // The code element receives the text; closing pops back past `pre`.
            code
        }
        Tag::List(Some(start)) => {
            let list = tree.append_element(parent, "ol");
            if start != 1 {
                tree.set_attr(list, "start", &start.to_string());
            }
            list
        }
        Tag::List(None) => tree.append_element(parent, "ul"),
        Tag::Item => tree.append_element(parent, "li"),
        Tag::Emphasis => tree.append_element(parent, "em"),
        Tag::Strong => tree.append_element(parent, "strong"),
        Tag::Strikethrough => tree.append_element(parent, "del"),
        Tag::Link { dest_url, .. } => {
            let link = tree.append_element(parent, "a");
            tree.set_attr(link, "href", &dest_url);
            link
        }
        _ => tree.append_element(parent, "span"),
    }
}

fn heading_tag(level: HeadingLevel) -> &'static str {
    match level {
        HeadingLevel::H1 => "h1",
        HeadingLevel::H2 => "h2",
        HeadingLevel::H3 => "h3",
        HeadingLevel::H4 => "h4",
        HeadingLevel::H5 => "h5",
        HeadingLevel::H6 => "h6",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_renders_blocks_and_inline_markup() {
        let tree = render("# Title\n\nSome *soft* and **bold** text.\n\n> quoted");
        assert_eq!(
            tree.to_html(),
            "<h1>Title</h1>\n<p>Some <em>soft</em> and <strong>bold</strong> text.</p>\n<blockquote><p>quoted</p></blockquote>"
        );
    }

    #[test]
    fn test_text_content_keeps_paragraph_breaks() {
        let tree = render("First line\nsecond line\n\nNext paragraph");
        assert_eq!(
            tree.text_content(tree.root()),
            "First line\nsecond line\nNext paragraph"
        );
        assert_eq!(text_length("First line\nsecond line\n\nNext paragraph"), 37);
    }

    #[test]
    fn test_crlf_source_renders_like_lf() {
        let lf = render("One\ntwo\n\nthree");
        let crlf = render("One\r\ntwo\r\n\r\nthree");
        assert_eq!(lf.to_html(), crlf.to_html());
    }

    #[test]
    fn test_raw_html_is_dropped() {
        let tree = render("Hello <script>alert(1)</script> there");
        assert!(!tree.to_html().contains("script"));
    }

    #[test]
    fn test_code_block_keeps_language() {
        let tree = render("```rust\nfn main() {}\n```");
        assert_eq!(
            tree.to_html(),
            "<pre><code class=\"language-rust\">fn main() {}\n</code></pre>"
        );
    }
}
