//! Parses RELAX NG XML-syntax text into the mutable element tree.

use crate::tree::{Attribute, NodeId, Tree};
use roxmltree::Node;
use std::sync::Arc;

/// The RELAX NG structure namespace.
pub const NS: &str = "http://relaxng.org/ns/structure/1.0";

#[derive(Debug)]
pub enum Error {
    /// The input was not well-formed XML.
    Xml(codemap::Span, String),
}

pub fn parse(file: &Arc<codemap::File>) -> Result<Tree, Error> {
    let text = file.source();
    let doc = roxmltree::Document::parse(text).map_err(|e| {
        let pos = e.pos();
        let offset = offset_of(text, pos.row, pos.col);
        Error::Xml(
            file.span.subspan(offset as u64, offset as u64),
            e.to_string(),
        )
    })?;
    let root = doc.root_element();
    let mut tree = Tree::new_with_root(
        span_of(file, &root),
        "",
        root.tag_name().name(),
        root.tag_name().namespace().unwrap_or(""),
    );
    let root_id = tree.root();
    copy_decorations(&mut tree, root_id, &root);
    for child in root.children() {
        copy_node(file, &mut tree, root_id, child);
    }
    Ok(tree)
}

fn copy_node(file: &Arc<codemap::File>, tree: &mut Tree, parent: NodeId, node: Node) {
    if node.is_element() {
        let id = tree.new_element(
            span_of(file, &node),
            "",
            node.tag_name().name(),
            node.tag_name().namespace().unwrap_or(""),
        );
        copy_decorations(tree, id, &node);
        tree.append(parent, id);
        for child in node.children() {
            copy_node(file, tree, id, child);
        }
    } else if node.is_text() {
        if let Some(text) = node.text() {
            let id = tree.new_text(span_of(file, &node), text);
            tree.append(parent, id);
        }
    }
    // comments and processing instructions carry no schema meaning
}

fn copy_decorations(tree: &mut Tree, id: NodeId, node: &Node) {
    for ns in node.namespaces() {
        tree.declare_ns(id, ns.name().unwrap_or(""), ns.uri());
    }
    for attr in node.attributes() {
        let uri = attr.namespace().unwrap_or("").to_string();
        let prefix = if uri.is_empty() {
            String::new()
        } else {
            node.namespaces()
                .iter()
                .find(|ns| ns.uri() == uri)
                .and_then(|ns| ns.name())
                .unwrap_or("")
                .to_string()
        };
        tree.push_attr(
            id,
            Attribute {
                prefix,
                local: attr.name().to_string(),
                uri,
                value: attr.value().to_string(),
            },
        );
    }
}

fn span_of(file: &Arc<codemap::File>, node: &Node) -> codemap::Span {
    let range = node.range();
    file.span.subspan(range.start as u64, range.end as u64)
}

fn offset_of(text: &str, row: u32, col: u32) -> usize {
    let mut offset = 0;
    for (i, line) in text.lines().enumerate() {
        if i + 1 == row as usize {
            return offset + (col as usize).saturating_sub(1).min(line.len());
        }
        offset += line.len() + 1;
    }
    text.len()
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse_str(src: &str) -> Result<Tree, Error> {
        let mut map = codemap::CodeMap::new();
        let file = map.add_file("test.rng".to_string(), src.to_string());
        parse(&file)
    }

    #[test]
    fn parses_simple_schema() {
        let tree = parse_str(
            r#"<element name="a" xmlns="http://relaxng.org/ns/structure/1.0"><empty/></element>"#,
        )
        .unwrap();
        let root = tree.root();
        assert_eq!(tree.local(root), "element");
        assert_eq!(tree.uri(root), NS);
        assert_eq!(tree.attr(root, "name"), Some("a"));
        let kids = tree.element_children(root);
        assert_eq!(kids.len(), 1);
        assert_eq!(tree.local(kids[0]), "empty");
    }

    #[test]
    fn records_namespace_declarations() {
        let tree = parse_str(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0" xmlns:a="urn:a"><start><ref name="x"/></start></grammar>"#,
        )
        .unwrap();
        let root = tree.root();
        assert_eq!(tree.resolve_prefix(root, "a"), Some("urn:a"));
        let start = tree.element_children(root)[0];
        let r = tree.element_children(start)[0];
        assert_eq!(tree.resolve_prefix(r, "a"), Some("urn:a"));
    }

    #[test]
    fn reports_malformed_input() {
        assert!(matches!(parse_str("<a><b></a>"), Err(Error::Xml(_, _))));
    }

    #[test]
    fn keeps_text_content() {
        let tree =
            parse_str(r#"<value xmlns="http://relaxng.org/ns/structure/1.0">hello</value>"#)
                .unwrap();
        let root = tree.root();
        let kids = tree.children(root).to_vec();
        assert_eq!(kids.len(), 1);
        assert_eq!(tree.text(kids[0]), "hello");
    }
}
