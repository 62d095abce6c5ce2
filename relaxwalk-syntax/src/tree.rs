//! Mutable element tree used as the simplifier's working representation.
//!
//! Nodes live in an arena owned by [`Tree`]; a [`NodeId`] is a copyable
//! handle. Every attached node has exactly one parent, and the mutators
//! maintain the invariant that a child appears in its parent's child list
//! exactly once, at a known index.

use std::fmt;

/// Handle to a node in a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// An attribute of an element node.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub prefix: String,
    pub local: String,
    pub uri: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Element {
        prefix: String,
        local: String,
        uri: String,
        /// Namespace declarations in scope at this element (prefix → uri).
        /// The empty prefix holds the default namespace.
        ns_decls: Vec<(String, String)>,
        attributes: Vec<Attribute>,
        children: Vec<NodeId>,
    },
    Text {
        text: String,
    },
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeId>,
    span: codemap::Span,
    kind: NodeKind,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TreeError {
    /// The argument node is not a child of the node it was looked up under.
    NotAChild,
    /// The operation requires the node to have a parent, but it is a root
    /// or detached.
    NoParent,
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::NotAChild => write!(f, "node is not a child of this element"),
            TreeError::NoParent => write!(f, "node has no parent"),
        }
    }
}

/// Arena of element and text nodes with a distinguished root.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    pub fn new_with_root(span: codemap::Span, prefix: &str, local: &str, uri: &str) -> Tree {
        let mut tree = Tree {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        let root = tree.new_element(span, prefix, local, uri);
        tree.root = root;
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Re-roots the tree at an existing (attached or detached) element.
    pub fn set_root(&mut self, id: NodeId) {
        self.detach(id);
        self.root = id;
    }

    pub fn new_element(&mut self, span: codemap::Span, prefix: &str, local: &str, uri: &str) -> NodeId {
        self.push(Node {
            parent: None,
            span,
            kind: NodeKind::Element {
                prefix: prefix.to_string(),
                local: local.to_string(),
                uri: uri.to_string(),
                ns_decls: Vec::new(),
                attributes: Vec::new(),
                children: Vec::new(),
            },
        })
    }

    pub fn new_text(&mut self, span: codemap::Span, text: &str) -> NodeId {
        self.push(Node {
            parent: None,
            span,
            kind: NodeKind::Text {
                text: text.to_string(),
            },
        })
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn span(&self, id: NodeId) -> codemap::Span {
        self.node(id).span
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Element { .. })
    }

    pub fn local(&self, id: NodeId) -> &str {
        match &self.node(id).kind {
            NodeKind::Element { local, .. } => local,
            NodeKind::Text { .. } => "",
        }
    }

    pub fn uri(&self, id: NodeId) -> &str {
        match &self.node(id).kind {
            NodeKind::Element { uri, .. } => uri,
            NodeKind::Text { .. } => "",
        }
    }

    /// Renames an element in place, keeping attributes and children.
    pub fn rename(&mut self, id: NodeId, new_local: &str) {
        if let NodeKind::Element { local, .. } = &mut self.node_mut(id).kind {
            *local = new_local.to_string();
        }
    }

    pub fn text(&self, id: NodeId) -> &str {
        match &self.node(id).kind {
            NodeKind::Text { text } => text,
            NodeKind::Element { .. } => "",
        }
    }

    pub fn set_text(&mut self, id: NodeId, new_text: &str) {
        if let NodeKind::Text { text } = &mut self.node_mut(id).kind {
            *text = new_text.to_string();
        }
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match &self.node(id).kind {
            NodeKind::Element { attributes, .. } => attributes,
            NodeKind::Text { .. } => &[],
        }
    }

    /// Looks up a no-namespace attribute by local name.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attributes(id)
            .iter()
            .find(|a| a.uri.is_empty() && a.local == name)
            .map(|a| &a.value[..])
    }

    /// Sets a no-namespace attribute, replacing an existing one of the same
    /// name.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element { attributes, .. } = &mut self.node_mut(id).kind {
            if let Some(a) = attributes
                .iter_mut()
                .find(|a| a.uri.is_empty() && a.local == name)
            {
                a.value = value.to_string();
            } else {
                attributes.push(Attribute {
                    prefix: String::new(),
                    local: name.to_string(),
                    uri: String::new(),
                    value: value.to_string(),
                });
            }
        }
    }

    /// Removes a no-namespace attribute, returning it if present.
    pub fn take_attr(&mut self, id: NodeId, name: &str) -> Option<Attribute> {
        if let NodeKind::Element { attributes, .. } = &mut self.node_mut(id).kind {
            let idx = attributes
                .iter()
                .position(|a| a.uri.is_empty() && a.local == name)?;
            Some(attributes.remove(idx))
        } else {
            None
        }
    }

    /// Drops attributes for which the predicate returns false.
    pub fn retain_attrs<F: FnMut(&Attribute) -> bool>(&mut self, id: NodeId, f: F) {
        if let NodeKind::Element { attributes, .. } = &mut self.node_mut(id).kind {
            attributes.retain(f);
        }
    }

    pub fn push_attr(&mut self, id: NodeId, attr: Attribute) {
        if let NodeKind::Element { attributes, .. } = &mut self.node_mut(id).kind {
            attributes.push(attr);
        }
    }

    pub fn ns_decls(&self, id: NodeId) -> &[(String, String)] {
        match &self.node(id).kind {
            NodeKind::Element { ns_decls, .. } => ns_decls,
            NodeKind::Text { .. } => &[],
        }
    }

    pub fn declare_ns(&mut self, id: NodeId, prefix: &str, uri: &str) {
        if let NodeKind::Element { ns_decls, .. } = &mut self.node_mut(id).kind {
            if let Some(d) = ns_decls.iter_mut().find(|(p, _)| p == prefix) {
                d.1 = uri.to_string();
            } else {
                ns_decls.push((prefix.to_string(), uri.to_string()));
            }
        }
    }

    /// Resolves a namespace prefix by walking the parent chain. The `xml`
    /// and `xmlns` prefixes are fixed by the XML namespaces specification.
    pub fn resolve_prefix(&self, id: NodeId, prefix: &str) -> Option<&str> {
        match prefix {
            "xml" => return Some("http://www.w3.org/XML/1998/namespace"),
            "xmlns" => return Some("http://www.w3.org/2000/xmlns/"),
            _ => {}
        }
        let mut cur = Some(id);
        while let Some(n) = cur {
            if let Some((_, uri)) = self.ns_decls(n).iter().find(|(p, _)| p == prefix) {
                return Some(uri);
            }
            cur = self.parent(n);
        }
        None
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.node(id).kind {
            NodeKind::Element { children, .. } => children,
            NodeKind::Text { .. } => &[],
        }
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect()
    }

    pub fn index_of_child(&self, parent: NodeId, child: NodeId) -> Result<usize, TreeError> {
        self.children(parent)
            .iter()
            .position(|c| *c == child)
            .ok_or(TreeError::NotAChild)
    }

    fn children_mut(&mut self, id: NodeId) -> &mut Vec<NodeId> {
        match &mut self.node_mut(id).kind {
            NodeKind::Element { children, .. } => children,
            NodeKind::Text { .. } => panic!("text nodes have no children"),
        }
    }

    /// Detaches a node from its parent, if attached.
    fn detach(&mut self, id: NodeId) {
        if let Some(p) = self.node(id).parent {
            let idx = self
                .index_of_child(p, id)
                .expect("parent/child link out of sync");
            self.children_mut(p).remove(idx);
            self.node_mut(id).parent = None;
        }
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.children_mut(parent).push(child);
        self.node_mut(child).parent = Some(parent);
    }

    pub fn prepend(&mut self, parent: NodeId, child: NodeId) {
        self.insert(parent, 0, child);
    }

    pub fn insert(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        self.children_mut(parent).insert(index, child);
        self.node_mut(child).parent = Some(parent);
    }

    pub fn remove(&mut self, child: NodeId) -> Result<(), TreeError> {
        if self.node(child).parent.is_none() {
            return Err(TreeError::NoParent);
        }
        self.detach(child);
        Ok(())
    }

    /// Replaces `old` with `new` in `old`'s parent, detaching `new` from its
    /// current parent first. `old` ends up detached.
    pub fn replace_with(&mut self, old: NodeId, new: NodeId) -> Result<(), TreeError> {
        let parent = self.node(old).parent.ok_or(TreeError::NoParent)?;
        let idx = self.index_of_child(parent, old)?;
        self.detach(new);
        self.children_mut(parent)[idx] = new;
        self.node_mut(new).parent = Some(parent);
        self.node_mut(old).parent = None;
        Ok(())
    }

    /// Moves all children of `src` to the end of `dest`'s child list,
    /// preserving order.
    pub fn grab_children(&mut self, dest: NodeId, src: NodeId) {
        let moved = std::mem::take(self.children_mut(src));
        for c in &moved {
            self.node_mut(*c).parent = Some(dest);
        }
        self.children_mut(dest).extend(moved);
    }

    /// Detaches all children, returning them in document order.
    pub fn empty(&mut self, id: NodeId) -> Vec<NodeId> {
        let removed = std::mem::take(self.children_mut(id));
        for c in &removed {
            self.node_mut(*c).parent = None;
        }
        removed
    }

    /// Deep copy of a subtree; the copy is detached and shares no attribute
    /// or namespace storage with the original.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let span = self.node(id).span;
        match self.node(id).kind.clone() {
            NodeKind::Element {
                prefix,
                local,
                uri,
                ns_decls,
                attributes,
                children,
            } => {
                let copy = self.push(Node {
                    parent: None,
                    span,
                    kind: NodeKind::Element {
                        prefix,
                        local,
                        uri,
                        ns_decls,
                        attributes,
                        children: Vec::new(),
                    },
                });
                for c in children {
                    let cc = self.clone_subtree(c);
                    self.append(copy, cc);
                }
                copy
            }
            NodeKind::Text { text } => self.push(Node {
                parent: None,
                span,
                kind: NodeKind::Text { text },
            }),
        }
    }

    /// Human-readable location label for error messages, derived from the
    /// ancestor chain and any `name` attributes.
    pub fn path(&self, id: NodeId) -> String {
        let mut steps = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            if self.is_element(n) {
                let mut step = self.local(n).to_string();
                if let Some(name) = self.attr(n, "name") {
                    step.push_str(&format!("[@name=\"{}\"]", name));
                }
                steps.push(step);
            }
            cur = self.parent(n);
        }
        steps.reverse();
        format!("/{}", steps.join("/"))
    }

    /// Walks the subtree rooted at `id` in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            for c in self.children(n).iter().rev() {
                stack.push(*c);
            }
        }
        out
    }
}
