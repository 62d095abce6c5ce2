//! The schema simplification pipeline.
//!
//! An ordered sequence of rewrite passes over the element tree, reducing an
//! arbitrary RELAX NG schema to the canonical form the pattern model is
//! emitted from: one grammar, one start, every element pattern hoisted into
//! its own definition, binary combinators, and no reachable `empty` or
//! `notAllowed` redundancy. Each pass relies on the postconditions of the
//! passes before it.

use crate::datatype;
use crate::model::{
    AttributePattern, DataPattern, Define, ElementPattern, Pattern, RefPattern, ValuePattern,
};
use crate::name_class::NamePattern;
use crate::{resolve_href, Resources, SchemaError, Warning};
use relaxwalk_syntax::xml::{self, NS};
use relaxwalk_syntax::{NodeId, NodeKind, Tree};
use std::collections::{HashMap, HashSet};

/// Reserved namespace of `xmlns` attributes; schemas may not declare
/// attributes in it.
const XMLNS_URI: &str = "http://www.w3.org/2000/xmlns";

pub(crate) struct Pipeline<'a, R: Resources> {
    pub resources: &'a R,
    pub codemap: &'a mut codemap::CodeMap,
    /// URLs currently being loaded, for include/externalRef cycle detection.
    loading: Vec<String>,
    pub warnings: Vec<Warning>,
    unique: usize,
}

impl<'a, R: Resources> Pipeline<'a, R> {
    pub fn new(resources: &'a R, codemap: &'a mut codemap::CodeMap) -> Pipeline<'a, R> {
        Pipeline {
            resources,
            codemap,
            loading: Vec::new(),
            warnings: Vec::new(),
            unique: 0,
        }
    }

    /// Runs every pass and emits the pattern model.
    pub fn run(
        &mut self,
        tree: &mut Tree,
        base_url: &str,
    ) -> Result<(Pattern, Vec<Define>), SchemaError> {
        self.loading.push(base_url.to_string());
        let outcome = self.run_inner(tree, base_url);
        self.loading.pop();
        outcome
    }

    fn run_inner(
        &mut self,
        tree: &mut Tree,
        base_url: &str,
    ) -> Result<(Pattern, Vec<Define>), SchemaError> {
        self.check_root(tree)?;
        self.resolve_inclusions(tree, tree.root(), base_url)?;
        self.simplify_tree(tree)?;
        self.emit(tree)
    }

    /// All passes after inclusion; separated so idempotence is testable.
    fn simplify_tree(&mut self, tree: &mut Tree) -> Result<(), SchemaError> {
        strip_foreign(tree);
        normalize_text(tree);
        self.propagate_datatype_library(tree, tree.root(), "")?;
        name_attr_to_element(tree);
        propagate_ns(tree, tree.root(), "");
        self.resolve_qnames(tree)?;
        self.structural_rewrites(tree, tree.root())?;
        dissolve_divs(tree);
        self.flatten_grammars(tree)?;
        self.normalize_defines(tree)?;
        self.propagate_trivial_patterns(tree)?;
        Ok(())
    }

    fn check_root(&self, tree: &Tree) -> Result<(), SchemaError> {
        if tree.uri(tree.root()) != NS {
            return Err(SchemaError::Unexpected {
                span: tree.span(tree.root()),
                message: "expected a root element in the RELAX NG namespace".to_string(),
            });
        }
        Ok(())
    }

    // --- pass 1: include / externalRef resolution ---

    fn resolve_inclusions(
        &mut self,
        tree: &mut Tree,
        node: NodeId,
        base_url: &str,
    ) -> Result<(), SchemaError> {
        for child in tree.element_children(node) {
            if tree.uri(child) != NS {
                continue;
            }
            match tree.local(child).to_string().as_str() {
                "externalRef" => self.expand_external_ref(tree, child, base_url)?,
                "include" => {
                    self.expand_include(tree, child, base_url)?;
                    // override definitions in the include body may carry
                    // references of their own
                    self.resolve_inclusions(tree, child, base_url)?;
                }
                _ => self.resolve_inclusions(tree, child, base_url)?,
            }
        }
        Ok(())
    }

    fn expand_external_ref(
        &mut self,
        tree: &mut Tree,
        node: NodeId,
        base_url: &str,
    ) -> Result<(), SchemaError> {
        let span = tree.span(node);
        let href = tree
            .attr(node, "href")
            .ok_or_else(|| SchemaError::Unexpected {
                span,
                message: "externalRef requires an href attribute".to_string(),
            })?
            .to_string();
        let (loaded, _url) = self.load_schema(span, base_url, &href)?;
        if loaded.uri(loaded.root()) != NS {
            return Err(SchemaError::Unexpected {
                span,
                message: "referenced schema is not a RELAX NG pattern".to_string(),
            });
        }
        let grafted = graft(tree, &loaded, loaded.root());
        if let Some(ns) = tree.attr(node, "ns").map(str::to_string) {
            if tree.attr(grafted, "ns").is_none() {
                tree.set_attr(grafted, "ns", &ns);
            }
        }
        tree.replace_with(node, grafted)
            .expect("externalRef node is attached");
        Ok(())
    }

    fn expand_include(
        &mut self,
        tree: &mut Tree,
        node: NodeId,
        base_url: &str,
    ) -> Result<(), SchemaError> {
        let span = tree.span(node);
        let href = tree
            .attr(node, "href")
            .ok_or_else(|| SchemaError::Unexpected {
                span,
                message: "include requires an href attribute".to_string(),
            })?
            .to_string();
        let (mut loaded, _url) = self.load_schema(span, base_url, &href)?;
        let loaded_root = loaded.root();
        if loaded.uri(loaded_root) != NS || loaded.local(loaded_root) != "grammar" {
            return Err(SchemaError::IncludedFileMustBeGrammar { span });
        }

        // definitions inside the include override same-named definitions of
        // the included grammar
        let mut override_names = Vec::new();
        let mut overrides_start = false;
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            for c in tree.element_children(n) {
                match tree.local(c) {
                    "define" => {
                        if let Some(name) = tree.attr(c, "name") {
                            override_names.push((name.to_string(), tree.span(c)));
                        }
                    }
                    "start" => overrides_start = true,
                    "div" => stack.push(c),
                    _ => {}
                }
            }
        }
        for (name, ospan) in &override_names {
            let removed = remove_components(&mut loaded, loaded_root, "define", Some(name));
            if removed == 0 {
                return Err(SchemaError::OverrideMissingFromInclude {
                    override_span: *ospan,
                    include_span: span,
                    name: name.clone(),
                });
            }
        }
        if overrides_start {
            let removed = remove_components(&mut loaded, loaded_root, "start", None);
            if removed == 0 {
                return Err(SchemaError::OverrideMissingFromInclude {
                    override_span: span,
                    include_span: span,
                    name: "start".to_string(),
                });
            }
        }

        // the include becomes a div holding the included components ahead of
        // its own content
        let grafted = graft(tree, &loaded, loaded_root);
        tree.rename(grafted, "div");
        tree.take_attr(node, "href");
        tree.rename(node, "div");
        tree.prepend(node, grafted);
        Ok(())
    }

    fn load_schema(
        &mut self,
        span: codemap::Span,
        base_url: &str,
        href: &str,
    ) -> Result<(Tree, String), SchemaError> {
        let url = resolve_href(base_url, href);
        if self.loading.iter().any(|u| u == &url) {
            return Err(SchemaError::RecursiveInclude { span, url });
        }
        let resource = self
            .resources
            .load(&url)
            .map_err(|error| SchemaError::UnresolvableResource {
                span,
                url: url.clone(),
                error,
            })?;
        let file = self
            .codemap
            .add_file(resource.url.clone(), resource.text);
        let mut loaded =
            xml::parse(&file).map_err(|xml::Error::Xml(span, msg)| SchemaError::Xml(span, msg))?;
        if loaded.uri(loaded.root()) != NS {
            return Err(SchemaError::Unexpected {
                span,
                message: "referenced schema is not in the RELAX NG namespace".to_string(),
            });
        }
        self.loading.push(resource.url.clone());
        let loaded_root = loaded.root();
        let nested = self.resolve_inclusions(&mut loaded, loaded_root, &resource.url);
        self.loading.pop();
        nested?;
        Ok((loaded, resource.url))
    }

    // --- pass 2: datatypeLibrary propagation ---

    fn propagate_datatype_library(
        &mut self,
        tree: &mut Tree,
        node: NodeId,
        inherited: &str,
    ) -> Result<(), SchemaError> {
        let current = match tree.attr(node, "datatypeLibrary") {
            Some(lib) => {
                let lib = lib.to_string();
                self.check_datatype_library(tree.span(node), &lib)?;
                lib
            }
            None => inherited.to_string(),
        };
        match tree.local(node).to_string().as_str() {
            "data" => {
                tree.set_attr(node, "datatypeLibrary", &current);
            }
            "value" => {
                // a value with no explicit type defaults to token from the
                // built-in library, regardless of the inherited library
                if tree.attr(node, "type").is_none() {
                    tree.set_attr(node, "type", "token");
                    tree.set_attr(node, "datatypeLibrary", "");
                } else {
                    tree.set_attr(node, "datatypeLibrary", &current);
                }
            }
            _ => {}
        }
        for child in tree.element_children(node) {
            self.propagate_datatype_library(tree, child, &current)?;
        }
        if !matches!(tree.local(node), "data" | "value") {
            tree.take_attr(node, "datatypeLibrary");
        }
        Ok(())
    }

    fn check_datatype_library(
        &self,
        span: codemap::Span,
        lib: &str,
    ) -> Result<(), SchemaError> {
        if lib.is_empty() {
            return Ok(());
        }
        match url::Url::parse(lib) {
            Ok(u) if u.fragment().is_none() => Ok(()),
            _ => Err(SchemaError::InvalidDatatypeLibrary {
                span,
                uri: lib.to_string(),
            }),
        }
    }

    // --- pass 4: QName resolution in name elements ---

    fn resolve_qnames(&mut self, tree: &mut Tree) -> Result<(), SchemaError> {
        for node in tree.descendants(tree.root()) {
            if !tree.is_element(node) || tree.local(node) != "name" {
                continue;
            }
            let content: String = tree
                .children(node)
                .iter()
                .map(|c| tree.text(*c))
                .collect::<String>()
                .trim()
                .to_string();
            if let Some(colon) = content.find(':') {
                let prefix = content[..colon].to_string();
                let local = content[colon + 1..].to_string();
                let uri = tree
                    .resolve_prefix(node, &prefix)
                    .ok_or_else(|| SchemaError::UndefinedNamespacePrefix {
                        span: tree.span(node),
                        prefix: prefix.clone(),
                    })?
                    .to_string();
                tree.set_attr(node, "ns", &uri);
                set_text_content(tree, node, &local);
            } else {
                set_text_content(tree, node, &content);
            }
        }
        Ok(())
    }

    // --- pass 5: structural rewrites ---

    fn structural_rewrites(&mut self, tree: &mut Tree, node: NodeId) -> Result<(), SchemaError> {
        for child in tree.element_children(node) {
            self.structural_rewrites(tree, child)?;
        }
        let span = tree.span(node);
        match tree.local(node).to_string().as_str() {
            "choice" | "group" | "interleave" => {
                self.fold_binary(tree, node)?;
            }
            "element" => {
                let kids = tree.element_children(node);
                if kids.is_empty() {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "element requires a name class".to_string(),
                    });
                }
                if kids.len() < 2 {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "element requires a content pattern".to_string(),
                    });
                }
                if kids.len() > 2 {
                    let content = tree.element_children(node).split_off(1);
                    let folded = self.fold_into(tree, span, "group", content);
                    tree.append(node, folded);
                }
            }
            "attribute" => {
                let kids = tree.element_children(node);
                if kids.is_empty() {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "attribute requires a name class".to_string(),
                    });
                }
                if kids.len() == 1 {
                    let text = tree.new_element(span, "", "text", NS);
                    tree.append(node, text);
                }
                if kids.len() > 2 {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "attribute takes a single content pattern".to_string(),
                    });
                }
                self.check_attribute_restrictions(tree, node)?;
            }
            "define" | "oneOrMore" | "list" => {
                let kids = tree.element_children(node);
                if kids.is_empty() {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "a content pattern is required here".to_string(),
                    });
                }
                if kids.len() > 1 {
                    let folded = self.fold_into(tree, span, "group", kids);
                    tree.append(node, folded);
                }
            }
            "zeroOrMore" => {
                let kids = tree.element_children(node);
                if kids.is_empty() {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "zeroOrMore requires a content pattern".to_string(),
                    });
                }
                let one = tree.new_element(span, "", "oneOrMore", NS);
                let folded = self.fold_into(tree, span, "group", kids);
                tree.append(one, folded);
                let empty = tree.new_element(span, "", "empty", NS);
                tree.rename(node, "choice");
                tree.empty(node);
                tree.append(node, one);
                tree.append(node, empty);
            }
            "optional" => {
                let kids = tree.element_children(node);
                if kids.is_empty() {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "optional requires a content pattern".to_string(),
                    });
                }
                let folded = self.fold_into(tree, span, "group", kids);
                let empty = tree.new_element(span, "", "empty", NS);
                tree.rename(node, "choice");
                tree.empty(node);
                tree.append(node, folded);
                tree.append(node, empty);
            }
            "mixed" => {
                let kids = tree.element_children(node);
                if kids.is_empty() {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "mixed requires a content pattern".to_string(),
                    });
                }
                let folded = self.fold_into(tree, span, "group", kids);
                let text = tree.new_element(span, "", "text", NS);
                tree.rename(node, "interleave");
                tree.empty(node);
                tree.append(node, folded);
                tree.append(node, text);
            }
            "except" => {
                let kids = tree.element_children(node);
                if kids.is_empty() {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "except requires content".to_string(),
                    });
                }
                if kids.len() > 1 {
                    let folded = self.fold_into(tree, span, "choice", kids);
                    tree.append(node, folded);
                }
            }
            "anyName" => self.check_except_nesting(tree, node, &["anyName"])?,
            "nsName" => self.check_except_nesting(tree, node, &["anyName", "nsName"])?,
            "start" => {
                if tree.element_children(node).len() != 1 {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "start takes exactly one pattern".to_string(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Ensures a choice/group/interleave node ends up with exactly two
    /// children, left-folding longer lists and dissolving singletons.
    fn fold_binary(&mut self, tree: &mut Tree, node: NodeId) -> Result<(), SchemaError> {
        let kids = tree.element_children(node);
        match kids.len() {
            0 => Err(SchemaError::Unexpected {
                span: tree.span(node),
                message: "a content pattern is required here".to_string(),
            }),
            1 => {
                replace_node(tree, node, kids[0]);
                Ok(())
            }
            2 => Ok(()),
            _ => {
                let span = tree.span(node);
                let kind = tree.local(node).to_string();
                let (last, init) = kids.split_last().expect("len > 2");
                let folded = self.fold_into(tree, span, &kind, init.to_vec());
                let last = *last;
                tree.empty(node);
                tree.append(node, folded);
                tree.append(node, last);
                Ok(())
            }
        }
    }

    /// Left-folds a list of nodes into a binary tree of `kind` elements;
    /// a single node is returned unwrapped.
    fn fold_into(
        &mut self,
        tree: &mut Tree,
        span: codemap::Span,
        kind: &str,
        nodes: Vec<NodeId>,
    ) -> NodeId {
        let mut iter = nodes.into_iter();
        let mut acc = iter.next().expect("fold of a non-empty list");
        for next in iter {
            let wrapper = tree.new_element(span, "", kind, NS);
            tree.append(wrapper, acc);
            tree.append(wrapper, next);
            acc = wrapper;
        }
        acc
    }

    fn check_attribute_restrictions(
        &self,
        tree: &Tree,
        node: NodeId,
    ) -> Result<(), SchemaError> {
        let kids = tree.element_children(node);
        let name_class = kids[0];
        match tree.local(name_class) {
            "name" => {
                let ns = tree.attr(name_class, "ns").unwrap_or("");
                let text: String = tree
                    .children(name_class)
                    .iter()
                    .map(|c| tree.text(*c))
                    .collect();
                if ns == XMLNS_URI || (ns.is_empty() && text.trim() == "xmlns") {
                    return Err(SchemaError::Unexpected {
                        span: tree.span(name_class),
                        message: "attributes may not live in the xmlns namespace".to_string(),
                    });
                }
            }
            "nsName" => {
                if tree.attr(name_class, "ns") == Some(XMLNS_URI) {
                    return Err(SchemaError::Unexpected {
                        span: tree.span(name_class),
                        message: "attributes may not live in the xmlns namespace".to_string(),
                    });
                }
            }
            _ => {}
        }
        // an element pattern can never satisfy an attribute's content
        for d in tree.descendants(kids[1]) {
            if tree.is_element(d) && tree.local(d) == "element" {
                return Err(SchemaError::Unexpected {
                    span: tree.span(d),
                    message: "element is not allowed inside attribute content".to_string(),
                });
            }
        }
        Ok(())
    }

    fn check_except_nesting(
        &self,
        tree: &Tree,
        node: NodeId,
        forbidden: &[&str],
    ) -> Result<(), SchemaError> {
        for child in tree.element_children(node) {
            if tree.local(child) != "except" {
                continue;
            }
            for d in tree.descendants(child) {
                if d != child && tree.is_element(d) && forbidden.contains(&tree.local(d)) {
                    return Err(SchemaError::Unexpected {
                        span: tree.span(d),
                        message: format!(
                            "{} is not allowed inside this except clause",
                            tree.local(d)
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    // --- pass 6: grammar flattening ---

    fn flatten_grammars(&mut self, tree: &mut Tree) -> Result<(), SchemaError> {
        let root_span = tree.span(tree.root());
        if tree.local(tree.root()) != "grammar" {
            let old_root = tree.root();
            let grammar = tree.new_element(root_span, "", "grammar", NS);
            let start = tree.new_element(root_span, "", "start", NS);
            tree.set_root(grammar);
            tree.append(grammar, start);
            tree.append(start, old_root);
        }
        let root = tree.root();
        let mut scopes: Vec<HashMap<String, String>> = Vec::new();
        let mut hoisted: Vec<NodeId> = Vec::new();
        let mut taken: HashSet<String> = HashSet::new();
        let start_content =
            self.process_grammar(tree, root, &mut scopes, &mut hoisted, &mut taken)?;
        tree.empty(root);
        let start = tree.new_element(root_span, "", "start", NS);
        tree.append(root, start);
        tree.append(start, start_content);
        for d in hoisted {
            tree.append(root, d);
        }
        Ok(())
    }

    /// Merges combine-duplicates within one grammar scope, renames its
    /// definitions to be globally unique, resolves refs/parentRefs, and
    /// recursively flattens nested grammars. Returns the node holding the
    /// start pattern.
    fn process_grammar(
        &mut self,
        tree: &mut Tree,
        gnode: NodeId,
        scopes: &mut Vec<HashMap<String, String>>,
        hoisted: &mut Vec<NodeId>,
        taken: &mut HashSet<String>,
    ) -> Result<NodeId, SchemaError> {
        let gspan = tree.span(gnode);
        let mut define_order: Vec<String> = Vec::new();
        let mut defines: HashMap<String, Vec<NodeId>> = HashMap::new();
        let mut starts: Vec<NodeId> = Vec::new();
        for c in tree.element_children(gnode) {
            match tree.local(c) {
                "define" => {
                    let name = tree
                        .attr(c, "name")
                        .ok_or_else(|| SchemaError::Unexpected {
                            span: tree.span(c),
                            message: "define requires a name attribute".to_string(),
                        })?
                        .to_string();
                    if !defines.contains_key(&name) {
                        define_order.push(name.clone());
                    }
                    defines.entry(name).or_default().push(c);
                }
                "start" => starts.push(c),
                other => {
                    return Err(SchemaError::Unexpected {
                        span: tree.span(c),
                        message: format!("{} is not allowed in a grammar", other),
                    })
                }
            }
        }
        if starts.is_empty() {
            return Err(SchemaError::StartRuleNotDefined { span: gspan });
        }
        let start = self.merge_components(tree, starts, "start")?;
        let mut merged: Vec<(String, NodeId)> = Vec::new();
        for name in &define_order {
            let nodes = defines.remove(name).expect("collected above");
            merged.push((name.clone(), self.merge_components(tree, nodes, name)?));
        }

        let mut renames = HashMap::new();
        for (name, _) in &merged {
            renames.insert(name.clone(), unique_name(name, taken));
        }
        scopes.push(renames);
        let start_content = tree.element_children(start)[0];
        self.resolve_scope_refs(tree, start_content, scopes, hoisted, taken)?;
        for (_, node) in &merged {
            self.resolve_scope_refs(tree, *node, scopes, hoisted, taken)?;
        }
        let renames = scopes.pop().expect("scope pushed above");
        for (name, node) in merged {
            tree.set_attr(node, "name", &renames[&name]);
            tree.take_attr(node, "combine");
            tree.remove(node).expect("define is attached to its grammar");
            hoisted.push(node);
        }
        tree.remove(start_content)
            .expect("start content is attached");
        Ok(start_content)
    }

    fn resolve_scope_refs(
        &mut self,
        tree: &mut Tree,
        node: NodeId,
        scopes: &mut Vec<HashMap<String, String>>,
        hoisted: &mut Vec<NodeId>,
        taken: &mut HashSet<String>,
    ) -> Result<(), SchemaError> {
        match tree.local(node).to_string().as_str() {
            "grammar" if tree.is_element(node) => {
                let replacement =
                    self.process_grammar(tree, node, scopes, hoisted, taken)?;
                replace_node(tree, node, replacement);
                return Ok(());
            }
            "ref" => {
                let span = tree.span(node);
                let name = tree
                    .attr(node, "name")
                    .ok_or_else(|| SchemaError::Unexpected {
                        span,
                        message: "ref requires a name attribute".to_string(),
                    })?
                    .to_string();
                let scope = scopes.last().expect("inside a grammar scope");
                match scope.get(&name) {
                    Some(renamed) => {
                        let renamed = renamed.clone();
                        tree.set_attr(node, "name", &renamed);
                    }
                    None => return Err(SchemaError::UndefinedReference { span, name }),
                }
            }
            "parentRef" => {
                let span = tree.span(node);
                let name = tree
                    .attr(node, "name")
                    .ok_or_else(|| SchemaError::Unexpected {
                        span,
                        message: "parentRef requires a name attribute".to_string(),
                    })?
                    .to_string();
                if scopes.len() < 2 {
                    return Err(SchemaError::Unexpected {
                        span,
                        message: "parentRef is only allowed inside a nested grammar"
                            .to_string(),
                    });
                }
                let scope = &scopes[scopes.len() - 2];
                match scope.get(&name) {
                    Some(renamed) => {
                        let renamed = renamed.clone();
                        tree.rename(node, "ref");
                        tree.set_attr(node, "name", &renamed);
                    }
                    None => return Err(SchemaError::UndefinedReference { span, name }),
                }
            }
            _ => {}
        }
        for child in tree.element_children(node) {
            self.resolve_scope_refs(tree, child, scopes, hoisted, taken)?;
        }
        Ok(())
    }

    /// Collapses duplicate definitions of one name (or duplicate starts)
    /// according to their combine attributes.
    fn merge_components(
        &mut self,
        tree: &mut Tree,
        nodes: Vec<NodeId>,
        name: &str,
    ) -> Result<NodeId, SchemaError> {
        if nodes.len() == 1 {
            return Ok(nodes[0]);
        }
        let mut no_combine: Vec<NodeId> = Vec::new();
        let mut method: Option<(String, codemap::Span)> = None;
        for n in &nodes {
            match tree.attr(*n, "combine") {
                None => no_combine.push(*n),
                Some(m @ ("choice" | "interleave")) => {
                    let m = m.to_string();
                    match &method {
                        None => method = Some((m, tree.span(*n))),
                        Some((existing, that_span)) if *existing != m => {
                            return Err(SchemaError::IncompatibleCombination {
                                name: name.to_string(),
                                this_span: tree.span(*n),
                                that_span: *that_span,
                            })
                        }
                        Some(_) => {}
                    }
                }
                Some(_) => {
                    return Err(SchemaError::Unexpected {
                        span: tree.span(*n),
                        message: "combine must be \"choice\" or \"interleave\"".to_string(),
                    })
                }
            }
        }
        if no_combine.len() > 1 {
            return Err(SchemaError::DuplicateDefinition {
                name: name.to_string(),
                duplicate: tree.span(no_combine[1]),
                original: tree.span(no_combine[0]),
            });
        }
        let (method, _) = method.ok_or_else(|| SchemaError::DuplicateDefinition {
            name: name.to_string(),
            duplicate: tree.span(nodes[1]),
            original: tree.span(nodes[0]),
        })?;
        let base = nodes[0];
        let span = tree.span(base);
        let mut contents = Vec::new();
        for n in &nodes {
            let body = tree.element_children(*n);
            contents.push(self.fold_into(tree, span, "group", body));
        }
        let folded = self.fold_into(tree, span, &method, contents);
        tree.empty(base);
        tree.append(base, folded);
        for n in &nodes[1..] {
            tree.remove(*n).expect("duplicate component is attached");
        }
        Ok(base)
    }

    // --- pass 7: define/ref normalization ---

    fn normalize_defines(&mut self, tree: &mut Tree) -> Result<(), SchemaError> {
        let root = tree.root();

        // every element pattern moves into its own definition
        loop {
            let candidate = tree.descendants(root).into_iter().find(|n| {
                tree.is_element(*n)
                    && tree.local(*n) == "element"
                    && tree
                        .parent(*n)
                        .map_or(false, |p| tree.local(p) != "define")
            });
            let element = match candidate {
                Some(e) => e,
                None => break,
            };
            let span = tree.span(element);
            let label = self.element_label(tree, element);
            self.unique += 1;
            let synth = format!("__{}-elt-{}", label, self.unique);
            let reference = tree.new_element(span, "", "ref", NS);
            tree.set_attr(reference, "name", &synth);
            tree.replace_with(element, reference)
                .expect("element pattern is attached");
            let define = tree.new_element(span, "", "define", NS);
            tree.set_attr(define, "name", &synth);
            tree.append(define, element);
            tree.append(root, define);
        }

        // definitions not holding an element inline at every reference site
        let mut bodies: HashMap<String, NodeId> = HashMap::new();
        let mut non_element: HashSet<String> = HashSet::new();
        for d in tree.element_children(root) {
            if tree.local(d) != "define" {
                continue;
            }
            let name = tree.attr(d, "name").expect("defines are named").to_string();
            let body = tree.element_children(d)[0];
            if tree.local(body) != "element" {
                non_element.insert(name.clone());
            }
            bodies.insert(name, d);
        }
        for name in &non_element {
            self.check_define_cycle(tree, name, &bodies, &non_element, &mut Vec::new())?;
        }
        loop {
            let target = tree.descendants(root).into_iter().find_map(|n| {
                if tree.is_element(n) && tree.local(n) == "ref" {
                    let name = tree.attr(n, "name")?;
                    if non_element.contains(name) {
                        return Some((n, name.to_string()));
                    }
                }
                None
            });
            let (ref_node, name) = match target {
                Some(t) => t,
                None => break,
            };
            let body = tree.element_children(bodies[&name])[0];
            let copy = tree.clone_subtree(body);
            tree.replace_with(ref_node, copy)
                .expect("ref node is attached");
        }
        for name in &non_element {
            tree.remove(bodies[name]).expect("define is attached");
        }

        // garbage-collect definitions nothing references
        let mut referenced: HashSet<String> = HashSet::new();
        let start = tree.element_children(root)[0];
        let mut queue: Vec<NodeId> = vec![start];
        while let Some(n) = queue.pop() {
            for d in tree.descendants(n) {
                if tree.is_element(d) && tree.local(d) == "ref" {
                    let name = tree.attr(d, "name").expect("refs are named").to_string();
                    if referenced.insert(name.clone()) {
                        if let Some(def) = bodies.get(&name) {
                            queue.push(*def);
                        }
                    }
                }
            }
        }
        for d in tree.element_children(root) {
            if tree.local(d) != "define" {
                continue;
            }
            let name = tree.attr(d, "name").expect("defines are named").to_string();
            if !referenced.contains(&name) {
                self.warnings.push(Warning {
                    span: Some(tree.span(d)),
                    message: format!("definition {:?} is never referenced", name),
                });
                tree.remove(d).expect("define is attached");
            }
        }
        Ok(())
    }

    fn element_label(&self, tree: &Tree, element: NodeId) -> String {
        let kids = tree.element_children(element);
        let nc = kids[0];
        if tree.local(nc) == "name" {
            let text: String = tree
                .children(nc)
                .iter()
                .map(|c| tree.text(*c))
                .collect();
            let text = text.trim().to_string();
            if !text.is_empty() {
                return text;
            }
        }
        tree.local(nc).to_string()
    }

    fn check_define_cycle(
        &self,
        tree: &Tree,
        name: &str,
        bodies: &HashMap<String, NodeId>,
        non_element: &HashSet<String>,
        stack: &mut Vec<String>,
    ) -> Result<(), SchemaError> {
        if stack.iter().any(|n| n == name) {
            return Err(SchemaError::SelfReferentialDefine {
                span: tree.span(bodies[name]),
                name: name.to_string(),
            });
        }
        stack.push(name.to_string());
        for d in tree.descendants(bodies[name]) {
            if tree.is_element(d) && tree.local(d) == "ref" {
                if let Some(target) = tree.attr(d, "name") {
                    if non_element.contains(target) {
                        let target = target.to_string();
                        self.check_define_cycle(tree, &target, bodies, non_element, stack)?;
                    }
                }
            }
        }
        stack.pop();
        Ok(())
    }

    // --- pass 8: notAllowed / empty propagation ---

    fn propagate_trivial_patterns(&mut self, tree: &mut Tree) -> Result<(), SchemaError> {
        loop {
            let changed =
                propagate_not_allowed(tree, tree.root()) | propagate_empty(tree, tree.root());
            if !changed {
                break;
            }
        }
        let start = tree.element_children(tree.root())[0];
        let start_pattern = tree.element_children(start)[0];
        if tree.local(start_pattern) == "notAllowed" {
            return Err(SchemaError::StartMatchesNothing {
                span: tree.span(start_pattern),
            });
        }
        Ok(())
    }

    // --- pass 9: emission ---

    fn emit(&mut self, tree: &Tree) -> Result<(Pattern, Vec<Define>), SchemaError> {
        let root = tree.root();
        let kids = tree.element_children(root);
        let start_pattern = tree.element_children(kids[0])[0];
        let start = self.emit_pattern(tree, start_pattern)?;
        let mut defines = Vec::new();
        for d in &kids[1..] {
            let name = tree.attr(*d, "name").expect("defines are named").to_string();
            let element = tree.element_children(*d)[0];
            let element_kids = tree.element_children(element);
            defines.push(Define {
                name,
                element: ElementPattern {
                    name_class: self.emit_name_class(tree, element_kids[0])?,
                    pattern: self.emit_pattern(tree, element_kids[1])?,
                },
            });
        }
        Ok((start, defines))
    }

    fn emit_pattern(&mut self, tree: &Tree, node: NodeId) -> Result<Pattern, SchemaError> {
        let span = tree.span(node);
        let kids = tree.element_children(node);
        Ok(match tree.local(node) {
            "empty" => Pattern::Empty,
            "notAllowed" => Pattern::NotAllowed,
            "text" => Pattern::Text,
            "choice" => Pattern::Choice(
                Box::new(self.emit_pattern(tree, kids[0])?),
                Box::new(self.emit_pattern(tree, kids[1])?),
            ),
            "group" => Pattern::Group(
                Box::new(self.emit_pattern(tree, kids[0])?),
                Box::new(self.emit_pattern(tree, kids[1])?),
            ),
            "interleave" => Pattern::Interleave(
                Box::new(self.emit_pattern(tree, kids[0])?),
                Box::new(self.emit_pattern(tree, kids[1])?),
            ),
            "oneOrMore" => Pattern::OneOrMore(Box::new(self.emit_pattern(tree, kids[0])?)),
            "list" => Pattern::List(Box::new(self.emit_pattern(tree, kids[0])?)),
            "attribute" => Pattern::Attribute(AttributePattern {
                name_class: self.emit_name_class(tree, kids[0])?,
                pattern: Box::new(self.emit_pattern(tree, kids[1])?),
            }),
            "ref" => Pattern::Ref(RefPattern::new(
                tree.attr(node, "name").expect("refs are named"),
            )),
            "data" => {
                let type_name = tree
                    .attr(node, "type")
                    .ok_or_else(|| SchemaError::Unexpected {
                        span,
                        message: "data requires a type attribute".to_string(),
                    })?
                    .to_string();
                let library = tree
                    .attr(node, "datatypeLibrary")
                    .unwrap_or("")
                    .to_string();
                let mut params = Vec::new();
                let mut except = None;
                for c in kids {
                    match tree.local(c) {
                        "param" => {
                            let pname = tree
                                .attr(c, "name")
                                .ok_or_else(|| SchemaError::Unexpected {
                                    span: tree.span(c),
                                    message: "param requires a name attribute".to_string(),
                                })?
                                .to_string();
                            let value: String =
                                tree.children(c).iter().map(|t| tree.text(*t)).collect();
                            params.push((pname, value));
                        }
                        "except" => {
                            let inner = tree.element_children(c)[0];
                            except = Some(Box::new(self.emit_pattern(tree, inner)?));
                        }
                        other => {
                            return Err(SchemaError::Unexpected {
                                span: tree.span(c),
                                message: format!("{} is not allowed inside data", other),
                            })
                        }
                    }
                }
                let dt = datatype::datatype_name(&library, &type_name, &params)
                    .map_err(|e| self.datatype_error(span, e))?;
                Pattern::Data(DataPattern {
                    library,
                    datatype: dt,
                    params,
                    except,
                })
            }
            "value" => {
                let type_name = tree.attr(node, "type").unwrap_or("token").to_string();
                let library = tree
                    .attr(node, "datatypeLibrary")
                    .unwrap_or("")
                    .to_string();
                let ns = tree.attr(node, "ns").unwrap_or("").to_string();
                let raw: String = tree.children(node).iter().map(|t| tree.text(*t)).collect();
                let dt = datatype::datatype_value(&library, &type_name, &raw)
                    .map_err(|e| self.datatype_error(span, e))?;
                Pattern::Value(ValuePattern {
                    library,
                    datatype: dt,
                    value: raw,
                    ns,
                })
            }
            "element" => unreachable!("element patterns are hoisted into definitions"),
            other => {
                return Err(SchemaError::Unexpected {
                    span,
                    message: format!("{} is not a pattern", other),
                })
            }
        })
    }

    fn emit_name_class(&mut self, tree: &Tree, node: NodeId) -> Result<NamePattern, SchemaError> {
        let kids = tree.element_children(node);
        Ok(match tree.local(node) {
            "name" => {
                let ns = tree.attr(node, "ns").unwrap_or("");
                let text: String = tree.children(node).iter().map(|t| tree.text(*t)).collect();
                NamePattern::name(ns, text.trim())
            }
            "nsName" => {
                let ns = tree.attr(node, "ns").unwrap_or("").to_string();
                let except = match kids.first() {
                    Some(e) if tree.local(*e) == "except" => {
                        let inner = tree.element_children(*e)[0];
                        Some(self.emit_name_class(tree, inner)?)
                    }
                    _ => None,
                };
                NamePattern::ns_name(&ns, except)
            }
            "anyName" => {
                let except = match kids.first() {
                    Some(e) if tree.local(*e) == "except" => {
                        let inner = tree.element_children(*e)[0];
                        Some(self.emit_name_class(tree, inner)?)
                    }
                    _ => None,
                };
                NamePattern::any_name(except)
            }
            "choice" => NamePattern::choice(
                self.emit_name_class(tree, kids[0])?,
                self.emit_name_class(tree, kids[1])?,
            ),
            other => {
                return Err(SchemaError::Unexpected {
                    span: tree.span(node),
                    message: format!("{} is not a name class", other),
                })
            }
        })
    }

    fn datatype_error(&self, span: codemap::Span, e: datatype::Error) -> SchemaError {
        match e {
            datatype::Error::UnsupportedLibrary { library } => {
                SchemaError::UnsupportedDatatypeLibrary { span, library }
            }
            datatype::Error::UnknownName { name } => SchemaError::UnknownDatatype { span, name },
            datatype::Error::ParamNotAllowed { name } => {
                SchemaError::ParamNotAllowed { span, name }
            }
        }
    }
}

// --- helpers shared by the passes ---

/// Copies a subtree out of another tree (an included schema) into `dest`.
fn graft(dest: &mut Tree, src: &Tree, node: NodeId) -> NodeId {
    match src.kind(node) {
        NodeKind::Element {
            prefix,
            local,
            uri,
            ns_decls,
            attributes,
            children,
        } => {
            let id = dest.new_element(src.span(node), prefix, local, uri);
            for (p, u) in ns_decls {
                dest.declare_ns(id, p, u);
            }
            for a in attributes.clone() {
                dest.push_attr(id, a);
            }
            for c in children.clone() {
                let cc = graft(dest, src, c);
                dest.append(id, cc);
            }
            id
        }
        NodeKind::Text { text } => {
            let text = text.clone();
            dest.new_text(src.span(node), &text)
        }
    }
}

/// Removes grammar components (`define name=...` or `start`) from an
/// included grammar, looking through div wrappers. Returns how many were
/// removed.
fn remove_components(tree: &mut Tree, gnode: NodeId, kind: &str, name: Option<&str>) -> usize {
    let mut removed = 0;
    for c in tree.element_children(gnode) {
        match tree.local(c).to_string().as_str() {
            "div" => removed += remove_components(tree, c, kind, name),
            l if l == kind => {
                let matches = match name {
                    Some(n) => tree.attr(c, "name") == Some(n),
                    None => true,
                };
                if matches {
                    tree.remove(c).expect("component is attached");
                    removed += 1;
                }
            }
            _ => {}
        }
    }
    removed
}

/// Swaps `node` for `replacement` wherever `node` sits, including at the
/// root.
fn replace_node(tree: &mut Tree, node: NodeId, replacement: NodeId) {
    if tree.parent(node).is_some() {
        tree.replace_with(node, replacement)
            .expect("node is attached");
    } else {
        tree.set_root(replacement);
    }
}

fn set_text_content(tree: &mut Tree, node: NodeId, text: &str) {
    let span = tree.span(node);
    tree.empty(node);
    let t = tree.new_text(span, text);
    tree.append(node, t);
}

/// Drops annotation elements and attributes from foreign namespaces.
fn strip_foreign(tree: &mut Tree) {
    for node in tree.descendants(tree.root()) {
        if !tree.is_element(node) {
            continue;
        }
        for child in tree.element_children(node) {
            if tree.uri(child) != NS {
                tree.remove(child).expect("child is attached");
            }
        }
        tree.retain_attrs(node, |a| a.uri.is_empty());
    }
}

/// Removes whitespace-only text outside value/param and trims token-valued
/// attributes.
fn normalize_text(tree: &mut Tree) {
    for node in tree.descendants(tree.root()) {
        if !tree.is_element(node) {
            continue;
        }
        let local = tree.local(node).to_string();
        if local != "value" && local != "param" {
            for child in tree.children(node).to_vec() {
                if !tree.is_element(child) && tree.text(child).trim().is_empty() {
                    tree.remove(child).expect("child is attached");
                }
            }
        }
        for attr_name in ["name", "type", "combine"] {
            if let Some(v) = tree.attr(node, attr_name) {
                let trimmed = v.trim().to_string();
                if trimmed != v {
                    tree.set_attr(node, attr_name, &trimmed);
                }
            }
        }
    }
}

/// Converts the `name` attribute shorthand on element/attribute into a
/// leading `name` child element.
fn name_attr_to_element(tree: &mut Tree) {
    for node in tree.descendants(tree.root()) {
        if !tree.is_element(node) {
            continue;
        }
        let local = tree.local(node).to_string();
        if local != "element" && local != "attribute" {
            continue;
        }
        let attr = match tree.take_attr(node, "name") {
            Some(a) => a,
            None => continue,
        };
        let span = tree.span(node);
        let name_el = tree.new_element(span, "", "name", NS);
        let value = attr.value.trim().to_string();
        let text = tree.new_text(span, &value);
        tree.append(name_el, text);
        // an unprefixed attribute name lives in no namespace unless an ns
        // attribute says otherwise
        if local == "attribute" && !value.contains(':') && tree.attr(node, "ns").is_none() {
            tree.set_attr(name_el, "ns", "");
        }
        tree.prepend(node, name_el);
    }
}

/// Pushes the in-scope `ns` attribute down onto every name, nsName and
/// value element, then drops it from everything else.
fn propagate_ns(tree: &mut Tree, node: NodeId, inherited: &str) {
    let current = match tree.attr(node, "ns") {
        Some(ns) => ns.to_string(),
        None => inherited.to_string(),
    };
    let local = tree.local(node).to_string();
    if matches!(local.as_str(), "name" | "nsName" | "value") && tree.attr(node, "ns").is_none() {
        tree.set_attr(node, "ns", &current);
    }
    for child in tree.element_children(node) {
        propagate_ns(tree, child, &current);
    }
    if !matches!(local.as_str(), "name" | "nsName" | "value") {
        tree.take_attr(node, "ns");
    }
}

/// Hoists the children of every div into its parent, in place.
fn dissolve_divs(tree: &mut Tree) {
    loop {
        let div = tree
            .descendants(tree.root())
            .into_iter()
            .find(|n| tree.is_element(*n) && tree.local(*n) == "div" && tree.uri(*n) == NS);
        let div = match div {
            Some(d) => d,
            None => break,
        };
        let parent = tree.parent(div).expect("divs never form the root");
        let mut at = tree
            .index_of_child(parent, div)
            .expect("div is attached to its parent");
        for child in tree.empty(div) {
            tree.insert(parent, at, child);
            at += 1;
        }
        tree.remove(div).expect("div is attached");
    }
}

fn propagate_not_allowed(tree: &mut Tree, node: NodeId) -> bool {
    let mut changed = false;
    for child in tree.element_children(node) {
        changed |= propagate_not_allowed(tree, child);
    }
    let span = tree.span(node);
    let local = tree.local(node).to_string();
    let pattern_kids = tree.element_children(node);
    let has_not_allowed = |tree: &Tree, kids: &[NodeId]| {
        kids.iter().any(|k| tree.local(*k) == "notAllowed")
    };
    match local.as_str() {
        "attribute" | "list" | "oneOrMore" | "group" | "interleave" => {
            // the name class of an attribute can never be notAllowed, so
            // scanning every child is safe
            if has_not_allowed(tree, &pattern_kids) {
                let na = tree.new_element(span, "", "notAllowed", NS);
                replace_node(tree, node, na);
                changed = true;
            }
        }
        "choice" => {
            // name-class choices never hold notAllowed children
            let a = pattern_kids[0];
            let b = pattern_kids[1];
            let a_na = tree.local(a) == "notAllowed";
            let b_na = tree.local(b) == "notAllowed";
            if a_na && b_na {
                let na = tree.new_element(span, "", "notAllowed", NS);
                replace_node(tree, node, na);
                changed = true;
            } else if a_na {
                replace_node(tree, node, b);
                changed = true;
            } else if b_na {
                replace_node(tree, node, a);
                changed = true;
            }
        }
        "except" => {
            if tree.parent(node).map(|p| tree.local(p).to_string()) == Some("data".to_string())
                && has_not_allowed(tree, &pattern_kids)
            {
                tree.remove(node).expect("except is attached");
                changed = true;
            }
        }
        _ => {}
    }
    changed
}

fn propagate_empty(tree: &mut Tree, node: NodeId) -> bool {
    let mut changed = false;
    for child in tree.element_children(node) {
        changed |= propagate_empty(tree, child);
    }
    let span = tree.span(node);
    let kids = tree.element_children(node);
    match tree.local(node).to_string().as_str() {
        "group" | "interleave" => {
            let a_empty = tree.local(kids[0]) == "empty";
            let b_empty = tree.local(kids[1]) == "empty";
            if a_empty && b_empty {
                let e = tree.new_element(span, "", "empty", NS);
                replace_node(tree, node, e);
                changed = true;
            } else if a_empty {
                replace_node(tree, node, kids[1]);
                changed = true;
            } else if b_empty {
                replace_node(tree, node, kids[0]);
                changed = true;
            }
        }
        "oneOrMore" => {
            if tree.local(kids[0]) == "empty" {
                let e = tree.new_element(span, "", "empty", NS);
                replace_node(tree, node, e);
                changed = true;
            }
        }
        "choice" => {
            let a_empty = tree.local(kids[0]) == "empty";
            let b_empty = tree.local(kids[1]) == "empty";
            if a_empty && b_empty {
                let e = tree.new_element(span, "", "empty", NS);
                replace_node(tree, node, e);
                changed = true;
            } else if a_empty && !b_empty {
                // normal form keeps empty as the second operand
                let a = kids[0];
                let b = kids[1];
                tree.empty(node);
                tree.append(node, b);
                tree.append(node, a);
                changed = true;
            }
        }
        _ => {}
    }
    changed
}

fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}-g{}", name, n);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Compiler, MapResources};
    use assert_matches::assert_matches;

    fn compile_source(src: &str) -> Result<(Pattern, Vec<Define>), SchemaError> {
        let resources = MapResources::new(&[("schema.rng", src)]);
        let mut codemap = codemap::CodeMap::new();
        let mut pipeline = Pipeline::new(&resources, &mut codemap);
        let resource = resources.load("schema.rng").unwrap();
        let file = pipeline
            .codemap
            .add_file(resource.url.clone(), resource.text);
        let mut tree = xml::parse(&file).unwrap();
        pipeline.run(&mut tree, "schema.rng")
    }

    fn dump(tree: &Tree, node: NodeId) -> String {
        let mut out = String::new();
        dump_into(tree, node, &mut out);
        out
    }

    fn dump_into(tree: &Tree, node: NodeId, out: &mut String) {
        if tree.is_element(node) {
            out.push('<');
            out.push_str(tree.local(node));
            let mut attrs: Vec<_> = tree
                .attributes(node)
                .iter()
                .map(|a| format!(" {}={:?}", a.local, a.value))
                .collect();
            attrs.sort();
            for a in attrs {
                out.push_str(&a);
            }
            out.push('>');
            for c in tree.children(node) {
                dump_into(tree, *c, out);
            }
            out.push_str("</");
            out.push_str(tree.local(node));
            out.push('>');
        } else {
            out.push_str(tree.text(node));
        }
    }

    const NESTED: &str = r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
      <start><ref name="doc"/></start>
      <define name="doc">
        <element name="doc" ns="urn:test">
          <zeroOrMore><ref name="item"/></zeroOrMore>
          <optional><attribute name="kind"><text/></attribute></optional>
        </element>
      </define>
      <define name="item">
        <element name="item" ns="urn:test"><empty/></element>
      </define>
    </grammar>"#;

    #[test]
    fn simplification_is_idempotent() {
        let resources = MapResources::new(&[("schema.rng", NESTED)]);
        let mut codemap = codemap::CodeMap::new();
        let mut pipeline = Pipeline::new(&resources, &mut codemap);
        let resource = resources.load("schema.rng").unwrap();
        let file = pipeline
            .codemap
            .add_file(resource.url.clone(), resource.text);
        let mut tree = xml::parse(&file).unwrap();
        pipeline.simplify_tree(&mut tree).unwrap();
        let first = dump(&tree, tree.root());
        pipeline.simplify_tree(&mut tree).unwrap();
        let second = dump(&tree, tree.root());
        assert_eq!(first, second);
    }

    #[test]
    fn shorthand_schema_compiles_to_one_definition_per_element() {
        let (start, defines) = compile_source(
            r#"<element name="a" xmlns="http://relaxng.org/ns/structure/1.0">
                 <optional><element name="b"><empty/></element></optional>
               </element>"#,
        )
        .unwrap();
        assert_matches!(start, Pattern::Ref(_));
        assert_eq!(defines.len(), 2);
        let a = defines
            .iter()
            .find(|d| d.element.name_class.matches("", "a"))
            .expect("definition for element a");
        assert_matches!(
            &a.element.pattern,
            Pattern::Choice(inner, empty)
                if matches!(**inner, Pattern::Ref(_)) && matches!(**empty, Pattern::Empty)
        );
    }

    #[test]
    fn attribute_without_content_gets_text() {
        let (_, defines) = compile_source(
            r#"<element name="a" xmlns="http://relaxng.org/ns/structure/1.0">
                 <attribute name="x"/>
               </element>"#,
        )
        .unwrap();
        let a = &defines[0];
        assert_matches!(
            &a.element.pattern,
            Pattern::Attribute(attr) if matches!(*attr.pattern, Pattern::Text)
        );
    }

    #[test]
    fn mixed_becomes_interleave_with_text() {
        let (_, defines) = compile_source(
            r#"<element name="a" xmlns="http://relaxng.org/ns/structure/1.0">
                 <mixed><element name="b"><empty/></element></mixed>
               </element>"#,
        )
        .unwrap();
        let a = defines
            .iter()
            .find(|d| d.element.name_class.matches("", "a"))
            .unwrap();
        assert_matches!(
            &a.element.pattern,
            Pattern::Interleave(l, r)
                if matches!(**l, Pattern::Ref(_)) && matches!(**r, Pattern::Text)
        );
    }

    #[test]
    fn long_choices_fold_to_binary() {
        let (_, defines) = compile_source(
            r#"<element name="a" xmlns="http://relaxng.org/ns/structure/1.0">
                 <choice>
                   <value>one</value>
                   <value>two</value>
                   <value>three</value>
                 </choice>
               </element>"#,
        )
        .unwrap();
        let a = &defines[0];
        assert_matches!(
            &a.element.pattern,
            Pattern::Choice(l, _)
                if matches!(**l, Pattern::Choice(_, _))
        );
    }

    #[test]
    fn nested_grammars_flatten_with_renaming() {
        let (_, defines) = compile_source(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start><ref name="doc"/></start>
                 <define name="doc">
                   <element name="doc">
                     <grammar>
                       <start><ref name="doc"/></start>
                       <define name="doc">
                         <element name="inner"><empty/></element>
                       </define>
                     </grammar>
                   </element>
                 </define>
               </grammar>"#,
        )
        .unwrap();
        let names: Vec<_> = defines.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"doc"));
        assert!(names.contains(&"doc-g1"));
    }

    #[test]
    fn combine_choice_merges_defines() {
        let (_, defines) = compile_source(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start><ref name="doc"/></start>
                 <define name="doc">
                   <element name="doc"><ref name="content"/></element>
                 </define>
                 <define name="content" combine="choice">
                   <element name="a"><empty/></element>
                 </define>
                 <define name="content" combine="choice">
                   <element name="b"><empty/></element>
                 </define>
               </grammar>"#,
        )
        .unwrap();
        let doc = defines.iter().find(|d| d.name == "doc").unwrap();
        assert_matches!(&doc.element.pattern, Pattern::Choice(_, _));
    }

    #[test]
    fn conflicting_combines_are_rejected() {
        let err = compile_source(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start><ref name="doc"/></start>
                 <define name="doc" combine="choice">
                   <element name="doc"><empty/></element>
                 </define>
                 <define name="doc" combine="interleave">
                   <element name="doc"><text/></element>
                 </define>
               </grammar>"#,
        )
        .unwrap_err();
        assert_matches!(err, SchemaError::IncompatibleCombination { .. });
    }

    #[test]
    fn duplicate_defines_without_combine_are_rejected() {
        let err = compile_source(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start><ref name="doc"/></start>
                 <define name="doc"><element name="doc"><empty/></element></define>
                 <define name="doc"><element name="doc"><text/></element></define>
               </grammar>"#,
        )
        .unwrap_err();
        assert_matches!(err, SchemaError::DuplicateDefinition { .. });
    }

    #[test]
    fn non_element_defines_inline_at_reference_sites() {
        let (_, defines) = compile_source(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start><ref name="doc"/></start>
                 <define name="doc">
                   <element name="doc"><ref name="body"/></element>
                 </define>
                 <define name="body"><text/></define>
               </grammar>"#,
        )
        .unwrap();
        assert_eq!(defines.len(), 1);
        assert_matches!(defines[0].element.pattern, Pattern::Text);
    }

    #[test]
    fn self_referential_non_element_define_is_rejected() {
        let err = compile_source(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start><ref name="doc"/></start>
                 <define name="doc">
                   <element name="doc"><ref name="loop"/></element>
                 </define>
                 <define name="loop"><choice><ref name="loop"/><empty/></choice></define>
               </grammar>"#,
        )
        .unwrap_err();
        assert_matches!(err, SchemaError::SelfReferentialDefine { .. });
    }

    #[test]
    fn unreferenced_defines_are_dropped_with_a_warning() {
        let resources = MapResources::new(&[(
            "schema.rng",
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start><ref name="doc"/></start>
                 <define name="doc"><element name="doc"><empty/></element></define>
                 <define name="orphan"><element name="orphan"><empty/></element></define>
               </grammar>"#,
        )]);
        let mut compiler = Compiler::new(resources);
        let compiled = compiler.compile("schema.rng").unwrap();
        assert_eq!(compiled.grammar.defines().len(), 1);
        assert_eq!(compiled.warnings.len(), 1);
        assert!(compiled.warnings[0].message.contains("orphan"));
    }

    #[test]
    fn not_allowed_collapses_enclosing_groups() {
        let (_, defines) = compile_source(
            r#"<element name="a" xmlns="http://relaxng.org/ns/structure/1.0">
                 <choice>
                   <group><notAllowed/><text/></group>
                   <empty/>
                 </choice>
               </element>"#,
        )
        .unwrap();
        assert_matches!(defines[0].element.pattern, Pattern::Empty);
    }

    #[test]
    fn start_reducing_to_not_allowed_is_an_error() {
        let err = compile_source(
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <start><notAllowed/></start>
               </grammar>"#,
        )
        .unwrap_err();
        assert_matches!(err, SchemaError::StartMatchesNothing { .. });
    }

    #[test]
    fn include_merges_and_overrides_definitions() {
        let resources = MapResources::new(&[
            (
                "main.rng",
                r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                     <include href="lib.rng">
                       <define name="item">
                         <element name="item"><text/></element>
                       </define>
                     </include>
                     <start><ref name="doc"/></start>
                   </grammar>"#,
            ),
            (
                "lib.rng",
                r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                     <define name="doc">
                       <element name="doc"><ref name="item"/></element>
                     </define>
                     <define name="item">
                       <element name="item"><empty/></element>
                     </define>
                   </grammar>"#,
            ),
        ]);
        let mut compiler = Compiler::new(resources);
        let compiled = compiler.compile("main.rng").unwrap();
        let item = compiled
            .grammar
            .defines()
            .iter()
            .find(|d| d.element.name_class.matches("", "item"))
            .unwrap();
        // the override body won, so item holds text rather than empty
        assert_matches!(item.element.pattern, Pattern::Text);
    }

    #[test]
    fn override_matching_nothing_is_an_error() {
        let resources = MapResources::new(&[
            (
                "main.rng",
                r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                     <include href="lib.rng">
                       <define name="missing"><empty/></define>
                     </include>
                     <start><ref name="doc"/></start>
                   </grammar>"#,
            ),
            (
                "lib.rng",
                r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                     <define name="doc">
                       <element name="doc"><empty/></element>
                     </define>
                   </grammar>"#,
            ),
        ]);
        let mut compiler = Compiler::new(resources);
        let err = compiler.compile("main.rng").unwrap_err();
        assert_matches!(err, SchemaError::OverrideMissingFromInclude { .. });
    }

    #[test]
    fn recursive_include_is_detected() {
        let resources = MapResources::new(&[(
            "main.rng",
            r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0">
                 <include href="main.rng"/>
                 <start><empty/></start>
               </grammar>"#,
        )]);
        let mut compiler = Compiler::new(resources);
        let err = compiler.compile("main.rng").unwrap_err();
        assert_matches!(err, SchemaError::RecursiveInclude { .. });
    }

    #[test]
    fn external_ref_substitutes_the_pattern() {
        let resources = MapResources::new(&[
            (
                "main.rng",
                r#"<element name="doc" xmlns="http://relaxng.org/ns/structure/1.0">
                     <externalRef href="part.rng"/>
                   </element>"#,
            ),
            (
                "part.rng",
                r#"<element name="part" xmlns="http://relaxng.org/ns/structure/1.0">
                     <empty/>
                   </element>"#,
            ),
        ]);
        let mut compiler = Compiler::new(resources);
        let compiled = compiler.compile("main.rng").unwrap();
        assert!(compiled
            .grammar
            .defines()
            .iter()
            .any(|d| d.element.name_class.matches("", "part")));
    }

    #[test]
    fn qnames_resolve_against_in_scope_declarations() {
        let (_, defines) = compile_source(
            r#"<element name="p:a" xmlns="http://relaxng.org/ns/structure/1.0" xmlns:p="urn:p">
                 <empty/>
               </element>"#,
        )
        .unwrap();
        assert!(defines[0].element.name_class.matches("urn:p", "a"));
    }

    #[test]
    fn undefined_prefix_is_an_error() {
        let err = compile_source(
            r#"<element name="p:a" xmlns="http://relaxng.org/ns/structure/1.0">
                 <empty/>
               </element>"#,
        )
        .unwrap_err();
        assert_matches!(err, SchemaError::UndefinedNamespacePrefix { .. });
    }

    #[test]
    fn ns_propagates_to_name_elements() {
        let (_, defines) = compile_source(
            r#"<element name="a" ns="urn:doc" xmlns="http://relaxng.org/ns/structure/1.0">
                 <element name="b"><empty/></element>
               </element>"#,
        )
        .unwrap();
        for d in defines {
            let nc = &d.element.name_class;
            assert!(nc.matches("urn:doc", "a") || nc.matches("urn:doc", "b"));
        }
    }

    #[test]
    fn attributes_default_to_no_namespace() {
        let (_, defines) = compile_source(
            r#"<element name="a" ns="urn:doc" xmlns="http://relaxng.org/ns/structure/1.0">
                 <attribute name="x"/>
               </element>"#,
        )
        .unwrap();
        let a = &defines[0];
        if let Pattern::Attribute(attr) = &a.element.pattern {
            assert!(attr.name_class.matches("", "x"));
            assert!(!attr.name_class.matches("urn:doc", "x"));
        } else {
            panic!("expected an attribute pattern");
        }
    }

    #[test]
    fn xmlns_attributes_are_rejected() {
        let err = compile_source(
            r#"<element name="a" xmlns="http://relaxng.org/ns/structure/1.0">
                 <attribute name="xmlns"/>
               </element>"#,
        )
        .unwrap_err();
        assert_matches!(err, SchemaError::Unexpected { .. });
    }

    #[test]
    fn any_name_inside_except_is_rejected() {
        let err = compile_source(
            r#"<element xmlns="http://relaxng.org/ns/structure/1.0">
                 <anyName><except><anyName/></except></anyName>
                 <empty/>
               </element>"#,
        )
        .unwrap_err();
        assert_matches!(err, SchemaError::Unexpected { .. });
    }

    #[test]
    fn value_without_type_defaults_to_token() {
        let (_, defines) = compile_source(
            r#"<element name="a" xmlns="http://relaxng.org/ns/structure/1.0"
                        datatypeLibrary="http://www.w3.org/2001/XMLSchema-datatypes">
                 <value>hello</value>
               </element>"#,
        )
        .unwrap();
        if let Pattern::Value(v) = &defines[0].element.pattern {
            assert_eq!(v.library, "");
            assert!(v.matches("  hello "));
        } else {
            panic!("expected a value pattern");
        }
    }

    #[test]
    fn unknown_datatypes_are_rejected() {
        let err = compile_source(
            r#"<element name="a" xmlns="http://relaxng.org/ns/structure/1.0">
                 <data type="integer"/>
               </element>"#,
        )
        .unwrap_err();
        assert_matches!(err, SchemaError::UnknownDatatype { .. });
    }
}
