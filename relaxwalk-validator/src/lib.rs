//! Walker-based validation of XML documents against compiled RELAX NG
//! grammars.
//!
//! [`GrammarWalker`] is the event-level state machine: it owns the stack of
//! candidate-walker frames and implements the whitespace, attribute
//! swallowing and misplaced-element policies. [`Validator`] adapts an
//! `xmlparser` token stream onto the walker and renders diagnostics
//! through `codemap`.

use relaxwalk_model::model::{Define, Grammar};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use xmlparser::{ElementEnd, EntityDefinition, StrSpan, Token, Tokenizer};

mod event;
mod walker;

pub use event::{
    describe_name_class, AttributeSpec, DefaultNameResolver, Event, Expected, Fire,
    NameResolver, ValidationError, WalkEvent,
};
pub use walker::Walker;

/// Constructs validators from a compiled grammar.
pub trait GrammarExt {
    fn new_walker<N: NameResolver>(&self, resolver: N) -> GrammarWalker<'_, N>;
}

impl GrammarExt for Grammar {
    fn new_walker<N: NameResolver>(&self, resolver: N) -> GrammarWalker<'_, N> {
        GrammarWalker::new(self, resolver)
    }
}

/// The top-level validator state machine.
///
/// Each frame holds the candidate walkers for one element depth; the
/// nondeterministic branches of the grammar live side by side in a frame
/// until an event disambiguates them.
#[derive(Clone)]
pub struct GrammarWalker<'g, N: NameResolver = DefaultNameResolver> {
    grammar: &'g Grammar,
    frames: Vec<Vec<Walker<'g>>>,
    resolver: N,
    suspended_ws: Option<String>,
    ignore_next_ws: bool,
    swallow_attribute_value: bool,
    misplaced_depth: usize,
}

impl<'g, N: NameResolver> GrammarWalker<'g, N> {
    pub fn new(grammar: &'g Grammar, resolver: N) -> GrammarWalker<'g, N> {
        GrammarWalker {
            grammar,
            frames: vec![vec![Walker::new(grammar, grammar.start())]],
            resolver,
            suspended_ws: None,
            ignore_next_ws: false,
            swallow_attribute_value: false,
            misplaced_depth: 0,
        }
    }

    /// Feeds one event; an empty result means the event was accepted.
    pub fn fire_event(&mut self, event: Event) -> Vec<ValidationError> {
        match event {
            Event::AttributeNameAndValue { ns, local, value } => {
                let mut errors = self.fire_event(Event::AttributeName { ns, local });
                errors.extend(self.fire_event(Event::AttributeValue { value }));
                errors
            }
            Event::StartTagAndAttributes {
                ns,
                local,
                attributes,
            } => {
                let mut errors = self.fire_event(Event::EnterStartTag { ns, local });
                for a in &attributes {
                    errors.extend(self.fire_event(Event::AttributeNameAndValue {
                        ns: a.ns,
                        local: a.local,
                        value: a.value,
                    }));
                }
                errors.extend(self.fire_event(Event::LeaveStartTag));
                errors
            }
            Event::Text { text } => {
                if text.is_empty() {
                    panic!("firing empty text events makes no sense");
                }
                if self.misplaced_depth > 0 {
                    return Vec::new();
                }
                if is_whitespace_str(text) {
                    self.suspended_ws
                        .get_or_insert_with(String::new)
                        .push_str(text);
                    return Vec::new();
                }
                self.suspended_ws = None;
                self.ignore_next_ws = false;
                let (matched, errors, _) = self.dispatch(WalkEvent::Text { text });
                if matched {
                    Vec::new()
                } else if errors.is_empty() {
                    vec![ValidationError::generic("text not allowed here")]
                } else {
                    errors
                }
            }
            Event::EnterStartTag { ns, local } => {
                if self.misplaced_depth > 0 {
                    self.misplaced_depth += 1;
                    return Vec::new();
                }
                self.suspended_ws = None;
                self.ignore_next_ws = false;
                self.swallow_attribute_value = false;
                let (matched, _, refs) = self.dispatch(WalkEvent::EnterStartTag { ns, local });
                if matched {
                    debug_assert!(!refs.is_empty(), "a start tag only matches through refs");
                    let frame = refs
                        .iter()
                        .map(|d| Walker::new(self.grammar, &d.element.pattern))
                        .collect();
                    self.frames.push(frame);
                    return Vec::new();
                }
                let errors = vec![ValidationError::element_name(
                    "tag not allowed here",
                    event::expanded_name(ns, local),
                )];
                let candidates = self.grammar.element_candidates(local);
                if candidates.len() == 1 {
                    // continue as if the one definition of this local name
                    // had been intended
                    let define = self.grammar.define(candidates[0]);
                    self.frames
                        .push(vec![Walker::new(self.grammar, &define.element.pattern)]);
                } else {
                    self.frames.push(Vec::new());
                    self.misplaced_depth = 1;
                }
                errors
            }
            Event::AttributeName { ns, local } => {
                if self.misplaced_depth > 0 {
                    return Vec::new();
                }
                self.suspended_ws = None;
                self.ignore_next_ws = false;
                let (matched, errors, _) = self.dispatch(WalkEvent::AttributeName { ns, local });
                if matched {
                    self.swallow_attribute_value = false;
                    Vec::new()
                } else {
                    self.swallow_attribute_value = true;
                    if errors.is_empty() {
                        vec![ValidationError::attribute_name(
                            "attribute not allowed here",
                            event::expanded_name(ns, local),
                        )]
                    } else {
                        errors
                    }
                }
            }
            Event::AttributeValue { value } => {
                if self.misplaced_depth > 0 {
                    return Vec::new();
                }
                if self.swallow_attribute_value {
                    self.swallow_attribute_value = false;
                    return Vec::new();
                }
                self.ignore_next_ws = false;
                let (matched, errors, _) = self.dispatch(WalkEvent::AttributeValue { value });
                if matched {
                    Vec::new()
                } else if errors.is_empty() {
                    vec![ValidationError::generic("attribute value required")]
                } else {
                    errors
                }
            }
            Event::LeaveStartTag => {
                if self.misplaced_depth > 0 {
                    return Vec::new();
                }
                self.suspended_ws = None;
                self.ignore_next_ws = false;
                self.swallow_attribute_value = false;
                let (matched, errors, _) = self.dispatch(WalkEvent::LeaveStartTag);
                if matched {
                    Vec::new()
                } else {
                    errors
                }
            }
            Event::EndTag { .. } => {
                if self.misplaced_depth > 0 {
                    self.misplaced_depth -= 1;
                    if self.misplaced_depth == 0 {
                        self.frames.pop();
                        self.ignore_next_ws = true;
                    }
                    return Vec::new();
                }
                if let Some(ws) = self.suspended_ws.take() {
                    if !self.ignore_next_ws {
                        // deliver buffered whitespace to text-sensitive
                        // patterns; element-only content rejects it
                        // harmlessly
                        let _ = self.dispatch(WalkEvent::Text { text: &ws });
                    }
                }
                let mut clean = false;
                let mut errors = Vec::new();
                let frame = self.frames.last_mut().expect("the root frame always exists");
                for w in frame.iter_mut() {
                    let es = w.end(false);
                    if es.is_empty() {
                        clean = true;
                    } else {
                        errors.extend(es);
                    }
                }
                if self.frames.len() > 1 {
                    self.frames.pop();
                }
                self.ignore_next_ws = true;
                self.swallow_attribute_value = false;
                if clean {
                    Vec::new()
                } else {
                    errors
                }
            }
        }
    }

    /// Closes the document, reporting whatever remains unsatisfied.
    pub fn end(&mut self) -> Vec<ValidationError> {
        let mut clean = false;
        let mut errors = Vec::new();
        let frame = self.frames.last_mut().expect("the root frame always exists");
        for w in frame.iter_mut() {
            let es = w.end(false);
            if es.is_empty() {
                clean = true;
            } else {
                errors.extend(es);
            }
        }
        if clean {
            Vec::new()
        } else {
            errors
        }
    }

    pub fn can_end(&self) -> bool {
        self.frames.len() == 1
            && self.misplaced_depth == 0
            && self.frames[0].iter().any(|w| w.can_end())
    }

    /// Union of the events the live candidates would accept next.
    pub fn possible(&self) -> HashSet<Expected> {
        let mut out = HashSet::new();
        for w in self.frames.last().expect("the root frame always exists") {
            out.extend(w.possible());
        }
        out
    }

    pub fn enter_context(&mut self) {
        self.resolver.enter_context();
    }

    pub fn leave_context(&mut self) {
        self.resolver.leave_context();
    }

    pub fn define_prefix(&mut self, prefix: &str, uri: &str) {
        self.resolver.define_prefix(prefix, uri);
    }

    pub fn resolve_name(&self, qname: &str, is_attribute: bool) -> Option<(String, String)> {
        self.resolver.resolve_name(qname, is_attribute)
    }

    /// Fires an event at every walker of the top frame. When at least one
    /// matches, the frame keeps exactly the matching walkers; otherwise it
    /// is left untouched so validation can recover and continue.
    fn dispatch(
        &mut self,
        ev: WalkEvent,
    ) -> (bool, Vec<ValidationError>, Vec<&'g Define>) {
        let frame = self.frames.last_mut().expect("the root frame always exists");
        let mut flags = Vec::with_capacity(frame.len());
        let mut refs: Vec<&'g Define> = Vec::new();
        let mut seen_refs: HashSet<&str> = HashSet::new();
        let mut errors = Vec::new();
        for w in frame.iter_mut() {
            match w.fire_event(ev) {
                Fire::Matched { refs: r } => {
                    flags.push(true);
                    for d in r {
                        if seen_refs.insert(&d.name) {
                            refs.push(d);
                        }
                    }
                }
                Fire::Rejected { errors: e } => {
                    flags.push(false);
                    errors.extend(e);
                }
            }
        }
        if flags.iter().any(|m| *m) {
            let mut keep = flags.into_iter();
            frame.retain(|_| keep.next().expect("one flag per walker"));
            (true, Vec::new(), refs)
        } else {
            (false, errors, Vec::new())
        }
    }
}

/// Validation failures reported by the token-stream driver.
#[derive(Debug)]
pub enum ValidatorError<'a> {
    Xml(xmlparser::Error),
    Invalid {
        span: Range<usize>,
        errors: Vec<ValidationError>,
    },
    UndefinedNamespacePrefix {
        prefix: StrSpan<'a>,
    },
    UndefinedEntity {
        name: &'a str,
        span: Range<usize>,
    },
    InvalidOrUnclosedEntity {
        span: Range<usize>,
    },
}

struct PendingAttribute<'a> {
    prefix: StrSpan<'a>,
    local: StrSpan<'a>,
    value: StrSpan<'a>,
}

struct PendingElement<'a> {
    prefix: StrSpan<'a>,
    local: StrSpan<'a>,
    span: StrSpan<'a>,
    decls: Vec<(String, String)>,
    attrs: Vec<PendingAttribute<'a>>,
}

/// Drives a tokenizer through a [`GrammarWalker`], adapting tokens into
/// the walker's event vocabulary.
pub struct Validator<'g, 'a, N: NameResolver = DefaultNameResolver> {
    walker: GrammarWalker<'g, N>,
    tokenizer: Tokenizer<'a>,
    pending: Option<PendingElement<'a>>,
    entity_definitions: HashMap<String, String>,
}

impl<'g, 'a> Validator<'g, 'a, DefaultNameResolver> {
    pub fn new(grammar: &'g Grammar, tokenizer: Tokenizer<'a>) -> Validator<'g, 'a> {
        Validator::with_resolver(grammar, tokenizer, DefaultNameResolver::default())
    }
}

impl<'g, 'a, N: NameResolver> Validator<'g, 'a, N> {
    pub fn with_resolver(
        grammar: &'g Grammar,
        tokenizer: Tokenizer<'a>,
        resolver: N,
    ) -> Validator<'g, 'a, N> {
        let mut entity_definitions = HashMap::new();
        entity_definitions.insert("lt".to_string(), "<".to_string());
        entity_definitions.insert("gt".to_string(), ">".to_string());
        entity_definitions.insert("amp".to_string(), "&".to_string());
        entity_definitions.insert("apos".to_string(), "'".to_string());
        entity_definitions.insert("quot".to_string(), "\"".to_string());
        Validator {
            walker: GrammarWalker::new(grammar, resolver),
            tokenizer,
            pending: None,
            entity_definitions,
        }
    }

    /// Pulls and validates the next token. `None` once the input is
    /// exhausted.
    pub fn validate_next(&mut self) -> Option<Result<(), ValidatorError<'a>>> {
        match self.tokenizer.next() {
            Some(Ok(token)) => Some(self.validate(token)),
            Some(Err(err)) => Some(Err(ValidatorError::Xml(err))),
            None => None,
        }
    }

    /// Closes the document.
    pub fn end(&mut self) -> Result<(), ValidatorError<'a>> {
        let errors = self.walker.end();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidatorError::Invalid {
                span: 0..0,
                errors,
            })
        }
    }

    pub fn walker(&self) -> &GrammarWalker<'g, N> {
        &self.walker
    }

    fn validate(&mut self, token: Token<'a>) -> Result<(), ValidatorError<'a>> {
        match token {
            Token::Declaration { .. }
            | Token::ProcessingInstruction { .. }
            | Token::Comment { .. }
            | Token::DtdStart { .. }
            | Token::EmptyDtd { .. }
            | Token::DtdEnd { .. } => Ok(()),
            Token::ElementStart {
                prefix,
                local,
                span,
            } => {
                self.pending = Some(PendingElement {
                    prefix,
                    local,
                    span,
                    decls: Vec::new(),
                    attrs: Vec::new(),
                });
                Ok(())
            }
            Token::Attribute {
                prefix,
                local,
                value,
                span: _,
            } => {
                let pending = self
                    .pending
                    .as_mut()
                    .expect("attribute token outside a start tag");
                if prefix.as_str() == "xmlns" {
                    pending
                        .decls
                        .push((local.as_str().to_string(), value.as_str().to_string()));
                } else if prefix.as_str().is_empty() && local.as_str() == "xmlns" {
                    pending
                        .decls
                        .push((String::new(), value.as_str().to_string()));
                } else {
                    pending.attrs.push(PendingAttribute {
                        prefix,
                        local,
                        value,
                    });
                }
                Ok(())
            }
            Token::ElementEnd { end, span } => match end {
                ElementEnd::Open => self.open_pending(false, span),
                ElementEnd::Empty => self.open_pending(true, span),
                ElementEnd::Close(prefix, local) => self.close_tag(prefix, local, span),
            },
            Token::Text { text } => {
                let decoded =
                    decode_entities(text.as_str(), text.start(), &self.entity_definitions)?;
                self.fire_text(&decoded, text.start()..text.end())
            }
            Token::Cdata { text, span: _ } => {
                self.fire_text(text.as_str(), text.start()..text.end())
            }
            Token::EntityDeclaration {
                name, definition, ..
            } => match definition {
                EntityDefinition::EntityValue(value) => {
                    self.entity_definitions
                        .insert(name.as_str().to_string(), value.as_str().to_string());
                    Ok(())
                }
                EntityDefinition::ExternalId(_) => Err(ValidatorError::Invalid {
                    span: name.start()..name.end(),
                    errors: vec![ValidationError::generic(
                        "external entity declarations are not supported",
                    )],
                }),
            },
        }
    }

    fn fire_text(&mut self, text: &str, span: Range<usize>) -> Result<(), ValidatorError<'a>> {
        if text.is_empty() {
            return Ok(());
        }
        let errors = self.walker.fire_event(Event::Text { text });
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidatorError::Invalid { span, errors })
        }
    }

    fn open_pending(
        &mut self,
        self_closing: bool,
        end_span: StrSpan<'a>,
    ) -> Result<(), ValidatorError<'a>> {
        let pending = self
            .pending
            .take()
            .expect("element end token without a start");
        self.walker.enter_context();
        for (prefix, uri) in &pending.decls {
            self.walker.define_prefix(prefix, uri);
        }
        let qname = qname_of(pending.prefix.as_str(), pending.local.as_str());
        let (ns, local) = match self.walker.resolve_name(&qname, false) {
            Some(resolved) => resolved,
            None => {
                return Err(ValidatorError::UndefinedNamespacePrefix {
                    prefix: pending.prefix,
                })
            }
        };
        let mut errors = self.walker.fire_event(Event::EnterStartTag {
            ns: &ns,
            local: &local,
        });
        for attr in &pending.attrs {
            let qn = qname_of(attr.prefix.as_str(), attr.local.as_str());
            let (ans, alocal) = match self.walker.resolve_name(&qn, true) {
                Some(resolved) => resolved,
                None => {
                    return Err(ValidatorError::UndefinedNamespacePrefix {
                        prefix: attr.prefix,
                    })
                }
            };
            let value = decode_entities(
                attr.value.as_str(),
                attr.value.start(),
                &self.entity_definitions,
            )?;
            errors.extend(self.walker.fire_event(Event::AttributeNameAndValue {
                ns: &ans,
                local: &alocal,
                value: &value,
            }));
        }
        errors.extend(self.walker.fire_event(Event::LeaveStartTag));
        if self_closing {
            errors.extend(self.walker.fire_event(Event::EndTag {
                ns: &ns,
                local: &local,
            }));
            self.walker.leave_context();
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidatorError::Invalid {
                span: pending.span.start()..end_span.end(),
                errors,
            })
        }
    }

    fn close_tag(
        &mut self,
        prefix: StrSpan<'a>,
        local: StrSpan<'a>,
        span: StrSpan<'a>,
    ) -> Result<(), ValidatorError<'a>> {
        let qname = qname_of(prefix.as_str(), local.as_str());
        let (ns, local_name) = match self.walker.resolve_name(&qname, false) {
            Some(resolved) => resolved,
            None => return Err(ValidatorError::UndefinedNamespacePrefix { prefix }),
        };
        let errors = self.walker.fire_event(Event::EndTag {
            ns: &ns,
            local: &local_name,
        });
        self.walker.leave_context();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidatorError::Invalid {
                span: span.start()..span.end(),
                errors,
            })
        }
    }

    fn describe_expected(&self) -> String {
        const MAX_NAMES: usize = 4;
        let possible = self.walker.possible();
        let mut elements = Vec::new();
        let mut attributes = Vec::new();
        let mut text = false;
        for p in possible {
            match p {
                Expected::EnterStartTag(nc) => elements.push(describe_name_class(&nc)),
                Expected::AttributeName(nc) => attributes.push(describe_name_class(&nc)),
                Expected::AttributeValue => {}
                Expected::Text => text = true,
            }
        }
        elements.sort();
        attributes.sort();
        let mut out = String::new();
        if !elements.is_empty() {
            out.push_str("Element ");
            let rest = elements.len().saturating_sub(MAX_NAMES);
            out.push_str(&elements[..elements.len().min(MAX_NAMES)].join(" "));
            if rest > 0 {
                out.push_str(&format!(" .. or one of {} more", rest));
            }
        }
        if !attributes.is_empty() {
            if !out.is_empty() {
                out.push_str("; ");
            }
            out.push_str("Attribute ");
            out.push_str(&attributes.join(" "));
        }
        if text {
            if !out.is_empty() {
                out.push_str("; ");
            }
            out.push_str("text");
        }
        out
    }

    /// Renders a validation failure against the document source.
    pub fn diagnostic(
        &self,
        name: String,
        source: String,
        err: &ValidatorError,
    ) -> (codemap::CodeMap, Vec<codemap_diagnostic::Diagnostic>) {
        let mut map = codemap::CodeMap::new();
        let file = map.add_file(name, source);
        let mut diagnostics = Vec::new();
        match err {
            ValidatorError::Xml(e) => {
                diagnostics.push(codemap_diagnostic::Diagnostic {
                    level: codemap_diagnostic::Level::Error,
                    message: format!("{}", e),
                    code: None,
                    spans: vec![],
                });
            }
            ValidatorError::Invalid { span, errors } => {
                let label = codemap_diagnostic::SpanLabel {
                    span: file.span.subspan(span.start as u64, span.end as u64),
                    label: Some("not allowed".to_string()),
                    style: codemap_diagnostic::SpanStyle::Primary,
                };
                let message = errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                diagnostics.push(codemap_diagnostic::Diagnostic {
                    level: codemap_diagnostic::Level::Error,
                    message,
                    code: None,
                    spans: vec![label],
                });
                let desc = self.describe_expected();
                let message = if desc.is_empty() {
                    "Remove this".to_string()
                } else {
                    format!("Expected {}", desc)
                };
                diagnostics.push(codemap_diagnostic::Diagnostic {
                    level: codemap_diagnostic::Level::Help,
                    message,
                    code: None,
                    spans: vec![],
                });
            }
            ValidatorError::UndefinedNamespacePrefix { prefix } => {
                let label = codemap_diagnostic::SpanLabel {
                    span: file
                        .span
                        .subspan(prefix.start() as u64, prefix.end() as u64),
                    label: Some(format!(
                        "Add an xmlns:{}=\"..\" attribute to define this prefix",
                        prefix.as_str()
                    )),
                    style: codemap_diagnostic::SpanStyle::Primary,
                };
                diagnostics.push(codemap_diagnostic::Diagnostic {
                    level: codemap_diagnostic::Level::Error,
                    message: format!("The prefix {:?} is not defined", prefix.as_str()),
                    code: None,
                    spans: vec![label],
                });
            }
            ValidatorError::UndefinedEntity { name, span } => {
                let label = codemap_diagnostic::SpanLabel {
                    span: file.span.subspan(span.start as u64, span.end as u64),
                    label: Some("undefined".to_string()),
                    style: codemap_diagnostic::SpanStyle::Primary,
                };
                diagnostics.push(codemap_diagnostic::Diagnostic {
                    level: codemap_diagnostic::Level::Error,
                    message: format!("The entity &{};  is not defined", name),
                    code: None,
                    spans: vec![label],
                });
            }
            ValidatorError::InvalidOrUnclosedEntity { span } => {
                let label = codemap_diagnostic::SpanLabel {
                    span: file.span.subspan(span.start as u64, span.end as u64),
                    label: None,
                    style: codemap_diagnostic::SpanStyle::Primary,
                };
                diagnostics.push(codemap_diagnostic::Diagnostic {
                    level: codemap_diagnostic::Level::Error,
                    message: "Invalid or unclosed entity reference".to_string(),
                    code: None,
                    spans: vec![label],
                });
            }
        }
        (map, diagnostics)
    }
}

fn qname_of(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{}:{}", prefix, local)
    }
}

/// Expands the five predefined entities, document-declared entities, and
/// character references.
fn decode_entities<'a>(
    text: &'a str,
    base: usize,
    entities: &HashMap<String, String>,
) -> Result<String, ValidatorError<'a>> {
    if !text.contains('&') {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while let Some(rel) = text[i..].find('&') {
        let amp = i + rel;
        out.push_str(&text[i..amp]);
        let semi = match text[amp + 1..].find(';') {
            Some(s) => amp + 1 + s,
            None => {
                return Err(ValidatorError::InvalidOrUnclosedEntity {
                    span: base + amp..base + text.len(),
                })
            }
        };
        let name = &text[amp + 1..semi];
        if let Some(num) = name.strip_prefix('#') {
            let code = if let Some(hex) = num.strip_prefix('x') {
                u32::from_str_radix(hex, 16).ok()
            } else {
                num.parse().ok()
            };
            match code.and_then(char::from_u32) {
                Some(c) => out.push(c),
                None => {
                    return Err(ValidatorError::InvalidOrUnclosedEntity {
                        span: base + amp..base + semi + 1,
                    })
                }
            }
        } else {
            match entities.get(name) {
                Some(value) => out.push_str(value),
                None => {
                    return Err(ValidatorError::UndefinedEntity {
                        name,
                        span: base + amp + 1..base + semi,
                    })
                }
            }
        }
        i = semi + 1;
    }
    out.push_str(&text[i..]);
    Ok(out)
}

fn is_whitespace_char(c: char) -> bool {
    ['\x20', '\x09', '\x0d', '\x0a'].contains(&c)
}

pub(crate) fn is_whitespace_str(s: &str) -> bool {
    s.chars().all(is_whitespace_char)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_entities_handles_the_predefined_set() {
        let mut entities = HashMap::new();
        entities.insert("amp".to_string(), "&".to_string());
        entities.insert("lt".to_string(), "<".to_string());
        assert_eq!(decode_entities("a &amp; b", 0, &entities).unwrap(), "a & b");
        assert_eq!(decode_entities("&#65;&#x42;", 0, &entities).unwrap(), "AB");
        assert!(matches!(
            decode_entities("&nope;", 0, &entities),
            Err(ValidatorError::UndefinedEntity { name: "nope", .. })
        ));
        assert!(matches!(
            decode_entities("a &unclosed", 0, &entities),
            Err(ValidatorError::InvalidOrUnclosedEntity { .. })
        ));
    }

    #[test]
    fn whitespace_predicate_matches_xml_rules() {
        assert!(is_whitespace_str(" \t\r\n"));
        assert!(!is_whitespace_str(" x "));
        assert!(is_whitespace_str(""));
    }
}
