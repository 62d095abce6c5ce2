//! Events, fire results, validation errors and name resolution.

use relaxwalk_model::model::Define;
use relaxwalk_model::name_class::NamePattern;
use std::collections::HashMap;
use std::fmt;

/// Primitive events delivered to pattern walkers. The compound events of
/// the public vocabulary are decomposed by the grammar walker before they
/// reach individual walkers; `endTag` is handled at the frame level.
#[derive(Debug, Clone, Copy)]
pub enum WalkEvent<'a> {
    EnterStartTag { ns: &'a str, local: &'a str },
    AttributeName { ns: &'a str, local: &'a str },
    AttributeValue { value: &'a str },
    LeaveStartTag,
    Text { text: &'a str },
}

/// An attribute of a `startTagAndAttributes` event.
#[derive(Debug, Clone, Copy)]
pub struct AttributeSpec<'a> {
    pub ns: &'a str,
    pub local: &'a str,
    pub value: &'a str,
}

/// The full event vocabulary accepted by the grammar walker.
#[derive(Debug, Clone)]
pub enum Event<'a> {
    EnterStartTag {
        ns: &'a str,
        local: &'a str,
    },
    AttributeName {
        ns: &'a str,
        local: &'a str,
    },
    AttributeValue {
        value: &'a str,
    },
    AttributeNameAndValue {
        ns: &'a str,
        local: &'a str,
        value: &'a str,
    },
    LeaveStartTag,
    StartTagAndAttributes {
        ns: &'a str,
        local: &'a str,
        attributes: Vec<AttributeSpec<'a>>,
    },
    Text {
        text: &'a str,
    },
    EndTag {
        ns: &'a str,
        local: &'a str,
    },
}

/// Outcome of firing one event at one walker.
#[derive(Debug)]
pub enum Fire<'g> {
    /// The event was consumed. A non-empty `refs` list asks the grammar
    /// walker to descend into the referenced element definitions.
    Matched { refs: Vec<&'g Define> },
    Rejected { errors: Vec<ValidationError> },
}

impl<'g> Fire<'g> {
    pub fn ok() -> Fire<'g> {
        Fire::Matched { refs: Vec::new() }
    }

    pub fn rejected() -> Fire<'g> {
        Fire::Rejected { errors: Vec::new() }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Fire::Matched { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    ElementName { msg: String, name: String },
    AttributeName { msg: String, name: String },
    AttributeValue { msg: String, value: String },
    Choice {
        left: Vec<ValidationError>,
        right: Vec<ValidationError>,
    },
    Generic { msg: String },
}

impl ValidationError {
    pub fn element_name(msg: &str, name: String) -> ValidationError {
        ValidationError::ElementName {
            msg: msg.to_string(),
            name,
        }
    }

    pub fn attribute_name(msg: &str, name: String) -> ValidationError {
        ValidationError::AttributeName {
            msg: msg.to_string(),
            name,
        }
    }

    pub fn generic(msg: &str) -> ValidationError {
        ValidationError::Generic {
            msg: msg.to_string(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ElementName { msg, name }
            | ValidationError::AttributeName { msg, name } => write!(f, "{}: {}", msg, name),
            ValidationError::AttributeValue { msg, value } => {
                write!(f, "{}: {:?}", msg, value)
            }
            ValidationError::Choice { left, right } => {
                write!(f, "must satisfy one of: ")?;
                join(f, left)?;
                write!(f, "; or: ")?;
                join(f, right)
            }
            ValidationError::Generic { msg } => write!(f, "{}", msg),
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, errors: &[ValidationError]) -> fmt::Result {
    for (i, e) in errors.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", e)?;
    }
    Ok(())
}

/// An event a walker would accept next, for diagnostics and authoring
/// tools.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expected {
    EnterStartTag(NamePattern),
    AttributeName(NamePattern),
    AttributeValue,
    Text,
}

/// Compact rendering of a name class for error messages.
pub fn describe_name_class(nc: &NamePattern) -> String {
    let mut desc = String::new();
    describe_into(nc, &mut desc);
    desc
}

fn describe_into(nc: &NamePattern, desc: &mut String) {
    match nc {
        NamePattern::Name(n) => {
            if !n.ns.is_empty() {
                desc.push('{');
                desc.push_str(&n.ns);
                desc.push('}');
            }
            desc.push_str(&n.local);
        }
        NamePattern::NsName(n) => {
            desc.push_str(&n.ns);
            desc.push_str(":*");
            if let Some(e) = &n.except {
                desc.push('-');
                describe_into(e, desc);
            }
        }
        NamePattern::AnyName(n) => {
            desc.push('*');
            if let Some(e) = &n.except {
                desc.push('-');
                describe_into(e, desc);
            }
        }
        NamePattern::NameChoice(a, b) => {
            describe_into(a, desc);
            desc.push('|');
            describe_into(b, desc);
        }
    }
}

pub fn expanded_name(ns: &str, local: &str) -> String {
    if ns.is_empty() {
        local.to_string()
    } else {
        format!("{{{}}}{}", ns, local)
    }
}

/// Pluggable prefix-to-URI resolution with scoped contexts.
pub trait NameResolver: Clone {
    fn enter_context(&mut self);
    fn leave_context(&mut self);
    fn define_prefix(&mut self, prefix: &str, uri: &str);
    /// Resolves `prefix:local` (or a bare local name) to an expanded name.
    /// Attributes without a prefix live in no namespace.
    fn resolve_name(&self, qname: &str, is_attribute: bool) -> Option<(String, String)>;
}

/// The XML 1.0 rules, with the built-in `xml` and `xmlns` bindings.
#[derive(Debug, Clone)]
pub struct DefaultNameResolver {
    scopes: Vec<HashMap<String, String>>,
}

impl Default for DefaultNameResolver {
    fn default() -> Self {
        let mut root = HashMap::new();
        root.insert(
            "xml".to_string(),
            "http://www.w3.org/XML/1998/namespace".to_string(),
        );
        root.insert(
            "xmlns".to_string(),
            "http://www.w3.org/2000/xmlns/".to_string(),
        );
        DefaultNameResolver {
            scopes: vec![root],
        }
    }
}

impl NameResolver for DefaultNameResolver {
    fn enter_context(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn leave_context(&mut self) {
        if self.scopes.len() == 1 {
            panic!("cannot leave the root namespace context");
        }
        self.scopes.pop();
    }

    fn define_prefix(&mut self, prefix: &str, uri: &str) {
        self.scopes
            .last_mut()
            .expect("at least the root context exists")
            .insert(prefix.to_string(), uri.to_string());
    }

    fn resolve_name(&self, qname: &str, is_attribute: bool) -> Option<(String, String)> {
        match qname.find(':') {
            Some(colon) => {
                let prefix = &qname[..colon];
                let local = &qname[colon + 1..];
                let uri = self.lookup(prefix)?;
                Some((uri.to_string(), local.to_string()))
            }
            None => {
                if is_attribute {
                    Some((String::new(), qname.to_string()))
                } else {
                    let uri = self.lookup("").unwrap_or("");
                    Some((uri.to_string(), qname.to_string()))
                }
            }
        }
    }
}

impl DefaultNameResolver {
    fn lookup(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(prefix))
            .map(String::as_str)
    }
}
