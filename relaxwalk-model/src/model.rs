//! The compiled pattern model.
//!
//! Patterns are constructed exclusively by the simplifier; after emission
//! the grammar is linked once and then shared read-only with walkers.

use crate::datatype::{BuiltinDatatype, BuiltinDatatypeValue, Datatype};
use crate::name_class::NamePattern;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct DataPattern {
    /// Datatype library URI ("" for the built-in library).
    pub library: String,
    pub datatype: BuiltinDatatype,
    pub params: Vec<(String, String)>,
    pub except: Option<Box<Pattern>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValuePattern {
    pub library: String,
    pub datatype: BuiltinDatatypeValue,
    /// The literal exactly as written in the schema.
    pub value: String,
    /// Namespace context of the literal, from the propagated `ns` attribute.
    pub ns: String,
}

impl ValuePattern {
    pub fn matches(&self, text: &str) -> bool {
        self.datatype.is_valid(text)
    }
}

/// Reference to a named definition. The target index is filled in by the
/// grammar link step.
#[derive(Debug, Clone)]
pub struct RefPattern {
    pub name: String,
    target: Cell<Option<usize>>,
}

impl RefPattern {
    pub fn new(name: &str) -> RefPattern {
        RefPattern {
            name: name.to_string(),
            target: Cell::new(None),
        }
    }
}

impl PartialEq for RefPattern {
    fn eq(&self, other: &RefPattern) -> bool {
        self.name == other.name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributePattern {
    pub name_class: NamePattern,
    pub pattern: Box<Pattern>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Empty,
    NotAllowed,
    Text,
    Data(DataPattern),
    Value(ValuePattern),
    Choice(Box<Pattern>, Box<Pattern>),
    Group(Box<Pattern>, Box<Pattern>),
    Interleave(Box<Pattern>, Box<Pattern>),
    OneOrMore(Box<Pattern>),
    List(Box<Pattern>),
    Attribute(AttributePattern),
    Ref(RefPattern),
}

impl Pattern {
    /// Whether the pattern accepts the empty event sequence, computed
    /// without constructing a walker. Must stay in agreement with
    /// `Walker::can_end` on a fresh walker.
    pub fn has_empty_pattern(&self) -> bool {
        match self {
            Pattern::Empty | Pattern::Text => true,
            // not-allowed carries no obligation
            Pattern::NotAllowed => true,
            Pattern::Data(d) => {
                d.datatype.is_valid("")
                    && !d.except.as_ref().map_or(false, |e| e.has_empty_pattern())
            }
            Pattern::Value(v) => v.matches(""),
            Pattern::Choice(a, b) => a.has_empty_pattern() || b.has_empty_pattern(),
            Pattern::Group(a, b) | Pattern::Interleave(a, b) => {
                a.has_empty_pattern() && b.has_empty_pattern()
            }
            Pattern::OneOrMore(p) | Pattern::List(p) => p.has_empty_pattern(),
            Pattern::Attribute(_) => false,
            Pattern::Ref(_) => false,
        }
    }
}

/// The single element pattern forming the body of a definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementPattern {
    pub name_class: NamePattern,
    pub pattern: Pattern,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Define {
    pub name: String,
    pub element: ElementPattern,
}

#[derive(Debug)]
pub enum LinkError {
    UnresolvedRef { name: String },
    DuplicateDefine { name: String },
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::UnresolvedRef { name } => write!(f, "{} cannot be resolved", name),
            LinkError::DuplicateDefine { name } => {
                write!(f, "{} is defined more than once", name)
            }
        }
    }
}

/// A linked grammar: one start pattern plus the definition arena.
#[derive(Debug)]
pub struct Grammar {
    start: Pattern,
    defines: Vec<Define>,
    by_name: HashMap<String, usize>,
    element_definitions: HashMap<String, Vec<usize>>,
    namespaces: BTreeSet<String>,
}

impl PartialEq for Grammar {
    fn eq(&self, other: &Grammar) -> bool {
        self.start == other.start && self.defines == other.defines
    }
}

impl Grammar {
    /// Links references to definitions, builds the recovery index and the
    /// namespace set.
    pub fn new(start: Pattern, defines: Vec<Define>) -> Result<Grammar, LinkError> {
        let mut by_name = HashMap::new();
        for (idx, d) in defines.iter().enumerate() {
            if by_name.insert(d.name.clone(), idx).is_some() {
                return Err(LinkError::DuplicateDefine {
                    name: d.name.clone(),
                });
            }
        }
        let mut namespaces = BTreeSet::new();
        let mut element_definitions: HashMap<String, Vec<usize>> = HashMap::new();
        link_pattern(&start, &by_name, &mut namespaces)?;
        for (idx, d) in defines.iter().enumerate() {
            namespaces.extend(d.element.name_class.namespaces());
            if let Some(names) = d.element.name_class.to_array() {
                for n in names {
                    element_definitions
                        .entry(n.local.clone())
                        .or_default()
                        .push(idx);
                }
            }
            link_pattern(&d.element.pattern, &by_name, &mut namespaces)?;
        }
        Ok(Grammar {
            start,
            defines,
            by_name,
            element_definitions,
            namespaces,
        })
    }

    pub fn start(&self) -> &Pattern {
        &self.start
    }

    pub fn defines(&self) -> &[Define] {
        &self.defines
    }

    pub fn define(&self, idx: usize) -> &Define {
        &self.defines[idx]
    }

    pub fn define_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Follows a linked reference. Only valid on grammars produced by
    /// [`Grammar::new`], which resolves every reference.
    pub fn resolve(&self, r: &RefPattern) -> &Define {
        let idx = r
            .target
            .get()
            .expect("reference used before the grammar was linked");
        &self.defines[idx]
    }

    /// Definitions whose element name class names the given local name
    /// exactly; used for misplaced-element recovery.
    pub fn element_candidates(&self, local: &str) -> &[usize] {
        self.element_definitions
            .get(local)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn namespaces(&self) -> &BTreeSet<String> {
        &self.namespaces
    }

    pub fn has_empty_pattern(&self) -> bool {
        self.start.has_empty_pattern()
    }
}

fn link_pattern(
    p: &Pattern,
    by_name: &HashMap<String, usize>,
    namespaces: &mut BTreeSet<String>,
) -> Result<(), LinkError> {
    match p {
        Pattern::Empty | Pattern::NotAllowed | Pattern::Text | Pattern::Value(_) => Ok(()),
        Pattern::Data(d) => match &d.except {
            Some(e) => link_pattern(e, by_name, namespaces),
            None => Ok(()),
        },
        Pattern::Choice(a, b) | Pattern::Group(a, b) | Pattern::Interleave(a, b) => {
            link_pattern(a, by_name, namespaces)?;
            link_pattern(b, by_name, namespaces)
        }
        Pattern::OneOrMore(inner) | Pattern::List(inner) => {
            link_pattern(inner, by_name, namespaces)
        }
        Pattern::Attribute(a) => {
            namespaces.extend(a.name_class.namespaces());
            link_pattern(&a.pattern, by_name, namespaces)
        }
        Pattern::Ref(r) => match by_name.get(&r.name) {
            Some(idx) => {
                r.target.set(Some(*idx));
                Ok(())
            }
            None => Err(LinkError::UnresolvedRef {
                name: r.name.clone(),
            }),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::datatype;
    use assert_matches::assert_matches;

    fn elt_define(name: &str, local: &str, pattern: Pattern) -> Define {
        Define {
            name: name.to_string(),
            element: ElementPattern {
                name_class: NamePattern::name("", local),
                pattern,
            },
        }
    }

    #[test]
    fn unresolved_ref_message_carries_the_name() {
        let err = Grammar::new(Pattern::Ref(RefPattern::new("doc")), vec![]).unwrap_err();
        assert_eq!(err.to_string(), "doc cannot be resolved");
    }

    #[test]
    fn linking_resolves_references() {
        let g = Grammar::new(
            Pattern::Ref(RefPattern::new("doc")),
            vec![elt_define("doc", "doc", Pattern::Empty)],
        )
        .unwrap();
        if let Pattern::Ref(r) = g.start() {
            assert_eq!(g.resolve(r).name, "doc");
        } else {
            panic!("start is not a ref");
        }
        assert_eq!(g.element_candidates("doc").len(), 1);
        assert!(g.element_candidates("other").is_empty());
    }

    #[test]
    fn duplicate_defines_are_rejected() {
        let err = Grammar::new(
            Pattern::Ref(RefPattern::new("doc")),
            vec![
                elt_define("doc", "doc", Pattern::Empty),
                elt_define("doc", "doc", Pattern::Text),
            ],
        )
        .unwrap_err();
        assert_matches!(err, LinkError::DuplicateDefine { .. });
    }

    #[test]
    fn empty_pattern_analysis() {
        assert!(Pattern::Empty.has_empty_pattern());
        assert!(Pattern::Text.has_empty_pattern());
        assert!(!Pattern::Ref(RefPattern::new("x")).has_empty_pattern());
        let opt = Pattern::Choice(
            Box::new(Pattern::Ref(RefPattern::new("x"))),
            Box::new(Pattern::Empty),
        );
        assert!(opt.has_empty_pattern());
        let group = Pattern::Group(
            Box::new(Pattern::Text),
            Box::new(Pattern::Ref(RefPattern::new("x"))),
        );
        assert!(!group.has_empty_pattern());
        let token_value = Pattern::Value(ValuePattern {
            library: String::new(),
            datatype: datatype::datatype_value("", "token", "").unwrap(),
            value: String::new(),
            ns: String::new(),
        });
        assert!(token_value.has_empty_pattern());
        let named_value = Pattern::Value(ValuePattern {
            library: String::new(),
            datatype: datatype::datatype_value("", "token", "x").unwrap(),
            value: "x".to_string(),
            ns: String::new(),
        });
        assert!(!named_value.has_empty_pattern());
    }

    #[test]
    fn namespace_set_spans_element_and_attribute_name_classes() {
        let g = Grammar::new(
            Pattern::Ref(RefPattern::new("doc")),
            vec![Define {
                name: "doc".to_string(),
                element: ElementPattern {
                    name_class: NamePattern::name("urn:doc", "doc"),
                    pattern: Pattern::Attribute(AttributePattern {
                        name_class: NamePattern::name("urn:attr", "a"),
                        pattern: Box::new(Pattern::Text),
                    }),
                },
            }],
        )
        .unwrap();
        assert!(g.namespaces().contains("urn:doc"));
        assert!(g.namespaces().contains("urn:attr"));
    }
}
