//! Name classes and the set algebra over them.
//!
//! A name pattern is a predicate over expanded names `(namespace uri, local
//! name)`. Besides the membership test the simplifier and the walker need
//! intersection and subtraction, so those are implemented as total functions
//! over the sum type. All operations are pure; equality is structural.

use std::collections::BTreeSet;

/// Marker recorded by [`NamePattern::namespaces`] when a pattern matches
/// names in any namespace.
pub const ANY_NAMESPACE: &str = "*";
/// Marker recorded by [`NamePattern::namespaces`] when a pattern carries an
/// exception.
pub const EXCEPT_MARKER: &str = "::except";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub ns: String,
    pub local: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NsName {
    pub ns: String,
    pub except: Option<Box<NamePattern>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnyName {
    pub except: Option<Box<NamePattern>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NamePattern {
    Name(Name),
    NameChoice(Box<NamePattern>, Box<NamePattern>),
    NsName(NsName),
    AnyName(AnyName),
}

impl NamePattern {
    pub fn name(ns: &str, local: &str) -> NamePattern {
        NamePattern::Name(Name {
            ns: ns.to_string(),
            local: local.to_string(),
        })
    }

    pub fn ns_name(ns: &str, except: Option<NamePattern>) -> NamePattern {
        NamePattern::NsName(NsName {
            ns: ns.to_string(),
            except: except.map(Box::new),
        })
    }

    pub fn any_name(except: Option<NamePattern>) -> NamePattern {
        NamePattern::AnyName(AnyName {
            except: except.map(Box::new),
        })
    }

    pub fn choice(a: NamePattern, b: NamePattern) -> NamePattern {
        NamePattern::NameChoice(Box::new(a), Box::new(b))
    }

    pub fn matches(&self, ns: &str, local: &str) -> bool {
        match self {
            NamePattern::Name(n) => n.ns == ns && n.local == local,
            NamePattern::NameChoice(a, b) => a.matches(ns, local) || b.matches(ns, local),
            NamePattern::NsName(n) => {
                n.ns == ns && !n.except.as_ref().map_or(false, |e| e.matches(ns, local))
            }
            NamePattern::AnyName(n) => {
                !n.except.as_ref().map_or(false, |e| e.matches(ns, local))
            }
        }
    }

    /// True when the name matches and the match is due to a wildcard
    /// (`NsName` or `AnyName`) rather than an exact `Name`.
    pub fn wildcard_match(&self, ns: &str, local: &str) -> bool {
        match self {
            NamePattern::Name(_) => false,
            NamePattern::NameChoice(a, b) => {
                a.wildcard_match(ns, local) || b.wildcard_match(ns, local)
            }
            NamePattern::NsName(_) | NamePattern::AnyName(_) => self.matches(ns, local),
        }
    }

    /// Short-circuiting test for a non-empty intersection.
    pub fn intersects(&self, other: &NamePattern) -> bool {
        match (self, other) {
            (NamePattern::NameChoice(a, b), _) => a.intersects(other) || b.intersects(other),
            (_, NamePattern::NameChoice(a, b)) => self.intersects(a) || self.intersects(b),
            (NamePattern::Name(n), _) => other.matches(&n.ns, &n.local),
            (_, NamePattern::Name(n)) => self.matches(&n.ns, &n.local),
            (NamePattern::NsName(a), NamePattern::NsName(b)) if a.ns != b.ns => false,
            _ => self
                .intersection(other)
                .map_or(false, |p| !p.is_vacuous()),
        }
    }

    /// The name pattern matching exactly the names both operands match, or
    /// `None` when that set is empty.
    pub fn intersection(&self, other: &NamePattern) -> Option<NamePattern> {
        match (self, other) {
            (NamePattern::NameChoice(a, b), _) => {
                union_opt(a.intersection(other), b.intersection(other))
            }
            (_, NamePattern::NameChoice(a, b)) => {
                union_opt(self.intersection(a), self.intersection(b))
            }
            (NamePattern::Name(n), _) => {
                if other.matches(&n.ns, &n.local) {
                    Some(self.clone())
                } else {
                    None
                }
            }
            (_, NamePattern::Name(n)) => {
                if self.matches(&n.ns, &n.local) {
                    Some(other.clone())
                } else {
                    None
                }
            }
            (NamePattern::NsName(a), NamePattern::NsName(b)) => a.intersect_ns_name(b),
            (NamePattern::AnyName(a), _) => a.intersect(other),
            (NamePattern::NsName(_), NamePattern::AnyName(b)) => b.intersect(self),
        }
    }

    /// The finite list of names this pattern matches, or `None` when the
    /// match set is infinite.
    pub fn to_array(&self) -> Option<Vec<&Name>> {
        match self {
            NamePattern::Name(n) => Some(vec![n]),
            NamePattern::NameChoice(a, b) => {
                let mut names = a.to_array()?;
                names.extend(b.to_array()?);
                Some(names)
            }
            NamePattern::NsName(_) | NamePattern::AnyName(_) => None,
        }
    }

    /// All namespaces this pattern mentions. `"*"` stands for "any
    /// namespace" and `"::except"` records that a negation is present.
    pub fn namespaces(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.record_namespaces(&mut out);
        out
    }

    fn record_namespaces(&self, out: &mut BTreeSet<String>) {
        match self {
            NamePattern::Name(n) => {
                out.insert(n.ns.clone());
            }
            NamePattern::NameChoice(a, b) => {
                a.record_namespaces(out);
                b.record_namespaces(out);
            }
            NamePattern::NsName(n) => {
                out.insert(n.ns.clone());
                if let Some(e) = &n.except {
                    out.insert(EXCEPT_MARKER.to_string());
                    e.record_namespaces(out);
                }
            }
            NamePattern::AnyName(n) => {
                out.insert(ANY_NAMESPACE.to_string());
                if let Some(e) = &n.except {
                    out.insert(EXCEPT_MARKER.to_string());
                    e.record_namespaces(out);
                }
            }
        }
    }

    /// True when the pattern provably matches no name at all.
    fn is_vacuous(&self) -> bool {
        match self {
            NamePattern::Name(_) => false,
            NamePattern::NameChoice(a, b) => a.is_vacuous() && b.is_vacuous(),
            NamePattern::NsName(n) => n
                .except
                .as_ref()
                .map_or(false, |e| covers_namespace(e, &n.ns)),
            NamePattern::AnyName(_) => false,
        }
    }
}

/// Does `except` exclude every name of namespace `ns`?
fn covers_namespace(except: &NamePattern, ns: &str) -> bool {
    match except {
        NamePattern::NsName(n) => n.ns == ns && n.except.is_none(),
        NamePattern::AnyName(n) => n.except.is_none(),
        NamePattern::NameChoice(a, b) => covers_namespace(a, ns) || covers_namespace(b, ns),
        NamePattern::Name(_) => false,
    }
}

impl From<NsName> for NamePattern {
    fn from(n: NsName) -> NamePattern {
        NamePattern::NsName(n)
    }
}

impl From<Name> for NamePattern {
    fn from(n: Name) -> NamePattern {
        NamePattern::Name(n)
    }
}

impl NsName {
    fn intersect_ns_name(&self, other: &NsName) -> Option<NamePattern> {
        if self.ns != other.ns {
            return None;
        }
        Some(
            NsName {
                ns: self.ns.clone(),
                except: except_union(&self.except, &other.except),
            }
            .into(),
        )
    }

    /// Removes the names of `other` from this wildcard. Defined only for
    /// `Name`, `NsName`, and `NameChoice` operands, the shapes RELAX NG
    /// permits inside an `except` clause.
    pub fn subtract(&self, other: &NamePattern) -> Option<NamePattern> {
        match other {
            NamePattern::Name(n) => {
                if n.ns != self.ns {
                    Some(self.clone().into())
                } else {
                    let single = NamePattern::Name(n.clone());
                    Some(
                        NsName {
                            ns: self.ns.clone(),
                            except: except_union(&self.except, &Some(Box::new(single))),
                        }
                        .into(),
                    )
                }
            }
            NamePattern::NsName(o) => {
                if o.ns != self.ns {
                    return Some(self.clone().into());
                }
                match &o.except {
                    // the other wildcard absorbs this one entirely
                    None => None,
                    // names the other excludes survive, minus our own
                    // exclusions
                    Some(e) => subtract_names(e, &self.except),
                }
            }
            NamePattern::NameChoice(a, b) => match self.subtract(a)? {
                NamePattern::NsName(rest) => rest.subtract(b),
                finite => subtract_names(&finite, &Some(Box::new((**b).clone()))),
            },
            NamePattern::AnyName(_) => {
                unreachable!("anyName cannot appear inside an except clause")
            }
        }
    }
}

impl AnyName {
    fn intersect(&self, other: &NamePattern) -> Option<NamePattern> {
        let except = match &self.except {
            None => return Some(other.clone()),
            Some(e) => e,
        };
        match other {
            NamePattern::NsName(o) => match except.intersection(other) {
                None => Some(other.clone()),
                Some(cut) => o.subtract(&cut),
            },
            NamePattern::AnyName(o) => Some(NamePattern::AnyName(AnyName {
                except: except_union(&self.except, &o.except),
            })),
            // Name and NameChoice operands are normalized away by
            // NamePattern::intersection before reaching here
            NamePattern::Name(_) | NamePattern::NameChoice(_, _) => {
                unreachable!("handled by the caller")
            }
        }
    }
}

fn union_opt(a: Option<NamePattern>, b: Option<NamePattern>) -> Option<NamePattern> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(NamePattern::choice(x, y)),
    }
}

/// Union of two optional exception patterns. When both sides are finite
/// name lists, duplicates (keyed `{ns}local`) are removed and a fresh
/// choice tree is built.
fn except_union(
    a: &Option<Box<NamePattern>>,
    b: &Option<Box<NamePattern>>,
) -> Option<Box<NamePattern>> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x.clone()),
        (None, Some(y)) => Some(y.clone()),
        (Some(x), Some(y)) => {
            if let (Some(xs), Some(ys)) = (x.to_array(), y.to_array()) {
                let mut seen = BTreeSet::new();
                let mut merged = Vec::new();
                for n in xs.into_iter().chain(ys) {
                    if seen.insert(format!("{{{}}}{}", n.ns, n.local)) {
                        merged.push(n.clone());
                    }
                }
                Some(Box::new(choice_of_names(merged)))
            } else {
                Some(Box::new(NamePattern::choice((**x).clone(), (**y).clone())))
            }
        }
    }
}

fn choice_of_names(names: Vec<Name>) -> NamePattern {
    let mut iter = names.into_iter();
    let first = NamePattern::Name(iter.next().expect("non-empty name list"));
    iter.fold(first, |acc, n| {
        NamePattern::choice(acc, NamePattern::Name(n))
    })
}

/// Keeps the names of the finite pattern `from` that `minus` does not
/// match.
fn subtract_names(
    from: &NamePattern,
    minus: &Option<Box<NamePattern>>,
) -> Option<NamePattern> {
    let minus = match minus {
        None => return Some(from.clone()),
        Some(m) => m,
    };
    let names = match from.to_array() {
        Some(names) => names,
        // not a finite list; nothing smarter to do than keep it whole
        None => return Some(from.clone()),
    };
    let kept: Vec<Name> = names
        .into_iter()
        .filter(|n| !minus.matches(&n.ns, &n.local))
        .cloned()
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(choice_of_names(kept))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn n(ns: &str, local: &str) -> NamePattern {
        NamePattern::name(ns, local)
    }

    fn sample_patterns() -> Vec<NamePattern> {
        vec![
            n("urn:a", "x"),
            n("urn:b", "x"),
            NamePattern::choice(n("urn:a", "x"), n("urn:a", "y")),
            NamePattern::ns_name("urn:a", None),
            NamePattern::ns_name("urn:a", Some(n("urn:a", "x"))),
            NamePattern::ns_name("urn:b", Some(NamePattern::choice(
                n("urn:b", "x"),
                n("urn:b", "y"),
            ))),
            NamePattern::any_name(None),
            NamePattern::any_name(Some(n("urn:a", "x"))),
            NamePattern::any_name(Some(NamePattern::ns_name("urn:b", None))),
        ]
    }

    fn sample_names() -> Vec<(&'static str, &'static str)> {
        vec![
            ("urn:a", "x"),
            ("urn:a", "y"),
            ("urn:a", "z"),
            ("urn:b", "x"),
            ("urn:b", "y"),
            ("urn:c", "q"),
            ("", "plain"),
        ]
    }

    #[test]
    fn intersection_agrees_with_match() {
        for p in sample_patterns() {
            for q in sample_patterns() {
                let both = p.intersection(&q);
                for (ns, local) in sample_names() {
                    let expected = p.matches(ns, local) && q.matches(ns, local);
                    let got = both.as_ref().map_or(false, |i| i.matches(ns, local));
                    assert_eq!(
                        got, expected,
                        "intersection of {:?} and {:?} disagrees on ({}, {})",
                        p, q, ns, local
                    );
                }
            }
        }
    }

    #[test]
    fn intersects_agrees_with_pointwise_match() {
        for p in sample_patterns() {
            for q in sample_patterns() {
                let pointwise = sample_names()
                    .iter()
                    .any(|(ns, local)| p.matches(ns, local) && q.matches(ns, local));
                if pointwise {
                    assert!(p.intersects(&q), "{:?} should intersect {:?}", p, q);
                }
                if !p.intersects(&q) {
                    assert!(!pointwise, "{:?} reports no intersection with {:?}", p, q);
                }
            }
        }
    }

    #[test]
    fn match_and_intersects_agree_on_single_names() {
        for p in sample_patterns() {
            for (ns, local) in sample_names() {
                assert_eq!(p.matches(ns, local), p.intersects(&n(ns, local)));
            }
        }
    }

    #[test]
    fn ns_name_subtract_grows_the_exception() {
        let whole = NsName {
            ns: "urn:a".to_string(),
            except: None,
        };
        let cut = whole.subtract(&n("urn:a", "x")).unwrap();
        assert!(!cut.matches("urn:a", "x"));
        assert!(cut.matches("urn:a", "y"));
        // a foreign-namespace operand removes nothing
        let same = whole.subtract(&n("urn:b", "x")).unwrap();
        assert!(same.matches("urn:a", "x"));
    }

    #[test]
    fn ns_name_subtract_is_inverse_of_choice_union() {
        // (nsName \ {x, y}) plus {x, y} matches exactly what nsName matches
        let whole = NsName {
            ns: "urn:a".to_string(),
            except: None,
        };
        let removed = NamePattern::choice(n("urn:a", "x"), n("urn:a", "y"));
        let cut = whole.subtract(&removed).unwrap();
        let rejoined = NamePattern::choice(cut, removed);
        for (ns, local) in sample_names() {
            assert_eq!(
                rejoined.matches(ns, local),
                NamePattern::NsName(whole.clone()).matches(ns, local),
                "rejoined pattern disagrees on ({}, {})",
                ns,
                local
            );
        }
    }

    #[test]
    fn subtracting_an_absorbing_wildcard_leaves_nothing() {
        let whole = NsName {
            ns: "urn:a".to_string(),
            except: None,
        };
        assert_eq!(
            whole.subtract(&NamePattern::ns_name("urn:a", None)),
            None
        );
        // when the other wildcard has an exception, exactly those names
        // survive
        let survived = whole
            .subtract(&NamePattern::ns_name("urn:a", Some(n("urn:a", "x"))))
            .unwrap();
        assert!(survived.matches("urn:a", "x"));
        assert!(!survived.matches("urn:a", "y"));
    }

    #[test]
    fn wildcard_match_distinguishes_exact_names() {
        let p = NamePattern::choice(n("urn:a", "x"), NamePattern::ns_name("urn:b", None));
        assert!(p.matches("urn:a", "x"));
        assert!(!p.wildcard_match("urn:a", "x"));
        assert!(p.wildcard_match("urn:b", "anything"));
    }

    #[test]
    fn to_array_is_none_for_wildcards() {
        assert_eq!(
            NamePattern::choice(n("a", "b"), n("c", "d"))
                .to_array()
                .map(|v| v.len()),
            Some(2)
        );
        assert_eq!(NamePattern::ns_name("a", None).to_array(), None);
        assert_eq!(
            NamePattern::choice(n("a", "b"), NamePattern::any_name(None)).to_array(),
            None
        );
    }

    #[test]
    fn namespaces_use_the_markers() {
        let p = NamePattern::choice(
            NamePattern::any_name(Some(n("urn:a", "x"))),
            NamePattern::ns_name("urn:b", None),
        );
        let ns = p.namespaces();
        assert!(ns.contains(ANY_NAMESPACE));
        assert!(ns.contains(EXCEPT_MARKER));
        assert!(ns.contains("urn:a"));
        assert!(ns.contains("urn:b"));
    }

    #[test]
    fn merged_exceptions_drop_duplicates() {
        let a = NamePattern::ns_name(
            "urn:a",
            Some(NamePattern::choice(n("urn:a", "x"), n("urn:a", "y"))),
        );
        let b = NamePattern::ns_name(
            "urn:a",
            Some(NamePattern::choice(n("urn:a", "y"), n("urn:a", "z"))),
        );
        let merged = a.intersection(&b).unwrap();
        if let NamePattern::NsName(NsName {
            except: Some(e), ..
        }) = &merged
        {
            let names = e.to_array().unwrap();
            assert_eq!(names.len(), 3);
        } else {
            panic!("expected an NsName intersection, got {:?}", merged);
        }
        assert!(!merged.matches("urn:a", "x"));
        assert!(!merged.matches("urn:a", "y"));
        assert!(!merged.matches("urn:a", "z"));
        assert!(merged.matches("urn:a", "w"));
    }
}
