//! Per-pattern walkers.
//!
//! A walker is the incremental matching state for one pattern. Walkers form
//! a tree mirroring the pattern tree; each variant implements the same five
//! operations (fire_event, end, can_end, can_end_attribute, possible) by
//! dispatching to its children. Firing must not mutate a walker that ends
//! up rejecting the event: the grammar walker keeps rejected walkers alive
//! for error recovery.

use crate::event::{describe_name_class, Expected, Fire, ValidationError, WalkEvent};
use crate::is_whitespace_str;
use relaxwalk_model::datatype::Datatype;
use relaxwalk_model::model::{
    AttributePattern, DataPattern, Define, Grammar, Pattern, ValuePattern,
};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub enum Walker<'g> {
    Empty,
    /// Constant behavior, so the unit variant doubles as the shared
    /// singleton: cloning it is the identity.
    NotAllowed,
    Text,
    Value(ValueWalker<'g>),
    Data(DataWalker<'g>),
    Attribute(AttributeWalker<'g>),
    Ref(RefWalker<'g>),
    Choice(ChoiceWalker<'g>),
    Group(GroupWalker<'g>),
    Interleave(InterleaveWalker<'g>),
    OneOrMore(OneOrMoreWalker<'g>),
    List(ListWalker<'g>),
}

#[derive(Debug, Clone)]
pub struct ValueWalker<'g> {
    pattern: &'g ValuePattern,
    matched: bool,
}

#[derive(Debug, Clone)]
pub struct DataWalker<'g> {
    grammar: &'g Grammar,
    pattern: &'g DataPattern,
    matched: bool,
}

#[derive(Debug, Clone)]
pub struct AttributeWalker<'g> {
    grammar: &'g Grammar,
    pattern: &'g AttributePattern,
    seen_name: bool,
    satisfied: bool,
}

#[derive(Debug, Clone)]
pub struct RefWalker<'g> {
    element: &'g Define,
    spent: bool,
}

#[derive(Debug, Clone)]
pub struct ChoiceWalker<'g> {
    a: Option<Box<Walker<'g>>>,
    b: Option<Box<Walker<'g>>>,
}

#[derive(Debug, Clone)]
pub struct GroupWalker<'g> {
    a: Box<Walker<'g>>,
    b: Box<Walker<'g>>,
    ended_a: bool,
}

#[derive(Debug, Clone)]
pub struct InterleaveWalker<'g> {
    a: Box<Walker<'g>>,
    b: Box<Walker<'g>>,
}

#[derive(Debug, Clone)]
pub struct OneOrMoreWalker<'g> {
    grammar: &'g Grammar,
    pattern: &'g Pattern,
    current: Box<Walker<'g>>,
}

#[derive(Debug, Clone)]
pub struct ListWalker<'g> {
    inner: Box<Walker<'g>>,
}

impl<'g> Walker<'g> {
    pub fn new(grammar: &'g Grammar, pattern: &'g Pattern) -> Walker<'g> {
        match pattern {
            Pattern::Empty => Walker::Empty,
            Pattern::NotAllowed => Walker::NotAllowed,
            Pattern::Text => Walker::Text,
            Pattern::Value(v) => Walker::Value(ValueWalker {
                pattern: v,
                matched: false,
            }),
            Pattern::Data(d) => Walker::Data(DataWalker {
                grammar,
                pattern: d,
                matched: false,
            }),
            Pattern::Attribute(a) => Walker::Attribute(AttributeWalker {
                grammar,
                pattern: a,
                seen_name: false,
                satisfied: false,
            }),
            Pattern::Ref(r) => Walker::Ref(RefWalker {
                element: grammar.resolve(r),
                spent: false,
            }),
            Pattern::Choice(a, b) => Walker::Choice(ChoiceWalker {
                a: Some(Box::new(Walker::new(grammar, a))),
                b: Some(Box::new(Walker::new(grammar, b))),
            }),
            Pattern::Group(a, b) => Walker::Group(GroupWalker {
                a: Box::new(Walker::new(grammar, a)),
                b: Box::new(Walker::new(grammar, b)),
                ended_a: false,
            }),
            Pattern::Interleave(a, b) => Walker::Interleave(InterleaveWalker {
                a: Box::new(Walker::new(grammar, a)),
                b: Box::new(Walker::new(grammar, b)),
            }),
            Pattern::OneOrMore(p) => Walker::OneOrMore(OneOrMoreWalker {
                grammar,
                pattern: p,
                current: Box::new(Walker::new(grammar, p)),
            }),
            Pattern::List(p) => Walker::List(ListWalker {
                inner: Box::new(Walker::new(grammar, p)),
            }),
        }
    }

    pub fn fire_event(&mut self, ev: WalkEvent) -> Fire<'g> {
        match self {
            Walker::Empty => match ev {
                WalkEvent::Text { text } if is_whitespace_str(text) => Fire::ok(),
                WalkEvent::LeaveStartTag => Fire::ok(),
                _ => Fire::rejected(),
            },
            Walker::NotAllowed => Fire::rejected(),
            Walker::Text => match ev {
                WalkEvent::Text { .. } | WalkEvent::LeaveStartTag => Fire::ok(),
                _ => Fire::rejected(),
            },
            Walker::Value(w) => w.fire_event(ev),
            Walker::Data(w) => w.fire_event(ev),
            Walker::Attribute(w) => w.fire_event(ev),
            Walker::Ref(w) => w.fire_event(ev),
            Walker::Choice(w) => w.fire_event(ev),
            Walker::Group(w) => w.fire_event(ev),
            Walker::Interleave(w) => w.fire_event(ev),
            Walker::OneOrMore(w) => w.fire_event(ev),
            Walker::List(w) => w.fire_event(ev),
        }
    }

    /// May this walker stop receiving events now, with its pattern
    /// satisfied?
    pub fn can_end(&self) -> bool {
        match self {
            Walker::Empty | Walker::NotAllowed | Walker::Text => true,
            Walker::Value(w) => w.matched || w.pattern.matches(""),
            Walker::Data(w) => w.matched || data_accepts_empty(w.pattern),
            Walker::Attribute(w) => w.satisfied,
            Walker::Ref(w) => w.spent,
            Walker::Choice(w) => {
                w.a.as_ref().map_or(false, |a| a.can_end())
                    || w.b.as_ref().map_or(false, |b| b.can_end())
            }
            Walker::Group(w) => w.a.can_end() && w.b.can_end(),
            Walker::Interleave(w) => w.a.can_end() && w.b.can_end(),
            Walker::OneOrMore(w) => w.current.can_end(),
            Walker::List(w) => w.inner.can_end(),
        }
    }

    /// Like can_end, restricted to the attribute phase.
    pub fn can_end_attribute(&self) -> bool {
        match self {
            Walker::Attribute(w) => w.satisfied,
            Walker::Choice(w) => {
                w.a.as_ref().map_or(false, |a| a.can_end_attribute())
                    || w.b.as_ref().map_or(false, |b| b.can_end_attribute())
            }
            Walker::Group(w) => w.a.can_end_attribute() && w.b.can_end_attribute(),
            Walker::Interleave(w) => w.a.can_end_attribute() && w.b.can_end_attribute(),
            Walker::OneOrMore(w) => w.current.can_end_attribute(),
            Walker::List(w) => w.inner.can_end_attribute(),
            _ => true,
        }
    }

    /// Asserts that no more events arrive at this level. Returns the
    /// diagnostics explaining an unsatisfied pattern, empty when clean.
    pub fn end(&mut self, attribute: bool) -> Vec<ValidationError> {
        match self {
            Walker::Empty | Walker::NotAllowed | Walker::Text => Vec::new(),
            Walker::Value(w) => {
                if w.matched || w.pattern.matches("") {
                    Vec::new()
                } else {
                    vec![ValidationError::Generic {
                        msg: format!("expected value {:?}", w.pattern.value),
                    }]
                }
            }
            Walker::Data(w) => {
                if w.matched || data_accepts_empty(w.pattern) {
                    Vec::new()
                } else {
                    vec![ValidationError::generic("expected character data")]
                }
            }
            Walker::Attribute(w) => {
                if w.satisfied {
                    Vec::new()
                } else {
                    vec![ValidationError::attribute_name(
                        "required attribute",
                        describe_name_class(&w.pattern.name_class),
                    )]
                }
            }
            Walker::Ref(w) => {
                if w.spent {
                    Vec::new()
                } else {
                    vec![ValidationError::element_name(
                        "tag required",
                        describe_name_class(&w.element.element.name_class),
                    )]
                }
            }
            Walker::Choice(w) => {
                let mut clean = false;
                let mut left = Vec::new();
                let mut right = Vec::new();
                if let Some(a) = &mut w.a {
                    left = a.end(attribute);
                    clean |= left.is_empty();
                }
                if let Some(b) = &mut w.b {
                    right = b.end(attribute);
                    clean |= right.is_empty();
                }
                if clean {
                    Vec::new()
                } else {
                    choice_errors(left, right)
                }
            }
            Walker::Group(w) => {
                let mut errors = if w.ended_a && !attribute {
                    Vec::new()
                } else {
                    w.a.end(attribute)
                };
                errors.extend(w.b.end(attribute));
                errors
            }
            Walker::Interleave(w) => {
                let mut errors = w.a.end(attribute);
                errors.extend(w.b.end(attribute));
                errors
            }
            Walker::OneOrMore(w) => w.current.end(attribute),
            Walker::List(w) => w.inner.end(attribute),
        }
    }

    /// The set of events fire_event would accept next.
    pub fn possible(&self) -> HashSet<Expected> {
        let mut out = HashSet::new();
        self.collect_possible(&mut out);
        out
    }

    pub fn possible_attributes(&self) -> HashSet<Expected> {
        self.possible()
            .into_iter()
            .filter(|e| matches!(e, Expected::AttributeName(_) | Expected::AttributeValue))
            .collect()
    }

    fn collect_possible(&self, out: &mut HashSet<Expected>) {
        match self {
            Walker::Empty | Walker::NotAllowed => {}
            Walker::Text => {
                out.insert(Expected::Text);
            }
            Walker::Value(w) => {
                if !w.matched {
                    out.insert(Expected::Text);
                }
            }
            Walker::Data(w) => {
                if !w.matched {
                    out.insert(Expected::Text);
                }
            }
            Walker::Attribute(w) => {
                if !w.seen_name {
                    out.insert(Expected::AttributeName(w.pattern.name_class.clone()));
                } else if !w.satisfied {
                    out.insert(Expected::AttributeValue);
                }
            }
            Walker::Ref(w) => {
                if !w.spent {
                    out.insert(Expected::EnterStartTag(
                        w.element.element.name_class.clone(),
                    ));
                }
            }
            Walker::Choice(w) => {
                if let Some(a) = &w.a {
                    a.collect_possible(out);
                }
                if let Some(b) = &w.b {
                    b.collect_possible(out);
                }
            }
            Walker::Group(w) => {
                w.a.collect_possible(out);
                if w.a.can_end() {
                    w.b.collect_possible(out);
                } else {
                    out.extend(w.b.possible_attributes());
                }
            }
            Walker::Interleave(w) => {
                w.a.collect_possible(out);
                w.b.collect_possible(out);
            }
            Walker::OneOrMore(w) => {
                w.current.collect_possible(out);
                if w.current.can_end() {
                    Walker::new(w.grammar, w.pattern).collect_possible(out);
                }
            }
            Walker::List(w) => {
                if !w.inner.can_end() || !w.inner.possible().is_empty() {
                    out.insert(Expected::Text);
                }
            }
        }
    }
}

fn data_accepts_empty(pattern: &DataPattern) -> bool {
    pattern.datatype.is_valid("")
        && !pattern
            .except
            .as_ref()
            .map_or(false, |e| e.has_empty_pattern())
}

fn choice_errors(
    left: Vec<ValidationError>,
    right: Vec<ValidationError>,
) -> Vec<ValidationError> {
    match (left.is_empty(), right.is_empty()) {
        (true, true) => Vec::new(),
        (false, true) => left,
        (true, false) => right,
        (false, false) => vec![ValidationError::Choice { left, right }],
    }
}

impl<'g> ValueWalker<'g> {
    fn fire_event(&mut self, ev: WalkEvent) -> Fire<'g> {
        match ev {
            WalkEvent::Text { text } => {
                if !self.matched && self.pattern.matches(text) {
                    self.matched = true;
                    Fire::ok()
                } else {
                    Fire::rejected()
                }
            }
            WalkEvent::LeaveStartTag => Fire::ok(),
            _ => Fire::rejected(),
        }
    }
}

impl<'g> DataWalker<'g> {
    fn fire_event(&mut self, ev: WalkEvent) -> Fire<'g> {
        match ev {
            WalkEvent::Text { text } => {
                if !self.matched && self.accepts(text) {
                    self.matched = true;
                    Fire::ok()
                } else {
                    Fire::rejected()
                }
            }
            WalkEvent::LeaveStartTag => Fire::ok(),
            _ => Fire::rejected(),
        }
    }

    fn accepts(&self, text: &str) -> bool {
        if !self.pattern.datatype.is_valid(text) {
            return false;
        }
        match &self.pattern.except {
            None => true,
            Some(e) => !text_matches(self.grammar, e, text),
        }
    }
}

impl<'g> AttributeWalker<'g> {
    fn fire_event(&mut self, ev: WalkEvent) -> Fire<'g> {
        match ev {
            WalkEvent::AttributeName { ns, local } => {
                if !self.seen_name && self.pattern.name_class.matches(ns, local) {
                    self.seen_name = true;
                    Fire::ok()
                } else {
                    Fire::rejected()
                }
            }
            WalkEvent::AttributeValue { value } => {
                if self.seen_name && !self.satisfied {
                    if text_matches(self.grammar, &self.pattern.pattern, value) {
                        self.satisfied = true;
                        Fire::ok()
                    } else {
                        Fire::Rejected {
                            errors: vec![ValidationError::AttributeValue {
                                msg: "invalid attribute value".to_string(),
                                value: value.to_string(),
                            }],
                        }
                    }
                } else {
                    Fire::rejected()
                }
            }
            WalkEvent::LeaveStartTag => {
                if self.satisfied {
                    Fire::ok()
                } else if !self.seen_name {
                    Fire::Rejected {
                        errors: vec![ValidationError::attribute_name(
                            "required attribute",
                            describe_name_class(&self.pattern.name_class),
                        )],
                    }
                } else {
                    Fire::Rejected {
                        errors: vec![ValidationError::generic("attribute value required")],
                    }
                }
            }
            _ => Fire::rejected(),
        }
    }
}

/// Does `pattern` accept exactly this text run? Used for attribute values,
/// data exceptions and list tokens.
fn text_matches(grammar: &Grammar, pattern: &Pattern, text: &str) -> bool {
    let mut probe = Walker::new(grammar, pattern);
    if text.is_empty() {
        return probe.can_end();
    }
    match probe.fire_event(WalkEvent::Text { text }) {
        Fire::Matched { .. } => probe.can_end(),
        Fire::Rejected { .. } => {
            // a pattern satisfied without text still tolerates whitespace
            is_whitespace_str(text) && probe.can_end()
        }
    }
}

impl<'g> RefWalker<'g> {
    fn fire_event(&mut self, ev: WalkEvent) -> Fire<'g> {
        match ev {
            WalkEvent::EnterStartTag { ns, local } => {
                if !self.spent && self.element.element.name_class.matches(ns, local) {
                    self.spent = true;
                    Fire::Matched {
                        refs: vec![self.element],
                    }
                } else {
                    Fire::rejected()
                }
            }
            WalkEvent::LeaveStartTag => Fire::ok(),
            _ => Fire::rejected(),
        }
    }
}

impl<'g> ChoiceWalker<'g> {
    fn fire_event(&mut self, ev: WalkEvent) -> Fire<'g> {
        let (ra, rb) = match (&mut self.a, &mut self.b) {
            (Some(a), Some(b)) => (a.fire_event(ev), b.fire_event(ev)),
            (Some(a), None) => return a.fire_event(ev),
            (None, Some(b)) => return b.fire_event(ev),
            (None, None) => unreachable!("choice walker with no live branches"),
        };
        match (ra, rb) {
            (Fire::Matched { refs: mut r1 }, Fire::Matched { refs: r2 }) => {
                r1.extend(r2);
                Fire::Matched { refs: r1 }
            }
            (Fire::Matched { refs }, Fire::Rejected { .. }) => {
                // only one branch continues to match; the other is gone
                self.b = None;
                Fire::Matched { refs }
            }
            (Fire::Rejected { .. }, Fire::Matched { refs }) => {
                self.a = None;
                Fire::Matched { refs }
            }
            (Fire::Rejected { errors: e1 }, Fire::Rejected { errors: e2 }) => Fire::Rejected {
                errors: choice_errors(e1, e2),
            },
        }
    }
}

impl<'g> GroupWalker<'g> {
    fn fire_event(&mut self, ev: WalkEvent) -> Fire<'g> {
        match ev {
            // attribute order is free within a start tag, so attribute
            // events may match either operand
            WalkEvent::AttributeName { .. } | WalkEvent::AttributeValue { .. } => {
                match self.a.fire_event(ev) {
                    Fire::Matched { refs } => Fire::Matched { refs },
                    Fire::Rejected { errors: ea } => match self.b.fire_event(ev) {
                        Fire::Matched { refs } => Fire::Matched { refs },
                        Fire::Rejected { errors: eb } => Fire::Rejected {
                            errors: concat(ea, eb),
                        },
                    },
                }
            }
            WalkEvent::LeaveStartTag => {
                if let Fire::Rejected { errors } = self.a.fire_event(ev) {
                    return Fire::Rejected { errors };
                }
                match self.b.fire_event(ev) {
                    Fire::Matched { .. } => Fire::ok(),
                    Fire::Rejected { errors } => Fire::Rejected { errors },
                }
            }
            _ => {
                if self.ended_a {
                    return self.b.fire_event(ev);
                }
                match self.a.fire_event(ev) {
                    Fire::Matched { refs } => Fire::Matched { refs },
                    Fire::Rejected { errors: ea } => {
                        if !self.a.can_end() {
                            return Fire::Rejected { errors: ea };
                        }
                        match self.b.fire_event(ev) {
                            Fire::Matched { refs } => {
                                let leftovers = self.a.end(false);
                                debug_assert!(leftovers.is_empty());
                                self.ended_a = true;
                                Fire::Matched { refs }
                            }
                            Fire::Rejected { errors: eb } => Fire::Rejected {
                                errors: concat(ea, eb),
                            },
                        }
                    }
                }
            }
        }
    }
}

impl<'g> InterleaveWalker<'g> {
    fn fire_event(&mut self, ev: WalkEvent) -> Fire<'g> {
        if matches!(ev, WalkEvent::LeaveStartTag) {
            if let Fire::Rejected { errors } = self.a.fire_event(ev) {
                return Fire::Rejected { errors };
            }
            return match self.b.fire_event(ev) {
                Fire::Matched { .. } => Fire::ok(),
                Fire::Rejected { errors } => Fire::Rejected { errors },
            };
        }
        match self.a.fire_event(ev) {
            Fire::Matched { refs } => Fire::Matched { refs },
            Fire::Rejected { errors: ea } => match self.b.fire_event(ev) {
                Fire::Matched { refs } => Fire::Matched { refs },
                Fire::Rejected { errors: eb } => Fire::Rejected {
                    errors: concat(ea, eb),
                },
            },
        }
    }
}

impl<'g> OneOrMoreWalker<'g> {
    fn fire_event(&mut self, ev: WalkEvent) -> Fire<'g> {
        match self.current.fire_event(ev) {
            Fire::Matched { refs } => Fire::Matched { refs },
            Fire::Rejected { errors } => {
                if !self.current.can_end() {
                    return Fire::Rejected { errors };
                }
                // the live iteration is complete; try a fresh one
                let mut fresh = Walker::new(self.grammar, self.pattern);
                match fresh.fire_event(ev) {
                    Fire::Matched { refs } => {
                        let leftovers = self.current.end(false);
                        debug_assert!(leftovers.is_empty());
                        self.current = Box::new(fresh);
                        Fire::Matched { refs }
                    }
                    Fire::Rejected { .. } => Fire::Rejected { errors },
                }
            }
        }
    }
}

impl<'g> ListWalker<'g> {
    fn fire_event(&mut self, ev: WalkEvent) -> Fire<'g> {
        match ev {
            WalkEvent::Text { text } => {
                let mut probe = self.inner.clone();
                for token in text.split_whitespace() {
                    match probe.fire_event(WalkEvent::Text { text: token }) {
                        Fire::Matched { .. } => {}
                        Fire::Rejected { errors } => {
                            let errors = if errors.is_empty() {
                                vec![ValidationError::Generic {
                                    msg: format!("invalid list token {:?}", token),
                                }]
                            } else {
                                errors
                            };
                            return Fire::Rejected { errors };
                        }
                    }
                }
                self.inner = probe;
                Fire::ok()
            }
            WalkEvent::LeaveStartTag => Fire::ok(),
            _ => Fire::rejected(),
        }
    }
}

fn concat(
    mut a: Vec<ValidationError>,
    b: Vec<ValidationError>,
) -> Vec<ValidationError> {
    a.extend(b);
    a
}
