//! Event-level walker properties: cloning, compound events, and agreement
//! between static analysis and walker state.

use relaxwalk_model::model::Grammar;
use relaxwalk_model::{Compiler, MapResources};
use relaxwalk_validator::{
    AttributeSpec, DefaultNameResolver, Event, Expected, GrammarExt, ValidationError, Walker,
};

const RNG: &str = "http://relaxng.org/ns/structure/1.0";

fn compile(schema: &str) -> Grammar {
    let mut compiler = Compiler::new(MapResources::new(&[("schema.rng", schema)]));
    compiler
        .compile("schema.rng")
        .expect("schema compiles")
        .grammar
}

fn doc_schema() -> Grammar {
    compile(&format!(
        r#"<element name="doc" xmlns="{}">
             <optional><attribute name="kind"><text/></attribute></optional>
             <zeroOrMore><element name="item"><text/></element></zeroOrMore>
           </element>"#,
        RNG
    ))
}

type Ev<'a> = Event<'a>;

fn item_events() -> Vec<Ev<'static>> {
    vec![
        Ev::EnterStartTag {
            ns: "",
            local: "doc",
        },
        Ev::AttributeNameAndValue {
            ns: "",
            local: "kind",
            value: "big",
        },
        Ev::LeaveStartTag,
        Ev::EnterStartTag {
            ns: "",
            local: "item",
        },
        Ev::LeaveStartTag,
        Ev::Text { text: "first" },
        Ev::EndTag {
            ns: "",
            local: "item",
        },
        Ev::EndTag {
            ns: "",
            local: "doc",
        },
    ]
}

#[test]
fn a_full_event_stream_is_accepted() {
    let grammar = doc_schema();
    let mut walker = grammar.new_walker(DefaultNameResolver::default());
    for ev in item_events() {
        let errors = walker.fire_event(ev);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }
    assert!(walker.can_end());
    assert!(walker.end().is_empty());
}

#[test]
fn clone_isolation_under_divergent_streams() {
    let grammar = doc_schema();
    let mut original = grammar.new_walker(DefaultNameResolver::default());
    let events = item_events();
    // advance both through the open tag
    for ev in &events[..3] {
        assert!(original.fire_event(ev.clone()).is_empty());
    }
    let mut fork = original.clone();
    // drive the fork to a successful end
    for ev in &events[3..] {
        assert!(fork.fire_event(ev.clone()).is_empty());
    }
    assert!(fork.can_end());
    // the original is unaffected: it still sits inside doc and can take a
    // different continuation
    assert!(!original.can_end());
    let errors = original.fire_event(Ev::EndTag {
        ns: "",
        local: "doc",
    });
    assert!(errors.is_empty(), "original diverged: {:?}", errors);
    assert!(original.can_end());
}

#[test]
fn clones_replay_identically() {
    let grammar = doc_schema();
    let mut first = grammar.new_walker(DefaultNameResolver::default());
    for ev in &item_events()[..3] {
        assert!(first.fire_event(ev.clone()).is_empty());
    }
    let mut a = first.clone();
    let mut b = first.clone();
    let events = item_events();
    let tail = &events[3..];
    for ev in tail {
        let ra = a.fire_event(ev.clone());
        let rb = b.fire_event(ev.clone());
        assert_eq!(ra, rb);
    }
    assert_eq!(a.can_end(), b.can_end());
}

#[test]
fn compound_start_tag_event_matches_the_decomposed_form() {
    let grammar = doc_schema();
    let mut compound = grammar.new_walker(DefaultNameResolver::default());
    let errors = compound.fire_event(Ev::StartTagAndAttributes {
        ns: "",
        local: "doc",
        attributes: vec![AttributeSpec {
            ns: "",
            local: "kind",
            value: "big",
        }],
    });
    assert!(errors.is_empty(), "got {:?}", errors);

    let mut split = grammar.new_walker(DefaultNameResolver::default());
    for ev in &item_events()[..3] {
        assert!(split.fire_event(ev.clone()).is_empty());
    }
    let closing = Ev::EndTag {
        ns: "",
        local: "doc",
    };
    assert_eq!(
        compound.fire_event(closing.clone()).is_empty(),
        split.fire_event(closing).is_empty()
    );
}

#[test]
fn empty_acceptance_matches_fresh_walker_can_end() {
    let grammar = compile(&format!(
        r#"<grammar xmlns="{}">
             <start><ref name="doc"/></start>
             <define name="doc">
               <element name="doc">
                 <group>
                   <optional><element name="a"><empty/></element></optional>
                   <choice>
                     <text/>
                     <oneOrMore><element name="b"><value>v</value></element></oneOrMore>
                   </choice>
                 </group>
               </element>
             </define>
           </grammar>"#,
        RNG
    ));
    assert_eq!(
        grammar.start().has_empty_pattern(),
        Walker::new(&grammar, grammar.start()).can_end()
    );
    for define in grammar.defines() {
        let pattern = &define.element.pattern;
        assert_eq!(
            pattern.has_empty_pattern(),
            Walker::new(&grammar, pattern).can_end(),
            "disagreement for definition {:?}",
            define.name
        );
    }
}

#[test]
fn possible_reports_expected_events() {
    let grammar = doc_schema();
    let mut walker = grammar.new_walker(DefaultNameResolver::default());
    let possible = walker.possible();
    assert!(possible
        .iter()
        .any(|e| matches!(e, Expected::EnterStartTag(nc) if nc.matches("", "doc"))));

    assert!(walker
        .fire_event(Ev::EnterStartTag {
            ns: "",
            local: "doc"
        })
        .is_empty());
    let possible = walker.possible();
    assert!(possible
        .iter()
        .any(|e| matches!(e, Expected::AttributeName(nc) if nc.matches("", "kind"))));
    assert!(possible
        .iter()
        .any(|e| matches!(e, Expected::EnterStartTag(nc) if nc.matches("", "item"))));
}

#[test]
fn empty_text_events_are_a_programming_error() {
    let grammar = doc_schema();
    let mut walker = grammar.new_walker(DefaultNameResolver::default());
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        walker.fire_event(Ev::Text { text: "" });
    }));
    assert!(outcome.is_err());
}

#[test]
fn attribute_value_with_no_pending_name_is_reported() {
    let grammar = doc_schema();
    let mut walker = grammar.new_walker(DefaultNameResolver::default());
    assert!(walker
        .fire_event(Ev::EnterStartTag {
            ns: "",
            local: "doc"
        })
        .is_empty());
    let errors = walker.fire_event(Ev::AttributeValue { value: "stray" });
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ValidationError::Generic { msg } if msg == "attribute value required")),
        "got {:?}",
        errors
    );
}

#[test]
fn rejected_attribute_name_swallows_exactly_one_value() {
    let grammar = doc_schema();
    let mut walker = grammar.new_walker(DefaultNameResolver::default());
    assert!(walker
        .fire_event(Ev::EnterStartTag {
            ns: "",
            local: "doc"
        })
        .is_empty());
    let errors = walker.fire_event(Ev::AttributeName {
        ns: "",
        local: "bogus",
    });
    assert!(!errors.is_empty());
    // the swallowed value produces no further noise
    assert!(walker
        .fire_event(Ev::AttributeValue { value: "x" })
        .is_empty());
    // but a second stray value does
    assert!(!walker
        .fire_event(Ev::AttributeValue { value: "y" })
        .is_empty());
}
