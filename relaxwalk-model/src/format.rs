//! JSON representation of compiled grammars.
//!
//! Every pattern object carries a `"pattern"` discriminator; name classes
//! are distinguished structurally (`{ns, name}`, `{a, b}`, `{ns, except?}`,
//! `{pattern: "AnyName", except?}`). `read_tree_from_json` inverts
//! `write_tree_to_json` up to structural equality.

use crate::datatype;
use crate::model::{
    AttributePattern, DataPattern, Define, ElementPattern, Grammar, Pattern, RefPattern,
    ValuePattern,
};
use crate::name_class::{AnyName, Name, NamePattern, NsName};
use serde_json::{json, Map, Value};
use std::fmt;

#[derive(Debug)]
pub enum FormatError {
    Malformed(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Malformed(msg) => write!(f, "malformed grammar document: {}", msg),
        }
    }
}

pub fn write_tree_to_json(grammar: &Grammar) -> Value {
    let definitions: Vec<Value> = grammar
        .defines()
        .iter()
        .map(|d| {
            json!({
                "name": d.name,
                "element": write_element(&d.element),
            })
        })
        .collect();
    json!({
        "pattern": "Grammar",
        "start": write_pattern(grammar.start()),
        "definitions": definitions,
    })
}

pub fn read_tree_from_json(value: &Value) -> Result<Grammar, FormatError> {
    let obj = expect_object(value)?;
    expect_discriminator(obj, "Grammar")?;
    let start = read_pattern(field(obj, "start")?)?;
    let mut defines = Vec::new();
    for d in expect_array(field(obj, "definitions")?)? {
        let dobj = expect_object(d)?;
        defines.push(Define {
            name: expect_string(field(dobj, "name")?)?.to_string(),
            element: read_element(field(dobj, "element")?)?,
        });
    }
    Grammar::new(start, defines).map_err(|e| FormatError::Malformed(e.to_string()))
}

fn write_element(element: &ElementPattern) -> Value {
    json!({
        "pattern": "Element",
        "nameClass": write_name_class(&element.name_class),
        "pat": write_pattern(&element.pattern),
    })
}

fn read_element(value: &Value) -> Result<ElementPattern, FormatError> {
    let obj = expect_object(value)?;
    expect_discriminator(obj, "Element")?;
    Ok(ElementPattern {
        name_class: read_name_class(field(obj, "nameClass")?)?,
        pattern: read_pattern(field(obj, "pat")?)?,
    })
}

fn write_pattern(pattern: &Pattern) -> Value {
    match pattern {
        Pattern::Empty => json!({"pattern": "Empty"}),
        Pattern::NotAllowed => json!({"pattern": "NotAllowed"}),
        Pattern::Text => json!({"pattern": "Text"}),
        Pattern::Data(d) => {
            let params: Vec<Value> = d
                .params
                .iter()
                .map(|(name, value)| json!({"name": name, "value": value}))
                .collect();
            let mut obj = Map::new();
            obj.insert("pattern".to_string(), json!("Data"));
            obj.insert("library".to_string(), json!(d.library));
            obj.insert("type".to_string(), json!(d.datatype.name()));
            obj.insert("params".to_string(), Value::Array(params));
            if let Some(e) = &d.except {
                obj.insert("except".to_string(), write_pattern(e));
            }
            Value::Object(obj)
        }
        Pattern::Value(v) => json!({
            "pattern": "Value",
            "library": v.library,
            "type": value_type_name(&v.datatype),
            "value": v.value,
            "ns": v.ns,
        }),
        Pattern::Choice(a, b) => binary("Choice", a, b),
        Pattern::Group(a, b) => binary("Group", a, b),
        Pattern::Interleave(a, b) => binary("Interleave", a, b),
        Pattern::OneOrMore(p) => json!({"pattern": "OneOrMore", "p": write_pattern(p)}),
        Pattern::List(p) => json!({"pattern": "List", "p": write_pattern(p)}),
        Pattern::Attribute(a) => json!({
            "pattern": "Attribute",
            "nameClass": write_name_class(&a.name_class),
            "pat": write_pattern(&a.pattern),
        }),
        Pattern::Ref(r) => json!({"pattern": "Ref", "name": r.name}),
    }
}

fn binary(kind: &str, a: &Pattern, b: &Pattern) -> Value {
    json!({"pattern": kind, "a": write_pattern(a), "b": write_pattern(b)})
}

fn value_type_name(v: &datatype::BuiltinDatatypeValue) -> &'static str {
    match v {
        datatype::BuiltinDatatypeValue::TokenValue(_) => "token",
        datatype::BuiltinDatatypeValue::StringValue(_) => "string",
    }
}

fn read_pattern(value: &Value) -> Result<Pattern, FormatError> {
    let obj = expect_object(value)?;
    let kind = expect_string(field(obj, "pattern")?)?;
    Ok(match kind {
        "Empty" => Pattern::Empty,
        "NotAllowed" => Pattern::NotAllowed,
        "Text" => Pattern::Text,
        "Data" => {
            let library = expect_string(field(obj, "library")?)?;
            let type_name = expect_string(field(obj, "type")?)?;
            let mut params = Vec::new();
            for p in expect_array(field(obj, "params")?)? {
                let pobj = expect_object(p)?;
                params.push((
                    expect_string(field(pobj, "name")?)?.to_string(),
                    expect_string(field(pobj, "value")?)?.to_string(),
                ));
            }
            let except = match obj.get("except") {
                Some(e) => Some(Box::new(read_pattern(e)?)),
                None => None,
            };
            let datatype = datatype::datatype_name(library, type_name, &params)
                .map_err(|e| FormatError::Malformed(format!("{:?}", e)))?;
            Pattern::Data(DataPattern {
                library: library.to_string(),
                datatype,
                params,
                except,
            })
        }
        "Value" => {
            let library = expect_string(field(obj, "library")?)?;
            let type_name = expect_string(field(obj, "type")?)?;
            let raw = expect_string(field(obj, "value")?)?;
            let ns = expect_string(field(obj, "ns")?)?;
            let datatype = datatype::datatype_value(library, type_name, raw)
                .map_err(|e| FormatError::Malformed(format!("{:?}", e)))?;
            Pattern::Value(ValuePattern {
                library: library.to_string(),
                datatype,
                value: raw.to_string(),
                ns: ns.to_string(),
            })
        }
        "Choice" => Pattern::Choice(
            Box::new(read_pattern(field(obj, "a")?)?),
            Box::new(read_pattern(field(obj, "b")?)?),
        ),
        "Group" => Pattern::Group(
            Box::new(read_pattern(field(obj, "a")?)?),
            Box::new(read_pattern(field(obj, "b")?)?),
        ),
        "Interleave" => Pattern::Interleave(
            Box::new(read_pattern(field(obj, "a")?)?),
            Box::new(read_pattern(field(obj, "b")?)?),
        ),
        "OneOrMore" => Pattern::OneOrMore(Box::new(read_pattern(field(obj, "p")?)?)),
        "List" => Pattern::List(Box::new(read_pattern(field(obj, "p")?)?)),
        "Attribute" => Pattern::Attribute(AttributePattern {
            name_class: read_name_class(field(obj, "nameClass")?)?,
            pattern: Box::new(read_pattern(field(obj, "pat")?)?),
        }),
        "Ref" => Pattern::Ref(RefPattern::new(expect_string(field(obj, "name")?)?)),
        other => {
            return Err(FormatError::Malformed(format!(
                "unknown pattern discriminator {:?}",
                other
            )))
        }
    })
}

fn write_name_class(nc: &NamePattern) -> Value {
    match nc {
        NamePattern::Name(n) => json!({"ns": n.ns, "name": n.local}),
        NamePattern::NameChoice(a, b) => {
            json!({"a": write_name_class(a), "b": write_name_class(b)})
        }
        NamePattern::NsName(n) => {
            let mut obj = Map::new();
            obj.insert("ns".to_string(), json!(n.ns));
            if let Some(e) = &n.except {
                obj.insert("except".to_string(), write_name_class(e));
            }
            Value::Object(obj)
        }
        NamePattern::AnyName(n) => {
            let mut obj = Map::new();
            obj.insert("pattern".to_string(), json!("AnyName"));
            if let Some(e) = &n.except {
                obj.insert("except".to_string(), write_name_class(e));
            }
            Value::Object(obj)
        }
    }
}

fn read_name_class(value: &Value) -> Result<NamePattern, FormatError> {
    let obj = expect_object(value)?;
    if obj.get("pattern").map(|v| v == "AnyName").unwrap_or(false) {
        let except = match obj.get("except") {
            Some(e) => Some(Box::new(read_name_class(e)?)),
            None => None,
        };
        return Ok(NamePattern::AnyName(AnyName { except }));
    }
    if obj.contains_key("a") {
        return Ok(NamePattern::NameChoice(
            Box::new(read_name_class(field(obj, "a")?)?),
            Box::new(read_name_class(field(obj, "b")?)?),
        ));
    }
    if obj.contains_key("name") {
        return Ok(NamePattern::Name(Name {
            ns: expect_string(field(obj, "ns")?)?.to_string(),
            local: expect_string(field(obj, "name")?)?.to_string(),
        }));
    }
    if obj.contains_key("ns") {
        let except = match obj.get("except") {
            Some(e) => Some(Box::new(read_name_class(e)?)),
            None => None,
        };
        return Ok(NamePattern::NsName(NsName {
            ns: expect_string(field(obj, "ns")?)?.to_string(),
            except,
        }));
    }
    Err(FormatError::Malformed(format!(
        "unrecognized name class shape: {}",
        value
    )))
}

fn expect_object(value: &Value) -> Result<&Map<String, Value>, FormatError> {
    value
        .as_object()
        .ok_or_else(|| FormatError::Malformed(format!("expected an object, got {}", value)))
}

fn expect_array(value: &Value) -> Result<&Vec<Value>, FormatError> {
    value
        .as_array()
        .ok_or_else(|| FormatError::Malformed(format!("expected an array, got {}", value)))
}

fn expect_string(value: &Value) -> Result<&str, FormatError> {
    value
        .as_str()
        .ok_or_else(|| FormatError::Malformed(format!("expected a string, got {}", value)))
}

fn field<'v>(obj: &'v Map<String, Value>, name: &str) -> Result<&'v Value, FormatError> {
    obj.get(name)
        .ok_or_else(|| FormatError::Malformed(format!("missing field {:?}", name)))
}

fn expect_discriminator(obj: &Map<String, Value>, expected: &str) -> Result<(), FormatError> {
    let kind = expect_string(field(obj, "pattern")?)?;
    if kind != expected {
        return Err(FormatError::Malformed(format!(
            "expected a {} node, got {}",
            expected, kind
        )));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::datatype;

    fn sample_grammar() -> Grammar {
        let attr = Pattern::Attribute(AttributePattern {
            name_class: NamePattern::name("", "kind"),
            pattern: Box::new(Pattern::Choice(
                Box::new(Pattern::Value(ValuePattern {
                    library: String::new(),
                    datatype: datatype::datatype_value("", "token", "big").unwrap(),
                    value: "big".to_string(),
                    ns: String::new(),
                })),
                Box::new(Pattern::Value(ValuePattern {
                    library: String::new(),
                    datatype: datatype::datatype_value("", "token", "small").unwrap(),
                    value: "small".to_string(),
                    ns: String::new(),
                })),
            )),
        });
        let content = Pattern::Group(
            Box::new(Pattern::Choice(Box::new(attr), Box::new(Pattern::Empty))),
            Box::new(Pattern::Interleave(
                Box::new(Pattern::OneOrMore(Box::new(Pattern::Ref(RefPattern::new(
                    "item",
                ))))),
                Box::new(Pattern::Text),
            )),
        );
        let defines = vec![
            Define {
                name: "doc".to_string(),
                element: ElementPattern {
                    name_class: NamePattern::name("urn:test", "doc"),
                    pattern: content,
                },
            },
            Define {
                name: "item".to_string(),
                element: ElementPattern {
                    name_class: NamePattern::choice(
                        NamePattern::name("urn:test", "item"),
                        NamePattern::ns_name(
                            "urn:extra",
                            Some(NamePattern::name("urn:extra", "hidden")),
                        ),
                    ),
                    pattern: Pattern::List(Box::new(Pattern::OneOrMore(Box::new(
                        Pattern::Data(DataPattern {
                            library: String::new(),
                            datatype: datatype::datatype_name("", "token", &[]).unwrap(),
                            params: vec![],
                            except: Some(Box::new(Pattern::Value(ValuePattern {
                                library: String::new(),
                                datatype: datatype::datatype_value("", "token", "forbidden")
                                    .unwrap(),
                                value: "forbidden".to_string(),
                                ns: String::new(),
                            }))),
                        }),
                    )))),
                },
            },
        ];
        Grammar::new(Pattern::Ref(RefPattern::new("doc")), defines).unwrap()
    }

    #[test]
    fn round_trip_is_structural_identity() {
        let g = sample_grammar();
        let json = write_tree_to_json(&g);
        let back = read_tree_from_json(&json).unwrap();
        assert_eq!(back, g);
        // and a second trip produces the very same document
        assert_eq!(write_tree_to_json(&back), json);
    }

    #[test]
    fn any_name_uses_the_discriminator() {
        let g = Grammar::new(
            Pattern::Ref(RefPattern::new("any")),
            vec![Define {
                name: "any".to_string(),
                element: ElementPattern {
                    name_class: NamePattern::any_name(Some(NamePattern::name("urn:x", "no"))),
                    pattern: Pattern::Empty,
                },
            }],
        )
        .unwrap();
        let json = write_tree_to_json(&g);
        let nc = &json["definitions"][0]["element"]["nameClass"];
        assert_eq!(nc["pattern"], "AnyName");
        assert_eq!(nc["except"]["name"], "no");
        assert_eq!(read_tree_from_json(&json).unwrap(), g);
    }

    #[test]
    fn rejects_unknown_discriminators() {
        let doc = serde_json::json!({"pattern": "Grammar", "start": {"pattern": "Bogus"}, "definitions": []});
        assert!(read_tree_from_json(&doc).is_err());
    }
}
