//! The built-in datatype library.
//!
//! Only the RELAX NG built-in `string` and `token` types are supported,
//! under both the empty datatype library and the XSD library URI.

pub const XSD_NAMESPACE_URI: &str = "http://www.w3.org/2001/XMLSchema-datatypes";

pub trait Datatype {
    fn is_valid(&self, value: &str) -> bool;
}

/// Collapses runs of XML whitespace to single spaces and trims the ends.
pub fn normalize_whitespace(val: &str) -> String {
    let mut last_space = false;
    let mut out = String::new();
    for c in val.chars().skip_while(|c| c.is_ascii_whitespace()) {
        if c.is_ascii_whitespace() {
            last_space = true;
        } else {
            if last_space {
                out.push(' ');
            }
            out.push(c);
            last_space = false;
        }
    }
    out
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum BuiltinDatatype {
    Token,
    String,
}

impl Datatype for BuiltinDatatype {
    fn is_valid(&self, _value: &str) -> bool {
        match self {
            BuiltinDatatype::Token => true,
            BuiltinDatatype::String => true,
        }
    }
}

impl BuiltinDatatype {
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinDatatype::Token => "token",
            BuiltinDatatype::String => "string",
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum BuiltinDatatypeValue {
    TokenValue(String),
    StringValue(String),
}

impl Datatype for BuiltinDatatypeValue {
    fn is_valid(&self, value: &str) -> bool {
        match self {
            BuiltinDatatypeValue::TokenValue(val) => val == &normalize_whitespace(value),
            BuiltinDatatypeValue::StringValue(val) => val == value,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Error {
    UnsupportedLibrary { library: String },
    UnknownName { name: String },
    ParamNotAllowed { name: String },
}

/// Resolves a `(datatypeLibrary, type name)` pair to a datatype.
pub fn datatype_name(
    library: &str,
    name: &str,
    params: &[(String, String)],
) -> Result<BuiltinDatatype, Error> {
    if let Some((pname, _)) = params.first() {
        return Err(Error::ParamNotAllowed {
            name: pname.clone(),
        });
    }
    lookup(library, name)
}

/// Resolves a `(datatypeLibrary, type name)` pair for a `value` pattern and
/// captures the literal in the type's value space.
pub fn datatype_value(
    library: &str,
    name: &str,
    value: &str,
) -> Result<BuiltinDatatypeValue, Error> {
    Ok(match lookup(library, name)? {
        BuiltinDatatype::String => BuiltinDatatypeValue::StringValue(value.to_string()),
        BuiltinDatatype::Token => {
            BuiltinDatatypeValue::TokenValue(normalize_whitespace(value))
        }
    })
}

fn lookup(library: &str, name: &str) -> Result<BuiltinDatatype, Error> {
    if !library.is_empty() && library != XSD_NAMESPACE_URI {
        return Err(Error::UnsupportedLibrary {
            library: library.to_string(),
        });
    }
    match name {
        "string" => Ok(BuiltinDatatype::String),
        "token" => Ok(BuiltinDatatype::Token),
        _ => Err(Error::UnknownName {
            name: name.to_string(),
        }),
    }
}
