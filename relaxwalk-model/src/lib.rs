//! Schema compilation for RELAX NG validation.
//!
//! [`Compiler::compile`] loads an XML-syntax schema through a [`Resources`]
//! loader, runs the simplification pipeline over the element tree, and
//! produces a linked [`model::Grammar`] ready to drive a validator.

use codemap::CodeMap;
use codemap_diagnostic::{ColorConfig, Diagnostic, Emitter, Level, SpanLabel, SpanStyle};
use relaxwalk_syntax::xml;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

pub mod datatype;
pub mod format;
pub mod model;
pub mod name_class;
mod simplify;

/// A loaded schema document plus the canonical URL relative references
/// resolve against.
pub struct Resource {
    pub url: String,
    pub text: String,
}

/// Loader consulted for the top-level schema and for every `include` and
/// `externalRef` target.
pub trait Resources {
    fn load(&self, url: &str) -> Result<Resource, io::Error>;
}

/// Loads schemas from the local filesystem; `file:` URLs and plain paths
/// are accepted.
pub struct FsResources;

impl Resources for FsResources {
    fn load(&self, url: &str) -> Result<Resource, io::Error> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let text = fs::read_to_string(Path::new(path))?;
        Ok(Resource {
            url: url.to_string(),
            text,
        })
    }
}

/// In-memory loader, for tests and embedders that assemble schemas
/// programmatically.
pub struct MapResources {
    entries: HashMap<String, String>,
}

impl MapResources {
    pub fn new(entries: &[(&str, &str)]) -> MapResources {
        MapResources {
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl Resources for MapResources {
    fn load(&self, url: &str) -> Result<Resource, io::Error> {
        self.entries
            .get(url)
            .map(|text| Resource {
                url: url.to_string(),
                text: text.clone(),
            })
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}

/// Resolves an `href` against the canonical URL of the document holding it.
pub(crate) fn resolve_href(base: &str, href: &str) -> String {
    if href.contains("://") {
        return href.to_string();
    }
    if let Ok(base_url) = url::Url::parse(base) {
        if let Ok(joined) = base_url.join(href) {
            return joined.to_string();
        }
    }
    match base.rfind('/') {
        Some(i) => format!("{}{}", &base[..=i], href),
        None => href.to_string(),
    }
}

#[derive(Debug)]
pub struct Warning {
    pub span: Option<codemap::Span>,
    pub message: String,
}

#[derive(Debug)]
pub enum SchemaError {
    Io(String, io::Error),
    Xml(codemap::Span, String),
    UnresolvableResource {
        span: codemap::Span,
        url: String,
        error: io::Error,
    },
    RecursiveInclude {
        span: codemap::Span,
        url: String,
    },
    IncludedFileMustBeGrammar {
        span: codemap::Span,
    },
    OverrideMissingFromInclude {
        override_span: codemap::Span,
        include_span: codemap::Span,
        name: String,
    },
    DuplicateDefinition {
        name: String,
        duplicate: codemap::Span,
        original: codemap::Span,
    },
    IncompatibleCombination {
        name: String,
        this_span: codemap::Span,
        that_span: codemap::Span,
    },
    StartRuleNotDefined {
        span: codemap::Span,
    },
    UndefinedNamespacePrefix {
        span: codemap::Span,
        prefix: String,
    },
    UndefinedReference {
        span: codemap::Span,
        name: String,
    },
    InvalidDatatypeLibrary {
        span: codemap::Span,
        uri: String,
    },
    UnsupportedDatatypeLibrary {
        span: codemap::Span,
        library: String,
    },
    UnknownDatatype {
        span: codemap::Span,
        name: String,
    },
    ParamNotAllowed {
        span: codemap::Span,
        name: String,
    },
    SelfReferentialDefine {
        span: codemap::Span,
        name: String,
    },
    StartMatchesNothing {
        span: codemap::Span,
    },
    /// A reference survived simplification with no matching definition.
    UnresolvedRef {
        name: String,
    },
    /// A static violation of the schema grammar, with a specific message.
    Unexpected {
        span: codemap::Span,
        message: String,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::Io(url, e) => write!(f, "failed to read {}: {}", url, e),
            SchemaError::Xml(_, msg) => write!(f, "schema is not well-formed XML: {}", msg),
            SchemaError::UnresolvableResource { url, error, .. } => {
                write!(f, "failed to load {}: {}", url, error)
            }
            SchemaError::RecursiveInclude { url, .. } => {
                write!(f, "{} includes itself", url)
            }
            SchemaError::IncludedFileMustBeGrammar { .. } => {
                write!(f, "an included schema must have a grammar root")
            }
            SchemaError::OverrideMissingFromInclude { name, .. } => {
                write!(
                    f,
                    "override of {:?} matches nothing in the included grammar",
                    name
                )
            }
            SchemaError::DuplicateDefinition { name, .. } => {
                write!(f, "{:?} is defined more than once", name)
            }
            SchemaError::IncompatibleCombination { name, .. } => {
                write!(f, "{:?} mixes combine=\"choice\" and combine=\"interleave\"", name)
            }
            SchemaError::StartRuleNotDefined { .. } => {
                write!(f, "the grammar does not define a start pattern")
            }
            SchemaError::UndefinedNamespacePrefix { prefix, .. } => {
                write!(f, "the namespace prefix {:?} is not defined", prefix)
            }
            SchemaError::UndefinedReference { name, .. } => {
                write!(f, "reference to undefined name {:?}", name)
            }
            SchemaError::InvalidDatatypeLibrary { uri, .. } => {
                write!(f, "invalid datatype library URI {:?}", uri)
            }
            SchemaError::UnsupportedDatatypeLibrary { library, .. } => {
                write!(f, "unsupported datatype library {:?}", library)
            }
            SchemaError::UnknownDatatype { name, .. } => {
                write!(f, "unknown datatype {:?}", name)
            }
            SchemaError::ParamNotAllowed { name, .. } => {
                write!(f, "this datatype does not accept the parameter {:?}", name)
            }
            SchemaError::SelfReferentialDefine { name, .. } => {
                write!(f, "definition {:?} refers to itself without an intervening element", name)
            }
            SchemaError::StartMatchesNothing { .. } => {
                write!(f, "the start pattern matches nothing")
            }
            SchemaError::UnresolvedRef { name } => write!(f, "{} cannot be resolved", name),
            SchemaError::Unexpected { message, .. } => write!(f, "{}", message),
        }
    }
}

impl SchemaError {
    fn span(&self) -> Option<codemap::Span> {
        match self {
            SchemaError::Io(_, _) | SchemaError::UnresolvedRef { .. } => None,
            SchemaError::Xml(span, _)
            | SchemaError::UnresolvableResource { span, .. }
            | SchemaError::RecursiveInclude { span, .. }
            | SchemaError::IncludedFileMustBeGrammar { span }
            | SchemaError::OverrideMissingFromInclude {
                override_span: span,
                ..
            }
            | SchemaError::DuplicateDefinition {
                duplicate: span, ..
            }
            | SchemaError::IncompatibleCombination {
                this_span: span, ..
            }
            | SchemaError::StartRuleNotDefined { span }
            | SchemaError::UndefinedNamespacePrefix { span, .. }
            | SchemaError::UndefinedReference { span, .. }
            | SchemaError::InvalidDatatypeLibrary { span, .. }
            | SchemaError::UnsupportedDatatypeLibrary { span, .. }
            | SchemaError::UnknownDatatype { span, .. }
            | SchemaError::ParamNotAllowed { span, .. }
            | SchemaError::SelfReferentialDefine { span, .. }
            | SchemaError::StartMatchesNothing { span }
            | SchemaError::Unexpected { span, .. } => Some(*span),
        }
    }
}

/// The result of a successful compilation.
#[derive(Debug)]
pub struct Compiled {
    pub grammar: model::Grammar,
    pub warnings: Vec<Warning>,
}

pub struct Compiler<R: Resources = FsResources> {
    resources: R,
    codemap: CodeMap,
}

impl Default for Compiler<FsResources> {
    fn default() -> Self {
        Compiler::new(FsResources)
    }
}

impl<R: Resources> Compiler<R> {
    pub fn new(resources: R) -> Compiler<R> {
        Compiler {
            resources,
            codemap: CodeMap::new(),
        }
    }

    /// Runs the whole pipeline: load, parse, simplify, emit, link.
    pub fn compile(&mut self, url: &str) -> Result<Compiled, SchemaError> {
        let resource = self
            .resources
            .load(url)
            .map_err(|e| SchemaError::Io(url.to_string(), e))?;
        let canonical = resource.url.clone();
        let file = self.codemap.add_file(resource.url, resource.text);
        let mut tree =
            xml::parse(&file).map_err(|xml::Error::Xml(span, msg)| SchemaError::Xml(span, msg))?;
        let mut pipeline = simplify::Pipeline::new(&self.resources, &mut self.codemap);
        let (start, defines) = pipeline.run(&mut tree, &canonical)?;
        let warnings = std::mem::take(&mut pipeline.warnings);
        let grammar = model::Grammar::new(start, defines).map_err(|e| match e {
            model::LinkError::UnresolvedRef { name } => SchemaError::UnresolvedRef { name },
            model::LinkError::DuplicateDefine { name } => {
                unreachable!("simplification produced duplicate definition {:?}", name)
            }
        })?;
        Ok(Compiled { grammar, warnings })
    }

    pub fn codemap(&self) -> &CodeMap {
        &self.codemap
    }

    pub fn diagnostic(&self, err: &SchemaError) -> Diagnostic {
        let spans = match err.span() {
            Some(span) => vec![SpanLabel {
                span,
                label: None,
                style: SpanStyle::Primary,
            }],
            None => vec![],
        };
        Diagnostic {
            level: Level::Error,
            message: err.to_string(),
            code: None,
            spans,
        }
    }

    /// Renders the error to stderr with source context.
    pub fn dump_diagnostic(&self, err: &SchemaError) {
        let d = self.diagnostic(err);
        let mut emitter = Emitter::stderr(ColorConfig::Auto, Some(&self.codemap));
        emitter.emit(&[d]);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resolve_href_joins_relative_paths() {
        assert_eq!(resolve_href("dir/main.rng", "lib.rng"), "dir/lib.rng");
        assert_eq!(resolve_href("main.rng", "lib.rng"), "lib.rng");
        assert_eq!(
            resolve_href("file:///tmp/main.rng", "sub/lib.rng"),
            "file:///tmp/sub/lib.rng"
        );
        assert_eq!(
            resolve_href("main.rng", "http://example.com/x.rng"),
            "http://example.com/x.rng"
        );
    }

    #[test]
    fn missing_resources_surface_as_io_errors() {
        let mut compiler = Compiler::new(MapResources::new(&[]));
        assert!(matches!(
            compiler.compile("absent.rng"),
            Err(SchemaError::Io(_, _))
        ));
    }
}
