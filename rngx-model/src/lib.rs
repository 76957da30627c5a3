//! Compilation of RELAX NG schemas in the XML syntax.
//!
//! A schema is loaded into a mutable element tree, rewritten into the
//! simplified form by [`simplify`], and then compiled into the pattern
//! model of [`model`] by [`compile`].  The [`compact`] module reads and
//! writes the numeric serialisation of compiled grammars.

pub mod compact;
pub mod compile;
pub mod datatype;
pub mod model;
pub mod restrictions;
pub mod simplify;

use rngx_syntax::parse;
use rngx_syntax::tree::{Doc, NodeId};
use rngx_syntax::XmlError;
use std::fmt;
use thiserror::Error;
use url::Url;

pub use model::{Define, Grammar, NameClass, Param, Pattern, PatternKind};

/// A single problem found while validating a document against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Element path from the document root, e.g. `/doc/section/title`.
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Error, Debug)]
pub enum RelaxError {
    /// The schema is not well-formed RELAX NG.
    #[error("{path}: {message}")]
    SchemaStructure { path: String, message: String },
    #[error("failed to load {url}: {message}")]
    ResourceLoad { url: String, message: String },
    #[error("datatype {datatype}: bad parameter {param}: {message}")]
    DatatypeParameter {
        datatype: String,
        param: String,
        message: String,
    },
    #[error("datatype {datatype}: invalid value {value:?}")]
    DatatypeValue { datatype: String, value: String },
    #[error("document does not match the schema ({} errors)", .0.len())]
    Validation(Vec<ValidationError>),
    #[error("compact schema predates the versioned format")]
    OldFormat,
    #[error("unknown compact format version {0}")]
    UnknownFormat(u64),
    #[error("malformed compact schema: {0}")]
    MalformedCompact(String),
    #[error(transparent)]
    Xml(#[from] XmlError),
}

pub(crate) fn structure_error(
    path: impl Into<String>,
    message: impl Into<String>,
) -> RelaxError {
    RelaxError::SchemaStructure {
        path: path.into(),
        message: message.into(),
    }
}

/// Source of referenced schema documents (`include` / `externalRef`).
pub trait Resources {
    fn load(&self, url: &Url) -> Result<String, RelaxError>;
}

/// Loads `file:` URLs from the local filesystem.
pub struct FsResources;

impl Resources for FsResources {
    fn load(&self, url: &Url) -> Result<String, RelaxError> {
        let path = url
            .to_file_path()
            .map_err(|()| RelaxError::ResourceLoad {
                url: url.to_string(),
                message: "only file: URLs are supported".to_string(),
            })?;
        std::fs::read_to_string(&path).map_err(|e| RelaxError::ResourceLoad {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

/// How unknown datatype libraries and types are treated during compilation.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum IncompleteTypes {
    Deny,
    Warn,
    Quiet,
}

impl Default for IncompleteTypes {
    fn default() -> Self {
        IncompleteTypes::Deny
    }
}

#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Stop simplification after this step (1..=16); mainly for debugging.
    pub simplify_to: usize,
    pub incomplete_types: IncompleteTypes,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            simplify_to: simplify::STEP_COUNT,
            incomplete_types: IncompleteTypes::default(),
        }
    }
}

pub struct Compiler<R: Resources> {
    resources: R,
    options: CompileOptions,
}

impl<R: Resources> Compiler<R> {
    pub fn new(resources: R) -> Compiler<R> {
        Self::with_options(resources, CompileOptions::default())
    }

    pub fn with_options(resources: R, options: CompileOptions) -> Compiler<R> {
        Compiler { resources, options }
    }

    pub fn compile_url(&self, url: &Url) -> Result<Grammar, RelaxError> {
        let src = self.resources.load(url)?;
        self.compile_source(&src, url)
    }

    pub fn compile_source(&self, src: &str, base: &Url) -> Result<Grammar, RelaxError> {
        let (doc, root) = self.simplify_source(src, base)?;
        compile::compile(&doc, root, &self.options)
    }

    /// Parse and simplify, returning the rewritten tree without compiling it.
    pub fn simplify_source(&self, src: &str, base: &Url) -> Result<(Doc, NodeId), RelaxError> {
        // schemas without include/externalRef can skip the composition steps
        let composition = parse::scan_for_composition(src)?;
        let (mut doc, root) = parse::parse_document(src)?;
        let root = simplify::simplify(
            &mut doc,
            root,
            base,
            &self.resources,
            self.options.simplify_to,
            composition,
        )?;
        Ok((doc, root))
    }

    /// Compile an already-simplified schema, skipping the rewrite passes.
    pub fn compile_simplified(&self, src: &str) -> Result<Grammar, RelaxError> {
        let (doc, root) = parse::parse_document(src)?;
        compile::compile(&doc, root, &self.options)
    }
}
