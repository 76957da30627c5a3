//! Parsing of RELAX NG schemas in the XML syntax.
//!
//! The [`tree`] module provides the mutable element tree that the
//! simplification rewrites operate on, and [`parse`] builds such trees from
//! XML text, optionally notifying an [`parse::EventSink`] of the same event
//! stream so that a validator can run in lockstep with tree construction.

pub mod parse;
pub mod tree;
pub mod writer;

use thiserror::Error;

/// The namespace URI of RELAX NG schema elements.
pub const RELAXNG_NS: &str = "http://relaxng.org/ns/structure/1.0";

/// The predefined `xml` prefix namespace.
pub const XML_NAMESPACE_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// The predefined `xmlns` prefix namespace.
pub const XMLNS_NAMESPACE_URI: &str = "http://www.w3.org/2000/xmlns/";

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("XML syntax error: {0}")]
    Parse(#[from] xmlparser::Error),
    #[error("{path}: element {{{uri}}}{local} is not a RELAX NG element")]
    ForeignElement {
        uri: String,
        local: String,
        path: String,
    },
    #[error("the prefix {prefix:?} is not defined")]
    UndefinedPrefix { prefix: String },
    #[error("the entity &{name}; is not defined")]
    UndefinedEntity { name: String },
    #[error("invalid or unclosed entity reference")]
    InvalidEntity,
    #[error("external entity definitions are not supported")]
    ExternalEntity,
    #[error("unexpected end tag </{local}>")]
    UnexpectedClose { local: String },
    #[error("document contains no root element")]
    NoRootElement,
    #[error("unexpected end of document")]
    Truncated,
    #[error("{path}: missing required attribute {name:?}")]
    MissingAttribute { path: String, name: String },
    #[error("attribute name {name:?} must not contain a colon")]
    InvalidAttributeName { name: String },
}

pub(crate) fn is_whitespace_char(c: char) -> bool {
    ['\x20', '\x09', '\x0d', '\x0a'].contains(&c)
}

/// True if the string consists entirely of XML whitespace characters.
pub fn is_whitespace_str(s: &str) -> bool {
    s.chars().all(is_whitespace_char)
}
