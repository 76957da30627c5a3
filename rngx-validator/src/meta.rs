//! Validation of schema documents against the schema for schemas.
//!
//! The embedded grammar describes RELAX NG's own XML syntax, so a schema
//! can be checked structurally while it is being parsed, in the same
//! tokenizer pass that builds the schema tree.

use crate::walker::{Attr, Walker};
use rngx_model::{Compiler, Grammar, RelaxError, Resources, ValidationError};
use rngx_syntax::parse::{self, EventSink, OpenAttr};
use std::sync::OnceLock;
use url::Url;

/// Adapter running a walker in lockstep with schema parsing.
pub struct WalkerSink {
    pub walker: Walker,
}

impl EventSink for WalkerSink {
    fn enter_context(&mut self) {
        self.walker.enter_context();
    }

    fn define_prefix(&mut self, prefix: &str, uri: &str) {
        self.walker.define_prefix(prefix, uri);
    }

    fn leave_context(&mut self) {
        self.walker.leave_context();
    }

    fn on_open(&mut self, uri: &str, local: &str, attrs: &[OpenAttr<'_>]) {
        let attrs: Vec<Attr<'_>> = attrs
            .iter()
            .map(|a| Attr {
                uri: a.uri,
                local: a.local,
                value: a.value,
            })
            .collect();
        self.walker.start_tag_and_attributes(uri, local, &attrs);
    }

    fn on_text(&mut self, text: &str) {
        self.walker.text(text);
    }

    fn on_close(&mut self, uri: &str, local: &str) {
        self.walker.end_tag(uri, local);
    }
}

struct NoResources;

impl Resources for NoResources {
    fn load(&self, url: &Url) -> Result<String, RelaxError> {
        Err(RelaxError::ResourceLoad {
            url: url.to_string(),
            message: "the schema for schemas is self-contained".to_string(),
        })
    }
}

fn meta_grammar() -> &'static Grammar {
    static META: OnceLock<Grammar> = OnceLock::new();
    META.get_or_init(|| {
        Compiler::new(NoResources)
            .compile_source(
                include_str!("relaxng.rng"),
                &Url::parse("file:///relaxng.rng").unwrap(),
            )
            .expect("the embedded schema for schemas must compile")
    })
}

/// Check a schema document against the schema for schemas while parsing
/// it.  The returned list describes structural problems in the schema;
/// empty means the document is well-shaped RELAX NG.
pub fn validate_schema_xml(src: &str) -> Result<Vec<ValidationError>, RelaxError> {
    let mut sink = WalkerSink {
        walker: Walker::new(meta_grammar())?,
    };
    parse::parse_document_with(src, &mut sink)?;
    Ok(sink.walker.end())
}

/// As [`validate_schema_xml`], surfacing the first finding as a schema
/// structure error.
pub fn check_schema_xml(src: &str) -> Result<(), RelaxError> {
    let errors = validate_schema_xml(src)?;
    match errors.into_iter().next() {
        None => Ok(()),
        Some(first) => Err(RelaxError::SchemaStructure {
            path: first.path,
            message: first.message,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "xmlns=\"http://relaxng.org/ns/structure/1.0\"";

    #[test]
    fn the_embedded_grammar_compiles() {
        assert!(!meta_grammar().defines.is_empty());
    }

    #[test]
    fn accepts_a_plain_schema() {
        let src = format!(
            "<element name=\"doc\" {}>\
               <optional><attribute name=\"id\"/></optional>\
               <zeroOrMore>\
                 <element name=\"item\"><data type=\"token\"/></element>\
               </zeroOrMore>\
             </element>",
            NS
        );
        let errors = validate_schema_xml(&src).unwrap();
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn accepts_a_grammar_schema() {
        let src = format!(
            "<grammar {}>\
               <start><ref name=\"doc\"/></start>\
               <define name=\"doc\">\
                 <element name=\"doc\"><mixed><text/></mixed></element>\
               </define>\
             </grammar>",
            NS
        );
        let errors = validate_schema_xml(&src).unwrap();
        assert!(errors.is_empty(), "{:?}", errors);
    }

    #[test]
    fn flags_unknown_pattern_elements() {
        let src = format!("<element name=\"doc\" {}><bogus/></element>", NS);
        let errors = validate_schema_xml(&src).unwrap();
        assert!(!errors.is_empty());
        assert!(errors[0].message.contains("bogus"), "{:?}", errors);
    }

    #[test]
    fn flags_misplaced_attributes() {
        let src = format!("<element name=\"doc\" type=\"nope\" {}><text/></element>", NS);
        let errors = validate_schema_xml(&src).unwrap();
        assert!(!errors.is_empty(), "type is not an attribute of element");
    }

    #[test]
    fn check_surfaces_a_structure_error() {
        let src = format!("<element name=\"doc\" {}><bogus/></element>", NS);
        match check_schema_xml(&src) {
            Err(RelaxError::SchemaStructure { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
