//! Document validation driven from an [`xmlparser::Tokenizer`].
//!
//! Resolves namespace prefixes and entity references before handing events
//! to the [`Walker`], and remembers token spans so collected errors can be
//! rendered as source diagnostics.

use crate::walker::{Attr, Walker};
use rngx_model::{Grammar, RelaxError, ValidationError};
use rngx_syntax::parse::{builtin_entities, decode_entities};
use rngx_syntax::{XmlError, XML_NAMESPACE_URI};
use std::collections::HashMap;
use std::ops::Range;
use xmlparser::{ElementEnd, EntityDefinition, StrSpan, Token, Tokenizer};

struct PendingAttr {
    prefix: String,
    local: String,
    value: String,
}

struct Pending {
    prefix: String,
    local: String,
    span: Range<usize>,
    attrs: Vec<PendingAttr>,
    namespaces: Vec<(String, String)>,
}

pub struct Validator<'a> {
    walker: Walker,
    tokenizer: Tokenizer<'a>,
    pending: Option<Pending>,
    entities: HashMap<String, String>,
    errors: Vec<ValidationError>,
    spans: Vec<Option<Range<usize>>>,
    last_span: Option<Range<usize>>,
    synced: usize,
}

/// The outcome of a validation run: the ordered error list plus the source
/// spans needed to render diagnostics.
pub struct Report {
    pub errors: Vec<ValidationError>,
    spans: Vec<Option<Range<usize>>>,
}

impl Report {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn diagnostics(
        &self,
        name: String,
        source: String,
    ) -> (codemap::CodeMap, Vec<codemap_diagnostic::Diagnostic>) {
        let mut map = codemap::CodeMap::new();
        let file = map.add_file(name, source);
        let mut diagnostics = Vec::new();
        for (error, span) in self.errors.iter().zip(self.spans.iter()) {
            let spans = match span {
                Some(range) => vec![codemap_diagnostic::SpanLabel {
                    span: file.span.subspan(range.start as u64, range.end as u64),
                    label: Some(error.message.clone()),
                    style: codemap_diagnostic::SpanStyle::Primary,
                }],
                None => Vec::new(),
            };
            diagnostics.push(codemap_diagnostic::Diagnostic {
                level: codemap_diagnostic::Level::Error,
                message: format!("{}: {}", error.path, error.message),
                code: None,
                spans,
            });
        }
        (map, diagnostics)
    }
}

impl<'a> Validator<'a> {
    pub fn new(grammar: &Grammar, tokenizer: Tokenizer<'a>) -> Result<Validator<'a>, RelaxError> {
        Ok(Validator {
            walker: Walker::new(grammar)?,
            tokenizer,
            pending: None,
            entities: builtin_entities(),
            errors: Vec::new(),
            spans: Vec::new(),
            last_span: None,
            synced: 0,
        })
    }

    /// Process the next token.  `None` once the input is exhausted; an
    /// `Err` is a malformed document and ends the run.  Validation errors
    /// are collected, not returned here.
    pub fn validate_next(&mut self) -> Option<Result<(), XmlError>> {
        match self.tokenizer.next() {
            Some(Ok(token)) => Some(self.token(token)),
            Some(Err(e)) => Some(Err(XmlError::Parse(e))),
            None => None,
        }
    }

    /// Drive the whole document and return the report, including the
    /// terminal residual check.
    pub fn run(mut self) -> Result<Report, RelaxError> {
        loop {
            match self.validate_next() {
                Some(Ok(())) => {}
                Some(Err(e)) => return Err(RelaxError::Xml(e)),
                None => return Ok(self.finish()),
            }
        }
    }

    pub fn finish(mut self) -> Report {
        let synced = self.synced;
        let mut errors = self.errors;
        let mut spans = self.spans;
        for e in self.walker.end().into_iter().skip(synced) {
            errors.push(e);
            spans.push(None);
        }
        Report { errors, spans }
    }

    fn span_of(span: StrSpan<'_>) -> Range<usize> {
        span.start()..span.end()
    }

    fn token(&mut self, token: Token<'a>) -> Result<(), XmlError> {
        match token {
            Token::ElementStart {
                prefix,
                local,
                span,
            } => {
                self.pending = Some(Pending {
                    prefix: prefix.as_str().to_string(),
                    local: local.as_str().to_string(),
                    span: Self::span_of(span),
                    attrs: Vec::new(),
                    namespaces: Vec::new(),
                });
            }
            Token::Attribute {
                prefix,
                local,
                value,
                ..
            } => {
                let value = decode_entities(value.as_str(), &self.entities)?;
                let pending = self
                    .pending
                    .as_mut()
                    .expect("attribute token outside a start tag");
                if prefix.as_str() == "xmlns" {
                    pending.namespaces.push((local.as_str().to_string(), value));
                } else if prefix.as_str().is_empty() && local.as_str() == "xmlns" {
                    pending.namespaces.push((String::new(), value));
                } else {
                    pending.attrs.push(PendingAttr {
                        prefix: prefix.as_str().to_string(),
                        local: local.as_str().to_string(),
                        value,
                    });
                }
            }
            Token::ElementEnd { end, span } => match end {
                ElementEnd::Open => {
                    self.open_element(false)?;
                }
                ElementEnd::Empty => {
                    self.open_element(true)?;
                }
                ElementEnd::Close(prefix, local) => {
                    self.last_span = Some(Self::span_of(span));
                    let uri = self.resolve_element_uri(prefix.as_str());
                    self.walker.end_tag(&uri, local.as_str());
                    self.sync();
                    self.walker.leave_context();
                }
            },
            Token::Text { text } => {
                let decoded = decode_entities(text.as_str(), &self.entities)?;
                self.last_span = Some(Self::span_of(text));
                self.walker.text(&decoded);
            }
            Token::Cdata { text, .. } => {
                self.last_span = Some(Self::span_of(text));
                self.walker.text(text.as_str());
            }
            Token::EntityDeclaration {
                name, definition, ..
            } => match definition {
                EntityDefinition::EntityValue(value) => {
                    self.entities
                        .insert(name.as_str().to_string(), value.as_str().to_string());
                }
                EntityDefinition::ExternalId(_) => return Err(XmlError::ExternalEntity),
            },
            // comments and PIs may split text content and must not flush it
            Token::Declaration { .. }
            | Token::Comment { .. }
            | Token::ProcessingInstruction { .. }
            | Token::DtdStart { .. }
            | Token::DtdEnd { .. }
            | Token::EmptyDtd { .. } => {}
        }
        Ok(())
    }

    fn resolve_element_uri(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.walker.resolve("").unwrap_or("").to_string()
        } else {
            self.walker.resolve(prefix).unwrap_or("").to_string()
        }
    }

    fn open_element(&mut self, empty: bool) -> Result<(), XmlError> {
        let pending = self.pending.take().expect("element end without a start");
        self.walker.enter_context();
        for (prefix, uri) in &pending.namespaces {
            self.walker.define_prefix(prefix, uri);
        }
        self.last_span = Some(pending.span.clone());
        let uri = if pending.prefix.is_empty() {
            self.resolve_element_uri("")
        } else {
            match self.walker.resolve(&pending.prefix) {
                Some(uri) => uri.to_string(),
                None => {
                    self.push_driver_error(format!(
                        "the prefix {:?} is not defined",
                        pending.prefix
                    ));
                    String::new()
                }
            }
        };
        let mut resolved: Vec<(String, String, String)> = Vec::new();
        for a in &pending.attrs {
            let attr_uri = if a.prefix.is_empty() {
                String::new()
            } else if a.prefix == "xml" {
                XML_NAMESPACE_URI.to_string()
            } else {
                match self.walker.resolve(&a.prefix) {
                    Some(uri) => uri.to_string(),
                    None => {
                        self.push_driver_error(format!(
                            "the prefix {:?} is not defined",
                            a.prefix
                        ));
                        continue;
                    }
                }
            };
            resolved.push((attr_uri, a.local.clone(), a.value.clone()));
        }
        let attrs: Vec<Attr<'_>> = resolved
            .iter()
            .map(|(uri, local, value)| Attr { uri, local, value })
            .collect();
        self.walker
            .start_tag_and_attributes(&uri, &pending.local, &attrs);
        self.sync();
        if empty {
            self.walker.end_tag(&uri, &pending.local);
            self.sync();
            self.walker.leave_context();
        }
        Ok(())
    }

    fn push_driver_error(&mut self, message: String) {
        self.errors.push(ValidationError {
            path: String::from("/"),
            message,
        });
        self.spans.push(self.last_span.clone());
    }

    /// Copy newly recorded walker errors, attributing the current token span.
    fn sync(&mut self) {
        while self.synced < self.walker.errors().len() {
            self.errors.push(self.walker.errors()[self.synced].clone());
            self.spans.push(self.last_span.clone());
            self.synced += 1;
        }
    }
}
