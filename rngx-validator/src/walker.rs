//! Streaming validation walker.
//!
//! A walker is created from a compiled [`Grammar`] and fed start/text/end
//! events; namespace contexts are tracked on the walker's own stack,
//! independent of anything the schema trees do.  Text accumulates across
//! events and is delivered to the derivative at the next structural
//! boundary, because datatypes need the full lexical value.
//!
//! Validation errors do not stop the walker: when a derivative comes back
//! notAllowed, the error is recorded and the walk continues from the best
//! known residual, so a single document yields as many diagnostics as
//! possible.  Callers wanting fail-fast behaviour stop at the first entry
//! of [`Walker::errors`].

use crate::engine::{Engine, PatId};
use fnv::FnvHashSet;
use rngx_model::datatype::Namespaces;
use rngx_model::{Grammar, RelaxError, ValidationError};
use std::collections::HashMap;

/// An attribute event: namespace URI, local name and value.
#[derive(Copy, Clone, Debug)]
pub struct Attr<'a> {
    pub uri: &'a str,
    pub local: &'a str,
    pub value: &'a str,
}

struct OpenElement {
    local: String,
    had_content: bool,
}

pub struct Walker {
    engine: Engine,
    current: PatId,
    context: Vec<HashMap<String, String>>,
    open: Vec<OpenElement>,
    text_buffer: String,
    /// Depth of an element rejected at its start tag; its whole subtree is
    /// skipped so one bad element produces one error, not a cascade.
    ignore_depth: usize,
    errors: Vec<ValidationError>,
}

struct ContextView<'a>(&'a [HashMap<String, String>]);

impl<'a> Namespaces for ContextView<'a> {
    fn resolve(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(rngx_syntax::XML_NAMESPACE_URI);
        }
        self.0
            .iter()
            .rev()
            .find_map(|frame| frame.get(prefix))
            .map(String::as_str)
    }
}

impl Walker {
    pub fn new(grammar: &Grammar) -> Result<Walker, RelaxError> {
        let engine = Engine::compile(grammar)?;
        let current = engine.start();
        Ok(Walker {
            engine,
            current,
            context: Vec::new(),
            open: Vec::new(),
            text_buffer: String::new(),
            ignore_depth: 0,
            errors: Vec::new(),
        })
    }

    pub fn enter_context(&mut self) {
        self.context.push(HashMap::new());
    }

    pub fn define_prefix(&mut self, prefix: &str, uri: &str) {
        match self.context.last_mut() {
            Some(frame) => {
                frame.insert(prefix.to_string(), uri.to_string());
            }
            None => {
                self.context.push(
                    std::iter::once((prefix.to_string(), uri.to_string())).collect(),
                );
            }
        }
    }

    pub fn leave_context(&mut self) {
        self.context.pop();
    }

    /// Resolve a prefix against the walker's namespace context stack.
    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(rngx_syntax::XML_NAMESPACE_URI);
        }
        self.context
            .iter()
            .rev()
            .find_map(|frame| frame.get(prefix))
            .map(String::as_str)
    }

    /// Errors recorded so far; grows as events are fed.
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn start_tag_and_attributes(&mut self, uri: &str, local: &str, attrs: &[Attr<'_>]) {
        if self.ignore_depth > 0 {
            self.ignore_depth += 1;
            return;
        }
        self.flush_text();
        if let Some(top) = self.open.last_mut() {
            top.had_content = true;
        }
        self.open.push(OpenElement {
            local: local.to_string(),
            had_content: false,
        });

        let after_open = self.engine.start_tag_open_deriv(self.current, uri, local);
        if self.engine.is_not_allowed(after_open) {
            let expected = self.engine.describe_expected(self.current);
            self.push_error(if expected.is_empty() {
                format!("unexpected start tag {:?}", local)
            } else {
                format!("unexpected start tag {:?}; expected {}", local, expected)
            });
            self.open.pop();
            self.ignore_depth = 1;
            return;
        }

        let mut residual = after_open;
        let mut seen: FnvHashSet<(String, String)> = FnvHashSet::default();
        for a in attrs {
            if !seen.insert((a.uri.to_string(), a.local.to_string())) {
                self.push_error(format!("duplicate attribute {:?}", a.local));
                continue;
            }
            let ctx = ContextView(&self.context);
            let next = self
                .engine
                .att_deriv(residual, a.uri, a.local, a.value, &ctx);
            if self.engine.is_not_allowed(next) {
                self.push_error(format!(
                    "invalid or unexpected attribute {:?} (value {:?})",
                    a.local, a.value
                ));
            } else {
                residual = next;
            }
        }

        let closed = self.engine.start_tag_close_deriv(residual);
        if self.engine.is_not_allowed(closed) {
            let expected = self.engine.describe_expected(residual);
            self.push_error(if expected.is_empty() {
                format!("element {:?} is missing required attributes", local)
            } else {
                format!(
                    "element {:?} is missing required attributes; expected {}",
                    local, expected
                )
            });
            self.current = self.engine.start_tag_close_forced(residual);
        } else {
            self.current = closed;
        }
    }

    pub fn text(&mut self, chars: &str) {
        if self.ignore_depth > 0 {
            return;
        }
        self.text_buffer.push_str(chars);
    }

    pub fn end_tag(&mut self, _uri: &str, local: &str) {
        if self.ignore_depth > 0 {
            self.ignore_depth -= 1;
            return;
        }
        let had_content = self.open.last().map(|o| o.had_content).unwrap_or(true);
        if !had_content && self.text_buffer.is_empty() {
            // empty content validates like a text node holding ""
            let ctx = ContextView(&self.context);
            let next = self.engine.text_deriv(self.current, "", &ctx);
            if !self.engine.is_not_allowed(next) {
                self.current = next;
            }
        } else {
            self.flush_text();
        }

        let next = self.engine.end_tag_deriv(self.current);
        if self.engine.is_not_allowed(next) {
            let expected = self.engine.describe_expected(self.current);
            self.push_error(if expected.is_empty() {
                format!("element {:?} is incomplete", local)
            } else {
                format!("element {:?} is incomplete; expected {}", local, expected)
            });
            let forced = self.engine.force_end(self.current);
            if !self.engine.is_not_allowed(forced) {
                self.current = forced;
            }
        } else {
            self.current = next;
        }
        self.open.pop();
    }

    /// Terminal check: flushes pending text and verifies the residual is
    /// nullable, returning every error collected during the walk.
    pub fn end(mut self) -> Vec<ValidationError> {
        self.flush_text();
        if !self.open.is_empty() {
            self.push_error("unexpected end of document".to_string());
        } else if !self.engine.nullable(self.current) {
            let expected = self.engine.describe_expected(self.current);
            self.push_error(if expected.is_empty() {
                "document does not satisfy the schema".to_string()
            } else {
                format!("document is incomplete; expected {}", expected)
            });
        }
        self.errors
    }

    fn flush_text(&mut self) {
        if self.text_buffer.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text_buffer);
        if let Some(top) = self.open.last_mut() {
            top.had_content = true;
        }
        let ctx = ContextView(&self.context);
        let next = self.engine.text_deriv(self.current, &text, &ctx);
        if self.engine.is_not_allowed(next) {
            let trimmed = text.trim();
            self.push_error(if trimmed.is_empty() {
                "text not allowed here".to_string()
            } else {
                format!("invalid character data {:?}", trimmed)
            });
        } else {
            self.current = next;
        }
    }

    fn push_error(&mut self, message: String) {
        let mut path = String::new();
        for o in &self.open {
            path.push('/');
            path.push_str(&o.local);
        }
        if path.is_empty() {
            path.push('/');
        }
        log::debug!("validation error at {}: {}", path, message);
        self.errors.push(ValidationError { path, message });
    }
}
