//! Event-driven loader building a [`Doc`] tree from RELAX NG schema text.
//!
//! Elements outside the RELAX NG namespace are rejected outright.  A caller
//! may supply an [`EventSink`] to observe the resolved event stream while the
//! tree is built, which lets a validating walker check the schema against the
//! schema-for-schemas in the same tokenizer pass.

use crate::tree::{Attribute, Doc, NodeId};
use crate::{is_whitespace_str, XmlError, RELAXNG_NS, XML_NAMESPACE_URI};
use std::collections::HashMap;
use xmlparser::{ElementEnd, EntityDefinition, Token, Tokenizer};

/// An attribute as delivered to an [`EventSink`], with its namespace URI
/// already resolved.
pub struct OpenAttr<'a> {
    pub uri: &'a str,
    pub local: &'a str,
    pub value: &'a str,
}

/// Listener interface for the loader's resolved XML event stream.
///
/// All methods default to no-ops so implementations override only what they
/// need.  Context methods bracket each element's namespace declarations.
pub trait EventSink {
    fn enter_context(&mut self) {}
    fn define_prefix(&mut self, _prefix: &str, _uri: &str) {}
    fn leave_context(&mut self) {}
    fn on_open(&mut self, _uri: &str, _local: &str, _attrs: &[OpenAttr<'_>]) {}
    fn on_text(&mut self, _text: &str) {}
    fn on_close(&mut self, _uri: &str, _local: &str) {}
}

/// Parse a schema document into a tree, returning the document and its root.
pub fn parse_document(src: &str) -> Result<(Doc, NodeId), XmlError> {
    run(src, None)
}

/// As [`parse_document`], additionally reporting each resolved event to
/// `sink` as the tree is built.
pub fn parse_document_with(
    src: &str,
    sink: &mut dyn EventSink,
) -> Result<(Doc, NodeId), XmlError> {
    run(src, Some(sink))
}

/// Lightweight scan answering "does this document contain `<include>` or
/// `<externalRef>`?"  Tokenization stops at the first such start tag.
pub fn scan_for_composition(src: &str) -> Result<bool, XmlError> {
    for token in Tokenizer::from(src) {
        if let Token::ElementStart { local, .. } = token? {
            if local.as_str() == "include" || local.as_str() == "externalRef" {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

struct PendingAttr {
    prefix: String,
    local: String,
    value: String,
}

struct Pending {
    prefix: String,
    local: String,
    attrs: Vec<PendingAttr>,
    namespaces: Vec<(String, String)>,
}

struct TreeBuilder<'s> {
    doc: Doc,
    stack: Vec<NodeId>,
    root: Option<NodeId>,
    text: String,
    pending: Option<Pending>,
    entities: HashMap<String, String>,
    sink: Option<&'s mut dyn EventSink>,
}

fn run(src: &str, sink: Option<&mut dyn EventSink>) -> Result<(Doc, NodeId), XmlError> {
    let mut builder = TreeBuilder {
        doc: Doc::new(),
        stack: Vec::new(),
        root: None,
        text: String::new(),
        pending: None,
        entities: builtin_entities(),
        sink,
    };
    for token in Tokenizer::from(src) {
        builder.token(token?)?;
    }
    if !builder.stack.is_empty() {
        return Err(XmlError::Truncated);
    }
    match builder.root {
        Some(root) => Ok((builder.doc, root)),
        None => Err(XmlError::NoRootElement),
    }
}

impl<'s> TreeBuilder<'s> {
    fn token(&mut self, token: Token<'_>) -> Result<(), XmlError> {
        match token {
            Token::ElementStart { prefix, local, .. } => {
                self.flush_text();
                self.pending = Some(Pending {
                    prefix: prefix.as_str().to_string(),
                    local: local.as_str().to_string(),
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
            Token::ElementEnd { end, .. } => match end {
                ElementEnd::Open => {
                    self.open_element()?;
                }
                ElementEnd::Empty => {
                    let id = self.open_element()?;
                    self.close_element(id);
                }
                ElementEnd::Close(_, local) => {
                    self.flush_text();
                    let id = self.stack.last().copied().ok_or_else(|| {
                        XmlError::UnexpectedClose {
                            local: local.as_str().to_string(),
                        }
                    })?;
                    if self.doc.name(id) != local.as_str() {
                        return Err(XmlError::UnexpectedClose {
                            local: local.as_str().to_string(),
                        });
                    }
                    self.close_element(id);
                }
            },
            Token::Text { text } => {
                let decoded = decode_entities(text.as_str(), &self.entities)?;
                self.text.push_str(&decoded);
            }
            Token::Cdata { text, .. } => {
                self.text.push_str(text.as_str());
            }
            Token::EntityDeclaration {
                name, definition, ..
            } => match definition {
                EntityDefinition::EntityValue(value) => {
                    log::trace!("entity declaration {:?} = {:?}", name.as_str(), value.as_str());
                    self.entities
                        .insert(name.as_str().to_string(), value.as_str().to_string());
                }
                EntityDefinition::ExternalId(_) => return Err(XmlError::ExternalEntity),
            },
            // comments and PIs may appear within text content and must not
            // split a text node, so they don't flush the buffer
            Token::Declaration { .. }
            | Token::Comment { .. }
            | Token::ProcessingInstruction { .. }
            | Token::DtdStart { .. }
            | Token::DtdEnd { .. }
            | Token::EmptyDtd { .. } => {}
        }
        Ok(())
    }

    fn open_element(&mut self) -> Result<NodeId, XmlError> {
        let pending = self.pending.take().expect("element end without a start");
        let id = self.doc.new_element(&pending.local);
        for (prefix, uri) in &pending.namespaces {
            self.doc.declare_namespace(id, prefix, uri);
        }
        match self.stack.last().copied() {
            Some(parent) => self.doc.append(parent, id),
            None => self.root = Some(id),
        }
        let uri = if pending.prefix.is_empty() {
            self.doc.resolve(id, "").unwrap_or("").to_string()
        } else {
            self.doc
                .resolve(id, &pending.prefix)
                .ok_or_else(|| XmlError::UndefinedPrefix {
                    prefix: pending.prefix.clone(),
                })?
                .to_string()
        };
        let prefix = if pending.prefix.is_empty() {
            None
        } else {
            Some(pending.prefix.as_str())
        };
        self.doc.set_element_name(id, &uri, prefix);
        if uri != RELAXNG_NS {
            return Err(XmlError::ForeignElement {
                uri,
                local: pending.local,
                path: self.doc.path_of(id),
            });
        }
        let mut resolved = Vec::with_capacity(pending.attrs.len());
        for a in &pending.attrs {
            let attr_uri = if a.prefix.is_empty() {
                // unprefixed attributes are in no namespace
                String::new()
            } else if a.prefix == "xml" {
                XML_NAMESPACE_URI.to_string()
            } else {
                self.doc
                    .resolve(id, &a.prefix)
                    .ok_or_else(|| XmlError::UndefinedPrefix {
                        prefix: a.prefix.clone(),
                    })?
                    .to_string()
            };
            resolved.push(Attribute {
                prefix: if a.prefix.is_empty() {
                    None
                } else {
                    Some(a.prefix.clone())
                },
                local: a.local.clone(),
                uri: attr_uri,
                value: a.value.clone(),
            });
        }
        for attr in &resolved {
            self.doc.push_attribute(id, attr.clone());
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.enter_context();
            for (prefix, ns_uri) in &pending.namespaces {
                sink.define_prefix(prefix, ns_uri);
            }
            let attrs: Vec<OpenAttr<'_>> = resolved
                .iter()
                .map(|a| OpenAttr {
                    uri: &a.uri,
                    local: &a.local,
                    value: &a.value,
                })
                .collect();
            sink.on_open(&uri, &pending.local, &attrs);
        }
        self.stack.push(id);
        Ok(id)
    }

    fn close_element(&mut self, id: NodeId) {
        let popped = self.stack.pop();
        debug_assert_eq!(popped, Some(id));
        let uri = self.doc.namespace_uri(id).to_string();
        let local = self.doc.name(id).to_string();
        if let Some(sink) = self.sink.as_mut() {
            sink.on_close(&uri, &local);
            sink.leave_context();
        }
    }

    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        let parent = match self.stack.last().copied() {
            Some(p) => p,
            // whitespace in the prolog or epilogue
            None => return,
        };
        // whitespace-only text is significant only inside param and value
        let keep = matches!(self.doc.name(parent), "param" | "value");
        if !keep && is_whitespace_str(&text) {
            return;
        }
        let t = self.doc.new_text(&text);
        self.doc.append(parent, t);
        if let Some(sink) = self.sink.as_mut() {
            sink.on_text(&text);
        }
    }
}

/// The five predefined XML entities, as a starting definition map for
/// [`decode_entities`].
pub fn builtin_entities() -> HashMap<String, String> {
    let mut entities = HashMap::new();
    entities.insert("lt".to_string(), "<".to_string());
    entities.insert("gt".to_string(), ">".to_string());
    entities.insert("amp".to_string(), "&".to_string());
    entities.insert("apos".to_string(), "'".to_string());
    entities.insert("quot".to_string(), "\"".to_string());
    entities
}

/// Decode entity and character references against `defs`.
pub fn decode_entities(text: &str, defs: &HashMap<String, String>) -> Result<String, XmlError> {
    if !text.contains('&') {
        return Ok(text.to_string());
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        rest = &rest[i + 1..];
        let end = rest.find(';').ok_or(XmlError::InvalidEntity)?;
        let name = &rest[..end];
        if let Some(num) = name.strip_prefix('#') {
            let code = if let Some(hex) = num.strip_prefix('x') {
                u32::from_str_radix(hex, 16).map_err(|_| XmlError::InvalidEntity)?
            } else {
                num.parse::<u32>().map_err(|_| XmlError::InvalidEntity)?
            };
            out.push(std::char::from_u32(code).ok_or(XmlError::InvalidEntity)?);
        } else {
            match defs.get(name) {
                Some(replacement) => out.push_str(replacement),
                None => {
                    return Err(XmlError::UndefinedEntity {
                        name: name.to_string(),
                    })
                }
            }
        }
        rest = &rest[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const NS_DECL: &str = "xmlns=\"http://relaxng.org/ns/structure/1.0\"";

    #[test]
    fn builds_tree() {
        let src = format!(
            "<element name=\"a\" {}>\n  <choice><text/><empty/></choice>\n</element>",
            NS_DECL
        );
        let (doc, root) = parse_document(&src).unwrap();
        assert_eq!(doc.name(root), "element");
        assert_eq!(doc.attribute(root, "name"), Some("a"));
        let kids = doc.child_elements(root);
        assert_eq!(kids.len(), 1);
        assert_eq!(doc.name(kids[0]), "choice");
        assert_eq!(doc.child_elements(kids[0]).len(), 2);
    }

    #[test]
    fn rejects_foreign_elements() {
        let src = "<element xmlns=\"urn:not-relaxng\"/>";
        assert_matches!(
            parse_document(src),
            Err(XmlError::ForeignElement { .. })
        );
    }

    #[test]
    fn rejects_undefined_prefix() {
        let src = "<rng:element/>";
        assert_matches!(
            parse_document(src),
            Err(XmlError::UndefinedPrefix { .. })
        );
    }

    #[test]
    fn strips_inter_element_whitespace() {
        let src = format!("<choice {}>\n  <text/>\n  <empty/>\n</choice>", NS_DECL);
        let (doc, root) = parse_document(&src).unwrap();
        assert_eq!(doc.children(root).len(), 2);
    }

    #[test]
    fn keeps_whitespace_in_value() {
        let src = format!("<value {}> </value>", NS_DECL);
        let (doc, root) = parse_document(&src).unwrap();
        assert_eq!(doc.text(root), " ");
    }

    #[test]
    fn keeps_whitespace_in_param() {
        let src = format!(
            "<data type=\"string\" {}><param name=\"pattern\">a b</param></data>",
            NS_DECL
        );
        let (doc, root) = parse_document(&src).unwrap();
        let param = doc.child_elements(root)[0];
        assert_eq!(doc.text(param), "a b");
    }

    #[test]
    fn decodes_entities_in_text_and_attributes() {
        let src = format!(
            "<value {} ns=\"urn:a&amp;b\">x &lt; &#121;</value>",
            NS_DECL
        );
        let (doc, root) = parse_document(&src).unwrap();
        assert_eq!(doc.attribute(root, "ns"), Some("urn:a&b"));
        assert_eq!(doc.text(root), "x < y");
    }

    #[test]
    fn undefined_entity_is_an_error() {
        let src = format!("<value {}>&nope;</value>", NS_DECL);
        assert_matches!(
            parse_document(&src),
            Err(XmlError::UndefinedEntity { .. })
        );
    }

    #[test]
    fn scan_detects_include() {
        let src = format!("<grammar {}><include href=\"x.rng\"/></grammar>", NS_DECL);
        assert!(scan_for_composition(&src).unwrap());
        let src = format!("<grammar {}><start><text/></start></grammar>", NS_DECL);
        assert!(!scan_for_composition(&src).unwrap());
    }

    #[test]
    fn sink_sees_resolved_events() {
        #[derive(Default)]
        struct Recorder(Vec<String>);
        impl EventSink for Recorder {
            fn on_open(&mut self, uri: &str, local: &str, attrs: &[OpenAttr<'_>]) {
                self.0.push(format!("open {}|{} ({})", uri, local, attrs.len()));
            }
            fn on_text(&mut self, text: &str) {
                self.0.push(format!("text {:?}", text));
            }
            fn on_close(&mut self, _uri: &str, local: &str) {
                self.0.push(format!("close {}", local));
            }
        }
        let src = format!("<value {} type=\"token\">ok</value>", NS_DECL);
        let mut rec = Recorder::default();
        parse_document_with(&src, &mut rec).unwrap();
        assert_eq!(
            rec.0,
            vec![
                format!("open {}|value (1)", RELAXNG_NS),
                "text \"ok\"".to_string(),
                "close value".to_string(),
            ]
        );
    }
}
