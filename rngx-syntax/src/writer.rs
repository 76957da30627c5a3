//! Serialisation of schema trees back to XML text, for `--simplify-only`
//! output and intermediate-step dumps.

use crate::tree::{Doc, NodeId};
use crate::RELAXNG_NS;

pub fn write_xml(doc: &Doc, root: NodeId) -> String {
    let mut out = String::new();
    // rewrite steps create elements without namespace declarations of their
    // own, so make sure the default namespace is bound at the root
    let needs_decl = doc.prefix(root).is_none()
        && !doc
            .namespace_declarations(root)
            .iter()
            .any(|(p, _)| p.is_empty());
    write_node(doc, root, needs_decl, &mut out);
    out
}

fn write_node(doc: &Doc, id: NodeId, force_default_ns: bool, out: &mut String) {
    if doc.is_text(id) {
        out.push_str(&escape_text(doc.text_value(id)));
        return;
    }
    let name = qname(doc, id);
    out.push('<');
    out.push_str(&name);
    if force_default_ns {
        out.push_str(" xmlns=\"");
        out.push_str(RELAXNG_NS);
        out.push('"');
    }
    for (prefix, uri) in doc.namespace_declarations(id) {
        if prefix.is_empty() {
            if !force_default_ns {
                out.push_str(" xmlns=\"");
                out.push_str(&escape_attr(uri));
                out.push('"');
            }
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
            out.push_str(&escape_attr(uri));
            out.push('"');
        }
    }
    for attr in doc.attributes(id) {
        out.push(' ');
        out.push_str(&attr.qname());
        out.push_str("=\"");
        out.push_str(&escape_attr(&attr.value));
        out.push('"');
    }
    if doc.children(id).is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for &c in doc.children(id) {
        write_node(doc, c, false, out);
    }
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
}

fn qname(doc: &Doc, id: NodeId) -> String {
    match doc.prefix(id) {
        Some(p) => format!("{}:{}", p, doc.name(id)),
        None => doc.name(id).to_string(),
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}
