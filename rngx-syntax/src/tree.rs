//! Mutable XML element tree used to hold a schema during simplification.
//!
//! Nodes live in an arena owned by [`Doc`] and are addressed by copyable
//! [`NodeId`] handles; all mutation goes through `&mut Doc`.  A node has at
//! most one parent: attaching an already-parented node detaches it from its
//! previous parent first, and attaching a node to one of its own descendants
//! is a programming error that fails loudly (checked in debug builds).

use crate::{XmlError, XML_NAMESPACE_URI, XMLNS_NAMESPACE_URI};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub local: String,
    pub uri: String,
    pub value: String,
}

impl Attribute {
    pub fn qname(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Element(Element),
    Text(Text),
}

#[derive(Debug, Clone)]
struct Element {
    local: String,
    prefix: Option<String>,
    uri: String,
    attrs: Vec<Attribute>,
    // prefix ("" for the default namespace) -> URI, declared on this element
    namespaces: Vec<(String, String)>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    path: Option<String>,
}

#[derive(Debug, Clone)]
struct Text {
    value: String,
    parent: Option<NodeId>,
}

/// Arena of XML nodes; one `Doc` per schema document.
#[derive(Debug, Default, Clone)]
pub struct Doc {
    nodes: Vec<Node>,
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.find(':') {
        Some(i) => (Some(&name[..i]), &name[i + 1..]),
        None => (None, name),
    }
}

impl Doc {
    pub fn new() -> Doc {
        Doc::default()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Create a detached element in the RELAX NG namespace.
    pub fn new_element(&mut self, local: &str) -> NodeId {
        self.push(Node::Element(Element {
            local: local.to_string(),
            prefix: None,
            uri: crate::RELAXNG_NS.to_string(),
            attrs: Vec::new(),
            namespaces: Vec::new(),
            children: Vec::new(),
            parent: None,
            path: None,
        }))
    }

    pub fn new_text(&mut self, value: &str) -> NodeId {
        self.push(Node::Text(Text {
            value: value.to_string(),
            parent: None,
        }))
    }

    fn elem(&self, id: NodeId) -> &Element {
        match &self.nodes[id.index()] {
            Node::Element(e) => e,
            Node::Text(_) => panic!("node {:?} is a text node, not an element", id),
        }
    }

    fn elem_mut(&mut self, id: NodeId) -> &mut Element {
        match &mut self.nodes[id.index()] {
            Node::Element(e) => e,
            Node::Text(_) => panic!("node {:?} is a text node, not an element", id),
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.index()], Node::Element(_))
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.index()], Node::Text(_))
    }

    /// Local name of an element node.
    pub fn name(&self, id: NodeId) -> &str {
        &self.elem(id).local
    }

    pub fn set_name(&mut self, id: NodeId, local: &str) {
        self.elem_mut(id).local = local.to_string();
        self.invalidate_paths(id);
    }

    pub fn namespace_uri(&self, id: NodeId) -> &str {
        &self.elem(id).uri
    }

    pub fn prefix(&self, id: NodeId) -> Option<&str> {
        self.elem(id).prefix.as_deref()
    }

    pub(crate) fn set_element_name(&mut self, id: NodeId, uri: &str, prefix: Option<&str>) {
        let e = self.elem_mut(id);
        e.uri = uri.to_string();
        e.prefix = prefix.map(|p| p.to_string());
    }

    /// Value of a text node.
    pub fn text_value(&self, id: NodeId) -> &str {
        match &self.nodes[id.index()] {
            Node::Text(t) => &t.value,
            Node::Element(_) => panic!("node {:?} is an element, not a text node", id),
        }
    }

    pub(crate) fn append_text_value(&mut self, id: NodeId, more: &str) {
        match &mut self.nodes[id.index()] {
            Node::Text(t) => t.value.push_str(more),
            Node::Element(_) => panic!("node {:?} is an element, not a text node", id),
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        match &self.nodes[id.index()] {
            Node::Element(e) => e.parent,
            Node::Text(t) => t.parent,
        }
    }

    fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        match &mut self.nodes[id.index()] {
            Node::Element(e) => e.parent = parent,
            Node::Text(t) => t.parent = parent,
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.elem(id).children
    }

    /// Element children only, in document order.
    pub fn child_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.elem(id)
            .children
            .iter()
            .copied()
            .filter(|&c| self.is_element(c))
            .collect()
    }

    pub fn position(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.elem(parent).children.iter().position(|&c| c == child)
    }

    fn assert_no_cycle(&self, parent: NodeId, child: NodeId) {
        if cfg!(debug_assertions) {
            let mut cur = Some(parent);
            while let Some(id) = cur {
                assert!(
                    id != child,
                    "attaching node {:?} to its own descendant {:?}",
                    child,
                    parent
                );
                cur = self.parent(id);
            }
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, at: Option<usize>) {
        self.assert_no_cycle(parent, child);
        self.detach(child);
        match at {
            Some(i) => self.elem_mut(parent).children.insert(i, child),
            None => self.elem_mut(parent).children.push(child),
        }
        self.set_parent(child, Some(parent));
        self.invalidate_paths(child);
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        self.attach(parent, child, None);
    }

    pub fn append_all(&mut self, parent: NodeId, children: &[NodeId]) {
        for &c in children {
            self.attach(parent, c, None);
        }
    }

    pub fn prepend(&mut self, parent: NodeId, child: NodeId) {
        self.attach(parent, child, Some(0));
    }

    pub fn insert_at(&mut self, parent: NodeId, index: usize, children: &[NodeId]) {
        for (k, &c) in children.iter().enumerate() {
            self.attach(parent, c, Some(index + k));
        }
    }

    /// Remove `child` from `parent`; the node itself stays alive, detached.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        let pos = self
            .position(parent, child)
            .unwrap_or_else(|| panic!("{:?} is not a child of {:?}", child, parent));
        self.elem_mut(parent).children.remove(pos);
        self.set_parent(child, None);
    }

    pub fn remove_child_at(&mut self, parent: NodeId, index: usize) -> NodeId {
        let child = self.elem_mut(parent).children.remove(index);
        self.set_parent(child, None);
        child
    }

    /// Detach a node from its parent, if it has one.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(p) = self.parent(id) {
            let pos = self.position(p, id).expect("child missing from parent list");
            self.elem_mut(p).children.remove(pos);
            self.set_parent(id, None);
        }
    }

    /// Replace `old` with `new` in `old`'s parent; `old` becomes detached.
    pub fn replace_with(&mut self, old: NodeId, new: NodeId) {
        let parent = self
            .parent(old)
            .unwrap_or_else(|| panic!("replace_with: {:?} has no parent", old));
        let pos = self.position(parent, old).expect("child missing from parent list");
        self.detach(old);
        self.attach(parent, new, Some(pos));
    }

    /// Detach and return all children of `parent`.
    pub fn empty(&mut self, parent: NodeId) -> Vec<NodeId> {
        let children = std::mem::take(&mut self.elem_mut(parent).children);
        for &c in &children {
            self.set_parent(c, None);
        }
        children
    }

    /// Deep copy of the subtree at `id`; the copy is detached.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        match &self.nodes[id.index()] {
            Node::Text(t) => {
                let value = t.value.clone();
                self.new_text(&value)
            }
            Node::Element(e) => {
                let shell = Element {
                    local: e.local.clone(),
                    prefix: e.prefix.clone(),
                    uri: e.uri.clone(),
                    attrs: e.attrs.clone(),
                    namespaces: e.namespaces.clone(),
                    children: Vec::new(),
                    parent: None,
                    path: None,
                };
                let kids = e.children.clone();
                let copy = self.push(Node::Element(shell));
                for k in kids {
                    let c = self.clone_subtree(k);
                    self.attach(copy, c, None);
                }
                copy
            }
        }
    }

    /// Deep copy of a subtree from another document into this one.
    pub fn graft(&mut self, other: &Doc, id: NodeId) -> NodeId {
        match &other.nodes[id.index()] {
            Node::Text(t) => self.new_text(&t.value),
            Node::Element(e) => {
                let shell = Element {
                    local: e.local.clone(),
                    prefix: e.prefix.clone(),
                    uri: e.uri.clone(),
                    attrs: e.attrs.clone(),
                    namespaces: e.namespaces.clone(),
                    children: Vec::new(),
                    parent: None,
                    path: None,
                };
                let copy = self.push(Node::Element(shell));
                for &k in &e.children {
                    let c = self.graft(other, k);
                    self.attach(copy, c, None);
                }
                copy
            }
        }
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        &self.elem(id).attrs
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        let (prefix, local) = split_qname(name);
        self.elem(id)
            .attrs
            .iter()
            .find(|a| a.local == local && a.prefix.as_deref() == prefix)
            .map(|a| a.value.as_str())
    }

    pub fn must_attribute(&self, id: NodeId, name: &str) -> Result<&str, XmlError> {
        match self.attribute(id, name) {
            Some(v) => Ok(v),
            None => Err(XmlError::MissingAttribute {
                path: self.path_of(id),
                name: name.to_string(),
            }),
        }
    }

    /// Set an unqualified attribute, replacing any existing value.
    /// Qualified names are rejected; namespace declarations go through
    /// [`Doc::set_xmlns`] instead.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), XmlError> {
        if name.contains(':') {
            return Err(XmlError::InvalidAttributeName {
                name: name.to_string(),
            });
        }
        let e = self.elem_mut(id);
        match e
            .attrs
            .iter_mut()
            .find(|a| a.local == name && a.prefix.is_none())
        {
            Some(a) => a.value = value.to_string(),
            None => e.attrs.push(Attribute {
                prefix: None,
                local: name.to_string(),
                uri: String::new(),
                value: value.to_string(),
            }),
        }
        if name == "name" {
            self.invalidate_paths(id);
        }
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Option<String> {
        let (prefix, local) = split_qname(name);
        let e = self.elem_mut(id);
        let pos = e
            .attrs
            .iter()
            .position(|a| a.local == local && a.prefix.as_deref() == prefix)?;
        let removed = e.attrs.remove(pos).value;
        if name == "name" {
            self.invalidate_paths(id);
        }
        Some(removed)
    }

    pub(crate) fn push_attribute(&mut self, id: NodeId, attr: Attribute) {
        self.elem_mut(id).attrs.push(attr);
    }

    /// Declare the default namespace on this element.
    pub fn set_xmlns(&mut self, id: NodeId, uri: &str) {
        self.declare_namespace(id, "", uri);
    }

    pub fn declare_namespace(&mut self, id: NodeId, prefix: &str, uri: &str) {
        let e = self.elem_mut(id);
        match e.namespaces.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, u)) => *u = uri.to_string(),
            None => e.namespaces.push((prefix.to_string(), uri.to_string())),
        }
    }

    pub fn namespace_declarations(&self, id: NodeId) -> &[(String, String)] {
        &self.elem(id).namespaces
    }

    /// Resolve a namespace prefix by walking the parent chain.  The `xml`
    /// and `xmlns` prefixes are reserved and always resolve.
    pub fn resolve(&self, id: NodeId, prefix: &str) -> Option<&str> {
        match prefix {
            "xml" => return Some(XML_NAMESPACE_URI),
            "xmlns" => return Some(XMLNS_NAMESPACE_URI),
            _ => {}
        }
        let mut cur = Some(id);
        while let Some(n) = cur {
            if let Node::Element(e) = &self.nodes[n.index()] {
                if let Some((_, uri)) = e.namespaces.iter().find(|(p, _)| p == prefix) {
                    return Some(uri);
                }
            }
            cur = self.parent(n);
        }
        None
    }

    /// Concatenation of all descendant text.
    pub fn text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.gather_text(id, &mut out);
        out
    }

    fn gather_text(&self, id: NodeId, out: &mut String) {
        match &self.nodes[id.index()] {
            Node::Text(t) => out.push_str(&t.value),
            Node::Element(e) => {
                for &c in &e.children {
                    self.gather_text(c, out);
                }
            }
        }
    }

    fn name_hint(&self, id: NodeId) -> Option<String> {
        if let Some(v) = self.attribute(id, "name") {
            return Some(v.trim().to_string());
        }
        for &c in &self.elem(id).children {
            if self.is_element(c) && self.elem(c).local == "name" {
                return Some(self.text(c).trim().to_string());
            }
        }
        None
    }

    fn path_segment(&self, id: NodeId) -> String {
        let mut s = String::from("/");
        s.push_str(&self.elem(id).local);
        if let Some(name) = self.name_hint(id) {
            s.push_str("[@name='");
            s.push_str(&name);
            s.push_str("']");
        }
        s
    }

    /// Path string of an element, e.g. `/grammar/define[@name='x']/element`,
    /// computed without touching the cache.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut s = match self.parent(id) {
            Some(p) if self.is_element(p) => self.path_of(p),
            _ => String::new(),
        };
        s.push_str(&self.path_segment(id));
        s
    }

    /// Lazily computed path string; the cache is dropped for the whole
    /// subtree whenever a node is reparented or renamed.
    pub fn path(&mut self, id: NodeId) -> String {
        if let Some(p) = &self.elem(id).path {
            return p.clone();
        }
        let parent_path = match self.parent(id) {
            Some(p) if self.is_element(p) => self.path(p),
            _ => String::new(),
        };
        let s = parent_path + &self.path_segment(id);
        self.elem_mut(id).path = Some(s.clone());
        s
    }

    fn invalidate_paths(&mut self, id: NodeId) {
        if let Node::Element(e) = &mut self.nodes[id.index()] {
            e.path = None;
            let kids = e.children.clone();
            for k in kids {
                self.invalidate_paths(k);
            }
        }
    }

    /// Structural equality of two subtrees: element names and namespace
    /// URIs, attribute sets (order-insensitive) and text, ignoring prefixes
    /// and namespace declarations.
    pub fn subtree_equal(&self, a: NodeId, other: &Doc, b: NodeId) -> bool {
        match (&self.nodes[a.index()], &other.nodes[b.index()]) {
            (Node::Text(ta), Node::Text(tb)) => ta.value == tb.value,
            (Node::Element(ea), Node::Element(eb)) => {
                if ea.local != eb.local || ea.uri != eb.uri {
                    return false;
                }
                if ea.attrs.len() != eb.attrs.len() {
                    return false;
                }
                for attr in &ea.attrs {
                    let matched = eb.attrs.iter().any(|o| {
                        o.local == attr.local && o.uri == attr.uri && o.value == attr.value
                    });
                    if !matched {
                        return false;
                    }
                }
                ea.children.len() == eb.children.len()
                    && ea
                        .children
                        .iter()
                        .zip(eb.children.iter())
                        .all(|(&ca, &cb)| self.subtree_equal(ca, other, cb))
            }
            _ => false,
        }
    }

    #[cfg(test)]
    fn cached_path(&self, id: NodeId) -> Option<&str> {
        self.elem(id).path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn sample(doc: &mut Doc) -> (NodeId, NodeId, NodeId) {
        let grammar = doc.new_element("grammar");
        let define = doc.new_element("define");
        doc.set_attribute(define, "name", "x").unwrap();
        let element = doc.new_element("element");
        doc.append(grammar, define);
        doc.append(define, element);
        (grammar, define, element)
    }

    #[test]
    fn reparenting_detaches_first() {
        let mut doc = Doc::new();
        let (grammar, define, element) = sample(&mut doc);
        let other = doc.new_element("start");
        doc.append(grammar, other);
        doc.append(other, element);
        assert_eq!(doc.children(define), &[] as &[NodeId]);
        assert_eq!(doc.parent(element), Some(other));
        assert_eq!(doc.children(other), &[element]);
        assert_eq!(doc.parent(define), Some(grammar));
    }

    #[test]
    #[should_panic(expected = "descendant")]
    fn cyclic_parenting_fails() {
        let mut doc = Doc::new();
        let (grammar, define, _) = sample(&mut doc);
        doc.append(define, grammar);
    }

    #[test]
    fn path_includes_name_predicate() {
        let mut doc = Doc::new();
        let (_, _, element) = sample(&mut doc);
        assert_eq!(doc.path(element), "/grammar/define[@name='x']/element");
    }

    #[test]
    fn path_predicate_from_name_child() {
        let mut doc = Doc::new();
        let element = doc.new_element("element");
        let name = doc.new_element("name");
        let text = doc.new_text("foo");
        doc.append(name, text);
        doc.append(element, name);
        assert_eq!(doc.path(element), "/element[@name='foo']");
    }

    #[test]
    fn path_recomputed_after_reparent() {
        let mut doc = Doc::new();
        let (grammar, define, element) = sample(&mut doc);
        assert_eq!(doc.path(element), "/grammar/define[@name='x']/element");
        // no-op reparent: same parent, same position
        doc.append(define, element);
        assert_eq!(doc.path(element), "/grammar/define[@name='x']/element");
        let start = doc.new_element("start");
        doc.append(grammar, start);
        doc.append(start, element);
        assert!(doc.cached_path(element).is_none());
        assert_eq!(doc.path(element), "/grammar/start/element");
    }

    #[test]
    fn resolve_walks_parent_chain() {
        let mut doc = Doc::new();
        let (grammar, define, element) = sample(&mut doc);
        doc.declare_namespace(grammar, "a", "urn:outer");
        doc.declare_namespace(define, "a", "urn:inner");
        assert_eq!(doc.resolve(element, "a"), Some("urn:inner"));
        assert_eq!(doc.resolve(grammar, "a"), Some("urn:outer"));
        assert_eq!(doc.resolve(element, "xml"), Some(XML_NAMESPACE_URI));
        assert_eq!(doc.resolve(element, "nope"), None);
    }

    #[test]
    fn set_attribute_rejects_qualified_names() {
        let mut doc = Doc::new();
        let e = doc.new_element("element");
        assert_matches!(
            doc.set_attribute(e, "xml:base", "x"),
            Err(XmlError::InvalidAttributeName { .. })
        );
    }

    #[test]
    fn must_attribute_reports_path() {
        let mut doc = Doc::new();
        let (_, _, element) = sample(&mut doc);
        match doc.must_attribute(element, "href") {
            Err(XmlError::MissingAttribute { path, name }) => {
                assert_eq!(path, "/grammar/define[@name='x']/element");
                assert_eq!(name, "href");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn descendant_text_concatenates() {
        let mut doc = Doc::new();
        let value = doc.new_element("value");
        let a = doc.new_text("foo ");
        let inner = doc.new_element("name");
        let b = doc.new_text("bar");
        doc.append(value, a);
        doc.append(value, inner);
        doc.append(inner, b);
        assert_eq!(doc.text(value), "foo bar");
    }

    #[test]
    fn clone_subtree_is_independent() {
        let mut doc = Doc::new();
        let (_, define, _) = sample(&mut doc);
        let copy = doc.clone_subtree(define);
        assert_eq!(doc.parent(copy), None);
        doc.set_attribute(copy, "name", "y").unwrap();
        assert_eq!(doc.attribute(define, "name"), Some("x"));
        assert_eq!(doc.attribute(copy, "name"), Some("y"));
        assert_eq!(doc.children(copy).len(), 1);
    }

    #[test]
    fn replace_with_keeps_position() {
        let mut doc = Doc::new();
        let parent = doc.new_element("group");
        let a = doc.new_element("empty");
        let b = doc.new_element("text");
        let c = doc.new_element("notAllowed");
        doc.append_all(parent, &[a, b, c]);
        let r = doc.new_element("ref");
        doc.replace_with(b, r);
        assert_eq!(doc.children(parent), &[a, r, c]);
        assert_eq!(doc.parent(b), None);
    }

    #[test]
    fn empty_detaches_all_children() {
        let mut doc = Doc::new();
        let (grammar, define, _) = sample(&mut doc);
        let removed = doc.empty(grammar);
        assert_eq!(removed, vec![define]);
        assert_eq!(doc.parent(define), None);
    }
}
