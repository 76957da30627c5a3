//! Schema simplification.
//!
//! Rewrites a parsed schema tree into the simplified form, as an ordered
//! sequence of passes: attribute normalisation and `xml:base` folding,
//! `datatypeLibrary`/`ns` propagation, `externalRef`/`include` inlining,
//! name-class normalisation, QName splitting, `div` flattening, binary
//! normalisation of the n-ary combinators, the `mixed`/`optional`/
//! `zeroOrMore` expansions, `notAllowed`/`empty` propagation, grammar
//! unification and finally one definition per element.
//!
//! Each step depends only on the steps before it, and the whole sequence is
//! idempotent.  The `limit` argument stops the pipeline after a given step,
//! which is useful when debugging a rewrite.
//!
//! Reference: <https://relaxng.org/spec-20011203.html#simplification>

use crate::{structure_error, RelaxError, Resources};
use rngx_syntax::parse;
use rngx_syntax::tree::{Doc, NodeId};
use std::collections::{HashMap, HashSet};
use url::Url;

pub const STEP_COUNT: usize = 16;

pub fn simplify(
    doc: &mut Doc,
    root: NodeId,
    base: &Url,
    resources: &dyn Resources,
    limit: usize,
    composition: bool,
) -> Result<NodeId, RelaxError> {
    let mut simplifier = Simplifier {
        resources,
        composition,
        loading: vec![base.to_string()],
    };
    let mut root = root;
    for step in 1..=limit.min(STEP_COUNT) {
        root = simplifier.apply(step, doc, root, base)?;
    }
    Ok(root)
}

struct Simplifier<'r> {
    resources: &'r dyn Resources,
    /// Whether the current document contains include/externalRef at all.
    composition: bool,
    /// URLs currently being loaded, for reference-cycle detection.
    loading: Vec<String>,
}

/// All element nodes of the subtree in document order.
fn elements_preorder(doc: &Doc, root: NodeId) -> Vec<NodeId> {
    fn walk(doc: &Doc, id: NodeId, out: &mut Vec<NodeId>) {
        if doc.is_element(id) {
            out.push(id);
            let kids = doc.children(id).to_vec();
            for k in kids {
                walk(doc, k, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(doc, root, &mut out);
    out
}

fn is_named(doc: &Doc, id: NodeId, name: &str) -> bool {
    doc.is_element(id) && doc.name(id) == name
}

/// Replace `old` with `new`, updating `root` when the root itself is
/// rewritten.
fn replace_node(doc: &mut Doc, root: &mut NodeId, old: NodeId, new: NodeId) {
    if old == *root {
        doc.detach(new);
        *root = new;
    } else {
        doc.replace_with(old, new);
    }
}

/// The single pattern child required of `define`/`start` bodies.
fn only_pattern_child(doc: &Doc, id: NodeId) -> Result<NodeId, RelaxError> {
    let kids = doc.child_elements(id);
    if kids.len() == 1 {
        Ok(kids[0])
    } else {
        Err(structure_error(
            doc.path_of(id),
            format!("expected a single pattern child, found {}", kids.len()),
        ))
    }
}

impl<'r> Simplifier<'r> {
    fn apply(
        &mut self,
        step: usize,
        doc: &mut Doc,
        root: NodeId,
        base: &Url,
    ) -> Result<NodeId, RelaxError> {
        log::debug!("simplification step {} on {}", step, base);
        match step {
            1 => self.whitespace_and_base(doc, root, base),
            2 => self.propagate_datatype_library(doc, root),
            3 => self.inline_external_refs(doc, root),
            4 => self.inline_includes(doc, root),
            5 => self.name_attribute_to_child(doc, root),
            6 => self.propagate_ns(doc, root),
            7 => self.split_qnames(doc, root),
            8 => self.flatten_divs(doc, root),
            9 => self.binarize(doc, root),
            10 => self.rewrite_mixed(doc, root),
            11 => self.rewrite_optional_zero_or_more(doc, root),
            12 => self.strip_annotations(doc, root),
            13 => self.propagate_not_allowed(doc, root),
            14 => self.propagate_empty(doc, root),
            15 => self.unify_grammars(doc, root),
            16 => self.define_per_element(doc, root),
            _ => unreachable!("simplification has {} steps", STEP_COUNT),
        }
    }

    // Step 1: trim whitespace in name/type/combine attributes and <name>
    // text; fold xml:base into absolute hrefs, then drop xml:base.
    fn whitespace_and_base(
        &mut self,
        doc: &mut Doc,
        root: NodeId,
        base: &Url,
    ) -> Result<NodeId, RelaxError> {
        for id in elements_preorder(doc, root) {
            for &attr in ["name", "type", "combine"].iter() {
                if let Some(v) = doc.attribute(id, attr) {
                    let trimmed = v.trim().to_string();
                    if trimmed != v {
                        doc.set_attribute(id, attr, &trimmed)?;
                    }
                }
            }
            if is_named(doc, id, "name") {
                let text = doc.text(id);
                let trimmed = text.trim();
                if trimmed != text {
                    let trimmed = trimmed.to_string();
                    doc.empty(id);
                    let t = doc.new_text(&trimmed);
                    doc.append(id, t);
                }
            }
            if doc.attribute(id, "href").is_some() {
                let resolved = self.resolve_href(doc, id, base)?;
                doc.set_attribute(id, "href", &resolved)?;
            }
        }
        for id in elements_preorder(doc, root) {
            doc.remove_attribute(id, "xml:base");
        }
        Ok(root)
    }

    fn resolve_href(&self, doc: &Doc, id: NodeId, base: &Url) -> Result<String, RelaxError> {
        let href = doc.must_attribute(id, "href")?.trim().to_string();
        let mut bases = Vec::new();
        let mut cur = Some(id);
        while let Some(n) = cur {
            if doc.is_element(n) {
                if let Some(b) = doc.attribute(n, "xml:base") {
                    bases.push(b.trim().to_string());
                }
            }
            cur = doc.parent(n);
        }
        let mut url = base.clone();
        for b in bases.iter().rev() {
            url = url.join(b).map_err(|e| RelaxError::ResourceLoad {
                url: b.clone(),
                message: e.to_string(),
            })?;
        }
        let resolved = url.join(&href).map_err(|e| RelaxError::ResourceLoad {
            url: href.clone(),
            message: e.to_string(),
        })?;
        Ok(resolved.to_string())
    }

    // Step 2: every data/value element gets an explicit datatypeLibrary
    // inherited from the nearest ancestor; the attribute is removed from
    // all other elements.
    fn propagate_datatype_library(
        &mut self,
        doc: &mut Doc,
        root: NodeId,
    ) -> Result<NodeId, RelaxError> {
        fn walk(doc: &mut Doc, id: NodeId, inherited: &str) -> Result<(), RelaxError> {
            let current = match doc.attribute(id, "datatypeLibrary") {
                Some(v) => v.to_string(),
                None => inherited.to_string(),
            };
            let takes_library = matches!(doc.name(id), "data" | "value");
            if takes_library {
                doc.set_attribute(id, "datatypeLibrary", &current)?;
            } else {
                doc.remove_attribute(id, "datatypeLibrary");
            }
            for c in doc.child_elements(id) {
                walk(doc, c, &current)?;
            }
            Ok(())
        }
        walk(doc, root, "")?;
        Ok(root)
    }

    fn load_and_simplify(
        &mut self,
        url: &Url,
        upto: usize,
    ) -> Result<(Doc, NodeId), RelaxError> {
        let key = url.to_string();
        if self.loading.contains(&key) {
            return Err(structure_error(
                String::new(),
                format!("recursive reference to {}", url),
            ));
        }
        self.loading.push(key);
        let saved = self.composition;
        let outcome = self.load_inner(url, upto);
        self.composition = saved;
        self.loading.pop();
        outcome
    }

    fn load_inner(&mut self, url: &Url, upto: usize) -> Result<(Doc, NodeId), RelaxError> {
        let src = self.resources.load(url)?;
        self.composition = parse::scan_for_composition(&src)?;
        let (mut doc, mut root) = parse::parse_document(&src)?;
        for step in 1..=upto {
            root = self.apply(step, &mut doc, root, url)?;
        }
        Ok((doc, root))
    }

    // Step 3: substitute each externalRef with the referenced document,
    // itself taken through steps 1-3.  The inlined root inherits ns from
    // the externalRef, and is stamped with datatypeLibrary="" so that the
    // outer library never leaks across the file boundary.
    fn inline_external_refs(
        &mut self,
        doc: &mut Doc,
        root: NodeId,
    ) -> Result<NodeId, RelaxError> {
        if !self.composition {
            return Ok(root);
        }
        let mut root = root;
        loop {
            let target = elements_preorder(doc, root)
                .into_iter()
                .find(|&id| is_named(doc, id, "externalRef"));
            let id = match target {
                Some(id) => id,
                None => return Ok(root),
            };
            let href = doc.must_attribute(id, "href")?.to_string();
            let url = Url::parse(&href).map_err(|e| RelaxError::ResourceLoad {
                url: href.clone(),
                message: e.to_string(),
            })?;
            let (other, other_root) = self.load_and_simplify(&url, 3)?;
            let inlined = doc.graft(&other, other_root);
            if let Some(ns) = doc.attribute(id, "ns").map(|s| s.to_string()) {
                if doc.attribute(inlined, "ns").is_none() {
                    doc.set_attribute(inlined, "ns", &ns)?;
                }
            }
            if doc.attribute(inlined, "datatypeLibrary").is_none() {
                doc.set_attribute(inlined, "datatypeLibrary", "")?;
            }
            replace_node(doc, &mut root, id, inlined);
        }
    }

    // Step 4: inline each include.  The referenced document (steps 1-4)
    // must be a grammar; overriding start/define children of the include
    // suppress the matching components, and the whole thing becomes a div
    // of the included grammar's remains followed by the include's children.
    fn inline_includes(&mut self, doc: &mut Doc, root: NodeId) -> Result<NodeId, RelaxError> {
        if self.composition {
            loop {
                let target = elements_preorder(doc, root)
                    .into_iter()
                    .find(|&id| is_named(doc, id, "include"));
                let id = match target {
                    Some(id) => id,
                    None => break,
                };
                self.inline_one_include(doc, id)?;
            }
        }
        self.sweep_datatype_library_stamps(doc, root);
        Ok(root)
    }

    fn inline_one_include(&mut self, doc: &mut Doc, id: NodeId) -> Result<(), RelaxError> {
        let href = doc.must_attribute(id, "href")?.to_string();
        let url = Url::parse(&href).map_err(|e| RelaxError::ResourceLoad {
            url: href.clone(),
            message: e.to_string(),
        })?;
        let (other, other_root) = self.load_and_simplify(&url, 4)?;
        if !is_named(&other, other_root, "grammar") {
            return Err(structure_error(
                doc.path_of(id),
                format!("included document {} does not have a grammar root", url),
            ));
        }
        let grammar = doc.graft(&other, other_root);

        let mut override_start = false;
        let mut override_defines = Vec::new();
        for c in grammar_components(doc, id) {
            if is_named(doc, c, "start") {
                override_start = true;
            } else if is_named(doc, c, "define") {
                let name = doc.must_attribute(c, "name")?.trim().to_string();
                if !override_defines.contains(&name) {
                    override_defines.push(name);
                }
            }
        }

        let components = grammar_components(doc, grammar);
        if override_start {
            let starts: Vec<NodeId> = components
                .iter()
                .copied()
                .filter(|&c| is_named(doc, c, "start"))
                .collect();
            if starts.is_empty() {
                return Err(structure_error(
                    doc.path_of(id),
                    "start override matches nothing in the included grammar",
                ));
            }
            for s in starts {
                let parent = doc.parent(s).expect("component without a parent");
                doc.remove_child(parent, s);
            }
        }
        for name in &override_defines {
            let matches: Vec<NodeId> = components
                .iter()
                .copied()
                .filter(|&c| {
                    is_named(doc, c, "define")
                        && doc.attribute(c, "name").map(str::trim) == Some(name.as_str())
                })
                .collect();
            if matches.is_empty() {
                return Err(structure_error(
                    doc.path_of(id),
                    format!(
                        "define override {:?} matches nothing in the included grammar",
                        name
                    ),
                ));
            }
            for m in matches {
                let parent = doc.parent(m).expect("component without a parent");
                doc.remove_child(parent, m);
            }
        }

        // include => div [ div(included grammar content), include children ]
        doc.set_name(grammar, "div");
        if doc.attribute(grammar, "datatypeLibrary").is_none() {
            doc.set_attribute(grammar, "datatypeLibrary", "")?;
        }
        doc.set_name(id, "div");
        doc.remove_attribute(id, "href");
        doc.prepend(id, grammar);
        Ok(())
    }

    // The datatypeLibrary stamps left on inlined roots have done their job
    // once all composition is resolved; data/value keep theirs.
    fn sweep_datatype_library_stamps(&self, doc: &mut Doc, root: NodeId) {
        for id in elements_preorder(doc, root) {
            let keeps = matches!(doc.name(id), "data" | "value");
            if !keeps {
                doc.remove_attribute(id, "datatypeLibrary");
            }
        }
    }

    // Step 5: name attributes on element/attribute become leading <name>
    // children; attributes are unqualified by default.
    fn name_attribute_to_child(
        &mut self,
        doc: &mut Doc,
        root: NodeId,
    ) -> Result<NodeId, RelaxError> {
        for id in elements_preorder(doc, root) {
            let kind = doc.name(id).to_string();
            if kind != "element" && kind != "attribute" {
                continue;
            }
            let name_attr = match doc.remove_attribute(id, "name") {
                Some(v) => v,
                None => continue,
            };
            let name_el = doc.new_element("name");
            let text = doc.new_text(name_attr.trim());
            doc.append(name_el, text);
            if kind == "attribute" && doc.attribute(id, "ns").is_none() {
                doc.set_attribute(name_el, "ns", "")?;
            }
            doc.prepend(id, name_el);
        }
        Ok(root)
    }

    // Step 6: ns is inherited onto every name/nsName/value element and
    // removed everywhere else.
    fn propagate_ns(&mut self, doc: &mut Doc, root: NodeId) -> Result<NodeId, RelaxError> {
        fn walk(doc: &mut Doc, id: NodeId, inherited: &str) -> Result<(), RelaxError> {
            let current = match doc.attribute(id, "ns") {
                Some(v) => v.to_string(),
                None => inherited.to_string(),
            };
            let takes_ns = matches!(doc.name(id), "name" | "nsName" | "value");
            if takes_ns {
                if doc.attribute(id, "ns").is_none() {
                    doc.set_attribute(id, "ns", &current)?;
                }
            } else {
                doc.remove_attribute(id, "ns");
            }
            for c in doc.child_elements(id) {
                walk(doc, c, &current)?;
            }
            Ok(())
        }
        walk(doc, root, "")?;
        Ok(root)
    }

    // Step 7: split prefixed <name> content, resolving the prefix against
    // the in-scope XML namespace declarations.
    fn split_qnames(&mut self, doc: &mut Doc, root: NodeId) -> Result<NodeId, RelaxError> {
        for id in elements_preorder(doc, root) {
            if !is_named(doc, id, "name") {
                continue;
            }
            let text = doc.text(id).trim().to_string();
            if let Some(pos) = text.find(':') {
                let prefix = &text[..pos];
                let local = text[pos + 1..].to_string();
                let uri = doc
                    .resolve(id, prefix)
                    .map(|s| s.to_string())
                    .ok_or_else(|| {
                        structure_error(
                            doc.path_of(id),
                            format!("undefined namespace prefix {:?}", prefix),
                        )
                    })?;
                doc.set_attribute(id, "ns", &uri)?;
                doc.empty(id);
                let t = doc.new_text(&local);
                doc.append(id, t);
            }
        }
        Ok(root)
    }

    // Step 8: hoist div children into the parent, bottom-up.
    fn flatten_divs(&mut self, doc: &mut Doc, root: NodeId) -> Result<NodeId, RelaxError> {
        for id in elements_preorder(doc, root).into_iter().rev() {
            if !is_named(doc, id, "div") {
                continue;
            }
            let parent = doc.parent(id).ok_or_else(|| {
                structure_error(doc.path_of(id), "div cannot be the document element")
            })?;
            let pos = doc.position(parent, id).expect("child missing from parent list");
            let kids = doc.empty(id);
            doc.remove_child(parent, id);
            doc.insert_at(parent, pos, &kids);
        }
        Ok(root)
    }

    // Step 9: implicit groups are made explicit, attributes default to text
    // content, excepts become single name classes, and the n-ary
    // combinators are reduced to right-associated binary chains.
    fn binarize(&mut self, doc: &mut Doc, root: NodeId) -> Result<NodeId, RelaxError> {
        let mut root = root;
        for id in elements_preorder(doc, root).into_iter().rev() {
            let kind = doc.name(id).to_string();
            match kind.as_str() {
                "define" | "oneOrMore" | "zeroOrMore" | "optional" | "list" | "mixed" => {
                    self.wrap_tail(doc, id, 0, "group");
                }
                "element" => {
                    // first child is the name class
                    self.wrap_tail(doc, id, 1, "group");
                }
                "attribute" => {
                    let kids = doc.child_elements(id);
                    if kids.len() == 1 {
                        let text = doc.new_element("text");
                        doc.append(id, text);
                    } else {
                        self.wrap_tail(doc, id, 1, "group");
                    }
                }
                // pattern excepts (under data) and name-class excepts
                // (under anyName/nsName) both collapse to a single choice
                "except" => {
                    self.wrap_tail(doc, id, 0, "choice");
                }
                "group" | "interleave" | "choice" => {
                    let kids = doc.child_elements(id);
                    if kids.len() == 1 {
                        replace_node(doc, &mut root, id, kids[0]);
                    } else if kids.len() > 2 {
                        let mut right = kids[kids.len() - 1];
                        for &left in kids[1..kids.len() - 1].iter().rev() {
                            let node = doc.new_element(&kind);
                            doc.append(node, left);
                            doc.append(node, right);
                            right = node;
                        }
                        doc.append(id, right);
                    }
                }
                _ => {}
            }
        }
        Ok(root)
    }

    /// Wrap the children after the first `keep` in a fresh `wrapper`
    /// element, when more than one of them would otherwise remain.
    fn wrap_tail(&self, doc: &mut Doc, id: NodeId, keep: usize, wrapper: &str) {
        let kids = doc.child_elements(id);
        if kids.len() <= keep + 1 {
            return;
        }
        let node = doc.new_element(wrapper);
        for &k in &kids[keep..] {
            doc.append(node, k);
        }
        doc.append(id, node);
    }

    // Step 10: mixed p => interleave(text, p).
    fn rewrite_mixed(&mut self, doc: &mut Doc, root: NodeId) -> Result<NodeId, RelaxError> {
        for id in elements_preorder(doc, root).into_iter().rev() {
            if is_named(doc, id, "mixed") {
                doc.set_name(id, "interleave");
                let text = doc.new_element("text");
                doc.prepend(id, text);
            }
        }
        Ok(root)
    }

    // Step 11: optional p => choice(empty, p);
    // zeroOrMore p => choice(oneOrMore p, empty).
    fn rewrite_optional_zero_or_more(
        &mut self,
        doc: &mut Doc,
        root: NodeId,
    ) -> Result<NodeId, RelaxError> {
        for id in elements_preorder(doc, root).into_iter().rev() {
            if is_named(doc, id, "optional") {
                doc.set_name(id, "choice");
                let empty = doc.new_element("empty");
                doc.prepend(id, empty);
            } else if is_named(doc, id, "zeroOrMore") {
                let kids = doc.empty(id);
                let one_or_more = doc.new_element("oneOrMore");
                doc.append_all(one_or_more, &kids);
                doc.append(id, one_or_more);
                let empty = doc.new_element("empty");
                doc.append(id, empty);
                doc.set_name(id, "choice");
            }
        }
        Ok(root)
    }

    // Step 12: foreign-namespace annotation attributes (e.g. compatibility
    // defaultValue) are removed; value defaults to the built-in token type.
    fn strip_annotations(&mut self, doc: &mut Doc, root: NodeId) -> Result<NodeId, RelaxError> {
        for id in elements_preorder(doc, root) {
            let foreign: Vec<String> = doc
                .attributes(id)
                .iter()
                .filter(|a| !a.uri.is_empty())
                .map(|a| a.qname())
                .collect();
            for q in foreign {
                doc.remove_attribute(id, &q);
            }
            if is_named(doc, id, "value") && doc.attribute(id, "type").is_none() {
                doc.set_attribute(id, "type", "token")?;
                doc.set_attribute(id, "datatypeLibrary", "")?;
            }
        }
        Ok(root)
    }

    // Step 13: notAllowed collapses every required context around it;
    // propagation stops at element boundaries.
    fn propagate_not_allowed(
        &mut self,
        doc: &mut Doc,
        root: NodeId,
    ) -> Result<NodeId, RelaxError> {
        let mut root = root;
        for id in elements_preorder(doc, root).into_iter().rev() {
            if doc.parent(id).is_none() && id != root {
                // detached by an earlier rewrite in this pass
                continue;
            }
            let kind = doc.name(id).to_string();
            match kind.as_str() {
                "list" | "oneOrMore" => {
                    let kids = doc.child_elements(id);
                    if kids.len() == 1 && is_named(doc, kids[0], "notAllowed") {
                        let na = doc.new_element("notAllowed");
                        replace_node(doc, &mut root, id, na);
                    }
                }
                "attribute" => {
                    let kids = doc.child_elements(id);
                    if kids.len() == 2 && is_named(doc, kids[1], "notAllowed") {
                        let na = doc.new_element("notAllowed");
                        replace_node(doc, &mut root, id, na);
                    }
                }
                "group" | "interleave" => {
                    let kids = doc.child_elements(id);
                    if kids.iter().any(|&k| is_named(doc, k, "notAllowed")) {
                        let na = doc.new_element("notAllowed");
                        replace_node(doc, &mut root, id, na);
                    }
                }
                "choice" => {
                    let kids = doc.child_elements(id);
                    if kids.len() == 2 {
                        let a = is_named(doc, kids[0], "notAllowed");
                        let b = is_named(doc, kids[1], "notAllowed");
                        if a && b {
                            let na = doc.new_element("notAllowed");
                            replace_node(doc, &mut root, id, na);
                        } else if a {
                            replace_node(doc, &mut root, id, kids[1]);
                        } else if b {
                            replace_node(doc, &mut root, id, kids[0]);
                        }
                    }
                }
                "except" => {
                    if let Some(parent) = doc.parent(id) {
                        let kids = doc.child_elements(id);
                        if is_named(doc, parent, "data")
                            && kids.len() == 1
                            && is_named(doc, kids[0], "notAllowed")
                        {
                            doc.remove_child(parent, id);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(root)
    }

    // Step 14: empty is absorbed by group/interleave, collapses
    // oneOrMore, and sorts to the front of a choice.
    fn propagate_empty(&mut self, doc: &mut Doc, root: NodeId) -> Result<NodeId, RelaxError> {
        let mut root = root;
        for id in elements_preorder(doc, root).into_iter().rev() {
            if doc.parent(id).is_none() && id != root {
                continue;
            }
            let kind = doc.name(id).to_string();
            match kind.as_str() {
                "group" | "interleave" => {
                    let kids = doc.child_elements(id);
                    if kids.len() == 2 {
                        let a = is_named(doc, kids[0], "empty");
                        let b = is_named(doc, kids[1], "empty");
                        if a && b {
                            let empty = doc.new_element("empty");
                            replace_node(doc, &mut root, id, empty);
                        } else if a {
                            replace_node(doc, &mut root, id, kids[1]);
                        } else if b {
                            replace_node(doc, &mut root, id, kids[0]);
                        }
                    }
                }
                "oneOrMore" => {
                    let kids = doc.child_elements(id);
                    if kids.len() == 1 && is_named(doc, kids[0], "empty") {
                        let empty = doc.new_element("empty");
                        replace_node(doc, &mut root, id, empty);
                    }
                }
                "choice" => {
                    let kids = doc.child_elements(id);
                    if kids.len() == 2 {
                        let a = is_named(doc, kids[0], "empty");
                        let b = is_named(doc, kids[1], "empty");
                        if a && b {
                            let empty = doc.new_element("empty");
                            replace_node(doc, &mut root, id, empty);
                        } else if b && !a {
                            // normal form keeps empty first
                            doc.prepend(id, kids[1]);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(root)
    }

    // Step 15: wrap a pattern top level in grammar/start, merge combine
    // groups, rename definitions into a single flat namespace and hoist
    // everything to the top grammar.  The renaming is stable: definitions
    // of the Nth grammar in document order get a `-gr-N` suffix.
    fn unify_grammars(&mut self, doc: &mut Doc, root: NodeId) -> Result<NodeId, RelaxError> {
        let mut root = root;
        if !is_named(doc, root, "grammar") {
            let grammar = doc.new_element("grammar");
            let start = doc.new_element("start");
            doc.append(grammar, start);
            doc.append(start, root);
            root = grammar;
        }

        let grammars: Vec<NodeId> = elements_preorder(doc, root)
            .into_iter()
            .filter(|&id| is_named(doc, id, "grammar"))
            .collect();
        for &g in &grammars {
            self.merge_combines(doc, g)?;
        }

        let number: HashMap<NodeId, usize> =
            grammars.iter().enumerate().map(|(i, &g)| (g, i + 1)).collect();
        // a single grammar already has unique names; renaming only when
        // grammars nest keeps the whole pipeline idempotent
        let multi = grammars.len() > 1;
        let renamed = |original: &str, grammar: NodeId| {
            if multi {
                format!("{}-gr-{}", original, number[&grammar])
            } else {
                original.to_string()
            }
        };

        for id in elements_preorder(doc, root) {
            if is_named(doc, id, "define") {
                let grammar = nearest_grammar(doc, id).expect("define outside any grammar");
                let original = doc.must_attribute(id, "name")?.trim().to_string();
                let new_name = renamed(&original, grammar);
                doc.set_attribute(id, "name", &new_name)?;
            }
        }

        for id in elements_preorder(doc, root) {
            let kind = doc.name(id).to_string();
            if kind != "ref" && kind != "parentRef" {
                continue;
            }
            let mut grammar = nearest_grammar(doc, id).expect("ref outside any grammar");
            if kind == "parentRef" {
                grammar = nearest_grammar(doc, grammar).ok_or_else(|| {
                    structure_error(
                        doc.path_of(id),
                        "parentRef used outside a nested grammar",
                    )
                })?;
                doc.set_name(id, "ref");
            }
            let original = doc.must_attribute(id, "name")?.trim().to_string();
            let new_name = renamed(&original, grammar);
            doc.set_attribute(id, "name", &new_name)?;
        }

        // hoist nested grammars, innermost last in document order first
        for &g in grammars.iter().skip(1).rev() {
            let mut start = None;
            let mut defines = Vec::new();
            for c in doc.child_elements(g) {
                if is_named(doc, c, "start") {
                    start = Some(c);
                } else if is_named(doc, c, "define") {
                    defines.push(c);
                }
            }
            doc.append_all(root, &defines);
            let start = start.expect("merge_combines guarantees a start");
            let pattern = only_pattern_child(doc, start)?;
            doc.detach(pattern);
            doc.replace_with(g, pattern);
        }

        // every reference must now resolve against the top grammar
        let defined: HashSet<String> = doc
            .child_elements(root)
            .into_iter()
            .filter(|&c| is_named(doc, c, "define"))
            .map(|c| doc.attribute(c, "name").unwrap_or("").to_string())
            .collect();
        for id in elements_preorder(doc, root) {
            if is_named(doc, id, "ref") {
                let name = doc.must_attribute(id, "name")?;
                if !defined.contains(name) {
                    let name = name.to_string();
                    return Err(structure_error(
                        doc.path_of(id),
                        format!("reference to undefined pattern {:?}", name),
                    ));
                }
            }
        }
        Ok(root)
    }

    fn merge_combines(&mut self, doc: &mut Doc, grammar: NodeId) -> Result<(), RelaxError> {
        let mut groups: Vec<(Option<String>, Vec<NodeId>)> = Vec::new();
        for c in doc.child_elements(grammar) {
            let key = if is_named(doc, c, "start") {
                None
            } else if is_named(doc, c, "define") {
                Some(doc.must_attribute(c, "name")?.trim().to_string())
            } else {
                continue;
            };
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, v)) => v.push(c),
                None => groups.push((key, vec![c])),
            }
        }
        if !groups.iter().any(|(k, _)| k.is_none()) {
            return Err(structure_error(
                doc.path_of(grammar),
                "grammar has no start element",
            ));
        }
        for (key, comps) in groups {
            if comps.len() == 1 {
                doc.remove_attribute(comps[0], "combine");
                continue;
            }
            let mut combine: Option<String> = None;
            let mut missing = 0;
            for &c in &comps {
                match doc.attribute(c, "combine") {
                    Some(v) => {
                        let v = v.trim().to_string();
                        if v != "choice" && v != "interleave" {
                            return Err(structure_error(
                                doc.path_of(c),
                                format!("invalid combine value {:?}", v),
                            ));
                        }
                        match &combine {
                            Some(prev) if *prev != v => {
                                return Err(structure_error(
                                    doc.path_of(c),
                                    "conflicting combine values",
                                ));
                            }
                            _ => combine = Some(v),
                        }
                    }
                    None => missing += 1,
                }
            }
            let what = match &key {
                Some(n) => format!("definitions of {:?}", n),
                None => "start elements".to_string(),
            };
            if missing > 1 {
                return Err(structure_error(
                    doc.path_of(comps[1]),
                    format!("multiple {} without combine", what),
                ));
            }
            let combine = combine.ok_or_else(|| {
                structure_error(
                    doc.path_of(comps[0]),
                    format!("multiple {} without combine", what),
                )
            })?;
            let first = comps[0];
            let mut acc = only_pattern_child(doc, first)?;
            doc.detach(acc);
            for &c in &comps[1..] {
                let body = only_pattern_child(doc, c)?;
                doc.detach(body);
                let node = doc.new_element(&combine);
                doc.append(node, acc);
                doc.append(node, body);
                acc = node;
                doc.remove_child(grammar, c);
            }
            doc.empty(first);
            doc.append(first, acc);
            doc.remove_attribute(first, "combine");
        }
        Ok(())
    }

    // Step 16: factor every element into its own definition (stable
    // `__<local>-elt-<K>` names, K being the element's position among
    // element elements in document order), then inline definitions whose
    // body contains no element.
    fn define_per_element(&mut self, doc: &mut Doc, root: NodeId) -> Result<NodeId, RelaxError> {
        let elements: Vec<NodeId> = elements_preorder(doc, root)
            .into_iter()
            .filter(|&id| is_named(doc, id, "element"))
            .collect();
        let mut new_defines = Vec::new();
        for (i, &el) in elements.iter().enumerate() {
            let parent = doc.parent(el).expect("element without a parent");
            if is_named(doc, parent, "define") && doc.child_elements(parent).len() == 1 {
                continue;
            }
            let local = element_local_hint(doc, el);
            let def_name = format!("__{}-elt-{}", local, i + 1);
            let reference = doc.new_element("ref");
            doc.set_attribute(reference, "name", &def_name)?;
            doc.replace_with(el, reference);
            let define = doc.new_element("define");
            doc.set_attribute(define, "name", &def_name)?;
            doc.append(define, el);
            new_defines.push(define);
        }
        doc.append_all(root, &new_defines);

        self.inline_elementless_defines(doc, root)
    }

    fn inline_elementless_defines(
        &mut self,
        doc: &mut Doc,
        root: NodeId,
    ) -> Result<NodeId, RelaxError> {
        let mut elementless: Vec<(String, NodeId)> = Vec::new();
        for c in doc.child_elements(root) {
            if !is_named(doc, c, "define") {
                continue;
            }
            let name = doc.must_attribute(c, "name")?.to_string();
            if !subtree_contains_element(doc, c) {
                elementless.push((name, c));
            }
        }
        if elementless.is_empty() {
            return Ok(root);
        }
        let by_name: HashMap<String, NodeId> = elementless.iter().cloned().collect();

        // expansion order: dependencies first, cycles are fatal
        let mut deps: HashMap<String, Vec<String>> = HashMap::new();
        for (name, define) in &elementless {
            let mut referenced = Vec::new();
            collect_refs(doc, *define, &mut referenced);
            referenced.retain(|r| by_name.contains_key(r));
            deps.insert(name.clone(), referenced);
        }
        let mut order = Vec::new();
        let mut state: HashMap<String, u8> = HashMap::new();
        for (name, _) in &elementless {
            visit_define(doc, name, &by_name, &deps, &mut state, &mut order)?;
        }
        for name in &order {
            let define = by_name[name];
            expand_refs(doc, define, &by_name);
        }
        for c in doc.child_elements(root) {
            if by_name.values().any(|&d| d == c) {
                continue;
            }
            expand_refs(doc, c, &by_name);
        }
        for (_, define) in &elementless {
            doc.remove_child(root, *define);
        }
        self.drop_unreachable_defines(doc, root)?;
        Ok(root)
    }

    // Definitions never reached from start are dead after the rewrite and
    // would otherwise survive as orphans.
    fn drop_unreachable_defines(&mut self, doc: &mut Doc, root: NodeId) -> Result<(), RelaxError> {
        let mut body_of: HashMap<String, NodeId> = HashMap::new();
        let mut start = None;
        for c in doc.child_elements(root) {
            if is_named(doc, c, "define") {
                body_of.insert(doc.must_attribute(c, "name")?.to_string(), c);
            } else if is_named(doc, c, "start") {
                start = Some(c);
            }
        }
        let start = match start {
            Some(s) => s,
            None => return Ok(()),
        };
        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue = Vec::new();
        collect_refs(doc, start, &mut queue);
        while let Some(name) = queue.pop() {
            if reachable.insert(name.clone()) {
                if let Some(&define) = body_of.get(&name) {
                    collect_refs(doc, define, &mut queue);
                }
            }
        }
        for (name, define) in body_of {
            if !reachable.contains(&name) {
                log::debug!("dropping unreachable definition {:?}", name);
                doc.remove_child(root, define);
            }
        }
        Ok(())
    }
}

fn element_local_hint(doc: &Doc, element: NodeId) -> String {
    let kids = doc.child_elements(element);
    match kids.first() {
        Some(&nc) if is_named(doc, nc, "name") => doc.text(nc).trim().to_string(),
        Some(&nc) => doc.name(nc).to_string(),
        None => "element".to_string(),
    }
}

/// start/define components of a grammar: direct children plus those nested
/// in divs, never crossing into nested grammars.
fn grammar_components(doc: &Doc, grammar: NodeId) -> Vec<NodeId> {
    fn walk(doc: &Doc, id: NodeId, out: &mut Vec<NodeId>) {
        for c in doc.child_elements(id) {
            if is_named(doc, c, "start") || is_named(doc, c, "define") {
                out.push(c);
            } else if is_named(doc, c, "div") || is_named(doc, c, "include") {
                walk(doc, c, out);
            }
        }
    }
    let mut out = Vec::new();
    walk(doc, grammar, &mut out);
    out
}

fn nearest_grammar(doc: &Doc, id: NodeId) -> Option<NodeId> {
    let mut cur = doc.parent(id);
    while let Some(n) = cur {
        if is_named(doc, n, "grammar") {
            return Some(n);
        }
        cur = doc.parent(n);
    }
    None
}

fn subtree_contains_element(doc: &Doc, id: NodeId) -> bool {
    for c in doc.child_elements(id) {
        if is_named(doc, c, "element") || subtree_contains_element(doc, c) {
            return true;
        }
    }
    false
}

fn collect_refs(doc: &Doc, id: NodeId, out: &mut Vec<String>) {
    for c in doc.child_elements(id) {
        if is_named(doc, c, "ref") {
            if let Some(name) = doc.attribute(c, "name") {
                out.push(name.to_string());
            }
        }
        collect_refs(doc, c, out);
    }
}

fn visit_define(
    doc: &Doc,
    name: &str,
    by_name: &HashMap<String, NodeId>,
    deps: &HashMap<String, Vec<String>>,
    state: &mut HashMap<String, u8>,
    order: &mut Vec<String>,
) -> Result<(), RelaxError> {
    match state.get(name) {
        Some(1) => {
            return Err(structure_error(
                doc.path_of(by_name[name]),
                "cyclic reference with no element between",
            ));
        }
        Some(2) => return Ok(()),
        _ => {}
    }
    state.insert(name.to_string(), 1);
    if let Some(referenced) = deps.get(name) {
        for r in referenced {
            visit_define(doc, r, by_name, deps, state, order)?;
        }
    }
    state.insert(name.to_string(), 2);
    order.push(name.to_string());
    Ok(())
}

/// Replace refs to elementless defines with copies of their bodies.
fn expand_refs(doc: &mut Doc, scope: NodeId, by_name: &HashMap<String, NodeId>) {
    let refs: Vec<(NodeId, String)> = elements_preorder(doc, scope)
        .into_iter()
        .filter(|&id| is_named(doc, id, "ref"))
        .filter_map(|id| doc.attribute(id, "name").map(|n| (id, n.to_string())))
        .collect();
    for (r, name) in refs {
        if let Some(&define) = by_name.get(&name) {
            let body = doc.child_elements(define)[0];
            let copy = doc.clone_subtree(body);
            doc.replace_with(r, copy);
        }
    }
}
