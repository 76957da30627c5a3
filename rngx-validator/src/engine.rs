//! Interned pattern engine computing the derivatives.
//!
//! Patterns are hash-consed into a table addressed by `PatId`, which keeps
//! residuals compact and makes the derivative computations cheap to
//! memoise.  The constructors apply the choice/group/interleave
//! simplifications, so notAllowed and empty only ever enter a residual
//! through them.  Nullability is stored as a flag on the composite
//! variants, computed when the node is interned.
//!
//! Reference: <https://relaxng.org/jclark/derivative.html>

use fnv::FnvHashSet;
use rngx_model::datatype::{self, Datatype, Datatypes, DatatypeValues, Namespaces};
use rngx_model::model::NameClass;
use rngx_model::{Grammar, IncompleteTypes, Pattern, PatternKind, RelaxError};
use std::collections::HashMap;

#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
pub(crate) struct PatId(u32);

// Large payloads (name classes, datatypes) are boxed to keep Pat small, so
// that cloning during derivative computation stays cheap.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub(crate) enum Pat {
    Choice(PatId, PatId, bool),
    Interleave(PatId, PatId, bool),
    Group(PatId, PatId, bool),
    OneOrMore(PatId, bool),
    Empty,
    Text,
    NotAllowed,
    Attribute(Box<NameClass>, PatId),
    Element(Box<NameClass>, PatId),
    Datatype(Box<Datatypes>),
    DatatypeValue(Box<DatatypeValues>),
    DatatypeExcept(Box<Datatypes>, PatId),
    List(PatId),
    // a definition being compiled; the slot is patched once its body exists
    Placeholder(u32),
    After(PatId, PatId),
}

impl Pat {
    fn is_nullable(&self) -> bool {
        match self {
            Pat::Choice(_, _, nullable)
            | Pat::Interleave(_, _, nullable)
            | Pat::Group(_, _, nullable)
            | Pat::OneOrMore(_, nullable) => *nullable,
            Pat::Empty | Pat::Text => true,
            // a placeholder stands for a definition body, which is always an
            // element in a simplified grammar, hence not nullable
            Pat::NotAllowed
            | Pat::Attribute(_, _)
            | Pat::Element(_, _)
            | Pat::Datatype(_)
            | Pat::DatatypeValue(_)
            | Pat::DatatypeExcept(_, _)
            | Pat::List(_)
            | Pat::Placeholder(_)
            | Pat::After(_, _) => false,
        }
    }
}

pub(crate) struct Engine {
    memo: HashMap<Pat, PatId>,
    patterns: Vec<Pat>,
    refs: HashMap<String, PatId>,
    start: PatId,
}

impl Engine {
    pub(crate) fn compile(grammar: &Grammar) -> Result<Engine, RelaxError> {
        let mut engine = Engine {
            memo: HashMap::new(),
            patterns: Vec::new(),
            refs: HashMap::new(),
            start: PatId(0),
        };
        engine.start = engine.pattern(grammar, &grammar.start)?;
        Ok(engine)
    }

    pub(crate) fn start(&self) -> PatId {
        self.start
    }

    fn pattern(&mut self, grammar: &Grammar, p: &Pattern) -> Result<PatId, RelaxError> {
        Ok(match &p.kind {
            PatternKind::Empty => self.empty(),
            PatternKind::NotAllowed => self.not_allowed(),
            PatternKind::Text => self.text(),
            PatternKind::Choice(a, b) => {
                let a = self.pattern(grammar, a)?;
                let b = self.pattern(grammar, b)?;
                self.choice(a, b)
            }
            PatternKind::Group(a, b) => {
                let a = self.pattern(grammar, a)?;
                let b = self.pattern(grammar, b)?;
                self.group(a, b)
            }
            PatternKind::Interleave(a, b) => {
                let a = self.pattern(grammar, a)?;
                let b = self.pattern(grammar, b)?;
                self.interleave(a, b)
            }
            PatternKind::OneOrMore(inner) => {
                let inner = self.pattern(grammar, inner)?;
                self.one_or_more(inner)
            }
            PatternKind::List(inner) => {
                let inner = self.pattern(grammar, inner)?;
                self.list(inner)
            }
            PatternKind::Element(nc, body) => {
                let body = self.pattern(grammar, body)?;
                self.element(nc.clone(), body)
            }
            PatternKind::Attribute(nc, body) => {
                let body = self.pattern(grammar, body)?;
                self.attribute(nc.clone(), body)
            }
            PatternKind::Ref(name) => {
                if let Some(&id) = self.refs.get(name) {
                    id
                } else {
                    let placeholder = self.push(Pat::Placeholder(self.refs.len() as u32));
                    self.refs.insert(name.clone(), placeholder);
                    let define = grammar.define(name).ok_or_else(|| {
                        RelaxError::SchemaStructure {
                            path: p.path.clone(),
                            message: format!("reference to undefined pattern {:?}", name),
                        }
                    })?;
                    let body = self.pattern(grammar, &define.pattern)?;
                    self.resolve_placeholder(placeholder, body, &define.path)?;
                    placeholder
                }
            }
            PatternKind::Value {
                datatype_library,
                type_name,
                ns: _,
                value,
            } => {
                let compiled = datatype::compile_value(
                    datatype_library,
                    type_name,
                    value,
                    &p.path,
                    IncompleteTypes::Deny,
                )?
                .expect("Deny mode never tolerates unknown datatypes");
                self.datatype_value(compiled)
            }
            PatternKind::Data {
                datatype_library,
                type_name,
                params,
                except,
            } => {
                let compiled = datatype::compile_datatype(
                    datatype_library,
                    type_name,
                    params,
                    &p.path,
                    IncompleteTypes::Deny,
                )?
                .expect("Deny mode never tolerates unknown datatypes");
                let except = match except {
                    Some(e) => Some(self.pattern(grammar, e)?),
                    None => None,
                };
                self.datatype_name(compiled, except)
            }
        })
    }

    fn resolve_placeholder(
        &mut self,
        placeholder: PatId,
        body: PatId,
        path: &str,
    ) -> Result<(), RelaxError> {
        if placeholder == body {
            // the definition's body is a reference to itself
            return Err(RelaxError::SchemaStructure {
                path: path.to_string(),
                message: "definition cycle with no element between".to_string(),
            });
        }
        let target = self.patt(body);
        if let Pat::Placeholder(_) = target {
            // a define whose body is (transitively) just a reference back
            // to itself; simplified grammars never produce this, but the
            // compact reader accepts arbitrary input
            return Err(RelaxError::SchemaStructure {
                path: path.to_string(),
                message: "definition cycle with no element between".to_string(),
            });
        }
        match &self.patterns[placeholder.0 as usize] {
            Pat::Placeholder(_) => {}
            p => unreachable!("expected placeholder, found {:?}", p),
        }
        self.patterns[placeholder.0 as usize] = target;
        Ok(())
    }

    fn push(&mut self, p: Pat) -> PatId {
        // guard against pathological interleave/choice blowup; better a
        // clean failure than an unbounded table
        assert!(
            self.patterns.len() < 0x0fff_ffff,
            "derivative complexity limit exceeded"
        );
        if let Some(&id) = self.memo.get(&p) {
            id
        } else {
            let id = PatId(self.patterns.len() as u32);
            self.memo.insert(p.clone(), id);
            self.patterns.push(p);
            id
        }
    }

    pub(crate) fn patt(&self, id: PatId) -> Pat {
        self.patterns[id.0 as usize].clone()
    }

    pub(crate) fn nullable(&self, id: PatId) -> bool {
        self.patterns[id.0 as usize].is_nullable()
    }

    pub(crate) fn is_not_allowed(&self, id: PatId) -> bool {
        matches!(self.patterns[id.0 as usize], Pat::NotAllowed)
    }

    pub(crate) fn empty(&mut self) -> PatId {
        self.push(Pat::Empty)
    }

    pub(crate) fn text(&mut self) -> PatId {
        self.push(Pat::Text)
    }

    pub(crate) fn not_allowed(&mut self) -> PatId {
        self.push(Pat::NotAllowed)
    }

    fn one_or_more(&mut self, p: PatId) -> PatId {
        if self.is_not_allowed(p) {
            return self.not_allowed();
        }
        let nullable = self.nullable(p);
        self.push(Pat::OneOrMore(p, nullable))
    }

    fn list(&mut self, p: PatId) -> PatId {
        self.push(Pat::List(p))
    }

    fn attribute(&mut self, nc: NameClass, p: PatId) -> PatId {
        self.push(Pat::Attribute(Box::new(nc), p))
    }

    fn element(&mut self, nc: NameClass, p: PatId) -> PatId {
        self.push(Pat::Element(Box::new(nc), p))
    }

    fn datatype_value(&mut self, dt: DatatypeValues) -> PatId {
        self.push(Pat::DatatypeValue(Box::new(dt)))
    }

    fn datatype_name(&mut self, dt: Datatypes, except: Option<PatId>) -> PatId {
        match except {
            Some(e) => self.push(Pat::DatatypeExcept(Box::new(dt), e)),
            None => self.push(Pat::Datatype(Box::new(dt))),
        }
    }

    pub(crate) fn group(&mut self, left: PatId, right: PatId) -> PatId {
        match (self.patt(left), self.patt(right)) {
            (Pat::NotAllowed, _) | (_, Pat::NotAllowed) => self.not_allowed(),
            (Pat::Empty, _) => right,
            (_, Pat::Empty) => left,
            (l, r) => self.push(Pat::Group(left, right, l.is_nullable() && r.is_nullable())),
        }
    }

    pub(crate) fn interleave(&mut self, left: PatId, right: PatId) -> PatId {
        match (self.patt(left), self.patt(right)) {
            (Pat::NotAllowed, _) | (_, Pat::NotAllowed) => self.not_allowed(),
            (Pat::Empty, _) => right,
            (_, Pat::Empty) => left,
            (l, r) => self.push(Pat::Interleave(
                left,
                right,
                l.is_nullable() && r.is_nullable(),
            )),
        }
    }

    fn after(&mut self, p1: PatId, p2: PatId) -> PatId {
        if self.is_not_allowed(p1) || self.is_not_allowed(p2) {
            self.not_allowed()
        } else {
            self.push(Pat::After(p1, p2))
        }
    }

    // Eliminate redundant choice leaves to avoid exponential blowup; see
    // https://relaxng.org/jclark/derivative.html#Avoiding_exponential_blowup
    //
    // The leaves of the left operand go into a hash set, and any leaf of
    // the right operand already present is filtered out, keeping the choice
    // tree linear in the number of distinct leaves.
    pub(crate) fn choice(&mut self, left: PatId, right: PatId) -> PatId {
        if self.is_not_allowed(left) {
            return right;
        }
        if self.is_not_allowed(right) {
            return left;
        }
        if left == right {
            return left;
        }
        let mut left_leaves = FnvHashSet::default();
        self.collect_choice_leaves(left, &mut left_leaves);
        match self.filter_choice(right, &left_leaves) {
            // every leaf on the right was a duplicate
            None => left,
            Some(filtered) => {
                let nullable = self.nullable(left) || self.nullable(filtered);
                self.push(Pat::Choice(left, filtered, nullable))
            }
        }
    }

    fn collect_choice_leaves(&self, id: PatId, leaves: &mut FnvHashSet<PatId>) {
        match self.patterns[id.0 as usize] {
            Pat::Choice(l, r, _) => {
                self.collect_choice_leaves(l, leaves);
                self.collect_choice_leaves(r, leaves);
            }
            _ => {
                leaves.insert(id);
            }
        }
    }

    fn filter_choice(&mut self, id: PatId, exclude: &FnvHashSet<PatId>) -> Option<PatId> {
        if exclude.contains(&id) {
            return None;
        }
        match self.patterns[id.0 as usize] {
            Pat::Choice(l, r, _) => {
                let fl = self.filter_choice(l, exclude);
                let fr = self.filter_choice(r, exclude);
                match (fl, fr) {
                    (None, None) => None,
                    (Some(kept), None) | (None, Some(kept)) => Some(kept),
                    (Some(fl), Some(fr)) => {
                        let nullable = self.nullable(fl) || self.nullable(fr);
                        Some(self.push(Pat::Choice(fl, fr, nullable)))
                    }
                }
            }
            _ => Some(id),
        }
    }

    pub(crate) fn text_deriv(&mut self, id: PatId, text: &str, ns: &dyn Namespaces) -> PatId {
        let mut memo = HashMap::new();
        self.text_deriv_memo(&mut memo, id, text, ns)
    }

    fn text_deriv_memo(
        &mut self,
        memo: &mut HashMap<PatId, PatId>,
        id: PatId,
        text: &str,
        ns: &dyn Namespaces,
    ) -> PatId {
        if let Some(&result) = memo.get(&id) {
            return result;
        }
        let result = match self.patt(id) {
            Pat::Choice(p1, p2, _) => {
                let a = self.text_deriv_memo(memo, p1, text, ns);
                let b = self.text_deriv_memo(memo, p2, text, ns);
                self.choice(a, b)
            }
            Pat::Interleave(p1, p2, _) => {
                let d1 = self.text_deriv_memo(memo, p1, text, ns);
                let a = self.interleave(d1, p2);
                let d2 = self.text_deriv_memo(memo, p2, text, ns);
                let b = self.interleave(p1, d2);
                self.choice(a, b)
            }
            Pat::Group(p1, p2, _) => {
                let nullable = self.nullable(p1);
                let d1 = self.text_deriv_memo(memo, p1, text, ns);
                let p = self.group(d1, p2);
                if nullable {
                    let d2 = self.text_deriv_memo(memo, p2, text, ns);
                    self.choice(p, d2)
                } else {
                    p
                }
            }
            Pat::After(p1, p2) => {
                let d = self.text_deriv_memo(memo, p1, text, ns);
                self.after(d, p2)
            }
            Pat::OneOrMore(p, _) => {
                let d = self.text_deriv_memo(memo, p, text, ns);
                let empty = self.empty();
                let more = self.one_or_more(p);
                let rest = self.choice(more, empty);
                self.group(d, rest)
            }
            Pat::Text => self.text(),
            Pat::Datatype(dt) => {
                if dt.is_valid(text) {
                    self.empty()
                } else {
                    self.not_allowed()
                }
            }
            Pat::DatatypeValue(dt) => {
                if dt.is_valid_with_ns(text, ns) {
                    self.empty()
                } else {
                    self.not_allowed()
                }
            }
            Pat::DatatypeExcept(dt, except) => {
                let d = self.text_deriv(except, text, ns);
                if dt.is_valid(text) && !self.nullable(d) {
                    self.empty()
                } else {
                    self.not_allowed()
                }
            }
            Pat::List(p) => {
                let mut cur = p;
                for token in text.split_whitespace() {
                    // each token is an independent text input, so the outer
                    // memo must not be reused here
                    cur = self.text_deriv(cur, token, ns);
                    if self.is_not_allowed(cur) {
                        break;
                    }
                }
                if self.nullable(cur) {
                    self.empty()
                } else {
                    self.not_allowed()
                }
            }
            Pat::Empty => {
                // whitespace between elements also reaches patterns that
                // only match the empty sequence
                if rngx_syntax::is_whitespace_str(text) {
                    self.empty()
                } else {
                    self.not_allowed()
                }
            }
            Pat::Element(_, _) => {
                if rngx_syntax::is_whitespace_str(text) {
                    id
                } else {
                    self.not_allowed()
                }
            }
            Pat::NotAllowed | Pat::Attribute(_, _) => self.not_allowed(),
            Pat::Placeholder(n) => unreachable!("unresolved placeholder {}", n),
        };
        memo.insert(id, result);
        result
    }

    pub(crate) fn start_tag_open_deriv(&mut self, id: PatId, uri: &str, local: &str) -> PatId {
        let mut memo = HashMap::new();
        self.start_tag_open_memo(&mut memo, id, uri, local)
    }

    fn start_tag_open_memo(
        &mut self,
        memo: &mut HashMap<PatId, PatId>,
        id: PatId,
        uri: &str,
        local: &str,
    ) -> PatId {
        if let Some(&result) = memo.get(&id) {
            return result;
        }
        let result = match self.patt(id) {
            Pat::Choice(p1, p2, _) => {
                let d1 = self.start_tag_open_memo(memo, p1, uri, local);
                let d2 = self.start_tag_open_memo(memo, p2, uri, local);
                self.choice(d1, d2)
            }
            Pat::OneOrMore(p, _) => {
                let d = self.start_tag_open_memo(memo, p, uri, local);
                let deriv = self.patt(d);
                self.apply_after(deriv, move |engine, pat| {
                    let empty = engine.empty();
                    let more = engine.one_or_more(p);
                    let rest = engine.choice(more, empty);
                    engine.group(pat, rest)
                })
            }
            Pat::Interleave(p1, p2, _) => {
                let d1 = self.start_tag_open_memo(memo, p1, uri, local);
                let d1 = self.patt(d1);
                let c1 = self.apply_after(d1, move |engine, pat| engine.interleave(pat, p2));
                let d2 = self.start_tag_open_memo(memo, p2, uri, local);
                let d2 = self.patt(d2);
                let c2 = self.apply_after(d2, move |engine, pat| engine.interleave(p1, pat));
                self.choice(c1, c2)
            }
            Pat::Group(p1, p2, _) => {
                let nullable = self.nullable(p1);
                let d1 = self.start_tag_open_memo(memo, p1, uri, local);
                let d1 = self.patt(d1);
                let x = self.apply_after(d1, move |engine, pat| engine.group(pat, p2));
                if nullable {
                    let d2 = self.start_tag_open_memo(memo, p2, uri, local);
                    self.choice(x, d2)
                } else {
                    x
                }
            }
            Pat::Element(nc, pat) => {
                if nc.contains(uri, local) {
                    let empty = self.empty();
                    self.after(pat, empty)
                } else {
                    self.not_allowed()
                }
            }
            Pat::After(p1, p2) => {
                let d = self.start_tag_open_memo(memo, p1, uri, local);
                let d = self.patt(d);
                self.apply_after(d, move |engine, pat| engine.after(pat, p2))
            }
            Pat::Empty
            | Pat::Text
            | Pat::NotAllowed
            | Pat::Attribute(_, _)
            | Pat::Datatype(_)
            | Pat::DatatypeValue(_)
            | Pat::DatatypeExcept(_, _)
            | Pat::List(_) => self.not_allowed(),
            Pat::Placeholder(n) => unreachable!("unresolved placeholder {}", n),
        };
        memo.insert(id, result);
        result
    }

    // The derivative algorithm's applyAfter: rebuild the continuations of
    // every After leaf of a choice tree.
    fn apply_after<F>(&mut self, pat: Pat, f: F) -> PatId
    where
        F: Fn(&mut Engine, PatId) -> PatId + Clone,
    {
        match pat {
            Pat::After(p1, p2) => {
                let p2 = f(self, p2);
                self.after(p1, p2)
            }
            Pat::Choice(p1, p2, _) => {
                let p1 = self.patt(p1);
                let p2 = self.patt(p2);
                let c1 = self.apply_after(p1, f.clone());
                let c2 = self.apply_after(p2, f);
                self.choice(c1, c2)
            }
            Pat::NotAllowed => self.not_allowed(),
            other => panic!(
                "only After, Choice and NotAllowed may reach apply_after: {:?}",
                other
            ),
        }
    }

    pub(crate) fn att_deriv(
        &mut self,
        id: PatId,
        uri: &str,
        local: &str,
        value: &str,
        ns: &dyn Namespaces,
    ) -> PatId {
        let mut memo = HashMap::new();
        self.att_deriv_memo(&mut memo, id, uri, local, value, ns)
    }

    fn att_deriv_memo(
        &mut self,
        memo: &mut HashMap<PatId, PatId>,
        id: PatId,
        uri: &str,
        local: &str,
        value: &str,
        ns: &dyn Namespaces,
    ) -> PatId {
        if let Some(&result) = memo.get(&id) {
            return result;
        }
        let result = match self.patt(id) {
            Pat::After(p1, p2) => {
                let d = self.att_deriv_memo(memo, p1, uri, local, value, ns);
                self.after(d, p2)
            }
            Pat::Choice(p1, p2, _) => {
                let c1 = self.att_deriv_memo(memo, p1, uri, local, value, ns);
                let c2 = self.att_deriv_memo(memo, p2, uri, local, value, ns);
                self.choice(c1, c2)
            }
            Pat::Group(p1, p2, _) => {
                let d1 = self.att_deriv_memo(memo, p1, uri, local, value, ns);
                let s1 = self.group(d1, p2);
                let d2 = self.att_deriv_memo(memo, p2, uri, local, value, ns);
                let s2 = self.group(p1, d2);
                self.choice(s1, s2)
            }
            Pat::Interleave(p1, p2, _) => {
                let d1 = self.att_deriv_memo(memo, p1, uri, local, value, ns);
                let i1 = self.interleave(d1, p2);
                let d2 = self.att_deriv_memo(memo, p2, uri, local, value, ns);
                let i2 = self.interleave(p1, d2);
                self.choice(i1, i2)
            }
            Pat::OneOrMore(p, _) => {
                let d = self.att_deriv_memo(memo, p, uri, local, value, ns);
                let empty = self.empty();
                let rest = self.choice(id, empty);
                self.group(d, rest)
            }
            Pat::Attribute(nc, p) => {
                if nc.contains(uri, local) && self.value_match(p, value, ns) {
                    self.empty()
                } else {
                    self.not_allowed()
                }
            }
            _ => self.not_allowed(),
        };
        memo.insert(id, result);
        result
    }

    fn value_match(&mut self, id: PatId, value: &str, ns: &dyn Namespaces) -> bool {
        (self.nullable(id) && rngx_syntax::is_whitespace_str(value)) || {
            let d = self.text_deriv(id, value, ns);
            self.nullable(d)
        }
    }

    pub(crate) fn start_tag_close_deriv(&mut self, id: PatId) -> PatId {
        match self.patt(id) {
            Pat::After(p1, p2) => {
                let d = self.start_tag_close_deriv(p1);
                self.after(d, p2)
            }
            Pat::Choice(p1, p2, _) => {
                let c1 = self.start_tag_close_deriv(p1);
                let c2 = self.start_tag_close_deriv(p2);
                self.choice(c1, c2)
            }
            Pat::Group(p1, p2, _) => {
                let c1 = self.start_tag_close_deriv(p1);
                let c2 = self.start_tag_close_deriv(p2);
                self.group(c1, c2)
            }
            Pat::Interleave(p1, p2, _) => {
                let c1 = self.start_tag_close_deriv(p1);
                let c2 = self.start_tag_close_deriv(p2);
                self.interleave(c1, c2)
            }
            Pat::OneOrMore(p, _) => {
                let d = self.start_tag_close_deriv(p);
                self.one_or_more(d)
            }
            Pat::Attribute(_, _) => self.not_allowed(),
            _ => id,
        }
    }

    pub(crate) fn end_tag_deriv(&mut self, id: PatId) -> PatId {
        match self.patt(id) {
            Pat::Choice(p1, p2, _) => {
                let c1 = self.end_tag_deriv(p1);
                let c2 = self.end_tag_deriv(p2);
                self.choice(c1, c2)
            }
            Pat::After(p1, p2) => {
                if self.nullable(p1) {
                    p2
                } else {
                    self.not_allowed()
                }
            }
            _ => self.not_allowed(),
        }
    }

    /// Recovery variant of the end-tag derivative: surrender the element's
    /// remaining obligations and continue with the After continuations, so
    /// one incomplete element doesn't cascade into errors for its siblings.
    pub(crate) fn force_end(&mut self, id: PatId) -> PatId {
        match self.patt(id) {
            Pat::Choice(p1, p2, _) => {
                let c1 = self.force_end(p1);
                let c2 = self.force_end(p2);
                self.choice(c1, c2)
            }
            Pat::After(_, p2) => p2,
            _ => self.not_allowed(),
        }
    }

    /// Recovery variant of the start-tag-close derivative: treat missing
    /// required attributes as satisfied.
    pub(crate) fn start_tag_close_forced(&mut self, id: PatId) -> PatId {
        match self.patt(id) {
            Pat::After(p1, p2) => {
                let d = self.start_tag_close_forced(p1);
                self.after(d, p2)
            }
            Pat::Choice(p1, p2, _) => {
                let c1 = self.start_tag_close_forced(p1);
                let c2 = self.start_tag_close_forced(p2);
                self.choice(c1, c2)
            }
            Pat::Group(p1, p2, _) => {
                let c1 = self.start_tag_close_forced(p1);
                let c2 = self.start_tag_close_forced(p2);
                self.group(c1, c2)
            }
            Pat::Interleave(p1, p2, _) => {
                let c1 = self.start_tag_close_forced(p1);
                let c2 = self.start_tag_close_forced(p2);
                self.interleave(c1, c2)
            }
            Pat::OneOrMore(p, _) => {
                let d = self.start_tag_close_forced(p);
                self.one_or_more(d)
            }
            Pat::Attribute(_, _) => self.empty(),
            _ => id,
        }
    }

    // https://www.kohsuke.org/relaxng/implbook/Validation1.html#IDATGOO
    fn head(&self, result: &mut Vec<Pat>, id: PatId) {
        let pat = self.patt(id);
        match pat {
            Pat::Choice(p1, p2, _) | Pat::Interleave(p1, p2, _) => {
                self.head(result, p1);
                self.head(result, p2);
            }
            Pat::Group(p1, p2, _) => {
                self.head(result, p1);
                if self.nullable(p1) {
                    self.head(result, p2);
                }
            }
            Pat::OneOrMore(p, _) | Pat::List(p) => self.head(result, p),
            Pat::After(p, _) => self.head(result, p),
            Pat::Empty | Pat::Text | Pat::NotAllowed => {}
            Pat::Attribute(_, _)
            | Pat::Element(_, _)
            | Pat::Datatype(_)
            | Pat::DatatypeValue(_)
            | Pat::DatatypeExcept(_, _) => {
                if !result.contains(&pat) {
                    result.push(pat);
                }
            }
            Pat::Placeholder(n) => unreachable!("unresolved placeholder {}", n),
        }
    }

    /// Human-readable summary of what the pattern expects next, used in
    /// validation error messages.
    pub(crate) fn describe_expected(&self, id: PatId) -> String {
        let mut heads = Vec::new();
        self.head(&mut heads, id);
        const MAX_NAMES: usize = 4;
        let mut elements = Vec::new();
        let mut attributes = Vec::new();
        let mut data = false;
        for pat in &heads {
            match pat {
                Pat::Element(nc, _) => elements.push(describe_nameclass(nc)),
                Pat::Attribute(nc, _) => attributes.push(describe_nameclass(nc)),
                Pat::Datatype(_) | Pat::DatatypeValue(_) | Pat::DatatypeExcept(_, _) => {
                    data = true;
                }
                _ => {}
            }
        }
        let mut parts = Vec::new();
        for (label, mut names) in [("element", elements), ("attribute", attributes)] {
            if names.is_empty() {
                continue;
            }
            let rest = names.len().saturating_sub(MAX_NAMES);
            names.truncate(MAX_NAMES);
            let mut part = format!("{} {}", label, names.join(" | "));
            if rest > 0 {
                part.push_str(&format!(" or one of {} more", rest));
            }
            parts.push(part);
        }
        if data {
            parts.push("character data".to_string());
        }
        parts.join(", or ")
    }
}

fn describe_nameclass(nc: &NameClass) -> String {
    let mut desc = String::new();
    describe_nameclass_into(nc, &mut desc);
    desc
}

fn describe_nameclass_into(nc: &NameClass, desc: &mut String) {
    match nc {
        NameClass::Named { name, .. } => desc.push_str(name),
        NameClass::NsName {
            namespace_uri,
            except,
        } => {
            desc.push_str(namespace_uri);
            desc.push_str(":*");
            if let Some(except) = except {
                desc.push('-');
                describe_nameclass_into(except, desc);
            }
        }
        NameClass::AnyName { except } => {
            desc.push('*');
            if let Some(except) = except {
                desc.push('-');
                describe_nameclass_into(except, desc);
            }
        }
        NameClass::Alt { a, b } => {
            describe_nameclass_into(a, desc);
            desc.push('|');
            describe_nameclass_into(b, desc);
        }
    }
}
