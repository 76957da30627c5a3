//! Restriction checking on compiled grammars.
//!
//! The structural restrictions that survive simplification: what may appear
//! under `start`, what a data `except` may contain, and the `oneOrMore`
//! requirement for attributes with infinite name classes.  Reference
//! resolution is verified first so the other walks can follow refs safely.
//!
//! Reference: <https://relaxng.org/spec-20011203.html#section7>

use crate::model::{Grammar, Pattern, PatternKind};
use crate::{structure_error, RelaxError};
use std::collections::HashSet;

pub fn check(grammar: &Grammar) -> Result<(), RelaxError> {
    check_refs(grammar, &grammar.start)?;
    for d in &grammar.defines {
        check_refs(grammar, &d.pattern)?;
    }
    let mut seen = HashSet::new();
    check_start(grammar, &grammar.start, &mut seen)?;
    check_content(&grammar.start, false)?;
    for d in &grammar.defines {
        check_content(&d.pattern, false)?;
    }
    Ok(())
}

fn children(p: &Pattern) -> Vec<&Pattern> {
    match &p.kind {
        PatternKind::List(inner)
        | PatternKind::OneOrMore(inner)
        | PatternKind::Element(_, inner)
        | PatternKind::Attribute(_, inner) => vec![inner],
        PatternKind::Choice(a, b)
        | PatternKind::Group(a, b)
        | PatternKind::Interleave(a, b) => vec![a, b],
        PatternKind::Data {
            except: Some(e), ..
        } => vec![e],
        _ => Vec::new(),
    }
}

fn check_refs(grammar: &Grammar, p: &Pattern) -> Result<(), RelaxError> {
    if let PatternKind::Ref(name) = &p.kind {
        if grammar.define(name).is_none() {
            return Err(structure_error(
                p.path.clone(),
                format!("reference to undefined pattern {:?}", name),
            ));
        }
    }
    for c in children(p) {
        check_refs(grammar, c)?;
    }
    Ok(())
}

// Only element, ref, choice and notAllowed may appear under start.
fn check_start<'g>(
    grammar: &'g Grammar,
    p: &'g Pattern,
    seen: &mut HashSet<&'g str>,
) -> Result<(), RelaxError> {
    match &p.kind {
        PatternKind::Element(_, _) | PatternKind::NotAllowed => Ok(()),
        PatternKind::Choice(a, b) => {
            check_start(grammar, a, seen)?;
            check_start(grammar, b, seen)
        }
        PatternKind::Ref(name) => {
            if seen.insert(name.as_str()) {
                let define = grammar.define(name).expect("refs checked before start");
                check_start(grammar, &define.pattern, seen)
            } else {
                Ok(())
            }
        }
        other => Err(structure_error(
            p.path.clone(),
            format!("{} is not allowed under start", kind_name(other)),
        )),
    }
}

fn check_content(p: &Pattern, in_one_or_more: bool) -> Result<(), RelaxError> {
    match &p.kind {
        PatternKind::Attribute(nc, body) => {
            if nc.is_infinite() && !in_one_or_more {
                return Err(structure_error(
                    p.path.clone(),
                    "an attribute with an anyName or nsName name class must be inside oneOrMore",
                ));
            }
            check_content(body, false)
        }
        PatternKind::OneOrMore(body) => check_content(body, true),
        PatternKind::Element(_, body) => check_content(body, false),
        PatternKind::Data {
            except: Some(e), ..
        } => check_data_except(e),
        _ => {
            for c in children(p) {
                check_content(c, in_one_or_more)?;
            }
            Ok(())
        }
    }
}

// A data except may contain only data, value and choice.
fn check_data_except(p: &Pattern) -> Result<(), RelaxError> {
    match &p.kind {
        PatternKind::Value { .. } => Ok(()),
        PatternKind::Data { except, .. } => match except {
            Some(e) => check_data_except(e),
            None => Ok(()),
        },
        PatternKind::Choice(a, b) => {
            check_data_except(a)?;
            check_data_except(b)
        }
        other => Err(structure_error(
            p.path.clone(),
            format!("{} is not allowed inside a data except", kind_name(other)),
        )),
    }
}

fn kind_name(kind: &PatternKind) -> &'static str {
    match kind {
        PatternKind::Empty => "empty",
        PatternKind::NotAllowed => "notAllowed",
        PatternKind::Text => "text",
        PatternKind::Value { .. } => "value",
        PatternKind::Data { .. } => "data",
        PatternKind::List(_) => "list",
        PatternKind::Ref(_) => "ref",
        PatternKind::OneOrMore(_) => "oneOrMore",
        PatternKind::Choice(_, _) => "choice",
        PatternKind::Group(_, _) => "group",
        PatternKind::Interleave(_, _) => "interleave",
        PatternKind::Element(_, _) => "element",
        PatternKind::Attribute(_, _) => "attribute",
    }
}
