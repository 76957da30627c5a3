//! Conversion of a fully-simplified schema tree into the pattern model.
//!
//! The simplifier guarantees binary combinators, explicit name classes and
//! a `grammar` top level; anything else found here is a structure error.
//! Datatypes are checked as patterns are built, so facet and literal
//! problems surface with the schema path that caused them.

use crate::model::{Define, Grammar, NameClass, Param, Pattern, PatternKind};
use crate::{datatype, structure_error, CompileOptions, RelaxError};
use rngx_syntax::tree::{Doc, NodeId};

pub fn compile(doc: &Doc, root: NodeId, options: &CompileOptions) -> Result<Grammar, RelaxError> {
    if !doc.is_element(root) || doc.name(root) != "grammar" {
        return Err(structure_error(
            doc.path_of(root),
            "expected a grammar element at the top level",
        ));
    }
    let mut start = None;
    let mut defines: Vec<Define> = Vec::new();
    for c in doc.child_elements(root) {
        match doc.name(c) {
            "start" => {
                if start.is_some() {
                    return Err(structure_error(
                        doc.path_of(c),
                        "more than one start in the simplified grammar",
                    ));
                }
                let body = single_child(doc, c)?;
                start = Some(build_pattern(doc, body, options)?);
            }
            "define" => {
                let name = doc.must_attribute(c, "name")?.to_string();
                if defines.iter().any(|d| d.name == name) {
                    return Err(structure_error(
                        doc.path_of(c),
                        format!("duplicate definition {:?}", name),
                    ));
                }
                let body = single_child(doc, c)?;
                let pattern = build_pattern(doc, body, options)?;
                defines.push(Define {
                    name,
                    path: doc.path_of(c),
                    pattern,
                });
            }
            other => {
                let message = format!("unexpected {:?} in a simplified grammar", other);
                return Err(structure_error(doc.path_of(c), message));
            }
        }
    }
    let grammar = Grammar {
        start: start
            .ok_or_else(|| structure_error(doc.path_of(root), "grammar has no start"))?,
        defines,
    };
    crate::restrictions::check(&grammar)?;
    Ok(grammar)
}

fn single_child(doc: &Doc, id: NodeId) -> Result<NodeId, RelaxError> {
    let kids = doc.child_elements(id);
    if kids.len() == 1 {
        Ok(kids[0])
    } else {
        Err(structure_error(
            doc.path_of(id),
            format!("expected exactly one child pattern, found {}", kids.len()),
        ))
    }
}

fn build_pattern(doc: &Doc, id: NodeId, options: &CompileOptions) -> Result<Pattern, RelaxError> {
    let path = doc.path_of(id);
    let kids = doc.child_elements(id);
    let kind = match doc.name(id) {
        "empty" => PatternKind::Empty,
        "notAllowed" => PatternKind::NotAllowed,
        "text" => PatternKind::Text,
        "value" => {
            let type_name = doc.attribute(id, "type").unwrap_or("token").to_string();
            let library = doc.attribute(id, "datatypeLibrary").unwrap_or("").to_string();
            let ns = doc.attribute(id, "ns").unwrap_or("").to_string();
            let literal = doc.text(id);
            datatype::compile_value(&library, &type_name, &literal, &path, options.incomplete_types)?;
            PatternKind::Value {
                datatype_library: library,
                type_name,
                ns,
                value: literal,
            }
        }
        "data" => {
            let type_name = doc.must_attribute(id, "type")?.to_string();
            let library = doc.attribute(id, "datatypeLibrary").unwrap_or("").to_string();
            let mut params = Vec::new();
            let mut except = None;
            for &c in &kids {
                match doc.name(c) {
                    "param" => params.push(Param {
                        name: doc.must_attribute(c, "name")?.to_string(),
                        value: doc.text(c),
                    }),
                    "except" => {
                        let body = single_child(doc, c)?;
                        except = Some(Box::new(build_pattern(doc, body, options)?));
                    }
                    other => {
                        let message = format!("unexpected {:?} inside data", other);
                        return Err(structure_error(doc.path_of(c), message));
                    }
                }
            }
            datatype::compile_datatype(&library, &type_name, &params, &path, options.incomplete_types)?;
            PatternKind::Data {
                datatype_library: library,
                type_name,
                params,
                except,
            }
        }
        "list" => PatternKind::List(Box::new(build_pattern(
            doc,
            single_child(doc, id)?,
            options,
        )?)),
        "ref" => PatternKind::Ref(doc.must_attribute(id, "name")?.to_string()),
        "oneOrMore" => PatternKind::OneOrMore(Box::new(build_pattern(
            doc,
            single_child(doc, id)?,
            options,
        )?)),
        "choice" | "group" | "interleave" => {
            if kids.len() != 2 {
                return Err(structure_error(
                    path,
                    "combinators must be binary in the simplified form",
                ));
            }
            let a = Box::new(build_pattern(doc, kids[0], options)?);
            let b = Box::new(build_pattern(doc, kids[1], options)?);
            match doc.name(id) {
                "choice" => PatternKind::Choice(a, b),
                "group" => PatternKind::Group(a, b),
                _ => PatternKind::Interleave(a, b),
            }
        }
        "element" | "attribute" => {
            if kids.len() != 2 {
                return Err(structure_error(path, "expected a name class and a pattern"));
            }
            let nc = build_name_class(doc, kids[0])?;
            let body = Box::new(build_pattern(doc, kids[1], options)?);
            if doc.name(id) == "element" {
                PatternKind::Element(nc, body)
            } else {
                PatternKind::Attribute(nc, body)
            }
        }
        other => {
            let message = format!("unexpected pattern element {:?}", other);
            return Err(structure_error(path, message));
        }
    };
    Ok(Pattern::new(path, kind))
}

fn build_name_class(doc: &Doc, id: NodeId) -> Result<NameClass, RelaxError> {
    let kids = doc.child_elements(id);
    match doc.name(id) {
        "name" => Ok(NameClass::Named {
            namespace_uri: doc.attribute(id, "ns").unwrap_or("").to_string(),
            name: doc.text(id).trim().to_string(),
        }),
        "nsName" => Ok(NameClass::NsName {
            namespace_uri: doc.attribute(id, "ns").unwrap_or("").to_string(),
            except: name_class_except(doc, &kids)?,
        }),
        "anyName" => Ok(NameClass::AnyName {
            except: name_class_except(doc, &kids)?,
        }),
        "choice" => {
            if kids.len() != 2 {
                return Err(structure_error(
                    doc.path_of(id),
                    "name-class choice must be binary in the simplified form",
                ));
            }
            Ok(NameClass::Alt {
                a: Box::new(build_name_class(doc, kids[0])?),
                b: Box::new(build_name_class(doc, kids[1])?),
            })
        }
        other => {
            let message = format!("unexpected name class element {:?}", other);
            Err(structure_error(doc.path_of(id), message))
        }
    }
}

fn name_class_except(doc: &Doc, kids: &[NodeId]) -> Result<Option<Box<NameClass>>, RelaxError> {
    match kids.first() {
        None => Ok(None),
        Some(&e) if doc.name(e) == "except" => {
            let inner = single_child(doc, e)?;
            Ok(Some(Box::new(build_name_class(doc, inner)?)))
        }
        Some(&e) => {
            let message = format!("unexpected {:?} inside a name class", doc.name(e));
            Err(structure_error(doc.path_of(e), message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rngx_syntax::parse::parse_document;

    fn compile_str(src: &str) -> Result<Grammar, RelaxError> {
        let (doc, root) = parse_document(src).unwrap();
        compile(&doc, root, &CompileOptions::default())
    }

    const NS: &str = "xmlns=\"http://relaxng.org/ns/structure/1.0\"";

    #[test]
    fn builds_a_simplified_grammar() {
        let g = compile_str(&format!(
            "<grammar {}>\
               <start><ref name=\"__a-elt-1\"/></start>\
               <define name=\"__a-elt-1\">\
                 <element><name ns=\"\">a</name><text/></element>\
               </define>\
             </grammar>",
            NS
        ))
        .unwrap();
        assert_eq!(g.defines.len(), 1);
        assert_matches!(g.start.kind, PatternKind::Ref(_));
        match &g.defines[0].pattern.kind {
            PatternKind::Element(NameClass::Named { name, .. }, body) => {
                assert_eq!(name, "a");
                assert_matches!(body.kind, PatternKind::Text);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_non_grammar_top_level() {
        let err = compile_str(&format!("<element {}><name>a</name><text/></element>", NS));
        assert_matches!(err, Err(RelaxError::SchemaStructure { .. }));
    }

    #[test]
    fn rejects_unresolved_refs() {
        let err = compile_str(&format!(
            "<grammar {}><start><ref name=\"missing\"/></start></grammar>",
            NS
        ));
        assert_matches!(err, Err(RelaxError::SchemaStructure { .. }));
    }

    #[test]
    fn data_params_are_checked() {
        let err = compile_str(&format!(
            "<grammar {}>\
               <start><ref name=\"__a-elt-1\"/></start>\
               <define name=\"__a-elt-1\">\
                 <element><name ns=\"\">a</name>\
                   <data type=\"integer\" datatypeLibrary=\"http://www.w3.org/2001/XMLSchema-datatypes\">\
                     <param name=\"minInclusive\">several</param>\
                   </data>\
                 </element>\
               </define>\
             </grammar>",
            NS
        ));
        assert_matches!(err, Err(RelaxError::DatatypeParameter { .. }));
    }

    #[test]
    fn value_literals_are_checked() {
        let err = compile_str(&format!(
            "<grammar {}>\
               <start><ref name=\"__a-elt-1\"/></start>\
               <define name=\"__a-elt-1\">\
                 <element><name ns=\"\">a</name>\
                   <value type=\"short\" datatypeLibrary=\"http://www.w3.org/2001/XMLSchema-datatypes\">70000</value>\
                 </element>\
               </define>\
             </grammar>",
            NS
        ));
        assert_matches!(err, Err(RelaxError::DatatypeValue { .. }));
    }
}
