//! Compact numeric serialisation of compiled grammars.
//!
//! The envelope is `{"v":3,"o":<option bits>,"d":<data>}`.  Data is nested
//! arrays: a leading `0` marks an array of items, any other leading integer
//! names a pattern or name-class kind.  Option bit 1 means pattern paths
//! are omitted.  The rename optimisation replaces define/ref names with
//! small integers assigned in decreasing order of use, so the most
//! referenced definitions get the shortest encodings.

use crate::model::{Define, Grammar, NameClass, Param, Pattern, PatternKind};
use crate::RelaxError;
use serde_json::{json, Value};
use std::collections::HashMap;

pub const FORMAT_VERSION: u64 = 3;
pub const OPTION_NO_PATHS: u64 = 1;

mod kind {
    pub const ARRAY: u64 = 0;
    pub const EMPTY: u64 = 1;
    pub const DATA: u64 = 2;
    pub const LIST: u64 = 3;
    pub const PARAM: u64 = 4;
    pub const VALUE: u64 = 5;
    pub const NOT_ALLOWED: u64 = 6;
    pub const TEXT: u64 = 7;
    pub const REF: u64 = 8;
    pub const ONE_OR_MORE: u64 = 9;
    pub const CHOICE: u64 = 10;
    pub const GROUP: u64 = 11;
    pub const ATTRIBUTE: u64 = 12;
    pub const ELEMENT: u64 = 13;
    pub const DEFINE: u64 = 14;
    pub const GRAMMAR: u64 = 15;
    // legacy expanded-name form, read as NAME
    pub const ENAME: u64 = 16;
    pub const INTERLEAVE: u64 = 17;
    pub const NAME: u64 = 18;
    pub const NAME_CHOICE: u64 = 19;
    pub const NS_NAME: u64 = 20;
    pub const ANY_NAME: u64 = 21;
}

#[derive(Clone, Debug)]
pub struct WriteOptions {
    pub rename: bool,
    pub paths: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            rename: true,
            paths: false,
        }
    }
}

pub fn write_grammar(grammar: &Grammar, options: &WriteOptions) -> Value {
    let writer = Writer {
        names: name_table(grammar, options.rename),
        paths: options.paths,
    };
    let mut o = 0u64;
    if !options.paths {
        o |= OPTION_NO_PATHS;
    }
    json!({ "v": FORMAT_VERSION, "o": o, "d": writer.grammar(grammar) })
}

/// Usage counts decide the renumbering; ties break on the name itself so
/// the assignment is deterministic.
fn name_table(grammar: &Grammar, rename: bool) -> Option<HashMap<String, u64>> {
    if !rename {
        return None;
    }
    let mut counts: HashMap<String, u64> = grammar
        .defines
        .iter()
        .map(|d| (d.name.clone(), 1))
        .collect();
    count_refs(&grammar.start, &mut counts);
    for d in &grammar.defines {
        count_refs(&d.pattern, &mut counts);
    }
    let mut names: Vec<(String, u64)> = counts.into_iter().collect();
    names.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Some(
        names
            .into_iter()
            .enumerate()
            .map(|(i, (n, _))| (n, i as u64))
            .collect(),
    )
}

fn count_refs(p: &Pattern, counts: &mut HashMap<String, u64>) {
    match &p.kind {
        PatternKind::Ref(name) => {
            *counts.entry(name.clone()).or_insert(0) += 1;
        }
        PatternKind::List(inner)
        | PatternKind::OneOrMore(inner)
        | PatternKind::Element(_, inner)
        | PatternKind::Attribute(_, inner) => count_refs(inner, counts),
        PatternKind::Choice(a, b)
        | PatternKind::Group(a, b)
        | PatternKind::Interleave(a, b) => {
            count_refs(a, counts);
            count_refs(b, counts);
        }
        PatternKind::Data {
            except: Some(e), ..
        } => count_refs(e, counts),
        _ => {}
    }
}

struct Writer {
    names: Option<HashMap<String, u64>>,
    paths: bool,
}

impl Writer {
    fn name(&self, name: &str) -> Value {
        match &self.names {
            Some(map) => json!(map[name]),
            None => json!(name),
        }
    }

    fn begin(&self, code: u64, path: &str) -> Vec<Value> {
        let mut arr = vec![json!(code)];
        if self.paths {
            arr.push(json!(path));
        }
        arr
    }

    fn grammar(&self, g: &Grammar) -> Value {
        let mut arr = self.begin(kind::GRAMMAR, "");
        arr.push(self.pattern(&g.start));
        let mut defines = vec![json!(kind::ARRAY)];
        defines.extend(g.defines.iter().map(|d| self.define(d)));
        arr.push(Value::Array(defines));
        Value::Array(arr)
    }

    fn define(&self, d: &Define) -> Value {
        let mut arr = self.begin(kind::DEFINE, &d.path);
        arr.push(self.name(&d.name));
        arr.push(self.pattern(&d.pattern));
        Value::Array(arr)
    }

    fn pattern(&self, p: &Pattern) -> Value {
        let arr = match &p.kind {
            PatternKind::Empty => self.begin(kind::EMPTY, &p.path),
            PatternKind::NotAllowed => self.begin(kind::NOT_ALLOWED, &p.path),
            PatternKind::Text => self.begin(kind::TEXT, &p.path),
            PatternKind::Value {
                datatype_library,
                type_name,
                ns,
                value,
            } => {
                let mut arr = self.begin(kind::VALUE, &p.path);
                arr.push(json!(value));
                // the defaulted token type omits the type/library/ns suffix
                if !(type_name == "token" && datatype_library.is_empty() && ns.is_empty()) {
                    arr.push(json!(type_name));
                    arr.push(json!(datatype_library));
                    arr.push(json!(ns));
                }
                arr
            }
            PatternKind::Data {
                datatype_library,
                type_name,
                params,
                except,
            } => {
                let mut arr = self.begin(kind::DATA, &p.path);
                arr.push(json!(type_name));
                arr.push(json!(datatype_library));
                if !params.is_empty() {
                    let mut ps = vec![json!(kind::ARRAY)];
                    ps.extend(params.iter().map(|p| self.param(p)));
                    arr.push(Value::Array(ps));
                }
                if let Some(e) = except {
                    arr.push(self.pattern(e));
                }
                arr
            }
            PatternKind::List(inner) => {
                let mut arr = self.begin(kind::LIST, &p.path);
                arr.push(self.pattern(inner));
                arr
            }
            PatternKind::Ref(name) => {
                let mut arr = self.begin(kind::REF, &p.path);
                arr.push(self.name(name));
                arr
            }
            PatternKind::OneOrMore(inner) => {
                let mut arr = self.begin(kind::ONE_OR_MORE, &p.path);
                arr.push(self.pattern(inner));
                arr
            }
            PatternKind::Choice(a, b) => {
                let mut arr = self.begin(kind::CHOICE, &p.path);
                arr.push(self.pattern(a));
                arr.push(self.pattern(b));
                arr
            }
            PatternKind::Group(a, b) => {
                let mut arr = self.begin(kind::GROUP, &p.path);
                arr.push(self.pattern(a));
                arr.push(self.pattern(b));
                arr
            }
            PatternKind::Interleave(a, b) => {
                let mut arr = self.begin(kind::INTERLEAVE, &p.path);
                arr.push(self.pattern(a));
                arr.push(self.pattern(b));
                arr
            }
            PatternKind::Element(nc, body) => {
                let mut arr = self.begin(kind::ELEMENT, &p.path);
                arr.push(self.name_class(nc));
                arr.push(self.pattern(body));
                arr
            }
            PatternKind::Attribute(nc, body) => {
                let mut arr = self.begin(kind::ATTRIBUTE, &p.path);
                arr.push(self.name_class(nc));
                arr.push(self.pattern(body));
                arr
            }
        };
        Value::Array(arr)
    }

    fn param(&self, p: &Param) -> Value {
        json!([kind::PARAM, p.name, p.value])
    }

    fn name_class(&self, nc: &NameClass) -> Value {
        match nc {
            NameClass::Named {
                namespace_uri,
                name,
            } => json!([kind::NAME, namespace_uri, name]),
            NameClass::NsName {
                namespace_uri,
                except,
            } => {
                let mut arr = vec![json!(kind::NS_NAME), json!(namespace_uri)];
                if let Some(e) = except {
                    arr.push(self.name_class(e));
                }
                Value::Array(arr)
            }
            NameClass::AnyName { except } => {
                let mut arr = vec![json!(kind::ANY_NAME)];
                if let Some(e) = except {
                    arr.push(self.name_class(e));
                }
                Value::Array(arr)
            }
            NameClass::Alt { a, b } => {
                json!([kind::NAME_CHOICE, self.name_class(a), self.name_class(b)])
            }
        }
    }
}

fn malformed(message: impl Into<String>) -> RelaxError {
    RelaxError::MalformedCompact(message.into())
}

pub fn read_grammar(value: &Value) -> Result<Grammar, RelaxError> {
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("top level is not an object"))?;
    let v = match obj.get("v") {
        None => return Err(RelaxError::OldFormat),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| malformed("version is not a number"))?,
    };
    if v != FORMAT_VERSION {
        return Err(RelaxError::UnknownFormat(v));
    }
    let o = obj.get("o").and_then(Value::as_u64).unwrap_or(0);
    let reader = Reader {
        paths: o & OPTION_NO_PATHS == 0,
    };
    let d = obj.get("d").ok_or_else(|| malformed("missing data member"))?;
    reader.grammar(d)
}

struct Items<'a> {
    items: &'a [Value],
    pos: usize,
}

impl<'a> Items<'a> {
    fn next(&mut self) -> Result<&'a Value, RelaxError> {
        let v = self
            .items
            .get(self.pos)
            .ok_or_else(|| malformed("array is shorter than its kind requires"))?;
        self.pos += 1;
        Ok(v)
    }

    fn try_next(&mut self) -> Option<&'a Value> {
        let v = self.items.get(self.pos);
        if v.is_some() {
            self.pos += 1;
        }
        v
    }

    fn next_str(&mut self) -> Result<String, RelaxError> {
        self.next()?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| malformed("expected a string"))
    }
}

fn open_array(v: &Value) -> Result<(u64, Items<'_>), RelaxError> {
    let arr = v.as_array().ok_or_else(|| malformed("expected an array"))?;
    let code = arr
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("array does not start with a kind code"))?;
    Ok((
        code,
        Items {
            items: &arr[1..],
            pos: 0,
        },
    ))
}

fn name_value(v: &Value) -> Result<String, RelaxError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(malformed("expected a definition name")),
    }
}

struct Reader {
    paths: bool,
}

impl Reader {
    fn path(&self, items: &mut Items<'_>) -> Result<String, RelaxError> {
        if self.paths {
            items.next_str()
        } else {
            Ok(String::new())
        }
    }

    fn grammar(&self, v: &Value) -> Result<Grammar, RelaxError> {
        let (code, mut items) = open_array(v)?;
        if code != kind::GRAMMAR {
            return Err(malformed("data does not hold a grammar"));
        }
        let _path = self.path(&mut items)?;
        let start = self.pattern(items.next()?)?;
        let (defs_code, mut defs) = open_array(items.next()?)?;
        if defs_code != kind::ARRAY {
            return Err(malformed("definitions are not a plain array"));
        }
        let mut defines = Vec::new();
        while let Some(d) = defs.try_next() {
            defines.push(self.define(d)?);
        }
        Ok(Grammar { start, defines })
    }

    fn define(&self, v: &Value) -> Result<Define, RelaxError> {
        let (code, mut items) = open_array(v)?;
        if code != kind::DEFINE {
            return Err(malformed("expected a define"));
        }
        let path = self.path(&mut items)?;
        let name = name_value(items.next()?)?;
        let pattern = self.pattern(items.next()?)?;
        Ok(Define {
            name,
            path,
            pattern,
        })
    }

    fn pattern(&self, v: &Value) -> Result<Pattern, RelaxError> {
        let (code, mut items) = open_array(v)?;
        let path = self.path(&mut items)?;
        let kind = match code {
            kind::EMPTY => PatternKind::Empty,
            kind::NOT_ALLOWED => PatternKind::NotAllowed,
            kind::TEXT => PatternKind::Text,
            kind::VALUE => {
                let value = items.next_str()?;
                match items.try_next() {
                    Some(t) => {
                        let type_name =
                            t.as_str().ok_or_else(|| malformed("expected a type name"))?;
                        PatternKind::Value {
                            type_name: type_name.to_string(),
                            datatype_library: items.next_str()?,
                            ns: items.next_str()?,
                            value,
                        }
                    }
                    None => PatternKind::Value {
                        type_name: "token".to_string(),
                        datatype_library: String::new(),
                        ns: String::new(),
                        value,
                    },
                }
            }
            kind::DATA => {
                let type_name = items.next_str()?;
                let datatype_library = items.next_str()?;
                let mut params = Vec::new();
                let mut except = None;
                while let Some(next) = items.try_next() {
                    let (code, mut inner) = open_array(next)?;
                    if code == kind::ARRAY {
                        while let Some(p) = inner.try_next() {
                            params.push(self.param(p)?);
                        }
                    } else {
                        except = Some(Box::new(self.pattern(next)?));
                    }
                }
                PatternKind::Data {
                    datatype_library,
                    type_name,
                    params,
                    except,
                }
            }
            kind::LIST => PatternKind::List(Box::new(self.pattern(items.next()?)?)),
            kind::REF => PatternKind::Ref(name_value(items.next()?)?),
            kind::ONE_OR_MORE => {
                PatternKind::OneOrMore(Box::new(self.pattern(items.next()?)?))
            }
            kind::CHOICE | kind::GROUP | kind::INTERLEAVE => {
                let a = Box::new(self.pattern(items.next()?)?);
                let b = Box::new(self.pattern(items.next()?)?);
                match code {
                    kind::CHOICE => PatternKind::Choice(a, b),
                    kind::GROUP => PatternKind::Group(a, b),
                    _ => PatternKind::Interleave(a, b),
                }
            }
            kind::ELEMENT | kind::ATTRIBUTE => {
                let nc = self.name_class(items.next()?)?;
                let body = Box::new(self.pattern(items.next()?)?);
                if code == kind::ELEMENT {
                    PatternKind::Element(nc, body)
                } else {
                    PatternKind::Attribute(nc, body)
                }
            }
            other => return Err(malformed(format!("unexpected pattern code {}", other))),
        };
        Ok(Pattern::new(path, kind))
    }

    fn param(&self, v: &Value) -> Result<Param, RelaxError> {
        let (code, mut items) = open_array(v)?;
        if code != kind::PARAM {
            return Err(malformed("expected a param"));
        }
        Ok(Param {
            name: items.next_str()?,
            value: items.next_str()?,
        })
    }

    fn name_class(&self, v: &Value) -> Result<NameClass, RelaxError> {
        let (code, mut items) = open_array(v)?;
        Ok(match code {
            kind::NAME | kind::ENAME => NameClass::Named {
                namespace_uri: items.next_str()?,
                name: items.next_str()?,
            },
            kind::NS_NAME => NameClass::NsName {
                namespace_uri: items.next_str()?,
                except: match items.try_next() {
                    Some(e) => Some(Box::new(self.name_class(e)?)),
                    None => None,
                },
            },
            kind::ANY_NAME => NameClass::AnyName {
                except: match items.try_next() {
                    Some(e) => Some(Box::new(self.name_class(e)?)),
                    None => None,
                },
            },
            kind::NAME_CHOICE => NameClass::Alt {
                a: Box::new(self.name_class(items.next()?)?),
                b: Box::new(self.name_class(items.next()?)?),
            },
            other => return Err(malformed(format!("unexpected name class code {}", other))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn pat(kind: PatternKind) -> Pattern {
        Pattern::new(String::new(), kind)
    }

    fn sample_grammar() -> Grammar {
        let element = PatternKind::Element(
            NameClass::Named {
                namespace_uri: String::new(),
                name: "doc".to_string(),
            },
            Box::new(pat(PatternKind::Group(
                Box::new(pat(PatternKind::Attribute(
                    NameClass::Named {
                        namespace_uri: String::new(),
                        name: "id".to_string(),
                    },
                    Box::new(pat(PatternKind::Data {
                        datatype_library: String::new(),
                        type_name: "token".to_string(),
                        params: vec![],
                        except: None,
                    })),
                ))),
                Box::new(pat(PatternKind::Choice(
                    Box::new(pat(PatternKind::Value {
                        datatype_library: String::new(),
                        type_name: "token".to_string(),
                        ns: String::new(),
                        value: "yes".to_string(),
                    })),
                    Box::new(pat(PatternKind::Ref("__doc-elt-1".to_string()))),
                ))),
            ))),
        );
        Grammar {
            start: pat(PatternKind::Ref("__doc-elt-1".to_string())),
            defines: vec![Define {
                name: "__doc-elt-1".to_string(),
                path: String::new(),
                pattern: pat(element),
            }],
        }
    }

    #[test]
    fn round_trips_without_rename() {
        let g = sample_grammar();
        let json = write_grammar(
            &g,
            &WriteOptions {
                rename: false,
                paths: false,
            },
        );
        let back = read_grammar(&json).unwrap();
        assert_eq!(g, back);
    }

    #[test]
    fn rename_preserves_reference_structure() {
        let g = sample_grammar();
        let json = write_grammar(&g, &WriteOptions::default());
        let back = read_grammar(&json).unwrap();
        assert_eq!(back.defines.len(), 1);
        let renamed = back.defines[0].name.clone();
        match &back.start.kind {
            PatternKind::Ref(name) => assert_eq!(*name, renamed),
            other => panic!("unexpected start {:?}", other),
        }
        // a second emission without rename reproduces the same shape
        let again = write_grammar(
            &back,
            &WriteOptions {
                rename: false,
                paths: false,
            },
        );
        assert_eq!(read_grammar(&again).unwrap(), back);
    }

    #[test]
    fn paths_survive_when_requested() {
        let mut g = sample_grammar();
        g.start.path = "/grammar/start/ref".to_string();
        let json = write_grammar(
            &g,
            &WriteOptions {
                rename: false,
                paths: true,
            },
        );
        let back = read_grammar(&json).unwrap();
        assert_eq!(back.start.path, "/grammar/start/ref");
    }

    #[test]
    fn missing_version_is_old_format() {
        let json = serde_json::json!({ "o": 0, "d": [] });
        assert_matches!(read_grammar(&json), Err(RelaxError::OldFormat));
    }

    #[test]
    fn other_versions_are_unknown() {
        let json = serde_json::json!({ "v": 2, "o": 0, "d": [] });
        assert_matches!(read_grammar(&json), Err(RelaxError::UnknownFormat(2)));
    }

    #[test]
    fn legacy_ename_reads_as_name() {
        let json = serde_json::json!({
            "v": 3,
            "o": 1,
            "d": [15,
                  [13, [16, "", "a"], [7]],
                  [0]]
        });
        let g = read_grammar(&json).unwrap();
        assert_matches!(
            g.start.kind,
            PatternKind::Element(NameClass::Named { .. }, _)
        );
    }
}
