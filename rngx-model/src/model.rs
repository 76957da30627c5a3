//! Data model for compiled patterns.
//!
//! The simplifier guarantees the shape this model requires: binary
//! `choice`/`group`/`interleave`, every `element` hoisted into a `define`,
//! and references resolved by name through the grammar's definition table.

/// A compiled schema: the start pattern plus the definition table that
/// `Ref` patterns resolve through.  The grammar exclusively owns its
/// definitions; references never link to them directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Grammar {
    pub start: Pattern,
    pub defines: Vec<Define>,
}

impl Grammar {
    pub fn define(&self, name: &str) -> Option<&Define> {
        self.defines.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Define {
    pub name: String,
    pub path: String,
    pub pattern: Pattern,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// Schema path for diagnostics, e.g. `/grammar/define[@name='x']/element`.
    pub path: String,
    pub kind: PatternKind,
}

impl Pattern {
    pub fn new(path: String, kind: PatternKind) -> Pattern {
        Pattern { path, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternKind {
    Empty,
    NotAllowed,
    Text,
    Value {
        datatype_library: String,
        type_name: String,
        ns: String,
        value: String,
    },
    Data {
        datatype_library: String,
        type_name: String,
        params: Vec<Param>,
        except: Option<Box<Pattern>>,
    },
    List(Box<Pattern>),
    Ref(String),
    OneOrMore(Box<Pattern>),
    Choice(Box<Pattern>, Box<Pattern>),
    Group(Box<Pattern>, Box<Pattern>),
    Interleave(Box<Pattern>, Box<Pattern>),
    Element(NameClass, Box<Pattern>),
    Attribute(NameClass, Box<Pattern>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NameClass {
    Named {
        namespace_uri: String,
        name: String,
    },
    NsName {
        namespace_uri: String,
        except: Option<Box<NameClass>>,
    },
    AnyName {
        except: Option<Box<NameClass>>,
    },
    Alt {
        a: Box<NameClass>,
        b: Box<NameClass>,
    },
}

impl NameClass {
    /// Does this name class match the given expanded name?
    pub fn contains(&self, namespace_uri: &str, name: &str) -> bool {
        match self {
            NameClass::Named {
                namespace_uri: ns,
                name: n,
            } => ns == namespace_uri && n == name,
            NameClass::NsName {
                namespace_uri: ns,
                except,
            } => {
                ns == namespace_uri
                    && match except {
                        Some(nc) => !nc.contains(namespace_uri, name),
                        None => true,
                    }
            }
            NameClass::AnyName { except } => match except {
                Some(nc) => !nc.contains(namespace_uri, name),
                None => true,
            },
            NameClass::Alt { a, b } => {
                a.contains(namespace_uri, name) || b.contains(namespace_uri, name)
            }
        }
    }

    /// True when the class places no restriction at all on names.
    pub fn allows_any_name(&self) -> bool {
        match self {
            NameClass::AnyName { except: None } => true,
            NameClass::Alt { a, b } => a.allows_any_name() || b.allows_any_name(),
            _ => false,
        }
    }

    /// True for classes matching infinitely many names (`anyName`/`nsName`).
    pub fn is_infinite(&self) -> bool {
        match self {
            NameClass::AnyName { .. } | NameClass::NsName { .. } => true,
            NameClass::Alt { a, b } => a.is_infinite() || b.is_infinite(),
            NameClass::Named { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(ns: &str, name: &str) -> NameClass {
        NameClass::Named {
            namespace_uri: ns.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn named_matches_exactly() {
        let nc = named("urn:a", "foo");
        assert!(nc.contains("urn:a", "foo"));
        assert!(!nc.contains("urn:b", "foo"));
        assert!(!nc.contains("urn:a", "bar"));
    }

    #[test]
    fn ns_name_honours_except() {
        let nc = NameClass::NsName {
            namespace_uri: "urn:a".to_string(),
            except: Some(Box::new(named("urn:a", "banned"))),
        };
        assert!(nc.contains("urn:a", "ok"));
        assert!(!nc.contains("urn:a", "banned"));
        assert!(!nc.contains("urn:b", "ok"));
    }

    #[test]
    fn any_name_with_except() {
        let nc = NameClass::AnyName {
            except: Some(Box::new(NameClass::NsName {
                namespace_uri: "urn:a".to_string(),
                except: None,
            })),
        };
        assert!(nc.contains("urn:b", "x"));
        assert!(!nc.contains("urn:a", "x"));
        assert!(!nc.allows_any_name());
        assert!(nc.is_infinite());
    }

    #[test]
    fn alt_matches_either_arm() {
        let nc = NameClass::Alt {
            a: Box::new(named("", "a")),
            b: Box::new(named("", "b")),
        };
        assert!(nc.contains("", "a"));
        assert!(nc.contains("", "b"));
        assert!(!nc.contains("", "c"));
        assert!(!nc.is_infinite());
    }
}
