//! The built-in datatype library (`datatypeLibrary=""`): `string` and
//! `token`.  Neither type accepts parameters.

use super::Datatype;
use crate::model::Param;
use crate::RelaxError;

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum RelaxDatatypes {
    String,
    Token,
}

impl Datatype for RelaxDatatypes {
    fn is_valid(&self, _value: &str) -> bool {
        // every string is a valid string, and a valid token once collapsed
        true
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum RelaxDatatypeValues {
    String(String),
    Token(String),
}

impl RelaxDatatypeValues {
    pub fn is_valid(&self, value: &str) -> bool {
        match self {
            RelaxDatatypeValues::String(s) => s == value,
            RelaxDatatypeValues::Token(s) => *s == normalize_whitespace(value),
        }
    }
}

/// Whitespace collapse per the `token` datatype: leading/trailing stripped,
/// internal runs folded to a single space.
pub fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<&str>>().join(" ")
}

pub fn datatype(
    type_name: &str,
    params: &[Param],
    path: &str,
) -> Result<RelaxDatatypes, RelaxError> {
    if let Some(p) = params.first() {
        return Err(RelaxError::DatatypeParameter {
            datatype: type_name.to_string(),
            param: p.name.clone(),
            message: "the built-in library accepts no parameters".to_string(),
        });
    }
    match type_name {
        "string" => Ok(RelaxDatatypes::String),
        "token" => Ok(RelaxDatatypes::Token),
        _ => Err(crate::structure_error(
            path,
            format!("type {:?} is not defined in the built-in library", type_name),
        )),
    }
}

pub fn value(
    type_name: &str,
    value: &str,
    path: &str,
) -> Result<RelaxDatatypeValues, RelaxError> {
    match type_name {
        "string" => Ok(RelaxDatatypeValues::String(value.to_string())),
        "token" => Ok(RelaxDatatypeValues::Token(normalize_whitespace(value))),
        _ => Err(crate::structure_error(
            path,
            format!("type {:?} is not defined in the built-in library", type_name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn token_value_collapses_whitespace() {
        let v = value("token", "a  b", "/p").unwrap();
        assert!(v.is_valid(" a\n b "));
        assert!(!v.is_valid("ab"));
    }

    #[test]
    fn string_value_is_exact() {
        let v = value("string", "a b", "/p").unwrap();
        assert!(v.is_valid("a b"));
        assert!(!v.is_valid("a  b"));
    }

    #[test]
    fn params_are_rejected() {
        let params = vec![Param {
            name: "maxLength".to_string(),
            value: "3".to_string(),
        }];
        assert_matches!(
            datatype("token", &params, "/p"),
            Err(RelaxError::DatatypeParameter { .. })
        );
    }

    #[test]
    fn unknown_type_is_a_structure_error() {
        assert_matches!(
            datatype("integer", &[], "/p"),
            Err(RelaxError::SchemaStructure { .. })
        );
    }
}
