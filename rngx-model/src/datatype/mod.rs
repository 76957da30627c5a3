//! Pluggable datatype libraries.
//!
//! A schema names a library by URI: the empty URI is the built-in library
//! (`string`/`token`) and `http://www.w3.org/2001/XMLSchema-datatypes`
//! selects the XML Schema subset in [`xsd`].  Datatype problems are split
//! between bad facet parameters (reported when the schema is compiled) and
//! invalid literals (reported per value).

pub mod relax;
pub mod xsd;

use crate::model::Param;
use crate::{IncompleteTypes, RelaxError};

/// Namespace-prefix lookup supplied by the validating walker, used by
/// QName-valued datatypes.
pub trait Namespaces {
    fn resolve(&self, prefix: &str) -> Option<&str>;
}

pub trait Datatype {
    fn is_valid(&self, value: &str) -> bool;
}

/// A compiled `data` datatype from any of the supported libraries.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum Datatypes {
    Relax(relax::RelaxDatatypes),
    Xsd(xsd::XsdDatatypes),
}

impl Datatype for Datatypes {
    fn is_valid(&self, value: &str) -> bool {
        match self {
            Datatypes::Relax(dt) => dt.is_valid(value),
            Datatypes::Xsd(dt) => dt.is_valid(value),
        }
    }
}

/// A compiled `value` literal from any of the supported libraries.
#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum DatatypeValues {
    Relax(relax::RelaxDatatypeValues),
    Xsd(xsd::XsdDatatypeValues),
}

impl DatatypeValues {
    pub fn is_valid_with_ns(&self, value: &str, ns: &dyn Namespaces) -> bool {
        match self {
            DatatypeValues::Relax(v) => v.is_valid(value),
            DatatypeValues::Xsd(v) => v.is_valid_with_ns(value, ns),
        }
    }
}

/// Compile a `data` pattern's datatype, validating its facet parameters.
/// Returns `Ok(None)` when the library or type is unknown but incomplete
/// types are tolerated.
pub fn compile_datatype(
    library: &str,
    type_name: &str,
    params: &[Param],
    path: &str,
    incomplete: IncompleteTypes,
) -> Result<Option<Datatypes>, RelaxError> {
    let result = match library {
        "" => relax::datatype(type_name, params, path).map(Datatypes::Relax),
        xsd::NAMESPACE_URI => xsd::datatype(type_name, params, path).map(Datatypes::Xsd),
        _ => Err(crate::structure_error(
            path,
            format!("unknown datatype library {:?}", library),
        )),
    };
    tolerate(result, type_name, path, incomplete)
}

/// Compile a `value` pattern's literal, checking it against its datatype.
pub fn compile_value(
    library: &str,
    type_name: &str,
    value: &str,
    path: &str,
    incomplete: IncompleteTypes,
) -> Result<Option<DatatypeValues>, RelaxError> {
    let result = match library {
        "" => relax::value(type_name, value, path).map(DatatypeValues::Relax),
        xsd::NAMESPACE_URI => xsd::value(type_name, value, path).map(DatatypeValues::Xsd),
        _ => Err(crate::structure_error(
            path,
            format!("unknown datatype library {:?}", library),
        )),
    };
    tolerate(result, type_name, path, incomplete)
}

fn tolerate<T>(
    result: Result<T, RelaxError>,
    type_name: &str,
    path: &str,
    incomplete: IncompleteTypes,
) -> Result<Option<T>, RelaxError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e @ RelaxError::SchemaStructure { .. }) => match incomplete {
            IncompleteTypes::Deny => Err(e),
            IncompleteTypes::Warn => {
                log::warn!("{}: datatype {:?} not supported; values will not be checked", path, type_name);
                Ok(None)
            }
            IncompleteTypes::Quiet => Ok(None),
        },
        Err(e) => Err(e),
    }
}
