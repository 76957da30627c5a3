//! XML Schema datatypes (`http://www.w3.org/2001/XMLSchema-datatypes`).
//!
//! A practical subset of the XSD type system: the string family, bounded
//! and unbounded numerics, boolean, temporal types and the two binary
//! types, with the `length`/`minLength`/`maxLength`, `pattern` and
//! `minInclusive`/`maxInclusive`/`minExclusive`/`maxExclusive` facets.
//! Facet problems are reported when the schema is compiled, not per value.

use super::{Datatype, Namespaces};
use crate::datatype::relax::normalize_whitespace;
use crate::model::Param;
use crate::RelaxError;
use bigdecimal::BigDecimal;
use lazy_static::lazy_static;
use num_bigint::{BigInt, BigUint};
use std::fmt;
use std::str::FromStr;

pub const NAMESPACE_URI: &str = "http://www.w3.org/2001/XMLSchema-datatypes";

lazy_static! {
    static ref LANG_RE: regex::Regex =
        regex::Regex::new(r"^[a-zA-Z]{1,8}(-[a-zA-Z0-9]{1,8})*$").unwrap();
    static ref DATETIME_RE: regex::Regex = regex::Regex::new(
        r"^-?\d{4,}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$"
    )
    .unwrap();
    static ref DATE_RE: regex::Regex =
        regex::Regex::new(r"^(-?\d{4,})-(\d{2})-(\d{2})(Z|[+-]\d{2}:\d{2})?$").unwrap();
    static ref TIME_RE: regex::Regex =
        regex::Regex::new(r"^\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap();
    static ref DURATION_RE: regex::Regex = regex::Regex::new(
        r"^-?P(\d+Y)?(\d+M)?(\d+D)?(T(\d+H)?(\d+M)?(\d+(\.\d+)?S)?)?$"
    )
    .unwrap();
    static ref GYEAR_RE: regex::Regex =
        regex::Regex::new(r"^-?\d{4,}(Z|[+-]\d{2}:\d{2})?$").unwrap();
    static ref GYEARMONTH_RE: regex::Regex =
        regex::Regex::new(r"^-?\d{4,}-\d{2}(Z|[+-]\d{2}:\d{2})?$").unwrap();
    static ref GMONTH_RE: regex::Regex =
        regex::Regex::new(r"^--\d{2}(Z|[+-]\d{2}:\d{2})?$").unwrap();
    static ref GMONTHDAY_RE: regex::Regex =
        regex::Regex::new(r"^--\d{2}-\d{2}(Z|[+-]\d{2}:\d{2})?$").unwrap();
    static ref GDAY_RE: regex::Regex =
        regex::Regex::new(r"^---\d{2}(Z|[+-]\d{2}:\d{2})?$").unwrap();
    static ref BASE64_RE: regex::Regex =
        regex::Regex::new(r"^[A-Za-z0-9+/\s]*={0,2}$").unwrap();
    static ref HEXBINARY_RE: regex::Regex = regex::Regex::new(r"^([0-9A-Fa-f]{2})*$").unwrap();
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum XsdDatatypes {
    String(StringFacets),
    NormalizedString(StringFacets),
    Token(StringFacets),
    Language(Option<PatternFacet>),
    Boolean(Option<PatternFacet>),
    Decimal {
        min_max: MinMaxFacet<BigDecimal>,
        pattern: Option<PatternFacet>,
    },
    Integer(MinMaxFacet<BigInt>, Option<PatternFacet>),
    NonNegativeInteger(MinMaxFacet<BigUint>, Option<PatternFacet>),
    PositiveInteger(MinMaxFacet<BigUint>, Option<PatternFacet>),
    Long(MinMaxFacet<i64>, Option<PatternFacet>),
    Int(MinMaxFacet<i32>, Option<PatternFacet>),
    Short(MinMaxFacet<i16>, Option<PatternFacet>),
    Byte(MinMaxFacet<i8>, Option<PatternFacet>),
    UnsignedLong(MinMaxFacet<u64>, Option<PatternFacet>),
    UnsignedInt(MinMaxFacet<u32>, Option<PatternFacet>),
    UnsignedShort(MinMaxFacet<u16>, Option<PatternFacet>),
    UnsignedByte(MinMaxFacet<u8>, Option<PatternFacet>),
    Float(Option<PatternFacet>),
    Double(Option<PatternFacet>),
    Name(LengthFacet),
    NcName(LengthFacet),
    NmToken(LengthFacet),
    Id(Option<PatternFacet>),
    IdRef(Option<PatternFacet>),
    AnyUri(Option<PatternFacet>),
    QName,
    Date(Option<PatternFacet>),
    Datetime(Option<PatternFacet>),
    Time(Option<PatternFacet>),
    Duration(Option<PatternFacet>),
    GYear(Option<PatternFacet>),
    GYearMonth(Option<PatternFacet>),
    GMonth(Option<PatternFacet>),
    GMonthDay(Option<PatternFacet>),
    GDay(Option<PatternFacet>),
    HexBinary(LengthFacet),
    Base64Binary(LengthFacet),
}

fn pattern_ok(pattern: &Option<PatternFacet>, value: &str) -> bool {
    pattern.as_ref().map(|p| p.matches(value)).unwrap_or(true)
}

fn number_ok<T>(value: &str, min_max: &MinMaxFacet<T>, pattern: &Option<PatternFacet>) -> bool
where
    T: FromStr + PartialOrd,
{
    let collapsed = value.trim();
    T::from_str(collapsed)
        .ok()
        .map(|v| min_max.is_valid(&v))
        .unwrap_or(false)
        && pattern_ok(pattern, collapsed)
}

fn regex_ok(re: &regex::Regex, value: &str, pattern: &Option<PatternFacet>) -> bool {
    let collapsed = value.trim();
    re.is_match(collapsed) && pattern_ok(pattern, collapsed)
}

impl Datatype for XsdDatatypes {
    fn is_valid(&self, value: &str) -> bool {
        match self {
            XsdDatatypes::String(facets) => facets.is_valid(value),
            XsdDatatypes::NormalizedString(facets) => {
                facets.is_valid(&normalize_whitespace(value))
            }
            XsdDatatypes::Token(facets) => facets.is_valid(&normalize_whitespace(value)),
            XsdDatatypes::Language(pattern) => regex_ok(&LANG_RE, value, pattern),
            XsdDatatypes::Boolean(pattern) => {
                let collapsed = value.trim();
                matches!(collapsed, "true" | "false" | "1" | "0")
                    && pattern_ok(pattern, collapsed)
            }
            XsdDatatypes::Decimal { min_max, pattern } => number_ok(value, min_max, pattern),
            XsdDatatypes::Integer(min_max, pattern) => number_ok(value, min_max, pattern),
            XsdDatatypes::NonNegativeInteger(min_max, pattern) => {
                number_ok(value, min_max, pattern)
            }
            XsdDatatypes::PositiveInteger(min_max, pattern) => {
                let one = BigUint::from(1u32);
                let collapsed = value.trim();
                BigUint::from_str(collapsed)
                    .ok()
                    .map(|v| v >= one && min_max.is_valid(&v))
                    .unwrap_or(false)
                    && pattern_ok(pattern, collapsed)
            }
            XsdDatatypes::Long(min_max, pattern) => number_ok(value, min_max, pattern),
            XsdDatatypes::Int(min_max, pattern) => number_ok(value, min_max, pattern),
            XsdDatatypes::Short(min_max, pattern) => number_ok(value, min_max, pattern),
            XsdDatatypes::Byte(min_max, pattern) => number_ok(value, min_max, pattern),
            XsdDatatypes::UnsignedLong(min_max, pattern) => number_ok(value, min_max, pattern),
            XsdDatatypes::UnsignedInt(min_max, pattern) => number_ok(value, min_max, pattern),
            XsdDatatypes::UnsignedShort(min_max, pattern) => number_ok(value, min_max, pattern),
            XsdDatatypes::UnsignedByte(min_max, pattern) => number_ok(value, min_max, pattern),
            XsdDatatypes::Float(pattern) => {
                let collapsed = value.trim();
                collapsed.parse::<f32>().is_ok() && pattern_ok(pattern, collapsed)
            }
            XsdDatatypes::Double(pattern) => {
                let collapsed = value.trim();
                collapsed.parse::<f64>().is_ok() && pattern_ok(pattern, collapsed)
            }
            XsdDatatypes::Name(len) => {
                let collapsed = value.trim();
                is_valid_name(collapsed) && len.is_valid(collapsed)
            }
            XsdDatatypes::NcName(len) => {
                let collapsed = value.trim();
                is_valid_ncname(collapsed) && len.is_valid(collapsed)
            }
            XsdDatatypes::NmToken(len) => {
                let collapsed = value.trim();
                is_valid_nmtoken(collapsed) && len.is_valid(collapsed)
            }
            XsdDatatypes::Id(pattern) | XsdDatatypes::IdRef(pattern) => {
                let collapsed = value.trim();
                is_valid_ncname(collapsed) && pattern_ok(pattern, collapsed)
            }
            // anyURI accepts any string, as in XSD 1.0 practice
            XsdDatatypes::AnyUri(pattern) => pattern_ok(pattern, value.trim()),
            XsdDatatypes::QName => is_valid_qname_syntax(value.trim()),
            XsdDatatypes::Date(pattern) => {
                let collapsed = value.trim();
                is_valid_date(collapsed) && pattern_ok(pattern, collapsed)
            }
            XsdDatatypes::Datetime(pattern) => regex_ok(&DATETIME_RE, value, pattern),
            XsdDatatypes::Time(pattern) => regex_ok(&TIME_RE, value, pattern),
            XsdDatatypes::Duration(pattern) => {
                let collapsed = value.trim();
                collapsed.contains(|c: char| c.is_ascii_digit())
                    && DURATION_RE.is_match(collapsed)
                    && pattern_ok(pattern, collapsed)
            }
            XsdDatatypes::GYear(pattern) => regex_ok(&GYEAR_RE, value, pattern),
            XsdDatatypes::GYearMonth(pattern) => regex_ok(&GYEARMONTH_RE, value, pattern),
            XsdDatatypes::GMonth(pattern) => regex_ok(&GMONTH_RE, value, pattern),
            XsdDatatypes::GMonthDay(pattern) => regex_ok(&GMONTHDAY_RE, value, pattern),
            XsdDatatypes::GDay(pattern) => regex_ok(&GDAY_RE, value, pattern),
            XsdDatatypes::HexBinary(len) => {
                let collapsed = value.trim();
                // length facets count octets
                HEXBINARY_RE.is_match(collapsed) && len.count_ok(collapsed.len() / 2)
            }
            XsdDatatypes::Base64Binary(len) => {
                BASE64_RE.is_match(value) && {
                    let stripped: String =
                        value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
                    let pad = stripped.chars().rev().take_while(|&c| c == '=').count();
                    let decoded = if stripped.is_empty() {
                        0
                    } else {
                        stripped.len() * 3 / 4 - pad
                    };
                    len.count_ok(decoded)
                }
            }
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum XsdDatatypeValues {
    String(String),
    Token(String),
    QName(String),
}

impl Datatype for XsdDatatypeValues {
    fn is_valid(&self, value: &str) -> bool {
        match self {
            XsdDatatypeValues::String(s) => s == value,
            XsdDatatypeValues::Token(s) => *s == normalize_whitespace(value),
            // QName comparison needs a namespace context; see is_valid_with_ns
            XsdDatatypeValues::QName(_) => false,
        }
    }
}

impl XsdDatatypeValues {
    pub fn is_valid_with_ns(&self, value: &str, ns: &dyn Namespaces) -> bool {
        match self {
            XsdDatatypeValues::QName(expected) => {
                let actual = normalize_whitespace(value);
                match (expand_qname(expected, ns), expand_qname(&actual, ns)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => self.is_valid(value),
        }
    }
}

fn expand_qname(value: &str, ns: &dyn Namespaces) -> Option<(String, String)> {
    match value.find(':') {
        Some(i) => ns
            .resolve(&value[..i])
            .map(|uri| (uri.to_string(), value[i + 1..].to_string())),
        None => Some((
            ns.resolve("").unwrap_or("").to_string(),
            value.to_string(),
        )),
    }
}

fn is_valid_date(value: &str) -> bool {
    let caps = match DATE_RE.captures(value) {
        Some(caps) => caps,
        None => return false,
    };
    let year: i32 = match caps[1].parse() {
        Ok(y) => y,
        Err(_) => return false,
    };
    let month: u32 = caps[2].parse().unwrap_or(0);
    let day: u32 = caps[3].parse().unwrap_or(0);
    chrono::NaiveDate::from_ymd_opt(year, month, day).is_some()
}

fn is_nc_name_start_char(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_nc_name_char(c: char) -> bool {
    is_nc_name_start_char(c) || c == '-' || c == '.' || c.is_numeric()
}

fn is_valid_ncname(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        None => false,
        Some(first) => is_nc_name_start_char(first) && chars.all(is_nc_name_char),
    }
}

/// XML 1.0 Name: like an NCName but ':' is also permitted.
fn is_valid_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        None => false,
        Some(first) => {
            (first == ':' || is_nc_name_start_char(first))
                && chars.all(|c| c == ':' || is_nc_name_char(c))
        }
    }
}

fn is_valid_nmtoken(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c == ':' || is_nc_name_char(c))
}

fn is_valid_qname_syntax(text: &str) -> bool {
    match text.find(':') {
        Some(i) => is_valid_ncname(&text[..i]) && is_valid_ncname(&text[i + 1..]),
        None => is_valid_ncname(text),
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct StringFacets {
    len: LengthFacet,
    pattern: Option<PatternFacet>,
}

impl StringFacets {
    fn is_valid(&self, value: &str) -> bool {
        self.len.is_valid(value) && pattern_ok(&self.pattern, value)
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub enum LengthFacet {
    Unbounded,
    MinLength(usize),
    MaxLength(usize),
    MinMaxLength(usize, usize),
    Length(usize),
}

impl LengthFacet {
    fn is_valid(&self, value: &str) -> bool {
        self.count_ok(value.chars().count())
    }

    fn count_ok(&self, actual: usize) -> bool {
        match self {
            LengthFacet::Unbounded => true,
            LengthFacet::MinLength(min) => *min <= actual,
            LengthFacet::MaxLength(max) => actual <= *max,
            LengthFacet::MinMaxLength(min, max) => *min <= actual && actual <= *max,
            LengthFacet::Length(len) => actual == *len,
        }
    }

    fn set(&mut self, facet: &str, n: usize) -> Result<(), String> {
        use LengthFacet::*;
        *self = match (self.clone(), facet) {
            (Unbounded, "length") => Length(n),
            (Unbounded, "minLength") => MinLength(n),
            (Unbounded, "maxLength") => MaxLength(n),
            (MinLength(min), "maxLength") if min <= n => MinMaxLength(min, n),
            (MaxLength(max), "minLength") if n <= max => MinMaxLength(n, max),
            _ => {
                return Err(format!("{} conflicts with an earlier length facet", facet));
            }
        };
        Ok(())
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
enum Min<T> {
    Unbounded,
    Inclusive(T),
    Exclusive(T),
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
enum Max<T> {
    Unbounded,
    Inclusive(T),
    Exclusive(T),
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct MinMaxFacet<T> {
    min: Min<T>,
    max: Max<T>,
}

impl<T> Default for MinMaxFacet<T> {
    fn default() -> Self {
        MinMaxFacet {
            min: Min::Unbounded,
            max: Max::Unbounded,
        }
    }
}

impl<T: PartialOrd> MinMaxFacet<T> {
    fn is_valid(&self, v: &T) -> bool {
        let min_ok = match &self.min {
            Min::Unbounded => true,
            Min::Inclusive(min) => min <= v,
            Min::Exclusive(min) => min < v,
        };
        let max_ok = match &self.max {
            Max::Unbounded => true,
            Max::Inclusive(max) => v <= max,
            Max::Exclusive(max) => v < max,
        };
        min_ok && max_ok
    }

    fn set(&mut self, facet: &str, val: T) -> Result<(), String> {
        match facet {
            "minInclusive" | "minExclusive" => {
                if !matches!(self.min, Min::Unbounded) {
                    return Err(format!("{} conflicts with an earlier minimum facet", facet));
                }
                self.min = if facet == "minInclusive" {
                    Min::Inclusive(val)
                } else {
                    Min::Exclusive(val)
                };
            }
            "maxInclusive" | "maxExclusive" => {
                if !matches!(self.max, Max::Unbounded) {
                    return Err(format!("{} conflicts with an earlier maximum facet", facet));
                }
                self.max = if facet == "maxInclusive" {
                    Max::Inclusive(val)
                } else {
                    Max::Exclusive(val)
                };
            }
            _ => unreachable!("unexpected facet {:?}", facet),
        }
        let conflict = match (&self.min, &self.max) {
            (Min::Inclusive(a), Max::Inclusive(b)) => a > b,
            (Min::Inclusive(a), Max::Exclusive(b))
            | (Min::Exclusive(a), Max::Inclusive(b))
            | (Min::Exclusive(a), Max::Exclusive(b)) => a >= b,
            _ => false,
        };
        if conflict {
            return Err("minimum facet conflicts with maximum facet".to_string());
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PatternFacet(String, regex::Regex);

impl PatternFacet {
    fn new(source: &str) -> Result<PatternFacet, String> {
        // XSD patterns are anchored
        let re = regex::Regex::new(&format!("^(?:{})$", source))
            .map_err(|e| format!("invalid pattern: {}", e))?;
        Ok(PatternFacet(source.to_string(), re))
    }

    fn matches(&self, value: &str) -> bool {
        self.1.is_match(value)
    }
}

impl PartialEq for PatternFacet {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for PatternFacet {}
impl std::hash::Hash for PatternFacet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}
impl fmt::Debug for PatternFacet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_tuple("PatternFacet").field(&self.0).finish()
    }
}

fn param_err(type_name: &str, param: &str, message: impl Into<String>) -> RelaxError {
    RelaxError::DatatypeParameter {
        datatype: type_name.to_string(),
        param: param.to_string(),
        message: message.into(),
    }
}

fn set_pattern(
    slot: &mut Option<PatternFacet>,
    type_name: &str,
    value: &str,
) -> Result<(), RelaxError> {
    if slot.is_some() {
        return Err(param_err(type_name, "pattern", "duplicate pattern facet"));
    }
    *slot = Some(PatternFacet::new(value).map_err(|m| param_err(type_name, "pattern", m))?);
    Ok(())
}

fn string_facets(type_name: &str, params: &[Param]) -> Result<StringFacets, RelaxError> {
    let mut len = LengthFacet::Unbounded;
    let mut pattern = None;
    for p in params {
        match p.name.as_str() {
            "length" | "minLength" | "maxLength" => {
                let n: usize = p
                    .value
                    .trim()
                    .parse()
                    .map_err(|_| param_err(type_name, &p.name, "not a non-negative integer"))?;
                len.set(&p.name, n)
                    .map_err(|m| param_err(type_name, &p.name, m))?;
            }
            "pattern" => set_pattern(&mut pattern, type_name, &p.value)?,
            other => return Err(param_err(type_name, other, "unsupported parameter")),
        }
    }
    Ok(StringFacets { len, pattern })
}

fn length_facets(type_name: &str, params: &[Param]) -> Result<LengthFacet, RelaxError> {
    let mut len = LengthFacet::Unbounded;
    for p in params {
        match p.name.as_str() {
            "length" | "minLength" | "maxLength" => {
                let n: usize = p
                    .value
                    .trim()
                    .parse()
                    .map_err(|_| param_err(type_name, &p.name, "not a non-negative integer"))?;
                len.set(&p.name, n)
                    .map_err(|m| param_err(type_name, &p.name, m))?;
            }
            other => return Err(param_err(type_name, other, "unsupported parameter")),
        }
    }
    Ok(len)
}

fn min_max_facets<T>(
    type_name: &str,
    params: &[Param],
) -> Result<(MinMaxFacet<T>, Option<PatternFacet>), RelaxError>
where
    T: FromStr + PartialOrd,
{
    let mut min_max = MinMaxFacet::default();
    let mut pattern = None;
    for p in params {
        match p.name.as_str() {
            "minInclusive" | "minExclusive" | "maxInclusive" | "maxExclusive" => {
                let val = T::from_str(p.value.trim())
                    .map_err(|_| param_err(type_name, &p.name, "not a value of the base type"))?;
                min_max
                    .set(&p.name, val)
                    .map_err(|m| param_err(type_name, &p.name, m))?;
            }
            "pattern" => set_pattern(&mut pattern, type_name, &p.value)?,
            other => return Err(param_err(type_name, other, "unsupported parameter")),
        }
    }
    Ok((min_max, pattern))
}

fn pattern_only(type_name: &str, params: &[Param]) -> Result<Option<PatternFacet>, RelaxError> {
    let mut pattern = None;
    for p in params {
        match p.name.as_str() {
            "pattern" => set_pattern(&mut pattern, type_name, &p.value)?,
            other => return Err(param_err(type_name, other, "unsupported parameter")),
        }
    }
    Ok(pattern)
}

pub fn datatype(
    type_name: &str,
    params: &[Param],
    path: &str,
) -> Result<XsdDatatypes, RelaxError> {
    Ok(match type_name {
        "string" => XsdDatatypes::String(string_facets(type_name, params)?),
        "normalizedString" => XsdDatatypes::NormalizedString(string_facets(type_name, params)?),
        "token" => XsdDatatypes::Token(string_facets(type_name, params)?),
        "language" => XsdDatatypes::Language(pattern_only(type_name, params)?),
        "boolean" => XsdDatatypes::Boolean(pattern_only(type_name, params)?),
        "decimal" => {
            let (min_max, pattern) = min_max_facets(type_name, params)?;
            XsdDatatypes::Decimal { min_max, pattern }
        }
        "integer" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::Integer(mm, p)
        }
        "nonNegativeInteger" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::NonNegativeInteger(mm, p)
        }
        "positiveInteger" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::PositiveInteger(mm, p)
        }
        "long" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::Long(mm, p)
        }
        "int" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::Int(mm, p)
        }
        "short" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::Short(mm, p)
        }
        "byte" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::Byte(mm, p)
        }
        "unsignedLong" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::UnsignedLong(mm, p)
        }
        "unsignedInt" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::UnsignedInt(mm, p)
        }
        "unsignedShort" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::UnsignedShort(mm, p)
        }
        "unsignedByte" => {
            let (mm, p) = min_max_facets(type_name, params)?;
            XsdDatatypes::UnsignedByte(mm, p)
        }
        "float" => XsdDatatypes::Float(pattern_only(type_name, params)?),
        "double" => XsdDatatypes::Double(pattern_only(type_name, params)?),
        "Name" => XsdDatatypes::Name(length_facets(type_name, params)?),
        "NCName" => XsdDatatypes::NcName(length_facets(type_name, params)?),
        "NMTOKEN" => XsdDatatypes::NmToken(length_facets(type_name, params)?),
        "ID" => XsdDatatypes::Id(pattern_only(type_name, params)?),
        "IDREF" => XsdDatatypes::IdRef(pattern_only(type_name, params)?),
        "anyURI" => XsdDatatypes::AnyUri(pattern_only(type_name, params)?),
        "QName" => {
            if let Some(p) = params.first() {
                return Err(param_err(type_name, &p.name, "unsupported parameter"));
            }
            XsdDatatypes::QName
        }
        "date" => XsdDatatypes::Date(pattern_only(type_name, params)?),
        "dateTime" => XsdDatatypes::Datetime(pattern_only(type_name, params)?),
        "time" => XsdDatatypes::Time(pattern_only(type_name, params)?),
        "duration" => XsdDatatypes::Duration(pattern_only(type_name, params)?),
        "gYear" => XsdDatatypes::GYear(pattern_only(type_name, params)?),
        "gYearMonth" => XsdDatatypes::GYearMonth(pattern_only(type_name, params)?),
        "gMonth" => XsdDatatypes::GMonth(pattern_only(type_name, params)?),
        "gMonthDay" => XsdDatatypes::GMonthDay(pattern_only(type_name, params)?),
        "gDay" => XsdDatatypes::GDay(pattern_only(type_name, params)?),
        "hexBinary" => XsdDatatypes::HexBinary(length_facets(type_name, params)?),
        "base64Binary" => XsdDatatypes::Base64Binary(length_facets(type_name, params)?),
        _ => {
            return Err(crate::structure_error(
                path,
                format!("unsupported XML Schema datatype {:?}", type_name),
            ));
        }
    })
}

pub fn value(type_name: &str, literal: &str, path: &str) -> Result<XsdDatatypeValues, RelaxError> {
    let dt = datatype(type_name, &[], path)?;
    if !dt.is_valid(literal) {
        return Err(RelaxError::DatatypeValue {
            datatype: type_name.to_string(),
            value: literal.to_string(),
        });
    }
    Ok(match type_name {
        "string" => XsdDatatypeValues::String(literal.to_string()),
        "QName" => XsdDatatypeValues::QName(normalize_whitespace(literal)),
        _ => XsdDatatypeValues::Token(normalize_whitespace(literal)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn params(pairs: &[(&str, &str)]) -> Vec<Param> {
        pairs
            .iter()
            .map(|(n, v)| Param {
                name: n.to_string(),
                value: v.to_string(),
            })
            .collect()
    }

    #[test]
    fn integer_bounds() {
        let dt = datatype(
            "integer",
            &params(&[("minInclusive", "0"), ("maxExclusive", "10")]),
            "/p",
        )
        .unwrap();
        assert!(dt.is_valid("0"));
        assert!(dt.is_valid(" 9 "));
        assert!(!dt.is_valid("10"));
        assert!(!dt.is_valid("-1"));
        assert!(!dt.is_valid("x"));
    }

    #[test]
    fn conflicting_bounds_are_rejected() {
        assert_matches!(
            datatype(
                "int",
                &params(&[("minInclusive", "5"), ("maxInclusive", "4")]),
                "/p"
            ),
            Err(RelaxError::DatatypeParameter { .. })
        );
    }

    #[test]
    fn bad_facet_value_is_rejected() {
        assert_matches!(
            datatype("short", &params(&[("minInclusive", "many")]), "/p"),
            Err(RelaxError::DatatypeParameter { .. })
        );
    }

    #[test]
    fn string_length_facets() {
        let dt = datatype(
            "string",
            &params(&[("minLength", "2"), ("maxLength", "3")]),
            "/p",
        )
        .unwrap();
        assert!(!dt.is_valid("a"));
        assert!(dt.is_valid("ab"));
        assert!(dt.is_valid("abc"));
        assert!(!dt.is_valid("abcd"));
    }

    #[test]
    fn pattern_is_anchored() {
        let dt = datatype("token", &params(&[("pattern", "[a-z]+")]), "/p").unwrap();
        assert!(dt.is_valid("abc"));
        assert!(!dt.is_valid("abc1"));
    }

    #[test]
    fn temporal_types() {
        let date = datatype("date", &[], "/p").unwrap();
        assert!(date.is_valid("2003-02-28"));
        assert!(!date.is_valid("2003-02-30"));
        assert!(!date.is_valid("2003-2-28"));
        let dt = datatype("dateTime", &[], "/p").unwrap();
        assert!(dt.is_valid("2003-02-28T13:00:00Z"));
        assert!(!dt.is_valid("2003-02-28"));
        let dur = datatype("duration", &[], "/p").unwrap();
        assert!(dur.is_valid("P1Y2M"));
        assert!(dur.is_valid("PT0.5S"));
        assert!(!dur.is_valid("1Y"));
    }

    #[test]
    fn binary_lengths_count_octets() {
        let hex = datatype("hexBinary", &params(&[("length", "2")]), "/p").unwrap();
        assert!(hex.is_valid("0aFF"));
        assert!(!hex.is_valid("0a"));
        assert!(!hex.is_valid("zz"));
    }

    #[test]
    fn value_literal_must_match_its_type() {
        assert_matches!(
            value("integer", "abc", "/p"),
            Err(RelaxError::DatatypeValue { .. })
        );
        let v = value("integer", "7", "/p").unwrap();
        assert!(v.is_valid(" 7 "));
        assert!(!v.is_valid("8"));
    }

    #[test]
    fn qname_values_compare_expanded() {
        struct Map;
        impl Namespaces for Map {
            fn resolve(&self, prefix: &str) -> Option<&str> {
                match prefix {
                    "a" | "b" => Some("urn:x"),
                    _ => None,
                }
            }
        }
        let v = value("QName", "a:foo", "/p").unwrap();
        assert!(v.is_valid_with_ns("b:foo", &Map));
        assert!(!v.is_valid_with_ns("b:bar", &Map));
        assert!(!v.is_valid_with_ns("c:foo", &Map));
    }
}
