//! Streaming validation of XML documents against compiled RELAX NG
//! grammars, using the derivative algorithm.
//!
//! [`Walker`] is the event-level interface: callers push start/text/end
//! events (plus namespace context updates) and collect the recorded
//! errors.  [`Validator`] drives a walker from an `xmlparser` token
//! stream, and [`meta`] checks schema documents against the embedded
//! schema for schemas.

mod engine;
pub mod meta;
pub mod validate;
pub mod walker;

pub use validate::{Report, Validator};
pub use walker::{Attr, Walker};
