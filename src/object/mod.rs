//! PDF object model: the tagged variant of PDF values and its coercions

mod dict;
mod name;
mod stream;

pub use dict::Dict;
pub use name::Name;
pub use stream::Stream;

use crate::error::{PdfError, PdfResult};

/// An indirect reference: object number (>= 1) and generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref {
    pub number: u32,
    pub generation: u16,
}

impl Ref {
    pub fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

/// A PDF value. `Stream` only ever occurs as the body of an
/// [`IndirectObject`]; parsed objects are value-typed snapshots with no
/// ownership relation between them.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    /// Raw string bytes; no text decoding is applied
    String(Vec<u8>),
    Name(Name),
    Array(Vec<Object>),
    Dict(Dict),
    Stream(Stream),
    Reference(Ref),
}

/// An object labeled by (number, generation)
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectObject {
    pub reference: Ref,
    pub object: Object,
}

impl Object {
    /// Builder for string objects
    pub fn string(bytes: impl Into<Vec<u8>>) -> Self {
        Object::String(bytes.into())
    }

    /// Builder for name objects
    pub fn name(name: impl Into<Name>) -> Self {
        Object::Name(name.into())
    }

    /// Builder for reference objects
    pub fn reference(number: u32, generation: u16) -> Self {
        Object::Reference(Ref::new(number, generation))
    }

    /// Variant name, used in coercion errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Boolean(_) => "boolean",
            Object::Integer(_) => "integer",
            Object::Real(_) => "real",
            Object::String(_) => "string",
            Object::Name(_) => "name",
            Object::Array(_) => "array",
            Object::Dict(_) => "dictionary",
            Object::Stream(_) => "stream",
            Object::Reference(_) => "reference",
        }
    }

    fn unexpected(&self, expected: &'static str) -> PdfError {
        PdfError::UnexpectedType {
            expected,
            found: self.type_name(),
        }
    }

    pub fn as_bool(&self) -> PdfResult<bool> {
        match self {
            Object::Boolean(b) => Ok(*b),
            other => Err(other.unexpected("boolean")),
        }
    }

    pub fn as_integer(&self) -> PdfResult<i64> {
        match self {
            Object::Integer(n) => Ok(*n),
            other => Err(other.unexpected("integer")),
        }
    }

    /// Numeric coercion; integers widen to double
    pub fn as_real(&self) -> PdfResult<f64> {
        match self {
            Object::Integer(n) => Ok(*n as f64),
            Object::Real(r) => Ok(*r),
            other => Err(other.unexpected("number")),
        }
    }

    pub fn as_string(&self) -> PdfResult<&[u8]> {
        match self {
            Object::String(s) => Ok(s),
            other => Err(other.unexpected("string")),
        }
    }

    pub fn as_name(&self) -> PdfResult<&Name> {
        match self {
            Object::Name(n) => Ok(n),
            other => Err(other.unexpected("name")),
        }
    }

    pub fn as_array(&self) -> PdfResult<&[Object]> {
        match self {
            Object::Array(a) => Ok(a),
            other => Err(other.unexpected("array")),
        }
    }

    pub fn as_dict(&self) -> PdfResult<&Dict> {
        match self {
            Object::Dict(d) => Ok(d),
            other => Err(other.unexpected("dictionary")),
        }
    }

    pub fn as_stream(&self) -> PdfResult<&Stream> {
        match self {
            Object::Stream(s) => Ok(s),
            other => Err(other.unexpected("stream")),
        }
    }

    pub fn as_reference(&self) -> PdfResult<Ref> {
        match self {
            Object::Reference(r) => Ok(*r),
            other => Err(other.unexpected("reference")),
        }
    }

    /// A rectangle: an array of four numbers
    pub fn as_rectangle(&self) -> PdfResult<[f64; 4]> {
        let array = self.as_array()?;
        if array.len() != 4 {
            return Err(self.unexpected("rectangle"));
        }
        Ok([
            array[0].as_real()?,
            array[1].as_real()?,
            array[2].as_real()?,
            array[3].as_real()?,
        ])
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Object::Integer(value)
    }
}

impl From<f64> for Object {
    fn from(value: f64) -> Self {
        Object::Real(value)
    }
}

impl From<Name> for Object {
    fn from(value: Name) -> Self {
        Object::Name(value)
    }
}

impl From<Dict> for Object {
    fn from(value: Dict) -> Self {
        Object::Dict(value)
    }
}

impl From<Vec<Object>> for Object {
    fn from(value: Vec<Object>) -> Self {
        Object::Array(value)
    }
}

impl From<Ref> for Object {
    fn from(value: Ref) -> Self {
        Object::Reference(value)
    }
}
