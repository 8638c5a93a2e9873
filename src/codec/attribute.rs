//! Typed attribute values.
//!
//! The wire format carries eight attribute kinds. [`Value`] is generic
//! over its string representation: the parser hands out values borrowing
//! from its transient storage, while the project tree stores pool handles
//! instead. Coercions happen at the model boundary only.

use std::fmt;

use crate::common::{Error, Result};

/// A typed attribute value.
///
/// `S` is the string representation: `&str` at the event layer, an
/// interned pool handle inside the project tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<S> {
    Bool(bool),
    /// 32-bit integer. The wire `Int` and `Long` opcodes both land here.
    Int(i32),
    /// Unsigned 32-bit integer, read from the `SizeT` opcode.
    UInt(u32),
    /// 64-bit integer, read from the `LongLong` opcode.
    Long(i64),
    /// Size value set by model code; written back through the `SizeT` opcode.
    Size(usize),
    Float(f32),
    Double(f64),
    Str(S),
}

/// An attribute as delivered by the parser: a name from the dictionary
/// and a value borrowing the parser's storage.
#[derive(Debug, Clone, Copy)]
pub struct Attribute<'a> {
    pub name: &'a str,
    pub value: Value<&'a str>,
}

impl<S> Value<S> {
    /// Convert the string representation, leaving other kinds untouched.
    pub fn map_str<T>(self, f: impl FnOnce(S) -> T) -> Value<T> {
        match self {
            Value::Bool(v) => Value::Bool(v),
            Value::Int(v) => Value::Int(v),
            Value::UInt(v) => Value::UInt(v),
            Value::Long(v) => Value::Long(v),
            Value::Size(v) => Value::Size(v),
            Value::Float(v) => Value::Float(v),
            Value::Double(v) => Value::Double(v),
            Value::Str(s) => Value::Str(f(s)),
        }
    }
}

impl Value<String> {
    /// Borrowed view of this value.
    pub fn as_borrowed(&self) -> Value<&str> {
        match self {
            Value::Bool(v) => Value::Bool(*v),
            Value::Int(v) => Value::Int(*v),
            Value::UInt(v) => Value::UInt(*v),
            Value::Long(v) => Value::Long(*v),
            Value::Size(v) => Value::Size(*v),
            Value::Float(v) => Value::Float(*v),
            Value::Double(v) => Value::Double(*v),
            Value::Str(s) => Value::Str(s.as_str()),
        }
    }
}

fn parse_str<T: std::str::FromStr>(text: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| Error::Malformed(format!("incompatible attribute value '{text}'")))
}

impl<'a> Value<&'a str> {
    /// Coerce to a boolean. Numeric kinds are true when nonzero; a string
    /// value is true only when it spells `true`.
    pub fn to_bool(&self) -> bool {
        match *self {
            Value::Bool(v) => v,
            Value::Int(v) => v != 0,
            Value::UInt(v) => v != 0,
            Value::Long(v) => v != 0,
            Value::Size(v) => v != 0,
            Value::Float(v) => v != 0.0,
            Value::Double(v) => v != 0.0,
            Value::Str(s) => s == "true",
        }
    }

    pub fn to_i64(&self) -> Result<i64> {
        match *self {
            Value::Bool(v) => Ok(v as i64),
            Value::Int(v) => Ok(v as i64),
            Value::UInt(v) => Ok(v as i64),
            Value::Long(v) => Ok(v),
            Value::Size(v) => Ok(v as i64),
            Value::Float(v) => Ok(v as i64),
            Value::Double(v) => Ok(v as i64),
            Value::Str(s) => parse_str(s),
        }
    }

    pub fn to_i32(&self) -> Result<i32> {
        match *self {
            Value::Str(s) => parse_str(s),
            _ => Ok(self.to_i64()? as i32),
        }
    }

    pub fn to_f64(&self) -> Result<f64> {
        match *self {
            Value::Bool(v) => Ok(v as u8 as f64),
            Value::Int(v) => Ok(v as f64),
            Value::UInt(v) => Ok(v as f64),
            Value::Long(v) => Ok(v as f64),
            Value::Size(v) => Ok(v as f64),
            Value::Float(v) => Ok(v as f64),
            Value::Double(v) => Ok(v),
            Value::Str(s) => parse_str(s),
        }
    }
}

impl<S: AsRef<str>> fmt::Display for Value<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Size(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s.as_ref()),
        }
    }
}
