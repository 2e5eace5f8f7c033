//! Parameter values and pixel element types.
//!
//! Filter parameters travel through the graph as [`Value`]s so that nodes can
//! be configured by tag without knowing the concrete filter type. Pixel data
//! never does: images are typed by their element through the [`Pixel`] trait.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A parameter value assigned to a filter node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Value {
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point number
    Float(f64),
    /// Boolean flag
    Boolean(bool),
    /// UTF-8 string
    String(String),
    /// Extent per dimension
    Size(Vec<u64>),
    /// Index per dimension
    Index(Vec<i64>),
}

impl Value {
    /// Name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Size(_) => "size",
            Value::Index(_) => "index",
        }
    }

    /// Try to get this value as an integer.
    pub fn as_integer(&self) -> Option<i64> {
        if let Value::Integer(i) = self {
            Some(*i)
        } else {
            None
        }
    }

    /// Try to get this value as a float.
    /// Integers are automatically converted to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Boolean(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_string(&self) -> Option<&str> {
        if let Value::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Try to get this value as a size.
    /// A non-negative integer is read as an isotropic size of one dimension.
    pub fn as_size(&self) -> Option<Vec<u64>> {
        match self {
            Value::Size(size) => Some(size.clone()),
            Value::Integer(i) if *i >= 0 => Some(vec![*i as u64]),
            _ => None,
        }
    }

    /// Try to get this value as an index.
    pub fn as_index(&self) -> Option<Vec<i64>> {
        match self {
            Value::Index(index) => Some(index.clone()),
            Value::Size(size) => size.iter().map(|&s| i64::try_from(s).ok()).collect(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{:.4}", fl),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Size(size) => write!(f, "Size{:?}", size),
            Value::Index(index) => write!(f, "Index{:?}", index),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<Vec<u64>> for Value {
    fn from(value: Vec<u64>) -> Self {
        Value::Size(value)
    }
}

/// Element type of an image buffer.
///
/// Conversions go through `f64` so that generic filters can do their
/// arithmetic once; `from_f64` saturates for integer types.
pub trait Pixel: Copy + Default + PartialOrd + Send + Sync + fmt::Debug + 'static {
    /// Human-readable element name.
    const TYPE_NAME: &'static str;

    /// Widen to `f64`.
    fn to_f64(self) -> f64;

    /// Narrow from `f64`, rounding and saturating for integer types.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_integer_pixel {
    ($($t:ty),*) => {
        $(
            impl Pixel for $t {
                const TYPE_NAME: &'static str = stringify!($t);

                fn to_f64(self) -> f64 {
                    self as f64
                }

                fn from_f64(value: f64) -> Self {
                    // `as` saturates for float-to-int casts and maps NaN to zero.
                    value.round() as $t
                }
            }
        )*
    };
}

impl_integer_pixel!(u8, u16, i16, u32, i32);

impl Pixel for f32 {
    const TYPE_NAME: &'static str = "f32";

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Pixel for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn to_f64(self) -> f64 {
        self
    }

    fn from_f64(value: f64) -> Self {
        value
    }
}
