//! RPC values and the status tuple response convention.

use bincode::de::Decoder;
use bincode::error::{AllowedEnumVariants, DecodeError};
use bincode::{Decode, Encode};
use std::cell::Cell;
use std::collections::BTreeMap;

// Arrays and structs nest; a decoded value may not go deeper than this.
const MAX_NESTING: usize = 64;

thread_local! {
    static DECODE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

// ============================================================================
// RpcValue
// ============================================================================

/// A tagged RPC value, as carried in call parameters and responses.
#[derive(Debug, Clone, PartialEq, Encode)]
pub enum RpcValue {
    Int(i32),
    Bool(bool),
    Double(f64),
    String(String),
    /// ISO 8601 timestamp, kept in its textual form.
    DateTime(String),
    Binary(Vec<u8>),
    Array(Vec<RpcValue>),
    Struct(BTreeMap<String, RpcValue>),
}

impl RpcValue {
    /// Returns the tag name, used in decode diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            RpcValue::Int(_) => "int",
            RpcValue::Bool(_) => "boolean",
            RpcValue::Double(_) => "double",
            RpcValue::String(_) => "string",
            RpcValue::DateTime(_) => "dateTime",
            RpcValue::Binary(_) => "base64",
            RpcValue::Array(_) => "array",
            RpcValue::Struct(_) => "struct",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RpcValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RpcValue]> {
        match self {
            RpcValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

impl From<&str> for RpcValue {
    fn from(value: &str) -> Self {
        RpcValue::String(value.to_string())
    }
}

impl From<String> for RpcValue {
    fn from(value: String) -> Self {
        RpcValue::String(value)
    }
}

impl From<i32> for RpcValue {
    fn from(value: i32) -> Self {
        RpcValue::Int(value)
    }
}

impl From<bool> for RpcValue {
    fn from(value: bool) -> Self {
        RpcValue::Bool(value)
    }
}

impl From<f64> for RpcValue {
    fn from(value: f64) -> Self {
        RpcValue::Double(value)
    }
}

impl From<Vec<RpcValue>> for RpcValue {
    fn from(value: Vec<RpcValue>) -> Self {
        RpcValue::Array(value)
    }
}

// Decoded by hand so nesting depth is bounded. Variant indices follow the
// declaration order used by the derived `Encode`.
impl<Context> Decode<Context> for RpcValue {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let _depth = NestingGuard::enter()?;
        let value = match <u32 as Decode<Context>>::decode(decoder)? {
            0 => RpcValue::Int(Decode::decode(decoder)?),
            1 => RpcValue::Bool(Decode::decode(decoder)?),
            2 => RpcValue::Double(Decode::decode(decoder)?),
            3 => RpcValue::String(Decode::decode(decoder)?),
            4 => RpcValue::DateTime(Decode::decode(decoder)?),
            5 => RpcValue::Binary(Decode::decode(decoder)?),
            6 => RpcValue::Array(Decode::decode(decoder)?),
            7 => RpcValue::Struct(Decode::decode(decoder)?),
            found => {
                return Err(DecodeError::UnexpectedVariant {
                    type_name: "RpcValue",
                    allowed: &AllowedEnumVariants::Range { min: 0, max: 7 },
                    found,
                })
            }
        };
        Ok(value)
    }
}

bincode::impl_borrow_decode!(RpcValue);

struct NestingGuard;

impl NestingGuard {
    fn enter() -> Result<Self, DecodeError> {
        DECODE_DEPTH.with(|depth| {
            if depth.get() >= MAX_NESTING {
                return Err(DecodeError::Other("RpcValue nested too deeply"));
            }
            depth.set(depth.get() + 1);
            Ok(NestingGuard)
        })
    }
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        DECODE_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

// ============================================================================
// StatusTuple
// ============================================================================

/// The `[code, message, value]` shape every handler returns.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct StatusTuple {
    pub code: i32,
    pub message: String,
    pub value: RpcValue,
}

impl StatusTuple {
    pub const SUCCESS: i32 = 1;
    pub const FAILURE: i32 = 0;
    pub const NOT_FOUND: i32 = -1;

    pub fn new(code: i32, message: impl Into<String>, value: impl Into<RpcValue>) -> Self {
        Self {
            code,
            message: message.into(),
            value: value.into(),
        }
    }

    pub fn success(message: impl Into<String>, value: impl Into<RpcValue>) -> Self {
        Self::new(Self::SUCCESS, message, value)
    }

    /// The response for every call refused by the access policy.
    pub fn access_denied() -> Self {
        Self::new(Self::FAILURE, "Access Control", 0)
    }
}
