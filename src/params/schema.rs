//! Declared parameter fields, their types and accepted ranges

use serde_json::Value;

use crate::error::{Error, Result};

/// Type and range of a single parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    Float { min: f64, max: f64 },
    Integer { min: u32, max: u32 },
    Bool,
    /// Integer that may also be `null`
    OptionalInteger { min: u32, max: u32 },
}

/// One entry of the parameter table
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Canonical (camelCase) name
    pub name: &'static str,
    /// snake_case spelling accepted on input
    pub alias: &'static str,
    pub kind: FieldKind,
}

/// A parsed, range-checked value ready to be assigned
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(u32),
    Bool(bool),
    OptionalInteger(Option<u32>),
}

const TOKEN_ID_MAX: u32 = 1_000_000;

pub const FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "temperature",
        alias: "temperature",
        kind: FieldKind::Float { min: 0.0, max: 2.0 },
    },
    FieldSpec {
        name: "topK",
        alias: "top_k",
        kind: FieldKind::Integer { min: 1, max: 100 },
    },
    FieldSpec {
        name: "topP",
        alias: "top_p",
        kind: FieldKind::Float { min: 0.0, max: 1.0 },
    },
    FieldSpec {
        name: "maxLength",
        alias: "max_length",
        kind: FieldKind::Integer { min: 1, max: 8192 },
    },
    FieldSpec {
        name: "repetitionPenalty",
        alias: "repetition_penalty",
        kind: FieldKind::Float { min: 1.0, max: 2.0 },
    },
    FieldSpec {
        name: "doSample",
        alias: "do_sample",
        kind: FieldKind::Bool,
    },
    FieldSpec {
        name: "numBeams",
        alias: "num_beams",
        kind: FieldKind::Integer { min: 1, max: 16 },
    },
    FieldSpec {
        name: "lengthPenalty",
        alias: "length_penalty",
        kind: FieldKind::Float { min: 0.0, max: 2.0 },
    },
    FieldSpec {
        name: "earlyStopping",
        alias: "early_stopping",
        kind: FieldKind::Bool,
    },
    FieldSpec {
        name: "padTokenId",
        alias: "pad_token_id",
        kind: FieldKind::OptionalInteger {
            min: 0,
            max: TOKEN_ID_MAX,
        },
    },
    FieldSpec {
        name: "eosTokenId",
        alias: "eos_token_id",
        kind: FieldKind::OptionalInteger {
            min: 0,
            max: TOKEN_ID_MAX,
        },
    },
];

/// Find a field by canonical name or alias
pub fn lookup(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|f| f.name == name || f.alias == name)
}

impl FieldSpec {
    /// Type-check and range-check a JSON value for this field
    ///
    /// Errors name the field as the caller spelled it (`given`).
    pub fn parse(&self, given: &str, value: &Value) -> Result<FieldValue> {
        match self.kind {
            FieldKind::Float { min, max } => {
                let v = value
                    .as_f64()
                    .ok_or_else(|| Error::validation(given, "expected a number"))?;
                if !v.is_finite() || v < min || v > max {
                    return Err(Error::validation(
                        given,
                        format!("{v} is outside {min}..={max}"),
                    ));
                }
                Ok(FieldValue::Float(v))
            }
            FieldKind::Integer { min, max } => parse_integer(given, value, min, max).map(FieldValue::Integer),
            FieldKind::Bool => value
                .as_bool()
                .map(FieldValue::Bool)
                .ok_or_else(|| Error::validation(given, "expected true or false")),
            FieldKind::OptionalInteger { min, max } => {
                if value.is_null() {
                    Ok(FieldValue::OptionalInteger(None))
                } else {
                    parse_integer(given, value, min, max).map(|v| FieldValue::OptionalInteger(Some(v)))
                }
            }
        }
    }
}

fn parse_integer(given: &str, value: &Value, min: u32, max: u32) -> Result<u32> {
    let v = match value {
        Value::Number(n) if n.is_u64() || n.is_i64() => n
            .as_i64()
            .ok_or_else(|| Error::validation(given, format!("{n} is outside {min}..={max}")))?,
        _ => return Err(Error::validation(given, "expected an integer")),
    };
    if v < i64::from(min) || v > i64::from(max) {
        return Err(Error::validation(
            given,
            format!("{v} is outside {min}..={max}"),
        ));
    }
    Ok(v as u32)
}
