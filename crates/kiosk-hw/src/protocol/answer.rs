//! Typed decoding of text answer fields

use chrono::{NaiveDate, NaiveTime};

use crate::error::AnswerError;

/// Declared type of one answer field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Raw text, no checks
    Unknown,
    /// Text, empty allowed
    String,
    /// Text, must not be empty
    FString,
    /// Digits, empty reads as 0
    Int,
    /// Digits, must not be empty
    FInt,
    /// Digits and dots, empty reads as 0.0
    Double,
    /// `ddMMyy`
    Date,
    /// `HHmmss`
    Time,
}

/// Decoded answer field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(u64),
    Double(f64),
    Date(NaiveDate),
    Time(NaiveTime),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<u64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            FieldValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<NaiveTime> {
        match self {
            FieldValue::Time(v) => Some(*v),
            _ => None,
        }
    }
}

/// Split a payload on `separator`, dropping the empty tail a trailing
/// separator leaves behind
pub fn split_fields(payload: &[u8], separator: u8) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    let body = payload.strip_suffix(&[separator]).unwrap_or(payload);
    body.split(|b| *b == separator)
        .map(|part| String::from_utf8_lossy(part).into_owned())
        .collect()
}

/// Decode `fields` against `shape`; extra fields are ignored
pub fn decode_answer(fields: &[String], shape: &[FieldKind]) -> Result<Vec<FieldValue>, AnswerError> {
    if fields.len() < shape.len() {
        return Err(AnswerError::MissingFields {
            expected: shape.len(),
            actual: fields.len(),
        });
    }

    shape
        .iter()
        .zip(fields)
        .enumerate()
        .map(|(index, (kind, raw))| decode_field(index, *kind, raw))
        .collect()
}

fn decode_field(index: usize, kind: FieldKind, raw: &str) -> Result<FieldValue, AnswerError> {
    let part = raw.trim();
    let invalid = || AnswerError::InvalidField {
        index,
        value: part.to_string(),
    };

    match kind {
        FieldKind::Unknown => Ok(FieldValue::Text(raw.to_string())),
        FieldKind::String => Ok(FieldValue::Text(part.to_string())),
        FieldKind::FString => {
            if part.is_empty() {
                return Err(AnswerError::EmptyField(index));
            }
            Ok(FieldValue::Text(part.to_string()))
        }
        FieldKind::Int | FieldKind::FInt => {
            if part.is_empty() {
                if kind == FieldKind::FInt {
                    return Err(AnswerError::EmptyField(index));
                }
                return Ok(FieldValue::Int(0));
            }
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map(FieldValue::Int).map_err(|_| invalid())
        }
        FieldKind::Double => {
            if part.is_empty() {
                return Ok(FieldValue::Double(0.0));
            }
            if !part.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
                return Err(invalid());
            }
            part.parse().map(FieldValue::Double).map_err(|_| invalid())
        }
        FieldKind::Date => {
            // ddMMyy -> ddMMyyyy
            if part.len() != 6 || !part.is_ascii() {
                return Err(invalid());
            }
            let full = format!("{}20{}", &part[..4], &part[4..]);
            NaiveDate::parse_from_str(&full, "%d%m%Y")
                .map(FieldValue::Date)
                .map_err(|_| invalid())
        }
        FieldKind::Time => NaiveTime::parse_from_str(part, "%H%M%S")
            .map(FieldValue::Time)
            .map_err(|_| invalid()),
    }
}
