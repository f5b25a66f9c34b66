//! Response value parsing and validation.
//!
//! Responses are stored as text and interpreted per the question's
//! declared response type. Parsing happens on every evaluation -- at
//! submission time to validate the new answer, and again when a condition
//! references a prior answer -- so the stored text stays the single source
//! of truth.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use time::macros::format_description;
use time::Date;

use jobflow_core::{Question, ResponseType};

/// A submitted answer, typed per the question's response type.
/// All numeric values use `rust_decimal::Decimal` -- never `f64`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseValue {
    Bool(bool),
    Number(Decimal),
    Text(String),
    Date(Date),
    Choice(String),
    /// Opaque reference to an uploaded document; the engine never opens it.
    FileRef(String),
}

impl ResponseValue {
    /// Returns a human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ResponseValue::Bool(_) => "Bool",
            ResponseValue::Number(_) => "Number",
            ResponseValue::Text(_) => "Text",
            ResponseValue::Date(_) => "Date",
            ResponseValue::Choice(_) => "Choice",
            ResponseValue::FileRef(_) => "FileRef",
        }
    }
}

/// A value that does not match its question's declared response type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueError {
    pub response_type: ResponseType,
    pub value: String,
    pub detail: String,
}

impl ValueError {
    fn new(response_type: ResponseType, value: &str, detail: impl Into<String>) -> Self {
        ValueError {
            response_type,
            value: value.to_string(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is not a valid {} response: {}",
            self.value,
            self.response_type.name(),
            self.detail
        )
    }
}

impl std::error::Error for ValueError {}

/// Parse and validate a raw answer against the question's response type.
pub fn parse_value(question: &Question, raw: &str) -> Result<ResponseValue, ValueError> {
    let rt = question.response_type;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValueError::new(rt, raw, "value is empty"));
    }

    match rt {
        ResponseType::YesNo => match trimmed.to_ascii_lowercase().as_str() {
            "yes" | "true" => Ok(ResponseValue::Bool(true)),
            "no" | "false" => Ok(ResponseValue::Bool(false)),
            _ => Err(ValueError::new(rt, raw, "expected yes/no/true/false")),
        },
        ResponseType::Number => Decimal::from_str(trimmed)
            .map(ResponseValue::Number)
            .map_err(|e| ValueError::new(rt, raw, e.to_string())),
        ResponseType::Text => Ok(ResponseValue::Text(trimmed.to_string())),
        ResponseType::Date => {
            let format = format_description!("[year]-[month]-[day]");
            Date::parse(trimmed, format)
                .map(ResponseValue::Date)
                .map_err(|e| ValueError::new(rt, raw, e.to_string()))
        }
        ResponseType::MultipleChoice => {
            if question.choices.iter().any(|c| c == trimmed) {
                Ok(ResponseValue::Choice(trimmed.to_string()))
            } else {
                Err(ValueError::new(
                    rt,
                    raw,
                    format!("not one of the declared choices: {:?}", question.choices),
                ))
            }
        }
        ResponseType::File => Ok(ResponseValue::FileRef(trimmed.to_string())),
    }
}
