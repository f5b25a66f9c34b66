//! Condition interpreter.
//!
//! Evaluates the tagged condition trees from the catalog against a typed
//! answer and the job's prior responses. Leaf nodes compare the answer
//! the node is applied to; `answered` re-targets its inner condition at
//! another question's current response.

use std::collections::BTreeMap;
use std::fmt;

use jobflow_core::{Catalog, CompareOp, Condition, Question};
use jobflow_storage::ResponseRecord;

use crate::value::{parse_value, ResponseValue, ValueError};

/// Errors that can occur during condition evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    /// A condition was applied to a value of the wrong type.
    TypeError { message: String },
    /// An `answered` node referenced a question missing from the catalog.
    UnknownQuestion { question_id: String },
    /// A configured literal or stored prior response failed to parse
    /// under its question's response type.
    Value(ValueError),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::TypeError { message } => write!(f, "type error: {}", message),
            EvalError::UnknownQuestion { question_id } => {
                write!(f, "unknown question: {}", question_id)
            }
            EvalError::Value(err) => write!(f, "value error: {}", err),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<ValueError> for EvalError {
    fn from(err: ValueError) -> Self {
        EvalError::Value(err)
    }
}

/// Evaluation context: the catalog (for `answered` question lookups) and
/// the job's current responses keyed by question id.
pub struct EvalContext<'a> {
    pub catalog: &'a Catalog,
    pub responses: &'a BTreeMap<String, ResponseRecord>,
}

/// Evaluate a condition against a typed answer.
///
/// `question` is the question the answer belongs to; it supplies the
/// response type under which equality literals are interpreted.
pub fn eval_condition(
    cond: &Condition,
    question: &Question,
    value: &ResponseValue,
    ctx: &EvalContext<'_>,
) -> Result<bool, EvalError> {
    match cond {
        Condition::Equals { value: expected } => typed_equals(question, value, expected),

        Condition::OneOf { values } => {
            for expected in values {
                if typed_equals(question, value, expected)? {
                    // Short-circuit: one match is enough
                    return Ok(true);
                }
            }
            Ok(false)
        }

        Condition::NumberCompare { op, value: rhs } => match value {
            ResponseValue::Number(lhs) => Ok(compare(*op, lhs, rhs)),
            other => Err(EvalError::TypeError {
                message: format!(
                    "number comparison '{}' requires a Number answer, got {}",
                    op.symbol(),
                    other.type_name()
                ),
            }),
        },

        Condition::Answered {
            question_id,
            condition,
        } => {
            let target = ctx.catalog.question(question_id).ok_or_else(|| {
                EvalError::UnknownQuestion {
                    question_id: question_id.clone(),
                }
            })?;
            match ctx.responses.get(question_id) {
                // Unanswered questions satisfy no condition
                None => Ok(false),
                Some(record) => {
                    let prior = parse_value(target, &record.value)?;
                    eval_condition(condition, target, &prior, ctx)
                }
            }
        }

        Condition::All { conditions } => {
            for c in conditions {
                if !eval_condition(c, question, value, ctx)? {
                    // Short-circuit: one false decides
                    return Ok(false);
                }
            }
            Ok(true)
        }

        Condition::Any { conditions } => {
            for c in conditions {
                if eval_condition(c, question, value, ctx)? {
                    // Short-circuit: one true decides
                    return Ok(true);
                }
            }
            Ok(false)
        }

        Condition::Not { condition } => Ok(!eval_condition(condition, question, value, ctx)?),
    }
}

/// Equality under the question's response type, so a yes_no answer "yes"
/// matches a configured literal "true".
pub fn typed_equals(
    question: &Question,
    value: &ResponseValue,
    expected_raw: &str,
) -> Result<bool, EvalError> {
    let expected = parse_value(question, expected_raw)?;
    Ok(*value == expected)
}

fn compare(op: CompareOp, lhs: &rust_decimal::Decimal, rhs: &rust_decimal::Decimal) -> bool {
    match op {
        CompareOp::Lt => lhs < rhs,
        CompareOp::Le => lhs <= rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Ge => lhs >= rhs,
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
    }
}
