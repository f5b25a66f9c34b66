//! Condition expression trees for skip logic and transition triggers.
//!
//! Tenants configure conditions as structured JSON alongside the rest of
//! the catalog. The tree is data only; interpretation happens in the
//! engine crate, which evaluates a node against the submitted answer and
//! the job's prior responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Comparison operator for numeric conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    /// Symbol used in error messages and issue reports.
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
        }
    }
}

/// A condition node evaluated against a submitted answer.
///
/// Leaf nodes (`equals`, `one_of`, `number_compare`) test the answer the
/// node is applied to. `answered` re-targets its inner condition at the
/// job's current response to another question, so skip logic can depend
/// on earlier answers. `all`/`any`/`not` compose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// The answer equals the given value under the question's response type.
    Equals { value: String },
    /// The answer equals one of the given values.
    OneOf { values: Vec<String> },
    /// Numeric comparison; only valid for `number` questions.
    NumberCompare { op: CompareOp, value: Decimal },
    /// The job's current response to `question_id` satisfies the inner
    /// condition. False when that question has no response yet.
    Answered {
        question_id: String,
        condition: Box<Condition>,
    },
    /// Every sub-condition holds (short-circuits).
    All { conditions: Vec<Condition> },
    /// At least one sub-condition holds (short-circuits).
    Any { conditions: Vec<Condition> },
    /// The sub-condition does not hold.
    Not { condition: Box<Condition> },
}

impl Condition {
    /// Question ids referenced by `answered` nodes anywhere in the tree.
    /// Used by catalog validation to reject dangling references.
    pub fn referenced_questions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_referenced(&mut out);
        out
    }

    fn collect_referenced<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::Equals { .. }
            | Condition::OneOf { .. }
            | Condition::NumberCompare { .. } => {}
            Condition::Answered {
                question_id,
                condition,
            } => {
                out.push(question_id.as_str());
                condition.collect_referenced(out);
            }
            Condition::All { conditions } | Condition::Any { conditions } => {
                for c in conditions {
                    c.collect_referenced(out);
                }
            }
            Condition::Not { condition } => condition.collect_referenced(out),
        }
    }
}
