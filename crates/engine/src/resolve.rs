//! Transition resolution.
//!
//! Given the job's current stage and a typed answer, select the rule that
//! fires, or none. Candidates are the catalog's rules for
//! (current stage, question); a rule matches when its trigger is an exact
//! equality of the answer or a condition that evaluates true.
//!
//! Tie-break: the first automatic match in catalog order wins; with no
//! automatic match, the first match overall. Catalog validation rejects
//! configurations where two automatic rules claim the same equality
//! value, so the automatic pick is unambiguous.

use jobflow_core::{Catalog, Question, TransitionRule, Trigger};

use crate::condition::{eval_condition, typed_equals, EvalContext, EvalError};
use crate::value::ResponseValue;

/// Select the transition rule the answer fires, if any.
pub fn resolve_transition<'a>(
    catalog: &'a Catalog,
    stage_id: &str,
    question: &Question,
    value: &ResponseValue,
    ctx: &EvalContext<'_>,
) -> Result<Option<&'a TransitionRule>, EvalError> {
    let mut first_match: Option<&TransitionRule> = None;

    for rule in catalog.rules_for(stage_id, &question.id) {
        let fires = match &rule.trigger {
            Trigger::Value { value: expected } => typed_equals(question, value, expected)?,
            Trigger::Condition { condition } => eval_condition(condition, question, value, ctx)?,
        };
        if !fires {
            continue;
        }
        if rule.automatic {
            return Ok(Some(rule));
        }
        if first_match.is_none() {
            first_match = Some(rule);
        }
    }

    Ok(first_match)
}
