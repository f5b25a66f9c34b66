//! Catalog data model: stages, questions, transition rules, task templates.
//!
//! A catalog is the read-mostly configuration for one tenant, loaded once
//! and treated as immutable by the engine. Stage order is given by
//! `sequence`; the lowest sequence is the initial stage and the highest is
//! terminal. Accessors preserve catalog order so downstream tie-breaking
//! stays deterministic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::error::CatalogError;

/// How a stage participates in progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    #[default]
    Normal,
    /// Transitions out of this stage require a rule with
    /// `requires_override` cleared or an admin-triggered submission.
    ApprovalRequired,
}

/// Declared response type of a question. Only the tag matters to the
/// engine; rendering is the host's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    YesNo,
    Number,
    Text,
    Date,
    MultipleChoice,
    File,
}

impl ResponseType {
    /// Human-readable name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ResponseType::YesNo => "yes_no",
            ResponseType::Number => "number",
            ResponseType::Text => "text",
            ResponseType::Date => "date",
            ResponseType::MultipleChoice => "multiple_choice",
            ResponseType::File => "file",
        }
    }
}

/// One ordered step in a job's lifecycle, mapped to a user-visible status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    /// None marks a stage shared across tenants.
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub name: String,
    pub sequence: u32,
    /// Display only; never interpreted by the engine.
    #[serde(default)]
    pub color: Option<String>,
    /// Status a job carries while in this stage.
    pub status: String,
    #[serde(default)]
    pub kind: StageKind,
    /// Expected occupancy bounds, in fractional hours.
    #[serde(default)]
    pub min_hours: Option<Decimal>,
    #[serde(default)]
    pub max_hours: Option<Decimal>,
}

/// A prompt answered once (logically) per job within a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub stage_id: String,
    pub prompt: String,
    pub response_type: ResponseType,
    pub sequence: u32,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub help_text: Option<String>,
    /// Valid values for `multiple_choice` questions; empty otherwise.
    #[serde(default)]
    pub choices: Vec<String>,
    /// When this holds for a submission, the answer is recorded but
    /// excluded from transition evaluation.
    #[serde(default)]
    pub skip_when: Option<Condition>,
}

/// What fires a transition rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Exact equality of the answer (under the question's response type).
    Value { value: String },
    /// Arbitrary condition over the answer and prior responses.
    Condition { condition: Condition },
}

/// A configured edge from one stage to another, triggered by a question's
/// answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRule {
    pub id: String,
    pub from_stage_id: String,
    pub question_id: String,
    pub trigger: Trigger,
    pub to_stage_id: String,
    /// Automatic rules win ties against manual ones.
    #[serde(default)]
    pub automatic: bool,
    /// The host must confirm an admin override before acting on this rule.
    #[serde(default)]
    pub requires_override: bool,
}

/// Standard work-item created when a job enters a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,
    pub stage_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub sequence: u32,
}

/// The full per-tenant catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub tenant_id: String,
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub rules: Vec<TransitionRule>,
    #[serde(default)]
    pub task_templates: Vec<TaskTemplate>,
}

impl Catalog {
    /// Deserialize and validate a catalog from JSON.
    pub fn load(value: serde_json::Value) -> Result<Catalog, CatalogError> {
        let catalog: Catalog = serde_json::from_value(value)
            .map_err(|e| CatalogError::Deserialize(e.to_string()))?;
        let issues = catalog.validate();
        if issues.is_empty() {
            Ok(catalog)
        } else {
            Err(CatalogError::Invalid(issues))
        }
    }

    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn question(&self, id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    /// The stage with the lowest sequence -- where new jobs start.
    pub fn initial_stage(&self) -> Option<&Stage> {
        self.stages.iter().min_by_key(|s| s.sequence)
    }

    /// The stage with the highest sequence. No outgoing automatic rules
    /// are expected here, though the model does not forbid configuring one.
    pub fn terminal_stage(&self) -> Option<&Stage> {
        self.stages.iter().max_by_key(|s| s.sequence)
    }

    /// Status mapped to a stage, if the stage exists.
    pub fn status_of(&self, stage_id: &str) -> Option<&str> {
        self.stage(stage_id).map(|s| s.status.as_str())
    }

    /// Questions of a stage in prompt order.
    pub fn questions_for(&self, stage_id: &str) -> Vec<&Question> {
        let mut qs: Vec<&Question> = self
            .questions
            .iter()
            .filter(|q| q.stage_id == stage_id)
            .collect();
        qs.sort_by_key(|q| q.sequence);
        qs
    }

    /// Transition rules out of a stage for one question, in catalog order.
    pub fn rules_for(&self, stage_id: &str, question_id: &str) -> Vec<&TransitionRule> {
        self.rules
            .iter()
            .filter(|r| r.from_stage_id == stage_id && r.question_id == question_id)
            .collect()
    }

    /// Task templates of a stage in creation order.
    pub fn templates_for(&self, stage_id: &str) -> Vec<&TaskTemplate> {
        let mut ts: Vec<&TaskTemplate> = self
            .task_templates
            .iter()
            .filter(|t| t.stage_id == stage_id)
            .collect();
        ts.sort_by_key(|t| t.sequence);
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_catalog() -> Catalog {
        Catalog::load(serde_json::json!({
            "tenant_id": "acme-builders",
            "stages": [
                {
                    "id": "lead_qualification",
                    "name": "Lead Qualification",
                    "sequence": 1,
                    "status": "lead",
                    "color": "#8a6d3b"
                },
                {
                    "id": "initial_client_meeting",
                    "name": "Initial Client Meeting",
                    "sequence": 2,
                    "status": "meeting_scheduled"
                },
                {
                    "id": "contract_signed",
                    "name": "Contract Signed",
                    "sequence": 3,
                    "status": "active",
                    "kind": "approval_required"
                }
            ],
            "questions": [
                {
                    "id": "qualified",
                    "stage_id": "lead_qualification",
                    "prompt": "Is this lead qualified?",
                    "response_type": "yes_no",
                    "sequence": 1,
                    "required": true
                },
                {
                    "id": "estimated_value",
                    "stage_id": "lead_qualification",
                    "prompt": "Estimated contract value",
                    "response_type": "number",
                    "sequence": 2
                }
            ],
            "rules": [
                {
                    "id": "qualified_yes",
                    "from_stage_id": "lead_qualification",
                    "question_id": "qualified",
                    "trigger": { "kind": "value", "value": "yes" },
                    "to_stage_id": "initial_client_meeting",
                    "automatic": true
                }
            ],
            "task_templates": [
                {
                    "id": "schedule_meeting",
                    "stage_id": "initial_client_meeting",
                    "title": "Schedule kickoff meeting with client",
                    "sequence": 1
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn initial_and_terminal_stage_follow_sequence() {
        let catalog = sample_catalog();
        assert_eq!(catalog.initial_stage().unwrap().id, "lead_qualification");
        assert_eq!(catalog.terminal_stage().unwrap().id, "contract_signed");
    }

    #[test]
    fn status_maps_through_stage() {
        let catalog = sample_catalog();
        assert_eq!(catalog.status_of("initial_client_meeting"), Some("meeting_scheduled"));
        assert_eq!(catalog.status_of("missing"), None);
    }

    #[test]
    fn questions_for_sorts_by_sequence() {
        let catalog = sample_catalog();
        let qs = catalog.questions_for("lead_qualification");
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].id, "qualified");
        assert_eq!(qs[1].id, "estimated_value");
    }

    #[test]
    fn rules_for_filters_on_stage_and_question() {
        let catalog = sample_catalog();
        assert_eq!(catalog.rules_for("lead_qualification", "qualified").len(), 1);
        assert!(catalog.rules_for("lead_qualification", "estimated_value").is_empty());
        assert!(catalog.rules_for("initial_client_meeting", "qualified").is_empty());
    }

    #[test]
    fn load_rejects_malformed_json() {
        let err = Catalog::load(serde_json::json!({ "stages": [] })).unwrap_err();
        match err {
            CatalogError::Deserialize(_) => {}
            other => panic!("expected Deserialize, got {:?}", other),
        }
    }
}
