//! Catalog validation.
//!
//! Runs after deserialization and before a catalog is handed to the
//! engine. Every problem is reported as a [`CatalogIssue`] naming the
//! offending construct, so a tenant-setup UI can surface all of them at
//! once rather than failing on the first.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::catalog::{Catalog, ResponseType, Trigger};
use crate::condition::Condition;

/// One validation problem found in a catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogIssue {
    /// Construct kind: "catalog", "stage", "question", "rule", or
    /// "task_template".
    pub construct: String,
    /// Id of the offending construct ("" for catalog-level issues).
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl CatalogIssue {
    fn new(
        construct: &str,
        id: &str,
        field: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        CatalogIssue {
            construct: construct.to_string(),
            id: id.to_string(),
            field: field.map(str::to_owned),
            message: message.into(),
        }
    }
}

impl fmt::Display for CatalogIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(
                f,
                "{} '{}' field '{}': {}",
                self.construct, self.id, field, self.message
            ),
            None => write!(f, "{} '{}': {}", self.construct, self.id, self.message),
        }
    }
}

impl Catalog {
    /// Check internal consistency. Returns all problems found; an empty
    /// vector means the catalog is safe to hand to the engine.
    pub fn validate(&self) -> Vec<CatalogIssue> {
        let mut issues = Vec::new();

        if self.stages.is_empty() {
            issues.push(CatalogIssue::new(
                "catalog",
                "",
                Some("stages"),
                "catalog must declare at least one stage",
            ));
        }

        let mut stage_ids = BTreeSet::new();
        let mut sequences = BTreeSet::new();
        for stage in &self.stages {
            if !stage_ids.insert(stage.id.as_str()) {
                issues.push(CatalogIssue::new(
                    "stage",
                    &stage.id,
                    None,
                    "duplicate stage id",
                ));
            }
            if !sequences.insert(stage.sequence) {
                issues.push(CatalogIssue::new(
                    "stage",
                    &stage.id,
                    Some("sequence"),
                    format!("sequence {} is already used by another stage", stage.sequence),
                ));
            }
        }

        let mut question_ids = BTreeSet::new();
        for question in &self.questions {
            if !question_ids.insert(question.id.as_str()) {
                issues.push(CatalogIssue::new(
                    "question",
                    &question.id,
                    None,
                    "duplicate question id",
                ));
            }
            if !stage_ids.contains(question.stage_id.as_str()) {
                issues.push(CatalogIssue::new(
                    "question",
                    &question.id,
                    Some("stage_id"),
                    format!("unknown stage '{}'", question.stage_id),
                ));
            }
            if question.response_type == ResponseType::MultipleChoice
                && question.choices.is_empty()
            {
                issues.push(CatalogIssue::new(
                    "question",
                    &question.id,
                    Some("choices"),
                    "multiple_choice question must declare at least one choice",
                ));
            }
        }

        // Second pass over questions for skip references, once all
        // question ids are known.
        for question in &self.questions {
            if let Some(cond) = &question.skip_when {
                check_condition_refs(
                    "question",
                    &question.id,
                    "skip_when",
                    cond,
                    &question_ids,
                    &mut issues,
                );
            }
        }

        let mut rule_ids = BTreeSet::new();
        // (from_stage, question, equality value) triples already claimed
        // by an automatic rule. A second automatic rule on the same triple
        // would make resolution ambiguous.
        let mut automatic_triples = BTreeSet::new();
        for rule in &self.rules {
            if !rule_ids.insert(rule.id.as_str()) {
                issues.push(CatalogIssue::new("rule", &rule.id, None, "duplicate rule id"));
            }
            if !stage_ids.contains(rule.from_stage_id.as_str()) {
                issues.push(CatalogIssue::new(
                    "rule",
                    &rule.id,
                    Some("from_stage_id"),
                    format!("unknown stage '{}'", rule.from_stage_id),
                ));
            }
            if !stage_ids.contains(rule.to_stage_id.as_str()) {
                issues.push(CatalogIssue::new(
                    "rule",
                    &rule.id,
                    Some("to_stage_id"),
                    format!("unknown stage '{}'", rule.to_stage_id),
                ));
            }
            match self.question(&rule.question_id) {
                None => {
                    issues.push(CatalogIssue::new(
                        "rule",
                        &rule.id,
                        Some("question_id"),
                        format!("unknown question '{}'", rule.question_id),
                    ));
                }
                Some(question) if question.stage_id != rule.from_stage_id => {
                    issues.push(CatalogIssue::new(
                        "rule",
                        &rule.id,
                        Some("question_id"),
                        format!(
                            "question '{}' belongs to stage '{}', not the rule's source stage '{}'",
                            rule.question_id, question.stage_id, rule.from_stage_id
                        ),
                    ));
                }
                Some(_) => {}
            }

            if let Trigger::Condition { condition } = &rule.trigger {
                check_condition_refs("rule", &rule.id, "trigger", condition, &question_ids, &mut issues);
            }

            if rule.automatic {
                if let Trigger::Value { value } = &rule.trigger {
                    let triple = (
                        rule.from_stage_id.clone(),
                        rule.question_id.clone(),
                        value.clone(),
                    );
                    if !automatic_triples.insert(triple) {
                        issues.push(CatalogIssue::new(
                            "rule",
                            &rule.id,
                            None,
                            format!(
                                "second automatic rule for stage '{}', question '{}', value '{}'",
                                rule.from_stage_id, rule.question_id, value
                            ),
                        ));
                    }
                }
            }
        }

        let mut template_ids = BTreeSet::new();
        for template in &self.task_templates {
            if !template_ids.insert(template.id.as_str()) {
                issues.push(CatalogIssue::new(
                    "task_template",
                    &template.id,
                    None,
                    "duplicate task template id",
                ));
            }
            if !stage_ids.contains(template.stage_id.as_str()) {
                issues.push(CatalogIssue::new(
                    "task_template",
                    &template.id,
                    Some("stage_id"),
                    format!("unknown stage '{}'", template.stage_id),
                ));
            }
        }

        issues
    }
}

fn check_condition_refs(
    construct: &str,
    id: &str,
    field: &str,
    condition: &Condition,
    question_ids: &BTreeSet<&str>,
    issues: &mut Vec<CatalogIssue>,
) {
    for referenced in condition.referenced_questions() {
        if !question_ids.contains(referenced) {
            issues.push(CatalogIssue::new(
                construct,
                id,
                Some(field),
                format!("condition references unknown question '{}'", referenced),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn base() -> serde_json::Value {
        serde_json::json!({
            "tenant_id": "acme-builders",
            "stages": [
                { "id": "a", "name": "A", "sequence": 1, "status": "lead" },
                { "id": "b", "name": "B", "sequence": 2, "status": "active" }
            ],
            "questions": [
                {
                    "id": "q1",
                    "stage_id": "a",
                    "prompt": "Go?",
                    "response_type": "yes_no",
                    "sequence": 1
                }
            ],
            "rules": [],
            "task_templates": []
        })
    }

    #[test]
    fn valid_catalog_has_no_issues() {
        let catalog = Catalog::load(base()).unwrap();
        assert!(catalog.validate().is_empty());
    }

    #[test]
    fn duplicate_automatic_rule_triple_is_flagged() {
        let mut value = base();
        value["rules"] = serde_json::json!([
            {
                "id": "r1",
                "from_stage_id": "a",
                "question_id": "q1",
                "trigger": { "kind": "value", "value": "yes" },
                "to_stage_id": "b",
                "automatic": true
            },
            {
                "id": "r2",
                "from_stage_id": "a",
                "question_id": "q1",
                "trigger": { "kind": "value", "value": "yes" },
                "to_stage_id": "b",
                "automatic": true
            }
        ]);
        let err = Catalog::load(value).unwrap_err();
        let issues = match err {
            crate::error::CatalogError::Invalid(issues) => issues,
            other => panic!("expected Invalid, got {:?}", other),
        };
        assert!(issues.iter().any(|i| i.id == "r2" && i.message.contains("second automatic rule")));
    }

    #[test]
    fn rule_question_must_belong_to_source_stage() {
        let mut value = base();
        value["questions"]
            .as_array_mut()
            .unwrap()
            .push(serde_json::json!({
                "id": "q2",
                "stage_id": "b",
                "prompt": "Done?",
                "response_type": "yes_no",
                "sequence": 1
            }));
        value["rules"] = serde_json::json!([
            {
                "id": "r1",
                "from_stage_id": "a",
                "question_id": "q2",
                "trigger": { "kind": "value", "value": "yes" },
                "to_stage_id": "b"
            }
        ]);
        let catalog: Catalog = serde_json::from_value(value).unwrap();
        let issues = catalog.validate();
        assert!(issues
            .iter()
            .any(|i| i.construct == "rule" && i.message.contains("not the rule's source stage")));
    }

    #[test]
    fn dangling_skip_reference_is_flagged() {
        let mut value = base();
        value["questions"].as_array_mut().unwrap()[0]["skip_when"] = serde_json::json!({
            "kind": "answered",
            "question_id": "ghost",
            "condition": { "kind": "equals", "value": "yes" }
        });
        let catalog: Catalog = serde_json::from_value(value).unwrap();
        let issues = catalog.validate();
        assert!(issues.iter().any(|i| i.message.contains("unknown question 'ghost'")));
    }

    #[test]
    fn multiple_choice_requires_choices() {
        let mut value = base();
        value["questions"].as_array_mut().unwrap()[0]["response_type"] =
            serde_json::json!("multiple_choice");
        let catalog: Catalog = serde_json::from_value(value).unwrap();
        let issues = catalog.validate();
        assert!(issues.iter().any(|i| i.field.as_deref() == Some("choices")));
    }

    #[test]
    fn duplicate_stage_sequence_is_flagged() {
        let mut value = base();
        value["stages"].as_array_mut().unwrap()[1]["sequence"] = serde_json::json!(1);
        let catalog: Catalog = serde_json::from_value(value).unwrap();
        let issues = catalog.validate();
        assert!(issues.iter().any(|i| i.field.as_deref() == Some("sequence")));
    }
}
