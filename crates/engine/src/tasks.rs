//! Task generation for a newly entered stage.
//!
//! Instantiates the destination stage's task templates as open
//! work-items attributed to the triggering user. Stages without
//! templates yield an empty list. The caller inserts the records inside
//! the transition transaction, so a failed insert rolls the whole
//! transition back.

use jobflow_core::Catalog;
use jobflow_storage::TaskRecord;
use uuid::Uuid;

/// Build the work-items for a job entering a stage, in template order.
pub fn tasks_for_stage(
    catalog: &Catalog,
    job_id: &str,
    stage_id: &str,
    user_id: &str,
    now: &str,
) -> Vec<TaskRecord> {
    catalog
        .templates_for(stage_id)
        .into_iter()
        .map(|template| TaskRecord {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            stage_id: stage_id.to_string(),
            title: template.title.clone(),
            description: template.description.clone(),
            sequence: template.sequence,
            status: "open".to_string(),
            created_by: user_id.to_string(),
            created_at: now.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::load(serde_json::json!({
            "tenant_id": "acme-builders",
            "stages": [
                { "id": "lead_qualification", "name": "Lead Qualification", "sequence": 1, "status": "lead" },
                { "id": "initial_client_meeting", "name": "Initial Client Meeting", "sequence": 2, "status": "meeting_scheduled" }
            ],
            "task_templates": [
                {
                    "id": "send_agenda",
                    "stage_id": "initial_client_meeting",
                    "title": "Send meeting agenda to client",
                    "sequence": 2
                },
                {
                    "id": "schedule_meeting",
                    "stage_id": "initial_client_meeting",
                    "title": "Schedule kickoff meeting",
                    "description": "Coordinate with the client's site contact",
                    "sequence": 1
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn instantiates_templates_in_sequence_order() {
        let catalog = catalog();
        let tasks = tasks_for_stage(
            &catalog,
            "job-1",
            "initial_client_meeting",
            "pm-1",
            "2026-03-01T09:00:00Z",
        );
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "Schedule kickoff meeting");
        assert_eq!(tasks[1].title, "Send meeting agenda to client");
        assert!(tasks.iter().all(|t| t.status == "open"));
        assert!(tasks.iter().all(|t| t.created_by == "pm-1"));
        assert_ne!(tasks[0].id, tasks[1].id);
    }

    #[test]
    fn stage_without_templates_yields_nothing() {
        let catalog = catalog();
        let tasks = tasks_for_stage(
            &catalog,
            "job-1",
            "lead_qualification",
            "pm-1",
            "2026-03-01T09:00:00Z",
        );
        assert!(tasks.is_empty());
    }
}
