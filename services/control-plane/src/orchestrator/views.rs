//! Read projections combining container records with live runtime state.

use serde::{Deserialize, Serialize};

use crate::db::{ContainerRecord, ContainerStatus};
use crate::runtime::{ContainerDetails, ContainerSummary, RuntimeState, LABEL_ID, LABEL_NAME};

/// Status shown for a runtime state string.
pub fn status_from_runtime(state: &str) -> ContainerStatus {
    match state.to_ascii_lowercase().as_str() {
        "created" => ContainerStatus::Created,
        "running" => ContainerStatus::Running,
        _ => ContainerStatus::Stopped,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectView {
    pub id: i64,
    pub name: String,
    pub status: ContainerStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_state: Option<RuntimeState>,
}

impl InspectView {
    /// View of a record the runtime cannot answer for.
    pub fn from_record(record: &ContainerRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            status: record.status,
            message: record.message.clone(),
            image: None,
            image_id: None,
            path: None,
            args: Vec::new(),
            created: None,
            volumes: Vec::new(),
            raw_state: None,
        }
    }

    pub fn from_runtime(record: &ContainerRecord, details: ContainerDetails) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            status: status_from_runtime(&details.state.status),
            message: String::new(),
            image: Some(details.image),
            image_id: Some(details.image_id),
            path: Some(details.path),
            args: details.args,
            created: Some(details.created),
            volumes: details.volumes,
            raw_state: Some(details.state),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    pub id: i64,
    pub name: String,
    pub status: ContainerStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub command: String,
    /// Unix seconds; zero for records not yet created by the runtime.
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub volumes: Vec<String>,
}

impl ListEntry {
    pub fn from_record(record: &ContainerRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            status: record.status,
            message: record.message.clone(),
            image: String::new(),
            image_id: String::new(),
            command: String::new(),
            created: 0,
            volumes: Vec::new(),
        }
    }

    /// Entry for a runtime container; `None` when it lacks a valid id label.
    pub fn from_runtime(summary: ContainerSummary) -> Option<Self> {
        let id = summary.labels.get(LABEL_ID)?.parse().ok()?;
        Some(Self {
            id,
            name: summary.labels.get(LABEL_NAME).cloned().unwrap_or_default(),
            status: status_from_runtime(&summary.state),
            message: String::new(),
            image: summary.image,
            image_id: summary.image_id,
            command: summary.command,
            created: summary.created,
            volumes: summary.volumes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_status_from_runtime() {
        assert_eq!(status_from_runtime("created"), ContainerStatus::Created);
        assert_eq!(status_from_runtime("running"), ContainerStatus::Running);
        assert_eq!(status_from_runtime("Running"), ContainerStatus::Running);
        assert_eq!(status_from_runtime("exited"), ContainerStatus::Stopped);
        assert_eq!(status_from_runtime("paused"), ContainerStatus::Stopped);
    }

    #[test]
    fn test_list_entry_requires_id_label() {
        let summary = ContainerSummary {
            id: "abc".to_string(),
            state: "running".to_string(),
            ..Default::default()
        };
        assert!(ListEntry::from_runtime(summary.clone()).is_none());

        let labelled = ContainerSummary {
            labels: HashMap::from([
                (LABEL_ID.to_string(), "4".to_string()),
                (LABEL_NAME.to_string(), "web1".to_string()),
            ]),
            ..summary
        };
        let entry = ListEntry::from_runtime(labelled).unwrap();
        assert_eq!(entry.id, 4);
        assert_eq!(entry.name, "web1");
        assert_eq!(entry.status, ContainerStatus::Running);
    }
}
