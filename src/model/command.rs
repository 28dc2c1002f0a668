use chrono::NaiveDateTime;
use serde::Deserialize;
use utoipa::ToSchema;

use super::attendance::{CompareState, RecordKey};

/// One row of a manual merge.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MergeRecordInput {
    #[serde(flatten)]
    pub key: RecordKey,
    #[schema(example = "2025-03-01T08:00:00")]
    pub in_time: Option<NaiveDateTime>,
    pub out_time: Option<NaiveDateTime>,
    #[serde(default)]
    pub is_overtime: bool,
    /// Close the record in the same step.
    #[serde(default)]
    pub close_deadline: bool,
    pub reason: Option<String>,
}

/// Records to close, reopen or remove.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RecordSelection {
    pub records: Vec<RecordKey>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProjectChangeInput {
    #[serde(flatten)]
    pub key: RecordKey,
    #[schema(example = 11)]
    pub to_project_id: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WorkHoursInput {
    #[serde(flatten)]
    pub key: RecordKey,
    #[schema(example = 8.5)]
    pub work_hours: f64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CompareStateInput {
    pub records: Vec<RecordKey>,
    pub compare_state: CompareState,
    pub reason: Option<String>,
}
