use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use super::attendance::{CompareState, DailyAttendanceRecord, DeadlineState, RecordKey, WorkState};
use super::worker::WorkerKey;

/// Why a record changed. Stored as the two-digit code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Display, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ReasonType {
    #[strum(serialize = "01")]
    Add,
    #[strum(serialize = "02")]
    Edit,
    #[strum(serialize = "03")]
    Deadline,
    #[strum(serialize = "04")]
    BulkHours,
    #[strum(serialize = "05")]
    ProjectChange,
    #[strum(serialize = "06")]
    Delete,
    #[strum(serialize = "07")]
    DeadlineCancel,
    #[strum(serialize = "08")]
    EditAndDeadline,
    #[strum(serialize = "09")]
    ExcelImport,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, Display, ToSchema,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HisStatus {
    Before,
    After,
}

/// Every column of a daily record as it looked at one instant. All fields are
/// optional: a BEFORE placeholder carries only keys, a removal AFTER carries
/// only the worker key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, ToSchema)]
pub struct RecordSnapshot {
    pub site_id: Option<i64>,
    pub project_id: Option<i64>,
    #[schema(value_type = Option<String>)]
    pub worker_key: Option<WorkerKey>,
    pub record_date: Option<NaiveDate>,
    pub in_time: Option<NaiveDateTime>,
    pub out_time: Option<NaiveDateTime>,
    pub deadline: Option<DeadlineState>,
    pub work_state: Option<WorkState>,
    pub is_overtime: Option<bool>,
    pub work_hours: Option<f64>,
    pub compare_state: Option<CompareState>,
}

impl RecordSnapshot {
    /// Pre-image used when no record existed yet.
    pub fn placeholder(key: &RecordKey) -> Self {
        Self {
            site_id: Some(key.site_id),
            project_id: Some(key.project_id),
            worker_key: Some(key.worker_key.clone()),
            ..Self::default()
        }
    }

    /// Post-image of a removed record.
    pub fn removed(worker_key: &WorkerKey) -> Self {
        Self {
            worker_key: Some(worker_key.clone()),
            ..Self::default()
        }
    }
}

impl From<&DailyAttendanceRecord> for RecordSnapshot {
    fn from(record: &DailyAttendanceRecord) -> Self {
        Self {
            site_id: Some(record.key.site_id),
            project_id: Some(record.key.project_id),
            worker_key: Some(record.key.worker_key.clone()),
            record_date: Some(record.key.record_date),
            in_time: record.in_time,
            out_time: record.out_time,
            deadline: Some(record.deadline),
            work_state: Some(record.work_state),
            is_overtime: Some(record.is_overtime),
            work_hours: record.work_hours,
            compare_state: record.compare_state,
        }
    }
}

/// One ledger row to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHistoryEntry {
    pub status: HisStatus,
    pub reason_type: ReasonType,
    pub reason: Option<String>,
    pub snapshot: RecordSnapshot,
    pub actor_id: u64,
    pub actor_name: String,
    pub registered_at: NaiveDateTime,
}

/// A stored ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HistoryEntry {
    pub entry_id: i64,
    pub status: HisStatus,
    pub reason_type: ReasonType,
    pub reason: Option<String>,
    #[serde(flatten)]
    pub snapshot: RecordSnapshot,
    pub actor_id: u64,
    pub actor_name: String,
    pub registered_at: NaiveDateTime,
}

/// Free-form line in the operational log.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationLog {
    pub site_id: i64,
    pub project_id: i64,
    pub worker_key: WorkerKey,
    pub record_date: NaiveDate,
    pub work_state: Option<WorkState>,
    pub message: String,
    pub actor_id: u64,
    pub actor_name: String,
    pub logged_at: NaiveDateTime,
}
