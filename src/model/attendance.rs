use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};
use utoipa::ToSchema;

use super::history::ReasonType;
use super::worker::WorkerKey;

/// Stored as `01` / `02`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    #[strum(serialize = "01")]
    CheckedIn,
    #[strum(serialize = "02")]
    CheckedOut,
}

impl WorkState {
    pub fn derive(in_time: Option<NaiveDateTime>, out_time: Option<NaiveDateTime>) -> Self {
        if in_time.is_some() && out_time.is_none() {
            WorkState::CheckedIn
        } else {
            WorkState::CheckedOut
        }
    }
}

/// Stored as `S` / `X`. Records that have not been compared yet carry no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompareState {
    #[strum(serialize = "S")]
    Settled,
    #[strum(serialize = "X")]
    Exception,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineState {
    Open,
    Closed,
}

impl DeadlineState {
    pub fn is_closed(self) -> bool {
        self == DeadlineState::Closed
    }

    pub fn from_flag(closed: bool) -> Self {
        if closed {
            DeadlineState::Closed
        } else {
            DeadlineState::Open
        }
    }
}

/// Identity of one daily record: a worker at a site/project on a calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct RecordKey {
    #[schema(example = 1)]
    pub site_id: i64,
    #[schema(example = 10)]
    pub project_id: i64,
    #[schema(value_type = String, example = "abc")]
    pub worker_key: WorkerKey,
    #[schema(example = "2025-03-01")]
    pub record_date: NaiveDate,
}

impl RecordKey {
    pub fn new(site_id: i64, project_id: i64, worker_key: impl Into<WorkerKey>, record_date: NaiveDate) -> Self {
        Self {
            site_id,
            project_id,
            worker_key: worker_key.into(),
            record_date,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.site_id <= 0 {
            return Err(format!("site_id must be positive, got {}", self.site_id));
        }
        if self.project_id <= 0 {
            return Err(format!("project_id must be positive, got {}", self.project_id));
        }
        if self.worker_key.is_blank() {
            return Err("worker_key is required".to_string());
        }
        Ok(())
    }
}

/// The authoritative one-row-per-worker-per-day timesheet entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DailyAttendanceRecord {
    /// Surrogate id, absent until the row is stored.
    pub record_id: Option<i64>,
    #[serde(flatten)]
    pub key: RecordKey,
    pub in_time: Option<NaiveDateTime>,
    pub out_time: Option<NaiveDateTime>,
    pub work_state: WorkState,
    pub work_hours: Option<f64>,
    pub deadline: DeadlineState,
    pub is_overtime: bool,
    pub compare_state: Option<CompareState>,
    pub reason_type: Option<ReasonType>,
    pub reason: Option<String>,
    pub device_id: Option<i64>,
}

impl DailyAttendanceRecord {
    pub fn empty(key: RecordKey) -> Self {
        Self {
            record_id: None,
            key,
            in_time: None,
            out_time: None,
            work_state: WorkState::CheckedOut,
            work_hours: None,
            deadline: DeadlineState::Open,
            is_overtime: false,
            compare_state: None,
            reason_type: None,
            reason: None,
            device_id: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.deadline.is_closed()
    }

    /// Recomputes work-state and work-hours from the in/out pair.
    pub fn refresh_derived(&mut self) {
        self.work_state = WorkState::derive(self.in_time, self.out_time);
        self.work_hours = work_hours_between(self.in_time, self.out_time);
    }
}

/// Elapsed hours rounded to two decimals, only when both ends exist and are ordered.
pub fn work_hours_between(in_time: Option<NaiveDateTime>, out_time: Option<NaiveDateTime>) -> Option<f64> {
    let (start, end) = (in_time?, out_time?);
    if end < start {
        return None;
    }
    let minutes = (end - start).num_minutes() as f64;
    Some((minutes / 60.0 * 100.0).round() / 100.0)
}

/// A prior-day open shift paired with a current-day exit-only record.
#[derive(Debug, Clone, PartialEq)]
pub struct OvertimeCandidate {
    pub before: DailyAttendanceRecord,
    pub after: DailyAttendanceRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn at(date: NaiveDate, h: u32, m: u32) -> NaiveDateTime {
        date.and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    #[test]
    fn work_state_is_checked_in_only_with_open_shift() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        assert_eq!(WorkState::derive(Some(at(d, 8, 0)), None), WorkState::CheckedIn);
        assert_eq!(WorkState::derive(Some(at(d, 8, 0)), Some(at(d, 17, 0))), WorkState::CheckedOut);
        assert_eq!(WorkState::derive(None, Some(at(d, 17, 0))), WorkState::CheckedOut);
        assert_eq!(WorkState::derive(None, None), WorkState::CheckedOut);
    }

    #[test]
    fn work_hours_cross_midnight() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let next = d.succ_opt().unwrap();
        assert_eq!(work_hours_between(Some(at(d, 20, 0)), Some(at(next, 7, 30))), Some(11.5));
        assert_eq!(work_hours_between(Some(at(d, 8, 0)), Some(at(d, 8, 20))), Some(0.33));
        assert_eq!(work_hours_between(Some(at(d, 9, 0)), Some(at(d, 8, 0))), None);
        assert_eq!(work_hours_between(None, Some(at(d, 8, 0))), None);
    }

    #[test]
    fn state_codes_round_trip_through_strum() {
        use std::str::FromStr;
        assert_eq!(WorkState::CheckedIn.as_ref(), "01");
        assert_eq!(WorkState::from_str("02").unwrap(), WorkState::CheckedOut);
        assert_eq!(CompareState::from_str("S").unwrap(), CompareState::Settled);
        assert!(CompareState::from_str("Q").is_err());
    }
}
