//! Persistence seam for the attendance core.
//!
//! [`AttendanceStore`] is the read side and hands out transactions;
//! [`AttendanceTx`] carries every write. A transaction that is dropped without
//! `commit` is rolled back, so a cancelled request never leaves partial state.

pub mod filter;
pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::model::attendance::{
    CompareState, DailyAttendanceRecord, DeadlineState, OvertimeCandidate, RecordKey,
};
use crate::model::device::DeviceRawEvent;
use crate::model::history::{HistoryEntry, NewHistoryEntry, OperationLog};
use crate::model::worker::{IdentityLookup, WorkerIdentity, WorkerKey, WorkerProfileRow, WorkerRow};
use crate::utils::cipher::CipherError;

pub use filter::{DailyRecordFilter, HistoryQuery, ProjectScope};
pub use memory::InMemoryAttendanceStore;
pub use mysql::MySqlAttendanceStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique-key violation (SQLSTATE 23000).
    #[error("duplicate row: {0}")]
    Duplicate(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
    #[error("worker key generation returned no value")]
    KeyUnavailable,
    #[error("backend error: {0}")]
    Backend(String),
}

/// Actor columns stamped on every write.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamp {
    pub actor_id: u64,
    pub actor_name: String,
    pub at: chrono::NaiveDateTime,
}

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Most recently registered, non-deleted identity matching the dedup key.
    async fn find_worker_key(&self, lookup: &IdentityLookup) -> Result<Option<WorkerKey>, StoreError>;

    /// A fresh opaque key, or `None` if the generator produced nothing.
    async fn mint_worker_key(&self) -> Result<Option<String>, StoreError>;

    async fn get_worker(&self, site_id: i64, worker_key: &WorkerKey) -> Result<Option<WorkerIdentity>, StoreError>;

    async fn find_daily_record(&self, key: &RecordKey) -> Result<Option<DailyAttendanceRecord>, StoreError>;

    async fn list_daily_records(&self, filter: &DailyRecordFilter) -> Result<Vec<DailyAttendanceRecord>, StoreError>;

    /// Open shifts from `today - 1` paired with exit-only, settled records on `today`.
    async fn find_overtime_candidates(&self, today: NaiveDate) -> Result<Vec<OvertimeCandidate>, StoreError>;

    /// Open, checked-out, settled records dated in `[today - 7, today)`.
    async fn find_auto_deadline_targets(&self, today: NaiveDate) -> Result<Vec<DailyAttendanceRecord>, StoreError>;

    async fn pending_identity_events(&self, limit: usize) -> Result<Vec<DeviceRawEvent>, StoreError>;

    async fn pending_daily_events(&self, limit: usize) -> Result<Vec<DeviceRawEvent>, StoreError>;

    /// Ledger rows matching the query, together with their BEFORE/AFTER partners.
    async fn list_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Largest reason among entries sharing the given entry's worker key and
    /// timestamp. `None` unless one of those entries falls inside `scope`.
    async fn history_reason(&self, entry_id: i64, scope: &ProjectScope) -> Result<Option<String>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn AttendanceTx>, StoreError>;
}

#[async_trait]
pub trait AttendanceTx: Send {
    /// Inserts unless a non-deleted identity with the same dedup key exists.
    /// Returns the number of inserted rows.
    async fn insert_worker(&mut self, worker: &WorkerRow, stamp: &Stamp) -> Result<u64, StoreError>;

    /// Device-driven upsert on `(worker_key, site_id)`. Profile columns are only
    /// refreshed while the row is still device-editable.
    async fn upsert_device_worker(&mut self, worker: &WorkerRow, stamp: &Stamp) -> Result<u64, StoreError>;

    async fn update_worker_profile(&mut self, profile: &WorkerProfileRow, stamp: &Stamp) -> Result<u64, StoreError>;

    async fn soft_delete_worker(&mut self, site_id: i64, worker_key: &WorkerKey, stamp: &Stamp) -> Result<u64, StoreError>;

    /// Moves the site default project from `from_project` to `to_project`.
    async fn update_worker_default_project(
        &mut self,
        site_id: i64,
        worker_key: &WorkerKey,
        from_project: i64,
        to_project: i64,
        stamp: &Stamp,
    ) -> Result<u64, StoreError>;

    /// Overwrites times, state, flags and hours of an open record.
    async fn update_daily_record(&mut self, record: &DailyAttendanceRecord, stamp: &Stamp) -> Result<u64, StoreError>;

    /// Fails with [`StoreError::Duplicate`] when the key already exists.
    async fn insert_daily_record(&mut self, record: &DailyAttendanceRecord, stamp: &Stamp) -> Result<i64, StoreError>;

    async fn set_deadline(&mut self, key: &RecordKey, state: DeadlineState, stamp: &Stamp) -> Result<u64, StoreError>;

    async fn update_record_project(&mut self, key: &RecordKey, to_project: i64, stamp: &Stamp) -> Result<u64, StoreError>;

    /// Open records only.
    async fn update_work_hours(&mut self, key: &RecordKey, work_hours: f64, stamp: &Stamp) -> Result<u64, StoreError>;

    /// Open records only.
    async fn update_compare_state(&mut self, key: &RecordKey, state: CompareState, stamp: &Stamp) -> Result<u64, StoreError>;

    /// Hard delete, open records only.
    async fn delete_open_record(&mut self, key: &RecordKey) -> Result<u64, StoreError>;

    /// Writes the carried-over exit onto the earlier record and flags overtime.
    async fn close_overnight_shift(&mut self, record: &DailyAttendanceRecord, stamp: &Stamp) -> Result<u64, StoreError>;

    async fn delete_record_by_id(&mut self, record_id: i64) -> Result<u64, StoreError>;

    async fn mark_identity_matched(&mut self, event_id: i64) -> Result<u64, StoreError>;

    async fn mark_daily_matched(&mut self, event_id: i64) -> Result<u64, StoreError>;

    async fn append_operation_log(&mut self, line: &OperationLog) -> Result<(), StoreError>;

    async fn append_history(&mut self, entry: &NewHistoryEntry) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
