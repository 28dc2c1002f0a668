use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use tokio::sync::{Mutex as WriterLock, OwnedMutexGuard};
use uuid::Uuid;

use super::{AttendanceStore, AttendanceTx, DailyRecordFilter, HistoryQuery, ProjectScope, Stamp, StoreError};
use crate::model::attendance::{
    CompareState, DailyAttendanceRecord, DeadlineState, OvertimeCandidate, RecordKey, WorkState,
};
use crate::model::device::DeviceRawEvent;
use crate::model::history::{HisStatus, HistoryEntry, NewHistoryEntry, OperationLog};
use crate::model::worker::{IdentityLookup, WorkerIdentity, WorkerKey, WorkerProfileRow, WorkerRow};

#[derive(Debug, Clone, Default)]
struct State {
    workers: Vec<WorkerIdentity>,
    records: BTreeMap<i64, DailyAttendanceRecord>,
    events: Vec<DeviceRawEvent>,
    logs: Vec<OperationLog>,
    history: Vec<HistoryEntry>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&self, key: &RecordKey) -> Option<&DailyAttendanceRecord> {
        self.records.values().find(|r| &r.key == key)
    }

    fn record_mut(&mut self, key: &RecordKey) -> Option<&mut DailyAttendanceRecord> {
        self.records.values_mut().find(|r| &r.key == key)
    }

    fn open_record_mut(&mut self, key: &RecordKey) -> Option<&mut DailyAttendanceRecord> {
        self.record_mut(key).filter(|r| !r.is_closed())
    }

    fn worker_mut(&mut self, site_id: i64, worker_key: &WorkerKey) -> Option<&mut WorkerIdentity> {
        self.workers
            .iter_mut()
            .find(|w| w.site_id == site_id && &w.worker_key == worker_key)
    }

    fn matches_lookup(worker: &WorkerIdentity, lookup: &IdentityLookup) -> bool {
        !worker.is_deleted
            && worker.login_id == lookup.login_id
            && worker.name == lookup.name
            && worker.id_fragment_index == lookup.id_fragment_index
    }

    fn event_mut(&mut self, event_id: i64) -> Option<&mut DeviceRawEvent> {
        self.events.iter_mut().find(|e| e.event_id == event_id)
    }
}

#[derive(Debug, Clone)]
struct FailPoint {
    operation: &'static str,
    skip: usize,
}

/// Mutex-guarded implementation of the store contract. Transactions run one at
/// a time: each holds the writer lock from `begin` until it is committed or
/// dropped, works on a private copy, and publishes that copy on commit. Reads
/// outside a transaction see the last committed state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAttendanceStore {
    state: Arc<Mutex<State>>,
    writer: Arc<WriterLock<()>>,
    faults: Arc<Mutex<Option<FailPoint>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Backend("in-memory state poisoned".to_string()))
}

/// Consumes one hit of the armed fail point, if it targets `operation`.
fn trip(faults: &Mutex<Option<FailPoint>>, operation: &'static str) -> Result<bool, StoreError> {
    let mut guard = lock(faults)?;
    let Some(point) = guard.as_mut() else {
        return Ok(false);
    };
    if point.operation != operation {
        return Ok(false);
    }
    if point.skip > 0 {
        point.skip -= 1;
        return Ok(false);
    }
    *guard = None;
    Ok(true)
}

fn check(faults: &Mutex<Option<FailPoint>>, operation: &'static str) -> Result<(), StoreError> {
    if trip(faults, operation)? {
        return Err(StoreError::Backend(format!("injected failure in {operation}")));
    }
    Ok(())
}

impl InMemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttendanceStore for InMemoryAttendanceStore {
    async fn find_worker_key(&self, lookup: &IdentityLookup) -> Result<Option<WorkerKey>, StoreError> {
        let state = lock(&self.state)?;
        Ok(state
            .workers
            .iter()
            .filter(|w| State::matches_lookup(w, lookup))
            .max_by_key(|w| w.registered_at)
            .map(|w| w.worker_key.clone()))
    }

    async fn mint_worker_key(&self) -> Result<Option<String>, StoreError> {
        if trip(&self.faults, "mint_worker_key")? {
            return Ok(None);
        }
        Ok(Some(Uuid::new_v4().to_simple().to_string()))
    }

    async fn get_worker(&self, site_id: i64, worker_key: &WorkerKey) -> Result<Option<WorkerIdentity>, StoreError> {
        let state = lock(&self.state)?;
        Ok(state
            .workers
            .iter()
            .find(|w| w.site_id == site_id && &w.worker_key == worker_key)
            .cloned())
    }

    async fn find_daily_record(&self, key: &RecordKey) -> Result<Option<DailyAttendanceRecord>, StoreError> {
        check(&self.faults, "find_daily_record")?;
        let state = lock(&self.state)?;
        Ok(state.record(key).cloned())
    }

    async fn list_daily_records(&self, filter: &DailyRecordFilter) -> Result<Vec<DailyAttendanceRecord>, StoreError> {
        let state = lock(&self.state)?;
        let mut list: Vec<_> = state.records.values().filter(|r| filter.matches(r)).cloned().collect();
        list.sort_by(|a, b| {
            b.key
                .record_date
                .cmp(&a.key.record_date)
                .then_with(|| a.key.worker_key.cmp(&b.key.worker_key))
        });
        Ok(list)
    }

    async fn find_overtime_candidates(&self, today: NaiveDate) -> Result<Vec<OvertimeCandidate>, StoreError> {
        check(&self.faults, "find_overtime_candidates")?;
        let yesterday = today - Duration::days(1);
        let state = lock(&self.state)?;
        let mut found = Vec::new();
        for before in state.records.values().filter(|r| {
            r.key.record_date == yesterday && r.in_time.is_some() && r.out_time.is_none()
        }) {
            let after = state.records.values().find(|r| {
                r.key.record_date == today
                    && r.key.site_id == before.key.site_id
                    && r.key.project_id == before.key.project_id
                    && r.key.worker_key == before.key.worker_key
                    && r.in_time.is_none()
                    && r.out_time.is_some()
                    && r.compare_state == Some(CompareState::Settled)
            });
            if let Some(after) = after {
                found.push(OvertimeCandidate {
                    before: before.clone(),
                    after: after.clone(),
                });
            }
        }
        Ok(found)
    }

    async fn find_auto_deadline_targets(&self, today: NaiveDate) -> Result<Vec<DailyAttendanceRecord>, StoreError> {
        let earliest = today - Duration::days(7);
        let state = lock(&self.state)?;
        Ok(state
            .records
            .values()
            .filter(|r| {
                r.key.record_date >= earliest
                    && r.key.record_date < today
                    && r.work_state == WorkState::CheckedOut
                    && r.deadline == DeadlineState::Open
                    && r.compare_state == Some(CompareState::Settled)
            })
            .cloned()
            .collect())
    }

    async fn pending_identity_events(&self, limit: usize) -> Result<Vec<DeviceRawEvent>, StoreError> {
        let state = lock(&self.state)?;
        Ok(state
            .events
            .iter()
            .filter(|e| !e.identity_matched)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn pending_daily_events(&self, limit: usize) -> Result<Vec<DeviceRawEvent>, StoreError> {
        let state = lock(&self.state)?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.identity_matched && !e.daily_matched)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StoreError> {
        let state = lock(&self.state)?;
        let groups: HashSet<_> = state
            .history
            .iter()
            .filter(|h| query.matches(&h.snapshot))
            .map(|h| (h.snapshot.worker_key.clone(), h.registered_at))
            .collect();

        let mut list: Vec<_> = state
            .history
            .iter()
            .filter(|h| groups.contains(&(h.snapshot.worker_key.clone(), h.registered_at)))
            .filter(|h| query.partner_matches(&h.snapshot))
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.registered_at
                .cmp(&a.registered_at)
                .then_with(|| a.snapshot.worker_key.cmp(&b.snapshot.worker_key))
                .then_with(|| (a.status == HisStatus::After).cmp(&(b.status == HisStatus::After)))
                .then_with(|| a.entry_id.cmp(&b.entry_id))
        });
        Ok(list)
    }

    async fn history_reason(&self, entry_id: i64, scope: &ProjectScope) -> Result<Option<String>, StoreError> {
        let state = lock(&self.state)?;
        let Some(anchor) = state.history.iter().find(|h| h.entry_id == entry_id) else {
            return Ok(None);
        };
        let group: Vec<_> = state
            .history
            .iter()
            .filter(|h| {
                h.snapshot.worker_key == anchor.snapshot.worker_key && h.registered_at == anchor.registered_at
            })
            .collect();
        if !group.iter().any(|h| scope.allows(h.snapshot.project_id)) {
            return Ok(None);
        }
        Ok(group.into_iter().filter_map(|h| h.reason.clone()).max())
    }

    async fn begin(&self) -> Result<Box<dyn AttendanceTx>, StoreError> {
        check(&self.faults, "begin")?;
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let work = lock(&self.state)?.clone();
        Ok(Box::new(InMemoryTx {
            shared: Arc::clone(&self.state),
            faults: Arc::clone(&self.faults),
            _writer: writer,
            work,
        }))
    }
}

pub struct InMemoryTx {
    shared: Arc<Mutex<State>>,
    faults: Arc<Mutex<Option<FailPoint>>>,
    /// Released on commit or drop.
    _writer: OwnedMutexGuard<()>,
    work: State,
}

impl InMemoryTx {
    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        check(&self.faults, operation)
    }
}

#[async_trait]
impl AttendanceTx for InMemoryTx {
    async fn insert_worker(&mut self, worker: &WorkerRow, stamp: &Stamp) -> Result<u64, StoreError> {
        self.check("insert_worker")?;
        let lookup = worker.lookup();
        if self.work.workers.iter().any(|w| State::matches_lookup(w, &lookup)) {
            return Ok(0);
        }
        self.work.workers.push(identity_from_row(worker, stamp));
        Ok(1)
    }

    async fn upsert_device_worker(&mut self, worker: &WorkerRow, stamp: &Stamp) -> Result<u64, StoreError> {
        self.check("upsert_device_worker")?;
        match self.work.worker_mut(worker.site_id, &worker.worker_key) {
            Some(existing) if existing.device_editable => {
                existing.project_id = worker.project_id;
                existing.login_id = worker.login_id.clone();
                existing.name = worker.name.clone();
                existing.department = worker.department.clone();
                existing.job_role = worker.job_role.clone();
                existing.is_retired = worker.is_retired;
                existing.id_fragment_enc = worker.id_fragment_enc.clone();
                existing.id_fragment_index = worker.id_fragment_index.clone();
                Ok(1)
            }
            Some(_) => Ok(0),
            None => {
                self.work.workers.push(identity_from_row(worker, stamp));
                Ok(1)
            }
        }
    }

    async fn update_worker_profile(&mut self, profile: &WorkerProfileRow, _stamp: &Stamp) -> Result<u64, StoreError> {
        self.check("update_worker_profile")?;
        match self.work.worker_mut(profile.site_id, &profile.worker_key) {
            Some(w) if !w.is_deleted => {
                w.name = profile.name.clone();
                w.department = profile.department.clone();
                w.job_role = profile.job_role.clone();
                w.phone = profile.phone.clone();
                w.is_retired = profile.is_retired;
                w.retired_on = profile.retired_on;
                w.id_fragment_enc = profile.id_fragment_enc.clone();
                w.id_fragment_index = profile.id_fragment_index.clone();
                w.device_editable = false;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn soft_delete_worker(&mut self, site_id: i64, worker_key: &WorkerKey, _stamp: &Stamp) -> Result<u64, StoreError> {
        self.check("soft_delete_worker")?;
        match self.work.worker_mut(site_id, worker_key) {
            Some(w) if !w.is_deleted => {
                w.is_deleted = true;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn update_worker_default_project(
        &mut self,
        site_id: i64,
        worker_key: &WorkerKey,
        from_project: i64,
        to_project: i64,
        _stamp: &Stamp,
    ) -> Result<u64, StoreError> {
        self.check("update_worker_default_project")?;
        match self.work.worker_mut(site_id, worker_key) {
            Some(w) if w.project_id == from_project => {
                w.project_id = to_project;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn update_daily_record(&mut self, record: &DailyAttendanceRecord, _stamp: &Stamp) -> Result<u64, StoreError> {
        self.check("update_daily_record")?;
        let Some(row) = self.work.open_record_mut(&record.key) else {
            return Ok(0);
        };
        row.in_time = record.in_time;
        row.out_time = record.out_time;
        row.work_state = record.work_state;
        row.work_hours = record.work_hours;
        row.deadline = record.deadline;
        row.is_overtime = record.is_overtime;
        row.reason_type = record.reason_type;
        row.reason = record.reason.clone();
        if record.device_id.is_some() {
            row.device_id = record.device_id;
        }
        Ok(1)
    }

    async fn insert_daily_record(&mut self, record: &DailyAttendanceRecord, _stamp: &Stamp) -> Result<i64, StoreError> {
        self.check("insert_daily_record")?;
        if self.work.record(&record.key).is_some() {
            return Err(StoreError::Duplicate(format!(
                "daily record for {} on {}",
                record.key.worker_key, record.key.record_date
            )));
        }
        let id = self.work.next_id();
        let mut row = record.clone();
        row.record_id = Some(id);
        self.work.records.insert(id, row);
        Ok(id)
    }

    async fn set_deadline(&mut self, key: &RecordKey, state: DeadlineState, _stamp: &Stamp) -> Result<u64, StoreError> {
        self.check("set_deadline")?;
        match self.work.record_mut(key) {
            Some(row) => {
                row.deadline = state;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_record_project(&mut self, key: &RecordKey, to_project: i64, _stamp: &Stamp) -> Result<u64, StoreError> {
        self.check("update_record_project")?;
        let mut moved = key.clone();
        moved.project_id = to_project;
        if to_project != key.project_id && self.work.record(&moved).is_some() {
            return Err(StoreError::Duplicate(format!(
                "daily record for {} on {} already exists in project {}",
                key.worker_key, key.record_date, to_project
            )));
        }
        match self.work.record_mut(key) {
            Some(row) => {
                row.key.project_id = to_project;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_work_hours(&mut self, key: &RecordKey, work_hours: f64, _stamp: &Stamp) -> Result<u64, StoreError> {
        self.check("update_work_hours")?;
        match self.work.open_record_mut(key) {
            Some(row) => {
                row.work_hours = Some(work_hours);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn update_compare_state(&mut self, key: &RecordKey, state: CompareState, _stamp: &Stamp) -> Result<u64, StoreError> {
        self.check("update_compare_state")?;
        match self.work.open_record_mut(key) {
            Some(row) => {
                row.compare_state = Some(state);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_open_record(&mut self, key: &RecordKey) -> Result<u64, StoreError> {
        self.check("delete_open_record")?;
        let id = self
            .work
            .records
            .iter()
            .find(|(_, r)| &r.key == key && !r.is_closed())
            .map(|(id, _)| *id);
        match id {
            Some(id) => {
                self.work.records.remove(&id);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn close_overnight_shift(&mut self, record: &DailyAttendanceRecord, _stamp: &Stamp) -> Result<u64, StoreError> {
        self.check("close_overnight_shift")?;
        let Some(id) = record.record_id else {
            return Ok(0);
        };
        match self.work.records.get_mut(&id) {
            Some(row) if !row.is_closed() && row.out_time.is_none() => {
                row.out_time = record.out_time;
                row.work_state = WorkState::CheckedOut;
                row.work_hours = record.work_hours;
                row.is_overtime = true;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete_record_by_id(&mut self, record_id: i64) -> Result<u64, StoreError> {
        self.check("delete_record_by_id")?;
        Ok(u64::from(self.work.records.remove(&record_id).is_some()))
    }

    async fn mark_identity_matched(&mut self, event_id: i64) -> Result<u64, StoreError> {
        self.check("mark_identity_matched")?;
        match self.work.event_mut(event_id) {
            Some(e) => {
                e.identity_matched = true;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn mark_daily_matched(&mut self, event_id: i64) -> Result<u64, StoreError> {
        self.check("mark_daily_matched")?;
        match self.work.event_mut(event_id) {
            Some(e) => {
                e.daily_matched = true;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn append_operation_log(&mut self, line: &OperationLog) -> Result<(), StoreError> {
        self.check("append_operation_log")?;
        self.work.logs.push(line.clone());
        Ok(())
    }

    async fn append_history(&mut self, entry: &NewHistoryEntry) -> Result<(), StoreError> {
        self.check("append_history")?;
        let entry_id = self.work.next_id();
        self.work.history.push(HistoryEntry {
            entry_id,
            status: entry.status,
            reason_type: entry.reason_type,
            reason: entry.reason.clone(),
            snapshot: entry.snapshot.clone(),
            actor_id: entry.actor_id,
            actor_name: entry.actor_name.clone(),
            registered_at: entry.registered_at,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.check("commit")?;
        let InMemoryTx { shared, work, _writer, .. } = *self;
        *lock(&shared)? = work;
        drop(_writer);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

fn identity_from_row(worker: &WorkerRow, stamp: &Stamp) -> WorkerIdentity {
    WorkerIdentity {
        worker_key: worker.worker_key.clone(),
        site_id: worker.site_id,
        project_id: worker.project_id,
        login_id: worker.login_id.clone(),
        name: worker.name.clone(),
        department: worker.department.clone(),
        job_role: worker.job_role.clone(),
        phone: worker.phone.clone(),
        is_retired: worker.is_retired,
        retired_on: None,
        id_fragment_enc: worker.id_fragment_enc.clone(),
        id_fragment_index: worker.id_fragment_index.clone(),
        device_editable: true,
        is_deleted: false,
        registered_at: stamp.at,
    }
}

#[cfg(test)]
impl InMemoryAttendanceStore {
    /// Fails the `skip + 1`-th call to `operation`. `mint_worker_key` returns no key instead.
    pub fn fail_on(&self, operation: &'static str, skip: usize) {
        *self.faults.lock().unwrap() = Some(FailPoint { operation, skip });
    }

    pub fn seed_record(&self, mut record: DailyAttendanceRecord) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        record.record_id = Some(id);
        state.records.insert(id, record);
        id
    }

    pub fn seed_worker(&self, worker: WorkerIdentity) {
        self.state.lock().unwrap().workers.push(worker);
    }

    pub fn push_event(&self, event: DeviceRawEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    pub fn records(&self) -> Vec<DailyAttendanceRecord> {
        self.state.lock().unwrap().records.values().cloned().collect()
    }

    pub fn record_at(&self, key: &RecordKey) -> Option<DailyAttendanceRecord> {
        self.state.lock().unwrap().record(key).cloned()
    }

    pub fn workers(&self) -> Vec<WorkerIdentity> {
        self.state.lock().unwrap().workers.clone()
    }

    pub fn events(&self) -> Vec<DeviceRawEvent> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().unwrap().history.clone()
    }

    pub fn logs(&self) -> Vec<OperationLog> {
        self.state.lock().unwrap().logs.clone()
    }
}
