//! Attendance reconciliation and audit engine.
//!
//! Every operation takes the acting [`Actor`](crate::model::actor::Actor)
//! explicitly and captures one timestamp up front, which is reused for every
//! row the operation writes.

pub mod assembler;
mod audit;
pub mod deadline;
pub mod identity;
pub mod importer;
pub mod mutation;
pub mod overnight;
pub mod query;
pub mod workers;

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};

use crate::store::AttendanceStore;
use crate::utils::cipher::IdCipher;

#[derive(Clone)]
pub struct AttendanceService {
    store: Arc<dyn AttendanceStore>,
    cipher: IdCipher,
}

impl AttendanceService {
    pub fn new(store: Arc<dyn AttendanceStore>, cipher: IdCipher) -> Self {
        Self { store, cipher }
    }

    pub(crate) fn store(&self) -> &dyn AttendanceStore {
        self.store.as_ref()
    }

    pub(crate) fn cipher(&self) -> &IdCipher {
        &self.cipher
    }
}

pub(crate) fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

    use super::AttendanceService;
    use crate::model::actor::Actor;
    use crate::model::attendance::{DailyAttendanceRecord, RecordKey};
    use crate::model::role::Role;
    use crate::store::InMemoryAttendanceStore;
    use crate::utils::cipher::test_cipher;

    pub fn service() -> (AttendanceService, InMemoryAttendanceStore) {
        let store = InMemoryAttendanceStore::new();
        let service = AttendanceService::new(Arc::new(store.clone()), test_cipher());
        (service, store)
    }

    pub fn admin() -> Actor {
        Actor::new(7, "kim", Role::Admin)
    }

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn at(day: NaiveDate, h: u32, m: u32, s: u32) -> NaiveDateTime {
        day.and_time(NaiveTime::from_hms_opt(h, m, s).unwrap())
    }

    pub fn key(day: NaiveDate) -> RecordKey {
        RecordKey::new(1, 10, "abc", day)
    }

    /// Open record with the given punches, work state and hours derived.
    pub fn record(day: NaiveDate, in_time: Option<NaiveDateTime>, out_time: Option<NaiveDateTime>) -> DailyAttendanceRecord {
        let mut record = DailyAttendanceRecord::empty(key(day));
        record.in_time = in_time;
        record.out_time = out_time;
        record.refresh_derived();
        record
    }
}
