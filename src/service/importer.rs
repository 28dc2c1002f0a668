use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, instrument, warn};

use super::AttendanceService;
use super::assembler::{PunchOutcome, apply_punch};
use super::audit::settle;
use super::identity::{IdentityResolver, lookup_from_encrypted};
use crate::error::AttendanceError;
use crate::model::actor::Actor;
use crate::model::attendance::{DailyAttendanceRecord, RecordKey};
use crate::model::device::DeviceRawEvent;
use crate::model::history::OperationLog;
use crate::model::worker::WorkerRow;
use crate::store::{AttendanceTx, Stamp};

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub identities: usize,
    pub punches: usize,
    pub skipped: usize,
}

impl AttendanceService {
    /// Identity pass, then daily pass. Each pass is one transaction over at
    /// most `batch_size` events.
    #[instrument(skip(self))]
    pub async fn import_device_events(&self, batch_size: usize, now: NaiveDateTime) -> Result<ImportReport, AttendanceError> {
        let actor = Actor::scheduler();
        let stamp = Stamp {
            actor_id: actor.user_id,
            actor_name: actor.user_name.clone(),
            at: now,
        };
        let (identities, quarantined) = self.import_identities(batch_size, &stamp).await?;
        let (punches, skipped) = self.import_punches(batch_size, &stamp).await?;
        let report = ImportReport {
            identities,
            punches,
            skipped: skipped + quarantined,
        };
        info!(?report, "device import finished");
        Ok(report)
    }

    /// Returns the identities upserted and the events set aside because their
    /// id fragment could not be decrypted. Set-aside events are marked done for
    /// both passes so they never block the queue.
    async fn import_identities(&self, batch_size: usize, stamp: &Stamp) -> Result<(usize, usize), AttendanceError> {
        const OP: &str = "import_identities";
        let events = self
            .store()
            .pending_identity_events(batch_size)
            .await
            .map_err(AttendanceError::store(OP))?;
        if events.is_empty() {
            return Ok((0, 0));
        }

        let mut resolver = IdentityResolver::new(self.store());
        let mut rows: Vec<Option<WorkerRow>> = Vec::with_capacity(events.len());
        for event in &events {
            let lookup = match lookup_from_encrypted(
                self.cipher(),
                &event.login_id,
                &event.name,
                event.id_fragment_enc.as_deref(),
            ) {
                Ok(lookup) => lookup,
                Err(e) => {
                    warn!(event_id = event.event_id, error = %e, "undecryptable id fragment, event set aside");
                    rows.push(None);
                    continue;
                }
            };
            let worker_key = resolver.resolve(&lookup).await?;
            let id_fragment_enc = lookup.id_fragment_index.as_ref().and(event.id_fragment_enc.clone());
            rows.push(Some(WorkerRow {
                worker_key,
                site_id: event.site_id,
                project_id: event.project_id,
                login_id: lookup.login_id,
                name: lookup.name,
                department: event.department.clone(),
                job_role: event.job_role.clone(),
                phone: None,
                is_retired: false,
                id_fragment_enc,
                id_fragment_index: lookup.id_fragment_index,
            }));
        }

        let mut tx = self.begin(OP).await?;
        let result: Result<(usize, usize), AttendanceError> = async {
            let tx = tx.as_mut();
            let (mut upserted, mut set_aside) = (0, 0);
            for (event, row) in events.iter().zip(&rows) {
                match row {
                    Some(row) => {
                        tx.upsert_device_worker(row, stamp).await.map_err(AttendanceError::store(OP))?;
                        upserted += 1;
                    }
                    None => {
                        tx.mark_daily_matched(event.event_id)
                            .await
                            .map_err(AttendanceError::store(OP))?;
                        set_aside += 1;
                    }
                }
                tx.mark_identity_matched(event.event_id)
                    .await
                    .map_err(AttendanceError::store(OP))?;
            }
            Ok((upserted, set_aside))
        }
        .await;
        settle(tx, result, OP).await
    }

    async fn import_punches(&self, batch_size: usize, stamp: &Stamp) -> Result<(usize, usize), AttendanceError> {
        const OP: &str = "import_punches";
        let events = self
            .store()
            .pending_daily_events(batch_size)
            .await
            .map_err(AttendanceError::store(OP))?;
        if events.is_empty() {
            return Ok((0, 0));
        }

        let mut keyed = Vec::with_capacity(events.len());
        for event in &events {
            let worker_key = match lookup_from_encrypted(
                self.cipher(),
                &event.login_id,
                &event.name,
                event.id_fragment_enc.as_deref(),
            ) {
                Ok(lookup) => self
                    .store()
                    .find_worker_key(&lookup)
                    .await
                    .map_err(AttendanceError::store(OP))?,
                Err(e) => {
                    warn!(event_id = event.event_id, error = %e, "undecryptable id fragment");
                    None
                }
            };
            keyed.push(worker_key);
        }

        let mut tx = self.begin(OP).await?;
        let result: Result<(usize, usize), AttendanceError> = async {
            let tx = tx.as_mut();
            let mut day_state: HashMap<RecordKey, DailyAttendanceRecord> = HashMap::new();
            let (mut applied, mut skipped) = (0, 0);
            for (event, worker_key) in events.iter().zip(keyed) {
                let (Some(ts), Some(worker_key)) = (event.recognized_at, worker_key) else {
                    warn!(event_id = event.event_id, "device event without a timestamp or a live identity");
                    skipped += 1;
                    tx.mark_daily_matched(event.event_id).await.map_err(AttendanceError::store(OP))?;
                    continue;
                };
                let key = RecordKey::new(event.site_id, event.project_id, worker_key, ts.date());
                if !day_state.contains_key(&key) {
                    if let Some(existing) = self.current_record(&key, OP).await? {
                        day_state.insert(key.clone(), existing);
                    }
                }

                match apply_punch(day_state.get(&key), key.clone(), ts, event.device_id) {
                    PunchOutcome::Created(mut record) => {
                        let id = tx
                            .insert_daily_record(&record, stamp)
                            .await
                            .map_err(AttendanceError::store(OP))?;
                        record.record_id = Some(id);
                        log_punch(tx, &record, stamp, "device punch opened record").await?;
                        day_state.insert(key, record);
                        applied += 1;
                    }
                    PunchOutcome::Updated(record) => {
                        let affected = tx
                            .update_daily_record(&record, stamp)
                            .await
                            .map_err(AttendanceError::store(OP))?;
                        if affected == 0 {
                            warn!(worker_key = %key.worker_key, date = %key.record_date, "record closed while importing");
                            skipped += 1;
                        } else {
                            log_punch(tx, &record, stamp, "device punch updated record").await?;
                            day_state.insert(key, record);
                            applied += 1;
                        }
                    }
                    PunchOutcome::Unchanged => {}
                    PunchOutcome::Locked => {
                        warn!(worker_key = %key.worker_key, date = %key.record_date, "punch on closed record dropped");
                        skipped += 1;
                    }
                }
                tx.mark_daily_matched(event.event_id).await.map_err(AttendanceError::store(OP))?;
            }
            Ok((applied, skipped))
        }
        .await;
        settle(tx, result, OP).await
    }
}

async fn log_punch(
    tx: &mut dyn AttendanceTx,
    record: &DailyAttendanceRecord,
    stamp: &Stamp,
    message: &str,
) -> Result<(), AttendanceError> {
    let line = OperationLog {
        site_id: record.key.site_id,
        project_id: record.key.project_id,
        worker_key: record.key.worker_key.clone(),
        record_date: record.key.record_date,
        work_state: Some(record.work_state),
        message: message.to_string(),
        actor_id: stamp.actor_id,
        actor_name: stamp.actor_name.clone(),
        logged_at: stamp.at,
    };
    tx.append_operation_log(&line)
        .await
        .map_err(AttendanceError::store("import_punches"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::WorkState;
    use crate::service::testing::{admin, at, date, service};
    use crate::store::InMemoryAttendanceStore;
    use crate::utils::cipher::test_cipher;

    fn event(id: i64, login: &str, ts: Option<NaiveDateTime>) -> DeviceRawEvent {
        DeviceRawEvent {
            event_id: id,
            device_id: Some(5),
            site_id: 1,
            project_id: 10,
            login_id: login.to_string(),
            name: "Hong".to_string(),
            department: Some("Alpha Construction".to_string()),
            job_role: Some("rebar".to_string()),
            id_fragment_enc: Some(test_cipher().encode("900101").unwrap()),
            recognized_at: ts,
            identity_matched: false,
            daily_matched: false,
        }
    }

    fn import_now() -> NaiveDateTime {
        at(date(2025, 3, 2), 0, 5, 0)
    }

    fn records_for(store: &InMemoryAttendanceStore, login: &str) -> Vec<DailyAttendanceRecord> {
        let worker = store.workers().into_iter().find(|w| w.login_id == login).unwrap();
        store
            .records()
            .into_iter()
            .filter(|r| r.key.worker_key == worker.worker_key)
            .collect()
    }

    #[actix_web::test]
    async fn two_passes_create_identity_then_record() {
        let (service, store) = service();
        let day = date(2025, 3, 1);
        store.push_event(event(1, "010", Some(at(day, 7, 50, 0))));
        store.push_event(event(2, "010", Some(at(day, 18, 10, 0))));

        let report = service.import_device_events(100, import_now()).await.unwrap();
        assert_eq!(
            report,
            ImportReport {
                identities: 2,
                punches: 2,
                skipped: 0
            }
        );

        let workers = store.workers();
        assert_eq!(workers.len(), 1);
        assert!(workers[0].id_fragment_index.is_some());

        let records = records_for(&store, "010");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].in_time, Some(at(day, 7, 50, 0)));
        assert_eq!(records[0].out_time, Some(at(day, 18, 10, 0)));
        assert_eq!(records[0].work_state, WorkState::CheckedOut);
        assert_eq!(records[0].compare_state, None);
        assert!(store.events().iter().all(|e| e.identity_matched && e.daily_matched));
        assert!(store.history().is_empty());
    }

    #[actix_web::test]
    async fn replaying_an_event_changes_nothing() {
        let (service, store) = service();
        let day = date(2025, 3, 1);
        store.push_event(event(1, "010", Some(at(day, 7, 50, 0))));
        service.import_device_events(100, import_now()).await.unwrap();
        let once = records_for(&store, "010");

        store.push_event(event(2, "010", Some(at(day, 7, 50, 0))));
        let report = service.import_device_events(100, import_now()).await.unwrap();
        assert_eq!(report.punches, 0);
        assert_eq!(records_for(&store, "010"), once);
        assert_eq!(store.workers().len(), 1);
    }

    #[actix_web::test]
    async fn closed_records_drop_punches() {
        let (service, store) = service();
        let day = date(2025, 3, 1);
        store.push_event(event(1, "010", Some(at(day, 7, 50, 0))));
        service.import_device_events(100, import_now()).await.unwrap();

        let closed = records_for(&store, "010").remove(0);
        let selection = crate::model::command::RecordSelection {
            records: vec![closed.key.clone()],
            reason: None,
        };
        service.close_deadlines(&admin(), selection).await.unwrap();

        store.push_event(event(2, "010", Some(at(day, 19, 0, 0))));
        let report = service.import_device_events(100, import_now()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(records_for(&store, "010")[0].out_time, None);
        assert!(store.events().iter().all(|e| e.daily_matched));
    }

    #[actix_web::test]
    async fn events_for_deleted_workers_are_skipped() {
        let (service, store) = service();
        store.push_event(event(1, "010", Some(at(date(2025, 3, 1), 7, 50, 0))));
        service.import_device_events(100, import_now()).await.unwrap();
        let key = store.workers()[0].worker_key.clone();
        service.remove_worker(&admin(), 1, &key).await.unwrap();

        store.push_event(DeviceRawEvent {
            identity_matched: true,
            ..event(2, "010", Some(at(date(2025, 3, 1), 18, 0, 0)))
        });
        let report = service.import_device_events(100, import_now()).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(records_for(&store, "010")[0].out_time, None);
    }

    #[actix_web::test]
    async fn curated_profiles_survive_device_reimport() {
        let (service, store) = service();
        store.push_event(event(1, "010", Some(at(date(2025, 3, 1), 7, 50, 0))));
        service.import_device_events(100, import_now()).await.unwrap();

        let key = store.workers()[0].worker_key.clone();
        let update = crate::model::worker::WorkerProfileUpdate {
            site_id: 1,
            name: "Hong".to_string(),
            department: Some("Beta Construction".to_string()),
            job_role: Some("formwork".to_string()),
            phone: None,
            is_retired: false,
            retired_on: None,
            id_fragment: Some("900101".to_string()),
        };
        service
            .modify_worker(&admin(), &key, update)
            .await
            .unwrap();

        let mut again = event(2, "010", Some(at(date(2025, 3, 2), 7, 40, 0)));
        again.department = Some("Alpha Construction".to_string());
        store.push_event(again);
        service.import_device_events(100, import_now()).await.unwrap();

        let workers = store.workers();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].department.as_deref(), Some("Beta Construction"));
    }

    #[actix_web::test]
    async fn failed_daily_pass_leaves_events_pending() {
        let (service, store) = service();
        store.push_event(event(1, "010", Some(at(date(2025, 3, 1), 7, 50, 0))));
        store.fail_on("mark_daily_matched", 0);

        assert!(service.import_device_events(100, import_now()).await.is_err());
        let events = store.events();
        assert!(events[0].identity_matched);
        assert!(!events[0].daily_matched);
        assert!(store.records().is_empty());
    }

    #[actix_web::test]
    async fn undecryptable_event_is_set_aside_and_the_queue_moves_on() {
        let (service, store) = service();
        let day = date(2025, 3, 1);
        let mut bad = event(1, "010", Some(at(day, 7, 50, 0)));
        bad.id_fragment_enc = Some("not-base64!!".to_string());
        store.push_event(bad);
        store.push_event(event(2, "020", Some(at(day, 8, 0, 0))));

        let report = service.import_device_events(100, import_now()).await.unwrap();
        assert_eq!(
            report,
            ImportReport {
                identities: 1,
                punches: 1,
                skipped: 1
            }
        );
        assert_eq!(store.workers().len(), 1);
        assert_eq!(records_for(&store, "020").len(), 1);
        assert!(store.events().iter().all(|e| e.identity_matched && e.daily_matched));

        store.push_event(event(3, "020", Some(at(day, 18, 0, 0))));
        let report = service.import_device_events(100, import_now()).await.unwrap();
        assert_eq!(report.punches, 1);
        assert_eq!(records_for(&store, "020")[0].out_time, Some(at(day, 18, 0, 0)));
    }
}
