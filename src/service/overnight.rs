use chrono::NaiveDateTime;
use tracing::{info, instrument, warn};

use super::AttendanceService;
use super::audit::{AuditTrail, describe, settle};
use super::mutation::expect_rows;
use crate::error::{AttendanceError, ConflictCode};
use crate::model::actor::Actor;
use crate::model::attendance::{OvertimeCandidate, WorkState, work_hours_between};
use crate::model::history::{ReasonType, RecordSnapshot};

impl AttendanceService {
    /// Stitches shifts that crossed midnight: yesterday's open check-in takes
    /// today's settled exit, is flagged overtime, and today's exit-only record
    /// is deleted. One transaction per pair; a failed pair is logged and the
    /// rest still run.
    #[instrument(skip(self))]
    pub async fn reconcile_overnight(&self, now: NaiveDateTime) -> Result<usize, AttendanceError> {
        let candidates = self
            .store()
            .find_overtime_candidates(now.date())
            .await
            .map_err(AttendanceError::store("reconcile_overnight"))?;

        let actor = Actor::scheduler();
        let mut merged = 0;
        for candidate in candidates {
            if candidate.before.is_closed() {
                warn!(
                    worker_key = %candidate.before.key.worker_key,
                    date = %candidate.before.key.record_date,
                    "skipping overnight merge onto a closed record"
                );
                continue;
            }
            let worker_key = candidate.before.key.worker_key.clone();
            let date = candidate.before.key.record_date;
            match self.merge_overnight_pair(&actor, candidate, now).await {
                Ok(()) => merged += 1,
                Err(e) => warn!(%worker_key, %date, error = %e, "overnight merge failed"),
            }
        }
        info!(merged, "overnight reconciliation finished");
        Ok(merged)
    }

    async fn merge_overnight_pair(
        &self,
        actor: &Actor,
        candidate: OvertimeCandidate,
        at: NaiveDateTime,
    ) -> Result<(), AttendanceError> {
        const OP: &str = "reconcile_overnight";
        let OvertimeCandidate { before, after } = candidate;
        let Some(after_id) = after.record_id else {
            return Err(AttendanceError::conflict(
                ConflictCode::NoMatchingRecord,
                format!("exit record for {} on {} has no id", after.key.worker_key, after.key.record_date),
            ));
        };

        let mut stitched = before.clone();
        stitched.out_time = after.out_time;
        stitched.work_state = WorkState::CheckedOut;
        stitched.is_overtime = true;
        stitched.work_hours = work_hours_between(stitched.in_time, stitched.out_time).or(before.work_hours);

        let mut trail = AuditTrail::new(actor, at);
        let prior = RecordSnapshot::from(&before);
        let merged = RecordSnapshot::from(&stitched);
        let message = format!("{}: overnight {} -> {}", ReasonType::Edit.as_ref(), describe(&prior), describe(&merged));
        trail.push(ReasonType::Edit, None, &before.key, prior, merged, Some(WorkState::CheckedOut), message);

        let removed = RecordSnapshot::from(&after);
        let message = format!("{}: carried into {}", ReasonType::Delete.as_ref(), before.key.record_date);
        trail.push(
            ReasonType::Delete,
            None,
            &after.key,
            removed,
            RecordSnapshot::removed(&after.key.worker_key),
            None,
            message,
        );

        let stamp = trail.stamp();
        let mut tx = self.begin(OP).await?;
        let result: Result<(), AttendanceError> = async {
            let tx = tx.as_mut();
            let affected = tx
                .close_overnight_shift(&stitched, &stamp)
                .await
                .map_err(AttendanceError::store(OP))?;
            expect_rows(affected, &stitched.key)?;
            tx.delete_record_by_id(after_id).await.map_err(AttendanceError::store(OP))?;
            trail.write(tx).await.map_err(AttendanceError::store(OP))?;
            Ok(())
        }
        .await;
        settle(tx, result, OP).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::{CompareState, DeadlineState, RecordKey};
    use crate::model::history::HisStatus;
    use crate::service::testing::{at, date, key, record, service};

    fn seed_pair(store: &crate::store::InMemoryAttendanceStore, settled: bool) {
        let day_n = date(2025, 3, 1);
        let day_n1 = date(2025, 3, 2);
        store.seed_record(record(day_n, Some(at(day_n, 8, 0, 0)), None));
        let mut exit = record(day_n1, None, Some(at(day_n1, 7, 30, 0)));
        if settled {
            exit.compare_state = Some(CompareState::Settled);
        }
        store.seed_record(exit);
    }

    #[actix_web::test]
    async fn overnight_shift_is_stitched_onto_prior_day() {
        let (service, store) = service();
        seed_pair(&store, true);
        let now = at(date(2025, 3, 2), 9, 0, 0);

        assert_eq!(service.reconcile_overnight(now).await.unwrap(), 1);

        let day_n = store.record_at(&key(date(2025, 3, 1))).unwrap();
        assert_eq!(day_n.out_time, Some(at(date(2025, 3, 2), 7, 30, 0)));
        assert!(day_n.is_overtime);
        assert_eq!(day_n.work_state, WorkState::CheckedOut);
        assert_eq!(day_n.work_hours, Some(23.5));
        assert!(store.record_at(&key(date(2025, 3, 2))).is_none());

        let history = store.history();
        assert_eq!(history.len(), 4);
        assert_eq!(
            history.iter().map(|h| (h.status, h.reason_type)).collect::<Vec<_>>(),
            vec![
                (HisStatus::Before, ReasonType::Edit),
                (HisStatus::Before, ReasonType::Delete),
                (HisStatus::After, ReasonType::Edit),
                (HisStatus::After, ReasonType::Delete),
            ]
        );
        assert_eq!(history[3].snapshot, RecordSnapshot::removed(&"abc".into()));
        assert!(history.iter().all(|h| h.registered_at == now && h.actor_name == "Scheduled"));
    }

    #[actix_web::test]
    async fn unsettled_exit_is_left_alone() {
        let (service, store) = service();
        seed_pair(&store, false);
        assert_eq!(service.reconcile_overnight(at(date(2025, 3, 2), 9, 0, 0)).await.unwrap(), 0);
        assert_eq!(store.records().len(), 2);
    }

    #[actix_web::test]
    async fn second_run_finds_nothing_to_do() {
        let (service, store) = service();
        seed_pair(&store, true);
        let now = at(date(2025, 3, 2), 9, 0, 0);
        service.reconcile_overnight(now).await.unwrap();
        assert_eq!(service.reconcile_overnight(now).await.unwrap(), 0);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.history().len(), 4);
    }

    #[actix_web::test]
    async fn failed_delete_keeps_both_records() {
        let (service, store) = service();
        seed_pair(&store, true);
        store.fail_on("delete_record_by_id", 0);

        assert_eq!(service.reconcile_overnight(at(date(2025, 3, 2), 9, 0, 0)).await.unwrap(), 0);
        let day_n = store.record_at(&key(date(2025, 3, 1))).unwrap();
        assert_eq!(day_n.out_time, None);
        assert!(!day_n.is_overtime);
        assert_eq!(store.records().len(), 2);
        assert!(store.history().is_empty());
    }

    #[actix_web::test]
    async fn one_failed_pair_does_not_stop_the_rest() {
        let (service, store) = service();
        seed_pair(&store, true);
        let day_n = date(2025, 3, 1);
        let day_n1 = date(2025, 3, 2);
        let other = |day| RecordKey::new(1, 10, "def", day);
        let mut open = record(day_n, Some(at(day_n, 20, 0, 0)), None);
        open.key = other(day_n);
        store.seed_record(open);
        let mut exit = record(day_n1, None, Some(at(day_n1, 6, 0, 0)));
        exit.key = other(day_n1);
        exit.compare_state = Some(CompareState::Settled);
        store.seed_record(exit);
        store.fail_on("delete_record_by_id", 0);

        assert_eq!(service.reconcile_overnight(at(day_n1, 9, 0, 0)).await.unwrap(), 1);
        assert_eq!(store.records().len(), 3);
        assert_eq!(store.record_at(&key(day_n)).unwrap().out_time, None);
        assert!(store.record_at(&other(day_n1)).is_none());
        assert_eq!(store.record_at(&other(day_n)).unwrap().out_time, Some(at(day_n1, 6, 0, 0)));
        assert_eq!(store.history().len(), 4);
    }

    #[actix_web::test]
    async fn closed_prior_day_is_skipped() {
        let (service, store) = service();
        let day_n = date(2025, 3, 1);
        let mut locked = record(day_n, Some(at(day_n, 8, 0, 0)), None);
        locked.deadline = DeadlineState::Closed;
        store.seed_record(locked);
        let day_n1 = date(2025, 3, 2);
        let mut exit = record(day_n1, None, Some(at(day_n1, 7, 30, 0)));
        exit.compare_state = Some(CompareState::Settled);
        store.seed_record(exit);

        assert_eq!(service.reconcile_overnight(at(day_n1, 9, 0, 0)).await.unwrap(), 0);
        assert_eq!(store.records().len(), 2);
    }
}
