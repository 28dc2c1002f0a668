use chrono::NaiveDateTime;
use tracing::{debug, info, instrument};

use super::audit::{AuditTrail, settle};
use super::mutation::{expect_rows, validate_batch};
use super::{AttendanceService, now};
use crate::error::{AttendanceError, ConflictCode};
use crate::model::actor::Actor;
use crate::model::attendance::{DeadlineState, RecordKey};
use crate::model::command::RecordSelection;
use crate::model::history::{ReasonType, RecordSnapshot};

impl AttendanceService {
    /// Locks the listed records. Records that are already closed are left alone.
    #[instrument(skip_all, fields(actor = %actor.user_name, records = selection.records.len()))]
    pub async fn close_deadlines(&self, actor: &Actor, selection: RecordSelection) -> Result<usize, AttendanceError> {
        self.transition(actor, &selection.records, selection.reason, DeadlineState::Closed, now(), "close_deadlines")
            .await
    }

    /// The only way back from a closed record.
    #[instrument(skip_all, fields(actor = %actor.user_name, records = selection.records.len()))]
    pub async fn cancel_deadlines(&self, actor: &Actor, selection: RecordSelection) -> Result<usize, AttendanceError> {
        self.transition(actor, &selection.records, selection.reason, DeadlineState::Open, now(), "cancel_deadlines")
            .await
    }

    /// Closes checked-out, settled records dated within the seven days before
    /// `now`. Runs as the scheduler actor.
    #[instrument(skip(self))]
    pub async fn close_expired_records(&self, now: NaiveDateTime) -> Result<usize, AttendanceError> {
        const OP: &str = "close_expired_records";
        let targets = self
            .store()
            .find_auto_deadline_targets(now.date())
            .await
            .map_err(AttendanceError::store(OP))?;
        if targets.is_empty() {
            return Ok(0);
        }

        let keys: Vec<RecordKey> = targets.into_iter().map(|r| r.key).collect();
        let closed = self
            .transition(&Actor::scheduler(), &keys, None, DeadlineState::Closed, now, OP)
            .await?;
        info!(closed, "auto deadline sweep finished");
        Ok(closed)
    }

    async fn transition(
        &self,
        actor: &Actor,
        keys: &[RecordKey],
        reason: Option<String>,
        target: DeadlineState,
        at: NaiveDateTime,
        operation: &'static str,
    ) -> Result<usize, AttendanceError> {
        validate_batch(keys)?;
        let reason_type = match target {
            DeadlineState::Closed => ReasonType::Deadline,
            DeadlineState::Open => ReasonType::DeadlineCancel,
        };

        let mut trail = AuditTrail::new(actor, at);
        let mut changed = Vec::with_capacity(keys.len());
        for key in keys {
            let existing = self.current_record(key, operation).await?.ok_or_else(|| {
                AttendanceError::conflict(
                    ConflictCode::NoMatchingRecord,
                    format!("no record for {} on {}", key.worker_key, key.record_date),
                )
            })?;
            if existing.deadline == target {
                debug!(worker_key = %key.worker_key, date = %key.record_date, "deadline already in target state");
                continue;
            }
            let mut after = existing.clone();
            after.deadline = target;
            trail.push(
                reason_type,
                reason.clone(),
                key,
                RecordSnapshot::from(&existing),
                RecordSnapshot::from(&after),
                Some(after.work_state),
                format!("{}: deadline {:?} -> {:?}", reason_type.as_ref(), existing.deadline, target),
            );
            changed.push(key);
        }
        if changed.is_empty() {
            return Ok(0);
        }

        let stamp = trail.stamp();
        let mut tx = self.begin(operation).await?;
        let result: Result<usize, AttendanceError> = async {
            let tx = tx.as_mut();
            for key in &changed {
                let affected = tx
                    .set_deadline(key, target, &stamp)
                    .await
                    .map_err(AttendanceError::store(operation))?;
                expect_rows(affected, key)?;
            }
            trail.write(tx).await.map_err(AttendanceError::store(operation))?;
            Ok(changed.len())
        }
        .await;
        settle(tx, result, operation).await
    }
}
