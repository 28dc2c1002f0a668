use chrono::NaiveDateTime;
use tracing::warn;

use crate::error::AttendanceError;
use crate::model::actor::Actor;
use crate::model::attendance::{RecordKey, WorkState};
use crate::model::history::{HisStatus, NewHistoryEntry, OperationLog, ReasonType, RecordSnapshot};
use crate::store::{AttendanceTx, Stamp, StoreError};

struct AuditPair {
    reason_type: ReasonType,
    reason: Option<String>,
    before: RecordSnapshot,
    after: RecordSnapshot,
    log: OperationLog,
}

/// Collects the log line and BEFORE/AFTER pair for each record an operation
/// touches. Every row shares the operation's single timestamp.
pub(crate) struct AuditTrail<'a> {
    actor: &'a Actor,
    at: NaiveDateTime,
    pairs: Vec<AuditPair>,
}

impl<'a> AuditTrail<'a> {
    pub fn new(actor: &'a Actor, at: NaiveDateTime) -> Self {
        Self {
            actor,
            at,
            pairs: Vec::new(),
        }
    }

    pub fn stamp(&self) -> Stamp {
        Stamp {
            actor_id: self.actor.user_id,
            actor_name: self.actor.user_name.clone(),
            at: self.at,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        reason_type: ReasonType,
        reason: Option<String>,
        key: &RecordKey,
        before: RecordSnapshot,
        after: RecordSnapshot,
        work_state: Option<WorkState>,
        message: String,
    ) {
        let log = OperationLog {
            site_id: key.site_id,
            project_id: key.project_id,
            worker_key: key.worker_key.clone(),
            record_date: key.record_date,
            work_state,
            message,
            actor_id: self.actor.user_id,
            actor_name: self.actor.user_name.clone(),
            logged_at: self.at,
        };
        self.pairs.push(AuditPair {
            reason_type,
            reason,
            before,
            after,
            log,
        });
    }

    fn entry(&self, pair: &AuditPair, status: HisStatus) -> NewHistoryEntry {
        let snapshot = match status {
            HisStatus::Before => pair.before.clone(),
            HisStatus::After => pair.after.clone(),
        };
        NewHistoryEntry {
            status,
            reason_type: pair.reason_type,
            reason: pair.reason.clone(),
            snapshot,
            actor_id: self.actor.user_id,
            actor_name: self.actor.user_name.clone(),
            registered_at: self.at,
        }
    }

    /// Log lines first, then every BEFORE row, then every AFTER row.
    pub async fn write(&self, tx: &mut dyn AttendanceTx) -> Result<(), StoreError> {
        for pair in &self.pairs {
            tx.append_operation_log(&pair.log).await?;
        }
        for status in [HisStatus::Before, HisStatus::After] {
            for pair in &self.pairs {
                tx.append_history(&self.entry(pair, status)).await?;
            }
        }
        Ok(())
    }
}

/// Commits on success, rolls back on failure. A failed rollback is logged and
/// the original error is returned.
pub(crate) async fn settle<T>(
    tx: Box<dyn AttendanceTx>,
    result: Result<T, AttendanceError>,
    operation: &'static str,
) -> Result<T, AttendanceError> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(AttendanceError::store(operation))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(operation, error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}

pub(crate) fn describe(snapshot: &RecordSnapshot) -> String {
    fn fmt(t: Option<NaiveDateTime>) -> String {
        t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string())
    }
    format!("in={} out={}", fmt(snapshot.in_time), fmt(snapshot.out_time))
}
