use std::collections::HashSet;

use tracing::instrument;

use super::audit::{AuditTrail, describe, settle};
use super::{AttendanceService, now};
use crate::error::{AttendanceError, ConflictCode};
use crate::model::actor::Actor;
use crate::model::attendance::{CompareState, DailyAttendanceRecord, DeadlineState, RecordKey};
use crate::model::command::{CompareStateInput, MergeRecordInput, ProjectChangeInput, RecordSelection, WorkHoursInput};
use crate::model::history::{ReasonType, RecordSnapshot};
use crate::store::AttendanceTx;

/// Rejects empty batches, malformed keys and keys listed twice.
pub(super) fn validate_batch<'k>(keys: impl IntoIterator<Item = &'k RecordKey>) -> Result<(), AttendanceError> {
    let mut seen = HashSet::new();
    for key in keys {
        key.validate().map_err(AttendanceError::Validation)?;
        if !seen.insert(key) {
            return Err(AttendanceError::Validation(format!(
                "record for {} on {} listed twice",
                key.worker_key, key.record_date
            )));
        }
    }
    if seen.is_empty() {
        return Err(AttendanceError::Validation("no records given".to_string()));
    }
    Ok(())
}

pub(super) fn expect_rows(affected: u64, key: &RecordKey) -> Result<(), AttendanceError> {
    if affected == 0 {
        return Err(AttendanceError::conflict(
            ConflictCode::NoMatchingRecord,
            format!("no record to mutate for {} on {}", key.worker_key, key.record_date),
        ));
    }
    Ok(())
}

fn closed(key: &RecordKey) -> AttendanceError {
    AttendanceError::conflict(
        ConflictCode::DeadlineClosed,
        format!("record for {} on {} is closed", key.worker_key, key.record_date),
    )
}

impl AttendanceService {
    pub(super) async fn current_record(
        &self,
        key: &RecordKey,
        operation: &'static str,
    ) -> Result<Option<DailyAttendanceRecord>, AttendanceError> {
        self.store()
            .find_daily_record(key)
            .await
            .map_err(AttendanceError::store(operation))
    }

    async fn existing_record(&self, key: &RecordKey, operation: &'static str) -> Result<DailyAttendanceRecord, AttendanceError> {
        self.current_record(key, operation).await?.ok_or_else(|| {
            AttendanceError::conflict(
                ConflictCode::NoMatchingRecord,
                format!("no record for {} on {}", key.worker_key, key.record_date),
            )
        })
    }

    async fn open_record(&self, key: &RecordKey, operation: &'static str) -> Result<DailyAttendanceRecord, AttendanceError> {
        let record = self.existing_record(key, operation).await?;
        if record.is_closed() {
            return Err(closed(key));
        }
        Ok(record)
    }

    pub(super) async fn begin(&self, operation: &'static str) -> Result<Box<dyn AttendanceTx>, AttendanceError> {
        self.store().begin().await.map_err(AttendanceError::store(operation))
    }

    /// Upserts manually entered records. A missing record is inserted as an
    /// exception awaiting comparison; an existing one keeps its compare state.
    #[instrument(skip_all, fields(actor = %actor.user_name, records = inputs.len()))]
    pub async fn merge_daily_records(&self, actor: &Actor, inputs: Vec<MergeRecordInput>) -> Result<usize, AttendanceError> {
        const OP: &str = "merge_daily_records";
        validate_batch(inputs.iter().map(|i| &i.key))?;
        for input in &inputs {
            if let (Some(in_time), Some(out_time)) = (input.in_time, input.out_time) {
                if out_time < in_time {
                    return Err(AttendanceError::Validation(format!(
                        "out_time precedes in_time for {} on {}",
                        input.key.worker_key, input.key.record_date
                    )));
                }
            }
        }

        let mut trail = AuditTrail::new(actor, now());
        let mut plan = Vec::with_capacity(inputs.len());
        for input in inputs {
            let existing = self.current_record(&input.key, OP).await?;
            if existing.as_ref().is_some_and(DailyAttendanceRecord::is_closed) {
                return Err(closed(&input.key));
            }

            let reason_type = match (&existing, input.close_deadline) {
                (_, true) => ReasonType::EditAndDeadline,
                (None, false) => ReasonType::Add,
                (Some(_), false) => ReasonType::Edit,
            };
            let before = existing
                .as_ref()
                .map(RecordSnapshot::from)
                .unwrap_or_else(|| RecordSnapshot::placeholder(&input.key));

            let mut record = existing.clone().unwrap_or_else(|| {
                let mut fresh = DailyAttendanceRecord::empty(input.key.clone());
                fresh.compare_state = Some(CompareState::Exception);
                fresh
            });
            record.in_time = input.in_time;
            record.out_time = input.out_time;
            record.is_overtime = input.is_overtime;
            if input.close_deadline {
                record.deadline = DeadlineState::Closed;
            }
            record.reason_type = Some(reason_type);
            record.reason = input.reason.clone();
            record.refresh_derived();

            let after = RecordSnapshot::from(&record);
            let message = format!("{}: {} -> {}", reason_type.as_ref(), describe(&before), describe(&after));
            trail.push(reason_type, input.reason, &record.key, before, after, Some(record.work_state), message);
            plan.push((existing.is_some(), record));
        }

        let stamp = trail.stamp();
        let mut tx = self.begin(OP).await?;
        let result: Result<usize, AttendanceError> = async {
            let tx = tx.as_mut();
            for (exists, record) in &plan {
                if *exists {
                    let affected = tx
                        .update_daily_record(record, &stamp)
                        .await
                        .map_err(AttendanceError::store(OP))?;
                    expect_rows(affected, &record.key)?;
                } else {
                    tx.insert_daily_record(record, &stamp)
                        .await
                        .map_err(AttendanceError::store(OP))?;
                }
            }
            trail.write(tx).await.map_err(AttendanceError::store(OP))?;
            Ok(plan.len())
        }
        .await;
        settle(tx, result, OP).await
    }

    /// Moves records to another project. Allowed on closed records. The
    /// worker's site default follows when it still points at the old project.
    #[instrument(skip_all, fields(actor = %actor.user_name, records = changes.len()))]
    pub async fn modify_project(&self, actor: &Actor, changes: Vec<ProjectChangeInput>) -> Result<usize, AttendanceError> {
        const OP: &str = "modify_project";
        validate_batch(changes.iter().map(|c| &c.key))?;
        for change in &changes {
            if change.to_project_id <= 0 {
                return Err(AttendanceError::Validation(format!(
                    "to_project_id must be positive, got {}",
                    change.to_project_id
                )));
            }
            if change.to_project_id == change.key.project_id {
                return Err(AttendanceError::Validation(format!(
                    "record for {} on {} is already in project {}",
                    change.key.worker_key, change.key.record_date, change.to_project_id
                )));
            }
        }

        let mut trail = AuditTrail::new(actor, now());
        for change in &changes {
            let existing = self.existing_record(&change.key, OP).await?;
            let mut moved = existing.clone();
            moved.key.project_id = change.to_project_id;
            let message = format!(
                "{}: project {} -> {}",
                ReasonType::ProjectChange.as_ref(),
                change.key.project_id,
                change.to_project_id
            );
            trail.push(
                ReasonType::ProjectChange,
                change.reason.clone(),
                &moved.key,
                RecordSnapshot::from(&existing),
                RecordSnapshot::from(&moved),
                Some(moved.work_state),
                message,
            );
        }

        let stamp = trail.stamp();
        let mut tx = self.begin(OP).await?;
        let result: Result<usize, AttendanceError> = async {
            let tx = tx.as_mut();
            for change in &changes {
                let key = &change.key;
                let affected = tx
                    .update_record_project(key, change.to_project_id, &stamp)
                    .await
                    .map_err(AttendanceError::store(OP))?;
                expect_rows(affected, key)?;
                tx.update_worker_default_project(key.site_id, &key.worker_key, key.project_id, change.to_project_id, &stamp)
                    .await
                    .map_err(AttendanceError::store(OP))?;
            }
            trail.write(tx).await.map_err(AttendanceError::store(OP))?;
            Ok(changes.len())
        }
        .await;
        settle(tx, result, OP).await
    }

    /// Overwrites work hours on open records, bypassing the derived value.
    #[instrument(skip_all, fields(actor = %actor.user_name, records = edits.len()))]
    pub async fn modify_work_hours(&self, actor: &Actor, edits: Vec<WorkHoursInput>) -> Result<usize, AttendanceError> {
        const OP: &str = "modify_work_hours";
        validate_batch(edits.iter().map(|e| &e.key))?;
        if let Some(bad) = edits.iter().find(|e| !(0.0..=24.0).contains(&e.work_hours)) {
            return Err(AttendanceError::Validation(format!(
                "work_hours must be within 0..=24, got {}",
                bad.work_hours
            )));
        }

        let mut trail = AuditTrail::new(actor, now());
        for edit in &edits {
            let existing = self.open_record(&edit.key, OP).await?;
            let mut edited = existing.clone();
            edited.work_hours = Some(edit.work_hours);
            let message = format!(
                "{}: hours {:?} -> {}",
                ReasonType::BulkHours.as_ref(),
                existing.work_hours,
                edit.work_hours
            );
            trail.push(
                ReasonType::BulkHours,
                edit.reason.clone(),
                &edit.key,
                RecordSnapshot::from(&existing),
                RecordSnapshot::from(&edited),
                Some(edited.work_state),
                message,
            );
        }

        let stamp = trail.stamp();
        let mut tx = self.begin(OP).await?;
        let result: Result<usize, AttendanceError> = async {
            let tx = tx.as_mut();
            for edit in &edits {
                let affected = tx
                    .update_work_hours(&edit.key, edit.work_hours, &stamp)
                    .await
                    .map_err(AttendanceError::store(OP))?;
                expect_rows(affected, &edit.key)?;
            }
            trail.write(tx).await.map_err(AttendanceError::store(OP))?;
            Ok(edits.len())
        }
        .await;
        settle(tx, result, OP).await
    }

    #[instrument(skip_all, fields(actor = %actor.user_name, records = input.records.len()))]
    pub async fn apply_compare_state(&self, actor: &Actor, input: CompareStateInput) -> Result<usize, AttendanceError> {
        const OP: &str = "apply_compare_state";
        validate_batch(&input.records)?;

        let mut trail = AuditTrail::new(actor, now());
        for key in &input.records {
            let existing = self.open_record(key, OP).await?;
            let mut compared = existing.clone();
            compared.compare_state = Some(input.compare_state);
            let message = format!("{}: compare {}", ReasonType::Edit.as_ref(), input.compare_state.as_ref());
            trail.push(
                ReasonType::Edit,
                input.reason.clone(),
                key,
                RecordSnapshot::from(&existing),
                RecordSnapshot::from(&compared),
                Some(compared.work_state),
                message,
            );
        }

        let stamp = trail.stamp();
        let mut tx = self.begin(OP).await?;
        let result: Result<usize, AttendanceError> = async {
            let tx = tx.as_mut();
            for key in &input.records {
                let affected = tx
                    .update_compare_state(key, input.compare_state, &stamp)
                    .await
                    .map_err(AttendanceError::store(OP))?;
                expect_rows(affected, key)?;
            }
            trail.write(tx).await.map_err(AttendanceError::store(OP))?;
            Ok(input.records.len())
        }
        .await;
        settle(tx, result, OP).await
    }

    /// Hard-deletes open records. The AFTER row keeps only the worker key.
    #[instrument(skip_all, fields(actor = %actor.user_name, records = selection.records.len()))]
    pub async fn remove_records(&self, actor: &Actor, selection: RecordSelection) -> Result<usize, AttendanceError> {
        const OP: &str = "remove_records";
        validate_batch(&selection.records)?;

        let mut trail = AuditTrail::new(actor, now());
        for key in &selection.records {
            let existing = self.open_record(key, OP).await?;
            let before = RecordSnapshot::from(&existing);
            let message = format!("{}: {}", ReasonType::Delete.as_ref(), describe(&before));
            trail.push(
                ReasonType::Delete,
                selection.reason.clone(),
                key,
                before,
                RecordSnapshot::removed(&key.worker_key),
                None,
                message,
            );
        }

        let mut tx = self.begin(OP).await?;
        let result: Result<usize, AttendanceError> = async {
            let tx = tx.as_mut();
            for key in &selection.records {
                let affected = tx.delete_open_record(key).await.map_err(AttendanceError::store(OP))?;
                expect_rows(affected, key)?;
            }
            trail.write(tx).await.map_err(AttendanceError::store(OP))?;
            Ok(selection.records.len())
        }
        .await;
        settle(tx, result, OP).await
    }
}
