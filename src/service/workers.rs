use tracing::{info, instrument};

use super::audit::settle;
use super::{AttendanceService, now};
use crate::error::{AttendanceError, ConflictCode};
use crate::model::actor::Actor;
use crate::model::worker::{NewWorker, WorkerKey, WorkerProfileRow, WorkerProfileUpdate, WorkerRow};
use crate::store::{Stamp, StoreError};

fn stamp(actor: &Actor) -> Stamp {
    Stamp {
        actor_id: actor.user_id,
        actor_name: actor.user_name.clone(),
        at: now(),
    }
}

fn required(field: &str, value: &str) -> Result<String, AttendanceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AttendanceError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn positive(field: &str, value: i64) -> Result<(), AttendanceError> {
    if value <= 0 {
        return Err(AttendanceError::Validation(format!("{field} must be positive, got {value}")));
    }
    Ok(())
}

impl AttendanceService {
    /// Registers a worker by hand. Refused when a live identity with the same
    /// login id, name and id fragment already exists.
    #[instrument(skip_all, fields(actor = %actor.user_name, site_id = worker.site_id))]
    pub async fn add_worker(&self, actor: &Actor, worker: NewWorker) -> Result<WorkerKey, AttendanceError> {
        const OP: &str = "add_worker";
        positive("site_id", worker.site_id)?;
        positive("project_id", worker.project_id)?;
        let login_id = required("login_id", &worker.login_id)?;
        let name = required("name", &worker.name)?;

        let (id_fragment_enc, id_fragment_index) = self
            .cipher()
            .seal_optional(worker.id_fragment.as_deref())
            .map_err(|e| AttendanceError::store(OP)(StoreError::from(e)))?;
        let worker_key = self
            .store()
            .mint_worker_key()
            .await
            .map_err(AttendanceError::store(OP))?
            .filter(|k| !k.trim().is_empty())
            .map(WorkerKey::from)
            .ok_or_else(|| AttendanceError::store(OP)(StoreError::KeyUnavailable))?;

        let row = WorkerRow {
            worker_key: worker_key.clone(),
            site_id: worker.site_id,
            project_id: worker.project_id,
            login_id,
            name,
            department: worker.department,
            job_role: worker.job_role,
            phone: worker.phone.map(|p| p.replace('-', "")),
            is_retired: worker.is_retired,
            id_fragment_enc,
            id_fragment_index,
        };

        let stamp = stamp(actor);
        let mut tx = self.begin(OP).await?;
        let result = match tx.insert_worker(&row, &stamp).await {
            Ok(0) => Err(AttendanceError::conflict(
                ConflictCode::DuplicateIdentity,
                format!("worker {} ({}) is already registered", row.name, row.login_id),
            )),
            Ok(_) => Ok(worker_key),
            Err(StoreError::Duplicate(detail)) => Err(AttendanceError::conflict(ConflictCode::DuplicateIdentity, detail)),
            Err(e) => Err(AttendanceError::store(OP)(e)),
        };
        let key = settle(tx, result, OP).await?;
        info!(worker_key = %key, "worker added");
        Ok(key)
    }

    /// Updates the profile and marks it as curated, so device imports no
    /// longer overwrite it.
    #[instrument(skip_all, fields(actor = %actor.user_name, worker_key = %worker_key))]
    pub async fn modify_worker(
        &self,
        actor: &Actor,
        worker_key: &WorkerKey,
        update: WorkerProfileUpdate,
    ) -> Result<(), AttendanceError> {
        const OP: &str = "modify_worker";
        positive("site_id", update.site_id)?;
        if worker_key.is_blank() {
            return Err(AttendanceError::Validation("worker_key is required".to_string()));
        }
        let name = required("name", &update.name)?;

        let (id_fragment_enc, id_fragment_index) = self
            .cipher()
            .seal_optional(update.id_fragment.as_deref())
            .map_err(|e| AttendanceError::store(OP)(StoreError::from(e)))?;
        let profile = WorkerProfileRow {
            worker_key: worker_key.clone(),
            site_id: update.site_id,
            name,
            department: update.department,
            job_role: update.job_role,
            phone: update.phone.map(|p| p.replace('-', "")),
            is_retired: update.is_retired,
            retired_on: if update.is_retired { update.retired_on } else { None },
            id_fragment_enc,
            id_fragment_index,
        };

        let stamp = stamp(actor);
        let mut tx = self.begin(OP).await?;
        let result = match tx.update_worker_profile(&profile, &stamp).await {
            Ok(0) => Err(AttendanceError::conflict(
                ConflictCode::NoMatchingRecord,
                format!("no worker {worker_key} at site {}", profile.site_id),
            )),
            Ok(_) => Ok(()),
            Err(e) => Err(AttendanceError::store(OP)(e)),
        };
        settle(tx, result, OP).await
    }

    /// Soft delete; daily records keep pointing at the key.
    #[instrument(skip_all, fields(actor = %actor.user_name, worker_key = %worker_key))]
    pub async fn remove_worker(&self, actor: &Actor, site_id: i64, worker_key: &WorkerKey) -> Result<(), AttendanceError> {
        const OP: &str = "remove_worker";
        positive("site_id", site_id)?;

        let stamp = stamp(actor);
        let mut tx = self.begin(OP).await?;
        let result = match tx.soft_delete_worker(site_id, worker_key, &stamp).await {
            Ok(0) => Err(AttendanceError::conflict(
                ConflictCode::NoMatchingRecord,
                format!("no live worker {worker_key} at site {site_id}"),
            )),
            Ok(_) => Ok(()),
            Err(e) => Err(AttendanceError::store(OP)(e)),
        };
        settle(tx, result, OP).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::{admin, service};

    fn new_worker() -> NewWorker {
        NewWorker {
            site_id: 1,
            project_id: 10,
            login_id: "01012345678".to_string(),
            name: "Hong".to_string(),
            department: Some("Alpha Construction".to_string()),
            job_role: None,
            phone: Some("010-1234-5678".to_string()),
            is_retired: false,
            id_fragment: Some("900101".to_string()),
        }
    }

    #[actix_web::test]
    async fn add_worker_encrypts_fragment_and_rejects_duplicates() {
        let (service, store) = service();
        let key = service.add_worker(&admin(), new_worker()).await.unwrap();

        let workers = store.workers();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].worker_key, key);
        assert_eq!(workers[0].phone.as_deref(), Some("01012345678"));
        let enc = workers[0].id_fragment_enc.clone().unwrap();
        assert_ne!(enc, "900101");
        assert_eq!(service.cipher().decode(&enc).unwrap(), "900101");

        let err = service.add_worker(&admin(), new_worker()).await.unwrap_err();
        assert_eq!(err.conflict_code(), Some(ConflictCode::DuplicateIdentity));
        assert_eq!(store.workers().len(), 1);
    }

    #[actix_web::test]
    async fn removed_workers_can_be_registered_again() {
        let (service, store) = service();
        let first = service.add_worker(&admin(), new_worker()).await.unwrap();
        service.remove_worker(&admin(), 1, &first).await.unwrap();

        let second = service.add_worker(&admin(), new_worker()).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.workers().iter().filter(|w| !w.is_deleted).count(), 1);

        let err = service.remove_worker(&admin(), 1, &first).await.unwrap_err();
        assert_eq!(err.conflict_code(), Some(ConflictCode::NoMatchingRecord));
    }

    #[actix_web::test]
    async fn modify_worker_curates_profile() {
        let (service, store) = service();
        let key = service.add_worker(&admin(), new_worker()).await.unwrap();
        let update = WorkerProfileUpdate {
            site_id: 1,
            name: "Hong Gildong".to_string(),
            department: None,
            job_role: Some("rebar".to_string()),
            phone: None,
            is_retired: true,
            retired_on: chrono::NaiveDate::from_ymd_opt(2025, 3, 31),
            id_fragment: None,
        };
        service.modify_worker(&admin(), &key, update).await.unwrap();

        let worker = &store.workers()[0];
        assert_eq!(worker.name, "Hong Gildong");
        assert!(worker.is_retired);
        assert!(!worker.device_editable);
        assert_eq!(worker.id_fragment_index, None);
    }

    #[actix_web::test]
    async fn modify_unknown_worker_is_a_conflict() {
        let (service, _store) = service();
        let update = WorkerProfileUpdate {
            site_id: 1,
            name: "Nobody".to_string(),
            department: None,
            job_role: None,
            phone: None,
            is_retired: false,
            retired_on: None,
            id_fragment: None,
        };
        let err = service.modify_worker(&admin(), &"missing".into(), update).await.unwrap_err();
        assert_eq!(err.conflict_code(), Some(ConflictCode::NoMatchingRecord));
    }

    #[actix_web::test]
    async fn blank_name_is_rejected() {
        let (service, store) = service();
        let mut worker = new_worker();
        worker.name = "  ".to_string();
        let err = service.add_worker(&admin(), worker).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(_)));
        assert!(store.workers().is_empty());
    }
}
