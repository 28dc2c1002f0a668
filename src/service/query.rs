use tracing::instrument;

use super::AttendanceService;
use crate::error::AttendanceError;
use crate::model::actor::Actor;
use crate::model::attendance::{DailyAttendanceRecord, DeadlineState};
use crate::model::history::HistoryEntry;
use crate::model::worker::WorkerKey;
use crate::store::filter::{DailyRecordParams, HistoryParams};
use crate::store::{DailyRecordFilter, HistoryQuery, ProjectScope};

fn parse_deadline(value: Option<&str>) -> Result<Option<DeadlineState>, AttendanceError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some("open") => Ok(Some(DeadlineState::Open)),
        Some("closed") => Ok(Some(DeadlineState::Closed)),
        Some(other) => Err(AttendanceError::Validation(format!(
            "deadline must be 'open' or 'closed', got '{other}'"
        ))),
    }
}

impl AttendanceService {
    #[instrument(skip_all, fields(actor = %actor.user_name))]
    pub async fn list_daily_records(
        &self,
        actor: &Actor,
        params: DailyRecordParams,
    ) -> Result<Vec<DailyAttendanceRecord>, AttendanceError> {
        if let (Some(from), Some(to)) = (params.from, params.to) {
            if from > to {
                return Err(AttendanceError::Validation(format!("from {from} is after to {to}")));
            }
        }
        let filter = DailyRecordFilter {
            site_id: params.site_id,
            project_id: params.project_id,
            worker_keys: Vec::new(),
            from: params.from,
            to: params.to,
            deadline: parse_deadline(params.deadline.as_deref())?,
            scope: ProjectScope::for_actor(actor),
        };
        self.store()
            .list_daily_records(&filter)
            .await
            .map_err(AttendanceError::store("list_daily_records"))
    }

    /// Ledger rows in the range, newest first, BEFORE ahead of AFTER.
    #[instrument(skip_all, fields(actor = %actor.user_name, site_id = params.site_id))]
    pub async fn list_history(&self, actor: &Actor, params: HistoryParams) -> Result<Vec<HistoryEntry>, AttendanceError> {
        if params.site_id <= 0 {
            return Err(AttendanceError::Validation("site_id must be positive".to_string()));
        }
        if params.from > params.to {
            return Err(AttendanceError::Validation(format!(
                "from {} is after to {}",
                params.from, params.to
            )));
        }
        let worker_keys = params
            .worker_keys
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(WorkerKey::from)
            .collect();
        let query = HistoryQuery {
            site_id: params.site_id,
            from: params.from,
            to: params.to,
            worker_keys,
            scope: ProjectScope::for_actor(actor),
        };
        self.store()
            .list_history(&query)
            .await
            .map_err(AttendanceError::store("list_history"))
    }

    /// `Ok(None)` when the entry does not exist, lies outside the actor's
    /// projects or carries no reason.
    pub async fn history_reason(&self, actor: &Actor, entry_id: i64) -> Result<Option<String>, AttendanceError> {
        self.store()
            .history_reason(entry_id, &ProjectScope::for_actor(actor))
            .await
            .map_err(AttendanceError::store("history_reason"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::command::{MergeRecordInput, RecordSelection};
    use crate::model::history::HisStatus;
    use crate::model::role::Role;
    use crate::service::testing::{admin, at, date, key, record, service};

    fn params(from: chrono::NaiveDate, to: chrono::NaiveDate) -> HistoryParams {
        HistoryParams {
            site_id: 1,
            from,
            to,
            worker_keys: None,
        }
    }

    #[actix_web::test]
    async fn daily_records_respect_project_scope() {
        let (service, store) = service();
        let day = date(2025, 3, 1);
        store.seed_record(record(day, Some(at(day, 8, 0, 0)), None));
        let mut elsewhere = record(day, Some(at(day, 8, 0, 0)), None);
        elsewhere.key.project_id = 20;
        store.seed_record(elsewhere);

        let all = service.list_daily_records(&admin(), DailyRecordParams::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let manager = Actor::new(2, "lee", Role::SiteManager).with_projects(vec![20]);
        let scoped = service.list_daily_records(&manager, DailyRecordParams::default()).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].key.project_id, 20);

        let viewer = Actor::new(3, "park", Role::Viewer);
        assert!(service.list_daily_records(&viewer, DailyRecordParams::default()).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn bad_deadline_filter_is_rejected() {
        let (service, _store) = service();
        let params = DailyRecordParams {
            deadline: Some("maybe".to_string()),
            ..Default::default()
        };
        let err = service.list_daily_records(&admin(), params).await.unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(_)));
    }

    #[actix_web::test]
    async fn history_pairs_removal_after_rows_with_their_before() {
        let (service, store) = service();
        let day = date(2025, 3, 1);
        store.seed_record(record(day, Some(at(day, 8, 0, 0)), None));
        let removal = RecordSelection {
            records: vec![key(day)],
            reason: Some("wrong worker".to_string()),
        };
        service.remove_records(&admin(), removal).await.unwrap();

        let rows = service.list_history(&admin(), params(day, day)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, HisStatus::Before);
        assert_eq!(rows[1].status, HisStatus::After);
        assert_eq!(rows[1].snapshot.site_id, None);

        let reason = service.history_reason(&admin(), rows[1].entry_id).await.unwrap();
        assert_eq!(reason.as_deref(), Some("wrong worker"));
    }

    #[actix_web::test]
    async fn history_is_newest_first_and_filtered_by_worker() {
        let (service, _store) = service();
        let day = date(2025, 3, 1);
        let input = |worker: &str, hour| MergeRecordInput {
            key: crate::model::attendance::RecordKey::new(1, 10, worker, day),
            in_time: Some(at(day, hour, 0, 0)),
            out_time: None,
            is_overtime: false,
            close_deadline: false,
            reason: None,
        };
        service.merge_daily_records(&admin(), vec![input("abc", 8)]).await.unwrap();
        service.merge_daily_records(&admin(), vec![input("def", 9)]).await.unwrap();

        let rows = service.list_history(&admin(), params(day, day)).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows.windows(2).all(|w| w[0].registered_at >= w[1].registered_at));

        let only_def = HistoryParams {
            worker_keys: Some(" def , ".to_string()),
            ..params(day, day)
        };
        let rows = service.list_history(&admin(), only_def).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.snapshot.worker_key == Some("def".into())));
    }

    #[actix_web::test]
    async fn history_outside_the_actor_projects_stays_hidden() {
        let (service, store) = service();
        let day = date(2025, 3, 1);
        let elsewhere = crate::model::attendance::RecordKey::new(1, 20, "def", day);
        store.seed_record(record(day, Some(at(day, 8, 0, 0)), None));
        let mut other = record(day, Some(at(day, 9, 0, 0)), None);
        other.key = elsewhere.clone();
        store.seed_record(other);

        let change = crate::model::command::ProjectChangeInput {
            key: key(day),
            to_project_id: 20,
            reason: Some("crew moved".to_string()),
        };
        service.modify_project(&admin(), vec![change]).await.unwrap();
        let removal = RecordSelection {
            records: vec![elsewhere],
            reason: Some("duplicate".to_string()),
        };
        service.remove_records(&admin(), removal).await.unwrap();

        let manager = Actor::new(2, "lee", Role::SiteManager).with_projects(vec![10]);
        let rows = service.list_history(&manager, params(day, day)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].snapshot.project_id, Some(10));
        assert_eq!(
            service.history_reason(&manager, rows[0].entry_id).await.unwrap().as_deref(),
            Some("crew moved")
        );

        let all = service.list_history(&admin(), params(day, day)).await.unwrap();
        assert_eq!(all.len(), 4);
        let removal_after = all
            .iter()
            .find(|r| r.status == HisStatus::After && r.snapshot.project_id.is_none())
            .unwrap();
        assert_eq!(service.history_reason(&manager, removal_after.entry_id).await.unwrap(), None);
        assert_eq!(
            service.history_reason(&admin(), removal_after.entry_id).await.unwrap().as_deref(),
            Some("duplicate")
        );
    }

    #[actix_web::test]
    async fn unknown_entry_has_no_reason() {
        let (service, _store) = service();
        assert_eq!(service.history_reason(&admin(), 404).await.unwrap(), None);
    }

    #[actix_web::test]
    async fn inverted_history_range_is_rejected() {
        let (service, _store) = service();
        let err = service
            .list_history(&admin(), params(date(2025, 3, 2), date(2025, 3, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AttendanceError::Validation(_)));
    }
}
