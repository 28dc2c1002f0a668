use crate::auth::auth::AuthUser;
use crate::model::attendance::DailyAttendanceRecord;
use crate::model::command::{
    CompareStateInput, MergeRecordInput, ProjectChangeInput, RecordSelection, WorkHoursInput,
};
use crate::model::history::HistoryEntry;
use crate::service::AttendanceService;
use crate::store::filter::{DailyRecordParams, HistoryParams};
use actix_web::{HttpResponse, Responder, web};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct AffectedResponse {
    #[schema(example = 3)]
    pub affected: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ReasonResponse {
    #[schema(example = 42)]
    pub entry_id: i64,
    #[schema(example = "forgot to tag out")]
    pub reason: Option<String>,
}

fn affected(affected: usize) -> HttpResponse {
    HttpResponse::Ok().json(AffectedResponse { affected })
}

/// List daily attendance records
#[utoipa::path(
    get,
    path = "/api/v1/attendance/records",
    params(DailyRecordParams),
    responses(
        (status = 200, description = "Records visible to the caller", body = [DailyAttendanceRecord]),
        (status = 400, description = "Invalid filter"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn list_records(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<DailyRecordParams>,
) -> actix_web::Result<impl Responder> {
    let records = service
        .list_daily_records(&auth.actor(), query.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(records))
}

/// Create or edit daily records by hand
#[utoipa::path(
    post,
    path = "/api/v1/attendance/records/merge",
    request_body = [MergeRecordInput],
    responses(
        (status = 200, description = "Records merged", body = AffectedResponse),
        (status = 400, description = "Invalid batch"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Record is closed", body = Object, example = json!({
            "code": "deadline_closed",
            "message": "record for abc on 2025-03-01 is closed"
        })),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn merge_records(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<Vec<MergeRecordInput>>,
) -> actix_web::Result<impl Responder> {
    auth.require_mutator()?;
    let n = service
        .merge_daily_records(&auth.actor(), payload.into_inner())
        .await?;
    Ok(affected(n))
}

/// Close the deadline on records
#[utoipa::path(
    put,
    path = "/api/v1/attendance/records/deadline",
    request_body = RecordSelection,
    responses(
        (status = 200, description = "Records closed", body = AffectedResponse),
        (status = 400, description = "Invalid batch"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Record not found"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn close_deadline(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<RecordSelection>,
) -> actix_web::Result<impl Responder> {
    auth.require_mutator()?;
    let n = service
        .close_deadlines(&auth.actor(), payload.into_inner())
        .await?;
    Ok(affected(n))
}

/// Reopen closed records
#[utoipa::path(
    put,
    path = "/api/v1/attendance/records/deadline/cancel",
    request_body = RecordSelection,
    responses(
        (status = 200, description = "Records reopened", body = AffectedResponse),
        (status = 400, description = "Invalid batch"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Record not found"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn cancel_deadline(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<RecordSelection>,
) -> actix_web::Result<impl Responder> {
    auth.require_mutator()?;
    let n = service
        .cancel_deadlines(&auth.actor(), payload.into_inner())
        .await?;
    Ok(affected(n))
}

/// Move records to another project
#[utoipa::path(
    put,
    path = "/api/v1/attendance/records/project",
    request_body = [ProjectChangeInput],
    responses(
        (status = 200, description = "Records moved", body = AffectedResponse),
        (status = 400, description = "Invalid batch"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Target record already exists"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn change_project(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<Vec<ProjectChangeInput>>,
) -> actix_web::Result<impl Responder> {
    auth.require_mutator()?;
    let n = service
        .modify_project(&auth.actor(), payload.into_inner())
        .await?;
    Ok(affected(n))
}

/// Override work hours
#[utoipa::path(
    put,
    path = "/api/v1/attendance/records/work-hours",
    request_body = [WorkHoursInput],
    responses(
        (status = 200, description = "Work hours updated", body = AffectedResponse),
        (status = 400, description = "Invalid batch"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Record is closed"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn change_work_hours(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<Vec<WorkHoursInput>>,
) -> actix_web::Result<impl Responder> {
    auth.require_mutator()?;
    let n = service
        .modify_work_hours(&auth.actor(), payload.into_inner())
        .await?;
    Ok(affected(n))
}

/// Mark records as settled or as exceptions
#[utoipa::path(
    put,
    path = "/api/v1/attendance/records/compare",
    request_body = CompareStateInput,
    responses(
        (status = 200, description = "Compare state applied", body = AffectedResponse),
        (status = 400, description = "Invalid batch"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Record is closed"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn apply_compare(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<CompareStateInput>,
) -> actix_web::Result<impl Responder> {
    auth.require_mutator()?;
    let n = service
        .apply_compare_state(&auth.actor(), payload.into_inner())
        .await?;
    Ok(affected(n))
}

/// Delete open records
#[utoipa::path(
    post,
    path = "/api/v1/attendance/records/remove",
    request_body = RecordSelection,
    responses(
        (status = 200, description = "Records removed", body = AffectedResponse),
        (status = 400, description = "Invalid batch"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Record is closed"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn remove_records(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<RecordSelection>,
) -> actix_web::Result<impl Responder> {
    auth.require_mutator()?;
    let n = service
        .remove_records(&auth.actor(), payload.into_inner())
        .await?;
    Ok(affected(n))
}

/// Audit history for a site and date range
#[utoipa::path(
    get,
    path = "/api/v1/attendance/history",
    params(HistoryParams),
    responses(
        (status = 200, description = "BEFORE/AFTER rows, newest first", body = [HistoryEntry]),
        (status = 400, description = "Invalid range"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "History"
)]
pub async fn list_history(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<HistoryParams>,
) -> actix_web::Result<impl Responder> {
    let rows = service.list_history(&auth.actor(), query.into_inner()).await?;
    Ok(HttpResponse::Ok().json(rows))
}

/// Reason recorded with a history entry
#[utoipa::path(
    get,
    path = "/api/v1/attendance/history/{id}/reason",
    params(
        ("id" = i64, Path, description = "History entry id")
    ),
    responses(
        (status = 200, description = "Reason, or null when none was given", body = ReasonResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "History"
)]
pub async fn history_reason(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<i64>,
) -> actix_web::Result<impl Responder> {
    let entry_id = path.into_inner();
    let reason = service.history_reason(&auth.actor(), entry_id).await?;
    Ok(HttpResponse::Ok().json(ReasonResponse { entry_id, reason }))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use serde_json::{Value, json};

    use super::*;
    use crate::api::testing::{bearer, config};
    use crate::service::testing::{at, date, record, service};

    macro_rules! app {
        ($service:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(config()))
                    .app_data(web::Data::new($service))
                    .route("/records", web::get().to(list_records))
                    .route("/records/merge", web::post().to(merge_records))
                    .route("/records/deadline", web::put().to(close_deadline))
                    .route("/history", web::get().to(list_history)),
            )
            .await
        };
    }

    fn merge_body() -> Value {
        json!([{
            "site_id": 1,
            "project_id": 10,
            "worker_key": "abc",
            "record_date": "2025-03-01",
            "in_time": "2025-03-01T08:00:00",
            "out_time": "2025-03-01T17:00:00",
            "reason": "forgot to tag"
        }])
    }

    #[actix_web::test]
    async fn viewer_cannot_merge() {
        let (service, store) = service();
        let app = app!(service);
        let req = test::TestRequest::post()
            .uri("/records/merge")
            .insert_header(("Authorization", bearer(3, vec![10])))
            .set_json(merge_body())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(store.records().is_empty());
    }

    #[actix_web::test]
    async fn manager_merges_then_closed_record_conflicts() {
        let (service, _store) = service();
        let app = app!(service);

        let req = test::TestRequest::post()
            .uri("/records/merge")
            .insert_header(("Authorization", bearer(2, vec![10])))
            .set_json(merge_body())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({ "affected": 1 }));

        let req = test::TestRequest::put()
            .uri("/records/deadline")
            .insert_header(("Authorization", bearer(2, vec![10])))
            .set_json(json!({
                "records": [{ "site_id": 1, "project_id": 10, "worker_key": "abc", "record_date": "2025-03-01" }]
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/records/merge")
            .insert_header(("Authorization", bearer(2, vec![10])))
            .set_json(merge_body())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "deadline_closed");
    }

    #[actix_web::test]
    async fn listing_is_scoped_to_assigned_projects() {
        let (service, store) = service();
        let day = date(2025, 3, 1);
        store.seed_record(record(day, Some(at(day, 8, 0, 0)), None));
        let app = app!(service);

        let req = test::TestRequest::get()
            .uri("/records?site_id=1")
            .insert_header(("Authorization", bearer(3, vec![99])))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!([]));

        let req = test::TestRequest::get()
            .uri("/records?site_id=1&deadline=open")
            .insert_header(("Authorization", bearer(3, vec![10])))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.as_array().map(Vec::len), Some(1));
    }

    #[actix_web::test]
    async fn missing_token_is_unauthorized() {
        let (service, _store) = service();
        let app = app!(service);
        let req = test::TestRequest::get().uri("/history?site_id=1&from=2025-03-01&to=2025-03-01").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }
}
