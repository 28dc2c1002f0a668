use crate::auth::auth::AuthUser;
use crate::model::worker::{NewWorker, WorkerKey, WorkerProfileUpdate};
use crate::service::AttendanceService;
use actix_web::{HttpResponse, Responder, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

#[derive(Serialize, ToSchema)]
pub struct WorkerCreated {
    #[schema(example = "8f14e45fceea167a5a36dedd4bea2543")]
    pub worker_key: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SiteQuery {
    /// Site the worker is registered at
    pub site_id: i64,
}

/// Register a worker
#[utoipa::path(
    post,
    path = "/api/v1/workers",
    request_body = NewWorker,
    responses(
        (status = 200, description = "Worker registered", body = WorkerCreated),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Identity already registered", body = Object, example = json!({
            "code": "duplicate_identity",
            "message": "worker Hong Gildong (01012345678) is already registered"
        })),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Worker"
)]
pub async fn create_worker(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<NewWorker>,
) -> actix_web::Result<impl Responder> {
    auth.require_mutator()?;
    let key = service.add_worker(&auth.actor(), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(WorkerCreated {
        worker_key: key.into(),
    }))
}

/// Update a worker profile
#[utoipa::path(
    put,
    path = "/api/v1/workers/{key}",
    params(
        ("key" = String, Path, description = "Worker key")
    ),
    request_body = WorkerProfileUpdate,
    responses(
        (status = 200, description = "Profile updated", body = Object, example = json!({
            "message": "Worker updated successfully"
        })),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Worker not found"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Worker"
)]
pub async fn update_worker(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
    payload: web::Json<WorkerProfileUpdate>,
) -> actix_web::Result<impl Responder> {
    auth.require_mutator()?;
    let key = WorkerKey::from(path.into_inner());
    service
        .modify_worker(&auth.actor(), &key, payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Worker updated successfully" })))
}

/// Soft delete a worker
#[utoipa::path(
    delete,
    path = "/api/v1/workers/{key}",
    params(
        ("key" = String, Path, description = "Worker key"),
        SiteQuery
    ),
    responses(
        (status = 200, description = "Worker removed", body = Object, example = json!({
            "message": "Worker removed successfully"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Worker not found"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Worker"
)]
pub async fn delete_worker(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
    query: web::Query<SiteQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_mutator()?;
    let key = WorkerKey::from(path.into_inner());
    service
        .remove_worker(&auth.actor(), query.site_id, &key)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Worker removed successfully" })))
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use serde_json::Value;

    use super::*;
    use crate::api::testing::{bearer, config};
    use crate::service::testing::service;

    #[actix_web::test]
    async fn register_update_and_remove() {
        let (service, store) = service();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config()))
                .app_data(web::Data::new(service))
                .route("/workers", web::post().to(create_worker))
                .route("/workers/{key}", web::put().to(update_worker))
                .route("/workers/{key}", web::delete().to(delete_worker)),
        )
        .await;
        let token = bearer(1, vec![]);
        let worker = json!({
            "site_id": 1,
            "project_id": 10,
            "login_id": "01012345678",
            "name": "Hong",
            "id_fragment": "900101"
        });

        let req = test::TestRequest::post()
            .uri("/workers")
            .insert_header(("Authorization", token.clone()))
            .set_json(&worker)
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let key = body["worker_key"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri("/workers")
            .insert_header(("Authorization", token.clone()))
            .set_json(&worker)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::put()
            .uri(&format!("/workers/{key}"))
            .insert_header(("Authorization", token.clone()))
            .set_json(json!({ "site_id": 1, "name": "Hong Gildong" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(store.workers()[0].name, "Hong Gildong");

        let req = test::TestRequest::delete()
            .uri(&format!("/workers/{key}?site_id=1"))
            .insert_header(("Authorization", token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert!(store.workers()[0].is_deleted);
    }
}
