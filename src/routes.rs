use crate::{
    api::{attendance, worker},
    auth::middleware::auth_middleware,
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};

fn build_limiter(requests_per_min: u32) -> Option<Governor<PeerIpKeyExtractor, NoOpMiddleware>> {
    let per_ms = if requests_per_min == 0 {
        1
    } else {
        60_000 / requests_per_min as u64
    };
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms.max(1))
        .burst_size(requests_per_min.max(1))
        .key_extractor(PeerIpKeyExtractor)
        .finish()?;
    Some(Governor::new(&cfg))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config) {
    let Some(protected_limiter) = build_limiter(config.rate_protected_per_min) else {
        tracing::error!(
            rate = config.rate_protected_per_min,
            "invalid rate limit, protected routes not mounted"
        );
        return;
    };

    // Protected routes
    cfg.service(
        web::scope(&format!("{}/v1", config.api_prefix))
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(
                web::scope("/attendance")
                    // /attendance/records
                    .service(web::resource("/records").route(web::get().to(attendance::list_records)))
                    .service(
                        web::resource("/records/merge")
                            .route(web::post().to(attendance::merge_records)),
                    )
                    .service(
                        web::resource("/records/deadline")
                            .route(web::put().to(attendance::close_deadline)),
                    )
                    .service(
                        web::resource("/records/deadline/cancel")
                            .route(web::put().to(attendance::cancel_deadline)),
                    )
                    .service(
                        web::resource("/records/project")
                            .route(web::put().to(attendance::change_project)),
                    )
                    .service(
                        web::resource("/records/work-hours")
                            .route(web::put().to(attendance::change_work_hours)),
                    )
                    .service(
                        web::resource("/records/compare")
                            .route(web::put().to(attendance::apply_compare)),
                    )
                    .service(
                        web::resource("/records/remove")
                            .route(web::post().to(attendance::remove_records)),
                    )
                    // /attendance/history
                    .service(web::resource("/history").route(web::get().to(attendance::list_history)))
                    .service(
                        web::resource("/history/{id}/reason")
                            .route(web::get().to(attendance::history_reason)),
                    ),
            )
            .service(
                web::scope("/workers")
                    // /workers
                    .service(web::resource("").route(web::post().to(worker::create_worker)))
                    // /workers/{key}
                    .service(
                        web::resource("/{key}")
                            .route(web::put().to(worker::update_worker))
                            .route(web::delete().to(worker::delete_worker)),
                    ),
            ),
    );
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::{App, test};

    use super::*;
    use crate::api::testing::{bearer, config};
    use crate::service::testing::service;

    #[actix_web::test]
    async fn protected_scope_requires_a_token() {
        let (service, _store) = service();
        let config = config();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(config.clone()))
                .app_data(web::Data::new(service))
                .configure(|cfg| configure(cfg, &config)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/api/v1/attendance/records")
            .peer_addr("127.0.0.1:5000".parse().unwrap())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/v1/attendance/history/7/reason")
            .peer_addr("127.0.0.1:5000".parse().unwrap())
            .insert_header(("Authorization", bearer(3, vec![])))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}
