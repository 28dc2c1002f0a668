use std::time::Duration;

use actix_web::rt;
use tracing::{error, info};

use crate::config::Config;
use crate::service::{AttendanceService, now};

/// Runs the device import, then overnight reconciliation and the auto-deadline
/// sweep, on their own intervals. Failures are logged and retried on the next tick.
pub fn spawn(service: AttendanceService, config: &Config) {
    let import_every = Duration::from_secs(config.import_interval_secs.max(1));
    let reconcile_every = Duration::from_secs(config.reconcile_interval_secs.max(1));
    let batch_size = config.import_batch_size.max(1);

    let importer = service.clone();
    rt::spawn(async move {
        let mut ticker = rt::time::interval(import_every);
        loop {
            ticker.tick().await;
            run_import(&importer, batch_size).await;
        }
    });

    rt::spawn(async move {
        let mut ticker = rt::time::interval(reconcile_every);
        loop {
            ticker.tick().await;
            run_reconcile(&service).await;
        }
    });

    info!(?import_every, ?reconcile_every, "scheduler started");
}

async fn run_import(service: &AttendanceService, batch_size: usize) {
    match service.import_device_events(batch_size, now()).await {
        Ok(report) => info!(?report, "device import pass finished"),
        Err(e) => error!(error = %e, "device import pass failed"),
    }
}

async fn run_reconcile(service: &AttendanceService) {
    let at = now();
    match service.reconcile_overnight(at).await {
        Ok(merged) => info!(merged, "overnight pass finished"),
        Err(e) => error!(error = %e, "overnight pass failed"),
    }
    match service.close_expired_records(at).await {
        Ok(closed) => info!(closed, "deadline sweep finished"),
        Err(e) => error!(error = %e, "deadline sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attendance::CompareState;
    use crate::service::testing::{record, service};

    #[actix_web::test]
    async fn reconcile_tick_survives_store_failures() {
        let (service, store) = service();
        store.fail_on("find_overtime_candidates", 0);
        let yesterday = now().date() - chrono::Duration::days(1);
        let mut done = record(
            yesterday,
            Some(yesterday.and_hms_opt(8, 0, 0).unwrap()),
            Some(yesterday.and_hms_opt(17, 0, 0).unwrap()),
        );
        done.compare_state = Some(CompareState::Settled);
        store.seed_record(done);

        run_reconcile(&service).await;

        assert!(store.records()[0].is_closed());
    }
}
