use crate::api::attendance::{AffectedResponse, ReasonResponse};
use crate::api::worker::WorkerCreated;
use crate::model::attendance::{CompareState, DailyAttendanceRecord, DeadlineState, RecordKey, WorkState};
use crate::model::command::{
    CompareStateInput, MergeRecordInput, ProjectChangeInput, RecordSelection, WorkHoursInput,
};
use crate::model::history::{HisStatus, HistoryEntry, ReasonType, RecordSnapshot};
use crate::model::worker::{NewWorker, WorkerProfileUpdate};
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Site Attendance API",
        version = "1.0.0",
        description = r#"
## Construction Site Attendance

Turns raw access-control device events into one authoritative daily record per
worker and keeps a BEFORE/AFTER audit ledger of every change.

### Key Features
- **Daily records**: list, merge, move between projects, override work hours, settle, remove
- **Deadlines**: close and reopen records; closed records are read-only
- **History**: audit rows per change, newest first, with the recorded reason
- **Workers**: register, update and remove worker identities

### Security
Every endpoint requires **JWT Bearer authentication**. Mutations need the
**Admin** or **SiteManager** role; other roles only see their assigned projects.
"#,
    ),
    paths(
        crate::api::attendance::list_records,
        crate::api::attendance::merge_records,
        crate::api::attendance::close_deadline,
        crate::api::attendance::cancel_deadline,
        crate::api::attendance::change_project,
        crate::api::attendance::change_work_hours,
        crate::api::attendance::apply_compare,
        crate::api::attendance::remove_records,
        crate::api::attendance::list_history,
        crate::api::attendance::history_reason,

        crate::api::worker::create_worker,
        crate::api::worker::update_worker,
        crate::api::worker::delete_worker
    ),
    components(
        schemas(
            RecordKey,
            DailyAttendanceRecord,
            WorkState,
            CompareState,
            DeadlineState,
            MergeRecordInput,
            RecordSelection,
            ProjectChangeInput,
            WorkHoursInput,
            CompareStateInput,
            AffectedResponse,
            HistoryEntry,
            RecordSnapshot,
            HisStatus,
            ReasonType,
            ReasonResponse,
            NewWorker,
            WorkerProfileUpdate,
            WorkerCreated
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Attendance", description = "Daily attendance record APIs"),
        (name = "History", description = "Audit ledger APIs"),
        (name = "Worker", description = "Worker identity APIs"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_every_route_with_bearer_auth() {
        let doc = ApiDoc::openapi();
        assert_eq!(doc.paths.paths.len(), 12);
        assert!(doc.paths.paths.contains_key("/api/v1/attendance/history/{id}/reason"));
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
