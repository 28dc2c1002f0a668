use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One physical punch captured by an iris device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRawEvent {
    pub event_id: i64,
    pub device_id: Option<i64>,
    pub site_id: i64,
    pub project_id: i64,
    pub login_id: String,
    pub name: String,
    pub department: Option<String>,
    pub job_role: Option<String>,
    /// Encrypted id fragment as the device pipeline stored it.
    pub id_fragment_enc: Option<String>,
    pub recognized_at: Option<NaiveDateTime>,
    pub identity_matched: bool,
    pub daily_matched: bool,
}
