use chrono::{NaiveDate, NaiveDateTime};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Opaque, stable worker identifier. Minted once and reused across devices
/// and sites.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into, Serialize, Deserialize,
    ToSchema,
)]
#[serde(transparent)]
pub struct WorkerKey(String);

impl WorkerKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for WorkerKey {
    fn from(value: &str) -> Self {
        WorkerKey(value.to_string())
    }
}

/// A worker registered at one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkerIdentity {
    pub worker_key: WorkerKey,
    pub site_id: i64,
    /// Default project for the worker at this site.
    pub project_id: i64,
    pub login_id: String,
    pub name: String,
    pub department: Option<String>,
    pub job_role: Option<String>,
    pub phone: Option<String>,
    pub is_retired: bool,
    pub retired_on: Option<NaiveDate>,
    /// `base64(nonce || ciphertext)` of the national-id fragment.
    #[serde(skip_serializing)]
    pub id_fragment_enc: Option<String>,
    /// Deterministic HMAC of the plaintext fragment, used for lookups.
    #[serde(skip_serializing)]
    pub id_fragment_index: Option<String>,
    /// Once a person edits the profile, device imports stop overwriting it.
    pub device_editable: bool,
    pub is_deleted: bool,
    pub registered_at: NaiveDateTime,
}

/// The dedup key for identity resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityLookup {
    pub login_id: String,
    pub name: String,
    pub id_fragment_index: Option<String>,
}

/// Manual registration payload.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewWorker {
    pub site_id: i64,
    pub project_id: i64,
    #[schema(example = "01012345678")]
    pub login_id: String,
    #[schema(example = "Hong Gildong")]
    pub name: String,
    pub department: Option<String>,
    pub job_role: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub is_retired: bool,
    /// Plaintext id fragment; encrypted before it is stored.
    pub id_fragment: Option<String>,
}

/// Profile update payload.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct WorkerProfileUpdate {
    pub site_id: i64,
    pub name: String,
    pub department: Option<String>,
    pub job_role: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub is_retired: bool,
    pub retired_on: Option<NaiveDate>,
    pub id_fragment: Option<String>,
}

/// Identity row written by the device import and the manual add path.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRow {
    pub worker_key: WorkerKey,
    pub site_id: i64,
    pub project_id: i64,
    pub login_id: String,
    pub name: String,
    pub department: Option<String>,
    pub job_role: Option<String>,
    pub phone: Option<String>,
    pub is_retired: bool,
    pub id_fragment_enc: Option<String>,
    pub id_fragment_index: Option<String>,
}

impl WorkerRow {
    pub fn lookup(&self) -> IdentityLookup {
        IdentityLookup {
            login_id: self.login_id.clone(),
            name: self.name.clone(),
            id_fragment_index: self.id_fragment_index.clone(),
        }
    }
}

/// Profile columns after the id fragment has been encrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerProfileRow {
    pub worker_key: WorkerKey,
    pub site_id: i64,
    pub name: String,
    pub department: Option<String>,
    pub job_role: Option<String>,
    pub phone: Option<String>,
    pub is_retired: bool,
    pub retired_on: Option<NaiveDate>,
    pub id_fragment_enc: Option<String>,
    pub id_fragment_index: Option<String>,
}
