use serde::{Deserialize, Serialize};

/// Bearer token payload. Tokens are issued by the identity service; this
/// crate only verifies them.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub role: u8, // role id
    pub exp: usize,
    pub jti: String,

    /// Projects a site manager or viewer is assigned to
    #[serde(default)]
    pub project_ids: Vec<i64>,
}
