pub mod attendance;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing {
    use crate::auth::jwt::tests::{SECRET, issue};
    use crate::config::{Config, StoreKind};

    pub fn config() -> Config {
        Config {
            server_addr: "127.0.0.1:0".to_string(),
            store: StoreKind::Memory,
            database_url: None,
            jwt_secret: SECRET.to_string(),
            api_prefix: "/api".to_string(),
            id_cipher_key: "0123456789abcdef0123456789abcdef".to_string(),
            id_index_key: "index".to_string(),
            rate_protected_per_min: 1000,
            import_interval_secs: 60,
            import_batch_size: 500,
            reconcile_interval_secs: 3600,
            run_migrations: false,
            log_dir: "logs".to_string(),
        }
    }

    /// `Authorization` header value for a caller with the given role id.
    pub fn bearer(role: u8, project_ids: Vec<i64>) -> String {
        format!("Bearer {}", issue(42, "tester", role, project_ids, 600))
    }
}
