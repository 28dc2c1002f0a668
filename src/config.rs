use std::env;
use std::str::FromStr;

use anyhow::{Context, bail};
use dotenvy::dotenv;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    MySql,
    Memory,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(StoreKind::MySql),
            "memory" => Ok(StoreKind::Memory),
            other => bail!("ATTENDANCE_STORE must be 'mysql' or 'memory', got '{other}'"),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub server_addr: String,
    pub store: StoreKind,
    /// Only read when `store` is MySql.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub api_prefix: String,

    pub id_cipher_key: String,
    pub id_index_key: String,

    // Rate limiting
    pub rate_protected_per_min: u32,

    // Scheduled passes
    pub import_interval_secs: u64,
    pub import_batch_size: usize,
    pub reconcile_interval_secs: u64,

    pub run_migrations: bool,
    pub log_dir: String,
}

fn required(name: &str) -> anyhow::Result<String> {
    env::var(name).with_context(|| format!("{name} must be set"))
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{name} is malformed ({raw}): {e}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();

        let store: StoreKind = parsed("ATTENDANCE_STORE", StoreKind::MySql)?;
        let database_url = match store {
            StoreKind::MySql => Some(required("DATABASE_URL")?),
            StoreKind::Memory => env::var("DATABASE_URL").ok(),
        };

        let id_cipher_key = required("ID_CIPHER_KEY")?;
        if id_cipher_key.len() != 32 {
            bail!("ID_CIPHER_KEY must be exactly 32 bytes, got {}", id_cipher_key.len());
        }

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            store,
            database_url,
            jwt_secret: required("JWT_SECRET")?,
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),

            id_cipher_key,
            id_index_key: required("ID_INDEX_KEY")?,

            rate_protected_per_min: parsed("RATE_PROTECTED_PER_MIN", 1000)?,

            import_interval_secs: parsed("IMPORT_INTERVAL_SECS", 60)?,
            import_batch_size: parsed("IMPORT_BATCH_SIZE", 500)?,
            reconcile_interval_secs: parsed("RECONCILE_INTERVAL_SECS", 3600)?,

            run_migrations: parsed("RUN_MIGRATIONS", false)?,
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_kind_is_case_insensitive() {
        assert_eq!("MySQL".parse::<StoreKind>().unwrap(), StoreKind::MySql);
        assert_eq!(" memory ".parse::<StoreKind>().unwrap(), StoreKind::Memory);
        assert!("postgres".parse::<StoreKind>().is_err());
    }
}
