//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only the env var NAME holding the database URL
//!   (`/database/url_env`), never the URL itself.
//! - The daemon calls [`resolve_database_url`] once at startup and passes the
//!   result to the store constructor.
//! - `Debug` on [`DatabaseUrl`] redacts the value; errors name the variable,
//!   never its contents.

use anyhow::{bail, Result};
use serde_json::Value;

pub const DEFAULT_DATABASE_URL_ENV: &str = "SEF_DATABASE_URL";

const URL_ENV_POINTER: &str = "/database/url_env";

/// Database connection string resolved from the environment.
#[derive(Clone)]
pub struct DatabaseUrl {
    env_var: String,
    value: String,
}

impl DatabaseUrl {
    /// Name of the env var the URL came from.
    pub fn env_var(&self) -> &str {
        &self.env_var
    }

    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for DatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseUrl")
            .field("env_var", &self.env_var)
            .field("value", &"<REDACTED>")
            .finish()
    }
}

/// Env var name configured at `/database/url_env`, or the default.
pub fn database_url_env_name(config_json: &Value) -> String {
    config_json
        .pointer(URL_ENV_POINTER)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_DATABASE_URL_ENV)
        .to_string()
}

/// Resolve the database URL from the process environment.
pub fn resolve_database_url(config_json: &Value) -> Result<DatabaseUrl> {
    resolve_database_url_with(config_json, |name| std::env::var(name).ok())
}

/// Same as [`resolve_database_url`] with an injectable environment lookup.
pub fn resolve_database_url_with<F>(config_json: &Value, lookup: F) -> Result<DatabaseUrl>
where
    F: Fn(&str) -> Option<String>,
{
    let env_var = database_url_env_name(config_json);
    match lookup(&env_var) {
        Some(v) if !v.trim().is_empty() => Ok(DatabaseUrl {
            env_var,
            value: v.trim().to_string(),
        }),
        _ => bail!(
            "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
            env_var
        ),
    }
}
