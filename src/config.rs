//! Process configuration, loaded from the environment (`.env` via `dotenvy`
//! first, then real env vars). Mirrors the env-var contract named in the
//! control-plane interface.

use std::time::Duration;

/// Process-wide configuration. Constructed once at boot; immutable for the
/// life of the process (the only runtime-mutable process-wide state is the
/// policy program, see [`crate::policy`]).
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: String,
    pub database_url: Option<String>,
    pub redis_addr: Option<String>,
    pub s3_bucket: Option<String>,
    pub minio_endpoint: Option<String>,
    pub minio_root_user: Option<String>,
    pub minio_root_password: Option<String>,
    pub minio_secure: bool,
    pub enable_immutable_tags: bool,
    pub policy_environment: String,
    pub webhook_url: Option<String>,
    pub jwt_secret: String,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub smtp_from: Option<String>,
    pub enable_cost_intelligence: bool,
    pub storage_cost_per_gb_month: f64,
    pub bandwidth_cost_per_gb: f64,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Loads `.env` (best-effort, missing file is not an error) then reads
    /// the environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Config {
            server_port: env_string("SERVER_PORT", ":5000"),
            database_url: env_opt_string("DATABASE_URL"),
            redis_addr: env_opt_string("REDIS_ADDR"),
            s3_bucket: env_opt_string("S3_BUCKET"),
            minio_endpoint: env_opt_string("MINIO_ENDPOINT"),
            minio_root_user: env_opt_string("MINIO_ROOT_USER"),
            minio_root_password: env_opt_string("MINIO_ROOT_PASSWORD"),
            minio_secure: env_bool("MINIO_SECURE", false),
            enable_immutable_tags: env_bool("ENABLE_IMMUTABLE_TAGS", false),
            policy_environment: env_string("POLICY_ENVIRONMENT", "dev"),
            webhook_url: env_opt_string("WEBHOOK_URL"),
            jwt_secret: env_string("JWT_SECRET", "insecure-development-secret"),
            smtp_host: env_opt_string("SMTP_HOST"),
            smtp_port: std::env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()),
            smtp_user: env_opt_string("SMTP_USER"),
            smtp_pass: env_opt_string("SMTP_PASS"),
            smtp_from: env_opt_string("SMTP_FROM"),
            enable_cost_intelligence: env_bool("ENABLE_COST_INTELLIGENCE", true),
            storage_cost_per_gb_month: env_f64("STORAGE_COST_PER_GB_MONTH", 0.023),
            bandwidth_cost_per_gb: env_f64("BANDWIDTH_COST_PER_GB", 0.09),
            log_format: if env_string("REGISTRY_LOG_FORMAT", "text") == "json" {
                LogFormat::Json
            } else {
                LogFormat::Text
            },
        }
    }
}

pub fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_opt_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

pub fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

pub fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing() {
        std::env::set_var("REGISTRY_TEST_BOOL", "true");
        assert!(env_bool("REGISTRY_TEST_BOOL", false));
        std::env::set_var("REGISTRY_TEST_BOOL", "0");
        assert!(!env_bool("REGISTRY_TEST_BOOL", true));
        std::env::remove_var("REGISTRY_TEST_BOOL");
        assert!(env_bool("REGISTRY_TEST_BOOL", true));
    }

    #[test]
    fn defaults_apply() {
        std::env::remove_var("REGISTRY_TEST_F64");
        assert_eq!(env_f64("REGISTRY_TEST_F64", 0.023), 0.023);
    }
}
