//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

use tracing::info;

static INIT: Once = Once::new();

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}

/// Database URL, first of DATABASE_URL then DB_URL.
pub fn db_url() -> anyhow::Result<String> {
    for k in ["DATABASE_URL", "DB_URL"] {
        if let Some(v) = env_opt(k) {
            return Ok(v);
        }
    }
    Err(anyhow::anyhow!("no database URL env vars set (DATABASE_URL / DB_URL)"))
}

/// Runtime knobs shared by the admin binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_connections: u32,
    pub refresh_interval: Duration,
}

impl EngineConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
    pub const DEFAULT_REFRESH_SECS: u64 = 900;

    pub fn from_env() -> Self {
        let secs = env_parse("VARIATION_REFRESH_INTERVAL_SECS", Self::DEFAULT_REFRESH_SECS).max(1);
        Self {
            max_connections: env_parse("DB_MAX_CONNECTIONS", Self::DEFAULT_MAX_CONNECTIONS).max(1),
            refresh_interval: Duration::from_secs(secs),
        }
    }
}

fn redact_value(key: &str, val: &str) -> String {
    let k = key.to_ascii_uppercase();
    if k.contains("PASSWORD") || k.contains("SECRET") || k.contains("TOKEN") {
        return "***".to_string();
    }
    let val_trim = val.trim();
    if val_trim.starts_with("postgres://") || val_trim.starts_with("postgresql://") {
        if let Some(proto) = val_trim.find("//") {
            if let Some(at) = val_trim[proto + 2..].find('@') {
                let host_part = &val_trim[proto + 2 + at + 1..];
                return format!("{}***@{}", &val_trim[..proto + 2], host_part);
            }
        }
    }
    val_trim.to_string()
}

/// Validate required keys and log a consolidated, redacted snapshot of configuration.
pub fn preflight_check(title: &str, required: &[&str], also_log: &[&str]) -> anyhow::Result<()> {
    init_env();
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|k| env_opt(k).is_none())
        .collect();
    let snapshot: Vec<(String, String)> = also_log
        .iter()
        .map(|&k| (k.to_string(), redact_value(k, &env_opt(k).unwrap_or_default())))
        .collect();
    info!(target = "preflight", title, snapshot = ?snapshot, "configuration snapshot");
    if !missing.is_empty() {
        return Err(anyhow::anyhow!("missing required env: {:?}", missing));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_credentials_in_dsn() {
        assert_eq!(
            redact_value("DATABASE_URL", "postgres://user:pw@db.local:5432/tcg"),
            "postgres://***@db.local:5432/tcg"
        );
        assert_eq!(redact_value("DB_PASSWORD", "hunter2"), "***");
        assert_eq!(redact_value("RUST_LOG", " info "), "info");
    }

    #[test]
    fn unset_keys_use_defaults() {
        assert_eq!(env_parse("TCGV_TEST_UNSET_NUMBER", 7u32), 7);
        assert!(!env_flag("TCGV_TEST_UNSET_FLAG", false));
        assert!(env_opt("TCGV_TEST_UNSET_FLAG").is_none());
    }

    #[test]
    fn config_defaults() {
        let cfg = EngineConfig::from_env();
        assert!(cfg.max_connections >= 1);
        assert!(cfg.refresh_interval >= Duration::from_secs(1));
    }
}
