//! Server settings from `RELAY_*` environment variables.

use relay_engine::DEFAULT_TENANT;
use relay_types::DEFAULT_SOURCE;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8002";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid value for {var}: {value:?}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// SQLite database for records, flags and audit. Unset keeps everything in memory.
    pub sqlite_path: Option<PathBuf>,
    /// JSONL audit file, used when no SQLite path is set.
    pub audit_log: Option<PathBuf>,
    pub event_source: String,
    pub default_tenant: String,
    /// Raw `RELAY_GRANTS` value; unset grants every identified caller everything.
    pub grants: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8002)),
            sqlite_path: None,
            audit_log: None,
            event_source: DEFAULT_SOURCE.to_string(),
            default_tenant: DEFAULT_TENANT.to_string(),
            grants: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    pub fn from_vars<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();
        if let Some(v) = non_empty("RELAY_LISTEN") {
            cfg.listen = v.parse().map_err(|_| ConfigError {
                var: "RELAY_LISTEN",
                value: v.clone(),
            })?;
        }
        cfg.sqlite_path = non_empty("RELAY_SQLITE_PATH").map(PathBuf::from);
        cfg.audit_log = non_empty("RELAY_AUDIT_LOG").map(PathBuf::from);
        if let Some(v) = non_empty("RELAY_EVENT_SOURCE") {
            cfg.event_source = v;
        }
        if let Some(v) = non_empty("RELAY_DEFAULT_TENANT") {
            cfg.default_tenant = v;
        }
        cfg.grants = non_empty("RELAY_GRANTS");
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = ServerConfig::from_vars(vars(&[])).unwrap();
        assert_eq!(cfg.listen.to_string(), DEFAULT_LISTEN);
        assert_eq!(cfg.event_source, "/LMP/Moodle");
        assert_eq!(cfg.default_tenant, "default_tenant");
        assert!(cfg.sqlite_path.is_none() && cfg.grants.is_none());
    }

    #[test]
    fn overrides_and_bad_listen() {
        let cfg = ServerConfig::from_vars(vars(&[
            ("RELAY_LISTEN", "127.0.0.1:9000"),
            ("RELAY_SQLITE_PATH", "/var/lib/relay.db"),
            ("RELAY_DEFAULT_TENANT", "school_a"),
            ("RELAY_GRANTS", "admin=*"),
        ]))
        .unwrap();
        assert_eq!(cfg.listen.port(), 9000);
        assert_eq!(cfg.sqlite_path, Some(PathBuf::from("/var/lib/relay.db")));
        assert_eq!(cfg.default_tenant, "school_a");
        assert_eq!(cfg.grants.as_deref(), Some("admin=*"));

        let err = ServerConfig::from_vars(vars(&[("RELAY_LISTEN", "localhost")])).unwrap_err();
        assert_eq!(err.var, "RELAY_LISTEN");
    }
}
