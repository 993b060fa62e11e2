//! Broker connection settings, fixed at construction.

use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{0} requires SASL username and password")]
    MissingCredentials(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityProtocol {
    #[default]
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAINTEXT" => Some(SecurityProtocol::Plaintext),
            "SSL" => Some(SecurityProtocol::Ssl),
            "SASL_PLAINTEXT" => Some(SecurityProtocol::SaslPlaintext),
            "SASL_SSL" => Some(SecurityProtocol::SaslSsl),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "PLAINTEXT",
            SecurityProtocol::Ssl => "SSL",
            SecurityProtocol::SaslPlaintext => "SASL_PLAINTEXT",
            SecurityProtocol::SaslSsl => "SASL_SSL",
        }
    }

    pub fn uses_tls(self) -> bool {
        matches!(self, SecurityProtocol::Ssl | SecurityProtocol::SaslSsl)
    }

    pub fn uses_sasl(self) -> bool {
        matches!(
            self,
            SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaslMechanism {
    #[default]
    Plain,
    ScramSha256,
    ScramSha512,
}

impl SaslMechanism {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Some(SaslMechanism::Plain),
            "SCRAM-SHA-256" => Some(SaslMechanism::ScramSha256),
            "SCRAM-SHA-512" => Some(SaslMechanism::ScramSha512),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Bounded retry: `max_attempts` tries, backoff doubling from `initial_backoff`
/// up to `max_backoff`, whole call capped by `timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(8000),
            timeout: Duration::from_millis(30_000),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempts count from 1).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// When false every publish fails fast with `TransportError::Disabled`.
    pub enabled: bool,
    pub bootstrap: Vec<String>,
    pub security_protocol: SecurityProtocol,
    pub sasl: Option<SaslCredentials>,
    pub topic_prefix: String,
    pub retry: RetryPolicy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bootstrap: vec!["localhost:8082".to_string()],
            security_protocol: SecurityProtocol::Plaintext,
            sasl: None,
            topic_prefix: "lmp_".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl BrokerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    pub(crate) fn from_vars<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = get("RELAY_BROKER_ENABLED") {
            cfg.enabled = parse_bool(&v).ok_or(ConfigError::Invalid {
                var: "RELAY_BROKER_ENABLED",
                value: v,
            })?;
        }
        if let Some(v) = get("RELAY_BROKER_BOOTSTRAP") {
            let endpoints: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if endpoints.is_empty() {
                return Err(ConfigError::Invalid {
                    var: "RELAY_BROKER_BOOTSTRAP",
                    value: v,
                });
            }
            cfg.bootstrap = endpoints;
        }
        if let Some(v) = get("RELAY_BROKER_SECURITY_PROTOCOL") {
            cfg.security_protocol = SecurityProtocol::parse(&v).ok_or(ConfigError::Invalid {
                var: "RELAY_BROKER_SECURITY_PROTOCOL",
                value: v,
            })?;
        }
        if cfg.security_protocol.uses_sasl() {
            let mechanism = match get("RELAY_BROKER_SASL_MECHANISM") {
                Some(v) => SaslMechanism::parse(&v).ok_or(ConfigError::Invalid {
                    var: "RELAY_BROKER_SASL_MECHANISM",
                    value: v,
                })?,
                None => SaslMechanism::Plain,
            };
            let username = get("RELAY_BROKER_SASL_USERNAME").unwrap_or_default();
            let password = get("RELAY_BROKER_SASL_PASSWORD").unwrap_or_default();
            if username.is_empty() || password.is_empty() {
                return Err(ConfigError::MissingCredentials(
                    cfg.security_protocol.as_str(),
                ));
            }
            cfg.sasl = Some(SaslCredentials {
                mechanism,
                username,
                password,
            });
        }
        if let Some(v) = get("RELAY_BROKER_TOPIC_PREFIX") {
            cfg.topic_prefix = v;
        }
        if let Some(v) = get("RELAY_BROKER_RETRIES") {
            cfg.retry.max_attempts = parse_num(&v)
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n >= 1)
                .ok_or(ConfigError::Invalid {
                    var: "RELAY_BROKER_RETRIES",
                    value: v,
                })?;
        }
        if let Some(v) = get("RELAY_BROKER_RETRY_BACKOFF_MS") {
            let ms = parse_num(&v).ok_or(ConfigError::Invalid {
                var: "RELAY_BROKER_RETRY_BACKOFF_MS",
                value: v,
            })?;
            cfg.retry.initial_backoff = Duration::from_millis(ms);
            cfg.retry.max_backoff = Duration::from_millis(ms.saturating_mul(8));
        }
        if let Some(v) = get("RELAY_BROKER_TIMEOUT_MS") {
            let ms = parse_num(&v)
                .filter(|n| *n > 0)
                .ok_or(ConfigError::Invalid {
                    var: "RELAY_BROKER_TIMEOUT_MS",
                    value: v,
                })?;
            cfg.retry.timeout = Duration::from_millis(ms);
        }
        Ok(cfg)
    }

    /// Topic for an event type: prefix + event type with any leading prefix stripped.
    pub fn topic_for(&self, event_type: &str) -> String {
        let suffix = event_type
            .strip_prefix(self.topic_prefix.as_str())
            .unwrap_or(event_type);
        format!("{}{}", self.topic_prefix, suffix)
    }

    /// Base URLs for the REST proxy, scheme chosen from the security protocol.
    pub fn endpoint_urls(&self) -> Vec<String> {
        let scheme = if self.security_protocol.uses_tls() {
            "https"
        } else {
            "http"
        };
        self.bootstrap
            .iter()
            .map(|b| {
                let b = b.trim_end_matches('/');
                if b.starts_with("http://") || b.starts_with("https://") {
                    b.to_string()
                } else {
                    format!("{}://{}", scheme, b)
                }
            })
            .collect()
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_num(s: &str) -> Option<u64> {
    s.trim().parse().ok()
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
    fn defaults_match_documented_values() {
        let cfg = BrokerConfig::from_vars(vars(&[])).unwrap();
        assert!(!cfg.enabled);
        assert_eq!(cfg.bootstrap, vec!["localhost:8082"]);
        assert_eq!(cfg.topic_prefix, "lmp_");
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.initial_backoff, Duration::from_millis(1000));
        assert_eq!(cfg.retry.timeout, Duration::from_secs(30));
    }

    #[test]
    fn sasl_requires_credentials() {
        let err = BrokerConfig::from_vars(vars(&[(
            "RELAY_BROKER_SECURITY_PROTOCOL",
            "SASL_SSL",
        )]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingCredentials("SASL_SSL"));

        let cfg = BrokerConfig::from_vars(vars(&[
            ("RELAY_BROKER_SECURITY_PROTOCOL", "sasl_ssl"),
            ("RELAY_BROKER_SASL_MECHANISM", "SCRAM-SHA-512"),
            ("RELAY_BROKER_SASL_USERNAME", "relay"),
            ("RELAY_BROKER_SASL_PASSWORD", "secret"),
            ("RELAY_BROKER_BOOTSTRAP", "k1:8082, https://k2:8443/"),
        ]))
        .unwrap();
        let sasl = cfg.sasl.clone().unwrap();
        assert_eq!(sasl.mechanism, SaslMechanism::ScramSha512);
        assert!(!format!("{:?}", sasl).contains("secret"));
        assert_eq!(
            cfg.endpoint_urls(),
            vec!["https://k1:8082".to_string(), "https://k2:8443".to_string()]
        );
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(BrokerConfig::from_vars(vars(&[("RELAY_BROKER_RETRIES", "0")])).is_err());
        assert!(
            BrokerConfig::from_vars(vars(&[("RELAY_BROKER_RETRIES", "4294967296")])).is_err()
        );
        assert!(BrokerConfig::from_vars(vars(&[("RELAY_BROKER_TIMEOUT_MS", "soon")])).is_err());
        assert!(BrokerConfig::from_vars(vars(&[("RELAY_BROKER_ENABLED", "maybe")])).is_err());
    }

    #[test]
    fn topic_prefix_is_not_doubled() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.topic_for("lmp_grade_submitted"), "lmp_grade_submitted");
        assert_eq!(cfg.topic_for("grade_submitted"), "lmp_grade_submitted");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(p.backoff_for(2), Duration::from_millis(2000));
        assert_eq!(p.backoff_for(3), Duration::from_millis(4000));
        assert_eq!(p.backoff_for(10), Duration::from_millis(8000));
    }
}
