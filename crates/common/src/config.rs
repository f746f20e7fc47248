use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Resend API base URL
    pub resend_api_url: String,

    /// Email sender address
    pub email_from: String,

    /// Maximum rows claimed per table in a single pass (default: 100)
    pub notifier_batch_size: u32,

    /// Retries for a retryable email failure (default: 3)
    pub notifier_max_retries: usize,

    /// When set, the notifier loops with this interval instead of running once
    pub notifier_poll_interval_secs: Option<u64>,
}

pub const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com";
pub const DEFAULT_EMAIL_FROM: &str = "Keepla <no-reply@keepla.app>";

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: lookup("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            resend_api_key: lookup("RESEND_API_KEY").filter(|k| !k.is_empty()),
            resend_api_url: lookup("RESEND_API_URL")
                .unwrap_or_else(|| DEFAULT_RESEND_API_URL.to_string()),
            email_from: lookup("EMAIL_FROM").unwrap_or_else(|| DEFAULT_EMAIL_FROM.to_string()),
            notifier_batch_size: lookup("NOTIFIER_BATCH_SIZE")
                .unwrap_or_else(|| "100".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("NOTIFIER_BATCH_SIZE must be a valid u32"))?,
            notifier_max_retries: lookup("NOTIFIER_MAX_RETRIES")
                .unwrap_or_else(|| "3".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("NOTIFIER_MAX_RETRIES must be a valid usize"))?,
            notifier_poll_interval_secs: lookup("NOTIFIER_POLL_INTERVAL_SECS")
                .map(|v| {
                    v.parse()
                        .map_err(|_| anyhow::anyhow!("NOTIFIER_POLL_INTERVAL_SECS must be a valid u64"))
                })
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap();
        assert_eq!(config.database_url, "postgres://x");
        assert_eq!(config.db_max_connections, 20);
        assert_eq!(config.resend_api_key, None);
        assert_eq!(config.resend_api_url, DEFAULT_RESEND_API_URL);
        assert_eq!(config.email_from, DEFAULT_EMAIL_FROM);
        assert_eq!(config.notifier_batch_size, 100);
        assert_eq!(config.notifier_max_retries, 3);
        assert_eq!(config.notifier_poll_interval_secs, None);
    }

    #[test]
    fn test_missing_database_url() {
        let err = AppConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_invalid_number() {
        let err = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("NOTIFIER_POLL_INTERVAL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("NOTIFIER_POLL_INTERVAL_SECS"));
    }

    #[test]
    fn test_empty_api_key_is_unset() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("RESEND_API_KEY", ""),
            ("NOTIFIER_POLL_INTERVAL_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(config.resend_api_key, None);
        assert_eq!(config.notifier_poll_interval_secs, Some(60));
    }
}
