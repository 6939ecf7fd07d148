use std::env;
use std::time::Duration;

/// Firehose subscription settings
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub firehose_endpoint: String,
    pub subscription_method: String,
    pub reconnect_delay_ms: u64,
    /// Key of the `sub_state` cursor row
    pub service_name: String,
    /// Persist the cursor every N handled events
    pub cursor_persist_every: u64,
    pub rust_log: String,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let firehose_endpoint = lookup("SKYFLOW_FIREHOSE_ENDPOINT")
            .unwrap_or_else(|| "wss://bsky.network".to_string())
            .trim_end_matches('/')
            .to_string();

        if !firehose_endpoint.starts_with("ws://") && !firehose_endpoint.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "SKYFLOW_FIREHOSE_ENDPOINT must start with ws:// or wss://".to_string(),
            ));
        }

        let subscription_method = lookup("SKYFLOW_SUBSCRIPTION_METHOD")
            .unwrap_or_else(|| "com.atproto.sync.subscribeRepos".to_string());

        if subscription_method.is_empty() || subscription_method.contains('/') {
            return Err(ConfigError::InvalidValue(format!(
                "SKYFLOW_SUBSCRIPTION_METHOD must be an NSID, got '{}'",
                subscription_method
            )));
        }

        let reconnect_delay_ms = lookup("SKYFLOW_RECONNECT_DELAY_MS")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u64>()
            .unwrap_or(3000);

        let service_name = lookup("SKYFLOW_SERVICE_NAME")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| firehose_endpoint.clone());

        let cursor_persist_every = match lookup("SKYFLOW_CURSOR_PERSIST_EVERY")
            .unwrap_or_else(|| "20".to_string())
            .parse::<u64>()
        {
            Ok(0) | Err(_) => {
                log::warn!("Invalid SKYFLOW_CURSOR_PERSIST_EVERY, defaulting to 20");
                20
            }
            Ok(n) => n,
        };

        let rust_log = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            firehose_endpoint,
            subscription_method,
            reconnect_delay_ms,
            service_name,
            cursor_persist_every,
            rust_log,
        })
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Subscription url, resuming after `cursor` when one is known
    pub fn subscription_url(&self, cursor: Option<i64>) -> String {
        let base = format!("{}/xrpc/{}", self.firehose_endpoint, self.subscription_method);
        match cursor {
            Some(cursor) => format!("{}?cursor={}", base, cursor),
            None => base,
        }
    }
}
