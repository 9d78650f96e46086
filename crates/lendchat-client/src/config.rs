//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so the client can start with zero
//! configuration against a local development server.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use lendchat_net::ConnectionConfig;
use lendchat_shared::constants::{
    DEFAULT_WS_URL, HEARTBEAT_INTERVAL_SECS, MAX_RECONNECT_ATTEMPTS, RECONNECT_INTERVAL_SECS,
};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Real-time endpoint, without query parameters.
    /// Env: `LENDCHAT_WS_URL`
    /// Default: `ws://127.0.0.1:8080/ws`
    pub ws_url: String,

    /// Identifier of this installation, sent as `clientId`.
    /// Env: `LENDCHAT_CLIENT_ID`
    /// Default: a random UUID per process.
    pub client_id: String,

    /// SQLite file backing the message store.
    /// Env: `LENDCHAT_DB_PATH`
    /// Default: `None` (platform data directory).
    pub db_path: Option<PathBuf>,

    /// Env: `LENDCHAT_HEARTBEAT_SECS`
    /// Default: `30`
    pub heartbeat_interval: Duration,

    /// Env: `LENDCHAT_RECONNECT_SECS`
    /// Default: `5`
    pub reconnect_interval: Duration,

    /// Env: `LENDCHAT_MAX_RECONNECTS`
    /// Default: `5`
    pub max_reconnect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            client_id: uuid::Uuid::new_v4().to_string(),
            db_path: None,
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            reconnect_interval: Duration::from_secs(RECONNECT_INTERVAL_SECS),
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("LENDCHAT_WS_URL") {
            match Url::parse(&url) {
                Ok(parsed) if matches!(parsed.scheme(), "ws" | "wss") => config.ws_url = url,
                _ => {
                    tracing::warn!(value = %url, "Invalid LENDCHAT_WS_URL, using default");
                }
            }
        }

        if let Some(id) = var("LENDCHAT_CLIENT_ID") {
            if !id.trim().is_empty() {
                config.client_id = id;
            }
        }

        if let Some(path) = var("LENDCHAT_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(secs) = parse_secs(&var, "LENDCHAT_HEARTBEAT_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_secs(&var, "LENDCHAT_RECONNECT_SECS") {
            config.reconnect_interval = Duration::from_secs(secs);
        }

        if let Some(val) = var("LENDCHAT_MAX_RECONNECTS") {
            match val.parse::<u32>() {
                Ok(n) => config.max_reconnect_attempts = n,
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid LENDCHAT_MAX_RECONNECTS, using default");
                }
            }
        }

        config
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            endpoint: self.ws_url.clone(),
            client_id: self.client_id.clone(),
            heartbeat_interval: self.heartbeat_interval,
            reconnect_interval: self.reconnect_interval,
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

/// A strictly positive number of seconds; anything else is logged and ignored.
fn parse_secs(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let val = var(name)?;
    match val.parse::<u64>() {
        Ok(secs) if secs > 0 => Some(secs),
        _ => {
            tracing::warn!(variable = name, value = %val, "Invalid duration, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::from_vars(vars(&[]));
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert!(config.db_path.is_none());
        assert!(uuid::Uuid::parse_str(&config.client_id).is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_vars(vars(&[
            ("LENDCHAT_WS_URL", "wss://chat.example.com/ws"),
            ("LENDCHAT_CLIENT_ID", "device-7"),
            ("LENDCHAT_DB_PATH", "/tmp/chat.db"),
            ("LENDCHAT_HEARTBEAT_SECS", "10"),
            ("LENDCHAT_MAX_RECONNECTS", "0"),
        ]));
        assert_eq!(config.ws_url, "wss://chat.example.com/ws");
        assert_eq!(config.client_id, "device-7");
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/chat.db")));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.max_reconnect_attempts, 0);

        let conn = config.connection_config();
        assert_eq!(conn.endpoint, "wss://chat.example.com/ws");
        assert_eq!(conn.client_id, "device-7");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_vars(vars(&[
            ("LENDCHAT_WS_URL", "https://chat.example.com"),
            ("LENDCHAT_HEARTBEAT_SECS", "0"),
            ("LENDCHAT_RECONNECT_SECS", "soon"),
            ("LENDCHAT_MAX_RECONNECTS", "-1"),
        ]));
        assert_eq!(config.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.max_reconnect_attempts, 5);
    }
}
