//! Server Configuration
//!
//! Defaults come from [`Default`]; `CRASH_*` environment variables override
//! them. A value that fails to parse is logged and the default kept.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::game::engine::EngineConfig;
use crate::game::settings::{Mode, Settings};
use crate::game::tick::RoundTimings;
use crate::network::server::GatewayConfig;

/// Default base URL of the settings / ledger API.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/drives/";

/// Full server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Gateway (websocket) settings.
    pub gateway: GatewayConfig,
    /// Round engine settings.
    pub engine: EngineConfig,
    /// Base URL of the settings / ledger API.
    pub api_url: String,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            engine: EngineConfig::default(),
            api_url: DEFAULT_API_URL.to_string(),
            http_timeout: Duration::from_millis(5000),
        }
    }
}

impl ServerConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = Env { lookup };

        env.parse("CRASH_BIND_ADDR", &mut config.gateway.bind_addr);
        env.parse("CRASH_MAX_CONNECTIONS", &mut config.gateway.max_connections);
        env.parse("CRASH_OUTBOUND_BUFFER", &mut config.gateway.outbound_buffer);
        if let Some(url) = env.get("CRASH_API_URL") {
            config.api_url = url;
        }
        env.millis("CRASH_HTTP_TIMEOUT_MS", &mut config.http_timeout);

        let timings: &mut RoundTimings = &mut config.engine.timings;
        env.millis("CRASH_BETTING_MS", &mut timings.betting);
        env.millis("CRASH_LOCKBETS_MS", &mut timings.lock_bets);
        env.millis("CRASH_TICK_MS", &mut timings.tick);
        env.millis("CRASH_CRASHED_MS", &mut timings.crashed);
        if timings.tick.is_zero() {
            warn!("CRASH_TICK_MS must be positive, using default");
            timings.tick = RoundTimings::default().tick;
        }

        env.parse("CRASH_HISTORY_CAPACITY", &mut config.engine.history_capacity);
        config.engine.history_capacity = config.engine.history_capacity.max(1);

        let settings: &mut Settings = &mut config.engine.initial_settings;
        env.parse("CRASH_MAX_NUMBER", &mut settings.max_number);
        if let Some(label) = env.get("CRASH_MODE") {
            settings.mode = Mode::from_label(&label);
        }

        config
    }

    /// Gateway bind address.
    pub fn bind_addr(&self) -> SocketAddr {
        self.gateway.bind_addr
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, slot: &mut T) {
        if let Some(raw) = self.get(key) {
            match raw.parse() {
                Ok(value) => *slot = value,
                Err(_) => warn!("Ignoring {}={:?}: not a valid value", key, raw),
            }
        }
    }

    fn millis(&self, key: &str, slot: &mut Duration) {
        let mut ms = slot.as_millis() as u64;
        self.parse(key, &mut ms);
        *slot = Duration::from_millis(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: BTreeMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.gateway.bind_addr, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.gateway.max_connections, 1000);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.http_timeout, Duration::from_millis(5000));
        assert_eq!(config.engine.timings, RoundTimings::default());
        assert_eq!(config.engine.history_capacity, 10);
        assert_eq!(config.engine.initial_settings.mode, Mode::Normal);
        assert_eq!(config.engine.initial_settings.max_number, 50.0);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CRASH_BIND_ADDR", "127.0.0.1:9001"),
            ("CRASH_API_URL", "http://ledger.internal/api/drives"),
            ("CRASH_BETTING_MS", "3000"),
            ("CRASH_CRASHED_MS", "3000"),
            ("CRASH_HISTORY_CAPACITY", "25"),
            ("CRASH_MAX_NUMBER", "20"),
            ("CRASH_MODE", "super_hard"),
        ]);
        assert_eq!(config.bind_addr().port(), 9001);
        assert_eq!(config.api_url, "http://ledger.internal/api/drives");
        assert_eq!(config.engine.timings.betting, Duration::from_millis(3000));
        assert_eq!(config.engine.timings.crashed, Duration::from_millis(3000));
        assert_eq!(config.engine.history_capacity, 25);
        assert_eq!(config.engine.initial_settings.max_number, 20.0);
        assert_eq!(config.engine.initial_settings.mode, Mode::SuperHard);
    }

    #[test]
    fn test_bad_values_keep_defaults() {
        let config = config_from(&[
            ("CRASH_MAX_CONNECTIONS", "lots"),
            ("CRASH_TICK_MS", "0"),
            ("CRASH_HISTORY_CAPACITY", "0"),
            ("CRASH_BIND_ADDR", "nowhere"),
        ]);
        assert_eq!(config.gateway.max_connections, 1000);
        assert_eq!(config.engine.timings.tick, Duration::from_millis(50));
        assert_eq!(config.engine.history_capacity, 1);
        assert_eq!(config.gateway.bind_addr.port(), 3000);
    }

    #[test]
    fn test_unknown_mode_is_unskewed() {
        let config = config_from(&[("CRASH_MODE", "chaos")]);
        assert_eq!(config.engine.initial_settings.mode, Mode::Unskewed);
    }
}
