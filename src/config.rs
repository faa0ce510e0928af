use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::models::Millis;

/// Timing policy for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub typing_ttl: Duration,
    pub typing_debounce: Duration,
    pub send_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            typing_ttl: Duration::from_millis(3_000),
            typing_debounce: Duration::from_millis(500),
            send_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    pub(crate) fn typing_ttl_ms(&self) -> Millis {
        self.typing_ttl.as_millis() as Millis
    }

    pub(crate) fn typing_debounce_ms(&self) -> Millis {
        self.typing_debounce.as_millis() as Millis
    }

    pub(crate) fn send_timeout_ms(&self) -> Millis {
        self.send_timeout.as_millis() as Millis
    }
}

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub relay_addr: String,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = SessionConfig::default();
        Ok(Config {
            relay_addr: env::var("RELAY_ADDR").unwrap_or("127.0.0.1:8080".to_string()),
            session: SessionConfig {
                typing_ttl: millis_var("TYPING_TTL_MS", defaults.typing_ttl)?,
                typing_debounce: millis_var("TYPING_DEBOUNCE_MS", defaults.typing_debounce)?,
                send_timeout: millis_var("SEND_TIMEOUT_MS", defaults.send_timeout)?,
            },
        })
    }
}

fn millis_var(name: &str, default: Duration) -> Result<Duration> {
    match env::var(name) {
        Ok(raw) => {
            let ms: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of milliseconds, got {:?}", name, raw))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(default),
    }
}
