//! Environment-driven server configuration

use std::str::FromStr;
use std::time::Duration;

use crate::agent::ExecutionMode;

/// Deployment environment; production hides technical error details
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "test" => Ok(Self::Development),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Event bus tuning
#[derive(Debug, Clone, Copy)]
pub struct BusConfig {
    /// Per-channel cap on buffered events before the oldest is evicted
    pub buffer_capacity: usize,
    /// Interval between keep-alive checks on live sinks
    pub heartbeat_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 100,
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

/// Agent executor policy
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentConfig {
    pub mode: ExecutionMode,
    pub require_consent: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    pub environment: Environment,
    pub bus: BusConfig,
    /// How long a build waits for the client's event listener to attach
    pub connect_wait: Duration,
    pub agent: AgentConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("FORGE_DB_PATH").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.app-forge/forge.db")
        });

        let mode = if env_flag("FORGE_AGENT_READ_ONLY") {
            ExecutionMode::ReadOnly
        } else {
            ExecutionMode::ReadWrite
        };

        Self {
            port: env_or("FORGE_PORT", 8000),
            db_path,
            environment: env_or("FORGE_ENV", Environment::Development),
            bus: BusConfig {
                buffer_capacity: env_or("FORGE_BUS_BUFFER", 100),
                heartbeat_interval: Duration::from_secs(env_or("FORGE_HEARTBEAT_SECS", 15)),
            },
            connect_wait: Duration::from_millis(env_or("FORGE_CONNECT_WAIT_MS", 2000)),
            agent: AgentConfig {
                mode,
                require_consent: env_flag("FORGE_REQUIRE_CONSENT"),
            },
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "Ignoring unparseable setting");
            default
        }),
        Err(_) => default,
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
