//! Controller and per-session settings.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::ValueEnum;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:6633";
pub const DEFAULT_RULES_PATH: &str = "firewall.txt";

/// How a session forwards packets it has no flow for. Chosen once per session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ForwardingMode {
    /// Flood every packet; learn nothing.
    Hub,
    /// Learn source ports and install flows toward known destinations.
    #[default]
    Switch,
}

/// Settings every switch session is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Firewall policy file, read once when a switch connects.
    pub rules_path: PathBuf,
    pub mode: ForwardingMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rules_path: PathBuf::from(DEFAULT_RULES_PATH),
            mode: ForwardingMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable output (development).
    #[default]
    Text,
    /// Flattened JSON lines (log aggregators).
    Json,
}

/// Everything the controller binary needs to run.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub listen: SocketAddr,
    pub session: SessionConfig,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
}
