//! RAN Controller Northbound Interfaces
//! 
//! This crate provides the REST client used to talk to the RAN controller,
//! together with the simulation transports that replay fixture files and log
//! outbound requests instead of sending them.

pub mod controller;
pub mod message_types;
pub mod stats_manager;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use controller::{ControllerApi, HttpController, LoggingController};
pub use message_types::StatsReport;
pub use stats_manager::{FixtureStatsSource, HttpStatsSource, StatsSource};

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Request to {url} returned status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Cannot read fixture {path}: {source}")]
    FixtureUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// How the app talks to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpMode {
    /// Replay fixture files and log outbound requests
    #[default]
    Test,
    /// Perform real HTTP calls
    Sdk,
}

impl fmt::Display for OpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpMode::Test => f.write_str("test"),
            OpMode::Sdk => f.write_str("sdk"),
        }
    }
}

impl FromStr for OpMode {
    type Err = InterfaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "test" => Ok(OpMode::Test),
            "sdk" => Ok(OpMode::Sdk),
            other => Err(InterfaceError::InvalidConfig(format!("Unknown operation mode: {}", other))),
        }
    }
}

/// Connection settings for the controller northbound API
#[derive(Debug, Clone)]
pub struct ControllerEndpoint {
    /// Base URL including the port, e.g. `http://localhost:9999`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ControllerEndpoint {
    /// Join a host URL and a port, tolerating a port already present in the URL
    pub fn new(url: &str, port: Option<u16>, timeout: Duration) -> Self {
        let url = url.trim_end_matches('/');
        let has_port = url
            .rsplit_once(':')
            .map(|(_, tail)| !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);

        let base_url = match port {
            Some(port) if !has_port => format!("{}:{}", url, port),
            _ => url.to_string(),
        };

        Self { base_url, timeout }
    }

    /// Full URL of an API path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Build the stats source and controller client for an operation mode
pub fn connect(
    mode: OpMode,
    endpoint: ControllerEndpoint,
    stats_fixture: PathBuf,
) -> Result<(Arc<dyn StatsSource>, Arc<dyn ControllerApi>), InterfaceError> {
    match mode {
        OpMode::Test => {
            if !stats_fixture.is_file() {
                return Err(InterfaceError::InvalidConfig(format!(
                    "Stats fixture {} not found",
                    stats_fixture.display()
                )));
            }
            Ok((
                Arc::new(FixtureStatsSource::new(stats_fixture)),
                Arc::new(LoggingController::new(endpoint)),
            ))
        }
        OpMode::Sdk => Ok((
            Arc::new(HttpStatsSource::new(endpoint.clone())?),
            Arc::new(HttpController::new(endpoint)?),
        )),
    }
}
