//! Stats Manager Client
//!
//! Pulls the RAN statistics report, either from the controller over HTTP or
//! from a fixture file in simulation mode.

use crate::{ControllerEndpoint, InterfaceError, StatsReport};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Stats API endpoint returning eNB config and MAC stats together
pub const ALL_STATS_API: &str = "/stats_manager/json/all";

/// Source of RAN statistics reports
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Fetch the latest report
    async fn fetch(&self) -> Result<StatsReport, InterfaceError>;

    /// Human readable origin of the reports, used in logs
    fn describe(&self) -> String;
}

/// Stats source reading the controller REST API
#[derive(Debug, Clone)]
pub struct HttpStatsSource {
    client: reqwest::Client,
    endpoint: ControllerEndpoint,
}

impl HttpStatsSource {
    /// Create a new HTTP stats source
    pub fn new(endpoint: ControllerEndpoint) -> Result<Self, InterfaceError> {
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl StatsSource for HttpStatsSource {
    async fn fetch(&self) -> Result<StatsReport, InterfaceError> {
        let url = self.endpoint.url(ALL_STATS_API);
        info!("The request url is: {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                InterfaceError::Timeout { url: url.clone(), timeout: self.endpoint.timeout }
            } else {
                InterfaceError::HttpError(e)
            }
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(InterfaceError::UnexpectedStatus { url, status: status.as_u16() });
        }

        let report: StatsReport = response.json().await?;
        debug!("Stats report with {} eNB(s)", report.enb_config.len());
        Ok(report)
    }

    fn describe(&self) -> String {
        self.endpoint.url(ALL_STATS_API)
    }
}

/// Stats source replaying a canned JSON or YAML report
#[derive(Debug, Clone)]
pub struct FixtureStatsSource {
    path: PathBuf,
}

impl FixtureStatsSource {
    /// Create a fixture source for the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the fixture file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse a report, choosing YAML for `.yaml`/`.yml` files and JSON otherwise
pub fn parse_report(path: &Path, contents: &str) -> Result<StatsReport, InterfaceError> {
    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    if is_yaml {
        Ok(serde_yaml::from_str(contents)?)
    } else {
        Ok(serde_json::from_str(contents)?)
    }
}

#[async_trait]
impl StatsSource for FixtureStatsSource {
    async fn fetch(&self) -> Result<StatsReport, InterfaceError> {
        debug!("Reading stats fixture {}", self.path.display());

        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| InterfaceError::FixtureUnavailable {
                path: self.path.clone(),
                source,
            })?;

        parse_report(&self.path, &contents)
    }

    fn describe(&self) -> String {
        format!("fixture {}", self.path.display())
    }
}
