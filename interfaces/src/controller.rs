//! Controller Command Client
//!
//! Outbound calls to the RAN controller: slice policy push, RRC measurement
//! triggers and scheduler delegation. The HTTP client performs the calls; the
//! logging client used in simulation mode only reports them.

use crate::{ControllerEndpoint, InterfaceError};
use async_trait::async_trait;
use common::types::{BsId, ControlAction, RrcTrigger, SchedulerFunction};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Cell-scoped policy endpoint
pub fn policy_path(bs_id: BsId) -> String {
    format!("/rrm_config/enb/{}", bs_id)
}

/// RRC measurement trigger endpoint
pub fn rrc_trigger_path(trigger: RrcTrigger) -> String {
    format!("/rrc_trigger/{}", trigger.path_segment())
}

/// Scheduler delegation endpoint (`/1` delegates to the agent, `/0` pulls back)
pub fn delegation_path(func: SchedulerFunction, action: ControlAction) -> String {
    format!("/{}/{}", func.path_segment(), action as u8)
}

/// Commands the RRM app sends to the controller
#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// Push a serialized policy document for one base station
    async fn push_policy(&self, bs_id: BsId, body: &str) -> Result<(), InterfaceError>;

    /// Ask the agents to start RRC measurements
    async fn trigger_rrc_measurement(&self, trigger: RrcTrigger) -> Result<(), InterfaceError>;

    /// Move a scheduler function between controller and agent
    async fn delegate_scheduler(
        &self,
        func: SchedulerFunction,
        action: ControlAction,
    ) -> Result<(), InterfaceError>;
}

/// Controller client issuing real HTTP requests
#[derive(Debug, Clone)]
pub struct HttpController {
    client: reqwest::Client,
    endpoint: ControllerEndpoint,
}

impl HttpController {
    /// Create a new HTTP controller client
    pub fn new(endpoint: ControllerEndpoint) -> Result<Self, InterfaceError> {
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()?;

        Ok(Self { client, endpoint })
    }

    async fn post(&self, path: &str, body: Option<&str>) -> Result<(), InterfaceError> {
        let url = self.endpoint.url(path);
        debug!("POST {}", url);

        let mut request = self.client.post(&url);
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let response = request.send().await.map_err(|e| {
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

        info!("POST {} succeeded", url);
        Ok(())
    }
}

#[async_trait]
impl ControllerApi for HttpController {
    async fn push_policy(&self, bs_id: BsId, body: &str) -> Result<(), InterfaceError> {
        self.post(&policy_path(bs_id), Some(body)).await
    }

    async fn trigger_rrc_measurement(&self, trigger: RrcTrigger) -> Result<(), InterfaceError> {
        self.post(&rrc_trigger_path(trigger), None).await
    }

    async fn delegate_scheduler(
        &self,
        func: SchedulerFunction,
        action: ControlAction,
    ) -> Result<(), InterfaceError> {
        self.post(&delegation_path(func, action), None).await
    }
}

/// Simulation controller: logs requests instead of sending them
#[derive(Debug)]
pub struct LoggingController {
    endpoint: ControllerEndpoint,
    sent: AtomicU64,
}

impl LoggingController {
    /// Create a new logging controller
    pub fn new(endpoint: ControllerEndpoint) -> Self {
        Self {
            endpoint,
            sent: AtomicU64::new(0),
        }
    }

    /// Number of requests logged so far
    pub fn request_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn record(&self, path: &str, body: Option<&str>) {
        let url = self.endpoint.url(path);
        let seq = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!("POST {} (simulated request {})", url, seq);
        if let Some(body) = body {
            debug!("{}", body);
        }
    }
}

#[async_trait]
impl ControllerApi for LoggingController {
    async fn push_policy(&self, bs_id: BsId, body: &str) -> Result<(), InterfaceError> {
        self.record(&policy_path(bs_id), Some(body));
        Ok(())
    }

    async fn trigger_rrc_measurement(&self, trigger: RrcTrigger) -> Result<(), InterfaceError> {
        self.record(&rrc_trigger_path(trigger), None);
        Ok(())
    }

    async fn delegate_scheduler(
        &self,
        func: SchedulerFunction,
        action: ControlAction,
    ) -> Result<(), InterfaceError> {
        debug!("Action: {:?} {} between controller and agent", action, func.path_segment());
        self.record(&delegation_path(func, action), None);
        Ok(())
    }
}
