//! Radio Resource Management Core
//! 
//! Estimates per-user resource block demand from buffer and channel quality
//! reports, folds it into per-slice shares and enforces the resulting slice
//! policy on the RAN controller, once per control cycle.

pub mod control_loop;
pub mod enforcer;
pub mod estimator;
pub mod link_adaptation;
pub mod policy;
pub mod slicing;
pub mod stats;

use common::types::{Direction, OutOfRange};
use interfaces::InterfaceError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub use control_loop::{ControlLoop, CycleReport, LoopConfig, SliceCountHandle};
pub use enforcer::{EnforcementOutcome, PersistenceConfig, PolicyEnforcer};
pub use estimator::{CellEstimate, RbEstimator, UserEstimate};
pub use policy::{PolicyDocument, PolicyFormat};
pub use slicing::{CellAllocation, SliceAggregator, SliceAllocation};

/// Errors of the RRM core
#[derive(Error, Debug)]
pub enum RrmError {
    #[error("Out of range: {0}")]
    OutOfRange(#[from] OutOfRange),

    #[error("RB share {0} outside [0, 1]")]
    InvalidShare(f64),

    #[error("Policy has no {0} scheduler section")]
    MissingScheduler(Direction),

    #[error("Malformed stats: {0}")]
    MalformedStats(String),

    #[error("Policy YAML error: {0}")]
    PolicyYaml(#[from] serde_yaml::Error),

    #[error("Policy JSON error: {0}")]
    PolicyJson(#[from] serde_json::Error),

    #[error("Cannot access policy file {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Interface error: {0}")]
    Interface(#[from] InterfaceError),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, Duration),
}
