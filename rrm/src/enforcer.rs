//! Policy Enforcer
//!
//! Turns a cell allocation into a policy document, pushes it to the
//! controller and persists it. The cell's effective document only changes
//! after the controller accepted the push.

use crate::policy::{PolicyDocument, PolicyFormat};
use crate::slicing::CellAllocation;
use crate::RrmError;
use common::snapshot::CellStats;
use interfaces::ControllerApi;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where and how applied policies are written
///
/// Files are named `<basename>_<sfn>.<ext>` after the cell's system frame
/// number and are never overwritten. The frame number wraps, so in a long
/// run an enforcement landing on an already used number is pushed but not
/// written; the audit trail then has a gap, reported as
/// `Applied { persisted: None }` and an error log line.
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub output_dir: PathBuf,
    pub basename: String,
    pub format: PolicyFormat,
}

/// Why a cell was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No attached users
    NoUsers,
    /// Slicing disabled (zero slices)
    NoSlices,
}

/// Result of enforcing one cell
#[derive(Debug, Clone, PartialEq)]
pub enum EnforcementOutcome {
    /// Controller accepted the policy; `persisted` is the written file, if any
    Applied { persisted: Option<PathBuf> },
    Skipped(SkipReason),
    /// Nothing changed on the controller side
    Failed(String),
}

impl EnforcementOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EnforcementOutcome::Applied { .. })
    }
}

/// Pushes slice policies to the controller
pub struct PolicyEnforcer {
    controller: Arc<dyn ControllerApi>,
    persistence: Option<PersistenceConfig>,
    push_timeout: Duration,
}

impl PolicyEnforcer {
    /// Create a new enforcer
    pub fn new(
        controller: Arc<dyn ControllerApi>,
        persistence: Option<PersistenceConfig>,
        push_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            persistence,
            push_timeout,
        }
    }

    /// Enforce an allocation on one cell
    ///
    /// `current` is replaced by the pushed document on success and left
    /// untouched otherwise.
    pub async fn enforce(
        &self,
        current: &mut PolicyDocument,
        stats: &CellStats,
        allocation: &CellAllocation,
    ) -> EnforcementOutcome {
        let cell = &stats.cell;

        if stats.users.is_empty() {
            info!("eNB {}: no attached users, skipping enforcement", cell.enb_id);
            return EnforcementOutcome::Skipped(SkipReason::NoUsers);
        }
        if allocation.is_empty() {
            info!("eNB {}: slicing disabled, skipping enforcement", cell.enb_id);
            return EnforcementOutcome::Skipped(SkipReason::NoSlices);
        }

        let candidate = match self.push(current, allocation).await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!("eNB {} (bs_id {}): policy not applied: {}", cell.enb_id, cell.bs_id, e);
                return EnforcementOutcome::Failed(e.to_string());
            }
        };

        *current = candidate;
        info!("eNB {} (bs_id {}): policy applied", cell.enb_id, cell.bs_id);

        let persisted = self.persist(current, cell.sfn);
        EnforcementOutcome::Applied { persisted }
    }

    async fn push(
        &self,
        current: &PolicyDocument,
        allocation: &CellAllocation,
    ) -> Result<PolicyDocument, RrmError> {
        let candidate = current.apply_allocation(allocation)?;
        let body = candidate.dump(PolicyFormat::Yaml)?;
        debug!("Policy for bs_id {}:\n{}", allocation.bs_id, body);

        tokio::time::timeout(
            self.push_timeout,
            self.controller.push_policy(allocation.bs_id, &body),
        )
        .await
        .map_err(|_| RrmError::Timeout("policy push", self.push_timeout))??;

        Ok(candidate)
    }

    fn persist(&self, doc: &PolicyDocument, sequence: u32) -> Option<PathBuf> {
        let config = self.persistence.as_ref()?;
        match doc.save(&config.output_dir, &config.basename, sequence, config.format) {
            Ok(path) => {
                info!("Policy saved to {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("Failed to persist policy: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::slicing::SliceAllocation;
    use async_trait::async_trait;
    use common::snapshot::{CellSnapshot, UserSnapshot};
    use common::types::{BsId, ControlAction, Cqi, Direction, Mcs, RrcTrigger, Rnti, SchedulerFunction, SliceCount, SliceId};
    use interfaces::InterfaceError;
    use std::sync::Mutex;

    /// Controller double recording pushes and answering with a fixed status
    #[derive(Default)]
    pub(crate) struct MockController {
        pub pushes: Mutex<Vec<(BsId, String)>>,
        pub status: Option<u16>,
        /// Only these base stations get `status`; all of them when empty
        pub failing_bs: Vec<BsId>,
        pub delay: Option<Duration>,
    }

    impl MockController {
        pub fn failing(status: u16) -> Self {
            Self {
                status: Some(status),
                ..Default::default()
            }
        }

        pub fn failing_for(bs_id: BsId, status: u16) -> Self {
            Self {
                status: Some(status),
                failing_bs: vec![bs_id],
                ..Default::default()
            }
        }

        pub fn push_count(&self) -> usize {
            self.pushes.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ControllerApi for MockController {
        async fn push_policy(&self, bs_id: BsId, body: &str) -> Result<(), InterfaceError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.pushes.lock().unwrap().push((bs_id, body.to_string()));
            let targeted = self.failing_bs.is_empty() || self.failing_bs.contains(&bs_id);
            match self.status.filter(|_| targeted) {
                Some(status) => Err(InterfaceError::UnexpectedStatus {
                    url: format!("mock/{}", bs_id),
                    status,
                }),
                None => Ok(()),
            }
        }

        async fn trigger_rrc_measurement(&self, _trigger: RrcTrigger) -> Result<(), InterfaceError> {
            Ok(())
        }

        async fn delegate_scheduler(
            &self,
            _func: SchedulerFunction,
            _action: ControlAction,
        ) -> Result<(), InterfaceError> {
            Ok(())
        }
    }

    fn stats(num_users: usize) -> CellStats {
        let users = (0..num_users)
            .map(|ue_id| UserSnapshot {
                enb_id: 0,
                ue_id,
                rnti: Rnti(ue_id as u16),
                dl_cqi: Cqi::new(10).unwrap(),
                phr: 40,
                channels: vec![],
            })
            .collect();

        CellStats {
            cell: CellSnapshot::new(0, BsId(42), 1234, 100, 100, true),
            users,
        }
    }

    fn allocation() -> CellAllocation {
        let slice = |id, dl_share, ul_share| SliceAllocation {
            slice: SliceId::new(id).unwrap(),
            dl_share,
            ul_share,
            dl_demand: 0,
            ul_demand: 0,
            dl_max_mcs: Mcs::QAM64_CEILING,
            ul_max_mcs: Mcs::QAM16_CEILING,
        };

        CellAllocation {
            enb_id: 0,
            bs_id: BsId(42),
            num_slices: SliceCount::new(2).unwrap(),
            slices: vec![slice(0, 0.69, 0.55), slice(1, 0.31, 0.45)],
        }
    }

    fn persistence(dir: &std::path::Path) -> Option<PersistenceConfig> {
        Some(PersistenceConfig {
            output_dir: dir.to_path_buf(),
            basename: "enb_policy".to_string(),
            format: PolicyFormat::Yaml,
        })
    }

    #[tokio::test]
    async fn test_applied_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(MockController::default());
        let enforcer = PolicyEnforcer::new(controller.clone(), persistence(dir.path()), Duration::from_secs(1));

        let mut current = PolicyDocument::default();
        let outcome = enforcer.enforce(&mut current, &stats(1), &allocation()).await;

        let expected = dir.path().join("enb_policy_1234.yaml");
        assert_eq!(outcome, EnforcementOutcome::Applied { persisted: Some(expected.clone()) });
        assert_eq!(current.slice_rb(SliceId::new(0).unwrap(), Direction::Dl).unwrap(), 0.69);
        assert_eq!(PolicyDocument::load(&expected).unwrap(), current);

        let pushes = controller.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, BsId(42));
        assert_eq!(PolicyDocument::parse(&pushes[0].1, PolicyFormat::Yaml).unwrap(), current);
    }

    #[tokio::test]
    async fn test_no_users_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(MockController::default());
        let enforcer = PolicyEnforcer::new(controller.clone(), persistence(dir.path()), Duration::from_secs(1));

        let mut current = PolicyDocument::default();
        let outcome = enforcer.enforce(&mut current, &stats(0), &allocation()).await;

        assert_eq!(outcome, EnforcementOutcome::Skipped(SkipReason::NoUsers));
        assert_eq!(current, PolicyDocument::default());
        assert_eq!(controller.push_count(), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_push_keeps_policy() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(MockController::failing(500));
        let enforcer = PolicyEnforcer::new(controller.clone(), persistence(dir.path()), Duration::from_secs(1));

        let mut current = PolicyDocument::default();
        let outcome = enforcer.enforce(&mut current, &stats(2), &allocation()).await;

        assert!(matches!(outcome, EnforcementOutcome::Failed(_)));
        assert_eq!(current, PolicyDocument::default());
        assert_eq!(controller.push_count(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_allocation_not_pushed() {
        let controller = Arc::new(MockController::default());
        let enforcer = PolicyEnforcer::new(controller.clone(), None, Duration::from_secs(1));

        let mut bad = allocation();
        bad.slices[1].ul_share = 1.7;

        let mut current = PolicyDocument::default();
        let outcome = enforcer.enforce(&mut current, &stats(1), &bad).await;

        assert!(matches!(outcome, EnforcementOutcome::Failed(_)));
        assert_eq!(controller.push_count(), 0);
        assert_eq!(current, PolicyDocument::default());
    }

    #[tokio::test]
    async fn test_push_timeout() {
        let controller = Arc::new(MockController {
            delay: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let enforcer = PolicyEnforcer::new(controller, None, Duration::from_millis(20));

        let mut current = PolicyDocument::default();
        let outcome = enforcer.enforce(&mut current, &stats(1), &allocation()).await;

        match outcome {
            EnforcementOutcome::Failed(reason) => assert!(reason.contains("timed out")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(current, PolicyDocument::default());
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_push() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(MockController::default());
        let enforcer = PolicyEnforcer::new(controller, persistence(dir.path()), Duration::from_secs(1));

        std::fs::write(dir.path().join("enb_policy_1234.yaml"), "taken").unwrap();

        let mut current = PolicyDocument::default();
        let outcome = enforcer.enforce(&mut current, &stats(1), &allocation()).await;

        assert_eq!(outcome, EnforcementOutcome::Applied { persisted: None });
        assert_ne!(current, PolicyDocument::default());
        assert_eq!(std::fs::read_to_string(dir.path().join("enb_policy_1234.yaml")).unwrap(), "taken");
    }
}
