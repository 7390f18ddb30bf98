//! RRM Control Loop
//!
//! One cycle runs five ordered phases:
//!
//! 1. refresh the stats snapshot
//! 2. refresh the slice MCS caps from each cell's current policy
//! 3. estimate per-user RB demand
//! 4. aggregate demand into slice shares
//! 5. enforce the shares on the controller
//!
//! The next cycle starts a fixed interval after the previous one completed,
//! so cycles never overlap. The operator may change the slice count at any
//! time; it is read once at the start of each cycle.

use crate::enforcer::{EnforcementOutcome, PersistenceConfig, PolicyEnforcer};
use crate::estimator::{CellEstimate, RbEstimator};
use crate::policy::PolicyDocument;
use crate::slicing::{CellAllocation, SliceAggregator, SliceMcsCaps};
use crate::stats::{snapshot_from_report, DecodedReport};
use crate::RrmError;
use chrono::{DateTime, Utc};
use common::types::{BsId, OutOfRange, SliceCount};
use common::utils::LinkQuality;
use interfaces::{ControllerApi, StatsSource};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Control loop timing
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Pause between the end of a cycle and the start of the next
    pub interval: Duration,
    /// Pause before the first cycle
    pub initial_delay: Duration,
    /// Timeout of every controller request
    pub request_timeout: Duration,
    /// Stop after this many cycles; run until shutdown when `None`
    pub max_cycles: Option<u64>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            initial_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            max_cycles: None,
        }
    }
}

/// Operator-controlled slice count shared with the loop
#[derive(Debug, Clone, Default)]
pub struct SliceCountHandle(Arc<AtomicU8>);

impl SliceCountHandle {
    pub fn new(count: SliceCount) -> Self {
        Self(Arc::new(AtomicU8::new(count.value())))
    }

    /// Current slice count
    pub fn get(&self) -> SliceCount {
        SliceCount::new(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Request a new slice count; out-of-range values leave the count unchanged
    pub fn set(&self, value: u8) -> Result<SliceCount, OutOfRange> {
        let count = SliceCount::try_from(value)?;
        self.0.store(count.value(), Ordering::Release);
        Ok(count)
    }
}

/// What happened to one cell in a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CellReport {
    pub enb_id: usize,
    pub bs_id: BsId,
    pub num_users: usize,
    /// Link quality of the weakest user
    pub link_quality: Option<LinkQuality>,
    pub allocation: Option<CellAllocation>,
    pub outcome: EnforcementOutcome,
}

/// Summary of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub num_slices: SliceCount,
    pub cells: Vec<CellReport>,
}

impl CycleReport {
    /// Number of cells whose policy was applied
    pub fn applied(&self) -> usize {
        self.cells.iter().filter(|c| c.outcome.is_applied()).count()
    }
}

/// The RRM control loop
pub struct ControlLoop {
    stats_source: Arc<dyn StatsSource>,
    enforcer: PolicyEnforcer,
    estimator: RbEstimator,
    aggregator: SliceAggregator,
    /// Policy given to a cell seen for the first time
    template: PolicyDocument,
    /// Effective policy per base station
    policies: HashMap<BsId, PolicyDocument>,
    slice_count: SliceCountHandle,
    config: LoopConfig,
    cycle: u64,
}

impl ControlLoop {
    /// Create a new control loop
    pub fn new(
        stats_source: Arc<dyn StatsSource>,
        controller: Arc<dyn ControllerApi>,
        template: PolicyDocument,
        slice_count: SliceCountHandle,
        persistence: Option<PersistenceConfig>,
        config: LoopConfig,
    ) -> Self {
        let enforcer = PolicyEnforcer::new(controller, persistence, config.request_timeout);

        Self {
            stats_source,
            enforcer,
            estimator: RbEstimator::new(),
            aggregator: SliceAggregator::new(),
            template,
            policies: HashMap::new(),
            slice_count,
            config,
            cycle: 0,
        }
    }

    /// Effective policy of a base station, once it has been seen
    pub fn policy(&self, bs_id: BsId) -> Option<&PolicyDocument> {
        self.policies.get(&bs_id)
    }

    /// Run one cycle
    ///
    /// A failed stats fetch aborts the cycle. Anything else, malformed stats
    /// included, is confined to its cell and reported in the [`CycleReport`].
    pub async fn run_cycle(&mut self) -> Result<CycleReport, RrmError> {
        self.cycle += 1;
        let started_at = Utc::now();
        let num_slices = self.slice_count.get();
        info!(
            "Cycle {} started at {} with {} slice(s)",
            self.cycle,
            started_at.to_rfc3339(),
            num_slices.value()
        );

        // Phase 1: stats
        let report = tokio::time::timeout(self.config.request_timeout, self.stats_source.fetch())
            .await
            .map_err(|_| RrmError::Timeout("stats fetch", self.config.request_timeout))??;
        let DecodedReport { snapshot, rejected } = snapshot_from_report(&report);
        debug!(
            "Snapshot with {} cell(s), {} user(s), {} rejected",
            snapshot.cells.len(),
            snapshot.num_users(),
            rejected.len()
        );

        // Phase 2: slice MCS caps from the current policies
        let caps: Vec<Result<SliceMcsCaps, RrmError>> = snapshot
            .cells
            .iter()
            .map(|stats| {
                self.policies
                    .entry(stats.cell.bs_id)
                    .or_insert_with(|| self.template.clone())
                    .mcs_caps()
            })
            .collect();

        // Phase 3: per-user estimates
        let estimates: Vec<CellEstimate> = snapshot
            .cells
            .iter()
            .map(|stats| self.estimator.estimate(stats))
            .collect();

        // Phase 4: slice allocation
        let allocations: Vec<Result<CellAllocation, RrmError>> = snapshot
            .cells
            .iter()
            .zip(estimates.iter())
            .zip(caps)
            .map(|((stats, estimate), caps)| {
                caps.map(|caps| self.aggregator.aggregate(&stats.cell, estimate, num_slices, &caps))
            })
            .collect();

        // Phase 5: enforcement
        let mut cells = Vec::with_capacity(snapshot.cells.len());
        for (stats, allocation) in snapshot.cells.iter().zip(allocations) {
            let link_quality = stats.min_dl_cqi().map(LinkQuality::from_min_cqi);
            if let Some(quality) = link_quality {
                info!("eNB {}: {} link quality", stats.cell.enb_id, quality);
            }

            let (allocation, outcome) = match allocation {
                Ok(allocation) => {
                    let current = self
                        .policies
                        .entry(stats.cell.bs_id)
                        .or_insert_with(|| self.template.clone());
                    let outcome = self.enforcer.enforce(current, stats, &allocation).await;
                    (Some(allocation), outcome)
                }
                Err(e) => {
                    warn!("eNB {}: cannot read slice caps: {}", stats.cell.enb_id, e);
                    (None, EnforcementOutcome::Failed(e.to_string()))
                }
            };

            cells.push(CellReport {
                enb_id: stats.cell.enb_id,
                bs_id: stats.cell.bs_id,
                num_users: stats.users.len(),
                link_quality,
                allocation,
                outcome,
            });
        }

        for cell in rejected {
            cells.push(CellReport {
                enb_id: cell.enb_id,
                bs_id: cell.bs_id,
                num_users: 0,
                link_quality: None,
                allocation: None,
                outcome: EnforcementOutcome::Failed(cell.error.to_string()),
            });
        }
        cells.sort_by_key(|cell| cell.enb_id);

        let report = CycleReport {
            cycle: self.cycle,
            started_at,
            num_slices,
            cells,
        };
        info!(
            "Cycle {} done: {} of {} cell(s) applied",
            report.cycle,
            report.applied(),
            report.cells.len()
        );
        Ok(report)
    }

    /// Run cycles until shutdown or the configured cycle count
    ///
    /// Shutdown is observed between cycles only, so an in-flight cycle
    /// always completes. Returns the number of cycles run.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!("Starting control loop, stats from {}", self.stats_source.describe());

        if !self.config.initial_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.config.initial_delay) => {}
                _ = shutdown.changed() => {
                    info!("Shutdown requested before the first cycle");
                    return 0;
                }
            }
        }

        let mut completed = 0;
        loop {
            if *shutdown.borrow() {
                info!("Shutdown requested");
                break;
            }

            if let Err(e) = self.run_cycle().await {
                error!("Cycle {} aborted: {}", self.cycle, e);
            }
            completed += 1;

            if self.config.max_cycles.is_some_and(|max| completed >= max) {
                info!("Completed {} cycle(s)", completed);
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = shutdown.changed() => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enforcer::tests::MockController;
    use crate::enforcer::SkipReason;
    use crate::policy::PolicyFormat;
    use async_trait::async_trait;
    use common::types::{Direction, SliceId};
    use common::utils::shares_equal;
    use interfaces::{InterfaceError, StatsReport};
    use std::sync::atomic::AtomicUsize;

    const ALL_STATS: &str = include_str!("../../rrm-app/fixtures/all_stats.json");

    /// Stats source serving a fixed report, or failing
    struct StaticStats {
        report: Option<StatsReport>,
        fetches: AtomicUsize,
    }

    impl StaticStats {
        fn fixture() -> Self {
            Self {
                report: Some(serde_json::from_str(ALL_STATS).unwrap()),
                fetches: AtomicUsize::new(0),
            }
        }

        fn with_report(report: StatsReport) -> Self {
            Self {
                report: Some(report),
                fetches: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                report: None,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StatsSource for StaticStats {
        async fn fetch(&self) -> Result<StatsReport, InterfaceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.report.clone().ok_or_else(|| InterfaceError::UnexpectedStatus {
                url: "mock/stats".to_string(),
                status: 503,
            })
        }

        fn describe(&self) -> String {
            "static stats".to_string()
        }
    }

    fn control_loop(
        stats: Arc<StaticStats>,
        controller: Arc<MockController>,
        slices: u8,
        persistence: Option<PersistenceConfig>,
        max_cycles: Option<u64>,
    ) -> ControlLoop {
        ControlLoop::new(
            stats,
            controller,
            PolicyDocument::default(),
            SliceCountHandle::new(SliceCount::new(slices).unwrap()),
            persistence,
            LoopConfig {
                interval: Duration::from_millis(1),
                max_cycles,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_cycle_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(MockController::default());
        let persistence = PersistenceConfig {
            output_dir: dir.path().to_path_buf(),
            basename: "enb_scheduling_policy".to_string(),
            format: PolicyFormat::Yaml,
        };
        let mut rrm = control_loop(Arc::new(StaticStats::fixture()), controller.clone(), 2, Some(persistence), None);

        let report = rrm.run_cycle().await.unwrap();
        assert_eq!(report.cycle, 1);
        assert_eq!(report.cells.len(), 2);
        assert_eq!(report.applied(), 1);

        let busy = &report.cells[0];
        assert_eq!(busy.bs_id, BsId(234881024));
        assert_eq!(busy.link_quality, Some(LinkQuality::Medium));
        let persisted = dir.path().join("enb_scheduling_policy_4964.yaml");
        assert_eq!(busy.outcome, EnforcementOutcome::Applied { persisted: Some(persisted.clone()) });

        // 38 DL RBs for the 1500 byte queue, 2 UL RBs floored to 0.1
        let allocation = busy.allocation.as_ref().unwrap();
        assert_eq!(allocation.slices[0].dl_demand, 38);
        assert!(shares_equal(allocation.slices[0].dl_share, 0.69));
        assert!(shares_equal(allocation.slices[1].dl_share, 0.31));
        assert!(shares_equal(allocation.slices[0].ul_share, 0.55));

        let policy = rrm.policy(BsId(234881024)).unwrap();
        assert!(shares_equal(policy.slice_rb(SliceId::new(1).unwrap(), Direction::Dl).unwrap(), 0.31));
        assert_eq!(policy.num_slices(Direction::Ul).unwrap().value(), 2);
        assert_eq!(&PolicyDocument::load(&persisted).unwrap(), policy);

        let idle = &report.cells[1];
        assert_eq!(idle.num_users, 0);
        assert_eq!(idle.link_quality, None);
        assert_eq!(idle.outcome, EnforcementOutcome::Skipped(SkipReason::NoUsers));
        assert_eq!(rrm.policy(BsId(234881025)), Some(&PolicyDocument::default()));

        assert_eq!(controller.push_count(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    /// Fixture report with a copy of the busy user attached to the idle cell
    fn both_cells_busy(idle_cqi: u8) -> StatsReport {
        let mut report: StatsReport = serde_json::from_str(ALL_STATS).unwrap();
        let mut ue = report.mac_stats[0].ue_mac_stats[0].clone();
        ue.rnti = 3001;
        if let Some(csi) = ue.mac_stats.dl_cqi_report.as_mut() {
            csi.csi_report[0].p10csi.as_mut().unwrap().wb_cqi = idle_cqi;
        }
        report.mac_stats[1].ue_mac_stats.push(ue);
        report
    }

    #[tokio::test]
    async fn test_malformed_cell_does_not_block_others() {
        let controller = Arc::new(MockController::default());
        let stats = Arc::new(StaticStats::with_report(both_cells_busy(16)));
        let mut rrm = control_loop(stats, controller.clone(), 2, None, None);

        let report = rrm.run_cycle().await.unwrap();
        assert_eq!(report.cells.len(), 2);
        assert!(report.cells[0].outcome.is_applied());

        let bad = &report.cells[1];
        assert_eq!(bad.bs_id, BsId(234881025));
        assert_eq!(bad.allocation, None);
        match &bad.outcome {
            EnforcementOutcome::Failed(reason) => assert!(reason.contains("CQI 16")),
            other => panic!("unexpected outcome {:?}", other),
        }

        let pushes = controller.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].0, BsId(234881024));
    }

    #[tokio::test]
    async fn test_rejected_push_confined_to_its_cell() {
        let controller = Arc::new(MockController::failing_for(BsId(234881025), 500));
        let stats = Arc::new(StaticStats::with_report(both_cells_busy(10)));
        let mut rrm = control_loop(stats, controller.clone(), 2, None, None);

        let report = rrm.run_cycle().await.unwrap();
        assert_eq!(report.applied(), 1);
        assert!(report.cells[0].outcome.is_applied());
        assert_eq!(report.cells[1].num_users, 1);
        assert!(report.cells[1].allocation.is_some());
        assert!(matches!(report.cells[1].outcome, EnforcementOutcome::Failed(_)));

        assert_eq!(controller.push_count(), 2);
        assert_ne!(rrm.policy(BsId(234881024)), Some(&PolicyDocument::default()));
        assert_eq!(rrm.policy(BsId(234881025)), Some(&PolicyDocument::default()));
    }

    #[tokio::test]
    async fn test_repeated_cycles_are_stable() {
        let controller = Arc::new(MockController::default());
        let mut rrm = control_loop(Arc::new(StaticStats::fixture()), controller.clone(), 3, None, None);

        let first = rrm.run_cycle().await.unwrap();
        let second = rrm.run_cycle().await.unwrap();

        assert_eq!(second.cycle, 2);
        assert_eq!(first.cells[0].allocation, second.cells[0].allocation);
        assert_eq!(controller.push_count(), 2);
    }

    #[tokio::test]
    async fn test_zero_slices_disable_enforcement() {
        let controller = Arc::new(MockController::default());
        let mut rrm = control_loop(Arc::new(StaticStats::fixture()), controller.clone(), 0, None, None);

        let report = rrm.run_cycle().await.unwrap();
        assert_eq!(report.cells[0].outcome, EnforcementOutcome::Skipped(SkipReason::NoSlices));
        assert_eq!(controller.push_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_push_keeps_previous_policy() {
        let controller = Arc::new(MockController::failing(404));
        let mut rrm = control_loop(Arc::new(StaticStats::fixture()), controller.clone(), 2, None, None);

        let report = rrm.run_cycle().await.unwrap();
        assert!(matches!(report.cells[0].outcome, EnforcementOutcome::Failed(_)));
        assert_eq!(rrm.policy(BsId(234881024)), Some(&PolicyDocument::default()));
    }

    #[tokio::test]
    async fn test_operator_slice_count_applies_next_cycle() {
        let controller = Arc::new(MockController::default());
        let handle = SliceCountHandle::new(SliceCount::new(1).unwrap());
        let mut rrm = ControlLoop::new(
            Arc::new(StaticStats::fixture()),
            controller,
            PolicyDocument::default(),
            handle.clone(),
            None,
            LoopConfig::default(),
        );

        assert_eq!(rrm.run_cycle().await.unwrap().num_slices.value(), 1);

        assert!(handle.set(5).is_err());
        assert_eq!(handle.get().value(), 1);

        handle.set(3).unwrap();
        let report = rrm.run_cycle().await.unwrap();
        assert_eq!(report.num_slices.value(), 3);
        assert_eq!(report.cells[0].allocation.as_ref().unwrap().slices.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_fetch_does_not_stop_loop() {
        let stats = Arc::new(StaticStats::failing());
        let controller = Arc::new(MockController::default());
        let mut rrm = control_loop(stats.clone(), controller.clone(), 2, None, Some(3));

        assert!(matches!(rrm.run_cycle().await, Err(RrmError::Interface(_))));

        let (_tx, rx) = watch::channel(false);
        assert_eq!(rrm.run(rx).await, 3);
        assert_eq!(stats.fetches.load(Ordering::SeqCst), 4);
        assert_eq!(controller.push_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let controller = Arc::new(MockController::default());
        let rrm = control_loop(Arc::new(StaticStats::fixture()), controller.clone(), 2, None, None);

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        assert_eq!(rrm.run(rx).await, 0);
        assert_eq!(controller.push_count(), 0);
    }
}
