//! Resource Block Estimator
//!
//! Estimates how many RBs each user needs per direction to drain its
//! buffers in one TTI. Users are served first come, first served: every
//! user's requirement is taken out of the cell budget before the next user
//! is estimated, so the total never exceeds the cell capacity.

use crate::link_adaptation::{itbs_from_mcs, mcs_from_cqi, tbs_bits, tbs_bytes, bsr_bytes, MAX_RB};
use common::snapshot::{CellStats, LogicalChannelReport, UserSnapshot};
use common::types::{BsId, Direction, Mcs, Rnti};
use common::utils::throughput_mbps;
use tracing::{debug, info};

/// Uplink MCS assumed for every user until PHR-based adaptation exists
pub const ASSUMED_UL_MCS: u8 = 8;

/// Smallest allocation given to a logical channel
pub const MIN_RB_ALLOCATION: u32 = 2;

/// Allocation granularity
pub const RB_STEP: u32 = 2;

/// Estimate for one user in one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEstimate {
    pub mcs: Mcs,
    pub itbs: u8,
    /// RBs needed over all data logical channels
    pub rb: u32,
    /// Transport block size at `rb`, in bits
    pub tbs_bits: u32,
}

impl LinkEstimate {
    /// Expected throughput in Mbps
    pub fn throughput_mbps(&self) -> f64 {
        throughput_mbps(self.tbs_bits)
    }
}

/// Estimate for one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEstimate {
    pub ue_id: usize,
    pub rnti: Rnti,
    pub dl: LinkEstimate,
    pub ul: LinkEstimate,
}

impl UserEstimate {
    /// Estimate for a direction
    pub fn link(&self, dir: Direction) -> &LinkEstimate {
        match dir {
            Direction::Dl => &self.dl,
            Direction::Ul => &self.ul,
        }
    }
}

/// Estimates of all users in a cell, in `ue_id` order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellEstimate {
    pub enb_id: usize,
    pub bs_id: BsId,
    pub users: Vec<UserEstimate>,
}

impl CellEstimate {
    /// Total RBs requested in a direction
    pub fn demand(&self, dir: Direction) -> u32 {
        self.users.iter().map(|ue| ue.link(dir).rb).sum()
    }
}

/// RB estimator
#[derive(Debug, Clone)]
pub struct RbEstimator {
    /// MCS used for every uplink estimate
    ul_mcs: Mcs,
}

impl Default for RbEstimator {
    fn default() -> Self {
        Self {
            ul_mcs: Mcs::new(ASSUMED_UL_MCS).unwrap_or(Mcs::QAM16_CEILING),
        }
    }
}

impl RbEstimator {
    /// Create an estimator with the default uplink MCS
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the assumed uplink MCS
    pub fn with_ul_mcs(ul_mcs: Mcs) -> Self {
        Self { ul_mcs }
    }

    /// Estimate the RB requirement of every user in a cell
    pub fn estimate(&self, stats: &CellStats) -> CellEstimate {
        let mut dl_remaining = stats.cell.rb_capacity(Direction::Dl).min(MAX_RB);
        let mut ul_remaining = stats.cell.rb_capacity(Direction::Ul).min(MAX_RB);

        let mut users = Vec::with_capacity(stats.users.len());
        for ue in &stats.users {
            let dl = self.estimate_link(ue, Direction::Dl, dl_remaining);
            let ul = self.estimate_link(ue, Direction::Ul, ul_remaining);
            dl_remaining -= dl.rb;
            ul_remaining -= ul.rb;

            info!(
                "eNB {} UE {} (rnti {}): DL {} RBs at MCS {} ({:.3} Mbps), UL {} RBs at MCS {} ({:.3} Mbps)",
                stats.cell.enb_id,
                ue.ue_id,
                ue.rnti.value(),
                dl.rb,
                dl.mcs,
                dl.throughput_mbps(),
                ul.rb,
                ul.mcs,
                ul.throughput_mbps()
            );

            users.push(UserEstimate {
                ue_id: ue.ue_id,
                rnti: ue.rnti,
                dl,
                ul,
            });
        }

        debug!(
            "eNB {}: {} DL and {} UL RBs left after estimation",
            stats.cell.enb_id, dl_remaining, ul_remaining
        );

        CellEstimate {
            enb_id: stats.cell.enb_id,
            bs_id: stats.cell.bs_id,
            users,
        }
    }

    fn link_mcs(&self, ue: &UserSnapshot, dir: Direction) -> Mcs {
        match dir {
            Direction::Dl => mcs_from_cqi(ue.dl_cqi),
            Direction::Ul => self.ul_mcs,
        }
    }

    fn estimate_link(&self, ue: &UserSnapshot, dir: Direction, budget: u32) -> LinkEstimate {
        let mcs = self.link_mcs(ue, dir);
        let itbs = itbs_from_mcs(mcs, dir);

        let mut rb = 0;
        for channel in &ue.channels {
            rb += channel_rbs(itbs, required_bytes(channel, dir), budget - rb);
        }

        LinkEstimate {
            mcs,
            itbs,
            rb,
            tbs_bits: tbs_bits(itbs, rb),
        }
    }
}

/// Bytes a logical channel needs to send in a direction
fn required_bytes(channel: &LogicalChannelReport, dir: Direction) -> u32 {
    match dir {
        Direction::Dl => channel.dl_tx_queue_bytes,
        Direction::Ul => bsr_bytes(channel.ul_bsr),
    }
}

/// RBs for one channel: grow in steps until the TBS covers the buffer or
/// the next step would leave the budget
fn channel_rbs(itbs: u8, required: u32, budget: u32) -> u32 {
    if budget < MIN_RB_ALLOCATION {
        return 0;
    }

    let mut rb = MIN_RB_ALLOCATION;
    while tbs_bytes(itbs, rb) < required && rb + RB_STEP <= budget {
        rb += RB_STEP;
    }
    rb
}
