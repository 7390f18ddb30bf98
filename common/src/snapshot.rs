//! Per-cycle radio snapshots
//!
//! Built fresh from every stats fetch and never mutated afterwards.

use crate::types::{BsId, BsrIndex, Cqi, Direction, Mcs, Rnti};
use serde::{Deserialize, Serialize};

/// One radio cell as seen in a single stats read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    /// Position of the cell in the stats report
    pub enb_id: usize,
    /// Controller-side base station id
    pub bs_id: BsId,
    /// Frame/sequence number of the report
    pub sfn: u32,
    /// Downlink RB capacity
    pub dl_rb: u32,
    /// Uplink RB capacity
    pub ul_rb: u32,
    /// Downlink hardware MCS ceiling
    pub dl_max_mcs: Mcs,
    /// Uplink hardware MCS ceiling
    pub ul_max_mcs: Mcs,
}

impl CellSnapshot {
    /// Build a snapshot, deriving the MCS ceilings from the modulation capability
    pub fn new(enb_id: usize, bs_id: BsId, sfn: u32, dl_rb: u32, ul_rb: u32, enable_64qam: bool) -> Self {
        let dl_max_mcs = if enable_64qam {
            Mcs::QAM64_CEILING
        } else {
            Mcs::QAM16_CEILING
        };

        Self {
            enb_id,
            bs_id,
            sfn,
            dl_rb,
            ul_rb,
            dl_max_mcs,
            ul_max_mcs: Mcs::QAM16_CEILING,
        }
    }

    /// RB capacity for a direction
    pub fn rb_capacity(&self, dir: Direction) -> u32 {
        match dir {
            Direction::Dl => self.dl_rb,
            Direction::Ul => self.ul_rb,
        }
    }

    /// Hardware MCS ceiling for a direction
    pub fn max_mcs(&self, dir: Direction) -> Mcs {
        match dir {
            Direction::Dl => self.dl_max_mcs,
            Direction::Ul => self.ul_max_mcs,
        }
    }
}

/// Per logical channel buffer report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalChannelReport {
    /// Logical channel id
    pub lc_id: u8,
    /// Uplink buffer status report index
    pub ul_bsr: BsrIndex,
    /// Downlink RLC transmit queue in bytes
    pub dl_tx_queue_bytes: u32,
}

/// One attached user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    /// Cell the user is attached to
    pub enb_id: usize,
    /// Position of the user in the cell's report
    pub ue_id: usize,
    pub rnti: Rnti,
    /// Wideband downlink CQI
    pub dl_cqi: Cqi,
    /// Power headroom report
    pub phr: i32,
    /// Data logical channels (signalling channels 0 and 1 excluded)
    pub channels: Vec<LogicalChannelReport>,
}

/// A cell together with its attached users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellStats {
    pub cell: CellSnapshot,
    /// Users in ascending `ue_id` order
    pub users: Vec<UserSnapshot>,
}

impl CellStats {
    /// Lowest downlink CQI among attached users
    pub fn min_dl_cqi(&self) -> Option<Cqi> {
        self.users.iter().map(|ue| ue.dl_cqi).min()
    }
}

/// Everything fetched in one stats read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub cells: Vec<CellStats>,
}

impl StatsSnapshot {
    /// Total number of attached users across all cells
    pub fn num_users(&self) -> usize {
        self.cells.iter().map(|c| c.users.len()).sum()
    }
}
