//! Slice Aggregator
//!
//! Folds per-user RB estimates into per-slice RB shares with a two-stage
//! allocation:
//!
//! 1. Demand-proportional share: slice demand over cell capacity, raised to
//!    [`MIN_SLICE_SHARE`] when non-zero but smaller.
//! 2. Leftover redistribution: whatever the first stage leaves unallocated
//!    is split evenly over all configured slices, idle ones included.
//!
//! Users map onto slices round-robin by their position in the cell.

use crate::estimator::CellEstimate;
use common::snapshot::CellSnapshot;
use common::types::{BsId, Direction, Mcs, SliceCount, SliceId};
use tracing::{debug, info};

/// Smallest share given to a slice with any demand
pub const MIN_SLICE_SHARE: f64 = 0.1;

/// Number of slice slots in a policy document (slice ids 0-4)
pub const SLICE_SLOTS: usize = SliceId::MAX as usize + 1;

/// Configured per-slice MCS caps, indexed by slice id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceMcsCaps {
    dl: [Mcs; SLICE_SLOTS],
    ul: [Mcs; SLICE_SLOTS],
}

impl Default for SliceMcsCaps {
    fn default() -> Self {
        Self {
            dl: [Mcs::QAM64_CEILING; SLICE_SLOTS],
            ul: [Mcs::QAM16_CEILING; SLICE_SLOTS],
        }
    }
}

impl SliceMcsCaps {
    /// Configured cap of a slice
    pub fn cap(&self, slice: SliceId, dir: Direction) -> Mcs {
        match dir {
            Direction::Dl => self.dl[slice.index()],
            Direction::Ul => self.ul[slice.index()],
        }
    }

    /// Set the configured cap of a slice
    pub fn set_cap(&mut self, slice: SliceId, dir: Direction, mcs: Mcs) {
        match dir {
            Direction::Dl => self.dl[slice.index()] = mcs,
            Direction::Ul => self.ul[slice.index()] = mcs,
        }
    }
}

/// Allocation of one slice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceAllocation {
    pub slice: SliceId,
    pub dl_share: f64,
    pub ul_share: f64,
    /// RB demand behind the shares
    pub dl_demand: u32,
    pub ul_demand: u32,
    /// Effective MCS caps, never above the cell ceiling
    pub dl_max_mcs: Mcs,
    pub ul_max_mcs: Mcs,
}

impl SliceAllocation {
    /// Share for a direction
    pub fn share(&self, dir: Direction) -> f64 {
        match dir {
            Direction::Dl => self.dl_share,
            Direction::Ul => self.ul_share,
        }
    }

    /// RB demand for a direction
    pub fn demand(&self, dir: Direction) -> u32 {
        match dir {
            Direction::Dl => self.dl_demand,
            Direction::Ul => self.ul_demand,
        }
    }

    /// Effective MCS cap for a direction
    pub fn max_mcs(&self, dir: Direction) -> Mcs {
        match dir {
            Direction::Dl => self.dl_max_mcs,
            Direction::Ul => self.ul_max_mcs,
        }
    }

    fn share_mut(&mut self, dir: Direction) -> &mut f64 {
        match dir {
            Direction::Dl => &mut self.dl_share,
            Direction::Ul => &mut self.ul_share,
        }
    }
}

/// Slice allocation of one cell
#[derive(Debug, Clone, PartialEq)]
pub struct CellAllocation {
    pub enb_id: usize,
    pub bs_id: BsId,
    pub num_slices: SliceCount,
    /// One entry per configured slice, in slice id order
    pub slices: Vec<SliceAllocation>,
}

impl CellAllocation {
    /// Sum of the slice shares in a direction
    pub fn total_share(&self, dir: Direction) -> f64 {
        self.slices.iter().map(|s| s.share(dir)).sum()
    }

    /// Whether there is anything to enforce
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }
}

/// Two-stage slice allocator
#[derive(Debug, Clone)]
pub struct SliceAggregator {
    min_share: f64,
}

impl Default for SliceAggregator {
    fn default() -> Self {
        Self { min_share: MIN_SLICE_SHARE }
    }
}

impl SliceAggregator {
    /// Create an aggregator with the default share floor
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the cell's RBs over `num_slices` slices
    pub fn aggregate(
        &self,
        cell: &CellSnapshot,
        estimate: &CellEstimate,
        num_slices: SliceCount,
        caps: &SliceMcsCaps,
    ) -> CellAllocation {
        let mut slices: Vec<SliceAllocation> = num_slices
            .slices()
            .map(|slice| SliceAllocation {
                slice,
                dl_share: 0.0,
                ul_share: 0.0,
                dl_demand: 0,
                ul_demand: 0,
                dl_max_mcs: caps.cap(slice, Direction::Dl).min(cell.max_mcs(Direction::Dl)),
                ul_max_mcs: caps.cap(slice, Direction::Ul).min(cell.max_mcs(Direction::Ul)),
            })
            .collect();

        for ue in &estimate.users {
            if let Some(slice) = SliceId::for_user(ue.ue_id, num_slices) {
                let entry = &mut slices[slice.index()];
                entry.dl_demand += ue.dl.rb;
                entry.ul_demand += ue.ul.rb;
            }
        }

        for dir in Direction::ALL {
            self.demand_stage(&mut slices, cell.rb_capacity(dir), dir);
            Self::redistribution_stage(&mut slices, dir);
        }

        for s in &slices {
            info!(
                "eNB {} slice {}: DL share {:.3} ({} RBs, MCS <= {}), UL share {:.3} ({} RBs, MCS <= {})",
                cell.enb_id, s.slice, s.dl_share, s.dl_demand, s.dl_max_mcs, s.ul_share, s.ul_demand, s.ul_max_mcs
            );
        }

        CellAllocation {
            enb_id: cell.enb_id,
            bs_id: cell.bs_id,
            num_slices,
            slices,
        }
    }

    fn demand_stage(&self, slices: &mut [SliceAllocation], capacity: u32, dir: Direction) {
        for s in slices.iter_mut() {
            let share = if capacity == 0 {
                0.0
            } else {
                s.demand(dir) as f64 / capacity as f64
            };

            *s.share_mut(dir) = if share > 0.0 && share < self.min_share {
                self.min_share
            } else {
                share
            };
        }
    }

    fn redistribution_stage(slices: &mut [SliceAllocation], dir: Direction) {
        if slices.is_empty() {
            return;
        }

        let total: f64 = slices.iter().map(|s| s.share(dir)).sum();
        if total >= 1.0 {
            return;
        }

        let extra = (1.0 - total) / slices.len() as f64;
        debug!("{} leftover {:.3} split over {} slice(s)", dir, 1.0 - total, slices.len());
        for s in slices.iter_mut() {
            *s.share_mut(dir) += extra;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::{LinkEstimate, UserEstimate};
    use common::types::Rnti;
    use common::utils::shares_equal;

    fn link(rb: u32) -> LinkEstimate {
        LinkEstimate {
            mcs: Mcs::new(10).unwrap(),
            itbs: 9,
            rb,
            tbs_bits: 0,
        }
    }

    fn estimate(demands: &[(u32, u32)]) -> CellEstimate {
        CellEstimate {
            enb_id: 0,
            bs_id: BsId(1),
            users: demands
                .iter()
                .enumerate()
                .map(|(ue_id, &(dl, ul))| UserEstimate {
                    ue_id,
                    rnti: Rnti(ue_id as u16),
                    dl: link(dl),
                    ul: link(ul),
                })
                .collect(),
        }
    }

    fn cell(rb: u32, enable_64qam: bool) -> CellSnapshot {
        CellSnapshot::new(0, BsId(1), 0, rb, rb, enable_64qam)
    }

    fn count(n: u8) -> SliceCount {
        SliceCount::new(n).unwrap()
    }

    #[test]
    fn test_two_stage_allocation() {
        let alloc = SliceAggregator::new().aggregate(
            &cell(100, true),
            &estimate(&[(38, 2)]),
            count(2),
            &SliceMcsCaps::default(),
        );

        assert_eq!(alloc.slices.len(), 2);
        assert!(shares_equal(alloc.slices[0].dl_share, 0.69));
        assert!(shares_equal(alloc.slices[1].dl_share, 0.31));
        // 2 UL RBs are floored to 0.1 before redistribution
        assert!(shares_equal(alloc.slices[0].ul_share, 0.55));
        assert!(shares_equal(alloc.slices[1].ul_share, 0.45));
        assert!(shares_equal(alloc.total_share(Direction::Dl), 1.0));
    }

    #[test]
    fn test_floor_and_zero_share() {
        let aggregator = SliceAggregator::new();
        let mut slices = vec![
            SliceAllocation {
                slice: SliceId::new(0).unwrap(),
                dl_share: 0.0,
                ul_share: 0.0,
                dl_demand: 4,
                ul_demand: 0,
                dl_max_mcs: Mcs::QAM64_CEILING,
                ul_max_mcs: Mcs::QAM16_CEILING,
            };
            2
        ];
        slices[1].dl_demand = 0;

        aggregator.demand_stage(&mut slices, 100, Direction::Dl);
        assert_eq!(slices[0].dl_share, MIN_SLICE_SHARE);
        assert_eq!(slices[1].dl_share, 0.0);

        aggregator.demand_stage(&mut slices, 0, Direction::Dl);
        assert_eq!(slices[0].dl_share, 0.0);
    }

    #[test]
    fn test_shares_sum_to_one() {
        let aggregator = SliceAggregator::new();
        let demands = [(10, 3), (0, 0), (25, 12), (4, 1), (30, 7)];
        for n in 1..=SliceCount::MAX {
            let alloc = aggregator.aggregate(&cell(100, true), &estimate(&demands), count(n), &SliceMcsCaps::default());
            for dir in Direction::ALL {
                assert!(
                    shares_equal(alloc.total_share(dir), 1.0),
                    "{} slices {}: total {}",
                    n,
                    dir,
                    alloc.total_share(dir)
                );
            }
        }
    }

    #[test]
    fn test_round_robin_demand() {
        let alloc = SliceAggregator::new().aggregate(
            &cell(50, true),
            &estimate(&[(10, 2), (6, 2), (4, 2)]),
            count(2),
            &SliceMcsCaps::default(),
        );
        assert_eq!(alloc.slices[0].dl_demand, 14);
        assert_eq!(alloc.slices[1].dl_demand, 6);
    }

    #[test]
    fn test_no_slices() {
        let alloc = SliceAggregator::new().aggregate(
            &cell(50, true),
            &estimate(&[(10, 2)]),
            SliceCount::default(),
            &SliceMcsCaps::default(),
        );
        assert!(alloc.is_empty());
    }

    #[test]
    fn test_mcs_cap_bounded_by_cell() {
        let mut caps = SliceMcsCaps::default();
        caps.set_cap(SliceId::new(1).unwrap(), Direction::Dl, Mcs::new(10).unwrap());

        let alloc = SliceAggregator::new().aggregate(&cell(25, false), &estimate(&[]), count(2), &caps);
        assert_eq!(alloc.slices[0].dl_max_mcs, Mcs::QAM16_CEILING);
        assert_eq!(alloc.slices[1].dl_max_mcs.value(), 10);
        assert_eq!(alloc.slices[0].ul_max_mcs, Mcs::QAM16_CEILING);
    }

    #[test]
    fn test_allocation_is_idempotent() {
        let aggregator = SliceAggregator::new();
        let est = estimate(&[(12, 4), (3, 9), (40, 0)]);
        let first = aggregator.aggregate(&cell(100, true), &est, count(3), &SliceMcsCaps::default());
        let second = aggregator.aggregate(&cell(100, true), &est, count(3), &SliceMcsCaps::default());
        assert_eq!(first, second);
    }
}
