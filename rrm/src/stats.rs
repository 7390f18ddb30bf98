//! Stats Ingestion
//!
//! Converts a controller stats report into the per-cycle radio snapshot.
//! Cells are paired with their MAC stats by position in the report and must
//! carry the same `bs_id`; users keep their position as `ue_id`.

use crate::link_adaptation::{bsr_bytes, bsr_index_for_bytes, MAX_RB};
use crate::RrmError;
use common::snapshot::{CellSnapshot, CellStats, LogicalChannelReport, StatsSnapshot, UserSnapshot};
use common::types::{BsId, BsrIndex, Cqi, Rnti};
use interfaces::message_types::{EnbConfigReport, EnbMacStats, MacStatsReport, UeMacStatsReport};
use interfaces::StatsReport;
use tracing::{debug, trace, warn};

/// First data logical channel; channels 0 and 1 carry signalling
pub const FIRST_DATA_LC: usize = 2;

/// A cell left out of the snapshot because its stats did not validate
#[derive(Debug)]
pub struct RejectedCell {
    pub enb_id: usize,
    pub bs_id: BsId,
    pub error: RrmError,
}

/// Outcome of decoding one stats report
#[derive(Debug, Default)]
pub struct DecodedReport {
    /// Cells that validated, in report order
    pub snapshot: StatsSnapshot,
    pub rejected: Vec<RejectedCell>,
}

/// Build a snapshot from a stats report
///
/// Each cell is validated on its own: a malformed user or carrier drops its
/// cell into `rejected` and leaves the other cells in the snapshot.
pub fn snapshot_from_report(report: &StatsReport) -> DecodedReport {
    let mut decoded = DecodedReport {
        snapshot: StatsSnapshot {
            cells: Vec::with_capacity(report.enb_config.len()),
        },
        rejected: Vec::new(),
    };

    for (enb_id, config) in report.enb_config.iter().enumerate() {
        match cell_stats(enb_id, config, report.mac_stats.get(enb_id)) {
            Ok(stats) => decoded.snapshot.cells.push(stats),
            Err(error) => {
                warn!("eNB {} (bs_id {}) left out of this cycle: {}", enb_id, config.bs_id, error);
                decoded.rejected.push(RejectedCell {
                    enb_id,
                    bs_id: BsId(config.bs_id),
                    error,
                });
            }
        }
    }

    decoded
}

fn cell_stats(enb_id: usize, config: &EnbConfigReport, mac: Option<&EnbMacStats>) -> Result<CellStats, RrmError> {
    if let Some(mac) = mac {
        if mac.bs_id != config.bs_id {
            return Err(RrmError::MalformedStats(format!(
                "eNB {} config is bs_id {} but its MAC stats are bs_id {}",
                enb_id, config.bs_id, mac.bs_id
            )));
        }
    }
    let ues = mac.map(|stats| stats.ue_mac_stats.as_slice()).unwrap_or_default();

    let users = ues
        .iter()
        .enumerate()
        .map(|(ue_id, ue)| user_snapshot(enb_id, ue_id, ue))
        .collect::<Result<Vec<_>, _>>()?;

    let sfn = ues
        .first()
        .and_then(|ue| ue.mac_stats.sfn())
        .unwrap_or(0);

    let cell = cell_snapshot(enb_id, config, sfn)?;
    debug!(
        "Cell {} (bs_id {}): {} DL RBs, {} UL RBs, {} user(s), sfn {}",
        enb_id,
        cell.bs_id,
        cell.dl_rb,
        cell.ul_rb,
        users.len(),
        sfn
    );

    Ok(CellStats { cell, users })
}

fn cell_snapshot(enb_id: usize, config: &EnbConfigReport, sfn: u32) -> Result<CellSnapshot, RrmError> {
    let carrier = config
        .enb
        .cell_config
        .first()
        .ok_or_else(|| RrmError::MalformedStats(format!("eNB {} has no cell configuration", enb_id)))?;

    for (label, rb) in [("DL", carrier.dl_bandwidth), ("UL", carrier.ul_bandwidth)] {
        if rb > MAX_RB {
            return Err(RrmError::MalformedStats(format!(
                "eNB {} {} bandwidth {} RBs exceeds {}",
                enb_id, label, rb, MAX_RB
            )));
        }
    }

    Ok(CellSnapshot::new(
        enb_id,
        BsId(config.bs_id),
        sfn,
        carrier.dl_bandwidth,
        carrier.ul_bandwidth,
        carrier.enable_64qam != 0,
    ))
}

fn user_snapshot(enb_id: usize, ue_id: usize, ue: &UeMacStatsReport) -> Result<UserSnapshot, RrmError> {
    let stats = &ue.mac_stats;

    let raw_cqi = stats.wideband_cqi().ok_or_else(|| {
        RrmError::MalformedStats(format!("UE {} of eNB {} has no wideband CQI", ue_id, enb_id))
    })?;
    let dl_cqi = Cqi::new(raw_cqi).ok_or_else(|| {
        RrmError::MalformedStats(format!("UE {} of eNB {} reports CQI {}", ue_id, enb_id, raw_cqi))
    })?;

    let bsr = lcg_bsr(stats).map_err(|raw| {
        RrmError::MalformedStats(format!("UE {} of eNB {} reports BSR index {}", ue_id, enb_id, raw))
    })?;

    let channels = stats
        .rlc_report
        .iter()
        .enumerate()
        .skip(FIRST_DATA_LC)
        .map(|(lc, rlc)| LogicalChannelReport {
            lc_id: rlc.lc_id,
            ul_bsr: channel_bsr(&bsr, lc),
            dl_tx_queue_bytes: rlc.tx_queue_size,
        })
        .collect();

    trace!("UE {} rnti {} CQI {} PHR {}", ue_id, ue.rnti, raw_cqi, stats.phr);

    Ok(UserSnapshot {
        enb_id,
        ue_id,
        rnti: Rnti::new(ue.rnti),
        dl_cqi,
        phr: stats.phr,
        channels,
    })
}

/// Validated BSR index of the four logical channel groups; missing groups read 0
fn lcg_bsr(stats: &MacStatsReport) -> Result<[BsrIndex; 4], u8> {
    let mut lcg = [BsrIndex::default(); 4];
    for (slot, &raw) in lcg.iter_mut().zip(stats.bsr.iter()) {
        *slot = BsrIndex::new(raw).ok_or(raw)?;
    }
    Ok(lcg)
}

/// BSR index seen by a data logical channel
///
/// Channel 2 reports groups 1 to 3 combined, any further channel reports
/// nothing. Signalling channels never reach this point.
fn channel_bsr(lcg: &[BsrIndex; 4], lc: usize) -> BsrIndex {
    match lc {
        FIRST_DATA_LC => {
            let bytes: u32 = lcg[1..].iter().map(|&idx| bsr_bytes(idx)).sum();
            bsr_index_for_bytes(bytes)
        }
        _ => BsrIndex::default(),
    }
}
