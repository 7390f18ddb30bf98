//! Message Types for the Controller Stats API
//! 
//! Mirrors the subset of `GET /stats_manager/json/all` the RRM app consumes.
//! Unknown fields are ignored, and optional sections default to empty so a
//! partially populated report still parses.

use serde::{Deserialize, Serialize};

/// Full stats report (`eNB_config` plus `mac_stats`)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatsReport {
    /// Static eNB configuration, one entry per connected base station
    #[serde(rename = "eNB_config", default)]
    pub enb_config: Vec<EnbConfigReport>,
    /// MAC layer statistics, one entry per connected base station
    #[serde(default)]
    pub mac_stats: Vec<EnbMacStats>,
}

/// Configuration of one base station
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnbConfigReport {
    /// Base station id
    #[serde(default)]
    pub bs_id: u64,
    /// eNB level configuration
    #[serde(rename = "eNB", default)]
    pub enb: EnbReport,
}

/// eNB level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnbReport {
    /// Component carriers
    #[serde(default)]
    pub cell_config: Vec<CellConfigReport>,
}

/// Configuration of one component carrier
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CellConfigReport {
    /// Physical cell id
    #[serde(default)]
    pub phy_cell_id: u32,
    /// Downlink bandwidth in RBs
    pub dl_bandwidth: u32,
    /// Uplink bandwidth in RBs
    pub ul_bandwidth: u32,
    /// 64-QAM capability flag (0 or 1)
    #[serde(rename = "enable64QAM", default)]
    pub enable_64qam: u8,
}

/// MAC statistics of one base station
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnbMacStats {
    /// Base station id
    #[serde(default)]
    pub bs_id: u64,
    /// Per-UE statistics
    #[serde(default)]
    pub ue_mac_stats: Vec<UeMacStatsReport>,
}

/// MAC statistics of one UE
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UeMacStatsReport {
    pub rnti: u16,
    pub mac_stats: MacStatsReport,
}

/// Per-UE MAC report
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MacStatsReport {
    /// Buffer status report index per logical channel group (4 entries)
    #[serde(default)]
    pub bsr: Vec<u8>,
    /// Power headroom report
    #[serde(default)]
    pub phr: i32,
    /// RLC report per logical channel
    #[serde(default)]
    pub rlc_report: Vec<RlcReport>,
    /// Downlink CQI report
    #[serde(default)]
    pub dl_cqi_report: Option<DlCqiReport>,
}

/// RLC buffer report of one logical channel
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RlcReport {
    pub lc_id: u8,
    /// Bytes waiting in the transmit queue
    #[serde(default)]
    pub tx_queue_size: u32,
    /// Head-of-line delay in ms
    #[serde(default)]
    pub tx_queue_hol_delay: u32,
    #[serde(default)]
    pub status_pdu_size: u32,
}

/// Downlink CQI report
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DlCqiReport {
    /// Frame/subframe number of the report
    #[serde(default)]
    pub sfn_sn: u32,
    #[serde(default)]
    pub csi_report: Vec<CsiReport>,
}

/// CSI report of one serving cell
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsiReport {
    #[serde(default)]
    pub serv_cell_index: u32,
    /// Periodic wideband CQI report
    #[serde(default)]
    pub p10csi: Option<P10Csi>,
}

/// Wideband CQI
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct P10Csi {
    pub wb_cqi: u8,
}

impl MacStatsReport {
    /// Wideband CQI of the primary serving cell
    pub fn wideband_cqi(&self) -> Option<u8> {
        self.dl_cqi_report
            .as_ref()?
            .csi_report
            .first()?
            .p10csi
            .as_ref()
            .map(|csi| csi.wb_cqi)
    }

    /// Frame/subframe number of the latest DL CQI report
    pub fn sfn(&self) -> Option<u32> {
        self.dl_cqi_report.as_ref().map(|r| r.sfn_sn)
    }
}
