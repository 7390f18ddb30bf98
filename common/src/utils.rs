//! Common Utilities
//!
//! Small reporting helpers shared by the RRM core and the app

use crate::types::Cqi;
use std::fmt;
use tracing::trace;

/// Tolerance used when comparing RB shares
pub const SHARE_EPSILON: f64 = 1e-9;

/// Expected throughput in Mbps for a transport block sent every 1 ms TTI
pub fn throughput_mbps(tbs_bits: u32) -> f64 {
    tbs_bits as f64 / 1000.0
}

/// Compare two shares within [`SHARE_EPSILON`]
pub fn shares_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= SHARE_EPSILON
}

/// Coarse link quality of a cell, driven by its weakest user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkQuality {
    Low,
    Medium,
    High,
}

impl LinkQuality {
    /// Classify the minimum wideband CQI of a cell
    pub fn from_min_cqi(cqi: Cqi) -> Self {
        let quality = match cqi.value() {
            c if c > 10 => LinkQuality::High,
            c if c > 6 => LinkQuality::Medium,
            _ => LinkQuality::Low,
        };
        trace!("CQI {} classified as {}", cqi.value(), quality);
        quality
    }
}

impl fmt::Display for LinkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkQuality::Low => "low",
            LinkQuality::Medium => "medium",
            LinkQuality::High => "high",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput() {
        assert_eq!(throughput_mbps(75376), 75.376);
        assert_eq!(throughput_mbps(0), 0.0);
    }

    #[test]
    fn test_link_quality() {
        assert_eq!(LinkQuality::from_min_cqi(Cqi::new(15).unwrap()), LinkQuality::High);
        assert_eq!(LinkQuality::from_min_cqi(Cqi::new(10).unwrap()), LinkQuality::Medium);
        assert_eq!(LinkQuality::from_min_cqi(Cqi::new(6).unwrap()), LinkQuality::Low);
        assert_eq!(LinkQuality::High.to_string(), "high");
    }

    #[test]
    fn test_share_comparison() {
        assert!(shares_equal(0.1 + 0.2, 0.3));
        assert!(!shares_equal(0.5, 0.51));
    }
}
