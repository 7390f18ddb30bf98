//! Common Types for the RRM App
//!
//! Bounded radio quantities and the closed enumerations used at the
//! controller boundary. Every bounded type validates on construction so the
//! rest of the stack never has to re-check ranges.

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised when parsing boundary values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseValueError {
    #[error("Unknown direction: {0}")]
    UnknownDirection(String),

    #[error("Unknown RRC trigger: {0}")]
    UnknownTrigger(String),

    #[error("Unknown control action: {0}")]
    UnknownAction(String),

    #[error("Unknown scheduler function: {0}")]
    UnknownFunction(String),
}

/// Error for a bounded value outside its range
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{kind} {value} out of range (max {max})")]
pub struct OutOfRange {
    pub kind: &'static str,
    pub value: u8,
    pub max: u8,
}

/// Boundary conversions for the bounded `u8` newtypes
macro_rules! bounded_u8_conversions {
    ($ty:ident, $kind:literal) => {
        impl TryFrom<u8> for $ty {
            type Error = OutOfRange;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                $ty::new(value).ok_or(OutOfRange { kind: $kind, value, max: $ty::MAX })
            }
        }

        impl From<$ty> for u8 {
            fn from(value: $ty) -> u8 {
                value.0
            }
        }
    };
}

bounded_u8_conversions!(Cqi, "CQI");
bounded_u8_conversions!(Mcs, "MCS");
bounded_u8_conversions!(BsrIndex, "BSR index");
bounded_u8_conversions!(SliceId, "slice id");
bounded_u8_conversions!(SliceCount, "slice count");

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }
}

/// Base station identity as reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BsId(pub u64);

impl fmt::Display for BsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Link direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Downlink (eNB to UE)
    #[serde(alias = "DL")]
    Dl,
    /// Uplink (UE to eNB)
    #[serde(alias = "UL")]
    Ul,
}

impl Direction {
    /// Both directions, downlink first
    pub const ALL: [Direction; 2] = [Direction::Dl, Direction::Ul];

    /// Short upper-case label
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Dl => "DL",
            Direction::Ul => "UL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dl" | "downlink" => Ok(Direction::Dl),
            "ul" | "uplink" => Ok(Direction::Ul),
            _ => Err(ParseValueError::UnknownDirection(s.to_string())),
        }
    }
}

/// Wideband Channel Quality Indicator (0-15)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Cqi(u8);

impl Cqi {
    /// Maximum valid CQI value
    pub const MAX: u8 = 15;

    /// Create a new CQI with validation
    pub fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the CQI value
    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Modulation and Coding Scheme index (0-28)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Mcs(u8);

impl Mcs {
    /// Highest MCS index of the LTE tables
    pub const MAX: u8 = 28;
    /// Ceiling with 64-QAM enabled
    pub const QAM64_CEILING: Mcs = Mcs(28);
    /// Ceiling when the modulation stops at 16-QAM
    pub const QAM16_CEILING: Mcs = Mcs(16);

    /// Create a new MCS with validation
    pub fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the MCS index
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Mcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Buffer Status Report index (0-63)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BsrIndex(u8);

impl BsrIndex {
    /// Maximum valid BSR index
    pub const MAX: u8 = 63;

    /// Create a new BSR index with validation
    pub fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the index value
    pub fn value(&self) -> u8 {
        self.0
    }
}

/// Network slice identifier (0-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SliceId(u8);

impl SliceId {
    /// Maximum valid slice id
    pub const MAX: u8 = 4;

    /// Create a new slice id with validation
    pub fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Round-robin slice of a user given its position in the cell
    ///
    /// Returns `None` when no slice is configured.
    pub fn for_user(ue_id: usize, num_slices: SliceCount) -> Option<Self> {
        match num_slices.value() {
            0 => None,
            n => Some(Self((ue_id % n as usize) as u8)),
        }
    }

    /// Get the slice id
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Slice id as a table index
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of active slices (0-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SliceCount(u8);

impl SliceCount {
    /// Maximum number of slices an operator may request
    pub const MAX: u8 = 4;

    /// Create a new slice count with validation
    pub fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the count
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Iterate over the slice ids covered by this count
    pub fn slices(&self) -> impl Iterator<Item = SliceId> {
        (0..self.0).map(SliceId)
    }
}

/// RRC measurement trigger types
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RrcTrigger {
    /// Single measurement report
    OneShot = 0,
    /// Periodic reporting
    Periodic = 1,
    /// Event-driven reporting
    EventDriven = 2,
}

impl RrcTrigger {
    /// Path segment of the trigger endpoint
    pub fn path_segment(&self) -> &'static str {
        match self {
            RrcTrigger::OneShot => "one_shot",
            RrcTrigger::Periodic => "periodic",
            RrcTrigger::EventDriven => "event_driven",
        }
    }
}

impl FromStr for RrcTrigger {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "one_shot" => Ok(RrcTrigger::OneShot),
            "periodic" => Ok(RrcTrigger::Periodic),
            "event_driven" => Ok(RrcTrigger::EventDriven),
            _ => Err(ParseValueError::UnknownTrigger(s.to_string())),
        }
    }
}

/// Scheduler delegation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Pull the function back to the controller
    Pull = 0,
    /// Push (delegate) the function to the agent
    Push = 1,
}

impl FromStr for ControlAction {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pull" => Ok(ControlAction::Pull),
            "push" => Ok(ControlAction::Push),
            _ => Err(ParseValueError::UnknownAction(s.to_string())),
        }
    }
}

/// Scheduler functions that can be delegated to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerFunction {
    /// Downlink scheduler
    DlSched,
    /// Uplink scheduler
    UlSched,
}

impl SchedulerFunction {
    /// Path segment of the delegation endpoint
    pub fn path_segment(&self) -> &'static str {
        match self {
            SchedulerFunction::DlSched => "dl_sched",
            SchedulerFunction::UlSched => "ul_sched",
        }
    }
}

impl FromStr for SchedulerFunction {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dl_sched" => Ok(SchedulerFunction::DlSched),
            "ul_sched" => Ok(SchedulerFunction::UlSched),
            _ => Err(ParseValueError::UnknownFunction(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_bounded_validation() {
        assert!(Cqi::new(15).is_some());
        assert!(Cqi::new(16).is_none());
        assert!(Mcs::new(28).is_some());
        assert!(Mcs::new(29).is_none());
        assert!(BsrIndex::new(63).is_some());
        assert!(BsrIndex::new(64).is_none());
        assert!(SliceId::new(4).is_some());
        assert!(SliceId::new(5).is_none());
        assert!(SliceCount::new(0).is_some());
        assert!(SliceCount::new(5).is_none());
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("DL".parse::<Direction>().unwrap(), Direction::Dl);
        assert_eq!("ul".parse::<Direction>().unwrap(), Direction::Ul);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Ul.to_string(), "UL");
    }

    #[test]
    fn test_round_robin_assignment() {
        let two = SliceCount::new(2).unwrap();
        assert_eq!(SliceId::for_user(0, two).unwrap().value(), 0);
        assert_eq!(SliceId::for_user(1, two).unwrap().value(), 1);
        assert_eq!(SliceId::for_user(4, two).unwrap().value(), 0);
        assert!(SliceId::for_user(3, SliceCount::default()).is_none());
    }

    #[test]
    fn test_trigger_conversions() {
        assert_eq!(RrcTrigger::from_u8(2), Some(RrcTrigger::EventDriven));
        assert_eq!("ONE_SHOT".parse::<RrcTrigger>().unwrap(), RrcTrigger::OneShot);
        assert_eq!(RrcTrigger::Periodic.path_segment(), "periodic");
        assert_eq!(ControlAction::from_u8(1), Some(ControlAction::Push));
        assert_eq!("ul_sched".parse::<SchedulerFunction>().unwrap(), SchedulerFunction::UlSched);

        let trigger: RrcTrigger = serde_json::from_str("\"event_driven\"").unwrap();
        assert_eq!(trigger, RrcTrigger::EventDriven);
    }

    #[test]
    fn test_bounded_deserialization() {
        let cqi: Cqi = serde_json::from_str("9").unwrap();
        assert_eq!(cqi.value(), 9);
        assert!(serde_json::from_str::<Cqi>("16").is_err());
        assert!(serde_json::from_str::<SliceId>("7").is_err());

        let err = SliceCount::try_from(9).unwrap_err();
        assert_eq!(err.to_string(), "slice count 9 out of range (max 4)");
    }
}
