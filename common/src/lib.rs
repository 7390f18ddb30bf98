//! Common Utilities and Types Library
//! 
//! This crate provides the value types shared by the stats interfaces,
//! the RRM core and the application binary.

pub mod snapshot;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use snapshot::*;
pub use types::*;
pub use utils::*;
