//! Operator Prompt
//!
//! Reads the desired number of slices from a line-oriented input, normally
//! stdin, while the control loop runs. Accepted values take effect at the
//! start of the next cycle.

use rrm::SliceCountHandle;
use std::io::BufRead;
use tracing::{info, warn};

/// Parse one line of operator input
pub fn parse_slice_count(line: &str) -> Result<u8, String> {
    let line = line.trim();
    line.parse::<u8>()
        .map_err(|_| format!("'{}' is not a number of slices", line))
}

/// Serve the prompt until the input closes
///
/// Runs on a dedicated thread: blocking reads on stdin must not hold up the
/// async runtime's shutdown.
pub fn run<R: BufRead>(input: R, slice_count: SliceCountHandle) {
    info!("Please enter number of slices (0-4)");

    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Operator input closed: {}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_slice_count(&line).and_then(|n| slice_count.set(n).map_err(|e| e.to_string())) {
            Ok(count) => info!("Number of slices set to {} from the next cycle", count.value()),
            Err(e) => warn!("Rejected operator input: {}; keeping {} slice(s)", e, slice_count.get().value()),
        }
    }

    info!("Operator input closed");
}
