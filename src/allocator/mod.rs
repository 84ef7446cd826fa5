//! Segment-pool allocation for the simulated memory
//!
//! The pool is a fixed-capacity byte buffer partitioned into contiguous
//! segments, each Free or Allocated. Placement is pluggable:
//! - First-fit: lowest-address sufficient free segment
//! - Best-fit: smallest sufficient free segment
//! - Next-fit: first sufficient free segment after the previous allocation
//! - Worst-fit: largest free segment
//!
//! Best/worst queries are served from size-ordered heaps over the free
//! segments. Heap entries carry a generation stamp and are discarded when
//! the stamp no longer matches the segment's live generation; the
//! address-ordered segment list is the single source of truth.

pub mod pool;
pub mod segment;

pub use self::pool::SegmentPool;
pub use self::segment::{Locator, Segment, SegmentId, SegmentState};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placement strategy for choosing which free segment serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    FirstFit,
    BestFit,
    NextFit,
    WorstFit,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::FirstFit
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::FirstFit => "first-fit",
            Strategy::BestFit => "best-fit",
            Strategy::NextFit => "next-fit",
            Strategy::WorstFit => "worst-fit",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first-fit" | "first_fit" | "first" => Ok(Strategy::FirstFit),
            "best-fit" | "best_fit" | "best" => Ok(Strategy::BestFit),
            "next-fit" | "next_fit" | "next" => Ok(Strategy::NextFit),
            "worst-fit" | "worst_fit" | "worst" => Ok(Strategy::WorstFit),
            _ => Err(format!(
                "invalid strategy '{}'. Valid options: first-fit, best-fit, next-fit, worst-fit",
                s
            )),
        }
    }
}
