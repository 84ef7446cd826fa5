//! # poolfs — a user-space storage stack simulator
//!
//! poolfs models an operating-system storage stack in ordinary memory: a
//! hierarchical namespace of folders and files whose bytes live in one flat
//! fixed-capacity pool, with a pluggable allocation strategy deciding where
//! each file's bytes land.
//!
//! - **Allocator** ([`allocator`]): address-ordered segment bookkeeping,
//!   free-segment coalescing, and four placement strategies (first-, best-,
//!   next-, worst-fit) with lazily invalidated size indexes.
//! - **Namespace tree** ([`tree`]): arena-backed folders and files sharing
//!   one attribute record (name, timestamps, rwx permission bits).
//! - **Simulator facade** ([`simulator`]): permission-checked operations
//!   tying the tree to the pool, one pool per instance.
//! - **Persisted form** ([`save`]): a textual grammar for export/import
//!   with all-or-nothing parsing.
//! - **Interpreter** ([`shell`]): the line-oriented command surface behind
//!   the `poolfs-shell` binary.
//!
//! ## Quick start
//!
//! ```
//! use poolfs::{SimConfig, Simulator};
//!
//! # fn main() -> poolfs::Result<()> {
//! let mut sim = Simulator::new(SimConfig::default());
//! sim.mkdir("docs")?;
//! sim.cd("docs")?;
//! sim.create("report.txt")?;
//! sim.write("report.txt", b"hello")?;
//! assert_eq!(sim.read("report.txt")?, b"hello");
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod config;
pub mod error;
pub mod save;
pub mod shell;
pub mod simulator;
pub mod tree;

pub use allocator::{Locator, Segment, SegmentId, SegmentPool, SegmentState, Strategy};
pub use config::SimConfig;
pub use error::{Result, SimError};
pub use simulator::{FolderListing, LsEntry, Simulator};
pub use tree::{EntryKind, Mode, Node, NodeId, NodeKind, NodeMeta};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
