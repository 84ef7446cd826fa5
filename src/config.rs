//! Simulator sizing and policy configuration
//!
//! Every limit that the reference hardware would fix at design time is a
//! constructor parameter here, so tests can build tiny pools and the shell
//! binary can load overrides from a TOML file.

use crate::allocator::Strategy;
use serde::Deserialize;

/// Configuration for a [`Simulator`](crate::Simulator) instance.
///
/// All fields have defaults; a TOML config file may set any subset:
///
/// ```toml
/// capacity = 65536
/// strategy = "best-fit"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Pool capacity in bytes. The pool is never resized.
    pub capacity: usize,

    /// Maximum number of concurrently tracked segment identifiers.
    pub max_segments: usize,

    /// Maximum node name length in bytes; longer names are truncated.
    pub max_name_len: usize,

    /// Permission bits given to newly created files and folders (0..=7).
    pub default_mode: u8,

    /// Placement strategy used by the allocator.
    pub strategy: Strategy,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            capacity: 32768,
            max_segments: 1024,
            max_name_len: 64,
            default_mode: 0o7,
            strategy: Strategy::FirstFit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.capacity, 32768);
        assert_eq!(cfg.max_segments, 1024);
        assert_eq!(cfg.max_name_len, 64);
        assert_eq!(cfg.default_mode, 0o7);
        assert_eq!(cfg.strategy, Strategy::FirstFit);
    }

    #[test]
    fn partial_toml_overrides() {
        let cfg: SimConfig = toml::from_str("capacity = 64\nstrategy = \"next-fit\"").unwrap();
        assert_eq!(cfg.capacity, 64);
        assert_eq!(cfg.strategy, Strategy::NextFit);
        // untouched fields keep their defaults
        assert_eq!(cfg.max_name_len, 64);
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(toml::from_str::<SimConfig>("block_size = 4096").is_err());
    }
}
