//! Error taxonomy of the partitioning engine.
//!
//! Configuration problems are caught once, when a [`crate::config::TileConfig`] is validated.
//! Everything else that can go wrong is reported per dispatch, before any output is written.
//! Counter overflow and barrier desynchronisation have no variants: the packing limits in
//! [`crate::config`] and the lock-step stage loops in [`crate::pass`] rule them out.

use thiserror::Error;

/// Static configuration errors, detected at setup time
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A geometry dimension or the bin count is zero
    #[error("{0} must be greater than zero")]
    ZeroDimension(&'static str),
    /// More bins than the selected backend can count
    #[error("{bins} bins requested but the {backend} histogram holds at most {max}")]
    TooManyBins { bins: usize, max: usize, backend: &'static str },
    /// More lanes per load than a nibble counter can hold
    #[error("{lanes} vector lanes requested but a packed nibble counter allows at most {max}")]
    TooManyLanes { lanes: usize, max: usize },
    /// Raking workers do not divide the published counters
    #[error("{raking} raking workers cannot evenly split {entries} published counters")]
    RakingLayout { raking: usize, entries: usize },
    /// Raking workers exceed one subgroup
    #[error("{raking} raking workers do not fit in a subgroup of width {width}")]
    RakingWidth { raking: usize, width: usize },
    /// A raking segment could sum past a byte
    #[error("raking segment of {segment} counters x {lanes} lanes overflows a byte counter")]
    SegmentOverflow { segment: usize, lanes: usize },
    /// A cycle could sum past a 16-bit scan lane
    #[error("cycle of {elements} elements overflows a 16-bit scan lane (max {max})")]
    CycleTooLarge { elements: usize, max: usize },
    /// Classifier and configuration disagree on the bin count
    #[error("classifier produces {found} bins but the configuration expects {expected}")]
    ClassifierMismatch { expected: usize, found: usize },
}

/// Pass-level failures reported to whoever dispatched the partition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// Rejected configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Output too small for the keys it must receive
    #[error("output holds {available} elements but {needed} are required")]
    Capacity { needed: usize, available: usize },
    /// BinCarry of the wrong length
    #[error("bin carry has {found} entries, expected {expected}")]
    CarryLength { expected: usize, found: usize },
    /// BinCarry sending two populated bins into overlapping output ranges
    #[error("bin carry sends bins {first} and {second} to overlapping output ranges")]
    CarryOverlap { first: usize, second: usize },
    /// Values missing, unexpected, or of the wrong length
    #[error("payload mismatch: {0}")]
    Payload(String),
    /// A pass could not complete
    #[error("partition pass failed: {0}")]
    PassFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_display() {
        let e = ConfigError::TooManyBins { bins: 32, max: 16, backend: "packed" };
        assert_eq!(e.to_string(), "32 bins requested but the packed histogram holds at most 16");

        let p: PartitionError = ConfigError::ZeroDimension("workers_per_group").into();
        assert_eq!(p.to_string(), "invalid configuration: workers_per_group must be greater than zero");

        let c = PartitionError::Capacity { needed: 10, available: 4 };
        assert_eq!(c.to_string(), "output holds 4 elements but 10 are required");

        let o = PartitionError::CarryOverlap { first: 1, second: 2 };
        assert_eq!(o.to_string(), "bin carry sends bins 1 and 2 to overlapping output ranges");
    }
}
