//! Tile geometry and strategy selection.
//!
//! A [`TileConfig`] is fixed before any dispatch. Every packing limit of the packed histogram
//! is checked here, once, so that the hot path never has to test for overflow.

use std::fmt;

use crate::error::ConfigError;

/// Widest nibble counter value, and so the maximum number of vector lanes per load
pub const MAX_PACKED_LANES: usize = 15;
/// Bins addressable by one 64-bit nibble word
pub const MAX_PACKED_BINS: usize = 16;
/// Bins supported by the one-counter-per-bin backend
pub const MAX_NAIVE_BINS: usize = 4096;
/// Largest per-bin sum a byte lane can hold during raking
pub const MAX_BYTE_COUNT: usize = u8::MAX as usize;
/// Largest per-bin sum a 16-bit lane can hold during the subgroup scan
pub const MAX_CYCLE_ELEMENTS: usize = u16::MAX as usize;

/// Default vector lanes per load
pub const DEFAULT_LANES: usize = 4;
/// Default loads per cycle
pub const DEFAULT_LOADS: usize = 2;
/// Default cycles per tile
pub const DEFAULT_CYCLES: usize = 2;
/// Default workers per group
pub const DEFAULT_WORKERS: usize = 128;
/// Default width of a lock-step subgroup
pub const DEFAULT_SUBGROUP: usize = 32;

/// Whether values travel with the keys
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadKind {
    /// Only keys are moved
    KeysOnly,
    /// A values array is moved in lock-step with the keys
    KeysAndValues,
}

/// How ranked keys reach the output
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScatterKind {
    /// Reorder through the local exchange buffer, then write sequentially
    TwoPhase,
    /// Write straight from rank order
    Direct,
}

/// Group histogram implementation
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HistogramBackend {
    /// Nibble/byte bit-packed counters
    Packed,
    /// One counter per bin
    Naive,
    /// Packed unless the bin count makes packing pointless or impossible
    Auto,
}

impl fmt::Display for HistogramBackend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::Packed => write!(f, "packed"),
            Self::Naive  => write!(f, "naive"),
            Self::Auto   => write!(f, "auto"),
        }
    }
}

/// Compile/setup-time configuration of a tile partition pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileConfig {
    /// Elements handled per worker per load
    pub vector_lanes: usize,
    /// Loads per cycle
    pub loads_per_cycle: usize,
    /// Cycles per tile
    pub cycles_per_tile: usize,
    /// Workers per group
    pub workers_per_group: usize,
    /// Width of a lock-step subgroup
    pub subgroup_width: usize,
    /// Workers that rake the published counters (one subgroup at most)
    pub raking_workers: usize,
    /// Number of bins the classifier produces
    pub bin_count: usize,
    /// Keys only, or keys and values
    pub payload: PayloadKind,
    /// Two-phase or direct scatter
    pub scatter: ScatterKind,
    /// Histogram backend
    pub backend: HistogramBackend,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            vector_lanes      : DEFAULT_LANES,
            loads_per_cycle   : DEFAULT_LOADS,
            cycles_per_tile   : DEFAULT_CYCLES,
            workers_per_group : DEFAULT_WORKERS,
            subgroup_width    : DEFAULT_SUBGROUP,
            raking_workers    : DEFAULT_SUBGROUP,
            bin_count         : 16,
            payload           : PayloadKind::KeysOnly,
            scatter           : ScatterKind::TwoPhase,
            backend           : HistogramBackend::Auto,
        }
    }
}

impl TileConfig {
    /// Set the per-worker geometry: lanes per load, loads per cycle, cycles per tile
    pub fn with_geometry(mut self, lanes: usize, loads: usize, cycles: usize) -> Self {
        self.vector_lanes    = lanes;
        self.loads_per_cycle = loads;
        self.cycles_per_tile = cycles;
        self
    }

    /// Set the group shape. Raking workers default to one full subgroup, capped by the number
    /// of published counters.
    pub fn with_workers(mut self, workers: usize, subgroup: usize) -> Self {
        self.workers_per_group = workers;
        self.subgroup_width    = subgroup;
        self.raking_workers    = subgroup.min(workers * self.loads_per_cycle).max(1);
        self
    }

    /// Override the number of raking workers
    pub fn with_raking_workers(mut self, raking: usize) -> Self {
        self.raking_workers = raking;
        self
    }

    /// Set the number of bins
    pub fn with_bins(mut self, bins: usize) -> Self {
        self.bin_count = bins;
        self
    }

    /// Select keys-only or keys+values
    pub fn with_payload(mut self, payload: PayloadKind) -> Self {
        self.payload = payload;
        self
    }

    /// Select the scatter strategy
    pub fn with_scatter(mut self, scatter: ScatterKind) -> Self {
        self.scatter = scatter;
        self
    }

    /// Select the histogram backend
    pub fn with_backend(mut self, backend: HistogramBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Elements per worker per cycle
    #[inline(always)]
    pub fn elements_per_worker(&self) -> usize {
        self.vector_lanes * self.loads_per_cycle
    }

    /// Elements processed by a group in one cycle
    #[inline(always)]
    pub fn cycle_elements(&self) -> usize {
        self.elements_per_worker() * self.workers_per_group
    }

    /// Elements in a full tile
    #[inline(always)]
    pub fn tile_elements(&self) -> usize {
        self.cycle_elements() * self.cycles_per_tile
    }

    /// Packed counters published per cycle, one per (load, worker)
    #[inline(always)]
    pub fn raking_entries(&self) -> usize {
        self.loads_per_cycle * self.workers_per_group
    }

    /// Counters serially reduced by each raking worker
    #[inline(always)]
    pub fn raking_segment(&self) -> usize {
        self.raking_entries() / self.raking_workers
    }

    /// Backend that will actually run
    pub fn resolved_backend(&self) -> HistogramBackend {
        match self.backend {
            HistogramBackend::Auto => {
                if self.bin_count <= 2 || self.bin_count > MAX_PACKED_BINS {
                    HistogramBackend::Naive
                } else {
                    HistogramBackend::Packed
                }
            },
            other => other,
        }
    }

    /// Check every static invariant of the geometry and of the chosen backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dims = [
            ("vector_lanes",      self.vector_lanes),
            ("loads_per_cycle",   self.loads_per_cycle),
            ("cycles_per_tile",   self.cycles_per_tile),
            ("workers_per_group", self.workers_per_group),
            ("subgroup_width",    self.subgroup_width),
            ("raking_workers",    self.raking_workers),
            ("bin_count",         self.bin_count),
        ];
        if let Some((name, _)) = dims.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ZeroDimension(name));
        }

        if self.raking_entries() % self.raking_workers != 0 {
            return Err(ConfigError::RakingLayout { raking: self.raking_workers, entries: self.raking_entries() });
        }
        if self.raking_workers > self.subgroup_width {
            return Err(ConfigError::RakingWidth { raking: self.raking_workers, width: self.subgroup_width });
        }
        if self.cycle_elements() > MAX_CYCLE_ELEMENTS {
            return Err(ConfigError::CycleTooLarge { elements: self.cycle_elements(), max: MAX_CYCLE_ELEMENTS });
        }

        match self.resolved_backend() {
            HistogramBackend::Packed => {
                if self.bin_count > MAX_PACKED_BINS {
                    return Err(ConfigError::TooManyBins { bins: self.bin_count, max: MAX_PACKED_BINS, backend: "packed" });
                }
                if self.vector_lanes > MAX_PACKED_LANES {
                    return Err(ConfigError::TooManyLanes { lanes: self.vector_lanes, max: MAX_PACKED_LANES });
                }
                if self.raking_segment() * self.vector_lanes > MAX_BYTE_COUNT {
                    return Err(ConfigError::SegmentOverflow { segment: self.raking_segment(), lanes: self.vector_lanes });
                }
            },
            _ => {
                if self.bin_count > MAX_NAIVE_BINS {
                    return Err(ConfigError::TooManyBins { bins: self.bin_count, max: MAX_NAIVE_BINS, backend: "naive" });
                }
            },
        }
        Ok(())
    }
}

impl fmt::Display for TileConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} bins; tile {} = {} cycles x {} loads x {} lanes x {} workers; {} raking workers; {:?}/{:?}; {} backend",
            self.bin_count,
            self.tile_elements(),
            self.cycles_per_tile,
            self.loads_per_cycle,
            self.vector_lanes,
            self.workers_per_group,
            self.raking_workers,
            self.payload,
            self.scatter,
            self.resolved_backend(),
        )
    }
}
