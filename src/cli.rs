//! Command line interface, built using [`crate::clap` with `Derive`](https://docs.rs/clap/latest/clap/_derive/_tutorial/index.html)
use std::fmt;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{
    HistogramBackend, ScatterKind,
    DEFAULT_CYCLES, DEFAULT_LANES, DEFAULT_LOADS, DEFAULT_WORKERS, MAX_NAIVE_BINS,
};

/// Default number of keys to partition
pub const DEFAULT_ELEMENTS: usize = 1 << 22;
/// Default digit width in bits
pub const DEFAULT_BITS: u32 = 4;
/// Default number of timed iterations
pub const DEFAULT_ITERATIONS: usize = 10;
/// Default random seed
pub const DEFAULT_SEED: u64 = 42;
/// Default number of graph vertices
pub const DEFAULT_VERTICES: usize = 1 << 16;
/// Default number of random edges per vertex
pub const DEFAULT_DEGREE: usize = 4;
/// Default number of persistent BFS groups
pub const DEFAULT_BFS_GROUPS: usize = 4;

#[doc(hidden)]
fn valid_bits(s: &str) -> Result<u32, String> {
    let bits: u32 = s
        .parse()
        .map_err(|_| format!("`{s}` isn't a valid digit width"))?;
    if !(1..=12).contains(&bits) || (1usize << bits) > MAX_NAIVE_BINS {
        Err("Digit width must be between 1 and 12 bits (inclusive)".to_string())
    } else {
        Ok(bits)
    }
}

#[doc(hidden)]
fn valid_positive(s: &str) -> Result<usize, String> {
    let v: usize = s
        .parse()
        .map_err(|_| format!("`{s}` isn't a valid number"))?;
    if v < 1 {
        Err("Value must be one or higher".to_string())
    } else {
        Ok(v)
    }
}

#[doc(hidden)]
fn valid_cpus(s: &str) -> Result<usize, String> {
    let threads: usize = s
        .parse()
        .map_err(|_| format!("`{s}` isn't a valid number of cores"))?;
    if threads < 1 {
        Err("Threads must be one or higher".to_string())
    } else {
        Ok(threads)
    }
}

/// Prints a warning if more threads than available have been requested
pub fn check_threads(threads: usize) {
    let max_threads = num_cpus::get();
    if threads > max_threads {
        log::warn!("{threads} threads is greater than available cores {max_threads}");
    }
}

/// Possible scatter strategies
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum ScatterArg {
    /// Reorder through group-local scratch, then write sequentially
    TwoPhase,
    /// Write every key straight from its rank
    Direct,
}

/// As text, for use in logging messages
impl fmt::Display for ScatterArg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::TwoPhase => write!(f, "two-phase scatter"),
            Self::Direct   => write!(f, "direct scatter"),
        }
    }
}

impl From<ScatterArg> for ScatterKind {
    fn from(arg: ScatterArg) -> Self {
        match arg {
            ScatterArg::TwoPhase => ScatterKind::TwoPhase,
            ScatterArg::Direct   => ScatterKind::Direct,
        }
    }
}

/// Possible histogram backends
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum BackendArg {
    /// Packed for 3 to 16 bins, naive otherwise
    Auto,
    /// Bit-packed nibble/byte counters
    Packed,
    /// One counter per bin
    Naive,
}

impl From<BackendArg> for HistogramBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto   => HistogramBackend::Auto,
            BackendArg::Packed => HistogramBackend::Packed,
            BackendArg::Naive  => HistogramBackend::Naive,
        }
    }
}

/// Options that apply to all subcommands
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[doc(hidden)]
    #[command(subcommand)]
    pub command: Commands,

    /// Show progress messages
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Subcommands and their specific options
#[derive(Subcommand)]
pub enum Commands {
    /// Partition random keys by one radix digit and time it
    Partition {
        /// Number of keys
        #[arg(short = 'n', long, default_value_t = DEFAULT_ELEMENTS)]
        elements: usize,

        /// Random seed for the keys
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Digit width in bits; the partition has 2^bits bins
        #[arg(short, long, value_parser = valid_bits, default_value_t = DEFAULT_BITS)]
        bits: u32,

        /// Position of the digit's lowest bit
        #[arg(long, default_value_t = 0)]
        shift: u32,

        /// Vector lanes per load
        #[arg(long, value_parser = valid_positive, default_value_t = DEFAULT_LANES)]
        lanes: usize,

        /// Loads per cycle
        #[arg(long, value_parser = valid_positive, default_value_t = DEFAULT_LOADS)]
        loads: usize,

        /// Cycles per tile
        #[arg(long, value_parser = valid_positive, default_value_t = DEFAULT_CYCLES)]
        cycles: usize,

        /// Workers per group
        #[arg(long, value_parser = valid_positive, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Raking workers (defaults to one subgroup)
        #[arg(long, value_parser = valid_positive)]
        raking: Option<usize>,

        /// Scatter strategy
        #[arg(long, value_enum, default_value_t = ScatterArg::TwoPhase)]
        scatter: ScatterArg,

        /// Move a value along with every key
        #[arg(long, default_value_t = false)]
        pairs: bool,

        /// Histogram backend
        #[arg(long, value_enum, default_value_t = BackendArg::Auto)]
        backend: BackendArg,

        /// Concurrent groups (defaults to the number of threads)
        #[arg(long, value_parser = valid_positive)]
        groups: Option<usize>,

        /// Timed iterations
        #[arg(long, value_parser = valid_positive, default_value_t = DEFAULT_ITERATIONS)]
        iterations: usize,

        /// Number of CPU threads
        #[arg(long, value_parser = valid_cpus, default_value_t = 1)]
        threads: usize,
    },

    /// Breadth-first search over a random graph, checked against Dijkstra
    Bfs {
        /// Number of vertices
        #[arg(long, value_parser = valid_positive, default_value_t = DEFAULT_VERTICES)]
        vertices: usize,

        /// Random edges per vertex
        #[arg(long, default_value_t = DEFAULT_DEGREE)]
        degree: usize,

        /// Random seed for the graph
        #[arg(long, default_value_t = DEFAULT_SEED)]
        seed: u64,

        /// Persistent groups, one thread each
        #[arg(long, value_parser = valid_positive, default_value_t = DEFAULT_BFS_GROUPS)]
        groups: usize,

        /// Vertex to start from
        #[arg(long, default_value_t = 0)]
        source: u32,

        /// Scatter strategy of the frontier partitions
        #[arg(long, value_enum, default_value_t = ScatterArg::TwoPhase)]
        scatter: ScatterArg,
    },
}

/// Function to parse command line args into [`Args`] struct
pub fn cli_args() -> Args {
    Args::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_validators() {
        assert_eq!(valid_bits("4"), Ok(4));
        assert!(valid_bits("0").is_err());
        assert!(valid_bits("13").is_err());
        assert!(valid_positive("0").is_err());
        assert_eq!(valid_cpus("2"), Ok(2));
    }

    #[test]
    fn test_parse_partition() {
        let args = Args::try_parse_from(["radixdist", "partition", "-n", "1000", "--scatter", "direct", "--pairs", "-v"]).unwrap();
        assert!(args.verbose);
        match args.command {
            Commands::Partition { elements, scatter, pairs, bits, .. } => {
                assert_eq!(elements, 1000);
                assert!(scatter == ScatterArg::Direct);
                assert!(pairs);
                assert_eq!(bits, DEFAULT_BITS);
            },
            _ => panic!("expected the partition subcommand"),
        }
    }
}
