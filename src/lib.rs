//! Stable radix distribution of keys (and values) into bin-contiguous output, run tile by tile
//! over many concurrent groups
#![warn(missing_docs)]
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Error types of configuration and dispatch
pub mod error;

/// Tile geometry, packing limits and strategy selection
pub mod config;

/// Digit classifiers mapping keys to bins
pub mod classify;

/// Bit-field helpers for packed counters
pub mod bits;

/// Tile storage and loader
pub mod tile;

/// Subgroup scans and raking reductions
pub mod scan;

/// Group histograms: bit-packed and naive backends
pub mod histogram;

/// Group-local exchange buffer of the two-phase scatter
pub mod exchange;

/// Offset resolution and output sinks
pub mod scatter;

/// The per-tile stage machine
pub mod pass;

/// Work distribution, upsweep and spine
pub mod spine;

/// Multi-group dispatch
pub mod engine;

/// Grid-wide software barrier
pub mod barrier;

/// Frontier-partitioning breadth-first search
pub mod bfs;

/// Serial reference implementations
pub mod verify;

pub mod cli;
use crate::cli::*;

use crate::bfs::{bfs, random_graph, reference_depths, CsrGraph, UNREACHABLE};
use crate::classify::RadixDigit;
use crate::config::{PayloadKind, TileConfig, DEFAULT_SUBGROUP};
use crate::engine::Partitioner;
use crate::error::PartitionError;
use crate::verify::reference_partition;

#[allow(clippy::too_many_arguments)]
fn run_partition(
    elements: usize,
    seed: u64,
    bits: u32,
    shift: u32,
    geometry: (usize, usize, usize),
    workers: usize,
    raking: Option<usize>,
    scatter: ScatterArg,
    pairs: bool,
    backend: BackendArg,
    groups: usize,
    iterations: usize,
) -> Result<(), PartitionError> {
    let (lanes, loads, cycles) = geometry;
    let mut config = TileConfig::default()
        .with_geometry(lanes, loads, cycles)
        .with_workers(workers, DEFAULT_SUBGROUP)
        .with_bins(1 << bits)
        .with_scatter(scatter.into())
        .with_backend(backend.into())
        .with_payload(if pairs { PayloadKind::KeysAndValues } else { PayloadKind::KeysOnly });
    if let Some(r) = raking {
        config = config.with_raking_workers(r);
    }
    log::info!("{}", config);

    let classifier = RadixDigit::new(shift, bits);
    let partitioner: Partitioner<u32, _> = Partitioner::new(config, classifier)?.with_groups(groups);

    log::info!("Generating {} random keys", elements);
    let mut rng = StdRng::seed_from_u64(seed);
    let keys: Vec<u32>   = (0..elements).map(|_| rng.gen()).collect();
    let values: Vec<u32> = (0..elements as u32).collect();
    let (ref_keys, ref_values) = reference_partition(&keys, pairs.then_some(&values[..]), &classifier);

    let mut out_keys   = vec![0u32; elements];
    let mut out_values = vec![0u32; if pairs { elements } else { 0 }];
    let mut timings    = Vec::with_capacity(iterations);

    let pb = ProgressBar::new(iterations as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.set_message(format!("{}", scatter));
    for _ in 0..iterations {
        let start = Instant::now();
        if pairs {
            partitioner.partition_pairs(&keys, &values, &mut out_keys, &mut out_values)?;
        } else {
            partitioner.partition_keys(&keys, &mut out_keys)?;
        }
        timings.push(start.elapsed().as_secs_f64());
        pb.inc(1);
    }
    pb.finish_and_clear();

    if out_keys != ref_keys || (pairs && out_values != ref_values) {
        return Err(PartitionError::PassFailed("output differs from the reference partition".to_string()));
    }

    let best = timings.iter().cloned().fold(f64::INFINITY, f64::min);
    let mean = timings.iter().sum::<f64>() / timings.len().max(1) as f64;
    eprintln!(
        "{} keys, {} bins, {}: best {:.3} ms ({:.1} Mkeys/s), mean {:.3} ms. Output verified.",
        elements,
        1usize << bits,
        scatter,
        best * 1e3,
        elements as f64 / best / 1e6,
        mean * 1e3,
    );
    Ok(())
}

fn run_bfs(vertices: usize, degree: usize, seed: u64, groups: usize, source: u32, scatter: ScatterArg) -> Result<(), PartitionError> {
    log::info!("Generating a random graph of {} vertices, {} edges per vertex", vertices, degree);
    let graph = random_graph(vertices, degree, seed);
    let csr   = CsrGraph::from(&graph);
    let config = TileConfig::default().with_scatter(scatter.into());

    let start  = Instant::now();
    let result = bfs(&csr, source, groups, &config)?;
    let elapsed = start.elapsed().as_secs_f64();

    if result.depths != reference_depths(&graph, source as usize) {
        return Err(PartitionError::PassFailed("BFS depths differ from Dijkstra".to_string()));
    }
    let reached = result.depths.iter().filter(|d| **d != UNREACHABLE).count();
    eprintln!(
        "{} of {} vertices reached in {} levels with {} groups, {}: {:.3} ms. Depths verified.",
        reached, vertices, result.levels, groups, scatter, elapsed * 1e3,
    );
    Ok(())
}

#[doc(hidden)]
pub fn main() {
    let args = cli_args();
    if args.verbose {
        simple_logger::init_with_level(log::Level::Info).unwrap();
    } else {
        simple_logger::init_with_level(log::Level::Warn).unwrap();
    }

    log::info!("Starting program!");
    eprintln!("radixdist");
    let start = Instant::now();
    let outcome = match &args.command {
        Commands::Partition {
            elements,
            seed,
            bits,
            shift,
            lanes,
            loads,
            cycles,
            workers,
            raking,
            scatter,
            pairs,
            backend,
            groups,
            iterations,
            threads,
        } => {
            check_threads(*threads);
            log::info!("Checking requested threads and creating pool if needed");
            rayon::ThreadPoolBuilder::new()
                .num_threads(*threads)
                .build_global()
                .unwrap();

            run_partition(
                *elements,
                *seed,
                *bits,
                *shift,
                (*lanes, *loads, *cycles),
                *workers,
                *raking,
                *scatter,
                *pairs,
                *backend,
                groups.unwrap_or(*threads),
                *iterations,
            )
        },
        Commands::Bfs {
            vertices,
            degree,
            seed,
            groups,
            source,
            scatter,
        } => {
            check_threads(*groups);
            run_bfs(*vertices, *degree, *seed, *groups, *source, *scatter)
        },
    };

    if let Err(e) = outcome {
        log::error!("{}", e);
        eprintln!("radixdist failed: {}", e);
        std::process::exit(1);
    }
    eprintln!("radixdist done in {:.3} s", start.elapsed().as_secs_f64());
    log::info!("Finishing program!");
}
