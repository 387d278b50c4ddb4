//! Breadth-first search driven by frontier partitioning.
//!
//! A fixed set of persistent groups (one thread each) expands the frontier level by level.
//! Each level, every group gathers the neighbours of its share of the frontier, classifies
//! them as unvisited (bin 0) or visited (bin 1), publishes its two counts and waits on the
//! grid barrier. Each group then derives its own BinCarry from all published counts and
//! partitions its candidates into one shared array, so that the unvisited candidates of all
//! groups end up as one contiguous prefix. After a second barrier group 0 labels that prefix
//! and compacts it into the next frontier; a third barrier releases the next level.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use petgraph::algo::dijkstra;
use petgraph::graph::{Graph, IndexType, NodeIndex, UnGraph};
use petgraph::EdgeType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::barrier::GridBarrier;
use crate::classify::{Bin, ClassifyFn, DigitClassifier};
use crate::config::{PayloadKind, TileConfig};
use crate::engine::Partitioner;
use crate::error::PartitionError;
use crate::scatter::Discard;
use crate::spine::{group_carry, WorkDistribution};

/// Depth of a vertex the search never reached
pub const UNREACHABLE: u32 = u32::MAX;

/// Compressed sparse row adjacency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrGraph {
    offsets: Vec<usize>,
    targets: Vec<u32>,
}

impl CsrGraph {
    /// Number of vertices
    pub fn vertices(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Number of adjacency entries (twice the edges of an undirected graph)
    pub fn adjacencies(&self) -> usize {
        self.targets.len()
    }

    /// Neighbours of `v`
    #[inline]
    pub fn neighbors(&self, v: u32) -> &[u32] {
        &self.targets[self.offsets[v as usize]..self.offsets[v as usize + 1]]
    }
}

impl<N, E, Ty: EdgeType, Ix: IndexType> From<&Graph<N, E, Ty, Ix>> for CsrGraph {
    fn from(graph: &Graph<N, E, Ty, Ix>) -> Self {
        let mut offsets = Vec::with_capacity(graph.node_count() + 1);
        let mut targets = Vec::with_capacity(graph.edge_count());
        offsets.push(0);
        for v in graph.node_indices() {
            targets.extend(graph.neighbors(v).map(|n| n.index() as u32));
            offsets.push(targets.len());
        }
        Self { offsets, targets }
    }
}

/// Depths found by [`bfs`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BfsResult {
    /// Depth of every vertex, [`UNREACHABLE`] if not reached
    pub depths: Vec<u32>,
    /// Number of non-empty frontiers, source level included
    pub levels: usize,
}

/// State shared by all persistent groups
struct Shared<'g> {
    graph: &'g CsrGraph,
    groups: usize,
    depths: Vec<AtomicU32>,
    frontier: Vec<AtomicU32>,
    frontier_len: AtomicUsize,
    candidates: Vec<AtomicU32>,
    histograms: Vec<[AtomicUsize; 2]>,
    barrier: GridBarrier,
    levels: AtomicUsize,
    done: AtomicBool,
    failure: Mutex<Option<PartitionError>>,
}

impl Shared<'_> {
    fn fail(&self, e: PartitionError) {
        log::error!("Frontier partition failed: {}", e);
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(e);
        }
    }

    fn published(&self) -> Vec<Vec<usize>> {
        self.histograms.iter()
            .map(|h| vec![h[0].load(Ordering::Relaxed), h[1].load(Ordering::Relaxed)])
            .collect()
    }

    /// Label the unvisited prefix of the partitioned candidates and make it the next frontier.
    /// A vertex can be a candidate several times; only its first occurrence is kept.
    fn materialize(&self, histograms: &[Vec<usize>]) {
        let unvisited: usize = histograms.iter().map(|h| h[0]).sum();
        let depth = self.levels.fetch_add(1, Ordering::Relaxed) as u32 + 1;

        let mut len = 0;
        for slot in &self.candidates[..unvisited] {
            let v = slot.load(Ordering::Relaxed) as usize;
            if self.depths[v].load(Ordering::Relaxed) == UNREACHABLE {
                self.depths[v].store(depth, Ordering::Relaxed);
                self.frontier[len].store(v as u32, Ordering::Relaxed);
                len += 1;
            }
        }
        log::debug!("Level {}: {} unvisited candidates, {} new vertices", depth, unvisited, len);

        self.frontier_len.store(len, Ordering::Relaxed);
        let failed = self.failure.lock().map_or(true, |f| f.is_some());
        if len == 0 || failed {
            self.done.store(true, Ordering::Relaxed);
        }
    }
}

/// One persistent group's share of every level
fn persistent_group<C: DigitClassifier<u32>>(shared: &Shared, partitioner: &Partitioner<u32, C>, g: usize) {
    let mut candidates: Vec<u32> = Vec::new();
    loop {
        let n = shared.frontier_len.load(Ordering::Relaxed);
        let share = WorkDistribution::new(n, 1, shared.groups);
        candidates.clear();
        if g < share.groups() {
            for i in share.group_range(g) {
                let u = shared.frontier[i].load(Ordering::Relaxed);
                candidates.extend_from_slice(shared.graph.neighbors(u));
            }
        }

        let mut counts = [0usize; 2];
        for v in &candidates {
            counts[partitioner.classifier().classify(v) as usize] += 1;
        }
        shared.histograms[g][0].store(counts[0], Ordering::Relaxed);
        shared.histograms[g][1].store(counts[1], Ordering::Relaxed);
        shared.barrier.wait();

        let histograms = shared.published();
        let carry = group_carry(&histograms, g, 2);
        if let Err(e) = partitioner.partition_group::<(), _, _>(&candidates, None, &carry, shared.candidates.as_slice(), &Discard) {
            shared.fail(e);
        }
        shared.barrier.wait();

        if g == 0 {
            shared.materialize(&histograms);
        }
        shared.barrier.wait();

        if shared.done.load(Ordering::Relaxed) {
            break;
        }
    }
}

/// Breadth-first search from `source` over `groups` persistent groups. Frontier partitions
/// use the geometry and scatter strategy of `config`; its bin count and payload are replaced.
pub fn bfs(graph: &CsrGraph, source: u32, groups: usize, config: &TileConfig) -> Result<BfsResult, PartitionError> {
    let n = graph.vertices();
    if source as usize >= n {
        return Err(PartitionError::PassFailed(format!("source vertex {} not in a graph of {} vertices", source, n)));
    }
    let groups = groups.max(1);

    let shared = Shared {
        graph,
        groups,
        depths       : (0..n).map(|_| AtomicU32::new(UNREACHABLE)).collect(),
        frontier     : (0..n).map(|_| AtomicU32::new(0)).collect(),
        frontier_len : AtomicUsize::new(1),
        candidates   : (0..graph.adjacencies()).map(|_| AtomicU32::new(0)).collect(),
        histograms   : (0..groups).map(|_| [AtomicUsize::new(0), AtomicUsize::new(0)]).collect(),
        barrier      : GridBarrier::new(groups),
        levels       : AtomicUsize::new(0),
        done         : AtomicBool::new(false),
        failure      : Mutex::new(None),
    };
    shared.depths[source as usize].store(0, Ordering::Relaxed);
    shared.frontier[0].store(source, Ordering::Relaxed);

    let visited = ClassifyFn::new(2, |v: &u32| (shared.depths[*v as usize].load(Ordering::Relaxed) != UNREACHABLE) as Bin);
    let frontier_config = config.clone().with_bins(2).with_payload(PayloadKind::KeysOnly);
    let partitioner: Partitioner<u32, _> = Partitioner::new(frontier_config, &visited)?.with_groups(1);

    log::info!("BFS from {} over {} vertices with {} groups", source, n, groups);
    std::thread::scope(|s| {
        for g in 0..groups {
            let shared      = &shared;
            let partitioner = &partitioner;
            s.spawn(move || persistent_group(shared, partitioner, g));
        }
    });

    if let Some(e) = shared.failure.lock().ok().and_then(|mut f| f.take()) {
        return Err(e);
    }
    Ok(BfsResult {
        depths : shared.depths.iter().map(|d| d.load(Ordering::Relaxed)).collect(),
        levels : shared.levels.load(Ordering::Relaxed),
    })
}

/// Depths from `source` by unit-weight Dijkstra
pub fn reference_depths<N, E, Ty: EdgeType, Ix: IndexType>(graph: &Graph<N, E, Ty, Ix>, source: usize) -> Vec<u32> {
    let costs = dijkstra(graph, NodeIndex::new(source), None, |_| 1u32);
    let mut depths = vec![UNREACHABLE; graph.node_count()];
    for (node, cost) in costs {
        depths[node.index()] = cost;
    }
    depths
}

/// Undirected graph where every vertex gets `degree` edges to uniformly random vertices
pub fn random_graph(vertices: usize, degree: usize, seed: u64) -> UnGraph<(), ()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut graph = UnGraph::with_capacity(vertices, vertices * degree);
    let nodes: Vec<NodeIndex> = (0..vertices).map(|_| graph.add_node(())).collect();
    for &a in &nodes {
        for _ in 0..degree {
            let b = nodes[rng.gen_range(0..vertices)];
            graph.add_edge(a, b, ());
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScatterKind;

    use pretty_assertions::assert_eq;

    fn frontier_config() -> TileConfig {
        TileConfig::default().with_geometry(2, 2, 2).with_workers(4, 4)
    }

    #[test]
    fn test_csr_from_petgraph() {
        let mut g: Graph<(), (), petgraph::Directed> = Graph::new();
        let a = g.add_node(());
        let b = g.add_node(());
        let c = g.add_node(());
        g.add_edge(a, b, ());
        g.add_edge(a, c, ());
        g.add_edge(c, b, ());
        let csr = CsrGraph::from(&g);
        assert_eq!(csr.vertices(), 3);
        assert_eq!(csr.adjacencies(), 3);
        let mut out_a = csr.neighbors(0).to_vec();
        out_a.sort();
        assert_eq!(out_a, vec![1, 2]);
        assert!(csr.neighbors(1).is_empty());
        assert_eq!(csr.neighbors(2), &[1]);
    }

    #[test]
    fn test_path_levels() {
        let g = UnGraph::<(), ()>::from_edges([(0u32, 1u32), (1, 2), (2, 3)]);
        let r = bfs(&CsrGraph::from(&g), 0, 2, &frontier_config()).unwrap();
        assert_eq!(r.depths, vec![0, 1, 2, 3]);
        assert_eq!(r.levels, 4);
    }

    #[test]
    fn test_unreachable_component() {
        let mut g = UnGraph::<(), ()>::from_edges([(0u32, 1u32), (2, 3)]);
        g.add_node(());
        let r = bfs(&CsrGraph::from(&g), 1, 3, &frontier_config()).unwrap();
        assert_eq!(r.depths, vec![1, 0, UNREACHABLE, UNREACHABLE, UNREACHABLE]);
        assert_eq!(r.levels, 2);
    }

    #[test]
    fn test_random_graph_matches_dijkstra() {
        for (seed, groups) in [(1u64, 1usize), (2, 3), (3, 8)] {
            let g = random_graph(300, 2, seed);
            let csr = CsrGraph::from(&g);
            let expected = reference_depths(&g, 0);
            for scatter in [ScatterKind::TwoPhase, ScatterKind::Direct] {
                let r = bfs(&csr, 0, groups, &frontier_config().with_scatter(scatter)).unwrap();
                assert_eq!(r.depths, expected);
                let deepest = *expected.iter().filter(|d| **d != UNREACHABLE).max().unwrap();
                assert_eq!(r.levels, deepest as usize + 1);
            }
        }
    }

    #[test]
    fn test_bad_source() {
        let g = random_graph(4, 1, 0);
        assert!(matches!(bfs(&CsrGraph::from(&g), 9, 1, &frontier_config()), Err(PartitionError::PassFailed(_))));
    }
}
