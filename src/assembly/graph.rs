// Copyright 2016-2019 Johannes Köster, David Lähnemann.
// Licensed under the GNU GPLv3 license (https://opensource.org/licenses/GPL-3.0)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! A k-mer graph over the reference window and the reads of an active region.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use ordered_float::OrderedFloat;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use petgraph::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EdgeInfo {
    multiplicity: u32,
    is_ref: bool,
}

#[derive(Debug)]
pub(crate) struct KmerGraph {
    k: usize,
    graph: DiGraph<Vec<u8>, EdgeInfo>,
    nodes: HashMap<Vec<u8>, NodeIndex>,
    source: NodeIndex,
    sink: NodeIndex,
}

/// A path from the source awaiting extension. The best score comes first, ties are broken
/// by the smaller node sequence.
#[derive(Debug, PartialEq, Eq)]
struct PartialPath {
    score: OrderedFloat<f64>,
    nodes: Vec<NodeIndex>,
}

impl Ord for PartialPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.nodes.cmp(&self.nodes))
    }
}

impl PartialOrd for PartialPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A source to sink path with its log score.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScoredPath {
    pub(crate) bases: Vec<u8>,
    pub(crate) score: f64,
}

fn is_valid_base(b: u8) -> bool {
    matches!(b, b'A' | b'C' | b'G' | b'T')
}

impl KmerGraph {
    /// Build the graph from the reference path. Returns `None` if the reference is shorter
    /// than k, contains non-ACGT symbols, or a k-mer of the reference occurs twice.
    pub(crate) fn from_reference(reference: &[u8], k: usize) -> Option<Self> {
        if k == 0 || reference.len() <= k || !reference.iter().all(|b| is_valid_base(*b)) {
            return None;
        }
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        let mut prev: Option<NodeIndex> = None;
        for kmer in reference.windows(k) {
            if nodes.contains_key(kmer) {
                return None;
            }
            let node = graph.add_node(kmer.to_vec());
            nodes.insert(kmer.to_vec(), node);
            if let Some(prev) = prev {
                graph.add_edge(
                    prev,
                    node,
                    EdgeInfo {
                        multiplicity: 0,
                        is_ref: true,
                    },
                );
            }
            prev = Some(node);
        }
        let source = nodes[&reference[..k]];
        let sink = nodes[&reference[reference.len() - k..]];
        Some(KmerGraph {
            k,
            graph,
            nodes,
            source,
            sink,
        })
    }

    /// Thread a read through the graph. The read is split at bases below the given quality
    /// and at ambiguous bases.
    pub(crate) fn add_sequence(&mut self, seq: &[u8], qual: &[u8], min_qual: u8) {
        let mut segment_start = 0;
        for i in 0..=seq.len() {
            let breaks = i == seq.len() || qual[i] < min_qual || !is_valid_base(seq[i]);
            if breaks {
                if i - segment_start > self.k {
                    self.thread(&seq[segment_start..i]);
                }
                segment_start = i + 1;
            }
        }
    }

    fn thread(&mut self, segment: &[u8]) {
        let mut prev: Option<NodeIndex> = None;
        for kmer in segment.windows(self.k) {
            let node = match self.nodes.get(kmer) {
                Some(node) => *node,
                None => {
                    let node = self.graph.add_node(kmer.to_vec());
                    self.nodes.insert(kmer.to_vec(), node);
                    node
                }
            };
            if let Some(prev) = prev {
                match self.graph.find_edge(prev, node) {
                    Some(edge) => self.graph[edge].multiplicity += 1,
                    None => {
                        self.graph.add_edge(
                            prev,
                            node,
                            EdgeInfo {
                                multiplicity: 1,
                                is_ref: false,
                            },
                        );
                    }
                }
            }
            prev = Some(node);
        }
    }

    /// Remove non-reference edges seen less often than `min_multiplicity`.
    pub(crate) fn prune(&mut self, min_multiplicity: u32) {
        self.graph
            .retain_edges(|g, e| g[e].is_ref || g[e].multiplicity >= min_multiplicity);
    }

    pub(crate) fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Nodes lying on some path from source to sink.
    fn useful_nodes(&self) -> HashSet<NodeIndex> {
        let mut from_source = HashSet::new();
        let mut dfs = Dfs::new(&self.graph, self.source);
        while let Some(node) = dfs.next(&self.graph) {
            from_source.insert(node);
        }
        let reversed = Reversed(&self.graph);
        let mut useful = HashSet::new();
        let mut dfs = Dfs::new(reversed, self.sink);
        while let Some(node) = dfs.next(reversed) {
            if from_source.contains(&node) {
                useful.insert(node);
            }
        }
        useful
    }

    /// The `max_paths` best scoring source to sink paths, best first. The graph has to be
    /// acyclic. Partial paths are extended in order of their score, which never increases
    /// along a path, so complete paths come out best first. At most `max_explored` branching
    /// partial paths are expanded.
    pub(crate) fn best_paths(&self, max_paths: usize, max_explored: usize) -> Vec<ScoredPath> {
        let useful = self.useful_nodes();

        // log transition probabilities, normalized over the useful outgoing edges
        let mut transitions: HashMap<NodeIndex, Vec<(NodeIndex, f64)>> = HashMap::new();
        for &node in &useful {
            let out: Vec<_> = self
                .graph
                .edges_directed(node, Direction::Outgoing)
                .filter(|e| useful.contains(&e.target()))
                .map(|e| (e.target(), e.weight().multiplicity.max(1) as f64))
                .collect();
            let total: f64 = out.iter().map(|(_, m)| m).sum();
            let mut out: Vec<_> = out
                .into_iter()
                .map(|(target, m)| (target, (m / total).ln()))
                .collect();
            out.sort_by_key(|(target, _)| target.index());
            transitions.insert(node, out);
        }
        if !useful.contains(&self.source) {
            return Vec::new();
        }

        let mut complete = Vec::new();
        let mut explored = 0;
        let mut queue = BinaryHeap::new();
        queue.push(PartialPath {
            score: OrderedFloat(0.0),
            nodes: vec![self.source],
        });
        while let Some(PartialPath { score, mut nodes }) = queue.pop() {
            // follow unbranched stretches directly
            let mut last = nodes[nodes.len() - 1];
            while let Some([(target, _)]) = transitions.get(&last).map(|out| out.as_slice()) {
                if last == self.sink {
                    break;
                }
                nodes.push(*target);
                last = *target;
            }
            if last == self.sink {
                complete.push(ScoredPath {
                    bases: self.spell(&nodes),
                    score: score.into_inner(),
                });
                if complete.len() >= max_paths {
                    break;
                }
                continue;
            }
            explored += 1;
            if explored > max_explored {
                debug!(
                    "stopping path search after {} expansions with {} complete paths",
                    max_explored,
                    complete.len()
                );
                break;
            }
            if let Some(out) = transitions.get(&last) {
                for (target, ln_p) in out {
                    let mut next = nodes.clone();
                    next.push(*target);
                    queue.push(PartialPath {
                        score: OrderedFloat(score.into_inner() + ln_p),
                        nodes: next,
                    });
                }
            }
        }
        complete
    }

    fn spell(&self, path: &[NodeIndex]) -> Vec<u8> {
        let mut bases = self.graph[path[0]].clone();
        for node in &path[1..] {
            bases.push(self.graph[*node][self.k - 1]);
        }
        bases
    }

    #[cfg(test)]
    pub(crate) fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}
