//! Connected components of the directed link graph.
//!
//! Logistic entities declare the keys they take input from and deliver
//! output to. Each declaration is a directed edge; components are computed
//! over the undirected closure, and the direction is only used to find the
//! sources (no incoming edge) and sinks (no outgoing edge) of each one.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::union_find::UnionFind;

/// An entity with declared neighbours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkNode {
    /// Stable identity.
    pub key: String,
    /// Keys this node takes input from.
    pub inputs: Vec<String>,
    /// Keys this node delivers output to.
    pub outputs: Vec<String>,
}

/// One weakly connected component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkComponent {
    /// Number of nodes.
    pub node_count: usize,
    /// Number of distinct directed edges.
    pub edge_count: usize,
    /// Nodes with no incoming edge, sorted.
    pub sources: Vec<String>,
    /// Nodes with no outgoing edge, sorted.
    pub sinks: Vec<String>,
    /// Up to `sample_size` member keys, sorted.
    pub sample: Vec<String>,
}

/// Split `nodes` into components, largest first (ties by first key).
///
/// Edges naming keys that are not in `nodes` are ignored, as are
/// self-loops. Duplicate node keys keep their first declaration.
pub fn link_components(nodes: &[LinkNode], sample_size: usize) -> Vec<LinkComponent> {
    let mut order: Vec<&LinkNode> = Vec::with_capacity(nodes.len());
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if !index.contains_key(node.key.as_str()) {
            index.insert(node.key.as_str(), order.len());
            order.push(node);
        }
    }

    let mut edges: BTreeSet<(usize, usize)> = BTreeSet::new();
    for (i, node) in order.iter().enumerate() {
        for output in &node.outputs {
            if let Some(&j) = index.get(output.as_str()) {
                edges.insert((i, j));
            }
        }
        for input in &node.inputs {
            if let Some(&j) = index.get(input.as_str()) {
                edges.insert((j, i));
            }
        }
    }
    edges.retain(|(from, to)| from != to);

    let mut in_degree = vec![0_usize; order.len()];
    let mut out_degree = vec![0_usize; order.len()];
    let mut uf = UnionFind::new(order.len());
    for &(from, to) in &edges {
        if let Some(d) = out_degree.get_mut(from) {
            *d = d.saturating_add(1);
        }
        if let Some(d) = in_degree.get_mut(to) {
            *d = d.saturating_add(1);
        }
        uf.union(from, to);
    }

    let mut edges_per_root: HashMap<usize, usize> = HashMap::new();
    for &(from, _) in &edges {
        let count = edges_per_root.entry(uf.find(from)).or_default();
        *count = count.saturating_add(1);
    }

    let mut components: Vec<LinkComponent> = uf
        .groups()
        .into_iter()
        .map(|group| {
            let root = group.first().map_or(0, |&first| uf.find(first));
            let key_of = |i: &usize| order.get(*i).map(|n| n.key.clone());
            let has = |degrees: &[usize], i: &usize| degrees.get(*i).is_some_and(|d| *d > 0);

            let mut members: Vec<String> = group.iter().filter_map(key_of).collect();
            members.sort();
            let mut sources: Vec<String> = group
                .iter()
                .filter(|i| !has(&in_degree, i))
                .filter_map(key_of)
                .collect();
            sources.sort();
            let mut sinks: Vec<String> = group
                .iter()
                .filter(|i| !has(&out_degree, i))
                .filter_map(key_of)
                .collect();
            sinks.sort();

            LinkComponent {
                node_count: members.len(),
                edge_count: edges_per_root.get(&root).copied().unwrap_or(0),
                sources,
                sinks,
                sample: members.into_iter().take(sample_size).collect(),
            }
        })
        .collect();

    components.sort_by(|a, b| {
        b.node_count
            .cmp(&a.node_count)
            .then_with(|| a.sample.first().cmp(&b.sample.first()))
    });
    components
}
