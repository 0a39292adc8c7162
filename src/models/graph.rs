//! Graph algorithms for traceability analysis.
//!
//! [`GraphIndex`] builds forward (parent → children) and backward
//! (child → parents) indices over a node set and derives cycles, orphans,
//! dangling links, connected components, the traceability matrix and the
//! dependency graph from them. Everything here is a derived view; the node
//! store stays the system of record.

use super::{Layer, Node, Status};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Union-Find (Disjoint Set Union) for detecting connected components.
///
/// Uses path compression and union by rank.
#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    parent: HashMap<String, String>,
    rank: HashMap<String, usize>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an element as its own singleton set. No-op if already present.
    pub fn make_set(&mut self, x: &str) {
        if !self.parent.contains_key(x) {
            self.parent.insert(x.to_string(), x.to_string());
            self.rank.insert(x.to_string(), 0);
        }
    }

    /// Representative of the set containing `x`, compressing the path on the way.
    pub fn find(&mut self, x: &str) -> Option<String> {
        let parent = self.parent.get(x)?.clone();
        if parent == x {
            return Some(parent);
        }
        let root = self.find(&parent)?;
        self.parent.insert(x.to_string(), root.clone());
        Some(root)
    }

    /// Merge the sets of `x` and `y`; false if already joined or either is unknown.
    pub fn union(&mut self, x: &str, y: &str) -> bool {
        let (Some(root_x), Some(root_y)) = (self.find(x), self.find(y)) else {
            return false;
        };
        if root_x == root_y {
            return false;
        }

        let rank_x = self.rank.get(&root_x).copied().unwrap_or(0);
        let rank_y = self.rank.get(&root_y).copied().unwrap_or(0);
        if rank_x < rank_y {
            self.parent.insert(root_x, root_y);
        } else if rank_x > rank_y {
            self.parent.insert(root_y, root_x);
        } else {
            self.parent.insert(root_y, root_x.clone());
            self.rank.insert(root_x, rank_x + 1);
        }
        true
    }


    /// All components, each sorted, ordered by their smallest element.
    pub fn components(&mut self) -> Vec<Vec<String>> {
        let mut by_root: HashMap<String, Vec<String>> = HashMap::new();
        let elements: Vec<String> = self.parent.keys().cloned().collect();
        for elem in elements {
            if let Some(root) = self.find(&elem) {
                by_root.entry(root).or_default().push(elem);
            }
        }
        let mut components: Vec<Vec<String>> = by_root
            .into_values()
            .map(|mut c| {
                c.sort();
                c
            })
            .collect();
        components.sort();
        components
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

/// One row of the traceability matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceabilityRow {
    pub id: String,
    pub layer: Layer,
    /// Number of children
    pub forward: usize,
    /// Number of parents
    pub backward: usize,
    pub orphan: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub layer: Layer,
    pub title: String,
    pub status: Status,
}

/// Directed parent → child edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

/// Nodes plus directed edges, suitable for external rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Summary of one analysis pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphAnalysis {
    pub node_count: usize,
    pub edge_count: usize,
    pub cycles: Vec<Vec<String>>,
    pub orphans: Vec<String>,
    pub dangling: Vec<GraphEdge>,
    pub component_count: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Forward and backward link indices over a node set.
#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    nodes: BTreeMap<String, GraphNode>,
    forward: BTreeMap<String, BTreeSet<String>>,
    backward: BTreeMap<String, BTreeSet<String>>,
}

impl GraphIndex {
    /// Build indices from every node's parent and child sets.
    ///
    /// An edge recorded on either endpoint (or both) counts once.
    pub fn build(nodes: &[Node]) -> Self {
        let mut index = Self::default();
        for node in nodes {
            index.nodes.insert(
                node.id.clone(),
                GraphNode {
                    id: node.id.clone(),
                    layer: node.layer,
                    title: node.title.clone(),
                    status: node.status,
                },
            );
            for parent in &node.links.parents {
                index.add_edge(parent, &node.id);
            }
            for child in &node.links.children {
                index.add_edge(&node.id, child);
            }
        }
        index
    }

    fn add_edge(&mut self, parent: &str, child: &str) {
        self.forward
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
        self.backward
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string());
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.forward.values().map(BTreeSet::len).sum()
    }

    pub fn children_of(&self, id: &str) -> impl Iterator<Item = &String> {
        self.forward.get(id).into_iter().flatten()
    }

    pub fn parents_of(&self, id: &str) -> impl Iterator<Item = &String> {
        self.backward.get(id).into_iter().flatten()
    }

    /// All edges in (source, target) order.
    pub fn edges(&self) -> Vec<GraphEdge> {
        self.forward
            .iter()
            .flat_map(|(source, targets)| {
                targets.iter().map(move |target| GraphEdge {
                    source: source.clone(),
                    target: target.clone(),
                })
            })
            .collect()
    }

    /// Detect cycles with an iterative depth-first traversal.
    ///
    /// Traversal starts from root candidates (no parents) and then from every
    /// remaining unvisited node, so cycles unreachable from any root are still
    /// found. When an edge reaches a node that is still on the traversal
    /// stack, the stack slice from that node to the current one is reported.
    /// Each cycle is reported once, rotated to start at its smallest id.
    pub fn cycles(&self) -> Vec<Vec<String>> {
        let adjacency: HashMap<&str, Vec<&str>> = self
            .forward
            .iter()
            .map(|(k, v)| (k.as_str(), v.iter().map(String::as_str).collect()))
            .collect();

        let mut vertices: BTreeSet<&str> = self.nodes.keys().map(String::as_str).collect();
        vertices.extend(adjacency.keys().copied());

        let (roots, rest): (Vec<&str>, Vec<&str>) = vertices
            .iter()
            .copied()
            .partition(|id| !self.backward.contains_key(*id));

        let mut color: HashMap<&str, Color> = vertices.iter().map(|v| (*v, Color::White)).collect();
        let mut found: BTreeSet<Vec<String>> = BTreeSet::new();

        for start in roots.into_iter().chain(rest) {
            if color.get(start).copied() != Some(Color::White) {
                continue;
            }

            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            color.insert(start, Color::Grey);

            while let Some(top) = stack.last_mut() {
                let current = top.0;
                let next = adjacency.get(current).and_then(|c| c.get(top.1)).copied();
                top.1 += 1;

                match next {
                    Some(child) => match color.get(child).copied().unwrap_or(Color::White) {
                        Color::White => {
                            color.insert(child, Color::Grey);
                            stack.push((child, 0));
                        }
                        Color::Grey => {
                            if let Some(pos) = stack.iter().position(|(n, _)| *n == child) {
                                let path: Vec<String> =
                                    stack[pos..].iter().map(|(n, _)| n.to_string()).collect();
                                found.insert(canonical_cycle(path));
                            }
                        }
                        Color::Black => {}
                    },
                    None => {
                        color.insert(current, Color::Black);
                        stack.pop();
                    }
                }
            }
        }

        found.into_iter().collect()
    }

    /// Nodes not on the top layer with no parent in the node set. A parent
    /// that was deleted leaves a dangling reference, which does not count.
    pub fn orphans(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| !n.layer.is_top() && self.live_parent_count(&n.id) == 0)
            .map(|n| n.id.clone())
            .collect()
    }

    fn live_parent_count(&self, id: &str) -> usize {
        self.parents_of(id)
            .filter(|p| self.nodes.contains_key(*p))
            .count()
    }

    /// Edges whose source or target is not in the node set.
    pub fn dangling_links(&self) -> Vec<GraphEdge> {
        self.edges()
            .into_iter()
            .filter(|e| !self.nodes.contains_key(&e.source) || !self.nodes.contains_key(&e.target))
            .collect()
    }

    /// Weakly connected components over existing nodes.
    pub fn components(&self) -> Vec<Vec<String>> {
        let mut uf = UnionFind::new();
        for id in self.nodes.keys() {
            uf.make_set(id);
        }
        for edge in self.edges() {
            uf.union(&edge.source, &edge.target);
        }
        uf.components()
    }

    /// One row per node with forward/backward degree and orphan flag.
    pub fn traceability_matrix(&self) -> Vec<TraceabilityRow> {
        self.nodes
            .values()
            .map(|n| {
                let backward = self.parents_of(&n.id).count();
                TraceabilityRow {
                    id: n.id.clone(),
                    layer: n.layer,
                    forward: self.children_of(&n.id).count(),
                    backward,
                    orphan: !n.layer.is_top() && self.live_parent_count(&n.id) == 0,
                }
            })
            .collect()
    }

    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges(),
        }
    }

    /// Run every check and summarize.
    pub fn analyze(&self) -> GraphAnalysis {
        GraphAnalysis {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            cycles: self.cycles(),
            orphans: self.orphans(),
            dangling: self.dangling_links(),
            component_count: self.components().len(),
        }
    }
}

fn canonical_cycle(mut path: Vec<String>) -> Vec<String> {
    if let Some(min_pos) = path
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    {
        path.rotate_left(min_pos);
    }
    path
}
