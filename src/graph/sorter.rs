// src/graph/sorter.rs

//! Topological sorting over strongly connected components
//!
//! Works in two phases:
//!
//! 1. Tarjan's algorithm finds the strongly connected components of the
//!    adjacency map. Every dependency cycle collapses into one component.
//! 2. A leveled Kahn pass over the condensation graph assigns one integer
//!    level per component, starting at 1. A component only receives a level
//!    once every component it depends on already has one, so for any edge
//!    `u -> v` crossing components, `level(u) > level(v)`.
//!
//! Ties between components that are ready at the same time are broken by
//! the position of their first node in the adjacency map, which makes the
//! output a pure function of the map.

use super::GraphError;
use super::lifo::Lifo;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;

/// Level number to component (one component per level)
pub type LevelMap<N> = BTreeMap<usize, Vec<N>>;

/// Sorts an adjacency map into dependency levels
#[derive(Debug, Clone)]
pub struct TopologicalSorter<N: Ord> {
    adjacency_map: BTreeMap<N, BTreeSet<N>>,
}

/// Tarjan bookkeeping for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    /// On the DFS stack, not yet assigned to a component
    Open { index: usize },
    /// Assigned to a component, ignored by later low-link updates
    Closed,
}

impl<N: Ord + Clone + Debug> TopologicalSorter<N> {
    /// Create a sorter for the given adjacency map
    ///
    /// Every node referenced as a successor must also be a key of the map.
    pub fn new(adjacency_map: BTreeMap<N, BTreeSet<N>>) -> Self {
        Self { adjacency_map }
    }

    /// The adjacency map this sorter was built from
    pub fn get_stored_adjacency_map(&self) -> &BTreeMap<N, BTreeSet<N>> {
        &self.adjacency_map
    }

    /// Identify strongly connected components and sort them into levels
    pub fn sort(&self) -> Result<LevelMap<N>, GraphError> {
        let nodes: Vec<&N> = self.adjacency_map.keys().collect();
        let successors = self.dense_successors(&nodes)?;

        let components = strongly_connected_components(&successors);
        let levels = level_components(&successors, &components);

        Ok(levels
            .into_iter()
            .map(|(level, component)| {
                let members = components[component]
                    .iter()
                    .map(|&idx| nodes[idx].clone())
                    .collect();
                (level, members)
            })
            .collect())
    }

    /// Translate the map into index-based successor lists
    fn dense_successors(&self, nodes: &[&N]) -> Result<Vec<Vec<usize>>, GraphError> {
        let position: BTreeMap<&N, usize> = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (*node, idx))
            .collect();

        self.adjacency_map
            .values()
            .map(|succs| {
                succs
                    .iter()
                    .map(|succ| {
                        position.get(succ).copied().ok_or_else(|| GraphError::Malformed {
                            node: format!("{succ:?}"),
                        })
                    })
                    .collect()
            })
            .collect()
    }
}

/// Iterative Tarjan SCC
///
/// Returns components in completion order. Members of each component are
/// sorted by node index.
fn strongly_connected_components(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut state = vec![VisitState::Unvisited; successors.len()];
    let mut low = vec![0usize; successors.len()];
    let mut path: Lifo<usize> = Lifo::new();
    let mut components = Vec::new();
    let mut counter = 0usize;

    for root in 0..successors.len() {
        if state[root] != VisitState::Unvisited {
            continue;
        }

        // (node, position of the next successor to look at)
        let mut frames: Lifo<(usize, usize)> = Lifo::new();
        state[root] = VisitState::Open { index: counter };
        low[root] = counter;
        counter += 1;
        path.push(root);
        frames.push((root, 0));

        while let Some(frame) = frames.top_mut() {
            let (node, pos) = *frame;

            if let Some(&succ) = successors[node].get(pos) {
                frame.1 += 1;
                match state[succ] {
                    VisitState::Unvisited => {
                        state[succ] = VisitState::Open { index: counter };
                        low[succ] = counter;
                        counter += 1;
                        path.push(succ);
                        frames.push((succ, 0));
                    }
                    VisitState::Open { index } => {
                        low[node] = low[node].min(index);
                    }
                    VisitState::Closed => {}
                }
                continue;
            }

            frames.pop();
            let VisitState::Open { index } = state[node] else {
                continue;
            };

            if low[node] == index {
                let mut component = Vec::new();
                while let Some(member) = path.pop() {
                    state[member] = VisitState::Closed;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                component.sort_unstable();
                components.push(component);
            } else if let Some(&(parent, _)) = frames.peek() {
                low[parent] = low[parent].min(low[node]);
            }
        }
    }

    components
}

/// Leveled Kahn pass over the condensation graph
///
/// Returns level number to component index.
fn level_components(successors: &[Vec<usize>], components: &[Vec<usize>]) -> BTreeMap<usize, usize> {
    let mut node_component = vec![0usize; successors.len()];
    for (component, members) in components.iter().enumerate() {
        for &member in members {
            node_component[member] = component;
        }
    }

    // Parallel edges between two components collapse into one
    let mut dependencies: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); components.len()];
    for (node, succs) in successors.iter().enumerate() {
        let from = node_component[node];
        for &succ in succs {
            let to = node_component[succ];
            if from != to {
                dependencies[from].insert(to);
                dependents[to].insert(from);
            }
        }
    }

    let mut pending: Vec<usize> = dependencies.iter().map(BTreeSet::len).collect();

    // Keyed by the component's first node so ties resolve by map order
    let mut ready: BTreeSet<(usize, usize)> = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(component, _)| (components[component][0], component))
        .collect();

    let mut levels = BTreeMap::new();
    let mut level = 1;
    while let Some((_, component)) = ready.pop_first() {
        levels.insert(level, component);
        level += 1;

        for &dependent in &dependents[component] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert((components[dependent][0], dependent));
            }
        }
    }

    levels
}
