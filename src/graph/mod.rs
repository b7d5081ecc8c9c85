// src/graph/mod.rs

//! Dependency graph data structures
//!
//! A [`Graph`] stores arbitrary hashable items. Each item owns one
//! [`ArchSet`], a single edge object fanning out from the item to every
//! item it depends on. Nodes and arcs live in arenas owned by the graph and
//! refer to each other by index, so there are no reference cycles to break.
//!
//! [`Graph::solve`] hands the adjacency map to [`TopologicalSorter`] and
//! translates the resulting levels back into the caller's items. Lower
//! levels hold dependencies, higher levels hold their dependents.

pub mod lifo;
pub mod sorter;

pub use lifo::Lifo;
pub use sorter::{LevelMap, TopologicalSorter};

use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use thiserror::Error;

/// Errors raised by graph operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Item was never added to the graph
    #[error("item not found in graph")]
    NotFound,

    /// A successor is referenced but missing from the adjacency map
    #[error("malformed graph: node {node} is referenced but not registered")]
    Malformed { node: String },
}

/// Index of a node inside its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of an arc inside its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchId(usize);

/// Node to the set of nodes reachable through one outgoing hop
pub type AdjacencyMap = BTreeMap<NodeId, BTreeSet<NodeId>>;

/// A graph vertex wrapping one item
#[derive(Debug, Clone)]
pub struct GraphNode<T> {
    item: T,
    /// Arcs this node takes part in, as origin or as endpoint
    arches: BTreeSet<ArchId>,
}

impl<T> GraphNode<T> {
    fn new(item: T) -> Self {
        Self {
            item,
            arches: BTreeSet::new(),
        }
    }

    /// The item stored in this node
    pub fn item(&self) -> &T {
        &self.item
    }

    /// Every arc this node takes part in
    pub fn arches(&self) -> &BTreeSet<ArchId> {
        &self.arches
    }
}

/// One edge from an origin to a mutable set of endpoints
#[derive(Debug, Clone)]
pub struct ArchSet {
    origin: NodeId,
    endpoints: BTreeSet<NodeId>,
}

impl ArchSet {
    fn new(origin: NodeId) -> Self {
        Self {
            origin,
            endpoints: BTreeSet::new(),
        }
    }

    pub fn origin(&self) -> NodeId {
        self.origin
    }

    pub fn endpoints(&self) -> &BTreeSet<NodeId> {
        &self.endpoints
    }

    fn add_endpoint(&mut self, endpoint: NodeId) -> bool {
        self.endpoints.insert(endpoint)
    }
}

/// Mutable dependency multigraph
#[derive(Debug, Clone)]
pub struct Graph<T> {
    nodes: Vec<GraphNode<T>>,
    arches: Vec<ArchSet>,
    index: HashMap<T, NodeId>,
    /// Each node's own outgoing arc
    outgoing: HashMap<NodeId, ArchId>,
    adjacency_cache: OnceCell<AdjacencyMap>,
}

impl<T: Clone + Eq + Hash> Graph<T> {
    /// Create an empty graph
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            arches: Vec::new(),
            index: HashMap::new(),
            outgoing: HashMap::new(),
            adjacency_cache: OnceCell::new(),
        }
    }

    /// Add `item` and record that it depends on every item in `dependencies`
    ///
    /// Repeated calls accumulate endpoints on the item's single arc; an
    /// already recorded dependency is not duplicated.
    pub fn add<I>(&mut self, item: T, dependencies: I)
    where
        I: IntoIterator<Item = T>,
    {
        self.adjacency_cache.take();

        let node = self.intern(item);
        let arch = match self.outgoing.get(&node) {
            Some(&arch) => arch,
            None => {
                let arch = ArchId(self.arches.len());
                self.arches.push(ArchSet::new(node));
                self.outgoing.insert(node, arch);
                self.nodes[node.0].arches.insert(arch);
                arch
            }
        };

        for dependency in dependencies {
            let dep_node = self.intern(dependency);
            if self.arches[arch.0].add_endpoint(dep_node) {
                self.nodes[dep_node.0].arches.insert(arch);
            }
        }
    }

    fn intern(&mut self, item: T) -> NodeId {
        if let Some(&node) = self.index.get(&item) {
            return node;
        }
        let node = NodeId(self.nodes.len());
        self.nodes.push(GraphNode::new(item.clone()));
        self.index.insert(item, node);
        node
    }

    /// Look up the node created for `item`
    pub fn get_node(&self, item: &T) -> Result<NodeId, GraphError> {
        self.index.get(item).copied().ok_or(GraphError::NotFound)
    }

    /// Access a node by id; `None` for an id from another graph
    pub fn node(&self, id: NodeId) -> Option<&GraphNode<T>> {
        self.nodes.get(id.0)
    }

    /// Access an arc by id; `None` for an id from another graph
    pub fn arch(&self, id: ArchId) -> Option<&ArchSet> {
        self.arches.get(id.0)
    }

    /// Whether `arch` fans out from `node`
    pub fn is_arch_outgoing(&self, node: NodeId, arch: ArchId) -> bool {
        self.arch(arch).is_some_and(|arch| arch.origin == node)
    }

    /// Whether `arch` points at `node`
    pub fn is_arch_coming(&self, node: NodeId, arch: ArchId) -> bool {
        self.arch(arch).is_some_and(|arch| arch.endpoints.contains(&node))
    }

    /// Items that declared `item` as a dependency
    pub fn dependents(&self, item: &T) -> Result<Vec<&T>, GraphError> {
        let node = self.get_node(item)?;
        Ok(self.nodes[node.0]
            .arches
            .iter()
            .filter(|&&arch| !self.is_arch_outgoing(node, arch))
            .map(|&arch| &self.nodes[self.arches[arch.0].origin.0].item)
            .collect())
    }

    /// Map every node to the endpoints of its outgoing arcs
    ///
    /// The map is cached until the next [`Graph::add`]; callers get a copy.
    pub fn get_adjacency_map(&self) -> AdjacencyMap {
        self.adjacency_cache
            .get_or_init(|| self.build_adjacency_map())
            .clone()
    }

    fn build_adjacency_map(&self) -> AdjacencyMap {
        (0..self.nodes.len())
            .map(NodeId)
            .map(|node| {
                let successors = self.nodes[node.0]
                    .arches
                    .iter()
                    .filter(|&&arch| self.is_arch_outgoing(node, arch))
                    .flat_map(|&arch| self.arches[arch.0].endpoints.iter().copied())
                    .collect();
                (node, successors)
            })
            .collect()
    }

    /// Sort the graph and return levels of node ids
    pub fn solve_nodes(&self) -> Result<LevelMap<NodeId>, GraphError> {
        TopologicalSorter::new(self.get_adjacency_map()).sort()
    }

    /// Sort the graph and return levels of the items passed to [`Graph::add`]
    pub fn solve(&self) -> Result<LevelMap<T>, GraphError> {
        Ok(self
            .solve_nodes()?
            .into_iter()
            .map(|(level, component)| {
                let items = component
                    .into_iter()
                    .map(|node| self.nodes[node.0].item.clone())
                    .collect();
                (level, items)
            })
            .collect())
    }

    /// Every item added so far, in insertion order
    pub fn raw(&self) -> Vec<T> {
        self.nodes.iter().map(|node| node.item.clone()).collect()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.index.contains_key(item)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop every node, arc and cached map
    pub fn destroy(&mut self) {
        self.nodes.clear();
        self.arches.clear();
        self.index.clear();
        self.outgoing.clear();
        self.adjacency_cache.take();
    }
}

impl<T: Clone + Eq + Hash> Default for Graph<T> {
    fn default() -> Self {
        Self::new()
    }
}
