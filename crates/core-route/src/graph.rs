//! Frozen lookup structure over registered nodes.
//!
//! Invariants enforced at `build()`:
//! - every route key registered at most once,
//! - a root node is designated and registered,
//! - every menu child is itself registered.
//!
//! After `build()` the graph is immutable; sharing is `Arc<Graph>` with no
//! interior locking. Lookup is a single hash probe.

use crate::{Node, RouteKey};
use ahash::AHashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("route {0} registered more than once")]
    DuplicateRoute(RouteKey),
    #[error("no root node designated")]
    MissingRoot,
    #[error("menu {parent} lists unregistered child {child}")]
    UnknownMenuChild { parent: RouteKey, child: RouteKey },
    #[error("route {0} not present in graph")]
    RouteNotFound(RouteKey),
    #[error("route {0} is not a menu")]
    NotAMenu(RouteKey),
}

pub struct Graph {
    root: Arc<Node>,
    nodes: AHashMap<RouteKey, Arc<Node>>,
    // Insertion order for deterministic iteration.
    order: Vec<RouteKey>,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    pub fn lookup(&self, key: RouteKey) -> Option<&Arc<Node>> {
        self.nodes.get(&key)
    }

    pub fn root_node(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn root_key(&self) -> RouteKey {
        self.root.route_key()
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.order.iter().filter_map(|k| self.nodes.get(k))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Fetch `key` and require it to be a menu node.
    pub fn menu_of(&self, key: RouteKey) -> Result<&Arc<Node>, GraphError> {
        let node = self.lookup(key).ok_or(GraphError::RouteNotFound(key))?;
        if !node.is_menu() {
            return Err(GraphError::NotAMenu(key));
        }
        Ok(node)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("root", &self.root.route_key())
            .field("nodes", &self.order)
            .finish()
    }
}

#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<Arc<Node>>,
    root: Option<RouteKey>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Ownership moves into the graph; use `add_shared`
    /// when the same `Arc` is also referenced as a menu child elsewhere.
    pub fn add(self, node: Node) -> Self {
        self.add_shared(Arc::new(node))
    }

    pub fn add_shared(mut self, node: Arc<Node>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Register `node` and designate it the root. Last designation wins.
    pub fn root(mut self, node: Node) -> Self {
        self.root = Some(node.route_key());
        self.add(node)
    }

    pub fn root_shared(mut self, node: Arc<Node>) -> Self {
        self.root = Some(node.route_key());
        self.add_shared(node)
    }

    pub fn build(self) -> Result<Graph, GraphError> {
        let root_key = self.root.ok_or(GraphError::MissingRoot)?;

        let mut nodes: AHashMap<RouteKey, Arc<Node>> = AHashMap::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());
        for node in self.nodes {
            let key = node.route_key();
            if nodes.insert(key, node).is_some() {
                return Err(GraphError::DuplicateRoute(key));
            }
            order.push(key);
        }

        // Menu children must resolve inside the same graph so downstream
        // lookups by child key cannot dangle.
        for node in nodes.values() {
            for child in node.menu_children() {
                if !nodes.contains_key(&child.route_key()) {
                    return Err(GraphError::UnknownMenuChild {
                        parent: node.route_key(),
                        child: child.route_key(),
                    });
                }
            }
        }

        let root = nodes
            .get(&root_key)
            .cloned()
            .ok_or(GraphError::MissingRoot)?;

        debug!(
            target: "graph",
            nodes = order.len(),
            root = %root_key,
            "graph_frozen"
        );

        Ok(Graph { root, nodes, order })
    }
}
