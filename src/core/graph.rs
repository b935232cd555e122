//! The factor-graph container: owns all nodes and factors.

use std::sync::{Arc, RwLock};

use crate::core::factor::Factor;
use crate::core::node::{Node, NodeRef};

/// Append-only container for nodes and factors.
///
/// Nodes and factors live in dense, insertion-ordered arenas and are never
/// removed or reordered, so previously computed row/column offsets into the
/// global matrices stay valid across solves. The container also tracks the
/// total state dimension (sum of node dims) and total observation dimension
/// (sum of factor dims).
#[derive(Debug, Default)]
pub struct FactorGraph {
    nodes: Vec<NodeRef>,
    factors: Vec<Box<dyn Factor>>,
    state_dim: usize,
    obs_dim: usize,
}

impl FactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, assigning its 1-based id, and return a shared handle for
    /// wiring it into factors.
    pub fn add_node(&mut self, mut node: Node) -> NodeRef {
        node.set_id(self.nodes.len() + 1);
        self.state_dim += node.get_dim();
        let handle = Arc::new(RwLock::new(node));
        self.nodes.push(Arc::clone(&handle));
        handle
    }

    /// Add a factor, assigning its 1-based id, and return that id.
    pub fn add_factor(&mut self, mut factor: Box<dyn Factor>) -> usize {
        let id = self.factors.len() + 1;
        factor.set_id(id);
        self.obs_dim += factor.get_dim();
        self.factors.push(factor);
        id
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }

    /// Total state dimension (columns of the global Jacobian).
    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    /// Total observation dimension (rows of the global Jacobian).
    pub fn obs_dim(&self) -> usize {
        self.obs_dim
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn factors(&self) -> &[Box<dyn Factor>] {
        &self.factors
    }

    pub fn factors_mut(&mut self) -> &mut [Box<dyn Factor>] {
        &mut self.factors
    }

    /// Dimension of the node at `index` (insertion order, 0-based).
    pub(crate) fn node_dim(&self, index: usize) -> usize {
        self.nodes[index].read().unwrap().get_dim()
    }
}
