//! Graph nodes: the state variables of the estimation problem.

use std::sync::{Arc, RwLock};

use nalgebra as na;

/// Shared handle to a node. Factors hold clones of this handle; the graph
/// container is the long-term owner. Nodes are append-only and never removed,
/// so handles stay valid for the lifetime of the graph.
pub type NodeRef = Arc<RwLock<Node>>;

/// A state variable of fixed dimension (pose, landmark, plane).
///
/// Ids are 1-based and assigned by the graph container at insertion, so a
/// node's column block inside the global adjacency matrix is determined by
/// the prefix sum of the dimensions of all nodes with smaller ids.
#[derive(Debug, Clone)]
pub struct Node {
    id: usize,
    state: na::DVector<f64>,
}

impl Node {
    /// Create a node from an initial state estimate. The id stays 0 until the
    /// node is added to a graph.
    pub fn new(state: na::DVector<f64>) -> Self {
        Node { id: 0, state }
    }

    /// Dimension of the state vector.
    pub fn get_dim(&self) -> usize {
        self.state.len()
    }

    pub fn get_id(&self) -> usize {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    /// Current state estimate.
    pub fn get_state(&self) -> &na::DVector<f64> {
        &self.state
    }

    /// Additive state update: `state += delta`.
    pub fn update(&mut self, delta: na::DVectorView<f64>) {
        debug_assert_eq!(delta.len(), self.state.len());
        self.state += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn test_node_dimension_and_state() {
        let node = Node::new(dvector![1.0, 2.0, 3.0]);
        assert_eq!(node.get_dim(), 3);
        assert_eq!(node.get_id(), 0);
        assert_eq!(node.get_state()[1], 2.0);
    }

    #[test]
    fn test_node_additive_update() {
        let mut node = Node::new(dvector![1.0, -1.0]);
        let delta = dvector![0.5, 0.25];
        node.update(delta.as_view());
        assert_eq!(node.get_state()[0], 1.5);
        assert_eq!(node.get_state()[1], -0.75);
    }
}
