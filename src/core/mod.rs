//! Core factor-graph components
//!
//! This module contains the data model shared by the solvers:
//! - Nodes: the state variables being estimated
//! - Factors: the probabilistic constraints between nodes
//! - The graph container owning both

pub mod factor;
pub mod graph;
pub mod node;

pub use factor::Factor;
pub use graph::FactorGraph;
pub use node::{Node, NodeRef};
