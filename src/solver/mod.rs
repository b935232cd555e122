//! Factor-graph solvers: batch and incremental nonlinear least squares.
//!
//! [`GraphSolver`] owns the factor graph and drives the two solve paths:
//! - `solve_once`: assemble the full adjacency system, factorize the normal
//!   equations with sparse Cholesky, update every node.
//! - `solve_incremental`: reuse the cached factorization blocks of the
//!   previous solve and factorize only the trailing block touched by the
//!   appended nodes/factors.

use nalgebra as na;
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::core::{Factor, FactorGraph, Node, NodeRef};
use crate::error::FGraphResult;
use crate::linalg::{DenseVector, LinAlgError, SparseMatrix};

pub(crate) mod adjacency;
mod batch;
mod incremental;

/// Result type for solver-internal operations
pub type SolverResult<T> = Result<T, SolverError>;

/// Errors raised by the batch/incremental solvers
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    /// Assembled row/column totals disagree with the declared dimensions
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// The selected solve strategy has no implementation
    #[error("unsupported solve method: {0}")]
    UnsupportedMethod(String),

    /// Incremental solve called without its bookkeeping invariants
    #[error("incremental solve precondition violated: {0}")]
    IncrementalPrecondition(String),

    /// A factor in the incremental window reaches back into already-solved
    /// state (loop closure); the fast path does not support this
    #[error("non-sequential factor in incremental window: {0}")]
    NonSequentialFactor(String),

    /// Sparse linear algebra failure (non-positive-definite system, ...)
    #[error(transparent)]
    LinAlg(#[from] LinAlgError),
}

/// Solve strategy selection. Only the Cholesky-on-adjacency path is
/// implemented; the others are declared for API completeness and rejected
/// loudly rather than proceeding with wrong math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolveMethod {
    /// Sparse Cholesky on the normal equations of the adjacency system
    #[default]
    CholeskyAdjacency,
    /// Sparse QR on the square-root-weighted adjacency (assembly only)
    Qr,
    /// Direct information-matrix assembly (not implemented)
    DirectInfo,
    /// Schur-complement elimination (not implemented)
    SchurComplement,
}

impl std::fmt::Display for SolveMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveMethod::CholeskyAdjacency => write!(f, "Cholesky (adjacency)"),
            SolveMethod::Qr => write!(f, "QR"),
            SolveMethod::DirectInfo => write!(f, "direct information"),
            SolveMethod::SchurComplement => write!(f, "Schur complement"),
        }
    }
}

/// Cached blocks of the previous factorization, relative to the last node:
/// `L00` factors the prefix, `L10` couples the prefix into the last node's
/// rows, `L11` factors the trailing block, and `I11` is the information
/// sub-block of the last node. Together with the `last_*` bookmarks these are
/// the only state carried between successive incremental solves.
#[derive(Debug, Clone)]
pub(crate) struct FactorizationCache {
    pub l00: SparseMatrix,
    pub l10: SparseMatrix,
    pub l11: SparseMatrix,
    pub i11: SparseMatrix,
}

/// Factor-graph owner plus solve state.
#[derive(Debug)]
pub struct GraphSolver {
    graph: FactorGraph,
    method: SolveMethod,
    /// Forward-substituted rhs of the last solve (`L y = b`), kept for the
    /// incremental overlap correction.
    y: DenseVector,
    /// State increment of the last solve relative to the stored node states.
    dx: DenseVector,
    last_state_dim: usize,
    last_obs_dim: usize,
    last_solved_node: Option<usize>,
    last_solved_factor: Option<usize>,
    cache: Option<FactorizationCache>,
}

impl Default for GraphSolver {
    fn default() -> Self {
        Self::new(SolveMethod::default())
    }
}

impl GraphSolver {
    pub fn new(method: SolveMethod) -> Self {
        GraphSolver {
            graph: FactorGraph::new(),
            method,
            y: DenseVector::zeros(0, 1),
            dx: DenseVector::zeros(0, 1),
            last_state_dim: 0,
            last_obs_dim: 0,
            last_solved_node: None,
            last_solved_factor: None,
            cache: None,
        }
    }

    /// Add a node to the graph and get back the shared handle used to wire
    /// factors to it.
    pub fn add_node(&mut self, node: Node) -> NodeRef {
        self.graph.add_node(node)
    }

    /// Add a factor; returns its assigned id.
    pub fn add_factor(&mut self, factor: Box<dyn Factor>) -> usize {
        self.graph.add_factor(factor)
    }

    pub fn graph(&self) -> &FactorGraph {
        &self.graph
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }

    pub fn num_factors(&self) -> usize {
        self.graph.num_factors()
    }

    pub fn state_dim(&self) -> usize {
        self.graph.state_dim()
    }

    pub fn obs_dim(&self) -> usize {
        self.graph.obs_dim()
    }

    /// Batch solve: assemble the full adjacency system, factorize
    /// `I = A' W A`, solve for the state increment and apply it additively to
    /// every node in insertion order. Returns the increment.
    pub fn solve_once(&mut self) -> FGraphResult<na::DVector<f64>> {
        if self.method != SolveMethod::CholeskyAdjacency {
            return Err(SolverError::UnsupportedMethod(format!(
                "{} solve path is not implemented",
                self.method
            ))
            .into());
        }
        let adj = adjacency::build_adjacency(&mut self.graph, self.method)?;

        let dx = self.solve_batch_cholesky(&adj)?;
        debug!(
            state_dim = self.graph.state_dim(),
            obs_dim = self.graph.obs_dim(),
            "batch solve complete"
        );

        self.last_state_dim = self.graph.state_dim();
        self.last_obs_dim = self.graph.obs_dim();
        self.last_solved_node = self.graph.num_nodes().checked_sub(1);
        self.last_solved_factor = self.graph.num_factors().checked_sub(1);

        let increment = dense_to_na(&dx);
        self.update_nodes();
        Ok(increment)
    }

    /// Incremental solve: process only the nodes/factors appended since the
    /// last solve, merging with the cached factorization blocks. Node states
    /// are not mutated; the returned increment is relative to the stored
    /// states and is also reflected by `get_estimated_positions`. Call
    /// `update_nodes` to fold it into the node states.
    pub fn solve_incremental(&mut self) -> FGraphResult<na::DVector<f64>> {
        if self.method != SolveMethod::CholeskyAdjacency {
            return Err(SolverError::UnsupportedMethod(format!(
                "incremental solve is only available for {}",
                SolveMethod::CholeskyAdjacency
            ))
            .into());
        }
        if self.graph.num_nodes() < 2 {
            return Err(SolverError::IncrementalPrecondition(
                "incremental solve requires at least two nodes".into(),
            )
            .into());
        }

        let dx = self.solve_chol_incremental()?;
        debug!(
            state_dim = self.graph.state_dim(),
            new_factors = self.graph.num_factors() - self.last_solved_factor.map_or(0, |f| f + 1),
            "incremental solve complete"
        );

        self.last_state_dim = self.graph.state_dim();
        self.last_obs_dim = self.graph.obs_dim();
        self.last_solved_node = self.graph.num_nodes().checked_sub(1);
        self.last_solved_factor = self.graph.num_factors().checked_sub(1);

        Ok(dense_to_na(&dx))
    }

    /// Apply the current increment additively to every solved node, then
    /// reset it. At the updated linearization point the assembled gradient
    /// vanishes (exactly so for linear factors), which keeps the cached
    /// `y` consistent for subsequent incremental solves.
    pub fn update_nodes(&mut self) {
        let Some(last) = self.last_solved_node else {
            return;
        };
        let mut offset = 0;
        for i in 0..=last {
            let mut node = self.graph.nodes()[i].write().unwrap();
            let dim = node.get_dim();
            let delta = na::DVector::from_fn(dim, |r, _| self.dx[(offset + r, 0)]);
            node.update(delta.as_view());
            offset += dim;
        }
        self.y = DenseVector::zeros(self.last_state_dim, 1);
        self.dx = DenseVector::zeros(self.last_state_dim, 1);
    }

    /// Current state estimate per solved node: the stored state plus the
    /// pending increment of the last solve.
    pub fn get_estimated_positions(&self) -> Vec<na::DVector<f64>> {
        let Some(last) = self.last_solved_node else {
            return Vec::new();
        };
        let mut positions = Vec::with_capacity(last + 1);
        let mut offset = 0;
        for i in 0..=last {
            let node = self.graph.nodes()[i].read().unwrap();
            let dim = node.get_dim();
            let mut state = node.get_state().clone();
            for r in 0..dim {
                state[r] += self.dx[(offset + r, 0)];
            }
            positions.push(state);
            offset += dim;
        }
        positions
    }

    /// Evaluate-only pass: recompute residuals and chi2 over all factors
    /// without assembling matrices or solving. Returns the summed chi2
    /// (`0.5 r' W r` per factor).
    pub fn evaluate_problem(&mut self) -> f64 {
        self.graph
            .factors_mut()
            .par_iter_mut()
            .map(|factor| {
                factor.evaluate_residuals();
                factor.evaluate_chi2();
                factor.get_chi2()
            })
            .sum()
    }
}

fn dense_to_na(v: &DenseVector) -> na::DVector<f64> {
    na::DVector::from_fn(v.nrows(), |i, _| v[(i, 0)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{AnchorFactor, BetweenFactor2d};
    use nalgebra::{Matrix3, Vector3, dvector};

    fn anchored_two_pose_solver() -> GraphSolver {
        let mut solver = GraphSolver::new(SolveMethod::CholeskyAdjacency);
        let n1 = solver.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let n2 = solver.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        solver.add_factor(Box::new(
            AnchorFactor::new(dvector![0.0, 0.0, 0.0], &n1, na::DMatrix::identity(3, 3) * 1e6)
                .unwrap(),
        ));
        solver.add_factor(Box::new(
            BetweenFactor2d::new(Vector3::new(1.0, 0.0, 0.0), &n1, &n2, Matrix3::identity())
                .unwrap(),
        ));
        solver
    }

    #[test]
    fn test_two_pose_scenario() {
        let mut solver = anchored_two_pose_solver();
        solver.solve_once().unwrap();
        let positions = solver.get_estimated_positions();
        assert_eq!(positions.len(), 2);
        assert!(positions[0].norm() < 1e-5);
        assert!((positions[1][0] - 1.0).abs() < 1e-5);
        assert!(positions[1][1].abs() < 1e-9);
        assert!(positions[1][2].abs() < 1e-9);
    }

    #[test]
    fn test_additive_consistency() {
        let mut solver = anchored_two_pose_solver();
        let priors: Vec<na::DVector<f64>> = solver
            .graph()
            .nodes()
            .iter()
            .map(|n| n.read().unwrap().get_state().clone())
            .collect();
        let dx = solver.solve_once().unwrap();
        let positions = solver.get_estimated_positions();
        let mut offset = 0;
        for (prior, position) in priors.iter().zip(&positions) {
            for r in 0..prior.len() {
                assert!((prior[r] + dx[offset + r] - position[r]).abs() < 1e-12);
            }
            offset += prior.len();
        }
    }

    #[test]
    fn test_chi2_near_zero_after_solve_on_consistent_graph() {
        let mut solver = anchored_two_pose_solver();
        solver.solve_once().unwrap();
        let chi2 = solver.evaluate_problem();
        assert!(chi2 < 1e-9, "chi2 = {chi2}");
    }

    #[test]
    fn test_unsupported_methods_fail_loudly() {
        for method in [
            SolveMethod::Qr,
            SolveMethod::DirectInfo,
            SolveMethod::SchurComplement,
        ] {
            let mut solver = GraphSolver::new(method);
            let n1 = solver.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
            solver.add_factor(Box::new(
                AnchorFactor::new(dvector![0.0, 0.0, 0.0], &n1, na::DMatrix::identity(3, 3))
                    .unwrap(),
            ));
            assert!(solver.solve_once().is_err(), "{method} should be rejected");
        }
    }

    #[test]
    fn test_incremental_requires_prior_solve() {
        let mut solver = anchored_two_pose_solver();
        let result = solver.solve_incremental();
        assert!(result.is_err());
    }

    #[test]
    fn test_incremental_requires_two_nodes() {
        let mut solver = GraphSolver::default();
        let n1 = solver.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        solver.add_factor(Box::new(
            AnchorFactor::new(dvector![0.0, 0.0, 0.0], &n1, na::DMatrix::identity(3, 3)).unwrap(),
        ));
        solver.solve_once().unwrap();
        assert!(solver.solve_incremental().is_err());
    }

    #[test]
    fn test_incremental_rejects_loop_closure() {
        let mut solver = anchored_two_pose_solver();
        solver.solve_once().unwrap();

        let n1 = solver.graph().nodes()[0].clone();
        let n3 = solver.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        // Reaches past the previous last node: unsupported by the fast path.
        solver.add_factor(Box::new(
            BetweenFactor2d::new(Vector3::new(2.0, 0.0, 0.0), &n1, &n3, Matrix3::identity())
                .unwrap(),
        ));
        let err = solver.solve_incremental().unwrap_err();
        assert!(err.to_string().contains("non-sequential"));
    }

    #[test]
    fn test_underconstrained_graph_fails_factorization() {
        let mut solver = GraphSolver::default();
        let n1 = solver.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let n2 = solver.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        // No anchor: pure relative constraint leaves the gauge free and the
        // information matrix singular.
        solver.add_factor(Box::new(
            BetweenFactor2d::new(Vector3::new(1.0, 0.0, 0.0), &n1, &n2, Matrix3::identity())
                .unwrap(),
        ));
        let err = solver.solve_once().unwrap_err();
        assert!(err.to_string().contains("positive definite"));
    }

    #[test]
    fn test_estimated_positions_empty_before_solve() {
        let solver = anchored_two_pose_solver();
        assert!(solver.get_estimated_positions().is_empty());
    }
}
