//! Assembly of the global adjacency system from per-factor blocks.
//!
//! The adjacency system is the stacked linearization of all factors:
//! `A` (obs_dim x state_dim) holds the Jacobian blocks, `W` (obs_dim x
//! obs_dim, block-diagonal, upper-triangular storage) the per-factor
//! information matrices, and `r` the stacked residuals. Factor evaluation is
//! embarrassingly parallel; the triplet insertion afterwards is serial and
//! cheap.

use faer::sparse::Triplet;
use rayon::prelude::*;
use tracing::trace;

use crate::core::{Factor, FactorGraph};
use crate::linalg::{DenseVector, from_triplets};
use crate::solver::{SolveMethod, SolverError, SolverResult};

/// The assembled adjacency system `(A, W, r)`.
#[derive(Debug)]
pub(crate) struct Adjacency {
    pub a: crate::linalg::SparseMatrix,
    /// Block-diagonal weights, upper triangle only. Holds `W` for the
    /// Cholesky path and `W^{T/2}` for the QR path.
    pub w: crate::linalg::SparseMatrix,
    pub r: DenseVector,
}

/// Build the full adjacency system over every node and factor in the graph.
pub(crate) fn build_adjacency(
    graph: &mut FactorGraph,
    method: SolveMethod,
) -> SolverResult<Adjacency> {
    let state_dim = graph.state_dim();
    let obs_dim = graph.obs_dim();

    // Column offset of each node, in insertion (= id) order.
    let mut node_offsets = Vec::with_capacity(graph.num_nodes());
    let mut columns = 0;
    for index in 0..graph.num_nodes() {
        node_offsets.push(columns);
        columns += graph.node_dim(index);
    }
    if columns != state_dim {
        return Err(SolverError::DimensionMismatch(format!(
            "node dims sum to {columns}, graph declares state_dim {state_dim}"
        )));
    }

    graph.factors_mut().par_iter_mut().for_each(|factor| {
        factor.evaluate_residuals();
        factor.evaluate_jacobians();
    });

    trace!(state_dim, obs_dim, "assembling full adjacency");
    assemble(graph.factors(), obs_dim, state_dim, method, |node_id| {
        Ok(node_offsets[node_id - 1])
    })
}

/// Build the adjacency system of the increment only: the factors appended
/// after `last_solved_factor`, over the columns of the nodes from
/// `last_solved_node` (the shared node of the previous solve) onward.
///
/// New factors may reference the shared node and any newer node; a factor
/// reaching further back (a loop closure) is rejected with
/// [`SolverError::NonSequentialFactor`].
pub(crate) fn build_adjacency_incremental(
    graph: &mut FactorGraph,
    last_solved_node: usize,
    last_solved_factor: usize,
    last_state_dim: usize,
    last_obs_dim: usize,
) -> SolverResult<Adjacency> {
    let shared_dim = graph.node_dim(last_solved_node);
    let state_dim = graph.state_dim() - last_state_dim + shared_dim;
    let obs_dim = graph.obs_dim() - last_obs_dim;

    // Local column offsets, starting at the shared node.
    let num_window_nodes = graph.num_nodes() - last_solved_node;
    let mut node_offsets = Vec::with_capacity(num_window_nodes);
    let mut columns = 0;
    for index in last_solved_node..graph.num_nodes() {
        node_offsets.push(columns);
        columns += graph.node_dim(index);
    }
    if columns != state_dim {
        return Err(SolverError::DimensionMismatch(format!(
            "window node dims sum to {columns}, expected {state_dim}"
        )));
    }

    let first_new = last_solved_factor + 1;
    graph.factors_mut()[first_new..]
        .par_iter_mut()
        .for_each(|factor| {
            factor.evaluate_residuals();
            factor.evaluate_jacobians();
        });

    trace!(
        state_dim,
        obs_dim,
        new_factors = graph.num_factors() - first_new,
        "assembling incremental adjacency"
    );
    assemble(
        &graph.factors()[first_new..],
        obs_dim,
        state_dim,
        SolveMethod::CholeskyAdjacency,
        |node_id| {
            let index = node_id - 1;
            if index < last_solved_node {
                return Err(SolverError::NonSequentialFactor(format!(
                    "factor references node {node_id}, before the last solved node"
                )));
            }
            Ok(node_offsets[index - last_solved_node])
        },
    )
}

fn assemble(
    factors: &[Box<dyn Factor>],
    obs_dim: usize,
    state_dim: usize,
    method: SolveMethod,
    column_offset_of: impl Fn(usize) -> SolverResult<usize>,
) -> SolverResult<Adjacency> {
    let mut nnz_a = 0;
    let mut nnz_w = 0;
    let mut rows = 0;
    for factor in factors {
        let dim = factor.get_dim();
        nnz_a += dim * factor.get_all_nodes_dim();
        nnz_w += dim * (dim + 1) / 2;
        rows += dim;
    }
    if rows != obs_dim {
        return Err(SolverError::DimensionMismatch(format!(
            "factor dims sum to {rows}, expected obs_dim {obs_dim}"
        )));
    }

    let mut a_triplets = Vec::with_capacity(nnz_a);
    let mut w_triplets = Vec::with_capacity(nnz_w);
    let mut r = DenseVector::zeros(obs_dim, 1);

    let mut row0 = 0;
    for factor in factors {
        let dim = factor.get_dim();

        let residual = factor.get_residual();
        if residual.len() != dim {
            return Err(SolverError::DimensionMismatch(format!(
                "factor {}: residual length {} != dim {}",
                factor.get_id(),
                residual.len(),
                dim
            )));
        }
        for l in 0..dim {
            r[(row0 + l, 0)] = residual[l];
        }

        let jacobian = factor.get_jacobian();
        if jacobian.nrows() != dim || jacobian.ncols() != factor.get_all_nodes_dim() {
            return Err(SolverError::DimensionMismatch(format!(
                "factor {}: jacobian is {}x{}, expected {}x{}",
                factor.get_id(),
                jacobian.nrows(),
                jacobian.ncols(),
                dim,
                factor.get_all_nodes_dim()
            )));
        }
        // Neighbours come in ascending id order, so the Jacobian blocks land
        // in monotonically increasing column ranges.
        let mut block_col = 0;
        for node in factor.get_neighbour_nodes() {
            let (node_id, node_dim) = {
                let guard = node.read().unwrap();
                (guard.get_id(), guard.get_dim())
            };
            let col0 = column_offset_of(node_id)?;
            for l in 0..dim {
                for k in 0..node_dim {
                    a_triplets.push(Triplet::new(
                        row0 + l,
                        col0 + k,
                        jacobian[(l, block_col + k)],
                    ));
                }
            }
            block_col += node_dim;
        }

        let weights = match method {
            SolveMethod::Qr => factor.get_trans_sqrt_information_matrix(),
            _ => factor.get_information_matrix(),
        };
        for l in 0..dim {
            for k in l..dim {
                w_triplets.push(Triplet::new(row0 + l, row0 + k, weights[(l, k)]));
            }
        }

        row0 += dim;
    }

    Ok(Adjacency {
        a: from_triplets(obs_dim, state_dim, &a_triplets)?,
        w: from_triplets(obs_dim, obs_dim, &w_triplets)?,
        r,
    })
}
