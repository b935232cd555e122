//! Batch Cholesky solve over the full adjacency system.

use tracing::debug;

use crate::core::FactorGraph;
use crate::linalg::{
    DenseVector, LinAlgError, SparseCholesky, SparseMatrix, block, symmetrize_upper,
};
use crate::solver::adjacency::Adjacency;
use crate::solver::{FactorizationCache, GraphSolver, SolverResult};

/// Form the normal equations `I = A' W A`, `b = A' W r` from an assembled
/// adjacency system. `W` arrives in upper-triangular storage and is expanded
/// first; the products are plain sparse multiplies.
pub(crate) fn normal_equations(adj: &Adjacency) -> SolverResult<(SparseMatrix, DenseVector)> {
    let w = symmetrize_upper(&adj.w)?;
    let at = adj
        .a
        .as_ref()
        .transpose()
        .to_col_major()
        .map_err(|e| LinAlgError::CreationFailed(format!("{e:?}")))?;

    let wa = w.as_ref() * adj.a.as_ref();
    let information = at.as_ref() * wa.as_ref();

    let wr = w.as_ref() * adj.r.as_ref();
    let b = at.as_ref() * wr.as_ref();

    Ok((information, b))
}

/// True when any row at `starting..` holds a nonzero left of the correlation
/// columns, i.e. the last node couples past the second-to-last node (a loop
/// closure into the tail). The cached `L10` block cannot represent that
/// coupling, so such a factorization must not seed an incremental cache.
pub(crate) fn tail_couples_past_correlation(
    l: &SparseMatrix,
    starting: usize,
    correlation: usize,
) -> bool {
    let symbolic = l.symbolic();
    for col in 0..starting - correlation {
        let rows = symbolic.row_idx_of_col_raw(col);
        let values = l.val_of_col(col);
        for (idx, &row) in rows.iter().enumerate() {
            if row >= starting && values[idx] != 0.0 {
                return true;
            }
        }
    }
    false
}

/// Split the factorization into the cached blocks the incremental solver
/// needs, relative to the last node: `L00` over the prefix columns, `L10` the
/// coupling rows of the last node restricted to the second-to-last node's
/// columns (the only prefix columns a sequential factor can reach), `L11` and
/// `I11` the trailing diagonal blocks. No cache is stored for graphs with
/// fewer than two nodes, or when the last node couples past the
/// second-to-last node's columns: a subsequent `solve_incremental` is then
/// refused instead of computing a wrong increment from a truncated `L10`.
pub(crate) fn split_factorization_cache(
    l: &SparseMatrix,
    information: &SparseMatrix,
    graph: &FactorGraph,
) -> SolverResult<Option<FactorizationCache>> {
    let num_nodes = graph.num_nodes();
    if num_nodes < 2 {
        return Ok(None);
    }
    let n = l.ncols();
    let intersection = graph.node_dim(num_nodes - 1);
    let starting = n - intersection;
    let correlation = graph.node_dim(num_nodes - 2);
    if tail_couples_past_correlation(l, starting, correlation) {
        debug!("last node couples past the second-to-last node, no incremental cache");
        return Ok(None);
    }

    Ok(Some(FactorizationCache {
        l00: block(l, 0, 0, starting, starting)?,
        l10: block(l, starting, starting - correlation, intersection, correlation)?,
        l11: block(l, starting, starting, intersection, intersection)?,
        i11: block(information, starting, starting, intersection, intersection)?,
    }))
}

impl GraphSolver {
    /// Factorize the normal equations and solve for the increment. Stores the
    /// forward-substituted rhs `y`, the increment `dx` and the factorization
    /// cache for subsequent incremental solves.
    pub(crate) fn solve_batch_cholesky(&mut self, adj: &Adjacency) -> SolverResult<DenseVector> {
        let (information, b) = normal_equations(adj)?;
        debug!(
            dim = information.ncols(),
            nnz = information.compute_nnz(),
            "normal equations assembled"
        );

        let chol = SparseCholesky::factorize(&information)?;
        let y = chol.solve_lower(&b)?;
        let dx = chol.solve_lower_transpose(&y)?;

        self.cache = split_factorization_cache(chol.l(), &information, &self.graph)?;
        self.y = y;
        self.dx = dx.clone();
        Ok(dx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Node;
    use crate::factors::{AnchorFactor, BetweenFactor2d};
    use crate::solver::SolveMethod;
    use crate::solver::adjacency::build_adjacency;
    use nalgebra::{self as na, Matrix3, Vector3, dvector};

    #[test]
    fn test_normal_equations_match_dense_reference() {
        let mut graph = FactorGraph::new();
        let n1 = graph.add_node(Node::new(dvector![0.1, -0.2, 0.05]));
        let n2 = graph.add_node(Node::new(dvector![0.9, 0.1, 0.0]));
        graph.add_factor(Box::new(
            AnchorFactor::new(dvector![0.0, 0.0, 0.0], &n1, na::DMatrix::identity(3, 3) * 3.0)
                .unwrap(),
        ));
        graph.add_factor(Box::new(
            BetweenFactor2d::new(
                Vector3::new(1.0, 0.0, 0.0),
                &n1,
                &n2,
                Matrix3::identity() * 2.0,
            )
            .unwrap(),
        ));

        let adj = build_adjacency(&mut graph, SolveMethod::CholeskyAdjacency).unwrap();
        let (information, b) = normal_equations(&adj).unwrap();

        // Dense reference with the same (flipped-sign) Jacobian.
        let mut a = na::DMatrix::<f64>::zeros(6, 6);
        for i in 0..3 {
            a[(i, i)] = -1.0;
            a[(3 + i, i)] = 1.0;
            a[(3 + i, 3 + i)] = -1.0;
        }
        let mut w = na::DMatrix::<f64>::zeros(6, 6);
        for i in 0..3 {
            w[(i, i)] = 3.0;
            w[(3 + i, 3 + i)] = 2.0;
        }
        let reference = a.transpose() * &w * &a;

        let symbolic = information.symbolic();
        let mut dense_info = na::DMatrix::<f64>::zeros(6, 6);
        for col in 0..6 {
            let rows = symbolic.row_idx_of_col_raw(col);
            let values = information.val_of_col(col);
            for (idx, &row) in rows.iter().enumerate() {
                dense_info[(row, col)] += values[idx];
            }
        }
        assert!((dense_info - &reference).norm() < 1e-12);
        assert_eq!(b.nrows(), 6);
    }

    #[test]
    fn test_cache_split_dimensions() {
        let mut graph = FactorGraph::new();
        let n1 = graph.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let n2 = graph.add_node(Node::new(dvector![0.5, 0.0, 0.0]));
        graph.add_factor(Box::new(
            AnchorFactor::new(dvector![0.0, 0.0, 0.0], &n1, na::DMatrix::identity(3, 3) * 100.0)
                .unwrap(),
        ));
        graph.add_factor(Box::new(
            BetweenFactor2d::new(Vector3::new(1.0, 0.0, 0.0), &n1, &n2, Matrix3::identity())
                .unwrap(),
        ));

        let adj = build_adjacency(&mut graph, SolveMethod::CholeskyAdjacency).unwrap();
        let (information, _) = normal_equations(&adj).unwrap();
        let chol = SparseCholesky::factorize(&information).unwrap();
        let cache = split_factorization_cache(chol.l(), &information, &graph)
            .unwrap()
            .unwrap();
        assert_eq!(cache.l00.ncols(), 3);
        assert_eq!(cache.l10.nrows(), 3);
        assert_eq!(cache.l10.ncols(), 3);
        assert_eq!(cache.l11.ncols(), 3);
        assert_eq!(cache.i11.ncols(), 3);
    }

    #[test]
    fn test_no_cache_when_last_node_closes_a_loop() {
        // n1 -- n2 -- n3 plus a direct n1 -- n3 constraint: the factor rows
        // of n3 reach into n1's columns, which L10 cannot carry.
        let mut graph = FactorGraph::new();
        let n1 = graph.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let n2 = graph.add_node(Node::new(dvector![1.0, 0.0, 0.0]));
        let n3 = graph.add_node(Node::new(dvector![2.0, 0.0, 0.0]));
        graph.add_factor(Box::new(
            AnchorFactor::new(dvector![0.0, 0.0, 0.0], &n1, na::DMatrix::identity(3, 3) * 100.0)
                .unwrap(),
        ));
        graph.add_factor(Box::new(
            BetweenFactor2d::new(Vector3::new(1.0, 0.0, 0.0), &n1, &n2, Matrix3::identity())
                .unwrap(),
        ));
        graph.add_factor(Box::new(
            BetweenFactor2d::new(Vector3::new(1.0, 0.0, 0.0), &n2, &n3, Matrix3::identity())
                .unwrap(),
        ));
        graph.add_factor(Box::new(
            BetweenFactor2d::new(Vector3::new(2.0, 0.0, 0.0), &n1, &n3, Matrix3::identity())
                .unwrap(),
        ));

        let adj = build_adjacency(&mut graph, SolveMethod::CholeskyAdjacency).unwrap();
        let (information, _) = normal_equations(&adj).unwrap();
        let chol = SparseCholesky::factorize(&information).unwrap();
        let cache = split_factorization_cache(chol.l(), &information, &graph).unwrap();
        assert!(cache.is_none());
    }

    #[test]
    fn test_no_cache_for_single_node() {
        let mut graph = FactorGraph::new();
        let n1 = graph.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        graph.add_factor(Box::new(
            AnchorFactor::new(dvector![0.0, 0.0, 0.0], &n1, na::DMatrix::identity(3, 3)).unwrap(),
        ));
        let adj = build_adjacency(&mut graph, SolveMethod::CholeskyAdjacency).unwrap();
        let (information, _) = normal_equations(&adj).unwrap();
        let chol = SparseCholesky::factorize(&information).unwrap();
        let cache = split_factorization_cache(chol.l(), &information, &graph).unwrap();
        assert!(cache.is_none());
    }
}
