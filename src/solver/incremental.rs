//! Incremental factorization update.
//!
//! Reuses the cached blocks of the previous solve instead of refactorizing
//! the whole information matrix. With appended nodes/factors the new
//! information matrix differs from the old one only in the trailing block
//! that starts at the previously-last node, so its factor can be composed
//! from the cached `L00`/`L10` and a fresh (small) factorization of the
//! merged trailing block `I_delta + I11 - L10 L10'`.

use faer::sparse::Triplet;
use tracing::debug;

use crate::linalg::{
    DenseVector, LinAlgError, SparseCholesky, block, from_triplets, push_block_triplets,
    solve_lower_transpose,
};
use crate::solver::adjacency::build_adjacency_incremental;
use crate::solver::batch::{normal_equations, tail_couples_past_correlation};
use crate::solver::{FactorizationCache, GraphSolver, SolverError, SolverResult};

impl GraphSolver {
    pub(crate) fn solve_chol_incremental(&mut self) -> SolverResult<DenseVector> {
        let cache = self
            .cache
            .clone()
            .ok_or_else(|| {
                SolverError::IncrementalPrecondition(
                    "no cached factorization; run a batch solve first".into(),
                )
            })?;
        let last_node = self.last_solved_node.ok_or_else(|| {
            SolverError::IncrementalPrecondition("no previously solved node".into())
        })?;
        let last_factor = self.last_solved_factor.ok_or_else(|| {
            SolverError::IncrementalPrecondition("no previously solved factor".into())
        })?;

        let adj = build_adjacency_incremental(
            &mut self.graph,
            last_node,
            last_factor,
            self.last_state_dim,
            self.last_obs_dim,
        )?;
        let (info_delta, mut b) = normal_equations(&adj)?;

        // Merged trailing block: the delta information over the window plus
        // the cached I11, minus the part of I11 already explained by the
        // prefix (L10 L10').
        let m = info_delta.ncols();
        let mut triplets = Vec::new();
        push_block_triplets(&info_delta, 0, 0, 1.0, &mut triplets);
        push_block_triplets(&cache.i11, 0, 0, 1.0, &mut triplets);
        let l10t = cache
            .l10
            .as_ref()
            .transpose()
            .to_col_major()
            .map_err(|e| LinAlgError::CreationFailed(format!("{e:?}")))?;
        let explained = cache.l10.as_ref() * l10t.as_ref();
        push_block_triplets(&explained, 0, 0, -1.0, &mut triplets);
        let merged = from_triplets(m, m, &triplets)?;

        let chol = SparseCholesky::factorize(&merged)?;
        debug!(window_dim = m, "incremental trailing block factorized");

        let old_intersection = self.graph.node_dim(last_node);
        let old_starting = cache.l00.ncols();

        // The window rhs overlaps the previous system on the shared node:
        // add back the contribution already accumulated in y there,
        // L11_old * y10, before the forward solve.
        let mut y10 = DenseVector::zeros(old_intersection, 1);
        for i in 0..old_intersection {
            y10[(i, 0)] = self.y[(old_starting + i, 0)];
        }
        let correction = cache.l11.as_ref() * y10.as_ref();
        for i in 0..old_intersection {
            b[(i, 0)] += correction[(i, 0)];
        }

        let y_window = chol.solve_lower(&b)?;

        let state_dim = self.graph.state_dim();
        let mut y = DenseVector::zeros(state_dim, 1);
        for i in 0..old_starting {
            y[(i, 0)] = self.y[(i, 0)];
        }
        for i in 0..m {
            y[(old_starting + i, 0)] = y_window[(i, 0)];
        }

        // Compose the full factor: unchanged prefix blocks plus the fresh
        // trailing factor. L10 only spans the second-to-last node's columns.
        let old_correlation = self.graph.node_dim(last_node - 1);
        let mut l_triplets: Vec<Triplet<usize, usize, f64>> = Vec::new();
        push_block_triplets(&cache.l00, 0, 0, 1.0, &mut l_triplets);
        push_block_triplets(
            &cache.l10,
            old_starting,
            old_starting - old_correlation,
            1.0,
            &mut l_triplets,
        );
        push_block_triplets(chol.l(), old_starting, old_starting, 1.0, &mut l_triplets);
        let l = from_triplets(state_dim, state_dim, &l_triplets)?;

        // Back-substitution runs over the full factor: the appended columns
        // feed back into every earlier state.
        let dx = solve_lower_transpose(&l, &y)?;

        // Re-split the cache relative to the new last node. A window factor
        // may couple the new last node past the second-to-last node's
        // columns; such a factorization cannot seed the next incremental
        // solve, same rule as the batch split.
        let num_nodes = self.graph.num_nodes();
        let intersection = self.graph.node_dim(num_nodes - 1);
        let starting = state_dim - intersection;
        let correlation = self.graph.node_dim(num_nodes - 2);
        self.cache = if tail_couples_past_correlation(&l, starting, correlation) {
            debug!("last node couples past the second-to-last node, no incremental cache");
            None
        } else {
            Some(FactorizationCache {
                l00: block(&l, 0, 0, starting, starting)?,
                l10: block(&l, starting, starting - correlation, intersection, correlation)?,
                l11: block(&l, starting, starting, intersection, intersection)?,
                i11: block(
                    &merged,
                    m - intersection,
                    m - intersection,
                    intersection,
                    intersection,
                )?,
            })
        };
        self.y = y;
        self.dx = dx.clone();
        Ok(dx)
    }
}
