//! Simplicial sparse Cholesky factorization with natural ordering.
//!
//! The solver needs explicit access to the lower factor L so it can split it
//! into node-aligned blocks for the incremental update; library LLT routines
//! keep their factors opaque (and permute them), so the factorization is done
//! here directly. No fill-reducing reordering is applied: the incremental
//! block update is only valid when the factor's row/column layout matches the
//! node insertion order.
//!
//! The algorithm is the standard up-looking simplicial LL^T: an elimination
//! tree and per-row reach provide the symbolic structure, then each row of L
//! is computed by a sparse triangular solve against the already-built
//! columns. Only the upper triangle of the input is read, which matches the
//! upper-triangular storage of the assembled information matrix.

use faer::sparse::Triplet;
use tracing::debug;

use super::{
    DenseVector, LinAlgError, LinAlgResult, SparseMatrix, from_triplets, solve_lower_transpose,
    solve_lower_triangular,
};

const NONE: usize = usize::MAX;

/// A computed sparse Cholesky factorization `A = L L'`.
#[derive(Debug, Clone)]
pub struct SparseCholesky {
    l: SparseMatrix,
}

impl SparseCholesky {
    /// Factorize a symmetric positive-definite matrix. Only the upper
    /// triangle (including the diagonal) of `matrix` is read; entries below
    /// the diagonal are ignored, so both upper-triangular and full symmetric
    /// storage are accepted.
    pub fn factorize(matrix: &SparseMatrix) -> LinAlgResult<Self> {
        let n = matrix.ncols();
        if matrix.nrows() != n {
            return Err(LinAlgError::InvalidInput(format!(
                "cholesky: matrix is {}x{}",
                matrix.nrows(),
                n
            )));
        }

        let parent = etree(matrix);

        // Symbolic pass: column counts of L from the row patterns.
        let mut count = vec![1usize; n];
        let mut marks = vec![NONE; n];
        let mut stack = vec![0usize; n];
        for k in 0..n {
            let top = ereach(matrix, k, &parent, &mut marks, &mut stack);
            for &i in &stack[top..n] {
                count[i] += 1;
            }
        }

        let mut col_ptr = vec![0usize; n + 1];
        for j in 0..n {
            col_ptr[j + 1] = col_ptr[j] + count[j];
        }
        let nnz = col_ptr[n];
        let mut row_idx = vec![0usize; nnz];
        let mut val = vec![0.0f64; nnz];
        // Fill cursor per column; the diagonal slot is reserved first.
        let mut filled = vec![0usize; n];

        // Numeric pass: compute row k of L by eliminating against the
        // already-built columns in elimination-tree order.
        marks.fill(NONE);
        let mut x = vec![0.0f64; n];
        let symbolic = matrix.symbolic();
        for k in 0..n {
            let top = ereach(matrix, k, &parent, &mut marks, &mut stack);

            let rows = symbolic.row_idx_of_col_raw(k);
            let values = matrix.val_of_col(k);
            let mut d = 0.0;
            for (idx, &i) in rows.iter().enumerate() {
                if i < k {
                    x[i] = values[idx];
                } else if i == k {
                    d = values[idx];
                }
            }

            for &i in &stack[top..n] {
                let lki = x[i] / val[col_ptr[i]];
                x[i] = 0.0;
                for p in col_ptr[i] + 1..col_ptr[i] + filled[i] {
                    x[row_idx[p]] -= val[p] * lki;
                }
                d -= lki * lki;
                let p = col_ptr[i] + filled[i];
                row_idx[p] = k;
                val[p] = lki;
                filled[i] += 1;
            }

            if d <= 0.0 {
                return Err(LinAlgError::NotPositiveDefinite(format!(
                    "non-positive pivot {d:.6e} at column {k}"
                )));
            }
            let p = col_ptr[k];
            row_idx[p] = k;
            val[p] = d.sqrt();
            filled[k] = 1;
        }

        let mut triplets = Vec::with_capacity(nnz);
        for j in 0..n {
            for p in col_ptr[j]..col_ptr[j] + filled[j] {
                triplets.push(Triplet::new(row_idx[p], j, val[p]));
            }
        }
        let l = from_triplets(n, n, &triplets)?;
        debug!(
            dim = n,
            nnz_input = matrix.compute_nnz(),
            nnz_factor = l.compute_nnz(),
            "sparse cholesky factorized"
        );
        Ok(SparseCholesky { l })
    }

    /// The lower factor L (compressed columns, sorted, diagonal first).
    pub fn l(&self) -> &SparseMatrix {
        &self.l
    }

    /// Forward solve `L y = b`.
    pub fn solve_lower(&self, b: &DenseVector) -> LinAlgResult<DenseVector> {
        solve_lower_triangular(&self.l, b)
    }

    /// Back-substitution `L' x = y`.
    pub fn solve_lower_transpose(&self, y: &DenseVector) -> LinAlgResult<DenseVector> {
        solve_lower_transpose(&self.l, y)
    }

    /// Full solve `A x = b` via `L y = b`, `L' x = y`.
    pub fn solve(&self, b: &DenseVector) -> LinAlgResult<DenseVector> {
        let y = self.solve_lower(b)?;
        self.solve_lower_transpose(&y)
    }
}

/// Elimination tree of the upper-triangular pattern (path-compressed
/// ancestor walk).
fn etree(matrix: &SparseMatrix) -> Vec<usize> {
    let n = matrix.ncols();
    let symbolic = matrix.symbolic();
    let mut parent = vec![NONE; n];
    let mut ancestor = vec![NONE; n];
    for k in 0..n {
        for &row in symbolic.row_idx_of_col_raw(k) {
            let mut i = row;
            while i != NONE && i < k {
                let next = ancestor[i];
                ancestor[i] = k;
                if next == NONE {
                    parent[i] = k;
                }
                i = next;
            }
        }
    }
    parent
}

/// Nonzero pattern of row `k` of L: for every upper entry (i, k) walk up the
/// elimination tree until hitting an already-marked node, collecting the path
/// in topological order into `stack[top..]`.
fn ereach(
    matrix: &SparseMatrix,
    k: usize,
    parent: &[usize],
    marks: &mut [usize],
    stack: &mut [usize],
) -> usize {
    let n = marks.len();
    let mut top = n;
    marks[k] = k;
    let mut path = Vec::new();
    for &row in matrix.symbolic().row_idx_of_col_raw(k) {
        if row >= k {
            continue;
        }
        let mut i = row;
        path.clear();
        while marks[i] != k {
            path.push(i);
            marks[i] = k;
            if parent[i] == NONE {
                break;
            }
            i = parent[i];
        }
        while let Some(i) = path.pop() {
            top -= 1;
            stack[top] = i;
        }
    }
    top
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra as na;

    fn sparse_from_dense(m: &na::DMatrix<f64>) -> SparseMatrix {
        let mut triplets = Vec::new();
        for j in 0..m.ncols() {
            for i in 0..m.nrows() {
                if m[(i, j)] != 0.0 {
                    triplets.push(Triplet::new(i, j, m[(i, j)]));
                }
            }
        }
        from_triplets(m.nrows(), m.ncols(), &triplets).unwrap()
    }

    #[test]
    fn test_factorize_known_factor() {
        // Classic example: L = [2 0 0; 6 1 0; -8 5 3]
        let a = na::dmatrix![
            4.0, 12.0, -16.0;
            12.0, 37.0, -43.0;
            -16.0, -43.0, 98.0
        ];
        let chol = SparseCholesky::factorize(&sparse_from_dense(&a)).unwrap();
        let l = chol.l();
        assert_eq!(l.val_of_col(0), &[2.0, 6.0, -8.0]);
        assert_eq!(l.val_of_col(1), &[1.0, 5.0]);
        assert_eq!(l.val_of_col(2), &[3.0]);
    }

    #[test]
    fn test_factorize_reads_upper_triangle_only() {
        let full = na::dmatrix![
            4.0, 12.0, -16.0;
            12.0, 37.0, -43.0;
            -16.0, -43.0, 98.0
        ];
        let upper = full.upper_triangle();
        let from_full = SparseCholesky::factorize(&sparse_from_dense(&full)).unwrap();
        let from_upper = SparseCholesky::factorize(&sparse_from_dense(&upper)).unwrap();
        for j in 0..3 {
            assert_eq!(from_full.l().val_of_col(j), from_upper.l().val_of_col(j));
        }
    }

    #[test]
    fn test_solve_matches_dense_reference() {
        // Tridiagonal SPD system with fill-in-free structure plus an arrow
        // coupling that does create fill.
        let n = 6;
        let mut a = na::DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            a[(i, i)] = 5.0;
            if i + 1 < n {
                a[(i, i + 1)] = 1.0;
                a[(i + 1, i)] = 1.0;
            }
        }
        a[(0, n - 1)] = 0.5;
        a[(n - 1, 0)] = 0.5;

        let b_dense = na::DVector::from_fn(n, |i, _| (i + 1) as f64);
        let reference = na::Cholesky::new(a.clone()).unwrap().solve(&b_dense);

        let chol = SparseCholesky::factorize(&sparse_from_dense(&a)).unwrap();
        let mut b = DenseVector::zeros(n, 1);
        for i in 0..n {
            b[(i, 0)] = b_dense[i];
        }
        let x = chol.solve(&b).unwrap();
        for i in 0..n {
            assert!((x[(i, 0)] - reference[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_factorize_rejects_indefinite() {
        let a = na::dmatrix![1.0, 2.0; 2.0, 1.0];
        let result = SparseCholesky::factorize(&sparse_from_dense(&a));
        assert!(matches!(result, Err(LinAlgError::NotPositiveDefinite(_))));
    }

    #[test]
    fn test_factorize_rejects_non_square() {
        let m = from_triplets(2, 3, &[Triplet::new(0, 0, 1.0)]).unwrap();
        assert!(SparseCholesky::factorize(&m).is_err());
    }

    #[test]
    fn test_empty_matrix() {
        let m = from_triplets(0, 0, &[]).unwrap();
        let chol = SparseCholesky::factorize(&m).unwrap();
        assert_eq!(chol.l().ncols(), 0);
    }
}
