//! Sparse linear algebra utilities for the factor-graph solvers.
//!
//! Sparse matrices use faer's compressed-column storage; dense vectors and
//! per-factor blocks use nalgebra. This module provides the triplet-based
//! construction helpers, block extraction/composition used by the incremental
//! solver, and the sparse triangular solves that operate on externally
//! assembled Cholesky factors.

use faer::sparse::Triplet;
use thiserror::Error;

pub mod cholesky;

pub use cholesky::SparseCholesky;

/// Type alias for sparse matrices using faer
pub type SparseMatrix = faer::sparse::SparseColMat<usize, f64>;

/// Type alias for dense faer matrices (used for column vectors)
pub type DenseVector = faer::Mat<f64>;

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Errors raised by the sparse linear algebra layer
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Cholesky factorization hit a non-positive pivot: the matrix is not
    /// positive definite (under-constrained or inconsistent graph).
    #[error("matrix is not positive definite: {0}")]
    NotPositiveDefinite(String),

    /// Malformed input (dimension mismatch, missing diagonal, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Sparse matrix construction failed
    #[error("failed to create sparse matrix: {0}")]
    CreationFailed(String),
}

/// Create a sparse matrix from (row, col, value) triplets. Duplicate entries
/// are summed, which is what the incremental block merge relies on.
pub fn from_triplets(
    nrows: usize,
    ncols: usize,
    triplets: &[Triplet<usize, usize, f64>],
) -> LinAlgResult<SparseMatrix> {
    SparseMatrix::try_new_from_triplets(nrows, ncols, triplets)
        .map_err(|e| LinAlgError::CreationFailed(format!("{e:?}")))
}

/// Append all entries of `matrix`, shifted by (`row_offset`, `col_offset`)
/// and scaled by `scale`, onto a triplet list. This is the primitive behind
/// the block surgery of the incremental solver: blocks are composed into a
/// freshly sized matrix in one pass instead of mutating compressed storage.
pub fn push_block_triplets(
    matrix: &SparseMatrix,
    row_offset: usize,
    col_offset: usize,
    scale: f64,
    out: &mut Vec<Triplet<usize, usize, f64>>,
) {
    let symbolic = matrix.symbolic();
    for col in 0..matrix.ncols() {
        let rows = symbolic.row_idx_of_col_raw(col);
        let values = matrix.val_of_col(col);
        for (idx, &row) in rows.iter().enumerate() {
            out.push(Triplet::new(
                row + row_offset,
                col + col_offset,
                scale * values[idx],
            ));
        }
    }
}

/// Extract the dense-index block `matrix[row0.., col0..]` of size
/// `nrows x ncols` as a new sparse matrix with 0-based indices.
pub fn block(
    matrix: &SparseMatrix,
    row0: usize,
    col0: usize,
    nrows: usize,
    ncols: usize,
) -> LinAlgResult<SparseMatrix> {
    if row0 + nrows > matrix.nrows() || col0 + ncols > matrix.ncols() {
        return Err(LinAlgError::InvalidInput(format!(
            "block ({row0},{col0})+{nrows}x{ncols} exceeds matrix {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    let symbolic = matrix.symbolic();
    let mut triplets = Vec::new();
    for col in col0..col0 + ncols {
        let rows = symbolic.row_idx_of_col_raw(col);
        let values = matrix.val_of_col(col);
        for (idx, &row) in rows.iter().enumerate() {
            if row >= row0 && row < row0 + nrows {
                triplets.push(Triplet::new(row - row0, col - col0, values[idx]));
            }
        }
    }
    from_triplets(nrows, ncols, &triplets)
}

/// Expand an upper-triangular-stored symmetric matrix into full symmetric
/// storage by mirroring the strictly upper entries.
pub fn symmetrize_upper(matrix: &SparseMatrix) -> LinAlgResult<SparseMatrix> {
    if matrix.nrows() != matrix.ncols() {
        return Err(LinAlgError::InvalidInput(format!(
            "symmetrize_upper: matrix is {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    let symbolic = matrix.symbolic();
    let mut triplets = Vec::with_capacity(2 * matrix.compute_nnz());
    for col in 0..matrix.ncols() {
        let rows = symbolic.row_idx_of_col_raw(col);
        let values = matrix.val_of_col(col);
        for (idx, &row) in rows.iter().enumerate() {
            if row > col {
                return Err(LinAlgError::InvalidInput(format!(
                    "symmetrize_upper: entry ({row},{col}) below the diagonal"
                )));
            }
            triplets.push(Triplet::new(row, col, values[idx]));
            if row < col {
                triplets.push(Triplet::new(col, row, values[idx]));
            }
        }
    }
    from_triplets(matrix.nrows(), matrix.ncols(), &triplets)
}

/// Forward substitution `L y = b` for a sparse lower-triangular matrix whose
/// columns are sorted with the diagonal entry first (the layout produced by
/// [`SparseCholesky`] and by the incremental block composition).
pub fn solve_lower_triangular(l: &SparseMatrix, b: &DenseVector) -> LinAlgResult<DenseVector> {
    let n = l.ncols();
    if l.nrows() != n || b.nrows() != n || b.ncols() != 1 {
        return Err(LinAlgError::InvalidInput(format!(
            "solve_lower_triangular: L is {}x{}, b is {}x{}",
            l.nrows(),
            n,
            b.nrows(),
            b.ncols()
        )));
    }
    let symbolic = l.symbolic();
    let mut x = b.clone();
    for j in 0..n {
        let rows = symbolic.row_idx_of_col_raw(j);
        let values = l.val_of_col(j);
        if rows.first() != Some(&j) {
            return Err(LinAlgError::InvalidInput(format!(
                "solve_lower_triangular: missing diagonal in column {j}"
            )));
        }
        let xj = x[(j, 0)] / values[0];
        x[(j, 0)] = xj;
        for (idx, &i) in rows.iter().enumerate().skip(1) {
            x[(i, 0)] -= values[idx] * xj;
        }
    }
    Ok(x)
}

/// Back substitution `L' x = b` using the columns of the lower factor as the
/// rows of its transpose. Same layout requirements as
/// [`solve_lower_triangular`].
pub fn solve_lower_transpose(l: &SparseMatrix, b: &DenseVector) -> LinAlgResult<DenseVector> {
    let n = l.ncols();
    if l.nrows() != n || b.nrows() != n || b.ncols() != 1 {
        return Err(LinAlgError::InvalidInput(format!(
            "solve_lower_transpose: L is {}x{}, b is {}x{}",
            l.nrows(),
            n,
            b.nrows(),
            b.ncols()
        )));
    }
    let symbolic = l.symbolic();
    let mut x = b.clone();
    for j in (0..n).rev() {
        let rows = symbolic.row_idx_of_col_raw(j);
        let values = l.val_of_col(j);
        if rows.first() != Some(&j) {
            return Err(LinAlgError::InvalidInput(format!(
                "solve_lower_transpose: missing diagonal in column {j}"
            )));
        }
        let mut sum = x[(j, 0)];
        for (idx, &i) in rows.iter().enumerate().skip(1) {
            sum -= values[idx] * x[(i, 0)];
        }
        x[(j, 0)] = sum / values[0];
    }
    Ok(x)
}
