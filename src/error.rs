//! Error types for the fgraph-solver library
//!
//! This module provides the main error and result types used throughout the
//! library. All errors use the `thiserror` crate for automatic trait
//! implementations; module-specific errors convert into [`FGraphError`].

use crate::{linalg::LinAlgError, solver::SolverError};
use thiserror::Error;

/// Main result type used throughout the fgraph-solver library
pub type FGraphResult<T> = Result<T, FGraphError>;

/// Main error type for the fgraph-solver library
#[derive(Debug, Clone, Error)]
pub enum FGraphError {
    /// Linear algebra related errors (factorization, sparse construction)
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// Solver related errors (assembly, bookkeeping, unsupported methods)
    #[error("Solver error: {0}")]
    Solver(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// Convert module-specific errors to FGraphError

impl From<LinAlgError> for FGraphError {
    fn from(err: LinAlgError) -> Self {
        FGraphError::LinearAlgebra(err.to_string())
    }
}

impl From<SolverError> for FGraphError {
    fn from(err: SolverError) -> Self {
        FGraphError::Solver(err.to_string())
    }
}
