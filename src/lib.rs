//! Factor-graph nonlinear least-squares backend for robotics state estimation.
//!
//! The crate provides the sparse linear-algebra core of a SLAM-style
//! optimizer: global adjacency/information assembly, a natural-ordering
//! sparse Cholesky factorization, and an incremental solve that updates only
//! the trailing block of a previously computed factorization when nodes and
//! factors are appended.

pub mod core;
pub mod error;
pub mod factors;
pub mod linalg;
pub mod logger;
pub mod solver;

pub use error::{FGraphError, FGraphResult};
pub use logger::{init_logger, init_logger_with_level};
pub use solver::{GraphSolver, SolveMethod};
