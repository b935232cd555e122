//! The factor contract: a constraint between an ordered set of nodes.

use nalgebra as na;

use crate::core::node::NodeRef;

/// A probabilistic constraint between one or more nodes.
///
/// Factors keep track of the neighbour nodes they connect, stored in
/// ascending node-id order. Callers do not have to pass the nodes in that
/// order, but each concrete factor must enforce it at construction (reversing
/// and adjusting the observation when needed).
///
/// The residual, Jacobian and chi2 values are cached derived state: they are
/// recomputed from the current node states on every `evaluate_*` call.
/// `evaluate_residuals` must be called before `evaluate_jacobians` and
/// `evaluate_chi2`, which may reuse residual intermediates.
///
/// The Jacobian is a block matrix `[J1, J2, ..., Jn]` with one block per
/// neighbour node in stored order. Blocks carry a flipped sign relative to
/// the analytic Jacobian of the residual, so the assembled normal equations
/// `A' W A dx = A' W r` yield an increment that is applied additively.
pub trait Factor: Send + Sync + std::fmt::Debug {
    /// Recompute the residual vector from the current node states.
    fn evaluate_residuals(&mut self);

    /// Recompute the Jacobian block matrix. Residuals must be current.
    fn evaluate_jacobians(&mut self);

    /// Recompute the chi2 cost `0.5 * r' * W * r`. Residuals must be current.
    fn evaluate_chi2(&mut self);

    fn get_id(&self) -> usize;

    fn set_id(&mut self, id: usize);

    /// Dimension of the observation (residual length).
    fn get_dim(&self) -> usize;

    /// Sum of the dimensions of all neighbour nodes (Jacobian width).
    fn get_all_nodes_dim(&self) -> usize;

    fn get_residual(&self) -> &na::DVector<f64>;

    fn get_jacobian(&self) -> &na::DMatrix<f64>;

    /// Information matrix W (inverse observation covariance), dim x dim,
    /// symmetric positive semi-definite.
    fn get_information_matrix(&self) -> &na::DMatrix<f64>;

    /// Transposed square-root information matrix W^{T/2} (upper triangular),
    /// used by the QR assembly variant instead of W.
    fn get_trans_sqrt_information_matrix(&self) -> &na::DMatrix<f64>;

    fn get_chi2(&self) -> f64;

    /// Neighbour nodes in ascending id order.
    fn get_neighbour_nodes(&self) -> &[NodeRef];
}
