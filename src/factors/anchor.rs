//! Unary anchor (prior) factor pinning a node to an absolute observation.

use nalgebra as na;

use crate::core::{Factor, NodeRef};
use crate::error::{FGraphError, FGraphResult};

/// Prior factor `r = x - obs` on a single node of arbitrary dimension.
///
/// Anchoring at least one node is what removes the gauge freedom of a purely
/// relative graph and keeps the information matrix positive definite.
#[derive(Debug)]
pub struct AnchorFactor {
    id: usize,
    nodes: Vec<NodeRef>,
    obs: na::DVector<f64>,
    residual: na::DVector<f64>,
    jacobian: na::DMatrix<f64>,
    information: na::DMatrix<f64>,
    trans_sqrt_information: na::DMatrix<f64>,
    chi2: f64,
}

impl AnchorFactor {
    /// Create an anchor on `node` with observation `obs` and information
    /// matrix `information` (dim x dim, positive definite).
    pub fn new(
        obs: na::DVector<f64>,
        node: &NodeRef,
        information: na::DMatrix<f64>,
    ) -> FGraphResult<Self> {
        let dim = {
            let guard = node.read().unwrap();
            if guard.get_id() == 0 {
                return Err(FGraphError::InvalidInput(
                    "AnchorFactor: node must be added to the graph before any factor".into(),
                ));
            }
            guard.get_dim()
        };
        if obs.len() != dim || information.nrows() != dim || information.ncols() != dim {
            return Err(FGraphError::InvalidInput(format!(
                "AnchorFactor: observation/information dimensions do not match node dim {dim}"
            )));
        }
        let trans_sqrt_information = na::Cholesky::new(information.clone())
            .ok_or_else(|| {
                FGraphError::InvalidInput(
                    "AnchorFactor: information matrix is not positive definite".into(),
                )
            })?
            .l()
            .transpose();

        Ok(AnchorFactor {
            id: 0,
            nodes: vec![node.clone()],
            obs,
            residual: na::DVector::zeros(dim),
            // Flipped-sign convention: the analytic Jacobian is +I.
            jacobian: -na::DMatrix::<f64>::identity(dim, dim),
            information,
            trans_sqrt_information,
            chi2: 0.0,
        })
    }
}

impl Factor for AnchorFactor {
    fn evaluate_residuals(&mut self) {
        let state = self.nodes[0].read().unwrap().get_state().clone();
        self.residual = state - &self.obs;
    }

    fn evaluate_jacobians(&mut self) {
        // Constant Jacobian, set at construction.
    }

    fn evaluate_chi2(&mut self) {
        self.chi2 = 0.5 * self.residual.dot(&(&self.information * &self.residual));
    }

    fn get_id(&self) -> usize {
        self.id
    }

    fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    fn get_dim(&self) -> usize {
        self.obs.len()
    }

    fn get_all_nodes_dim(&self) -> usize {
        self.obs.len()
    }

    fn get_residual(&self) -> &na::DVector<f64> {
        &self.residual
    }

    fn get_jacobian(&self) -> &na::DMatrix<f64> {
        &self.jacobian
    }

    fn get_information_matrix(&self) -> &na::DMatrix<f64> {
        &self.information
    }

    fn get_trans_sqrt_information_matrix(&self) -> &na::DMatrix<f64> {
        &self.trans_sqrt_information
    }

    fn get_chi2(&self) -> f64 {
        self.chi2
    }

    fn get_neighbour_nodes(&self) -> &[NodeRef] {
        &self.nodes
    }
}
