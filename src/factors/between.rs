//! Relative pose-pose factor for 2-D poses `[x, y, theta]`.

use nalgebra as na;

use crate::core::{Factor, NodeRef};
use crate::error::{FGraphError, FGraphResult};
use crate::factors::wrap_angle;

/// Binary factor observing the relative displacement between two 3-DOF poses:
/// `r = (x_target - x_origin) - obs`, with the heading residual wrapped to
/// (-pi, pi].
///
/// Neighbour nodes are stored in ascending id order regardless of the
/// constructor argument order; when the arguments arrive reversed, the
/// observation is negated to keep the measurement consistent.
#[derive(Debug)]
pub struct BetweenFactor2d {
    id: usize,
    nodes: Vec<NodeRef>,
    obs: na::DVector<f64>,
    residual: na::DVector<f64>,
    jacobian: na::DMatrix<f64>,
    information: na::DMatrix<f64>,
    trans_sqrt_information: na::DMatrix<f64>,
    chi2: f64,
}

impl BetweenFactor2d {
    pub fn new(
        obs: na::Vector3<f64>,
        node_origin: &NodeRef,
        node_target: &NodeRef,
        information: na::Matrix3<f64>,
    ) -> FGraphResult<Self> {
        let (id_origin, id_target) = {
            let origin = node_origin.read().unwrap();
            let target = node_target.read().unwrap();
            if origin.get_id() == 0 || target.get_id() == 0 {
                return Err(FGraphError::InvalidInput(
                    "BetweenFactor2d: nodes must be added to the graph before any factor".into(),
                ));
            }
            if origin.get_dim() != 3 || target.get_dim() != 3 {
                return Err(FGraphError::InvalidInput(
                    "BetweenFactor2d: both nodes must be 3-DOF poses".into(),
                ));
            }
            (origin.get_id(), target.get_id())
        };

        // Sorted neighbour list; a reversed constructor call flips the
        // observation so the measurement stays the same.
        let (nodes, obs) = if id_origin < id_target {
            (vec![node_origin.clone(), node_target.clone()], obs)
        } else {
            (vec![node_target.clone(), node_origin.clone()], -obs)
        };

        let information = na::DMatrix::from_column_slice(3, 3, information.as_slice());
        let trans_sqrt_information = na::Cholesky::new(information.clone())
            .ok_or_else(|| {
                FGraphError::InvalidInput(
                    "BetweenFactor2d: information matrix is not positive definite".into(),
                )
            })?
            .l()
            .transpose();

        // Flipped-sign convention: analytic Jacobian is [-I | I].
        let mut jacobian = na::DMatrix::<f64>::zeros(3, 6);
        jacobian
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&na::Matrix3::identity());
        jacobian
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(-na::Matrix3::<f64>::identity()));

        Ok(BetweenFactor2d {
            id: 0,
            nodes,
            obs: na::DVector::from_column_slice(obs.as_slice()),
            residual: na::DVector::zeros(3),
            jacobian,
            information,
            trans_sqrt_information,
            chi2: 0.0,
        })
    }
}

impl Factor for BetweenFactor2d {
    fn evaluate_residuals(&mut self) {
        let state_first = self.nodes[0].read().unwrap().get_state().clone();
        let state_second = self.nodes[1].read().unwrap().get_state().clone();

        self.residual = state_second - state_first - &self.obs;
        self.residual[2] = wrap_angle(self.residual[2]);
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
        3
    }

    fn get_all_nodes_dim(&self) -> usize {
        6
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
