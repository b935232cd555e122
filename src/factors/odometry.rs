//! Sequential odometry factor for 2-D poses.

use nalgebra as na;

use crate::core::{Factor, NodeRef};
use crate::error::{FGraphError, FGraphResult};
use crate::factors::wrap_angle;

/// Odometry factor between two consecutive 3-DOF poses.
///
/// The observation is a motion command `[dtheta1, d, dtheta2]`: rotate by
/// `dtheta1`, drive forward `d`, rotate by `dtheta2`. The residual compares
/// the target pose against the motion-model prediction from the origin pose:
/// `r = x_target - g(x_origin, obs)`.
///
/// The origin node must precede the target node (ascending ids); this is the
/// append-only sequential constraint the incremental solver relies on.
#[derive(Debug)]
pub struct OdometryFactor2d {
    id: usize,
    nodes: Vec<NodeRef>,
    obs: na::DVector<f64>,
    residual: na::DVector<f64>,
    jacobian: na::DMatrix<f64>,
    information: na::DMatrix<f64>,
    trans_sqrt_information: na::DMatrix<f64>,
    chi2: f64,
}

impl OdometryFactor2d {
    /// Create an odometry factor. With `update_node_target` set, the target
    /// node state is initialized to the motion-model prediction from the
    /// origin node, which is the usual way of seeding a fresh pose.
    pub fn new(
        obs: na::Vector3<f64>,
        node_origin: &NodeRef,
        node_target: &NodeRef,
        information: na::Matrix3<f64>,
        update_node_target: bool,
    ) -> FGraphResult<Self> {
        {
            let origin = node_origin.read().unwrap();
            let target = node_target.read().unwrap();
            if origin.get_id() == 0 || target.get_id() == 0 {
                return Err(FGraphError::InvalidInput(
                    "OdometryFactor2d: nodes must be added to the graph before any factor".into(),
                ));
            }
            if origin.get_dim() != 3 || target.get_dim() != 3 {
                return Err(FGraphError::InvalidInput(
                    "OdometryFactor2d: both nodes must be 3-DOF poses".into(),
                ));
            }
            if origin.get_id() >= target.get_id() {
                return Err(FGraphError::InvalidInput(
                    "OdometryFactor2d: origin node id must precede target node id".into(),
                ));
            }
        }

        let obs = na::DVector::from_column_slice(obs.as_slice());
        if update_node_target {
            let prediction = {
                let origin = node_origin.read().unwrap();
                Self::odometry_prediction(origin.get_state(), &obs)
            };
            let mut target = node_target.write().unwrap();
            let dx = prediction - target.get_state();
            target.update(dx.as_view());
        }

        let information = na::DMatrix::from_column_slice(3, 3, information.as_slice());
        let trans_sqrt_information = na::Cholesky::new(information.clone())
            .ok_or_else(|| {
                FGraphError::InvalidInput(
                    "OdometryFactor2d: information matrix is not positive definite".into(),
                )
            })?
            .l()
            .transpose();

        Ok(OdometryFactor2d {
            id: 0,
            nodes: vec![node_origin.clone(), node_target.clone()],
            obs,
            residual: na::DVector::zeros(3),
            jacobian: na::DMatrix::zeros(3, 6),
            information,
            trans_sqrt_information,
            chi2: 0.0,
        })
    }

    /// Motion-model prediction `g(state, motion)` for `motion = [a1, d, a2]`.
    fn odometry_prediction(state: &na::DVector<f64>, motion: &na::DVector<f64>) -> na::DVector<f64> {
        let heading = state[2] + motion[0];
        na::DVector::from_vec(vec![
            state[0] + motion[1] * heading.cos(),
            state[1] + motion[1] * heading.sin(),
            wrap_angle(heading + motion[2]),
        ])
    }
}

impl Factor for OdometryFactor2d {
    fn evaluate_residuals(&mut self) {
        let state_origin = self.nodes[0].read().unwrap().get_state().clone();
        let state_target = self.nodes[1].read().unwrap().get_state().clone();
        let prediction = Self::odometry_prediction(&state_origin, &self.obs);

        self.residual = state_target - prediction;
        self.residual[2] = wrap_angle(self.residual[2]);
    }

    fn evaluate_jacobians(&mut self) {
        let state_origin = self.nodes[0].read().unwrap().get_state().clone();
        let heading = state_origin[2] + self.obs[0];
        let s = -self.obs[1] * heading.sin();
        let c = self.obs[1] * heading.cos();

        // Flipped-sign convention: blocks are [G | -I] for the analytic
        // Jacobian [-G | I].
        #[rustfmt::skip]
        let jacobian = na::DMatrix::from_row_slice(3, 6, &[
            1.0, 0.0, s,   -1.0,  0.0,  0.0,
            0.0, 1.0, c,    0.0, -1.0,  0.0,
            0.0, 0.0, 1.0,  0.0,  0.0, -1.0,
        ]);
        self.jacobian = jacobian;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FactorGraph, Node};
    use nalgebra::{Matrix3, Vector3, dvector};

    #[test]
    fn test_odometry_seeds_target_node() {
        let mut graph = FactorGraph::new();
        let n1 = graph.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let n2 = graph.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let mut factor = OdometryFactor2d::new(
            Vector3::new(0.0, 1.0, 0.0),
            &n1,
            &n2,
            Matrix3::identity(),
            true,
        )
        .unwrap();

        let seeded = n2.read().unwrap().get_state().clone();
        assert!((seeded[0] - 1.0).abs() < 1e-12);
        assert!(seeded[1].abs() < 1e-12);
        assert!(seeded[2].abs() < 1e-12);

        // With the target seeded at the prediction the residual vanishes.
        factor.evaluate_residuals();
        factor.evaluate_chi2();
        assert!(factor.get_residual().norm() < 1e-12);
        assert!(factor.get_chi2() < 1e-12);
    }

    #[test]
    fn test_odometry_rejects_reversed_node_order() {
        let mut graph = FactorGraph::new();
        let n1 = graph.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let n2 = graph.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let result = OdometryFactor2d::new(
            Vector3::new(0.0, 1.0, 0.0),
            &n2,
            &n1,
            Matrix3::identity(),
            false,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_odometry_stores_information_matrix_layout() {
        let mut graph = FactorGraph::new();
        let n1 = graph.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let n2 = graph.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let mut w = Matrix3::identity() * 2.0;
        w[(0, 1)] = 0.25;
        w[(1, 0)] = 0.25;
        let factor = OdometryFactor2d::new(Vector3::new(0.0, 1.0, 0.0), &n1, &n2, w, false).unwrap();
        let info = factor.get_information_matrix();
        assert_eq!((info.nrows(), info.ncols()), (3, 3));
        assert_eq!(info[(0, 0)], 2.0);
        assert_eq!(info[(0, 1)], 0.25);
        assert_eq!(info[(1, 0)], 0.25);
    }

    #[test]
    fn test_odometry_jacobian_heading_terms() {
        let mut graph = FactorGraph::new();
        let n1 = graph.add_node(Node::new(dvector![0.0, 0.0, std::f64::consts::FRAC_PI_2]));
        let n2 = graph.add_node(Node::new(dvector![0.0, 0.0, 0.0]));
        let mut factor = OdometryFactor2d::new(
            Vector3::new(0.0, 2.0, 0.0),
            &n1,
            &n2,
            Matrix3::identity(),
            false,
        )
        .unwrap();
        factor.evaluate_residuals();
        factor.evaluate_jacobians();
        let j = factor.get_jacobian();
        // heading = pi/2: s = -d*sin = -2, c = d*cos = 0
        assert!((j[(0, 2)] + 2.0).abs() < 1e-12);
        assert!(j[(1, 2)].abs() < 1e-12);
    }
}
