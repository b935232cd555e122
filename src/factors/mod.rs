//! Concrete factor implementations.
//!
//! These are reference factors for 2-D pose estimation; the solver itself
//! only ever interacts with them through the [`Factor`](crate::core::Factor)
//! trait, so additional factor types (pose-plane, 3-D poses) plug in the same
//! way.

pub mod anchor;
pub mod between;
pub mod odometry;

pub use anchor::AnchorFactor;
pub use between::BetweenFactor2d;
pub use odometry::OdometryFactor2d;

use std::f64::consts::PI;

/// Wrap an angle to (-pi, pi].
pub(crate) fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI { PI } else { wrapped }
}
