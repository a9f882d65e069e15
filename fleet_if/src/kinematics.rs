//! Vehicle kinematic limits

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Floor applied to nominal velocities before dividing by them, so that a
/// misconfigured zero velocity can't produce infinite time estimates.
const MIN_NOMINAL_VELOCITY: f64 = 0.001;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Nominal kinematic limits of a vehicle, used for trajectory interpolation
/// and arrival estimation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VehicleTraits {
    /// Nominal linear velocity in meters per second
    pub nominal_linear_velocity_ms: f64,

    /// Nominal angular velocity in radians per second
    pub nominal_angular_velocity_rads: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VehicleTraits {
    /// Nominal linear velocity, floored away from zero.
    pub fn linear_velocity(&self) -> f64 {
        self.nominal_linear_velocity_ms.max(MIN_NOMINAL_VELOCITY)
    }

    /// Nominal angular velocity, floored away from zero.
    pub fn angular_velocity(&self) -> f64 {
        self.nominal_angular_velocity_rads.max(MIN_NOMINAL_VELOCITY)
    }
}

impl Default for VehicleTraits {
    fn default() -> Self {
        Self {
            nominal_linear_velocity_ms: 0.5,
            nominal_angular_velocity_rads: 0.6,
        }
    }
}
