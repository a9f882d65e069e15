//! # Schedule trajectories
//!
//! A trajectory is a timestamped polyline describing where a robot is
//! expected to be over time. Routes (a trajectory pinned to a map) are what
//! get registered with the traffic schedule.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Duration, Utc};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::kinematics::VehicleTraits;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// A single sample of a trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// Time the robot is expected to be at this position
    pub time: DateTime<Utc>,

    /// Expected position as `(x, y, yaw)`
    pub position: Vector3<f64>,
}

/// A timestamped polyline of expected positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trajectory {
    points: Vec<TrajectoryPoint>,
}

/// A trajectory on a named map, as registered with the traffic schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub map: String,
    pub trajectory: Trajectory,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrajectoryPoint {
    pub fn xy(&self) -> Vector2<f64> {
        Vector2::new(self.position[0], self.position[1])
    }
}

impl Trajectory {
    /// Interpolate a pose path into a timestamped trajectory using the
    /// vehicle's nominal velocities.
    ///
    /// Each leg is treated as a straight translation at nominal linear
    /// velocity followed by an in-place rotation at nominal angular
    /// velocity. An empty path produces an empty trajectory.
    pub fn interpolate(
        traits: &VehicleTraits,
        start_time: DateTime<Utc>,
        path: &[Vector3<f64>],
    ) -> Self {
        let mut points = Vec::with_capacity(path.len());
        let mut time = start_time;

        for (i, position) in path.iter().enumerate() {
            if i > 0 {
                let previous = &path[i - 1];
                let translation =
                    (Vector2::new(position[0], position[1]) - Vector2::new(previous[0], previous[1]))
                        .norm();
                let rotation = angular_distance(previous[2], position[2]).abs();

                let dt = translation / traits.linear_velocity()
                    + rotation / traits.angular_velocity();
                time = time + from_seconds(dt);
            }

            points.push(TrajectoryPoint {
                time,
                position: *position,
            });
        }

        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&TrajectoryPoint> {
        self.points.get(index)
    }

    pub fn points(&self) -> &[TrajectoryPoint] {
        &self.points
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Convert fractional seconds into a duration.
pub fn from_seconds(seconds: f64) -> Duration {
    Duration::nanoseconds((seconds * 1e9) as i64)
}

/// Convert a duration into fractional seconds.
pub fn to_seconds(duration: Duration) -> f64 {
    duration.num_nanoseconds().map(|ns| ns as f64 * 1e-9).unwrap_or(f64::NAN)
}

/// Shortest signed angular distance from `a` to `b`, accounting for
/// wrapping.
fn angular_distance(a: f64, b: f64) -> f64 {
    let diff = (b - a).rem_euclid(std::f64::consts::TAU);
    if diff > std::f64::consts::PI {
        diff - std::f64::consts::TAU
    } else {
        diff
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
