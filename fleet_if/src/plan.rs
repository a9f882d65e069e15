//! # Plan types
//!
//! Types exchanged with the path planner: the waypoints of an approved plan
//! handed down to the executive, and the plan-start candidates the
//! executive hands back up as the robot's believed current state.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// One waypoint of a planner-approved path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanWaypoint {
    /// Index of this waypoint in the navigation graph, if it lies on the
    /// graph. Waypoints inserted by the planner (e.g. a merge point in the
    /// middle of a lane) have no graph index.
    pub graph_index: Option<usize>,

    /// Target position as `(x, y, yaw)`.
    pub position: Vector3<f64>,

    /// Lanes the planner expects the robot to traverse to arrive at this
    /// waypoint.
    pub approach_lanes: Vec<usize>,
}

/// A candidate start state handed to the planner: where the robot believes
/// it is, pinned to the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStart {
    /// Time this state was observed
    pub time: DateTime<Utc>,

    /// The graph waypoint the robot is at or moving towards
    pub waypoint: usize,

    /// Heading of the robot in radians
    pub orientation: f64,

    /// The off-waypoint position of the robot, when it is not exactly on
    /// the waypoint.
    pub location: Option<Vector2<f64>>,

    /// The lane the robot is currently traversing, if any.
    pub lane: Option<usize>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PlanWaypoint {
    pub fn xy(&self) -> Vector2<f64> {
        Vector2::new(self.position[0], self.position[1])
    }

    pub fn yaw(&self) -> f64 {
        self.position[2]
    }
}

impl PlanStart {
    /// A start exactly on the given waypoint.
    pub fn at_waypoint(time: DateTime<Utc>, waypoint: usize, orientation: f64) -> Self {
        Self {
            time,
            waypoint,
            orientation,
            location: None,
            lane: None,
        }
    }

    /// A start merged onto a waypoint from a nearby position.
    pub fn merged(
        time: DateTime<Utc>,
        waypoint: usize,
        orientation: f64,
        location: Vector2<f64>,
    ) -> Self {
        Self {
            time,
            waypoint,
            orientation,
            location: Some(location),
            lane: None,
        }
    }

    /// A start part-way along a lane, heading for the lane's exit waypoint.
    pub fn on_lane(
        time: DateTime<Utc>,
        waypoint: usize,
        orientation: f64,
        location: Vector2<f64>,
        lane: usize,
    ) -> Self {
        Self {
            time,
            waypoint,
            orientation,
            location: Some(location),
            lane: Some(lane),
        }
    }
}
