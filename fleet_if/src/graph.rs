//! # Navigation graph
//!
//! This module defines the shared navigation graph the fleet operates on:
//! waypoints placed on named maps, directed lanes connecting them, events
//! attached to lane endpoints, and the closure set used by traffic control
//! to take lanes out of service.
//!
//! The graph is read-only to the executive; it is built once by the fleet
//! integration and queried during localisation and path compilation.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// A single vertex of the navigation graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waypoint {
    /// Position of the waypoint on its map, in meters.
    pub location: Vector2<f64>,

    /// Name of the map this waypoint belongs to.
    pub map_name: String,
}

/// One end of a lane: the waypoint it attaches to plus an optional event
/// that must be performed when passing through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneEndpoint {
    pub waypoint: usize,
    pub event: Option<LaneEvent>,
}

/// A directed edge of the navigation graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lane {
    pub entry: LaneEndpoint,
    pub exit: LaneEndpoint,
}

/// The set of lanes currently closed by traffic control.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaneClosures {
    closed: HashSet<usize>,
}

/// The navigation graph itself.
///
/// Lanes are directed; a bidirectional corridor is represented by two lanes
/// with swapped endpoints. The departing-lane adjacency is maintained
/// internally so `lanes_from` is a cheap lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavGraph {
    waypoints: Vec<Waypoint>,
    lanes: Vec<Lane>,
    lanes_from: Vec<Vec<usize>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Events that can be attached to a lane endpoint.
///
/// This is a closed set: the executive matches on it exhaustively, and only
/// the `Dock` variant carries a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LaneEvent {
    DoorOpen,
    DoorClose,
    LiftSessionBegin,
    LiftDoorOpen,
    LiftSessionEnd,
    LiftMove,
    Wait,
    Dock { name: String },
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Lane endpoint references waypoint [{0}] but the graph only has [{1}] waypoints")]
    WaypointOutOfRange(usize, usize),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a waypoint to the graph, returning its index.
    pub fn add_waypoint(&mut self, map_name: &str, location: Vector2<f64>) -> usize {
        self.waypoints.push(Waypoint {
            location,
            map_name: map_name.to_owned(),
        });
        self.lanes_from.push(Vec::new());
        self.waypoints.len() - 1
    }

    /// Add a directed lane between two existing waypoints, returning its
    /// index.
    pub fn add_lane(&mut self, entry: LaneEndpoint, exit: LaneEndpoint) -> Result<usize, GraphError> {
        for endpoint in [&entry, &exit].iter() {
            if endpoint.waypoint >= self.waypoints.len() {
                return Err(GraphError::WaypointOutOfRange(
                    endpoint.waypoint,
                    self.waypoints.len(),
                ));
            }
        }

        let index = self.lanes.len();
        self.lanes_from[entry.waypoint].push(index);
        self.lanes.push(Lane { entry, exit });
        Ok(index)
    }

    pub fn num_waypoints(&self) -> usize {
        self.waypoints.len()
    }

    pub fn get_waypoint(&self, index: usize) -> Option<&Waypoint> {
        self.waypoints.get(index)
    }

    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    pub fn get_lane(&self, index: usize) -> Option<&Lane> {
        self.lanes.get(index)
    }

    /// Indices of all lanes departing the given waypoint.
    pub fn lanes_from(&self, waypoint: usize) -> &[usize] {
        self.lanes_from
            .get(waypoint)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Find the lane going from `entry` to `exit`, if one exists.
    pub fn lane_from(&self, entry: usize, exit: usize) -> Option<usize> {
        self.lanes_from(entry)
            .iter()
            .copied()
            .find(|&l| self.lanes[l].exit.waypoint == exit)
    }
}

impl LaneEndpoint {
    pub fn new(waypoint: usize) -> Self {
        Self {
            waypoint,
            event: None,
        }
    }

    pub fn with_event(waypoint: usize, event: LaneEvent) -> Self {
        Self {
            waypoint,
            event: Some(event),
        }
    }
}

impl LaneClosures {
    pub fn is_closed(&self, lane: usize) -> bool {
        self.closed.contains(&lane)
    }

    pub fn close(&mut self, lane: usize) {
        self.closed.insert(lane);
    }

    pub fn open(&mut self, lane: usize) {
        self.closed.remove(&lane);
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
