//! # Navigation parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Static merge tolerances and behaviour switches for localisation and path
/// compilation.
///
/// Constructed once per robot and shared by reference across all of its
/// commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavParams {
    /// Maximum distance at which a position report snaps onto a waypoint,
    /// in meters.
    pub max_merge_waypoint_distance: f64,

    /// Maximum perpendicular distance at which a position report snaps onto
    /// a lane, in meters.
    pub max_merge_lane_distance: f64,

    /// Lanes shorter than this are ignored by the graph-wide localisation
    /// search, in meters.
    pub min_lane_length: f64,

    /// When true, pure in-place rotation waypoints are folded into the
    /// preceding motion command instead of being issued separately.
    pub skip_rotation_commands: bool,

    /// Cumulative delays smaller than this are not applied to the schedule,
    /// in seconds. Hysteresis against position-report noise.
    pub delay_threshold_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for NavParams {
    fn default() -> Self {
        Self {
            max_merge_waypoint_distance: 0.3,
            max_merge_lane_distance: 1.0,
            min_lane_length: 1e-8,
            skip_rotation_commands: true,
            delay_threshold_s: 1.0,
        }
    }
}
