//! # Fleet interface crate.
//!
//! Provides the data types shared between the per-robot executive and its
//! collaborators: the navigation graph, planner-approved path types,
//! vehicle kinematic limits, and schedule routes.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod graph;

/// Kinematic limits of a vehicle
pub mod kinematics;

/// Plan waypoints and plan starts exchanged with the planner
pub mod plan;

/// Timestamped routes registered with the traffic schedule
pub mod trajectory;
