//! # Robot executive library.
//!
//! This library implements the per-robot command-execution core of the
//! fleet coordination layer: it compiles schedule-approved paths into
//! atomic navigation commands, dispatches them to the robot driver one at
//! a time, tracks the robot's reported position against the plan, and
//! manages temporary schedule overrides for custom motions such as
//! docking.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Atomic command abstraction - activity identifiers, command executions, and
/// schedule overrides
pub mod command;

/// The per-robot state shared by all commands
pub mod context;

/// Command handle - compiles approved paths and dock requests into command
/// queues
pub mod handle;

/// Merge-tolerance and behaviour parameters for navigation
pub mod nav_params;

/// Planner boundary - the navigation graph, kinematic limits, and the
/// graph-wide localisation search
pub mod planner;

/// Progress tracker - drives a queue of commands to completion
pub mod progress;

/// Traffic schedule boundary
pub mod schedule;

/// Position-report sink exposed to the robot driver
pub mod update;

/// The serialized per-robot execution context
pub mod worker;
