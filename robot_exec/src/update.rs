//! # Position-report sink
//!
//! The entry point the robot driver feeds raw position reports into. Each
//! report is posted onto the robot's serialized worker: reports tagged with
//! a live activity identifier are routed to that command's localiser, and
//! untagged reports (or reports whose activity has been cancelled between
//! send and delivery) fall back to a graph-wide localisation.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::error;
use nalgebra::Vector3;
use std::sync::Arc;

use crate::command::ActivityIdentifier;
use crate::nav_params::NavParams;
use crate::worker::Worker;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Per-robot update handle held by the driver integration.
#[derive(Clone)]
pub struct RobotUpdateHandle {
    worker: Worker,
    nav_params: Arc<NavParams>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobotUpdateHandle {
    pub fn new(worker: Worker, nav_params: Arc<NavParams>) -> Self {
        Self { worker, nav_params }
    }

    /// Report the robot's position on the given map.
    ///
    /// `current_activity` should be the identifier of the command the
    /// driver believes it is executing; a report whose activity has been
    /// cancelled in the meantime is silently dropped by the identifier.
    pub fn update_position(
        &self,
        map: &str,
        position: Vector3<f64>,
        current_activity: Option<Arc<ActivityIdentifier>>,
    ) {
        let map = map.to_owned();
        let nav_params = self.nav_params.clone();

        self.worker.schedule(move |context| {
            if let Some(activity) = current_activity {
                activity.update(context, &map, position);
                return;
            }

            // No current activity: fall back to a graph-wide localisation
            let planner = match context.planner() {
                Some(p) => p,
                None => {
                    error!(
                        "Planner unavailable for robot [{}], cannot update its location",
                        context.name()
                    );
                    return;
                }
            };

            let now = context.now();
            let starts = planner.compute_plan_starts(
                &map,
                position,
                now,
                nav_params.max_merge_waypoint_distance,
                nav_params.max_merge_lane_distance,
                nav_params.min_lane_length,
            );
            context.set_location(starts);
        });
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
