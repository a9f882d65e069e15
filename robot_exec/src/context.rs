//! # Robot context
//!
//! The per-robot state shared by every command: the planner boundary, the
//! traffic-schedule boundary, the robot's last published localisation, and
//! the clock. A context is owned by the robot's [`crate::worker::Worker`]
//! and only ever mutated from its thread.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use std::sync::Arc;

use fleet_if::plan::PlanStart;

use crate::planner::Planner;
use crate::schedule::Schedule;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct RobotContext {
    /// Name of the robot, used for log attribution
    name: String,

    /// The planner boundary. May be absent while the fleet is still being
    /// configured, in which case localisation and path compilation abort
    /// with an error log.
    planner: Option<Arc<Planner>>,

    /// The traffic-schedule boundary
    schedule: Box<dyn Schedule>,

    /// The robot's last published localisation
    location: Vec<PlanStart>,

    /// Source of the current time
    clock: Clock,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Source of the context's current time.
///
/// `Manual` pins the clock to an explicitly set instant so that tests can
/// drive time deterministically.
#[derive(Debug, Clone, Copy)]
pub enum Clock {
    System,
    Manual(DateTime<Utc>),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobotContext {
    pub fn new(name: &str, planner: Option<Arc<Planner>>, schedule: Box<dyn Schedule>) -> Self {
        Self {
            name: name.to_owned(),
            planner,
            schedule,
            location: Vec::new(),
            clock: Clock::System,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn planner(&self) -> Option<Arc<Planner>> {
        self.planner.clone()
    }

    pub fn schedule(&self) -> &dyn Schedule {
        self.schedule.as_ref()
    }

    pub fn schedule_mut(&mut self) -> &mut dyn Schedule {
        self.schedule.as_mut()
    }

    /// The robot's last published localisation.
    pub fn location(&self) -> &[PlanStart] {
        &self.location
    }

    /// Publish a new localisation for the robot, forwarding it to the
    /// schedule.
    pub fn set_location(&mut self, starts: Vec<PlanStart>) {
        self.location = starts.clone();
        self.schedule.set_location(starts);
    }

    /// Ask the schedule for a full replan of the robot's approved path.
    pub fn request_replan(&mut self) {
        self.schedule.request_replan();
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self.clock {
            Clock::System => Utc::now(),
            Clock::Manual(t) => t,
        }
    }

    /// Pin the context's clock to the given instant.
    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.clock = Clock::Manual(now);
    }
}

// ------------------------------------------------------------------------------------------------
// TEST HELPERS
// ------------------------------------------------------------------------------------------------

/// A context with an empty graph and a local schedule, for unit tests.
#[cfg(test)]
pub(crate) fn test_context() -> RobotContext {
    use crate::schedule::LocalSchedule;
    use fleet_if::{graph::NavGraph, kinematics::VehicleTraits};

    let planner = Planner::new(
        Arc::new(NavGraph::new()),
        Default::default(),
        VehicleTraits::default(),
    );
    RobotContext::new(
        "test_robot",
        Some(Arc::new(planner)),
        Box::new(LocalSchedule::new()),
    )
}
