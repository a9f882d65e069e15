//! # Atomic command abstraction
//!
//! A [`CommandExecution`] is the atomic unit of robot work: one navigation
//! or docking motion handed to the driver. Each command owns an
//! [`ActivityIdentifier`] - the cancellation/staleness token that decides
//! whether a position report still belongs to it - and optionally a
//! schedule override registered while the driver performs a custom motion.
//!
//! The override's stubbornness capability is release-once from either of
//! two owners: the caller-facing [`Stubbornness`] handle, or the command
//! itself when it finishes. Whichever happens first wins; the other
//! observes the capability as already released.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod localize;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::Duration;
use log::warn;
use nalgebra::Vector3;
use std::sync::{Arc, Mutex, Weak};

use fleet_if::trajectory::{Route, Trajectory};

use crate::context::RobotContext;
use crate::nav_params::NavParams;
use crate::schedule::{PlanId, StubbornToken};
use crate::worker::{lock, Worker};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

type UpdateFn = Arc<dyn Fn(&mut RobotContext, &str, Vector3<f64>) + Send + Sync>;
type BeginFn = Box<dyn FnOnce(CommandExecution) + Send>;
type FinishFn = Box<dyn FnOnce() + Send>;

/// Arrival estimates may need the context to apply schedule delays, so the
/// estimator is handed a mutable borrow of it along with the estimate.
pub(crate) type ArrivalEstimatorFn = Box<dyn Fn(&mut RobotContext, Duration) + Send>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Cancellation/staleness token shared between a command and whoever may
/// report positions against it.
///
/// The token is live while it holds an update function. Cancelling takes
/// the function out, and that transition is one-way: once cancelled, always
/// cancelled. Reports delivered against a cancelled identifier are silently
/// dropped - races between driver reports and queue advancement are
/// expected, not faults.
pub struct ActivityIdentifier {
    update_fn: Mutex<Option<UpdateFn>>,
}

/// The per-command data the localiser works against.
pub(crate) struct CommandData {
    /// Graph waypoints a position report may be matched against while this
    /// command is live. The last entry is the command's final waypoint.
    pub waypoints: Vec<usize>,

    /// Graph lanes a position report may be matched against
    pub lanes: Vec<usize>,

    /// Orientation the robot should have on arrival, in radians
    pub final_orientation: Option<f64>,

    /// The substitute route currently registered with the schedule, if any
    pub schedule_override: Option<ScheduleOverride>,

    pub nav_params: Arc<NavParams>,

    pub arrival_estimator: ArrivalEstimatorFn,
}

/// A substitute route registered with the schedule in place of the approved
/// plan. Holds only a non-owning reference to the stubbornness cell so that
/// clearing it from either side is safe.
pub(crate) struct ScheduleOverride {
    pub route: Route,
    pub plan_id: PlanId,
    pub stubborn: Weak<StubbornOverride>,
}

/// The shared, nullable cell holding an override's stubbornness capability.
#[derive(Default)]
pub(crate) struct StubbornOverride {
    stubbornness: Mutex<Option<StubbornToken>>,
}

/// Caller-facing release handle for an override's stubbornness.
pub struct Stubbornness {
    stubborn: Arc<StubbornOverride>,
}

/// The atomic unit of robot work.
///
/// Clones share the same underlying command; the driver keeps one while it
/// executes the motion and calls [`CommandExecution::finished`] when done.
#[derive(Clone)]
pub struct CommandExecution {
    worker: Worker,
    data: Arc<Mutex<CommandData>>,
    identifier: Arc<ActivityIdentifier>,
    begin_fn: Arc<Mutex<Option<BeginFn>>>,
    finisher: Arc<Mutex<Option<FinishFn>>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ActivityIdentifier {
    fn new(update_fn: UpdateFn) -> Arc<Self> {
        Arc::new(Self {
            update_fn: Mutex::new(Some(update_fn)),
        })
    }

    /// True while this activity is still the authoritative one.
    pub fn is_live(&self) -> bool {
        lock(&self.update_fn).is_some()
    }

    /// Cancel the activity. Idempotent; returns true if the activity was
    /// still live.
    pub(crate) fn cancel(&self) -> bool {
        lock(&self.update_fn).take().is_some()
    }

    /// Deliver a position report against this activity. A report against a
    /// cancelled identifier is a silent no-op.
    pub(crate) fn update(&self, context: &mut RobotContext, map: &str, position: Vector3<f64>) {
        let update_fn = lock(&self.update_fn).clone();
        if let Some(update_fn) = update_fn {
            update_fn(context, map, position);
        }
    }
}

impl CommandData {
    /// Release the stubbornness of the active override, if any. Idempotent.
    pub fn release_stubbornness(&self) {
        if let Some(ref schedule_override) = self.schedule_override {
            if let Some(stubborn) = schedule_override.stubborn.upgrade() {
                lock(&stubborn.stubbornness).take();
            }
        }
    }
}

impl Stubbornness {
    /// Release the override's stubbornness. A no-op if the owning command
    /// already finished or the override was replaced.
    pub fn release(&self) {
        lock(&self.stubborn.stubbornness).take();
    }
}

impl CommandExecution {
    /// Build a new live command. Position reports delivered through the
    /// returned command's identifier are routed to the localiser against
    /// `data`.
    pub(crate) fn make(worker: &Worker, data: CommandData, begin: BeginFn) -> Self {
        let data = Arc::new(Mutex::new(data));

        let update_data = data.clone();
        let update_fn: UpdateFn =
            Arc::new(move |context: &mut RobotContext, map: &str, position: Vector3<f64>| {
                localize::update_location(&update_data, context, map, position);
            });
        let identifier = ActivityIdentifier::new(update_fn);

        Self {
            worker: worker.clone(),
            data,
            identifier,
            begin_fn: Arc::new(Mutex::new(Some(begin))),
            finisher: Arc::new(Mutex::new(None)),
        }
    }

    /// The cancellation token for this command. Reporters hold this to tag
    /// their position reports.
    pub fn identifier(&self) -> Arc<ActivityIdentifier> {
        self.identifier.clone()
    }

    /// True while this command is live.
    pub fn okay(&self) -> bool {
        self.identifier.is_live()
    }

    /// Report this command as finished. Idempotent.
    ///
    /// If a schedule override is active its stubbornness is released and a
    /// full replan is requested, because the schedule no longer reflects an
    /// authoritative route. Otherwise the queued continuation fires and the
    /// next command begins.
    pub fn finished(&self) {
        let data = self.data.clone();
        let identifier = self.identifier.clone();
        let finisher = self.finisher.clone();

        self.worker.schedule(move |context| {
            if !identifier.cancel() {
                // This activity has already finished
                return;
            }

            let data = lock(&data);
            if data.schedule_override.is_some() {
                data.release_stubbornness();
                drop(data);
                context.request_replan();
            } else {
                drop(data);
                // Trigger the next step in the sequence
                if let Some(finish) = lock(&finisher).take() {
                    finish();
                }
            }
        });
    }

    /// Register a substitute route with the schedule while the driver
    /// performs a custom motion along `path`.
    ///
    /// Returns a release handle. Whichever comes first - releasing the
    /// handle or the command finishing - releases the stubbornness; the
    /// other becomes a no-op. Requesting a new override while one is active
    /// releases the old one first. Calling after the command has finished
    /// returns an already-inert handle.
    pub fn override_schedule(&self, map: &str, path: Vec<Vector3<f64>>) -> Stubbornness {
        let stubborn = Arc::new(StubbornOverride::default());

        let data = self.data.clone();
        let identifier = self.identifier.clone();
        let task_stubborn = stubborn.clone();
        let map = map.to_owned();

        self.worker.schedule(move |context| {
            if !identifier.is_live() {
                // Don't do anything because this command is finished
                return;
            }

            let planner = match context.planner() {
                Some(p) => p,
                None => {
                    warn!(
                        "Planner unavailable for robot [{}], cannot override its schedule",
                        context.name()
                    );
                    return;
                }
            };

            let mut data = lock(&data);
            data.release_stubbornness();

            let now = context.now();
            let trajectory = Trajectory::interpolate(&planner.traits, now, &path);
            let route = Route { map, trajectory };
            let plan_id = context.schedule_mut().assign_plan_id();
            context.schedule_mut().set_itinerary(plan_id, vec![route.clone()]);

            data.schedule_override = Some(ScheduleOverride {
                route,
                plan_id,
                stubborn: Arc::downgrade(&task_stubborn),
            });

            *lock(&task_stubborn.stubbornness) =
                Some(context.schedule_mut().acquire_stubbornness());
        });

        Stubbornness { stubborn }
    }

    /// Install the continuation that fires when this command finishes
    /// normally.
    pub(crate) fn set_finisher(&self, finisher: FinishFn) {
        *lock(&self.finisher) = Some(finisher);
    }

    /// Hand control of this command to the driver. The begin callback fires
    /// at most once.
    pub(crate) fn begin(&self) {
        if let Some(begin) = lock(&self.begin_fn).take() {
            begin(self.clone());
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::planner::Planner;
    use crate::schedule::{LocalSchedule, Schedule};
    use fleet_if::{graph::NavGraph, kinematics::VehicleTraits};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_worker() -> (Worker, LocalSchedule) {
        let schedule = LocalSchedule::new();
        let planner = Planner::new(
            Arc::new(NavGraph::new()),
            Default::default(),
            VehicleTraits::default(),
        );
        let context = RobotContext::new(
            "test_robot",
            Some(Arc::new(planner)),
            Box::new(schedule.clone()),
        );
        (Worker::spawn(context), schedule)
    }

    fn noop_command(worker: &Worker) -> CommandExecution {
        CommandExecution::make(
            worker,
            CommandData {
                waypoints: Vec::new(),
                lanes: Vec::new(),
                final_orientation: None,
                schedule_override: None,
                nav_params: Arc::new(NavParams::default()),
                arrival_estimator: Box::new(|_, _| ()),
            },
            Box::new(|_| ()),
        )
    }

    fn override_path() -> Vec<Vector3<f64>> {
        vec![Vector3::new(0.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0)]
    }

    #[test]
    fn test_finished_is_idempotent() {
        let (worker, schedule) = test_worker();
        let cmd = noop_command(&worker);

        let continuations = Arc::new(AtomicUsize::new(0));
        let counter = continuations.clone();
        cmd.set_finisher(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(cmd.okay());
        cmd.finished();
        cmd.finished();
        worker.flush();

        assert_eq!(continuations.load(Ordering::SeqCst), 1);
        assert!(!cmd.okay());
        assert_eq!(schedule.replan_requests(), 0);
    }

    #[test]
    fn test_finished_with_override_releases_and_replans() {
        let (worker, schedule) = test_worker();
        let cmd = noop_command(&worker);

        let continuations = Arc::new(AtomicUsize::new(0));
        let counter = continuations.clone();
        cmd.set_finisher(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let _handle = cmd.override_schedule("test_map", override_path());
        worker.flush();
        assert_eq!(schedule.stubborn_count(), 1);
        assert_eq!(schedule.itinerary().len(), 1);

        cmd.finished();
        worker.flush();

        // Stubbornness released, schedule reconciled, and the continuation
        // is bypassed in favour of the replan
        assert_eq!(schedule.stubborn_count(), 0);
        assert_eq!(schedule.replan_requests(), 1);
        assert_eq!(continuations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_release_after_finish_is_noop() {
        let (worker, schedule) = test_worker();
        let cmd = noop_command(&worker);

        let handle = cmd.override_schedule("test_map", override_path());
        worker.flush();
        cmd.finished();
        worker.flush();
        assert_eq!(schedule.stubborn_count(), 0);

        // Late release must not disturb anything
        handle.release();
        assert_eq!(schedule.stubborn_count(), 0);

        // ...including an unrelated later override
        let cmd2 = noop_command(&worker);
        let _handle2 = cmd2.override_schedule("test_map", override_path());
        worker.flush();
        handle.release();
        assert_eq!(schedule.stubborn_count(), 1);
    }

    #[test]
    fn test_release_then_finish_still_replans() {
        let (worker, schedule) = test_worker();
        let cmd = noop_command(&worker);

        let handle = cmd.override_schedule("test_map", override_path());
        worker.flush();
        handle.release();
        assert_eq!(schedule.stubborn_count(), 0);

        // The override record is still present, so finishing reconciles the
        // schedule rather than firing the continuation
        cmd.finished();
        worker.flush();
        assert_eq!(schedule.replan_requests(), 1);
    }

    #[test]
    fn test_override_after_finished_is_inert() {
        let (worker, schedule) = test_worker();
        let cmd = noop_command(&worker);

        cmd.finished();
        worker.flush();

        let handle = cmd.override_schedule("test_map", override_path());
        worker.flush();

        assert_eq!(schedule.stubborn_count(), 0);
        assert!(schedule.itinerary().is_empty());
        handle.release();
    }

    #[test]
    fn test_new_override_replaces_old() {
        let (worker, schedule) = test_worker();
        let cmd = noop_command(&worker);

        let first = cmd.override_schedule("test_map", override_path());
        worker.flush();
        let first_plan = schedule.current_plan_id();

        let _second = cmd.override_schedule("test_map", override_path());
        worker.flush();

        // Only one stubbornness outstanding and a fresh plan id
        assert_eq!(schedule.stubborn_count(), 1);
        assert_ne!(schedule.current_plan_id(), first_plan);

        // The stale handle no longer controls anything
        first.release();
        assert_eq!(schedule.stubborn_count(), 1);
    }

    #[test]
    fn test_stale_report_is_dropped() {
        let (worker, schedule) = test_worker();
        let cmd = noop_command(&worker);
        let identifier = cmd.identifier();

        cmd.finished();
        worker.flush();

        let location_before = schedule.location();
        worker.schedule(move |context| {
            identifier.update(context, "test_map", Vector3::new(1.0, 2.0, 0.0));
        });
        worker.flush();

        assert_eq!(schedule.location().len(), location_before.len());
    }
}
