//! # Command handle
//!
//! Converts schedule-approved paths and docking requests into queues of
//! atomic commands, and hands them to the external robot driver one at a
//! time through its navigation/stop/dock callbacks.
//!
//! All compilation runs as tasks on the robot's serialized worker, so path
//! requests interleave deterministically with position reports and
//! completion callbacks.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::Duration;
use log::{debug, error, warn};
use nalgebra::{Vector2, Vector3};
use std::sync::{Arc, Mutex};

use fleet_if::graph::LaneEvent;
use fleet_if::plan::PlanWaypoint;
use fleet_if::trajectory::from_seconds;

use crate::command::{ActivityIdentifier, CommandData, CommandExecution};
use crate::context::RobotContext;
use crate::nav_params::NavParams;
use crate::progress::ProgressTracker;
use crate::worker::{lock, Worker};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Driver callback: begin a navigation motion towards a destination.
pub type NavigationRequest = Arc<dyn Fn(Destination, CommandExecution) + Send + Sync>;

/// Driver callback: stop whatever motion the given activity was performing.
pub type StopRequest = Arc<dyn Fn(Arc<ActivityIdentifier>) + Send + Sync>;

/// Driver callback: begin a docking motion at the named dock.
pub type DockRequest = Arc<dyn Fn(String, CommandExecution) + Send + Sync>;

/// Task-layer sink for arrival estimates, tagged with the index of the
/// path waypoint the estimate refers to.
pub type ArrivalEstimator = Arc<dyn Fn(usize, Duration) + Send + Sync>;

/// Task-layer sink fired when a whole path or docking request completes.
pub type RequestCompleted = Box<dyn FnOnce() + Send>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Where a single navigation command should take the robot.
#[derive(Debug, Clone)]
pub struct Destination {
    pub map: String,

    /// Target as `(x, y, yaw)`
    pub position: Vector3<f64>,

    /// Graph index of the target, when it lies on the graph
    pub graph_index: Option<usize>,
}

/// The per-robot command handle given to the fleet integration.
#[derive(Clone)]
pub struct CommandHandle {
    worker: Worker,
    nav_params: Arc<NavParams>,
    handle_nav_request: NavigationRequest,
    handle_stop: StopRequest,
    handle_dock: DockRequest,
    progress: Arc<Mutex<Option<Arc<Mutex<ProgressTracker>>>>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Destination {
    pub fn xy(&self) -> Vector2<f64> {
        Vector2::new(self.position[0], self.position[1])
    }

    pub fn yaw(&self) -> f64 {
        self.position[2]
    }
}

impl CommandHandle {
    pub fn new(
        worker: Worker,
        nav_params: Arc<NavParams>,
        handle_nav_request: NavigationRequest,
        handle_stop: StopRequest,
        handle_dock: DockRequest,
    ) -> Self {
        Self {
            worker,
            nav_params,
            handle_nav_request,
            handle_stop,
            handle_dock,
            progress: Arc::new(Mutex::new(None)),
        }
    }

    /// Compile a schedule-approved path into a command queue and start
    /// driving it.
    ///
    /// The resumption point is chosen from the robot's current
    /// localisation; if no waypoint or approach lane of the path connects
    /// to it the robot has drifted from the approved plan, and a replan is
    /// requested instead of guessing.
    pub fn follow_new_path(
        &self,
        waypoints: Vec<PlanWaypoint>,
        next_arrival_estimator: Option<ArrivalEstimator>,
        path_finished_callback: Option<RequestCompleted>,
    ) {
        let this = self.clone();
        self.worker.schedule(move |context| {
            debug!(
                "follow_new_path for robot [{}] with PlanId [{}]",
                context.name(),
                context.schedule().current_plan_id()
            );

            let (next_arrival_estimator, path_finished_callback) =
                match (next_arrival_estimator, path_finished_callback) {
                    (Some(estimator), Some(finished)) if !waypoints.is_empty() => {
                        (estimator, finished)
                    }
                    _ => {
                        warn!(
                            "Received a new path for robot [{}] with invalid parameters. \
                             Ignoring...",
                            context.name()
                        );
                        return;
                    }
                };

            let planner = match context.planner() {
                Some(p) => p,
                None => {
                    error!(
                        "Planner missing for [{}], cannot follow new path commands",
                        context.name()
                    );
                    return;
                }
            };
            let graph = planner.graph.clone();

            // The initial map comes from the first waypoint that lies on
            // the graph
            let mut initial_map = None;
            for wp in &waypoints {
                if let Some(index) = wp.graph_index {
                    match graph.get_waypoint(index) {
                        Some(waypoint) => {
                            initial_map = Some(waypoint.map_name.clone());
                            break;
                        }
                        None => {
                            error!(
                                "Path waypoint for robot [{}] has a graph index [{}] outside \
                                 the range of the graph [{}], cannot follow this path",
                                context.name(),
                                index,
                                graph.num_waypoints()
                            );
                            return;
                        }
                    }
                }
            }
            let mut initial_map = match initial_map {
                Some(map) => map,
                None => {
                    error!(
                        "Could not find an initial map in follow_new_path command for robot \
                         [{}]. Path length is [{}].",
                        context.name(),
                        waypoints.len()
                    );
                    return;
                }
            };

            // Find where to resume the path from the robot's current
            // localisation: a waypoint match pins that index, an approach
            // lane match pins the previous index (lanes connect two)
            let mut found_connection = false;
            let mut i0 = 0;
            for (i, wp) in waypoints.iter().enumerate() {
                if let Some(graph_index) = wp.graph_index {
                    for start in context.location() {
                        if graph_index == start.waypoint {
                            found_connection = true;
                            i0 = i;
                        }
                    }
                }

                if i > 0 {
                    for &lane in &wp.approach_lanes {
                        for start in context.location() {
                            if start.lane == Some(lane) {
                                found_connection = true;
                                i0 = i - 1;
                            }
                        }
                    }
                }
            }

            if !found_connection {
                // The robot has drifted away from the starting point since
                // the plan was made, so ask for a new plan
                context.request_replan();
                return;
            }

            if i0 + 1 >= waypoints.len() {
                // Always issue at least one command to approach the final
                // waypoint
                i0 = waypoints.len().saturating_sub(2);
            }

            let mut queue = Vec::new();
            let mut i1 = i0 + 1;
            while i1 < waypoints.len() {
                let wp0 = &waypoints[i0];
                let wp1 = &waypoints[i1];

                // The acceptable localisation bounds for this command are
                // the departure waypoint plus everything touched by the
                // arrival waypoint's approach lanes
                let mut cmd_wps = Vec::new();
                let mut cmd_lanes = Vec::new();
                if let Some(graph_index) = wp0.graph_index {
                    cmd_wps.push(graph_index);
                }
                for &lane_id in &wp1.approach_lanes {
                    let lane = match graph.get_lane(lane_id) {
                        Some(lane) => lane,
                        None => {
                            error!(
                                "Approach lane [{}] for robot [{}] is outside the range of \
                                 the graph [{}], cannot follow this path",
                                lane_id,
                                context.name(),
                                graph.num_lanes()
                            );
                            return;
                        }
                    };

                    cmd_lanes.push(lane_id);
                    for wp in [lane.entry.waypoint, lane.exit.waypoint].iter() {
                        if !cmd_wps.contains(wp) {
                            cmd_wps.push(*wp);
                        }
                    }
                }

                // Carry the map forward across waypoints that are off the
                // graph
                let map = match wp1.graph_index.and_then(|i| graph.get_waypoint(i)) {
                    Some(waypoint) => waypoint.map_name.clone(),
                    None => initial_map.clone(),
                };
                if initial_map != map {
                    initial_map = map.clone();
                }

                let mut target_position = wp1.position;
                let mut target_index = i1;
                let mut skip_next = false;
                if this.nav_params.skip_rotation_commands {
                    let i2 = i1 + 1;
                    if i2 < waypoints.len() {
                        let wp2 = &waypoints[i2];
                        if let (Some(g1), Some(g2)) = (wp1.graph_index, wp2.graph_index) {
                            if g1 == g2 {
                                // A pure in-place rotation follows: fold it
                                // into this command instead of issuing a
                                // separate one
                                target_index = i2;
                                target_position = wp2.position;
                                skip_next = true;
                            }
                        }
                    }
                }

                let destination = Destination {
                    map,
                    position: target_position,
                    graph_index: wp1.graph_index,
                };

                let estimator = next_arrival_estimator.clone();
                let handle_nav_request = this.handle_nav_request.clone();
                queue.push(CommandExecution::make(
                    &this.worker,
                    CommandData {
                        waypoints: cmd_wps,
                        lanes: cmd_lanes,
                        final_orientation: Some(target_position[2]),
                        schedule_override: None,
                        nav_params: this.nav_params.clone(),
                        // Estimates report against the original path index,
                        // even when a rotation step was folded in
                        arrival_estimator: Box::new(move |_, dt| estimator(target_index, dt)),
                    },
                    Box::new(move |execution| handle_nav_request(destination, execution)),
                ));

                if skip_next {
                    i0 += 1;
                    i1 += 1;
                }
                i0 += 1;
                i1 += 1;
            }

            let progress = ProgressTracker::make(queue, path_finished_callback);
            *lock(&this.progress) = Some(progress.clone());
            ProgressTracker::next(&progress);
        });
    }

    /// Look up the lane carrying the named dock event and drive a single
    /// docking command bounded by that lane.
    pub fn dock(&self, dock_name: &str, docking_finished_callback: RequestCompleted) {
        let this = self.clone();
        let dock_name = dock_name.to_owned();
        self.worker.schedule(move |context| {
            debug!(
                "Received a request to dock robot [{}] at [{}]...",
                context.name(),
                dock_name
            );

            let plan_id = context.schedule().current_plan_id();
            let planner = match context.planner() {
                Some(p) => p,
                None => {
                    error!(
                        "Planner unavailable for robot [{}], cannot execute docking command \
                         [{}]",
                        context.name(),
                        dock_name
                    );
                    return;
                }
            };
            let graph = planner.graph.clone();

            // Scan every lane's endpoint events for the named dock. The
            // first match in lane-index order wins.
            let mut found_lane = None;
            'lanes: for lane_id in 0..graph.num_lanes() {
                if let Some(lane) = graph.get_lane(lane_id) {
                    for event in [&lane.entry.event, &lane.exit.event].iter() {
                        if let Some(event) = event {
                            if event_matches_dock(event, &dock_name) {
                                found_lane = Some(lane_id);
                                break 'lanes;
                            }
                        }
                    }
                }
            }

            let data = match found_lane {
                None => {
                    warn!(
                        "Unable to find a dock named [{}] in the graph for robot [{}], \
                         cannot perform position updates correctly.",
                        dock_name,
                        context.name()
                    );
                    CommandData {
                        waypoints: Vec::new(),
                        lanes: Vec::new(),
                        final_orientation: None,
                        schedule_override: None,
                        nav_params: this.nav_params.clone(),
                        arrival_estimator: Box::new(|_, _| ()),
                    }
                }
                Some(lane_id) => {
                    let lane = match graph.get_lane(lane_id) {
                        Some(lane) => lane,
                        None => return,
                    };
                    let entry_wp = lane.entry.waypoint;
                    let exit_wp = lane.exit.waypoint;
                    let (entry, exit) = match (
                        graph.get_waypoint(entry_wp),
                        graph.get_waypoint(exit_wp),
                    ) {
                        (Some(entry), Some(exit)) => (entry, exit),
                        _ => {
                            error!(
                                "Dock lane [{}] for robot [{}] has an endpoint outside the \
                                 waypoint range of the graph [{}], cannot execute docking \
                                 command [{}]",
                                lane_id,
                                context.name(),
                                graph.num_waypoints(),
                                dock_name
                            );
                            return;
                        }
                    };

                    let dist = (exit.location - entry.location).norm();
                    let v = planner.traits.linear_velocity();
                    let expected_arrival = context.now() + from_seconds(dist / v);
                    let delay_threshold = from_seconds(this.nav_params.delay_threshold_s);

                    CommandData {
                        waypoints: vec![entry_wp, exit_wp],
                        lanes: vec![lane_id],
                        final_orientation: None,
                        schedule_override: None,
                        nav_params: this.nav_params.clone(),
                        // Arrival updates translate into cumulative delay
                        // against the plan that was current when the dock
                        // command was created
                        arrival_estimator: Box::new(move |context: &mut RobotContext, dt| {
                            let updated_arrival = context.now() + dt;
                            let delay = updated_arrival - expected_arrival;
                            context
                                .schedule_mut()
                                .cumulative_delay(plan_id, delay, delay_threshold);
                        }),
                    }
                }
            };

            let handle_dock = this.handle_dock.clone();
            let name = dock_name.clone();
            let command = CommandExecution::make(
                &this.worker,
                data,
                Box::new(move |execution| handle_dock(name, execution)),
            );

            let progress = ProgressTracker::make(vec![command], docking_finished_callback);
            *lock(&this.progress) = Some(progress.clone());
            ProgressTracker::next(&progress);
        });
    }

    /// Stop whatever the robot is currently doing: cancel the in-flight
    /// command's identifier, discard the queue, and hand the cancelled
    /// identifier to the driver's stop callback.
    pub fn stop(&self) {
        let this = self.clone();
        self.worker.schedule(move |_context| {
            let mut progress_slot = lock(&this.progress);
            let tracker = match progress_slot.as_ref() {
                Some(tracker) => tracker.clone(),
                None => return,
            };
            let identifier = match lock(&tracker).current_identifier() {
                Some(identifier) => identifier,
                None => return,
            };

            // Prevent any further specialized updates
            identifier.cancel();
            *progress_slot = None;
            drop(progress_slot);

            (this.handle_stop)(identifier);
        });
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Whether a lane-endpoint event is a dock with the given name.
///
/// The event set is closed, so this match is exhaustive by construction.
fn event_matches_dock(event: &LaneEvent, dock_name: &str) -> bool {
    match event {
        LaneEvent::Dock { name } => name == dock_name,
        LaneEvent::DoorOpen
        | LaneEvent::DoorClose
        | LaneEvent::LiftSessionBegin
        | LaneEvent::LiftDoorOpen
        | LaneEvent::LiftSessionEnd
        | LaneEvent::LiftMove
        | LaneEvent::Wait => false,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::RobotContext;
    use crate::planner::Planner;
    use crate::schedule::{LocalSchedule, Schedule};
    use crate::update::RobotUpdateHandle;
    use chrono::{DateTime, TimeZone, Utc};
    use fleet_if::graph::{LaneClosures, LaneEndpoint, NavGraph};
    use fleet_if::kinematics::VehicleTraits;
    use fleet_if::plan::PlanStart;
    use std::sync::mpsc::{channel, Receiver};

    fn t0() -> DateTime<Utc> {
        Utc.timestamp(1_600_000_000, 0)
    }

    /// Four waypoints in a line, bidirectional lanes, with a dock event on
    /// the exit of the last lane:
    ///
    /// ```text
    /// 0 <-0/1-> 1 <-2/3-> 2 <-4/5-> 3 (lane 4 exit: Dock "charger_1")
    /// ```
    fn test_graph() -> NavGraph {
        let mut graph = NavGraph::new();
        graph.add_waypoint("test_map", Vector2::new(0.0, 0.0));
        graph.add_waypoint("test_map", Vector2::new(10.0, 0.0));
        graph.add_waypoint("test_map", Vector2::new(20.0, 0.0));
        graph.add_waypoint("test_map", Vector2::new(30.0, 0.0));
        graph
            .add_lane(LaneEndpoint::new(0), LaneEndpoint::new(1))
            .unwrap();
        graph
            .add_lane(LaneEndpoint::new(1), LaneEndpoint::new(0))
            .unwrap();
        graph
            .add_lane(LaneEndpoint::new(1), LaneEndpoint::new(2))
            .unwrap();
        graph
            .add_lane(LaneEndpoint::new(2), LaneEndpoint::new(1))
            .unwrap();
        graph
            .add_lane(
                LaneEndpoint::new(2),
                LaneEndpoint::with_event(
                    3,
                    LaneEvent::Dock {
                        name: "charger_1".to_owned(),
                    },
                ),
            )
            .unwrap();
        graph
            .add_lane(LaneEndpoint::new(3), LaneEndpoint::new(2))
            .unwrap();
        graph
    }

    struct Fixture {
        worker: Worker,
        handle: CommandHandle,
        update: RobotUpdateHandle,
        schedule: LocalSchedule,
        destinations: Arc<Mutex<Vec<Destination>>>,
        executions: Arc<Mutex<Vec<CommandExecution>>>,
        docks: Arc<Mutex<Vec<(String, CommandExecution)>>>,
        stops: Arc<Mutex<Vec<Arc<ActivityIdentifier>>>>,
        estimates: Arc<Mutex<Vec<(usize, Duration)>>>,
        estimator: ArrivalEstimator,
    }

    fn fixture() -> Fixture {
        let schedule = LocalSchedule::new();
        let planner = Planner::new(
            Arc::new(test_graph()),
            LaneClosures::default(),
            VehicleTraits {
                nominal_linear_velocity_ms: 1.0,
                nominal_angular_velocity_rads: 1.0,
            },
        );
        let mut context = RobotContext::new(
            "test_robot",
            Some(Arc::new(planner)),
            Box::new(schedule.clone()),
        );
        context.set_now(t0());
        let worker = Worker::spawn(context);

        let destinations = Arc::new(Mutex::new(Vec::new()));
        let executions = Arc::new(Mutex::new(Vec::new()));
        let docks = Arc::new(Mutex::new(Vec::new()));
        let stops = Arc::new(Mutex::new(Vec::new()));
        let estimates: Arc<Mutex<Vec<(usize, Duration)>>> = Arc::new(Mutex::new(Vec::new()));

        let nav_destinations = destinations.clone();
        let nav_executions = executions.clone();
        let dock_log = docks.clone();
        let stop_log = stops.clone();

        let nav_params = Arc::new(NavParams::default());
        let handle = CommandHandle::new(
            worker.clone(),
            nav_params.clone(),
            Arc::new(move |destination, execution| {
                nav_destinations.lock().unwrap().push(destination);
                nav_executions.lock().unwrap().push(execution);
            }),
            Arc::new(move |identifier| {
                stop_log.lock().unwrap().push(identifier);
            }),
            Arc::new(move |name, execution| {
                dock_log.lock().unwrap().push((name, execution));
            }),
        );

        let estimate_log = estimates.clone();
        let estimator: ArrivalEstimator = Arc::new(move |index, dt| {
            estimate_log.lock().unwrap().push((index, dt));
        });

        Fixture {
            update: RobotUpdateHandle::new(worker.clone(), nav_params),
            worker,
            handle,
            schedule,
            destinations,
            executions,
            docks,
            stops,
            estimates,
            estimator,
        }
    }

    fn completion_channel() -> (RequestCompleted, Receiver<()>) {
        let (tx, rx) = channel();
        (
            Box::new(move || {
                let _ = tx.send(());
            }),
            rx,
        )
    }

    fn locate_at_waypoint(fx: &Fixture, waypoint: usize) {
        fx.worker.schedule(move |context| {
            let now = context.now();
            context.set_location(vec![PlanStart::at_waypoint(now, waypoint, 0.0)]);
        });
        fx.worker.flush();
    }

    fn plan_waypoint(graph_index: Option<usize>, x: f64, y: f64, yaw: f64, approach: Vec<usize>) -> PlanWaypoint {
        PlanWaypoint {
            graph_index,
            position: Vector3::new(x, y, yaw),
            approach_lanes: approach,
        }
    }

    fn line_path() -> Vec<PlanWaypoint> {
        vec![
            plan_waypoint(Some(0), 0.0, 0.0, 0.0, vec![]),
            plan_waypoint(Some(1), 10.0, 0.0, 0.0, vec![0]),
            plan_waypoint(Some(2), 20.0, 0.0, 0.0, vec![2]),
        ]
    }

    #[test]
    fn test_follow_path_issues_commands_in_order() {
        let fx = fixture();
        locate_at_waypoint(&fx, 0);

        let (finished, rx) = completion_channel();
        fx.handle
            .follow_new_path(line_path(), Some(fx.estimator.clone()), Some(finished));
        fx.worker.flush();

        // The driver has the first command: approach waypoint 1
        assert_eq!(fx.destinations.lock().unwrap().len(), 1);
        let execution = fx.executions.lock().unwrap()[0].clone();
        execution.finished();
        fx.worker.flush();

        // Completing it hands over the second: approach waypoint 2
        assert_eq!(fx.destinations.lock().unwrap().len(), 2);
        let execution = fx.executions.lock().unwrap()[1].clone();
        execution.finished();

        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        fx.worker.flush();

        let destinations = fx.destinations.lock().unwrap();
        assert_eq!(destinations[0].xy(), Vector2::new(10.0, 0.0));
        assert_eq!(destinations[0].graph_index, Some(1));
        assert_eq!(destinations[1].xy(), Vector2::new(20.0, 0.0));
        assert_eq!(destinations[1].graph_index, Some(2));
        assert_eq!(fx.schedule.replan_requests(), 0);
    }

    #[test]
    fn test_follow_path_with_drift_requests_replan() {
        let fx = fixture();

        // Localised at the dock bay, which the path never touches
        locate_at_waypoint(&fx, 3);

        fx.handle
            .follow_new_path(line_path(), Some(fx.estimator.clone()), None);
        fx.worker.flush();

        // Missing completion sink: rejected before any drift handling
        assert_eq!(fx.schedule.replan_requests(), 0);

        let (finished, _rx) = completion_channel();
        fx.handle
            .follow_new_path(line_path(), Some(fx.estimator.clone()), Some(finished));
        fx.worker.flush();

        assert!(fx.destinations.lock().unwrap().is_empty());
        assert_eq!(fx.schedule.replan_requests(), 1);
    }

    #[test]
    fn test_follow_path_resumes_from_lane_match() {
        let fx = fixture();

        // Part-way along lane 2, which is waypoint 2's approach lane
        fx.worker.schedule(|context| {
            let now = context.now();
            context.set_location(vec![PlanStart::on_lane(
                now,
                2,
                0.0,
                Vector2::new(15.0, 0.0),
                2,
            )]);
        });
        fx.worker.flush();

        let (finished, _rx) = completion_channel();
        fx.handle
            .follow_new_path(line_path(), Some(fx.estimator.clone()), Some(finished));
        fx.worker.flush();

        // Resumes at the pair (1, 2): a single command to waypoint 2
        let destinations = fx.destinations.lock().unwrap();
        assert_eq!(destinations.len(), 1);
        assert_eq!(destinations[0].xy(), Vector2::new(20.0, 0.0));
    }

    #[test]
    fn test_follow_path_clamps_resumption_to_final_pair() {
        let fx = fixture();

        // Already localised at the path's final waypoint
        locate_at_waypoint(&fx, 2);

        let (finished, _rx) = completion_channel();
        fx.handle
            .follow_new_path(line_path(), Some(fx.estimator.clone()), Some(finished));
        fx.worker.flush();

        // One command is still issued to approach the final waypoint
        let destinations = fx.destinations.lock().unwrap();
        assert_eq!(destinations.len(), 1);
        assert_eq!(destinations[0].xy(), Vector2::new(20.0, 0.0));
    }

    #[test]
    fn test_rotation_only_waypoint_is_folded() {
        let fx = fixture();
        locate_at_waypoint(&fx, 0);

        // The final step is a pure rotation at waypoint 1
        let path = vec![
            plan_waypoint(Some(0), 0.0, 0.0, 0.0, vec![]),
            plan_waypoint(Some(1), 10.0, 0.0, 0.0, vec![0]),
            plan_waypoint(Some(1), 10.0, 0.0, 1.57, vec![]),
        ];

        let (finished, _rx) = completion_channel();
        fx.handle
            .follow_new_path(path, Some(fx.estimator.clone()), Some(finished));
        fx.worker.flush();

        // Exactly one command, targeting the rotated pose
        {
            let destinations = fx.destinations.lock().unwrap();
            assert_eq!(destinations.len(), 1);
            assert_eq!(destinations[0].xy(), Vector2::new(10.0, 0.0));
            assert!((destinations[0].yaw() - 1.57).abs() < 1e-9);
        }

        // A position report against the command produces an estimate tagged
        // with the rotation waypoint's original path index
        let execution = fx.executions.lock().unwrap()[0].clone();
        fx.update.update_position(
            "test_map",
            Vector3::new(9.0, 0.0, 0.0),
            Some(execution.identifier()),
        );
        fx.worker.flush();

        let estimates = fx.estimates.lock().unwrap();
        assert!(!estimates.is_empty());
        assert_eq!(estimates.last().unwrap().0, 2);
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let fx = fixture();
        locate_at_waypoint(&fx, 0);

        let (finished, _rx) = completion_channel();
        fx.handle
            .follow_new_path(Vec::new(), Some(fx.estimator.clone()), Some(finished));
        fx.worker.flush();

        assert!(fx.destinations.lock().unwrap().is_empty());
        assert_eq!(fx.schedule.replan_requests(), 0);
    }

    #[test]
    fn test_dock_builds_lane_bounded_command() {
        let fx = fixture();

        let (finished, rx) = completion_channel();
        fx.handle.dock("charger_1", finished);
        fx.worker.flush();

        // The driver received the dock request
        let (name, execution) = {
            let docks = fx.docks.lock().unwrap();
            assert_eq!(docks.len(), 1);
            (docks[0].0.clone(), docks[0].1.clone())
        };
        assert_eq!(name, "charger_1");

        // Mid-way along the dock lane, 6 seconds in: the remaining 5 m at
        // nominal velocity makes the robot 1 s late against the 10 s
        // expectation, which lands exactly on the application threshold
        fx.worker.schedule(|context| {
            context.set_now(t0() + Duration::seconds(6));
        });
        fx.update.update_position(
            "test_map",
            Vector3::new(25.0, 0.0, 0.0),
            Some(execution.identifier()),
        );
        fx.worker.flush();

        let plan_id = fx.schedule.current_plan_id();
        assert_eq!(fx.schedule.delay(plan_id), Some(Duration::seconds(1)));

        // The localisation is bounded by the dock lane's endpoints
        let starts = fx.schedule.location();
        assert!(starts.iter().any(|s| s.lane == Some(4)));

        execution.finished();
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_dock_with_unknown_name_still_dispatches() {
        let fx = fixture();

        let (finished, rx) = completion_channel();
        fx.handle.dock("unknown_dock", finished);
        fx.worker.flush();

        let (name, execution) = {
            let docks = fx.docks.lock().unwrap();
            assert_eq!(docks.len(), 1);
            (docks[0].0.clone(), docks[0].1.clone())
        };
        assert_eq!(name, "unknown_dock");

        // Position reports still resolve through the graph-wide fallback
        fx.update.update_position(
            "test_map",
            Vector3::new(0.1, 0.0, 0.0),
            Some(execution.identifier()),
        );
        fx.worker.flush();
        assert!(!fx.schedule.location().is_empty());

        execution.finished();
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_stop_cancels_current_command() {
        let fx = fixture();
        locate_at_waypoint(&fx, 0);

        let (finished, rx) = completion_channel();
        fx.handle
            .follow_new_path(line_path(), Some(fx.estimator.clone()), Some(finished));
        fx.worker.flush();

        let execution = fx.executions.lock().unwrap()[0].clone();
        assert!(execution.okay());

        fx.handle.stop();
        fx.worker.flush();

        // The driver was told to stop and the command is cancelled
        assert_eq!(fx.stops.lock().unwrap().len(), 1);
        assert!(!execution.okay());

        // A straggling position report is silently dropped
        let published_before = fx.schedule.location().len();
        fx.update.update_position(
            "test_map",
            Vector3::new(5.0, 0.0, 0.0),
            Some(execution.identifier()),
        );
        fx.worker.flush();
        assert_eq!(fx.schedule.location().len(), published_before);

        // The path never completes
        assert!(rx
            .recv_timeout(std::time::Duration::from_millis(100))
            .is_err());
    }

    #[test]
    fn test_new_path_supersedes_old_queue() {
        let fx = fixture();
        locate_at_waypoint(&fx, 0);

        let (finished_a, rx_a) = completion_channel();
        fx.handle
            .follow_new_path(line_path(), Some(fx.estimator.clone()), Some(finished_a));
        fx.worker.flush();

        let old_execution = fx.executions.lock().unwrap()[0].clone();

        let (finished_b, rx_b) = completion_channel();
        fx.handle
            .follow_new_path(line_path(), Some(fx.estimator.clone()), Some(finished_b));
        fx.worker.flush();

        // Finishing the superseded command advances nothing
        let issued = fx.destinations.lock().unwrap().len();
        old_execution.finished();
        fx.worker.flush();
        assert_eq!(fx.destinations.lock().unwrap().len(), issued);
        assert!(rx_a
            .recv_timeout(std::time::Duration::from_millis(100))
            .is_err());

        // The new queue still runs to completion
        loop {
            let execution = fx.executions.lock().unwrap().last().unwrap().clone();
            execution.finished();
            fx.worker.flush();
            if rx_b
                .recv_timeout(std::time::Duration::from_millis(100))
                .is_ok()
            {
                break;
            }
        }
    }
}
