//! Robot executive demo entry point.
//!
//! Wires the command-execution core to an in-process schedule and a
//! simulated driver that acknowledges each request by reporting the
//! destination position and completing the motion. One path-following
//! cycle and one docking cycle are driven end to end:
//!
//!     - Initialise session and logging
//!     - Load navigation parameters
//!     - Build the navigation graph and robot context
//!     - Follow a three-waypoint path
//!     - Dock at the charger
//!     - Save the final localisation with the session artifacts

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::info;
use nalgebra::{Vector2, Vector3};
use std::sync::{mpsc::channel, Arc};

// Internal
use fleet_if::{
    graph::{LaneClosures, LaneEndpoint, LaneEvent, NavGraph},
    kinematics::VehicleTraits,
    plan::PlanWaypoint,
    trajectory::to_seconds,
};
use robot_lib::{
    context::RobotContext,
    handle::{ArrivalEstimator, CommandHandle, DockRequest, NavigationRequest, StopRequest},
    nav_params::NavParams,
    planner::Planner,
    schedule::LocalSchedule,
    update::RobotUpdateHandle,
    worker::Worker,
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Map all demo waypoints live on.
const MAP_NAME: &str = "main_floor";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("robot_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Fleet Robot Executive\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let nav_params: NavParams = util::params::load_or_default("nav_params.toml");
    let nav_params = Arc::new(nav_params);

    info!("Navigation parameters loaded");

    // ---- BUILD THE FLEET ENVIRONMENT ----

    // A small graph: a corridor from the depot past a junction, with a
    // charger dock branching off the junction.
    //
    //     0 (depot) <-> 1 (junction) <-> 2 (north bay)
    //                   1 -> 3 (charger, dock event on the way in)
    let mut graph = NavGraph::new();
    let depot = graph.add_waypoint(MAP_NAME, Vector2::new(0.0, 0.0));
    let junction = graph.add_waypoint(MAP_NAME, Vector2::new(10.0, 0.0));
    let north_bay = graph.add_waypoint(MAP_NAME, Vector2::new(10.0, 10.0));
    let charger = graph.add_waypoint(MAP_NAME, Vector2::new(12.0, 0.0));

    let lane_out = graph
        .add_lane(LaneEndpoint::new(depot), LaneEndpoint::new(junction))
        .wrap_err("Failed to build the nav graph")?;
    graph
        .add_lane(LaneEndpoint::new(junction), LaneEndpoint::new(depot))
        .wrap_err("Failed to build the nav graph")?;
    let lane_north = graph
        .add_lane(LaneEndpoint::new(junction), LaneEndpoint::new(north_bay))
        .wrap_err("Failed to build the nav graph")?;
    graph
        .add_lane(LaneEndpoint::new(north_bay), LaneEndpoint::new(junction))
        .wrap_err("Failed to build the nav graph")?;
    graph
        .add_lane(
            LaneEndpoint::new(junction),
            LaneEndpoint::with_event(
                charger,
                LaneEvent::Dock {
                    name: "charger_1".to_owned(),
                },
            ),
        )
        .wrap_err("Failed to build the nav graph")?;
    graph
        .add_lane(LaneEndpoint::new(charger), LaneEndpoint::new(junction))
        .wrap_err("Failed to build the nav graph")?;

    let schedule = LocalSchedule::new();
    let planner = Planner::new(
        Arc::new(graph),
        LaneClosures::default(),
        VehicleTraits::default(),
    );
    let context = RobotContext::new(
        "demo_robot",
        Some(Arc::new(planner)),
        Box::new(schedule.clone()),
    );
    let worker = Worker::spawn(context);
    let update = RobotUpdateHandle::new(worker.clone(), nav_params.clone());

    // ---- SIMULATED DRIVER ----

    let nav_update = update.clone();
    let handle_nav: NavigationRequest = Arc::new(move |destination, execution| {
        info!(
            "Driver: navigating to ({:.1}, {:.1}) on map [{}]",
            destination.position[0], destination.position[1], destination.map
        );
        nav_update.update_position(
            &destination.map,
            destination.position,
            Some(execution.identifier()),
        );
        execution.finished();
    });

    let handle_stop: StopRequest = Arc::new(|_identifier| {
        info!("Driver: stopping");
    });

    let dock_update = update.clone();
    let handle_dock: DockRequest = Arc::new(move |name, execution| {
        info!("Driver: docking at [{}]", name);
        dock_update.update_position(
            MAP_NAME,
            Vector3::new(11.0, 0.0, 0.0),
            Some(execution.identifier()),
        );
        execution.finished();
    });

    let handle = CommandHandle::new(
        worker.clone(),
        nav_params,
        handle_nav,
        handle_stop,
        handle_dock,
    );

    // Seed the robot's localisation at the depot
    update.update_position(MAP_NAME, Vector3::new(0.0, 0.0, 0.0), None);
    worker.flush();

    // ---- FOLLOW A PATH ----

    let path = vec![
        PlanWaypoint {
            graph_index: Some(depot),
            position: Vector3::new(0.0, 0.0, 0.0),
            approach_lanes: Vec::new(),
        },
        PlanWaypoint {
            graph_index: Some(junction),
            position: Vector3::new(10.0, 0.0, 0.0),
            approach_lanes: vec![lane_out],
        },
        PlanWaypoint {
            graph_index: Some(north_bay),
            position: Vector3::new(10.0, 10.0, std::f64::consts::FRAC_PI_2),
            approach_lanes: vec![lane_north],
        },
    ];

    let estimator: ArrivalEstimator = Arc::new(|index, remaining| {
        info!(
            "Arrival estimate for path waypoint [{}]: {:.1} s",
            index,
            to_seconds(remaining)
        );
    });

    let (path_tx, path_rx) = channel();
    handle.follow_new_path(
        path,
        Some(estimator),
        Some(Box::new(move || {
            let _ = path_tx.send(());
        })),
    );
    path_rx.recv().wrap_err("Path execution did not complete")?;
    info!("Path complete");

    // ---- DOCK AT THE CHARGER ----

    let (dock_tx, dock_rx) = channel();
    handle.dock(
        "charger_1",
        Box::new(move || {
            let _ = dock_tx.send(());
        }),
    );
    dock_rx.recv().wrap_err("Docking did not complete")?;
    info!("Docking complete");

    // ---- SHUTDOWN ----

    // Save the final localisation with the session artifacts
    worker.schedule(|context| {
        util::session::save_with_timestamp("final_location.json", context.location().to_vec());
    });
    worker.flush();

    info!("Replan requests issued: {}", schedule.replan_requests());

    session.exit();

    Ok(())
}
