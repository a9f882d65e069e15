//! # Command localisation
//!
//! Maps a raw `(map, position, heading)` report onto the planning graph,
//! restricted to the candidate waypoints and lanes of the live command, or
//! onto the command's override trajectory when one is active. The result is
//! published as the robot's current localisation, and when the command has
//! a known final waypoint an arrival estimate is produced as a side effect.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use log::error;
use nalgebra::{Vector2, Vector3};
use std::sync::Mutex;

use fleet_if::plan::PlanStart;
use fleet_if::trajectory::{from_seconds, to_seconds};

use crate::context::RobotContext;
use crate::planner::project_onto_segment;
use crate::worker::lock;

use super::{CommandData, ScheduleOverride};

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Process a position report against a live command.
pub(crate) fn update_location(
    data: &Mutex<CommandData>,
    context: &mut RobotContext,
    map: &str,
    position: Vector3<f64>,
) {
    let data = lock(data);

    // An active override fully supersedes the restricted localisation
    if let Some(ref schedule_override) = data.schedule_override {
        overridden_update(&data, schedule_override, context, map, position);
        return;
    }

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
    let graph = &planner.graph;
    let closures = &planner.closures;

    let p = Vector2::new(position[0], position[1]);
    let yaw = position[2];

    // Search the command's candidate waypoints for the closest merge.
    // Ties keep the first-found candidate.
    let mut on_waypoint: Option<(usize, f64)> = None;
    for &wp in &data.waypoints {
        let waypoint = match graph.get_waypoint(wp) {
            Some(w) => w,
            None => {
                error!(
                    "Robot [{}] has a command with a waypoint [{}] that is outside the range \
                     of the graph [{}]. We will not do a location update.",
                    context.name(),
                    wp,
                    graph.num_waypoints()
                );
                return;
            }
        };

        let dist = (p - waypoint.location).norm();
        if dist <= data.nav_params.max_merge_waypoint_distance {
            match on_waypoint {
                Some((_, best)) if dist >= best => (),
                _ => on_waypoint = Some((wp, dist)),
            }
        }
    }

    let now = context.now();
    let mut starts: Vec<PlanStart> = Vec::new();
    if let Some((wp, _)) = on_waypoint {
        // Merged onto a waypoint: keep one start per open departing lane so
        // the planner retains every route continuation
        starts.push(PlanStart::merged(now, wp, yaw, p));
        for &lane_id in graph.lanes_from(wp) {
            if lane_id >= graph.num_lanes() {
                error!(
                    "Nav graph for robot [{}] has an invalid lane ID [{}] leaving vertex \
                     [{}], lane ID range is [{}]. We will not do a location update.",
                    context.name(),
                    lane_id,
                    wp,
                    graph.num_lanes()
                );
                return;
            }

            if closures.is_closed(lane_id) {
                // Don't use a lane that's closed
                continue;
            }

            if let Some(lane) = graph.get_lane(lane_id) {
                starts.push(PlanStart::on_lane(now, lane.exit.waypoint, yaw, p, lane_id));
            }
        }
    } else {
        // Search the command's candidate lanes for the closest projection
        let mut on_lane: Option<(usize, f64)> = None;
        for &lane_id in &data.lanes {
            let lane = match graph.get_lane(lane_id) {
                Some(l) => l,
                None => {
                    error!(
                        "Robot [{}] has a command with a lane [{}] that is outside the range \
                         of the graph [{}]. We will not do a location update.",
                        context.name(),
                        lane_id,
                        graph.num_lanes()
                    );
                    return;
                }
            };

            if closures.is_closed(lane_id) {
                continue;
            }

            let (entry, exit) = match (
                graph.get_waypoint(lane.entry.waypoint),
                graph.get_waypoint(lane.exit.waypoint),
            ) {
                (Some(entry), Some(exit)) => (entry, exit),
                _ => {
                    error!(
                        "Nav graph for robot [{}] has a lane [{}] with an endpoint outside \
                         the waypoint range [{}]. We will not do a location update.",
                        context.name(),
                        lane_id,
                        graph.num_waypoints()
                    );
                    return;
                }
            };

            let projection = match project_onto_segment(&p, &entry.location, &exit.location) {
                Some(projection) => projection,
                None => continue,
            };

            if projection.perpendicular <= data.nav_params.max_merge_lane_distance {
                match on_lane {
                    Some((_, best)) if projection.perpendicular >= best => (),
                    _ => on_lane = Some((lane_id, projection.perpendicular)),
                }
            }
        }

        if let Some((lane_id, _)) = on_lane {
            if let Some(lane) = graph.get_lane(lane_id) {
                starts.push(PlanStart::on_lane(now, lane.exit.waypoint, yaw, p, lane_id));

                // If a reverse lane exists keep both traversal directions open
                if let Some(reverse) = graph.lane_from(lane.exit.waypoint, lane.entry.waypoint) {
                    starts.push(PlanStart::on_lane(now, lane.entry.waypoint, yaw, p, reverse));
                }
            }
        } else {
            // No restricted match at all: fall back to the graph-wide search
            starts = planner.compute_plan_starts(
                map,
                position,
                now,
                data.nav_params.max_merge_waypoint_distance,
                data.nav_params.max_merge_lane_distance,
                data.nav_params.min_lane_length,
            );
        }
    }

    context.set_location(starts);

    // Estimate the time to arrive at the command's final waypoint
    if let Some(&final_wp) = data.waypoints.last() {
        if let Some(waypoint) = graph.get_waypoint(final_wp) {
            let distance = (waypoint.location - p).norm();
            let rotation = match data.final_orientation {
                Some(orientation) => util::maths::get_ang_dist_2pi(yaw, orientation).abs(),
                None => 0.0,
            };

            let v = planner.traits.linear_velocity();
            let w = planner.traits.angular_velocity();
            let t = distance / v + rotation / w;
            (data.arrival_estimator)(context, from_seconds(t));
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Position update while a schedule override is active: estimate the
/// robot's delay against the override trajectory and keep a graph-wide
/// localisation current for when the override's relevance ends.
fn overridden_update(
    data: &CommandData,
    schedule_override: &ScheduleOverride,
    context: &mut RobotContext,
    map: &str,
    position: Vector3<f64>,
) {
    let p = Vector2::new(position[0], position[1]);
    let trajectory = &schedule_override.route.trajectory;
    let plan_id = schedule_override.plan_id;

    // The trajectory is approximated as linear constant-velocity segments
    // even if it was produced by higher-order interpolation. Find the
    // closest segment whose span contains the projection.
    let mut closest_segment: Option<(usize, f64, f64)> = None;
    for i0 in 0..trajectory.len().saturating_sub(1) {
        let (wp0, wp1) = match (trajectory.get(i0), trajectory.get(i0 + 1)) {
            (Some(wp0), Some(wp1)) => (wp0, wp1),
            _ => break,
        };

        let projection = match project_onto_segment(&p, &wp0.xy(), &wp1.xy()) {
            Some(projection) => projection,
            None => continue,
        };

        match closest_segment {
            Some((_, best, _)) if projection.perpendicular >= best => (),
            _ => {
                closest_segment = Some((
                    i0,
                    projection.perpendicular,
                    projection.along / projection.length,
                ))
            }
        }
    }

    let now = context.now();
    let delay_threshold = from_seconds(data.nav_params.delay_threshold_s);
    if let Some((i0, _, fraction)) = closest_segment {
        if let (Some(wp0), Some(wp1)) = (trajectory.get(i0), trajectory.get(i0 + 1)) {
            let dt = to_seconds(wp1.time - wp0.time);
            let expected = wp0.time + from_seconds(fraction * dt);
            let delay = now - expected;
            context
                .schedule_mut()
                .cumulative_delay(plan_id, delay, delay_threshold);
        }
    } else {
        // Off-trajectory: use the nearest sample's timestamp as the
        // expected time. Coarse, but the best available with no segment
        // match. A trajectory with no samples gets no delay update at all.
        let mut closest_time: Option<(DateTime<Utc>, f64)> = None;
        for point in trajectory.points() {
            let dist = (p - point.xy()).norm();
            match closest_time {
                Some((_, best)) if dist >= best => (),
                _ => closest_time = Some((point.time, dist)),
            }
        }

        if let Some((expected, _)) = closest_time {
            let delay = now - expected;
            context
                .schedule_mut()
                .cumulative_delay(plan_id, delay, delay_threshold);
        }
    }

    // The robot's position must never be defined purely by the override, so
    // recompute a graph-wide localisation as well
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

    let starts = planner.compute_plan_starts(
        map,
        position,
        now,
        data.nav_params.max_merge_waypoint_distance,
        data.nav_params.max_merge_lane_distance,
        data.nav_params.min_lane_length,
    );
    context.set_location(starts);
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
