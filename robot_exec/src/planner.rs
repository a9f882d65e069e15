//! # Planner boundary
//!
//! The executive consumes the path planner through this module: the shared
//! navigation graph, the lane-closure set, the vehicle's kinematic limits,
//! and the graph-wide nearest-start search used as the localisation
//! fallback when a position report matches none of a command's candidates.
//!
//! The path-planning algorithm itself lives outside this crate; only its
//! query surface is represented here.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use nalgebra::{Vector2, Vector3};
use ordered_float::NotNan;
use std::sync::Arc;

use fleet_if::{
    graph::{LaneClosures, NavGraph},
    kinematics::VehicleTraits,
    plan::PlanStart,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The planner's query surface: graph, closures, and kinematic limits.
pub struct Planner {
    pub graph: Arc<NavGraph>,
    pub closures: LaneClosures,
    pub traits: VehicleTraits,
}

/// Result of projecting a point onto a directed segment.
pub(crate) struct SegmentProjection {
    /// Distance along the segment from its start, in meters
    pub along: f64,

    /// Perpendicular distance from the segment, in meters
    pub perpendicular: f64,

    /// Length of the segment, in meters
    pub length: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Planner {
    pub fn new(graph: Arc<NavGraph>, closures: LaneClosures, traits: VehicleTraits) -> Self {
        Self {
            graph,
            closures,
            traits,
        }
    }

    /// Graph-wide nearest-start search.
    ///
    /// Tries, in order: merging onto the nearest waypoint within
    /// `max_merge_waypoint_distance`, merging onto the nearest lane within
    /// `max_merge_lane_distance` (ignoring lanes shorter than
    /// `min_lane_length`), and finally pinning to the closest waypoint on
    /// the map regardless of distance. Closed lanes are never candidates.
    pub fn compute_plan_starts(
        &self,
        map: &str,
        position: Vector3<f64>,
        time: DateTime<Utc>,
        max_merge_waypoint_distance: f64,
        max_merge_lane_distance: f64,
        min_lane_length: f64,
    ) -> Vec<PlanStart> {
        let p = Vector2::new(position[0], position[1]);
        let yaw = position[2];

        // Waypoint merge pass
        let mut on_waypoint: Option<(usize, f64)> = None;
        for index in 0..self.graph.num_waypoints() {
            let wp = match self.graph.get_waypoint(index) {
                Some(wp) => wp,
                None => continue,
            };
            if wp.map_name != map {
                continue;
            }

            let dist = (p - wp.location).norm();
            if dist <= max_merge_waypoint_distance {
                match on_waypoint {
                    Some((_, best)) if dist >= best => (),
                    _ => on_waypoint = Some((index, dist)),
                }
            }
        }

        if let Some((index, _)) = on_waypoint {
            let mut starts = vec![PlanStart::merged(time, index, yaw, p)];
            for &lane_id in self.graph.lanes_from(index) {
                if self.closures.is_closed(lane_id) {
                    continue;
                }
                if let Some(lane) = self.graph.get_lane(lane_id) {
                    starts.push(PlanStart::on_lane(time, lane.exit.waypoint, yaw, p, lane_id));
                }
            }
            return starts;
        }

        // Lane merge pass
        let mut on_lane: Option<(usize, f64)> = None;
        for lane_id in 0..self.graph.num_lanes() {
            if self.closures.is_closed(lane_id) {
                continue;
            }

            let lane = match self.graph.get_lane(lane_id) {
                Some(l) => l,
                None => continue,
            };
            let (entry, exit) = match (
                self.graph.get_waypoint(lane.entry.waypoint),
                self.graph.get_waypoint(lane.exit.waypoint),
            ) {
                (Some(entry), Some(exit)) => (entry, exit),
                _ => continue,
            };
            if entry.map_name != map {
                continue;
            }

            let projection = match project_onto_segment(&p, &entry.location, &exit.location) {
                Some(projection) => projection,
                None => continue,
            };
            if projection.length < min_lane_length {
                continue;
            }

            if projection.perpendicular <= max_merge_lane_distance {
                match on_lane {
                    Some((_, best)) if projection.perpendicular >= best => (),
                    _ => on_lane = Some((lane_id, projection.perpendicular)),
                }
            }
        }

        if let Some((lane_id, _)) = on_lane {
            let lane = match self.graph.get_lane(lane_id) {
                Some(l) => l,
                None => return Vec::new(),
            };
            let mut starts = vec![PlanStart::on_lane(time, lane.exit.waypoint, yaw, p, lane_id)];
            if let Some(reverse) = self
                .graph
                .lane_from(lane.exit.waypoint, lane.entry.waypoint)
            {
                starts.push(PlanStart::on_lane(time, lane.entry.waypoint, yaw, p, reverse));
            }
            return starts;
        }

        // Nothing merged: pin to the closest waypoint on the map
        let nearest = (0..self.graph.num_waypoints())
            .filter_map(|index| {
                let wp = self.graph.get_waypoint(index)?;
                if wp.map_name != map {
                    return None;
                }
                let dist = NotNan::new((p - wp.location).norm()).ok()?;
                Some((index, dist))
            })
            .min_by_key(|(_, dist)| *dist);

        match nearest {
            Some((index, _)) => vec![PlanStart::merged(time, index, yaw, p)],
            None => Vec::new(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Project a point onto the segment `p0 -> p1`.
///
/// Returns `None` for degenerate segments and for projections falling
/// outside the segment's span.
pub(crate) fn project_onto_segment(
    p: &Vector2<f64>,
    p0: &Vector2<f64>,
    p1: &Vector2<f64>,
) -> Option<SegmentProjection> {
    let length = (p1 - p0).norm();
    if length <= f64::EPSILON {
        return None;
    }

    let u = (p1 - p0) / length;
    let along = (p - p0).dot(&u);
    if along < 0.0 || length < along {
        return None;
    }

    let perpendicular = (p - p0 - along * u).norm();
    Some(SegmentProjection {
        along,
        perpendicular,
        length,
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use fleet_if::graph::LaneEndpoint;

    fn line_graph() -> NavGraph {
        let mut graph = NavGraph::new();
        graph.add_waypoint("test_map", Vector2::new(0.0, 0.0));
        graph.add_waypoint("test_map", Vector2::new(10.0, 0.0));
        graph
            .add_lane(LaneEndpoint::new(0), LaneEndpoint::new(1))
            .unwrap();
        graph
            .add_lane(LaneEndpoint::new(1), LaneEndpoint::new(0))
            .unwrap();
        graph
    }

    fn planner(graph: NavGraph, closures: LaneClosures) -> Planner {
        Planner::new(Arc::new(graph), closures, VehicleTraits::default())
    }

    fn starts_at(
        planner: &Planner,
        map: &str,
        x: f64,
        y: f64,
    ) -> Vec<PlanStart> {
        let time = Utc.timestamp(1_600_000_000, 0);
        planner.compute_plan_starts(map, Vector3::new(x, y, 0.0), time, 0.3, 1.0, 1e-8)
    }

    #[test]
    fn test_waypoint_merge() {
        let planner = planner(line_graph(), LaneClosures::default());
        let starts = starts_at(&planner, "test_map", 0.1, 0.1);

        // One start on the waypoint plus one per open departing lane
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0].waypoint, 0);
        assert_eq!(starts[0].lane, None);
        assert_eq!(starts[1].waypoint, 1);
        assert_eq!(starts[1].lane, Some(0));
    }

    #[test]
    fn test_lane_merge_both_directions() {
        let planner = planner(line_graph(), LaneClosures::default());
        let starts = starts_at(&planner, "test_map", 5.0, 0.5);

        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0].waypoint, 1);
        assert_eq!(starts[0].lane, Some(0));
        assert_eq!(starts[1].waypoint, 0);
        assert_eq!(starts[1].lane, Some(1));
    }

    #[test]
    fn test_closed_lane_never_a_candidate() {
        let mut closures = LaneClosures::default();
        closures.close(0);
        let planner = planner(line_graph(), closures);

        // On the waypoint: the closed departing lane is not offered
        let starts = starts_at(&planner, "test_map", 0.1, 0.1);
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].waypoint, 0);

        // On the lane: only the open reverse lane matches
        let starts = starts_at(&planner, "test_map", 5.0, 0.5);
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[0].lane, Some(1));
    }

    #[test]
    fn test_short_lane_ignored() {
        let mut graph = NavGraph::new();
        graph.add_waypoint("test_map", Vector2::new(0.0, 0.0));
        graph.add_waypoint("test_map", Vector2::new(0.5, 0.0));
        graph
            .add_lane(LaneEndpoint::new(0), LaneEndpoint::new(1))
            .unwrap();
        let planner = planner(graph, LaneClosures::default());

        let time = Utc.timestamp(1_600_000_000, 0);
        let starts = planner.compute_plan_starts(
            "test_map",
            Vector3::new(0.4, 0.5, 0.0),
            time,
            0.3,
            1.0,
            // Minimum lane length longer than the lane itself
            1.0,
        );

        // Falls through to the nearest-waypoint fallback
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].lane, None);
    }

    #[test]
    fn test_nearest_waypoint_fallback() {
        let planner = planner(line_graph(), LaneClosures::default());
        let starts = starts_at(&planner, "test_map", 100.0, 100.0);

        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].waypoint, 1);
        assert!(starts[0].location.is_some());
    }

    #[test]
    fn test_unknown_map_yields_nothing() {
        let planner = planner(line_graph(), LaneClosures::default());
        assert!(starts_at(&planner, "other_map", 0.0, 0.0).is_empty());
    }

    #[test]
    fn test_projection_outside_span() {
        let p0 = Vector2::new(0.0, 0.0);
        let p1 = Vector2::new(10.0, 0.0);
        assert!(project_onto_segment(&Vector2::new(-1.0, 0.5), &p0, &p1).is_none());
        assert!(project_onto_segment(&Vector2::new(11.0, 0.5), &p0, &p1).is_none());
        let projection = project_onto_segment(&Vector2::new(4.0, 3.0), &p0, &p1).unwrap();
        assert!((projection.along - 4.0).abs() < 1e-9);
        assert!((projection.perpendicular - 3.0).abs() < 1e-9);
        assert!((projection.length - 10.0).abs() < 1e-9);
    }
}
