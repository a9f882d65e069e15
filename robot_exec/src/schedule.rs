//! # Traffic schedule boundary
//!
//! The executive consumes the traffic/negotiation engine only through the
//! [`Schedule`] trait defined here: plan-id assignment, itinerary
//! registration, cumulative delay adjustment, stubbornness capabilities,
//! replan requests, and localisation publication.
//!
//! [`LocalSchedule`] is a simple in-process implementation used by the demo
//! executable and the test suite. The real negotiation engine lives outside
//! this crate.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::Duration;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fleet_if::{plan::PlanStart, trajectory::Route};

use crate::worker::lock;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Identifier of a plan registered with the schedule.
pub type PlanId = u64;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// The operations the executive requires of the traffic schedule.
///
/// Implementations are only ever called from the robot's serialized worker
/// thread; they need no internal synchronisation beyond what their own
/// backend demands.
pub trait Schedule: Send {
    /// The id of the plan the schedule currently holds for this robot.
    fn current_plan_id(&self) -> PlanId;

    /// Reserve a fresh plan id.
    fn assign_plan_id(&mut self) -> PlanId;

    /// Replace the robot's registered itinerary with the given routes under
    /// the given plan id.
    fn set_itinerary(&mut self, plan_id: PlanId, routes: Vec<Route>);

    /// Adjust the cumulative delay recorded against a plan. Changes smaller
    /// than `threshold` are not applied.
    fn cumulative_delay(&mut self, plan_id: PlanId, delay: Duration, threshold: Duration);

    /// Acquire a stubbornness capability: while the returned token is held,
    /// the negotiation layer must not treat this robot's current route as
    /// freely re-routable.
    fn acquire_stubbornness(&mut self) -> StubbornToken;

    /// Ask for a full replan of the robot's approved path.
    fn request_replan(&mut self);

    /// Publish the robot's current localisation candidates.
    fn set_location(&mut self, starts: Vec<PlanStart>);
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A stubbornness capability. Dropping the token releases it.
pub struct StubbornToken {
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

/// In-process schedule used by the demo executable and tests.
///
/// State lives behind a shared inner so that a clone of the schedule can be
/// kept outside the robot context to observe what the executive did.
#[derive(Clone, Default)]
pub struct LocalSchedule {
    inner: Arc<Mutex<Inner>>,
    stubborn_count: Arc<AtomicUsize>,
}

#[derive(Default)]
struct Inner {
    next_plan_id: PlanId,
    current_plan_id: PlanId,
    itinerary: Vec<Route>,
    delays: HashMap<PlanId, Duration>,
    replan_requests: usize,
    location: Vec<PlanStart>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StubbornToken {
    /// Create a token that runs the given closure when released.
    pub fn new<F: FnOnce() + Send + 'static>(on_release: F) -> Self {
        Self {
            on_release: Some(Box::new(on_release)),
        }
    }
}

impl Drop for StubbornToken {
    fn drop(&mut self) {
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

impl LocalSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stubbornness tokens currently outstanding.
    pub fn stubborn_count(&self) -> usize {
        self.stubborn_count.load(Ordering::SeqCst)
    }

    /// Number of replan requests received so far.
    pub fn replan_requests(&self) -> usize {
        lock(&self.inner).replan_requests
    }

    /// The cumulative delay currently recorded against a plan.
    pub fn delay(&self, plan_id: PlanId) -> Option<Duration> {
        lock(&self.inner).delays.get(&plan_id).copied()
    }

    /// The robot's last published localisation.
    pub fn location(&self) -> Vec<PlanStart> {
        lock(&self.inner).location.clone()
    }

    /// The routes currently registered for the robot.
    pub fn itinerary(&self) -> Vec<Route> {
        lock(&self.inner).itinerary.clone()
    }
}

impl Schedule for LocalSchedule {
    fn current_plan_id(&self) -> PlanId {
        lock(&self.inner).current_plan_id
    }

    fn assign_plan_id(&mut self) -> PlanId {
        let mut inner = lock(&self.inner);
        let id = inner.next_plan_id;
        inner.next_plan_id += 1;
        id
    }

    fn set_itinerary(&mut self, plan_id: PlanId, routes: Vec<Route>) {
        let mut inner = lock(&self.inner);
        inner.current_plan_id = plan_id;
        inner.itinerary = routes;
    }

    fn cumulative_delay(&mut self, plan_id: PlanId, delay: Duration, threshold: Duration) {
        let mut inner = lock(&self.inner);
        let current = inner
            .delays
            .get(&plan_id)
            .copied()
            .unwrap_or_else(Duration::zero);

        // Sub-threshold changes are dropped as report noise
        let change = delay - current;
        if change.num_milliseconds().abs() >= threshold.num_milliseconds().abs() {
            inner.delays.insert(plan_id, delay);
        }
    }

    fn acquire_stubbornness(&mut self) -> StubbornToken {
        let count = self.stubborn_count.clone();
        count.fetch_add(1, Ordering::SeqCst);
        StubbornToken::new(move || {
            count.fetch_sub(1, Ordering::SeqCst);
        })
    }

    fn request_replan(&mut self) {
        lock(&self.inner).replan_requests += 1;
    }

    fn set_location(&mut self, starts: Vec<PlanStart>) {
        lock(&self.inner).location = starts;
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stubborn_token_releases_on_drop() {
        let mut schedule = LocalSchedule::new();
        let token = schedule.acquire_stubbornness();
        assert_eq!(schedule.stubborn_count(), 1);
        drop(token);
        assert_eq!(schedule.stubborn_count(), 0);
    }

    #[test]
    fn test_cumulative_delay_threshold() {
        let mut schedule = LocalSchedule::new();
        let threshold = Duration::seconds(1);

        // Sub-threshold change is dropped
        schedule.cumulative_delay(0, Duration::milliseconds(500), threshold);
        assert_eq!(schedule.delay(0), None);

        // A change equal to the threshold is applied
        schedule.cumulative_delay(0, Duration::seconds(1), threshold);
        assert_eq!(schedule.delay(0), Some(Duration::seconds(1)));

        // A further sub-threshold adjustment is dropped
        schedule.cumulative_delay(0, Duration::milliseconds(1400), threshold);
        assert_eq!(schedule.delay(0), Some(Duration::seconds(1)));

        // Negative changes obey the same threshold
        schedule.cumulative_delay(0, Duration::milliseconds(-500), threshold);
        assert_eq!(schedule.delay(0), Some(Duration::milliseconds(-500)));
    }

    #[test]
    fn test_plan_ids_are_unique() {
        let mut schedule = LocalSchedule::new();
        let a = schedule.assign_plan_id();
        let b = schedule.assign_plan_id();
        assert_ne!(a, b);
    }
}
