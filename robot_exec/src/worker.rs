//! # Serialized per-robot worker
//!
//! All state mutation for a robot is funneled through a single worker
//! thread draining a task queue. Position reports, driver completion
//! callbacks, override requests, and path compilation are all posted here,
//! so they interleave deterministically instead of racing.
//!
//! This is a hard invariant of the design: no other code path may mutate a
//! [`RobotContext`] directly.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use log::{debug, warn};

use crate::context::RobotContext;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// A unit of work executed on the robot's worker thread.
pub type Task = Box<dyn FnOnce(&mut RobotContext) + Send>;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Handle onto a robot's serialized execution context.
///
/// Cloning the handle is cheap; all clones feed the same queue. The worker
/// thread exits once every handle has been dropped and the queue has
/// drained.
#[derive(Clone)]
pub struct Worker {
    sender: Sender<Task>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Worker {
    /// Spawn the worker thread for the given robot, taking ownership of its
    /// context.
    pub fn spawn(context: RobotContext) -> Self {
        let (sender, receiver) = channel();
        let name = context.name().to_owned();

        thread::spawn(move || worker_thread(name, context, receiver));

        Self { sender }
    }

    /// Post a task onto the robot's queue.
    ///
    /// Tasks run in the order they were posted. A task posted after the
    /// worker has shut down is dropped with a warning.
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce(&mut RobotContext) + Send + 'static,
    {
        if self.sender.send(Box::new(task)).is_err() {
            warn!("Robot worker has shut down, dropping scheduled task");
        }
    }

    /// Block until every task posted before this call has executed.
    ///
    /// Used at shutdown and by tests to make the queue deterministic to
    /// observe.
    pub fn flush(&self) {
        let (tx, rx) = channel();
        self.schedule(move |_| {
            let _ = tx.send(());
        });
        let _ = rx.recv();
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Lock a mutex, carrying on with the inner value if a previous holder
/// panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn worker_thread(name: String, mut context: RobotContext, receiver: Receiver<Task>) {
    while let Ok(task) = receiver.recv() {
        task(&mut context);
    }

    debug!("Worker for robot [{}] exited", name);
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::test_context;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_tasks_run_in_order() {
        let worker = Worker::spawn(test_context());
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let order = order.clone();
            worker.schedule(move |_| order.lock().unwrap().push(i));
        }
        worker.flush();

        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
