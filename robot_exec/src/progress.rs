//! # Progress tracking
//!
//! A [`ProgressTracker`] drives an ordered queue of command executions:
//! each command's continuation is wired to advance the tracker, and a
//! single completion trigger fires exactly once when the queue drains.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex};

use crate::command::{ActivityIdentifier, CommandExecution};
use crate::worker::lock;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A callback that fires at most once, no matter how often it is
/// triggered.
#[derive(Default)]
pub struct TriggerOnce {
    trigger: Option<Box<dyn FnOnce() + Send>>,
}

/// Sequences a queue of commands, firing one completion trigger when all of
/// them have finished.
///
/// The queue is stored in reverse so the next command pops off the back in
/// O(1). The tracker holds no timers; progress is advanced entirely by
/// driver completion callbacks.
pub struct ProgressTracker {
    reverse_queue: Vec<CommandExecution>,
    current_identifier: Option<Arc<ActivityIdentifier>>,
    finished: TriggerOnce,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

enum Advance {
    Begin(CommandExecution),
    Done(TriggerOnce),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TriggerOnce {
    pub fn new(trigger: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            trigger: Some(trigger),
        }
    }

    /// Fire the callback if it hasn't fired yet.
    pub fn trigger(&mut self) {
        if let Some(trigger) = self.trigger.take() {
            trigger();
        }
    }
}

impl ProgressTracker {
    /// Wrap a queue of commands. Call [`ProgressTracker::next`] to start.
    pub fn make(
        mut queue: Vec<CommandExecution>,
        finished: Box<dyn FnOnce() + Send>,
    ) -> Arc<Mutex<Self>> {
        queue.reverse();
        Arc::new(Mutex::new(Self {
            reverse_queue: queue,
            current_identifier: None,
            finished: TriggerOnce::new(finished),
        }))
    }

    /// Advance to the next command, or fire the completion trigger if none
    /// remain. An empty queue completes immediately.
    pub fn next(tracker: &Arc<Mutex<Self>>) {
        let advance = {
            let mut guard = lock(tracker);
            match guard.reverse_queue.pop() {
                Some(command) => {
                    guard.current_identifier = Some(command.identifier());
                    Advance::Begin(command)
                }
                None => {
                    guard.current_identifier = None;
                    // Take the trigger out so it fires outside the lock;
                    // the completion callback may start a new path
                    Advance::Done(std::mem::take(&mut guard.finished))
                }
            }
        };

        match advance {
            Advance::Begin(command) => {
                let tracker = Arc::downgrade(tracker);
                command.set_finisher(Box::new(move || {
                    // A dead tracker means this path was superseded; the
                    // finished command simply goes nowhere
                    if let Some(tracker) = tracker.upgrade() {
                        ProgressTracker::next(&tracker);
                    }
                }));
                command.begin();
            }
            Advance::Done(mut finished) => finished.trigger(),
        }
    }

    /// Identifier of the command currently handed to the driver.
    pub fn current_identifier(&self) -> Option<Arc<ActivityIdentifier>> {
        self.current_identifier.clone()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::command::CommandData;
    use crate::context::test_context;
    use crate::nav_params::NavParams;
    use crate::worker::Worker;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn command(worker: &Worker, index: usize, begun: Arc<Mutex<Vec<usize>>>) -> CommandExecution {
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
            Box::new(move |execution| {
                begun.lock().unwrap().push(index);
                // The simulated driver completes the motion instantly
                execution.finished();
            }),
        )
    }

    #[test]
    fn test_queue_runs_commands_in_order() {
        let worker = Worker::spawn(test_context());
        let begun = Arc::new(Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = channel();

        let queue = (0..5).map(|i| command(&worker, i, begun.clone())).collect();
        let counter = completions.clone();
        let tracker = ProgressTracker::make(
            queue,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            }),
        );
        ProgressTracker::next(&tracker);

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        worker.flush();

        assert_eq!(*begun.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_queue_completes_immediately() {
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        let tracker = ProgressTracker::make(
            Vec::new(),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        ProgressTracker::next(&tracker);
        assert_eq!(completions.load(Ordering::SeqCst), 1);

        // Advancing an exhausted tracker never re-fires the trigger
        ProgressTracker::next(&tracker);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_superseded_tracker_does_not_advance() {
        let worker = Worker::spawn(test_context());
        let begun = Arc::new(Mutex::new(Vec::new()));
        let completions = Arc::new(AtomicUsize::new(0));

        // A driver that holds onto the command instead of finishing it
        let held = Arc::new(Mutex::new(None));
        let holder = held.clone();
        let cmd = CommandExecution::make(
            &worker,
            CommandData {
                waypoints: Vec::new(),
                lanes: Vec::new(),
                final_orientation: None,
                schedule_override: None,
                nav_params: Arc::new(NavParams::default()),
                arrival_estimator: Box::new(|_, _| ()),
            },
            Box::new(move |execution| {
                *holder.lock().unwrap() = Some(execution);
            }),
        );
        let second = command(&worker, 1, begun.clone());

        let counter = completions.clone();
        let tracker = ProgressTracker::make(
            vec![cmd, second],
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        ProgressTracker::next(&tracker);

        // Supersede the path: the tracker is dropped while the first
        // command is still with the driver
        drop(tracker);

        let execution = held.lock().unwrap().take().unwrap();
        execution.finished();
        worker.flush();

        // The finished command went nowhere: no second command, no trigger
        assert!(begun.lock().unwrap().is_empty());
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }
}
