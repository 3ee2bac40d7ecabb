//! The tasks of background jobs and the queue they wait in.

use std::fmt;
use std::time::Duration;
use log::{error, trace};
use serde::{Deserialize, Serialize};
use url::Url;
use crate::commons::error::Error;
use crate::commons::queue::{self, Queue, RunningTask, ScheduleMode};
use crate::commons::storage::{Key, Segment};
use crate::commons::EngineResult;
use crate::constants::TASK_QUEUE_NS;
use crate::enrolment::types::{CourseId, UserId};


//------------ Task ---------------------------------------------------------

/// The background work the engine knows how to do.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    /// Recalculates the enrolments of all learners whose calculation
    /// marker does not match the current version hash.
    LearnerCalculation {
        batch_size: usize,
        #[serde(default)]
        skipped: Vec<UserId>,
    },

    /// Recalculates the stale results of one course.
    CourseCalculation {
        course: CourseId,
        #[serde(default)]
        invalidated_only: bool,
        batch_size: usize,
        #[serde(default)]
        skipped: Vec<UserId>,
    },

    /// Starts the learner calculation if it has not completed under the
    /// current version hash.
    EnsureCalculations,
}

impl Task {
    pub fn learner_calculation_name() -> Segment {
        Segment::parse_lossy("learner_calculation")
    }

    pub fn course_calculation_name(course: CourseId) -> Segment {
        Segment::with_id("course_calculation", course)
    }

    pub fn ensure_calculations_name() -> Segment {
        Segment::parse_lossy("ensure_calculations")
    }

    /// Returns the name of the task.
    ///
    /// There is at most one task with a given name in the queue.
    pub fn name(&self) -> Segment {
        match self {
            Task::LearnerCalculation { .. } => Self::learner_calculation_name(),
            Task::CourseCalculation { course, .. } => {
                Self::course_calculation_name(*course)
            }
            Task::EnsureCalculations => Self::ensure_calculations_name(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Task::LearnerCalculation { .. } => {
                write!(f, "recalculate stale learner enrolments")
            }
            Task::CourseCalculation { course, invalidated_only, .. } => {
                if *invalidated_only {
                    write!(f, "recalculate invalidated enrolments in course {course}")
                }
                else {
                    write!(f, "recalculate stale enrolments in course {course}")
                }
            }
            Task::EnsureCalculations => {
                write!(f, "verify that learner calculations are current")
            }
        }
    }
}


//------------ QueuedTask ----------------------------------------------------

/// A task as kept in the queue.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct QueuedTask {
    pub task: Task,

    /// If set, the task runs again this many seconds after it completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_seconds: Option<u64>,
}


//------------ JobTransport --------------------------------------------------

/// Delivers named background jobs at least once.
pub trait JobTransport: fmt::Debug {
    /// Schedules the task to run once, replacing a pending task by the
    /// same name.
    fn schedule_once(&self, task: &Task, delay: Option<Duration>) -> EngineResult<()>;

    /// Schedules the task to run now and again every `interval` after it
    /// completed. Nothing happens if the task is already scheduled.
    fn schedule_recurring(&self, task: &Task, interval: Duration) -> EngineResult<()>;

    /// Removes the named task. Returns whether there was one.
    fn cancel(&self, name: &Segment) -> EngineResult<bool>;

    /// Returns the pending task by that name, if any.
    fn pending(&self, name: &Segment) -> EngineResult<Option<QueuedTask>>;

    /// Returns the task by that name that is currently running, if any.
    fn running(&self, name: &Segment) -> EngineResult<Option<QueuedTask>>;
}


//------------ TaskQueue ----------------------------------------------------

#[derive(Debug)]
pub struct TaskQueue {
    q: Queue,
}

impl TaskQueue {
    pub fn new(storage_uri: &Url) -> EngineResult<Self> {
        Ok(TaskQueue {
            q: Queue::create(storage_uri, TASK_QUEUE_NS)?,
        })
    }

    fn schedule_task(
        &self,
        queued: &QueuedTask,
        delay: Option<Duration>,
        mode: ScheduleMode,
    ) -> EngineResult<()> {
        let value = serde_json::to_value(queued)?;
        let at = delay.map(|delay| queue::now() + delay.as_millis());
        self.q.schedule_task(&queued.task.name(), &value, at, mode)?;
        Ok(())
    }

    /// Takes the next due task off the queue, if any.
    ///
    /// Errors are logged and treated as an empty queue.
    pub fn pop(&self) -> Option<RunningTask> {
        trace!("Try to get a task off the queue");
        match self.q.claim_scheduled_pending_task() {
            Err(e) => {
                error!("Could not get pending task from queue: {e}");
                None
            }
            Ok(None) => {
                trace!("No pending task found.");
                None
            }
            Ok(Some(task)) => {
                trace!("found task: {}", task.key);
                Some(task)
            }
        }
    }

    /// Finishes a running task and schedules its follow-up in one go.
    ///
    /// A pending task by the same name is replaced.
    pub fn follow_up(
        &self, queued: &QueuedTask, delay: Option<Duration>,
    ) -> EngineResult<()> {
        self.schedule_task(queued, delay, ScheduleMode::FinishOrReplaceExisting)
    }

    /// Returns whether the claimed task is still running.
    ///
    /// A task that was cancelled or replaced while it ran is not.
    pub fn is_running(&self, running: &Key) -> EngineResult<bool> {
        Ok(self.q.is_running_task(running)?)
    }

    pub fn finish(&self, running: &Key) -> EngineResult<()> {
        self.q.finish_running_task(running).map_err(Error::from)
    }

    /// Puts a running task back for another try after `delay`.
    pub fn reschedule(&self, running: &Key, delay: Duration) -> EngineResult<()> {
        self.q
            .reschedule_running_task(
                running, Some(queue::now() + delay.as_millis())
            )
            .map_err(Error::from)
    }

    /// Reschedules tasks that were claimed but never finished.
    pub fn reschedule_long_running(&self, after: Duration) -> EngineResult<usize> {
        Ok(self.q.reschedule_long_running_tasks(Some(&after))?)
    }

    pub fn pending_count(&self) -> EngineResult<usize> {
        Ok(self.q.pending_tasks_remaining()?)
    }

    pub fn running_count(&self) -> EngineResult<usize> {
        Ok(self.q.running_tasks_remaining()?)
    }

    pub fn pending_scheduled(&self, name: &Segment) -> EngineResult<Option<u128>> {
        Ok(self.q.pending_task_scheduled(name)?)
    }
}

impl JobTransport for TaskQueue {
    fn schedule_once(&self, task: &Task, delay: Option<Duration>) -> EngineResult<()> {
        let queued = QueuedTask { task: task.clone(), recurring_seconds: None };
        self.schedule_task(&queued, delay, ScheduleMode::ReplaceExisting)
    }

    fn schedule_recurring(&self, task: &Task, interval: Duration) -> EngineResult<()> {
        let queued = QueuedTask {
            task: task.clone(),
            recurring_seconds: Some(interval.as_secs().max(1)),
        };
        self.schedule_task(&queued, None, ScheduleMode::IfMissing)
    }

    fn cancel(&self, name: &Segment) -> EngineResult<bool> {
        Ok(self.q.cancel_task(name)?)
    }

    fn pending(&self, name: &Segment) -> EngineResult<Option<QueuedTask>> {
        match self.q.pending_task_value(name)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn running(&self, name: &Segment) -> EngineResult<Option<QueuedTask>> {
        match self.q.running_task_value(name)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}


//============ Tests =========================================================
