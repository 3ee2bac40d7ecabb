//! Running background jobs from the task queue.

use std::time::Duration;
use log::{debug, error, info, warn};
use url::Url;
use crate::commons::error::Error;
use crate::commons::EngineResult;
use crate::config::JobsConfig;
use crate::enrolment::manager::EnrolmentManager;
use crate::enrolment::types::CourseId;
use super::course::CourseCalculationJob;
use super::learner::LearnerCalculationJob;
use super::mq::{JobTransport, QueuedTask, Task, TaskQueue};


//------------ JobOutcome ----------------------------------------------------

/// What happened to a task taken off the queue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobOutcome {
    /// The task did some work and will run again.
    Rescheduled(Task),

    /// The task found nothing more to do.
    Completed(Task),

    /// The task failed and will be retried after the retry delay.
    Failed(Task),

    /// The task was cancelled or replaced while it ran. Its follow-up
    /// was dropped.
    Superseded(Task),

    /// The queued value could not be understood and was dropped.
    Invalid,
}

enum Step {
    Again(Task),
    Done,
}


//------------ JobScheduler --------------------------------------------------

#[derive(Debug)]
pub struct JobScheduler {
    queue: TaskQueue,
    learner_batch_size: usize,
    course_batch_size: usize,
    recheck_interval: Duration,
    retry_delay: Duration,
    reschedule_after: Duration,
}

impl JobScheduler {
    pub fn new(storage_uri: &Url, config: &JobsConfig) -> EngineResult<Self> {
        Ok(JobScheduler {
            queue: TaskQueue::new(storage_uri)?,
            learner_batch_size: config.learner_batch_size,
            course_batch_size: config.course_batch_size,
            recheck_interval: Duration::from_secs(config.recheck_interval_seconds),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            reschedule_after: Duration::from_secs(config.reschedule_after_seconds),
        })
    }

    pub fn transport(&self) -> &dyn JobTransport {
        &self.queue
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }
}

/// # Starting jobs
impl JobScheduler {
    /// Starts the learner calculation from scratch.
    pub fn start_learner_calculation(&self) -> EngineResult<()> {
        let task = LearnerCalculationJob::new(self.learner_batch_size).to_task();
        debug!("Scheduling task: {task}");
        self.transport().schedule_once(&task, None)
    }

    /// Starts the calculation of a course.
    ///
    /// A job already pending or running for the course is cancelled first.
    /// If it covered all stale results, so does the new one.
    pub fn start_course_calculation(
        &self, course: CourseId, invalidated_only: bool,
    ) -> EngineResult<()> {
        let name = Task::course_calculation_name(course);
        let mut invalidated_only = invalidated_only;
        let existing = [
            self.transport().pending(&name)?,
            self.transport().running(&name)?,
        ];
        for queued in existing.into_iter().flatten() {
            if let Task::CourseCalculation {
                invalidated_only: existing_only, ..
            } = queued.task {
                invalidated_only = invalidated_only && existing_only;
            }
        }
        if self.transport().cancel(&name)? {
            debug!("Cancelled existing calculation of course {course}");
        }
        let task = CourseCalculationJob::new(
            course, invalidated_only, self.course_batch_size
        ).to_task();
        debug!("Scheduling task: {task}");
        self.transport().schedule_once(&task, None)
    }

    /// Makes sure the recurring check for stale calculations is queued.
    pub fn start_recurring_checks(&self) -> EngineResult<()> {
        self.transport().schedule_recurring(
            &Task::EnsureCalculations, self.recheck_interval
        )
    }
}

/// # Running jobs
impl JobScheduler {
    /// Runs the next due task, if any.
    pub fn run_next(
        &self, manager: &EnrolmentManager,
    ) -> EngineResult<Option<JobOutcome>> {
        let Some(running) = self.queue.pop() else {
            return Ok(None)
        };

        let queued: QueuedTask = match serde_json::from_value(running.value) {
            Ok(queued) => queued,
            Err(err) => {
                let err = Error::InvalidTask(err.to_string());
                error!("Dropping task {}: {err}", running.key);
                self.queue.finish(&running.key)?;
                return Ok(Some(JobOutcome::Invalid))
            }
        };
        let task = queued.task.clone();
        debug!("Running task: {task}");

        let res = {
            let _job = manager.enter_background_job();
            self.execute(&task, manager)
        };
        if !manager.persist_all() {
            warn!("Not all state could be saved after task: {task}");
        }
        manager.clear_cache();

        if !self.queue.is_running(&running.key)? {
            info!("Task '{task}' was replaced while it ran, dropping its follow-up");
            return Ok(Some(JobOutcome::Superseded(task)))
        }

        match res {
            Ok(Step::Again(next)) => {
                let follow_up = QueuedTask { task: next, ..queued };
                self.queue.follow_up(&follow_up, None)?;
                Ok(Some(JobOutcome::Rescheduled(task)))
            }
            Ok(Step::Done) => {
                match queued.recurring_seconds {
                    Some(seconds) => {
                        self.queue.follow_up(
                            &queued, Some(Duration::from_secs(seconds))
                        )?;
                    }
                    None => self.queue.finish(&running.key)?,
                }
                Ok(Some(JobOutcome::Completed(task)))
            }
            Err(err) => {
                error!(
                    "Task '{task}' failed, will retry in {}s: {err}",
                    self.retry_delay.as_secs()
                );
                self.queue.reschedule(&running.key, self.retry_delay)?;
                Ok(Some(JobOutcome::Failed(task)))
            }
        }
    }

    /// Runs tasks until none are due or `max_runs` is reached.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(
        &self, manager: &EnrolmentManager, max_runs: Option<usize>,
    ) -> EngineResult<usize> {
        let rescheduled = self.queue.reschedule_long_running(self.reschedule_after)?;
        if rescheduled > 0 {
            warn!("Rescheduled {rescheduled} tasks that did not finish");
        }

        let mut runs = 0;
        while max_runs.is_none_or(|max| runs < max) {
            if self.run_next(manager)?.is_none() {
                break
            }
            runs += 1;
        }
        if runs > 0 {
            info!("Ran {runs} background tasks");
        }
        Ok(runs)
    }

    fn execute(
        &self, task: &Task, manager: &EnrolmentManager,
    ) -> EngineResult<Step> {
        match task {
            Task::LearnerCalculation { batch_size, skipped } => {
                let mut job = LearnerCalculationJob::from_task(
                    *batch_size, skipped
                );
                if job.run(manager)? {
                    Ok(Step::Again(job.to_task()))
                }
                else {
                    job.complete(manager)?;
                    Ok(Step::Done)
                }
            }
            Task::CourseCalculation {
                course, invalidated_only, batch_size, skipped
            } => {
                let mut job = CourseCalculationJob::from_task(
                    *course, *invalidated_only, *batch_size, skipped
                );
                if job.run(manager)? {
                    Ok(Step::Again(job.to_task()))
                }
                else {
                    job.complete(manager)?;
                    Ok(Step::Done)
                }
            }
            Task::EnsureCalculations => {
                manager.ensure_calculations_current()?;
                Ok(Step::Done)
            }
        }
    }
}
