//! Recalculating the stale results of one course.

use std::collections::BTreeSet;
use log::{debug, info, warn};
use crate::commons::EngineResult;
use crate::enrolment::manager::EnrolmentManager;
use crate::enrolment::types::{CourseId, UserId};
use super::mq::Task;


//------------ CourseCalculationJob ------------------------------------------

/// Walks the stale results of a course, one batch per run.
///
/// With `invalidated_only`, only results explicitly marked as invalidated
/// are recalculated. Otherwise results with an outdated version hash are
/// recalculated, too.
#[derive(Clone, Debug)]
pub struct CourseCalculationJob {
    course: CourseId,
    invalidated_only: bool,
    batch_size: usize,
    skipped: BTreeSet<UserId>,
    last_batch: usize,
}

impl CourseCalculationJob {
    pub fn new(course: CourseId, invalidated_only: bool, batch_size: usize) -> Self {
        CourseCalculationJob {
            course,
            invalidated_only,
            batch_size: batch_size.max(1),
            skipped: BTreeSet::new(),
            last_batch: 0,
        }
    }

    pub fn from_task(
        course: CourseId,
        invalidated_only: bool,
        batch_size: usize,
        skipped: &[UserId],
    ) -> Self {
        let mut job = Self::new(course, invalidated_only, batch_size);
        job.skipped.extend(skipped.iter().copied());
        job
    }

    pub fn to_task(&self) -> Task {
        Task::CourseCalculation {
            course: self.course,
            invalidated_only: self.invalidated_only,
            batch_size: self.batch_size,
            skipped: self.skipped.iter().copied().collect(),
        }
    }

    pub fn course(&self) -> CourseId {
        self.course
    }

    pub fn is_invalidated_only(&self) -> bool {
        self.invalidated_only
    }

    /// Processes one batch.
    ///
    /// Returns whether the batch was non-empty, i.e., whether the job
    /// should run again. Learners that fail are skipped in later runs.
    pub fn run(&mut self, manager: &EnrolmentManager) -> EngineResult<bool> {
        let version_hash = manager.registry().get_version_hash();
        let batch = manager.results().stale_in_course(
            self.course,
            &version_hash,
            self.invalidated_only,
            self.batch_size,
            &self.skipped,
        )?;
        self.last_batch = batch.len();

        let course = manager.course(self.course);
        for user in &batch {
            if let Err(err) = course.try_recalculate(*user) {
                warn!(
                    "Skipping learner {user} in calculation of course {}: {err}",
                    self.course
                );
                self.skipped.insert(*user);
            }
        }
        debug!(
            "Course calculation for {} processed {} learners",
            self.course, batch.len()
        );
        Ok(!batch.is_empty())
    }

    /// Records that the job completed under the current version hash.
    ///
    /// Skipped learners are handed over to the learner calculation, which
    /// the recurring check restarts since its marker is cleared.
    pub fn complete(&self, manager: &EnrolmentManager) -> EngineResult<()> {
        let name = Task::course_calculation_name(self.course);
        if self.skipped.is_empty() {
            let version_hash = manager.registry().get_version_hash();
            manager.markers().set_job_completed(&name, &version_hash)?;
            info!("Calculation of course {} completed", self.course);
            return Ok(())
        }
        manager.markers().clear_job_completed(&name)?;
        for user in &self.skipped {
            manager.markers().mark_learner_for_recalculation(*user)?;
        }
        manager.markers().clear_job_completed(
            &Task::learner_calculation_name()
        )?;
        warn!(
            "Calculation of course {} finished, {} learners failed and will \
             be retried",
            self.course, self.skipped.len()
        );
        Ok(())
    }

    pub fn last_batch(&self) -> usize {
        self.last_batch
    }

    pub fn skipped(&self) -> &BTreeSet<UserId> {
        &self.skipped
    }
}
