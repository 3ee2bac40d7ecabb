//! Recalculating the enrolments of all learners.

use std::collections::BTreeSet;
use log::{debug, info, warn};
use crate::commons::EngineResult;
use crate::enrolment::manager::EnrolmentManager;
use crate::enrolment::types::UserId;
use super::mq::Task;


//------------ LearnerCalculationJob -----------------------------------------

/// Walks all learners whose calculation marker does not match the current
/// version hash, one batch per run.
#[derive(Clone, Debug)]
pub struct LearnerCalculationJob {
    batch_size: usize,
    skipped: BTreeSet<UserId>,
    last_batch: usize,
}

impl LearnerCalculationJob {
    pub fn new(batch_size: usize) -> Self {
        LearnerCalculationJob {
            batch_size: batch_size.max(1),
            skipped: BTreeSet::new(),
            last_batch: 0,
        }
    }

    pub fn from_task(batch_size: usize, skipped: &[UserId]) -> Self {
        let mut job = Self::new(batch_size);
        job.skipped.extend(skipped.iter().copied());
        job
    }

    pub fn to_task(&self) -> Task {
        Task::LearnerCalculation {
            batch_size: self.batch_size,
            skipped: self.skipped.iter().copied().collect(),
        }
    }

    /// Returns the learners of the next batch.
    pub fn next_batch(
        &self, manager: &EnrolmentManager,
    ) -> EngineResult<Vec<UserId>> {
        let version_hash = manager.registry().get_version_hash();
        let mut batch = Vec::new();
        for user in manager.directory().learner_ids() {
            if batch.len() >= self.batch_size {
                break
            }
            if self.skipped.contains(&user) {
                continue
            }
            if manager.markers().is_learner_stale(user, &version_hash)? {
                batch.push(user);
            }
        }
        Ok(batch)
    }

    /// Processes one batch.
    ///
    /// Returns whether the batch was non-empty, i.e., whether the job
    /// should run again. Learners that fail are skipped in later runs.
    pub fn run(&mut self, manager: &EnrolmentManager) -> EngineResult<bool> {
        let batch = self.next_batch(manager)?;
        self.last_batch = batch.len();
        for user in &batch {
            if let Err(err) = manager.recalculate_enrolments(*user) {
                warn!("Skipping learner {user} in learner calculation: {err}");
                self.skipped.insert(*user);
            }
        }
        debug!("Learner calculation processed {} learners", batch.len());
        Ok(!batch.is_empty())
    }

    /// Records that the job completed under the current version hash.
    ///
    /// If learners were skipped, the job has not converged and the marker
    /// is cleared instead, so the recurring check starts it again.
    pub fn complete(&self, manager: &EnrolmentManager) -> EngineResult<()> {
        let name = Task::learner_calculation_name();
        if self.skipped.is_empty() {
            let version_hash = manager.registry().get_version_hash();
            manager.markers().set_job_completed(&name, &version_hash)?;
            info!("Learner calculation completed");
        }
        else {
            manager.markers().clear_job_completed(&name)?;
            warn!(
                "Learner calculation finished, {} learners failed and will \
                 be retried",
                self.skipped.len()
            );
        }
        Ok(())
    }

    /// The number of learners processed in the last run.
    pub fn last_batch(&self) -> usize {
        self.last_batch
    }

    pub fn skipped(&self) -> &BTreeSet<UserId> {
        &self.skipped
    }
}
