//! Markers recording which calculations are up to date.
//!
//! Learner markers hold the version hash a learner's enrolments were last
//! fully calculated under. Job markers hold the version hash a background
//! job last completed under. Removed learner flags force a learner out of
//! a course regardless of what the providers say.

use serde::{Deserialize, Serialize};
use url::Url;
use crate::commons::storage::{Key, KeyValueStore, Scope, Segment};
use crate::commons::timestamp::Timestamp;
use crate::commons::EngineResult;
use crate::constants::CALCULATIONS_NS;
use super::provider::CourseUser;
use super::types::UserId;


const LEARNERS: &str = "learners";
const JOBS: &str = "jobs";
const REMOVED: &str = "removed";


//------------ RemovedLearner ------------------------------------------------

/// Who removed a learner from a course and when.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RemovedLearner {
    pub time: Timestamp,
    pub reason: Option<String>,
}


//------------ CalculationMarkers --------------------------------------------

#[derive(Debug)]
pub struct CalculationMarkers {
    kv: KeyValueStore,
}

impl CalculationMarkers {
    pub fn create(storage_uri: &Url) -> EngineResult<Self> {
        Ok(CalculationMarkers {
            kv: KeyValueStore::create(storage_uri, CALCULATIONS_NS)?,
        })
    }

    fn learner_key(user: UserId) -> Key {
        Key::new_scoped(
            Scope::from_segment(Segment::parse_lossy(LEARNERS)),
            user.segment(),
        )
    }

    fn job_key(job: &Segment) -> Key {
        Key::new_scoped(
            Scope::from_segment(Segment::parse_lossy(JOBS)), job.clone()
        )
    }

    fn removed_key(user: CourseUser) -> Key {
        Key::new_scoped(
            Scope::new(vec![
                Segment::parse_lossy(REMOVED), user.course.segment()
            ]),
            user.user.segment(),
        )
    }
}

/// # Learner markers
impl CalculationMarkers {
    /// Returns the version hash of the learner's last full calculation.
    pub fn learner_version(&self, user: UserId) -> EngineResult<Option<String>> {
        match self.kv.get(&Self::learner_key(user)) {
            Ok(version) => Ok(version),
            Err(err) if err.is_corrupt_value() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn is_learner_stale(
        &self, user: UserId, version_hash: &str,
    ) -> EngineResult<bool> {
        Ok(self.learner_version(user)?.as_deref() != Some(version_hash))
    }

    pub fn set_learner_calculated(
        &self, user: UserId, version_hash: &str,
    ) -> EngineResult<()> {
        self.kv.store(&Self::learner_key(user), &version_hash)?;
        Ok(())
    }

    /// Clears the learner's marker so that the learner job picks it up.
    pub fn mark_learner_for_recalculation(&self, user: UserId) -> EngineResult<()> {
        self.kv.delete(&Self::learner_key(user))?;
        Ok(())
    }
}

/// # Job markers
impl CalculationMarkers {
    pub fn job_completed(&self, job: &Segment) -> EngineResult<Option<String>> {
        match self.kv.get(&Self::job_key(job)) {
            Ok(version) => Ok(version),
            Err(err) if err.is_corrupt_value() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn set_job_completed(
        &self, job: &Segment, version_hash: &str,
    ) -> EngineResult<()> {
        self.kv.store(&Self::job_key(job), &version_hash)?;
        Ok(())
    }

    pub fn clear_job_completed(&self, job: &Segment) -> EngineResult<()> {
        self.kv.delete(&Self::job_key(job))?;
        Ok(())
    }
}

/// # Removed learners
impl CalculationMarkers {
    pub fn removed_learner(
        &self, user: CourseUser,
    ) -> EngineResult<Option<RemovedLearner>> {
        match self.kv.get(&Self::removed_key(user)) {
            Ok(removed) => Ok(removed),
            Err(err) if err.is_corrupt_value() => {
                // Err on the side of keeping the learner out.
                Ok(Some(RemovedLearner { time: Timestamp::now(), reason: None }))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn is_learner_removed(&self, user: CourseUser) -> EngineResult<bool> {
        Ok(self.removed_learner(user)?.is_some())
    }

    pub fn set_learner_removed(
        &self, user: CourseUser, reason: Option<String>,
    ) -> EngineResult<()> {
        let removed = RemovedLearner { time: Timestamp::now(), reason };
        self.kv.store(&Self::removed_key(user), &removed)?;
        Ok(())
    }

    /// Returns whether the learner was removed.
    pub fn clear_learner_removed(&self, user: CourseUser) -> EngineResult<bool> {
        Ok(self.kv.delete(&Self::removed_key(user))?)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrolment::types::CourseId;
    use crate::test::mem_storage_uri;

    #[test]
    fn learner_markers() {
        let markers = CalculationMarkers::create(&mem_storage_uri()).unwrap();
        let user = UserId::new(5);
        assert!(markers.is_learner_stale(user, "h1").unwrap());
        markers.set_learner_calculated(user, "h1").unwrap();
        assert!(!markers.is_learner_stale(user, "h1").unwrap());
        assert!(markers.is_learner_stale(user, "h2").unwrap());
        markers.mark_learner_for_recalculation(user).unwrap();
        assert_eq!(markers.learner_version(user).unwrap(), None);
    }

    #[test]
    fn job_markers() {
        let markers = CalculationMarkers::create(&mem_storage_uri()).unwrap();
        let job = Segment::parse("learner_calculation").unwrap();
        assert_eq!(markers.job_completed(&job).unwrap(), None);
        markers.set_job_completed(&job, "h1").unwrap();
        assert_eq!(markers.job_completed(&job).unwrap().as_deref(), Some("h1"));
        markers.clear_job_completed(&job).unwrap();
        assert_eq!(markers.job_completed(&job).unwrap(), None);
    }

    #[test]
    fn removed_learners() {
        let markers = CalculationMarkers::create(&mem_storage_uri()).unwrap();
        let user = CourseUser::new(UserId::new(1), CourseId::new(2));
        assert!(!markers.is_learner_removed(user).unwrap());
        markers.set_learner_removed(user, Some("refund".into())).unwrap();
        assert!(markers.is_learner_removed(user).unwrap());
        assert_eq!(
            markers.removed_learner(user).unwrap().unwrap().reason.as_deref(),
            Some("refund")
        );
        assert!(markers.clear_learner_removed(user).unwrap());
        assert!(!markers.clear_learner_removed(user).unwrap());
    }
}
