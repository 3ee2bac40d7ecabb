//! Combining provider verdicts for the learners of one course.

use std::collections::BTreeMap;
use log::{debug, trace, warn};
use crate::commons::error::Error;
use crate::commons::EngineResult;
use super::manager::EnrolmentManager;
use super::provider::{CourseUser, ProviderContext};
use super::result::EnrolmentResult;
use super::state::ProviderState;
use super::types::{CourseId, ProviderId, UserId};


//------------ CourseEnrolment -----------------------------------------------

/// Enrolment in a single course.
///
/// This is a cheap handle obtained through [`EnrolmentManager::course`].
#[derive(Clone, Copy, Debug)]
pub struct CourseEnrolment<'a> {
    course: CourseId,
    manager: &'a EnrolmentManager,
}

impl<'a> CourseEnrolment<'a> {
    pub(super) fn new(course: CourseId, manager: &'a EnrolmentManager) -> Self {
        CourseEnrolment { course, manager }
    }

    pub fn course(&self) -> CourseId {
        self.course
    }

    fn user(&self, user: UserId) -> CourseUser {
        CourseUser::new(user, self.course)
    }

    /// Returns whether the course is published.
    pub fn is_published(&self) -> bool {
        self.manager
            .directory()
            .course_status(self.course)
            .is_some_and(|status| status.is_published())
    }
}

/// # Verdicts
impl CourseEnrolment<'_> {
    /// Returns whether the learner is enrolled.
    ///
    /// A learner is never enrolled in an unpublished course. With
    /// `use_cache`, a stored result calculated under the current version
    /// hash is trusted and the membership store answers. Otherwise the
    /// providers are asked.
    ///
    /// Errors are logged and result in `false`.
    pub fn is_enrolled(&self, user: UserId, use_cache: bool) -> bool {
        if !self.is_published() {
            return false
        }
        let user = self.user(user);

        if use_cache {
            match self.cached_verdict(user) {
                Ok(Some(enrolled)) => {
                    trace!("Cached enrolment for {user}: {enrolled}");
                    return enrolled
                }
                Ok(None) => { }
                Err(err) => {
                    warn!("Cannot read cached enrolment for {user}: {err}");
                }
            }
        }
        self.recalculate(user)
    }

    fn cached_verdict(&self, user: CourseUser) -> EngineResult<Option<bool>> {
        let Some(result) = self.manager.results().get(user)? else {
            return Ok(None)
        };
        if !result.is_valid(&self.manager.registry().get_version_hash()) {
            return Ok(None)
        }
        Ok(Some(self.manager.membership().is_member(user)?))
    }

    /// Asks the providers again, regardless of any cached result.
    ///
    /// Errors are logged and result in `false`.
    pub fn recalculate_enrolment(&self, user: UserId) -> bool {
        self.recalculate(self.user(user))
    }

    fn recalculate(&self, user: CourseUser) -> bool {
        match self.calculate(user) {
            Ok(enrolled) => enrolled,
            Err(err) => {
                warn!("Enrolment check for {user} failed: {err}");
                false
            }
        }
    }

    /// Asks the providers again and returns errors.
    pub fn try_recalculate(&self, user: UserId) -> EngineResult<bool> {
        self.calculate(self.user(user))
    }

    fn calculate(&self, user: CourseUser) -> EngineResult<bool> {
        let manager = self.manager;
        manager.deferred().remove(user);

        let version_hash = manager.registry().get_version_hash();
        let previous = manager.results().get(user)?;

        let mut provider_results = BTreeMap::new();
        for provider in manager.registry().handling(self.course) {
            let id = provider.id();
            let ctx = ProviderContext::new(id.clone(), manager.states());
            match provider.is_enrolled(&ctx, user) {
                Ok(enrolled) => {
                    provider_results.insert(id, enrolled);
                }
                Err(err) => {
                    self.journal_log(&id, user, &format!(
                        "Enrolment check failed: {err}"
                    ));
                    return Err(Error::provider(&id, err))
                }
            }
        }

        let removed = manager.markers().is_learner_removed(user)?;
        let result = EnrolmentResult::new(provider_results, version_hash, removed);
        let enrolled = self.is_published() && result.is_enrolled();

        manager.results().save(user, &result)?;
        manager.membership().set(user, enrolled)?;
        manager.count_calculation();

        for (id, status) in result.provider_results() {
            if let Err(err) = manager.journals().update_enrolment_status(
                id, user, *status
            ) {
                warn!("Cannot journal status of {id} for {user}: {err}");
            }
        }
        if let Some(previous) = previous {
            for id in previous.provider_results().keys() {
                if result.provider_results().contains_key(id) {
                    continue
                }
                if let Err(err) = manager.journals().delete_enrolment_status(
                    id, user
                ) {
                    warn!("Cannot journal status of {id} for {user}: {err}");
                }
            }
        }

        debug!("Calculated enrolment for {user}: {enrolled}");
        Ok(enrolled)
    }

    fn journal_log(&self, provider: &ProviderId, user: CourseUser, msg: &str) {
        if let Err(err) = self.manager.journals().add_log_message(
            provider, user, msg
        ) {
            warn!("Cannot journal message of {provider} for {user}: {err}");
        }
    }
}

/// # Cached results
impl CourseEnrolment<'_> {
    pub fn get_enrolment_result(
        &self, user: UserId,
    ) -> EngineResult<Option<EnrolmentResult>> {
        self.manager.results().get(self.user(user))
    }

    /// Marks the learner's cached result as needing recalculation.
    pub fn invalidate_learner_result(&self, user: UserId) -> EngineResult<()> {
        self.manager.results().invalidate(self.user(user))
    }

    /// Marks all cached results of the course as needing recalculation.
    pub fn invalidate_all_learner_results(&self) -> EngineResult<usize> {
        self.manager.results().invalidate_course(self.course)
    }

    /// Returns the learners currently enrolled according to the membership
    /// store.
    pub fn get_enrolled_learners(&self) -> EngineResult<Vec<UserId>> {
        self.manager.membership().members(self.course)
    }
}

/// # Removed learners
impl CourseEnrolment<'_> {
    /// Removes the learner from the course regardless of the providers.
    ///
    /// Returns whether the learner was enrolled before.
    pub fn remove_learner(
        &self, user: UserId, reason: Option<String>,
    ) -> EngineResult<bool> {
        let was_enrolled = self.manager.membership().is_member(self.user(user))?;
        self.manager.markers().set_learner_removed(self.user(user), reason)?;
        self.try_recalculate(user)?;
        Ok(was_enrolled)
    }

    /// Undoes [`remove_learner`](Self::remove_learner).
    ///
    /// Returns whether the learner is enrolled now.
    pub fn restore_learner(&self, user: UserId) -> EngineResult<bool> {
        self.manager.markers().clear_learner_removed(self.user(user))?;
        self.try_recalculate(user)
    }

    pub fn is_learner_removed(&self, user: UserId) -> EngineResult<bool> {
        self.manager.markers().is_learner_removed(self.user(user))
    }
}

/// # Provider state
impl CourseEnrolment<'_> {
    /// Runs `op` on a provider's scratch state for the learner.
    pub fn with_provider_state<F, T>(
        &self, provider: &ProviderId, user: UserId, op: F,
    ) -> EngineResult<T>
    where
        F: FnOnce(&mut ProviderState) -> T,
    {
        if self.manager.registry().get_by_id(provider).is_none() {
            return Err(Error::UnknownProvider(provider.clone()))
        }
        self.manager.states().with_state(self.user(user), provider, op)
    }

    /// Returns a copy of a provider's scratch state for the learner.
    pub fn get_provider_state(
        &self, provider: &ProviderId, user: UserId,
    ) -> EngineResult<ProviderState> {
        self.with_provider_state(provider, user, |state| state.clone())
    }
}
