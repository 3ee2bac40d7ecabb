//! The interface of enrolment providers.

use std::fmt;
use crate::commons::error::Error;
use crate::commons::EngineResult;
use super::state::{ProviderState, ProviderStateStore};
use super::types::{CourseId, ProviderId, UserId};
use super::value::StoredValue;


//------------ EnrolmentProvider ---------------------------------------------

/// A rule deciding whether a learner is enrolled in a course.
///
/// Providers are registered once per process and must be immutable. Any
/// data they need to keep per learner and course goes into their scratch
/// state, which is reachable through the [`ProviderContext`].
pub trait EnrolmentProvider: fmt::Debug {
    /// The unique identifier of the provider.
    fn id(&self) -> ProviderId;

    /// A human readable name.
    fn name(&self) -> String;

    /// The version of the provider's logic.
    ///
    /// Changing the version invalidates all cached enrolment results.
    fn version(&self) -> u64;

    /// Returns whether the provider has a say for the given course.
    fn handles_enrolment(&self, course: CourseId) -> bool;

    /// Returns whether the learner is enrolled in the course.
    fn is_enrolled(
        &self,
        ctx: &ProviderContext<'_>,
        user: CourseUser,
    ) -> Result<bool, ProviderError>;

    /// Returns lines of diagnostic information for the learner.
    fn debug(
        &self,
        _ctx: &ProviderContext<'_>,
        _user: CourseUser,
    ) -> Vec<String> {
        Vec::new()
    }
}


//------------ CourseUser ----------------------------------------------------

/// A learner in a course.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CourseUser {
    pub user: UserId,
    pub course: CourseId,
}

impl CourseUser {
    pub fn new(user: UserId, course: CourseId) -> Self {
        CourseUser { user, course }
    }
}

impl fmt::Display for CourseUser {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "user {} in course {}", self.user, self.course)
    }
}


//------------ ProviderContext -----------------------------------------------

/// Access to a provider's scratch state.
pub struct ProviderContext<'a> {
    provider: ProviderId,
    states: &'a ProviderStateStore,
}

impl<'a> ProviderContext<'a> {
    pub fn new(provider: ProviderId, states: &'a ProviderStateStore) -> Self {
        ProviderContext { provider, states }
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    /// Runs `op` on the provider's state for the learner.
    ///
    /// Changes are persisted at the end of the unit of work.
    pub fn with_state<F, T>(&self, user: CourseUser, op: F) -> EngineResult<T>
    where
        F: FnOnce(&mut ProviderState) -> T,
    {
        self.states.with_state(user, &self.provider, op)
    }

    pub fn get_stored_value(
        &self, user: CourseUser, key: &str,
    ) -> EngineResult<StoredValue> {
        self.with_state(user, |state| state.get_stored_value(key))
    }

    /// Sets a value. Returns whether the value changed.
    pub fn set_stored_value(
        &self, user: CourseUser, key: &str, value: StoredValue,
    ) -> EngineResult<bool> {
        self.with_state(user, |state| state.set_stored_value(key, value))
    }

    pub fn log_message(
        &self, user: CourseUser, message: impl Into<String>,
    ) -> EngineResult<()> {
        let message = message.into();
        self.with_state(user, |state| state.log_message(message))
    }
}


//------------ ProviderError -------------------------------------------------

/// A provider failed to reach a verdict.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderError(String);

impl ProviderError {
    pub fn new(reason: impl fmt::Display) -> Self {
        ProviderError(reason.to_string())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

impl From<Error> for ProviderError {
    fn from(err: Error) -> Self {
        ProviderError(err.to_string())
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ProviderError {}
