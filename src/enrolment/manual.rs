//! The built-in manual enrolment provider.

use crate::commons::EngineResult;
use super::provider::{
    CourseUser, EnrolmentProvider, ProviderContext, ProviderError,
};
use super::types::{CourseId, ProviderId};
use super::value::StoredValue;


//------------ Constants -----------------------------------------------------

pub const MANUAL_PROVIDER_ID: &str = "manual";

const STATUS_KEY: &str = "enrolment_status";
const ENROLLED: &str = "enrolled";
const WITHDRAWN: &str = "withdrawn";


//------------ ManualProvider ------------------------------------------------

/// Enrolment granted or withdrawn explicitly by an administrator.
///
/// Handles every course. The verdict is kept in the provider's scratch
/// state.
#[derive(Debug, Default)]
pub struct ManualProvider;

impl ManualProvider {
    /// Grants access. Enrolling an enrolled learner changes nothing.
    pub fn enrol_learner(
        &self, ctx: &ProviderContext<'_>, user: CourseUser,
    ) -> EngineResult<bool> {
        self.set_status(ctx, user, ENROLLED)
    }

    /// Revokes access. Withdrawing a withdrawn learner changes nothing.
    pub fn withdraw_learner(
        &self, ctx: &ProviderContext<'_>, user: CourseUser,
    ) -> EngineResult<bool> {
        self.set_status(ctx, user, WITHDRAWN)
    }

    /// Returns the stored status, if any.
    pub fn status(
        &self, ctx: &ProviderContext<'_>, user: CourseUser,
    ) -> EngineResult<Option<String>> {
        Ok(ctx
            .get_stored_value(user, STATUS_KEY)?
            .as_str()
            .map(ToString::to_string))
    }

    fn set_status(
        &self, ctx: &ProviderContext<'_>, user: CourseUser, status: &str,
    ) -> EngineResult<bool> {
        if ctx.set_stored_value(user, STATUS_KEY, StoredValue::from(status))? {
            ctx.log_message(user, format!("Status set to {status}"))?;
        }
        Ok(true)
    }
}

impl EnrolmentProvider for ManualProvider {
    fn id(&self) -> ProviderId {
        ProviderId::from(MANUAL_PROVIDER_ID)
    }

    fn name(&self) -> String {
        "Manual".to_string()
    }

    fn version(&self) -> u64 {
        1
    }

    fn handles_enrolment(&self, _course: CourseId) -> bool {
        true
    }

    fn is_enrolled(
        &self, ctx: &ProviderContext<'_>, user: CourseUser,
    ) -> Result<bool, ProviderError> {
        Ok(self.status(ctx, user)?.as_deref() == Some(ENROLLED))
    }

    fn debug(
        &self, ctx: &ProviderContext<'_>, user: CourseUser,
    ) -> Vec<String> {
        match self.status(ctx, user) {
            Ok(Some(status)) => vec![format!("stored status: {status}")],
            Ok(None) => vec!["no stored status".to_string()],
            Err(err) => vec![format!("cannot read status: {err}")],
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrolment::state::ProviderStateStore;
    use crate::enrolment::types::UserId;
    use crate::test::mem_storage_uri;

    #[test]
    fn enrol_and_withdraw_are_idempotent() {
        let states = ProviderStateStore::create(&mem_storage_uri(), 30).unwrap();
        let manual = ManualProvider;
        let ctx = ProviderContext::new(manual.id(), &states);
        let user = CourseUser::new(UserId::new(1), CourseId::new(1));

        assert!(!manual.is_enrolled(&ctx, user).unwrap());
        assert!(manual.enrol_learner(&ctx, user).unwrap());
        assert!(manual.enrol_learner(&ctx, user).unwrap());
        assert!(manual.is_enrolled(&ctx, user).unwrap());

        assert!(manual.withdraw_learner(&ctx, user).unwrap());
        assert!(manual.withdraw_learner(&ctx, user).unwrap());
        assert!(!manual.is_enrolled(&ctx, user).unwrap());

        // Two changes, so two log messages.
        let set = states.load(user).unwrap();
        assert_eq!(set.state(&manual.id()).unwrap().logs().count(), 2);
    }
}
