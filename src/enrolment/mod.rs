//! Deciding and caching who is enrolled in which course.

pub use self::aggregator::CourseEnrolment;
pub use self::deferred::{DefaultDeferPolicy, DeferContext, DeferPolicy, NeverDefer};
pub use self::directory::{SiteDirectory, StaticDirectory};
pub use self::manager::{EnrolmentManager, UnitOfWork};
pub use self::manual::{ManualProvider, MANUAL_PROVIDER_ID};
pub use self::membership::{KvMembershipStore, MembershipStore};
pub use self::provider::{
    CourseUser, EnrolmentProvider, ProviderContext, ProviderError,
};
pub use self::registry::{
    NoExternalProviders, ProviderRegistry, ProviderRegistryBuilder,
    ProviderSource,
};
pub use self::result::EnrolmentResult;
pub use self::types::{CourseId, CourseStatus, ProviderId, UserId};
pub use self::value::{Scalar, StoredValue};

pub mod aggregator;
pub mod deferred;
pub mod directory;
pub mod journal;
pub mod manager;
pub mod manual;
pub mod markers;
pub mod membership;
pub mod provider;
pub mod registry;
pub mod result;
pub mod state;
pub mod types;
pub mod value;
