//! The registry of enrolment providers.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use log::debug;
use sha2::{Digest, Sha256};
use super::manual::{ManualProvider, MANUAL_PROVIDER_ID};
use super::provider::EnrolmentProvider;
use super::types::{CourseId, ProviderId};


//------------ ProviderSource ------------------------------------------------

/// Supplies the providers registered in addition to the manual provider.
///
/// The source is consulted exactly once, when the registry is built.
pub trait ProviderSource {
    fn providers(&self) -> Vec<Arc<dyn EnrolmentProvider>>;
}

impl<F> ProviderSource for F
where
    F: Fn() -> Vec<Arc<dyn EnrolmentProvider>>,
{
    fn providers(&self) -> Vec<Arc<dyn EnrolmentProvider>> {
        self()
    }
}

/// A source without any providers.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoExternalProviders;

impl ProviderSource for NoExternalProviders {
    fn providers(&self) -> Vec<Arc<dyn EnrolmentProvider>> {
        Vec::new()
    }
}


//------------ ProviderRegistryBuilder ---------------------------------------

/// Collects providers before the registry can be used.
pub struct ProviderRegistryBuilder {
    providers: BTreeMap<ProviderId, Arc<dyn EnrolmentProvider>>,
    manual: Arc<ManualProvider>,
}

impl Default for ProviderRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistryBuilder {
    /// Creates a builder with the manual provider registered.
    pub fn new() -> Self {
        let manual = Arc::new(ManualProvider);
        let mut providers = BTreeMap::new();
        providers.insert(
            ProviderId::from(MANUAL_PROVIDER_ID),
            manual.clone() as Arc<dyn EnrolmentProvider>,
        );
        ProviderRegistryBuilder { providers, manual }
    }

    /// Registers a provider. A later provider with the same id wins.
    pub fn register(&mut self, provider: Arc<dyn EnrolmentProvider>) -> &mut Self {
        let id = provider.id();
        if self.providers.insert(id.clone(), provider).is_some() {
            debug!("Replaced enrolment provider '{id}'");
        }
        self
    }

    /// Registers all providers of the source.
    pub fn register_source(&mut self, source: &dyn ProviderSource) -> &mut Self {
        for provider in source.providers() {
            self.register(provider);
        }
        self
    }

    /// Freezes the set of providers.
    pub fn collect(self, site_salt: impl Into<String>) -> ProviderRegistry {
        ProviderRegistry {
            providers: self.providers,
            manual: self.manual,
            site_salt: RefCell::new(site_salt.into()),
            version_hash: RefCell::new(None),
        }
    }
}


//------------ ProviderRegistry ----------------------------------------------

/// All enrolment providers known to the process.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderId, Arc<dyn EnrolmentProvider>>,
    manual: Arc<ManualProvider>,
    site_salt: RefCell<String>,
    version_hash: RefCell<Option<String>>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::new()
    }

    /// Returns all providers ordered by id.
    pub fn get_all(&self) -> impl Iterator<Item = &Arc<dyn EnrolmentProvider>> {
        self.providers.values()
    }

    pub fn get_by_id(&self, id: &ProviderId) -> Option<&Arc<dyn EnrolmentProvider>> {
        self.providers.get(id)
    }

    /// Returns the manual provider unless it was replaced.
    pub fn get_manual_provider(&self) -> Option<&ManualProvider> {
        let registered = self.providers.get(&ProviderId::from(MANUAL_PROVIDER_ID))?;
        if std::ptr::addr_eq(Arc::as_ptr(registered), Arc::as_ptr(&self.manual)) {
            Some(&self.manual)
        }
        else {
            None
        }
    }

    /// Returns the providers that have a say for the course.
    pub fn handling(&self, course: CourseId) -> Vec<&Arc<dyn EnrolmentProvider>> {
        self.providers
            .values()
            .filter(|provider| provider.handles_enrolment(course))
            .collect()
    }

    /// Returns the hash over all provider versions and the site salt.
    ///
    /// The hash is the hex encoded SHA-256 of the JSON object mapping
    /// provider ids to versions, followed by the salt.
    pub fn get_version_hash(&self) -> String {
        if let Some(hash) = self.version_hash.borrow().as_ref() {
            return hash.clone()
        }
        let hash = self.calculate_version_hash();
        self.version_hash.replace(Some(hash.clone()));
        hash
    }

    fn calculate_version_hash(&self) -> String {
        let versions: serde_json::Map<String, serde_json::Value> = self
            .providers
            .iter()
            .map(|(id, provider)| (id.to_string(), provider.version().into()))
            .collect();
        let mut hasher = Sha256::new();
        hasher.update(serde_json::Value::Object(versions).to_string());
        hasher.update(self.site_salt.borrow().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn site_salt(&self) -> String {
        self.site_salt.borrow().clone()
    }

    /// Changes the salt, and with it the version hash.
    pub fn set_site_salt(&self, salt: impl Into<String>) {
        self.site_salt.replace(salt.into());
        self.version_hash.replace(None);
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrolment::provider::{CourseUser, ProviderContext, ProviderError};

    #[derive(Debug)]
    struct Versioned(&'static str, u64);

    impl EnrolmentProvider for Versioned {
        fn id(&self) -> ProviderId { ProviderId::from(self.0) }
        fn name(&self) -> String { self.0.to_uppercase() }
        fn version(&self) -> u64 { self.1 }
        fn handles_enrolment(&self, course: CourseId) -> bool {
            course.as_u64() % 2 == 0
        }
        fn is_enrolled(
            &self, _ctx: &ProviderContext<'_>, _user: CourseUser,
        ) -> Result<bool, ProviderError> {
            Ok(false)
        }
    }

    fn registry(providers: &[(&'static str, u64)], salt: &str) -> ProviderRegistry {
        let mut builder = ProviderRegistry::builder();
        for (id, version) in providers {
            builder.register(Arc::new(Versioned(*id, *version)));
        }
        builder.collect(salt)
    }

    #[test]
    fn hash_is_deterministic() {
        let one = registry(&[("a", 1), ("b", 1)], "salt");
        let two = registry(&[("b", 1), ("a", 1)], "salt");
        assert_eq!(one.get_version_hash(), one.get_version_hash());
        assert_eq!(one.get_version_hash(), two.get_version_hash());
        assert_eq!(one.get_version_hash().len(), 64);
    }

    #[test]
    fn hash_changes_with_versions_and_salt() {
        let h1 = registry(&[("a", 1), ("b", 1)], "salt").get_version_hash();
        let h2 = registry(&[("a", 1), ("b", 2)], "salt").get_version_hash();
        assert_ne!(h1, h2);

        let reg = registry(&[("a", 1), ("b", 1)], "salt");
        reg.set_site_salt("pepper");
        assert_ne!(reg.get_version_hash(), h1);
        reg.set_site_salt("salt");
        assert_eq!(reg.get_version_hash(), h1);
    }

    #[test]
    fn last_registration_wins() {
        let reg = registry(&[("a", 1), ("a", 3)], "");
        assert_eq!(reg.get_by_id(&ProviderId::from("a")).unwrap().version(), 3);
        assert_eq!(reg.get_all().count(), 2);
        assert!(reg.get_by_id(&ProviderId::from("missing")).is_none());
    }

    #[test]
    fn manual_provider_can_be_replaced() {
        let reg = registry(&[("a", 1)], "");
        assert!(reg.get_manual_provider().is_some());

        let reg = registry(&[("manual", 7)], "");
        assert!(reg.get_manual_provider().is_none());
    }

    #[test]
    fn handling_filters_providers() {
        let reg = registry(&[("even", 1)], "");
        assert_eq!(reg.handling(CourseId::new(2)).len(), 2);
        assert_eq!(reg.handling(CourseId::new(3)).len(), 1);
    }

    #[test]
    fn closures_are_sources() {
        let source = || -> Vec<Arc<dyn EnrolmentProvider>> {
            vec![Arc::new(Versioned("x", 1)) as Arc<dyn EnrolmentProvider>]
        };
        let mut builder = ProviderRegistry::builder();
        builder.register_source(&source).register_source(&NoExternalProviders);
        let reg = builder.collect("");
        assert!(reg.get_by_id(&ProviderId::from("x")).is_some());
    }
}
