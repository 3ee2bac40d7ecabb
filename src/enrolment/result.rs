//! Cached enrolment results.

use std::collections::{BTreeMap, BTreeSet};
use log::warn;
use serde::{Deserialize, Serialize};
use url::Url;
use crate::commons::storage::{Key, KeyValueError, KeyValueStore, Scope, Value};
use crate::commons::timestamp::Timestamp;
use crate::commons::EngineResult;
use crate::constants::RESULTS_NS;
use super::provider::CourseUser;
use super::types::{CourseId, ProviderId, UserId};


//------------ EnrolmentResult -----------------------------------------------

/// The combined verdict of all providers for a learner in a course.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EnrolmentResult {
    provider_results: BTreeMap<ProviderId, bool>,
    version_hash: String,
    time: Timestamp,
    invalidated: bool,
    removed: bool,
}

impl EnrolmentResult {
    pub fn new(
        provider_results: BTreeMap<ProviderId, bool>,
        version_hash: String,
        removed: bool,
    ) -> Self {
        EnrolmentResult {
            provider_results,
            version_hash,
            time: Timestamp::now(),
            invalidated: false,
            removed,
        }
    }

    /// A result that only records that recalculation is needed.
    pub fn placeholder() -> Self {
        EnrolmentResult {
            provider_results: BTreeMap::new(),
            version_hash: String::new(),
            time: Timestamp::now(),
            invalidated: true,
            removed: false,
        }
    }

    /// Whether any provider granted access and the learner is not removed.
    pub fn is_enrolled(&self) -> bool {
        !self.removed && self.provider_results.values().any(|granted| *granted)
    }

    /// Whether the result can be served for the given version hash.
    pub fn is_valid(&self, version_hash: &str) -> bool {
        !self.invalidated && self.version_hash == version_hash
    }

    pub fn provider_results(&self) -> &BTreeMap<ProviderId, bool> {
        &self.provider_results
    }

    pub fn version_hash(&self) -> &str {
        &self.version_hash
    }

    pub fn time(&self) -> Timestamp {
        self.time
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn encode(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(ResultWire {
            results: self.provider_results.clone(),
            hash: self.version_hash.clone(),
            time: self.time,
            invalidated: self.invalidated,
            removed: self.removed,
        })
    }

    pub fn decode(value: Value) -> Result<Self, serde_json::Error> {
        let wire: ResultWire = serde_json::from_value(value)?;
        Ok(EnrolmentResult {
            provider_results: wire.results,
            version_hash: wire.hash,
            time: wire.time,
            invalidated: wire.invalidated,
            removed: wire.removed,
        })
    }
}

#[derive(Deserialize, Serialize)]
struct ResultWire {
    results: BTreeMap<ProviderId, bool>,
    hash: String,
    time: Timestamp,
    #[serde(default)]
    invalidated: bool,
    #[serde(default)]
    removed: bool,
}


//------------ ResultStore ---------------------------------------------------

/// Persists enrolment results per course and learner.
#[derive(Debug)]
pub struct ResultStore {
    kv: KeyValueStore,
}

impl ResultStore {
    pub fn create(storage_uri: &Url) -> EngineResult<Self> {
        Ok(ResultStore { kv: KeyValueStore::create(storage_uri, RESULTS_NS)? })
    }

    fn course_scope(course: CourseId) -> Scope {
        Scope::from_segment(course.segment())
    }

    fn key(user: CourseUser) -> Key {
        Key::new_scoped(Self::course_scope(user.course), user.user.segment())
    }

    fn decode_or_warn(key: &Key, value: Value) -> Option<EnrolmentResult> {
        match EnrolmentResult::decode(value) {
            Ok(result) => Some(result),
            Err(err) => {
                warn!("Ignoring corrupt enrolment result '{key}': {err}");
                None
            }
        }
    }

    /// Returns the stored result. A corrupt result counts as missing.
    pub fn get(&self, user: CourseUser) -> EngineResult<Option<EnrolmentResult>> {
        let key = Self::key(user);
        match self.kv.get_value(&key) {
            Ok(Some(value)) => Ok(Self::decode_or_warn(&key, value)),
            Ok(None) => Ok(None),
            Err(err) if err.is_corrupt_value() => {
                warn!("Ignoring corrupt enrolment result '{key}': {err}");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(
        &self, user: CourseUser, result: &EnrolmentResult,
    ) -> EngineResult<()> {
        self.kv.store(&Self::key(user), &result.encode()?)?;
        Ok(())
    }

    /// Marks the learner's result as invalidated.
    ///
    /// If there is no usable result, a placeholder is stored so that
    /// course jobs looking for invalidated results will find the learner.
    pub fn invalidate(&self, user: CourseUser) -> EngineResult<()> {
        let mut result = self
            .get(user)?
            .unwrap_or_else(EnrolmentResult::placeholder);
        result.invalidate();
        self.save(user, &result)
    }

    /// Marks all results in the course as invalidated.
    ///
    /// Returns the number of results marked.
    pub fn invalidate_course(&self, course: CourseId) -> EngineResult<usize> {
        let scope = Self::course_scope(course);
        Ok(self.kv.execute(&scope, |kv| {
            let mut count = 0;
            for key in kv.list_keys(&scope)? {
                let value = match kv.get_value(&key) {
                    Ok(value) => value,
                    Err(err) if err.is_corrupt_value() => None,
                    Err(err) => return Err(err),
                };
                let mut result = value
                    .and_then(|value| Self::decode_or_warn(&key, value))
                    .unwrap_or_else(EnrolmentResult::placeholder);
                if !result.is_invalidated() {
                    result.invalidate();
                    count += 1;
                }
                let value = result.encode().map_err(|err| {
                    KeyValueError::serialize(&key, err)
                })?;
                kv.store_value(&key, value)?;
            }
            Ok(count)
        })?)
    }

    pub fn delete(&self, user: CourseUser) -> EngineResult<bool> {
        Ok(self.kv.delete(&Self::key(user))?)
    }

    /// Returns all learners with a stored result in the course.
    pub fn users_in_course(&self, course: CourseId) -> EngineResult<Vec<UserId>> {
        Ok(self
            .kv
            .list_keys(&Self::course_scope(course))?
            .iter()
            .filter_map(|key| UserId::from_segment(key.name()))
            .collect())
    }

    /// Returns up to `limit` learners in the course needing recalculation.
    ///
    /// A result needs recalculation if it is invalidated or, unless
    /// `invalidated_only` is set, if it was calculated under a different
    /// version hash. Corrupt results always need recalculation. Learners
    /// in `skip` are ignored.
    pub fn stale_in_course(
        &self,
        course: CourseId,
        version_hash: &str,
        invalidated_only: bool,
        limit: usize,
        skip: &BTreeSet<UserId>,
    ) -> EngineResult<Vec<UserId>> {
        let scope = Self::course_scope(course);
        Ok(self.kv.execute(&scope, |kv| {
            let mut stale = Vec::new();
            for key in kv.list_keys(&scope)? {
                if stale.len() >= limit {
                    break
                }
                let Some(user) = UserId::from_segment(key.name()) else {
                    continue
                };
                if skip.contains(&user) {
                    continue
                }
                let result = match kv.get_value(&key) {
                    Ok(value) => {
                        value.and_then(|value| Self::decode_or_warn(&key, value))
                    }
                    Err(err) if err.is_corrupt_value() => None,
                    Err(err) => return Err(err),
                };
                let is_stale = match result {
                    Some(result) => {
                        result.is_invalidated() || (
                            !invalidated_only
                            && result.version_hash() != version_hash
                        )
                    }
                    None => true,
                };
                if is_stale {
                    stale.push(user);
                }
            }
            Ok(stale)
        })?)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::mem_storage_uri;

    fn cu(user: u64, course: u64) -> CourseUser {
        CourseUser::new(UserId::new(user), CourseId::new(course))
    }

    fn result(granted: bool, hash: &str) -> EnrolmentResult {
        let mut results = BTreeMap::new();
        results.insert(ProviderId::from("manual"), granted);
        results.insert(ProviderId::from("other"), false);
        EnrolmentResult::new(results, hash.to_string(), false)
    }

    #[test]
    fn validity_and_verdict() {
        let mut res = result(true, "h1");
        assert!(res.is_enrolled());
        assert!(res.is_valid("h1"));
        assert!(!res.is_valid("h2"));
        res.invalidate();
        assert!(!res.is_valid("h1"));

        let removed = EnrolmentResult::new(
            result(true, "h1").provider_results().clone(), "h1".into(), true
        );
        assert!(!removed.is_enrolled());
        assert!(!result(false, "h1").is_enrolled());
    }

    #[test]
    fn store_and_invalidate() {
        let store = ResultStore::create(&mem_storage_uri()).unwrap();
        assert!(store.get(cu(1, 1)).unwrap().is_none());

        store.save(cu(1, 1), &result(true, "h1")).unwrap();
        let loaded = store.get(cu(1, 1)).unwrap().unwrap();
        assert_eq!(loaded, result_with_time(true, "h1", loaded.time()));

        store.invalidate(cu(1, 1)).unwrap();
        store.invalidate(cu(2, 1)).unwrap();
        assert!(store.get(cu(1, 1)).unwrap().unwrap().is_invalidated());
        let placeholder = store.get(cu(2, 1)).unwrap().unwrap();
        assert!(placeholder.is_invalidated());
        assert!(!placeholder.is_enrolled());
    }

    fn result_with_time(granted: bool, hash: &str, time: Timestamp) -> EnrolmentResult {
        let mut res = result(granted, hash);
        res.time = time;
        res
    }

    #[test]
    fn find_stale_results() {
        let store = ResultStore::create(&mem_storage_uri()).unwrap();
        store.save(cu(1, 1), &result(true, "h1")).unwrap();
        store.save(cu(2, 1), &result(true, "h2")).unwrap();
        store.save(cu(3, 1), &result(true, "h2")).unwrap();
        store.save(cu(4, 2), &result(true, "h1")).unwrap();
        store.invalidate(cu(3, 1)).unwrap();

        let none = BTreeSet::new();
        let course = CourseId::new(1);
        assert_eq!(
            store.stale_in_course(course, "h2", false, 10, &none).unwrap(),
            vec![UserId::new(1), UserId::new(3)]
        );
        assert_eq!(
            store.stale_in_course(course, "h2", true, 10, &none).unwrap(),
            vec![UserId::new(3)]
        );
        assert_eq!(
            store.stale_in_course(course, "h2", false, 1, &none).unwrap(),
            vec![UserId::new(1)]
        );
        let skip: BTreeSet<_> = [UserId::new(1)].into();
        assert_eq!(
            store.stale_in_course(course, "h2", false, 10, &skip).unwrap(),
            vec![UserId::new(3)]
        );

        assert_eq!(store.invalidate_course(course).unwrap(), 2);
        assert_eq!(
            store.stale_in_course(course, "h2", true, 10, &none).unwrap().len(), 3
        );
        assert_eq!(store.users_in_course(CourseId::new(2)).unwrap(), vec![UserId::new(4)]);
    }

    #[test]
    fn corrupt_result_counts_as_missing() {
        let store = ResultStore::create(&mem_storage_uri()).unwrap();
        store.kv.store(&ResultStore::key(cu(1, 1)), &"{not json").unwrap();
        assert!(store.get(cu(1, 1)).unwrap().is_none());
        assert_eq!(
            store.stale_in_course(
                CourseId::new(1), "h", true, 10, &BTreeSet::new()
            ).unwrap(),
            vec![UserId::new(1)]
        );
    }
}
