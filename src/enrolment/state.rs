//! Scratch state kept by providers per learner and course.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use url::Url;
use crate::commons::storage::{Key, KeyValueStore, Scope, Value};
use crate::commons::timestamp::Timestamp;
use crate::commons::EngineResult;
use crate::constants::PROVIDER_STATE_NS;
use super::provider::CourseUser;
use super::types::ProviderId;
use super::value::StoredValue;


//------------ LogEntry ------------------------------------------------------

/// A timestamped message.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LogEntry {
    pub time: Timestamp,
    pub message: String,
}

impl LogEntry {
    pub fn now(message: impl Into<String>) -> Self {
        LogEntry { time: Timestamp::now(), message: message.into() }
    }
}


//------------ ProviderState -------------------------------------------------

/// The scratch state of one provider for one learner in one course.
///
/// Mutations only mark the state as dirty. Persisting happens when the
/// owning set is saved.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderState {
    data: BTreeMap<String, StoredValue>,
    logs: VecDeque<LogEntry>,
    log_size: usize,
    dirty: bool,
}

impl ProviderState {
    pub fn new(log_size: usize) -> Self {
        ProviderState {
            data: BTreeMap::new(),
            logs: VecDeque::new(),
            log_size,
            dirty: false,
        }
    }

    /// Returns the stored value for the key, or null if there is none.
    pub fn get_stored_value(&self, key: &str) -> StoredValue {
        self.data.get(key).cloned().unwrap_or_default()
    }

    /// Sets a value. Storing null removes the key.
    ///
    /// Returns whether anything changed.
    pub fn set_stored_value(&mut self, key: &str, value: StoredValue) -> bool {
        let changed = if value.is_null() {
            self.data.remove(key).is_some()
        }
        else if self.data.get(key) == Some(&value) {
            false
        }
        else {
            self.data.insert(key.to_string(), value);
            true
        };
        self.dirty |= changed;
        changed
    }

    /// Adds a message to the log, newest first.
    pub fn log_message(&mut self, message: impl Into<String>) {
        self.logs.push_front(LogEntry::now(message));
        self.logs.truncate(self.log_size);
        self.dirty = true;
    }

    pub fn data(&self) -> &BTreeMap<String, StoredValue> {
        &self.data
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}


//------------ ProviderStateSet ----------------------------------------------

/// The states of all providers for one learner in one course.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderStateSet {
    states: BTreeMap<ProviderId, ProviderState>,
    log_size: usize,
}

impl ProviderStateSet {
    pub fn new(log_size: usize) -> Self {
        ProviderStateSet { states: BTreeMap::new(), log_size }
    }

    /// Returns the state for the provider, creating it if needed.
    pub fn state_mut(&mut self, provider: &ProviderId) -> &mut ProviderState {
        let log_size = self.log_size;
        self.states
            .entry(provider.clone())
            .or_insert_with(|| ProviderState::new(log_size))
    }

    pub fn state(&self, provider: &ProviderId) -> Option<&ProviderState> {
        self.states.get(provider)
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderId> {
        self.states.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.states.values().any(ProviderState::is_dirty)
    }

    fn mark_clean(&mut self) {
        for state in self.states.values_mut() {
            state.dirty = false;
        }
    }

    pub fn encode(&self) -> Result<Value, serde_json::Error> {
        let wire = StateSetWire {
            providers: self.states.iter().map(|(id, state)| {
                (id.clone(), StateWire {
                    data: state.data.clone(),
                    logs: state.logs.iter().cloned().collect(),
                })
            }).collect(),
        };
        serde_json::to_value(wire)
    }

    /// Decodes a set. The result is not dirty.
    pub fn decode(
        value: Value, log_size: usize,
    ) -> Result<Self, serde_json::Error> {
        let wire: StateSetWire = serde_json::from_value(value)?;
        Ok(ProviderStateSet {
            states: wire.providers.into_iter().map(|(id, state)| {
                let mut logs: VecDeque<_> = state.logs.into();
                logs.truncate(log_size);
                (id, ProviderState {
                    data: state.data,
                    logs,
                    log_size,
                    dirty: false,
                })
            }).collect(),
            log_size,
        })
    }
}

#[derive(Deserialize, Serialize)]
struct StateSetWire {
    providers: BTreeMap<ProviderId, StateWire>,
}

#[derive(Deserialize, Serialize)]
struct StateWire {
    #[serde(default)]
    data: BTreeMap<String, StoredValue>,
    #[serde(default)]
    logs: Vec<LogEntry>,
}


//------------ ProviderStateStore --------------------------------------------

/// Loads, caches and persists provider state sets.
///
/// Sets are loaded lazily and kept in the cache until evicted. Changes are
/// written by [`persist_all`](Self::persist_all), normally at the end of a
/// unit of work.
#[derive(Debug)]
pub struct ProviderStateStore {
    kv: KeyValueStore,
    log_size: usize,
    cache: RefCell<HashMap<CourseUser, ProviderStateSet>>,
}

impl ProviderStateStore {
    pub fn create(storage_uri: &Url, log_size: usize) -> EngineResult<Self> {
        Ok(ProviderStateStore {
            kv: KeyValueStore::create(storage_uri, PROVIDER_STATE_NS)?,
            log_size,
            cache: RefCell::new(HashMap::new()),
        })
    }

    fn key(user: CourseUser) -> Key {
        Key::new_scoped(
            Scope::from_segment(user.course.segment()),
            user.user.segment(),
        )
    }

    fn read(&self, user: CourseUser) -> EngineResult<ProviderStateSet> {
        let key = Self::key(user);
        let value = match self.kv.get_value(&key) {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(ProviderStateSet::new(self.log_size)),
            Err(err) if err.is_corrupt_value() => {
                warn!("Ignoring corrupt provider state for {user}: {err}");
                return Ok(ProviderStateSet::new(self.log_size))
            }
            Err(err) => return Err(err.into()),
        };
        match ProviderStateSet::decode(value, self.log_size) {
            Ok(set) => Ok(set),
            Err(err) => {
                warn!("Ignoring corrupt provider state for {user}: {err}");
                Ok(ProviderStateSet::new(self.log_size))
            }
        }
    }

    fn ensure_loaded(&self, user: CourseUser) -> EngineResult<()> {
        if !self.cache.borrow().contains_key(&user) {
            let set = self.read(user)?;
            self.cache.borrow_mut().insert(user, set);
        }
        Ok(())
    }

    /// Runs `op` on the state of `provider` for the learner.
    pub fn with_state<F, T>(
        &self, user: CourseUser, provider: &ProviderId, op: F,
    ) -> EngineResult<T>
    where
        F: FnOnce(&mut ProviderState) -> T,
    {
        self.ensure_loaded(user)?;
        let mut cache = self.cache.borrow_mut();
        let set = cache
            .entry(user)
            .or_insert_with(|| ProviderStateSet::new(self.log_size));
        Ok(op(set.state_mut(provider)))
    }

    /// Returns a copy of the learner's state set.
    pub fn load(&self, user: CourseUser) -> EngineResult<ProviderStateSet> {
        self.ensure_loaded(user)?;
        Ok(self
            .cache
            .borrow()
            .get(&user)
            .cloned()
            .unwrap_or_else(|| ProviderStateSet::new(self.log_size)))
    }

    /// Writes the learner's set if it is dirty.
    ///
    /// Returns whether anything was written.
    pub fn save(&self, user: CourseUser) -> EngineResult<bool> {
        let mut cache = self.cache.borrow_mut();
        let Some(set) = cache.get_mut(&user) else {
            return Ok(false)
        };
        if !set.is_dirty() {
            return Ok(false)
        }
        self.kv.store(&Self::key(user), &set.encode()?)?;
        set.mark_clean();
        debug!("Saved provider state for {user}");
        Ok(true)
    }

    /// Writes all dirty sets.
    ///
    /// A set that fails to be written stays dirty so that it is retried
    /// later. Returns whether all writes succeeded.
    pub fn persist_all(&self) -> bool {
        let dirty: Vec<CourseUser> = self
            .cache
            .borrow()
            .iter()
            .filter(|(_, set)| set.is_dirty())
            .map(|(user, _)| *user)
            .collect();

        let mut all_ok = true;
        for user in dirty {
            if let Err(err) = self.save(user) {
                error!("Could not save provider state for {user}: {err}");
                all_ok = false;
            }
        }
        all_ok
    }

    /// Drops all clean sets from the cache.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().retain(|_, set| set.is_dirty());
    }

    /// Removes the learner's state entirely.
    pub fn delete(&self, user: CourseUser) -> EngineResult<()> {
        self.cache.borrow_mut().remove(&user);
        self.kv.delete(&Self::key(user))?;
        Ok(())
    }

    pub fn cached_sets(&self) -> usize {
        self.cache.borrow().len()
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrolment::types::{CourseId, UserId};
    use crate::test::mem_storage_uri;

    fn cu(user: u64, course: u64) -> CourseUser {
        CourseUser::new(UserId::new(user), CourseId::new(course))
    }

    fn manual() -> ProviderId {
        ProviderId::from("manual")
    }

    #[test]
    fn set_value_marks_dirty_only_on_change() {
        let mut state = ProviderState::new(30);
        assert!(!state.is_dirty());
        assert!(state.set_stored_value("status", StoredValue::from("enrolled")));
        assert!(state.is_dirty());

        state.dirty = false;
        assert!(!state.set_stored_value("status", StoredValue::from("enrolled")));
        assert!(!state.is_dirty());

        assert!(state.set_stored_value("status", StoredValue::Null));
        assert!(state.get_stored_value("status").is_null());
        assert!(!state.set_stored_value("missing", StoredValue::Null));
    }

    #[test]
    fn log_is_bounded_newest_first() {
        let mut state = ProviderState::new(3);
        for nr in 0..5 {
            state.log_message(format!("message {nr}"));
        }
        let messages: Vec<_> = state.logs().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["message 4", "message 3", "message 2"]);
    }

    #[test]
    fn persist_only_dirty_sets() {
        let uri = mem_storage_uri();
        let store = ProviderStateStore::create(&uri, 30).unwrap();

        store.with_state(cu(1, 1), &manual(), |state| {
            state.set_stored_value("status", StoredValue::from("enrolled"))
        }).unwrap();
        store.with_state(cu(2, 1), &manual(), |state| {
            state.get_stored_value("status")
        }).unwrap();

        assert!(store.persist_all());
        assert!(!store.load(cu(1, 1)).unwrap().is_dirty());
        assert!(!store.save(cu(1, 1)).unwrap());

        // A second store sees the data, the clean read was never written.
        let other = ProviderStateStore::create(&uri, 30).unwrap();
        let set = other.load(cu(1, 1)).unwrap();
        assert_eq!(
            set.state(&manual()).unwrap().get_stored_value("status"),
            StoredValue::from("enrolled")
        );
        assert!(other.kv.get_value(&ProviderStateStore::key(cu(2, 1))).unwrap().is_none());
    }

    #[test]
    fn corrupt_state_loads_empty_and_clean() {
        let uri = mem_storage_uri();
        let store = ProviderStateStore::create(&uri, 30).unwrap();
        store.kv.store(
            &ProviderStateStore::key(cu(1, 1)), &"{not json"
        ).unwrap();

        let set = store.load(cu(1, 1)).unwrap();
        assert!(set.is_empty());
        assert!(!set.is_dirty());
    }

    #[test]
    fn clear_cache_keeps_dirty_sets() {
        let store = ProviderStateStore::create(&mem_storage_uri(), 30).unwrap();
        store.with_state(cu(1, 1), &manual(), |state| {
            state.log_message("dirty")
        }).unwrap();
        store.load(cu(2, 1)).unwrap();
        assert_eq!(store.cached_sets(), 2);

        store.clear_cache();
        assert_eq!(store.cached_sets(), 1);
        assert!(store.persist_all());
        store.clear_cache();
        assert_eq!(store.cached_sets(), 0);
    }
}
