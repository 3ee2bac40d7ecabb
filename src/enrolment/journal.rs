//! The audit journal of enrolment status changes per provider.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use url::Url;
use crate::commons::error::Error;
use crate::commons::storage::{Key, KeyValueStore, Scope, Value};
use crate::commons::timestamp::Timestamp;
use crate::commons::EngineResult;
use crate::config::JournalConfig;
use crate::constants::JOURNAL_NS;
use super::provider::CourseUser;
use super::state::LogEntry;
use super::types::ProviderId;


//------------ StatusEntry ---------------------------------------------------

/// An enrolment status as reported by a provider at some point in time.
///
/// A status of `None` means that the provider no longer had a say.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StatusEntry {
    pub time: Timestamp,
    pub status: Option<bool>,
}


//------------ ProviderJournal -----------------------------------------------

/// The history of one provider's verdicts for one learner in one course.
///
/// Both the status history and the log are kept newest first and are
/// truncated to their configured size.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderJournal {
    history: VecDeque<StatusEntry>,
    logs: VecDeque<LogEntry>,
    history_size: usize,
    log_size: usize,
    dirty: bool,
}

impl ProviderJournal {
    pub fn new(history_size: usize, log_size: usize) -> Self {
        ProviderJournal {
            history: VecDeque::new(),
            logs: VecDeque::new(),
            history_size,
            log_size,
            dirty: false,
        }
    }

    /// Records a new status unless it equals the most recent one.
    ///
    /// Returns whether a change was recorded.
    pub fn update_enrolment_status(&mut self, status: bool) -> bool {
        self.update_enrolment_status_at(Some(status), Timestamp::now())
    }

    /// Records that the provider no longer applies.
    ///
    /// Nothing is recorded if there is no history or the most recent
    /// status already is null.
    pub fn delete_enrolment_status(&mut self) -> bool {
        if self.history.is_empty() {
            return false
        }
        self.update_enrolment_status_at(None, Timestamp::now())
    }

    pub fn update_enrolment_status_at(
        &mut self, status: Option<bool>, time: Timestamp,
    ) -> bool {
        if let Some(latest) = self.history.front() {
            if latest.status == status {
                return false
            }
        }
        self.history.push_front(StatusEntry { time, status });
        self.history.truncate(self.history_size);
        self.dirty = true;
        true
    }

    pub fn add_log_message(&mut self, message: impl Into<String>) {
        self.logs.push_front(LogEntry::now(message));
        self.logs.truncate(self.log_size);
        self.dirty = true;
    }

    /// Returns the status that was current at the given time.
    ///
    /// If the history does not go back that far, a null status for the
    /// requested time is returned.
    pub fn get_status_at(&self, time: Timestamp) -> StatusEntry {
        self.history
            .iter()
            .find(|entry| entry.time <= time)
            .copied()
            .unwrap_or(StatusEntry { time, status: None })
    }

    /// Returns the most recent status.
    pub fn current_status(&self) -> Option<bool> {
        self.history.front().and_then(|entry| entry.status)
    }

    pub fn history(&self) -> impl Iterator<Item = &StatusEntry> {
        self.history.iter()
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogEntry> {
        self.logs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.logs.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn encode(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(JournalWire {
            history: self.history.iter().copied().collect(),
            logs: self.logs.iter().cloned().collect(),
        })
    }

    /// Decodes a journal, truncating it to the configured sizes.
    pub fn decode(
        value: Value, history_size: usize, log_size: usize,
    ) -> Result<Self, serde_json::Error> {
        let wire: JournalWire = serde_json::from_value(value)?;
        let mut history: VecDeque<_> = wire.history.into();
        history.truncate(history_size);
        let mut logs: VecDeque<_> = wire.logs.into();
        logs.truncate(log_size);
        Ok(ProviderJournal {
            history, logs, history_size, log_size, dirty: false
        })
    }
}

#[derive(Deserialize, Serialize)]
struct JournalWire {
    #[serde(default)]
    history: Vec<StatusEntry>,
    #[serde(default)]
    logs: Vec<LogEntry>,
}


//------------ JournalStore --------------------------------------------------

type JournalKey = (ProviderId, CourseUser);

/// Loads, caches and persists provider journals.
///
/// If the journal is disabled, updates are ignored and reads return empty
/// journals.
#[derive(Debug)]
pub struct JournalStore {
    kv: KeyValueStore,
    enabled: bool,
    history_size: usize,
    log_size: usize,
    cache: RefCell<HashMap<JournalKey, ProviderJournal>>,
}

impl JournalStore {
    pub fn create(
        storage_uri: &Url, config: &JournalConfig,
    ) -> EngineResult<Self> {
        Ok(JournalStore {
            kv: KeyValueStore::create(storage_uri, JOURNAL_NS)?,
            enabled: config.enabled,
            history_size: config.history_size,
            log_size: config.log_size,
            cache: RefCell::new(HashMap::new()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn key(provider: &ProviderId, user: CourseUser) -> Key {
        Key::new_scoped(
            Scope::new(vec![user.course.segment(), user.user.segment()]),
            provider.segment(),
        )
    }

    fn empty(&self) -> ProviderJournal {
        ProviderJournal::new(self.history_size, self.log_size)
    }

    fn read(
        &self, provider: &ProviderId, user: CourseUser,
    ) -> EngineResult<ProviderJournal> {
        let value = match self.kv.get_value(&Self::key(provider, user)) {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(self.empty()),
            Err(err) if err.is_corrupt_value() => {
                warn!("Ignoring corrupt journal of {provider} for {user}: {err}");
                return Ok(self.empty())
            }
            Err(err) => return Err(err.into()),
        };
        match ProviderJournal::decode(value, self.history_size, self.log_size) {
            Ok(journal) => Ok(journal),
            Err(err) => {
                warn!("Ignoring corrupt journal of {provider} for {user}: {err}");
                Ok(self.empty())
            }
        }
    }

    fn with_journal<F, T>(
        &self, provider: &ProviderId, user: CourseUser, op: F,
    ) -> EngineResult<T>
    where
        F: FnOnce(&mut ProviderJournal) -> T,
    {
        let key = (provider.clone(), user);
        if !self.cache.borrow().contains_key(&key) {
            let journal = self.read(provider, user)?;
            self.cache.borrow_mut().insert(key.clone(), journal);
        }
        let mut cache = self.cache.borrow_mut();
        let journal = cache.entry(key).or_insert_with(|| self.empty());
        Ok(op(journal))
    }

    pub fn update_enrolment_status(
        &self, provider: &ProviderId, user: CourseUser, status: bool,
    ) -> EngineResult<bool> {
        if !self.enabled {
            return Ok(false)
        }
        self.with_journal(provider, user, |journal| {
            journal.update_enrolment_status(status)
        })
    }

    pub fn delete_enrolment_status(
        &self, provider: &ProviderId, user: CourseUser,
    ) -> EngineResult<bool> {
        if !self.enabled {
            return Ok(false)
        }
        self.with_journal(provider, user, |journal| {
            journal.delete_enrolment_status()
        })
    }

    pub fn add_log_message(
        &self, provider: &ProviderId, user: CourseUser, message: &str,
    ) -> EngineResult<()> {
        if !self.enabled {
            return Ok(())
        }
        self.with_journal(provider, user, |journal| {
            journal.add_log_message(message)
        })
    }

    /// Returns a copy of the journal.
    pub fn load(
        &self, provider: &ProviderId, user: CourseUser,
    ) -> EngineResult<ProviderJournal> {
        if !self.enabled {
            return Ok(self.empty())
        }
        self.with_journal(provider, user, |journal| journal.clone())
    }

    /// Writes all dirty journals. Returns whether all writes succeeded.
    pub fn persist_all(&self) -> bool {
        let mut all_ok = true;
        let mut cache = self.cache.borrow_mut();
        for ((provider, user), journal) in cache.iter_mut() {
            if !journal.is_dirty() {
                continue
            }
            let res = journal.encode().map_err(Error::from).and_then(|value| {
                self.kv
                    .store(&Self::key(provider, *user), &value)
                    .map_err(Error::from)
            });
            match res {
                Ok(()) => {
                    journal.dirty = false;
                    debug!("Saved journal of {provider} for {user}");
                }
                Err(err) => {
                    error!(
                        "Could not save journal of {provider} for {user}: {err}"
                    );
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    /// Drops all clean journals from the cache.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().retain(|_, journal| journal.is_dirty());
    }

    /// Removes all journals for the learner.
    pub fn delete(&self, user: CourseUser) -> EngineResult<()> {
        self.cache.borrow_mut().retain(|(_, cached), _| *cached != user);
        self.kv.execute(&Scope::global(), |kv| {
            kv.delete_scope(&Scope::new(vec![
                user.course.segment(), user.user.segment()
            ]))
        })?;
        Ok(())
    }
}


//============ Tests =========================================================
