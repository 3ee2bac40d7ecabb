//! A task queue on top of a key-value store.
//!
//! Tasks are identified by name. Pending tasks live under the `pending`
//! scope, claimed tasks under `running`, and their key names carry the
//! scheduled time so that the earliest due task can be found by listing
//! keys only.

use std::{error, fmt};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;
use crate::commons::storage::{
    Key, KeyValueError, KeyValueStore, Scope, Segment, Transaction, Value,
};


//------------ Queue ---------------------------------------------------------

#[derive(Debug)]
pub struct Queue {
    store: KeyValueStore,
}

impl Queue {
    const RESCHEDULE_AFTER: Duration = Duration::from_secs(15 * 60);

    fn lock_scope() -> Scope {
        Scope::global()
    }

    fn pending_scope() -> Scope {
        Scope::from_segment(Segment::parse_lossy(PENDING))
    }

    fn running_scope() -> Scope {
        Scope::from_segment(Segment::parse_lossy(RUNNING))
    }
}

impl Queue {
    /// Creates a new queue.
    pub fn create(storage_uri: &Url, namespace: &str) -> Result<Self, Error> {
        Ok(Queue {
            store: KeyValueStore::create(storage_uri, namespace)?,
        })
    }

    /// Returns the number of pending tasks remaining
    pub fn pending_tasks_remaining(&self) -> Result<usize, Error> {
        Ok(self.store.execute(&Self::lock_scope(), |kv| {
            kv.list_keys(&Self::pending_scope()).map(|list| list.len())
        })?)
    }

    /// Returns the number of running tasks
    pub fn running_tasks_remaining(&self) -> Result<usize, Error> {
        Ok(self.store.execute(&Self::lock_scope(), |kv| {
            kv.list_keys(&Self::running_scope()).map(|list| list.len())
        })?)
    }

    /// Returns the currently running tasks
    pub fn running_tasks_keys(&self) -> Result<Vec<Key>, Error> {
        Ok(self.store.execute(&Self::lock_scope(), |kv| {
            kv.list_keys(&Self::running_scope())
        })?)
    }

    /// Schedule a task.
    pub fn schedule_task(
        &self,
        name: &Segment,
        value: &Value,
        timestamp_millis: Option<u128>,
        mode: ScheduleMode,
    ) -> Result<(), Error> {
        Ok(self.store.execute(&Self::lock_scope(), |s| {
            let mut new_task = TaskKey {
                name: name.clone(),
                timestamp_millis: timestamp_millis.unwrap_or_else(now),
            };

            let running_key_opt = find_task(s, &Self::running_scope(), name)?
                .map(|tk| tk.running_key());
            let pending_opt = find_task(s, &Self::pending_scope(), name)?;

            match mode {
                ScheduleMode::IfMissing => {
                    if pending_opt.is_some() || running_key_opt.is_some() {
                        // nothing to do, there is something
                        return Ok(())
                    }
                }
                ScheduleMode::ReplaceExisting => {
                    if let Some(pending) = pending_opt {
                        s.delete(&pending.pending_key())?;
                    }
                }
                ScheduleMode::ReplaceExistingSoonest => {
                    if let Some(pending) = pending_opt {
                        new_task.timestamp_millis = new_task
                            .timestamp_millis
                            .min(pending.timestamp_millis);
                        s.delete(&pending.pending_key())?;
                    }
                }
                ScheduleMode::FinishOrReplaceExisting => {
                    if let Some(running) = running_key_opt {
                        s.delete(&running)?;
                    }
                    if let Some(pending) = pending_opt {
                        s.delete(&pending.pending_key())?;
                    }
                }
                ScheduleMode::FinishOrReplaceExistingSoonest => {
                    if let Some(running) = running_key_opt {
                        s.delete(&running)?;
                    }
                    if let Some(pending) = pending_opt {
                        new_task.timestamp_millis = new_task
                            .timestamp_millis
                            .min(pending.timestamp_millis);
                        s.delete(&pending.pending_key())?;
                    }
                }
            }
            s.store_value(&new_task.pending_key(), value.clone())
        })?)
    }

    /// Returns the scheduled timestamp in ms for the named task, if any.
    pub fn pending_task_scheduled(
        &self, name: &Segment,
    ) -> Result<Option<u128>, Error> {
        Ok(self.store.execute(&Self::lock_scope(), |kv| {
            find_task(kv, &Self::pending_scope(), name)
                .map(|task| task.map(|tk| tk.timestamp_millis))
        })?)
    }

    /// Returns the value of the named pending task, if any.
    pub fn pending_task_value(
        &self, name: &Segment,
    ) -> Result<Option<Value>, Error> {
        Ok(self.store.execute(&Self::lock_scope(), |kv| {
            match find_task(kv, &Self::pending_scope(), name)? {
                Some(tk) => kv.get_value(&tk.pending_key()),
                None => Ok(None),
            }
        })?)
    }

    /// Returns the value of the named running task, if any.
    pub fn running_task_value(
        &self, name: &Segment,
    ) -> Result<Option<Value>, Error> {
        Ok(self.store.execute(&Self::lock_scope(), |kv| {
            match find_task(kv, &Self::running_scope(), name)? {
                Some(tk) => kv.get_value(&tk.running_key()),
                None => Ok(None),
            }
        })?)
    }

    /// Returns whether the task claimed under this key is still running.
    pub fn is_running_task(&self, running_key: &Key) -> Result<bool, Error> {
        Ok(self.store.execute(&Self::lock_scope(), |kv| kv.has(running_key))?)
    }

    /// Removes the named task, whether pending or running.
    ///
    /// Returns whether anything was removed.
    pub fn cancel_task(&self, name: &Segment) -> Result<bool, Error> {
        Ok(self.store.execute(&Self::lock_scope(), |kv| {
            let mut removed = false;
            if let Some(tk) = find_task(kv, &Self::pending_scope(), name)? {
                removed |= kv.delete(&tk.pending_key())?;
            }
            if let Some(tk) = find_task(kv, &Self::running_scope(), name)? {
                removed |= kv.delete(&tk.running_key())?;
            }
            Ok(removed)
        })?)
    }

    /// Marks a running task as finished. Fails if the task is not running.
    pub fn finish_running_task(&self, running_key: &Key) -> Result<(), Error> {
        self.store.execute(&Self::lock_scope(), |kv| {
            if kv.delete(running_key)? {
                Ok(Ok(()))
            } else {
                Ok(Err(Error::Other(format!(
                    "Cannot finish task {running_key}. It is not running."
                ))))
            }
        })?
    }

    /// Reschedules a running task as pending. Fails if the task is not running.
    pub fn reschedule_running_task(
        &self, running: &Key, timestamp_millis: Option<u128>,
    ) -> Result<(), Error> {
        let pending_key = {
            let mut task_key = TaskKey::try_from(running)?;
            task_key.timestamp_millis = timestamp_millis.unwrap_or_else(now);
            task_key.pending_key()
        };

        Ok(self.store.execute(&Self::lock_scope(), |kv| {
            kv.move_value(running, &pending_key)
        })?)
    }

    /// Claims the next scheduled pending task, if any.
    pub fn claim_scheduled_pending_task(
        &self,
    ) -> Result<Option<RunningTask>, Error> {
        Ok(self.store.execute(&Self::lock_scope(), |kv| {
            let tasks_before = now();

            let Some(pending) = kv
                .list_keys(&Self::pending_scope())?
                .iter()
                .filter_map(|k| TaskKey::try_from(k).ok())
                .filter(|tk| tk.timestamp_millis <= tasks_before)
                .min_by_key(|tk| tk.timestamp_millis)
            else {
                return Ok(None)
            };

            let pending_key = pending.pending_key();
            let Some(value) = kv.get_value(&pending_key)? else {
                return Ok(None)
            };

            let mut running = TaskKey {
                name: pending.name,
                timestamp_millis: tasks_before,
            };
            if kv.has(&running.running_key())? {
                // It's not pretty to sleep blocking, even if it's for 1 ms,
                // but if we don't then we get a name collision with an
                // existing running task.
                std::thread::sleep(Duration::from_millis(1));
                running.timestamp_millis = now();
            }
            let running_key = running.running_key();
            kv.move_value(&pending_key, &running_key)?;

            Ok(Some(RunningTask {
                key: running_key,
                name: running.name,
                timestamp_millis: running.timestamp_millis,
                value,
            }))
        })?)
    }

    /// Reschedules running tasks that have timed out.
    pub fn reschedule_long_running_tasks(
        &self, reschedule_after: Option<&Duration>,
    ) -> Result<usize, Error> {
        let now = now();
        let reschedule_after =
            reschedule_after.unwrap_or(&Self::RESCHEDULE_AFTER);
        let reschedule_timeout =
            now.saturating_sub(reschedule_after.as_millis());

        Ok(self.store.execute(&Self::lock_scope(), |s| {
            let timed_out: Vec<_> = s
                .list_keys(&Self::running_scope())?
                .iter()
                .filter_map(|k| TaskKey::try_from(k).ok())
                .filter(|tk| tk.timestamp_millis <= reschedule_timeout)
                .collect();

            for tk in &timed_out {
                let pending_key = TaskKey {
                    name: tk.name.clone(),
                    timestamp_millis: now,
                }
                .pending_key();
                s.move_value(&tk.running_key(), &pending_key)?;
            }
            Ok(timed_out.len())
        })?)
    }
}


//------------ TaskKey -------------------------------------------------------

struct TaskKey {
    name: Segment,
    timestamp_millis: u128,
}

impl TaskKey {
    fn key_in(&self, scope: &str) -> Key {
        Key::new_scoped(
            Scope::from_segment(Segment::parse_lossy(scope)),
            Segment::parse_lossy(&format!(
                "{}{}{}", self.timestamp_millis, SEPARATOR, self.name
            )),
        )
    }

    fn running_key(&self) -> Key {
        self.key_in(RUNNING)
    }

    fn pending_key(&self) -> Key {
        self.key_in(PENDING)
    }
}

impl TryFrom<&Key> for TaskKey {
    type Error = Error;

    fn try_from(key: &Key) -> Result<Self, Self::Error> {
        let invalid = || Error::InvalidTaskKey(key.clone());
        let (ts, name) = key
            .name()
            .as_str()
            .split_once(SEPARATOR)
            .ok_or_else(invalid)?;
        Ok(TaskKey {
            name: Segment::parse(name).map_err(|_| invalid())?,
            timestamp_millis: u128::from_str(ts).map_err(|_| invalid())?,
        })
    }
}


//------------ RunningTask ---------------------------------------------------

/// A task claimed from the queue.
#[derive(Clone, Debug)]
pub struct RunningTask {
    pub key: Key,
    pub name: Segment,
    pub timestamp_millis: u128,
    pub value: Value,
}


//------------ ScheduleMode --------------------------------------------------

/// Defines scheduling behaviour in case a task by the same name already exists.
#[derive(Clone, Copy, Debug)]
pub enum ScheduleMode {
    /// Store new task:
    /// - replace old task if it exists
    /// - do NOT finish old task
    ReplaceExisting,

    /// Store new task:
    /// - replace old task if it exists
    /// - use the soonest scheduled time if old task exists
    /// - do NOT finish old task if it is running
    ReplaceExistingSoonest,

    /// Store new task:
    /// - replace old task if it exists
    /// - finish old task if it is running
    FinishOrReplaceExisting,

    /// Store new task:
    /// - replace old task if it exists
    /// - use the soonest scheduled time if old task exists
    /// - finish old task if it is running
    FinishOrReplaceExistingSoonest,

    /// Keep existing pending or running task and in that case do not
    /// add the new task. Otherwise just add the new task.
    IfMissing,
}


//------------ Helpers -------------------------------------------------------

const SEPARATOR: char = '-';
const PENDING: &str = "pending";
const RUNNING: &str = "running";

pub fn now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

fn find_task(
    kv: &mut Transaction<'_>, scope: &Scope, name: &Segment,
) -> Result<Option<TaskKey>, KeyValueError> {
    Ok(kv
        .list_keys(scope)?
        .iter()
        .filter_map(|k| TaskKey::try_from(k).ok())
        .find(|tk| &tk.name == name))
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Storage(KeyValueError),
    InvalidTaskKey(Key),
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Storage(err) => write!(f, "task queue storage error: {err}"),
            Error::InvalidTaskKey(key) => write!(f, "invalid task key: {key}"),
            Error::Other(msg) => f.write_str(msg),
        }
    }
}

impl error::Error for Error {}

impl From<KeyValueError> for Error {
    fn from(err: KeyValueError) -> Self {
        Error::Storage(err)
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::mem_storage_uri;

    fn queue() -> Queue {
        Queue::create(&mem_storage_uri(), "test_queue").unwrap()
    }

    fn name(s: &str) -> Segment {
        Segment::parse(s).unwrap()
    }

    #[test]
    fn schedule_claim_finish() {
        let queue = queue();
        let value = Value::from("value");

        for nr in 1..=10 {
            queue.schedule_task(
                &name(&format!("job_{nr}")), &value, None,
                ScheduleMode::FinishOrReplaceExisting,
            ).unwrap();
        }
        assert_eq!(queue.pending_tasks_remaining().unwrap(), 10);
        assert_eq!(queue.running_tasks_remaining().unwrap(), 0);

        let task = queue.claim_scheduled_pending_task().unwrap().unwrap();
        assert_eq!(queue.pending_tasks_remaining().unwrap(), 9);
        assert_eq!(queue.running_tasks_remaining().unwrap(), 1);

        queue.finish_running_task(&task.key).unwrap();
        assert_eq!(queue.running_tasks_remaining().unwrap(), 0);
        assert!(queue.finish_running_task(&task.key).is_err());
    }

    #[test]
    fn test_reschedule_long_running() {
        let queue = queue();
        let job = name("job");

        queue.schedule_task(
            &job, &Value::from("value"), None,
            ScheduleMode::FinishOrReplaceExisting,
        ).unwrap();

        assert!(queue.claim_scheduled_pending_task().unwrap().is_some());
        assert!(queue.claim_scheduled_pending_task().unwrap().is_none());

        let moved = queue
            .reschedule_long_running_tasks(Some(&Duration::from_secs(0)))
            .unwrap();
        assert_eq!(moved, 1);
        assert!(queue.pending_task_scheduled(&job).unwrap().is_some());
        assert!(queue.claim_scheduled_pending_task().unwrap().is_some());
    }

    #[test]
    fn test_schedule_with_existing_task() {
        let queue = queue();
        let job = name("task");
        let value_1 = Value::from("value_1");
        let value_2 = Value::from("value_2");
        let in_a_while = now() + 180_000;

        // Replace.
        queue.schedule_task(
            &job, &value_1, None, ScheduleMode::FinishOrReplaceExisting
        ).unwrap();
        queue.schedule_task(
            &job, &value_2, None, ScheduleMode::FinishOrReplaceExisting
        ).unwrap();
        assert_eq!(queue.pending_tasks_remaining().unwrap(), 1);
        let task = queue.claim_scheduled_pending_task().unwrap().unwrap();
        assert_eq!(task.value, value_2);

        // Scheduling again finishes the running task.
        queue.schedule_task(
            &job, &value_1, None, ScheduleMode::FinishOrReplaceExisting
        ).unwrap();
        assert_eq!(queue.running_tasks_remaining().unwrap(), 0);
        assert_eq!(queue.pending_tasks_remaining().unwrap(), 1);

        // Keep existing.
        queue.schedule_task(
            &job, &value_2, Some(in_a_while), ScheduleMode::IfMissing
        ).unwrap();
        assert_eq!(queue.pending_task_value(&job).unwrap(), Some(value_1.clone()));

        // Soonest keeps the earlier time, but takes the new value.
        queue.schedule_task(
            &job, &value_2, Some(in_a_while),
            ScheduleMode::FinishOrReplaceExistingSoonest,
        ).unwrap();
        let task = queue.claim_scheduled_pending_task().unwrap().unwrap();
        assert_eq!(task.value, value_2);

        // Not due yet.
        queue.schedule_task(
            &job, &value_1, Some(in_a_while),
            ScheduleMode::FinishOrReplaceExisting,
        ).unwrap();
        assert_eq!(queue.pending_tasks_remaining().unwrap(), 1);
        assert!(queue.claim_scheduled_pending_task().unwrap().is_none());
    }

    #[test]
    fn cancel_removes_pending_and_running() {
        let queue = queue();
        let job = name("job");
        let value = Value::from(1);

        queue.schedule_task(&job, &value, None, ScheduleMode::IfMissing).unwrap();
        assert!(queue.cancel_task(&job).unwrap());
        assert!(!queue.cancel_task(&job).unwrap());

        queue.schedule_task(&job, &value, None, ScheduleMode::IfMissing).unwrap();
        queue.claim_scheduled_pending_task().unwrap().unwrap();
        assert!(queue.cancel_task(&job).unwrap());
        assert_eq!(queue.running_tasks_remaining().unwrap(), 0);
    }
}
