//! The key-value store.

use std::{error, fmt, io};
use serde::de::DeserializeOwned;
use serde::ser::Serialize;
use url::Url;
use super::backends::{disk, memory};
use super::types::{Key, Scope, Segment};


//------------ Value ---------------------------------------------------------

pub type Value = serde_json::Value;


//------------ KeyValueStore -------------------------------------------------

/// A namespaced store of JSON values addressed by [`Key`].
///
/// The backend is selected by the scheme of the storage URI:
/// `memory:` (optionally followed by a numeric seed to get an isolated
/// location) or `local://` followed by a directory path.
///
/// All access goes through [`KeyValueStore::execute`], which holds the
/// namespace lock for the duration of the closure. The convenience
/// methods each run a single operation that way.
#[derive(Debug)]
pub struct KeyValueStore {
    namespace: Segment,
    inner: StoreInner,
}

#[derive(Debug)]
enum StoreInner {
    Memory(memory::Store),
    Disk(disk::Store),
}

impl KeyValueStore {
    /// Opens the store for `namespace` at the given storage URI.
    pub fn create(
        storage_uri: &Url, namespace: &str,
    ) -> Result<Self, KeyValueError> {
        let namespace = Segment::parse(namespace).map_err(|err| {
            KeyValueError::InvalidNamespace(format!("{namespace}: {err}"))
        })?;

        if let Some(store) = memory::Store::from_uri(storage_uri, &namespace)? {
            return Ok(KeyValueStore {
                namespace, inner: StoreInner::Memory(store)
            })
        }
        if let Some(store) = disk::Store::from_uri(storage_uri, &namespace)? {
            return Ok(KeyValueStore {
                namespace, inner: StoreInner::Disk(store)
            })
        }

        Err(KeyValueError::UnknownScheme(storage_uri.scheme().into()))
    }

    /// Returns the namespace of this store.
    pub fn namespace(&self) -> &Segment {
        &self.namespace
    }

    /// Runs `op` while holding the lock for this store.
    ///
    /// The `scope` argument names the part of the store the operation is
    /// mostly concerned with. It is used for diagnostics only: locking is
    /// per namespace.
    pub fn execute<F, T>(&self, scope: &Scope, op: F) -> Result<T, KeyValueError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, KeyValueError>,
    {
        log::trace!("execute on {}/{}", self.namespace, scope);
        match &self.inner {
            StoreInner::Memory(store) => store.execute(op),
            StoreInner::Disk(store) => store.execute(op),
        }
    }
}

/// # Single operations
impl KeyValueStore {
    pub fn is_empty(&self) -> Result<bool, KeyValueError> {
        self.execute(&Scope::global(), |kv| {
            kv.list_keys(&Scope::global()).map(|keys| keys.is_empty())
        })
    }

    pub fn has(&self, key: &Key) -> Result<bool, KeyValueError> {
        self.execute(key.scope(), |kv| kv.has(key))
    }

    pub fn get<T: DeserializeOwned>(
        &self, key: &Key,
    ) -> Result<Option<T>, KeyValueError> {
        self.execute(key.scope(), |kv| kv.get(key))
    }

    pub fn get_value(&self, key: &Key) -> Result<Option<Value>, KeyValueError> {
        self.execute(key.scope(), |kv| kv.get_value(key))
    }

    pub fn store<T: Serialize>(
        &self, key: &Key, value: &T,
    ) -> Result<(), KeyValueError> {
        self.execute(key.scope(), |kv| kv.store(key, value))
    }

    pub fn delete(&self, key: &Key) -> Result<bool, KeyValueError> {
        self.execute(key.scope(), |kv| kv.delete(key))
    }

    pub fn list_keys(&self, scope: &Scope) -> Result<Vec<Key>, KeyValueError> {
        self.execute(scope, |kv| kv.list_keys(scope))
    }
}


//------------ Transaction ---------------------------------------------------

/// Access to the store while its lock is held.
pub struct Transaction<'a>(TransactionInner<'a>);

enum TransactionInner<'a> {
    Memory(&'a mut memory::Values),
    Disk(&'a disk::Store),
}

impl<'a> Transaction<'a> {
    pub(super) fn memory(values: &'a mut memory::Values) -> Self {
        Transaction(TransactionInner::Memory(values))
    }

    pub(super) fn disk(store: &'a disk::Store) -> Self {
        Transaction(TransactionInner::Disk(store))
    }
}

/// # Reading
impl Transaction<'_> {
    pub fn has(&mut self, key: &Key) -> Result<bool, KeyValueError> {
        match &mut self.0 {
            TransactionInner::Memory(values) => Ok(values.contains_key(key)),
            TransactionInner::Disk(store) => store.has(key),
        }
    }

    /// Returns the raw JSON value for the key, if present.
    pub fn get_value(&mut self, key: &Key) -> Result<Option<Value>, KeyValueError> {
        match &mut self.0 {
            TransactionInner::Memory(values) => Ok(values.get(key).cloned()),
            TransactionInner::Disk(store) => store.get_value(key),
        }
    }

    /// Returns the value for the key deserialized into `T`.
    pub fn get<T: DeserializeOwned>(
        &mut self, key: &Key,
    ) -> Result<Option<T>, KeyValueError> {
        match self.get_value(key)? {
            Some(value) => {
                serde_json::from_value(value).map(Some).map_err(|err| {
                    KeyValueError::deserialize(key, err)
                })
            }
            None => Ok(None),
        }
    }

    /// Returns all keys in the scope, including those in sub-scopes.
    ///
    /// Keys are returned in order.
    pub fn list_keys(&mut self, scope: &Scope) -> Result<Vec<Key>, KeyValueError> {
        match &mut self.0 {
            TransactionInner::Memory(values) => {
                Ok(memory::list_keys(values, scope))
            }
            TransactionInner::Disk(store) => store.list_keys(scope),
        }
    }
}

/// # Writing
impl Transaction<'_> {
    pub fn store<T: Serialize>(
        &mut self, key: &Key, value: &T,
    ) -> Result<(), KeyValueError> {
        let value = serde_json::to_value(value).map_err(|err| {
            KeyValueError::serialize(key, err)
        })?;
        self.store_value(key, value)
    }

    pub fn store_value(
        &mut self, key: &Key, value: Value,
    ) -> Result<(), KeyValueError> {
        match &mut self.0 {
            TransactionInner::Memory(values) => {
                values.insert(key.clone(), value);
                Ok(())
            }
            TransactionInner::Disk(store) => store.store_value(key, &value),
        }
    }

    /// Removes the value for a key.
    ///
    /// Returns whether there was a value.
    pub fn delete(&mut self, key: &Key) -> Result<bool, KeyValueError> {
        match &mut self.0 {
            TransactionInner::Memory(values) => Ok(values.remove(key).is_some()),
            TransactionInner::Disk(store) => store.delete(key),
        }
    }

    /// Moves a value from one key to another. Fails if there is no value.
    pub fn move_value(&mut self, from: &Key, to: &Key) -> Result<(), KeyValueError> {
        match &mut self.0 {
            TransactionInner::Memory(values) => {
                let value = values.remove(from).ok_or_else(|| {
                    KeyValueError::NotFound(from.clone())
                })?;
                values.insert(to.clone(), value);
                Ok(())
            }
            TransactionInner::Disk(store) => store.move_value(from, to),
        }
    }

    /// Removes all keys in the scope and its sub-scopes.
    pub fn delete_scope(&mut self, scope: &Scope) -> Result<(), KeyValueError> {
        match &mut self.0 {
            TransactionInner::Memory(values) => {
                values.retain(|key, _| !key.scope().starts_with(scope));
                Ok(())
            }
            TransactionInner::Disk(store) => store.delete_scope(scope),
        }
    }
}


//------------ KeyValueError -------------------------------------------------

#[derive(Debug)]
pub enum KeyValueError {
    UnknownScheme(String),
    InvalidUri(String),
    InvalidNamespace(String),
    Io(String, io::Error),
    Serialize { key: Key, err: String },
    Deserialize { key: Key, err: String },
    NotFound(Key),
    Other(String),
}

impl KeyValueError {
    pub fn io(context: impl fmt::Display, err: io::Error) -> Self {
        KeyValueError::Io(context.to_string(), err)
    }

    pub fn serialize(key: &Key, err: impl fmt::Display) -> Self {
        KeyValueError::Serialize { key: key.clone(), err: err.to_string() }
    }

    pub fn deserialize(key: &Key, err: impl fmt::Display) -> Self {
        KeyValueError::Deserialize { key: key.clone(), err: err.to_string() }
    }

    /// Returns whether the error is caused by unparseable stored data.
    pub fn is_corrupt_value(&self) -> bool {
        matches!(self, KeyValueError::Deserialize { .. })
    }
}

impl fmt::Display for KeyValueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyValueError::UnknownScheme(scheme) => {
                write!(f, "unknown storage scheme: {scheme}")
            }
            KeyValueError::InvalidUri(uri) => {
                write!(f, "invalid storage uri: {uri}")
            }
            KeyValueError::InvalidNamespace(ns) => {
                write!(f, "invalid namespace: {ns}")
            }
            KeyValueError::Io(context, err) => write!(f, "{context}: {err}"),
            KeyValueError::Serialize { key, err } => {
                write!(f, "failed to serialize value for key '{key}': {err}")
            }
            KeyValueError::Deserialize { key, err } => {
                write!(f, "failed to deserialize value for key '{key}': {err}")
            }
            KeyValueError::NotFound(key) => write!(f, "no value for key '{key}'"),
            KeyValueError::Other(msg) => f.write_str(msg),
        }
    }
}

impl error::Error for KeyValueError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            KeyValueError::Io(_, err) => Some(err),
            _ => None,
        }
    }
}
