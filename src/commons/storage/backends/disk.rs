//! Filesystem-based storage.

use std::{fs, io};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use url::Url;
use crate::commons::storage::{Key, KeyValueError, Scope, Segment, Transaction};
use crate::commons::storage::store::Value;


//------------ Constants -----------------------------------------------------

/// The directory under the base that contains temporary files.
const TMP_FILE_DIR: &str = ".tmp";

/// The directory under the base that contains the lock files.
const LOCK_FILE_DIR: &str = ".locks";

/// The extension of files holding values.
const VALUE_EXTENSION: &str = "json";


//------------ Store ---------------------------------------------------------

/// A storage backend that uses the filesystem for storing values.
///
/// Each namespace has its own directory under the base directory. A key's
/// scope is translated into a directory path under the namespace directory
/// and its name into a file name with the extension `.json`. Values are
/// written to a temporary file first and then moved into place.
///
/// Operations on a namespace are serialized through an advisory lock on
/// the file `.locks/$(namespace).lock`.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    tmp: PathBuf,
    lock_file: PathBuf,
}

impl Store {
    /// Opens the store if the URI uses the `local` scheme.
    pub fn from_uri(
        uri: &Url, namespace: &Segment,
    ) -> Result<Option<Self>, KeyValueError> {
        if uri.scheme() != "local" {
            return Ok(None)
        }
        let base = PathBuf::from(format!(
            "{}{}", uri.host_str().unwrap_or_default(), uri.path()
        ));
        if base.as_os_str().is_empty() {
            return Err(KeyValueError::InvalidUri(uri.to_string()))
        }
        Ok(Some(Store {
            root: base.join(namespace.as_str()),
            tmp: base.join(TMP_FILE_DIR),
            lock_file: base
                .join(LOCK_FILE_DIR)
                .join(format!("{namespace}.lock")),
        }))
    }

    pub fn execute<F, T>(&self, op: F) -> Result<T, KeyValueError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, KeyValueError>,
    {
        if let Some(parent) = self.lock_file.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)
            .map_err(|err| {
                KeyValueError::io(
                    format!("cannot open lock file '{}'", self.lock_file.display()),
                    err,
                )
            })?;
        let mut lock = fd_lock::RwLock::new(file);
        let _guard = lock.write().map_err(|err| {
            KeyValueError::io(
                format!("cannot lock '{}'", self.lock_file.display()), err
            )
        })?;
        op(&mut Transaction::disk(self))
    }

    fn scope_path(&self, scope: &Scope) -> PathBuf {
        let mut path = self.root.clone();
        for segment in scope.segments() {
            path.push(segment.as_str());
        }
        path
    }

    fn key_path(&self, key: &Key) -> PathBuf {
        self.scope_path(key.scope())
            .join(format!("{}.{}", key.name(), VALUE_EXTENSION))
    }
}

/// # Reading
impl Store {
    pub fn has(&self, key: &Key) -> Result<bool, KeyValueError> {
        Ok(self.key_path(key).is_file())
    }

    pub fn get_value(&self, key: &Key) -> Result<Option<Value>, KeyValueError> {
        let path = self.key_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(err) => {
                return Err(KeyValueError::io(
                    format!("cannot read '{}'", path.display()), err
                ))
            }
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            KeyValueError::deserialize(key, err)
        })
    }

    pub fn list_keys(&self, scope: &Scope) -> Result<Vec<Key>, KeyValueError> {
        let mut keys = Vec::new();
        let dir = self.scope_path(scope);
        if dir.is_dir() {
            self.collect_keys(&dir, scope.clone(), &mut keys)?;
        }
        keys.sort();
        Ok(keys)
    }

    fn collect_keys(
        &self, dir: &Path, scope: Scope, keys: &mut Vec<Key>,
    ) -> Result<(), KeyValueError> {
        let entries = fs::read_dir(dir).map_err(|err| {
            KeyValueError::io(format!("cannot read dir '{}'", dir.display()), err)
        })?;
        for entry in entries {
            let entry = entry.map_err(|err| {
                KeyValueError::io(
                    format!("cannot read dir '{}'", dir.display()), err
                )
            })?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue
            };
            if path.is_dir() {
                if let Ok(segment) = Segment::parse(file_name) {
                    self.collect_keys(
                        &path, scope.with_sub_scope(segment), keys
                    )?;
                }
            }
            else if let Some(name) = file_name
                .strip_suffix(VALUE_EXTENSION)
                .and_then(|name| name.strip_suffix('.'))
            {
                if let Ok(name) = Segment::parse(name) {
                    keys.push(Key::new_scoped(scope.clone(), name));
                }
            }
        }
        Ok(())
    }
}

/// # Writing
impl Store {
    pub fn store_value(&self, key: &Key, value: &Value) -> Result<(), KeyValueError> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }
        create_dir_all(&self.tmp)?;

        let json = serde_json::to_vec_pretty(value).map_err(|err| {
            KeyValueError::serialize(key, err)
        })?;
        let mut tmp = NamedTempFile::new_in(&self.tmp).map_err(|err| {
            KeyValueError::io(
                format!("cannot create temp file in '{}'", self.tmp.display()),
                err,
            )
        })?;
        tmp.write_all(&json).map_err(|err| {
            KeyValueError::io("cannot write temp file", err)
        })?;
        tmp.persist(&path).map_err(|err| {
            KeyValueError::io(
                format!("cannot persist '{}'", path.display()), err.error
            )
        })?;
        Ok(())
    }

    pub fn delete(&self, key: &Key) -> Result<bool, KeyValueError> {
        let path = self.key_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(KeyValueError::io(
                format!("cannot remove '{}'", path.display()), err
            )),
        }
    }

    pub fn move_value(&self, from: &Key, to: &Key) -> Result<(), KeyValueError> {
        let from_path = self.key_path(from);
        if !from_path.is_file() {
            return Err(KeyValueError::NotFound(from.clone()))
        }
        let to_path = self.key_path(to);
        if let Some(parent) = to_path.parent() {
            create_dir_all(parent)?;
        }
        fs::rename(&from_path, &to_path).map_err(|err| {
            KeyValueError::io(
                format!(
                    "cannot rename '{}' to '{}'",
                    from_path.display(), to_path.display()
                ),
                err,
            )
        })
    }

    pub fn delete_scope(&self, scope: &Scope) -> Result<(), KeyValueError> {
        let path = self.scope_path(scope);
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(KeyValueError::io(
                format!("cannot remove dir '{}'", path.display()), err
            )),
        }
    }
}


//------------ Helpers -------------------------------------------------------

fn create_dir_all(path: &Path) -> Result<(), KeyValueError> {
    fs::create_dir_all(path).map_err(|err| {
        KeyValueError::io(format!("cannot create dir '{}'", path.display()), err)
    })
}


//============ Tests =========================================================
