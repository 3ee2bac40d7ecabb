//! In-memory storage.
//!
//! Stores opened for the same location and namespace share their values
//! for the lifetime of the process. A location is selected by the path of
//! the `memory:` URI, which must be empty or a number. Tests use a random
//! number to get a fresh location.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use lazy_static::lazy_static;
use url::Url;
use crate::commons::storage::{Key, KeyValueError, Scope, Segment, Transaction};
use crate::commons::storage::store::Value;


//------------ Values --------------------------------------------------------

pub type Values = BTreeMap<Key, Value>;

pub fn list_keys(values: &Values, scope: &Scope) -> Vec<Key> {
    values
        .keys()
        .filter(|key| key.scope().starts_with(scope))
        .cloned()
        .collect()
}


//------------ Locations -----------------------------------------------------

type LocationKey = (Option<u64>, Segment);

lazy_static! {
    static ref LOCATIONS: Mutex<HashMap<LocationKey, Arc<Mutex<Values>>>> =
        Mutex::new(HashMap::new());
}


//------------ Store ---------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Store {
    values: Arc<Mutex<Values>>,
}

impl Store {
    /// Opens the store if the URI uses the `memory` scheme.
    pub fn from_uri(
        uri: &Url, namespace: &Segment,
    ) -> Result<Option<Self>, KeyValueError> {
        if uri.scheme() != "memory" {
            return Ok(None)
        }
        let path = if uri.path().is_empty() {
            None
        }
        else {
            Some(u64::from_str(uri.path()).map_err(|_| {
                KeyValueError::InvalidUri(format!(
                    "invalid memory path '{}'", uri.path()
                ))
            })?)
        };

        let mut locations = LOCATIONS.lock().expect("poisoned lock");
        let values = locations
            .entry((path, namespace.clone()))
            .or_default()
            .clone();
        Ok(Some(Store { values }))
    }

    pub fn execute<F, T>(&self, op: F) -> Result<T, KeyValueError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, KeyValueError>,
    {
        let mut values = self.values.lock().expect("poisoned lock");
        op(&mut Transaction::memory(&mut values))
    }
}


//============ Tests =========================================================
