//! Persistent storage of data.

pub use self::store::{KeyValueError, KeyValueStore, Transaction, Value};
pub use self::types::{Key, ParseSegmentError, Scope, Segment};

mod backends;
mod store;
mod types;
