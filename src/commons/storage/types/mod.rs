//! Types for addressing stored data.

pub use self::key::Key;
pub use self::scope::Scope;
pub use self::segment::{ParseSegmentError, Segment};

mod key;
mod scope;
mod segment;
