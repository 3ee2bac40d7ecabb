//! Storage backends.
//!
//! Each backend provides a `Store` with a `from_uri` constructor that
//! returns `Ok(None)` if the URI scheme is not its own.

pub mod disk;
pub mod memory;
