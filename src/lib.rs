//! The _enrolment_ library crate.
//!
//! Decides whether a learner has access to a course by combining the
//! verdicts of a set of enrolment providers, caches the combined verdict,
//! and keeps the cache consistent as providers change.

pub mod commons;
pub mod cli;
pub mod config;
pub mod constants;
pub mod enrolment;
pub mod jobs;
pub mod test;
