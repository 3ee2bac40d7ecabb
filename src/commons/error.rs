//! Defines all engine errors.

use std::{error, fmt, io};
use crate::commons::queue;
use crate::commons::storage::KeyValueError;
use crate::enrolment::provider::ProviderError;
use crate::enrolment::types::{CourseId, ProviderId};


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    //-----------------------------------------------------------------
    // System Issues
    //-----------------------------------------------------------------
    IoError(io::Error),
    KeyValueError(KeyValueError),
    QueueError(queue::Error),
    JsonError(serde_json::Error),

    //-----------------------------------------------------------------
    // Enrolment Issues
    //-----------------------------------------------------------------
    Provider { provider: ProviderId, err: ProviderError },
    UnknownProvider(ProviderId),
    UnknownCourse(CourseId),
    InvalidValue(String),

    //-----------------------------------------------------------------
    // Background Jobs
    //-----------------------------------------------------------------
    InvalidTask(String),

    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "I/O error: {e}"),
            Error::KeyValueError(e) => write!(f, "Storage error: {e}"),
            Error::QueueError(e) => write!(f, "Task queue error: {e}"),
            Error::JsonError(e) => write!(f, "Invalid JSON: {e}"),
            Error::Provider { provider, err } => {
                write!(f, "Enrolment provider '{provider}' failed: {err}")
            }
            Error::UnknownProvider(id) => {
                write!(f, "Unknown enrolment provider '{id}'")
            }
            Error::UnknownCourse(id) => write!(f, "Unknown course '{id}'"),
            Error::InvalidValue(msg) => write!(f, "Invalid value: {msg}"),
            Error::InvalidTask(msg) => write!(f, "Invalid task: {msg}"),
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

impl Error {
    pub fn custom(msg: impl fmt::Display) -> Self {
        Error::Custom(msg.to_string())
    }

    pub fn invalid_value(msg: impl fmt::Display) -> Self {
        Error::InvalidValue(msg.to_string())
    }

    pub fn provider(provider: &ProviderId, err: ProviderError) -> Self {
        Error::Provider { provider: provider.clone(), err }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::KeyValueError(e) => Some(e),
            Error::QueueError(e) => Some(e),
            Error::JsonError(e) => Some(e),
            Error::Provider { err, .. } => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<KeyValueError> for Error {
    fn from(e: KeyValueError) -> Self {
        Error::KeyValueError(e)
    }
}

impl From<queue::Error> for Error {
    fn from(e: queue::Error) -> Self {
        Error::QueueError(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::JsonError(e)
    }
}
