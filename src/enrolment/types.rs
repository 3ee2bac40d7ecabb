//! Identifiers and basic types.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::commons::storage::Segment;


//------------ UserId --------------------------------------------------------

/// The identifier of a learner.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    pub const fn new(id: u64) -> Self {
        UserId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the storage segment for this user, i.e., `user-<id>`.
    pub fn segment(self) -> Segment {
        Segment::with_id("user", self.0)
    }

    /// Parses a storage segment created by [`UserId::segment`].
    pub fn from_segment(segment: &Segment) -> Option<Self> {
        segment
            .as_str()
            .strip_prefix("user-")
            .and_then(|id| u64::from_str(id).ok())
            .map(UserId)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        UserId(id)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str(s).map(UserId)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}


//------------ CourseId ------------------------------------------------------

/// The identifier of a course.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct CourseId(u64);

impl CourseId {
    pub const fn new(id: u64) -> Self {
        CourseId(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the storage segment for this course, i.e., `course-<id>`.
    pub fn segment(self) -> Segment {
        Segment::with_id("course", self.0)
    }

    /// Parses a storage segment created by [`CourseId::segment`].
    pub fn from_segment(segment: &Segment) -> Option<Self> {
        segment
            .as_str()
            .strip_prefix("course-")
            .and_then(|id| u64::from_str(id).ok())
            .map(CourseId)
    }
}

impl From<u64> for CourseId {
    fn from(id: u64) -> Self {
        CourseId(id)
    }
}

impl FromStr for CourseId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str(s).map(CourseId)
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}


//------------ ProviderId ----------------------------------------------------

/// The identifier of an enrolment provider, e.g., `manual`.
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        ProviderId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the storage segment for this provider.
    pub fn segment(&self) -> Segment {
        Segment::parse_lossy(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        ProviderId(id.to_string())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}


//------------ CourseStatus --------------------------------------------------

/// The publication status of a course.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Published,
    Draft,
    Pending,
    Private,
    Trashed,
}

impl CourseStatus {
    /// Returns whether learners can be enrolled in a course in this status.
    pub fn is_published(self) -> bool {
        matches!(self, CourseStatus::Published)
    }
}

impl FromStr for CourseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "published" | "publish" => Ok(CourseStatus::Published),
            "draft" => Ok(CourseStatus::Draft),
            "pending" => Ok(CourseStatus::Pending),
            "private" => Ok(CourseStatus::Private),
            "trashed" | "trash" => Ok(CourseStatus::Trashed),
            _ => Err(format!("unknown course status: {s}")),
        }
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            CourseStatus::Published => "published",
            CourseStatus::Draft => "draft",
            CourseStatus::Pending => "pending",
            CourseStatus::Private => "private",
            CourseStatus::Trashed => "trashed",
        })
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_round_trip() {
        let user = UserId::new(12);
        assert_eq!(user.segment().as_str(), "user-12");
        assert_eq!(UserId::from_segment(&user.segment()), Some(user));

        let course = CourseId::new(3);
        assert_eq!(course.segment().as_str(), "course-3");
        assert_eq!(CourseId::from_segment(&user.segment()), None);
    }

    #[test]
    fn course_status() {
        assert!(CourseStatus::Published.is_published());
        assert!(!CourseStatus::Private.is_published());
        assert_eq!(
            CourseStatus::from_str("trash").unwrap(), CourseStatus::Trashed
        );
        assert_eq!(
            serde_json::to_string(&CourseStatus::Draft).unwrap(), "\"draft\""
        );
    }
}
