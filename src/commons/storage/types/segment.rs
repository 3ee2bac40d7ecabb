//! Address segments.

use std::{borrow, error, fmt, ops, str};
use serde::{Deserialize, Serialize};


//------------ Segment -------------------------------------------------------

/// An address segment.
///
/// This is a non-empty string that does not contain the segment separator
/// and does not start or end with whitespace.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[derive(Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Segment(String);

impl Segment {
    /// The segment separator character.
    ///
    /// This character will never appear inside a segment.
    pub const SEPARATOR: char = '/';

    /// Parses a segment from a string slice.
    pub fn parse(value: &str) -> Result<Self, ParseSegmentError> {
        Self::check(value)?;
        Ok(Segment(value.to_string()))
    }

    /// Creates a segment from a string, replacing anything invalid.
    ///
    /// Separators are replaced by `+`, surrounding whitespace is trimmed
    /// and an empty result becomes `_`.
    pub fn parse_lossy(value: &str) -> Self {
        let value = value.trim().replace(Self::SEPARATOR, "+");
        if value.is_empty() {
            Segment("_".to_string())
        }
        else {
            Segment(value)
        }
    }

    /// Creates a segment from a prefix and a displayable id.
    ///
    /// This is how most of the engine's keys are formed, e.g.
    /// `course-12` or `user-7`.
    pub fn with_id(prefix: &str, id: impl fmt::Display) -> Self {
        Self::parse_lossy(&format!("{prefix}-{id}"))
    }

    /// Returns the segment as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn check(value: &str) -> Result<(), ParseSegmentError> {
        if value.is_empty() {
            return Err(ParseSegmentError::Empty)
        }
        if value.starts_with(char::is_whitespace) {
            return Err(ParseSegmentError::LeadingWhitespace)
        }
        if value.ends_with(char::is_whitespace) {
            return Err(ParseSegmentError::TrailingWhitespace)
        }
        if value.contains(Self::SEPARATOR) {
            return Err(ParseSegmentError::ContainsSeparator)
        }
        Ok(())
    }
}


//--- FromStr, TryFrom, From

impl str::FromStr for Segment {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Segment::parse(s)
    }
}

impl TryFrom<String> for Segment {
    type Error = ParseSegmentError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Segment::check(&s)?;
        Ok(Segment(s))
    }
}

impl From<Segment> for String {
    fn from(segment: Segment) -> Self {
        segment.0
    }
}


//--- Deref, AsRef, Borrow

impl ops::Deref for Segment {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Segment {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl borrow::Borrow<str> for Segment {
    fn borrow(&self) -> &str {
        &self.0
    }
}


//--- Display

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}


//------------ ParseSegmentError ---------------------------------------------

/// An error occurred while parsing a segment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseSegmentError {
    Empty,
    LeadingWhitespace,
    TrailingWhitespace,
    ContainsSeparator,
}

impl fmt::Display for ParseSegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseSegmentError::Empty => f.write_str("segments must be nonempty"),
            ParseSegmentError::LeadingWhitespace => {
                f.write_str("segments must not start with whitespace")
            }
            ParseSegmentError::TrailingWhitespace => {
                f.write_str("segments must not end with whitespace")
            }
            ParseSegmentError::ContainsSeparator => {
                write!(
                    f, "segments must not contain the separator '{}'",
                    Segment::SEPARATOR
                )
            }
        }
    }
}

impl error::Error for ParseSegmentError {}


//============ Tests =========================================================
