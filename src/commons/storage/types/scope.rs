//! The scope portion of a value address.

use std::{fmt, str};
use super::segment::{ParseSegmentError, Segment};


//------------ Scope ---------------------------------------------------------

/// The scope of a key.
///
/// A scope consists of a sequence of zero or more segments. The empty
/// scope is the global scope.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Scope {
    segments: Vec<Segment>,
}

impl Scope {
    /// Create a new scope from a vec of segments.
    pub fn new(segments: Vec<Segment>) -> Self {
        Scope { segments }
    }

    /// Create an empty scope.
    pub fn global() -> Self {
        Scope::new(Vec::new())
    }

    /// Create a scope from a single segment.
    pub fn from_segment(segment: Segment) -> Self {
        Scope::new(vec![segment])
    }

    /// Returns whether the scope is the global scope, ie., empty.
    pub fn is_global(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the number of segments in the scope.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns whether the scope is empty.
    ///
    /// This is identical to being global.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the segments of the scope.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns whether the scope starts with a certain prefix.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Creates a new scope by adding a segment to the end of this scope.
    pub fn with_sub_scope(&self, sub_scope: Segment) -> Self {
        let mut clone = self.clone();
        clone.add_sub_scope(sub_scope);
        clone
    }

    /// Adds a segment to the end of the scope.
    pub fn add_sub_scope(&mut self, sub_scope: Segment) {
        self.segments.push(sub_scope);
    }

    /// Adds a segment to the front of the scope.
    pub fn add_super_scope(&mut self, super_scope: Segment) {
        self.segments.insert(0, super_scope);
    }
}


//--- FromStr, From

impl str::FromStr for Scope {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_suffix(Segment::SEPARATOR).unwrap_or(s);
        if s.is_empty() {
            return Ok(Scope::global())
        }
        let segments = s
            .split(Segment::SEPARATOR)
            .map(Segment::parse)
            .collect::<Result<_, _>>()?;
        Ok(Scope { segments })
    }
}

impl From<Vec<Segment>> for Scope {
    fn from(segments: Vec<Segment>) -> Self {
        Scope { segments }
    }
}


//--- Display

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                write!(f, "{}", Segment::SEPARATOR)?;
            }
            first = false;
            f.write_str(segment.as_str())?;
        }
        Ok(())
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with() {
        let full: Scope = "this/is/a/beautiful/scope".parse().unwrap();
        let partial: Scope = "this/is/a".parse().unwrap();
        let wrong: Scope = "this/is/b".parse().unwrap();

        assert!(full.starts_with(&partial));
        assert!(full.starts_with(&Scope::global()));
        assert!(!partial.starts_with(&full));
        assert!(!full.starts_with(&wrong));
    }

    #[test]
    fn display_round_trips() {
        let scope: Scope = "course-1/user-2".parse().unwrap();
        assert_eq!(scope.to_string(), "course-1/user-2");
        assert_eq!(scope.len(), 2);
        assert!("".parse::<Scope>().unwrap().is_global());
    }
}
