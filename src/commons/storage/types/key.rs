//! The key of a stored value.

use std::{fmt, str};
use super::scope::Scope;
use super::segment::{ParseSegmentError, Segment};


//------------ Key -----------------------------------------------------------

/// The key of a stored value.
///
/// A key consists of a [`Scope`] and a *name* represented by a
/// [`Segment`].
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Key {
    scope: Scope,
    name: Segment,
}

impl Key {
    /// Create a key from both a scope and a name.
    pub fn new_scoped(scope: Scope, name: Segment) -> Key {
        Key { scope, name }
    }

    /// Create a key in the global scope.
    pub fn new_global(name: Segment) -> Key {
        Key::new_scoped(Scope::global(), name)
    }

    /// Returns a reference to the name of the key.
    pub fn name(&self) -> &Segment {
        &self.name
    }

    /// Returns a reference to the scope of the key.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Adds a segment to the front of the scope of the key.
    pub fn add_super_scope(&mut self, super_scope: Segment) {
        self.scope.add_super_scope(super_scope);
    }
}


//--- FromStr

impl str::FromStr for Key {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments: Vec<Segment> = s
            .split(Segment::SEPARATOR)
            .map(Segment::parse)
            .collect::<Result<_, _>>()?;
        let name = segments.pop().ok_or(ParseSegmentError::Empty)?;
        Ok(Key { scope: Scope::new(segments), name })
    }
}


//--- Display

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.scope.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}{}", self.scope, Segment::SEPARATOR, self.name)
        }
    }
}


//============ Tests =========================================================
