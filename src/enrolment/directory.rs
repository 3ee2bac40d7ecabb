//! Access to the courses and learners of the site.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::RwLock;
use serde::{Deserialize, Serialize};
use crate::commons::error::Error;
use crate::commons::EngineResult;
use super::types::{CourseId, CourseStatus, UserId};


//------------ SiteDirectory -------------------------------------------------

/// What the engine needs to know about the site it serves.
pub trait SiteDirectory: fmt::Debug {
    /// Returns the status of the course or `None` if there is no such course.
    fn course_status(&self, course: CourseId) -> Option<CourseStatus>;

    /// Returns the ids of all courses.
    fn course_ids(&self) -> Vec<CourseId>;

    /// Returns the ids of all learners.
    fn learner_ids(&self) -> Vec<UserId>;
}


//------------ StaticDirectory -----------------------------------------------

/// A directory kept in memory.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    inner: RwLock<DirectoryContent>,
}

#[derive(Clone, Debug, Default)]
struct DirectoryContent {
    courses: BTreeMap<CourseId, CourseStatus>,
    learners: BTreeSet<UserId>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a directory from a JSON file.
    ///
    /// The file contains an object with a `courses` array of objects with
    /// `id` and `status` and a `learners` array of ids.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let json = std::fs::read(path).map_err(|err| {
            Error::custom(format!(
                "Cannot read site directory '{}': {}", path.display(), err
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &[u8]) -> EngineResult<Self> {
        let wire: DirectoryWire = serde_json::from_slice(json)?;
        let directory = StaticDirectory::new();
        for course in wire.courses {
            directory.set_course(course.id, course.status);
        }
        for learner in wire.learners {
            directory.add_learner(learner);
        }
        Ok(directory)
    }

    /// Adds a course or changes its status.
    ///
    /// Returns the previous status, if any.
    pub fn set_course(
        &self, course: CourseId, status: CourseStatus,
    ) -> Option<CourseStatus> {
        self.write().courses.insert(course, status)
    }

    pub fn add_learner(&self, user: UserId) {
        self.write().learners.insert(user);
    }

    pub fn add_learners(&self, users: impl IntoIterator<Item = UserId>) {
        self.write().learners.extend(users);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DirectoryContent> {
        self.inner.read().expect("poisoned lock")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DirectoryContent> {
        self.inner.write().expect("poisoned lock")
    }
}

impl SiteDirectory for StaticDirectory {
    fn course_status(&self, course: CourseId) -> Option<CourseStatus> {
        self.read().courses.get(&course).copied()
    }

    fn course_ids(&self) -> Vec<CourseId> {
        self.read().courses.keys().copied().collect()
    }

    fn learner_ids(&self) -> Vec<UserId> {
        self.read().learners.iter().copied().collect()
    }
}


//------------ DirectoryWire -------------------------------------------------

#[derive(Deserialize, Serialize)]
struct DirectoryWire {
    #[serde(default)]
    courses: Vec<CourseWire>,
    #[serde(default)]
    learners: Vec<UserId>,
}

#[derive(Deserialize, Serialize)]
struct CourseWire {
    id: CourseId,
    status: CourseStatus,
}


//============ Tests =========================================================
