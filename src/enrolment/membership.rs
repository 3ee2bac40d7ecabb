//! The authoritative course membership relation.

use std::fmt;
use url::Url;
use crate::commons::storage::{Key, KeyValueStore, Scope, Segment};
use crate::commons::EngineResult;
use crate::constants::MEMBERSHIP_NS;
use super::provider::CourseUser;
use super::types::{CourseId, UserId};


//------------ MembershipStore -----------------------------------------------

/// Whether a learner currently is a member of a course.
///
/// This is kept separately from the cached enrolment results. The two are
/// updated together but not atomically.
pub trait MembershipStore: fmt::Debug {
    /// Adds the learner. Returns whether anything changed.
    fn add(&self, user: CourseUser) -> EngineResult<bool>;

    /// Removes the learner. Returns whether anything changed.
    fn remove(&self, user: CourseUser) -> EngineResult<bool>;

    fn is_member(&self, user: CourseUser) -> EngineResult<bool>;

    /// Returns all members of the course.
    fn members(&self, course: CourseId) -> EngineResult<Vec<UserId>>;

    /// Returns all courses the learner is a member of.
    fn courses(&self, user: UserId) -> EngineResult<Vec<CourseId>>;

    /// Sets membership to the given state. Returns whether anything changed.
    fn set(&self, user: CourseUser, member: bool) -> EngineResult<bool> {
        if member {
            self.add(user)
        }
        else {
            self.remove(user)
        }
    }
}


//------------ KvMembershipStore ---------------------------------------------

/// A membership store on top of the key-value store.
///
/// Membership is indexed both ways: `courses/course-<c>/user-<u>` and
/// `users/user-<u>/course-<c>`.
#[derive(Debug)]
pub struct KvMembershipStore {
    kv: KeyValueStore,
}

impl KvMembershipStore {
    pub fn create(storage_uri: &Url) -> EngineResult<Self> {
        Ok(KvMembershipStore {
            kv: KeyValueStore::create(storage_uri, MEMBERSHIP_NS)?,
        })
    }

    fn course_scope(course: CourseId) -> Scope {
        Scope::new(vec![Segment::parse_lossy("courses"), course.segment()])
    }

    fn user_scope(user: UserId) -> Scope {
        Scope::new(vec![Segment::parse_lossy("users"), user.segment()])
    }

    fn course_key(user: CourseUser) -> Key {
        Key::new_scoped(Self::course_scope(user.course), user.user.segment())
    }

    fn user_key(user: CourseUser) -> Key {
        Key::new_scoped(Self::user_scope(user.user), user.course.segment())
    }
}

impl MembershipStore for KvMembershipStore {
    fn add(&self, user: CourseUser) -> EngineResult<bool> {
        let course_key = Self::course_key(user);
        let user_key = Self::user_key(user);
        Ok(self.kv.execute(course_key.scope(), |kv| {
            if kv.has(&course_key)? && kv.has(&user_key)? {
                return Ok(false)
            }
            kv.store(&course_key, &true)?;
            kv.store(&user_key, &true)?;
            Ok(true)
        })?)
    }

    fn remove(&self, user: CourseUser) -> EngineResult<bool> {
        let course_key = Self::course_key(user);
        let user_key = Self::user_key(user);
        Ok(self.kv.execute(course_key.scope(), |kv| {
            let by_course = kv.delete(&course_key)?;
            let by_user = kv.delete(&user_key)?;
            Ok(by_course || by_user)
        })?)
    }

    fn is_member(&self, user: CourseUser) -> EngineResult<bool> {
        Ok(self.kv.has(&Self::course_key(user))?)
    }

    fn members(&self, course: CourseId) -> EngineResult<Vec<UserId>> {
        Ok(self
            .kv
            .list_keys(&Self::course_scope(course))?
            .iter()
            .filter_map(|key| UserId::from_segment(key.name()))
            .collect())
    }

    fn courses(&self, user: UserId) -> EngineResult<Vec<CourseId>> {
        Ok(self
            .kv
            .list_keys(&Self::user_scope(user))?
            .iter()
            .filter_map(|key| CourseId::from_segment(key.name()))
            .collect())
    }
}


//============ Tests =========================================================
