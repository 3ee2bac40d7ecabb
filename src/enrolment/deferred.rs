//! Rechecks collected during a unit of work and run once at its end.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use log::debug;
use crate::commons::EngineResult;
use super::markers::CalculationMarkers;
use super::provider::CourseUser;
use super::result::ResultStore;


//------------ DeferContext --------------------------------------------------

/// The circumstances of a requested recheck.
#[derive(Clone, Copy, Debug)]
pub struct DeferContext {
    pub user: CourseUser,

    /// A unit of work is open and will flush deferred checks.
    pub in_unit_of_work: bool,

    /// The check is requested from a background job.
    pub in_background_job: bool,
}


//------------ DeferPolicy ---------------------------------------------------

/// Decides whether a recheck is deferred or runs immediately.
pub trait DeferPolicy: fmt::Debug {
    fn should_defer(&self, ctx: &DeferContext) -> bool;
}

/// Defers inside a unit of work, but never inside a background job.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultDeferPolicy;

impl DeferPolicy for DefaultDeferPolicy {
    fn should_defer(&self, ctx: &DeferContext) -> bool {
        ctx.in_unit_of_work && !ctx.in_background_job
    }
}

/// Always checks immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverDefer;

impl DeferPolicy for NeverDefer {
    fn should_defer(&self, _ctx: &DeferContext) -> bool {
        false
    }
}


//------------ DeferredChecks ------------------------------------------------

/// The pending rechecks, at most one per learner and course.
#[derive(Debug, Default)]
pub struct DeferredChecks {
    pending: RefCell<BTreeSet<CourseUser>>,
}

impl DeferredChecks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a recheck unless one is pending already.
    ///
    /// The first time, the learner's calculation marker is cleared and the
    /// cached result invalidated, so that the recheck still happens through
    /// a background job if the unit of work never flushes.
    ///
    /// Returns whether a new recheck was registered.
    pub fn defer(
        &self,
        user: CourseUser,
        results: &ResultStore,
        markers: &CalculationMarkers,
    ) -> EngineResult<bool> {
        if self.is_pending(user) {
            return Ok(false)
        }
        markers.mark_learner_for_recalculation(user.user)?;
        results.invalidate(user)?;
        self.pending.borrow_mut().insert(user);
        debug!("Deferred enrolment check for {user}");
        Ok(true)
    }

    /// Removes a pending recheck. Returns whether there was one.
    pub fn remove(&self, user: CourseUser) -> bool {
        self.pending.borrow_mut().remove(&user)
    }

    pub fn is_pending(&self, user: CourseUser) -> bool {
        self.pending.borrow().contains(&user)
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Runs `recompute` for every pending recheck and clears them.
    ///
    /// Returns the number of rechecks run.
    pub fn flush<F>(&self, mut recompute: F) -> usize
    where
        F: FnMut(CourseUser),
    {
        let pending = self.pending.take();
        let count = pending.len();
        for user in pending {
            recompute(user);
        }
        if count > 0 {
            debug!("Ran {count} deferred enrolment checks");
        }
        count
    }
}


//============ Tests =========================================================
