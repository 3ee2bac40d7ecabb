//! The engine tying providers, stores and background jobs together.

use std::cell::Cell;
use std::sync::Arc;
use log::{debug, info, warn};
use crate::commons::error::Error;
use crate::commons::storage::{Key, KeyValueStore, Segment};
use crate::commons::{EngineEmptyResult, EngineResult};
use crate::config::Config;
use crate::constants::SETTINGS_NS;
use crate::jobs::mq::Task;
use crate::jobs::scheduler::JobScheduler;
use super::aggregator::CourseEnrolment;
use super::deferred::{
    DefaultDeferPolicy, DeferContext, DeferPolicy, DeferredChecks,
};
use super::directory::SiteDirectory;
use super::journal::JournalStore;
use super::markers::CalculationMarkers;
use super::manual::ManualProvider;
use super::membership::{KvMembershipStore, MembershipStore};
use super::provider::{CourseUser, EnrolmentProvider, ProviderContext};
use super::registry::{ProviderRegistry, ProviderSource};
use super::result::ResultStore;
use super::state::ProviderStateStore;
use super::types::{CourseId, CourseStatus, UserId};


const SITE_SALT: &str = "site_salt";


//------------ EnrolmentManager ----------------------------------------------

/// Orchestrates enrolment for one site.
///
/// The manager owns the provider registry, all stores, the deferred check
/// coordinator and the job scheduler. It is meant to be built once per
/// process and passed around by reference.
#[derive(Debug)]
pub struct EnrolmentManager {
    config: Config,

    registry: ProviderRegistry,
    directory: Arc<dyn SiteDirectory>,

    // Cached verdicts and the membership flags derived from them
    results: ResultStore,
    membership: Box<dyn MembershipStore>,

    // Per provider data kept for each learner in a course
    states: ProviderStateStore,
    journals: JournalStore,

    markers: CalculationMarkers,
    deferred: DeferredChecks,
    defer_policy: Box<dyn DeferPolicy>,

    settings: KeyValueStore,
    jobs: JobScheduler,

    uow_depth: Cell<usize>,
    in_background_job: Cell<bool>,
    calculations: Cell<u64>,
}

/// # Set up
impl EnrolmentManager {
    /// Builds the manager.
    ///
    /// The external providers are collected from `source` once. A site
    /// salt is generated and stored if there is none yet.
    pub fn build(
        config: Config,
        source: &dyn ProviderSource,
        directory: Arc<dyn SiteDirectory>,
    ) -> EngineResult<Self> {
        let uri = &config.storage_uri;
        let settings = KeyValueStore::create(uri, SETTINGS_NS)?;
        let site_salt = Self::load_or_create_salt(&settings)?;

        let mut builder = ProviderRegistry::builder();
        builder.register_source(source);
        let registry = builder.collect(site_salt);
        debug!(
            "Registered {} enrolment providers, version hash {}",
            registry.get_all().count(),
            registry.get_version_hash()
        );

        Ok(EnrolmentManager {
            results: ResultStore::create(uri)?,
            membership: Box::new(KvMembershipStore::create(uri)?),
            states: ProviderStateStore::create(uri, config.state_log_size)?,
            journals: JournalStore::create(uri, &config.journal)?,
            markers: CalculationMarkers::create(uri)?,
            deferred: DeferredChecks::new(),
            defer_policy: Box::new(DefaultDeferPolicy),
            jobs: JobScheduler::new(uri, &config.jobs)?,
            settings,
            registry,
            directory,
            config,
            uow_depth: Cell::new(0),
            in_background_job: Cell::new(false),
            calculations: Cell::new(0),
        })
    }

    /// Replaces the policy deciding when checks are deferred.
    pub fn with_defer_policy(mut self, policy: Box<dyn DeferPolicy>) -> Self {
        self.defer_policy = policy;
        self
    }

    /// Replaces the store keeping the membership flags.
    pub fn with_membership_store(
        mut self, store: Box<dyn MembershipStore>,
    ) -> Self {
        self.membership = store;
        self
    }

    fn site_salt_key() -> Key {
        Key::new_global(Segment::parse_lossy(SITE_SALT))
    }

    fn load_or_create_salt(settings: &KeyValueStore) -> EngineResult<String> {
        match settings.get::<String>(&Self::site_salt_key()) {
            Ok(Some(salt)) => return Ok(salt),
            Ok(None) => { }
            Err(err) if err.is_corrupt_value() => {
                warn!("Replacing corrupt site salt: {err}");
            }
            Err(err) => return Err(err.into()),
        }
        let salt = Self::generate_salt();
        settings.store(&Self::site_salt_key(), &salt)?;
        info!("Generated new site salt");
        Ok(salt)
    }

    fn generate_salt() -> String {
        let bytes: [u8; 16] = rand::random();
        hex::encode(bytes)
    }
}

/// # Accessors
impl EnrolmentManager {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn directory(&self) -> &dyn SiteDirectory {
        self.directory.as_ref()
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn membership(&self) -> &dyn MembershipStore {
        self.membership.as_ref()
    }

    pub fn states(&self) -> &ProviderStateStore {
        &self.states
    }

    pub fn journals(&self) -> &JournalStore {
        &self.journals
    }

    pub fn markers(&self) -> &CalculationMarkers {
        &self.markers
    }

    pub fn deferred(&self) -> &DeferredChecks {
        &self.deferred
    }

    pub fn jobs(&self) -> &JobScheduler {
        &self.jobs
    }

    /// The number of enrolment calculations done by this manager.
    pub fn calculation_count(&self) -> u64 {
        self.calculations.get()
    }

    pub(crate) fn count_calculation(&self) {
        self.calculations.set(self.calculations.get() + 1);
    }

    pub fn in_unit_of_work(&self) -> bool {
        self.uow_depth.get() > 0
    }

    pub fn in_background_job(&self) -> bool {
        self.in_background_job.get()
    }
}

/// # Enrolment
impl EnrolmentManager {
    /// Returns the handle for enrolment in a course.
    pub fn course(&self, course: CourseId) -> CourseEnrolment<'_> {
        CourseEnrolment::new(course, self)
    }

    /// Returns whether the learner is enrolled in the course.
    ///
    /// Cached results are used when valid. Failures result in `false`.
    pub fn is_enrolled(&self, user: UserId, course: CourseId) -> bool {
        let enrolled = self.course(course).is_enrolled(user, true);
        self.autopersist();
        enrolled
    }

    /// Enrols the learner through the manual provider.
    pub fn enrol(&self, user: UserId, course: CourseId) -> EngineResult<bool> {
        let user = CourseUser::new(user, course);
        let (manual, ctx) = self.manual_context(course)?;
        let done = manual.enrol_learner(&ctx, user)?;
        info!("Manually enrolled {user}");
        let res = self.trigger_course_enrolment_check(user);
        self.autopersist();
        res.map(|_| done)
    }

    /// Withdraws the learner through the manual provider.
    pub fn withdraw(&self, user: UserId, course: CourseId) -> EngineResult<bool> {
        let user = CourseUser::new(user, course);
        let (manual, ctx) = self.manual_context(course)?;
        let done = manual.withdraw_learner(&ctx, user)?;
        info!("Manually withdrew {user}");
        let res = self.trigger_course_enrolment_check(user);
        self.autopersist();
        res.map(|_| done)
    }

    fn manual_context(
        &self, course: CourseId,
    ) -> EngineResult<(&ManualProvider, ProviderContext<'_>)> {
        if self.directory.course_status(course).is_none() {
            return Err(Error::UnknownCourse(course))
        }
        let manual = self.registry.get_manual_provider().ok_or_else(|| {
            Error::custom("the manual enrolment provider has been replaced")
        })?;
        Ok((manual, ProviderContext::new(manual.id(), &self.states)))
    }

    /// Requests a recheck of the learner in the course.
    ///
    /// Depending on the defer policy, the check runs now or when the unit
    /// of work ends.
    pub fn trigger_course_enrolment_check(
        &self, user: CourseUser,
    ) -> EngineEmptyResult {
        let ctx = DeferContext {
            user,
            in_unit_of_work: self.in_unit_of_work(),
            in_background_job: self.in_background_job(),
        };
        if self.defer_policy.should_defer(&ctx) {
            self.deferred.defer(user, &self.results, &self.markers)?;
        }
        else {
            self.course(user.course).try_recalculate(user.user)?;
        }
        Ok(())
    }

    /// Recalculates the learner's enrolment in every course.
    ///
    /// The learner's calculation marker is only set if all courses could
    /// be calculated. Returns the number of courses the learner is
    /// enrolled in.
    pub fn recalculate_enrolments(&self, user: UserId) -> EngineResult<usize> {
        let version_hash = self.registry.get_version_hash();
        let mut enrolled = 0;
        let mut failed = 0;
        for course in self.directory.course_ids() {
            match self.course(course).try_recalculate(user) {
                Ok(true) => enrolled += 1,
                Ok(false) => { }
                Err(err) => {
                    warn!("Cannot calculate enrolment of learner {user} in course {course}: {err}");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            return Err(Error::custom(format!(
                "{failed} enrolment calculations failed for learner {user}"
            )))
        }
        self.markers.set_learner_calculated(user, &version_hash)?;
        Ok(enrolled)
    }

    /// Removes everything kept for the learner in the course.
    pub fn delete_learner(&self, user: UserId, course: CourseId) -> EngineEmptyResult {
        let user = CourseUser::new(user, course);
        self.deferred.remove(user);
        self.states.delete(user)?;
        self.journals.delete(user)?;
        self.results.delete(user)?;
        self.membership.remove(user)?;
        self.markers.clear_learner_removed(user)?;
        info!("Deleted enrolment data of {user}");
        Ok(())
    }
}

/// # Site wide changes
impl EnrolmentManager {
    /// Replaces the site salt.
    ///
    /// This changes the version hash and thus makes all cached results
    /// stale. The learner calculation is started to warm the cache again.
    pub fn reset_site_salt(&self) -> EngineResult<String> {
        let salt = Self::generate_salt();
        self.settings.store(&Self::site_salt_key(), &salt)?;
        self.registry.set_site_salt(salt);
        let version_hash = self.registry.get_version_hash();
        info!("Reset site salt, new version hash: {version_hash}");
        self.jobs.start_learner_calculation()?;
        Ok(version_hash)
    }

    /// Reacts to a change of a course's status.
    ///
    /// If the course became published or stopped being published, all its
    /// results are invalidated and recalculated in the background. Returns
    /// whether that happened.
    pub fn handle_course_status_change(
        &self,
        course: CourseId,
        from: Option<CourseStatus>,
        to: CourseStatus,
    ) -> EngineResult<bool> {
        let was_published = from.is_some_and(CourseStatus::is_published);
        if was_published == to.is_published() {
            return Ok(false)
        }
        let count = self.results.invalidate_course(course)?;
        info!(
            "Course {course} changed from {} to {to}, invalidated {count} results",
            from.map(|s| s.to_string()).unwrap_or_else(|| "nothing".into())
        );
        self.jobs.start_course_calculation(course, true)?;
        Ok(true)
    }
}

/// # Units of work
impl EnrolmentManager {
    /// Opens a unit of work.
    ///
    /// Checks triggered while a unit of work is open may be deferred. When
    /// the outermost unit of work ends, the deferred checks run and all
    /// dirty state is persisted.
    pub fn begin_unit_of_work(&self) -> UnitOfWork<'_> {
        self.uow_depth.set(self.uow_depth.get() + 1);
        UnitOfWork { manager: self, finished: false }
    }

    fn end_unit_of_work(&self) -> bool {
        let depth = self.uow_depth.get().saturating_sub(1);
        self.uow_depth.set(depth);
        if depth > 0 {
            return true
        }
        self.flush_deferred();
        self.persist_all()
    }

    /// Runs all deferred checks now. Returns how many ran.
    pub fn flush_deferred(&self) -> usize {
        self.deferred.flush(|user| {
            self.course(user.course).recalculate_enrolment(user.user);
        })
    }

    /// Writes all dirty provider state and journals.
    ///
    /// Returns whether everything could be written.
    pub fn persist_all(&self) -> bool {
        let states_ok = self.states.persist_all();
        let journals_ok = self.journals.persist_all();
        states_ok && journals_ok
    }

    /// Drops clean entries from the in-memory caches.
    pub fn clear_cache(&self) {
        self.states.clear_cache();
        self.journals.clear_cache();
    }

    fn autopersist(&self) {
        if self.in_unit_of_work() || self.in_background_job() {
            return
        }
        if !self.persist_all() {
            warn!("Not all enrolment state could be saved");
        }
    }

    pub(crate) fn enter_background_job(&self) -> BackgroundJob<'_> {
        let previous = self.in_background_job.replace(true);
        BackgroundJob { manager: self, previous }
    }
}

/// # Background jobs
impl EnrolmentManager {
    /// Starts the learner calculation unless it completed under the
    /// current version hash or is already queued.
    ///
    /// Returns whether the job was started.
    pub fn ensure_calculations_current(&self) -> EngineResult<bool> {
        let version_hash = self.registry.get_version_hash();
        let name = Task::learner_calculation_name();
        if self.markers.job_completed(&name)?.as_deref() == Some(&version_hash) {
            debug!("Learner calculation is current");
            return Ok(false)
        }
        if self.jobs.transport().pending(&name)?.is_some() {
            debug!("Learner calculation is already scheduled");
            return Ok(false)
        }
        self.jobs.start_learner_calculation()?;
        info!("Started learner calculation for version hash {version_hash}");
        Ok(true)
    }

    /// Runs due background tasks until none are left.
    pub fn run_pending_jobs(&self, max_runs: Option<usize>) -> EngineResult<usize> {
        self.jobs.run_until_idle(self, max_runs)
    }
}

/// # Diagnostics
impl EnrolmentManager {
    /// Describes how the enrolment of the learner in the course comes about.
    pub fn debug_report(
        &self, user: UserId, course: CourseId,
    ) -> EngineResult<Vec<String>> {
        let cu = CourseUser::new(user, course);
        let version_hash = self.registry.get_version_hash();
        let mut report = Vec::new();

        match self.directory.course_status(course) {
            Some(status) => report.push(format!("Course {course} is {status}")),
            None => report.push(format!("Course {course} does not exist")),
        }
        report.push(format!("Current version hash: {version_hash}"));

        match self.results.get(cu)? {
            Some(result) => {
                report.push(format!(
                    "Cached result from {}: {} (version hash {}{}{})",
                    result.time().to_rfc3339(),
                    if result.is_enrolled() { "enrolled" } else { "not enrolled" },
                    result.version_hash(),
                    if result.is_valid(&version_hash) { "" } else { ", stale" },
                    if result.is_invalidated() { ", invalidated" } else { "" },
                ));
            }
            None => report.push("No cached result".into()),
        }
        report.push(format!(
            "Membership flag: {}", self.membership.is_member(cu)?
        ));
        if let Some(removed) = self.markers.removed_learner(cu)? {
            report.push(format!(
                "Removed at {}{}",
                removed.time.to_rfc3339(),
                removed.reason.map(|r| format!(": {r}")).unwrap_or_default()
            ));
        }
        if self.deferred.is_pending(cu) {
            report.push("A deferred check is pending".into());
        }

        for provider in self.registry.get_all() {
            let id = provider.id();
            if !provider.handles_enrolment(course) {
                report.push(format!("{id}: does not handle course {course}"));
                continue
            }
            let ctx = ProviderContext::new(id.clone(), &self.states);
            let verdict = match provider.is_enrolled(&ctx, cu) {
                Ok(true) => "enrolled".to_string(),
                Ok(false) => "not enrolled".to_string(),
                Err(err) => format!("failed: {err}"),
            };
            report.push(format!(
                "{id} ({} v{}): {verdict}", provider.name(), provider.version()
            ));
            for line in provider.debug(&ctx, cu) {
                report.push(format!("  {line}"));
            }
            if let Some(status) = self.journals.load(&id, cu)?.current_status() {
                report.push(format!("  journaled status: {status}"));
            }
        }
        Ok(report)
    }
}


//------------ UnitOfWork ----------------------------------------------------

/// An open unit of work.
///
/// Ends with [`finish`](Self::finish) or, failing that, when dropped.
#[derive(Debug)]
#[must_use = "dropping the unit of work ends it immediately"]
pub struct UnitOfWork<'a> {
    manager: &'a EnrolmentManager,
    finished: bool,
}

impl UnitOfWork<'_> {
    /// Ends the unit of work.
    ///
    /// Returns whether all dirty state could be persisted.
    pub fn finish(mut self) -> bool {
        self.finished = true;
        self.manager.end_unit_of_work()
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            if !self.manager.end_unit_of_work() {
                warn!("Not all enrolment state could be saved");
            }
        }
    }
}


//------------ BackgroundJob -------------------------------------------------

/// Marks the manager as running a background job while alive.
pub(crate) struct BackgroundJob<'a> {
    manager: &'a EnrolmentManager,
    previous: bool,
}

impl Drop for BackgroundJob<'_> {
    fn drop(&mut self) {
        self.manager.in_background_job.set(self.previous);
    }
}


//============ Tests =========================================================
