#![allow(dead_code)] // Different tests use different parts.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use url::Url;
use enrolment::config::Config;
use enrolment::enrolment::{
    CourseId, CourseStatus, CourseUser, EnrolmentManager, EnrolmentProvider,
    ProviderContext, ProviderError, ProviderId, StaticDirectory, UserId,
};
use enrolment::jobs::JobScheduler;
use enrolment::test::mem_storage_uri;


//------------ TestProvider --------------------------------------------------

/// A provider whose verdicts are set by the test.
#[derive(Debug)]
pub struct TestProvider {
    id: &'static str,
    version: u64,
    courses: Option<BTreeSet<CourseId>>,
    granted: RwLock<BTreeSet<CourseUser>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    restart_on_check: Mutex<Option<(JobScheduler, CourseId)>>,
}

impl TestProvider {
    pub fn new(id: &'static str, version: u64) -> Arc<Self> {
        Arc::new(TestProvider {
            id,
            version,
            courses: None,
            granted: RwLock::new(BTreeSet::new()),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            restart_on_check: Mutex::new(None),
        })
    }

    /// Creates a provider that only handles the given courses.
    pub fn for_courses(
        id: &'static str, version: u64, courses: &[u64],
    ) -> Arc<Self> {
        Arc::new(TestProvider {
            id,
            version,
            courses: Some(courses.iter().copied().map(CourseId::new).collect()),
            granted: RwLock::new(BTreeSet::new()),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            restart_on_check: Mutex::new(None),
        })
    }

    pub fn provider_id(&self) -> ProviderId {
        ProviderId::from(self.id)
    }

    pub fn grant(&self, user: u64, course: u64) {
        self.granted.write().unwrap().insert(cu(user, course));
    }

    pub fn revoke(&self, user: u64, course: u64) {
        self.granted.write().unwrap().remove(&cu(user, course));
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// On the next check, starts an invalidated-only calculation of the
    /// course through `jobs`, the way another process would.
    pub fn restart_course_job_on_check(&self, jobs: JobScheduler, course: u64) {
        *self.restart_on_check.lock().unwrap() = Some((jobs, CourseId::new(course)));
    }

    /// The number of times the provider was asked for a verdict.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EnrolmentProvider for TestProvider {
    fn id(&self) -> ProviderId {
        self.provider_id()
    }

    fn name(&self) -> String {
        format!("Test provider {}", self.id)
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn handles_enrolment(&self, course: CourseId) -> bool {
        self.courses.as_ref().is_none_or(|courses| courses.contains(&course))
    }

    fn is_enrolled(
        &self, ctx: &ProviderContext<'_>, user: CourseUser,
    ) -> Result<bool, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((jobs, course)) = self.restart_on_check.lock().unwrap().take() {
            jobs.start_course_calculation(course, true).unwrap();
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::new("backend unavailable"))
        }
        let enrolled = self.granted.read().unwrap().contains(&user);
        ctx.log_message(user, format!("checked: {enrolled}"))?;
        Ok(enrolled)
    }
}


//------------ TestSite ------------------------------------------------------

/// A site with courses and learners on a given storage.
pub struct TestSite {
    pub storage_uri: Url,
    pub directory: Arc<StaticDirectory>,
}

impl TestSite {
    /// Creates a site in memory with published courses 1 and 2, draft
    /// course 3 and learners 1 to `learners`.
    pub fn new(learners: u64) -> Self {
        Self::with_storage(mem_storage_uri(), learners)
    }

    pub fn with_storage(storage_uri: Url, learners: u64) -> Self {
        let directory = Arc::new(StaticDirectory::new());
        directory.set_course(CourseId::new(1), CourseStatus::Published);
        directory.set_course(CourseId::new(2), CourseStatus::Published);
        directory.set_course(CourseId::new(3), CourseStatus::Draft);
        directory.add_learners((1..=learners).map(UserId::new));
        TestSite { storage_uri, directory }
    }

    pub fn config(&self) -> Config {
        Config::test(&self.storage_uri)
    }

    pub fn manager(&self, providers: &[Arc<TestProvider>]) -> EnrolmentManager {
        self.manager_with_config(self.config(), providers)
    }

    pub fn manager_with_config(
        &self, config: Config, providers: &[Arc<TestProvider>],
    ) -> EnrolmentManager {
        let providers: Vec<Arc<TestProvider>> = providers.to_vec();
        let source = move || {
            providers
                .iter()
                .map(|p| p.clone() as Arc<dyn EnrolmentProvider>)
                .collect::<Vec<_>>()
        };
        EnrolmentManager::build(config, &source, self.directory.clone()).unwrap()
    }
}


//------------ Helpers -------------------------------------------------------

pub fn cu(user: u64, course: u64) -> CourseUser {
    CourseUser::new(UserId::new(user), CourseId::new(course))
}

pub fn user(id: u64) -> UserId {
    UserId::new(id)
}

pub fn course(id: u64) -> CourseId {
    CourseId::new(id)
}
