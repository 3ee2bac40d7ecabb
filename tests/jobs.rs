//! Background recalculation jobs.

use enrolment::jobs::{
    CourseCalculationJob, JobOutcome, JobScheduler, JobTransport,
    LearnerCalculationJob, Task,
};

mod common;

use common::{TestProvider, TestSite, course, cu, user};


//------------ Learner job ---------------------------------------------------

/// 45 learners in batches of 20 take three runs plus one to complete.
#[test]
fn learner_job_runs_in_batches() {
    let site = TestSite::new(45);
    let manager = site.manager(&[]);
    let hash = manager.registry().get_version_hash();

    let mut job = LearnerCalculationJob::new(20);
    let mut batches = Vec::new();
    while job.run(&manager).unwrap() {
        batches.push(job.last_batch());
    }
    assert_eq!(batches, vec![20, 20, 5]);
    assert_eq!(job.last_batch(), 0);
    assert!(job.skipped().is_empty());

    assert_eq!(
        manager.markers().job_completed(&Task::learner_calculation_name()).unwrap(),
        None
    );
    job.complete(&manager).unwrap();
    assert_eq!(
        manager.markers().job_completed(&Task::learner_calculation_name()).unwrap(),
        Some(hash.clone())
    );
    for id in 1..=45 {
        assert!(!manager.markers().is_learner_stale(user(id), &hash).unwrap());
    }
}

/// The same job driven through the queue.
#[test]
fn learner_job_through_queue() {
    let site = TestSite::new(45);
    let manager = site.manager(&[]);

    manager.jobs().start_learner_calculation().unwrap();
    let mut outcomes = Vec::new();
    while let Some(outcome) = manager.jobs().run_next(&manager).unwrap() {
        outcomes.push(outcome);
    }
    assert_eq!(outcomes.len(), 4);
    assert!(matches!(outcomes[2], JobOutcome::Rescheduled(_)));
    assert!(matches!(outcomes[3], JobOutcome::Completed(_)));
    assert_eq!(manager.jobs().queue().pending_count().unwrap(), 0);
    assert_eq!(manager.jobs().queue().running_count().unwrap(), 0);
}

/// Learners whose calculation fails are skipped instead of retried forever,
/// and the job does not count as completed.
#[test]
fn learner_job_skips_failing_learners() {
    let site = TestSite::new(3);
    let flaky = TestProvider::for_courses("flaky", 1, &[2]);
    let manager = site.manager(&[flaky.clone()]);
    flaky.set_failing(true);

    let mut job = LearnerCalculationJob::new(2);
    assert!(job.run(&manager).unwrap());
    assert!(job.run(&manager).unwrap());
    assert!(!job.run(&manager).unwrap());
    assert_eq!(job.skipped().len(), 3);

    // The skip cursor travels with the task.
    match job.to_task() {
        Task::LearnerCalculation { skipped, .. } => {
            assert_eq!(skipped, vec![user(1), user(2), user(3)]);
        }
        other => panic!("unexpected task {other}"),
    }

    job.complete(&manager).unwrap();
    assert_eq!(
        manager.markers().job_completed(&Task::learner_calculation_name()).unwrap(),
        None
    );
}

/// The recurring check starts the learner job again after learners failed.
#[test]
fn failed_learners_are_retried() {
    let site = TestSite::new(3);
    let flaky = TestProvider::for_courses("flaky", 1, &[2]);
    let manager = site.manager(&[flaky.clone()]);
    let hash = manager.registry().get_version_hash();

    flaky.set_failing(true);
    assert!(manager.ensure_calculations_current().unwrap());
    manager.run_pending_jobs(None).unwrap();
    for id in 1..=3 {
        assert!(manager.markers().is_learner_stale(user(id), &hash).unwrap());
    }

    flaky.set_failing(false);
    assert!(manager.ensure_calculations_current().unwrap());
    manager.run_pending_jobs(None).unwrap();
    for id in 1..=3 {
        assert!(!manager.markers().is_learner_stale(user(id), &hash).unwrap());
    }
    assert!(!manager.ensure_calculations_current().unwrap());
}


//------------ Course job ----------------------------------------------------

#[test]
fn course_job_recalculates_stale_results() {
    let site = TestSite::new(5);
    let purchase = TestProvider::new("purchase", 1);
    let manager = site.manager(&[purchase.clone()]);
    for id in 1..=5 {
        manager.is_enrolled(user(id), course(1));
    }
    assert_eq!(purchase.calls(), 5);

    purchase.grant(2, 1);
    purchase.grant(4, 1);
    manager.course(course(1)).invalidate_learner_result(user(2)).unwrap();
    manager.course(course(1)).invalidate_learner_result(user(4)).unwrap();

    let mut job = CourseCalculationJob::new(course(1), true, 40);
    assert!(job.run(&manager).unwrap());
    assert_eq!(job.last_batch(), 2);
    assert!(!job.run(&manager).unwrap());
    job.complete(&manager).unwrap();

    assert_eq!(purchase.calls(), 7);
    assert_eq!(
        manager.course(course(1)).get_enrolled_learners().unwrap(),
        vec![user(2), user(4)]
    );
}

/// A full course job also picks up results with an old version hash.
#[test]
fn full_course_job_picks_up_old_versions() {
    let site = TestSite::new(3);
    let v1 = TestProvider::new("purchase", 1);
    let manager = site.manager(&[v1]);
    for id in 1..=3 {
        manager.is_enrolled(user(id), course(1));
    }

    let v2 = TestProvider::new("purchase", 2);
    v2.grant(3, 1);
    let manager = site.manager(&[v2.clone()]);

    let mut job = CourseCalculationJob::new(course(1), true, 40);
    assert!(!job.run(&manager).unwrap());

    let mut job = CourseCalculationJob::new(course(1), false, 2);
    assert!(job.run(&manager).unwrap());
    assert!(job.run(&manager).unwrap());
    assert!(!job.run(&manager).unwrap());
    assert_eq!(v2.calls(), 3);
    assert!(manager.membership().is_member(cu(3, 1)).unwrap());
}

#[test]
fn course_job_skip_cursor() {
    let site = TestSite::new(3);
    let flaky = TestProvider::new("flaky", 1);
    let manager = site.manager(&[flaky.clone()]);
    for id in 1..=3 {
        manager.course(course(1)).invalidate_learner_result(user(id)).unwrap();
    }
    flaky.set_failing(true);

    let mut job = CourseCalculationJob::new(course(1), true, 40);
    assert!(job.run(&manager).unwrap());
    assert_eq!(job.skipped().len(), 3);
    assert!(!job.run(&manager).unwrap());

    let task = job.to_task();
    let Task::CourseCalculation { course: c, invalidated_only, batch_size, skipped } = task else {
        panic!("not a course task")
    };
    let resumed = CourseCalculationJob::from_task(c, invalidated_only, batch_size, &skipped);
    assert_eq!(resumed.skipped(), job.skipped());
}

/// Starting a course job replaces a pending one for the same course.
#[test]
fn course_job_replaces_pending_job() {
    let site = TestSite::new(1);
    let manager = site.manager(&[]);
    let jobs = manager.jobs();
    let name = Task::course_calculation_name(course(1));

    jobs.start_course_calculation(course(1), true).unwrap();
    jobs.start_course_calculation(course(1), true).unwrap();
    assert_eq!(jobs.queue().pending_count().unwrap(), 1);
    let pending = jobs.transport().pending(&name).unwrap().unwrap();
    assert!(matches!(
        pending.task, Task::CourseCalculation { invalidated_only: true, .. }
    ));

    // A full job absorbs an invalidated-only job ...
    jobs.start_course_calculation(course(1), false).unwrap();
    let pending = jobs.transport().pending(&name).unwrap().unwrap();
    assert!(matches!(
        pending.task, Task::CourseCalculation { invalidated_only: false, .. }
    ));

    // ... and is not narrowed down by one.
    jobs.start_course_calculation(course(1), true).unwrap();
    let pending = jobs.transport().pending(&name).unwrap().unwrap();
    assert!(matches!(
        pending.task, Task::CourseCalculation { invalidated_only: false, .. }
    ));
    assert_eq!(jobs.queue().pending_count().unwrap(), 1);

    // Other courses are independent.
    jobs.start_course_calculation(course(2), true).unwrap();
    assert_eq!(jobs.queue().pending_count().unwrap(), 2);
}

/// Failing learners of a course job are handed to the learner job.
#[test]
fn course_job_failures_go_to_learner_job() {
    let site = TestSite::new(2);
    let flaky = TestProvider::new("flaky", 1);
    let manager = site.manager(&[flaky.clone()]);
    manager.ensure_calculations_current().unwrap();
    manager.run_pending_jobs(None).unwrap();
    assert!(!manager.ensure_calculations_current().unwrap());

    manager.course(course(1)).invalidate_learner_result(user(2)).unwrap();
    flaky.set_failing(true);
    let mut job = CourseCalculationJob::new(course(1), true, 40);
    assert!(job.run(&manager).unwrap());
    assert!(!job.run(&manager).unwrap());
    job.complete(&manager).unwrap();

    let hash = manager.registry().get_version_hash();
    assert_eq!(
        manager.markers().job_completed(&Task::course_calculation_name(course(1))).unwrap(),
        None
    );
    assert!(manager.markers().is_learner_stale(user(2), &hash).unwrap());
    assert!(!manager.markers().is_learner_stale(user(1), &hash).unwrap());

    flaky.set_failing(false);
    assert!(manager.ensure_calculations_current().unwrap());
    manager.run_pending_jobs(None).unwrap();
    assert!(!manager.markers().is_learner_stale(user(2), &hash).unwrap());
}

/// A new course job started while one runs keeps the full scan of the
/// running job.
#[test]
fn course_job_merges_running_job() {
    let site = TestSite::new(1);
    let manager = site.manager(&[]);
    let jobs = manager.jobs();
    let name = Task::course_calculation_name(course(1));

    jobs.start_course_calculation(course(1), false).unwrap();
    let running = jobs.queue().pop().unwrap();
    jobs.start_course_calculation(course(1), true).unwrap();

    let pending = jobs.transport().pending(&name).unwrap().unwrap();
    assert!(matches!(
        pending.task, Task::CourseCalculation { invalidated_only: false, .. }
    ));
    assert!(!jobs.queue().is_running(&running.key).unwrap());
    assert!(jobs.transport().running(&name).unwrap().is_none());
}

/// A course job replaced while it runs leaves the new job alone.
#[test]
fn replaced_course_job_drops_its_follow_up() {
    let site = TestSite::new(3);
    let mut config = site.config();
    config.jobs.course_batch_size = 1;
    let purchase = TestProvider::new("purchase", 1);
    let manager = site.manager_with_config(config.clone(), &[purchase.clone()]);
    let name = Task::course_calculation_name(course(1));
    for id in 1..=3 {
        manager.course(course(1)).invalidate_learner_result(user(id)).unwrap();
    }

    manager.jobs().start_course_calculation(course(1), false).unwrap();
    purchase.restart_course_job_on_check(
        JobScheduler::new(&site.storage_uri, &config.jobs).unwrap(), 1
    );
    let outcome = manager.jobs().run_next(&manager).unwrap();
    assert!(matches!(outcome, Some(JobOutcome::Superseded(_))));

    let queue = manager.jobs().queue();
    assert_eq!(queue.running_count().unwrap(), 0);
    assert_eq!(queue.pending_count().unwrap(), 1);
    let pending = manager.jobs().transport().pending(&name).unwrap().unwrap();
    assert_eq!(
        pending.task,
        Task::CourseCalculation {
            course: course(1),
            invalidated_only: false,
            batch_size: 1,
            skipped: vec![],
        }
    );

    manager.run_pending_jobs(None).unwrap();
    assert_eq!(queue.pending_count().unwrap(), 0);
    assert_eq!(
        manager.markers().job_completed(&name).unwrap(),
        Some(manager.registry().get_version_hash())
    );
}


//------------ Site wide ------------------------------------------------------

#[test]
fn salt_reset_recalculates_everyone() {
    let site = TestSite::new(4);
    let manager = site.manager(&[]);
    manager.enrol(user(1), course(1)).unwrap();
    let old_hash = manager.registry().get_version_hash();
    let old_salt = manager.registry().site_salt();

    let new_hash = manager.reset_site_salt().unwrap();
    assert_ne!(old_hash, new_hash);
    assert_ne!(old_salt, manager.registry().site_salt());
    assert_eq!(manager.registry().get_version_hash(), new_hash);
    assert!(!manager.results().get(cu(1, 1)).unwrap().unwrap().is_valid(&new_hash));

    // The new salt is kept.
    let other = site.manager(&[]);
    assert_eq!(other.registry().get_version_hash(), new_hash);

    manager.run_pending_jobs(None).unwrap();
    for id in 1..=4 {
        assert!(!manager.markers().is_learner_stale(user(id), &new_hash).unwrap());
    }
    assert!(manager.results().get(cu(1, 1)).unwrap().unwrap().is_valid(&new_hash));
    assert!(manager.is_enrolled(user(1), course(1)));
    assert_eq!(
        manager.markers().job_completed(&Task::learner_calculation_name()).unwrap(),
        Some(new_hash)
    );
}

#[test]
fn ensure_calculations_starts_learner_job_once() {
    let site = TestSite::new(2);
    let manager = site.manager(&[]);

    assert!(manager.ensure_calculations_current().unwrap());
    assert!(!manager.ensure_calculations_current().unwrap());
    manager.run_pending_jobs(None).unwrap();
    assert!(!manager.ensure_calculations_current().unwrap());
    assert_eq!(manager.jobs().queue().pending_count().unwrap(), 0);
}

/// The recurring check stays queued after it ran.
#[test]
fn recurring_check_is_rescheduled() {
    let site = TestSite::new(2);
    let manager = site.manager(&[]);
    manager.jobs().start_recurring_checks().unwrap();
    manager.jobs().start_recurring_checks().unwrap();
    assert_eq!(manager.jobs().queue().pending_count().unwrap(), 1);

    // The check itself, then the learner job it started: two runs of the
    // learner job plus the check.
    let runs = manager.run_pending_jobs(None).unwrap();
    assert_eq!(runs, 3);

    let next = manager
        .jobs()
        .queue()
        .pending_scheduled(&Task::ensure_calculations_name())
        .unwrap();
    assert!(next.is_some());
}

/// Jobs run outside of units of work and never defer their checks.
#[test]
fn background_jobs_do_not_defer() {
    let site = TestSite::new(1);
    let manager = site.manager(&[]);
    manager.enrol(user(1), course(1)).unwrap();

    let uow = manager.begin_unit_of_work();
    manager.jobs().start_learner_calculation().unwrap();
    manager.run_pending_jobs(None).unwrap();
    assert!(manager.deferred().is_empty());
    assert!(!manager.in_background_job());
    uow.finish();
}

#[test]
fn limited_job_runs() {
    let site = TestSite::new(10);
    let mut config = site.config();
    config.jobs.learner_batch_size = 1;
    let manager = site.manager_with_config(config, &[]);

    manager.jobs().start_learner_calculation().unwrap();
    assert_eq!(manager.run_pending_jobs(Some(4)).unwrap(), 4);
    assert_eq!(manager.jobs().queue().pending_count().unwrap(), 1);
    assert_eq!(manager.run_pending_jobs(None).unwrap(), 7);
}
