//! The command line options of `enrolctl`.

use std::path::PathBuf;
use crate::commons::EngineResult;
use crate::constants::DEFAULT_CONFIG_FILE;
use crate::enrolment::manager::EnrolmentManager;
use crate::enrolment::provider::{CourseUser, EnrolmentProvider};
use crate::enrolment::types::{CourseId, CourseStatus, ProviderId, UserId};
use super::report::{JournalReport, Report, ReportFormat};


//------------ Options -------------------------------------------------------

/// The command line options for enrolctl.
#[derive(clap::Parser)]
#[command(
    version,
    about = "Inspect and maintain course enrolments.",
)]
pub struct Options {
    #[command(flatten)]
    pub general: GeneralOptions,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won't result in usable options, exits the process.
    pub fn from_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}


//------------ GeneralOptions ------------------------------------------------

#[derive(clap::Args)]
pub struct GeneralOptions {
    /// Path to the config file
    #[arg(
        short, long,
        env = "ENROLCTL_CONFIG",
        default_value = DEFAULT_CONFIG_FILE,
    )]
    pub config: PathBuf,

    /// Path to the JSON file listing the courses and learners of the site
    #[arg(short, long, env = "ENROLCTL_DIRECTORY")]
    pub directory: PathBuf,

    /// Report format
    #[arg(short, long, value_enum, default_value_t)]
    pub format: ReportFormat,
}


//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Show whether a learner is enrolled in a course
    Status(Status),

    /// Enrol a learner manually
    Enrol(LearnerInCourse),

    /// Withdraw a manual enrolment
    Withdraw(LearnerInCourse),

    /// Remove a learner from a course regardless of any provider
    Remove(Remove),

    /// Undo the removal of a learner from a course
    Restore(LearnerInCourse),

    /// Run due background tasks
    RunJobs(RunJobs),

    /// Replace the site salt, making all cached results stale
    ResetSalt,

    /// Recalculate enrolments now or in the background
    Recalculate(Recalculate),

    /// Signal that the status of a course has changed
    CourseChanged(CourseChanged),

    /// Show the provider journals of a learner in a course
    Journal(Journal),

    /// Explain how the enrolment of a learner in a course comes about
    Debug(LearnerInCourse),
}

impl Command {
    pub fn run(self, manager: &EnrolmentManager) -> EngineResult<Report> {
        match self {
            Self::Status(cmd) => cmd.run(manager),
            Self::Enrol(cmd) => {
                manager.enrol(cmd.user, cmd.course)?;
                Ok(cmd.report(manager))
            }
            Self::Withdraw(cmd) => {
                manager.withdraw(cmd.user, cmd.course)?;
                Ok(cmd.report(manager))
            }
            Self::Remove(cmd) => cmd.run(manager),
            Self::Restore(cmd) => {
                manager.course(cmd.course).restore_learner(cmd.user)?;
                manager.persist_all();
                Ok(cmd.report(manager))
            }
            Self::RunJobs(cmd) => cmd.run(manager),
            Self::ResetSalt => {
                let version_hash = manager.reset_site_salt()?;
                Ok(Report::Salt { version_hash })
            }
            Self::Recalculate(cmd) => cmd.run(manager),
            Self::CourseChanged(cmd) => cmd.run(manager),
            Self::Journal(cmd) => cmd.run(manager),
            Self::Debug(cmd) => Ok(Report::Lines {
                lines: manager.debug_report(cmd.user, cmd.course)?
            }),
        }
    }
}


//------------ LearnerInCourse -----------------------------------------------

#[derive(clap::Args)]
pub struct LearnerInCourse {
    /// The id of the learner
    #[arg(long, short, value_name = "id")]
    pub user: UserId,

    /// The id of the course
    #[arg(long, value_name = "id")]
    pub course: CourseId,
}

impl LearnerInCourse {
    fn report(&self, manager: &EnrolmentManager) -> Report {
        Report::Enrolment {
            user: self.user,
            course: self.course,
            enrolled: manager.is_enrolled(self.user, self.course),
        }
    }
}


//------------ Status --------------------------------------------------------

#[derive(clap::Args)]
pub struct Status {
    #[command(flatten)]
    learner: LearnerInCourse,

    /// Ask the providers instead of using the cached result
    #[arg(long)]
    fresh: bool,
}

impl Status {
    fn run(self, manager: &EnrolmentManager) -> EngineResult<Report> {
        let LearnerInCourse { user, course } = self.learner;
        let enrolled = if self.fresh {
            let enrolled = manager.course(course).recalculate_enrolment(user);
            manager.persist_all();
            enrolled
        }
        else {
            manager.is_enrolled(user, course)
        };
        Ok(Report::Enrolment { user, course, enrolled })
    }
}


//------------ Remove --------------------------------------------------------

#[derive(clap::Args)]
pub struct Remove {
    #[command(flatten)]
    learner: LearnerInCourse,

    /// Why the learner is removed
    #[arg(long, short)]
    reason: Option<String>,
}

impl Remove {
    fn run(self, manager: &EnrolmentManager) -> EngineResult<Report> {
        let was_enrolled = manager
            .course(self.learner.course)
            .remove_learner(self.learner.user, self.reason)?;
        manager.persist_all();
        Ok(Report::message(if was_enrolled {
            format!(
                "Removed enrolled learner {} from course {}",
                self.learner.user, self.learner.course
            )
        }
        else {
            format!(
                "Learner {} was not enrolled in course {}, removal recorded",
                self.learner.user, self.learner.course
            )
        }))
    }
}


//------------ RunJobs -------------------------------------------------------

#[derive(clap::Args)]
pub struct RunJobs {
    /// Stop after this many tasks
    #[arg(long, value_name = "number")]
    max: Option<usize>,
}

impl RunJobs {
    fn run(self, manager: &EnrolmentManager) -> EngineResult<Report> {
        manager.jobs().start_recurring_checks()?;
        let runs = manager.run_pending_jobs(self.max)?;
        Ok(Report::Jobs {
            runs,
            pending: manager.jobs().queue().pending_count()?,
            running: manager.jobs().queue().running_count()?,
        })
    }
}


//------------ Recalculate ---------------------------------------------------

#[derive(clap::Args)]
pub struct Recalculate {
    /// Recalculate all enrolments of this learner right away
    #[arg(long, short, value_name = "id", conflicts_with = "course")]
    user: Option<UserId>,

    /// Schedule the recalculation of this course
    #[arg(long, value_name = "id")]
    course: Option<CourseId>,

    /// Only recalculate results explicitly marked as invalidated
    #[arg(long, requires = "course")]
    invalidated_only: bool,
}

impl Recalculate {
    fn run(self, manager: &EnrolmentManager) -> EngineResult<Report> {
        if let Some(user) = self.user {
            let enrolled_courses = manager.recalculate_enrolments(user)?;
            manager.persist_all();
            Ok(Report::Recalculated { user, enrolled_courses })
        }
        else if let Some(course) = self.course {
            manager.jobs().start_course_calculation(
                course, self.invalidated_only
            )?;
            Ok(Report::message(format!(
                "Scheduled calculation of course {course}"
            )))
        }
        else {
            manager.jobs().start_learner_calculation()?;
            Ok(Report::message("Scheduled calculation of all learners"))
        }
    }
}


//------------ CourseChanged -------------------------------------------------

#[derive(clap::Args)]
pub struct CourseChanged {
    /// The id of the course
    #[arg(long, value_name = "id")]
    course: CourseId,

    /// The previous status, if the course existed before
    #[arg(long, value_name = "status")]
    from: Option<CourseStatus>,

    /// The new status
    #[arg(long, value_name = "status")]
    to: CourseStatus,
}

impl CourseChanged {
    fn run(self, manager: &EnrolmentManager) -> EngineResult<Report> {
        let scheduled = manager.handle_course_status_change(
            self.course, self.from, self.to
        )?;
        Ok(Report::message(if scheduled {
            format!("Scheduled recalculation of course {}", self.course)
        }
        else {
            format!("Nothing to do for course {}", self.course)
        }))
    }
}


//------------ Journal -------------------------------------------------------

#[derive(clap::Args)]
pub struct Journal {
    #[command(flatten)]
    learner: LearnerInCourse,

    /// Only show the journal of this provider
    #[arg(long, short, value_name = "id")]
    provider: Option<String>,
}

impl Journal {
    fn run(self, manager: &EnrolmentManager) -> EngineResult<Report> {
        let LearnerInCourse { user, course } = self.learner;
        let cu = CourseUser::new(user, course);

        let providers: Vec<ProviderId> = match self.provider {
            Some(id) => vec![ProviderId::new(id)],
            None => manager.registry().get_all().map(|p| p.id()).collect(),
        };
        let mut journals = Vec::new();
        for provider in providers {
            let journal = manager.journals().load(&provider, cu)?;
            if journal.is_empty() {
                continue
            }
            journals.push(JournalReport {
                provider,
                history: journal.history().copied().collect(),
                logs: journal.logs().cloned().collect(),
            });
        }
        Ok(Report::Journal { user, course, providers: journals })
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use clap::{CommandFactory, Parser};
    use crate::config::Config;
    use crate::enrolment::directory::StaticDirectory;
    use crate::enrolment::registry::NoExternalProviders;
    use crate::test::mem_storage_uri;
    use super::*;

    fn parse(args: &[&str]) -> Result<Options, clap::Error> {
        Options::try_parse_from(
            ["enrolctl", "-d", "site.json"].into_iter().chain(args.iter().copied())
        )
    }

    fn command(args: &[&str]) -> Command {
        parse(args).unwrap().command
    }

    fn manager() -> EnrolmentManager {
        let directory = Arc::new(StaticDirectory::new());
        directory.set_course(CourseId::new(1), CourseStatus::Published);
        directory.add_learners([UserId::new(1), UserId::new(2)]);
        EnrolmentManager::build(
            Config::test(&mem_storage_uri()), &NoExternalProviders, directory
        ).unwrap()
    }

    #[test]
    fn options_are_consistent() {
        Options::command().debug_assert();
    }

    #[test]
    fn parse_general_options() {
        let options = Options::try_parse_from([
            "enrolctl", "-c", "/tmp/enrol.conf", "-d", "site.json",
            "-f", "json", "reset-salt",
        ]).unwrap();
        assert_eq!(options.general.config, PathBuf::from("/tmp/enrol.conf"));
        assert_eq!(options.general.directory, PathBuf::from("site.json"));
        assert_eq!(options.general.format, ReportFormat::Json);
        assert!(matches!(options.command, Command::ResetSalt));

        let options = parse(&["run-jobs"]).unwrap();
        assert_eq!(options.general.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(options.general.format, ReportFormat::Text);
    }

    #[test]
    fn parse_learner_commands() {
        match command(&["status", "-u", "3", "--course", "7", "--fresh"]) {
            Command::Status(status) => {
                assert_eq!(status.learner.user, UserId::new(3));
                assert_eq!(status.learner.course, CourseId::new(7));
                assert!(status.fresh);
            }
            _ => panic!("expected status"),
        }
        match command(&["remove", "--user", "3", "--course", "7", "-r", "left"]) {
            Command::Remove(remove) => {
                assert_eq!(remove.reason.as_deref(), Some("left"));
            }
            _ => panic!("expected remove"),
        }
        assert!(matches!(
            command(&["enrol", "-u", "1", "--course", "2"]), Command::Enrol(_)
        ));
        assert!(matches!(
            command(&["journal", "-u", "1", "--course", "2", "-p", "manual"]),
            Command::Journal(Journal { provider: Some(_), .. })
        ));
        assert!(parse(&["withdraw", "-u", "x", "--course", "2"]).is_err());
        assert!(parse(&["debug", "-u", "1"]).is_err());
    }

    #[test]
    fn parse_job_commands() {
        match command(&["recalculate", "--course", "2", "--invalidated-only"]) {
            Command::Recalculate(cmd) => {
                assert_eq!(cmd.course, Some(CourseId::new(2)));
                assert!(cmd.invalidated_only);
                assert_eq!(cmd.user, None);
            }
            _ => panic!("expected recalculate"),
        }
        assert!(parse(&["recalculate", "--user", "1", "--course", "2"]).is_err());
        assert!(parse(&["recalculate", "--invalidated-only"]).is_err());

        match command(&["run-jobs", "--max", "5"]) {
            Command::RunJobs(cmd) => assert_eq!(cmd.max, Some(5)),
            _ => panic!("expected run-jobs"),
        }
        match command(&[
            "course-changed", "--course", "4", "--from", "draft", "--to", "publish"
        ]) {
            Command::CourseChanged(cmd) => {
                assert_eq!(cmd.from, Some(CourseStatus::Draft));
                assert_eq!(cmd.to, CourseStatus::Published);
            }
            _ => panic!("expected course-changed"),
        }
        assert!(parse(&["course-changed", "--course", "4", "--to", "gone"]).is_err());
    }

    #[test]
    fn run_status_and_journal() {
        let manager = manager();
        command(&["enrol", "-u", "1", "--course", "1"]).run(&manager).unwrap();

        let report = command(&["status", "-u", "1", "--course", "1"])
            .run(&manager).unwrap();
        assert_eq!(
            report.format(ReportFormat::Text),
            "Learner 1 is enrolled in course 1"
        );
        let json: serde_json::Value = serde_json::from_str(
            &report.format(ReportFormat::Json)
        ).unwrap();
        assert_eq!(json["type"], "enrolment");
        assert_eq!(json["user"], 1);
        assert_eq!(json["enrolled"], true);

        let report = command(&["journal", "-u", "1", "--course", "1"])
            .run(&manager).unwrap();
        let text = report.format(ReportFormat::Text);
        assert!(text.starts_with("Journal of learner 1 in course 1"));
        assert!(text.contains("manual:"));
        assert!(text.contains("  enrolled"));
        let json: serde_json::Value = serde_json::from_str(
            &report.format(ReportFormat::Json)
        ).unwrap();
        assert_eq!(json["type"], "journal");
        assert_eq!(json["providers"][0]["provider"], "manual");
        assert_eq!(json["providers"][0]["history"][0]["status"], true);

        assert!(
            command(&["enrol", "-u", "1", "--course", "9"]).run(&manager).is_err()
        );
    }
}
