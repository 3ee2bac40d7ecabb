//! Output of the command line tool.

use std::fmt::Write;
use serde::Serialize;
use crate::enrolment::journal::StatusEntry;
use crate::enrolment::state::LogEntry;
use crate::enrolment::types::{CourseId, ProviderId, UserId};


//------------ ReportFormat --------------------------------------------------

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum)]
pub enum ReportFormat {
    /// Human readable text
    #[default]
    Text,

    /// JSON
    Json,
}


//------------ Report --------------------------------------------------------

/// The outcome of a command.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Report {
    Enrolment {
        user: UserId,
        course: CourseId,
        enrolled: bool,
    },
    Jobs {
        runs: usize,
        pending: usize,
        running: usize,
    },
    Salt {
        version_hash: String,
    },
    Recalculated {
        user: UserId,
        enrolled_courses: usize,
    },
    Journal {
        user: UserId,
        course: CourseId,
        providers: Vec<JournalReport>,
    },
    Lines {
        lines: Vec<String>,
    },
    Message {
        message: String,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct JournalReport {
    pub provider: ProviderId,
    pub history: Vec<StatusEntry>,
    pub logs: Vec<LogEntry>,
}

impl Report {
    pub fn message(message: impl Into<String>) -> Self {
        Report::Message { message: message.into() }
    }

    pub fn format(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Text => self.text(),
            ReportFormat::Json => {
                serde_json::to_string_pretty(self).unwrap_or_else(|err| {
                    format!("{{\"error\": \"cannot serialize report: {err}\"}}")
                })
            }
        }
    }

    fn text(&self) -> String {
        match self {
            Report::Enrolment { user, course, enrolled } => {
                if *enrolled {
                    format!("Learner {user} is enrolled in course {course}")
                }
                else {
                    format!("Learner {user} is not enrolled in course {course}")
                }
            }
            Report::Jobs { runs, pending, running } => {
                format!(
                    "Ran {runs} tasks, {pending} pending, {running} running"
                )
            }
            Report::Salt { version_hash } => {
                format!("New version hash: {version_hash}")
            }
            Report::Recalculated { user, enrolled_courses } => {
                format!(
                    "Recalculated learner {user}, enrolled in {enrolled_courses} courses"
                )
            }
            Report::Journal { user, course, providers } => {
                let mut res = String::new();
                let _ = writeln!(res, "Journal of learner {user} in course {course}");
                for journal in providers {
                    let _ = writeln!(res, "\n{}:", journal.provider);
                    for entry in &journal.history {
                        let status = match entry.status {
                            Some(true) => "enrolled",
                            Some(false) => "not enrolled",
                            None => "not handled",
                        };
                        let _ = writeln!(
                            res, "  {}  {status}", entry.time.to_rfc3339()
                        );
                    }
                    for entry in &journal.logs {
                        let _ = writeln!(
                            res, "  {}  {}", entry.time.to_rfc3339(), entry.message
                        );
                    }
                }
                res
            }
            Report::Lines { lines } => lines.join("\n"),
            Report::Message { message } => message.clone(),
        }
    }
}


//============ Tests =========================================================
