//! The `enrolctl` command line tool.

pub mod options;
pub mod report;

use std::{error, fmt};
use std::sync::Arc;
use crate::commons::error::Error as EngineError;
use crate::config::{Config, ConfigError};
use crate::enrolment::directory::StaticDirectory;
use crate::enrolment::manager::EnrolmentManager;
use crate::enrolment::registry::NoExternalProviders;
use self::options::Options;
use self::report::Report;


//------------ Enrolctl ------------------------------------------------------

/// Runs a command line invocation.
pub struct Enrolctl;

impl Enrolctl {
    /// Runs the command given by the options and returns its report.
    pub fn run(options: Options) -> Result<Report, Error> {
        let config = Config::create(&options.general.config)?;
        config.init_logging()?;

        let directory = StaticDirectory::from_file(&options.general.directory)?;
        let manager = EnrolmentManager::build(
            config, &NoExternalProviders, Arc::new(directory)
        )?;
        Ok(options.command.run(&manager)?)
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    Engine(EngineError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {e}"),
            Error::Engine(e) => e.fmt(f),
        }
    }
}

impl error::Error for Error {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<EngineError> for Error {
    fn from(e: EngineError) -> Self {
        Error::Engine(e)
    }
}
