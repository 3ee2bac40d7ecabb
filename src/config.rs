//! Configuration of the engine.

use std::{env, fmt, fs, io};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use log::{error, LevelFilter};
use serde::de;
use serde::{Deserialize, Deserializer};
use url::Url;
use crate::commons::ext_serde;
use crate::constants::{
    DEFAULT_COURSE_BATCH_SIZE, DEFAULT_LEARNER_BATCH_SIZE, DEFAULT_LOG_SIZE,
    ENROLMENT_ENV_LOG_LEVEL,
};


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        match env::var(ENROLMENT_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        ENROLMENT_ENV_LOG_LEVEL
                    );
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Info,
        }
    }

    fn log_type() -> LogType {
        LogType::Stderr
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./enrolment.log")
    }

    fn log_size() -> usize {
        DEFAULT_LOG_SIZE
    }

    fn journal_enabled() -> bool {
        true
    }

    fn learner_batch_size() -> usize {
        DEFAULT_LEARNER_BATCH_SIZE
    }

    fn course_batch_size() -> usize {
        DEFAULT_COURSE_BATCH_SIZE
    }

    fn recheck_interval_seconds() -> u64 {
        3600
    }

    fn retry_delay_seconds() -> u64 {
        300
    }

    fn reschedule_after_seconds() -> u64 {
        900
    }
}


//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Where all data is kept: `memory:` or `local://<dir>`.
    pub storage_uri: Url,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "ext_serde::de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    /// The number of messages kept in a provider state's log.
    #[serde(default = "ConfigDefaults::log_size")]
    pub state_log_size: usize,

    #[serde(default)]
    pub journal: JournalConfig,

    #[serde(default)]
    pub jobs: JobsConfig,
}

/// # Accessors
impl Config {
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.jobs.recheck_interval_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.jobs.retry_delay_seconds)
    }

    pub fn reschedule_after(&self) -> Duration {
        Duration::from_secs(self.jobs.reschedule_after_seconds)
    }
}

/// # Create
impl Config {
    /// Reads and verifies the config file at the given path.
    pub fn create(config_file: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(config_file).map_err(|e| {
            ConfigError::Other(format!(
                "Cannot read config file '{}': {}",
                config_file.display(), e
            ))
        })?;
        let config = Self::parse(&content).map_err(|e| {
            ConfigError::Other(format!(
                "Error parsing config file: {}, error: {}",
                config_file.display(), e
            ))
        })?;
        config.verify()?;
        Ok(config)
    }

    /// Parses a config from its TOML representation.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Returns a config for testing with the given storage.
    pub fn test(storage_uri: &Url) -> Self {
        Config {
            storage_uri: storage_uri.clone(),
            log_level: LevelFilter::Debug,
            log_type: LogType::Stderr,
            log_file: ConfigDefaults::log_file(),
            state_log_size: ConfigDefaults::log_size(),
            journal: JournalConfig::default(),
            jobs: JobsConfig::default(),
        }
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.state_log_size < 1 {
            return Err(ConfigError::other("state_log_size must be at least 1"))
        }
        if self.journal.history_size < 1 || self.journal.log_size < 1 {
            return Err(ConfigError::other(
                "journal history_size and log_size must be at least 1"
            ))
        }
        if self.jobs.learner_batch_size < 1 || self.jobs.course_batch_size < 1 {
            return Err(ConfigError::other("job batch sizes must be at least 1"))
        }
        if self.jobs.recheck_interval_seconds < 1 {
            return Err(ConfigError::other(
                "recheck_interval_seconds must be at least 1"
            ))
        }
        Ok(())
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| {
                ConfigError::Other(format!("Failed to init stderr logging: {e}"))
            })
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}", path.display(), err
                );
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| {
                ConfigError::Other(format!("Failed to init file logging: {e}"))
            })
    }

    /// Creates and returns a fern logger.
    fn fern_logger(&self) -> fern::Dispatch {
        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
    }
}


//------------ JournalConfig -------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "ConfigDefaults::journal_enabled")]
    pub enabled: bool,

    #[serde(default = "ConfigDefaults::log_size")]
    pub history_size: usize,

    #[serde(default = "ConfigDefaults::log_size")]
    pub log_size: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        JournalConfig {
            enabled: ConfigDefaults::journal_enabled(),
            history_size: ConfigDefaults::log_size(),
            log_size: ConfigDefaults::log_size(),
        }
    }
}


//------------ JobsConfig ----------------------------------------------------

#[derive(Clone, Debug, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "ConfigDefaults::learner_batch_size")]
    pub learner_batch_size: usize,

    #[serde(default = "ConfigDefaults::course_batch_size")]
    pub course_batch_size: usize,

    /// How often the recurring check for stale calculations runs.
    #[serde(default = "ConfigDefaults::recheck_interval_seconds")]
    pub recheck_interval_seconds: u64,

    /// How long to wait before retrying a failed job.
    #[serde(default = "ConfigDefaults::retry_delay_seconds")]
    pub retry_delay_seconds: u64,

    /// After how long a claimed but unfinished job is rescheduled.
    #[serde(default = "ConfigDefaults::reschedule_after_seconds")]
    pub reschedule_after_seconds: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        JobsConfig {
            learner_batch_size: ConfigDefaults::learner_batch_size(),
            course_batch_size: ConfigDefaults::course_batch_size(),
            recheck_interval_seconds: ConfigDefaults::recheck_interval_seconds(),
            retry_delay_seconds: ConfigDefaults::retry_delay_seconds(),
            reschedule_after_seconds: ConfigDefaults::reschedule_after_seconds(),
        }
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\" or \"file\", found : \"{}\"",
                string
            ))),
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_minimal_config() {
        let config = Config::parse("storage_uri = \"memory:\"\n").unwrap();
        assert_eq!(config.storage_uri.as_str(), "memory:");
        assert_eq!(config.log_type, LogType::Stderr);
        assert_eq!(config.state_log_size, 30);
        assert!(config.journal.enabled);
        assert_eq!(config.journal.history_size, 30);
        assert_eq!(config.jobs.learner_batch_size, 20);
        assert_eq!(config.jobs.course_batch_size, 40);
        config.verify().unwrap();
    }

    #[test]
    fn should_parse_full_config() {
        let toml = r#"
            storage_uri = "local:///var/lib/enrolment"
            log_level = "debug"
            log_type = "file"
            log_file = "/var/log/enrolment.log"
            state_log_size = 10

            [journal]
            enabled = false
            history_size = 5
            log_size = 7

            [jobs]
            learner_batch_size = 100
            course_batch_size = 50
            recheck_interval_seconds = 60
            retry_delay_seconds = 10
            reschedule_after_seconds = 120
        "#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.log_type, LogType::File);
        assert_eq!(config.log_file, PathBuf::from("/var/log/enrolment.log"));
        assert!(!config.journal.enabled);
        assert_eq!(config.journal.history_size, 5);
        assert_eq!(config.journal.log_size, 7);
        assert_eq!(config.jobs.learner_batch_size, 100);
        assert_eq!(config.recheck_interval(), Duration::from_secs(60));
        assert_eq!(config.retry_delay(), Duration::from_secs(10));
        assert_eq!(config.reschedule_after(), Duration::from_secs(120));
    }

    #[test]
    fn should_reject_bad_values() {
        assert!(Config::parse("storage_uri = \"memory:\"\nlog_type = \"syslog\"").is_err());
        assert!(Config::parse("log_type = \"stderr\"").is_err());

        let config = Config::parse(
            "storage_uri = \"memory:\"\n[jobs]\nlearner_batch_size = 0\n"
        ).unwrap();
        assert!(config.verify().is_err());
    }

    #[test]
    fn should_read_default_config_file() {
        let config = Config::parse(
            include_str!("../defaults/enrolment.conf")
        ).unwrap();
        assert_eq!(config.storage_uri.scheme(), "local");
        config.verify().unwrap();
    }

    #[test]
    fn should_create_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enrolment.conf");
        fs::write(&path, "storage_uri = \"memory:\"\n[jobs]\ncourse_batch_size = 3\n").unwrap();
        let config = Config::create(&path).unwrap();
        assert_eq!(config.jobs.course_batch_size, 3);

        assert!(Config::create(&dir.path().join("missing.conf")).is_err());
    }
}
