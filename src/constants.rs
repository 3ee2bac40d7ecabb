//! Various engine-wide constants.


//------------ Binary Names -------------------------------------------------

/// The friendly name of the `enrolctl` binary.
pub const ENROLCTL_APP: &str = "Enrolment Control";


//------------ Config Files Paths -------------------------------------------

/// The default path to the config file.
pub const DEFAULT_CONFIG_FILE: &str = "/etc/enrolment.conf";


//------------ Environment Variables ----------------------------------------

/// The environment variable for the log level.
pub const ENROLMENT_ENV_LOG_LEVEL: &str = "ENROLMENT_LOG_LEVEL";


//------------ Storage Namespaces --------------------------------------------

pub const RESULTS_NS: &str = "results";
pub const MEMBERSHIP_NS: &str = "membership";
pub const PROVIDER_STATE_NS: &str = "provider_state";
pub const JOURNAL_NS: &str = "journal";
pub const CALCULATIONS_NS: &str = "calculations";
pub const SETTINGS_NS: &str = "settings";
pub const TASK_QUEUE_NS: &str = "tasks";


//------------ Limits --------------------------------------------------------

/// The default number of entries kept in journals and state logs.
pub const DEFAULT_LOG_SIZE: usize = 30;

pub const DEFAULT_LEARNER_BATCH_SIZE: usize = 20;
pub const DEFAULT_COURSE_BATCH_SIZE: usize = 40;
