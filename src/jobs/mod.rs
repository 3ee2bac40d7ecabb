//! Background recalculation of enrolments.

pub use self::course::CourseCalculationJob;
pub use self::learner::LearnerCalculationJob;
pub use self::mq::{JobTransport, QueuedTask, Task, TaskQueue};
pub use self::scheduler::{JobOutcome, JobScheduler};

pub mod course;
pub mod learner;
pub mod mq;
pub mod scheduler;
