//! Common types used by the various engine components.
pub mod error;
pub mod ext_serde;
pub mod queue;
pub mod storage;
pub mod timestamp;

//------------ Response Aliases ----------------------------------------------

pub type EngineEmptyResult = std::result::Result<(), self::error::Error>;
pub type EngineResult<T> = std::result::Result<T, self::error::Error>;
