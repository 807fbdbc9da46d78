pub mod billing;
pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod journal;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod publisher;
pub mod report;

pub use engine::{CheckInRequest, EngineConfig, EngineError, ErrorKind, OccupancyService};
