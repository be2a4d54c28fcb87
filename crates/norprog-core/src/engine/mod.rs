//! Flash programming engine
//!
//! This module provides the engine that runs read/write/erase/verify
//! sessions against one chip, the observable session state it publishes,
//! the retry/polling policy, and a worker that runs operations off the
//! caller's thread.

mod operations;
mod policy;
mod session;
mod worker;

pub use operations::{Outcome, ProgrammingEngine, WriteOptions};
pub use policy::EnginePolicy;
pub use session::{SessionSnapshot, SessionState, Status};
pub use worker::{OperationHandle, Worker};
