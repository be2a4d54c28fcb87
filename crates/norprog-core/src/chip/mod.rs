//! Flash chip descriptors and repository
//!
//! This module provides the descriptor type that parameterizes every engine
//! operation, the region type used to address it, and a repository of
//! known chips that can be imported from and exported to RON.

mod database;
mod types;

pub use database::*;
pub use types::*;
