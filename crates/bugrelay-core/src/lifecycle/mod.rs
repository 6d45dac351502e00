//! Mutations of a bug report's lifecycle. Every function here takes the
//! connection of an open write transaction and never commits on its own.

pub mod audit;
pub mod comments;
pub mod counters;
pub mod flags;
pub mod merge;
pub mod soft_delete;
pub mod status;
pub mod votes;
