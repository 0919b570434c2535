//! # SynergySphere Shared Library
//!
//! Shared types and persistence used by the SynergySphere sync core and its
//! binaries.
//!
//! ## Module Organization
//!
//! - `models`: Projects, tasks, chat messages, memberships and profiles
//! - `db`: PostgreSQL connection pool and migrations
//! - `events`: Change-event wire format and topic naming
//! - `redis`: Redis client and the pub/sub change feed

pub mod db;
pub mod events;
pub mod models;
pub mod redis;

/// Current version of the SynergySphere shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
