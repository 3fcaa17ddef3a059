//! # NXT Common Library
//!
//! Shared code for the NXT research agent and the presentation layer:
//! - Persisted-state models (projects, RAID items, velocity scores, audit log)
//! - SQLite schema initialization
//! - Root folder and config file resolution
//! - Common error type

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
