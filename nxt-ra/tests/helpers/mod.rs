//! Test Helper Utilities
//!
//! Shared setup for nxt-ra integration tests

#![allow(dead_code)]

pub mod portfolio;
pub mod reasoners;

pub use portfolio::{permit_entry, TestPortfolio};
pub use reasoners::{
    CancellingReasoner, ConflictingReasoner, FlakyReasoner, ScriptedReasoner, SlowReasoner,
};
