//! Gatekeeper - In-process Admission Control
//!
//! This crate decides, for every inbound unit of work, whether to admit or
//! reject it using per-key token buckets. A small registry of named
//! limiters covers global, API, login and upload traffic, and a background
//! reaper evicts buckets that have gone idle.

pub mod config;
pub mod error;
pub mod ratelimit;
