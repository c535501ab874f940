//! # couch-host: remote couch co-op host
//!
//! Shares the local screen with up to four remote players and presents
//! each of them to local games as a directly attached controller.
//!
//! The transport itself lives in `couch-core`; this crate adds the TOML
//! configuration, the in-process gamepad bank, a test-pattern frame source
//! and periodic status reporting.

pub mod config;
pub mod gamepad;
pub mod service;
pub mod source;
