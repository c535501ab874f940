//! # couch-client: remote couch co-op client
//!
//! Joins a couch host over UDP, turns the local keyboard into one of the
//! host's controllers and receives the host's video stream.
//!
//! Decoding and presentation are external; reassembled frames are handed
//! to a statistics consumer that reports the stream rate.

pub mod config;
pub mod keyboard;
pub mod stats;
