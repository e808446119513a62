//! Data Transfer Objects
//!
//! Request and response bodies for the coordinator protocol and for the
//! daemon's operator status API.

pub mod fleet;
pub mod job;
pub mod runner;
