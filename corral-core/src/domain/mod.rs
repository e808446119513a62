//! Core domain types
//!
//! These types represent the entities a runner host deals with and are
//! shared between the daemon (which owns and persists them) and the clients
//! (which move them over the wire).

pub mod agent;
pub mod health;
pub mod lease;
pub mod result;
pub mod runner;
pub mod token;
