//! Corral Core
//!
//! Core types shared by the corral runner daemon, its HTTP clients and the
//! operator CLI.
//!
//! This crate contains:
//! - Domain types: runner identity, tokens, leases, execution results,
//!   health samples and the agent state machine vocabulary
//! - DTOs: request/response bodies for the coordinator protocol and the
//!   fleet status surface

pub mod domain;
pub mod dto;
