//! Service layer
//!
//! Host-local services the agents build on: capability discovery, job
//! execution and the job log store.

mod capabilities;
mod executor;
mod log_store;

pub use capabilities::{CapabilitiesService, StandardCapabilitiesService};
pub use executor::{ExecutorConfig, JobExecutor};
pub use log_store::{JobLogWriter, LogStore, LogStoreConfig};
