//! Experiment orchestration
//!
//! An [`ApplicationExperiment`] drives one application through reset,
//! workload start, concurrent sampling and control, and teardown. A
//! [`SystemExperiment`] runs several of them at once.

mod ids;
mod periodic;
mod runner;
mod system;


pub use ids::ExperimentIdGenerator;
pub use periodic::Activity;
pub use runner::{ApplicationExperiment, DEFAULT_POLL_INTERVAL};
pub use system::SystemExperiment;
