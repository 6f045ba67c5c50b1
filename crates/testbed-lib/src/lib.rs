//! Closed-loop resource management testbed
//!
//! This crate provides the core of the testbed:
//! - Streaming estimators and exponential smoothers
//! - The application manager reset/sample/control state machine
//! - Experiment orchestration with concurrent sampling and control
//! - Event stream, trackers, health checks and observability

pub mod collaborator;
pub mod error;
pub mod estimator;
pub mod events;
pub mod experiment;
pub mod health;
pub mod manager;
pub mod models;
pub mod observability;
pub mod smoother;
pub mod tracker;

pub use error::{Result, TestbedError};
pub use events::{ControlOutcome, EventBus, EventKind, ExperimentEvent};
pub use experiment::{ApplicationExperiment, ExperimentIdGenerator, SystemExperiment};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use manager::ApplicationManager;
pub use models::*;
pub use observability::{ExperimentLogger, TestbedMetrics};
