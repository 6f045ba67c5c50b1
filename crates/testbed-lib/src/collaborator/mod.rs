//! Interfaces to the systems the control loop observes and actuates
//!
//! The engine never talks to a hypervisor or a load generator directly. It
//! reads sensors and writes resource shares through these traits, which are
//! implemented by virtualization and workload integrations (or by the
//! in-memory simulation in [`sim`]).

pub mod sim;

use crate::models::{AppId, AppMetric, Observation, VmId, VmMetric};
use anyhow::Result;
use std::sync::Arc;

pub use async_trait::async_trait;
pub use sim::{SimApplication, SimDriverConfig, SimSensor, SimVirtualMachine, SimWorkloadDriver};

/// A probe producing observations of one metric
#[async_trait]
pub trait Sensor: Send + Sync {
    /// Probe the underlying source, gathering whatever became available
    async fn sense(&self) -> Result<()>;

    /// Whether the last `sense()` produced observations not yet drained
    fn has_observations(&self) -> bool;

    /// Drain the observations gathered by the last `sense()`
    fn observations(&self) -> Vec<Observation>;

    /// Forget anything gathered so far
    async fn reset(&self) -> Result<()>;
}

/// A virtual machine whose resource shares can be read and changed
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    fn id(&self) -> VmId;

    /// CPU capacity (number of virtual CPUs times their nominal speed)
    async fn cpu_cap(&self) -> Result<f64>;

    async fn cpu_share(&self) -> Result<f64>;

    async fn set_cpu_share(&self, share: f64) -> Result<()>;

    async fn memory_share(&self) -> Result<f64>;

    async fn set_memory_share(&self, share: f64) -> Result<()>;

    fn sensor(&self, metric: VmMetric) -> Result<Arc<dyn Sensor>>;
}

/// A multi-tier application running on a set of VMs
pub trait Application: Send + Sync {
    fn id(&self) -> AppId;

    fn vms(&self) -> Vec<Arc<dyn VirtualMachine>>;

    fn sensor(&self, metric: AppMetric) -> Result<Arc<dyn Sensor>>;
}

/// An external workload generator driving traffic to an application
#[async_trait]
pub trait WorkloadDriver: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn reset(&self) -> Result<()>;

    /// True once the driver has finished its ramp-up phase
    async fn ready(&self) -> Result<bool>;

    /// True once the workload has completed
    async fn done(&self) -> Result<bool>;
}
