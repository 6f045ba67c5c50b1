//! In-memory simulation of VMs, applications and workload drivers
//!
//! Used by the `testbed` binary to run a closed loop without a hypervisor,
//! and by tests that need collaborators whose state can be inspected.

use super::{async_trait, Application, Sensor, VirtualMachine, WorkloadDriver};
use crate::models::{AppId, AppMetric, Observation, ResourceShares, VmId, VmMetric};
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sensor fed by hand (or by [`SimWorkloadDriver`])
///
/// Values pushed are staged until the next `sense()`, which makes them
/// visible to `observations()`.
#[derive(Debug)]
pub struct SimSensor {
    label: String,
    staged: Mutex<Vec<Observation>>,
    sensed: Mutex<Vec<Observation>>,
}

impl SimSensor {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            staged: Mutex::new(Vec::new()),
            sensed: Mutex::new(Vec::new()),
        }
    }

    /// Stage one value for the next probe
    pub fn push(&self, value: f64) {
        lock(&self.staged).push(Observation::now(self.label.clone(), value));
    }

    /// Stage several values for the next probe
    pub fn push_all(&self, values: &[f64]) {
        let mut staged = lock(&self.staged);
        for &value in values {
            staged.push(Observation::now(self.label.clone(), value));
        }
    }

    /// Number of values staged and not yet sensed
    pub fn staged_len(&self) -> usize {
        lock(&self.staged).len()
    }
}

#[async_trait]
impl Sensor for SimSensor {
    async fn sense(&self) -> Result<()> {
        let mut staged = lock(&self.staged);
        lock(&self.sensed).append(&mut staged);
        Ok(())
    }

    fn has_observations(&self) -> bool {
        !lock(&self.sensed).is_empty()
    }

    fn observations(&self) -> Vec<Observation> {
        std::mem::take(&mut *lock(&self.sensed))
    }

    async fn reset(&self) -> Result<()> {
        lock(&self.staged).clear();
        lock(&self.sensed).clear();
        Ok(())
    }
}

/// VM whose shares live in memory
#[derive(Debug)]
pub struct SimVirtualMachine {
    id: VmId,
    cpu_cap: f64,
    shares: Mutex<ResourceShares>,
    sensors: DashMap<VmMetric, Arc<SimSensor>>,
    fail_actuation: AtomicBool,
}

impl SimVirtualMachine {
    pub fn new(id: impl Into<VmId>, cpu_cap: f64, shares: ResourceShares) -> Self {
        let id = id.into();
        let sensors = DashMap::new();
        for metric in [VmMetric::CpuUtil, VmMetric::MemoryUtil] {
            sensors.insert(metric, Arc::new(SimSensor::new(format!("{}:{}", id, metric))));
        }

        Self {
            id,
            cpu_cap,
            shares: Mutex::new(shares),
            sensors,
            fail_actuation: AtomicBool::new(false),
        }
    }

    /// Current shares, bypassing the async interface
    pub fn shares(&self) -> ResourceShares {
        *lock(&self.shares)
    }

    /// Concrete sensor handle, for feeding observations
    pub fn sim_sensor(&self, metric: VmMetric) -> Option<Arc<SimSensor>> {
        self.sensors.get(&metric).map(|s| s.value().clone())
    }

    /// Make every subsequent share change fail, as a lost hypervisor would
    pub fn set_fail_actuation(&self, fail: bool) {
        self.fail_actuation.store(fail, Ordering::SeqCst);
    }

    fn check_actuation(&self) -> Result<()> {
        if self.fail_actuation.load(Ordering::SeqCst) {
            return Err(anyhow!("VM {} rejected share change", self.id));
        }
        Ok(())
    }
}

#[async_trait]
impl VirtualMachine for SimVirtualMachine {
    fn id(&self) -> VmId {
        self.id.clone()
    }

    async fn cpu_cap(&self) -> Result<f64> {
        Ok(self.cpu_cap)
    }

    async fn cpu_share(&self) -> Result<f64> {
        Ok(lock(&self.shares).cpu_share)
    }

    async fn set_cpu_share(&self, share: f64) -> Result<()> {
        self.check_actuation()?;
        lock(&self.shares).cpu_share = share;
        Ok(())
    }

    async fn memory_share(&self) -> Result<f64> {
        Ok(lock(&self.shares).memory_share)
    }

    async fn set_memory_share(&self, share: f64) -> Result<()> {
        self.check_actuation()?;
        lock(&self.shares).memory_share = share;
        Ok(())
    }

    fn sensor(&self, metric: VmMetric) -> Result<Arc<dyn Sensor>> {
        self.sensors
            .get(&metric)
            .map(|s| s.value().clone() as Arc<dyn Sensor>)
            .ok_or_else(|| anyhow!("VM {} has no {} sensor", self.id, metric))
    }
}

/// Application made of simulated VMs
#[derive(Debug)]
pub struct SimApplication {
    id: AppId,
    vms: Vec<Arc<SimVirtualMachine>>,
    sensors: DashMap<AppMetric, Arc<SimSensor>>,
}

impl SimApplication {
    pub fn new(id: impl Into<AppId>, vms: Vec<Arc<SimVirtualMachine>>) -> Self {
        Self {
            id: id.into(),
            vms,
            sensors: DashMap::new(),
        }
    }

    /// Register a fresh sensor for `metric`
    pub fn with_sensor(self, metric: AppMetric) -> Self {
        let sensor = Arc::new(SimSensor::new(format!("{}:{}", self.id, metric)));
        self.register_sensor(metric, sensor);
        self
    }

    pub fn register_sensor(&self, metric: AppMetric, sensor: Arc<SimSensor>) {
        self.sensors.insert(metric, sensor);
    }

    pub fn deregister_sensor(&self, metric: AppMetric) -> Option<Arc<SimSensor>> {
        self.sensors.remove(&metric).map(|(_, s)| s)
    }

    pub fn sim_sensor(&self, metric: AppMetric) -> Option<Arc<SimSensor>> {
        self.sensors.get(&metric).map(|s| s.value().clone())
    }

    pub fn sim_vms(&self) -> &[Arc<SimVirtualMachine>] {
        &self.vms
    }
}

impl Application for SimApplication {
    fn id(&self) -> AppId {
        self.id.clone()
    }

    fn vms(&self) -> Vec<Arc<dyn VirtualMachine>> {
        self.vms
            .iter()
            .map(|vm| vm.clone() as Arc<dyn VirtualMachine>)
            .collect()
    }

    fn sensor(&self, metric: AppMetric) -> Result<Arc<dyn Sensor>> {
        self.sensors
            .get(&metric)
            .map(|s| s.value().clone() as Arc<dyn Sensor>)
            .ok_or_else(|| anyhow!("application {} has no {} sensor", self.id, metric))
    }
}

/// Configuration of the simulated workload
#[derive(Debug, Clone)]
pub struct SimDriverConfig {
    /// Time before the driver reports itself ready
    pub ramp_up: Duration,
    /// Length of the steady-state phase after ramp-up
    pub duration: Duration,
    /// Period between generated observations
    pub emit_interval: Duration,
    /// Seconds of CPU work per request at full share
    pub service_demand: f64,
    /// Offered load as a fraction of one full CPU
    pub load: f64,
}

impl Default for SimDriverConfig {
    fn default() -> Self {
        Self {
            ramp_up: Duration::from_secs(1),
            duration: Duration::from_secs(60),
            emit_interval: Duration::from_millis(100),
            service_demand: 0.1,
            load: 0.5,
        }
    }
}

#[derive(Debug, Default)]
struct DriverState {
    started_at: Option<Instant>,
    stopped: bool,
}

/// Workload driver generating response-time and utilization observations
///
/// Response time follows the bottleneck VM: `demand / (share - load)` when
/// the share covers the load, growing steeply as the share approaches it.
pub struct SimWorkloadDriver {
    app: Arc<SimApplication>,
    config: SimDriverConfig,
    state: Mutex<DriverState>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    generator: Mutex<Option<JoinHandle<()>>>,
}

impl SimWorkloadDriver {
    pub fn new(app: Arc<SimApplication>, config: SimDriverConfig) -> Self {
        Self {
            app,
            config,
            state: Mutex::new(DriverState::default()),
            stop_tx: Mutex::new(None),
            generator: Mutex::new(None),
        }
    }

    fn emit(app: &SimApplication, config: &SimDriverConfig, tick: u64) {
        let jitter = 1.0 + 0.1 * (tick as f64 * 0.7).sin();
        let mut response_time: f64 = 0.0;

        for vm in app.sim_vms() {
            let share = vm.shares().cpu_share.max(0.01);
            let headroom = (share - config.load).max(0.01 * share);
            response_time = response_time.max(config.service_demand * share / headroom);

            if let Some(sensor) = vm.sim_sensor(VmMetric::CpuUtil) {
                sensor.push((config.load / share).min(1.0));
            }
        }

        if let Some(sensor) = app.sim_sensor(AppMetric::ResponseTime) {
            sensor.push(response_time * jitter);
        }
        if let Some(sensor) = app.sim_sensor(AppMetric::Throughput) {
            sensor.push(config.load / config.service_demand);
        }
    }
}

#[async_trait]
impl WorkloadDriver for SimWorkloadDriver {
    async fn start(&self) -> Result<()> {
        lock(&self.state).started_at = Some(Instant::now());

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let app = self.app.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(config.emit_interval);
            let mut tick = 0u64;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        SimWorkloadDriver::emit(&app, &config, tick);
                        tick += 1;
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!(ticks = tick, "Simulated workload generator stopped");
        });

        *lock(&self.stop_tx) = Some(stop_tx);
        *lock(&self.generator) = Some(handle);

        info!(
            app_id = %self.app.id(),
            ramp_up_ms = self.config.ramp_up.as_millis() as u64,
            duration_ms = self.config.duration.as_millis() as u64,
            "Simulated workload started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(tx) = lock(&self.stop_tx).take() {
            let _ = tx.send(true);
        }
        let generator = lock(&self.generator).take();
        if let Some(handle) = generator {
            handle.await?;
        }
        lock(&self.state).stopped = true;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        *lock(&self.state) = DriverState::default();
        Ok(())
    }

    async fn ready(&self) -> Result<bool> {
        let state = lock(&self.state);
        Ok(state
            .started_at
            .map(|t| t.elapsed() >= self.config.ramp_up)
            .unwrap_or(false))
    }

    async fn done(&self) -> Result<bool> {
        let state = lock(&self.state);
        if state.stopped {
            return Ok(true);
        }
        Ok(state
            .started_at
            .map(|t| t.elapsed() >= self.config.ramp_up + self.config.duration)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_shares() -> ResourceShares {
        ResourceShares {
            cpu_share: 1.0,
            memory_share: 1.0,
        }
    }

    #[tokio::test]
    async fn test_sensor_stages_until_sense() {
        let sensor = SimSensor::new("rt");
        sensor.push_all(&[0.1, 0.2]);

        assert!(!sensor.has_observations());
        sensor.sense().await.unwrap();
        assert!(sensor.has_observations());

        let obs = sensor.observations();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[1].value, 0.2);

        // Drained
        assert!(!sensor.has_observations());
        assert!(sensor.observations().is_empty());
    }

    #[tokio::test]
    async fn test_vm_actuation_failure() {
        let vm = SimVirtualMachine::new("vm1", 1.0, full_shares());
        vm.set_cpu_share(0.5).await.unwrap();
        assert_eq!(vm.cpu_share().await.unwrap(), 0.5);

        vm.set_fail_actuation(true);
        assert!(vm.set_cpu_share(0.2).await.is_err());
        assert_eq!(vm.shares().cpu_share, 0.5);
    }

    #[tokio::test]
    async fn test_application_sensor_registry() {
        let vm = Arc::new(SimVirtualMachine::new("vm1", 1.0, full_shares()));
        let app = SimApplication::new("app", vec![vm]).with_sensor(AppMetric::ResponseTime);

        assert!(app.sensor(AppMetric::ResponseTime).is_ok());
        assert!(app.sensor(AppMetric::Throughput).is_err());

        app.deregister_sensor(AppMetric::ResponseTime);
        assert!(app.sensor(AppMetric::ResponseTime).is_err());
        assert_eq!(app.vms().len(), 1);
    }

    #[tokio::test]
    async fn test_driver_lifecycle() {
        let vm = Arc::new(SimVirtualMachine::new("vm1", 1.0, full_shares()));
        let app = Arc::new(SimApplication::new("app", vec![vm]).with_sensor(AppMetric::ResponseTime));
        let driver = SimWorkloadDriver::new(
            app.clone(),
            SimDriverConfig {
                ramp_up: Duration::from_millis(20),
                duration: Duration::from_millis(50),
                emit_interval: Duration::from_millis(5),
                ..Default::default()
            },
        );

        assert!(!driver.ready().await.unwrap());
        driver.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(driver.ready().await.unwrap());
        assert!(!driver.done().await.unwrap());

        driver.stop().await.unwrap();
        assert!(driver.done().await.unwrap());

        let sensor = app.sim_sensor(AppMetric::ResponseTime).unwrap();
        assert!(sensor.staged_len() > 0);

        driver.reset().await.unwrap();
        assert!(!driver.done().await.unwrap());
    }
}
