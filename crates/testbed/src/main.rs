//! Testbed - closed-loop resource management experiments
//!
//! Runs a simulated application under the configured estimator, smoother
//! and control strategy, serving health, metrics and statistics over HTTP
//! while the experiment runs.

use anyhow::{bail, Result};
use std::sync::Arc;
use testbed_lib::{
    collaborator::{SimApplication, SimDriverConfig, SimVirtualMachine, SimWorkloadDriver},
    estimator::EstimatorConfig,
    health::{components, HealthRegistry},
    manager::{ControlStrategy, HoldStrategy, ProportionalShareStrategy},
    observability::TestbedMetrics,
    tracker::{spawn_tracker, StatsGatherer},
    AppMetric, ApplicationExperiment, ApplicationManager, ExperimentIdGenerator, ResourceShares,
    SystemExperiment, VmMetric,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const TESTBED_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = TESTBED_VERSION, "Starting testbed");

    let config = config::TestbedConfig::load()?;
    info!(
        slo_metric = %config.slo_metric,
        slo_value = config.slo_value,
        estimator = %config.estimator,
        smoother = %config.smoother,
        strategy = %config.strategy,
        "Testbed configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::DRIVER).await;

    let metrics = TestbedMetrics::new();
    let stats = Arc::new(StatsGatherer::new());

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        stats.clone(),
    ));
    let port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(port, app_state).await {
            error!(error = %e, "API server failed");
        }
    });

    let system = build_system(&config, &health_registry)?;
    let tracker = spawn_tracker(stats.clone(), system.events().subscribe());

    health_registry.set_ready(true).await;
    let result = {
        let run = system.run();
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping experiments");
                system.cancel();
                run.await
            }
        }
    }
    .map_err(anyhow::Error::from);
    health_registry.set_ready(false).await;

    // Closing the event stream lets the tracker drain and finish
    drop(system);
    let missed = tracker.await?;

    for (experiment_id, series, report) in stats.reports() {
        info!(
            experiment_id,
            series = %series,
            count = report.summary.count,
            mean = report.summary.mean,
            variance = report.variance,
            min = report.summary.min,
            max = report.summary.max,
            p50 = report.quantile(0.5).unwrap_or(f64::NAN),
            p95 = report.quantile(0.95).unwrap_or(f64::NAN),
            p99 = report.quantile(0.99).unwrap_or(f64::NAN),
            "Experiment statistics"
        );
    }
    info!(missed_events = missed, "Shutting down");

    result
}

/// One simulated application experiment, wired from configuration
fn build_system(
    config: &config::TestbedConfig,
    health_registry: &HealthRegistry,
) -> Result<SystemExperiment> {
    let metric = config.slo_metric()?;

    let vms: Vec<Arc<SimVirtualMachine>> = (0..config.num_vms.max(1))
        .map(|i| {
            Arc::new(SimVirtualMachine::new(
                format!("vm{}", i),
                1.0,
                ResourceShares {
                    cpu_share: 1.0,
                    memory_share: 1.0,
                },
            ))
        })
        .collect();
    let app = Arc::new(
        SimApplication::new("sim-app", vms)
            .with_sensor(AppMetric::ResponseTime)
            .with_sensor(AppMetric::Throughput),
    );
    let driver = Arc::new(SimWorkloadDriver::new(
        app.clone(),
        SimDriverConfig {
            ramp_up: config.sim_ramp_up()?,
            duration: config.sim_duration()?,
            load: config.sim_load,
            ..Default::default()
        },
    ));

    let strategy: Box<dyn ControlStrategy> = match config.strategy.as_str() {
        "hold" => Box::new(HoldStrategy),
        "proportional_share" => Box::new(ProportionalShareStrategy::new(metric)),
        other => bail!("unknown control strategy {:?}", other),
    };

    let mut manager = ApplicationManager::new(strategy);
    manager.set_sampling_time(config.sampling_time()?)?;
    manager.set_control_time(config.control_time()?)?;
    manager.set_target_value(metric, config.slo_value)?;
    manager.set_data_estimator(metric, config.estimator_config()?)?;
    manager.set_data_smoother(metric, config.smoother_config()?)?;
    manager.set_vm_data_estimator(VmMetric::CpuUtil, None, EstimatorConfig::Mean)?;
    if let Some(path) = &config.report_path {
        manager.export_data_to(path);
    }

    let ids = ExperimentIdGenerator::new();
    let experiment = ApplicationExperiment::new(&ids)
        .with_app(app)
        .with_driver(driver)
        .with_manager(manager)
        .with_restore_state(config.restore_vms)
        .with_poll_interval(config.poll_interval()?)?
        .with_health(health_registry.clone());

    let mut system = SystemExperiment::default();
    system.add(experiment);
    Ok(system)
}
