use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bankload_core::provision::DEFAULT_SLOT_DELAY;
use bankload_core::{LoadRun, RunConfig, RunPlan, SetupPlan};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod http_client;
mod metrics;

use cli::{Cli, GlobalArgs, Profile};
use http_client::ReqwestExecutor;
use metrics::reporter::{self, LiveView};
use metrics::system::SystemMonitor;

/// Exit status when the run completed but a threshold failed.
const THRESHOLDS_FAILED: u8 = 99;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize tracing, RUST_LOG wins over --verbose
    let default_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let plan = build_plan(&cli.profile, &cli.global)?;

    tracing::info!("Bank Load Test Starting...");
    tracing::info!("Profile: {}", cli.profile.name());
    tracing::info!("Target: {}", cli.global.base_url);
    tracing::info!("Scenarios: {}", plan.scenarios.len());
    for scenario in &plan.scenarios {
        tracing::info!(
            "  {}: start +{:?}, {:?}, up to {} VUs",
            scenario.name,
            scenario.start_offset,
            scenario.schedule.total_duration(),
            scenario.schedule.max_target()
        );
    }
    if let Some(setup) = &plan.setup {
        tracing::info!("Setup: {} identities ({})", setup.count, setup.prefix);
    }
    tracing::info!("Planned duration: {:?}", plan.total_duration());

    let http = ReqwestExecutor::new(
        &cli.global.base_url,
        Duration::from_secs(cli.global.timeout),
    )?;
    let run = LoadRun::new(Arc::new(http), plan);

    // Start periodic metrics reporter
    let view = LiveView {
        profile: cli.profile.name().to_string(),
        metrics: run.metrics(),
        status: run.status(),
        thresholds: run.plan().thresholds.clone(),
        system: SystemMonitor::new(),
    };
    let reporter_task = tokio::spawn(reporter::start_periodic_reporter(
        view,
        cli.global.report_interval,
        !cli.global.no_live,
    ));

    // Ctrl+C stops spawning, lets in-flight iterations finish
    let stop = run.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, draining virtual users");
            stop.stop();
        }
    });

    let report = run.execute().await;
    reporter_task.abort();

    reporter::print_final_report(cli.profile.name(), &report);

    if report.verdict.pass {
        tracing::info!("Load test complete, all thresholds passed");
        Ok(ExitCode::SUCCESS)
    } else {
        for violation in report.verdict.violations() {
            tracing::error!("Threshold failed: {}", violation.rule);
        }
        Ok(ExitCode::from(THRESHOLDS_FAILED))
    }
}

/// Resolve the profile into a plan and apply the global overrides.
fn build_plan(profile: &Profile, global: &GlobalArgs) -> Result<RunPlan> {
    let mut plan = match (config::profiles::built_in(profile), profile) {
        (Some(plan), _) => plan?,
        (None, Profile::Custom(args)) => {
            let text = std::fs::read_to_string(&args.config).with_context(|| {
                format!("Failed to read run configuration {}", args.config.display())
            })?;
            let run_config = RunConfig::from_json(&text)
                .with_context(|| format!("Invalid run configuration {}", args.config.display()))?;
            config::profiles::from_config(run_config)?
        }
        (None, _) => anyhow::bail!("Unknown profile: {}", profile.name()),
    };

    if let Some(count) = global.setup_users {
        match &mut plan.setup {
            Some(setup) => setup.count = count,
            None => {
                plan.setup = Some(SetupPlan {
                    count,
                    prefix: "loaduser".to_string(),
                    slot_delay: DEFAULT_SLOT_DELAY,
                    seed: None,
                })
            }
        }
    }
    if global.time_scale != 1.0 {
        plan.scale_time(global.time_scale);
    }
    if let Some(seed) = global.seed {
        plan.seed_all(seed);
    }

    Ok(plan)
}
