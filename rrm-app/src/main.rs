//! RRM App Main Application
//!
//! Slice-aware radio resource management app for the RAN controller: pulls
//! stats, estimates per-user RB demand, turns it into slice shares and pushes
//! the resulting policy, once per control cycle.

mod config;
mod operator;

use anyhow::{Context, Result};
use clap::Parser;
use common::types::Direction;
use interfaces::{connect, ControllerApi, ControllerEndpoint, OpMode};
use rrm::policy::PolicyDocument;
use rrm::{ControlLoop, LoopConfig, PersistenceConfig, SliceCountHandle};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;

/// Slice-aware RRM app
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "rrm_app.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Controller URL
    #[arg(long)]
    url: Option<String>,

    /// Controller port
    #[arg(long)]
    port: Option<u16>,

    /// Operation mode (test, sdk)
    #[arg(long)]
    op_mode: Option<String>,

    /// Slice template (embb, urllc, mmtc, mixed or one from the config file)
    #[arg(long)]
    slice_template: Option<String>,

    /// Stats fixture replayed in test mode
    #[arg(long)]
    stats_fixture: Option<PathBuf>,

    /// Scheduling policy template
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Number of cycles to run before exiting
    #[arg(long)]
    cycles: Option<u64>,

    /// Seconds between two cycles
    #[arg(long)]
    interval_secs: Option<u64>,

    /// Directory receiving the applied policies
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl Args {
    /// Apply command line overrides
    fn apply(&self, config: &mut AppConfig) {
        if let Some(url) = &self.url {
            config.controller.url = url.clone();
        }
        if let Some(port) = self.port {
            config.controller.port = port;
        }
        if let Some(op_mode) = &self.op_mode {
            config.controller.op_mode = op_mode.clone();
        }
        if let Some(template) = &self.slice_template {
            config.slice_template = Some(template.clone());
        }
        if let Some(fixture) = &self.stats_fixture {
            config.simulation.stats_fixture = fixture.clone();
        }
        if let Some(policy) = &self.policy {
            config.policy.template = Some(policy.clone());
        }
        if let Some(cycles) = self.cycles {
            config.control_loop.cycles = Some(cycles);
        }
        if let Some(interval) = self.interval_secs {
            config.control_loop.interval_secs = interval;
        }
        if let Some(dir) = &self.output_dir {
            config.policy.output_dir = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting RRM app");
    info!("Configuration file: {}", args.config.display());

    let mut config = AppConfig::load(&args.config)
        .with_context(|| format!("Cannot load configuration {}", args.config.display()))?;
    args.apply(&mut config);

    let op_mode: OpMode = config.controller.op_mode.parse()?;

    // Policy template and slice preset
    let mut template = match &config.policy.template {
        Some(path) => PolicyDocument::load(path)
            .with_context(|| format!("Cannot load policy template {}", path.display()))?,
        None => {
            info!("No policy template configured, using the default policy");
            PolicyDocument::default()
        }
    };

    let slice_count = match config.selected_template().map_err(anyhow::Error::msg)? {
        Some(preset) => preset
            .apply(&mut template)
            .context("Invalid slice template")?,
        None => template.num_slices(Direction::Dl)?,
    };

    info!("Controller configuration:");
    info!("  URL: {}:{}", config.controller.url, config.controller.port);
    info!("  Operation mode: {}", op_mode);
    info!("  Request timeout: {} ms", config.controller.timeout_ms);
    info!("  Initial slices: {}", slice_count.value());

    let endpoint = ControllerEndpoint::new(
        &config.controller.url,
        Some(config.controller.port),
        config.controller.timeout(),
    );
    let (stats_source, controller) = connect(op_mode, endpoint, config.simulation.stats_fixture.clone())
        .context("Cannot set up the controller connection")?;

    startup_calls(&config, controller.as_ref()).await;

    // Operator prompt
    let slice_handle = SliceCountHandle::new(slice_count);
    {
        let handle = slice_handle.clone();
        std::thread::spawn(move || operator::run(std::io::stdin().lock(), handle));
    }

    let persistence = config.policy.persist.then(|| PersistenceConfig {
        output_dir: config.policy.output_dir.clone(),
        basename: config.policy.basename.clone(),
        format: config.policy.format,
    });
    if let Some(p) = &persistence {
        info!("Applied policies go to {}/{}_<sfn>.{}", p.output_dir.display(), p.basename, p.format.extension());
    }

    let loop_config = LoopConfig {
        interval: Duration::from_secs(config.control_loop.interval_secs),
        initial_delay: Duration::from_secs(config.control_loop.initial_delay_secs),
        request_timeout: config.controller.timeout(),
        max_cycles: config.control_loop.cycles,
    };

    let rrm = ControlLoop::new(
        stats_source,
        controller,
        template,
        slice_handle,
        persistence,
        loop_config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut loop_task = tokio::spawn(rrm.run(shutdown_rx));

    // Wait for the loop to finish or a shutdown signal
    let cycles = tokio::select! {
        result = &mut loop_task => result.context("Control loop stopped unexpectedly")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, finishing the current cycle");
            let _ = shutdown_tx.send(true);
            (&mut loop_task).await.context("Control loop stopped unexpectedly")?
        }
    };

    info!("RRM app shutdown complete after {} cycle(s)", cycles);
    Ok(())
}

/// Fire the configured one-off controller calls
async fn startup_calls(config: &AppConfig, controller: &dyn ControllerApi) {
    let timeout = config.controller.timeout();

    if let Some(trigger) = config.rrc_trigger {
        match tokio::time::timeout(timeout, controller.trigger_rrc_measurement(trigger)).await {
            Ok(Ok(())) => info!("RRC measurement trigger {} sent", trigger.path_segment()),
            Ok(Err(e)) => warn!("RRC measurement trigger failed: {}", e),
            Err(_) => warn!("RRC measurement trigger timed out"),
        }
    }

    for delegation in &config.delegation {
        let name = delegation.function.path_segment();
        match tokio::time::timeout(
            timeout,
            controller.delegate_scheduler(delegation.function, delegation.action),
        )
        .await
        {
            Ok(Ok(())) => info!("{} {:?} applied", name, delegation.action),
            Ok(Err(e)) => warn!("{} {:?} failed: {}", name, delegation.action, e),
            Err(_) => warn!("{} {:?} timed out", name, delegation.action),
        }
    }
}
