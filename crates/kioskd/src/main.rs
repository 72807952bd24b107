//! kioskd - Kiosk hardware daemon
//!
//! Acquires the devices listed in the configuration file, auto-detects the
//! connected ones and holds them until Ctrl-C.
//!
//! Usage:
//!   kioskd [OPTIONS] [config.toml]
//!   kioskd [config.toml] drivers
//!
//! Without a config file no ports are offered and the configuration store
//! lives in memory.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kiosk_devmgr::{DeviceHandle, DeviceManager};
use kiosk_hw::StaticPluginLoader;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{DaemonConfig, DeviceConfig};

#[derive(Parser)]
#[command(name = "kioskd")]
#[command(author, version, about = "Kiosk hardware daemon")]
struct Cli {
    /// Daemon config file (TOML)
    #[arg(env = "KIOSKD_CONFIG")]
    config: Option<PathBuf>,

    /// Run detection at startup (overrides the config file)
    #[arg(long, overrides_with = "no_detect")]
    detect: bool,

    /// Skip detection at startup
    #[arg(long)]
    no_detect: bool,

    /// Only probe drivers whose path contains this substring
    #[arg(long)]
    filter: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the drivers and their parameters
    Drivers,
}

impl Cli {
    fn detection_enabled(&self, config: &DaemonConfig) -> bool {
        if self.no_detect {
            false
        } else if self.detect {
            true
        } else {
            config.detection.enabled
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "kioskd=info,kiosk_devmgr=info,kiosk_hw=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    tracing::info!("Starting kioskd (kiosk hardware daemon)");

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading config from: {}", path.display());
            DaemonConfig::load(path)?
        }
        None => {
            tracing::info!("No config file provided, running without ports");
            DaemonConfig::default()
        }
    };

    let loader = Arc::new(
        StaticPluginLoader::new(&config.loader).context("Failed to create plugin loader")?,
    );
    let manager = Arc::new(DeviceManager::new(loader.clone(), config.manager.clone()));
    let drivers = manager.initialize();
    tracing::info!(drivers, "Device manager initialized");

    if let Some(Commands::Drivers) = cli.command {
        print_drivers(&manager)?;
        return Ok(());
    }

    let mut devices = Vec::new();
    for device in &config.devices {
        match acquire(&manager, &loader, device) {
            Ok(handle) => devices.push(handle),
            Err(e) => tracing::error!(
                device = %device.instance_path,
                error = %format!("{:#}", e),
                "Failed to acquire device"
            ),
        }
    }

    report(&manager, "Configured", &devices);

    let mut interrupted = false;
    if cli.detection_enabled(&config) {
        let filter = cli
            .filter
            .clone()
            .unwrap_or_else(|| config.detection.filter.clone());
        let worker = Arc::clone(&manager);
        let mut task = tokio::task::spawn_blocking(move || worker.detect(&filter));

        let mut found = None;
        tokio::select! {
            result = &mut task => {
                found = Some(result.context("Detection task failed")?);
            }
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
            }
        }

        if interrupted {
            tracing::info!("Interrupted during detection");
            manager.stop_detection();
            // Stopped detection still releases its candidates before returning
            found = Some(task.await.context("Detection task failed")?);
        }
        report(&manager, "Detected", found.as_deref().unwrap_or_default());
    }

    if !interrupted {
        tracing::info!("Running, press Ctrl-C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
    }

    let released = manager.release_all();
    tracing::info!(released, "Shut down");
    Ok(())
}

/// Store the device's settings and acquire it
fn acquire(
    manager: &DeviceManager,
    loader: &StaticPluginLoader,
    device: &DeviceConfig,
) -> anyhow::Result<DeviceHandle> {
    let config_path = if device.config_path.is_empty() {
        device.instance_path.as_str()
    } else {
        device.config_path.as_str()
    };

    if !device.settings.is_empty() {
        let mut stored = loader.store().load(config_path);
        stored.extend(device.settings.clone());
        loader
            .store()
            .save(config_path, &stored)
            .with_context(|| format!("Failed to store settings of {}", config_path))?;
    }

    let handle = manager
        .acquire_device(&device.instance_path, config_path)
        .with_context(|| format!("Failed to acquire {}", device.instance_path))?;
    Ok(handle)
}

fn report(manager: &DeviceManager, what: &str, devices: &[DeviceHandle]) {
    for device in devices {
        tracing::info!(
            device = %device.instance_path(),
            log_name = %manager.device_log_name(device).unwrap_or_default(),
            "{}",
            what
        );
    }
}

fn print_drivers(manager: &DeviceManager) -> anyhow::Result<()> {
    for path in manager.driver_list() {
        println!("{}", path);
        for parameter in manager.driver_parameters(&path) {
            let default = parameter
                .default
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?
                .unwrap_or_default();
            let kind = format!("{:?}", parameter.kind).to_lowercase();
            println!("  {:<24} {:<8} {}", parameter.name, kind, default);
        }
        let models = manager.driver_models(&path);
        if !models.is_empty() {
            println!("  models: {}", models.join(", "));
        }
    }
    Ok(())
}
