mod args_parse;

use std::{fs::read_to_string, net::SocketAddr, path::Path};

use anyhow::{Context, Result};
use clap::Parser;
use meridian_core::ServiceKey;
use meridian_server::{
    server_metrics::init_metrics, Instance, LoadConfiguration, PushService, ServiceConfiguration,
};
use tracing::{info, warn};

use crate::args_parse::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args = Args::parse();

    // Load the configuration from the specified YAML file
    let config_content = read_to_string(Path::new(&args.config_file))
        .with_context(|| format!("Failed to read config file: {}", args.config_file))?;
    let load_config: LoadConfiguration = serde_yaml::from_str(&config_content)?;

    // Attempt to transform LoadConfiguration into ServiceConfiguration
    let mut service_config: ServiceConfiguration = load_config.try_into()?;

    // If `prom_exporter` is provided via command-line args, override the value from the config file
    if let Some(prom_exporter) = args.prom_exporter {
        let prom_address: SocketAddr = prom_exporter.parse().context(format!(
            "Failed to parse into Socket address: {}",
            prom_exporter
        ))?;
        service_config.prom_exporter = Some(prom_address);
    }

    if let Some(resync_interval_ms) = args.resync_interval_ms {
        service_config.push.resync_interval_ms = resync_interval_ms;
    }

    // Init metrics with or without prometheus exporter
    init_metrics(service_config.prom_exporter, &service_config.cluster_name)?;

    let push_service = PushService::new(&service_config)?;

    for bootstrap in &service_config.bootstrap_services {
        let service_key = ServiceKey::new(
            bootstrap.namespace.as_str(),
            bootstrap.group.as_str(),
            bootstrap.name.as_str(),
        );
        if push_service
            .register_instance(&service_key, Instance::new(bootstrap.instance.as_str()))
            .is_none()
        {
            warn!(service_key = %service_key, instance = %bootstrap.instance, "duplicate bootstrap instance");
        }
    }

    push_service.start();
    info!(
        cluster_name = %service_config.cluster_name,
        services = push_service.naming().service_keys().len(),
        "Meridian push server is ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;

    info!("shutdown signal received");
    push_service.shutdown().await;
    Ok(())
}
