use anyhow::{Context, Result};
use meridian_push::PushConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// configuration settings loaded from the config file
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadConfiguration {
    /// Meridian cluster name
    pub cluster_name: String,
    /// Server configuration
    pub server: ServerConfig,
    /// Fuzzy watch push engine tuning
    #[serde(default)]
    pub push: PushConfig,
    /// Services registered on boot
    #[serde(default)]
    pub bootstrap_services: Vec<BootstrapService>,
}

/// configuration settings for the Meridian push server
#[derive(Debug)]
pub struct ServiceConfiguration {
    /// Meridian cluster name
    pub cluster_name: String,
    /// Prometheus exporter address
    pub prom_exporter: Option<SocketAddr>,
    /// Capacity of each client's outbound push channel
    pub client_channel_capacity: usize,
    /// Fuzzy watch push engine tuning
    pub push: PushConfig,
    /// Services registered on boot
    pub bootstrap_services: Vec<BootstrapService>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname or IP address for the server listeners
    pub host: String,
    /// Prometheus metrics exporter port (optional)
    pub prometheus_port: Option<u16>,
    /// Capacity of each client's outbound push channel
    #[serde(default = "default_client_channel_capacity")]
    pub client_channel_capacity: usize,
}

fn default_client_channel_capacity() -> usize {
    256
}

/// One service instance registered on boot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapService {
    pub namespace: String,
    pub group: String,
    pub name: String,
    pub instance: String,
}

/// Implementing the TryFrom trait to transform LoadConfiguration into ServiceConfiguration
impl TryFrom<LoadConfiguration> for ServiceConfiguration {
    type Error = anyhow::Error;

    fn try_from(config: LoadConfiguration) -> Result<Self> {
        let prom_exporter: Option<SocketAddr> = match config.server.prometheus_port {
            Some(port) => Some(
                format!("{}:{}", config.server.host, port)
                    .parse()
                    .context("Failed to create prom_exporter")?,
            ),
            None => None,
        };

        if config.server.client_channel_capacity == 0 {
            anyhow::bail!("server.client_channel_capacity must be greater than 0");
        }

        config
            .push
            .validate()
            .context("Invalid push configuration")?;

        Ok(ServiceConfiguration {
            cluster_name: config.cluster_name,
            prom_exporter,
            client_channel_capacity: config.server.client_channel_capacity,
            push: config.push,
            bootstrap_services: config.bootstrap_services,
        })
    }
}
