use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

pub struct Metric {
    pub name: &'static str,
    description: &'static str,
}

pub const COUNTERS: [Metric; 2] = [NAMING_CHANGES_TOTAL, CLIENT_ACKS_TOTAL];
pub const GAUGES: [Metric; 2] = [CONNECTED_CLIENTS, NAMING_SERVICES];

// NAMING Metrics --------------------------

pub const NAMING_CHANGES_TOTAL: Metric = Metric {
    name: "meridian_naming_changes_total",
    description: "Total service changes emitted by the naming registry",
};

pub const NAMING_SERVICES: Metric = Metric {
    name: "meridian_naming_services",
    description: "Number of services with at least one registered instance",
};

// CONNECTION Metrics --------------------------

pub const CONNECTED_CLIENTS: Metric = Metric {
    name: "meridian_connected_clients",
    description: "Number of connected client sessions",
};

pub const CLIENT_ACKS_TOTAL: Metric = Metric {
    name: "meridian_client_acks_total",
    description: "Total push acknowledgements received from clients",
};

pub fn init_metrics(prom_addr: Option<std::net::SocketAddr>, cluster_name: &str) -> Result<()> {
    info!("initializing metrics exporter");

    if let Some(addr) = prom_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .add_global_label("cluster", cluster_name.to_string())
            .install()
            .context("failed to install Prometheus recorder")?;
    }

    for name in COUNTERS {
        register_counter(name)
    }

    for name in GAUGES {
        register_gauge(name)
    }

    meridian_push::push_metrics::register_metrics();
    Ok(())
}

/// Registers a counter with the given name.
fn register_counter(metric: Metric) {
    metrics::describe_counter!(metric.name, metric.description);
    let _counter = metrics::counter!(metric.name);
}

/// Registers a gauge with the given name.
fn register_gauge(metric: Metric) {
    metrics::describe_gauge!(metric.name, metric.description);
    let _gauge = metrics::gauge!(metric.name);
}
