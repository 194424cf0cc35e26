use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "meridian-server")]
#[command(about = "Service discovery push server with fuzzy watch notifications")]
#[command(version)]
pub(crate) struct Args {
    /// Path to the YAML config file
    #[arg(long)]
    pub(crate) config_file: String,

    /// Prometheus exporter http address, overrides the config file
    #[arg(long)]
    pub(crate) prom_exporter: Option<String>,

    /// Period of the fuzzy watch resync in milliseconds, overrides the config file
    #[arg(long)]
    pub(crate) resync_interval_ms: Option<u64>,
}
