mod collector;
mod config;
mod discovery;
mod metrics;
mod model;
mod publisher;
mod server;
mod snapshot;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use structopt::StructOpt;

use collector::{Collector, CollectorWorker};
use config::{Config, Overrides};
use discovery::remote::HttpDiscovery;
use metrics::Metrics;
use server::MetricsState;

#[macro_use]
extern crate lazy_static;

/// Aggregates remote service discovery endpoints into file based service
/// discovery snapshots.
#[derive(StructOpt, Debug)]
#[structopt(name = "sd-aggregator")]
pub struct Command {
    /// YAML file listing the discovery endpoints
    #[structopt(short, long, env = "DISCOVERY_CONFIG", parse(from_os_str))]
    pub config: PathBuf,

    /// Seconds to wait between collection cycles
    #[structopt(long, env = "INTERVAL")]
    pub interval: Option<u64>,

    /// Directory the snapshots are published to
    #[structopt(long, env = "OUTPUT_DIR", parse(from_os_str))]
    pub output_dir: Option<PathBuf>,

    /// Directory snapshots are staged in before publishing, must share a
    /// filesystem with the output dir
    #[structopt(long, env = "STAGING_DIR", parse(from_os_str))]
    pub staging_dir: Option<PathBuf>,

    #[structopt(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    #[structopt(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: tracing::Level,
}

impl Command {
    fn overrides(&self) -> Overrides {
        Overrides {
            interval: self.interval,
            output_dir: self.output_dir.clone(),
            staging_dir: self.staging_dir.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // parse the command line args
    let opt: Command = Command::from_args();

    // a builder for `FmtSubscriber`.
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(opt.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Arc::new(Config::load(&opt.config, &opt.overrides())?);
    config.create_dirs().await?;
    tracing::info!(
        "loaded {} discovery sources, publishing to {} every {}s",
        config.discovery.len(),
        config.output_dir.display(),
        config.interval.as_secs()
    );

    let metrics = Arc::new(Metrics::new()?);
    let collector = Collector::new(config.clone(), HttpDiscovery::new()?, metrics.clone());
    let _worker = CollectorWorker::spawn(collector);

    server::serve(opt.listen, MetricsState::new(metrics, config.discovery.len())).await?;

    Ok(())
}
