use std::io::Result;
use std::sync::Arc;

use clap::Parser;
use env_logger::Builder;
use log::{info, LevelFilter};

use fluxguard_rs::{config, Supervisor};

#[derive(Parser)]
#[clap(name = "fluxguardd", version, about = "NetFlow/BMP telemetry and FlowSpec control plane")]
struct Args {
    /// Path to the fluxguardd server config (TOML)
    #[clap(short = 'c', long = "config")]
    config: String,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[clap(short = 'v', parse(from_occurrences))]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (crate_level, other_level) = match args.verbosity {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("fluxguard_rs"), crate_level)
        .filter(None, other_level)
        .init();
    info!("logging at levels {}/{}", crate_level, other_level);

    let server_config = config::from_file(&args.config)?;
    info!(
        "loaded config: netflow {}:{}, bmp {}:{}, monitoring api port {}",
        server_config.netflow_bind,
        server_config.netflow_port,
        server_config.bmp_bind,
        server_config.bmp_port,
        server_config.monitoring_api_port,
    );

    let supervisor = Arc::new(Supervisor::new(server_config));
    supervisor.run().await
}
