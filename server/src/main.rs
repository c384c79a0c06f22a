use anyhow::Result;
use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::info;

use server::{build_server, load_config, Args};

fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load_config(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_level.as_filter_str().into()),
        )
        .init();
    info!(?settings, "server config loaded");

    let mut server = build_server(settings, &args)?;
    signal_hook::flag::register(SIGINT, server.shutdown.shared())?;
    signal_hook::flag::register(SIGTERM, server.shutdown.shared())?;

    info!(port = server.settings.udp_port, "server listening");
    server.run();
    Ok(())
}
