extern crate tokio;

use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use miette::Result;
use std::time::Duration;
use tokio_graceful_shutdown::Toplevel;

use tracksentry_server::{Cli, Session};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let log_level = args.verbose.log_level_filter();
    env_logger::Builder::from_env(Env::default())
        .filter_level(log_level)
        .init();

    info!("TrackSentry {} loglevel {}", tracksentry_server::VERSION, log_level);
    if args.no_listen && args.replay.is_none() {
        warn!("No track input: neither listening nor replaying");
    }
    if args.no_save {
        warn!("Configuration changes will not be saved");
    }

    Toplevel::new(|s| async move {
        if let Err(e) = Session::new(&s, args).await {
            log::error!("Cannot start: {}", e);
            s.request_shutdown();
        }
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_millis(5000))
    .await
    .map_err(Into::into)
}
