use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use ofp_firewall::logging::init_logging;
use ofp_firewall::ofp_controller::handle_client_connected;

mod cli;

fn main() -> anyhow::Result<()> {
    let config = cli::Cli::parse().into_config();
    init_logging(config.log_level, config.log_format).context("failed to initialize logging")?;

    let listener = TcpListener::bind(config.listen)
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!(
        addr = %config.listen,
        rules = %config.session.rules_path.display(),
        mode = ?config.session.mode,
        "controller listening"
    );

    let session = Arc::new(config.session);
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let session = Arc::clone(&session);
                thread::spawn(move || {
                    if let Err(e) = handle_client_connected(stream, &session) {
                        warn!(error = %e, "switch connection closed with error");
                    }
                });
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }
    Ok(())
}
