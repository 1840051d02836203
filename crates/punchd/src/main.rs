//! punchd — UDP hole-punching rendezvous broker and peer.
//!
//! Usage:
//!   punchd broker
//!   punchd peer [<local-name> <remote-name> <broker-host:port>]
//!
//! Settings come from the config file and PUNCH_* environment variables;
//! positional peer arguments override both.

use std::process::ExitCode;

use punch_core::config::PunchConfig;
use punch_services::SetupError;

mod broker;
mod peer;

const USAGE: &str = "usage: punchd broker | punchd peer [<local-name> <remote-name> <broker-host:port>]";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load config
    if let Err(e) = PunchConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = match PunchConfig::load() {
        Ok(c) => c,
        Err(e) => return fail(SetupError::from(e).into()),
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let role = args.first().map(String::as_str).unwrap_or("peer");
    let rest = args.get(1..).unwrap_or(&[]);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let result = match (role, rest) {
        ("broker", []) => {
            tracing::info!(bind = %config.broker.bind, "punchd broker starting");
            broker::run(&config.broker, shutdown_tx).await
        }
        ("peer", rest) if rest.is_empty() || rest.len() == 3 => {
            if let [local, remote, broker_addr] = rest {
                config.peer.local_name = local.clone();
                config.peer.remote_name = remote.clone();
                config.peer.broker = broker_addr.clone();
            }
            tracing::info!(
                local = %config.peer.local_name,
                remote = %config.peer.remote_name,
                broker = %config.peer.broker,
                bind = %config.peer.bind,
                "punchd peer starting"
            );
            peer::run(&config.peer, shutdown_tx).await
        }
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(1);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(e),
    }
}

/// Log a fatal error and map it to its category's exit status.
fn fail(e: anyhow::Error) -> ExitCode {
    tracing::error!(error = %e, "fatal");
    let code = e.downcast_ref::<SetupError>().map_or(1, SetupError::exit_code);
    ExitCode::from(code)
}
