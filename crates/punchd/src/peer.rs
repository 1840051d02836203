//! `punchd peer` — register, resolve the partner, and keep the hole open.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use punch_core::config::PeerConfig;
use punch_services::{setup, HolePunchSession, SessionConfig, SetupError};

pub async fn run(config: &PeerConfig, shutdown: broadcast::Sender<()>) -> Result<()> {
    config.validate().map_err(SetupError::from)?;

    let bind_addr = setup::resolve("local", &config.bind, None).await?;
    let broker = setup::resolve("broker", &config.broker, Some(bind_addr)).await?;
    let socket = Arc::new(setup::bind(bind_addr).await?);

    let mut session = HolePunchSession::new(
        SessionConfig {
            local_name: config.local_name.clone(),
            remote_name: config.remote_name.clone(),
            broker,
            settle_delay: config.settle_delay(),
            keepalive_interval: config.keepalive_interval(),
            rpc_timeout: config.rpc_timeout(),
            rpc_attempts: config.rpc_attempts,
        },
        socket,
    );

    let mut shutdown_rx = shutdown.subscribe();
    tokio::select! {
        result = session.establish() => {
            result.map_err(SetupError::from)?;
        }
        _ = shutdown_rx.recv() => {
            tracing::info!("shutdown before the session was established");
            return Ok(());
        }
    }

    let handle = session.start(&shutdown, None)?;
    let ticks = handle.join().await?;
    tracing::info!(ticks, state = %session.state(), "peer session ended");
    Ok(())
}
