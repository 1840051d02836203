//! `punchd broker` — serve the rendezvous registry.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;

use punch_core::config::BrokerConfig;
use punch_services::{expiry_loop, setup, Broker, Registry};

/// Bind and serve until shutdown. Only resolve and bind failures are errors.
pub async fn run(config: &BrokerConfig, shutdown: broadcast::Sender<()>) -> Result<()> {
    let bind_addr = setup::resolve("broker bind", &config.bind, None).await?;
    let socket = Arc::new(setup::bind(bind_addr).await?);

    let registry = Registry::with_ttl(config.registration_ttl());
    match registry.ttl() {
        Some(ttl) => tracing::info!(?ttl, "registrations expire"),
        None => tracing::info!("registrations never expire"),
    }

    let service_task = tokio::spawn(Broker::new(socket, registry.clone(), shutdown.subscribe()).run());
    let expiry_task = tokio::spawn(expiry_loop(registry, shutdown.subscribe()));

    let (service, expiry) = tokio::join!(service_task, expiry_task);
    if let Err(e) = service.map_err(anyhow::Error::from).and_then(|r| r) {
        tracing::error!(error = %e, "broker service exited");
    }
    if let Err(e) = expiry.map_err(anyhow::Error::from).and_then(|r| r) {
        tracing::error!(error = %e, "expiry task exited");
    }

    Ok(())
}
