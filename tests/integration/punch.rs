use crate::*;

use punch_core::wire::Keepalive;
use tokio::sync::mpsc;

// ══════════════════════════════════════════════════════════════════════════════
//  Full hole-punch sessions
// ══════════════════════════════════════════════════════════════════════════════

/// Two peers register, settle, resolve each other and exchange keepalives
/// directly. Both sessions reach Active and stop cleanly on shutdown.
#[tokio::test]
async fn test_two_peers_punch_and_exchange_keepalives() -> Result<()> {
    let broker = spawn_broker().await?;

    let a_socket = bind_peer().await?;
    let b_socket = bind_peer().await?;
    let a_addr = a_socket.local_addr()?;
    let b_addr = b_socket.local_addr()?;

    let mut a = new_session("peerA", "peerZ", broker.addr, a_socket);
    let mut b = new_session("peerZ", "peerA", broker.addr, b_socket);

    // Both register before either looks up: the settle delay covers the gap.
    let (a_remote, b_remote) = tokio::join!(a.establish(), b.establish());
    assert_eq!(a_remote?, b_addr);
    assert_eq!(b_remote?, a_addr);
    assert_eq!(a.state(), SessionState::Establishing);

    let (shutdown, _) = broadcast::channel(1);
    let (a_tx, mut a_rx) = mpsc::channel(64);
    let (b_tx, mut b_rx) = mpsc::channel(64);
    let mut a_state = a.subscribe();
    let mut b_state = b.subscribe();

    let a_handle = a.start(&shutdown, Some(a_tx))?;
    let b_handle = b.start(&shutdown, Some(b_tx))?;

    wait_for_state(&mut a_state, SessionState::Active, 5).await?;
    wait_for_state(&mut b_state, SessionState::Active, 5).await?;

    // Each side hears the other's name with increasing sequence numbers.
    let mut seen = Vec::new();
    while seen.len() < 3 {
        let inbound = tokio::time::timeout(Duration::from_secs(2), a_rx.recv())
            .await?
            .context("peerA inbound channel closed")?;
        assert_eq!(inbound.from, b_addr);
        let ka = Keepalive::decode(&inbound.payload)?;
        assert_eq!(ka.name, "peerZ");
        seen.push(ka.seq);
    }
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "sequence not increasing: {seen:?}");

    let inbound = tokio::time::timeout(Duration::from_secs(2), b_rx.recv())
        .await?
        .context("peerZ inbound channel closed")?;
    assert_eq!(Keepalive::decode(&inbound.payload)?.name, "peerA");

    shutdown.send(())?;
    let a_ticks = tokio::time::timeout(Duration::from_secs(2), a_handle.join()).await??;
    let b_ticks = tokio::time::timeout(Duration::from_secs(2), b_handle.join()).await??;
    assert!(a_ticks >= 1 && b_ticks >= 3);
    assert_eq!(a.next_seq(), a_ticks);
    Ok(())
}

/// The broker is only needed until the lookup: once both sessions are
/// established, stopping it does not interrupt the direct flow.
#[tokio::test]
async fn test_keepalives_continue_without_broker() -> Result<()> {
    let broker = spawn_broker().await?;
    let a_socket = bind_peer().await?;
    let b_socket = bind_peer().await?;

    let mut a = new_session("left", "right", broker.addr, a_socket);
    let mut b = new_session("right", "left", broker.addr, b_socket);
    let (ra, rb) = tokio::join!(a.establish(), b.establish());
    ra?;
    rb?;

    broker.shutdown.send(())?;
    tokio::time::timeout(Duration::from_secs(2), broker.task).await???;

    let (shutdown, _) = broadcast::channel(1);
    let (tx, mut rx) = mpsc::channel(64);
    let mut a_state = a.subscribe();
    let a_handle = a.start(&shutdown, Some(tx))?;
    let b_handle = b.start(&shutdown, None)?;

    wait_for_state(&mut a_state, SessionState::Active, 5).await?;
    let inbound = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await?
        .context("inbound channel closed")?;
    assert_eq!(Keepalive::decode(&inbound.payload)?.name, "right");

    shutdown.send(())?;
    a_handle.join().await?;
    b_handle.join().await?;
    Ok(())
}
