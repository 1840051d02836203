use crate::*;

use punch_services::{RpcError, SetupError};

// ══════════════════════════════════════════════════════════════════════════════
//  Failure paths
// ══════════════════════════════════════════════════════════════════════════════

/// A broker that never answers exhausts the retry budget and fails the
/// registration step, which maps to exit status 2.
#[tokio::test]
async fn test_silent_broker_fails_registration() -> Result<()> {
    let silent = bind_peer().await?;
    let mut session = new_session("peerA", "peerZ", silent.local_addr()?, bind_peer().await?);

    let err = session.establish().await.unwrap_err();
    assert!(
        matches!(err.rpc(), RpcError::Timeout { attempts: 3, .. }),
        "unexpected error: {err}"
    );
    assert_eq!(session.state(), SessionState::Init);
    assert_eq!(SetupError::from(err).exit_code(), 2);

    // Every attempt reached the broker's socket.
    let mut buf = vec![0u8; MAX_DATAGRAM];
    for _ in 0..3 {
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), silent.recv_from(&mut buf)).await??;
        assert!(buf[..len].starts_with(b"REG peerA "));
    }
    Ok(())
}

/// The partner never registers: registration succeeds, the lookup fails
/// with NF and the failure maps to exit status 5.
#[tokio::test]
async fn test_absent_partner_fails_lookup() -> Result<()> {
    let broker = spawn_broker().await?;
    let mut session = new_session("peerA", "peerZ", broker.addr, bind_peer().await?);

    let err = session.establish().await.unwrap_err();
    assert!(matches!(err.rpc(), RpcError::NotFound), "unexpected error: {err}");
    assert_eq!(session.state(), SessionState::Resolving);
    assert!(broker.registry.lookup("peerA").is_some());
    assert_eq!(SetupError::from(err).exit_code(), 5);
    Ok(())
}

/// Malformed datagrams are answered with NG one by one and the broker
/// keeps serving well-formed requests afterwards.
#[tokio::test]
async fn test_broker_survives_garbage() -> Result<()> {
    let broker = spawn_broker().await?;
    let client = bind_peer().await?;

    let garbage: [&[u8]; 5] = [b"", b"\xff\xfe\xfd", b"REG", b"REG lonely", b"GET"];
    for datagram in garbage {
        let reply = exchange(&client, broker.addr, datagram).await?;
        assert_eq!(reply, "NG", "datagram {datagram:?}");
    }
    assert!(broker.registry.is_empty());

    let reply = exchange(&client, broker.addr, b"REG dave 1.2.3.4:5\n").await?;
    assert_eq!(reply, format!("OK {}", client.local_addr()?));
    assert_eq!(exchange(&client, broker.addr, b"GET dave").await?, reply);
    assert!(!broker.task.is_finished());
    Ok(())
}

/// The shutdown broadcast ends the broker loop cleanly.
#[tokio::test]
async fn test_broker_stops_on_shutdown() -> Result<()> {
    let broker = spawn_broker().await?;
    let client = bind_peer().await?;
    exchange(&client, broker.addr, b"GET warmup").await?;

    broker.shutdown.send(())?;
    tokio::time::timeout(Duration::from_secs(2), broker.task)
        .await
        .context("broker did not stop")???;
    Ok(())
}

/// Starting the keepalive duties before the partner is known is refused.
#[tokio::test]
async fn test_start_requires_established_session() -> Result<()> {
    let broker = spawn_broker().await?;
    let session = new_session("peerA", "peerZ", broker.addr, bind_peer().await?);
    let (shutdown, _) = broadcast::channel(1);

    assert!(session.start(&shutdown, None).is_err());
    Ok(())
}
