//! Common test utilities for `Peerbay` integration tests.
//!
//! This module provides shared functionality for integration tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use peerbay_core::artifact::{ArtifactBlob, ArtifactId};
use peerbay_core::channel::Switchboard;
use peerbay_core::config::TransferConfig;
use peerbay_core::node::{NodeEvent, PeerNode};
use peerbay_core::peer::PeerId;

/// How long any single wait may take before the test fails.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A peer wired to the switchboard with its dispatch loop running.
pub struct TestPeer {
    /// The node under test
    pub node: Arc<PeerNode>,
    /// Its engine event stream
    pub events: mpsc::UnboundedReceiver<NodeEvent>,
    /// The id the hub assigned
    pub peer_id: PeerId,
}

/// Install a test-friendly tracing subscriber once per binary.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Attach a node to the switchboard, spawn its dispatch loop, and wait for
/// the hub to assign its identity.
pub async fn spawn_peer(switchboard: &Switchboard, name: &str, config: TransferConfig) -> TestPeer {
    init_tracing();
    let link = switchboard.attach(name).await;
    let peer_id = link.peer_id;

    let (node, mut events) =
        PeerNode::new(name, link.outbound, config).expect("node construction");
    tokio::spawn(Arc::clone(&node).run(link.inbox));

    wait_for(&mut events, |event| {
        matches!(event, NodeEvent::IdentityAssigned(peer) if peer.id == peer_id)
    })
    .await;

    TestPeer {
        node,
        events,
        peer_id,
    }
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Drain events until one matches the predicate, or fail after the timeout.
pub async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<NodeEvent>, mut predicate: F)
where
    F: FnMut(&NodeEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if predicate(&event) {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for event");
}

/// Drain events until an `ArtifactReady` for the given artifact arrives.
pub async fn wait_for_ready(
    events: &mut mpsc::UnboundedReceiver<NodeEvent>,
    artifact_id: ArtifactId,
) -> ArtifactBlob {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await.expect("event stream closed") {
                NodeEvent::ArtifactReady {
                    artifact_id: ready_id,
                    blob,
                } if ready_id == artifact_id => return blob,
                _ => {}
            }
        }
    })
    .await
    .expect("timed out waiting for artifact")
}

/// Assert that no `ArtifactReady` for the artifact arrives within `window`.
pub async fn assert_never_ready(
    events: &mut mpsc::UnboundedReceiver<NodeEvent>,
    artifact_id: ArtifactId,
    window: Duration,
) {
    let readied = tokio::time::timeout(window, async {
        loop {
            match events.recv().await {
                Some(NodeEvent::ArtifactReady {
                    artifact_id: ready_id,
                    ..
                }) if ready_id == artifact_id => return true,
                Some(_) => {}
                None => return false,
            }
        }
    })
    .await;

    assert!(
        !matches!(readied, Ok(true)),
        "artifact unexpectedly completed"
    );
}
