//! Message-oriented channel glue.
//!
//! The engine never opens sockets itself: it hands [`Envelope`]s to an
//! outbound queue and consumes framed messages from an inbox. Whatever sits
//! between (a relay server, a mesh, the in-memory [`Switchboard`] below)
//! must deliver each sender's messages to a given receiver in send order.
//! No acknowledgment, flow control, or loss detection exists at this layer.
//!
//! The switchboard doubles as the discovery hub for tests and demos: it
//! assigns peer ids at attach time and broadcasts full roster snapshots on
//! every join and leave, which is exactly the collaborator contract the
//! engine expects.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::peer::{Peer, PeerId, Roster};
use crate::protocol::{AssignIdPayload, Message, PresencePayload};

/// Depth of each peer's outbound queue; sends past this suspend the sender.
pub const SEND_QUEUE_DEPTH: usize = 8;

/// Where an outbound message should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// One specific peer
    Peer(PeerId),
    /// Every attached peer, the sender included
    All,
}

/// An addressed outbound message.
#[derive(Debug)]
pub struct Envelope {
    /// Destination
    pub to: Recipient,
    /// The message itself
    pub message: Message,
}

impl Envelope {
    /// Address a message to one peer.
    #[must_use]
    pub fn to_peer(peer: PeerId, message: Message) -> Self {
        Self {
            to: Recipient::Peer(peer),
            message,
        }
    }

    /// Address a message to the whole group, the sender included.
    #[must_use]
    pub fn broadcast(message: Message) -> Self {
        Self {
            to: Recipient::All,
            message,
        }
    }
}

/// A peer's connection to the switchboard.
#[derive(Debug)]
pub struct PeerLink {
    /// The id the hub assigned to this peer
    pub peer_id: PeerId,
    /// Outbound queue toward the group
    pub outbound: mpsc::Sender<Envelope>,
    /// Framed messages addressed to this peer, in per-sender order
    pub inbox: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[derive(Debug, Default)]
struct SwitchInner {
    roster: Roster,
    inboxes: HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>,
}

impl SwitchInner {
    /// Encode once, fan out per the recipient. Undeliverable frames are
    /// dropped with a log line, like any lossy transport would.
    fn deliver(&self, from: Option<PeerId>, envelope: &Envelope) {
        let frame = match envelope.message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping unencodable message");
                return;
            }
        };

        match envelope.to {
            Recipient::Peer(id) => {
                if let Some(inbox) = self.inboxes.get(&id) {
                    if inbox.send(frame).is_err() {
                        debug!(peer = %id, "inbox gone, frame dropped");
                    }
                } else {
                    debug!(peer = %id, ?from, "no such peer, frame dropped");
                }
            }
            Recipient::All => {
                for (id, inbox) in &self.inboxes {
                    if inbox.send(frame.clone()).is_err() {
                        debug!(peer = %id, "inbox gone, frame dropped");
                    }
                }
            }
        }
    }
}

/// In-memory hub + channel: assigns ids, tracks the roster, and routes
/// frames between attached peers preserving per-pair send order.
#[derive(Debug, Clone, Default)]
pub struct Switchboard {
    inner: Arc<Mutex<SwitchInner>>,
}

impl Switchboard {
    /// Create an empty switchboard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a peer: assign it an id, deliver `assign-id`, and broadcast a
    /// `peer-joined` roster snapshot to everyone.
    pub async fn attach(&self, display_name: &str) -> PeerLink {
        let peer_id = PeerId::generate();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(SEND_QUEUE_DEPTH);

        {
            let mut inner = self.inner.lock().await;
            inner.inboxes.insert(peer_id, inbox_tx);
            inner
                .roster
                .peers
                .push(Peer::new(peer_id, display_name));

            inner.deliver(
                None,
                &Envelope::to_peer(peer_id, Message::AssignId(AssignIdPayload { peer_id })),
            );
            inner.deliver(
                None,
                &Envelope::broadcast(Message::PeerJoined(PresencePayload {
                    roster: inner.roster.clone(),
                    peer_name: Some(display_name.to_string()),
                })),
            );
        }

        // One router task per peer keeps that peer's sends sequential, which
        // is what preserves per-pair ordering.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                let inner = inner.lock().await;
                inner.deliver(Some(peer_id), &envelope);
            }
            debug!(peer = %peer_id, "router task finished");
        });

        PeerLink {
            peer_id,
            outbound: outbound_tx,
            inbox: inbox_rx,
        }
    }

    /// Detach a peer and broadcast a `peer-left` roster snapshot.
    pub async fn detach(&self, peer_id: PeerId) {
        let mut inner = self.inner.lock().await;
        inner.inboxes.remove(&peer_id);

        let left_name = inner
            .roster
            .peers
            .iter()
            .find(|p| p.id == peer_id)
            .map(|p| p.display_name.clone());
        inner.roster.peers.retain(|p| p.id != peer_id);

        inner.deliver(
            None,
            &Envelope::broadcast(Message::PeerLeft(PresencePayload {
                roster: inner.roster.clone(),
                peer_name: left_name,
            })),
        );
    }

    /// Current roster snapshot.
    pub async fn roster(&self) -> Roster {
        self.inner.lock().await.roster.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_message(link: &mut PeerLink) -> Message {
        let frame = link.inbox.recv().await.expect("frame");
        Message::decode(&frame).expect("decode")
    }

    #[tokio::test]
    async fn test_attach_assigns_id_then_roster() {
        let switchboard = Switchboard::new();
        let mut link = switchboard.attach("ada").await;

        match next_message(&mut link).await {
            Message::AssignId(payload) => assert_eq!(payload.peer_id, link.peer_id),
            other => panic!("expected assign-id first, got {other:?}"),
        }

        match next_message(&mut link).await {
            Message::PeerJoined(payload) => {
                assert_eq!(payload.roster.len(), 1);
                assert_eq!(payload.peer_name.as_deref(), Some("ada"));
            }
            other => panic!("expected peer-joined, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_and_leave_replace_roster() {
        let switchboard = Switchboard::new();
        let mut ada = switchboard.attach("ada").await;
        let brin = switchboard.attach("brin").await;

        // drain ada's assign-id + own join
        next_message(&mut ada).await;
        next_message(&mut ada).await;

        match next_message(&mut ada).await {
            Message::PeerJoined(payload) => {
                assert_eq!(payload.roster.len(), 2);
                assert_eq!(payload.peer_name.as_deref(), Some("brin"));
            }
            other => panic!("expected peer-joined, got {other:?}"),
        }

        switchboard.detach(brin.peer_id).await;
        match next_message(&mut ada).await {
            Message::PeerLeft(payload) => {
                assert_eq!(payload.roster.len(), 1);
                assert_eq!(payload.peer_name.as_deref(), Some("brin"));
            }
            other => panic!("expected peer-left, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_per_pair_order_preserved() {
        let switchboard = Switchboard::new();
        let ada = switchboard.attach("ada").await;
        let mut brin = switchboard.attach("brin").await;

        // drain brin's presence traffic
        next_message(&mut brin).await;
        next_message(&mut brin).await;

        for offset in [0u64, 5, 10, 15] {
            let chunk = crate::protocol::ChunkPayload::new(
                crate::artifact::ArtifactId::generate(),
                brin.peer_id,
                offset,
                vec![0u8; 5],
            );
            ada.outbound
                .send(Envelope::to_peer(brin.peer_id, Message::Chunk(chunk)))
                .await
                .expect("send");
        }

        for expected in [0u64, 5, 10, 15] {
            match next_message(&mut brin).await {
                Message::Chunk(chunk) => assert_eq!(chunk.offset, expected),
                other => panic!("expected chunk, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_loops_back_to_sender() {
        let switchboard = Switchboard::new();
        let mut ada = switchboard.attach("ada").await;

        next_message(&mut ada).await; // assign-id
        next_message(&mut ada).await; // own join

        ada.outbound
            .send(Envelope::broadcast(Message::RenameArtifact(
                crate::protocol::RenamePayload {
                    artifact_id: crate::artifact::ArtifactId::generate(),
                    new_name: "renamed".to_string(),
                },
            )))
            .await
            .expect("send");

        match next_message(&mut ada).await {
            Message::RenameArtifact(payload) => assert_eq!(payload.new_name, "renamed"),
            other => panic!("expected loopback rename, got {other:?}"),
        }
    }
}
