//! Metadata mirror and presence scenarios.

mod common;

use peerbay_core::artifact::ArtifactDraft;
use peerbay_core::channel::Switchboard;
use peerbay_core::config::TransferConfig;
use peerbay_core::node::NodeEvent;
use peerbay_core::peer::{Peer, PeerId};
use peerbay_core::protocol::{Message, RenamePayload};
use peerbay_core::registry::MetadataField;
use tokio::sync::mpsc;

use common::{spawn_peer, wait_for};

async fn shared_artifact(
    seeder: &common::TestPeer,
    mirror: &mut common::TestPeer,
) -> peerbay_core::artifact::ArtifactId {
    let draft = ArtifactDraft::new("report.pdf", "x", "quarterly numbers", vec![1u8; 64]);
    let artifact_id = seeder.node.share(draft).await.expect("share");

    wait_for(&mut mirror.events, |event| {
        matches!(event, NodeEvent::ArtifactAdvertised(id) if *id == artifact_id)
    })
    .await;
    artifact_id
}

#[tokio::test]
async fn test_rename_propagates_to_all_peers() {
    let switchboard = Switchboard::new();
    let mut ada = spawn_peer(&switchboard, "ada", TransferConfig::default()).await;
    let mut brin = spawn_peer(&switchboard, "brin", TransferConfig::default()).await;

    let artifact_id = shared_artifact(&ada, &mut brin).await;

    // any peer may edit, not just the owner
    brin.node.rename(artifact_id, "y").await.expect("rename");

    for peer in [&mut ada, &mut brin] {
        wait_for(&mut peer.events, |event| {
            matches!(
                event,
                NodeEvent::MetadataChanged { artifact_id: id, field: MetadataField::DisplayName }
                    if *id == artifact_id
            )
        })
        .await;

        let records = peer.node.artifacts().await;
        let record = records
            .iter()
            .find(|r| r.artifact_id == artifact_id)
            .expect("record");
        assert_eq!(record.display_name, "y");
        // the fixed fields are untouched
        assert_eq!(record.original_name, "report.pdf");
        assert_eq!(record.byte_size, 64);
    }
}

#[tokio::test]
async fn test_redescribe_propagates() {
    let switchboard = Switchboard::new();
    let ada = spawn_peer(&switchboard, "ada", TransferConfig::default()).await;
    let mut brin = spawn_peer(&switchboard, "brin", TransferConfig::default()).await;

    let artifact_id = shared_artifact(&ada, &mut brin).await;

    ada.node
        .redescribe(artifact_id, "final numbers")
        .await
        .expect("redescribe");

    wait_for(&mut brin.events, |event| {
        matches!(
            event,
            NodeEvent::MetadataChanged { artifact_id: id, field: MetadataField::Description }
                if *id == artifact_id
        )
    })
    .await;

    let records = brin.node.artifacts().await;
    assert_eq!(
        records
            .iter()
            .find(|r| r.artifact_id == artifact_id)
            .expect("record")
            .description,
        "final numbers"
    );
}

#[tokio::test]
async fn test_last_write_wins_in_both_orders() {
    // Drive one node directly so arrival order is exact. Edits apply
    // unconditionally: the later arrival wins even when it is the older
    // edit. Documented behavior, not a bug.
    let (outbound, _outbound_rx) = mpsc::channel(8);
    let (node, _events) =
        peerbay_core::node::PeerNode::new("brin", outbound, TransferConfig::default())
            .expect("node");

    let owner = Peer::new(PeerId::generate(), "ada");
    let (record, _) = ArtifactDraft::new("a.txt", "x", "d", vec![1u8])
        .finish(&owner)
        .expect("finish");
    let artifact_id = record.artifact_id;
    node.handle_message(Message::AdvertiseArtifact(record))
        .await
        .expect("advertise");

    // forward order: y then z leaves z
    for name in ["y", "z"] {
        node.handle_message(Message::RenameArtifact(RenamePayload {
            artifact_id,
            new_name: name.to_string(),
        }))
        .await
        .expect("rename");
    }
    assert_eq!(node.artifacts().await[0].display_name, "z");

    // reverse network order: z then y leaves y
    for name in ["z", "y"] {
        node.handle_message(Message::RenameArtifact(RenamePayload {
            artifact_id,
            new_name: name.to_string(),
        }))
        .await
        .expect("rename");
    }
    assert_eq!(node.artifacts().await[0].display_name, "y");
}

#[tokio::test]
async fn test_edit_for_unknown_artifact_is_logged_not_fatal() {
    let (outbound, _outbound_rx) = mpsc::channel(8);
    let (node, _events) =
        peerbay_core::node::PeerNode::new("brin", outbound, TransferConfig::default())
            .expect("node");

    // the dispatch loop survives edits that race ahead of their advertise
    let result = node
        .handle_message(Message::RenameArtifact(RenamePayload {
            artifact_id: peerbay_core::artifact::ArtifactId::generate(),
            new_name: "orphan".to_string(),
        }))
        .await;
    assert!(result.is_err());
    assert!(node.artifacts().await.is_empty());
}

#[tokio::test]
async fn test_roster_replaced_on_join_and_leave() {
    let switchboard = Switchboard::new();
    let mut ada = spawn_peer(&switchboard, "ada", TransferConfig::default()).await;

    assert_eq!(ada.node.roster().await.len(), 1);

    let brin = spawn_peer(&switchboard, "brin", TransferConfig::default()).await;
    wait_for(&mut ada.events, |event| {
        matches!(
            event,
            NodeEvent::RosterUpdated { joined: Some(name), .. } if name == "brin"
        )
    })
    .await;
    assert_eq!(ada.node.roster().await.len(), 2);

    switchboard.detach(brin.peer_id).await;
    wait_for(&mut ada.events, |event| {
        matches!(
            event,
            NodeEvent::RosterUpdated { left: Some(name), .. } if name == "brin"
        )
    })
    .await;

    let roster = ada.node.roster().await;
    assert_eq!(roster.len(), 1);
    assert_eq!(roster.peers[0].display_name, "ada");
    assert!(roster.display_name(brin.peer_id).is_none());
}

#[tokio::test]
async fn test_display_names_stay_fixed_for_session() {
    let switchboard = Switchboard::new();
    let ada = spawn_peer(&switchboard, "ada", TransferConfig::default()).await;

    let me = ada.node.identity().await.expect("identity");
    assert_eq!(me.display_name, "ada");
    assert_eq!(
        ada.node.roster().await.display_name(ada.peer_id),
        Some("ada")
    );
}
