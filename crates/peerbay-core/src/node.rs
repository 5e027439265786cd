//! Peer node: message dispatch and the share/download API.
//!
//! A [`PeerNode`] owns the registry, the source bytes of artifacts it
//! advertised, and the outbound channel handle. Incoming frames are fed to
//! [`PeerNode::run`]; everything the presentation layer needs to render
//! arrives on the [`NodeEvent`] stream.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactBlob, ArtifactDraft, ArtifactId, ArtifactRecord};
use crate::channel::Envelope;
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::peer::{Peer, PeerId, Roster};
use crate::producer::ChunkProducer;
use crate::protocol::{
    CancelPayload, ChunkPayload, Message, PresencePayload, RedescribePayload, RenamePayload,
    TransferErrorPayload, TransferRequestPayload,
};
use crate::registry::{MetadataEdit, MetadataField, RequestOutcome, TransferRegistry};
use crate::session::{ChunkOutcome, SessionKey, TransferProgress};

/// What a `download` call produced.
#[derive(Debug)]
pub enum DownloadStart {
    /// The artifact was already reassembled; no bytes will move
    Ready(ArtifactBlob),
    /// A request went out to the owner; chunks will follow
    Requested,
}

/// Engine events for the presentation layer.
#[derive(Debug)]
pub enum NodeEvent {
    /// The hub assigned this peer its identity
    IdentityAssigned(Peer),
    /// The roster was replaced by a presence broadcast
    RosterUpdated {
        /// Replacement roster
        roster: Roster,
        /// Display name of a peer that just joined
        joined: Option<String>,
        /// Display name of a peer that just left
        left: Option<String>,
    },
    /// A new artifact is available in the group
    ArtifactAdvertised(ArtifactId),
    /// A rename/redescribe edit was applied
    MetadataChanged {
        /// The edited artifact
        artifact_id: ArtifactId,
        /// Which field changed
        field: MetadataField,
    },
    /// A peer asked for an artifact this node owns
    TransferRequested {
        /// The requested artifact
        artifact_id: ArtifactId,
        /// The requester's display name
        requester_name: String,
    },
    /// A transfer advanced by one chunk
    TransferProgressed(TransferProgress),
    /// A requested artifact finished reassembling; emitted exactly once
    ArtifactReady {
        /// The completed artifact
        artifact_id: ArtifactId,
        /// Handle to the reassembled bytes
        blob: ArtifactBlob,
    },
    /// The owner reported the transfer cannot happen
    TransferFailed {
        /// The artifact the request referenced
        artifact_id: ArtifactId,
        /// Stable error code, when the owner supplied one
        code: Option<String>,
        /// Human-readable reason
        message: String,
    },
    /// A session was abandoned by cancel or the inactivity reaper
    TransferAbandoned {
        /// The artifact
        artifact_id: ArtifactId,
        /// The requester half of the session key
        requester: PeerId,
    },
}

/// A member of the peer group.
pub struct PeerNode {
    display_name: String,
    config: TransferConfig,
    identity: Mutex<Option<Peer>>,
    roster: Mutex<Roster>,
    sources: Mutex<HashMap<ArtifactId, Arc<[u8]>>>,
    registry: Arc<Mutex<TransferRegistry>>,
    outbound: mpsc::Sender<Envelope>,
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl std::fmt::Debug for PeerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerNode")
            .field("display_name", &self.display_name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PeerNode {
    /// Create a node with the given display name and outbound channel.
    ///
    /// The display name is chosen once here and immutable afterwards; the id
    /// half of the identity arrives from the hub via `assign-id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer configuration is invalid.
    pub fn new(
        display_name: impl Into<String>,
        outbound: mpsc::Sender<Envelope>,
        config: TransferConfig,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<NodeEvent>)> {
        config.validate()?;
        let (events, events_rx) = mpsc::unbounded_channel();

        let node = Arc::new(Self {
            display_name: display_name.into(),
            registry: Arc::new(Mutex::new(TransferRegistry::new(config.verify_checksums))),
            config,
            identity: Mutex::new(None),
            roster: Mutex::new(Roster::default()),
            sources: Mutex::new(HashMap::new()),
            outbound,
            events,
        });

        Ok((node, events_rx))
    }

    /// Consume framed messages until the inbox closes.
    ///
    /// Undecodable frames and handler failures are logged and skipped; the
    /// loop itself never fails.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Vec<u8>>) {
        while let Some(frame) = inbox.recv().await {
            match Message::decode(&frame) {
                Ok(message) => {
                    if let Err(e) = self.handle_message(message).await {
                        warn!(error = %e, "message handling failed");
                    }
                }
                Err(e) => warn!(error = %e, "undecodable frame dropped"),
            }
        }
        debug!("inbox closed, node loop ending");
    }

    /// This node's identity, once assigned.
    pub async fn identity(&self) -> Option<Peer> {
        self.identity.lock().await.clone()
    }

    /// The current roster snapshot.
    pub async fn roster(&self) -> Roster {
        self.roster.lock().await.clone()
    }

    /// All known artifacts, newest first.
    pub async fn artifacts(&self) -> Vec<ArtifactRecord> {
        self.registry
            .lock()
            .await
            .artifacts_by_recency()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Progress snapshot for one transfer session.
    pub async fn progress(
        &self,
        artifact_id: ArtifactId,
        requester: PeerId,
    ) -> Option<TransferProgress> {
        self.registry.lock().await.progress(&SessionKey {
            artifact_id,
            requester,
        })
    }

    /// Display names of peers downloading (or done downloading) an artifact
    /// this node owns.
    pub async fn leechers(&self, artifact_id: ArtifactId) -> Vec<String> {
        self.registry.lock().await.leechers(artifact_id)
    }

    /// Submit a draft: validate it, register the artifact, keep its source
    /// bytes, and advertise it to the group.
    ///
    /// # Errors
    ///
    /// Fails if the identity is unassigned, a required field is empty, or
    /// the channel is closed.
    pub async fn share(&self, draft: ArtifactDraft) -> Result<ArtifactId> {
        let me = self.require_identity().await?;
        let (record, bytes) = draft.finish(&me)?;
        let artifact_id = record.artifact_id;

        self.sources.lock().await.insert(artifact_id, bytes);
        self.registry.lock().await.advertise(record.clone())?;

        self.send(Envelope::broadcast(Message::AdvertiseArtifact(record)))
            .await?;

        info!(%artifact_id, "artifact shared");
        Ok(artifact_id)
    }

    /// Submit a file from disk.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or the draft is invalid.
    pub async fn share_file(
        &self,
        path: &Path,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<ArtifactId> {
        let draft = ArtifactDraft::from_path(path, display_name, description).await?;
        self.share(draft).await
    }

    /// Ask the owning peer for an artifact's bytes.
    ///
    /// Idempotent once complete: a repeat call hands back the reassembled
    /// blob without re-requesting anything.
    ///
    /// # Errors
    ///
    /// Fails if the identity is unassigned, the artifact is unknown, or the
    /// channel is closed.
    pub async fn download(&self, artifact_id: ArtifactId) -> Result<DownloadStart> {
        let me = self.require_identity().await?;

        let (outcome, owner) = {
            let mut registry = self.registry.lock().await;
            let outcome = registry.request_transfer(artifact_id, me.id)?;
            let owner = registry
                .artifact(artifact_id)
                .map(|r| r.owner_peer_id)
                .ok_or(Error::UnknownArtifact(artifact_id))?;
            (outcome, owner)
        };

        match outcome {
            RequestOutcome::AlreadyComplete(blob) => Ok(DownloadStart::Ready(blob)),
            RequestOutcome::CompletedImmediately(blob) => {
                self.emit(NodeEvent::ArtifactReady {
                    artifact_id,
                    blob: blob.clone(),
                });
                Ok(DownloadStart::Ready(blob))
            }
            RequestOutcome::Requested => {
                self.send(Envelope::to_peer(
                    owner,
                    Message::RequestTransfer(TransferRequestPayload {
                        artifact_id,
                        requester_peer_id: me.id,
                        requester_display_name: me.display_name,
                    }),
                ))
                .await?;
                Ok(DownloadStart::Requested)
            }
        }
    }

    /// Rename an artifact for the whole group (last write wins).
    ///
    /// # Errors
    ///
    /// Fails if the artifact is unknown locally or the channel is closed.
    pub async fn rename(&self, artifact_id: ArtifactId, new_name: impl Into<String>) -> Result<()> {
        let new_name = new_name.into();
        self.registry
            .lock()
            .await
            .apply_metadata_edit(artifact_id, MetadataEdit::Rename(new_name.clone()))?;

        self.send(Envelope::broadcast(Message::RenameArtifact(
            RenamePayload {
                artifact_id,
                new_name,
            },
        )))
        .await
    }

    /// Redescribe an artifact for the whole group (last write wins).
    ///
    /// # Errors
    ///
    /// Fails if the artifact is unknown locally or the channel is closed.
    pub async fn redescribe(
        &self,
        artifact_id: ArtifactId,
        new_description: impl Into<String>,
    ) -> Result<()> {
        let new_description = new_description.into();
        self.registry.lock().await.apply_metadata_edit(
            artifact_id,
            MetadataEdit::Redescribe(new_description.clone()),
        )?;

        self.send(Envelope::broadcast(Message::RedescribeArtifact(
            RedescribePayload {
                artifact_id,
                new_description,
            },
        )))
        .await
    }

    /// Abandon an in-flight download and tell the owner to stop producing.
    ///
    /// # Errors
    ///
    /// Fails if the identity is unassigned or no abandonable session exists.
    pub async fn cancel_download(&self, artifact_id: ArtifactId) -> Result<()> {
        let me = self.require_identity().await?;
        let key = SessionKey {
            artifact_id,
            requester: me.id,
        };

        let owner = {
            let mut registry = self.registry.lock().await;
            registry.cancel(&key)?;
            registry.artifact(artifact_id).map(|r| r.owner_peer_id)
        };

        self.emit(NodeEvent::TransferAbandoned {
            artifact_id,
            requester: me.id,
        });

        if let Some(owner) = owner {
            self.send(Envelope::to_peer(
                owner,
                Message::CancelTransfer(CancelPayload {
                    artifact_id,
                    requester_peer_id: me.id,
                }),
            ))
            .await?;
        }
        Ok(())
    }

    /// Abandon a delivery this node is producing and tell the requester.
    ///
    /// # Errors
    ///
    /// Fails if no abandonable session exists or the channel is closed.
    pub async fn cancel_delivery(&self, artifact_id: ArtifactId, requester: PeerId) -> Result<()> {
        let key = SessionKey {
            artifact_id,
            requester,
        };
        self.registry.lock().await.cancel(&key)?;

        self.emit(NodeEvent::TransferAbandoned {
            artifact_id,
            requester,
        });

        self.send(Envelope::to_peer(
            requester,
            Message::CancelTransfer(CancelPayload {
                artifact_id,
                requester_peer_id: requester,
            }),
        ))
        .await
    }

    /// Abandon every session idle past the configured stall timeout.
    ///
    /// Returns the abandoned session keys.
    pub async fn reap_stalled(&self) -> Vec<SessionKey> {
        let reaped = self
            .registry
            .lock()
            .await
            .reap_stalled(self.config.stall_timeout);

        for key in &reaped {
            self.emit(NodeEvent::TransferAbandoned {
                artifact_id: key.artifact_id,
                requester: key.requester,
            });
        }
        reaped
    }

    /// Dispatch one incoming message.
    ///
    /// # Errors
    ///
    /// Returns an error for failures worth surfacing to the caller's log;
    /// tolerated anomalies (duplicate chunks, orphaned chunks, late cancels)
    /// are logged here and swallowed.
    pub async fn handle_message(&self, message: Message) -> Result<()> {
        match message {
            Message::AssignId(payload) => {
                let peer = Peer::new(payload.peer_id, self.display_name.clone());
                *self.identity.lock().await = Some(peer.clone());
                info!(peer_id = %peer.id, "identity assigned");
                self.emit(NodeEvent::IdentityAssigned(peer));
                Ok(())
            }
            Message::PeerJoined(payload) => {
                self.apply_roster(payload, true).await;
                Ok(())
            }
            Message::PeerLeft(payload) => {
                self.apply_roster(payload, false).await;
                Ok(())
            }
            Message::AdvertiseArtifact(record) => self.on_advertise(record).await,
            Message::RenameArtifact(payload) => {
                self.on_metadata_edit(payload.artifact_id, MetadataEdit::Rename(payload.new_name))
                    .await
            }
            Message::RedescribeArtifact(payload) => {
                self.on_metadata_edit(
                    payload.artifact_id,
                    MetadataEdit::Redescribe(payload.new_description),
                )
                .await
            }
            Message::RequestTransfer(payload) => self.on_request(payload).await,
            Message::Chunk(payload) => self.on_chunk(payload).await,
            Message::CancelTransfer(payload) => {
                self.on_cancel(payload).await;
                Ok(())
            }
            Message::TransferError(payload) => {
                self.on_transfer_error(payload).await;
                Ok(())
            }
        }
    }

    async fn apply_roster(&self, payload: PresencePayload, joined: bool) {
        *self.roster.lock().await = payload.roster.clone();

        let (joined_name, left_name) = if joined {
            (payload.peer_name, None)
        } else {
            (None, payload.peer_name)
        };
        self.emit(NodeEvent::RosterUpdated {
            roster: payload.roster,
            joined: joined_name,
            left: left_name,
        });
    }

    async fn on_advertise(&self, record: ArtifactRecord) -> Result<()> {
        let artifact_id = record.artifact_id;
        let own_loopback = self
            .identity()
            .await
            .is_some_and(|me| record.owner_peer_id == me.id);

        match self.registry.lock().await.advertise(record) {
            Ok(()) => {
                self.emit(NodeEvent::ArtifactAdvertised(artifact_id));
                Ok(())
            }
            Err(Error::DuplicateArtifact(_)) if own_loopback => {
                // our own broadcast came back; it was registered at share time
                debug!(%artifact_id, "loopback advertise ignored");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn on_metadata_edit(&self, artifact_id: ArtifactId, edit: MetadataEdit) -> Result<()> {
        let field = self
            .registry
            .lock()
            .await
            .apply_metadata_edit(artifact_id, edit)?;
        self.emit(NodeEvent::MetadataChanged { artifact_id, field });
        Ok(())
    }

    async fn on_request(&self, payload: TransferRequestPayload) -> Result<()> {
        let artifact_id = payload.artifact_id;
        let requester = payload.requester_peer_id;

        let source = self.sources.lock().await.get(&artifact_id).cloned();
        let Some(source) = source else {
            let known = self.registry.lock().await.artifact(artifact_id).is_some();
            let err = if known {
                Error::NotOwner(artifact_id)
            } else {
                Error::UnknownArtifact(artifact_id)
            };
            warn!(%artifact_id, %requester, error = %err, "transfer request refused");

            return self
                .send(Envelope::to_peer(
                    requester,
                    Message::TransferError(TransferErrorPayload {
                        artifact_id,
                        code: err.code().unwrap_or_default().to_string(),
                        message: err.to_string(),
                    }),
                ))
                .await;
        };

        self.registry.lock().await.begin_delivery(
            artifact_id,
            requester,
            &payload.requester_display_name,
        )?;

        self.emit(NodeEvent::TransferRequested {
            artifact_id,
            requester_name: payload.requester_display_name,
        });

        ChunkProducer::new(
            Arc::clone(&self.registry),
            self.outbound.clone(),
            self.config.chunk_size,
        )
        .spawn(artifact_id, requester, source);

        Ok(())
    }

    async fn on_chunk(&self, payload: ChunkPayload) -> Result<()> {
        let artifact_id = payload.artifact_id;
        let requester = payload.requester_peer_id;

        let addressed_to_us = self
            .identity()
            .await
            .is_some_and(|me| me.id == requester);
        if !addressed_to_us {
            warn!(%artifact_id, %requester, "misaddressed chunk dropped");
            return Ok(());
        }

        let key = SessionKey {
            artifact_id,
            requester,
        };
        let outcome = {
            let mut registry = self.registry.lock().await;
            registry.accept_chunk(
                artifact_id,
                requester,
                payload.offset,
                payload.checksum,
                payload.data,
            )
        };

        match outcome {
            Ok(ChunkOutcome::Progress(_)) => {
                if let Some(progress) = self.registry.lock().await.progress(&key) {
                    self.emit(NodeEvent::TransferProgressed(progress));
                }
                Ok(())
            }
            Ok(ChunkOutcome::Completed(blob)) => {
                self.emit(NodeEvent::ArtifactReady { artifact_id, blob });
                Ok(())
            }
            Ok(ChunkOutcome::Ignored) => {
                debug!(%artifact_id, offset = payload.offset, "chunk ignored");
                Ok(())
            }
            Err(e) if e.is_chunk_level() => {
                // discard the chunk, keep the session; no retries exist, so
                // the transfer now stalls until the reaper notices
                warn!(%artifact_id, error = %e, "chunk rejected");
                Ok(())
            }
            Err(Error::SessionNotFound { .. }) => {
                // orphaned chunk for a session this peer discarded
                debug!(%artifact_id, "chunk without session dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn on_cancel(&self, payload: CancelPayload) {
        let key = SessionKey {
            artifact_id: payload.artifact_id,
            requester: payload.requester_peer_id,
        };

        match self.registry.lock().await.cancel(&key) {
            Ok(()) => {
                self.emit(NodeEvent::TransferAbandoned {
                    artifact_id: key.artifact_id,
                    requester: key.requester,
                });
            }
            Err(e) => {
                // late cancel for a finished or unknown session
                debug!(artifact_id = %key.artifact_id, error = %e, "cancel ignored");
            }
        }
    }

    async fn on_transfer_error(&self, payload: TransferErrorPayload) {
        let artifact_id = payload.artifact_id;

        if let Some(me) = self.identity().await {
            let key = SessionKey {
                artifact_id,
                requester: me.id,
            };
            if let Err(e) = self.registry.lock().await.cancel(&key) {
                debug!(%artifact_id, error = %e, "no session to abandon after transfer error");
            }
        }

        self.emit(NodeEvent::TransferFailed {
            artifact_id,
            code: (!payload.code.is_empty()).then_some(payload.code),
            message: payload.message,
        });
    }

    async fn require_identity(&self) -> Result<Peer> {
        self.identity().await.ok_or(Error::IdentityUnassigned)
    }

    async fn send(&self, envelope: Envelope) -> Result<()> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    fn emit(&self, event: NodeEvent) {
        let _ = self.events.send(event);
    }
}
