//! Artifact directory and transfer session registry.
//!
//! A keyed, update-in-place store: artifacts by id, sessions by
//! (artifact, requester). Display ordering is a derived projection over the
//! map, never the storage order. The registry itself is synchronous; callers
//! share it behind a lock (one producer task per requester plus the message
//! dispatch all mutate it).

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::artifact::{ArtifactId, ArtifactRecord};
use crate::error::{Error, Result};
use crate::peer::PeerId;
use crate::session::{
    ChunkOutcome, SessionKey, SessionState, TransferDirection, TransferProgress, TransferSession,
};

/// A metadata edit message, applied unconditionally (last write wins).
#[derive(Debug, Clone)]
pub enum MetadataEdit {
    /// Replace the suggested display name
    Rename(String),
    /// Replace the description
    Redescribe(String),
}

/// Which record field a metadata edit touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    /// The suggested display name
    DisplayName,
    /// The description
    Description,
}

/// Outcome of a requester-side transfer request.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// A completed session already existed; reuse its blob, move no bytes
    AlreadyComplete(crate::artifact::ArtifactBlob),
    /// The artifact is empty; the session completed at creation
    CompletedImmediately(crate::artifact::ArtifactBlob),
    /// A new session was created in `Requested` state; send the request
    Requested,
}

/// In-memory directory of artifacts and their transfer sessions.
#[derive(Debug, Default)]
pub struct TransferRegistry {
    artifacts: HashMap<ArtifactId, ArtifactRecord>,
    sessions: HashMap<SessionKey, TransferSession>,
    verify_checksums: bool,
}

impl TransferRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(verify_checksums: bool) -> Self {
        Self {
            artifacts: HashMap::new(),
            sessions: HashMap::new(),
            verify_checksums,
        }
    }

    /// Register a newly advertised artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateArtifact`] if the id is already present.
    pub fn advertise(&mut self, record: ArtifactRecord) -> Result<()> {
        let id = record.artifact_id;
        if self.artifacts.contains_key(&id) {
            return Err(Error::DuplicateArtifact(id));
        }

        debug!(artifact_id = %id, name = %record.display_name, "artifact advertised");
        self.artifacts.insert(id, record);
        Ok(())
    }

    /// Look up an artifact record.
    #[must_use]
    pub fn artifact(&self, id: ArtifactId) -> Option<&ArtifactRecord> {
        self.artifacts.get(&id)
    }

    /// All known artifacts, newest first.
    ///
    /// Derived projection for display; the registry stores records keyed by
    /// id with no positional order.
    #[must_use]
    pub fn artifacts_by_recency(&self) -> Vec<&ArtifactRecord> {
        let mut records: Vec<&ArtifactRecord> = self.artifacts.values().collect();
        records.sort_by(|a, b| {
            b.advertised_at
                .cmp(&a.advertised_at)
                .then_with(|| a.artifact_id.to_string().cmp(&b.artifact_id.to_string()))
        });
        records
    }

    /// Apply a rename/redescribe edit, unconditionally.
    ///
    /// No ordering or version check: a late-arriving edit overwrites a newer
    /// one. That is the documented contract, not a bug to fix here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownArtifact`] if the id is not registered.
    pub fn apply_metadata_edit(
        &mut self,
        artifact_id: ArtifactId,
        edit: MetadataEdit,
    ) -> Result<MetadataField> {
        let record = self
            .artifacts
            .get_mut(&artifact_id)
            .ok_or(Error::UnknownArtifact(artifact_id))?;

        Ok(match edit {
            MetadataEdit::Rename(new_name) => {
                record.display_name = new_name;
                MetadataField::DisplayName
            }
            MetadataEdit::Redescribe(new_description) => {
                record.description = new_description;
                MetadataField::Description
            }
        })
    }

    /// Requester side: open (or reuse) the session for an artifact.
    ///
    /// Idempotent for completed sessions: the existing result blob is handed
    /// back and no bytes are re-requested.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownArtifact`] if the id is not registered.
    pub fn request_transfer(
        &mut self,
        artifact_id: ArtifactId,
        requester: PeerId,
    ) -> Result<RequestOutcome> {
        let record = self
            .artifacts
            .get(&artifact_id)
            .ok_or(Error::UnknownArtifact(artifact_id))?;
        let byte_size = record.byte_size;
        let key = SessionKey {
            artifact_id,
            requester,
        };

        if let Some(session) = self.sessions.get(&key) {
            if let Some(blob) = session.result() {
                debug!(%artifact_id, "re-download served from completed session");
                return Ok(RequestOutcome::AlreadyComplete(blob.clone()));
            }
            if session.state() != SessionState::Abandoned {
                // in-flight request: keep its accumulated bytes; the caller
                // may re-send the request and duplicates will be dropped
                return Ok(RequestOutcome::Requested);
            }
            // abandoned sessions are replaced so a retry starts clean
        }

        let session = TransferSession::new_inbound(key, byte_size, self.verify_checksums);
        let completed = session.result().cloned();
        self.sessions.insert(key, session);

        match completed {
            Some(blob) => Ok(RequestOutcome::CompletedImmediately(blob)),
            None => Ok(RequestOutcome::Requested),
        }
    }

    /// Owner side: open the delivery session for an incoming request.
    ///
    /// A repeated request replaces the previous outbound session and
    /// restreams from the start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownArtifact`] if the id is not registered.
    pub fn begin_delivery(
        &mut self,
        artifact_id: ArtifactId,
        requester: PeerId,
        requester_display_name: &str,
    ) -> Result<SessionKey> {
        let record = self
            .artifacts
            .get(&artifact_id)
            .ok_or(Error::UnknownArtifact(artifact_id))?;

        let key = SessionKey {
            artifact_id,
            requester,
        };
        self.sessions.insert(
            key,
            TransferSession::new_outbound(key, record.byte_size, requester_display_name),
        );
        Ok(key)
    }

    /// Route a received chunk into its session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] for a chunk with no session, and
    /// propagates chunk-level failures from the reassembler.
    pub fn accept_chunk(
        &mut self,
        artifact_id: ArtifactId,
        requester: PeerId,
        offset: u64,
        checksum: u64,
        data: Vec<u8>,
    ) -> Result<ChunkOutcome> {
        let key = SessionKey {
            artifact_id,
            requester,
        };
        let session = self
            .sessions
            .get_mut(&key)
            .ok_or(Error::SessionNotFound {
                artifact_id,
                requester,
            })?;

        session.accept_chunk(offset, checksum, data)
    }

    /// Owner side: bump the delivered-byte counter after a chunk went out.
    ///
    /// Returns `true` when the delivery just completed. Unknown or terminal
    /// sessions are a no-op: the producer may outlive a cancelled session by
    /// one chunk.
    pub fn record_delivered(&mut self, key: &SessionKey, len: u64) -> bool {
        match self.sessions.get_mut(key) {
            Some(session) => session.record_delivered(len),
            None => {
                debug!(artifact_id = %key.artifact_id, "delivered bytes for unknown session");
                false
            }
        }
    }

    /// Whether a producer may keep emitting chunks for this session.
    #[must_use]
    pub fn is_live(&self, key: &SessionKey) -> bool {
        self.sessions.get(key).is_some_and(TransferSession::is_live)
    }

    /// Abandon a session (explicit cancel).
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if no session exists for the key,
    /// or [`Error::InvalidTransition`] for a completed one.
    pub fn cancel(&mut self, key: &SessionKey) -> Result<()> {
        let session = self.sessions.get_mut(key).ok_or(Error::SessionNotFound {
            artifact_id: key.artifact_id,
            requester: key.requester,
        })?;
        session.abandon()
    }

    /// Abandon every non-terminal session idle longer than `max_idle`.
    ///
    /// Returns the reaped keys. This is the stall detector the transfer
    /// protocol itself does not have: without it a session with a dropped
    /// chunk sits in `Receiving` forever, indistinguishable from a slow one.
    pub fn reap_stalled(&mut self, max_idle: Duration) -> Vec<SessionKey> {
        let mut reaped = Vec::new();
        for (key, session) in &mut self.sessions {
            if session.state().is_terminal() || session.idle_for() <= max_idle {
                continue;
            }
            if session.abandon().is_ok() {
                warn!(
                    artifact_id = %key.artifact_id,
                    requester = %key.requester,
                    "stalled transfer abandoned"
                );
                reaped.push(*key);
            }
        }
        reaped
    }

    /// Display names of peers that asked this owner for the artifact.
    #[must_use]
    pub fn leechers(&self, artifact_id: ArtifactId) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .values()
            .filter(|s| {
                s.key().artifact_id == artifact_id
                    && s.direction() == TransferDirection::Outbound
            })
            .map(|s| s.requester_display_name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Progress snapshot for one session.
    #[must_use]
    pub fn progress(&self, key: &SessionKey) -> Option<TransferProgress> {
        self.sessions.get(key).map(TransferSession::progress)
    }

    /// Current state of one session.
    #[must_use]
    pub fn session_state(&self, key: &SessionKey) -> Option<SessionState> {
        self.sessions.get(key).map(TransferSession::state)
    }

    /// Number of registered artifacts.
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }
}
