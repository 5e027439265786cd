//! Transfer session state machine.
//!
//! A session tracks one (artifact, requester) pair. The requester side
//! accumulates chunks through its [`ChunkReassembler`]; the owner side only
//! counts delivered bytes for its progress display. Sessions are retained
//! indefinitely after completion so a repeat download can reuse the
//! reassembled artifact without moving bytes again.
//!
//! ```text
//! Requested ──chunk──▶ Receiving ──bytes == byte_size──▶ Complete
//!     │                    │
//!     └──cancel/timeout────┴──────────▶ Abandoned
//! ```
//!
//! `Complete` and `Abandoned` are terminal; transitions out of either are
//! rejected.

use std::time::{Duration, Instant};

use crate::artifact::{ArtifactBlob, ArtifactId};
use crate::error::{Error, Result};
use crate::peer::PeerId;
use crate::reassembler::{ChunkReassembler, ReassemblyStatus};

/// Transfer direction, relative to the local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Local peer owns the source bytes and streams them out
    Outbound,
    /// Local peer requested the bytes and reassembles them
    Inbound,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Request sent (inbound) or received (outbound); no chunks yet
    Requested,
    /// Chunks in flight
    Receiving,
    /// All bytes accounted for; result available (terminal)
    Complete,
    /// Cancelled or reaped after inactivity (terminal)
    Abandoned,
}

impl SessionState {
    /// Short name for error reporting.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Receiving => "receiving",
            Self::Complete => "complete",
            Self::Abandoned => "abandoned",
        }
    }

    /// Whether the state admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Abandoned)
    }
}

/// Key identifying a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// The artifact being transferred
    pub artifact_id: ArtifactId,
    /// The peer that asked for the bytes
    pub requester: PeerId,
}

/// Outcome of routing one received chunk into a session.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    /// Chunk accepted; cumulative bytes received
    Progress(u64),
    /// This chunk completed the transfer
    Completed(ArtifactBlob),
    /// Chunk dropped (terminal session or duplicate offset)
    Ignored,
}

/// Progress snapshot for rendering.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    /// The artifact being transferred
    pub artifact_id: ArtifactId,
    /// The requester half of the session key
    pub requester: PeerId,
    /// Transfer direction relative to the local peer
    pub direction: TransferDirection,
    /// Current state
    pub state: SessionState,
    /// Bytes delivered (outbound) or received (inbound) so far
    pub bytes_transferred: u64,
    /// Declared artifact size
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Progress as a percentage (0.0 - 100.0).
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

/// State for one (artifact, requester) transfer.
#[derive(Debug)]
pub struct TransferSession {
    key: SessionKey,
    direction: TransferDirection,
    state: SessionState,
    expected_size: u64,
    bytes_delivered: u64,
    requester_display_name: String,
    reassembler: Option<ChunkReassembler>,
    result: Option<ArtifactBlob>,
    last_activity: Instant,
}

impl TransferSession {
    /// Create the requester-side session.
    ///
    /// A zero-byte artifact completes at creation: the producer emits
    /// `ceil(0/C) = 0` chunks, so no arrival could ever drive the
    /// transition.
    #[must_use]
    pub fn new_inbound(key: SessionKey, expected_size: u64, verify_checksums: bool) -> Self {
        let (state, reassembler, result) = if expected_size == 0 {
            (
                SessionState::Complete,
                None,
                Some(ArtifactBlob::from_bytes(Vec::new())),
            )
        } else {
            (
                SessionState::Requested,
                Some(ChunkReassembler::new(expected_size, verify_checksums)),
                None,
            )
        };

        Self {
            key,
            direction: TransferDirection::Inbound,
            state,
            expected_size,
            bytes_delivered: 0,
            requester_display_name: String::new(),
            reassembler,
            result,
            last_activity: Instant::now(),
        }
    }

    /// Create the owner-side session.
    #[must_use]
    pub fn new_outbound(
        key: SessionKey,
        expected_size: u64,
        requester_display_name: impl Into<String>,
    ) -> Self {
        Self {
            key,
            direction: TransferDirection::Outbound,
            state: SessionState::Requested,
            expected_size,
            bytes_delivered: 0,
            requester_display_name: requester_display_name.into(),
            reassembler: None,
            result: None,
            last_activity: Instant::now(),
        }
    }

    /// The session key.
    #[must_use]
    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Transfer direction relative to the local peer.
    #[must_use]
    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The requester's display name (owner side leecher list).
    #[must_use]
    pub fn requester_display_name(&self) -> &str {
        &self.requester_display_name
    }

    /// The reassembled artifact, present only in `Complete` state.
    #[must_use]
    pub fn result(&self) -> Option<&ArtifactBlob> {
        self.result.as_ref()
    }

    /// Whether a producer may keep emitting chunks for this session.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state != SessionState::Abandoned
    }

    /// Time since the session last saw activity.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Route one received chunk into the session (inbound side).
    ///
    /// Entering `Receiving` on the first chunk; entering `Complete` exactly
    /// when cumulative bytes equal the declared size. On completion the
    /// accumulation buffer is released, the received-byte counter resets to
    /// zero, and the result blob is retained.
    ///
    /// # Errors
    ///
    /// Chunk-level failures (checksum, overrun, overlap) discard the chunk
    /// and leave the session state untouched.
    pub fn accept_chunk(
        &mut self,
        offset: u64,
        checksum: u64,
        data: Vec<u8>,
    ) -> Result<ChunkOutcome> {
        if self.state.is_terminal() {
            return Ok(ChunkOutcome::Ignored);
        }

        let Some(reassembler) = self.reassembler.as_mut() else {
            return Ok(ChunkOutcome::Ignored);
        };

        self.last_activity = Instant::now();

        match reassembler.accept(self.key.artifact_id, offset, checksum, data)? {
            ReassemblyStatus::Duplicate => Ok(ChunkOutcome::Ignored),
            ReassemblyStatus::InProgress(bytes) => {
                self.state = SessionState::Receiving;
                Ok(ChunkOutcome::Progress(bytes))
            }
            ReassemblyStatus::Complete => {
                let reassembler = self
                    .reassembler
                    .take()
                    .ok_or_else(|| Error::Protocol("reassembler vanished".to_string()))?;
                let blob = reassembler.into_blob()?;
                self.result = Some(blob.clone());
                self.state = SessionState::Complete;
                Ok(ChunkOutcome::Completed(blob))
            }
        }
    }

    /// Record bytes handed to the channel (outbound side).
    ///
    /// Display bookkeeping only, not correctness. Returns `true` when the
    /// delivered count reaches the artifact size; the counter then resets so
    /// the progress indicator can be reused.
    pub fn record_delivered(&mut self, len: u64) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        self.state = SessionState::Receiving;
        self.last_activity = Instant::now();
        self.bytes_delivered += len;

        if self.bytes_delivered == self.expected_size {
            self.state = SessionState::Complete;
            self.bytes_delivered = 0;
            true
        } else {
            false
        }
    }

    /// Abandon the session.
    ///
    /// Idempotent for already-abandoned sessions. The inbound accumulation
    /// buffer is released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for a completed session.
    pub fn abandon(&mut self) -> Result<()> {
        match self.state {
            SessionState::Abandoned => Ok(()),
            SessionState::Complete => Err(Error::InvalidTransition {
                from: self.state.name(),
                artifact_id: self.key.artifact_id,
                requester: self.key.requester,
            }),
            SessionState::Requested | SessionState::Receiving => {
                self.state = SessionState::Abandoned;
                self.reassembler = None;
                Ok(())
            }
        }
    }

    /// Progress snapshot for rendering.
    #[must_use]
    pub fn progress(&self) -> TransferProgress {
        let bytes_transferred = match self.direction {
            TransferDirection::Outbound => self.bytes_delivered,
            TransferDirection::Inbound => self
                .reassembler
                .as_ref()
                .map_or(0, ChunkReassembler::bytes_received),
        };

        TransferProgress {
            artifact_id: self.key.artifact_id,
            requester: self.key.requester,
            direction: self.direction,
            state: self.state,
            bytes_transferred,
            total_bytes: self.expected_size,
        }
    }
}
