//! Error types for Peerbay.
//!
//! This module provides a unified error type for all Peerbay operations,
//! with specific error variants for different failure modes.

use std::io;

use thiserror::Error;

use crate::artifact::ArtifactId;
use crate::peer::PeerId;

/// A specialized `Result` type for Peerbay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Peerbay.
#[derive(Error, Debug)]
pub enum Error {
    /// Request references an artifact id not in the registry (E001)
    #[error("unknown artifact: {0}")]
    UnknownArtifact(ArtifactId),

    /// Artifact id collision on advertise (E002)
    #[error("artifact {0} is already advertised")]
    DuplicateArtifact(ArtifactId),

    /// Submission form is missing a required field (E003)
    #[error("incomplete submission: {0} is required")]
    IncompleteSubmission(&'static str),

    /// Chunk size policy rejected (E004)
    #[error("invalid chunk size {size}: {reason}")]
    InvalidChunkSize {
        /// The rejected chunk size
        size: usize,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Chunk payload failed checksum verification (E005)
    #[error("checksum mismatch for chunk at offset {offset} of artifact {artifact_id}")]
    ChunkChecksum {
        /// The artifact being transferred
        artifact_id: ArtifactId,
        /// Byte offset of the failing chunk
        offset: u64,
    },

    /// Chunk would run past the declared artifact size (E006)
    #[error("chunk at offset {offset} overruns declared size {declared} by {excess} bytes")]
    ChunkOverrun {
        /// Byte offset of the offending chunk
        offset: u64,
        /// Declared artifact size
        declared: u64,
        /// Bytes past the end
        excess: u64,
    },

    /// Received byte count matched the declared size but the offsets leave a gap (E007)
    #[error("chunk sequence has a gap at offset {0}")]
    ChunkGap(u64),

    /// Session state machine rejected a transition
    #[error("invalid transition from {from} for transfer of {artifact_id} to {requester}")]
    InvalidTransition {
        /// Current session state
        from: &'static str,
        /// The artifact being transferred
        artifact_id: ArtifactId,
        /// The requesting peer
        requester: PeerId,
    },

    /// No session exists for the (artifact, requester) pair
    #[error("no transfer session for artifact {artifact_id} and requester {requester}")]
    SessionNotFound {
        /// The artifact
        artifact_id: ArtifactId,
        /// The requesting peer
        requester: PeerId,
    },

    /// A transfer request arrived for an artifact this peer does not own
    #[error("peer does not hold the source bytes of artifact {0}")]
    NotOwner(ArtifactId),

    /// The hub has not assigned this peer an identity yet
    #[error("peer identity not assigned yet")]
    IdentityUnassigned,

    /// The outbound channel was closed mid-send
    #[error("outbound channel closed")]
    ChannelClosed,

    /// Invalid protocol message
    #[error("invalid protocol message: {0}")]
    Protocol(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::UnknownArtifact(_) => Some("E001"),
            Self::DuplicateArtifact(_) => Some("E002"),
            Self::IncompleteSubmission(_) => Some("E003"),
            Self::InvalidChunkSize { .. } => Some("E004"),
            Self::ChunkChecksum { .. } => Some("E005"),
            Self::ChunkOverrun { .. } => Some("E006"),
            Self::ChunkGap(_) => Some("E007"),
            _ => None,
        }
    }

    /// Returns whether this error leaves session state intact.
    ///
    /// Chunk-level failures are tolerated: the offending chunk is discarded
    /// and the session simply stops advancing. There are no retries anywhere
    /// in the engine.
    #[must_use]
    pub const fn is_chunk_level(&self) -> bool {
        matches!(
            self,
            Self::ChunkChecksum { .. } | Self::ChunkOverrun { .. } | Self::ChunkGap(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let id = ArtifactId::generate();
        assert_eq!(Error::UnknownArtifact(id).code(), Some("E001"));
        assert_eq!(Error::DuplicateArtifact(id).code(), Some("E002"));
        assert_eq!(
            Error::IncompleteSubmission("description").code(),
            Some("E003")
        );
        assert_eq!(Error::IdentityUnassigned.code(), None);
    }

    #[test]
    fn test_chunk_level_classification() {
        let id = ArtifactId::generate();
        assert!(Error::ChunkChecksum {
            artifact_id: id,
            offset: 0,
        }
        .is_chunk_level());
        assert!(Error::ChunkGap(42).is_chunk_level());
        assert!(!Error::UnknownArtifact(id).is_chunk_level());
    }
}
