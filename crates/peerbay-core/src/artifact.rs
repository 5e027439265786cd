//! Artifact records, submission drafts, and reassembled blobs.
//!
//! An artifact is a shareable file plus its group-visible metadata. The
//! record travels to every peer via `advertise-artifact`; the source bytes
//! stay with the owner and move only through chunked transfers.
//!
//! Two record fields are mutable after creation: the suggested display name
//! and the description. Any peer may overwrite either one and the last
//! message to arrive wins; there is deliberately no conflict resolution.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::peer::{Peer, PeerId};

/// Globally unique artifact identifier, generated by the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    /// Generate a fresh artifact id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The raw 16-byte form, for the binary chunk codec.
    #[must_use]
    pub const fn into_bytes(self) -> [u8; 16] {
        self.0.into_bytes()
    }

    /// Rebuild an id from its raw 16-byte form.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Group-visible metadata for a shared artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Unique id, generated by the uploader
    pub artifact_id: ArtifactId,
    /// File name as it existed on the owner's disk
    pub original_name: String,
    /// Suggested name shown to the group (mutable, last write wins)
    pub display_name: String,
    /// Free-form description (mutable, last write wins)
    pub description: String,
    /// Size of the source bytes; fixed at creation and never changes
    pub byte_size: u64,
    /// MIME type guessed from the original name
    pub mime_type: Option<String>,
    /// Peer holding the source bytes
    pub owner_peer_id: PeerId,
    /// Owner's display name at submission time
    pub owner_display_name: String,
    /// When the artifact was advertised
    pub advertised_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Whether this record was advertised by the given peer.
    #[must_use]
    pub fn is_owned_by(&self, peer: &Peer) -> bool {
        self.owner_peer_id == peer.id && self.owner_display_name == peer.display_name
    }

    /// The broad media kind, i.e. the MIME type before the slash.
    #[must_use]
    pub fn media_kind(&self) -> Option<&str> {
        self.mime_type
            .as_deref()
            .and_then(|m| m.split('/').next())
    }

    /// The MIME subtype, used by the presentation layer as a file extension.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.mime_type.as_deref().and_then(|m| m.split('/').nth(1))
    }
}

/// A file submission before it becomes an advertised artifact.
///
/// All three text fields are required, matching the submission form contract:
/// an empty original name, display name, or description rejects the draft.
#[derive(Debug, Clone)]
pub struct ArtifactDraft {
    /// File name on the owner's disk
    pub original_name: String,
    /// Suggested name for the group
    pub display_name: String,
    /// Free-form description
    pub description: String,
    /// Source bytes
    pub bytes: Arc<[u8]>,
}

impl ArtifactDraft {
    /// Create a draft from in-memory bytes.
    #[must_use]
    pub fn new(
        original_name: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            original_name: original_name.into(),
            display_name: display_name.into(),
            description: description.into(),
            bytes: bytes.into(),
        }
    }

    /// Create a draft by reading a file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub async fn from_path(
        path: &Path,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let original_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();

        Ok(Self::new(original_name, display_name, description, bytes))
    }

    /// Validate the draft and mint an advertised record for the given owner.
    ///
    /// The artifact id is generated here; `advertised_at` is stamped with the
    /// current time and the MIME type is guessed from the original file name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IncompleteSubmission`] if a required field is empty.
    pub fn finish(self, owner: &Peer) -> Result<(ArtifactRecord, Arc<[u8]>)> {
        if self.original_name.is_empty() {
            return Err(Error::IncompleteSubmission("file name"));
        }
        if self.display_name.is_empty() {
            return Err(Error::IncompleteSubmission("display name"));
        }
        if self.description.is_empty() {
            return Err(Error::IncompleteSubmission("description"));
        }

        let mime_type = mime_guess::from_path(&self.original_name)
            .first()
            .map(|m| m.to_string());

        let record = ArtifactRecord {
            artifact_id: ArtifactId::generate(),
            original_name: self.original_name,
            display_name: self.display_name,
            description: self.description,
            byte_size: self.bytes.len() as u64,
            mime_type,
            owner_peer_id: owner.id,
            owner_display_name: owner.display_name.clone(),
            advertised_at: Utc::now(),
        };

        Ok((record, self.bytes))
    }
}

/// Opaque handle to a fully reassembled artifact.
///
/// Cheap to clone; a repeat download of a completed transfer hands back a
/// clone of the same handle instead of moving bytes again.
#[derive(Debug, Clone)]
pub struct ArtifactBlob {
    bytes: Arc<[u8]>,
    sha256: [u8; 32],
}

impl ArtifactBlob {
    /// Wrap reassembled bytes, recording their SHA-256 digest.
    #[must_use]
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let sha256 = Sha256::digest(&bytes).into();
        Self { bytes, sha256 }
    }

    /// The reassembled bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size of the reassembled artifact.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Whether the artifact is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// SHA-256 digest of the reassembled bytes.
    #[must_use]
    pub fn sha256(&self) -> &[u8; 32] {
        &self.sha256
    }

    /// Whether two handles refer to the same underlying buffer.
    #[must_use]
    pub fn same_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

/// Format a byte count for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
