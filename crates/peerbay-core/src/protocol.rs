//! PBAY wire protocol implementation.
//!
//! Peerbay rides a message-oriented channel: the hub and the peers exchange
//! self-contained frames, never byte streams. Control payloads are JSON;
//! chunk payloads use a compact binary layout.
//!
//! ## Frame Format
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      PBAY Frame                            │
//! ├────────────┬────────────┬────────────┬─────────────────────┤
//! │   Magic    │  Version   │    Type    │      Length         │
//! │  4 bytes   │  2 bytes   │   1 byte   │      4 bytes        │
//! ├────────────┴────────────┴────────────┴─────────────────────┤
//! │                        Payload                             │
//! │                    (variable length)                       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! - Magic: `0x50 0x42 0x41 0x59` ("PBAY")
//! - Version: `0x01 0x00` (1.0)
//! - Type: Message type byte
//! - Length: Payload length in bytes (big-endian)

use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactId, ArtifactRecord};
use crate::error::{Error, Result};
use crate::peer::{PeerId, Roster};

/// Protocol magic bytes: "PBAY"
pub const MAGIC: [u8; 4] = [0x50, 0x42, 0x41, 0x59];

/// Frame header size in bytes
pub const HEADER_SIZE: usize = 11;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Fixed preamble of a binary chunk payload:
/// artifact id (16) | requester id (16) | offset (8) | checksum (8)
pub const CHUNK_PREAMBLE: usize = 48;

/// Largest chunk data slice that still fits in a single frame
pub const MAX_CHUNK_DATA: usize = MAX_PAYLOAD_SIZE - CHUNK_PREAMBLE;

/// xxHash64 of a byte slice, as used for per-chunk checksums.
#[must_use]
pub fn xxhash64(data: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(data, 0)
}

/// Message types in the PBAY protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Hub assigns the peer its id
    AssignId = 0x01,
    /// Roster snapshot after a peer joined
    PeerJoined = 0x02,
    /// Roster snapshot after a peer left
    PeerLeft = 0x03,
    /// New artifact available
    AdvertiseArtifact = 0x10,
    /// Metadata edit: suggested name
    RenameArtifact = 0x11,
    /// Metadata edit: description
    RedescribeArtifact = 0x12,
    /// Ask the owner for an artifact's bytes
    RequestTransfer = 0x20,
    /// One slice of artifact data
    Chunk = 0x21,
    /// Abandon an in-flight transfer
    CancelTransfer = 0x22,
    /// Transfer-level error report
    TransferError = 0xFF,
}

impl MessageType {
    /// Parse a message type from a byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::AssignId),
            0x02 => Some(Self::PeerJoined),
            0x03 => Some(Self::PeerLeft),
            0x10 => Some(Self::AdvertiseArtifact),
            0x11 => Some(Self::RenameArtifact),
            0x12 => Some(Self::RedescribeArtifact),
            0x20 => Some(Self::RequestTransfer),
            0x21 => Some(Self::Chunk),
            0x22 => Some(Self::CancelTransfer),
            0xFF => Some(Self::TransferError),
            _ => None,
        }
    }
}

/// A protocol frame header.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    /// Protocol version (major, minor)
    pub version: (u8, u8),
    /// Message type
    pub message_type: MessageType,
    /// Payload length
    pub payload_length: u32,
}

impl FrameHeader {
    /// Encode the header to bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4] = self.version.0;
        buf[5] = self.version.1;
        buf[6] = self.message_type as u8;
        buf[7..11].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode a header from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if buf[0..4] != MAGIC {
            return Err(Error::Protocol("invalid magic bytes".to_string()));
        }

        let version = (buf[4], buf[5]);

        let message_type = MessageType::from_byte(buf[6])
            .ok_or_else(|| Error::Protocol(format!("unknown message type: {:#x}", buf[6])))?;

        let payload_length = u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]);

        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(Error::Protocol(format!(
                "payload too large: {payload_length} bytes"
            )));
        }

        Ok(Self {
            version,
            message_type,
            payload_length,
        })
    }
}

/// Id assignment payload, sent by the hub at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignIdPayload {
    /// The id this peer will carry for the connection lifetime
    pub peer_id: PeerId,
}

/// Presence payload: a full roster snapshot plus, optionally, the name of
/// the peer whose arrival or departure triggered the broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    /// Replacement roster
    pub roster: Roster,
    /// Display name of the affected peer, if the hub knows it
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub peer_name: Option<String>,
}

/// Rename edit payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenamePayload {
    /// Target artifact
    pub artifact_id: ArtifactId,
    /// Replacement suggested name
    pub new_name: String,
}

/// Redescribe edit payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedescribePayload {
    /// Target artifact
    pub artifact_id: ArtifactId,
    /// Replacement description
    pub new_description: String,
}

/// Transfer request payload, sent by a requester to an artifact's owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequestPayload {
    /// The artifact whose bytes are wanted
    pub artifact_id: ArtifactId,
    /// The requester's id (chunks come back tagged with it)
    pub requester_peer_id: PeerId,
    /// The requester's display name, for the owner's leecher list
    pub requester_display_name: String,
}

/// Cancel payload: either side abandons the (artifact, requester) session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelPayload {
    /// The artifact whose transfer is abandoned
    pub artifact_id: ArtifactId,
    /// The requester half of the session key
    pub requester_peer_id: PeerId,
}

/// Transfer error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferErrorPayload {
    /// The artifact the failed request referenced
    pub artifact_id: ArtifactId,
    /// Stable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

/// Chunk payload (binary).
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    /// The artifact being transferred
    pub artifact_id: ArtifactId,
    /// The requester this slice is addressed to
    pub requester_peer_id: PeerId,
    /// Byte offset of this slice within the artifact
    pub offset: u64,
    /// xxHash64 checksum of the data
    pub checksum: u64,
    /// Chunk data
    pub data: Vec<u8>,
}

impl ChunkPayload {
    /// Build a chunk payload, computing the checksum from the data.
    #[must_use]
    pub fn new(
        artifact_id: ArtifactId,
        requester_peer_id: PeerId,
        offset: u64,
        data: Vec<u8>,
    ) -> Self {
        let checksum = xxhash64(&data);
        Self {
            artifact_id,
            requester_peer_id,
            offset,
            checksum,
            data,
        }
    }
}

/// A complete protocol message.
#[derive(Debug, Clone)]
pub enum Message {
    /// Hub assigns the peer its id
    AssignId(AssignIdPayload),
    /// Roster snapshot after a join
    PeerJoined(PresencePayload),
    /// Roster snapshot after a departure
    PeerLeft(PresencePayload),
    /// New artifact available
    AdvertiseArtifact(ArtifactRecord),
    /// Suggested-name edit
    RenameArtifact(RenamePayload),
    /// Description edit
    RedescribeArtifact(RedescribePayload),
    /// Ask the owner for bytes
    RequestTransfer(TransferRequestPayload),
    /// One slice of artifact data
    Chunk(ChunkPayload),
    /// Abandon an in-flight transfer
    CancelTransfer(CancelPayload),
    /// Transfer-level error report
    TransferError(TransferErrorPayload),
}

impl Message {
    /// The frame type byte for this message.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::AssignId(_) => MessageType::AssignId,
            Self::PeerJoined(_) => MessageType::PeerJoined,
            Self::PeerLeft(_) => MessageType::PeerLeft,
            Self::AdvertiseArtifact(_) => MessageType::AdvertiseArtifact,
            Self::RenameArtifact(_) => MessageType::RenameArtifact,
            Self::RedescribeArtifact(_) => MessageType::RedescribeArtifact,
            Self::RequestTransfer(_) => MessageType::RequestTransfer,
            Self::Chunk(_) => MessageType::Chunk,
            Self::CancelTransfer(_) => MessageType::CancelTransfer,
            Self::TransferError(_) => MessageType::TransferError,
        }
    }

    /// Encode the message to a framed byte buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if payload serialization fails or the payload
    /// exceeds the frame size limit.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = match self {
            Self::AssignId(p) => encode_payload(p)?,
            Self::PeerJoined(p) | Self::PeerLeft(p) => encode_payload(p)?,
            Self::AdvertiseArtifact(p) => encode_payload(p)?,
            Self::RenameArtifact(p) => encode_payload(p)?,
            Self::RedescribeArtifact(p) => encode_payload(p)?,
            Self::RequestTransfer(p) => encode_payload(p)?,
            Self::Chunk(p) => encode_chunk(p),
            Self::CancelTransfer(p) => encode_payload(p)?,
            Self::TransferError(p) => encode_payload(p)?,
        };

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::Protocol(format!(
                "payload too large: {} bytes",
                payload.len()
            )));
        }

        let header = FrameHeader {
            version: crate::PROTOCOL_VERSION,
            message_type: self.message_type(),
            payload_length: payload.len() as u32,
        };

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode a message from a framed byte buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed or the payload does not
    /// deserialize.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Protocol("frame shorter than header".to_string()));
        }

        let mut header_buf = [0u8; HEADER_SIZE];
        header_buf.copy_from_slice(&buf[..HEADER_SIZE]);
        let header = FrameHeader::decode(&header_buf)?;

        let payload = &buf[HEADER_SIZE..];
        if payload.len() != header.payload_length as usize {
            return Err(Error::Protocol(format!(
                "payload length mismatch: header says {}, frame has {}",
                header.payload_length,
                payload.len()
            )));
        }

        Ok(match header.message_type {
            MessageType::AssignId => Self::AssignId(decode_payload(payload)?),
            MessageType::PeerJoined => Self::PeerJoined(decode_payload(payload)?),
            MessageType::PeerLeft => Self::PeerLeft(decode_payload(payload)?),
            MessageType::AdvertiseArtifact => Self::AdvertiseArtifact(decode_payload(payload)?),
            MessageType::RenameArtifact => Self::RenameArtifact(decode_payload(payload)?),
            MessageType::RedescribeArtifact => Self::RedescribeArtifact(decode_payload(payload)?),
            MessageType::RequestTransfer => Self::RequestTransfer(decode_payload(payload)?),
            MessageType::Chunk => Self::Chunk(decode_chunk(payload)?),
            MessageType::CancelTransfer => Self::CancelTransfer(decode_payload(payload)?),
            MessageType::TransferError => Self::TransferError(decode_payload(payload)?),
        })
    }
}

/// Encode a message payload to JSON bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a message payload from JSON bytes.
///
/// # Errors
///
/// Returns an error if deserialization fails.
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a chunk payload (binary format).
///
/// Format: artifact id (16) | requester id (16) | offset (8) | checksum (8) | data
#[must_use]
pub fn encode_chunk(payload: &ChunkPayload) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHUNK_PREAMBLE + payload.data.len());
    buf.extend_from_slice(&payload.artifact_id.into_bytes());
    buf.extend_from_slice(&payload.requester_peer_id.into_bytes());
    buf.extend_from_slice(&payload.offset.to_be_bytes());
    buf.extend_from_slice(&payload.checksum.to_be_bytes());
    buf.extend_from_slice(&payload.data);
    buf
}

/// Decode a chunk payload (binary format).
///
/// # Errors
///
/// Returns an error if the payload is too short.
pub fn decode_chunk(data: &[u8]) -> Result<ChunkPayload> {
    if data.len() < CHUNK_PREAMBLE {
        return Err(Error::Protocol("chunk payload too short".to_string()));
    }

    let mut id_buf = [0u8; 16];

    id_buf.copy_from_slice(&data[0..16]);
    let artifact_id = ArtifactId::from_bytes(id_buf);

    id_buf.copy_from_slice(&data[16..32]);
    let requester_peer_id = PeerId::from_bytes(id_buf);

    let offset = u64::from_be_bytes([
        data[32], data[33], data[34], data[35], data[36], data[37], data[38], data[39],
    ]);
    let checksum = u64::from_be_bytes([
        data[40], data[41], data[42], data[43], data[44], data[45], data[46], data[47],
    ]);
    let chunk_data = data[CHUNK_PREAMBLE..].to_vec();

    Ok(ChunkPayload {
        artifact_id,
        requester_peer_id,
        offset,
        checksum,
        data: chunk_data,
    })
}
