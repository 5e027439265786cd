//! Requester-side chunk reassembly.
//!
//! The reassembler accumulates chunks for one transfer session and detects
//! completion. Every chunk carries its byte offset, so placement is by
//! offset rather than arrival order; the channel still delivers per-pair in
//! order, but the offset map turns that assumption into something checkable.
//!
//! Completion is raw byte-count equality against the size declared at
//! request time. There is no end-of-stream marker and no retransmission: a
//! rejected or missing chunk simply leaves the session short of its total.

use std::collections::BTreeMap;

use tracing::warn;

use crate::artifact::{ArtifactBlob, ArtifactId};
use crate::error::{Error, Result};
use crate::protocol::xxhash64;

/// Outcome of feeding one chunk to the reassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyStatus {
    /// Chunk accepted; cumulative bytes received so far
    InProgress(u64),
    /// Cumulative bytes now equal the declared size
    Complete,
    /// Chunk at this offset was already accepted; dropped
    Duplicate,
}

/// Accumulates chunks for a single (artifact, requester) pair.
#[derive(Debug)]
pub struct ChunkReassembler {
    expected_size: u64,
    bytes_received: u64,
    chunks: BTreeMap<u64, Vec<u8>>,
    verify_checksums: bool,
}

impl ChunkReassembler {
    /// Create a reassembler for an artifact of the given declared size.
    #[must_use]
    pub fn new(expected_size: u64, verify_checksums: bool) -> Self {
        Self {
            expected_size,
            bytes_received: 0,
            chunks: BTreeMap::new(),
            verify_checksums,
        }
    }

    /// Cumulative bytes accepted so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// The size declared at request time.
    #[must_use]
    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    /// Accept one chunk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChunkChecksum`] if verification is enabled and the
    /// payload does not match its checksum, [`Error::ChunkOverrun`] if the
    /// chunk would run past the declared size, and a protocol error if it
    /// overlaps a previously accepted chunk. The failing chunk is discarded
    /// in every case; already-accepted bytes are untouched.
    pub fn accept(
        &mut self,
        artifact_id: ArtifactId,
        offset: u64,
        checksum: u64,
        data: Vec<u8>,
    ) -> Result<ReassemblyStatus> {
        if self.chunks.contains_key(&offset) {
            warn!(%artifact_id, offset, "duplicate chunk dropped");
            return Ok(ReassemblyStatus::Duplicate);
        }

        if self.verify_checksums && xxhash64(&data) != checksum {
            return Err(Error::ChunkChecksum {
                artifact_id,
                offset,
            });
        }

        let len = data.len() as u64;
        let end = offset + len;
        if end > self.expected_size {
            return Err(Error::ChunkOverrun {
                offset,
                declared: self.expected_size,
                excess: end - self.expected_size,
            });
        }

        if let Some((prev_offset, prev_data)) = self.chunks.range(..offset).next_back() {
            if prev_offset + prev_data.len() as u64 > offset {
                return Err(Error::Protocol(format!(
                    "chunk at offset {offset} overlaps an earlier chunk"
                )));
            }
        }
        if let Some((next_offset, _)) = self.chunks.range(offset..).next() {
            if end > *next_offset {
                return Err(Error::Protocol(format!(
                    "chunk at offset {offset} overlaps a later chunk"
                )));
            }
        }

        self.chunks.insert(offset, data);
        self.bytes_received += len;

        if self.bytes_received == self.expected_size {
            Ok(ReassemblyStatus::Complete)
        } else {
            Ok(ReassemblyStatus::InProgress(self.bytes_received))
        }
    }

    /// Concatenate the accepted chunks in offset order into a result blob,
    /// releasing the accumulation buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChunkGap`] if the offsets do not tile the declared
    /// size. Unreachable when the overrun and overlap checks held for every
    /// accepted chunk; kept as a final invariant check on the channel's
    /// ordering contract.
    pub fn into_blob(self) -> Result<ArtifactBlob> {
        let mut assembled = Vec::with_capacity(usize::try_from(self.expected_size).unwrap_or(0));
        let mut next_offset = 0u64;

        for (offset, data) in self.chunks {
            if offset != next_offset {
                return Err(Error::ChunkGap(next_offset));
            }
            next_offset += data.len() as u64;
            assembled.extend_from_slice(&data);
        }

        if next_offset != self.expected_size {
            return Err(Error::ChunkGap(next_offset));
        }

        Ok(ArtifactBlob::from_bytes(assembled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(data: &[u8]) -> (u64, Vec<u8>) {
        (xxhash64(data), data.to_vec())
    }

    #[test]
    fn test_single_chunk_completes() {
        let id = ArtifactId::generate();
        let mut r = ChunkReassembler::new(5, true);

        let (sum, data) = chunk(b"hello");
        let status = r.accept(id, 0, sum, data).expect("accept");
        assert_eq!(status, ReassemblyStatus::Complete);

        let blob = r.into_blob().expect("blob");
        assert_eq!(blob.as_bytes(), b"hello");
    }

    #[test]
    fn test_many_small_chunks_complete_exactly_on_last() {
        let id = ArtifactId::generate();
        let content: Vec<u8> = (0..=255).collect();
        let mut r = ChunkReassembler::new(content.len() as u64, true);

        for (i, piece) in content.chunks(16).enumerate() {
            let offset = (i * 16) as u64;
            let (sum, data) = chunk(piece);
            let status = r.accept(id, offset, sum, data).expect("accept");
            if offset + piece.len() as u64 == content.len() as u64 {
                assert_eq!(status, ReassemblyStatus::Complete);
            } else {
                assert_eq!(
                    status,
                    ReassemblyStatus::InProgress(offset + piece.len() as u64)
                );
            }
        }

        let blob = r.into_blob().expect("blob");
        assert_eq!(blob.as_bytes(), content.as_slice());
    }

    #[test]
    fn test_cumulative_sums_to_exact_total() {
        // 100_000 bytes in 32_384-byte chunks: [32384, 32384, 32384, 2848]
        let id = ArtifactId::generate();
        let content = vec![7u8; 100_000];
        let mut r = ChunkReassembler::new(100_000, true);

        let mut statuses = Vec::new();
        for (i, piece) in content.chunks(32_384).enumerate() {
            let (sum, data) = chunk(piece);
            statuses.push(r.accept(id, (i * 32_384) as u64, sum, data).expect("accept"));
        }

        assert_eq!(
            statuses,
            vec![
                ReassemblyStatus::InProgress(32_384),
                ReassemblyStatus::InProgress(64_768),
                ReassemblyStatus::InProgress(97_152),
                ReassemblyStatus::Complete,
            ]
        );
    }

    #[test]
    fn test_duplicate_offset_dropped() {
        let id = ArtifactId::generate();
        let mut r = ChunkReassembler::new(10, true);

        let (sum, data) = chunk(b"abcde");
        r.accept(id, 0, sum, data.clone()).expect("accept");
        let status = r.accept(id, 0, sum, data).expect("duplicate");

        assert_eq!(status, ReassemblyStatus::Duplicate);
        assert_eq!(r.bytes_received(), 5);
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let id = ArtifactId::generate();
        let mut r = ChunkReassembler::new(10, true);

        let result = r.accept(id, 0, 0xDEAD_BEEF, b"abcde".to_vec());
        assert!(matches!(result, Err(Error::ChunkChecksum { .. })));
        assert_eq!(r.bytes_received(), 0);
    }

    #[test]
    fn test_checksum_ignored_when_disabled() {
        let id = ArtifactId::generate();
        let mut r = ChunkReassembler::new(5, false);

        let status = r.accept(id, 0, 0xDEAD_BEEF, b"abcde".to_vec()).expect("accept");
        assert_eq!(status, ReassemblyStatus::Complete);
    }

    #[test]
    fn test_overrun_rejected() {
        let id = ArtifactId::generate();
        let mut r = ChunkReassembler::new(4, true);

        let (sum, data) = chunk(b"abcde");
        let result = r.accept(id, 0, sum, data);
        assert!(matches!(
            result,
            Err(Error::ChunkOverrun {
                declared: 4,
                excess: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_overlap_rejected() {
        let id = ArtifactId::generate();
        let mut r = ChunkReassembler::new(20, true);

        let (sum, data) = chunk(b"0123456789");
        r.accept(id, 0, sum, data).expect("accept");

        let (sum, data) = chunk(b"xxxxx");
        let result = r.accept(id, 5, sum, data);
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(r.bytes_received(), 10);
    }

    #[test]
    fn test_out_of_order_placement() {
        // Offsets make arrival order irrelevant.
        let id = ArtifactId::generate();
        let mut r = ChunkReassembler::new(10, true);

        let (sum_tail, tail) = chunk(b"56789");
        let (sum_head, head) = chunk(b"01234");

        r.accept(id, 5, sum_tail, tail).expect("tail");
        let status = r.accept(id, 0, sum_head, head).expect("head");
        assert_eq!(status, ReassemblyStatus::Complete);

        let blob = r.into_blob().expect("blob");
        assert_eq!(blob.as_bytes(), b"0123456789");
    }

    #[test]
    fn test_into_blob_rejects_short_assembly() {
        let mut r = ChunkReassembler::new(10, true);
        let id = ArtifactId::generate();

        let (sum, data) = chunk(b"01234");
        r.accept(id, 0, sum, data).expect("accept");

        assert!(matches!(r.into_blob(), Err(Error::ChunkGap(5))));
    }
}
