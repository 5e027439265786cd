//! Owner-side chunk producer.
//!
//! One producer task runs per (artifact, requester) pair. Each task keeps
//! its own offset cursor over the shared, read-only source bytes, so
//! concurrent requesters of the same artifact stream independently with no
//! shared mutable state.
//!
//! The loop is a push: no acknowledgment is awaited before the next chunk.
//! The bounded channel send and an explicit yield between chunks keep the
//! scheduler free to interleave other transfers and message handling rather
//! than serializing behind one large copy loop.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::artifact::ArtifactId;
use crate::channel::Envelope;
use crate::error::{Error, Result};
use crate::peer::PeerId;
use crate::protocol::{ChunkPayload, Message};
use crate::registry::TransferRegistry;
use crate::session::SessionKey;

/// Streams one artifact's bytes to one requester in fixed-size chunks.
pub struct ChunkProducer {
    registry: Arc<Mutex<TransferRegistry>>,
    outbound: mpsc::Sender<Envelope>,
    chunk_size: usize,
}

impl ChunkProducer {
    /// Create a producer with the given chunk policy.
    #[must_use]
    pub fn new(
        registry: Arc<Mutex<TransferRegistry>>,
        outbound: mpsc::Sender<Envelope>,
        chunk_size: usize,
    ) -> Self {
        Self {
            registry,
            outbound,
            chunk_size,
        }
    }

    /// Spawn the send loop for one (artifact, requester) pair.
    ///
    /// The task resolves to the number of bytes handed to the channel. A
    /// closed channel stops the loop early with the error logged; the remote
    /// session is left to its own stall detector.
    pub fn spawn(
        self,
        artifact_id: ArtifactId,
        requester: PeerId,
        source: Arc<[u8]>,
    ) -> JoinHandle<Result<u64>> {
        tokio::spawn(async move {
            match self.stream(artifact_id, requester, source).await {
                Ok(sent) => {
                    debug!(%artifact_id, %requester, sent, "chunk stream finished");
                    Ok(sent)
                }
                Err(e) => {
                    error!(%artifact_id, %requester, error = %e, "chunk stream failed");
                    Err(e)
                }
            }
        })
    }

    async fn stream(
        &self,
        artifact_id: ArtifactId,
        requester: PeerId,
        source: Arc<[u8]>,
    ) -> Result<u64> {
        let key = SessionKey {
            artifact_id,
            requester,
        };
        let mut offset: usize = 0;

        while offset < source.len() {
            {
                let registry = self.registry.lock().await;
                if !registry.is_live(&key) {
                    debug!(%artifact_id, %requester, offset, "session abandoned, producer stopping");
                    return Ok(offset as u64);
                }
            }

            let end = usize::min(offset + self.chunk_size, source.len());
            let chunk = ChunkPayload::new(
                artifact_id,
                requester,
                offset as u64,
                source[offset..end].to_vec(),
            );
            let len = (end - offset) as u64;

            self.outbound
                .send(Envelope::to_peer(requester, Message::Chunk(chunk)))
                .await
                .map_err(|_| Error::ChannelClosed)?;

            {
                let mut registry = self.registry.lock().await;
                registry.record_delivered(&key, len);
            }

            offset = end;
            tokio::task::yield_now().await;
        }

        Ok(offset as u64)
    }
}
