//! Transfer policy configuration.
//!
//! The presentation layer supplies the chunk policy; the engine only
//! validates it. Chunk size is fixed for the lifetime of a session: the
//! completion check is raw byte-count equality, so resizing mid-session
//! would break it.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::MAX_CHUNK_DATA;

/// Configuration for transfer sessions.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Inactivity window after which a session is considered stalled
    pub stall_timeout: Duration,
    /// Verify per-chunk checksums on receipt
    pub verify_checksums: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            stall_timeout: Duration::from_secs(crate::DEFAULT_STALL_TIMEOUT_SECS),
            verify_checksums: true,
        }
    }
}

impl TransferConfig {
    /// Validate the chunk policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidChunkSize`] if the chunk size is zero or too
    /// large to fit in a single channel message.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidChunkSize {
                size: self.chunk_size,
                reason: "must be greater than zero",
            });
        }
        if self.chunk_size > MAX_CHUNK_DATA {
            return Err(Error::InvalidChunkSize {
                size: self.chunk_size,
                reason: "must fit in a single channel message",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TransferConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, crate::DEFAULT_CHUNK_SIZE);
        assert!(config.verify_checksums);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = TransferConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidChunkSize { size: 0, .. })
        ));
    }

    #[test]
    fn test_oversized_chunk_rejected() {
        let config = TransferConfig {
            chunk_size: MAX_CHUNK_DATA + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_chunk_size_accepted() {
        let config = TransferConfig {
            chunk_size: MAX_CHUNK_DATA,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
