//! # Peerbay Core Library
//!
//! `peerbay-core` provides the core functionality for Peerbay, a small-group
//! file sharing tool where peers advertise files and exchange their bytes
//! directly, using a lightweight hub only for identity and presence.
//!
//! ## Features
//!
//! - **Chunked transfers**: artifacts stream as fixed-size chunks, one
//!   cooperative task per requester, with per-transfer progress tracking
//! - **Exact completion detection**: a transfer completes when the received
//!   byte count equals the advertised size, never before
//! - **Idempotent re-downloads**: completed transfers keep their reassembled
//!   artifact and hand it back without moving bytes again
//! - **Last-write-wins metadata**: any peer may rename or redescribe an
//!   advertised artifact
//!
//! ## Modules
//!
//! - [`artifact`] - Artifact records, submission drafts, and result blobs
//! - [`channel`] - Message-oriented channel glue and the in-memory switchboard
//! - [`config`] - Transfer policy configuration
//! - [`node`] - Peer node: message dispatch and the share/download API
//! - [`peer`] - Peer identity and roster snapshots
//! - [`producer`] - Owner-side chunk producer
//! - [`protocol`] - PBAY wire protocol implementation
//! - [`reassembler`] - Requester-side chunk reassembly
//! - [`registry`] - Artifact directory and transfer session registry
//! - [`session`] - Transfer session state machine
//!
//! ## Example
//!
//! ```rust,ignore
//! use peerbay_core::node::PeerNode;
//!
//! // Share a file with the group
//! let artifact_id = node.share("notes.pdf", "meeting notes", "from tuesday").await?;
//!
//! // On another peer, ask the owner for the bytes
//! node.download(artifact_id).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_precision_loss)]

pub mod artifact;
pub mod channel;
pub mod config;
pub mod error;
pub mod node;
pub mod peer;
pub mod producer;
pub mod protocol;
pub mod reassembler;
pub mod registry;
pub mod session;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version for PBAY
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

/// Default chunk size for artifact transfers
pub const DEFAULT_CHUNK_SIZE: usize = 198_384;

/// Default inactivity window before a stalled session is abandoned
pub const DEFAULT_STALL_TIMEOUT_SECS: u64 = 60;
