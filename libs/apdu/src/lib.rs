//! APDU command-processing core for the Signet hardware signer
//!
//! This crate is the part of the signer that faces the wire: it receives
//! smart-card style APDU packets from an untrusted host, validates the
//! envelope, reassembles multi-packet signing commands, incrementally
//! decodes the structured request, and answers every exchange with exactly
//! one status word. Cryptographic signing is an opaque capability behind the
//! [`dispatch::SigningBackend`] trait; it is only ever invoked with a fully
//! decoded, validated request.
//!
//! # Safety Properties
//!
//! - No wire input can cause an out-of-bounds read: every buffer access goes
//!   through the bounds-checked [`cursor::Cursor`].
//! - No wire input can cause a panic: faults are typed errors mapped to
//!   status words in [`dispatch`].
//! - No partial parse survives an error: any fault destroys the in-progress
//!   request state before the reply is emitted.
//! - Packet boundaries are arbitrary: the [`decoder`] resumes at field
//!   granularity, including inside the variable-width calldata length
//!   prefix.
//!
//! # Example Usage
//!
//! ```rust
//! use signet_apdu::dispatch::CommandProcessor;
//! use signet_apdu::status::StatusWord;
//! use signet_apdu::test_utils::TestBackend;
//!
//! let mut processor = CommandProcessor::new(TestBackend::new());
//!
//! // CLA 0xE0, INS 0x00 (GetVersion), P1=P2=0, empty body
//! let reply = processor.handle_packet(&[0xE0, 0x00, 0x00, 0x00, 0x00]);
//! assert_eq!(reply.status, StatusWord::Ok);
//! assert_eq!(reply.data.len(), 3);
//!
//! // Unknown instructions are rejected without touching the body
//! let reply = processor.handle_packet(&[0xE0, 0x77, 0x00, 0x00, 0x00]);
//! assert_eq!(reply.status, StatusWord::InsNotSupported);
//! ```

#![warn(missing_docs)]

pub mod bip32;
pub mod cursor;
pub mod decoder;
pub mod dispatch;
pub mod envelope;
pub mod reassembly;
pub mod server;
pub mod status;
/// Test utilities: request builders and a deterministic backend
pub mod test_utils;

// Re-export commonly used types
pub use bip32::{Bip32Path, PathError};
pub use cursor::{Cursor, CursorError};
pub use decoder::{DecodeError, DecodeProgress, RequestDecoder, SignRequest, TxHeader};
pub use dispatch::{
    BackendError, CommandError, CommandProcessor, ProcessorConfig, SigningBackend,
};
pub use envelope::{CLA, EnvelopeError, Ins, Packet};
pub use reassembly::{Reassembler, ReassemblyError};
pub use server::{ApduServer, ServerError};
pub use status::{Reply, StatusWord};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
