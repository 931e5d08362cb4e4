//! Command dispatch
//!
//! [`CommandProcessor`] owns one channel's request state and turns every
//! physical packet into exactly one reply. All validation happens before a
//! handler runs: unknown instructions never reach a handler, and the signing
//! backend only ever sees a fully decoded request. Every fault is mapped to
//! a status word here; nothing escapes as a panic.

use crate::bip32::{Bip32Path, PathError};
use crate::cursor::{Cursor, CursorError};
use crate::decoder::{DecodeError, DecodeProgress, RequestDecoder, SignRequest};
use crate::envelope::{self, EnvelopeError, Ins, P1_CONFIRM, P1_FIRST, Packet};
use crate::reassembly::{Reassembler, ReassemblyError};
use crate::status::{Reply, StatusWord};
use thiserror::Error;

/// Feature flag bit reported by `GetAppConfiguration`: contract calldata
/// signing enabled
pub const FLAG_CONTRACT_DATA: u8 = 0x01;

/// Per-channel processing limits and policy
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Hard cap on one reassembled logical message
    pub max_message_size: usize,
    /// Hard cap on the decoded calldata length
    pub max_calldata_size: usize,
    /// Whether transactions with non-empty calldata are signed
    pub allow_contract_data: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024,
            max_calldata_size: 0xFFFF,
            allow_contract_data: true,
        }
    }
}

/// Backend errors, reported as status `0xB008`
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend could not derive a key for the path
    #[error("key derivation failed for {path}")]
    Derivation {
        /// Display form of the offending path
        path: String,
    },

    /// The backend refused or failed to sign
    #[error("signing failed: {0}")]
    Signing(String),
}

/// The opaque signing capability.
///
/// Implementations are invoked only after a request has been fully parsed
/// and validated; they never see wire bytes. Cryptography, key storage and
/// user confirmation live behind this seam, outside the command core.
pub trait SigningBackend {
    /// Public key for a derivation path
    fn public_key(&self, path: &Bip32Path) -> Result<Vec<u8>, BackendError>;

    /// Sign a precomputed 32-byte digest
    fn sign_hash(&self, path: &Bip32Path, digest: &[u8; 32]) -> Result<Vec<u8>, BackendError>;

    /// Sign a fully decoded transaction request
    fn sign_transaction(&self, request: &SignRequest) -> Result<Vec<u8>, BackendError>;
}

/// Aggregate fault type for one exchange
#[derive(Error, Debug)]
pub enum CommandError {
    /// Envelope validation failed
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Reassembly failed
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),

    /// Request decoding failed
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Single-packet body ended early
    #[error("truncated request body: {0}")]
    TruncatedBody(#[from] CursorError),

    /// Single-packet body has bytes left after its last field
    #[error("request body has {extra} unconsumed bytes")]
    TrailingBody {
        /// Unconsumed byte count
        extra: usize,
    },

    /// Derivation path rejected
    #[error(transparent)]
    Path(#[from] PathError),

    /// Continuation packet with no signing command in progress
    #[error("no signing command in progress")]
    UnexpectedContinuation,

    /// Non-empty calldata while contract data signing is disabled
    #[error("contract calldata signing is disabled")]
    ContractDataDisabled,

    /// The signing backend failed
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl CommandError {
    /// The status word this fault is reported as
    #[must_use]
    pub fn status(&self) -> StatusWord {
        match self {
            CommandError::Envelope(e) => match e {
                EnvelopeError::PacketTooShort { .. } | EnvelopeError::BodyLengthMismatch { .. } => {
                    StatusWord::WrongDataLength
                }
                EnvelopeError::UnsupportedInstruction(_) => StatusWord::InsNotSupported,
                EnvelopeError::UnsupportedClass(_) => StatusWord::ClaNotSupported,
                EnvelopeError::InvalidParameters { .. } => StatusWord::WrongP1P2,
            },
            CommandError::Reassembly(ReassemblyError::Overflow { .. }) => {
                StatusWord::NotEnoughMemory
            }
            CommandError::Reassembly(ReassemblyError::SequenceError { .. })
            | CommandError::Decode(DecodeError::Failed)
            | CommandError::UnexpectedContinuation => StatusWord::BadState,
            CommandError::Decode(DecodeError::InvalidPath(_)) | CommandError::Path(_) => {
                StatusWord::InvalidPath
            }
            CommandError::Decode(DecodeError::CalldataTooLarge { .. }) => {
                StatusWord::NotEnoughMemory
            }
            CommandError::Decode(
                DecodeError::MalformedLengthPrefix | DecodeError::TrailingData { .. },
            )
            | CommandError::TruncatedBody(_)
            | CommandError::TrailingBody { .. }
            | CommandError::ContractDataDisabled => StatusWord::IncorrectData,
            CommandError::Backend(_) => StatusWord::SignFailure,
        }
    }
}

/// One in-flight multi-packet signing command
struct InFlight {
    reassembler: Reassembler,
    decoder: RequestDecoder,
}

/// Processes the APDU stream of a single channel.
///
/// Each channel (connection, emulator session, ...) gets its own instance;
/// the in-flight request state is exclusively owned and never shared.
pub struct CommandProcessor<B> {
    backend: B,
    config: ProcessorConfig,
    in_flight: Option<InFlight>,
}

impl<B: SigningBackend> CommandProcessor<B> {
    /// Processor with default limits
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, ProcessorConfig::default())
    }

    /// Processor with explicit limits and policy
    pub fn with_config(backend: B, config: ProcessorConfig) -> Self {
        Self {
            backend,
            config,
            in_flight: None,
        }
    }

    /// Discard all in-progress request state.
    ///
    /// Safe at any point; the next packet starts from a clean slate exactly
    /// as on a freshly constructed processor.
    pub fn reset(&mut self) {
        self.in_flight = None;
    }

    /// Handle one physical packet and produce exactly one reply.
    ///
    /// Total over all inputs: every fault is reported as a status word, and
    /// any fault destroys the in-progress request state so no partial parse
    /// survives into the next command.
    pub fn handle_packet(&mut self, raw: &[u8]) -> Reply {
        match self.process(raw) {
            Ok(reply) => reply,
            Err(e) => {
                self.in_flight = None;
                log::debug!("rejecting packet ({}): {e}", hex::encode(raw));
                Reply::status(e.status())
            }
        }
    }

    fn process(&mut self, raw: &[u8]) -> Result<Reply, CommandError> {
        let packet = envelope::parse_packet(raw)?;
        log::debug!(
            "<= {:?} P1=0x{:02X} P2=0x{:02X} LC={}",
            packet.ins,
            packet.p1,
            packet.p2,
            packet.data.len()
        );

        match packet.ins {
            Ins::GetVersion => {
                self.in_flight = None;
                Self::expect_empty_body(&packet)?;
                Ok(Reply::ok(version_bytes().to_vec()))
            }
            Ins::GetAppConfiguration => {
                self.in_flight = None;
                Self::expect_empty_body(&packet)?;
                let flags = if self.config.allow_contract_data {
                    FLAG_CONTRACT_DATA
                } else {
                    0
                };
                let [major, minor, patch] = version_bytes();
                Ok(Reply::ok(vec![flags, major, minor, patch]))
            }
            Ins::GetPublicKey => {
                self.in_flight = None;
                self.handle_get_public_key(&packet)
            }
            Ins::SignHash => {
                self.in_flight = None;
                self.handle_sign_hash(&packet)
            }
            Ins::SignTransaction => self.handle_sign_transaction(&packet),
        }
    }

    fn expect_empty_body(packet: &Packet<'_>) -> Result<(), CommandError> {
        if packet.data.is_empty() {
            Ok(())
        } else {
            Err(CommandError::TrailingBody {
                extra: packet.data.len(),
            })
        }
    }

    fn handle_get_public_key(&self, packet: &Packet<'_>) -> Result<Reply, CommandError> {
        let mut cursor = Cursor::new(packet.data);
        let path = Bip32Path::read(&mut cursor)??;
        if cursor.remaining() != 0 {
            return Err(CommandError::TrailingBody {
                extra: cursor.remaining(),
            });
        }
        if packet.p1 == P1_CONFIRM {
            // Confirmation UI is outside this core; the flag is accepted and
            // recorded so a surrounding application can act on it.
            log::info!("public key request for {path} (confirmation requested)");
        }
        let key = self.backend.public_key(&path)?;
        Ok(Reply::ok(key))
    }

    fn handle_sign_hash(&self, packet: &Packet<'_>) -> Result<Reply, CommandError> {
        let mut cursor = Cursor::new(packet.data);
        let path = Bip32Path::read(&mut cursor)??;
        let digest: [u8; 32] = cursor.read_array()?;
        if cursor.remaining() != 0 {
            return Err(CommandError::TrailingBody {
                extra: cursor.remaining(),
            });
        }
        log::info!("signing digest for {path}");
        let signature = self.backend.sign_hash(&path, &digest)?;
        Ok(Reply::ok(signature))
    }

    fn handle_sign_transaction(&mut self, packet: &Packet<'_>) -> Result<Reply, CommandError> {
        let flight = if packet.p1 == P1_FIRST {
            // A first chunk always starts a fresh logical request; whatever
            // was in flight is destroyed, never silently retained.
            self.in_flight = None;
            InFlight {
                reassembler: Reassembler::begin(
                    packet.cla,
                    packet.ins,
                    self.config.max_message_size,
                ),
                decoder: RequestDecoder::new(self.config.max_calldata_size),
            }
        } else {
            self.in_flight
                .take()
                .ok_or(CommandError::UnexpectedContinuation)?
        };
        self.advance_flight(flight, packet)
    }

    fn advance_flight(
        &mut self,
        mut flight: InFlight,
        packet: &Packet<'_>,
    ) -> Result<Reply, CommandError> {
        flight
            .reassembler
            .feed(packet.cla, packet.ins, packet.data)?;
        match flight.decoder.advance(flight.reassembler.buffer())? {
            DecodeProgress::NeedMore => {
                // Chunk accepted; the protocol's "more data expected" answer
                // is a bare success status.
                self.in_flight = Some(flight);
                Ok(Reply::status(StatusWord::Ok))
            }
            DecodeProgress::Complete => {
                let request = flight
                    .decoder
                    .take_request()
                    .ok_or(CommandError::Decode(DecodeError::Failed))?;
                self.finish_sign(&request)
            }
        }
    }

    fn finish_sign(&self, request: &SignRequest) -> Result<Reply, CommandError> {
        if !self.config.allow_contract_data && !request.calldata.is_empty() {
            return Err(CommandError::ContractDataDisabled);
        }
        log::info!(
            "signing transaction for {} (nonce {}, {} bytes calldata)",
            request.path,
            request.header.nonce,
            request.calldata.len()
        );
        let signature = self.backend.sign_transaction(request)?;
        Ok(Reply::ok(signature))
    }
}

/// `[major, minor, patch]` of this application
#[must_use]
pub fn version_bytes() -> [u8; 3] {
    let mut parts = crate::VERSION
        .split('.')
        .map(|part| part.parse::<u8>().unwrap_or(0));
    [
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    ]
}
