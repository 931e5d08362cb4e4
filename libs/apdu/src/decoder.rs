//! Resumable signing-request decoder
//!
//! Decodes the structured body of a signing command from the reassembled
//! logical buffer: derivation path, fixed transaction header fields, then a
//! length-prefixed calldata blob. Transport packet boundaries are arbitrary
//! relative to field boundaries, so the decoder is an explicit state machine
//! with a committed byte offset: a field that cannot be read yet leaves both
//! state and offset untouched, and the next [`RequestDecoder::advance`]
//! resumes exactly where parsing paused.
//!
//! The calldata length prefix is the delicate case. It is variable-width (a
//! length-of-length byte followed by that many big-endian length bytes) and
//! may itself be split anywhere; its state variant carries a byte-granular
//! accumulator so partial length bytes are committed as they arrive.

use crate::bip32::{Bip32Path, PathError};
use crate::cursor::Cursor;
use thiserror::Error;

/// Fixed transaction header size on the wire
pub const TX_HEADER_LEN: usize = 33;

/// Decoder errors. All of them are fatal to the logical request; the
/// recoverable "not enough bytes yet" case is signalled through
/// [`DecodeProgress::NeedMore`] instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Derivation path empty or too deep
    #[error("invalid derivation path: {0}")]
    InvalidPath(#[from] PathError),

    /// Length prefix uses a non-minimal encoding
    #[error("malformed calldata length prefix: leading zero length byte")]
    MalformedLengthPrefix,

    /// Decoded calldata length above the configured maximum
    #[error("calldata too large: {size} bytes exceeds maximum {max}")]
    CalldataTooLarge {
        /// Decoded length (saturated at `u64::MAX` when the prefix overflows)
        size: u64,
        /// Configured maximum
        max: usize,
    },

    /// Bytes remain in the buffer after the request is complete
    #[error("trailing data after request: {extra} bytes")]
    TrailingData {
        /// Number of unconsumed bytes
        extra: usize,
    },

    /// The decoder already failed; no further input is accepted
    #[error("decoder in failed state")]
    Failed,
}

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Outcome of one decoding pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeProgress {
    /// Parsing paused at a field boundary; more bytes are required
    NeedMore,
    /// The request is fully decoded and available via
    /// [`RequestDecoder::take_request`]
    Complete,
}

/// Fixed transaction header fields, 33 bytes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxHeader {
    /// Transaction format version byte
    pub version: u8,
    /// Sender account nonce
    pub nonce: u32,
    /// Fee per gas unit
    pub gas_price: u32,
    /// Gas ceiling for execution
    pub gas_limit: u32,
    /// Recipient account
    pub recipient: [u8; 20],
}

impl TxHeader {
    fn read(cursor: &mut Cursor<'_>) -> std::result::Result<Self, crate::cursor::CursorError> {
        Ok(Self {
            version: cursor.read_u8()?,
            nonce: cursor.read_u32()?,
            gas_price: cursor.read_u32()?,
            gas_limit: cursor.read_u32()?,
            recipient: cursor.read_array()?,
        })
    }

    /// Serialize in wire order
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TX_HEADER_LEN);
        out.push(self.version);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&self.gas_price.to_be_bytes());
        out.extend_from_slice(&self.gas_limit.to_be_bytes());
        out.extend_from_slice(&self.recipient);
        out
    }
}

/// A fully decoded, validated signing request.
///
/// Instances only exist once every field has been decoded; partially parsed
/// requests are never observable outside the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    /// Key derivation path
    pub path: Bip32Path,
    /// Fixed transaction header fields
    pub header: TxHeader,
    /// Contract call data, possibly empty
    pub calldata: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Path,
    TxFields,
    CalldataLenOfLen,
    CalldataLen {
        remaining: u8,
        value: u64,
        leading_zero: bool,
        overflowed: bool,
    },
    CalldataBody {
        len: usize,
    },
    Complete,
    Failed,
}

/// Incremental decoder for one signing request
#[derive(Debug)]
pub struct RequestDecoder {
    state: ParseState,
    pos: usize,
    max_calldata: usize,
    path: Option<Bip32Path>,
    header: Option<TxHeader>,
    request: Option<SignRequest>,
}

impl RequestDecoder {
    /// Fresh decoder positioned at the start of the logical buffer
    #[must_use]
    pub fn new(max_calldata_size: usize) -> Self {
        Self {
            state: ParseState::Path,
            pos: 0,
            max_calldata: max_calldata_size,
            path: None,
            header: None,
            request: None,
        }
    }

    /// True once the request is fully decoded
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Complete
    }

    /// Committed parse position within the logical buffer
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Resume decoding against the (re)grown logical buffer.
    ///
    /// `buf` must be the same logical command buffer as on previous calls,
    /// possibly extended; the decoder resumes from its committed offset.
    /// Fatal errors poison the decoder permanently.
    pub fn advance(&mut self, buf: &[u8]) -> Result<DecodeProgress> {
        loop {
            match self.state {
                ParseState::Path => {
                    let mut cursor = Cursor::new(buf.get(self.pos..).unwrap_or(&[]));
                    match Bip32Path::read(&mut cursor) {
                        Err(_) => return Ok(DecodeProgress::NeedMore),
                        Ok(Err(e)) => return self.fail(e.into()),
                        Ok(Ok(path)) => {
                            self.pos += cursor.position();
                            log::debug!("decoded derivation path {path}");
                            self.path = Some(path);
                            self.state = ParseState::TxFields;
                        }
                    }
                }
                ParseState::TxFields => {
                    let mut cursor = Cursor::new(buf.get(self.pos..).unwrap_or(&[]));
                    match TxHeader::read(&mut cursor) {
                        Err(_) => return Ok(DecodeProgress::NeedMore),
                        Ok(header) => {
                            self.pos += cursor.position();
                            self.header = Some(header);
                            self.state = ParseState::CalldataLenOfLen;
                        }
                    }
                }
                ParseState::CalldataLenOfLen => {
                    let Some(&len_of_len) = buf.get(self.pos) else {
                        return Ok(DecodeProgress::NeedMore);
                    };
                    self.pos += 1;
                    self.state = if len_of_len == 0 {
                        ParseState::CalldataBody { len: 0 }
                    } else {
                        ParseState::CalldataLen {
                            remaining: len_of_len,
                            value: 0,
                            leading_zero: false,
                            overflowed: false,
                        }
                    };
                }
                ParseState::CalldataLen {
                    mut remaining,
                    mut value,
                    mut leading_zero,
                    mut overflowed,
                } => {
                    // Byte-granular accumulation: each length byte is
                    // committed as it arrives, so a prefix split anywhere
                    // across packets resumes without re-reading.
                    while remaining > 0 {
                        let Some(&byte) = buf.get(self.pos) else {
                            self.state = ParseState::CalldataLen {
                                remaining,
                                value,
                                leading_zero,
                                overflowed,
                            };
                            return Ok(DecodeProgress::NeedMore);
                        };
                        self.pos += 1;
                        remaining -= 1;
                        if value == 0 && byte == 0 {
                            leading_zero = true;
                        }
                        if value > u64::MAX >> 8 {
                            overflowed = true;
                            value = u64::MAX;
                        } else {
                            value = (value << 8) | u64::from(byte);
                        }
                    }
                    if leading_zero {
                        return self.fail(DecodeError::MalformedLengthPrefix);
                    }
                    if overflowed || value > self.max_calldata as u64 {
                        return self.fail(DecodeError::CalldataTooLarge {
                            size: value,
                            max: self.max_calldata,
                        });
                    }
                    self.state = ParseState::CalldataBody { len: value as usize };
                }
                ParseState::CalldataBody { len } => {
                    if buf.len().saturating_sub(self.pos) < len {
                        return Ok(DecodeProgress::NeedMore);
                    }
                    let calldata = buf[self.pos..self.pos + len].to_vec();
                    self.pos += len;
                    if self.pos != buf.len() {
                        return self.fail(DecodeError::TrailingData {
                            extra: buf.len() - self.pos,
                        });
                    }
                    // Both fields were committed by earlier states; a miss
                    // here would be an internal accounting bug, not wire
                    // input, so poisoning the decoder is the safe answer.
                    let (Some(path), Some(header)) = (self.path.take(), self.header) else {
                        return self.fail(DecodeError::Failed);
                    };
                    self.request = Some(SignRequest {
                        path,
                        header,
                        calldata,
                    });
                    self.state = ParseState::Complete;
                    return Ok(DecodeProgress::Complete);
                }
                ParseState::Complete => return Ok(DecodeProgress::Complete),
                ParseState::Failed => return Err(DecodeError::Failed),
            }
        }
    }

    /// Hand off the decoded request, leaving the decoder complete but empty
    pub fn take_request(&mut self) -> Option<SignRequest> {
        self.request.take()
    }

    fn fail(&mut self, err: DecodeError) -> Result<DecodeProgress> {
        self.state = ParseState::Failed;
        self.path = None;
        self.header = None;
        self.request = None;
        Err(err)
    }
}
