//! Multi-packet reassembly
//!
//! A signing command may span several physical packets. The reassembler owns
//! the logical command buffer for the duration of one command: it pins the
//! command identity (CLA, INS) at the first packet, appends continuation
//! payloads, and enforces the hard message-size cap. Deciding whether enough
//! bytes have arrived is the decoder's job; the amount needed can depend on
//! bytes that are themselves still being parsed.

use crate::envelope::Ins;
use thiserror::Error;

/// Reassembly errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Accumulated bytes would exceed the maximum logical message size
    #[error("logical message too large: {size} bytes exceeds maximum {max}")]
    Overflow {
        /// Size the buffer would have grown to
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// Continuation packet carries a different identity than the command it
    /// would extend
    #[error("continuation for (0x{got_cla:02X}, {got_ins:?}) does not match in-progress (0x{want_cla:02X}, {want_ins:?})")]
    SequenceError {
        /// Class byte of the in-progress command
        want_cla: u8,
        /// Instruction of the in-progress command
        want_ins: Ins,
        /// Class byte of the offending packet
        got_cla: u8,
        /// Instruction of the offending packet
        got_ins: Ins,
    },
}

/// Result type for reassembly operations
pub type Result<T> = std::result::Result<T, ReassemblyError>;

/// Accumulates the payload of one logical command
#[derive(Debug)]
pub struct Reassembler {
    cla: u8,
    ins: Ins,
    buf: Vec<u8>,
    max: usize,
}

impl Reassembler {
    /// Start a new logical command owned by `(cla, ins)`
    #[must_use]
    pub fn begin(cla: u8, ins: Ins, max_message_size: usize) -> Self {
        Self {
            cla,
            ins,
            buf: Vec::new(),
            max: max_message_size,
        }
    }

    /// Append one packet's payload.
    ///
    /// Fails with [`ReassemblyError::SequenceError`] when the packet identity
    /// differs from the command begun, and [`ReassemblyError::Overflow`] when
    /// the buffer would grow past the configured maximum. On failure the
    /// buffer is left unchanged; the caller destroys the whole command state.
    pub fn feed(&mut self, cla: u8, ins: Ins, chunk: &[u8]) -> Result<()> {
        if cla != self.cla || ins != self.ins {
            return Err(ReassemblyError::SequenceError {
                want_cla: self.cla,
                want_ins: self.ins,
                got_cla: cla,
                got_ins: ins,
            });
        }
        let size = self.buf.len() + chunk.len();
        if size > self.max {
            return Err(ReassemblyError::Overflow {
                size,
                max: self.max,
            });
        }
        self.buf.extend_from_slice(chunk);
        log::debug!(
            "reassembled {} bytes for {:?} ({} total)",
            chunk.len(),
            self.ins,
            self.buf.len()
        );
        Ok(())
    }

    /// The accumulated logical command buffer
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Accumulated length so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been accumulated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Identity the command was begun with
    #[must_use]
    pub fn identity(&self) -> (u8, Ins) {
        (self.cla, self.ins)
    }
}
