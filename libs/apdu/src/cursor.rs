//! Bounds-checked forward-only reader over a single message buffer
//!
//! Every read either returns exactly the requested bytes or fails with
//! [`CursorError::Truncated`] leaving the cursor unmoved. All higher layers
//! rely on this invariant to stay free of out-of-bounds access: nothing in
//! the crate indexes a wire buffer directly.

use thiserror::Error;

/// Cursor errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorError {
    /// Not enough bytes left in the buffer to satisfy the read
    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the read required
        needed: usize,
        /// Bytes remaining in the buffer
        available: usize,
    },
}

/// Result type for cursor operations
pub type Result<T> = std::result::Result<T, CursorError>;

/// Forward-only reader over a borrowed byte buffer
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor at the start of `buf`
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Read exactly `n` bytes, advancing the cursor
    pub fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CursorError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        let slice = self.read_exact(1)?;
        Ok(slice[0])
    }

    /// Read a big-endian u32
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Read a fixed-size byte array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.read_exact(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}
