//! BIP32 derivation paths
//!
//! On the wire a path is a component-count byte followed by that many 4-byte
//! big-endian components. The count is validated before any component is
//! read, so an absurd depth never causes work proportional to the claim.

use crate::cursor::Cursor;
use std::fmt;
use thiserror::Error;

/// Deepest derivation path the application accepts
pub const MAX_PATH_DEPTH: usize = 10;

/// Hardened derivation flag
pub const HARDENED: u32 = 0x8000_0000;

/// Derivation path errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    /// Component count above [`MAX_PATH_DEPTH`]
    #[error("derivation path too deep: {depth} components, maximum {MAX_PATH_DEPTH}")]
    TooDeep {
        /// Claimed component count
        depth: usize,
    },

    /// A path must have at least one component
    #[error("derivation path is empty")]
    Empty,
}

/// Ordered sequence of unsigned 32-bit derivation components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bip32Path {
    components: Vec<u32>,
}

impl Bip32Path {
    /// Build a path from raw components, enforcing the depth bounds
    pub fn new(components: Vec<u32>) -> Result<Self, PathError> {
        if components.is_empty() {
            return Err(PathError::Empty);
        }
        if components.len() > MAX_PATH_DEPTH {
            return Err(PathError::TooDeep {
                depth: components.len(),
            });
        }
        Ok(Self { components })
    }

    /// Validate a component count read off the wire before the components
    /// themselves are available
    pub fn check_depth(depth: usize) -> Result<(), PathError> {
        if depth == 0 {
            return Err(PathError::Empty);
        }
        if depth > MAX_PATH_DEPTH {
            return Err(PathError::TooDeep { depth });
        }
        Ok(())
    }

    /// Parse `count | component*` from the cursor.
    ///
    /// The error type is layered: `Ok(Err(_))` is a malformed path,
    /// `Err(Truncated)` means the buffer simply ends early.
    pub fn read(
        cursor: &mut Cursor<'_>,
    ) -> Result<Result<Self, PathError>, crate::cursor::CursorError> {
        let depth = cursor.read_u8()? as usize;
        if let Err(e) = Self::check_depth(depth) {
            return Ok(Err(e));
        }
        let mut components = Vec::with_capacity(depth);
        for _ in 0..depth {
            components.push(cursor.read_u32()?);
        }
        Ok(Ok(Self { components }))
    }

    /// The path components in derivation order
    #[must_use]
    pub fn components(&self) -> &[u32] {
        &self.components
    }

    /// Number of components
    #[must_use]
    pub fn depth(&self) -> usize {
        self.components.len()
    }

    /// Serialize as `count | component*`, the same layout [`Self::read`]
    /// consumes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 4 * self.components.len());
        out.push(self.components.len() as u8);
        for component in &self.components {
            out.extend_from_slice(&component.to_be_bytes());
        }
        out
    }
}

impl fmt::Display for Bip32Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            if component & HARDENED != 0 {
                write!(f, "{}'", component & !HARDENED)?;
            } else {
                write!(f, "{component}")?;
            }
        }
        Ok(())
    }
}
