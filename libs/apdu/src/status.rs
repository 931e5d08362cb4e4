//! Status words and reply encoding
//!
//! Every completed exchange is answered with optional response data followed
//! by a two-byte big-endian status word, `0x9000` marking success.

/// Two-byte result code terminating every reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusWord {
    /// Success, or an intermediate chunk accepted while more data is expected
    Ok = 0x9000,
    /// Instruction code outside the supported set
    InsNotSupported = 0x6D00,
    /// Class byte belongs to a different application
    ClaNotSupported = 0x6E00,
    /// P1/P2 combination not allowed for this instruction
    WrongP1P2 = 0x6A86,
    /// Packet length inconsistent with the declared body length
    WrongDataLength = 0x6A87,
    /// Request data is malformed
    IncorrectData = 0x6A80,
    /// Derivation path invalid or too deep
    InvalidPath = 0x6A82,
    /// Logical message or calldata exceeds the configured limits
    NotEnoughMemory = 0x6A84,
    /// Continuation packet does not match the in-progress command
    BadState = 0xB007,
    /// Signing backend refused or failed
    SignFailure = 0xB008,
}

impl StatusWord {
    /// The wire encoding, big-endian
    #[must_use]
    pub fn to_bytes(self) -> [u8; 2] {
        (self as u16).to_be_bytes()
    }
}

impl TryFrom<u16> for StatusWord {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x9000 => Ok(StatusWord::Ok),
            0x6D00 => Ok(StatusWord::InsNotSupported),
            0x6E00 => Ok(StatusWord::ClaNotSupported),
            0x6A86 => Ok(StatusWord::WrongP1P2),
            0x6A87 => Ok(StatusWord::WrongDataLength),
            0x6A80 => Ok(StatusWord::IncorrectData),
            0x6A82 => Ok(StatusWord::InvalidPath),
            0x6A84 => Ok(StatusWord::NotEnoughMemory),
            0xB007 => Ok(StatusWord::BadState),
            0xB008 => Ok(StatusWord::SignFailure),
            other => Err(other),
        }
    }
}

/// One encoded reply: response data plus the trailing status word
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Response payload, empty on most failures
    pub data: Vec<u8>,
    /// Status word closing the exchange
    pub status: StatusWord,
}

impl Reply {
    /// Successful reply carrying `data`
    #[must_use]
    pub fn ok(data: Vec<u8>) -> Self {
        Self {
            data,
            status: StatusWord::Ok,
        }
    }

    /// Bare status reply with no payload
    #[must_use]
    pub fn status(status: StatusWord) -> Self {
        Self {
            data: Vec::new(),
            status,
        }
    }

    /// Serialize in wire order: payload first, status word last
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len() + 2);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.status.to_bytes());
        out
    }

    /// Split raw reply bytes into payload and status word.
    ///
    /// Returns `None` for buffers too short to carry a status word or with an
    /// unknown code.
    #[must_use]
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < 2 {
            return None;
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        let status = StatusWord::try_from(u16::from_be_bytes([sw[0], sw[1]])).ok()?;
        Some(Self {
            data: data.to_vec(),
            status,
        })
    }
}
