//! APDU envelope validation
//!
//! Each physical packet carries the fixed header `CLA | INS | P1 | P2 | LC`
//! followed by `LC` payload bytes. Validation is ordered so that an unknown
//! instruction code is rejected before anything else is inspected: the body
//! of an unsupported instruction may be empty, malformed or absent, and must
//! never influence the outcome.

use thiserror::Error;

/// Class byte identifying this application family
pub const CLA: u8 = 0xE0;

/// Fixed header length plus the LC byte
pub const PACKET_MIN_LEN: usize = 5;

/// Largest payload a single packet can declare (LC is one byte)
pub const MAX_PACKET_DATA: usize = 255;

/// P1 marking the first packet of a signing command
pub const P1_FIRST: u8 = 0x00;
/// P1 marking a continuation packet of a signing command
pub const P1_CONTINUATION: u8 = 0x80;
/// P1 asking for on-device confirmation before returning a public key
pub const P1_CONFIRM: u8 = 0x01;

/// Envelope validation errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Packet shorter than the fixed header
    #[error("packet too short: {actual} bytes, header needs {PACKET_MIN_LEN}")]
    PacketTooShort {
        /// Bytes actually delivered
        actual: usize,
    },

    /// Instruction code outside the supported set
    #[error("unsupported instruction: 0x{0:02X}")]
    UnsupportedInstruction(u8),

    /// Class byte belongs to a different application
    #[error("unsupported class: 0x{0:02X}")]
    UnsupportedClass(u8),

    /// Declared body length does not match the delivered payload
    #[error("body length mismatch: LC declares {declared}, packet carries {actual}")]
    BodyLengthMismatch {
        /// Length declared by the LC byte
        declared: usize,
        /// Payload bytes actually present
        actual: usize,
    },

    /// P1/P2 combination outside the instruction's allowed set
    #[error("invalid parameters for {ins:?}: P1=0x{p1:02X} P2=0x{p2:02X}")]
    InvalidParameters {
        /// The instruction being parameterized
        ins: Ins,
        /// First parameter byte
        p1: u8,
        /// Second parameter byte
        p2: u8,
    },
}

/// Result type for envelope validation
pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Supported instruction codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Ins {
    /// Report the application version
    GetVersion = 0x00,
    /// Report version plus feature flags
    GetAppConfiguration = 0x01,
    /// Derive and return a public key
    GetPublicKey = 0x02,
    /// Sign a precomputed 32-byte digest
    SignHash = 0x03,
    /// Sign a structured transaction, possibly spanning several packets
    SignTransaction = 0x04,
}

impl TryFrom<u8> for Ins {
    type Error = EnvelopeError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Ins::GetVersion),
            0x01 => Ok(Ins::GetAppConfiguration),
            0x02 => Ok(Ins::GetPublicKey),
            0x03 => Ok(Ins::SignHash),
            0x04 => Ok(Ins::SignTransaction),
            other => Err(EnvelopeError::UnsupportedInstruction(other)),
        }
    }
}

/// Allowed parameter bytes for one instruction
#[derive(Debug, Clone, Copy)]
pub struct ParameterPolicy {
    /// Accepted P1 values
    pub p1: &'static [u8],
    /// Accepted P2 values
    pub p2: &'static [u8],
}

impl Ins {
    /// The parameter policy for this instruction.
    ///
    /// The table is fixed at build time; there is no mutable dispatch state.
    #[must_use]
    pub fn parameter_policy(self) -> ParameterPolicy {
        match self {
            Ins::GetVersion | Ins::GetAppConfiguration | Ins::SignHash => ParameterPolicy {
                p1: &[0x00],
                p2: &[0x00],
            },
            Ins::GetPublicKey => ParameterPolicy {
                p1: &[P1_FIRST, P1_CONFIRM],
                p2: &[0x00],
            },
            Ins::SignTransaction => ParameterPolicy {
                p1: &[P1_FIRST, P1_CONTINUATION],
                p2: &[0x00],
            },
        }
    }
}

/// One validated packet, borrowing its payload from the transport buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// Class byte (always [`CLA`] after validation)
    pub cla: u8,
    /// Validated instruction
    pub ins: Ins,
    /// First parameter byte
    pub p1: u8,
    /// Second parameter byte
    pub p2: u8,
    /// Payload bytes, exactly LC long
    pub data: &'a [u8],
}

/// Validate one raw packet.
///
/// Check order: header length, instruction membership, class byte, declared
/// body length, parameter policy. Instruction rejection short-circuits before
/// the body is touched.
pub fn parse_packet(raw: &[u8]) -> Result<Packet<'_>> {
    if raw.len() < PACKET_MIN_LEN {
        return Err(EnvelopeError::PacketTooShort { actual: raw.len() });
    }

    let ins = Ins::try_from(raw[1])?;

    if raw[0] != CLA {
        return Err(EnvelopeError::UnsupportedClass(raw[0]));
    }

    let declared = raw[4] as usize;
    let body = &raw[PACKET_MIN_LEN..];
    if declared != body.len() {
        return Err(EnvelopeError::BodyLengthMismatch {
            declared,
            actual: body.len(),
        });
    }

    let (p1, p2) = (raw[2], raw[3]);
    let policy = ins.parameter_policy();
    if !policy.p1.contains(&p1) || !policy.p2.contains(&p2) {
        return Err(EnvelopeError::InvalidParameters { ins, p1, p2 });
    }

    Ok(Packet {
        cla: raw[0],
        ins,
        p1,
        p2,
        data: body,
    })
}
