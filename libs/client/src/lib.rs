//! Host-side client for the Signet APDU protocol
//!
//! The reference peer of the device core: builds command packets, splits
//! oversized signing payloads into continuation packets, and splits replies
//! into response data and status word. The transport is abstract; anything
//! that can exchange one packet for one reply works.

#![warn(missing_docs)]

use signet_apdu::bip32::Bip32Path;
use signet_apdu::decoder::TxHeader;
use signet_apdu::envelope::{CLA, Ins, MAX_PACKET_DATA, P1_CONFIRM, P1_CONTINUATION, P1_FIRST};
use signet_apdu::status::{Reply, StatusWord};
use std::io::{Read, Write};
use std::net::TcpStream;
use thiserror::Error;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Reply too short or carrying an unknown status word
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The device answered with a non-success status
    #[error("device returned status 0x{status:04X}")]
    Status {
        /// The raw status word
        status: u16,
    },

    /// Signing payload cannot be chunked into one-byte-LC packets
    #[error("payload too large: {size} bytes across {chunks} chunks exceeds 255 packets")]
    PayloadTooLarge {
        /// Total payload size
        size: usize,
        /// Chunks the payload would need
        chunks: usize,
    },

    /// The device accepted all chunks but returned no signature
    #[error("no signature returned")]
    NoSignature,

    /// IO error from the TCP transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// One packet exchanged for one reply
pub trait Transport {
    /// Send a raw packet and return the raw reply bytes
    fn exchange(&mut self, packet: &[u8]) -> Result<Vec<u8>>;
}

/// Length-framed TCP transport matching the daemon's framing
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap a connected stream
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn exchange(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        let len = u16::try_from(packet.len())
            .map_err(|_| ClientError::Transport("packet exceeds frame size".to_string()))?;
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(packet)?;
        self.stream.flush()?;

        let mut len_buf = [0u8; 2];
        self.stream.read_exact(&mut len_buf)?;
        let reply_len = u16::from_be_bytes(len_buf) as usize;
        let mut reply = vec![0u8; reply_len];
        self.stream.read_exact(&mut reply)?;
        log::debug!("<= RECV ({} bytes): {}", reply.len(), hex::encode(&reply));
        Ok(reply)
    }
}

/// Application version triple
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    /// Version Major
    pub major: u8,
    /// Version Minor
    pub minor: u8,
    /// Version Patch
    pub patch: u8,
}

/// Application configuration as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppConfiguration {
    /// Feature flag byte
    pub flags: u8,
    /// Application version
    pub version: Version,
}

/// Client for one Signet device channel
pub struct SignetApp<T> {
    transport: T,
}

impl<T: Transport> SignetApp<T> {
    /// Client over the given transport
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Retrieve the app version
    pub fn version(&mut self) -> Result<Version> {
        let data = self.exchange_ok(&encode_packet(Ins::GetVersion, 0x00, 0x00, &[])?)?;
        if data.len() < 3 {
            return Err(ClientError::MalformedReply(format!(
                "version reply has {} bytes",
                data.len()
            )));
        }
        Ok(Version {
            major: data[0],
            minor: data[1],
            patch: data[2],
        })
    }

    /// Retrieve feature flags and version
    pub fn app_configuration(&mut self) -> Result<AppConfiguration> {
        let data = self.exchange_ok(&encode_packet(Ins::GetAppConfiguration, 0x00, 0x00, &[])?)?;
        if data.len() < 4 {
            return Err(ClientError::MalformedReply(format!(
                "configuration reply has {} bytes",
                data.len()
            )));
        }
        Ok(AppConfiguration {
            flags: data[0],
            version: Version {
                major: data[1],
                minor: data[2],
                patch: data[3],
            },
        })
    }

    /// Retrieve the public key for a derivation path
    pub fn public_key(&mut self, path: &Bip32Path, confirm: bool) -> Result<Vec<u8>> {
        let p1 = if confirm { P1_CONFIRM } else { P1_FIRST };
        self.exchange_ok(&encode_packet(Ins::GetPublicKey, p1, 0x00, &path.to_bytes())?)
    }

    /// Sign a precomputed 32-byte digest
    pub fn sign_hash(&mut self, path: &Bip32Path, digest: &[u8; 32]) -> Result<Vec<u8>> {
        let mut body = path.to_bytes();
        body.extend_from_slice(digest);
        self.exchange_ok(&encode_packet(Ins::SignHash, 0x00, 0x00, &body)?)
    }

    /// Sign a transaction, splitting the payload across continuation packets
    /// as needed
    pub fn sign_transaction(
        &mut self,
        path: &Bip32Path,
        header: &TxHeader,
        calldata: &[u8],
    ) -> Result<Vec<u8>> {
        let mut body = path.to_bytes();
        body.extend_from_slice(&header.to_bytes());
        body.extend_from_slice(&encode_calldata_len(calldata.len()));
        body.extend_from_slice(calldata);

        let chunks: Vec<&[u8]> = body.chunks(MAX_PACKET_DATA).collect();
        if chunks.len() > 255 {
            return Err(ClientError::PayloadTooLarge {
                size: body.len(),
                chunks: chunks.len(),
            });
        }

        let mut signature = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let p1 = if index == 0 { P1_FIRST } else { P1_CONTINUATION };
            signature = self.exchange_ok(&encode_packet(Ins::SignTransaction, p1, 0x00, chunk)?)?;
        }
        if signature.is_empty() {
            return Err(ClientError::NoSignature);
        }
        Ok(signature)
    }

    /// Exchange one packet and require a success status
    fn exchange_ok(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        let raw = self.transport.exchange(packet)?;
        let reply = Reply::from_bytes(&raw).ok_or_else(|| {
            ClientError::MalformedReply(format!("unparseable reply: {}", hex::encode(&raw)))
        })?;
        if reply.status != StatusWord::Ok {
            return Err(ClientError::Status {
                status: reply.status as u16,
            });
        }
        Ok(reply.data)
    }
}

/// Encode one packet: `CLA | INS | P1 | P2 | LC | body`
fn encode_packet(ins: Ins, p1: u8, p2: u8, body: &[u8]) -> Result<Vec<u8>> {
    let lc = u8::try_from(body.len()).map_err(|_| ClientError::PayloadTooLarge {
        size: body.len(),
        chunks: 1,
    })?;
    let mut packet = vec![CLA, ins as u8, p1, p2, lc];
    packet.extend_from_slice(body);
    Ok(packet)
}

/// Length prefix for `len` calldata bytes: length-of-length, then big-endian
/// length bytes
fn encode_calldata_len(len: usize) -> Vec<u8> {
    if len == 0 {
        return vec![0];
    }
    let be = (len as u64).to_be_bytes();
    let first = be.iter().position(|&b| b != 0).unwrap_or(be.len() - 1);
    let mut out = vec![(be.len() - first) as u8];
    out.extend_from_slice(&be[first..]);
    out
}
