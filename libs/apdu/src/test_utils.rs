//! Test utilities: request builders and a deterministic signing backend
//!
//! The [`TestBackend`] is **not** cryptographic. It derives stable,
//! path-dependent byte strings so wire-level tests and the demo daemon can
//! observe deterministic replies without pulling a signature scheme into the
//! command core (real signing lives behind [`SigningBackend`] in the
//! surrounding application).

use crate::bip32::{Bip32Path, HARDENED};
use crate::decoder::{SignRequest, TxHeader};
use crate::dispatch::{BackendError, SigningBackend};

/// Deterministic, non-cryptographic signing backend
#[derive(Debug, Clone, Default)]
pub struct TestBackend {
    fail: bool,
}

impl TestBackend {
    /// Backend that answers every request
    #[must_use]
    pub fn new() -> Self {
        Self { fail: false }
    }

    /// Backend that fails every request, for error-path tests
    #[must_use]
    pub fn failing() -> Self {
        Self { fail: true }
    }

    fn check(&self, path: &Bip32Path) -> Result<(), BackendError> {
        if self.fail {
            return Err(BackendError::Derivation {
                path: path.to_string(),
            });
        }
        Ok(())
    }
}

impl SigningBackend for TestBackend {
    fn public_key(&self, path: &Bip32Path) -> Result<Vec<u8>, BackendError> {
        self.check(path)?;
        let path_bytes = path.to_bytes();
        let mut key = fold_bytes(&[b"pubkey".as_slice(), &path_bytes], 33);
        key[0] = 0x02;
        Ok(key)
    }

    fn sign_hash(&self, path: &Bip32Path, digest: &[u8; 32]) -> Result<Vec<u8>, BackendError> {
        self.check(path)?;
        let path_bytes = path.to_bytes();
        Ok(fold_bytes(
            &[b"hash".as_slice(), &path_bytes, digest],
            64,
        ))
    }

    fn sign_transaction(&self, request: &SignRequest) -> Result<Vec<u8>, BackendError> {
        self.check(&request.path)?;
        let path_bytes = request.path.to_bytes();
        let header_bytes = request.header.to_bytes();
        Ok(fold_bytes(
            &[
                b"tx".as_slice(),
                &path_bytes,
                &header_bytes,
                &request.calldata,
            ],
            64,
        ))
    }
}

/// FNV-1a folded out to `len` bytes. Deterministic filler, nothing more.
fn fold_bytes(parts: &[&[u8]], len: usize) -> Vec<u8> {
    let mut state: u64 = 0xcbf2_9ce4_8422_2325;
    for part in parts {
        for &byte in *part {
            state ^= u64::from(byte);
            state = state.wrapping_mul(0x0000_0100_0000_01B3);
        }
        state = state.wrapping_mul(0x0000_0100_0000_01B3);
    }
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= out.len() as u64;
        state = state.wrapping_mul(0x0000_0100_0000_01B3);
        out.extend_from_slice(&state.to_be_bytes());
    }
    out.truncate(len);
    out
}

/// `m/44'/60'/0'/0/0`, the path used throughout the tests
#[must_use]
pub fn sample_path() -> Bip32Path {
    Bip32Path::new(vec![HARDENED | 44, HARDENED | 60, HARDENED, 0, 0])
        .expect("sample path is within bounds")
}

/// Transaction header used throughout the tests
#[must_use]
pub fn sample_tx_header() -> TxHeader {
    TxHeader {
        version: 0x01,
        nonce: 7,
        gas_price: 20,
        gas_limit: 21_000,
        recipient: [0x42; 20],
    }
}

/// Encode the length prefix for `len` calldata bytes: a length-of-length
/// byte followed by that many big-endian length bytes
#[must_use]
pub fn encode_calldata_len(len: usize) -> Vec<u8> {
    if len == 0 {
        return vec![0];
    }
    let be = (len as u64).to_be_bytes();
    let first = be.iter().position(|&b| b != 0).unwrap_or(be.len() - 1);
    let mut out = vec![(be.len() - first) as u8];
    out.extend_from_slice(&be[first..]);
    out
}

/// Complete signing-request body for the sample path and header
#[must_use]
pub fn sample_sign_body(calldata: &[u8]) -> Vec<u8> {
    sign_body(&sample_path(), &sample_tx_header(), calldata)
}

/// Complete signing-request body: path, header, length-prefixed calldata
#[must_use]
pub fn sign_body(path: &Bip32Path, header: &TxHeader, calldata: &[u8]) -> Vec<u8> {
    let mut body = path.to_bytes();
    body.extend_from_slice(&header.to_bytes());
    body.extend_from_slice(&encode_calldata_len(calldata.len()));
    body.extend_from_slice(calldata);
    body
}

/// Raw packet bytes: `cla | ins | p1 | p2 | lc | body`.
///
/// `ins` is a raw byte so tests can build packets for unsupported codes.
///
/// # Panics
///
/// Panics if `body` exceeds the one-byte LC range.
#[must_use]
pub fn apdu_packet(cla: u8, ins: u8, p1: u8, p2: u8, body: &[u8]) -> Vec<u8> {
    let lc = u8::try_from(body.len()).expect("test body fits a one-byte LC");
    let mut raw = vec![cla, ins, p1, p2, lc];
    raw.extend_from_slice(body);
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_is_deterministic() {
        let backend = TestBackend::new();
        let path = sample_path();
        assert_eq!(
            backend.public_key(&path).unwrap(),
            backend.public_key(&path).unwrap()
        );
        assert_eq!(backend.public_key(&path).unwrap().len(), 33);
    }

    #[test]
    fn test_backend_distinguishes_paths() {
        let backend = TestBackend::new();
        let other = Bip32Path::new(vec![HARDENED | 44, HARDENED | 60, HARDENED, 0, 1]).unwrap();
        assert_ne!(
            backend.public_key(&sample_path()).unwrap(),
            backend.public_key(&other).unwrap()
        );
    }

    #[test]
    fn test_calldata_len_encoding() {
        assert_eq!(encode_calldata_len(0), vec![0]);
        assert_eq!(encode_calldata_len(4), vec![1, 4]);
        assert_eq!(encode_calldata_len(0x0102), vec![2, 0x01, 0x02]);
        assert_eq!(encode_calldata_len(0x01_0000), vec![3, 0x01, 0x00, 0x00]);
    }

    #[test]
    fn test_sign_body_layout() {
        let body = sample_sign_body(&[0xAA, 0xBB]);
        // count + 5 components + header + lenlen + len + calldata
        assert_eq!(body.len(), 21 + 33 + 1 + 1 + 2);
    }
}
