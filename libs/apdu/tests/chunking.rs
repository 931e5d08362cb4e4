//! Multi-packet chunking and resumability tests
//!
//! The transport may split a signing command anywhere, including inside the
//! variable-width calldata length prefix. These tests pin down that every
//! split point behaves exactly like the unsplit delivery, that an exchange
//! ending mid-field is acknowledged with a bare success status, and that
//! reset/abandonment leaves no residue behind.

use signet_apdu::dispatch::CommandProcessor;
use signet_apdu::envelope::{CLA, P1_CONTINUATION, P1_FIRST};
use signet_apdu::status::{Reply, StatusWord};
use signet_apdu::test_utils::{TestBackend, apdu_packet, sample_sign_body};

fn processor() -> CommandProcessor<TestBackend> {
    CommandProcessor::new(TestBackend::new())
}

fn first_packet(body: &[u8]) -> Vec<u8> {
    apdu_packet(CLA, 0x04, P1_FIRST, 0x00, body)
}

fn continuation_packet(body: &[u8]) -> Vec<u8> {
    apdu_packet(CLA, 0x04, P1_CONTINUATION, 0x00, body)
}

/// The derivation path of the pinned wire vector: five components,
/// 44'/60'/0x80060000/0/0
const VECTOR_PATH: &str = "058000002c8000003c800600000000000000000000";
/// Fixed transaction fields of the pinned wire vector
const VECTOR_TX_FIELDS: &str = "f701856d6e2edc0782520894010000000000000000000000000000000000000200";
/// Length-of-length byte of the calldata prefix
const VECTOR_LEN_OF_LEN: &str = "ff";
/// First six of the 255 declared length bytes
const VECTOR_LEN_BYTES: &str = "ffffdadadada";

/// An exchange that ends anywhere inside the calldata length field is
/// acknowledged with exactly `0x9000`, for every cut point: the prefix is
/// judged only once complete, never while the packet may simply have ended
/// early.
#[test]
fn test_packet_ending_mid_length_prefix_is_accepted() {
    let mut fixed = hex::decode(VECTOR_PATH).unwrap();
    fixed.extend_from_slice(&hex::decode(VECTOR_TX_FIELDS).unwrap());
    fixed.extend_from_slice(&hex::decode(VECTOR_LEN_OF_LEN).unwrap());
    let len_bytes = hex::decode(VECTOR_LEN_BYTES).unwrap();

    for cutoff in 0..=len_bytes.len() {
        let mut body = fixed.clone();
        body.extend_from_slice(&len_bytes[..cutoff]);

        let mut processor = processor();
        let reply = processor.handle_packet(&first_packet(&body));
        assert_eq!(
            reply,
            Reply::status(StatusWord::Ok),
            "cutoff {cutoff} bytes into the length field"
        );
    }
}

/// Splitting a completable request at every byte offset, including inside
/// the length prefix, produces the same final reply as the unsplit packet.
#[test]
fn test_every_split_point_matches_unsplit_delivery() {
    // Two-byte length prefix so splits land inside it
    let body = sample_sign_body(&[0xDA; 300]);
    assert!(body.len() > 255, "payload must need a continuation packet");

    // Unsplit delivery is impossible in one packet here; use a canonical
    // two-packet split as the reference
    let (ref_first, ref_rest) = body.split_at(255);
    let mut reference = processor();
    assert_eq!(
        reference.handle_packet(&first_packet(ref_first)),
        Reply::status(StatusWord::Ok)
    );
    let expected = reference.handle_packet(&continuation_packet(ref_rest));
    assert_eq!(expected.status, StatusWord::Ok);
    assert!(!expected.data.is_empty());

    for cut in 1..=255usize {
        let (first, rest) = body.split_at(cut);
        let mut processor = processor();

        let reply = processor.handle_packet(&first_packet(first));
        assert_eq!(reply, Reply::status(StatusWord::Ok), "split at {cut}");

        // Deliver the remainder in transport-sized pieces
        let mut final_reply = None;
        for chunk in rest.chunks(255) {
            final_reply = Some(processor.handle_packet(&continuation_packet(chunk)));
        }
        assert_eq!(final_reply.unwrap(), expected, "split at {cut}");
    }
}

/// A small request delivered whole in one packet matches the same request
/// delivered byte by byte across continuation packets.
#[test]
fn test_byte_by_byte_delivery() {
    let body = sample_sign_body(&[0x11, 0x22, 0x33]);

    let mut whole = processor();
    let expected = whole.handle_packet(&first_packet(&body));
    assert_eq!(expected.status, StatusWord::Ok);

    let mut dribble = processor();
    let mut reply = dribble.handle_packet(&first_packet(&[]));
    for (i, byte) in body.iter().enumerate() {
        assert_eq!(
            reply,
            Reply::status(StatusWord::Ok),
            "byte {i} should have been acknowledged and awaited"
        );
        reply = dribble.handle_packet(&continuation_packet(&[*byte]));
    }
    assert_eq!(reply, expected);
}

/// Abandoning a request at every possible depth and then issuing a fresh
/// request behaves exactly like a newly constructed processor.
#[test]
fn test_reset_is_idempotent_at_every_state() {
    let probe = sample_sign_body(&[0xBE; 24]);
    let probe_packet = first_packet(&probe);

    let mut fresh = processor();
    let expected = fresh.handle_packet(&probe_packet);
    assert_eq!(expected.status, StatusWord::Ok);

    let abandoned = sample_sign_body(&[0x77; 48]);
    for cut in 0..abandoned.len() {
        let mut processor = processor();
        processor.handle_packet(&first_packet(&abandoned[..cut]));
        processor.reset();

        assert_eq!(
            processor.handle_packet(&probe_packet),
            expected,
            "reset after {cut} buffered bytes"
        );
    }
}

/// After reset, a continuation packet has nothing to continue.
#[test]
fn test_reset_discards_in_flight_request() {
    let body = sample_sign_body(&[0x55; 32]);
    let (first, rest) = body.split_at(20);

    let mut processor = processor();
    assert_eq!(
        processor.handle_packet(&first_packet(first)),
        Reply::status(StatusWord::Ok)
    );
    processor.reset();

    assert_eq!(
        processor.handle_packet(&continuation_packet(rest)),
        Reply::status(StatusWord::BadState)
    );
}

/// A first chunk always starts over: two interleaved requests never blend.
#[test]
fn test_restart_discards_previous_buffer() {
    let stale = sample_sign_body(&[0xAA; 40]);
    let body = sample_sign_body(&[0xBB; 8]);

    let mut reference = processor();
    let expected = reference.handle_packet(&first_packet(&body));

    let mut processor = processor();
    // Half a stale request, then a complete fresh one
    processor.handle_packet(&first_packet(&stale[..30]));
    assert_eq!(processor.handle_packet(&first_packet(&body)), expected);
}

/// Once a request fails, its continuations are refused until a new first
/// chunk arrives.
#[test]
fn test_failed_request_accepts_no_further_chunks() {
    let mut processor = processor();

    // Absurd derivation path depth fails the request immediately
    let reply = processor.handle_packet(&first_packet(&[0xF0]));
    assert_eq!(reply.status, StatusWord::InvalidPath);

    for _ in 0..3 {
        let reply = processor.handle_packet(&continuation_packet(&[0x00]));
        assert_eq!(reply.status, StatusWord::BadState);
    }

    // A fresh first chunk recovers cleanly
    let body = sample_sign_body(&[]);
    let reply = processor.handle_packet(&first_packet(&body));
    assert_eq!(reply.status, StatusWord::Ok);
    assert!(!reply.data.is_empty());
}

/// The logical message cap holds across many continuation packets.
#[test]
fn test_overflow_across_many_chunks() {
    let config = signet_apdu::dispatch::ProcessorConfig {
        max_message_size: 1024,
        ..Default::default()
    };
    let mut processor = CommandProcessor::with_config(TestBackend::new(), config);

    // Open a request whose declared calldata would overrun the cap
    let mut body = sample_sign_body(&[]);
    body.pop();
    body.extend_from_slice(&[0x02, 0x7F, 0xFF]); // declares 32767 calldata bytes

    assert_eq!(
        processor.handle_packet(&first_packet(&body)),
        Reply::status(StatusWord::Ok)
    );

    // Keep feeding until the reassembler refuses
    let mut last = Reply::status(StatusWord::Ok);
    for _ in 0..8 {
        last = processor.handle_packet(&continuation_packet(&[0x00; 200]));
        if last.status != StatusWord::Ok {
            break;
        }
    }
    assert_eq!(last, Reply::status(StatusWord::NotEnoughMemory));
}
