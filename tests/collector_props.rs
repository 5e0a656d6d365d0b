//! Property tests for the framing engine: round-trips survive arbitrary
//! chunking, and any damage to a header's check-hash is caught before the
//! next message is delivered.

use bytes::Bytes;
use pipelink::framing::{FrameHeader, HEADER_SIZE};
use pipelink::{Collector, CollectorStatus};
use proptest::prelude::*;

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&FrameHeader::new(payload.len() as u32).encode());
    out.extend_from_slice(payload);
    out
}

/// Split `stream` at the given (arbitrary) cut points, dropping empty
/// segments; zero-length buffers never reach a Collector.
fn chunked(stream: &[u8], cuts: &[usize]) -> Vec<Bytes> {
    let mut points: Vec<usize> = cuts.iter().map(|cut| cut % (stream.len() + 1)).collect();
    points.push(0);
    points.push(stream.len());
    points.sort_unstable();
    points.dedup();

    points
        .windows(2)
        .filter(|pair| pair[1] > pair[0])
        .map(|pair| Bytes::copy_from_slice(&stream[pair[0]..pair[1]]))
        .collect()
}

proptest! {
    /// One framed message, fed in any chunking, comes out once and intact.
    #[test]
    fn single_message_roundtrip(
        payload in proptest::collection::vec(any::<u8>(), 0..2048),
        cuts in proptest::collection::vec(any::<usize>(), 0..8),
    ) {
        let stream = frame(&payload);
        let mut collector = Collector::new();
        for chunk in chunked(&stream, &cuts) {
            collector.append(chunk);
        }

        let (status, message) = collector.take_message();
        prop_assert_eq!(status, CollectorStatus::HasMessage);
        prop_assert_eq!(message, payload);
        prop_assert_eq!(collector.status(), CollectorStatus::NoMessage);
    }

    /// N concatenated messages stream out in order regardless of splits.
    #[test]
    fn multi_message_roundtrip(
        payloads in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..256),
            1..8,
        ),
        cuts in proptest::collection::vec(any::<usize>(), 0..12),
    ) {
        let mut stream = Vec::new();
        for payload in &payloads {
            stream.extend_from_slice(&frame(payload));
        }

        let mut collector = Collector::new();
        for chunk in chunked(&stream, &cuts) {
            collector.append(chunk);
        }

        for payload in &payloads {
            let (status, message) = collector.take_message();
            prop_assert_eq!(status, CollectorStatus::HasMessage);
            prop_assert_eq!(&message, payload);
        }
        prop_assert_eq!(collector.status(), CollectorStatus::NoMessage);
    }

    /// Flipping any single bit of any header's check-hash stops delivery
    /// at that header; every earlier message still extracts cleanly.
    #[test]
    fn flipped_hash_bit_is_caught(
        payloads in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 0..64),
            1..5,
        ),
        victim in any::<proptest::sample::Index>(),
        bit in 0usize..32,
    ) {
        let victim = victim.index(payloads.len());

        let mut stream = Vec::new();
        let mut offsets = Vec::new();
        for payload in &payloads {
            offsets.push(stream.len());
            stream.extend_from_slice(&frame(payload));
        }

        // Damage the hash region (bytes 4..8) of the victim's header.
        let hash_start = offsets[victim] + 4;
        stream[hash_start + bit / 8] ^= 1 << (bit % 8);

        let mut collector = Collector::new();
        collector.append(Bytes::from(stream));

        for payload in &payloads[..victim] {
            let (status, message) = collector.take_message();
            prop_assert_eq!(status, CollectorStatus::HasMessage);
            prop_assert_eq!(&message, payload);
        }

        prop_assert_eq!(collector.status(), CollectorStatus::Corrupt);
        let (status, message) = collector.take_message();
        prop_assert_eq!(status, CollectorStatus::Corrupt);
        prop_assert!(message.is_empty());
    }
}
