//! Framing: wire format and message reassembly.
//!
//! Every message on a pipe is an 8-byte little-endian header (payload
//! length plus a length check-hash) followed by the payload bytes. The
//! [`Collector`] accumulates raw read buffers and extracts complete
//! messages from the stream.

mod collector;
mod wire;

pub use collector::{Collector, CollectorStatus, MessageLength};
pub use wire::{length_hash, u32_pack, u32_unpack, FrameHeader, HEADER_SIZE};
