//! Streaming-bus client: named multi-channel push/pull streams.
//!
//! A stream name maps deterministically to a multicast group, metadata
//! travels in-band, so producers and consumers need to agree on nothing but
//! the name. One datagram carries one sample; an inlet decouples socket I/O
//! from the caller with a receiver thread and a lock-free ring.

mod error;
mod frame;
mod info;
mod inlet;
mod outlet;

pub use error::StreamError;
pub use frame::{Packet, PacketHeader, PacketType, HEADER_LEN};
pub use info::{SampleFormat, StreamInfo};
pub use inlet::{resolve, Inlet, InletStats, PULL_TIMEOUT, RESOLVE_TIMEOUT};
pub use outlet::Outlet;
