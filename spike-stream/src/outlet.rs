//! Stream producer: one datagram per sample plus periodic announces.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::StreamError;
use crate::frame::{encode_announce, encode_values, PacketHeader, PacketType, HEADER_LEN};
use crate::info::StreamInfo;

/// How often stream metadata is re-announced.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum spacing between send-failure log lines.
const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Producer side of a named stream.
///
/// `push_sample` never blocks: sends are best-effort, failures are counted
/// and surfaced in the log instead of back-pressuring the caller.
pub struct Outlet {
    info: StreamInfo,
    socket: UdpSocket,
    dest: SocketAddrV4,
    seq: u32,
    sample_index: u64,
    packet_buf: Vec<u8>,
    announce_buf: Vec<u8>,
    last_announce: Instant,
    send_errors: u64,
    last_error_log: Option<Instant>,
}

impl Outlet {
    /// Create the outlet and announce the stream once.
    pub fn new(info: StreamInfo) -> Result<Self, StreamError> {
        let dest = info.endpoint();
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_multicast_ttl_v4(1)?;
        socket.set_multicast_loop_v4(true)?;
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
        let socket: UdpSocket = socket.into();

        let payload = info.payload_len();
        let mut outlet = Self {
            packet_buf: Vec::with_capacity(HEADER_LEN + payload),
            announce_buf: Vec::new(),
            info,
            socket,
            dest,
            seq: 0,
            sample_index: 0,
            last_announce: Instant::now(),
            send_errors: 0,
            last_error_log: None,
        };
        outlet.send_announce();
        log::info!(
            "outlet '{}' on {} ({} ch, {} Hz)",
            outlet.info.name,
            dest,
            outlet.info.channel_count,
            outlet.info.nominal_rate
        );
        Ok(outlet)
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Number of datagrams that failed to send.
    pub fn send_errors(&self) -> u64 {
        self.send_errors
    }

    /// Publish one sample. `values.len()` must equal the channel count.
    pub fn push_sample(&mut self, values: &[f64]) -> Result<(), StreamError> {
        if values.len() != self.info.channel_count {
            return Err(StreamError::Malformed {
                name: self.info.name.clone(),
                reason: format!(
                    "push of {} values on a {}-channel stream",
                    values.len(),
                    self.info.channel_count
                ),
            });
        }

        self.packet_buf.clear();
        self.packet_buf.resize(HEADER_LEN, 0);
        let header = PacketHeader {
            ptype: PacketType::Data,
            format: self.info.format,
            channel_count: self.info.channel_count as u16,
            seq: self.seq,
            sample_index: self.sample_index,
            rate_hz: self.info.nominal_rate,
        };
        let mut head = [0u8; HEADER_LEN];
        header.encode(&mut head);
        self.packet_buf[..HEADER_LEN].copy_from_slice(&head);
        encode_values(values, self.info.format, &mut self.packet_buf);

        if let Err(e) = self.socket.send_to(&self.packet_buf, self.dest) {
            self.note_send_error(e);
        }
        self.seq = self.seq.wrapping_add(1);
        self.sample_index += 1;

        if self.last_announce.elapsed() >= ANNOUNCE_INTERVAL {
            self.send_announce();
        }
        Ok(())
    }

    fn send_announce(&mut self) {
        let mut buf = std::mem::take(&mut self.announce_buf);
        encode_announce(&self.info, self.seq, &mut buf);
        if let Err(e) = self.socket.send_to(&buf, self.dest) {
            self.note_send_error(e);
        }
        self.announce_buf = buf;
        self.last_announce = Instant::now();
    }

    fn note_send_error(&mut self, error: std::io::Error) {
        self.send_errors += 1;
        let due = self
            .last_error_log
            .map(|t| t.elapsed() >= ERROR_LOG_INTERVAL)
            .unwrap_or(true);
        if due {
            log::warn!(
                "outlet '{}': send failed ({} so far): {}",
                self.info.name,
                self.send_errors,
                error
            );
            self.last_error_log = Some(Instant::now());
        }
    }
}
