//! Stream consumer: resolve by name, then pull samples in order.
//!
//! A receiver thread owns the socket and pushes whole frames into a
//! lock-free SPSC ring; `pull_sample` pops them on the caller's thread. A
//! frame is only pushed when it fits completely, otherwise it is dropped
//! and counted (partial pushes would shear channel alignment).

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::StreamError;
use crate::frame::{decode_values, parse_announce, Packet, PacketType};
use crate::info::{endpoint_for, StreamInfo};

/// Default wait for `resolve`.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait inside `pull_sample` before the stream counts as dead.
pub const PULL_TIMEOUT: Duration = Duration::from_secs(5);

/// Lock-free counters shared with the receiver thread.
#[derive(Default)]
struct SharedStats {
    packets_received: AtomicU64,
    frames_dropped: AtomicU64,
    gaps_detected: AtomicU64,
}

/// Snapshot of inlet health counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct InletStats {
    pub packets_received: u64,
    pub frames_dropped: u64,
    pub gaps_detected: u64,
}

/// Build a multicast receive socket for a stream endpoint. Reuse-address so
/// resolve and a later inlet (or several consumers) can share the port.
fn join_group(endpoint: SocketAddrV4) -> Result<UdpSocket, StreamError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, endpoint.port()).into())?;
    socket.join_multicast_v4(endpoint.ip(), &Ipv4Addr::UNSPECIFIED)?;
    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    Ok(socket)
}

/// Wait for an announce packet naming `name` and return its metadata.
pub fn resolve(name: &str, timeout: Duration) -> Result<StreamInfo, StreamError> {
    let endpoint = endpoint_for(name);
    let socket = join_group(endpoint)?;
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 65_536];

    log::info!("resolving stream '{}' on {}", name, endpoint);
    while Instant::now() < deadline {
        match socket.recv(&mut buf) {
            Ok(len) => {
                if let Some(packet) = Packet::parse(&buf[..len]) {
                    if packet.header.ptype != PacketType::Announce {
                        continue;
                    }
                    if let Some(info) = parse_announce(&packet.header, packet.payload) {
                        if info.name == name {
                            log::info!(
                                "resolved '{}': {} ch, {} Hz, {:?}",
                                info.name,
                                info.channel_count,
                                info.nominal_rate,
                                info.format
                            );
                            return Ok(info);
                        }
                    }
                }
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(StreamError::ResolveTimeout {
        name: name.to_string(),
        timeout_ms: timeout.as_millis() as u64,
    })
}

/// Consumer side of a named stream.
pub struct Inlet {
    info: StreamInfo,
    consumer: ringbuf::HeapCons<f64>,
    running: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
    receiver: Option<JoinHandle<()>>,
    pull_timeout: Duration,
}

impl Inlet {
    /// Connect to a resolved stream and start receiving.
    pub fn connect(info: &StreamInfo) -> Result<Self, StreamError> {
        let socket = join_group(info.endpoint())?;

        // One second of frames, with a floor for slow streams.
        let frames = (info.nominal_rate as usize).max(1024);
        let rb = HeapRb::<f64>::new(frames * info.channel_count);
        let (producer, consumer) = rb.split();

        let running = Arc::new(AtomicBool::new(true));
        let ended = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SharedStats::default());

        let thread_running = running.clone();
        let thread_ended = ended.clone();
        let thread_stats = stats.clone();
        let thread_info = info.clone();
        let receiver = thread::Builder::new()
            .name(format!("inlet-{}", info.name))
            .spawn(move || {
                receiver_loop(socket, thread_info, thread_running, thread_ended, thread_stats, producer);
            })
            .map_err(StreamError::Socket)?;

        Ok(Self {
            info: info.clone(),
            consumer,
            running,
            ended,
            stats,
            receiver: Some(receiver),
            pull_timeout: PULL_TIMEOUT,
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Change how long `pull_sample` waits before giving up.
    pub fn set_pull_timeout(&mut self, timeout: Duration) {
        self.pull_timeout = timeout;
    }

    pub fn stats(&self) -> InletStats {
        InletStats {
            packets_received: self.stats.packets_received.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            gaps_detected: self.stats.gaps_detected.load(Ordering::Relaxed),
        }
    }

    /// Pop the next sample into `out` (length = channel count). Blocks up to
    /// the pull timeout; expiry and receiver death are fatal.
    pub fn pull_sample(&mut self, out: &mut [f64]) -> Result<(), StreamError> {
        let n = self.info.channel_count;
        debug_assert_eq!(out.len(), n);
        let deadline = Instant::now() + self.pull_timeout;
        loop {
            if self.consumer.occupied_len() >= n {
                let popped = self.consumer.pop_slice(&mut out[..n]);
                debug_assert_eq!(popped, n);
                return Ok(());
            }
            if self.ended.load(Ordering::SeqCst) {
                return Err(StreamError::NotRunning(self.info.name.clone()));
            }
            if Instant::now() >= deadline {
                return Err(StreamError::PullTimeout {
                    name: self.info.name.clone(),
                    timeout_ms: self.pull_timeout.as_millis() as u64,
                });
            }
            thread::sleep(Duration::from_micros(50));
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Inlet {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Socket loop on the receiver thread: parse, validate, decode, push.
fn receiver_loop(
    socket: UdpSocket,
    info: StreamInfo,
    running: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
    mut producer: ringbuf::HeapProd<f64>,
) {
    let n = info.channel_count;
    let mut buf = [0u8; 65_536];
    let mut frame = vec![0.0f64; n];
    let mut next_index: Option<u64> = None;
    let mut last_gap_log: Option<Instant> = None;
    let mut last_drop_log: Option<Instant> = None;

    while running.load(Ordering::SeqCst) {
        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(_) => break,
        };

        let packet = match Packet::parse(&buf[..len]) {
            Some(p) => p,
            None => continue,
        };
        if packet.header.ptype != PacketType::Data {
            continue;
        }
        if packet.header.channel_count as usize != n || packet.header.format != info.format {
            continue;
        }
        if !decode_values(packet.payload, info.format, &mut frame) {
            continue;
        }
        stats.packets_received.fetch_add(1, Ordering::Relaxed);

        // The bus never hides loss: a jump in the producer's sample index is
        // counted and reported.
        let index = packet.header.sample_index;
        if let Some(expected) = next_index {
            if index != expected {
                stats.gaps_detected.fetch_add(1, Ordering::Relaxed);
                if last_gap_log.map(|t| t.elapsed().as_secs() >= 1).unwrap_or(true) {
                    log::warn!(
                        "inlet '{}': sample index jumped {} -> {}",
                        info.name,
                        expected,
                        index
                    );
                    last_gap_log = Some(Instant::now());
                }
            }
        }
        next_index = Some(index.wrapping_add(1));

        // Whole frame or nothing.
        if producer.vacant_len() >= n {
            producer.push_slice(&frame);
        } else {
            stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            if last_drop_log.map(|t| t.elapsed().as_secs() >= 1).unwrap_or(true) {
                log::warn!(
                    "inlet '{}': ring full, dropped {} frames so far",
                    info.name,
                    stats.frames_dropped.load(Ordering::Relaxed)
                );
                last_drop_log = Some(Instant::now());
            }
        }
    }
    ended.store(true, Ordering::SeqCst);
}
