//! Wire format: fixed binary header plus data or announce payload.
//!
//! All header fields are big-endian. One data packet carries exactly one
//! sample (`channel_count` values in the stream's format). Announce packets
//! repeat the stream metadata so a consumer can resolve a stream from any
//! point in time.

use crate::info::{SampleFormat, StreamInfo};

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 24;

/// Packet magic, first two header bytes.
const MAGIC: u16 = 0x5350;

/// Wire protocol version.
const VERSION: u8 = 1;

/// Packet kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Announce,
    Data,
}

/// Parsed fixed header.
#[derive(Debug, Clone)]
pub struct PacketHeader {
    pub ptype: PacketType,
    pub format: SampleFormat,
    pub channel_count: u16,
    /// Per-outlet sequence number, wraps.
    pub seq: u32,
    /// Monotonic sample index of the carried sample (data packets).
    pub sample_index: u64,
    /// Nominal rate in Hz; 0 for irregular streams.
    pub rate_hz: u32,
}

impl PacketHeader {
    /// Encode into `buf`, which must hold at least [`HEADER_LEN`] bytes.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        buf[0..2].copy_from_slice(&MAGIC.to_be_bytes());
        buf[2] = VERSION;
        buf[3] = match self.ptype {
            PacketType::Announce => 0,
            PacketType::Data => 1,
        };
        buf[4] = self.format.to_wire();
        buf[5] = 0; // flags, reserved
        buf[6..8].copy_from_slice(&self.channel_count.to_be_bytes());
        buf[8..12].copy_from_slice(&self.seq.to_be_bytes());
        buf[12..20].copy_from_slice(&self.sample_index.to_be_bytes());
        buf[20..24].copy_from_slice(&self.rate_hz.to_be_bytes());
        HEADER_LEN
    }

    /// Parse a header; `None` on wrong magic, version or field values.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN {
            return None;
        }
        if u16::from_be_bytes([data[0], data[1]]) != MAGIC || data[2] != VERSION {
            return None;
        }
        let ptype = match data[3] {
            0 => PacketType::Announce,
            1 => PacketType::Data,
            _ => return None,
        };
        let format = SampleFormat::from_wire(data[4])?;
        Some(Self {
            ptype,
            format,
            channel_count: u16::from_be_bytes([data[6], data[7]]),
            seq: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            sample_index: u64::from_be_bytes([
                data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
            ]),
            rate_hz: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
        })
    }
}

/// A parsed packet borrowing its payload from the receive buffer.
#[derive(Debug)]
pub struct Packet<'a> {
    pub header: PacketHeader,
    pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        let header = PacketHeader::parse(data)?;
        Some(Self {
            header,
            payload: &data[HEADER_LEN..],
        })
    }
}

/// Append one sample's values to `out` in the given wire format.
pub fn encode_values(values: &[f64], format: SampleFormat, out: &mut Vec<u8>) {
    match format {
        SampleFormat::Double64 => {
            for &v in values {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        SampleFormat::Int16 => {
            for &v in values {
                let clamped = v.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
                out.extend_from_slice(&clamped.to_be_bytes());
            }
        }
    }
}

/// Decode one sample's payload into `out`. Returns false when the payload
/// does not hold exactly `out.len()` values.
pub fn decode_values(payload: &[u8], format: SampleFormat, out: &mut [f64]) -> bool {
    if payload.len() != out.len() * format.bytes_per_value() {
        return false;
    }
    match format {
        SampleFormat::Double64 => {
            for (i, v) in out.iter_mut().enumerate() {
                let off = i * 8;
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&payload[off..off + 8]);
                *v = f64::from_be_bytes(bytes);
            }
        }
        SampleFormat::Int16 => {
            for (i, v) in out.iter_mut().enumerate() {
                let off = i * 2;
                *v = i16::from_be_bytes([payload[off], payload[off + 1]]) as f64;
            }
        }
    }
    true
}

fn push_str(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&bytes[..len]);
}

fn read_str<'a>(data: &'a [u8], pos: &mut usize) -> Option<&'a str> {
    if data.len() < *pos + 2 {
        return None;
    }
    let len = u16::from_be_bytes([data[*pos], data[*pos + 1]]) as usize;
    *pos += 2;
    if data.len() < *pos + len {
        return None;
    }
    let s = std::str::from_utf8(&data[*pos..*pos + len]).ok()?;
    *pos += len;
    Some(s)
}

/// Build a complete announce packet for a stream.
pub fn encode_announce(info: &StreamInfo, seq: u32, out: &mut Vec<u8>) {
    out.clear();
    out.resize(HEADER_LEN, 0);
    let header = PacketHeader {
        ptype: PacketType::Announce,
        format: info.format,
        channel_count: info.channel_count as u16,
        seq,
        sample_index: 0,
        rate_hz: info.nominal_rate,
    };
    let mut head = [0u8; HEADER_LEN];
    header.encode(&mut head);
    out[..HEADER_LEN].copy_from_slice(&head);
    push_str(out, &info.name);
    push_str(out, &info.stream_type);
    push_str(out, &info.source_id);
}

/// Recover stream metadata from an announce packet.
pub fn parse_announce(header: &PacketHeader, payload: &[u8]) -> Option<StreamInfo> {
    let mut pos = 0;
    let name = read_str(payload, &mut pos)?;
    let stream_type = read_str(payload, &mut pos)?;
    let source_id = read_str(payload, &mut pos)?;
    Some(StreamInfo::new(
        name,
        stream_type,
        header.channel_count as usize,
        header.rate_hz,
        header.format,
        source_id,
    ))
}
