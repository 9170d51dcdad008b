//! Minimal XDF 1.0 container codec.
//!
//! Covers the subset the pipeline needs: file header, stream header,
//! sample chunks with double64 values and explicit 8-byte timestamps,
//! boundary chunk and stream footer. The processor writes recordings with
//! it, the source reads them back for replay.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

/// File magic, first four bytes of every container.
pub const MAGIC: &[u8; 4] = b"XDF:";

/// Chunk tags defined by the container format.
pub const TAG_FILE_HEADER: u16 = 1;
pub const TAG_STREAM_HEADER: u16 = 2;
pub const TAG_SAMPLES: u16 = 3;
pub const TAG_CLOCK_OFFSET: u16 = 4;
pub const TAG_BOUNDARY: u16 = 5;
pub const TAG_STREAM_FOOTER: u16 = 6;

/// Fixed UUID payload of a boundary chunk.
const BOUNDARY_UUID: [u8; 16] = [
    0x43, 0xA5, 0x46, 0xDC, 0xCB, 0xF5, 0x41, 0x0F, 0xB3, 0x0E, 0xD5, 0x46, 0x73, 0x83, 0xCB,
    0xE4,
];

#[derive(Debug, Error)]
pub enum XdfError {
    #[error("container I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed container: {0}")]
    Malformed(String),
    #[error("unsupported container feature: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Streaming chunk writer. Emits the magic and file-header chunk up front.
#[derive(Debug)]
pub struct XdfWriter<W: Write> {
    out: W,
}

impl XdfWriter<BufWriter<File>> {
    /// Create a container file at `path`.
    pub fn create(path: &Path) -> Result<Self, XdfError> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> XdfWriter<W> {
    /// Wrap an output sink, writing the magic and file header.
    pub fn new(mut out: W) -> Result<Self, XdfError> {
        out.write_all(MAGIC)?;
        let mut writer = Self { out };
        writer.write_chunk(
            TAG_FILE_HEADER,
            b"<?xml version=\"1.0\"?><info><version>1.0</version></info>",
        )?;
        Ok(writer)
    }

    fn write_chunk(&mut self, tag: u16, content: &[u8]) -> Result<(), XdfError> {
        let len = (content.len() + 2) as u64;
        if len <= u8::MAX as u64 {
            self.out.write_all(&[1u8, len as u8])?;
        } else if len <= u32::MAX as u64 {
            self.out.write_all(&[4u8])?;
            self.out.write_all(&(len as u32).to_le_bytes())?;
        } else {
            self.out.write_all(&[8u8])?;
            self.out.write_all(&len.to_le_bytes())?;
        }
        self.out.write_all(&tag.to_le_bytes())?;
        self.out.write_all(content)?;
        Ok(())
    }

    /// Write the per-stream header chunk (XML metadata).
    pub fn write_stream_header(&mut self, stream_id: u32, xml: &str) -> Result<(), XdfError> {
        let mut content = Vec::with_capacity(4 + xml.len());
        content.extend_from_slice(&stream_id.to_le_bytes());
        content.extend_from_slice(xml.as_bytes());
        self.write_chunk(TAG_STREAM_HEADER, &content)
    }

    /// Write one samples chunk. `samples` is channel-interleaved and must
    /// hold `timestamps.len() * channel_count` values.
    pub fn write_data_chunk(
        &mut self,
        stream_id: u32,
        timestamps: &[f64],
        samples: &[f64],
        channel_count: usize,
    ) -> Result<(), XdfError> {
        if samples.len() != timestamps.len() * channel_count {
            return Err(XdfError::Malformed(format!(
                "sample count {} does not match {} timestamps x {} channels",
                samples.len(),
                timestamps.len(),
                channel_count
            )));
        }
        let n = timestamps.len();
        let mut content = Vec::with_capacity(4 + 5 + n * (9 + channel_count * 8));
        content.extend_from_slice(&stream_id.to_le_bytes());
        content.push(4u8);
        content.extend_from_slice(&(n as u32).to_le_bytes());
        for (i, ts) in timestamps.iter().enumerate() {
            content.push(8u8);
            content.extend_from_slice(&ts.to_le_bytes());
            for value in &samples[i * channel_count..(i + 1) * channel_count] {
                content.extend_from_slice(&value.to_le_bytes());
            }
        }
        self.write_chunk(TAG_SAMPLES, &content)
    }

    /// Write a boundary chunk (seek anchor; precedes the footer here).
    pub fn write_boundary_chunk(&mut self) -> Result<(), XdfError> {
        self.write_chunk(TAG_BOUNDARY, &BOUNDARY_UUID)
    }

    /// Write the per-stream footer chunk (XML metadata).
    pub fn write_stream_footer(&mut self, stream_id: u32, xml: &str) -> Result<(), XdfError> {
        let mut content = Vec::with_capacity(4 + xml.len());
        content.extend_from_slice(&stream_id.to_le_bytes());
        content.extend_from_slice(xml.as_bytes());
        self.write_chunk(TAG_STREAM_FOOTER, &content)?;
        self.out.flush()?;
        Ok(())
    }

    /// Recover the underlying sink.
    pub fn into_inner(self) -> W {
        self.out
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// One stream recovered from a container.
#[derive(Debug, Default)]
pub struct XdfStream {
    pub id: u32,
    pub header_xml: String,
    pub footer_xml: Option<String>,
    pub channel_count: usize,
    pub nominal_srate: f64,
    /// Channel-interleaved sample values.
    pub samples: Vec<f64>,
    pub timestamps: Vec<f64>,
}

impl XdfStream {
    /// Number of complete samples held.
    pub fn len(&self) -> usize {
        if self.channel_count == 0 {
            0
        } else {
            self.samples.len() / self.channel_count
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extract the text of `<tag>...</tag>` from a flat XML fragment.
pub fn xml_field<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}

/// Read every stream from a container file.
pub fn read_file(path: &Path) -> Result<Vec<XdfStream>, XdfError> {
    let file = File::open(path)?;
    read_streams(BufReader::new(file))
}

/// Read every stream from a container byte source.
pub fn read_streams<R: Read>(mut input: R) -> Result<Vec<XdfStream>, XdfError> {
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(XdfError::Malformed("bad file magic".into()));
    }

    let mut streams: Vec<XdfStream> = Vec::new();
    loop {
        let mut numlen = [0u8; 1];
        match input.read_exact(&mut numlen) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let len = read_uint(&mut input, numlen[0] as usize)?;
        if len < 2 {
            return Err(XdfError::Malformed("chunk shorter than its tag".into()));
        }
        let mut content = vec![0u8; len as usize - 2];
        let mut tag_bytes = [0u8; 2];
        input.read_exact(&mut tag_bytes)?;
        input.read_exact(&mut content)?;
        let tag = u16::from_le_bytes(tag_bytes);

        match tag {
            TAG_STREAM_HEADER => {
                let (id, xml) = split_stream_chunk(&content)?;
                let mut stream = XdfStream {
                    id,
                    header_xml: xml.to_string(),
                    ..Default::default()
                };
                let format = xml_field(xml, "channel_format").unwrap_or("double64");
                if format != "double64" {
                    return Err(XdfError::Unsupported(format!(
                        "channel_format '{}'",
                        format
                    )));
                }
                stream.channel_count = xml_field(xml, "channel_count")
                    .and_then(|v| v.trim().parse().ok())
                    .ok_or_else(|| {
                        XdfError::Malformed("stream header lacks channel_count".into())
                    })?;
                stream.nominal_srate = xml_field(xml, "nominal_srate")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0.0);
                streams.push(stream);
            }
            TAG_SAMPLES => parse_samples_chunk(&content, &mut streams)?,
            TAG_STREAM_FOOTER => {
                let (id, xml) = split_stream_chunk(&content)?;
                if let Some(stream) = streams.iter_mut().find(|s| s.id == id) {
                    stream.footer_xml = Some(xml.to_string());
                }
            }
            // File header, clock offsets and boundaries carry nothing we need.
            TAG_FILE_HEADER | TAG_CLOCK_OFFSET | TAG_BOUNDARY => {}
            other => {
                return Err(XdfError::Unsupported(format!("chunk tag {}", other)));
            }
        }
    }
    Ok(streams)
}

fn read_uint<R: Read>(input: &mut R, numlen: usize) -> Result<u64, XdfError> {
    match numlen {
        1 => {
            let mut b = [0u8; 1];
            input.read_exact(&mut b)?;
            Ok(b[0] as u64)
        }
        4 => {
            let mut b = [0u8; 4];
            input.read_exact(&mut b)?;
            Ok(u32::from_le_bytes(b) as u64)
        }
        8 => {
            let mut b = [0u8; 8];
            input.read_exact(&mut b)?;
            Ok(u64::from_le_bytes(b))
        }
        other => Err(XdfError::Malformed(format!(
            "invalid length-of-length {}",
            other
        ))),
    }
}

fn split_stream_chunk(content: &[u8]) -> Result<(u32, &str), XdfError> {
    if content.len() < 4 {
        return Err(XdfError::Malformed("stream chunk too short".into()));
    }
    let id = u32::from_le_bytes([content[0], content[1], content[2], content[3]]);
    let xml = std::str::from_utf8(&content[4..])
        .map_err(|_| XdfError::Malformed("stream XML is not UTF-8".into()))?;
    Ok((id, xml))
}

fn parse_samples_chunk(content: &[u8], streams: &mut [XdfStream]) -> Result<(), XdfError> {
    let mut cursor = io::Cursor::new(content);
    let mut id_bytes = [0u8; 4];
    cursor.read_exact(&mut id_bytes)?;
    let id = u32::from_le_bytes(id_bytes);
    let stream = streams
        .iter_mut()
        .find(|s| s.id == id)
        .ok_or_else(|| XdfError::Malformed(format!("samples for unknown stream {}", id)))?;

    let mut numlen = [0u8; 1];
    cursor.read_exact(&mut numlen)?;
    let count = read_uint(&mut cursor, numlen[0] as usize)?;

    let mut value = [0u8; 8];
    for _ in 0..count {
        let mut ts_len = [0u8; 1];
        cursor.read_exact(&mut ts_len)?;
        let ts = match ts_len[0] {
            0 => stream.timestamps.last().copied().unwrap_or(0.0),
            8 => {
                cursor.read_exact(&mut value)?;
                f64::from_le_bytes(value)
            }
            other => {
                return Err(XdfError::Malformed(format!(
                    "invalid timestamp length {}",
                    other
                )))
            }
        };
        stream.timestamps.push(ts);
        for _ in 0..stream.channel_count {
            cursor.read_exact(&mut value)?;
            stream.samples.push(f64::from_le_bytes(value));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_xml(channels: usize, rate: u32) -> String {
        format!(
            "<?xml version=\"1.0\"?><info><name>Test</name><type>EEG</type>\
             <channel_count>{}</channel_count><nominal_srate>{}</nominal_srate>\
             <channel_format>double64</channel_format><created_at>0</created_at></info>",
            channels, rate
        )
    }

    #[test]
    fn round_trip_single_stream() {
        let mut bytes = Vec::new();
        {
            let mut writer = XdfWriter::new(&mut bytes).unwrap();
            writer.write_stream_header(0, &header_xml(2, 1000)).unwrap();
            writer
                .write_data_chunk(0, &[0.0], &[1.0, -2.0], 2)
                .unwrap();
            writer
                .write_data_chunk(0, &[0.001], &[3.0, -4.0], 2)
                .unwrap();
            writer.write_boundary_chunk().unwrap();
            writer
                .write_stream_footer(0, "<?xml version=\"1.0\"?><info></info>")
                .unwrap();
        }

        let streams = read_streams(&bytes[..]).unwrap();
        assert_eq!(streams.len(), 1);
        let s = &streams[0];
        assert_eq!(s.channel_count, 2);
        assert_eq!(s.nominal_srate, 1000.0);
        assert_eq!(s.len(), 2);
        assert_eq!(s.samples, vec![1.0, -2.0, 3.0, -4.0]);
        assert_eq!(s.timestamps, vec![0.0, 0.001]);
        assert!(s.footer_xml.is_some());
    }

    #[test]
    fn multi_sample_chunk() {
        let mut bytes = Vec::new();
        {
            let mut writer = XdfWriter::new(&mut bytes).unwrap();
            writer.write_stream_header(3, &header_xml(1, 500)).unwrap();
            writer
                .write_data_chunk(3, &[0.0, 0.002, 0.004], &[5.0, 6.0, 7.0], 1)
                .unwrap();
            writer.write_stream_footer(3, "<info></info>").unwrap();
        }
        let streams = read_streams(&bytes[..]).unwrap();
        assert_eq!(streams[0].len(), 3);
        assert_eq!(streams[0].samples, vec![5.0, 6.0, 7.0]);
    }

    #[test]
    fn mismatched_sample_count_is_rejected() {
        let mut bytes = Vec::new();
        let mut writer = XdfWriter::new(&mut bytes).unwrap();
        let err = writer.write_data_chunk(0, &[0.0], &[1.0, 2.0, 3.0], 2);
        assert!(err.is_err());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let err = read_streams(&b"NOPE"[..]).unwrap_err();
        assert!(matches!(err, XdfError::Malformed(_)));
    }

    #[test]
    fn xml_field_extracts_values() {
        let xml = header_xml(96, 30_000);
        assert_eq!(xml_field(&xml, "channel_count"), Some("96"));
        assert_eq!(xml_field(&xml, "nominal_srate"), Some("30000"));
        assert_eq!(xml_field(&xml, "missing"), None);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.xdf");
        {
            let mut writer = XdfWriter::create(&path).unwrap();
            writer.write_stream_header(0, &header_xml(1, 100)).unwrap();
            writer.write_data_chunk(0, &[0.5], &[9.0], 1).unwrap();
            writer.write_boundary_chunk().unwrap();
            writer.write_stream_footer(0, "<info></info>").unwrap();
        }
        let streams = read_file(&path).unwrap();
        assert_eq!(streams[0].samples, vec![9.0]);
    }
}
