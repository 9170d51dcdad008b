//! Dataset readers for the replayer.
//!
//! Two on-disk formats: the `.spike` raw matrix (32-bit signed values at
//! the probe's native 30 kHz) accessed through a memory map, and the `.xdf`
//! recording container written by the processor. Requested channels beyond
//! the dataset's width wrap around (channel tiling), so a narrow dataset
//! can exercise a wide configuration.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use spike_core::xdf;

use crate::error::SourceError;

/// Native sampling rate of `.spike` matrix files (Utah array probes).
pub const SPIKE_MATRIX_RATE: f64 = 30_000.0;

/// Magic bytes opening a `.spike` matrix file.
pub const SPIKE_MAGIC: &[u8; 4] = b"SPKE";

/// Byte offset of matrix data: magic + channel count + reserved + length.
const SPIKE_HEADER_LEN: usize = 20;

/// A replayable recording.
#[derive(Debug)]
pub enum Dataset {
    Matrix(SpikeMatrixDataset),
    Container(XdfDataset),
}

impl Dataset {
    /// Open a dataset, dispatching on the file extension.
    pub fn open(path: &str) -> Result<Self, SourceError> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "spike" => Ok(Dataset::Matrix(SpikeMatrixDataset::open(path)?)),
            "xdf" => Ok(Dataset::Container(XdfDataset::open(path)?)),
            other => Err(SourceError::UnsupportedExtension(other.to_string())),
        }
    }

    /// Native sampling rate of the recording in Hz.
    pub fn native_rate(&self) -> f64 {
        match self {
            Dataset::Matrix(_) => SPIKE_MATRIX_RATE,
            Dataset::Container(d) => d.nominal_srate,
        }
    }

    /// Channels present in the recording.
    pub fn channel_count(&self) -> usize {
        match self {
            Dataset::Matrix(d) => d.n_channel,
            Dataset::Container(d) => d.channel_count,
        }
    }

    /// Samples in the recording.
    pub fn len(&self) -> u64 {
        match self {
            Dataset::Matrix(d) => d.n_samples,
            Dataset::Container(d) => d.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill one output sample at dataset position `ts`. Output channels
    /// beyond the dataset width tile over the available channels.
    pub fn fill_sample(&self, ts: u64, out: &mut [f64]) {
        let width = self.channel_count();
        for (j, value) in out.iter_mut().enumerate() {
            *value = self.value(ts, j % width);
        }
    }

    fn value(&self, ts: u64, channel: usize) -> f64 {
        match self {
            Dataset::Matrix(d) => d.value(ts, channel),
            Dataset::Container(d) => d.value(ts, channel),
        }
    }
}

/// Memory-mapped `.spike` matrix: header then sample-major i32 LE values.
#[derive(Debug)]
pub struct SpikeMatrixDataset {
    map: Mmap,
    n_channel: usize,
    n_samples: u64,
}

impl SpikeMatrixDataset {
    pub fn open(path: &str) -> Result<Self, SourceError> {
        let io_err = |source| SourceError::Io {
            path: path.to_string(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        // Safety: the file is opened read-only and mapped privately.
        let map = unsafe { Mmap::map(&file) }.map_err(io_err)?;

        let malformed = |reason: &str| SourceError::Malformed {
            path: path.to_string(),
            reason: reason.to_string(),
        };
        if map.len() < SPIKE_HEADER_LEN {
            return Err(malformed("file shorter than its header"));
        }
        if &map[0..4] != SPIKE_MAGIC {
            return Err(malformed("bad magic"));
        }
        let n_channel = u32::from_le_bytes([map[4], map[5], map[6], map[7]]) as usize;
        let n_samples = u64::from_le_bytes([
            map[12], map[13], map[14], map[15], map[16], map[17], map[18], map[19],
        ]);
        if n_channel == 0 || n_samples == 0 {
            return Err(malformed("empty matrix"));
        }
        let expected = SPIKE_HEADER_LEN as u64 + n_samples * n_channel as u64 * 4;
        if (map.len() as u64) < expected {
            return Err(malformed("matrix data truncated"));
        }
        log::info!(
            "matrix dataset '{}': {} samples x {} channels @ {} Hz",
            path,
            n_samples,
            n_channel,
            SPIKE_MATRIX_RATE
        );
        Ok(Self {
            map,
            n_channel,
            n_samples,
        })
    }

    #[inline]
    fn value(&self, ts: u64, channel: usize) -> f64 {
        let off = SPIKE_HEADER_LEN + (ts as usize * self.n_channel + channel) * 4;
        let bytes = [
            self.map[off],
            self.map[off + 1],
            self.map[off + 2],
            self.map[off + 3],
        ];
        i32::from_le_bytes(bytes) as f64
    }
}

/// Write a `.spike` matrix file from sample-major values. The replayer's
/// counterpart for producing test and demo datasets.
pub fn write_matrix(path: &str, n_channel: usize, values: &[i32]) -> Result<(), SourceError> {
    use std::io::Write;

    assert!(n_channel > 0 && values.len() % n_channel == 0);
    let io_err = |source| SourceError::Io {
        path: path.to_string(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut out = std::io::BufWriter::new(file);
    let mut write = |bytes: &[u8]| out.write_all(bytes).map_err(io_err);
    write(SPIKE_MAGIC)?;
    write(&(n_channel as u32).to_le_bytes())?;
    write(&0u32.to_le_bytes())?;
    write(&((values.len() / n_channel) as u64).to_le_bytes())?;
    for v in values {
        write(&v.to_le_bytes())?;
    }
    out.into_inner()
        .map_err(|e| SourceError::Io {
            path: path.to_string(),
            source: e.into_error(),
        })?
        .sync_all()
        .map_err(io_err)
}

/// First stream of a recording container, loaded whole for replay.
#[derive(Debug)]
pub struct XdfDataset {
    samples: Vec<f64>,
    channel_count: usize,
    nominal_srate: f64,
    len: u64,
}

impl XdfDataset {
    pub fn open(path: &str) -> Result<Self, SourceError> {
        let streams = xdf::read_file(Path::new(path))?;
        let stream = streams.into_iter().next().ok_or(SourceError::Malformed {
            path: path.to_string(),
            reason: "container holds no streams".into(),
        })?;
        if stream.channel_count == 0 || stream.is_empty() {
            return Err(SourceError::Malformed {
                path: path.to_string(),
                reason: "first stream is empty".into(),
            });
        }
        if stream.nominal_srate <= 0.0 {
            return Err(SourceError::Malformed {
                path: path.to_string(),
                reason: "first stream has no nominal rate".into(),
            });
        }
        log::info!(
            "container dataset '{}': {} samples x {} channels @ {} Hz",
            path,
            stream.len(),
            stream.channel_count,
            stream.nominal_srate
        );
        Ok(Self {
            len: stream.len() as u64,
            channel_count: stream.channel_count,
            nominal_srate: stream.nominal_srate,
            samples: stream.samples,
        })
    }

    #[inline]
    fn value(&self, ts: u64, channel: usize) -> f64 {
        self.samples[ts as usize * self.channel_count + channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spike_core::xdf::XdfWriter;

    #[test]
    fn matrix_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.spike");
        let path = path.to_str().unwrap();
        // 3 samples x 2 channels, sample-major.
        write_matrix(path, 2, &[10, -20, 30, -40, 50, -60]).unwrap();

        let ds = Dataset::open(path).unwrap();
        assert_eq!(ds.channel_count(), 2);
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.native_rate(), 30_000.0);

        let mut out = [0.0; 2];
        ds.fill_sample(0, &mut out);
        assert_eq!(out, [10.0, -20.0]);
        ds.fill_sample(2, &mut out);
        assert_eq!(out, [50.0, -60.0]);
    }

    #[test]
    fn channel_tiling_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.spike");
        let path = path.to_str().unwrap();
        write_matrix(path, 2, &[1, 2]).unwrap();

        let ds = Dataset::open(path).unwrap();
        let mut out = [0.0; 5];
        ds.fill_sample(0, &mut out);
        assert_eq!(out, [1.0, 2.0, 1.0, 2.0, 1.0]);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let err = Dataset::open("data/recording.mat").unwrap_err();
        assert!(matches!(err, SourceError::UnsupportedExtension(_)));
    }

    #[test]
    fn truncated_matrix_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.spike");
        std::fs::write(&path, b"SPKE1234").unwrap();
        let err = Dataset::open(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }));
    }

    #[test]
    fn container_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unit.xdf");
        {
            let mut writer = XdfWriter::create(&path).unwrap();
            let xml = "<?xml version=\"1.0\"?><info><name>T</name><type>EEG</type>\
                       <channel_count>2</channel_count><nominal_srate>1000</nominal_srate>\
                       <channel_format>double64</channel_format></info>";
            writer.write_stream_header(0, xml).unwrap();
            writer
                .write_data_chunk(0, &[0.0, 0.001], &[1.0, 2.0, 3.0, 4.0], 2)
                .unwrap();
            writer.write_boundary_chunk().unwrap();
            writer.write_stream_footer(0, "<info></info>").unwrap();
        }

        let ds = Dataset::open(path.to_str().unwrap()).unwrap();
        assert_eq!(ds.native_rate(), 1000.0);
        assert_eq!(ds.len(), 2);
        let mut out = [0.0; 2];
        ds.fill_sample(1, &mut out);
        assert_eq!(out, [3.0, 4.0]);
    }
}
