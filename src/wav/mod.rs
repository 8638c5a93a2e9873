//! Sample-format registry and WAV assembly.
//!
//! Extraction writes canonical 44-byte-header WAV files: PCM format `1`
//! for the integer kinds, IEEE-float format `3` for `Float32`. Samples
//! are collected per channel into chunked buffers and interleaved at
//! finalization time; no decoding or resampling happens here.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use zerocopy::IntoBytes;
use zerocopy::{LE, U16, U32};
use zerocopy_derive::{Immutable, IntoBytes as DeriveIntoBytes};

use crate::common::{ChunkedBuffer, Error, Result};

/// Sample formats carried by AUP3 sequences.
///
/// The discriminants are the editor's on-disk format codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SampleFormat {
    Int16 = 0x0002_0001,
    Int24 = 0x0004_0001,
    Float32 = 0x0004_000F,
}

impl SampleFormat {
    /// Packed sample width used in WAV output. `Int24` is three bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 => 3,
            SampleFormat::Float32 => 4,
        }
    }

    /// Sample width inside store rows, where `Int24` occupies four
    /// aligned bytes.
    pub fn disk_bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int24 => 4,
            SampleFormat::Float32 => 4,
        }
    }
}

impl TryFrom<i32> for SampleFormat {
    type Error = Error;

    fn try_from(raw: i32) -> Result<Self> {
        match raw {
            0x0002_0001 => Ok(SampleFormat::Int16),
            0x0004_0001 => Ok(SampleFormat::Int24),
            0x0004_000F => Ok(SampleFormat::Float32),
            other => Err(Error::UnsupportedSampleFormat(format!("{other:#010x}"))),
        }
    }
}

impl FromStr for SampleFormat {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "int16" => Ok(SampleFormat::Int16),
            "int24" => Ok(SampleFormat::Int24),
            "float" => Ok(SampleFormat::Float32),
            other => Err(Error::UnsupportedSampleFormat(other.to_owned())),
        }
    }
}

/// Canonical 44-byte WAV header.
#[derive(DeriveIntoBytes, Immutable)]
#[repr(C)]
struct WavHeader {
    riff: [u8; 4],
    chunk_size: U32<LE>,
    format: [u8; 4],
    subchunk1_id: [u8; 4],
    subchunk1_size: U32<LE>,
    audio_format: U16<LE>,
    num_channels: U16<LE>,
    sample_rate: U32<LE>,
    byte_rate: U32<LE>,
    block_align: U16<LE>,
    bits_per_sample: U16<LE>,
    subchunk2_id: [u8; 4],
    subchunk2_size: U32<LE>,
}

/// WAV assembler collecting raw sample bytes per channel.
pub struct WaveFile {
    path: PathBuf,
    format: SampleFormat,
    sample_rate: u32,
    channels: Vec<ChunkedBuffer>,
}

impl WaveFile {
    pub fn new(
        path: impl Into<PathBuf>,
        format: SampleFormat,
        sample_rate: u32,
        num_channels: u16,
    ) -> Self {
        let mut channels = Vec::with_capacity(num_channels as usize);
        channels.resize_with(num_channels as usize, ChunkedBuffer::new);

        Self {
            path: path.into(),
            format,
            sample_rate,
            channels,
        }
    }

    /// Append raw sample bytes to one channel.
    pub fn write_block(&mut self, data: &[u8], channel: usize) {
        self.channels[channel].append(data);
    }

    /// Write the header and the interleaved sample data. Channels
    /// shorter than the longest one are padded with zero bytes.
    pub fn finalize(&self) -> Result<()> {
        let bytes_per_sample = self.format.bytes_per_sample();
        let num_channels = self.channels.len();

        let max_channel_size = self
            .channels
            .iter()
            .map(ChunkedBuffer::len)
            .max()
            .unwrap_or(0);

        let data_size = (num_channels * max_channel_size) as u32;

        let header = WavHeader {
            riff: *b"RIFF",
            chunk_size: U32::new(36 + data_size),
            format: *b"WAVE",
            subchunk1_id: *b"fmt ",
            subchunk1_size: U32::new(16),
            audio_format: U16::new(if self.format == SampleFormat::Float32 { 3 } else { 1 }),
            num_channels: U16::new(num_channels as u16),
            sample_rate: U32::new(self.sample_rate),
            byte_rate: U32::new(self.sample_rate * (num_channels * bytes_per_sample) as u32),
            block_align: U16::new((num_channels * bytes_per_sample) as u16),
            bits_per_sample: U16::new((bytes_per_sample * 8) as u16),
            subchunk2_id: *b"data",
            subchunk2_size: U32::new(data_size),
        };

        let mut file = BufWriter::new(File::create(&self.path)?);
        file.write_all(header.as_bytes())?;

        let max_samples = max_channel_size / bytes_per_sample;
        let mut frame = vec![0u8; num_channels * bytes_per_sample];

        for sample_index in 0..max_samples {
            let offset = sample_index * bytes_per_sample;

            for (channel_index, channel) in self.channels.iter().enumerate() {
                let slot =
                    &mut frame[channel_index * bytes_per_sample..(channel_index + 1) * bytes_per_sample];
                let copied = channel.read(offset, slot);
                slot[copied..].fill(0);
            }

            file.write_all(&frame)?;
        }

        file.flush()?;
        Ok(())
    }
}
