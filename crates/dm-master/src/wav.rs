//! WAV encoding of the stereo output, and decoding of PCM sounds.

use dm_engine::Frame;
use dm_ir::SampleWidth;
use std::io::{self, Write};
use thiserror::Error;

use crate::cue::{Sound, SoundData};

const WAVE_FORMAT_PCM: u16 = 1;
/// Size of a PCM `fmt ` chunk body.
const FMT_LEN: u32 = 16;
/// RIFF header, `fmt ` chunk and `data` chunk header.
const HEADER_LEN: usize = 12 + 8 + FMT_LEN as usize + 8;

/// The `fmt ` chunk fields used for PCM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Format {
    tag: u16,
    channels: u16,
    sample_rate: u32,
    bits: u16,
}

impl Format {
    /// The mixer's output: interleaved stereo [`Frame`]s.
    fn output(sample_rate: u32) -> Self {
        Self {
            tag: WAVE_FORMAT_PCM,
            channels: 2,
            sample_rate,
            bits: SampleWidth::Bits16.bits() as u16,
        }
    }

    fn block_align(&self) -> u16 {
        self.channels * self.bits.div_ceil(8)
    }

    /// Sample width this crate can play, if any.
    fn width(&self) -> Option<SampleWidth> {
        if self.tag != WAVE_FORMAT_PCM {
            return None;
        }
        SampleWidth::from_bits(self.bits as u32)
    }

    fn parse(body: &[u8]) -> Result<Self, WavError> {
        let b = body.get(..FMT_LEN as usize).ok_or(WavError::Truncated("fmt"))?;
        let le16 = |i: usize| u16::from_le_bytes([b[i], b[i + 1]]);
        Ok(Self {
            tag: le16(0),
            channels: le16(2),
            sample_rate: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            bits: le16(14),
        })
    }

    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        let byte_rate = self.sample_rate * self.block_align() as u32;
        chunk_header(w, b"fmt ", FMT_LEN)?;
        for half in [self.tag, self.channels] {
            w.write_all(&half.to_le_bytes())?;
        }
        for word in [self.sample_rate, byte_rate] {
            w.write_all(&word.to_le_bytes())?;
        }
        for half in [self.block_align(), self.bits] {
            w.write_all(&half.to_le_bytes())?;
        }
        Ok(())
    }
}

fn chunk_header(w: &mut impl Write, id: &[u8; 4], len: u32) -> io::Result<()> {
    w.write_all(id)?;
    w.write_all(&len.to_le_bytes())
}

/// Write `frames` as a 16-bit stereo WAV stream.
pub fn write_wav(w: &mut impl Write, frames: &[Frame], sample_rate: u32) -> io::Result<()> {
    let format = Format::output(sample_rate);
    let data_len = frames
        .len()
        .checked_mul(format.block_align() as usize)
        .and_then(|n| u32::try_from(n).ok())
        .filter(|&n| n <= u32::MAX - HEADER_LEN as u32)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "too many frames for a WAV file"))?;

    chunk_header(w, b"RIFF", HEADER_LEN as u32 - 8 + data_len)?;
    w.write_all(b"WAVE")?;
    format.write(w)?;
    chunk_header(w, b"data", data_len)?;
    for frame in frames {
        w.write_all(&frame.left.to_le_bytes())?;
        w.write_all(&frame.right.to_le_bytes())?;
    }
    Ok(())
}

/// [`write_wav`] into memory.
pub fn frames_to_wav(frames: &[Frame], sample_rate: u32) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_LEN + frames.len() * 4);
    write_wav(&mut buf, frames, sample_rate)?;
    Ok(buf)
}

/// Errors decoding a WAV sound.
#[derive(Debug, Error)]
pub enum WavError {
    #[error("not a RIFF/WAVE file")]
    NotWave,
    #[error("truncated {0} chunk")]
    Truncated(&'static str),
    #[error("missing {0} chunk")]
    MissingChunk(&'static str),
    #[error("unsupported format: tag {format}, {bits} bits")]
    Unsupported { format: u16, bits: u16 },
}

/// Decode an 8- or 16-bit PCM WAV into a one-shot [`Sound`] at the file's
/// own rate. Multi-channel files keep only the first channel.
pub fn read_wav(name: &str, bytes: &[u8]) -> Result<Sound, WavError> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(WavError::NotWave);
    }

    let mut format: Option<Format> = None;
    let mut data: Option<&[u8]> = None;
    let mut rest = &bytes[12..];
    while rest.len() >= 8 {
        let id = &rest[0..4];
        let size = u32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let body = rest.get(8..8 + size);
        match id {
            b"fmt " => format = Some(Format::parse(body.ok_or(WavError::Truncated("fmt"))?)?),
            // Tolerate a data chunk cut short by a truncated file.
            b"data" => data = Some(body.unwrap_or(&rest[8..])),
            _ => {}
        }
        // Chunks are padded to an even size.
        let next = 8 + size + (size & 1);
        rest = rest.get(next..).unwrap_or(&[]);
    }

    let format = format.ok_or(WavError::MissingChunk("fmt"))?;
    let data = data.ok_or(WavError::MissingChunk("data"))?;
    let width = format
        .width()
        .filter(|_| format.channels > 0)
        .ok_or(WavError::Unsupported { format: format.tag, bits: format.bits })?;

    let stride = format.block_align() as usize;
    let frames = data.chunks_exact(stride);
    let sound_data = match width {
        // 8-bit WAV is unsigned.
        SampleWidth::Bits8 => SoundData::Pcm8(frames.map(|s| (s[0] ^ 0x80) as i8).collect()),
        SampleWidth::Bits16 => SoundData::Pcm16(frames.map(|s| i16::from_le_bytes([s[0], s[1]])).collect()),
    };
    Ok(Sound {
        name: name.to_string(),
        data: sound_data,
        frequency: format.sample_rate as f32,
        loop_len: 0,
    })
}
