//! Audio codec seam and the built-in raw PCM codec.
//!
//! Frames are mono `f32` at [`SAMPLE_RATE`], [`FRAME_SIZE`] samples each
//! (60 ms). Each peer owns its own decoder so concealment state never
//! leaks between streams.

use std::f32::consts::TAU;
use std::time::Duration;

use thiserror::Error;

/// Samples per frame.
pub const FRAME_SIZE: usize = 2880;
/// Samples per second.
pub const SAMPLE_RATE: u32 = 48_000;
/// Wall-clock length of one frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(60);

const SAMPLE_BYTES: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("compressed frame is {0} bytes, not a whole number of samples")]
    Misaligned(usize),
    #[error("compressed frame holds {0} samples, expected 2880")]
    WrongLength(usize),
}

/// Compresses outbound and decompresses inbound audio frames.
pub trait AudioCodec: Send {
    /// Compress exactly [`FRAME_SIZE`] samples.
    ///
    /// # Panics
    /// Implementations panic when `pcm.len() != FRAME_SIZE`.
    fn compress(&mut self, pcm: &[f32]) -> Result<Vec<u8>, CodecError>;

    /// Decompress one frame. `None` marks a lost frame and asks the codec
    /// to conceal it.
    fn decompress(&mut self, data: Option<&[u8]>) -> Result<Vec<f32>, CodecError>;
}

/// Uncompressed little-endian `f32` samples. Conceals loss with silence.
#[derive(Debug, Default, Clone)]
pub struct RawPcmCodec;

impl RawPcmCodec {
    pub fn new() -> Self {
        Self
    }
}

impl AudioCodec for RawPcmCodec {
    fn compress(&mut self, pcm: &[f32]) -> Result<Vec<u8>, CodecError> {
        assert_eq!(pcm.len(), FRAME_SIZE, "audio frame size mismatch");

        let mut out = Vec::with_capacity(FRAME_SIZE * SAMPLE_BYTES);
        for sample in pcm {
            out.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(out)
    }

    fn decompress(&mut self, data: Option<&[u8]>) -> Result<Vec<f32>, CodecError> {
        let Some(data) = data else {
            return Ok(vec![0.0; FRAME_SIZE]);
        };
        if data.len() % SAMPLE_BYTES != 0 {
            return Err(CodecError::Misaligned(data.len()));
        }
        if data.len() / SAMPLE_BYTES != FRAME_SIZE {
            return Err(CodecError::WrongLength(data.len() / SAMPLE_BYTES));
        }

        Ok(data
            .chunks_exact(SAMPLE_BYTES)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// Add `frame * volume` into `mix`, clamping to [-1, 1].
pub fn mix_into(mix: &mut [f32], frame: &[f32], volume: f32) {
    for (out, sample) in mix.iter_mut().zip(frame) {
        *out = (*out + sample * volume).clamp(-1.0, 1.0);
    }
}

/// Largest absolute sample in `frame`.
pub fn peak(frame: &[f32]) -> f32 {
    frame.iter().fold(0.0, |acc, s| acc.max(s.abs()))
}

/// Sine generator producing whole frames, for testing a link without a
/// capture device.
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    phase: f32,
    step: f32,
    amplitude: f32,
}

impl ToneGenerator {
    pub fn new(frequency_hz: f32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency_hz / SAMPLE_RATE as f32,
            amplitude: 0.25,
        }
    }

    pub fn next_frame(&mut self) -> Vec<f32> {
        let mut frame = Vec::with_capacity(FRAME_SIZE);
        for _ in 0..FRAME_SIZE {
            frame.push(self.phase.sin() * self.amplitude);
            self.phase = (self.phase + self.step) % TAU;
        }
        frame
    }
}
