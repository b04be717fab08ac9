//! Audio frame sources.
//!
//! A [`FrameSource`] feeds the pipeline with fixed-duration PCM frames.
//! Capture devices are out of scope; the built-in sources replay WAV data
//! and scripted sample buffers.

use crate::defaults::SAMPLE_RATE;
use crate::error::{PipelineError, Result};
use crate::pipeline::frame::AudioFrame;
use std::io::Read;

/// Frame duration produced by the built-in sources, in milliseconds.
pub const FRAME_MS: u32 = 100;

/// Produces audio frames in stream order.
pub trait FrameSource: Send {
    /// Returns the next frame, or `None` when the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<AudioFrame>>;

    /// Sample rate of the frames this source produces, in Hz.
    fn sample_rate(&self) -> u32;
}

/// Frame source that replays WAV file data.
///
/// Accepts arbitrary sample rates and channel counts, downmixing to mono
/// and resampling to 16kHz.
pub struct WavFrameSource {
    samples: Vec<i16>,
    position: usize,
    frame_size: usize,
    sequence: u64,
}

impl WavFrameSource {
    /// Creates a source from any reader containing WAV data.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| PipelineError::Audio {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        let source_rate = spec.sample_rate;
        let source_channels = spec.channels;

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::Audio {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        // Downmix stereo to mono
        let mono_samples = if source_channels == 2 {
            raw_samples
                .chunks_exact(2)
                .map(|pair| {
                    let left = pair[0] as i32;
                    let right = pair[1] as i32;
                    ((left + right) / 2) as i16
                })
                .collect()
        } else {
            raw_samples
        };

        let samples = if source_rate != SAMPLE_RATE {
            resample(&mono_samples, source_rate, SAMPLE_RATE)
        } else {
            mono_samples
        };

        let frame_size = (SAMPLE_RATE * FRAME_MS / 1000) as usize;

        Ok(Self {
            samples,
            position: 0,
            frame_size,
            sequence: 0,
        })
    }
}

impl FrameSource for WavFrameSource {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        if self.position >= self.samples.len() {
            return Ok(None);
        }

        let end = std::cmp::min(self.position + self.frame_size, self.samples.len());
        let samples = self.samples[self.position..end].to_vec();
        let timestamp_ms = self.position as u64 * 1000 / SAMPLE_RATE as u64;
        self.position = end;

        let frame = AudioFrame::new(self.sequence, timestamp_ms, samples);
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Scripted source for tests: serves pre-built frames in order.
pub struct ScriptedFrameSource {
    frames: std::collections::VecDeque<AudioFrame>,
    sample_rate: u32,
}

impl ScriptedFrameSource {
    /// Creates a source that serves `frames` in order, then reports end of
    /// stream.
    pub fn new(frames: Vec<AudioFrame>, sample_rate: u32) -> Self {
        Self {
            frames: frames.into(),
            sample_rate,
        }
    }

    /// Builds a source of `count` uniform 100ms frames filled with
    /// `amplitude`, timestamped contiguously from zero.
    pub fn uniform(count: usize, amplitude: i16) -> Self {
        let frame_size = (SAMPLE_RATE * FRAME_MS / 1000) as usize;
        let frames = (0..count)
            .map(|i| {
                AudioFrame::new(
                    i as u64,
                    i as u64 * FRAME_MS as u64,
                    vec![amplitude; frame_size],
                )
            })
            .collect();
        Self::new(frames, SAMPLE_RATE)
    }
}

impl FrameSource for ScriptedFrameSource {
    fn next_frame(&mut self) -> Result<Option<AudioFrame>> {
        Ok(self.frames.pop_front())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
