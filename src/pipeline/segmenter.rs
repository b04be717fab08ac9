//! Adaptive audio segmentation.
//!
//! Folds incoming frames into bounded, overlapping chunks. Boundaries are
//! placed at sustained silence once a minimum duration is reached, forced
//! at a maximum duration, and steered toward a target duration that adapts
//! to the speaker's observed utterance lengths.

use crate::defaults;
use crate::error::{PipelineError, Result};
use crate::pipeline::frame::{AudioFrame, Chunk};
use crate::vad::VoiceActivityDetector;
use serde::Deserialize;
use tracing::{debug, warn};

/// Segmentation tuning. All durations in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Initial target chunk duration; the adaptive target starts here.
    pub chunk_ms: u32,
    /// Chunks are never cut on silence before this duration.
    pub min_chunk_ms: u32,
    /// A cut is forced at this duration regardless of silence.
    pub max_chunk_ms: u32,
    /// Audio carried from the end of one chunk into the next.
    pub overlap_ms: u32,
    /// Hard cap on buffered audio; reaching it forces an emergency flush.
    pub buffer_ms: u32,
    /// Sustained silence that closes a chunk past the minimum duration.
    pub silence_threshold_ms: u32,
    /// Smoothing factor for the adaptive target, in `(0, 1]`.
    pub ema_alpha: f32,
    /// Sample rate of incoming frames, in Hz.
    pub sample_rate: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            chunk_ms: defaults::CHUNK_MS,
            min_chunk_ms: defaults::MIN_CHUNK_MS,
            max_chunk_ms: defaults::MAX_CHUNK_MS,
            overlap_ms: defaults::OVERLAP_MS,
            buffer_ms: defaults::BUFFER_MS,
            silence_threshold_ms: defaults::SILENCE_THRESHOLD_MS,
            ema_alpha: defaults::EMA_ALPHA,
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

impl SegmenterConfig {
    /// Validates cross-field constraints, failing fast before the pipeline
    /// starts.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PipelineError::InvalidConfiguration {
                key: "sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.min_chunk_ms > self.chunk_ms || self.chunk_ms > self.max_chunk_ms {
            return Err(PipelineError::InvalidConfiguration {
                key: "chunk_ms".to_string(),
                message: format!(
                    "must satisfy min_chunk_ms <= chunk_ms <= max_chunk_ms \
                     ({} <= {} <= {})",
                    self.min_chunk_ms, self.chunk_ms, self.max_chunk_ms
                ),
            });
        }
        if self.overlap_ms >= self.chunk_ms {
            return Err(PipelineError::InvalidConfiguration {
                key: "overlap_ms".to_string(),
                message: format!(
                    "overlap ({}) must be smaller than chunk_ms ({})",
                    self.overlap_ms, self.chunk_ms
                ),
            });
        }
        if (self.buffer_ms as f64) < 1.5 * self.chunk_ms as f64 {
            return Err(PipelineError::InvalidConfiguration {
                key: "buffer_ms".to_string(),
                message: format!(
                    "buffer ({}) must be at least 1.5x chunk_ms ({})",
                    self.buffer_ms, self.chunk_ms
                ),
            });
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(PipelineError::InvalidConfiguration {
                key: "ema_alpha".to_string(),
                message: "must be in (0, 1]".to_string(),
            });
        }
        Ok(())
    }

    fn overlap_samples(&self) -> usize {
        (self.sample_rate as u64 * self.overlap_ms as u64 / 1000) as usize
    }
}

/// Folds frames into chunks with adaptive boundaries.
///
/// Without a voice activity detector the segmenter degrades to fixed-size
/// chunking at `chunk_ms`.
pub struct AdaptiveSegmenter {
    config: SegmenterConfig,
    vad: Option<Box<dyn VoiceActivityDetector>>,
    /// Overlap seed followed by appended frame samples.
    buffer: Vec<i16>,
    /// Length of the overlap seed at the front of `buffer`.
    overlap_len: usize,
    /// Milliseconds appended since the last emit (excludes the seed).
    content_ms: u32,
    silence_run_ms: u32,
    has_speech: bool,
    /// EMA-adapted target chunk duration.
    target_ms: f32,
    generation: u64,
    chunk_start_ms: u64,
    /// Stream position after the last pushed frame.
    stream_ms: u64,
    warned_no_vad: bool,
}

impl AdaptiveSegmenter {
    pub fn new(config: SegmenterConfig, vad: Option<Box<dyn VoiceActivityDetector>>) -> Self {
        let target_ms = config.chunk_ms as f32;
        Self {
            config,
            vad,
            buffer: Vec::new(),
            overlap_len: 0,
            content_ms: 0,
            silence_run_ms: 0,
            has_speech: false,
            target_ms,
            generation: 0,
            chunk_start_ms: 0,
            stream_ms: 0,
            warned_no_vad: false,
        }
    }

    /// Current adaptive target duration in milliseconds.
    pub fn target_ms(&self) -> u32 {
        self.target_ms as u32
    }

    /// Swaps in new tuning. Callers apply this only between chunks; the
    /// adaptive target restarts at the new `chunk_ms`.
    pub fn apply_config(&mut self, config: SegmenterConfig) {
        self.target_ms = config.chunk_ms as f32;
        self.config = config;
    }

    /// Consumes one frame and returns a chunk if it closed a boundary.
    ///
    /// `BufferOverflow` errors carry the force-flushed chunk; the caller
    /// logs the overflow and forwards the chunk so no audio is lost.
    pub fn push(&mut self, frame: &AudioFrame) -> Result<Option<Chunk>> {
        let frame_ms = frame.duration_ms(self.config.sample_rate);
        if self.buffer.is_empty() && self.content_ms == 0 {
            self.chunk_start_ms = frame.timestamp_ms;
        }
        self.stream_ms = frame.timestamp_ms + frame_ms as u64;

        let Some(vad) = self.vad.as_mut() else {
            if !self.warned_no_vad {
                warn!("no voice activity detector, degrading to fixed-size chunking");
                self.warned_no_vad = true;
            }
            self.buffer.extend_from_slice(&frame.samples);
            self.content_ms += frame_ms;
            self.has_speech = true;
            if self.content_ms >= self.config.chunk_ms {
                return Ok(Some(self.emit(false, false)));
            }
            return Ok(None);
        };

        let assessment = vad.assess(frame);
        self.buffer.extend_from_slice(&frame.samples);
        self.content_ms += frame_ms;
        if assessment.is_speech {
            self.silence_run_ms = 0;
            self.has_speech = true;
        } else {
            self.silence_run_ms += frame_ms;
        }

        if !self.has_speech {
            // Leading silence never becomes a chunk; keep only the seed.
            if self.silence_run_ms >= self.config.silence_threshold_ms {
                self.buffer.truncate(self.overlap_len);
                self.content_ms = 0;
                self.silence_run_ms = 0;
                self.chunk_start_ms = self.stream_ms - self.seed_ms();
            }
            return Ok(None);
        }

        if self.content_ms >= self.config.buffer_ms {
            let chunk = self.emit(false, true);
            return Err(PipelineError::BufferOverflow {
                generation: chunk.generation,
                chunk: Box::new(chunk),
            });
        }

        let sustained = self.silence_run_ms >= self.config.silence_threshold_ms;
        let forced = self.content_ms >= self.config.max_chunk_ms;
        let at_target = self.content_ms >= self.target_ms as u32 && !assessment.is_speech;
        let natural = self.content_ms >= self.config.min_chunk_ms && (sustained || at_target);

        if forced || natural {
            if natural {
                self.adapt_target();
            }
            // A sustained-silence cut closes the utterance; a forced or
            // at-target cut may land mid-speech.
            return Ok(Some(self.emit(sustained, false)));
        }
        Ok(None)
    }

    /// Emits whatever speech remains as a final chunk. Called at end of
    /// stream.
    pub fn flush(&mut self) -> Option<Chunk> {
        if !self.has_speech || self.content_ms == 0 {
            return None;
        }
        Some(self.emit(true, false))
    }

    /// Pulls the adaptive target toward the just-finished speech run.
    fn adapt_target(&mut self) {
        let run_ms = self.content_ms.saturating_sub(self.silence_run_ms) as f32;
        let alpha = self.config.ema_alpha;
        let blended = alpha * run_ms + (1.0 - alpha) * self.target_ms;
        self.target_ms = blended.clamp(
            self.config.min_chunk_ms as f32,
            self.config.max_chunk_ms as f32,
        );
        debug!(target_ms = self.target_ms as u32, "adapted chunk target");
    }

    /// Cuts a chunk from the buffer. Final chunks end an utterance, so no
    /// overlap is carried into the next one.
    fn emit(&mut self, is_final: bool, truncated: bool) -> Chunk {
        let samples = std::mem::take(&mut self.buffer);

        if !is_final {
            let tail_len = self.config.overlap_samples().min(samples.len());
            self.buffer = samples[samples.len() - tail_len..].to_vec();
            self.overlap_len = tail_len;
        } else {
            self.overlap_len = 0;
        }

        let chunk = Chunk {
            generation: self.generation,
            start_ms: self.chunk_start_ms,
            end_ms: self.stream_ms,
            samples,
            is_final,
            truncated,
        };
        self.generation += 1;
        self.content_ms = 0;
        self.silence_run_ms = 0;
        self.has_speech = false;
        self.chunk_start_ms = self.stream_ms - self.seed_ms();
        chunk
    }

    fn seed_ms(&self) -> u64 {
        self.overlap_len as u64 * 1000 / self.config.sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::ScriptedVad;

    const FRAME_SAMPLES: usize = 1600; // 100ms at 16kHz

    fn frames(count: usize) -> Vec<AudioFrame> {
        (0..count)
            .map(|i| AudioFrame::new(i as u64, i as u64 * 100, vec![1000i16; FRAME_SAMPLES]))
            .collect()
    }

    fn config(overlap_ms: u32) -> SegmenterConfig {
        SegmenterConfig {
            chunk_ms: 1000,
            min_chunk_ms: 400,
            max_chunk_ms: 2000,
            overlap_ms,
            buffer_ms: 4000,
            silence_threshold_ms: 300,
            ema_alpha: 0.3,
            sample_rate: 16000,
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(SegmenterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_accepts_long_chunk_envelope() {
        let config = SegmenterConfig {
            chunk_ms: 12000,
            min_chunk_ms: 3000,
            max_chunk_ms: 15000,
            overlap_ms: 2500,
            buffer_ms: 25000,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_overlap() {
        let config = SegmenterConfig {
            overlap_ms: 9000,
            chunk_ms: 8000,
            ..Default::default()
        };
        match config.validate() {
            Err(PipelineError::InvalidConfiguration { key, .. }) => {
                assert_eq!(key, "overlap_ms");
            }
            other => panic!("expected InvalidConfiguration, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_small_buffer() {
        let config = SegmenterConfig {
            buffer_ms: 9000,
            chunk_ms: 8000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_chunk_envelope() {
        let config = SegmenterConfig {
            min_chunk_ms: 10000,
            chunk_ms: 8000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_vad_degrades_to_fixed_size() {
        let mut segmenter = AdaptiveSegmenter::new(config(0), None);
        let mut chunks = Vec::new();
        for frame in frames(25) {
            if let Some(chunk) = segmenter.push(&frame).unwrap() {
                chunks.push(chunk);
            }
        }
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert_eq!(chunk.samples.len(), FRAME_SAMPLES * 10); // 1000ms
        }
        assert_eq!(chunks[0].start_ms, 0);
        assert_eq!(chunks[0].end_ms, 1000);
        assert_eq!(chunks[1].start_ms, 1000);
        assert_eq!(chunks[1].generation, 1);
    }

    #[test]
    fn test_silence_cut_after_min_duration() {
        // 5 speech frames (500ms > min 400ms), then sustained silence.
        let script = vec![true, true, true, true, true, false, false, false];
        let vad = Box::new(ScriptedVad::new(script, false));
        let mut segmenter = AdaptiveSegmenter::new(config(0), Some(vad));

        let mut emitted = None;
        for frame in frames(8) {
            if let Some(chunk) = segmenter.push(&frame).unwrap() {
                emitted = Some(chunk);
            }
        }
        let chunk = emitted.expect("silence should have cut a chunk");
        assert_eq!(chunk.generation, 0);
        assert!(!chunk.truncated);
        assert!(chunk.is_final, "sustained silence ends the utterance");
        assert_eq!(chunk.end_ms, 800);
    }

    #[test]
    fn test_forced_cut_at_max_duration() {
        // Continuous speech, never a silence frame.
        let vad = Box::new(ScriptedVad::always_speech());
        let mut segmenter = AdaptiveSegmenter::new(config(0), Some(vad));

        let mut cut = None;
        for frame in frames(30) {
            if let Some(chunk) = segmenter.push(&frame).unwrap() {
                cut = Some(chunk);
                break;
            }
        }
        let chunk = cut.expect("forced cut");
        assert_eq!(chunk.end_ms, 2000); // max_chunk_ms
        assert!(!chunk.is_final, "a forced cut lands mid-speech");
    }

    #[test]
    fn test_leading_silence_produces_no_chunk() {
        let vad = Box::new(ScriptedVad::always_silence());
        let mut segmenter = AdaptiveSegmenter::new(config(0), Some(vad));
        for frame in frames(40) {
            assert!(segmenter.push(&frame).unwrap().is_none());
        }
        assert!(segmenter.flush().is_none());
    }

    #[test]
    fn test_overlap_seeds_next_chunk() {
        // Continuous speech forces mid-speech cuts at max duration; the
        // overlap tail of one chunk must open the next.
        let vad = Box::new(ScriptedVad::always_speech());
        let mut segmenter = AdaptiveSegmenter::new(config(200), Some(vad));

        let mut first = None;
        let mut frames_iter = frames(40).into_iter();
        for frame in frames_iter.by_ref() {
            if let Some(chunk) = segmenter.push(&frame).unwrap() {
                first = Some(chunk);
                break;
            }
        }
        let first = first.expect("first chunk");
        let tail = first.samples[first.samples.len() - 3200..].to_vec();

        let mut second = None;
        for frame in frames_iter {
            if let Some(chunk) = segmenter.push(&frame).unwrap() {
                second = Some(chunk);
                break;
            }
        }
        let second = second.expect("second chunk");
        assert_eq!(&second.samples[..3200], &tail[..]);
        assert_eq!(second.start_ms, first.end_ms - 200);
    }

    #[test]
    fn test_silence_cut_ends_utterance_without_seeding() {
        let mut cfg = config(200);
        cfg.min_chunk_ms = 300;
        // Speech, sustained silence, then a fresh utterance.
        let script = vec![true, true, true, false, false, false];
        let vad = Box::new(ScriptedVad::new(script, true));
        let mut segmenter = AdaptiveSegmenter::new(cfg, Some(vad));

        let mut first = None;
        let mut frames_iter = frames(40).into_iter();
        for frame in frames_iter.by_ref() {
            if let Some(chunk) = segmenter.push(&frame).unwrap() {
                first = Some(chunk);
                break;
            }
        }
        let first = first.expect("silence cut");
        assert!(first.is_final);
        assert_eq!(first.end_ms, 600);

        let mut second = None;
        for frame in frames_iter {
            if let Some(chunk) = segmenter.push(&frame).unwrap() {
                second = Some(chunk);
                break;
            }
        }
        // The next chunk starts at the cut, with no overlap carried over.
        let second = second.expect("second chunk");
        assert_eq!(second.start_ms, 600);
    }

    #[test]
    fn test_buffer_overflow_flushes_truncated_chunk() {
        let cfg = SegmenterConfig {
            chunk_ms: 1000,
            min_chunk_ms: 400,
            max_chunk_ms: 10000, // beyond the buffer cap
            overlap_ms: 0,
            buffer_ms: 1500,
            silence_threshold_ms: 300,
            ema_alpha: 0.3,
            sample_rate: 16000,
        };
        let vad = Box::new(ScriptedVad::always_speech());
        let mut segmenter = AdaptiveSegmenter::new(cfg, Some(vad));

        let mut overflow = None;
        for frame in frames(30) {
            match segmenter.push(&frame) {
                Ok(_) => {}
                Err(PipelineError::BufferOverflow { generation, chunk }) => {
                    overflow = Some((generation, chunk));
                    break;
                }
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        let (generation, chunk) = overflow.expect("overflow should trigger");
        assert_eq!(generation, 0);
        assert!(chunk.truncated);
        assert_eq!(chunk.end_ms, 1500);
    }

    #[test]
    fn test_flush_emits_final_chunk() {
        let vad = Box::new(ScriptedVad::always_speech());
        let mut segmenter = AdaptiveSegmenter::new(config(0), Some(vad));
        for frame in frames(3) {
            assert!(segmenter.push(&frame).unwrap().is_none());
        }
        let chunk = segmenter.flush().expect("pending speech");
        assert!(chunk.is_final);
        assert_eq!(chunk.end_ms, 300);
        assert!(segmenter.flush().is_none());
    }

    #[test]
    fn test_target_adapts_toward_short_utterances() {
        let mut cfg = config(0);
        cfg.chunk_ms = 1000;
        cfg.min_chunk_ms = 300;
        // Repeating pattern: 3 speech frames, 3 silence frames.
        let mut script = Vec::new();
        for _ in 0..10 {
            script.extend([true, true, true, false, false, false]);
        }
        let vad = Box::new(ScriptedVad::new(script, false));
        let mut segmenter = AdaptiveSegmenter::new(cfg, Some(vad));

        let initial = segmenter.target_ms();
        for frame in frames(60) {
            let _ = segmenter.push(&frame).unwrap();
        }
        assert!(
            segmenter.target_ms() < initial,
            "target {} should drop below {}",
            segmenter.target_ms(),
            initial
        );
    }

    #[test]
    fn test_apply_config_resets_target() {
        let vad = Box::new(ScriptedVad::always_speech());
        let mut segmenter = AdaptiveSegmenter::new(config(0), Some(vad));
        let mut new_cfg = config(0);
        new_cfg.chunk_ms = 600;
        segmenter.apply_config(new_cfg);
        assert_eq!(segmenter.target_ms(), 600);
    }
}
