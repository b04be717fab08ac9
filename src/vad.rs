//! Voice activity detection.
//!
//! The segmenter consumes VAD as a pluggable capability: any implementation
//! of [`VoiceActivityDetector`] can drive chunk boundaries, and its absence
//! degrades the segmenter to fixed-size chunking.

use crate::defaults;
use crate::pipeline::frame::AudioFrame;
use std::collections::VecDeque;

/// Per-frame speech/silence classification with confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadAssessment {
    /// Whether the frame contains speech.
    pub is_speech: bool,
    /// Classifier confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

/// Classifies audio frames as speech or silence.
pub trait VoiceActivityDetector: Send {
    /// Assesses one frame. Called in frame arrival order.
    fn assess(&mut self, frame: &AudioFrame) -> VadAssessment;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "vad"
    }
}

/// RMS energy detector: a frame is speech when its root-mean-square level
/// exceeds a fixed threshold.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    /// Creates a detector with the default threshold.
    pub fn new() -> Self {
        Self::with_threshold(defaults::VAD_THRESHOLD)
    }

    /// Creates a detector with a custom RMS threshold in `(0.0, 1.0]`.
    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn assess(&mut self, frame: &AudioFrame) -> VadAssessment {
        let rms = calculate_rms(&frame.samples);
        let is_speech = rms > self.threshold;
        // Confidence grows with distance from the threshold, saturating at
        // twice the threshold (speech) or zero level (silence).
        let confidence = if is_speech {
            ((rms - self.threshold) / self.threshold).min(1.0)
        } else {
            ((self.threshold - rms) / self.threshold).min(1.0)
        };
        VadAssessment {
            is_speech,
            confidence,
        }
    }

    fn name(&self) -> &'static str {
        "energy"
    }
}

/// Computes the RMS level of 16-bit PCM samples, normalized to `[0.0, 1.0]`.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = s as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Scripted detector for tests: replays a fixed sequence of assessments.
#[derive(Debug, Clone, Default)]
pub struct ScriptedVad {
    script: VecDeque<bool>,
    /// Returned once the script is exhausted.
    fallback: bool,
}

impl ScriptedVad {
    /// Creates a detector that replays `script` in order, then keeps
    /// returning `fallback`.
    pub fn new(script: Vec<bool>, fallback: bool) -> Self {
        Self {
            script: script.into(),
            fallback,
        }
    }

    /// Creates a detector that always reports speech.
    pub fn always_speech() -> Self {
        Self::new(Vec::new(), true)
    }

    /// Creates a detector that always reports silence.
    pub fn always_silence() -> Self {
        Self::new(Vec::new(), false)
    }
}

impl VoiceActivityDetector for ScriptedVad {
    fn assess(&mut self, _frame: &AudioFrame) -> VadAssessment {
        let is_speech = self.script.pop_front().unwrap_or(self.fallback);
        VadAssessment {
            is_speech,
            confidence: 1.0,
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
