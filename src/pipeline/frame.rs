//! Data types that flow between pipeline stations.

use serde::Serialize;

/// A fixed-duration slice of mono PCM audio with capture metadata.
///
/// Frames are immutable once produced and are consumed into a [`Chunk`]
/// by the segmenter.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Sequence number for ordering frames.
    pub sequence: u64,
    /// Stream-relative capture timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Audio samples as 16-bit PCM.
    pub samples: Vec<i16>,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(sequence: u64, timestamp_ms: u64, samples: Vec<i16>) -> Self {
        Self {
            sequence,
            timestamp_ms,
            samples,
        }
    }

    /// Returns the duration of this frame in milliseconds.
    pub fn duration_ms(&self, sample_rate: u32) -> u32 {
        (self.samples.len() as u64 * 1000 / sample_rate as u64) as u32
    }
}

/// A bounded, possibly-overlapping span of audio submitted as one
/// recognition unit.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Monotonic generation counter assigned by the segmenter.
    pub generation: u64,
    /// Stream-relative start of the span in milliseconds (inclusive).
    pub start_ms: u64,
    /// Stream-relative end of the span in milliseconds (exclusive).
    pub end_ms: u64,
    /// Combined audio samples, including the overlap seeded from the
    /// previous chunk.
    pub samples: Vec<i16>,
    /// Whether this chunk ended an utterance: cut on sustained silence or
    /// flushed at end of stream.
    pub is_final: bool,
    /// Whether this chunk was forced out by a buffer overflow.
    pub truncated: bool,
}

impl Chunk {
    /// Returns the duration of this chunk in milliseconds.
    pub fn duration_ms(&self, sample_rate: u32) -> u32 {
        (self.samples.len() as u64 * 1000 / sample_rate as u64) as u32
    }
}

/// Transcribed text for one chunk, released strictly in chunk order.
#[derive(Debug, Clone)]
pub struct RecognizedSegment {
    /// Contiguous sequence number assigned at ordered release.
    ///
    /// Unlike [`Chunk::generation`], this has no holes: chunks whose
    /// recognition failed are skipped before numbering.
    pub sequence: u64,
    /// Generation of the source chunk.
    pub generation: u64,
    /// Transcribed text, boundary-deduplicated against the previous
    /// segment.
    pub text: String,
    /// Stream-relative start of the source span in milliseconds.
    pub start_ms: u64,
    /// Stream-relative end of the source span in milliseconds.
    pub end_ms: u64,
    /// Source language code.
    pub source_lang: String,
    /// Recognition confidence when the provider reports one.
    pub confidence: Option<f32>,
    /// Whether the source chunk ended an utterance.
    pub is_final: bool,
}

/// Final output tuple delivered to the output sink, immutable once emitted.
#[derive(Debug, Clone, Serialize)]
pub struct TranslationRecord {
    /// Sequence of the originating recognized segment.
    pub sequence: u64,
    /// Opaque speaker key.
    pub speaker: String,
    /// Wall-clock timestamp of the utterance in milliseconds since the
    /// Unix epoch.
    pub timestamp_ms: u64,
    /// Original transcribed text.
    pub source_text: String,
    /// Translated text; empty when translation failed.
    pub translated_text: String,
    /// Source language code.
    pub source_lang: String,
    /// Target language code.
    pub target_lang: String,
    /// Whether translation failed and only the source text is carried.
    pub translation_failed: bool,
}
