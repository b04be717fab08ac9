//! Default tuning constants shared across configuration types.
//!
//! Centralizing these keeps the config layer, the built-in profiles, and the
//! tests agreeing on one set of numbers.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard rate for speech recognition models and keeps
/// per-chunk payloads small enough for streaming submission.
pub const SAMPLE_RATE: u32 = 16000;

/// Default initial chunk target duration in milliseconds.
pub const CHUNK_MS: u32 = 8000;

/// Default minimum chunk duration in milliseconds.
///
/// Chunks shorter than this are not cut on silence; very short snippets
/// recognize poorly and waste provider calls.
pub const MIN_CHUNK_MS: u32 = 3000;

/// Default maximum chunk duration in milliseconds before a forced cut.
pub const MAX_CHUNK_MS: u32 = 15000;

/// Default overlap carried from one chunk into the next, in milliseconds.
///
/// The overlap keeps words spanning a cut intact; duplicated text is
/// trimmed downstream by boundary alignment, not by re-running recognition.
pub const OVERLAP_MS: u32 = 2500;

/// Default hard cap on the segmenter's internal buffer, in milliseconds.
///
/// Reaching the cap forces an emergency flush with the chunk marked
/// truncated. Must stay at or above 1.5 × the chunk target.
pub const BUFFER_MS: u32 = 25000;

/// Default sustained-silence duration that closes a chunk, in milliseconds.
pub const SILENCE_THRESHOLD_MS: u32 = 1000;

/// Default smoothing factor for the adaptive chunk-target moving average.
pub const EMA_ALPHA: f32 = 0.3;

/// Default RMS threshold for the energy-based voice activity detector.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Default maximum concurrent recognition calls per speaker.
pub const RECOGNITION_IN_FLIGHT: usize = 2;

/// Default recognition call timeout in milliseconds.
pub const RECOGNITION_TIMEOUT_MS: u64 = 30000;

/// Default translation call timeout in milliseconds.
pub const TRANSLATION_TIMEOUT_MS: u64 = 30000;

/// Default retry count for transient provider failures.
pub const PROVIDER_RETRIES: u32 = 2;

/// Default base delay for exponential retry backoff, in milliseconds.
pub const BACKOFF_BASE_MS: u64 = 1000;

/// Cap on the exponential backoff doubling count. Keeps the shift inside
/// the u64 range for any configured retry budget.
pub const BACKOFF_MAX_SHIFT: u32 = 16;

/// Default translation rate limit in calls per minute.
pub const RATE_LIMIT_PER_MINUTE: u32 = 50;

/// Default depth of the rate limiter's wait queue.
///
/// Submissions beyond this depth fail with `RateLimited` instead of
/// queueing; this is the pipeline's backpressure point.
pub const RATE_QUEUE_DEPTH: usize = 16;

/// Default token budget for a speaker's translation context window.
pub const CONTEXT_MAX_TOKENS: u32 = 2000;

/// Default entry cap for a speaker's translation context window.
pub const CONTEXT_MAX_ENTRIES: usize = 20;

/// Default fraction of the token budget that triggers eviction.
pub const COMPRESSION_THRESHOLD: f32 = 0.8;

/// Language codes accepted by the configuration validator.
pub const SUPPORTED_LANGUAGES: &[&str] = &["ja", "en", "ko", "zh", "es", "fr", "de"];
