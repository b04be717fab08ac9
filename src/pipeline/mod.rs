//! Station-based streaming pipeline.
//!
//! Data flows source -> segmenter -> recognizer -> translator -> sequencer
//! over bounded channels. Each station owns its concurrency; ordering is
//! restored at every stage that completes work out of order.

pub mod context;
pub mod dedup;
pub mod frame;
pub mod orchestrator;
pub mod profile;
pub mod ratelimit;
pub mod recognizer;
pub mod reorder;
pub mod segmenter;
pub mod sequencer;
pub mod translator;

pub use context::{ContextBuffer, ContextBufferManager, ContextConfig, ContextWindow};
pub use frame::{AudioFrame, Chunk, RecognizedSegment, TranslationRecord};
pub use orchestrator::{Pipeline, PipelineConfig, PipelineHandle};
pub use profile::{PipelineState, Profile, ProfileManager};
pub use segmenter::{AdaptiveSegmenter, SegmenterConfig};
