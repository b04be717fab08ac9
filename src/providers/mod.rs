//! External collaborator contracts.
//!
//! Recognition, translation, and output delivery are pluggable: the
//! pipeline only sees these traits. Mock implementations live alongside
//! each trait and back the test suite.

pub mod recognition;
pub mod sink;
pub mod translation;

pub use recognition::{MockRecognizer, RecognitionOutput, RecognitionProvider};
pub use sink::{JsonlSink, MemorySink, OutputSink};
pub use translation::{MockTranslator, TranslationProvider};
