//! Pipeline assembly and lifecycle.
//!
//! Wires the stations over bounded channels:
//! source -> segmenter -> recognizer -> translator -> sequencer.
//! Shutdown is a drain: the source stops, every station finishes what it
//! holds, and the sink receives everything already segmented.

use crate::error::{PipelineError, Result};
use crate::pipeline::context::ContextBufferManager;
use crate::pipeline::frame::Chunk;
use crate::pipeline::profile::{AutoTuneConfig, BALANCED, Profile, ProfileManager};
use crate::pipeline::recognizer::{Recognizer, RecognizerConfig};
use crate::pipeline::segmenter::AdaptiveSegmenter;
use crate::pipeline::sequencer::{Sequencer, SequencerConfig};
use crate::pipeline::translator::{Translator, TranslatorConfig};
use crate::providers::recognition::RecognitionProvider;
use crate::providers::sink::OutputSink;
use crate::providers::translation::TranslationProvider;
use crate::source::FrameSource;
use crate::vad::VoiceActivityDetector;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Everything the pipeline needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_lang: String,
    pub target_lang: String,
    /// Opaque speaker key for context isolation and output records.
    pub speaker: String,
    /// Name of the initially active profile.
    pub profile: String,
    /// Available profiles, keyed by name.
    pub profiles: HashMap<String, Profile>,
    pub recognizer: RecognizerConfig,
    pub translator: TranslatorConfig,
    pub sequencer: SequencerConfig,
    pub autotune: AutoTuneConfig,
    /// Capacity of the channels between stations.
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_lang: "ja".to_string(),
            target_lang: "en".to_string(),
            speaker: "default".to_string(),
            profile: BALANCED.to_string(),
            profiles: Profile::builtins(),
            recognizer: RecognizerConfig::default(),
            translator: TranslatorConfig::default(),
            sequencer: SequencerConfig::default(),
            autotune: AutoTuneConfig::default(),
            channel_capacity: 32,
        }
    }
}

/// Running pipeline. Dropping the handle does not stop the tasks; call
/// [`shutdown`](Self::shutdown) or [`wait`](Self::wait).
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    switch: mpsc::Sender<String>,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl PipelineHandle {
    /// Requests a profile switch; it takes effect at the next chunk
    /// boundary. Rejected switches are logged by the segmenter task.
    pub async fn switch_profile(&self, name: &str) -> Result<()> {
        self.switch
            .send(name.to_string())
            .await
            .map_err(|_| PipelineError::Other("pipeline is not running".to_string()))
    }

    /// Stops the source and drains every station, then joins all tasks.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown.send(true).ok();
        self.wait().await
    }

    /// Joins all tasks, surfacing the first station error.
    pub async fn wait(self) -> Result<()> {
        for (name, task) in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => return Err(error),
                Err(join_error) => {
                    return Err(PipelineError::Other(format!(
                        "{name} task panicked: {join_error}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Builds and starts the full pipeline.
pub struct Pipeline;

impl Pipeline {
    pub fn start(
        config: PipelineConfig,
        mut source: Box<dyn FrameSource>,
        vad: Option<Box<dyn VoiceActivityDetector>>,
        recognition: Vec<Arc<dyn RecognitionProvider>>,
        translation: Vec<Arc<dyn TranslationProvider>>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<PipelineHandle> {
        let mut manager =
            ProfileManager::new(config.profiles.clone(), &config.profile, config.autotune.clone())?;
        let active = manager.active_profile().clone();
        active.validate()?;
        for profile in config.profiles.values() {
            profile.validate()?;
        }
        config.recognizer.validate()?;
        let mut translator_config = config.translator.clone();
        if let Some(rate) = active.rate.clone() {
            translator_config.rate = rate;
        }
        translator_config.validate()?;
        manager.activate()?;
        info!(profile = %active.name, "starting pipeline");

        let capacity = config.channel_capacity.max(1);
        let (frame_tx, frame_rx) = mpsc::channel(capacity);
        let (chunk_tx, chunk_rx) = mpsc::channel::<Chunk>(capacity);
        let (segment_tx, segment_rx) = mpsc::channel(capacity);
        let (record_tx, record_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (switch_tx, switch_rx) = mpsc::channel::<String>(4);
        let (tuning_tx, tuning_rx) = watch::channel(active.clone());

        // Ingest: pull frames until the source ends or shutdown begins.
        let ingest = {
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    match source.next_frame()? {
                        Some(frame) => {
                            if frame_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                Ok(())
            })
        };

        let segmenter_task = {
            let segmenter = AdaptiveSegmenter::new(active.segmenter.clone(), vad);
            tokio::spawn(run_segmenter(
                segmenter, manager, frame_rx, chunk_tx, switch_rx, tuning_tx,
            ))
        };

        let recognizer = Recognizer::new(config.recognizer, recognition, &config.source_lang);
        let recognizer_task = tokio::spawn(recognizer.run(chunk_rx, segment_tx));

        let summarizer = translation.first().cloned();
        let context = ContextBufferManager::new(active.context.clone(), summarizer);
        let translator = Translator::new(
            translator_config,
            translation,
            context,
            &config.speaker,
            &config.target_lang,
        )
        .with_tuning_updates(tuning_rx);
        let translator_task = tokio::spawn(translator.run(segment_rx, record_tx));

        let sequencer = Sequencer::new(config.sequencer, sink);
        let sequencer_task = tokio::spawn(sequencer.run(record_rx));

        Ok(PipelineHandle {
            shutdown: shutdown_tx,
            switch: switch_tx,
            tasks: vec![
                ("ingest", ingest),
                ("segmenter", segmenter_task),
                ("recognizer", recognizer_task),
                ("translator", translator_task),
                ("sequencer", sequencer_task),
            ],
        })
    }
}

/// Segmenter station: frames in, chunks out, profile switches applied at
/// chunk boundaries.
async fn run_segmenter(
    mut segmenter: AdaptiveSegmenter,
    mut manager: ProfileManager,
    mut frames: mpsc::Receiver<crate::pipeline::frame::AudioFrame>,
    chunks: mpsc::Sender<Chunk>,
    mut switches: mpsc::Receiver<String>,
    tuning_updates: watch::Sender<Profile>,
) -> Result<()> {
    let mut switches_open = true;
    loop {
        tokio::select! {
            switch = switches.recv(), if switches_open => {
                match switch {
                    Some(name) => {
                        if let Err(error) = manager.request_switch(&name) {
                            warn!(%error, "profile switch rejected");
                        }
                    }
                    None => switches_open = false,
                }
            }
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let emitted = match segmenter.push(&frame) {
                    Ok(chunk) => chunk,
                    Err(PipelineError::BufferOverflow { generation, chunk }) => {
                        warn!(generation, "segmenter buffer overflow, chunk flushed early");
                        Some(*chunk)
                    }
                    Err(error) => return Err(error),
                };
                if let Some(chunk) = emitted
                    && !forward_chunk(chunk, &mut segmenter, &mut manager, &chunks, &tuning_updates)
                        .await
                {
                    return Ok(());
                }
            }
        }
    }

    manager.begin_drain()?;
    if let Some(chunk) = segmenter.flush() {
        chunks.send(chunk).await.ok();
    }
    drop(chunks);
    manager.mark_stopped()?;
    Ok(())
}

/// Sends one chunk downstream and runs the boundary bookkeeping. Returns
/// false when downstream is gone.
async fn forward_chunk(
    chunk: Chunk,
    segmenter: &mut AdaptiveSegmenter,
    manager: &mut ProfileManager,
    chunks: &mpsc::Sender<Chunk>,
    tuning_updates: &watch::Sender<Profile>,
) -> bool {
    let duration_ms = chunk.end_ms.saturating_sub(chunk.start_ms) as u32;
    let boundary_ms = chunk.end_ms;
    if chunks.send(chunk).await.is_err() {
        return false;
    }
    manager.observe_utterance(duration_ms, boundary_ms);
    if let Some(profile) = manager.on_chunk_boundary() {
        segmenter.apply_config(profile.segmenter.clone());
        tuning_updates.send(profile).ok();
    }
    true
}
