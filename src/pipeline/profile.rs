//! Named tuning profiles and the pipeline lifecycle state machine.
//!
//! A profile bundles segmentation, context, and translation-rate tuning
//! under a name.
//! Switches requested at runtime are staged and applied only at the next
//! chunk boundary, so no chunk is produced under mixed tuning.

use crate::error::{PipelineError, Result};
use crate::pipeline::context::ContextConfig;
use crate::pipeline::ratelimit::RateLimiterConfig;
use crate::pipeline::segmenter::SegmenterConfig;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::{debug, info};

pub const LOW_LATENCY: &str = "low_latency";
pub const BALANCED: &str = "balanced";
pub const HIGH_PRECISION: &str = "high_precision";

/// A named bundle of pipeline tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    /// Filled from the table key when loaded from configuration.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub context: ContextConfig,
    /// Translation rate-limit override. When set, applying the profile
    /// rebuilds the translator's token bucket at the next chunk boundary;
    /// when absent the session's configured budget stays in force.
    #[serde(default)]
    pub rate: Option<RateLimiterConfig>,
}

impl Profile {
    pub fn validate(&self) -> Result<()> {
        self.segmenter.validate()?;
        self.context.validate()?;
        if let Some(rate) = &self.rate {
            rate.validate()?;
        }
        Ok(())
    }

    /// Short chunks and a small context window for fast turnaround.
    pub fn low_latency() -> Self {
        Self {
            name: LOW_LATENCY.to_string(),
            segmenter: SegmenterConfig {
                chunk_ms: 4000,
                min_chunk_ms: 2000,
                max_chunk_ms: 8000,
                overlap_ms: 1000,
                buffer_ms: 12000,
                silence_threshold_ms: 600,
                ..Default::default()
            },
            context: ContextConfig {
                max_tokens: 1000,
                max_entries: 10,
                ..Default::default()
            },
            rate: None,
        }
    }

    /// The default tuning.
    pub fn balanced() -> Self {
        Self {
            name: BALANCED.to_string(),
            segmenter: SegmenterConfig::default(),
            context: ContextConfig::default(),
            rate: None,
        }
    }

    /// Long chunks and a deep context window for best quality.
    pub fn high_precision() -> Self {
        Self {
            name: HIGH_PRECISION.to_string(),
            segmenter: SegmenterConfig {
                chunk_ms: 12000,
                min_chunk_ms: 5000,
                max_chunk_ms: 25000,
                overlap_ms: 3000,
                buffer_ms: 30000,
                silence_threshold_ms: 1500,
                ..Default::default()
            },
            context: ContextConfig {
                max_tokens: 3000,
                max_entries: 30,
                ..Default::default()
            },
            rate: None,
        }
    }

    /// The three built-in profiles, keyed by name.
    pub fn builtins() -> HashMap<String, Profile> {
        [Self::low_latency(), Self::balanced(), Self::high_precision()]
            .into_iter()
            .map(|profile| (profile.name.clone(), profile))
            .collect()
    }
}

/// Pipeline lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Active,
    Draining,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "Idle",
            PipelineState::Active => "Active",
            PipelineState::Draining => "Draining",
            PipelineState::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// Auto-tuning thresholds over the trailing mean utterance duration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoTuneConfig {
    pub enabled: bool,
    /// Mean utterance below this selects `low_latency`, in milliseconds.
    pub low_below_ms: u32,
    /// Mean utterance above this selects `high_precision`, in milliseconds.
    pub high_above_ms: u32,
    /// Minimum spacing between automatic switches, in milliseconds.
    pub cooldown_ms: u64,
    /// Trailing utterances averaged for the decision.
    pub window: usize,
}

impl Default for AutoTuneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            low_below_ms: 3000,
            high_above_ms: 8000,
            cooldown_ms: 60_000,
            window: 5,
        }
    }
}

/// Owns the profile set, the staged switch, and the lifecycle state.
pub struct ProfileManager {
    profiles: HashMap<String, Profile>,
    active: String,
    pending: Option<String>,
    state: PipelineState,
    autotune: AutoTuneConfig,
    recent_ms: VecDeque<u32>,
    last_tune_ms: Option<u64>,
}

impl ProfileManager {
    pub fn new(
        profiles: HashMap<String, Profile>,
        initial: &str,
        autotune: AutoTuneConfig,
    ) -> Result<Self> {
        let Some(profile) = profiles.get(initial) else {
            return Err(PipelineError::InvalidConfiguration {
                key: "profile".to_string(),
                message: format!("unknown profile '{initial}'"),
            });
        };
        profile.validate()?;
        Ok(Self {
            profiles,
            active: initial.to_string(),
            pending: None,
            state: PipelineState::Idle,
            autotune,
            recent_ms: VecDeque::new(),
            last_tune_ms: None,
        })
    }

    pub fn with_builtins(initial: &str, autotune: AutoTuneConfig) -> Result<Self> {
        Self::new(Profile::builtins(), initial, autotune)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn active_profile(&self) -> &Profile {
        // The active name is validated at construction and on every switch.
        self.profiles
            .get(&self.active)
            .unwrap_or_else(|| unreachable!("active profile '{}' missing", self.active))
    }

    /// Idle -> Active.
    pub fn activate(&mut self) -> Result<()> {
        self.transition(PipelineState::Idle, PipelineState::Active)
    }

    /// Active -> Draining. No new frames are accepted past this point.
    pub fn begin_drain(&mut self) -> Result<()> {
        self.transition(PipelineState::Active, PipelineState::Draining)
    }

    /// Draining -> Stopped.
    pub fn mark_stopped(&mut self) -> Result<()> {
        self.transition(PipelineState::Draining, PipelineState::Stopped)
    }

    /// Stages a profile switch, applied at the next chunk boundary.
    /// Allowed only while `Active`.
    pub fn request_switch(&mut self, name: &str) -> Result<()> {
        if self.state != PipelineState::Active {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: format!("profile switch to '{name}'"),
            });
        }
        if !self.profiles.contains_key(name) {
            return Err(PipelineError::InvalidConfiguration {
                key: "profile".to_string(),
                message: format!("unknown profile '{name}'"),
            });
        }
        if name != self.active {
            self.pending = Some(name.to_string());
        }
        Ok(())
    }

    /// Applies any staged switch. Called by the segmenter task right after
    /// a chunk is emitted; returns the newly active profile if one applied.
    pub fn on_chunk_boundary(&mut self) -> Option<Profile> {
        let name = self.pending.take()?;
        info!(from = %self.active, to = %name, "profile switch applied at chunk boundary");
        self.active = name;
        Some(self.active_profile().clone())
    }

    /// Feeds one finished utterance duration into the auto-tuner. May
    /// stage a switch, subject to the cooldown.
    pub fn observe_utterance(&mut self, duration_ms: u32, now_ms: u64) {
        if !self.autotune.enabled || self.state != PipelineState::Active {
            return;
        }
        self.recent_ms.push_back(duration_ms);
        while self.recent_ms.len() > self.autotune.window.max(1) {
            self.recent_ms.pop_front();
        }
        if self.recent_ms.len() < self.autotune.window.max(1) {
            return;
        }
        if let Some(last) = self.last_tune_ms
            && now_ms.saturating_sub(last) < self.autotune.cooldown_ms
        {
            return;
        }

        let mean_ms = self.recent_ms.iter().sum::<u32>() / self.recent_ms.len() as u32;
        let target = if mean_ms < self.autotune.low_below_ms {
            LOW_LATENCY
        } else if mean_ms > self.autotune.high_above_ms {
            HIGH_PRECISION
        } else {
            BALANCED
        };

        if target != self.active && self.profiles.contains_key(target) {
            debug!(mean_ms, target, "auto-tune staging profile switch");
            self.pending = Some(target.to_string());
            self.last_tune_ms = Some(now_ms);
        }
    }

    fn transition(&mut self, from: PipelineState, to: PipelineState) -> Result<()> {
        if self.state != from {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        info!(%from, %to, "pipeline state transition");
        self.state = to;
        Ok(())
    }
}
