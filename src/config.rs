//! TOML configuration.

use crate::defaults;
use crate::error::{PipelineError, Result};
use crate::pipeline::orchestrator::PipelineConfig;
use crate::pipeline::profile::{AutoTuneConfig, Profile};
use crate::pipeline::recognizer::RecognizerConfig;
use crate::pipeline::sequencer::SequencerConfig;
use crate::pipeline::translator::TranslatorConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub languages: LanguageConfig,
    pub recognition: RecognizerConfig,
    pub translation: TranslatorConfig,
    pub output: SequencerConfig,
    pub autotune: AutoTuneConfig,
    /// User-defined profiles, merged over the built-in set. A table entry
    /// with a built-in name replaces that built-in.
    pub profiles: HashMap<String, Profile>,
}

/// Session identity and pipeline selection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Opaque speaker key for context isolation and output records.
    pub speaker: String,
    /// Name of the initially active profile.
    pub profile: String,
    /// Capacity of the channels between pipeline stations.
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            speaker: "default".to_string(),
            profile: crate::pipeline::profile::BALANCED.to_string(),
            channel_capacity: 32,
        }
    }
}

/// Language pair
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    pub source: String,
    pub target: String,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            source: "ja".to_string(),
            target: "en".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        // Profile names come from the table keys.
        for (name, profile) in config.profiles.iter_mut() {
            profile.name = name.clone();
        }
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't
    /// exist. Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - LINGOSTREAM_SOURCE_LANG → languages.source
    /// - LINGOSTREAM_TARGET_LANG → languages.target
    /// - LINGOSTREAM_PROFILE → session.profile
    /// - LINGOSTREAM_SPEAKER → session.speaker
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(source) = std::env::var("LINGOSTREAM_SOURCE_LANG")
            && !source.is_empty()
        {
            self.languages.source = source;
        }

        if let Ok(target) = std::env::var("LINGOSTREAM_TARGET_LANG")
            && !target.is_empty()
        {
            self.languages.target = target;
        }

        if let Ok(profile) = std::env::var("LINGOSTREAM_PROFILE")
            && !profile.is_empty()
        {
            self.session.profile = profile;
        }

        if let Ok(speaker) = std::env::var("LINGOSTREAM_SPEAKER")
            && !speaker.is_empty()
        {
            self.session.speaker = speaker;
        }

        self
    }

    /// Built-in profiles overridden by any user-defined ones.
    pub fn merged_profiles(&self) -> HashMap<String, Profile> {
        let mut profiles = Profile::builtins();
        for (name, profile) in &self.profiles {
            profiles.insert(name.clone(), profile.clone());
        }
        profiles
    }

    /// Cross-field validation, run before the pipeline starts.
    pub fn validate(&self) -> Result<()> {
        for (key, lang) in [
            ("languages.source", &self.languages.source),
            ("languages.target", &self.languages.target),
        ] {
            if !defaults::SUPPORTED_LANGUAGES.contains(&lang.as_str()) {
                return Err(PipelineError::InvalidConfiguration {
                    key: key.to_string(),
                    message: format!(
                        "unsupported language '{lang}', expected one of {}",
                        defaults::SUPPORTED_LANGUAGES.join(", ")
                    ),
                });
            }
        }

        let profiles = self.merged_profiles();
        let Some(active) = profiles.get(&self.session.profile) else {
            return Err(PipelineError::InvalidConfiguration {
                key: "session.profile".to_string(),
                message: format!("unknown profile '{}'", self.session.profile),
            });
        };
        active.validate()?;
        for profile in profiles.values() {
            profile.validate()?;
        }

        if self.session.channel_capacity == 0 {
            return Err(PipelineError::InvalidConfiguration {
                key: "session.channel_capacity".to_string(),
                message: "must be positive".to_string(),
            });
        }
        self.recognition.validate()?;
        self.translation.validate()?;
        Ok(())
    }

    /// Builds the runtime pipeline configuration. Validates first.
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig> {
        self.validate()?;
        Ok(PipelineConfig {
            source_lang: self.languages.source.clone(),
            target_lang: self.languages.target.clone(),
            speaker: self.session.speaker.clone(),
            profile: self.session.profile.clone(),
            profiles: self.merged_profiles(),
            recognizer: self.recognition.clone(),
            translator: self.translation.clone(),
            sequencer: self.output.clone(),
            autotune: self.autotune.clone(),
            channel_capacity: self.session.channel_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_lingostream_env() {
        remove_env("LINGOSTREAM_SOURCE_LANG");
        remove_env("LINGOSTREAM_TARGET_LANG");
        remove_env("LINGOSTREAM_PROFILE");
        remove_env("LINGOSTREAM_SPEAKER");
    }

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert_eq!(config.languages.source, "ja");
        assert_eq!(config.languages.target, "en");
        assert_eq!(config.session.profile, "balanced");
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [session]
            speaker = "meeting-room-3"
            profile = "interview"

            [languages]
            source = "ja"
            target = "de"

            [recognition]
            max_in_flight = 3
            timeout_ms = 20000

            [translation.rate]
            rate_per_minute = 30
            queue_depth = 8

            [profiles.interview]
            [profiles.interview.segmenter]
            chunk_ms = 6000
            min_chunk_ms = 3000
            max_chunk_ms = 12000
            overlap_ms = 1500
            buffer_ms = 20000
            [profiles.interview.context]
            max_tokens = 1500
            eviction_policy = "importance"
            named_terms = ["Tanaka"]
            [profiles.interview.rate]
            rate_per_minute = 20
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.session.speaker, "meeting-room-3");
        assert_eq!(config.languages.target, "de");
        assert_eq!(config.recognition.max_in_flight, 3);
        assert_eq!(config.translation.rate.rate_per_minute, 30);

        let profile = &config.profiles["interview"];
        assert_eq!(profile.name, "interview");
        assert_eq!(profile.segmenter.chunk_ms, 6000);
        assert_eq!(
            profile.context.eviction_policy,
            crate::pipeline::context::EvictionPolicy::Importance
        );
        assert_eq!(
            profile.rate.as_ref().map(|r| r.rate_per_minute),
            Some(20)
        );

        let pipeline = config.to_pipeline_config().unwrap();
        assert_eq!(pipeline.profile, "interview");
        assert!(pipeline.profiles.contains_key("balanced"));
    }

    #[test]
    fn test_unsupported_language_rejected() {
        let mut config = Config::default();
        config.languages.source = "xx".to_string();
        match config.validate() {
            Err(PipelineError::InvalidConfiguration { key, .. }) => {
                assert_eq!(key, "languages.source");
            }
            other => panic!("expected InvalidConfiguration, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_profile_rejected() {
        let mut config = Config::default();
        config.session.profile = "turbo".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_profile_tuning_rejected() {
        let toml_content = r#"
            [profiles.broken]
            [profiles.broken.segmenter]
            chunk_ms = 8000
            overlap_ms = 9000
        "#;
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config =
            Config::load_or_default(Path::new("/nonexistent/lingostream.toml")).unwrap();
        assert_eq!(config.languages.source, "ja");
    }

    #[test]
    fn test_load_or_default_invalid_toml_is_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"not = valid = toml").unwrap();
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_lingostream_env();

        set_env("LINGOSTREAM_TARGET_LANG", "fr");
        set_env("LINGOSTREAM_PROFILE", "low_latency");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.languages.target, "fr");
        assert_eq!(config.session.profile, "low_latency");
        assert_eq!(config.languages.source, "ja");
        config.validate().unwrap();

        clear_lingostream_env();
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_lingostream_env();

        set_env("LINGOSTREAM_TARGET_LANG", "");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.languages.target, "en");

        clear_lingostream_env();
    }
}
