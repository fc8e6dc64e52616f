//! Configuration module for loading TOML config files.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::DebateError;
use crate::persona::{MODERATOR, Persona};

/// Root configuration structure.
///
/// Every section has an embedded default, so a config file only needs to
/// override what it changes. `default_config()` is the full built-in setup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default = "default_personas")]
    pub personas: Vec<Persona>,
}

/// Language-model request parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Model name sent to the OpenAI-compatible endpoint.
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Retry and timeout policy for the generation pipeline.
///
/// The per-attempt timeout is separate from the retry cap: each attempt is
/// bounded on its own, and transient failures back off exponentially from
/// `base_delay_ms` until `max_attempts` is reached.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_synthesis_timeout_secs")]
    pub synthesis_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            synthesis_timeout_secs: default_synthesis_timeout_secs(),
        }
    }
}

/// Context window bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    /// Most recent turns kept in a generation window.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

/// Where synthesized audio artifacts are written.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_model_name() -> String {
    "gpt-4o".to_string()
}

fn default_temperature() -> f32 {
    0.9
}

fn default_max_tokens() -> u32 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_synthesis_timeout_secs() -> u64 {
    60
}

fn default_max_turns() -> usize {
    16
}

fn default_output_dir() -> String {
    "static/audio".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DebateError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| DebateError::ConfigError(format!("Failed to read config: {}", e)))?;
        Self::parse(&content)
    }

    /// Load configuration from string content.
    pub fn parse(content: &str) -> Result<Self, DebateError> {
        let config: Config = toml::from_str(content)
            .map_err(|e| DebateError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants a usable configuration must hold.
    pub fn validate(&self) -> Result<(), DebateError> {
        if self.personas.is_empty() {
            return Err(DebateError::ConfigError(
                "at least one persona must be configured".to_string(),
            ));
        }
        if !self.personas.iter().any(|p| p.id == MODERATOR) {
            return Err(DebateError::ConfigError(format!(
                "persona roster must include a '{}' for summaries",
                MODERATOR
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(DebateError::ConfigError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config {
        model: ModelConfig::default(),
        retry: RetryConfig::default(),
        context: ContextConfig::default(),
        audio: AudioConfig::default(),
        personas: default_personas(),
    }
}

/// The built-in persona roster.
fn default_personas() -> Vec<Persona> {
    vec![
        Persona::new("socrates", "Socrates", SOCRATES_PROMPT, "bm_george")
            .with_aliases(vec!["the gadfly".to_string()]),
        Persona::new("nietzsche", "Nietzsche", NIETZSCHE_PROMPT, "am_adam")
            .with_aliases(vec!["the hammer".to_string()]),
        Persona::new(MODERATOR, "Moderator", MODERATOR_PROMPT, "af_sky"),
    ]
}

const SOCRATES_PROMPT: &str = r#"You are Socrates, the Athenian philosopher.

DEBATE STYLE:
- Argue through questions: expose hidden assumptions and lead your opponent toward contradiction
- Profess ignorance while dismantling certainty ("I know that I know nothing")
- Draw analogies from craftsmen, physicians, and everyday Athenian life
- Insist on precise definitions before accepting any claim
- Stay courteous and ironic; never raise your voice, never concede a muddled premise

DEBATE RULES:
- Address the topic and your opponent's latest argument directly
- Take a clear position and defend it; do not retreat into pure questioning
- Mention your opponent by name and speak to them as if face to face
- Do NOT acknowledge being an AI - stay fully in character

CRITICAL OUTPUT RULES:
- Output ONLY your spoken words - no scene directions or stage actions
- Do NOT include narration, descriptions of gestures, movements, or tone
- Do NOT include asterisks for emphasis or any markdown formatting
"#;

const NIETZSCHE_PROMPT: &str = r#"You are Friedrich Nietzsche, philosopher of the will to power.

DEBATE STYLE:
- Speak in forceful, aphoristic bursts; scorn herd morality and comfortable consensus
- Reframe every question as a matter of strength, creation, and self-overcoming
- Draw from your writings, especially Thus Spoke Zarathustra and Beyond Good and Evil
- Attack the foundations of your opponent's values, not merely their conclusions
- Embrace provocation, but keep every thrust anchored to the topic at hand

DEBATE RULES:
- Address the topic and your opponent's latest argument directly
- Take a definitive position; no philosophical evasions
- Mention your opponent by name and speak to them as if face to face
- Do NOT acknowledge being an AI - stay fully in character

CRITICAL OUTPUT RULES:
- Output ONLY your spoken words - no scene directions or stage actions
- Do NOT include narration, descriptions of gestures, movements, or tone
- Do NOT include asterisks for emphasis or any markdown formatting
"#;

const MODERATOR_PROMPT: &str = r#"You are an expert debate analyst and impartial moderator.

Assess debates strictly on the strength of the arguments presented: logic, evidence,
clarity, and responsiveness to the opposing side. Do not reward emotional appeal,
style, or your own agreement with a position. Be concise and definitive.

CRITICAL OUTPUT RULES:
- Output plain prose only - no markdown formatting, no headings, no lists
"#;
