//! One turn's production: model call, optional voice synthesis, persistence.
//!
//! The pipeline is an explicit short sequence (submit, await, optionally
//! synthesize, persist) with a defined rollback on every failure branch:
//! nothing is appended to the ledger unless the model call succeeded. The
//! append itself is the final, synchronous step, so cancelling an in-flight
//! generation can never leave a partial turn behind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{ModelConfig, RetryConfig};
use crate::context::ContextWindow;
use crate::error::{DebateError, ModelError, SynthesisError};
use crate::ledger::{Speaker, TurnDraft, TurnKind, TurnLedger};
use crate::persona::Persona;

/// One request to the language-model service.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub window: ContextWindow,
}

/// Narrow contract over the language-model service: prompt in, text out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;
}

/// Narrow contract over the voice-synthesis service: text in, artifact out.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with the given voice profile and return the path of
    /// the written audio artifact.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<String, SynthesisError>;
}

/// A successfully produced and persisted turn.
#[derive(Debug, Clone)]
pub struct SpokenTurn {
    pub turn: crate::ledger::Turn,
    /// Set when voice was requested but synthesis failed; the text is intact
    /// and the turn carries no audio reference.
    pub degraded: bool,
}

/// Orchestrates one turn's generation with bounded retries and timeouts.
pub struct GenerationPipeline {
    model: Arc<dyn ChatModel>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    model_config: ModelConfig,
    retry: RetryConfig,
}

impl GenerationPipeline {
    pub fn new(
        model: Arc<dyn ChatModel>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
        model_config: ModelConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            model,
            synthesizer,
            model_config,
            retry,
        }
    }

    /// Produce one turn for `persona` from `window` and persist it.
    ///
    /// Model failures follow the retry policy and surface as
    /// `GenerationUnavailable` with nothing appended. Synthesis failures are
    /// non-fatal: the turn persists without audio and `degraded` is set.
    pub async fn generate_turn(
        &self,
        ledger: &TurnLedger,
        session: Uuid,
        persona: &Persona,
        kind: TurnKind,
        window: ContextWindow,
        voice: bool,
    ) -> Result<SpokenTurn, DebateError> {
        let request = ModelRequest {
            model: self.model_config.name.clone(),
            max_tokens: self.model_config.max_tokens,
            temperature: self.model_config.temperature,
            window,
        };

        let text = self.complete_with_retry(&request, persona).await?;
        let (audio, degraded) = self.synthesize(session, persona, &text, voice).await;

        let draft = TurnDraft {
            speaker: Speaker::Persona(persona.id.clone()),
            kind,
            text,
            audio,
        };
        let turn = ledger.append(session, draft)?;
        Ok(SpokenTurn { turn, degraded })
    }

    /// Call the model with a per-attempt timeout, retrying transient failures
    /// with exponential backoff up to the configured attempt cap.
    async fn complete_with_retry(
        &self,
        request: &ModelRequest,
        persona: &Persona,
    ) -> Result<String, DebateError> {
        let timeout = Duration::from_secs(self.retry.request_timeout_secs);
        let mut last_error = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                // Exponential backoff: base, 2x base, 4x base, ...
                let delay = Duration::from_millis(self.retry.base_delay_ms << (attempt - 1));
                tokio::time::sleep(delay).await;
            }

            let outcome = match tokio::time::timeout(timeout, self.model.complete(request)).await {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout),
            };

            match outcome {
                Ok(raw) => {
                    let clean = sanitize_response(&raw);
                    if clean.is_empty() {
                        tracing::debug!(
                            persona = %persona.id,
                            attempt,
                            "model returned an empty response, retrying"
                        );
                        last_error = Some(ModelError::EmptyResponse);
                        continue;
                    }
                    return Ok(clean);
                }
                Err(err) if err.is_transient() => {
                    tracing::debug!(
                        persona = %persona.id,
                        attempt,
                        error = %err,
                        "transient model failure, retrying"
                    );
                    last_error = Some(err);
                }
                Err(err) => {
                    return Err(DebateError::GenerationUnavailable {
                        attempts: attempt + 1,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown model failure".to_string());
        Err(DebateError::GenerationUnavailable {
            attempts: self.retry.max_attempts,
            reason,
        })
    }

    /// Best-effort synthesis. Returns the artifact path and whether the turn
    /// is degraded (synthesis attempted but failed or timed out).
    async fn synthesize(
        &self,
        session: Uuid,
        persona: &Persona,
        text: &str,
        voice: bool,
    ) -> (Option<String>, bool) {
        if !voice {
            return (None, false);
        }
        let Some(synthesizer) = self.synthesizer.as_ref() else {
            return (None, false);
        };

        let timeout = Duration::from_secs(self.retry.synthesis_timeout_secs);
        match tokio::time::timeout(timeout, synthesizer.synthesize(text, &persona.voice)).await {
            Ok(Ok(path)) => (Some(path), false),
            Ok(Err(err)) => {
                tracing::warn!(
                    session = %session,
                    persona = %persona.id,
                    error = %err,
                    "voice synthesis failed, persisting text-only turn"
                );
                (None, true)
            }
            Err(_) => {
                tracing::warn!(
                    session = %session,
                    persona = %persona.id,
                    "voice synthesis timed out, persisting text-only turn"
                );
                (None, true)
            }
        }
    }

    /// Synthesize audio for already-persisted text (voice backfill).
    /// Unlike turn generation, failure here is surfaced to the caller.
    pub async fn synthesize_only(
        &self,
        persona: &Persona,
        text: &str,
    ) -> Result<String, DebateError> {
        let Some(synthesizer) = self.synthesizer.as_ref() else {
            return Err(DebateError::ConfigError(
                "no voice synthesizer configured".to_string(),
            ));
        };
        let timeout = Duration::from_secs(self.retry.synthesis_timeout_secs);
        match tokio::time::timeout(timeout, synthesizer.synthesize(text, &persona.voice)).await {
            Ok(Ok(path)) => Ok(path),
            Ok(Err(err)) => Err(DebateError::ConfigError(format!(
                "voice synthesis failed: {err}"
            ))),
            Err(_) => Err(DebateError::ConfigError(
                "voice synthesis timed out".to_string(),
            )),
        }
    }
}

/// Sanitize a model response by stripping reasoning tokens and XML-like tags.
///
/// Removes patterns like <thinking>...</thinking>, <reflection>...</reflection>,
/// orphaned tags, markdown emphasis, and collapses whitespace.
pub fn sanitize_response(response: &str) -> String {
    let tags_to_strip = [
        "thinking",
        "think",
        "reflection",
        "reflect",
        "internal",
        "reasoning",
        "thought",
        "scratch",
        "scratchpad",
        "plan",
        "analysis",
        "analyze",
        "consider",
        "pondering",
        "deliberation",
    ];

    let mut result = response.to_string();

    for tag in &tags_to_strip {
        let pattern = format!(r"(?is)<{tag}[^>]*>.*?</{tag}>", tag = tag);
        if let Ok(re) = regex::Regex::new(&pattern) {
            result = re.replace_all(&result, "").to_string();
        }
    }

    // Remove any remaining orphaned opening/closing tags
    if let Ok(orphan_re) = regex::Regex::new(r"</?[\w]+[^>]*>") {
        result = orphan_re.replace_all(&result, "").to_string();
    }

    // Remove markdown emphasis markers
    result = result.replace("*", "");

    // Collapse runs of whitespace
    if let Ok(ws_re) = regex::Regex::new(r"\s+") {
        result = ws_re.replace_all(&result, " ").to_string();
    }

    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextMessage, ContextRole};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted model: pops one outcome per call.
    struct ScriptedModel {
        outcomes: Mutex<VecDeque<Result<String, ModelError>>>,
    }

    impl ScriptedModel {
        fn new(outcomes: Vec<Result<String, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
            })
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _request: &ModelRequest) -> Result<String, ModelError> {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ModelError::Service("script exhausted".to_string())))
        }
    }

    struct OkSynth;

    #[async_trait]
    impl SpeechSynthesizer for OkSynth {
        async fn synthesize(&self, _text: &str, voice: &str) -> Result<String, SynthesisError> {
            Ok(format!("static/audio/{voice}.wav"))
        }
    }

    struct BrokenSynth;

    #[async_trait]
    impl SpeechSynthesizer for BrokenSynth {
        async fn synthesize(&self, _text: &str, _voice: &str) -> Result<String, SynthesisError> {
            Err(SynthesisError::Engine("no model loaded".to_string()))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            request_timeout_secs: 5,
            synthesis_timeout_secs: 5,
        }
    }

    fn persona() -> Persona {
        Persona::new("socrates", "Socrates", "You are Socrates.", "bm_george")
    }

    fn window() -> ContextWindow {
        ContextWindow {
            system_prompt: "You are Socrates.".to_string(),
            messages: vec![ContextMessage {
                role: ContextRole::User,
                content: "Open the debate.".to_string(),
            }],
        }
    }

    fn pipeline(
        model: Arc<dyn ChatModel>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> GenerationPipeline {
        GenerationPipeline::new(model, synthesizer, ModelConfig::default(), fast_retry())
    }

    fn ledger_with_session() -> (TurnLedger, Uuid) {
        let ledger = TurnLedger::new();
        let session = Uuid::new_v4();
        ledger.create(session);
        (ledger, session)
    }

    #[tokio::test]
    async fn test_success_persists_turn() {
        let model = ScriptedModel::new(vec![Ok("The unexamined life is not worth living.".into())]);
        let pipeline = pipeline(model, None);
        let (ledger, session) = ledger_with_session();

        let spoken = pipeline
            .generate_turn(&ledger, session, &persona(), TurnKind::Statement, window(), false)
            .await
            .unwrap();

        assert_eq!(spoken.turn.seq, 0);
        assert!(!spoken.degraded);
        assert_eq!(ledger.list(session).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let model = ScriptedModel::new(vec![
            Err(ModelError::RateLimited),
            Err(ModelError::Timeout),
            Ok("Persistence pays.".into()),
        ]);
        let pipeline = pipeline(model, None);
        let (ledger, session) = ledger_with_session();

        let spoken = pipeline
            .generate_turn(&ledger, session, &persona(), TurnKind::Statement, window(), false)
            .await
            .unwrap();
        assert_eq!(spoken.turn.text, "Persistence pays.");
    }

    #[tokio::test]
    async fn test_exhausted_retries_append_nothing() {
        let model = ScriptedModel::new(vec![
            Err(ModelError::RateLimited),
            Err(ModelError::RateLimited),
            Err(ModelError::RateLimited),
        ]);
        let pipeline = pipeline(model, None);
        let (ledger, session) = ledger_with_session();

        let err = pipeline
            .generate_turn(&ledger, session, &persona(), TurnKind::Statement, window(), false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DebateError::GenerationUnavailable { attempts: 3, .. }
        ));
        assert!(ledger.list(session).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_transient_failure_fails_fast() {
        let model = ScriptedModel::new(vec![
            Err(ModelError::Service("bad request".into())),
            Ok("never reached".into()),
        ]);
        let pipeline = pipeline(model, None);
        let (ledger, session) = ledger_with_session();

        let err = pipeline
            .generate_turn(&ledger, session, &persona(), TurnKind::Statement, window(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DebateError::GenerationUnavailable { attempts: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_response_counts_as_transient() {
        let model = ScriptedModel::new(vec![
            Ok("<thinking>only thoughts</thinking>".into()),
            Ok("A real answer.".into()),
        ]);
        let pipeline = pipeline(model, None);
        let (ledger, session) = ledger_with_session();

        let spoken = pipeline
            .generate_turn(&ledger, session, &persona(), TurnKind::Statement, window(), false)
            .await
            .unwrap();
        assert_eq!(spoken.turn.text, "A real answer.");
    }

    #[tokio::test]
    async fn test_synthesis_failure_degrades_but_persists() {
        let model = ScriptedModel::new(vec![Ok("Text survives.".into())]);
        let pipeline = pipeline(model, Some(Arc::new(BrokenSynth)));
        let (ledger, session) = ledger_with_session();

        let spoken = pipeline
            .generate_turn(&ledger, session, &persona(), TurnKind::Statement, window(), true)
            .await
            .unwrap();

        assert!(spoken.degraded);
        assert!(spoken.turn.audio.is_none());
        assert_eq!(ledger.list(session).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_synthesis_success_attaches_audio() {
        let model = ScriptedModel::new(vec![Ok("Voiced.".into())]);
        let pipeline = pipeline(model, Some(Arc::new(OkSynth)));
        let (ledger, session) = ledger_with_session();

        let spoken = pipeline
            .generate_turn(&ledger, session, &persona(), TurnKind::Statement, window(), true)
            .await
            .unwrap();

        assert!(!spoken.degraded);
        assert_eq!(spoken.turn.audio.as_deref(), Some("static/audio/bm_george.wav"));
    }

    #[tokio::test]
    async fn test_voice_disabled_skips_synthesizer() {
        let model = ScriptedModel::new(vec![Ok("Silent.".into())]);
        let pipeline = pipeline(model, Some(Arc::new(BrokenSynth)));
        let (ledger, session) = ledger_with_session();

        let spoken = pipeline
            .generate_turn(&ledger, session, &persona(), TurnKind::Statement, window(), false)
            .await
            .unwrap();
        assert!(!spoken.degraded);
        assert!(spoken.turn.audio.is_none());
    }

    #[test]
    fn test_sanitize_response_thinking_tags() {
        let input = "<thinking>Let me think about this...</thinking>The answer is 42.";
        assert_eq!(sanitize_response(input), "The answer is 42.");
    }

    #[test]
    fn test_sanitize_response_reflection_tags() {
        let input = "Hello <reflection>internal thought</reflection> world!";
        assert_eq!(sanitize_response(input), "Hello world!");
    }

    #[test]
    fn test_sanitize_response_no_tags() {
        let input = "No tags here, just text.";
        assert_eq!(sanitize_response(input), "No tags here, just text.");
    }

    #[test]
    fn test_sanitize_response_orphan_tags() {
        let input = "Start <think>nested <inner>tags</inner> content</think> end";
        let output = sanitize_response(input);
        assert!(!output.contains('<'));
        assert!(!output.contains('>'));
    }

    #[test]
    fn test_sanitize_response_strips_markdown_emphasis() {
        assert_eq!(sanitize_response("**Bold** claim"), "Bold claim");
    }
}
