//! Debate orchestration logic.
//!
//! The controller drives solo and versus debate flow: turn order, user
//! interjection, summarization, and history edits. Every state-mutating
//! operation acquires the target session's gate for its full duration, so
//! mutations serialize per session while sessions stay fully concurrent
//! with each other. Read-only operations bypass the gate.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::Config;
use crate::context::{ContextWindowBuilder, SummaryMode};
use crate::error::DebateError;
use crate::ledger::{Speaker, Turn, TurnDraft, TurnKind, TurnLedger};
use crate::persona::{MODERATOR, PersonaRegistry};
use crate::pipeline::{ChatModel, GenerationPipeline, SpeechSynthesizer, SpokenTurn};
use crate::session::{DebateMode, Session, SessionRegistry, SessionStatus, SessionView};

/// Parameters for opening a new debate.
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub mode: DebateMode,
    pub topic: String,
    /// Persona names, ids, or aliases; 1 for solo, 2 for versus.
    pub participants: Vec<String>,
    /// Optional background material woven into every context window.
    pub background: Option<String>,
    /// Synthesize audio for generated turns.
    pub voice: bool,
}

/// Orchestrates debates across all live sessions.
pub struct DebateController {
    registry: SessionRegistry,
    ledger: TurnLedger,
    personas: PersonaRegistry,
    windows: ContextWindowBuilder,
    pipeline: GenerationPipeline,
}

impl DebateController {
    pub fn new(
        config: Config,
        model: Arc<dyn ChatModel>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Result<Self, DebateError> {
        config.validate()?;
        Ok(Self {
            registry: SessionRegistry::new(),
            ledger: TurnLedger::new(),
            personas: PersonaRegistry::new(config.personas.clone()),
            windows: ContextWindowBuilder::new(config.context.max_turns),
            pipeline: GenerationPipeline::new(model, synthesizer, config.model, config.retry),
        })
    }

    /// The persona roster available for debates.
    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    /// Open a new session and register its (empty) turn log.
    pub fn create_session(&self, request: CreateSession) -> Result<SessionView, DebateError> {
        let expected = request.mode.participant_count();
        if request.participants.len() != expected {
            return Err(DebateError::InvalidParticipantCount {
                expected,
                actual: request.participants.len(),
            });
        }

        let participants = request
            .participants
            .iter()
            .map(|name| self.personas.resolve(name))
            .collect::<Result<Vec<_>, _>>()?;

        let session = Arc::new(Session::new(
            request.mode,
            request.topic,
            participants,
            request.background,
            request.voice,
        ));
        self.ledger.create(session.id);
        self.registry.insert(Arc::clone(&session));

        tracing::debug!(
            session = %session.id,
            mode = ?session.mode,
            topic = %session.topic,
            "created session"
        );
        Ok(session.view())
    }

    /// Snapshot of a session's current state.
    pub fn session(&self, id: Uuid) -> Result<SessionView, DebateError> {
        Ok(self.registry.get(id)?.view())
    }

    /// Produce the next scheduled persona's turn and advance the cursor.
    pub async fn advance(&self, id: Uuid) -> Result<SpokenTurn, DebateError> {
        let session = self.registry.get(id)?;
        let _gate = session.gate().await;
        require_active(&session, "advance")?;

        let speaker = session.scheduled_speaker();
        let turns = self.ledger.list(id)?;
        let window = self.windows.build(&session, &speaker, &turns);
        let spoken = self
            .pipeline
            .generate_turn(&self.ledger, id, &speaker, TurnKind::Statement, window, session.voice)
            .await?;

        // Cursor moves only once the turn is safely persisted.
        session.advance_cursor();
        Ok(spoken)
    }

    /// Append a user interjection without moving the debate cursor.
    ///
    /// The next `advance` still produces the originally scheduled persona's
    /// response, now informed by the injected text. Versus mode only.
    pub async fn inject(&self, id: Uuid, text: impl Into<String>) -> Result<Turn, DebateError> {
        let session = self.registry.get(id)?;
        let _gate = session.gate().await;

        if session.mode != DebateMode::Versus {
            return Err(DebateError::InjectionNotSupported);
        }
        require_active(&session, "inject")?;

        self.ledger
            .append(id, TurnDraft::statement(Speaker::User, text.into().trim()))
    }

    /// One conversational exchange: append the user's message, then produce
    /// the scheduled persona's reply. The solo-mode interaction loop; in a
    /// versus debate it behaves like an injection followed by an advance.
    pub async fn converse(
        &self,
        id: Uuid,
        text: impl Into<String>,
    ) -> Result<SpokenTurn, DebateError> {
        let session = self.registry.get(id)?;
        let _gate = session.gate().await;
        require_active(&session, "converse")?;

        self.ledger
            .append(id, TurnDraft::statement(Speaker::User, text.into().trim()))?;

        let speaker = session.scheduled_speaker();
        let turns = self.ledger.list(id)?;
        let window = self.windows.build(&session, &speaker, &turns);
        let spoken = self
            .pipeline
            .generate_turn(&self.ledger, id, &speaker, TurnKind::Statement, window, session.voice)
            .await?;

        session.advance_cursor();
        Ok(spoken)
    }

    /// Close the debate with a neutral analysis of the full ledger.
    ///
    /// Callable exactly once: the session transitions through `summarizing`
    /// to `closed` and its history is sealed. A failed summary generation
    /// leaves the session active so the call can be retried.
    pub async fn summarize(
        &self,
        id: Uuid,
        mode: SummaryMode,
    ) -> Result<SpokenTurn, DebateError> {
        let session = self.registry.get(id)?;
        let _gate = session.gate().await;
        require_active(&session, "summarize")?;

        let analyst = self.personas.resolve(MODERATOR)?;
        session.set_status(SessionStatus::Summarizing);

        let turns = self.ledger.list(id)?;
        let window = self.windows.build_summary(&session, &analyst, &turns, mode);
        let result = self
            .pipeline
            .generate_turn(&self.ledger, id, &analyst, TurnKind::Summary, window, session.voice)
            .await;

        match result {
            Ok(spoken) => {
                self.ledger.seal(id)?;
                session.set_status(SessionStatus::Closed);
                tracing::debug!(session = %id, "session summarized and closed");
                Ok(spoken)
            }
            Err(err) => {
                session.set_status(SessionStatus::Active);
                Err(err)
            }
        }
    }

    /// Replace the text at `seq` and delete every later turn.
    ///
    /// Destructive-forward: turns after `seq` may have been generated from
    /// context that included the old text, so they are invalidated rather
    /// than silently kept. Returns the edited turn and how many later turns
    /// were removed. Editing a closed session reopens it.
    pub async fn edit_turn(
        &self,
        id: Uuid,
        seq: u64,
        text: impl Into<String>,
    ) -> Result<(Turn, usize), DebateError> {
        let session = self.registry.get(id)?;
        let _gate = session.gate().await;

        let edited = self.ledger.replace_text(id, seq, text.into())?;
        let removed = self.ledger.delete_from(id, seq + 1)?;
        if removed > 0 {
            tracing::warn!(session = %id, seq, removed, "edit invalidated later turns");
        }
        self.reopen_after_truncation(&session)?;
        Ok((edited, removed))
    }

    /// Delete the turn at `seq` and every later turn.
    ///
    /// Same destructive-forward rule as `edit_turn`; keeping later turns
    /// would leave a gap in the sequence. Returns how many turns were
    /// removed. Deleting from a closed session reopens it.
    pub async fn delete_turn(&self, id: Uuid, seq: u64) -> Result<usize, DebateError> {
        let session = self.registry.get(id)?;
        let _gate = session.gate().await;

        // Ensure the anchor turn exists before truncating.
        self.ledger.get(id, seq)?;
        let removed = self.ledger.delete_from(id, seq)?;
        self.reopen_after_truncation(&session)?;
        Ok(removed)
    }

    /// Backfill audio for an already-persisted turn.
    ///
    /// Returns the turn unchanged if it already carries an audio reference.
    /// User turns are read in the moderator's voice.
    pub async fn voice_turn(&self, id: Uuid, seq: u64) -> Result<Turn, DebateError> {
        let session = self.registry.get(id)?;
        let _gate = session.gate().await;

        let turn = self.ledger.get(id, seq)?;
        if turn.audio.is_some() {
            return Ok(turn);
        }

        let voice_of = match &turn.speaker {
            Speaker::Persona(persona_id) => self.personas.resolve(persona_id)?,
            Speaker::User => self.personas.resolve(MODERATOR)?,
        };
        let path = self.pipeline.synthesize_only(&voice_of, &turn.text).await?;
        self.ledger.attach_audio(id, seq, path)
    }

    /// Clear all turns and return the session to its starting state.
    pub async fn reset(&self, id: Uuid) -> Result<SessionView, DebateError> {
        let session = self.registry.get(id)?;
        let _gate = session.gate().await;

        self.ledger.clear(id)?;
        session.reset_cursor();
        session.set_status(SessionStatus::Active);
        tracing::debug!(session = %id, "session reset");
        Ok(session.view())
    }

    /// Remove the session and cascade-delete its turn history.
    pub async fn delete_session(&self, id: Uuid) -> Result<(), DebateError> {
        let session = self.registry.get(id)?;
        let _gate = session.gate().await;

        self.registry.remove(id)?;
        self.ledger.remove(id);
        tracing::debug!(session = %id, "session deleted");
        Ok(())
    }

    /// All turns in sequence order. Read-only; runs without the gate.
    pub fn list_turns(&self, id: Uuid) -> Result<Vec<Turn>, DebateError> {
        self.ledger.list(id)
    }

    /// A single turn by sequence number. Read-only; runs without the gate.
    pub fn get_turn(&self, id: Uuid, seq: u64) -> Result<Turn, DebateError> {
        self.ledger.get(id, seq)
    }

    /// After a truncation the cursor is realigned with surviving history and
    /// a closed session comes back to life (its summary is gone).
    fn reopen_after_truncation(&self, session: &Session) -> Result<(), DebateError> {
        let spoken = self
            .ledger
            .list(session.id)?
            .iter()
            .filter(|t| matches!(t.speaker, Speaker::Persona(_)) && t.kind == TurnKind::Statement)
            .count();
        session.set_cursor(spoken);

        if session.status() != SessionStatus::Active {
            self.ledger.unseal(session.id)?;
            session.set_status(SessionStatus::Active);
        }
        Ok(())
    }
}

fn require_active(session: &Session, operation: &'static str) -> Result<(), DebateError> {
    match session.status() {
        SessionStatus::Active => Ok(()),
        status => Err(DebateError::InvalidSessionState { operation, status }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::error::{ModelError, SynthesisError};
    use crate::pipeline::ModelRequest;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock model: records every request; replies from a script, falling back
    /// to numbered canned text once the script is exhausted.
    struct MockModel {
        script: Mutex<VecDeque<Result<String, ModelError>>>,
        requests: Mutex<Vec<ModelRequest>>,
        counter: AtomicUsize,
    }

    impl MockModel {
        fn canned() -> Arc<Self> {
            Self::scripted(vec![])
        }

        fn scripted(script: Vec<Result<String, ModelError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
                counter: AtomicUsize::new(0),
            })
        }

        fn last_request(&self) -> ModelRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ChatModel for MockModel {
        async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(outcome) = self.script.lock().unwrap().pop_front() {
                return outcome;
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(format!("Generated argument {n}."))
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
            Err(SynthesisError::Engine("engine offline".to_string()))
        }
    }

    fn controller(
        model: Arc<MockModel>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> DebateController {
        let mut config = default_config();
        config.retry.base_delay_ms = 1;
        config.retry.request_timeout_secs = 5;
        config.retry.synthesis_timeout_secs = 5;
        DebateController::new(config, model, synthesizer).unwrap()
    }

    fn versus_request(voice: bool) -> CreateSession {
        CreateSession {
            mode: DebateMode::Versus,
            topic: "free will".to_string(),
            participants: vec!["SOCRATES".to_string(), "NIETZSCHE".to_string()],
            background: None,
            voice,
        }
    }

    fn solo_request() -> CreateSession {
        CreateSession {
            mode: DebateMode::Solo,
            topic: "the examined life".to_string(),
            participants: vec!["socrates".to_string()],
            background: None,
            voice: false,
        }
    }

    #[tokio::test]
    async fn test_create_session_rejects_wrong_participant_count() {
        let ctl = controller(MockModel::canned(), None);
        let err = ctl
            .create_session(CreateSession {
                mode: DebateMode::Versus,
                topic: "x".to_string(),
                participants: vec!["socrates".to_string()],
                background: None,
                voice: false,
            })
            .unwrap_err();
        assert!(matches!(
            err,
            DebateError::InvalidParticipantCount { expected: 2, actual: 1 }
        ));
    }

    #[tokio::test]
    async fn test_create_session_rejects_unknown_persona() {
        let ctl = controller(MockModel::canned(), None);
        let err = ctl
            .create_session(CreateSession {
                mode: DebateMode::Solo,
                topic: "x".to_string(),
                participants: vec!["plato".to_string()],
                background: None,
                voice: false,
            })
            .unwrap_err();
        assert!(matches!(err, DebateError::UnknownPersona(_)));
    }

    #[tokio::test]
    async fn test_versus_end_to_end() {
        let model = MockModel::canned();
        let ctl = controller(Arc::clone(&model), None);
        let session = ctl.create_session(versus_request(false)).unwrap();

        // Turn 0: first scheduled speaker.
        let first = ctl.advance(session.id).await.unwrap();
        assert_eq!(first.turn.seq, 0);
        assert_eq!(first.turn.speaker, Speaker::Persona("socrates".to_string()));

        // Injection keeps the cursor on the scheduled speaker.
        let injected = ctl.inject(session.id, "consider determinism").await.unwrap();
        assert_eq!(injected.seq, 1);
        assert_eq!(injected.speaker, Speaker::User);
        assert_eq!(ctl.session(session.id).unwrap().cursor, 1);

        // Turn 2: the originally scheduled persona, informed by the injection.
        let second = ctl.advance(session.id).await.unwrap();
        assert_eq!(second.turn.seq, 2);
        assert_eq!(second.turn.speaker, Speaker::Persona("nietzsche".to_string()));
        let window = model.last_request().window;
        assert!(
            window
                .messages
                .iter()
                .any(|m| m.content.contains("consider determinism"))
        );

        // Summary closes the session.
        let summary = ctl.summarize(session.id, SummaryMode::Both).await.unwrap();
        assert_eq!(summary.turn.seq, 3);
        assert_eq!(summary.turn.kind, TurnKind::Summary);
        assert_eq!(ctl.session(session.id).unwrap().status, SessionStatus::Closed);

        // Closed sessions reject further debate operations.
        assert!(matches!(
            ctl.advance(session.id).await.unwrap_err(),
            DebateError::InvalidSessionState { .. }
        ));
        assert!(matches!(
            ctl.summarize(session.id, SummaryMode::Summary).await.unwrap_err(),
            DebateError::InvalidSessionState { .. }
        ));
        assert!(matches!(
            ctl.inject(session.id, "too late").await.unwrap_err(),
            DebateError::InvalidSessionState { .. }
        ));
    }

    #[tokio::test]
    async fn test_inject_rejected_in_solo_mode() {
        let ctl = controller(MockModel::canned(), None);
        let session = ctl.create_session(solo_request()).unwrap();
        assert!(matches!(
            ctl.inject(session.id, "hello").await.unwrap_err(),
            DebateError::InjectionNotSupported
        ));
    }

    #[tokio::test]
    async fn test_converse_appends_user_and_reply() {
        let model = MockModel::canned();
        let ctl = controller(Arc::clone(&model), None);
        let session = ctl.create_session(solo_request()).unwrap();

        let spoken = ctl.converse(session.id, "Is virtue teachable?").await.unwrap();
        assert_eq!(spoken.turn.seq, 1);
        assert_eq!(spoken.turn.speaker, Speaker::Persona("socrates".to_string()));

        let turns = ctl.list_turns(session.id).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker, Speaker::User);
        assert_eq!(turns[0].text, "Is virtue teachable?");

        // The reply was generated with the user's message in context.
        let window = model.last_request().window;
        assert!(
            window
                .messages
                .iter()
                .any(|m| m.content.contains("Is virtue teachable?"))
        );
    }

    #[tokio::test]
    async fn test_edit_turn_truncates_forward() {
        let ctl = controller(MockModel::canned(), None);
        let session = ctl.create_session(versus_request(false)).unwrap();

        for _ in 0..4 {
            ctl.advance(session.id).await.unwrap();
        }

        let (edited, removed) = ctl.edit_turn(session.id, 1, "amended claim").await.unwrap();
        assert_eq!(edited.seq, 1);
        assert_eq!(edited.text, "amended claim");
        assert_eq!(removed, 2);

        let turns = ctl.list_turns(session.id).unwrap();
        assert_eq!(turns.len(), 2);
        assert!(turns.iter().all(|t| t.seq <= 1));

        // The cursor realigns with surviving history: two persona turns
        // remain, so the first speaker is scheduled again.
        let next = ctl.advance(session.id).await.unwrap();
        assert_eq!(next.turn.seq, 2);
        assert_eq!(next.turn.speaker, Speaker::Persona("socrates".to_string()));
    }

    #[tokio::test]
    async fn test_delete_turn_truncates_at_and_after() {
        let ctl = controller(MockModel::canned(), None);
        let session = ctl.create_session(versus_request(false)).unwrap();

        for _ in 0..3 {
            ctl.advance(session.id).await.unwrap();
        }

        let removed = ctl.delete_turn(session.id, 1).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(ctl.list_turns(session.id).unwrap().len(), 1);

        let err = ctl.delete_turn(session.id, 5).await.unwrap_err();
        assert!(matches!(err, DebateError::TurnNotFound { seq: 5, .. }));
    }

    #[tokio::test]
    async fn test_edit_reopens_closed_session() {
        let ctl = controller(MockModel::canned(), None);
        let session = ctl.create_session(versus_request(false)).unwrap();

        ctl.advance(session.id).await.unwrap();
        ctl.summarize(session.id, SummaryMode::Summary).await.unwrap();
        assert_eq!(ctl.session(session.id).unwrap().status, SessionStatus::Closed);

        // Editing turn 0 deletes the summary and brings the session back.
        let (_, removed) = ctl.edit_turn(session.id, 0, "revised opening").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ctl.session(session.id).unwrap().status, SessionStatus::Active);
        assert!(ctl.advance(session.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_summary_leaves_session_active() {
        let model = MockModel::scripted(vec![
            Ok("An opening statement.".to_string()),
            Err(ModelError::RateLimited),
            Err(ModelError::RateLimited),
            Err(ModelError::RateLimited),
        ]);
        let ctl = controller(model, None);
        let session = ctl.create_session(versus_request(false)).unwrap();
        ctl.advance(session.id).await.unwrap();

        let err = ctl.summarize(session.id, SummaryMode::Summary).await.unwrap_err();
        assert!(matches!(err, DebateError::GenerationUnavailable { .. }));
        assert_eq!(ctl.session(session.id).unwrap().status, SessionStatus::Active);
        assert_eq!(ctl.list_turns(session.id).unwrap().len(), 1);

        // The script is exhausted, so the retry falls through to canned text.
        assert!(ctl.summarize(session.id, SummaryMode::Summary).await.is_ok());
        assert_eq!(ctl.session(session.id).unwrap().status, SessionStatus::Closed);
    }

    #[tokio::test]
    async fn test_reset_restores_starting_state() {
        let ctl = controller(MockModel::canned(), None);
        let session = ctl.create_session(versus_request(false)).unwrap();

        ctl.advance(session.id).await.unwrap();
        ctl.summarize(session.id, SummaryMode::Summary).await.unwrap();

        let view = ctl.reset(session.id).await.unwrap();
        assert_eq!(view.status, SessionStatus::Active);
        assert_eq!(view.cursor, 0);
        assert!(ctl.list_turns(session.id).unwrap().is_empty());

        // Numbering restarts and the first speaker opens again.
        let first = ctl.advance(session.id).await.unwrap();
        assert_eq!(first.turn.seq, 0);
        assert_eq!(first.turn.speaker, Speaker::Persona("socrates".to_string()));
    }

    #[tokio::test]
    async fn test_delete_session_cascades() {
        let ctl = controller(MockModel::canned(), None);
        let session = ctl.create_session(versus_request(false)).unwrap();
        ctl.advance(session.id).await.unwrap();

        ctl.delete_session(session.id).await.unwrap();
        assert!(matches!(
            ctl.list_turns(session.id).unwrap_err(),
            DebateError::SessionNotFound(_)
        ));
        assert!(matches!(
            ctl.advance(session.id).await.unwrap_err(),
            DebateError::SessionNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_degraded_synthesis_still_persists_turn() {
        let ctl = controller(MockModel::canned(), Some(Arc::new(BrokenSynth)));
        let session = ctl.create_session(versus_request(true)).unwrap();

        let spoken = ctl.advance(session.id).await.unwrap();
        assert!(spoken.degraded);
        assert!(spoken.turn.audio.is_none());
        assert_eq!(ctl.list_turns(session.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_voice_turn_backfills_audio() {
        let ctl = controller(MockModel::canned(), Some(Arc::new(OkSynth)));
        let session = ctl.create_session(versus_request(false)).unwrap();
        ctl.advance(session.id).await.unwrap();

        let voiced = ctl.voice_turn(session.id, 0).await.unwrap();
        assert_eq!(voiced.audio.as_deref(), Some("static/audio/bm_george.wav"));

        // Idempotent: the existing artifact is kept.
        let again = ctl.voice_turn(session.id, 0).await.unwrap();
        assert_eq!(again.audio, voiced.audio);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_advances_serialize_per_session() {
        let ctl = Arc::new(controller(MockModel::canned(), None));
        let session = ctl.create_session(versus_request(false)).unwrap();

        let mut handles = Vec::new();
        for _ in 0..6 {
            let ctl = Arc::clone(&ctl);
            let id = session.id;
            handles.push(tokio::spawn(async move { ctl.advance(id).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let turns = ctl.list_turns(session.id).unwrap();
        let seqs: Vec<u64> = turns.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);

        // Serialized advances keep strict speaker alternation.
        for (i, turn) in turns.iter().enumerate() {
            let expected = if i % 2 == 0 { "socrates" } else { "nietzsche" };
            assert_eq!(turn.speaker, Speaker::Persona(expected.to_string()));
        }
    }
}
