//! Append-only turn ledger.
//!
//! The ledger is the source of truth for debate history. Each session owns an
//! ordered log of turns with strictly increasing, gapless sequence numbers.
//! Appends assign the next number under the log's write lock, so concurrent
//! writers can never observe the same one. Read operations take the read lock
//! only and may run alongside a pending mutation; they see the log before or
//! after an append, never mid-write.
//!
//! Locks are held only for the duration of a call, never across an await.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DebateError;
use crate::session::SessionStatus;

/// Who produced a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    /// The human user (interjection or solo conversation).
    User,
    /// An AI persona, by canonical id.
    Persona(String),
}

impl Speaker {
    /// Name used when rendering this speaker into a prompt or transcript.
    pub fn name(&self) -> &str {
        match self {
            Speaker::User => "User",
            Speaker::Persona(id) => id,
        }
    }
}

/// What role a turn plays in the debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnKind {
    /// A regular debate utterance.
    Statement,
    /// The closing neutral summary of the whole debate.
    Summary,
}

/// One persisted utterance at a fixed position in a session's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub session: Uuid,
    /// Strictly increasing and gapless within the session.
    pub seq: u64,
    pub speaker: Speaker,
    pub kind: TurnKind,
    pub text: String,
    /// Path of the synthesized audio artifact, when voice succeeded.
    pub audio: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A turn before the ledger has assigned its sequence number.
#[derive(Debug, Clone)]
pub struct TurnDraft {
    pub speaker: Speaker,
    pub kind: TurnKind,
    pub text: String,
    pub audio: Option<String>,
}

impl TurnDraft {
    pub fn statement(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            kind: TurnKind::Statement,
            text: text.into(),
            audio: None,
        }
    }

    pub fn with_audio(mut self, audio: Option<String>) -> Self {
        self.audio = audio;
        self
    }
}

struct SessionLog {
    turns: Vec<Turn>,
    next_seq: u64,
    /// Set when the session closes; rejects further appends.
    sealed: bool,
}

/// Concurrent store of per-session turn logs.
///
/// The outer map is only locked per-shard for lookup; each log carries its
/// own `RwLock` so sessions never contend with each other.
pub struct TurnLedger {
    logs: DashMap<Uuid, Arc<RwLock<SessionLog>>>,
}

impl Default for TurnLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnLedger {
    pub fn new() -> Self {
        Self {
            logs: DashMap::new(),
        }
    }

    /// Register an empty log for a new session.
    pub fn create(&self, session: Uuid) {
        self.logs.entry(session).or_insert_with(|| {
            Arc::new(RwLock::new(SessionLog {
                turns: Vec::new(),
                next_seq: 0,
                sealed: false,
            }))
        });
    }

    /// Drop a session's log entirely (session deletion cascade).
    pub fn remove(&self, session: Uuid) -> bool {
        self.logs.remove(&session).is_some()
    }

    fn log(&self, session: Uuid) -> Result<Arc<RwLock<SessionLog>>, DebateError> {
        self.logs
            .get(&session)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(DebateError::SessionNotFound(session))
    }

    /// Append a turn, assigning the next sequence number atomically.
    pub fn append(&self, session: Uuid, draft: TurnDraft) -> Result<Turn, DebateError> {
        let log = self.log(session)?;
        let mut log = log.write().expect("ledger lock poisoned");

        if log.sealed {
            return Err(DebateError::InvalidSessionState {
                operation: "append",
                status: SessionStatus::Closed,
            });
        }

        let turn = Turn {
            session,
            seq: log.next_seq,
            speaker: draft.speaker,
            kind: draft.kind,
            text: draft.text,
            audio: draft.audio,
            timestamp: Utc::now(),
        };
        log.next_seq += 1;
        log.turns.push(turn.clone());
        Ok(turn)
    }

    /// All turns in sequence order.
    pub fn list(&self, session: Uuid) -> Result<Vec<Turn>, DebateError> {
        let log = self.log(session)?;
        let log = log.read().expect("ledger lock poisoned");
        Ok(log.turns.clone())
    }

    /// A single turn by sequence number.
    pub fn get(&self, session: Uuid, seq: u64) -> Result<Turn, DebateError> {
        let log = self.log(session)?;
        let log = log.read().expect("ledger lock poisoned");
        log.turns
            .iter()
            .find(|t| t.seq == seq)
            .cloned()
            .ok_or(DebateError::TurnNotFound { session, seq })
    }

    /// Truncate history at and after `seq`. Returns how many turns were
    /// removed; the next append reuses `seq`, keeping numbering gapless.
    pub fn delete_from(&self, session: Uuid, seq: u64) -> Result<usize, DebateError> {
        let log = self.log(session)?;
        let mut log = log.write().expect("ledger lock poisoned");

        let before = log.turns.len();
        log.turns.retain(|t| t.seq < seq);
        let removed = before - log.turns.len();
        if removed > 0 {
            log.next_seq = seq;
        }
        Ok(removed)
    }

    /// Replace the text at `seq` with a new record (same sequence number,
    /// fresh timestamp, audio cleared since it no longer matches the text).
    pub fn replace_text(
        &self,
        session: Uuid,
        seq: u64,
        text: impl Into<String>,
    ) -> Result<Turn, DebateError> {
        let log = self.log(session)?;
        let mut log = log.write().expect("ledger lock poisoned");

        let turn = log
            .turns
            .iter_mut()
            .find(|t| t.seq == seq)
            .ok_or(DebateError::TurnNotFound { session, seq })?;
        turn.text = text.into();
        turn.audio = None;
        turn.timestamp = Utc::now();
        Ok(turn.clone())
    }

    /// Attach an audio artifact to an existing turn (voice backfill).
    pub fn attach_audio(
        &self,
        session: Uuid,
        seq: u64,
        audio: impl Into<String>,
    ) -> Result<Turn, DebateError> {
        let log = self.log(session)?;
        let mut log = log.write().expect("ledger lock poisoned");

        let turn = log
            .turns
            .iter_mut()
            .find(|t| t.seq == seq)
            .ok_or(DebateError::TurnNotFound { session, seq })?;
        turn.audio = Some(audio.into());
        Ok(turn.clone())
    }

    /// Close the log to further appends.
    pub fn seal(&self, session: Uuid) -> Result<(), DebateError> {
        let log = self.log(session)?;
        log.write().expect("ledger lock poisoned").sealed = true;
        Ok(())
    }

    /// Reopen the log (reset / edit of a closed session).
    pub fn unseal(&self, session: Uuid) -> Result<(), DebateError> {
        let log = self.log(session)?;
        log.write().expect("ledger lock poisoned").sealed = false;
        Ok(())
    }

    /// Remove every turn and restart numbering from zero.
    pub fn clear(&self, session: Uuid) -> Result<(), DebateError> {
        let log = self.log(session)?;
        let mut log = log.write().expect("ledger lock poisoned");
        log.turns.clear();
        log.next_seq = 0;
        log.sealed = false;
        Ok(())
    }
}
