//! Debate sessions and the process-wide session registry.
//!
//! A session owns the small mutable core of a debate (status and turn-order
//! cursor) plus a gate that serializes every state-mutating operation on it.
//! The registry is a sharded concurrent map locked only for insert, lookup,
//! and removal; it is never held while a generation call is in flight.

use std::fmt;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::DebateError;
use crate::persona::Persona;

/// How a debate is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateMode {
    /// One persona; the user converses with it directly.
    Solo,
    /// Two personas debating each other; the user may interject.
    Versus,
}

impl DebateMode {
    /// Number of participants this mode requires.
    pub fn participant_count(&self) -> usize {
        match self {
            DebateMode::Solo => 1,
            DebateMode::Versus => 2,
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting advances and injections.
    Active,
    /// A summary generation is in flight.
    Summarizing,
    /// Summarized; history is sealed.
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Summarizing => "summarizing",
            SessionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

struct SessionCore {
    status: SessionStatus,
    /// Index into `participants` of the next speaker.
    cursor: usize,
}

/// One debate instance.
///
/// The immutable shape (mode, topic, participants) is fixed at creation.
/// Status and cursor live behind a short-held `RwLock` that is never kept
/// across an await; the `gate` is the session's exclusive mutation scope and
/// is held for the full duration of an operation, generation included.
pub struct Session {
    pub id: Uuid,
    pub mode: DebateMode,
    pub topic: String,
    pub participants: Vec<Arc<Persona>>,
    /// Optional background material woven into every context window.
    pub background: Option<String>,
    /// Whether turns should be voiced when a synthesizer is configured.
    pub voice: bool,
    pub created_at: DateTime<Utc>,
    core: RwLock<SessionCore>,
    gate: Mutex<()>,
}

impl Session {
    pub fn new(
        mode: DebateMode,
        topic: impl Into<String>,
        participants: Vec<Arc<Persona>>,
        background: Option<String>,
        voice: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            topic: topic.into(),
            participants,
            background,
            voice,
            created_at: Utc::now(),
            core: RwLock::new(SessionCore {
                status: SessionStatus::Active,
                cursor: 0,
            }),
            gate: Mutex::new(()),
        }
    }

    /// Acquire this session's exclusive mutation scope.
    ///
    /// Held across the whole operation and released on every exit path when
    /// the guard drops.
    pub(crate) async fn gate(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    pub fn status(&self) -> SessionStatus {
        self.core.read().expect("session lock poisoned").status
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        self.core.write().expect("session lock poisoned").status = status;
    }

    /// Index of the participant scheduled to speak next.
    pub fn cursor(&self) -> usize {
        self.core.read().expect("session lock poisoned").cursor
    }

    /// The persona scheduled to speak next.
    pub fn scheduled_speaker(&self) -> Arc<Persona> {
        Arc::clone(&self.participants[self.cursor() % self.participants.len()])
    }

    /// Move the cursor to the next participant, cycling.
    pub(crate) fn advance_cursor(&self) {
        let mut core = self.core.write().expect("session lock poisoned");
        core.cursor = (core.cursor + 1) % self.participants.len().max(1);
    }

    pub(crate) fn reset_cursor(&self) {
        self.set_cursor(0);
    }

    pub(crate) fn set_cursor(&self, cursor: usize) {
        self.core.write().expect("session lock poisoned").cursor =
            cursor % self.participants.len().max(1);
    }

    /// Serializable snapshot for callers.
    pub fn view(&self) -> SessionView {
        SessionView {
            id: self.id,
            mode: self.mode,
            topic: self.topic.clone(),
            participants: self.participants.iter().map(|p| p.id.clone()).collect(),
            status: self.status(),
            cursor: self.cursor(),
            voice: self.voice,
            created_at: self.created_at,
        }
    }
}

/// Caller-facing snapshot of a session's state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub mode: DebateMode,
    pub topic: String,
    pub participants: Vec<String>,
    pub status: SessionStatus,
    pub cursor: usize,
    pub voice: bool,
    pub created_at: DateTime<Utc>,
}

/// Process-wide map from session id to live session state.
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id, session);
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<Session>, DebateError> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(DebateError::SessionNotFound(id))
    }

    pub fn remove(&self, id: Uuid) -> Result<Arc<Session>, DebateError> {
        self.sessions
            .remove(&id)
            .map(|(_, session)| session)
            .ok_or(DebateError::SessionNotFound(id))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
