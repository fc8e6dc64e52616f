//! Persona definitions and resolution.
//!
//! A persona is an AI debater's fixed behavioral profile: its system-prompt
//! contract and the voice used when synthesizing its turns. Personas form a
//! closed, data-driven set loaded once at startup and shared by reference.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DebateError;

/// Persona id used for summary turns.
pub const MODERATOR: &str = "moderator";

/// An AI character's fixed behavioral profile.
///
/// Immutable after load; resolved by id or alias and shared as
/// `Arc<Persona>`, never copied per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Canonical identifier (lowercase).
    pub id: String,
    /// Name used in prompts and transcripts.
    pub display_name: String,
    /// The system-prompt contract defining how this persona argues.
    pub system_prompt: String,
    /// Voice profile used for synthesis.
    pub voice: String,
    /// Alternate names accepted by the resolver.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Persona {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        system_prompt: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into().to_lowercase(),
            display_name: display_name.into(),
            system_prompt: system_prompt.into(),
            voice: voice.into(),
            aliases: Vec::new(),
        }
    }

    /// Add accepted alternate names.
    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }
}

/// Read-only lookup from persona name to profile.
///
/// Built once from config; safe to share across sessions without locking.
pub struct PersonaRegistry {
    by_key: HashMap<String, Arc<Persona>>,
    ids: Vec<String>,
}

impl PersonaRegistry {
    /// Index personas by canonical id, display name, and every alias.
    /// All keys are matched case-insensitively.
    pub fn new(personas: Vec<Persona>) -> Self {
        let mut by_key = HashMap::new();
        let mut ids = Vec::with_capacity(personas.len());

        for persona in personas {
            let persona = Arc::new(persona);
            ids.push(persona.id.clone());
            by_key.insert(persona.id.to_lowercase(), Arc::clone(&persona));
            by_key.insert(persona.display_name.to_lowercase(), Arc::clone(&persona));
            for alias in &persona.aliases {
                by_key.insert(alias.to_lowercase(), Arc::clone(&persona));
            }
        }

        ids.sort();
        Self { by_key, ids }
    }

    /// Resolve a persona by id, display name, or alias.
    pub fn resolve(&self, name: &str) -> Result<Arc<Persona>, DebateError> {
        self.by_key
            .get(name.trim().to_lowercase().as_str())
            .cloned()
            .ok_or_else(|| DebateError::UnknownPersona(name.to_string()))
    }

    /// Canonical ids of every registered persona, sorted.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}
