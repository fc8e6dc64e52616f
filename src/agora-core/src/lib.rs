//! Agora Core Library
//!
//! Provides the debate orchestration engine: session and turn management,
//! bounded context assembly, persona resolution, and the generation
//! pipeline (language model plus optional voice synthesis).

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod ledger;
pub mod llm;
pub mod persona;
pub mod pipeline;
pub mod session;
pub mod tts;

pub use config::{Config, default_config};
pub use context::{ContextWindow, ContextWindowBuilder, SummaryMode};
pub use controller::{CreateSession, DebateController};
pub use error::{DebateError, ModelError, SynthesisError};
pub use ledger::{Speaker, Turn, TurnKind, TurnLedger};
pub use llm::{ApiSettings, OpenAiChatModel};
pub use persona::{Persona, PersonaRegistry};
pub use pipeline::{ChatModel, GenerationPipeline, SpeechSynthesizer, SpokenTurn};
pub use session::{DebateMode, SessionRegistry, SessionStatus, SessionView};
pub use tts::KokoroSynthesizer;
