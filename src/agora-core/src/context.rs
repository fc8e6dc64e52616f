//! Bounded prompt-context assembly.
//!
//! Builds the message window sent to the language model for one generation
//! call: the active persona's system-prompt contract, optional background
//! material, and the most recent turns rendered in chronological order. The
//! builder is pure; given the same ledger contents and limit it produces
//! byte-identical windows.

use crate::ledger::{Speaker, Turn};
use crate::persona::Persona;
use crate::session::{DebateMode, Session};

/// Hard cap on the characters taken from a single turn. Model output is
/// untrusted for length; anything past this is truncated at a char boundary.
const MAX_TURN_CHARS: usize = 4000;

/// Role of a window message, mirroring the chat-completion roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    System,
    User,
    Assistant,
}

/// One message in an assembled window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextMessage {
    pub role: ContextRole,
    pub content: String,
}

/// A derived, never-persisted slice of history ready for the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextWindow {
    /// The active persona's system-prompt contract plus the debate frame.
    pub system_prompt: String,
    /// Background and history messages, oldest first.
    pub messages: Vec<ContextMessage>,
}

/// What the closing analysis should contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SummaryMode {
    /// Key arguments from both sides and who made the stronger case.
    #[default]
    Summary,
    /// Strict evaluation on argumentative strength alone.
    Grade,
    /// Summary first, then the verdict.
    Both,
}

impl SummaryMode {
    fn directive(&self) -> &'static str {
        match self {
            SummaryMode::Summary => {
                "Summarize the key arguments from both sides and conclude who made the stronger case."
            }
            SummaryMode::Grade => {
                "Evaluate the debate strictly on argumentative strength (logic, evidence, clarity), \
                 not emotional appeal or morals. Decide who made the stronger case overall."
            }
            SummaryMode::Both => {
                "First, summarize the key arguments from both sides. Then judge the debate solely on \
                 argumentative strength and decide who made the stronger case."
            }
        }
    }
}

/// Builds bounded context windows from ledger state.
#[derive(Debug, Clone)]
pub struct ContextWindowBuilder {
    max_turns: usize,
}

impl ContextWindowBuilder {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
        }
    }

    /// Assemble the window for the active persona's next turn.
    ///
    /// Keeps the most recent `max_turns` turns (oldest evicted first) in
    /// chronological order. The active persona's own turns become assistant
    /// messages; every other speaker is quoted back as a user message. An
    /// empty ledger yields a single opening directive.
    pub fn build(&self, session: &Session, active: &Persona, turns: &[Turn]) -> ContextWindow {
        let mut messages = Vec::new();

        if let Some(background) = session.background.as_deref() {
            let background = background.trim();
            if !background.is_empty() {
                messages.push(ContextMessage {
                    role: ContextRole::System,
                    content: format!(
                        "Use the following background to support your argument:\n{background}"
                    ),
                });
            }
        }

        let start = turns.len().saturating_sub(self.max_turns);
        let window = &turns[start..];

        if window.is_empty() {
            messages.push(ContextMessage {
                role: ContextRole::User,
                content: format!(
                    "The debate on the topic '{}' is now open. {}, please present your opening statement.",
                    session.topic, active.display_name
                ),
            });
        } else {
            for turn in window {
                messages.push(self.render_turn(session, active, turn));
            }
        }

        tracing::debug!(
            session = %session.id,
            persona = %active.id,
            total = turns.len(),
            kept = window.len(),
            "assembled context window"
        );

        ContextWindow {
            system_prompt: frame_prompt(session, active),
            messages,
        }
    }

    /// Assemble the closing-analysis window over the full, untrimmed ledger.
    pub fn build_summary(
        &self,
        session: &Session,
        analyst: &Persona,
        turns: &[Turn],
        mode: SummaryMode,
    ) -> ContextWindow {
        let intro = match session.mode {
            DebateMode::Versus => format!(
                "This is a debate between {} and {} on the topic '{}'.",
                session.participants[0].display_name,
                session.participants[1].display_name,
                session.topic
            ),
            DebateMode::Solo => format!(
                "This is a conversation between the user and {} on the topic '{}'.",
                session.participants[0].display_name, session.topic
            ),
        };

        let transcript = turns
            .iter()
            .map(|turn| {
                format!(
                    "{}: {}",
                    speaker_label(session, &turn.speaker),
                    clip(&turn.text)
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        ContextWindow {
            system_prompt: analyst.system_prompt.clone(),
            messages: vec![ContextMessage {
                role: ContextRole::User,
                content: format!("{intro}\n{}\n\n{transcript}", mode.directive()),
            }],
        }
    }

    fn render_turn(&self, session: &Session, active: &Persona, turn: &Turn) -> ContextMessage {
        let text = clip(&turn.text);
        match &turn.speaker {
            Speaker::Persona(id) if *id == active.id => ContextMessage {
                role: ContextRole::Assistant,
                content: text.into_owned(),
            },
            speaker => ContextMessage {
                role: ContextRole::User,
                content: format!("[{} said]: {}", speaker_label(session, speaker), text),
            },
        }
    }
}

/// The persona contract plus the debate frame for this session.
fn frame_prompt(session: &Session, active: &Persona) -> String {
    match session.mode {
        DebateMode::Versus => {
            let opponent = session
                .participants
                .iter()
                .find(|p| p.id != active.id)
                .map(|p| p.display_name.as_str())
                .unwrap_or("your opponent");
            format!(
                "{}\n\nYou are in a debate. Your name is {}. You are debating against {} on the \
                 topic: '{}'. Stay in character and respond directly to the arguments made in the \
                 conversation that follows.",
                active.system_prompt, active.display_name, opponent, session.topic
            )
        }
        DebateMode::Solo => format!(
            "{}\n\nYou are {}, debating with the user on the topic: '{}'. Stay in character and \
             engage the user's arguments directly.",
            active.system_prompt, active.display_name, session.topic
        ),
    }
}

/// Display name for a speaker, preferring the session roster.
fn speaker_label<'a>(session: &'a Session, speaker: &'a Speaker) -> &'a str {
    match speaker {
        Speaker::User => "User",
        Speaker::Persona(id) => session
            .participants
            .iter()
            .find(|p| p.id == *id)
            .map(|p| p.display_name.as_str())
            .unwrap_or(id),
    }
}

fn clip(text: &str) -> std::borrow::Cow<'_, str> {
    if text.len() <= MAX_TURN_CHARS {
        return std::borrow::Cow::Borrowed(text);
    }
    let mut end = MAX_TURN_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(text[..end].to_string())
}
