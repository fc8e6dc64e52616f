//! Agora CLI - AI persona debates
//!
//! A command-line tool for watching AI personas debate a topic, or for
//! debating one of them yourself, with optional synthesized speech.

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use agora_core::{
    ApiSettings, CreateSession, DebateController, DebateMode, KokoroSynthesizer, OpenAiChatModel,
    Speaker, SpeechSynthesizer, SpokenTurn, SummaryMode, default_config,
};
use clap::{ArgAction, Parser};
use colored::Colorize;

#[derive(Parser)]
#[command(
    name = "agora",
    version,
    about = "AI persona debates - watch two personas argue, or argue with one yourself",
    long_about = "Runs structured debates between AI personas over an OpenAI-compatible API.\n\
                  One --persona starts a solo conversation on stdin; two start a versus debate."
)]
struct Cli {
    /// The topic to debate
    #[arg(value_name = "TOPIC")]
    topic: String,

    /// Persona taking part (specify once for solo, twice for versus)
    #[arg(short, long, action = ArgAction::Append, value_name = "PERSONA")]
    persona: Vec<String>,

    /// Exchanges to run in versus mode (one turn per persona each)
    #[arg(short, long, default_value = "3", value_name = "ROUNDS")]
    rounds: u32,

    /// Interject this comment after the first exchange (versus only)
    #[arg(long, value_name = "TEXT")]
    interject: Option<String>,

    /// Background material the personas may draw on
    #[arg(long, value_name = "TEXT")]
    background: Option<String>,

    /// Synthesize speech for every generated turn
    #[arg(long)]
    voice: bool,

    /// Close the debate with a neutral summary
    #[arg(long)]
    summarize: bool,

    /// Write the final transcript to this path as JSON
    #[arg(long, value_name = "PATH")]
    save: Option<PathBuf>,

    /// TOML config file overriding the built-in defaults
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => agora_core::Config::load(path)?,
        None => default_config(),
    };
    let audio_dir = config.audio.output_dir.clone();

    // Get API configuration from environment
    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    });

    let mode = match cli.persona.len() {
        1 => DebateMode::Solo,
        2 => DebateMode::Versus,
        n => {
            eprintln!(
                "{} Expected 1 persona (solo) or 2 (versus), got {}.",
                "Error:".red().bold(),
                n
            );
            eprintln!("Usage: agora \"{}\" -p socrates -p nietzsche", cli.topic);
            std::process::exit(1);
        }
    };

    let model = OpenAiChatModel::new(ApiSettings { api_base, api_key })?;
    let synthesizer: Option<Arc<dyn SpeechSynthesizer>> = if cli.voice {
        Some(Arc::new(KokoroSynthesizer::new(&audio_dir).await.map_err(
            |e| format!("Failed to start voice synthesis: {e}"),
        )?))
    } else {
        None
    };

    let controller = DebateController::new(config, Arc::new(model), synthesizer)?;

    let session = controller.create_session(CreateSession {
        mode,
        topic: cli.topic.clone(),
        participants: cli.persona.clone(),
        background: cli.background.clone(),
        voice: cli.voice,
    })?;

    print_header(&cli.topic, &session.participants);

    match mode {
        DebateMode::Versus => {
            for round in 0..cli.rounds.max(1) {
                for _ in 0..session.participants.len() {
                    let spoken = controller.advance(session.id).await?;
                    print_spoken(&controller, &spoken);
                }
                if round == 0 {
                    if let Some(comment) = &cli.interject {
                        let turn = controller.inject(session.id, comment.clone()).await?;
                        println!("{} {}", "You:".bright_green().bold(), turn.text);
                        println!();
                    }
                }
            }
        }
        DebateMode::Solo => {
            run_solo(&controller, session.id).await?;
        }
    }

    if cli.summarize {
        println!("{}", "─".repeat(70).dimmed());
        let summary = controller.summarize(session.id, SummaryMode::Both).await?;
        println!("{}", "Moderator's verdict:".bright_magenta().bold());
        print_wrapped(&summary.turn.text);
    }

    if let Some(path) = &cli.save {
        let transcript = serde_json::json!({
            "session": controller.session(session.id)?,
            "turns": controller.list_turns(session.id)?,
        });
        std::fs::write(path, serde_json::to_string_pretty(&transcript)?)?;
        println!("{} {}", "Transcript saved to".dimmed(), path.display());
    }

    Ok(())
}

/// Solo mode: read the user's arguments from stdin until EOF.
async fn run_solo(
    controller: &DebateController,
    session: uuid::Uuid,
) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "{}",
        "Make your argument (Ctrl-D to finish):".dimmed()
    );
    let stdin = std::io::stdin();
    loop {
        print!("{} ", "You:".bright_green().bold());
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let spoken = controller.converse(session, line).await?;
        print_spoken(controller, &spoken);
    }
    println!();
    Ok(())
}

fn print_header(topic: &str, participants: &[String]) {
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", format!("  Agora - {}", topic).bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{}", "Participants:".bold());
    for (i, id) in participants.iter().enumerate() {
        println!("  {}. {}", i + 1, id.bright_cyan());
    }
    println!();
    println!("{}", "─".repeat(70).dimmed());
}

fn print_spoken(controller: &DebateController, spoken: &SpokenTurn) {
    let name = match &spoken.turn.speaker {
        Speaker::User => "You".to_string(),
        Speaker::Persona(id) => controller
            .personas()
            .resolve(id)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|_| id.clone()),
    };

    println!("{} {}", "▶".bright_cyan(), name.bright_cyan().bold());
    print_wrapped(&spoken.turn.text);
    if let Some(audio) = &spoken.turn.audio {
        println!("  {}", format!("[audio: {audio}]").dimmed());
    }
    if spoken.degraded {
        println!("  {}", "[voice synthesis failed; text only]".yellow());
    }
    println!();
}

fn print_wrapped(text: &str) {
    for line in textwrap(text, 66).lines() {
        println!("  {}", line);
    }
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}
