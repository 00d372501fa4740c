//! Agora CLI - philosophical debates in the terminal
//!
//! Runs a staged debate between scripted personas, optionally with you
//! taking one side.

use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use agora_core::config::default_config;
use agora_core::debate_format;
use agora_core::{
    CancellationFlag, Config, DebateCallback, DebateConfig, DebateEvent, DebateOrchestrator,
    OpenAiGenerator, Participant, Role, Side, UserInput, UserPrompt,
};
use async_trait::async_trait;
use clap::{ArgAction, Parser};
use colored::Colorize;
use tokio::sync::{Mutex, mpsc};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "agora",
    version,
    about = "Agora - staged philosophical debates",
    long_about = "A CLI tool for running structured debates between AI personas \
                  using OpenAI-compatible APIs."
)]
struct Cli {
    /// The topic to debate
    #[arg(value_name = "TOPIC")]
    topic: String,

    /// Background given to every speaker
    #[arg(long, default_value = "", value_name = "TEXT")]
    context: String,

    /// Names of the personas arguing for the motion
    #[arg(long, action = ArgAction::Append, value_name = "NAME")]
    pro: Vec<String>,

    /// Names of the personas arguing against the motion
    #[arg(long, action = ArgAction::Append, value_name = "NAME")]
    con: Vec<String>,

    /// Names of neutral personas
    #[arg(long, action = ArgAction::Append, value_name = "NAME")]
    neutral: Vec<String>,

    /// Name of the moderator
    #[arg(long, default_value = "Moderator", value_name = "NAME")]
    moderator: String,

    /// Model used for every speaker (overrides the config file)
    #[arg(short, long, value_name = "MODEL")]
    model: Option<String>,

    /// Debate format to use
    #[arg(long, value_name = "FORMAT")]
    debate_format: Option<String>,

    /// Take part yourself, on this side (pro or con)
    #[arg(long, value_name = "SIDE")]
    user_side: Option<String>,

    /// Your display name
    #[arg(long, default_value = "You", value_name = "NAME")]
    user_name: String,

    /// One of your core arguments (repeatable)
    #[arg(long, action = ArgAction::Append, value_name = "TEXT")]
    core_argument: Vec<String>,

    /// Path to a TOML config file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if let Some(model) = &cli.model {
        config.generation.model = model.clone();
    }
    if let Some(format) = &cli.debate_format {
        config.debate.format = format.clone();
    }

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

    let user_side = match cli.user_side.as_deref() {
        Some(side) => Some(parse_side(side)?),
        None => None,
    };

    // Get the debate format
    let format = debate_format::get_format(&config.debate.format, &config.debate).ok_or_else(|| {
        format!(
            "Unknown debate format: '{}'. Available formats: {}",
            config.debate.format,
            debate_format::available_formats().join(", ")
        )
    })?;

    let participants = build_participants(&cli, user_side);

    // Print header
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - {}", "Agora".bold(), format.display_name())
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Topic:".bold(), cli.topic.bright_white());
    println!();
    println!("{}", "Participants:".bold());
    for (i, p) in participants.iter().enumerate() {
        println!(
            "  {}. {} ({})",
            i + 1,
            p.name.bright_cyan(),
            p.role.display_name().yellow()
        );
    }
    if let Some(side) = user_side {
        println!(
            "  {}. {} ({})",
            participants.len() + 1,
            cli.user_name.bright_green(),
            side.to_string().yellow()
        );
    }
    println!("  {} {}", "Model:".dimmed(), config.generation.model.dimmed());
    println!();
    println!("{}", "─".repeat(70).dimmed());

    let mut debate = DebateConfig::new(&cli.topic)
        .with_context(&cli.context)
        .with_core_arguments(
            cli.core_argument
                .iter()
                .map(|a| serde_value(a.as_str()))
                .collect(),
        );
    if let Some(side) = user_side {
        debate = debate.with_user(side, &cli.user_name);
    }

    let generator = Arc::new(OpenAiGenerator::new(&api_base, &api_key, &config.generation)?);

    let cancel = CancellationFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{}", "Stopping after the current turn...".yellow());
            on_interrupt.cancel();
        }
    });

    let mut orchestrator =
        DebateOrchestrator::new(debate, participants, format.as_ref(), generator, config)?
            .with_callback(create_console_callback())
            .with_cancellation(cancel);
    if user_side.is_some() {
        orchestrator = orchestrator.with_user_input(Box::new(StdinInput::new()));
    }

    // Run the debate
    let transcript = orchestrator.run().await?;

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    if orchestrator.session().stage() == agora_core::Stage::Completed {
        println!("{}", "  Debate concluded.".bright_green().bold());
    } else {
        println!(
            "{}",
            format!("  Debate stopped after {} turns.", transcript.len())
                .yellow()
                .bold()
        );
    }
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    Ok(())
}

fn parse_side(side: &str) -> Result<Side, String> {
    match side.parse::<Role>() {
        Ok(Role::Pro) => Ok(Side::Pro),
        Ok(Role::Con) => Ok(Side::Con),
        _ => Err(format!("Invalid user side '{}': expected pro or con", side)),
    }
}

fn serde_value(text: &str) -> serde_json::Value {
    serde_json::Value::String(text.to_string())
}

/// Build the scripted personas. Each side the user is not on gets a default
/// candidate when none was named.
fn build_participants(cli: &Cli, user_side: Option<Side>) -> Vec<Participant> {
    let mut participants = vec![Participant::new(&cli.moderator, Role::Moderator)];
    let seats = [
        (Role::Pro, &cli.pro, "Candidate A"),
        (Role::Con, &cli.con, "Candidate B"),
    ];
    for (role, names, default_name) in seats {
        if names.is_empty() && user_side.map(|s| s.role()) != Some(role) {
            participants.push(Participant::new(default_name, role));
        }
        participants.extend(names.iter().map(|name| Participant::new(name, role)));
    }
    participants.extend(cli.neutral.iter().map(|name| Participant::new(name, Role::Neutral)));
    participants
}

/// Reads the user's turns from stdin, one line per turn.
///
/// Lines are read on a detached thread so a pending read never holds the
/// runtime open once the debate is over or cancelled.
struct StdinInput {
    lines: Mutex<mpsc::Receiver<String>>,
}

impl StdinInput {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        std::thread::spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        Self::from_receiver(rx)
    }

    fn from_receiver(rx: mpsc::Receiver<String>) -> Self {
        Self {
            lines: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl UserInput for StdinInput {
    async fn read_turn(&self, _prompt: &UserPrompt) -> Option<String> {
        // EOF and read errors close the channel and end the user's participation.
        self.lines.lock().await.recv().await
    }
}

/// Create a callback that prints debate events to the console.
fn create_console_callback() -> DebateCallback {
    Box::new(move |event| match event {
        DebateEvent::StageStart {
            name, description, ..
        } => {
            println!();
            println!("{}", "═".repeat(70).bright_magenta());
            println!("{}", format!("  📢 {}", name).bright_magenta().bold());
            println!("  {}", description.dimmed());
            println!("{}", "═".repeat(70).bright_magenta());
            println!();
        }
        DebateEvent::SpeakerStart { name, role, target } => {
            let target = target
                .map(|t| format!(" → {}", t))
                .unwrap_or_default();
            println!(
                "{} {} {}{}",
                "▶".bright_cyan(),
                name.bright_cyan().bold(),
                format!("({})", role).yellow(),
                target.dimmed()
            );
        }
        DebateEvent::SpeakerMessage { name: _, content } => {
            // Word wrap and indent the content
            let wrapped = textwrap(&content, 66);
            for line in wrapped.lines() {
                println!("  {}", line);
            }
            println!();
        }
        DebateEvent::AwaitingUser(prompt) => print_user_prompt(&prompt),
        DebateEvent::AnalysisReady(result) => {
            if let Some(error) = &result.error {
                println!("  {}", format!("[analysis unavailable: {}]", error).dimmed());
            } else if result.total_arguments > 0 {
                println!("  {}", format!("[{}]", result.summary).dimmed());
                println!();
            }
        }
        DebateEvent::KeyPointsUpdated(points) => {
            println!("{}", "  Opponents' key points:".dimmed());
            for point in points {
                println!("{}", format!("    • {}", point).dimmed());
            }
            println!();
        }
        DebateEvent::Cancelled => {
            println!("{}", "  The debate was stopped.".yellow());
        }
        DebateEvent::DebateEnd => {
            // Handled in main
        }
    })
}

fn print_user_prompt(prompt: &UserPrompt) {
    println!(
        "{} {}",
        "▶ Your turn".bright_green().bold(),
        format!("({} - {})", prompt.role.display_name(), prompt.stage_name).yellow()
    );
    println!("  {}", prompt.stage_description.dimmed());
    if !prompt.weak_points.is_empty() {
        println!("  {}", "Weak points to press on:".bold());
        for point in &prompt.weak_points {
            for (i, line) in textwrap(point, 60).lines().enumerate() {
                let bullet = if i == 0 { "•" } else { " " };
                println!("    {} {}", bullet, line);
            }
        }
    }
    if !prompt.my_key_points.is_empty() {
        println!("  {}", "Your core arguments:".bold());
        for point in &prompt.my_key_points {
            println!("    • {}", point);
        }
    }
    print!("{} ", ">".bright_green());
    // Flush so the marker shows before stdin blocks.
    std::io::stdout().flush().ok();
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_textwrap_respects_width() {
        let wrapped = textwrap("one two three four five six seven", 10);
        assert!(wrapped.lines().all(|line| line.len() <= 10));
        assert_eq!(wrapped.split_whitespace().count(), 7);
    }

    #[test]
    fn test_parse_side() {
        assert_eq!(parse_side("pro").unwrap(), Side::Pro);
        assert_eq!(parse_side("against").unwrap(), Side::Con);
        assert!(parse_side("moderator").is_err());
    }

    #[test]
    fn test_user_side_gets_no_default_candidate() {
        let cli = Cli::parse_from(["agora", "topic", "--user-side", "con", "--neutral", "Hume"]);
        let participants = build_participants(&cli, Some(Side::Con));
        let roles: Vec<Role> = participants.iter().map(|p| p.role).collect();
        assert_eq!(roles, vec![Role::Moderator, Role::Pro, Role::Neutral]);
        assert_eq!(participants[1].name, "Candidate A");
    }

    fn prompt() -> UserPrompt {
        UserPrompt {
            user_id: "User".to_string(),
            role: Role::Con,
            stage: agora_core::Stage::Discussion,
            stage_name: "Discussion".to_string(),
            stage_description: String::new(),
            weak_points: Vec::new(),
            opponent_key_points: Vec::new(),
            my_key_points: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_stdin_input_returns_queued_lines_in_order() {
        let (tx, rx) = mpsc::channel(4);
        let input = StdinInput::from_receiver(rx);
        tx.send("first".to_string()).await.unwrap();
        tx.send("second".to_string()).await.unwrap();
        assert_eq!(input.read_turn(&prompt()).await.as_deref(), Some("first"));
        assert_eq!(input.read_turn(&prompt()).await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_stdin_input_ends_when_reader_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        let input = StdinInput::from_receiver(rx);
        drop(tx);
        assert_eq!(input.read_turn(&prompt()).await, None);
    }
}
