//! `pagewise chat`: interactive session in the terminal.
//!
//! Anything typed is sent as a question, except these commands:
//!
//! - `/settings T K P`  set temperature, top_k and top_p
//! - `/sources N`       show or hide the sources of answer N
//! - `/history`         print the conversation so far
//! - `/help`            list the commands
//! - `exit`             leave

use super::runtime::{load_config, parse_variant, session_factory};
use pagewise_core::message::TurnRole;
use pagewise_pipeline::{ChatSession, PipelineStreamEvent};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Ask(String),
    Settings { temperature: f64, top_k: f64, top_p: f64 },
    /// 1-based answer number
    ToggleSources(usize),
    History,
    Help,
    Exit,
    Empty,
    Invalid(String),
}

impl ReplCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        if matches!(line, "exit" | "quit" | "/exit" | "/quit") {
            return Self::Exit;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Ask(line.to_string());
        };

        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();
        match (name, args.as_slice()) {
            ("settings", [t, k, p]) => match (t.parse(), k.parse(), p.parse()) {
                (Ok(temperature), Ok(top_k), Ok(top_p)) => Self::Settings {
                    temperature,
                    top_k,
                    top_p,
                },
                _ => Self::Invalid("usage: /settings TEMPERATURE TOP_K TOP_P".into()),
            },
            ("settings", _) => Self::Invalid("usage: /settings TEMPERATURE TOP_K TOP_P".into()),
            ("sources", [n]) => match n.parse::<usize>() {
                Ok(n) if n >= 1 => Self::ToggleSources(n),
                _ => Self::Invalid("usage: /sources N (answer number, from 1)".into()),
            },
            ("sources", _) => Self::Invalid("usage: /sources N (answer number, from 1)".into()),
            ("history", []) => Self::History,
            ("help", []) => Self::Help,
            _ => Self::Invalid(format!("unknown command '/{name}', try /help")),
        }
    }
}

pub async fn run(explicit: Option<&Path>, variant: Option<String>) -> anyhow::Result<()> {
    let config = load_config(explicit)?;
    let factory = session_factory(&config).await?;
    let variant = parse_variant(variant.as_deref(), &factory)?;
    let mut session = factory.create_with_variant(variant)?;

    println!();
    println!("{}", session.welcome_message());
    println!();
    println!("  Document:  {}", config.document.path.display());
    println!("  Model:     {} ({})", config.default_model, config.default_provider);
    println!("  Pipeline:  {variant}");
    println!();
    println!("  Type your question and press Enter. /help lists commands, 'exit' quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match ReplCommand::parse(&line) {
            ReplCommand::Empty => continue,
            ReplCommand::Exit => break,
            ReplCommand::Help => print_help(),
            ReplCommand::Invalid(msg) => eprintln!("  [!] {msg}"),
            ReplCommand::History => print_history(&session),
            ReplCommand::Settings {
                temperature,
                top_k,
                top_p,
            } => match session.update_settings(temperature, top_k, top_p) {
                Ok(p) => println!(
                    "  Settings updated: temperature {} / top_k {} / top_p {} (applied at the next question)",
                    p.temperature(),
                    p.top_k(),
                    p.top_p()
                ),
                Err(e) => eprintln!("  [!] Settings rejected: {e}"),
            },
            ReplCommand::ToggleSources(n) => match session.toggle_sources(n - 1) {
                Some(true) => {
                    if let Some(entry) = session.sources_entry(n - 1) {
                        println!("{}", entry.render());
                    }
                }
                Some(false) => println!("  Sources of answer {n} hidden."),
                None => eprintln!("  [!] Answer {n} has no sources."),
            },
            ReplCommand::Ask(question) => ask(&mut session, &question).await?,
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Stream one answer to stdout.
async fn ask(session: &mut ChatSession, question: &str) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel(64);

    let turn = async move {
        let result = session.send_message_streaming(question, &tx).await;
        drop(tx);
        result
    };
    let printer = async {
        print!("\n  Assistant > ");
        while let Some(event) = rx.recv().await {
            match event {
                PipelineStreamEvent::Chunk { content } => {
                    print!("{content}");
                    let _ = std::io::stdout().flush();
                }
                PipelineStreamEvent::Error { message } => eprintln!("\n  [!] Answer interrupted: {message}"),
                PipelineStreamEvent::Done { .. } => {}
            }
        }
        println!();
    };

    let (reply, ()) = tokio::join!(turn, printer);
    if let Some(index) = reply?.sources_index {
        println!("  (sources: /sources {})", index + 1);
    }
    Ok(())
}

fn print_help() {
    println!("  /settings T K P   temperature (0-1), top_k (1-100), top_p (0-1)");
    println!("  /sources N        show or hide the sources of answer N");
    println!("  /history          print the conversation");
    println!("  exit              leave");
}

fn print_history(session: &ChatSession) {
    for turn in session.history().turns() {
        let who = match turn.role {
            TurnRole::Human => "You",
            TurnRole::Ai => "Assistant",
        };
        println!("  {who} > {}", turn.content);
    }
}
