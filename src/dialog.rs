use anyhow::Result;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;
use tracing::debug;

use crate::chat::{self, Backend, ChatError};
use crate::commands::{self, Outcome};
use crate::config::Config;
use crate::conversation::{Conversation, Role};
use crate::snapshot;
use crate::ui;

/// Explicit per-run switches, threaded in instead of living in globals.
#[derive(Debug, Clone, Copy, Default)]
pub struct DialogOptions {
    /// Blocking requests instead of streaming.
    pub rest_mode: bool,
    /// Echo the outgoing thread before each request.
    pub verbose: bool,
}

// ── Interactive loop ──────────────────────────────────────────────────────────

pub async fn start(cfg: &Config, mut conv: Conversation, opts: DialogOptions) -> Result<()> {
    let backend = chat::provide(&conv.profile().model, cfg);
    let mut rl = DefaultEditor::new()?;
    let mut exchanged = false;

    if opts.rest_mode {
        println!("REST mode");
    }

    loop {
        let prompt = ui::prompt(&conv.profile().user_name, &conv.profile().profile_name);
        match rl.readline(&prompt) {
            Ok(line) => {
                let input = line.trim().to_string();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&input);

                if input.starts_with(':') {
                    match commands::dispatch(&input, &mut conv) {
                        Ok(Outcome::Handled) => {}
                        Ok(Outcome::Exit) => break,
                        Ok(Outcome::Retrieve) => {
                            exchanged |= run_turn(&backend, &mut conv, opts, None).await;
                        }
                        Err(e) => println!("{}", format!("command error: {e}").bright_red()),
                    }
                    continue;
                }

                exchanged |= run_turn(&backend, &mut conv, opts, Some(&input)).await;
            }
            // Ctrl-C at the prompt discards the line, not the session.
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("input error: {e}");
                break;
            }
        }
    }

    finish(&backend, &mut conv, exchanged).await
}

/// Append the user input (when given), fetch the assistant reply, and append
/// it. Returns true when a full exchange landed in the conversation.
///
/// On cancellation or a vendor error nothing is appended: the head stays on
/// the pending user message so it can be edited or resent.
async fn run_turn(
    backend: &Backend,
    conv: &mut Conversation,
    opts: DialogOptions,
    input: Option<&str>,
) -> bool {
    if let Some(text) = input {
        conv.append(Role::User, text);
    }

    if opts.verbose {
        for msg in conv.thread_from_head() {
            println!("{}", format!("[{}]: {:.32}", msg.role, msg.content).dimmed());
        }
    }

    let result = backend
        .retrieve(conv, opts.rest_mode, |delta| {
            print!("{}", delta.bright_yellow());
            let _ = std::io::stdout().flush();
        })
        .await;

    match result {
        Ok(reply) => {
            conv.append(Role::Assistant, &reply);
            println!("\n");
            true
        }
        Err(ChatError::Cancelled) => {
            println!("{}", "(cancelled, your message is still at HEAD)".dimmed());
            false
        }
        Err(e) => {
            println!("{}", format!("error: {e}").bright_red());
            false
        }
    }
}

/// Exit path: optionally title the conversation, then autosave.
async fn finish(backend: &Backend, conv: &mut Conversation, exchanged: bool) -> Result<()> {
    if !exchanged {
        return Ok(());
    }
    let profile = conv.profile().clone();

    if profile.summarize && conv.summary().is_empty() {
        let summary = chat::summarize(backend, conv).await;
        debug!(summary = %summary, "generated summary");
        conv.set_summary(summary);
    }

    if profile.auto_save {
        let path = snapshot::save(conv)?;
        println!("Conversation saved to {}", path.display());
    }
    Ok(())
}

// ── Single-shot mode ──────────────────────────────────────────────────────────

/// One retrieval for an already-seeded conversation: used for `--content` and
/// piped stdin. Prints the reply (streamed unless REST mode) and returns it.
pub async fn single(cfg: &Config, conv: &mut Conversation, opts: DialogOptions) -> Result<String> {
    let backend = chat::provide(&conv.profile().model, cfg);

    let reply = backend
        .retrieve(conv, opts.rest_mode, |delta| {
            print!("{delta}");
            let _ = std::io::stdout().flush();
        })
        .await?;

    conv.append(Role::Assistant, &reply);
    println!();
    Ok(reply)
}
