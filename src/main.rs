mod chat;
mod commands;
mod config;
mod conversation;
mod dialog;
mod files;
mod snapshot;
mod ui;
mod util;

use std::io::{IsTerminal, Read};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};

use config::Config;
use conversation::{Conversation, Role};
use dialog::DialogOptions;

#[derive(Parser, Debug)]
#[command(
    name = "plait",
    about = "A chat client with branching, content-addressed conversation history",
    long_about = None,
)]
struct Args {
    /// Profile to use (a name in the profiles directory, or a path)
    #[arg(short, long, env = "PLAIT_PROFILE")]
    profile: Option<String>,

    /// Send one message, print the reply, and exit
    #[arg(short, long)]
    content: Option<String>,

    /// Glob patterns for files to attach to the conversation (repeatable)
    #[arg(short, long = "file", value_name = "GLOB")]
    file: Vec<String>,

    /// Restore a saved conversation by snapshot name or prefix
    #[arg(long, value_name = "NAME")]
    restore: Option<String>,

    /// Use blocking REST requests instead of streaming
    #[arg(short, long)]
    rest: bool,

    /// Echo the outgoing thread before each request
    #[arg(short, long)]
    verbose: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let cfg = Config::load()?;
    let profile = config::load_profile(&cfg, args.profile.as_deref().unwrap_or_default())?;

    if let Some(hint) = missing_key_hint(&cfg, &profile.model) {
        eprintln!("{hint}");
    }

    // ── Conversation seeding ──────────────────────────────────────────────────
    let mut conv = match &args.restore {
        Some(name) => {
            let (conv, path) = snapshot::load(name)?;
            println!("Conversation restored from {}", path.display());
            conv
        }
        None => fresh_conversation(profile),
    };

    attach_globs(&mut conv, &args.file, args.restore.is_some())?;

    let opts = DialogOptions {
        rest_mode: args.rest,
        verbose: args.verbose,
    };

    // ── Single-shot: --content or piped stdin ─────────────────────────────────
    if let Some(content) = args.content {
        conv.append(Role::User, &content);
        dialog::single(&cfg, &mut conv, opts).await?;
        return Ok(());
    }
    if !std::io::stdin().is_terminal() {
        let mut piped = String::new();
        std::io::stdin()
            .read_to_string(&mut piped)
            .context("cannot read piped input")?;
        if !piped.trim().is_empty() {
            conv.append(Role::User, piped.trim());
            dialog::single(&cfg, &mut conv, opts).await?;
        }
        return Ok(());
    }

    // ── Interactive mode ──────────────────────────────────────────────────────
    dialog::start(&cfg, conv, opts).await
}

/// New conversation from a profile: system context first, then any canned
/// messages the profile carries.
fn fresh_conversation(profile: config::Profile) -> Conversation {
    let pre_messages = profile.messages.clone();
    let system_context = profile.system_context.clone();
    let mut conv = Conversation::new(profile);

    conv.append(Role::System, &system_context);
    for pm in &pre_messages {
        let role = match pm.role.to_ascii_lowercase().as_str() {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        };
        conv.append(role, &pm.content);
    }
    conv
}

/// Attach glob-matched files as user messages. A restored snapshot already
/// carries its own context, so globs are skipped with a warning there.
fn attach_globs(conv: &mut Conversation, globs: &[String], restored: bool) -> Result<()> {
    if globs.is_empty() {
        return Ok(());
    }
    if restored {
        println!("WARN: file globs are ignored when restoring.");
        return Ok(());
    }
    for file in files::gather(globs)? {
        conv.append(Role::User, &file.as_message());
        println!("Attached {}", file.name);
    }
    Ok(())
}

/// Startup hint for the common first-run failure mode: an empty key would
/// otherwise surface only as a 401 on the first request.
fn missing_key_hint(cfg: &Config, model: &str) -> Option<String> {
    let (key, field) = if model.starts_with("claude") {
        (&cfg.anthropic_api_key, "AnthropicAPIKey")
    } else {
        (&cfg.openai_api_key, "OpenAIAPIKey")
    };
    key.is_empty().then(|| {
        format!(
            "No API key configured for {model}. Set {field} in {}",
            config::config_path().display()
        )
    })
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("PLAIT_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "elvish" => Shell::Elvish,
        _ => {
            eprintln!("Unknown shell: {shell_name}");
            eprintln!("Supported: bash, zsh, fish, elvish");
            std::process::exit(1);
        }
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "plait", &mut std::io::stdout());
    Ok(())
}
