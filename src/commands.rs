use anyhow::{Context, Result, bail};
use colored::Colorize;
use std::io::Write;

use crate::config;
use crate::conversation::{Conversation, Message, Role};
use crate::ui;

// ── Command table ─────────────────────────────────────────────────────────────

struct Cmd {
    name: &'static str,
    description: &'static str,
}

const COMMANDS: &[Cmd] = &[
    Cmd {
        name: ":history",
        description: "Show conversation history.",
    },
    Cmd {
        name: ":summary",
        description: "Show conversation summary.",
    },
    Cmd {
        name: ":move",
        description: "Change HEAD to another message.",
    },
    Cmd {
        name: ":config",
        description: "Open configuration directory.",
    },
    Cmd {
        name: ":editor",
        description: "Open an external text editor to add a new message.\n\
                      \x20 :editor <sha>   - Edit the given user message and continue from there.\n\
                      \x20 :editor latest  - Edit the nearest own message from HEAD.",
    },
    Cmd {
        name: ":modify",
        description: "Modify a past message in place. HEAD does not move.",
    },
    Cmd {
        name: ":exit",
        description: "Exit the program.",
    },
];

/// Resolve a (possibly abbreviated) command word, case-insensitively.
/// Ambiguous prefixes match nothing.
fn match_command(input: &str) -> Option<&'static str> {
    let lower = input.to_ascii_lowercase();
    let mut matched = None;
    for cmd in COMMANDS {
        if cmd.name.starts_with(&lower) {
            if matched.is_some() {
                return None;
            }
            matched = Some(cmd.name);
        }
    }
    matched
}

fn unknown_command() -> String {
    let mut out = String::from("unknown command.\n\n");
    for cmd in COMMANDS {
        out.push_str(&format!("  {:<10} - {}\n", cmd.name, cmd.description));
    }
    out
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

/// What the loop should do after a command ran.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Command handled; read the next input line.
    Handled,
    /// A new message was appended; fetch the assistant reply.
    Retrieve,
    /// Save-and-quit.
    Exit,
}

pub fn dispatch(input: &str, conv: &mut Conversation) -> Result<Outcome> {
    let mut parts = input.trim().split_whitespace();
    let word = parts.next().unwrap_or_default();
    let arg = parts.next().unwrap_or_default().trim();

    let Some(name) = match_command(word) else {
        bail!(unknown_command());
    };

    match name {
        ":history" => {
            show_history(conv);
            Ok(Outcome::Handled)
        }
        ":summary" => {
            println!("{}", conv.summary().bright_blue());
            Ok(Outcome::Handled)
        }
        ":move" => {
            change_head(conv, arg)?;
            Ok(Outcome::Handled)
        }
        ":config" => {
            config::open_config_dir()?;
            Ok(Outcome::Handled)
        }
        ":editor" => {
            if arg.is_empty() {
                compose_message(conv)
            } else {
                edit_message(conv, arg)
            }
        }
        ":modify" => modify_message(conv, arg),
        ":exit" => Ok(Outcome::Exit),
        _ => bail!(unknown_command()),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

fn show_history(conv: &Conversation) {
    for msg in conv.messages() {
        ui::print_message_block(msg);
    }
}

fn change_head(conv: &mut Conversation, prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("no id prefix provided");
    }
    let msg = conv.change_head(prefix)?;
    println!("{} {}", ui::message_header(&msg), "Head".bright_blue());
    for line in msg.content.lines() {
        println!("  {line}");
    }
    Ok(())
}

/// `:editor` with no argument: compose a brand-new user message.
fn compose_message(conv: &mut Conversation) -> Result<Outcome> {
    let buffer = editor_buffer("", conv);
    let result = open_editor(&buffer)?;
    if result.is_empty() {
        return Ok(Outcome::Handled);
    }

    let msg = conv.append(Role::User, &result);
    println!("{}", msg.content.bright_blue());
    Ok(Outcome::Retrieve)
}

/// `:editor latest` / `:editor <prefix>`: rewind the head to the target's
/// parent and append the edited text as a new node, leaving the original
/// reachable as a branch.
fn edit_message(conv: &mut Conversation, arg: &str) -> Result<Outcome> {
    let target = if arg.eq_ignore_ascii_case("latest") {
        conv.thread_from_head()
            .into_iter()
            .rev()
            .find(|m| m.role == Role::User)
            .context("no user message found on the current thread")?
    } else {
        let msg = conv.get_by_prefix(arg)?;
        if msg.role != Role::User {
            bail!("cannot edit a non-user message");
        }
        msg
    };

    let buffer = editor_buffer(&target.content, conv);
    let result = open_editor(&buffer)?;
    if result.is_empty() || result.trim() == target.content.trim() {
        return Ok(Outcome::Handled);
    }

    conv.change_head(&target.parent_sha1)
        .context("cannot rewind head to the edited message's parent")?;
    let msg = conv.append(target.role, &result);
    println!("{}", msg.content.bright_blue());
    Ok(Outcome::Retrieve)
}

/// `:modify <prefix>`: in-place content replacement; the id stays stable and
/// the head does not move.
fn modify_message(conv: &mut Conversation, arg: &str) -> Result<Outcome> {
    if arg.is_empty() {
        bail!("no id prefix provided");
    }
    let mut target = conv.get_by_prefix(arg)?;

    let buffer = editor_buffer(&target.content, conv);
    let result = open_editor(&buffer)?;
    if result.is_empty() || result.trim() == target.content.trim() {
        return Ok(Outcome::Handled);
    }

    target.content = result;
    conv.modify(&target)?;
    println!("[{:.6}] Modified.", target.sha1);
    Ok(Outcome::Handled)
}

// ── Editor plumbing ───────────────────────────────────────────────────────────

/// Initial editor content: the text being edited (possibly empty) followed by
/// the active thread as `#` comments for context, newest first.
fn editor_buffer(initial: &str, conv: &Conversation) -> String {
    let mut buffer = format!("{initial}\n\n# Save and close the editor to continue\n");
    for msg in conv.thread_from_head().iter().rev() {
        let head = if msg.head { "Head" } else { "" };
        buffer.push_str(&format!(
            "#\n# {:.6} -> {:.6} [{}] {}\n",
            msg.sha1, msg.parent_sha1, msg.role, head
        ));
        for line in msg.content.lines() {
            buffer.push_str(&format!("#   {line}\n"));
        }
    }
    buffer
}

/// Everything that is not a `#` comment line, trimmed.
fn strip_comments(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn open_editor(content: &str) -> Result<String> {
    let dir = config::config_dir();
    std::fs::create_dir_all(&dir)?;
    let mut file = tempfile::Builder::new()
        .prefix("plait-editor-")
        .suffix(".txt")
        .tempfile_in(&dir)
        .context("cannot create editor temp file")?;
    file.write_all(content.as_bytes())?;
    file.flush()?;

    let editor = std::env::var("EDITOR").unwrap_or_else(|_| {
        if cfg!(target_os = "windows") {
            "notepad.exe".to_string()
        } else {
            "vim".to_string()
        }
    });

    let mut cmd = std::process::Command::new(&editor);
    // VS Code returns immediately unless told to wait.
    if editor.contains("code") {
        cmd.arg("--wait");
    }
    let status = cmd
        .arg(file.path())
        .status()
        .with_context(|| format!("cannot launch editor: {editor}"))?;
    if !status.success() {
        bail!("editor exited with {status}");
    }

    let raw = std::fs::read_to_string(file.path())?;
    Ok(strip_comments(&raw))
}
