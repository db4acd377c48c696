/// Durable conversation snapshots.
///
/// One YAML file per saved session in the history directory. Filenames are
/// UTC timestamps, prefixed with a sanitized summary when one exists, so a
/// directory listing doubles as a session index.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::config;
use crate::conversation::Conversation;

/// Write the snapshot to the history directory and return its path.
pub fn save(conv: &Conversation) -> Result<PathBuf> {
    let dir = config::history_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create history directory at {}", dir.display()))?;

    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let name = if conv.summary().is_empty() {
        format!("{stamp}.yaml")
    } else {
        format!("{}-{stamp}.yaml", sanitize_file_name(conv.summary()))
    };

    let path = dir.join(name);
    fs::write(&path, conv.to_yaml()?)
        .with_context(|| format!("cannot write snapshot to {}", path.display()))?;
    debug!(path = %path.display(), "snapshot saved");
    Ok(path)
}

/// Load a snapshot by name: a literal path first, then the history directory,
/// then a filename-prefix match against the history directory. Returns the
/// conversation and the resolved path.
pub fn load(name: &str) -> Result<(Conversation, PathBuf)> {
    let path = resolve(name)?;
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("cannot read snapshot at {}", path.display()))?;
    let conv = Conversation::from_yaml(&raw)
        .with_context(|| format!("cannot parse snapshot at {}", path.display()))?;
    Ok((conv, path))
}

fn resolve(name: &str) -> Result<PathBuf> {
    let literal = Path::new(name);
    if literal.exists() {
        return Ok(literal.to_path_buf());
    }

    let dir = config::history_dir();
    for candidate in [dir.join(name), dir.join(format!("{name}.yaml"))] {
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    // Prefix match, newest first, so a bare timestamp fragment works.
    if dir.exists() {
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(name))
            })
            .collect();
        entries.sort();
        if let Some(found) = entries.pop() {
            return Ok(found);
        }
    }

    bail!("no snapshot found for {name}")
}

/// Replace filesystem-unsafe characters with `-` and cap the length.
fn sanitize_file_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    name.truncate(64);
    name.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("A Chat About Rust"), "A-Chat-About-Rust");
        assert_eq!(sanitize_file_name("slash/and\\colon:"), "slash-and-colon");
        assert_eq!(sanitize_file_name("...dots..."), "dots");
        assert_eq!(sanitize_file_name("already-safe_name"), "already-safe_name");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "x".repeat(200);
        assert_eq!(sanitize_file_name(&long).len(), 64);
    }
}
