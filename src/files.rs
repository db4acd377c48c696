/// File-glob ingestion for seeding a conversation with source material.
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::warn;

use crate::util::is_binary;

pub struct FileContents {
    pub name: String,
    pub path: PathBuf,
    pub contents: String,
}

impl FileContents {
    /// Render as a user message: path header plus fenced contents.
    pub fn as_message(&self) -> String {
        format!("Path: `{}`\n ```\n{}```", self.path.display(), self.contents)
    }
}

/// Expand the given globs and read every matched text file. Binary files are
/// skipped; unreadable files are skipped with a warning.
pub fn gather(globs: &[String]) -> Result<Vec<FileContents>> {
    let mut out = Vec::new();
    for pattern in globs {
        let paths = glob::glob(pattern).with_context(|| format!("invalid glob: {pattern}"))?;
        for path in paths.flatten() {
            if !path.is_file() {
                continue;
            }
            let bytes = match std::fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            if is_binary(&bytes) {
                continue;
            }
            let Ok(contents) = String::from_utf8(bytes) else {
                continue;
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            out.push(FileContents {
                name,
                path,
                contents,
            });
        }
    }
    Ok(out)
}
