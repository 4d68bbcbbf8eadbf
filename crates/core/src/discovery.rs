// crates/core/src/discovery.rs
//! Log file discovery for Claude Code projects.
//!
//! Claude writes one directory per project under `~/.claude/projects/`, named
//! after the encoded working directory, each holding `<session>.jsonl` files.
//! [`FsLogSource`] exposes that layout to the file cache.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::cache::LogSource;
use crate::error::{DiscoveryError, ParseError};
use crate::parser::parse_log_file;
use crate::types::LogEntry;

/// Returns the default Claude home directory (`~/.claude`).
///
/// # Errors
/// Returns `DiscoveryError::HomeDirNotFound` if the home directory cannot be determined.
pub fn default_claude_home() -> Result<PathBuf, DiscoveryError> {
    let home = dirs::home_dir().ok_or(DiscoveryError::HomeDirNotFound)?;
    Ok(home.join(".claude"))
}

/// Path of the projects directory under a Claude home directory.
pub fn claude_projects_dir(claude_home: &Path) -> PathBuf {
    claude_home.join("projects")
}

/// A log file together with its last modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// List every `*.jsonl` file one level below `projects_dir`.
///
/// Project directories and files are visited in name order so that repeated
/// scans of an unchanged tree produce the same sequence. A missing projects
/// directory yields an empty list; unreadable project subdirectories are
/// skipped.
pub async fn list_log_files(projects_dir: &Path) -> Result<Vec<FileStamp>, DiscoveryError> {
    let project_dirs = match sorted_dir_entries(projects_dir).await {
        Ok(dirs) => dirs,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %projects_dir.display(), "Projects directory missing");
            return Ok(Vec::new());
        }
        Err(e) => return Err(DiscoveryError::io(projects_dir, e)),
    };

    let mut stamps = Vec::new();
    for project_dir in project_dirs {
        if !fs::metadata(&project_dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            continue;
        }
        let files = match sorted_dir_entries(&project_dir).await {
            Ok(files) => files,
            Err(e) => {
                debug!(path = %project_dir.display(), error = %e, "Skipping unreadable project dir");
                continue;
            }
        };
        for path in files {
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            match fs::metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => stamps.push(FileStamp { path, modified }),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable log file"),
            }
        }
    }
    Ok(stamps)
}

async fn sorted_dir_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut reader = fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

/// Project tag of a log file: the name of its encoded project directory.
pub fn project_tag(path: &Path) -> String {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Decode an encoded project directory name into a filesystem path.
///
/// Claude encodes `/Users/foo/app` as `-Users-foo-app`. Hyphens inside real
/// directory names are indistinguishable from separators, so this is the
/// best-effort decode used when no log entry carries a `cwd`.
pub fn decode_project_path(encoded_name: &str) -> String {
    if encoded_name.is_empty() {
        return String::new();
    }
    let trimmed = encoded_name.trim_start_matches('-');
    format!("/{}", trimmed.replace('-', "/"))
}

/// [`LogSource`] backed by a Claude home directory on disk.
pub struct FsLogSource {
    projects_dir: PathBuf,
}

impl FsLogSource {
    pub fn new(claude_home: &Path) -> Self {
        Self {
            projects_dir: claude_projects_dir(claude_home),
        }
    }
}

#[async_trait]
impl LogSource for FsLogSource {
    async fn modification_times(&self) -> Result<Vec<FileStamp>, DiscoveryError> {
        list_log_files(&self.projects_dir).await
    }

    async fn parse(&self, path: &Path) -> Result<Vec<LogEntry>, ParseError> {
        parse_log_file(path).await
    }

    fn project_tag(&self, path: &Path) -> String {
        project_tag(path)
    }
}
