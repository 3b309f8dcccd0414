//! File-backed memory for the decision pipeline.
//!
//! The memory directory holds:
//! - facts.txt: stable facts, one per line, grown by learned facts
//! - goals.txt: the operator's goals
//! - scratchpad.json: free-form working notes
//!
//! Learned facts are also journaled with a timestamp to a lessons file,
//! which lives with the service state rather than the memory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::WorkspaceError;

/// Well-known memory file names.
pub mod paths {
    pub const FACTS: &str = "facts.txt";
    pub const GOALS: &str = "goals.txt";
    pub const SCRATCHPAD: &str = "scratchpad.json";
    pub const LESSONS: &str = "lessons.txt";
}

/// Memory text read for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory {
    pub facts: String,
    pub goals: String,
    pub scratchpad: String,
}

impl Memory {
    /// Facts and goals, the context the fallback table consults.
    pub fn decision_context(&self) -> String {
        format!("{}\n{}", self.facts, self.goals)
    }
}

/// Lesson-recording collaborator. Best effort: callers record failures
/// and carry on.
#[async_trait]
pub trait LessonRecorder: Send + Sync {
    async fn record_lesson(&self, text: &str) -> Result<(), WorkspaceError>;
}

/// Memory directory plus the lessons journal.
pub struct Workspace {
    base_path: PathBuf,
    lessons_path: PathBuf,
}

impl Workspace {
    /// Create a workspace over `base_path`, journaling lessons to `lessons_path`.
    pub fn new(base_path: PathBuf, lessons_path: PathBuf) -> Self {
        Self {
            base_path,
            lessons_path,
        }
    }

    /// Resolve a memory file name to an absolute path.
    pub fn resolve_path(&self, relative: &str) -> PathBuf {
        self.base_path.join(relative)
    }

    /// Ensure the memory directory exists.
    pub async fn ensure_dirs(&self) -> Result<(), WorkspaceError> {
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    /// Read a memory file.
    pub async fn read(&self, path: &str) -> Result<String, WorkspaceError> {
        let full_path = self.resolve_path(path);
        if !full_path.exists() {
            return Err(WorkspaceError::FileNotFound(path.to_string()));
        }
        Ok(fs::read_to_string(&full_path).await?)
    }

    /// Read a memory file, treating missing or unreadable files as empty.
    async fn read_or_empty(&self, path: &str) -> String {
        match self.read(path).await {
            Ok(content) => content,
            Err(e) => {
                debug!(path, error = %e, "Memory file unavailable, using empty text");
                String::new()
            }
        }
    }

    /// Load facts, goals and scratchpad.
    pub async fn load_memory(&self) -> Memory {
        Memory {
            facts: self.read_or_empty(paths::FACTS).await,
            goals: self.read_or_empty(paths::GOALS).await,
            scratchpad: self.read_or_empty(paths::SCRATCHPAD).await,
        }
    }
}

/// Append one line to `path`, creating the file and its parent if missing.
async fn append_line(path: &Path, line: &str) -> Result<(), WorkspaceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[async_trait]
impl LessonRecorder for Workspace {
    async fn record_lesson(&self, text: &str) -> Result<(), WorkspaceError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        append_line(&self.resolve_path(paths::FACTS), text).await?;
        let stamp = Utc::now().format("%Y-%m-%d %H:%M UTC");
        append_line(&self.lessons_path, &format!("[{stamp}] {text}")).await?;

        info!(fact = text, "Recorded learned fact");
        Ok(())
    }
}
