//! Skill catalog entries.

use std::path::PathBuf;

use serde::Serialize;

/// Lightweight catalog entry, cheap enough to list every skill per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillSummary {
    pub name: String,
    pub description: String,
    /// Directory that holds the skill manifest.
    pub path: PathBuf,
    pub category: String,
}

/// Full skill content, loaded on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkillContent {
    pub instructions: String,
    pub scripts: Vec<PathBuf>,
    pub references: Vec<PathBuf>,
}
