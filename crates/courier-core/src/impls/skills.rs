//! Skill catalog backed by a directory tree.
//!
//! ```text
//! skills/
//!   shared/
//!     summarize/SKILL.md
//!   security/
//!     web/
//!       code-review/
//!         SKILL.md
//!         scripts/scan.sh
//!         references/owasp.md
//!   quick-fix/SKILL.md          <- category "general"
//! ```
//!
//! A directory holding `SKILL.md` is a skill and is not descended into; every
//! other directory is a category. Symlinks are never followed.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{ExecutionError, SkillContent, SkillSummary, TaskRequest};
use crate::ports::{ContextResolver, TaskContext};

pub const MANIFEST: &str = "SKILL.md";
/// Category that is always visible, whatever the allow-list says.
pub const SHARED_CATEGORY: &str = "shared";
/// Category of skills placed directly under the root.
pub const ROOT_CATEGORY: &str = "general";

const SCRIPTS_DIR: &str = "scripts";
const REFERENCES_DIR: &str = "references";

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid front matter in {path}: {source}")]
    FrontMatter {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl SkillError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        SkillError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    name: Option<String>,
    description: Option<String>,
}

/// Directory-walking catalog. Reads the filesystem on every call.
#[derive(Debug, Clone)]
pub struct SkillCatalog {
    root: PathBuf,
    /// Top-level categories to expose. Empty means all.
    categories: Vec<String>,
}

impl SkillCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            categories: Vec::new(),
        }
    }

    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories
            .into_iter()
            .map(Into::into)
            .filter(|c: &String| !c.trim().is_empty())
            .collect();
        self
    }

    /// List every visible skill, sorted by category then name.
    /// A missing root is an empty catalog; an unreadable manifest is skipped.
    pub fn discover(&self) -> Result<Vec<SkillSummary>, SkillError> {
        let mut skills = Vec::new();
        if !self.root.is_dir() {
            debug!(root = %self.root.display(), "skills directory not found");
            return Ok(skills);
        }
        self.walk(&self.root, &mut skills)?;
        skills.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));
        Ok(skills)
    }

    fn walk(&self, dir: &Path, skills: &mut Vec<SkillSummary>) -> Result<(), SkillError> {
        for entry in sorted_entries(dir)? {
            // symlinks can point back up the tree
            if is_symlink(&entry) {
                debug!(path = %entry.display(), "skipping symlink");
                continue;
            }
            if !entry.is_dir() {
                continue;
            }
            if entry.join(MANIFEST).is_file() {
                match summarize(&self.root, &entry) {
                    Ok(summary) => skills.push(summary),
                    Err(e) => warn!(error = %e, "skipping skill"),
                }
            } else if dir != self.root || self.category_allowed(&entry) {
                self.walk(&entry, skills)?;
            }
        }
        Ok(())
    }

    fn category_allowed(&self, dir: &Path) -> bool {
        if self.categories.is_empty() {
            return true;
        }
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name == SHARED_CATEGORY || self.categories.iter().any(|c| c == name)
    }
}

/// Read the full content of the skill in `path` (the directory holding the
/// manifest).
pub fn load_full(path: &Path) -> Result<SkillContent, SkillError> {
    let manifest = path.join(MANIFEST);
    let text = fs::read_to_string(&manifest).map_err(|e| SkillError::io(&manifest, e))?;
    let (_, body) = split_front_matter(&manifest, &text)?;
    Ok(SkillContent {
        instructions: body.trim().to_string(),
        scripts: list_files(&path.join(SCRIPTS_DIR))?,
        references: list_files(&path.join(REFERENCES_DIR))?,
    })
}

fn summarize(root: &Path, dir: &Path) -> Result<SkillSummary, SkillError> {
    let manifest = dir.join(MANIFEST);
    let text = fs::read_to_string(&manifest).map_err(|e| SkillError::io(&manifest, e))?;
    let (front, body) = split_front_matter(&manifest, &text)?;

    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let description = front
        .description
        .filter(|d| !d.trim().is_empty())
        .or_else(|| first_body_line(body))
        .unwrap_or_default();

    Ok(SkillSummary {
        name: front
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(dir_name),
        description,
        path: dir.to_path_buf(),
        category: category_of(root, dir),
    })
}

/// `---\n<yaml>\n---\n<body>`; text without a leading fence is all body.
fn split_front_matter<'a>(
    manifest: &Path,
    text: &'a str,
) -> Result<(FrontMatter, &'a str), SkillError> {
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return Ok((FrontMatter::default(), text));
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let front = if yaml.trim().is_empty() {
                FrontMatter::default()
            } else {
                serde_yaml::from_str(yaml).map_err(|source| SkillError::FrontMatter {
                    path: manifest.to_path_buf(),
                    source,
                })?
            };
            return Ok((front, body));
        }
        offset += line.len();
    }
    // unterminated fence: treat the whole file as body
    Ok((FrontMatter::default(), text))
}

fn answers_to(skill: &SkillSummary, name: &str) -> bool {
    skill.name == name || skill.path.file_name().is_some_and(|dir| dir == name)
}

fn first_body_line(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
}

fn category_of(root: &Path, dir: &Path) -> String {
    let parent = dir
        .parent()
        .and_then(|p| p.strip_prefix(root).ok())
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();
    if parent.is_empty() {
        ROOT_CATEGORY.to_string()
    } else {
        parent
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, SkillError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| SkillError::io(dir, e))? {
        entries.push(entry.map_err(|e| SkillError::io(dir, e))?.path());
    }
    entries.sort();
    Ok(entries)
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>, SkillError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    Ok(sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_file())
        .collect())
}

/// Resolves the catalog (and the named skill's instructions) for every task.
/// Nothing is cached: edits to the skills directory show up on the next task.
pub struct SkillContextResolver {
    catalog: SkillCatalog,
}

impl SkillContextResolver {
    pub fn new(catalog: SkillCatalog) -> Self {
        Self { catalog }
    }

    fn resolve_blocking(
        catalog: &SkillCatalog,
        skill: Option<&str>,
    ) -> Result<TaskContext, SkillError> {
        let skills = catalog.discover()?;
        let skill_instructions = match skill {
            Some(name) => match skills.iter().find(|s| answers_to(s, name)) {
                Some(summary) => Some(load_full(&summary.path)?.instructions),
                None => {
                    warn!(skill = name, "requested skill not found in catalog");
                    None
                }
            },
            None => None,
        };
        Ok(TaskContext {
            skills,
            skill_instructions,
        })
    }
}

#[async_trait]
impl ContextResolver for SkillContextResolver {
    async fn resolve(&self, request: &TaskRequest) -> Result<TaskContext, ExecutionError> {
        // inline content wins; no need to touch the filesystem for it
        let skill = match request.metadata.skill_content {
            Some(_) => None,
            None => request.skill().map(str::to_string),
        };
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || Self::resolve_blocking(&catalog, skill.as_deref()))
            .await
            .map_err(|e| ExecutionError::Context(e.to_string()))?
            .map_err(|e| ExecutionError::Context(e.to_string()))
    }
}
