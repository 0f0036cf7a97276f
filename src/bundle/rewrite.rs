// Reference rewrite table for bundled workflows
//
// When the root workflow is copied to the bundle root as workflow.cwl, its
// relative references no longer resolve; this module builds the table of
// (old token, new token) pairs and applies it line by line. Old tokens keep
// their surrounding context (run: prefix, full path segments) so substring
// replacement cannot partially match.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use crate::cwl::resolver::{resolve_include_paths, resolve_schema_paths, resolve_step_paths};
use crate::cwl::CwlDocument;

/// One textual rewrite: a reference as written, and its staged replacement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteEntry {
    pub old_token: String,
    pub new_token: String,
}

/// The full rewrite table for one bundling operation
///
/// One entry per step, one per distinct schema reference, one per distinct
/// script include; built fresh per bundle, consumed once.
#[derive(Debug, Clone, Default)]
pub struct RewriteTable {
    pub steps: Vec<RewriteEntry>,
    pub schemas: Vec<RewriteEntry>,
    pub includes: Vec<RewriteEntry>,
}

impl RewriteTable {
    /// Build the table for a root workflow against the repository root
    pub fn build(root: &CwlDocument, repo_root: &Path) -> Result<Self> {
        let root_dir = root.parent_dir().to_path_buf();

        let mut steps = Vec::new();
        for (step, run_path) in resolve_step_paths(root)? {
            let staged = repo_relative(&run_path, repo_root)?;
            let file_name = run_path
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("Step '{}' has no run file name", step.id))?;
            steps.push(RewriteEntry {
                old_token: file_name.to_string(),
                new_token: staged,
            });
        }

        let mut schemas = Vec::new();
        for schema_path in resolve_schema_paths(root) {
            let old_token = relative_path_between(&root_dir, &schema_path);
            let entry = RewriteEntry {
                old_token,
                new_token: repo_relative(&schema_path, repo_root)?,
            };
            if !schemas.contains(&entry) {
                schemas.push(entry);
            }
        }

        let mut includes = Vec::new();
        for include_path in resolve_include_paths(root) {
            let old_token = relative_path_between(&root_dir, &include_path);
            let entry = RewriteEntry {
                old_token,
                new_token: repo_relative(&include_path, repo_root)?,
            };
            if !includes.contains(&entry) {
                includes.push(entry);
            }
        }

        Ok(Self {
            steps,
            schemas,
            includes,
        })
    }

    /// Total number of rewrite entries
    pub fn entry_count(&self) -> usize {
        self.steps.len() + self.schemas.len() + self.includes.len()
    }

    /// Rewrite one line against every table entry
    pub fn rewrite_line(&self, line: &str) -> String {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];

        if let Some(captures) = run_line_regex().captures(trimmed) {
            let target = captures.get(1).map_or("", |m| m.as_str());
            let target_name = Path::new(strip_fragment(target))
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(target);
            for entry in &self.steps {
                if entry.old_token == target_name {
                    return format!("{}run: {}", indent, entry.new_token);
                }
            }
        }

        if let Some(captures) = schema_line_regex().captures(trimmed) {
            let target = captures.get(2).map_or("", |m| m.as_str());
            let target_path = strip_fragment(target);
            for entry in &self.schemas {
                if entry.old_token == target_path {
                    return line.replacen(target_path, &entry.new_token, 1);
                }
            }
        }

        if let Some(captures) = include_line_regex().captures(trimmed) {
            let target = captures.get(1).map_or("", |m| m.as_str());
            for entry in &self.includes {
                if entry.old_token == target {
                    return line.replacen(target, &entry.new_token, 1);
                }
            }
        }

        line.to_string()
    }

    /// Rewrite a whole document, line by line, single pass
    ///
    /// Trailing whitespace is stripped per line, which also converts any
    /// Windows line endings to plain newlines.
    pub fn rewrite_document(&self, content: &str) -> String {
        let mut rewritten = String::with_capacity(content.len());
        for line in content.lines() {
            rewritten.push_str(self.rewrite_line(line.trim_end()).trim_end());
            rewritten.push('\n');
        }
        rewritten
    }
}

fn run_line_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^run:\s+(\S+)$").expect("static regex"))
}

fn schema_line_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^((?:- \$import:)|(?:type:)|(?:-))\s+([^\s#]+)(?:#\S*)?$")
            .expect("static regex")
    })
}

fn include_line_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^- \$include:\s+(\S+)$").expect("static regex"))
}

fn strip_fragment(reference: &str) -> &str {
    match reference.split_once('#') {
        Some((path_part, _)) => path_part,
        None => reference,
    }
}

/// Express a path relative to the repository root
pub fn repo_relative(path: &Path, repo_root: &Path) -> Result<String> {
    let relative = path.strip_prefix(repo_root).with_context(|| {
        format!(
            "{} is not under the catalogue repository {}",
            path.display(),
            repo_root.display()
        )
    })?;
    Ok(relative.to_string_lossy().to_string())
}

/// Relative path from a base directory to a target, lexically
pub fn relative_path_between(base_dir: &Path, target: &Path) -> String {
    let base: Vec<Component> = base_dir.components().collect();
    let target_components: Vec<Component> = target.components().collect();

    let common = base
        .iter()
        .zip(target_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..base.len() {
        relative.push("..");
    }
    for component in &target_components[common..] {
        relative.push(component.as_os_str());
    }
    relative.to_string_lossy().to_string()
}
