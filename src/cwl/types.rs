// Core CWL document types for the CWL ICA tool suite
//
// This module defines the on-disk document handle used throughout the
// packaging engine, the catalogue document kinds, and the closed set of
// type shapes a schema field declaration can take.

use anyhow::{Context, Result};
use serde_yaml::Value;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

/// Catalogue document kinds, one per top-level repository directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Tool,
    Workflow,
    Expression,
    Schema,
}

impl DocumentKind {
    /// Top-level catalogue directory holding documents of this kind
    pub fn items_dir(&self) -> &'static str {
        match self {
            DocumentKind::Tool => "tools",
            DocumentKind::Workflow => "workflows",
            DocumentKind::Expression => "expressions",
            DocumentKind::Schema => "schemas",
        }
    }

    /// Classify a catalogue directory name
    pub fn from_items_dir(dir_name: &str) -> Option<Self> {
        match dir_name {
            "tools" => Some(DocumentKind::Tool),
            "workflows" => Some(DocumentKind::Workflow),
            "expressions" => Some(DocumentKind::Expression),
            "schemas" => Some(DocumentKind::Schema),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentKind::Tool => write!(f, "tool"),
            DocumentKind::Workflow => write!(f, "workflow"),
            DocumentKind::Expression => write!(f, "expression"),
            DocumentKind::Schema => write!(f, "schema"),
        }
    }
}

/// One step of a workflow document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    /// Short step id (the fragment after any `#`)
    pub id: String,
    /// The raw `run` reference string as written in the document
    pub run: String,
}

/// Handle for one on-disk workflow/tool/expression/schema file
///
/// The parsed document is populated eagerly on construction and owned
/// exclusively by the handle.
#[derive(Debug, Clone)]
pub struct CwlDocument {
    /// Absolute path of the file under the repository root
    pub file_path: PathBuf,
    /// Logical name from the catalogue layout
    pub name: String,
    /// Semantic version from the catalogue layout
    pub version: String,
    /// Document kind
    pub kind: DocumentKind,
    /// Parsed in-memory document
    pub doc: Value,
    /// SHA-256 hex digest over the on-disk serialization
    pub digest: String,
}

impl CwlDocument {
    /// Load and parse a catalogue document from disk
    pub fn load<P: AsRef<Path>>(path: P, kind: DocumentKind) -> Result<Self> {
        let file_path = normalize_path(path.as_ref());

        let content = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read CWL document {}", file_path.display()))?;

        let doc: Value = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse CWL document {}", file_path.display()))?;

        let digest = format!("{:x}", Sha256::digest(content.as_bytes()));
        let (name, version) = name_version_from_path(&file_path)?;

        Ok(Self {
            file_path,
            name,
            version,
            kind,
            doc,
            digest,
        })
    }

    /// Directory containing this document
    pub fn parent_dir(&self) -> &Path {
        self.file_path
            .parent()
            .unwrap_or_else(|| Path::new("/"))
    }

    /// Steps of a workflow document
    ///
    /// A step whose `run` is anything but a plain string (an inline embedded
    /// definition) is a rejected input.
    pub fn steps(&self) -> Result<Vec<WorkflowStep>> {
        let steps_value = match self.doc.get("steps") {
            Some(value) => value,
            None => return Ok(Vec::new()),
        };

        let mut steps = Vec::new();
        match steps_value {
            Value::Sequence(entries) => {
                for entry in entries {
                    let id = entry
                        .get("id")
                        .and_then(Value::as_str)
                        .with_context(|| {
                            format!("Step without an id in {}", self.file_path.display())
                        })?;
                    steps.push(WorkflowStep {
                        id: short_step_id(id),
                        run: step_run_string(entry, id, &self.file_path)?,
                    });
                }
            },
            Value::Mapping(entries) => {
                for (key, entry) in entries {
                    let id = key.as_str().with_context(|| {
                        format!("Non-string step key in {}", self.file_path.display())
                    })?;
                    steps.push(WorkflowStep {
                        id: short_step_id(id),
                        run: step_run_string(entry, id, &self.file_path)?,
                    });
                }
            },
            _ => anyhow::bail!(
                "Malformed steps section in {}",
                self.file_path.display()
            ),
        }

        Ok(steps)
    }

    /// Look up a requirement entry by class name
    ///
    /// Handles both the list form (`- class: X`) and the map form (`X: {}`).
    pub fn requirement(&self, class_name: &str) -> Option<&Value> {
        let requirements = self.doc.get("requirements")?;
        match requirements {
            Value::Sequence(entries) => entries.iter().find(|entry| {
                entry.get("class").and_then(Value::as_str) == Some(class_name)
            }),
            Value::Mapping(_) => requirements.get(class_name),
            _ => None,
        }
    }
}

/// Extract a step's `run` field, rejecting inline definitions
fn step_run_string(entry: &Value, id: &str, workflow_path: &Path) -> Result<String> {
    match entry.get("run") {
        Some(Value::String(run)) => Ok(run.clone()),
        Some(_) => anyhow::bail!(
            "Step '{}' in {} carries an inline run definition; steps must reference \
             a catalogue file by path",
            short_step_id(id),
            workflow_path.display()
        ),
        None => anyhow::bail!(
            "Step '{}' in {} has no run field",
            short_step_id(id),
            workflow_path.display()
        ),
    }
}

/// The fragment after `#`, or the whole id when there is none
pub fn short_step_id(id: &str) -> String {
    match id.rsplit_once('#') {
        Some((_, fragment)) => fragment.to_string(),
        None => id.to_string(),
    }
}

/// Derive (name, version) from the catalogue layout
/// `<items-dir>/<name>/<version>/<name>__<version>.cwl`
pub fn name_version_from_path(path: &Path) -> Result<(String, String)> {
    let version = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|s| s.to_str())
        .with_context(|| format!("No version directory for {}", path.display()))?;
    let name = path
        .parent()
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .and_then(|s| s.to_str())
        .with_context(|| format!("No name directory for {}", path.display()))?;

    Ok((name.to_string(), version.to_string()))
}

/// Lexically normalize a path: collapse `.` and `..`, no symlink resolution
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(Component::ParentDir);
                }
            },
            other => normalized.push(other),
        }
    }
    normalized
}

/// The closed set of shapes a schema field's declared type can take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CwlTypeShape {
    /// A plain named type (`string`, `int`, `fastq-list-row`, ...)
    Named(String),
    /// A `$import` of another schema file
    Import(String),
    /// An array declaration with an item shape
    Array(Box<CwlTypeShape>),
    /// An inline record declaration
    Record,
    /// An inline enum declaration
    Enum,
    /// A list of alternatives (nullable/union types)
    Union(Vec<CwlTypeShape>),
}

impl CwlTypeShape {
    /// Parse a declared type value into its shape
    ///
    /// An unrecognised shape is an error, not a silent skip.
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::String(name) => Ok(CwlTypeShape::Named(name.clone())),
            Value::Mapping(_) => {
                if let Some(import) = value.get("$import").and_then(Value::as_str) {
                    return Ok(CwlTypeShape::Import(import.to_string()));
                }
                match value.get("type").and_then(Value::as_str) {
                    Some("array") => {
                        let items = value
                            .get("items")
                            .context("Array type declaration without items")?;
                        Ok(CwlTypeShape::Array(Box::new(CwlTypeShape::parse(items)?)))
                    },
                    Some("record") => Ok(CwlTypeShape::Record),
                    Some("enum") => Ok(CwlTypeShape::Enum),
                    other => anyhow::bail!(
                        "Unrecognised type declaration shape: {:?}",
                        other
                    ),
                }
            },
            Value::Sequence(entries) => {
                let mut shapes = Vec::with_capacity(entries.len());
                for entry in entries {
                    shapes.push(CwlTypeShape::parse(entry)?);
                }
                Ok(CwlTypeShape::Union(shapes))
            },
            _ => anyhow::bail!("Unrecognised type declaration shape: {:?}", value),
        }
    }

    /// Collect every `$import` path referenced by this shape
    ///
    /// Covers the three shapes the closure expansion must follow: a plain
    /// import, an import nested in an array items declaration, and an import
    /// appearing as one element of a nullable/union list (leading `null`
    /// dropped, singleton lists unwrapped).
    pub fn imports(&self) -> Vec<String> {
        match self {
            CwlTypeShape::Named(_) | CwlTypeShape::Record | CwlTypeShape::Enum => Vec::new(),
            CwlTypeShape::Import(path) => vec![path.clone()],
            CwlTypeShape::Array(items) => items.imports(),
            CwlTypeShape::Union(shapes) => {
                let mut alternatives: &[CwlTypeShape] = shapes;
                if let Some(CwlTypeShape::Named(first)) = alternatives.first() {
                    if first == "null" {
                        alternatives = &alternatives[1..];
                    }
                }
                alternatives
                    .iter()
                    .flat_map(CwlTypeShape::imports)
                    .collect()
            },
        }
    }
}
