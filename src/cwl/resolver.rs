// Outbound reference extraction for CWL documents
//
// Given one document handle, this module extracts every filesystem path the
// document references, in three disjoint groups: workflow step run targets,
// schema-definition imports, and inline-javascript script includes. Each
// call resolves one level only; recursion is the walker's job.

use anyhow::Result;
use serde_yaml::Value;
use std::path::{Path, PathBuf};

use super::types::{normalize_path, CwlDocument, WorkflowStep};

/// Requirement class carrying schema type definitions
const SCHEMA_DEF_REQUIREMENT: &str = "SchemaDefRequirement";

/// Requirement class carrying the expression library
const INLINE_JAVASCRIPT_REQUIREMENT: &str = "InlineJavascriptRequirement";

/// Every outbound reference of one document, resolved to absolute paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedReferences {
    /// One entry per workflow step: the step plus its resolved run target
    pub steps: Vec<(WorkflowStep, PathBuf)>,
    /// Schema files imported through the schema-definition requirement
    pub schemas: Vec<PathBuf>,
    /// Script files injected through the expression library
    pub script_includes: Vec<PathBuf>,
}

/// Resolve every outbound reference of the given document
pub fn resolve_references(document: &CwlDocument) -> Result<ResolvedReferences> {
    Ok(ResolvedReferences {
        steps: resolve_step_paths(document)?,
        schemas: resolve_schema_paths(document),
        script_includes: resolve_include_paths(document),
    })
}

/// Resolve each step's run target against the containing document
pub fn resolve_step_paths(document: &CwlDocument) -> Result<Vec<(WorkflowStep, PathBuf)>> {
    let mut resolved = Vec::new();
    for step in document.steps()? {
        let path = join_run_path(&document.file_path, &step.run);
        resolved.push((step, path));
    }
    Ok(resolved)
}

/// Schema files referenced by the schema-definition requirement
///
/// Each declared type entry names its schema through either a `name` field
/// (with an optional `#fragment`) or a `$import` field; the path component
/// is resolved against the containing document. An absent requirement
/// yields an empty list.
pub fn resolve_schema_paths(document: &CwlDocument) -> Vec<PathBuf> {
    let requirement = match document.requirement(SCHEMA_DEF_REQUIREMENT) {
        Some(requirement) => requirement,
        None => return Vec::new(),
    };

    let types = match requirement.get("types").and_then(Value::as_sequence) {
        Some(types) => types,
        None => return Vec::new(),
    };

    let mut schemas = Vec::new();
    for entry in types {
        let reference = entry
            .get("$import")
            .and_then(Value::as_str)
            .or_else(|| entry.get("name").and_then(Value::as_str));

        if let Some(reference) = reference {
            let path_part = strip_fragment(reference);
            if !path_part.is_empty() {
                schemas.push(join_run_path(&document.file_path, path_part));
            }
        }
    }

    schemas
}

/// Script files referenced by `$include` entries of the expression library
///
/// Entries that are not mappings are skipped; an absent requirement or a
/// non-list expression library yields an empty list.
pub fn resolve_include_paths(document: &CwlDocument) -> Vec<PathBuf> {
    let requirement = match document.requirement(INLINE_JAVASCRIPT_REQUIREMENT) {
        Some(requirement) => requirement,
        None => return Vec::new(),
    };

    let expression_lib = match requirement.get("expressionLib").and_then(Value::as_sequence) {
        Some(entries) => entries,
        None => return Vec::new(),
    };

    let mut includes = Vec::new();
    for entry in expression_lib {
        if let Value::Mapping(mapping) = entry {
            for (key, value) in mapping {
                if key.as_str() == Some("$include") {
                    if let Some(include) = value.as_str() {
                        includes.push(join_run_path(&document.file_path, include));
                    }
                }
            }
        }
    }

    includes
}

/// Join a reference string onto its caller's directory
///
/// Strips any `#fragment`, then resolves relative references against the
/// caller's parent directory and normalizes the result lexically.
pub fn join_run_path(caller_path: &Path, reference: &str) -> PathBuf {
    let path_part = Path::new(strip_fragment(reference));

    if path_part.is_absolute() {
        return normalize_path(path_part);
    }

    let base = caller_path.parent().unwrap_or_else(|| Path::new("/"));
    normalize_path(&base.join(path_part))
}

/// The part of a reference before any `#` fragment marker
fn strip_fragment(reference: &str) -> &str {
    match reference.split_once('#') {
        Some((path_part, _)) => path_part,
        None => reference,
    }
}
