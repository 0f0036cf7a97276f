// Transitive dependency collection for CWL workflows
//
// This module walks a root workflow and every reachable sub-workflow, tool
// and expression, accumulating a categorized, de-duplicated closure of
// dependency files, then expands schema-to-schema imports to a fixpoint.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::RepoConfig;

use super::resolver::{join_run_path, resolve_include_paths, resolve_schema_paths, resolve_step_paths};
use super::types::{CwlDocument, CwlTypeShape, DocumentKind};

/// Hard bound on reference-chain depth; past this the graph is corrupt
pub const MAX_RESOLVE_DEPTH: usize = 64;

/// Steps longer than this draw a platform warning during bundling
pub const MAX_STEP_ID_CHARACTERS: usize = 23;

/// The full dependency closure of one root workflow
///
/// Categories are explicit sets keyed by canonical absolute path; insertion
/// order is never relied upon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyClosure {
    pub schemas: BTreeSet<PathBuf>,
    pub tools: BTreeSet<PathBuf>,
    pub expressions: BTreeSet<PathBuf>,
    pub workflows: BTreeSet<PathBuf>,
    pub script_includes: BTreeSet<PathBuf>,
}

impl DependencyClosure {
    /// Every path in the closure, across all categories
    pub fn all_paths(&self) -> BTreeSet<PathBuf> {
        let mut paths = BTreeSet::new();
        paths.extend(self.schemas.iter().cloned());
        paths.extend(self.tools.iter().cloned());
        paths.extend(self.expressions.iter().cloned());
        paths.extend(self.workflows.iter().cloned());
        paths.extend(self.script_includes.iter().cloned());
        paths
    }

    /// Total number of files in the closure
    pub fn len(&self) -> usize {
        self.schemas.len()
            + self.tools.len()
            + self.expressions.len()
            + self.workflows.len()
            + self.script_includes.len()
    }

    /// True when no dependencies were collected
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Recursive dependency walker over the catalogue repository
pub struct DependencyWalker<'a> {
    config: &'a RepoConfig,
}

impl<'a> DependencyWalker<'a> {
    pub fn new(config: &'a RepoConfig) -> Self {
        Self { config }
    }

    /// Collect the full dependency closure of the given root workflow
    pub fn collect(&self, root: &CwlDocument) -> Result<DependencyClosure> {
        let mut closure = DependencyClosure::default();
        let mut visited = BTreeSet::new();
        visited.insert(root.file_path.clone());

        self.collect_into(root, &mut closure, &mut visited, 0)?;

        closure.schemas = self.expand_schema_imports(closure.schemas)?;

        debug!(
            "Collected {} dependency files for {}",
            closure.len(),
            root.file_path.display()
        );
        Ok(closure)
    }

    fn collect_into(
        &self,
        document: &CwlDocument,
        closure: &mut DependencyClosure,
        visited: &mut BTreeSet<PathBuf>,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_RESOLVE_DEPTH {
            anyhow::bail!(
                "Corrupt dependency graph: reference chain exceeds depth {} at {}",
                MAX_RESOLVE_DEPTH,
                document.file_path.display()
            );
        }

        closure.schemas.extend(resolve_schema_paths(document));
        closure
            .script_includes
            .extend(resolve_include_paths(document));

        for (step, step_run_path) in resolve_step_paths(document)? {
            if step.id.len() > MAX_STEP_ID_CHARACTERS {
                warn!(
                    "Step id '{}' is longer than {} characters",
                    step.id, MAX_STEP_ID_CHARACTERS
                );
            }

            if !step_run_path.is_file() {
                anyhow::bail!(
                    "Step '{}' of {} references {} which does not exist",
                    step.id,
                    document.file_path.display(),
                    step_run_path.display()
                );
            }

            let kind = self.classify(&step_run_path)?;
            match kind {
                DocumentKind::Workflow => {
                    closure.workflows.insert(step_run_path.clone());
                    // The visited set tracks the current reference chain, so
                    // a diamond is re-walked but a true cycle is fatal
                    if !visited.insert(step_run_path.clone()) {
                        anyhow::bail!(
                            "Corrupt dependency graph: {} is referenced cyclically",
                            step_run_path.display()
                        );
                    }
                    let sub_workflow = CwlDocument::load(&step_run_path, DocumentKind::Workflow)?;
                    self.collect_into(&sub_workflow, closure, visited, depth + 1)?;
                    visited.remove(&step_run_path);
                },
                DocumentKind::Tool | DocumentKind::Expression => {
                    match kind {
                        DocumentKind::Tool => closure.tools.insert(step_run_path.clone()),
                        _ => closure.expressions.insert(step_run_path.clone()),
                    };
                    let step_document = CwlDocument::load(&step_run_path, kind)?;
                    closure.schemas.extend(resolve_schema_paths(&step_document));
                    closure
                        .script_includes
                        .extend(resolve_include_paths(&step_document));
                },
                DocumentKind::Schema => anyhow::bail!(
                    "Step '{}' of {} runs a schema file: {}",
                    step.id,
                    document.file_path.display(),
                    step_run_path.display()
                ),
            }
        }

        Ok(())
    }

    /// Classify a dependency by the top-level catalogue directory it lives in
    fn classify(&self, path: &Path) -> Result<DocumentKind> {
        let relative = path.strip_prefix(&self.config.repo_path).with_context(|| {
            format!(
                "{} resolves outside the catalogue repository {}",
                path.display(),
                self.config.repo_path.display()
            )
        })?;

        let items_dir = relative
            .components()
            .next()
            .and_then(|component| component.as_os_str().to_str())
            .with_context(|| format!("Cannot classify {}", path.display()))?;

        DocumentKind::from_items_dir(items_dir).with_context(|| {
            format!(
                "{} is not under a recognised catalogue directory (workflows/tools/expressions)",
                path.display()
            )
        })
    }

    /// Expand schema-to-schema imports until a full pass adds no new paths
    ///
    /// Each pass loads every schema, inspects every field's declared type
    /// shape and follows any `$import` it carries. Idempotent: re-running
    /// the expansion on its own output returns the same set.
    pub fn expand_schema_imports(
        &self,
        schemas: BTreeSet<PathBuf>,
    ) -> Result<BTreeSet<PathBuf>> {
        let mut expanded = schemas;

        for _pass in 0..MAX_RESOLVE_DEPTH {
            let mut additional = BTreeSet::new();

            for schema_path in &expanded {
                for import in schema_field_imports(schema_path)? {
                    let import_path = join_run_path(schema_path, &import);
                    if !expanded.contains(&import_path) {
                        additional.insert(import_path);
                    }
                }
            }

            if additional.is_empty() {
                return Ok(expanded);
            }
            expanded.extend(additional);
        }

        anyhow::bail!(
            "Corrupt dependency graph: schema imports did not converge within {} passes",
            MAX_RESOLVE_DEPTH
        )
    }
}

/// Imports declared by the fields of one schema file
///
/// The schema must declare a top-level record type; anything else is
/// invalid input for the closure expansion.
fn schema_field_imports(schema_path: &Path) -> Result<Vec<String>> {
    let schema = CwlDocument::load(schema_path, DocumentKind::Schema)?;

    match schema.doc.get("type").and_then(serde_yaml::Value::as_str) {
        Some("record") => {},
        other => anyhow::bail!(
            "Schema {} declares top-level type {:?}, expected record",
            schema_path.display(),
            other
        ),
    }

    let fields = match schema.doc.get("fields").and_then(serde_yaml::Value::as_mapping) {
        Some(fields) => fields,
        None => return Ok(Vec::new()),
    };

    let mut imports = Vec::new();
    for (field_name, field) in fields {
        let declared_type = match field.get("type") {
            Some(declared_type) => declared_type,
            None => continue,
        };
        let shape = CwlTypeShape::parse(declared_type).with_context(|| {
            format!(
                "Unparseable type declaration for field {:?} of {}",
                field_name,
                schema_path.display()
            )
        })?;
        imports.extend(shape.imports());
    }

    Ok(imports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Write a catalogue file, creating parent directories
    fn write_item(repo: &Path, relative: &str, content: &str) -> PathBuf {
        let path = repo.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn load_workflow(path: &Path) -> CwlDocument {
        CwlDocument::load(path, DocumentKind::Workflow).unwrap()
    }

    #[test]
    fn test_single_tool_closure() {
        let repo = TempDir::new().unwrap();
        write_item(
            repo.path(),
            "tools/a/1.0.0/a__1.0.0.cwl",
            "class: CommandLineTool\nbaseCommand: echo\n",
        );
        let workflow_path = write_item(
            repo.path(),
            "workflows/w/1.0.0/w__1.0.0.cwl",
            r#"
class: Workflow
steps:
  - id: run_a
    run: ../../../tools/a/1.0.0/a__1.0.0.cwl
"#,
        );

        let config = RepoConfig::new(repo.path());
        let walker = DependencyWalker::new(&config);
        let closure = walker.collect(&load_workflow(&workflow_path)).unwrap();

        assert_eq!(closure.tools.len(), 1);
        assert!(closure
            .tools
            .contains(&repo.path().join("tools/a/1.0.0/a__1.0.0.cwl")));
        assert!(closure.workflows.is_empty());
        assert!(closure.schemas.is_empty());
        assert!(closure.expressions.is_empty());
        assert!(closure.script_includes.is_empty());
    }

    #[test]
    fn test_subworkflow_recursion_and_dedup() {
        let repo = TempDir::new().unwrap();
        write_item(
            repo.path(),
            "tools/a/1.0.0/a__1.0.0.cwl",
            "class: CommandLineTool\nbaseCommand: echo\n",
        );
        write_item(
            repo.path(),
            "workflows/inner/1.0.0/inner__1.0.0.cwl",
            r#"
class: Workflow
steps:
  - id: run_a
    run: ../../../tools/a/1.0.0/a__1.0.0.cwl
"#,
        );
        let outer_path = write_item(
            repo.path(),
            "workflows/outer/1.0.0/outer__1.0.0.cwl",
            r#"
class: Workflow
steps:
  - id: run_inner
    run: ../../inner/1.0.0/inner__1.0.0.cwl
  - id: run_a_again
    run: ../../../tools/a/1.0.0/a__1.0.0.cwl
"#,
        );

        let config = RepoConfig::new(repo.path());
        let walker = DependencyWalker::new(&config);
        let closure = walker.collect(&load_workflow(&outer_path)).unwrap();

        // Tool referenced by both levels appears once
        assert_eq!(closure.tools.len(), 1);
        assert_eq!(closure.workflows.len(), 1);
    }

    #[test]
    fn test_diamond_reference_is_not_a_cycle() {
        let repo = TempDir::new().unwrap();
        write_item(
            repo.path(),
            "tools/a/1.0.0/a__1.0.0.cwl",
            "class: CommandLineTool\nbaseCommand: echo\n",
        );
        write_item(
            repo.path(),
            "workflows/shared/1.0.0/shared__1.0.0.cwl",
            r#"
class: Workflow
steps:
  - id: run_a
    run: ../../../tools/a/1.0.0/a__1.0.0.cwl
"#,
        );
        write_item(
            repo.path(),
            "workflows/left/1.0.0/left__1.0.0.cwl",
            r#"
class: Workflow
steps:
  - id: run_shared
    run: ../../shared/1.0.0/shared__1.0.0.cwl
"#,
        );
        let top_path = write_item(
            repo.path(),
            "workflows/top/1.0.0/top__1.0.0.cwl",
            r#"
class: Workflow
steps:
  - id: run_left
    run: ../../left/1.0.0/left__1.0.0.cwl
  - id: run_shared_again
    run: ../../shared/1.0.0/shared__1.0.0.cwl
"#,
        );

        let config = RepoConfig::new(repo.path());
        let walker = DependencyWalker::new(&config);
        let closure = walker.collect(&load_workflow(&top_path)).unwrap();

        assert_eq!(closure.workflows.len(), 2);
        assert_eq!(closure.tools.len(), 1);
    }

    #[test]
    fn test_missing_run_target_is_fatal() {
        let repo = TempDir::new().unwrap();
        let workflow_path = write_item(
            repo.path(),
            "workflows/w/1.0.0/w__1.0.0.cwl",
            r#"
class: Workflow
steps:
  - id: run_missing
    run: ../../../tools/missing/1.0.0/missing__1.0.0.cwl
"#,
        );

        let config = RepoConfig::new(repo.path());
        let walker = DependencyWalker::new(&config);
        let err = walker.collect(&load_workflow(&workflow_path)).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_cyclic_workflow_reference_is_fatal() {
        let repo = TempDir::new().unwrap();
        write_item(
            repo.path(),
            "workflows/a/1.0.0/a__1.0.0.cwl",
            r#"
class: Workflow
steps:
  - id: run_b
    run: ../../b/1.0.0/b__1.0.0.cwl
"#,
        );
        let b_path = write_item(
            repo.path(),
            "workflows/b/1.0.0/b__1.0.0.cwl",
            r#"
class: Workflow
steps:
  - id: run_a
    run: ../../a/1.0.0/a__1.0.0.cwl
"#,
        );

        let config = RepoConfig::new(repo.path());
        let walker = DependencyWalker::new(&config);
        let err = walker.collect(&load_workflow(&b_path)).unwrap_err();
        assert!(err.to_string().contains("Corrupt dependency graph"));
    }

    #[test]
    fn test_schema_import_chain_fixpoint() {
        let repo = TempDir::new().unwrap();
        let s1 = write_item(
            repo.path(),
            "schemas/s1/1.0.0/s1__1.0.0.yaml",
            r#"
name: s1
type: record
fields:
  nested:
    type:
      $import: ../../s2/1.0.0/s2__1.0.0.yaml
"#,
        );
        let s2 = write_item(
            repo.path(),
            "schemas/s2/1.0.0/s2__1.0.0.yaml",
            r#"
name: s2
type: record
fields:
  deeper:
    type:
      type: array
      items:
        $import: ../../s3/1.0.0/s3__1.0.0.yaml
"#,
        );
        let s3 = write_item(
            repo.path(),
            "schemas/s3/1.0.0/s3__1.0.0.yaml",
            r#"
name: s3
type: record
fields:
  value:
    type: string
"#,
        );

        let config = RepoConfig::new(repo.path());
        let walker = DependencyWalker::new(&config);

        let seed: BTreeSet<PathBuf> = [s1.clone()].into_iter().collect();
        let expanded = walker.expand_schema_imports(seed).unwrap();

        let expected: BTreeSet<PathBuf> = [s1, s2, s3].into_iter().collect();
        assert_eq!(expanded, expected);

        // Idempotence: expanding the fixpoint again changes nothing
        let again = walker.expand_schema_imports(expanded.clone()).unwrap();
        assert_eq!(again, expanded);
    }

    #[test]
    fn test_non_record_schema_is_invalid() {
        let repo = TempDir::new().unwrap();
        let schema = write_item(
            repo.path(),
            "schemas/bad/1.0.0/bad__1.0.0.yaml",
            "name: bad\ntype: enum\nsymbols: [a, b]\n",
        );

        let config = RepoConfig::new(repo.path());
        let walker = DependencyWalker::new(&config);
        let seed: BTreeSet<PathBuf> = [schema].into_iter().collect();
        let err = walker.expand_schema_imports(seed).unwrap_err();
        assert!(err.to_string().contains("expected record"));
    }
}
