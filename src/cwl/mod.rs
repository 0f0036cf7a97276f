// CWL document model and dependency resolution
//
// This module owns the document handle, one-level reference extraction, and
// the recursive dependency walker, plus the external toolchain client used
// as the packaging acceptance gate.

pub mod cwltool;
pub mod resolver;
pub mod types;
pub mod walker;

pub use cwltool::{CwlToolchain, CwltoolClient};
pub use resolver::{join_run_path, resolve_references, ResolvedReferences};
pub use types::{CwlDocument, CwlTypeShape, DocumentKind, WorkflowStep};
pub use walker::{DependencyClosure, DependencyWalker, MAX_RESOLVE_DEPTH};
