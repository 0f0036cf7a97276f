// Workflow bundling: staging, reference rewriting and release artifacts
//
// The assembler produces the zip bundle, the packager derives the gzipped
// packed document from it, and the rewrite table carries the reference
// substitutions applied to the staged root document.

pub mod assembler;
pub mod packager;
pub mod rewrite;

pub use assembler::{BundleAssembler, PARAMS_XML_FILE_NAME, WORKFLOW_FILE_NAME};
pub use packager::ArchivePackager;
pub use rewrite::{RewriteEntry, RewriteTable};
