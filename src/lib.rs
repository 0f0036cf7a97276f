//! CWL ICA Workflows Library
//!
//! This library provides the core functionality for managing a CWL
//! catalogue and deploying/launching its workflows on ICA v2: dependency
//! resolution, bundle assembly, packed-document generation, and launch
//! input dereferencing against the remote data catalog.

pub mod bundle;
pub mod config;
pub mod cwl;
pub mod ica;

// Re-export main types for convenience
pub use bundle::{ArchivePackager, BundleAssembler};
pub use config::{IcaConfig, RepoConfig};
pub use cwl::{CwlDocument, DependencyClosure, DependencyWalker};
pub use ica::{IcaHttpClient, LaunchJson, UriDereferencer};
