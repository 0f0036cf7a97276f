// Configuration module for the CWL ICA tool suite
//
// Components receive explicit configuration objects at construction rather
// than reading ambient process state, so they can be tested with injected
// fakes for the external toolchain and the remote catalog.

pub mod types;

pub use types::{ConfigPaths, EnvVars, IcaConfig, RepoConfig};
