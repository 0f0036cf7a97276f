// Configuration types for the CWL ICA tool suite
//
// This module defines the configuration objects handed to each component at
// construction time: the catalogue repository settings used by the packaging
// engine and the ICA v2 API settings used by the launch engine.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default base URL for the ICA v2 REST API
pub const ICAV2_DEFAULT_BASE_URL: &str = "https://ica.illumina.com/ica/rest";

/// Default timeout applied to external subprocess and HTTP calls
pub const DEFAULT_EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for the catalogue repository and the external CWL toolchain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoConfig {
    /// Root of the CWL catalogue repository (contains workflows/, tools/, ...)
    pub repo_path: PathBuf,
    /// Path to the external cwltool binary
    pub cwltool_path: String,
    /// Timeout for validator/packer subprocess calls
    pub subprocess_timeout: Duration,
}

impl RepoConfig {
    /// Create a config rooted at the given repository path
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Self {
        Self {
            repo_path: repo_path.as_ref().to_path_buf(),
            cwltool_path: "cwltool".to_string(),
            subprocess_timeout: DEFAULT_EXTERNAL_CALL_TIMEOUT,
        }
    }

    /// Resolve the repository root from the environment
    pub fn from_env() -> Result<Self> {
        let repo_path = std::env::var(EnvVars::REPO_PATH)
            .map(PathBuf::from)
            .with_context(|| format!("{} is not set", EnvVars::REPO_PATH))?;

        if !repo_path.is_dir() {
            anyhow::bail!(
                "Catalogue repository {} does not exist or is not a directory",
                repo_path.display()
            );
        }
        let repo_path = repo_path
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", repo_path.display()))?;

        Ok(Self::new(repo_path))
    }
}

/// Settings for the ICA v2 REST API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcaConfig {
    /// Base URL for the ICA v2 REST API
    pub base_url: String,
    /// Bearer token for API calls
    pub access_token: String,
    /// Timeout for HTTP requests
    pub request_timeout: Duration,
}

impl IcaConfig {
    /// Create a config with the default base URL
    pub fn new(access_token: String) -> Self {
        Self {
            base_url: ICAV2_DEFAULT_BASE_URL.to_string(),
            access_token,
            request_timeout: DEFAULT_EXTERNAL_CALL_TIMEOUT,
        }
    }

    /// Resolve API settings from the environment, falling back to the
    /// session file for the access token
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(EnvVars::BASE_URL)
            .unwrap_or_else(|_| ICAV2_DEFAULT_BASE_URL.to_string());

        let access_token = match std::env::var(EnvVars::ACCESS_TOKEN) {
            Ok(token) if !token.is_empty() => token,
            _ => read_session_access_token().with_context(|| {
                format!(
                    "{} is not set and no session file token was found; \
                     log in with the icav2 CLI or export the token",
                    EnvVars::ACCESS_TOKEN
                )
            })?,
        };

        Ok(Self {
            base_url,
            access_token,
            request_timeout: DEFAULT_EXTERNAL_CALL_TIMEOUT,
        })
    }
}

/// Subset of the icav2 session file we care about
#[derive(Debug, Deserialize)]
struct SessionFile {
    #[serde(rename = "access-token")]
    access_token: Option<String>,
}

/// Read the access token from `~/.icav2/.session.ica.yaml`
fn read_session_access_token() -> Result<String> {
    let session_path = ConfigPaths::session_file()?;
    let content = std::fs::read_to_string(&session_path)
        .with_context(|| format!("Failed to read session file {}", session_path.display()))?;

    let session: SessionFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse session file {}", session_path.display()))?;

    session
        .access_token
        .filter(|token| !token.is_empty())
        .with_context(|| format!("No access-token entry in {}", session_path.display()))
}

/// Environment variable names used by the tool suite
pub struct EnvVars;

impl EnvVars {
    pub const ACCESS_TOKEN: &'static str = "ICAV2_ACCESS_TOKEN";
    pub const BASE_URL: &'static str = "ICAV2_BASE_URL";
    pub const REPO_PATH: &'static str = "CWL_ICA_REPO_PATH";
}

/// Well-known configuration file locations
pub struct ConfigPaths;

impl ConfigPaths {
    /// icav2 CLI session directory name
    pub const SESSION_DIR_NAME: &'static str = ".icav2";

    /// icav2 CLI session file name
    pub const SESSION_FILE_NAME: &'static str = ".session.ica.yaml";

    /// Get the icav2 session file path
    pub fn session_file() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| {
                home.join(Self::SESSION_DIR_NAME)
                    .join(Self::SESSION_FILE_NAME)
            })
            .context("Failed to determine home directory")
    }
}
