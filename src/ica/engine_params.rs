// Engine parameter resolution for analysis launches
//
// Fills any execution parameter left unset by the launch json or the CLI:
// the output folder id is looked up (and created on a miss) from its path,
// the storage id is derived from the storage size, and the activation id
// comes from the platform's best-match lookup. The three lookups are
// independent; any failure aborts the launch.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::client::IcaApi;
use super::error::ApiError;
use super::types::{
    AnalysisInputDataMount, AnalysisStorageSize, AnalysisTags, DEFAULT_ANALYSIS_STORAGE_SIZE,
};

/// Execution parameters of one analysis launch
///
/// Parses from the `engine_parameters` section of a launch json; camelCase
/// aliases let both key styles through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineParameters {
    #[serde(default, alias = "outputParentFolderId")]
    pub output_parent_folder_id: Option<String>,
    #[serde(default, alias = "outputParentFolderPath")]
    pub output_parent_folder_path: Option<String>,
    #[serde(default)]
    pub tags: AnalysisTags,
    #[serde(default, alias = "analysisStorageId")]
    pub analysis_storage_id: Option<String>,
    #[serde(default, alias = "analysisStorageSize")]
    pub analysis_storage_size: Option<AnalysisStorageSize>,
    #[serde(default, alias = "activationId")]
    pub activation_id: Option<String>,
    #[serde(default, alias = "cwltoolOverrides")]
    pub cwltool_overrides: serde_json::Map<String, Value>,
}

impl EngineParameters {
    /// Fill every unset parameter from the remote platform
    ///
    /// Explicit values always win; only `None` fields are resolved.
    pub fn populate_empty(
        &mut self,
        api: &dyn IcaApi,
        project_id: &str,
        pipeline_id: &str,
        input_json: &Value,
        mounts: &[AnalysisInputDataMount],
    ) -> Result<()> {
        if self.analysis_storage_id.is_none() {
            let size = self
                .analysis_storage_size
                .unwrap_or(DEFAULT_ANALYSIS_STORAGE_SIZE);
            let storage_id = api
                .analysis_storage_id_from_size(size)
                .with_context(|| format!("Failed to resolve analysis storage size {}", size))?;
            debug!("Resolved analysis storage size {} to {}", size, storage_id);
            self.analysis_storage_id = Some(storage_id);
        }

        if self.activation_id.is_none() {
            let activation_id = api
                .best_matching_activation_id(project_id, pipeline_id, input_json, mounts)
                .context("Failed to resolve an activation code for this analysis")?;
            debug!("Resolved activation id {}", activation_id);
            self.activation_id = Some(activation_id);
        }

        if self.output_parent_folder_id.is_none() {
            if let Some(folder_path) = self.output_parent_folder_path.clone() {
                self.output_parent_folder_id =
                    Some(self.resolve_output_folder(api, project_id, &folder_path)?);
            }
        }

        Ok(())
    }

    /// Look up the output folder by path, creating it on a miss
    fn resolve_output_folder(
        &self,
        api: &dyn IcaApi,
        project_id: &str,
        folder_path: &str,
    ) -> Result<String> {
        if !folder_path.starts_with('/') {
            anyhow::bail!(
                "Engine parameter output_parent_folder_path must be an absolute path, \
                 got '{}'",
                folder_path
            );
        }

        // Folder lookups always carry a trailing slash
        let folder_path = if folder_path.ends_with('/') {
            folder_path.to_string()
        } else {
            format!("{}/", folder_path)
        };

        match api.data_by_path(project_id, &folder_path) {
            Ok(folder) => Ok(folder.data.id),
            Err(ApiError::NotFound(_)) => {
                info!("Output folder {} not found, creating it", folder_path);
                Ok(api
                    .create_data(project_id, &folder_path)
                    .with_context(|| format!("Failed to create output folder {}", folder_path))?)
            },
            Err(other) => Err(other).with_context(|| {
                format!("Failed to resolve output folder {}", folder_path)
            }),
        }
    }
}
