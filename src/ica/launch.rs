// Launch specification for CWL analyses
//
// Aggregates the user reference, the raw and dereferenced input documents,
// the mount list and the engine parameters, and finalizes them into the
// outbound create-analysis request. Overrides are applied before
// dereferencing so injected tokens survive the rewrite.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

use super::client::IcaApi;
use super::dereference::UriDereferencer;
use super::engine_params::EngineParameters;
use super::types::{AnalysisInputDataMount, CreateCwlAnalysis, CwlAnalysisInput};

/// Input-json key carrying per-tool overrides
const CWLTOOL_OVERRIDES_KEY: &str = "cwltool:overrides";

/// On-disk shape of a launch json, both key styles accepted
#[derive(Debug, Deserialize)]
struct RawLaunchJson {
    #[serde(default, alias = "userReference", alias = "name")]
    user_reference: Option<String>,
    #[serde(default, alias = "inputs")]
    input: Option<Value>,
    #[serde(default, alias = "engineParameters")]
    engine_parameters: EngineParameters,
}

/// One analysis launch, from raw input json to the outbound request body
#[derive(Debug, Clone)]
pub struct LaunchJson {
    /// User reference naming the analysis run
    pub user_reference: String,
    /// The raw CWL input document as supplied by the user
    pub input_json: Value,
    /// Engine parameters, completed by the resolver before launch
    pub engine_parameters: EngineParameters,
    /// Input document with remote URIs rewritten to mount paths
    pub dereferenced_input: Option<Value>,
    /// Mount descriptors accumulated during dereferencing
    pub mounts: Vec<AnalysisInputDataMount>,
    /// Data ids referenced by the mounts, in mount order
    pub data_ids: Vec<String>,
}

impl LaunchJson {
    /// Read and parse a launch json file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read launch json {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse launch json {}", path.display()))?;
        Self::from_value(value)
    }

    /// Build a launch specification from a parsed json value
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawLaunchJson =
            serde_json::from_value(value).context("Malformed launch json")?;

        let user_reference = raw
            .user_reference
            .context("Launch json needs a user_reference (or name) key")?;

        Ok(Self {
            user_reference,
            input_json: raw.input.unwrap_or_else(|| Value::Object(Map::new())),
            engine_parameters: raw.engine_parameters,
            dereferenced_input: None,
            mounts: Vec::new(),
            data_ids: Vec::new(),
        })
    }

    /// Merge engine-parameter overrides into the input json
    ///
    /// Per-key overrides already present in the input json win over the
    /// engine-parameter ones. Mirrored into the dereferenced document when
    /// one already exists.
    pub fn collect_overrides_from_engine_parameters(&mut self) {
        let mut merged = self.engine_parameters.cwltool_overrides.clone();

        let input_overrides = self
            .input_json
            .get(CWLTOOL_OVERRIDES_KEY)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        for (key, value) in input_overrides {
            let merge_per_key =
                matches!(merged.get(&key), Some(Value::Object(_))) && value.is_object();
            if merge_per_key {
                if let (Some(Value::Object(existing)), Value::Object(incoming)) =
                    (merged.get_mut(&key), value)
                {
                    for (inner_key, inner_value) in incoming {
                        existing.insert(inner_key, inner_value);
                    }
                }
            } else {
                merged.insert(key, value);
            }
        }

        if merged.is_empty() {
            return;
        }

        let merged = Value::Object(merged);
        if let Value::Object(input) = &mut self.input_json {
            input.insert(CWLTOOL_OVERRIDES_KEY.to_string(), merged.clone());
        }
        if let Some(Value::Object(dereferenced)) = &mut self.dereferenced_input {
            dereferenced.insert(CWLTOOL_OVERRIDES_KEY.to_string(), merged);
        }
    }

    /// Dereference remote URIs in the input json
    pub fn dereference_input_json(&mut self, api: &dyn IcaApi) -> Result<()> {
        let dereferencer = UriDereferencer::new(api);
        let (dereferenced, mounts) = dereferencer.dereference(&self.input_json)?;

        self.data_ids = mounts.iter().map(|mount| mount.data_id.clone()).collect();
        self.mounts = mounts;
        self.dereferenced_input = Some(dereferenced);

        debug!(
            "Dereferenced launch input: {} mounts, {} data ids",
            self.mounts.len(),
            self.data_ids.len()
        );
        Ok(())
    }

    /// Complete unset engine parameters from the remote platform
    ///
    /// Must run after dereferencing: the activation best-match lookup is
    /// keyed by the dereferenced input and the mount list.
    pub fn populate_empty_engine_parameters(
        &mut self,
        api: &dyn IcaApi,
        project_id: &str,
        pipeline_id: &str,
    ) -> Result<()> {
        let dereferenced = self
            .dereferenced_input
            .clone()
            .context("Launch input must be dereferenced before resolving engine parameters")?;

        self.engine_parameters.populate_empty(
            api,
            project_id,
            pipeline_id,
            &dereferenced,
            &self.mounts,
        )
    }

    /// Finalize the outbound create-analysis request body
    pub fn create_cwl_analysis(&self, pipeline_id: &str) -> Result<CreateCwlAnalysis> {
        let dereferenced = self
            .dereferenced_input
            .as_ref()
            .context("Launch input must be dereferenced before building the request")?;

        Ok(CreateCwlAnalysis {
            user_reference: self.user_reference.clone(),
            pipeline_id: pipeline_id.to_string(),
            tags: self.engine_parameters.tags.clone(),
            activation_code_detail_id: self.engine_parameters.activation_id.clone(),
            analysis_input: CwlAnalysisInput {
                object_type: "JSON".to_string(),
                input_json: serde_json::to_string(dereferenced)?,
                data_ids: self.data_ids.clone(),
                mounts: self.mounts.clone(),
            },
            analysis_storage_id: self.engine_parameters.analysis_storage_id.clone(),
            output_parent_folder_id: self.engine_parameters.output_parent_folder_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_snake_case_keys() {
        let launch = LaunchJson::from_value(serde_json::json!({
            "user_reference": "demo-run",
            "input": { "threads": 4 },
            "engine_parameters": { "analysis_storage_size": "Small" }
        }))
        .unwrap();

        assert_eq!(launch.user_reference, "demo-run");
        assert_eq!(launch.input_json["threads"], 4);
    }

    #[test]
    fn test_parse_with_name_and_inputs_fallbacks() {
        let launch = LaunchJson::from_value(serde_json::json!({
            "name": "demo-run",
            "inputs": { "threads": 4 }
        }))
        .unwrap();

        assert_eq!(launch.user_reference, "demo-run");
        assert_eq!(launch.input_json["threads"], 4);
    }

    #[test]
    fn test_missing_user_reference_is_rejected() {
        let err = LaunchJson::from_value(serde_json::json!({
            "input": {}
        }))
        .unwrap_err();
        assert!(err.to_string().contains("user_reference"));
    }

    #[test]
    fn test_overrides_merge_prefers_input_json() {
        let mut launch = LaunchJson::from_value(serde_json::json!({
            "user_reference": "demo-run",
            "input": {
                "cwltool:overrides": {
                    "tool-a.cwl": { "coresMin": 2 }
                }
            },
            "engine_parameters": {
                "cwltool_overrides": {
                    "tool-a.cwl": { "coresMin": 8, "ramMin": 4000 },
                    "tool-b.cwl": { "ramMin": 16000 }
                }
            }
        }))
        .unwrap();

        launch.collect_overrides_from_engine_parameters();

        let overrides = &launch.input_json["cwltool:overrides"];
        // Input json wins per key, engine parameters fill the rest
        assert_eq!(overrides["tool-a.cwl"]["coresMin"], 2);
        assert_eq!(overrides["tool-a.cwl"]["ramMin"], 4000);
        assert_eq!(overrides["tool-b.cwl"]["ramMin"], 16000);
    }

    #[test]
    fn test_overrides_noop_when_empty() {
        let mut launch = LaunchJson::from_value(serde_json::json!({
            "user_reference": "demo-run",
            "input": { "threads": 4 }
        }))
        .unwrap();

        launch.collect_overrides_from_engine_parameters();
        assert!(launch.input_json.get(CWLTOOL_OVERRIDES_KEY).is_none());
    }

    #[test]
    fn test_create_cwl_analysis_requires_dereference() {
        let launch = LaunchJson::from_value(serde_json::json!({
            "user_reference": "demo-run",
            "input": {}
        }))
        .unwrap();

        assert!(launch.create_cwl_analysis("pipe456").is_err());
    }

    #[test]
    fn test_create_cwl_analysis_body() {
        let mut launch = LaunchJson::from_value(serde_json::json!({
            "user_reference": "demo-run",
            "input": { "threads": 4 },
            "engine_parameters": {
                "activation_id": "act.1",
                "analysis_storage_id": "sto.1",
                "output_parent_folder_id": "fol.1"
            }
        }))
        .unwrap();

        launch.dereferenced_input = Some(launch.input_json.clone());
        launch.mounts = vec![AnalysisInputDataMount {
            data_id: "fil.abc".to_string(),
            mount_path: "proj123/fil.abc/sample.fastq".to_string(),
        }];
        launch.data_ids = vec!["fil.abc".to_string()];

        let request = launch.create_cwl_analysis("pipe456").unwrap();
        assert_eq!(request.user_reference, "demo-run");
        assert_eq!(request.pipeline_id, "pipe456");
        assert_eq!(request.activation_code_detail_id.as_deref(), Some("act.1"));
        assert_eq!(request.analysis_input.object_type, "JSON");
        assert_eq!(request.analysis_input.data_ids, vec!["fil.abc"]);

        let embedded: Value =
            serde_json::from_str(&request.analysis_input.input_json).unwrap();
        assert_eq!(embedded["threads"], 4);
    }
}
