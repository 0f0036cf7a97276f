// Remote URI dereferencing for launch input documents
//
// Walks an arbitrary JSON value, rewriting every File/Directory node whose
// location carries an icav2:// URI into a mount path (or a presigned URL),
// and accumulates the matching mount descriptors. Pure structural
// recursion: every call returns a rebuilt value plus its mount list.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::warn;
use url::Url;

use crate::cwl::MAX_RESOLVE_DEPTH;

use super::client::IcaApi;
use super::error::ApiError;
use super::types::{is_uuid_format, AnalysisInputDataMount, DataType};

/// URI scheme marking a remote data reference
pub const REMOTE_URI_SCHEME: &str = "icav2";

/// Declared class of a CWL input node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclaredClass {
    File,
    Directory,
}

/// Rewrites remote URIs in launch input documents into mount descriptors
pub struct UriDereferencer<'a> {
    api: &'a dyn IcaApi,
}

impl<'a> UriDereferencer<'a> {
    pub fn new(api: &'a dyn IcaApi) -> Self {
        Self { api }
    }

    /// Dereference every remote URI in the input value
    ///
    /// Returns the rewritten value and the accumulated mount list; the
    /// rewritten value is structurally isomorphic to the input except at
    /// rewritten location fields (and presigned directory listings).
    pub fn dereference(&self, input: &Value) -> Result<(Value, Vec<AnalysisInputDataMount>)> {
        self.walk(input, 0)
    }

    fn walk(&self, value: &Value, depth: usize) -> Result<(Value, Vec<AnalysisInputDataMount>)> {
        if depth > MAX_RESOLVE_DEPTH {
            anyhow::bail!(
                "Input document nesting exceeds depth {}",
                MAX_RESOLVE_DEPTH
            );
        }

        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
                Ok((value.clone(), Vec::new()))
            },
            Value::Array(entries) => {
                let mut rebuilt = Vec::with_capacity(entries.len());
                let mut mounts = Vec::new();
                for entry in entries {
                    let (new_entry, entry_mounts) = self.walk(entry, depth + 1)?;
                    rebuilt.push(new_entry);
                    mounts.extend(entry_mounts);
                }
                Ok((Value::Array(rebuilt), mounts))
            },
            Value::Object(object) => {
                if let Some((declared, location)) = remote_data_node(object) {
                    return self.resolve_remote_node(object, declared, &location, depth);
                }

                let mut rebuilt = Map::with_capacity(object.len());
                let mut mounts = Vec::new();
                for (key, entry) in object {
                    let (new_entry, entry_mounts) = self.walk(entry, depth + 1)?;
                    rebuilt.insert(key.clone(), new_entry);
                    mounts.extend(entry_mounts);
                }
                Ok((Value::Object(rebuilt), mounts))
            },
        }
    }

    /// Resolve one File/Directory node with a remote location
    fn resolve_remote_node(
        &self,
        object: &Map<String, Value>,
        declared: DeclaredClass,
        location: &str,
        depth: usize,
    ) -> Result<(Value, Vec<AnalysisInputDataMount>)> {
        let uri = Url::parse(location)
            .with_context(|| format!("Malformed remote URI '{}'", location))?;
        let project_reference = uri
            .host_str()
            .with_context(|| format!("Remote URI '{}' has no project component", location))?;
        let data_path = uri.path();

        let project_id = if is_uuid_format(project_reference) {
            project_reference.to_string()
        } else {
            self.api.project_id_from_name(project_reference)?
        };

        let resolved = self.api.data_by_path(&project_id, data_path)?;
        let data_id = resolved.data.id;
        let details = resolved.data.details;

        // A folder where a File was declared is fatal; a file where a
        // Directory was declared is logged and the walk continues
        match (details.data_type, declared) {
            (DataType::Folder, DeclaredClass::File) => {
                return Err(ApiError::DataInconsistency(format!(
                    "class of {} is File but resolved folder id {}",
                    location, data_id
                ))
                .into());
            },
            (DataType::File, DeclaredClass::Directory) => {
                warn!(
                    "Class of {} is Directory but resolved file id {}",
                    location, data_id
                );
            },
            _ => {},
        }

        let is_presign = uri
            .query_pairs()
            .any(|(key, value)| key == "presign" && value == "true");

        // Folders mount at the archive top level only
        let mount_path = match details.data_type {
            DataType::Folder => format!("{}/", details.name),
            DataType::File => format!("{}/{}/{}", details.owning_project_id, data_id, details.name),
        };

        let mut rebuilt = object.clone();
        let mut mounts = Vec::new();

        match (details.data_type, is_presign) {
            (DataType::File, true) => {
                let download_url = self
                    .api
                    .create_download_url(&details.owning_project_id, &data_id)?;
                rebuilt.insert("location".to_string(), Value::String(download_url));
            },
            (DataType::Folder, true) => {
                rebuilt.insert("location".to_string(), Value::String(mount_path));
                let listing =
                    self.presign_listing(&details.owning_project_id, &data_id, depth + 1)?;
                rebuilt.insert("listing".to_string(), listing);
            },
            _ => {
                rebuilt.insert(
                    "location".to_string(),
                    Value::String(mount_path.clone()),
                );
                mounts.push(AnalysisInputDataMount {
                    data_id,
                    mount_path,
                });
            },
        }

        Ok((Value::Object(rebuilt), mounts))
    }

    /// Build a recursively presigned listing of a folder's children
    fn presign_listing(&self, project_id: &str, data_id: &str, depth: usize) -> Result<Value> {
        if depth > MAX_RESOLVE_DEPTH {
            anyhow::bail!(
                "Remote folder nesting exceeds depth {}",
                MAX_RESOLVE_DEPTH
            );
        }

        let mut listing = Vec::new();
        for child in self.api.folder_children(project_id, data_id)? {
            match child.details.data_type {
                DataType::Folder => {
                    listing.push(serde_json::json!({
                        "class": "Directory",
                        "basename": child.details.name,
                        "listing": self.presign_listing(project_id, &child.id, depth + 1)?,
                    }));
                },
                DataType::File => {
                    listing.push(serde_json::json!({
                        "class": "File",
                        "basename": child.details.name,
                        "location": self.api.create_download_url(project_id, &child.id)?,
                    }));
                },
            }
        }

        Ok(Value::Array(listing))
    }
}

/// Identify a File/Directory node whose location is a remote URI
fn remote_data_node(object: &Map<String, Value>) -> Option<(DeclaredClass, String)> {
    let declared = match object.get("class").and_then(Value::as_str) {
        Some("File") => DeclaredClass::File,
        Some("Directory") => DeclaredClass::Directory,
        _ => return None,
    };

    let location = object.get("location").and_then(Value::as_str)?;
    if !location.starts_with(&format!("{}://", REMOTE_URI_SCHEME)) {
        return None;
    }

    Some((declared, location.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ica::error::ApiResult;
    use crate::ica::types::{
        Analysis, AnalysisStorageSize, CreateCwlAnalysis, Data, DataDetails, ProjectData,
    };
    use std::collections::HashMap;

    /// In-memory catalog fake keyed by (project id, data path)
    struct FakeCatalog {
        project_ids: HashMap<String, String>,
        data: HashMap<(String, String), ProjectData>,
        children: HashMap<String, Vec<Data>>,
    }

    impl FakeCatalog {
        fn new() -> Self {
            Self {
                project_ids: HashMap::new(),
                data: HashMap::new(),
                children: HashMap::new(),
            }
        }

        fn with_file(mut self, project_id: &str, path: &str, data_id: &str, name: &str) -> Self {
            self.project_ids
                .insert(project_id.to_string(), project_id.to_string());
            self.data.insert(
                (project_id.to_string(), path.to_string()),
                ProjectData {
                    data: Data {
                        id: data_id.to_string(),
                        details: DataDetails {
                            name: name.to_string(),
                            data_type: DataType::File,
                            owning_project_id: project_id.to_string(),
                            path: Some(path.to_string()),
                        },
                    },
                },
            );
            self
        }

        fn with_folder(mut self, project_id: &str, path: &str, data_id: &str, name: &str) -> Self {
            self.project_ids
                .insert(project_id.to_string(), project_id.to_string());
            self.data.insert(
                (project_id.to_string(), path.to_string()),
                ProjectData {
                    data: Data {
                        id: data_id.to_string(),
                        details: DataDetails {
                            name: name.to_string(),
                            data_type: DataType::Folder,
                            owning_project_id: project_id.to_string(),
                            path: Some(path.to_string()),
                        },
                    },
                },
            );
            self
        }
    }

    impl IcaApi for FakeCatalog {
        fn project_id_from_name(&self, project_name: &str) -> ApiResult<String> {
            self.project_ids
                .get(project_name)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(format!("project '{}'", project_name)))
        }

        fn pipeline_id_from_code(&self, pipeline_code: &str) -> ApiResult<String> {
            Err(ApiError::NotFound(format!("pipeline '{}'", pipeline_code)))
        }

        fn data_by_path(&self, project_id: &str, data_path: &str) -> ApiResult<ProjectData> {
            self.data
                .get(&(project_id.to_string(), data_path.to_string()))
                .cloned()
                .ok_or_else(|| {
                    ApiError::NotFound(format!("{} in project {}", data_path, project_id))
                })
        }

        fn create_data(&self, _project_id: &str, _data_path: &str) -> ApiResult<String> {
            Err(ApiError::Service("not supported by fake".to_string()))
        }

        fn folder_children(&self, _project_id: &str, data_id: &str) -> ApiResult<Vec<Data>> {
            Ok(self.children.get(data_id).cloned().unwrap_or_default())
        }

        fn create_download_url(&self, project_id: &str, data_id: &str) -> ApiResult<String> {
            Ok(format!("https://signed.example.com/{}/{}", project_id, data_id))
        }

        fn analysis_storage_id_from_size(&self, _size: AnalysisStorageSize) -> ApiResult<String> {
            Err(ApiError::Service("not supported by fake".to_string()))
        }

        fn best_matching_activation_id(
            &self,
            _project_id: &str,
            _pipeline_id: &str,
            _input_json: &Value,
            _mounts: &[AnalysisInputDataMount],
        ) -> ApiResult<String> {
            Err(ApiError::Service("not supported by fake".to_string()))
        }

        fn launch_cwl_analysis(
            &self,
            _project_id: &str,
            _request: &CreateCwlAnalysis,
        ) -> ApiResult<Analysis> {
            Err(ApiError::Service("not supported by fake".to_string()))
        }
    }

    #[test]
    fn test_file_node_rewritten_to_mount_path() {
        let catalog =
            FakeCatalog::new().with_file("proj123", "/data/sample.fastq", "fil.abc", "sample.fastq");
        let dereferencer = UriDereferencer::new(&catalog);

        let input = serde_json::json!({
            "class": "File",
            "location": "icav2://proj123/data/sample.fastq"
        });

        let (rewritten, mounts) = dereferencer.dereference(&input).unwrap();
        assert_eq!(
            rewritten,
            serde_json::json!({
                "class": "File",
                "location": "proj123/fil.abc/sample.fastq"
            })
        );
        assert_eq!(
            mounts,
            vec![AnalysisInputDataMount {
                data_id: "fil.abc".to_string(),
                mount_path: "proj123/fil.abc/sample.fastq".to_string(),
            }]
        );
    }

    #[test]
    fn test_presigned_file_gets_url_and_no_mount() {
        let catalog =
            FakeCatalog::new().with_file("proj123", "/data/sample.fastq", "fil.abc", "sample.fastq");
        let dereferencer = UriDereferencer::new(&catalog);

        let input = serde_json::json!({
            "class": "File",
            "location": "icav2://proj123/data/sample.fastq?presign=true"
        });

        let (rewritten, mounts) = dereferencer.dereference(&input).unwrap();
        assert_eq!(
            rewritten["location"],
            "https://signed.example.com/proj123/fil.abc"
        );
        assert!(mounts.is_empty());
    }

    #[test]
    fn test_folder_mounts_at_top_level() {
        let catalog =
            FakeCatalog::new().with_folder("proj123", "/runs/run-1/", "fol.xyz", "run-1");
        let dereferencer = UriDereferencer::new(&catalog);

        let input = serde_json::json!({
            "class": "Directory",
            "location": "icav2://proj123/runs/run-1/"
        });

        let (rewritten, mounts) = dereferencer.dereference(&input).unwrap();
        assert_eq!(rewritten["location"], "run-1/");
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_path, "run-1/");
        // No separator apart from the trailing slash
        assert_eq!(mounts[0].mount_path.matches('/').count(), 1);
    }

    #[test]
    fn test_presigned_folder_gets_listing() {
        let mut catalog =
            FakeCatalog::new().with_folder("proj123", "/runs/run-1/", "fol.xyz", "run-1");
        catalog.children.insert(
            "fol.xyz".to_string(),
            vec![Data {
                id: "fil.child".to_string(),
                details: DataDetails {
                    name: "reads.fastq".to_string(),
                    data_type: DataType::File,
                    owning_project_id: "proj123".to_string(),
                    path: None,
                },
            }],
        );
        let dereferencer = UriDereferencer::new(&catalog);

        let input = serde_json::json!({
            "class": "Directory",
            "location": "icav2://proj123/runs/run-1/?presign=true"
        });

        let (rewritten, mounts) = dereferencer.dereference(&input).unwrap();
        assert!(mounts.is_empty());
        assert_eq!(rewritten["location"], "run-1/");
        let listing = rewritten["listing"].as_array().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0]["basename"], "reads.fastq");
        assert_eq!(
            listing[0]["location"],
            "https://signed.example.com/proj123/fil.child"
        );
    }

    #[test]
    fn test_folder_where_file_declared_is_fatal() {
        let catalog = FakeCatalog::new().with_folder("proj123", "/runs/run-1", "fol.xyz", "run-1");
        let dereferencer = UriDereferencer::new(&catalog);

        let input = serde_json::json!({
            "class": "File",
            "location": "icav2://proj123/runs/run-1"
        });

        let err = dereferencer.dereference(&input).unwrap_err();
        assert!(err.to_string().contains("data inconsistency"));
    }

    #[test]
    fn test_file_where_directory_declared_continues() {
        let catalog =
            FakeCatalog::new().with_file("proj123", "/data/sample.fastq", "fil.abc", "sample.fastq");
        let dereferencer = UriDereferencer::new(&catalog);

        let input = serde_json::json!({
            "class": "Directory",
            "location": "icav2://proj123/data/sample.fastq"
        });

        let (rewritten, mounts) = dereferencer.dereference(&input).unwrap();
        assert_eq!(rewritten["location"], "proj123/fil.abc/sample.fastq");
        assert_eq!(mounts.len(), 1);
    }

    #[test]
    fn test_structural_recursion_preserves_shape() {
        let catalog =
            FakeCatalog::new().with_file("proj123", "/data/sample.fastq", "fil.abc", "sample.fastq");
        let dereferencer = UriDereferencer::new(&catalog);

        let input = serde_json::json!({
            "sample_name": "NA12878",
            "threads": 8,
            "fastqs": [
                { "class": "File", "location": "icav2://proj123/data/sample.fastq" }
            ],
            "nested": { "enable_dedup": true }
        });

        let (rewritten, mounts) = dereferencer.dereference(&input).unwrap();
        assert_eq!(rewritten["sample_name"], "NA12878");
        assert_eq!(rewritten["threads"], 8);
        assert_eq!(rewritten["nested"]["enable_dedup"], true);
        assert_eq!(
            rewritten["fastqs"][0]["location"],
            "proj123/fil.abc/sample.fastq"
        );
        assert_eq!(mounts.len(), 1);
    }

    #[test]
    fn test_dereference_is_idempotent_once_resolved() {
        let catalog =
            FakeCatalog::new().with_file("proj123", "/data/sample.fastq", "fil.abc", "sample.fastq");
        let dereferencer = UriDereferencer::new(&catalog);

        let input = serde_json::json!({
            "fastq": { "class": "File", "location": "icav2://proj123/data/sample.fastq" }
        });

        let (first, _) = dereferencer.dereference(&input).unwrap();
        let (second, second_mounts) = dereferencer.dereference(&first).unwrap();
        assert_eq!(first, second);
        assert!(second_mounts.is_empty());
    }

    #[test]
    fn test_project_name_resolution() {
        let mut catalog =
            FakeCatalog::new().with_file("proj123", "/data/sample.fastq", "fil.abc", "sample.fastq");
        catalog
            .project_ids
            .insert("playground_v2".to_string(), "proj123".to_string());
        let dereferencer = UriDereferencer::new(&catalog);

        let input = serde_json::json!({
            "class": "File",
            "location": "icav2://playground_v2/data/sample.fastq"
        });

        let (rewritten, _) = dereferencer.dereference(&input).unwrap();
        assert_eq!(rewritten["location"], "proj123/fil.abc/sample.fastq");
    }
}
