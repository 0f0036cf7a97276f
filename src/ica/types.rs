// Wire types for the ICA v2 REST API
//
// Request and response bodies exchanged with the remote catalog and
// execution service, plus the analysis storage size vocabulary and the
// mount descriptor emitted by the URI dereferencer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Remote data object type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    File,
    Folder,
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::File => write!(f, "FILE"),
            DataType::Folder => write!(f, "FOLDER"),
        }
    }
}

/// Details of a remote data object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDetails {
    /// Base name of the object
    pub name: String,
    pub data_type: DataType,
    pub owning_project_id: String,
    /// Full path of the object within its project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A remote data object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    pub id: String,
    pub details: DataDetails,
}

/// A data object scoped to a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectData {
    pub data: Data,
}

/// A project known to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

/// A deployed pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub code: String,
}

/// An analysis storage option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisStorage {
    pub id: String,
    pub name: String,
}

/// A created analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: String,
    pub user_reference: String,
}

/// Analysis storage sizes offered by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStorageSize {
    Small,
    Medium,
    Large,
}

/// Storage size used when neither an id nor a size is given
pub const DEFAULT_ANALYSIS_STORAGE_SIZE: AnalysisStorageSize = AnalysisStorageSize::Small;

impl std::fmt::Display for AnalysisStorageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisStorageSize::Small => write!(f, "Small"),
            AnalysisStorageSize::Medium => write!(f, "Medium"),
            AnalysisStorageSize::Large => write!(f, "Large"),
        }
    }
}

impl std::str::FromStr for AnalysisStorageSize {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "small" => Ok(AnalysisStorageSize::Small),
            "medium" => Ok(AnalysisStorageSize::Medium),
            "large" => Ok(AnalysisStorageSize::Large),
            other => Err(format!(
                "Unknown analysis storage size '{}', expected Small, Medium or Large",
                other
            )),
        }
    }
}

/// Mount descriptor pairing a data id with its in-container path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisInputDataMount {
    pub data_id: String,
    pub mount_path: String,
}

/// Tag lists attached to a launched analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisTags {
    #[serde(default, alias = "technical_tags")]
    pub technical_tags: Vec<String>,
    #[serde(default, alias = "user_tags")]
    pub user_tags: Vec<String>,
    #[serde(default, alias = "reference_tags")]
    pub reference_tags: Vec<String>,
}

/// The JSON-typed analysis input of a create-analysis request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CwlAnalysisInput {
    pub object_type: String,
    pub input_json: String,
    pub data_ids: Vec<String>,
    pub mounts: Vec<AnalysisInputDataMount>,
}

/// Body of the create-analysis call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCwlAnalysis {
    pub user_reference: String,
    pub pipeline_id: String,
    pub tags: AnalysisTags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_code_detail_id: Option<String>,
    pub analysis_input: CwlAnalysisInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_storage_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_parent_folder_id: Option<String>,
}

/// True when the value is already a platform id rather than a display name
pub fn is_uuid_format(value: &str) -> bool {
    Uuid::parse_str(value).is_ok()
}
