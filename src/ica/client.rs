// ICA v2 REST client
//
// The remote catalog and execution service behind a trait so the
// dereferencer and engine parameter resolver can be tested against
// in-memory fakes. All calls are blocking request/response with no retry.

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::config::IcaConfig;

use super::error::{ApiError, ApiResult};
use super::types::{
    Analysis, AnalysisInputDataMount, AnalysisStorage, AnalysisStorageSize, CreateCwlAnalysis,
    Data, Pipeline, Project, ProjectData,
};

/// Accept header value required by the v3 API surface
const ILLUMINA_V3_ACCEPT: &str = "application/vnd.illumina.v3+json";

/// Page size used for list endpoints; one page is always enough here
const LIST_PAGE_SIZE: &str = "1000";

/// Remote catalog and execution operations used by the launch engine
pub trait IcaApi {
    /// Resolve a project display name to its id
    fn project_id_from_name(&self, project_name: &str) -> ApiResult<String>;

    /// Resolve a pipeline code to its id
    fn pipeline_id_from_code(&self, pipeline_code: &str) -> ApiResult<String>;

    /// Look up a data object by its path within a project
    fn data_by_path(&self, project_id: &str, data_path: &str) -> ApiResult<ProjectData>;

    /// Create a data object (file or folder by trailing slash) at a path
    fn create_data(&self, project_id: &str, data_path: &str) -> ApiResult<String>;

    /// List the immediate children of a folder
    fn folder_children(&self, project_id: &str, data_id: &str) -> ApiResult<Vec<Data>>;

    /// Create a short-lived signed download URL for a file
    fn create_download_url(&self, project_id: &str, data_id: &str) -> ApiResult<String>;

    /// Resolve an analysis storage size to its id
    fn analysis_storage_id_from_size(&self, size: AnalysisStorageSize) -> ApiResult<String>;

    /// Find the best matching activation code for a prospective analysis
    fn best_matching_activation_id(
        &self,
        project_id: &str,
        pipeline_id: &str,
        input_json: &serde_json::Value,
        mounts: &[AnalysisInputDataMount],
    ) -> ApiResult<String>;

    /// Create and start a CWL analysis
    fn launch_cwl_analysis(
        &self,
        project_id: &str,
        request: &CreateCwlAnalysis,
    ) -> ApiResult<Analysis>;
}

/// Paged list body returned by the list endpoints
#[derive(Debug, Deserialize)]
struct ItemsPage<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct DownloadUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ActivationCodeDetail {
    id: String,
}

/// HTTP implementation of the ICA v2 API
pub struct IcaHttpClient {
    base_url: String,
    access_token: String,
    client: reqwest::blocking::Client,
}

impl IcaHttpClient {
    pub fn new(config: &IcaConfig) -> ApiResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            client,
        })
    }

    fn get(&self, path: &str, query: &[(&str, &str)]) -> ApiResult<reqwest::blocking::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, ILLUMINA_V3_ACCEPT)
            .send()?;
        Self::check_status(response, &url)
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> ApiResult<reqwest::blocking::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, ILLUMINA_V3_ACCEPT)
            .json(body)
            .send()?;
        Self::check_status(response, &url)
    }

    fn check_status(
        response: reqwest::blocking::Response,
        url: &str,
    ) -> ApiResult<reqwest::blocking::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().unwrap_or_default();
        Err(ApiError::Service(format!(
            "{} returned {}: {}",
            url, status, body
        )))
    }
}

impl IcaApi for IcaHttpClient {
    fn project_id_from_name(&self, project_name: &str) -> ApiResult<String> {
        let page: ItemsPage<Project> = self
            .get(
                "/api/projects",
                &[
                    ("search", project_name),
                    ("includeHiddenProjects", "true"),
                    ("pageSize", LIST_PAGE_SIZE),
                ],
            )?
            .json()?;

        let mut matches: Vec<Project> = page
            .items
            .into_iter()
            .filter(|project| project.name == project_name)
            .collect();

        match matches.len() {
            0 => Err(ApiError::NotFound(format!("project '{}'", project_name))),
            1 => Ok(matches.remove(0).id),
            _ => Err(ApiError::AmbiguousMatch(format!(
                "multiple projects named '{}'",
                project_name
            ))),
        }
    }

    fn pipeline_id_from_code(&self, pipeline_code: &str) -> ApiResult<String> {
        let page: ItemsPage<Pipeline> = self.get("/api/pipelines", &[])?.json()?;

        page.items
            .into_iter()
            .find(|pipeline| pipeline.code == pipeline_code)
            .map(|pipeline| pipeline.id)
            .ok_or_else(|| ApiError::NotFound(format!("pipeline with code '{}'", pipeline_code)))
    }

    fn data_by_path(&self, project_id: &str, data_path: &str) -> ApiResult<ProjectData> {
        let data_type = if data_path.ends_with('/') {
            "FOLDER"
        } else {
            "FILE"
        };
        let parent_folder_path = parent_folder_of(data_path);
        let path = format!("/api/projects/{}/data", project_id);

        let page: ItemsPage<ProjectData> = self
            .get(
                &path,
                &[
                    ("filePath", data_path),
                    ("filePathMatchMode", "FULL_CASE_INSENSITIVE"),
                    ("type", data_type),
                    ("parentFolderPath", &parent_folder_path),
                    ("pageSize", LIST_PAGE_SIZE),
                ],
            )?
            .json()?;

        let mut matches = page.items;
        match matches.len() {
            0 => Err(ApiError::NotFound(format!(
                "{} in project {}",
                data_path, project_id
            ))),
            1 => Ok(matches.remove(0)),
            _ => Err(ApiError::AmbiguousMatch(format!(
                "multiple results for {} in project {}",
                data_path, project_id
            ))),
        }
    }

    fn create_data(&self, project_id: &str, data_path: &str) -> ApiResult<String> {
        let data_type = if data_path.ends_with('/') {
            "FOLDER"
        } else {
            "FILE"
        };
        let name = Path::new(data_path.trim_end_matches('/'))
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| ApiError::Service(format!("no basename in path {}", data_path)))?;

        let body = serde_json::json!({
            "name": name,
            "folderPath": parent_folder_of(data_path),
            "dataType": data_type,
        });

        let created: ProjectData = self
            .post(&format!("/api/projects/{}/data", project_id), &body)?
            .json()?;
        Ok(created.data.id)
    }

    fn folder_children(&self, project_id: &str, data_id: &str) -> ApiResult<Vec<Data>> {
        let path = format!("/api/projects/{}/data", project_id);
        let page: ItemsPage<ProjectData> = self
            .get(
                &path,
                &[("parentFolderId", data_id), ("pageSize", LIST_PAGE_SIZE)],
            )?
            .json()?;
        Ok(page.items.into_iter().map(|item| item.data).collect())
    }

    fn create_download_url(&self, project_id: &str, data_id: &str) -> ApiResult<String> {
        let path = format!(
            "/api/projects/{}/data/{}:createDownloadUrl",
            project_id, data_id
        );
        let download: DownloadUrl = self.post(&path, &serde_json::json!({}))?.json()?;
        Ok(download.url)
    }

    fn analysis_storage_id_from_size(&self, size: AnalysisStorageSize) -> ApiResult<String> {
        let page: ItemsPage<AnalysisStorage> = self.get("/api/analysisStorages", &[])?.json()?;

        page.items
            .into_iter()
            .find(|storage| storage.name == size.to_string())
            .map(|storage| storage.id)
            .ok_or_else(|| {
                ApiError::NotFound(format!("analysis storage size {} in this region", size))
            })
    }

    fn best_matching_activation_id(
        &self,
        project_id: &str,
        pipeline_id: &str,
        input_json: &serde_json::Value,
        mounts: &[AnalysisInputDataMount],
    ) -> ApiResult<String> {
        let body = serde_json::json!({
            "projectId": project_id,
            "pipelineId": pipeline_id,
            "analysisInput": {
                "objectType": "JSON",
                "inputJson": serde_json::to_string(input_json)
                    .map_err(|err| ApiError::Service(err.to_string()))?,
                "dataIds": mounts.iter().map(|mount| mount.data_id.clone()).collect::<Vec<_>>(),
                "mounts": mounts,
            }
        });

        let detail: ActivationCodeDetail = self
            .post("/api/activationCodes:findBestMatchingForCwl", &body)?
            .json()?;
        Ok(detail.id)
    }

    fn launch_cwl_analysis(
        &self,
        project_id: &str,
        request: &CreateCwlAnalysis,
    ) -> ApiResult<Analysis> {
        let body = serde_json::to_value(request)
            .map_err(|err| ApiError::Service(err.to_string()))?;
        let analysis: Analysis = self
            .post(&format!("/api/projects/{}/analysis:cwl", project_id), &body)?
            .json()?;
        Ok(analysis)
    }
}

/// Parent folder of a data path, with the trailing slash the API expects
fn parent_folder_of(data_path: &str) -> String {
    let trimmed = data_path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => format!("{}/", parent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_folder_of() {
        assert_eq!(parent_folder_of("/data/sample.fastq"), "/data/");
        assert_eq!(parent_folder_of("/outputs/run-1/"), "/outputs/");
        assert_eq!(parent_folder_of("/top-level"), "/");
    }

    #[test]
    fn test_items_page_parsing() {
        let page: ItemsPage<Project> = serde_json::from_str(
            r#"{"items":[{"id":"proj-1","name":"playground"}],"nextPageToken":null}"#,
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "proj-1");
    }
}
