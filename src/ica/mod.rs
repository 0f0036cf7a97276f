// ICA v2 launch engine
//
// Everything between a launch json on disk and a created analysis on the
// platform: the REST client, the URI dereferencer, the engine parameter
// resolver and the launch specification that ties them together.

pub mod client;
pub mod dereference;
pub mod engine_params;
pub mod error;
pub mod launch;
pub mod types;

pub use client::{IcaApi, IcaHttpClient};
pub use dereference::UriDereferencer;
pub use engine_params::EngineParameters;
pub use error::{ApiError, ApiResult};
pub use launch::LaunchJson;
pub use types::{
    Analysis, AnalysisInputDataMount, AnalysisStorageSize, AnalysisTags, CreateCwlAnalysis,
    DEFAULT_ANALYSIS_STORAGE_SIZE,
};
