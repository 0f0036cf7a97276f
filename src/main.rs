// cwl-ica - CWL catalogue management and ICA v2 deployment tool
//
// This binary bundles catalogue workflows into self-contained zip archives,
// derives packed single-document artifacts from them, and launches pipeline
// analyses from launch json documents.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod bundle;
mod config;
mod cwl;
mod ica;

use crate::bundle::{ArchivePackager, BundleAssembler};
use crate::config::{IcaConfig, RepoConfig};
use crate::cwl::types::name_version_from_path;
use crate::cwl::{CwlDocument, CwltoolClient, DocumentKind};
use crate::ica::types::is_uuid_format;
use crate::ica::{AnalysisStorageSize, IcaApi, IcaHttpClient, LaunchJson};

/// CWL catalogue management and ICA v2 deployment
#[derive(Parser)]
#[command(name = "cwl-ica")]
#[command(about = "Bundle CWL catalogue workflows and launch them on ICA v2")]
#[command(version)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Create a deployable zip bundle from a catalogue workflow
    Bundle {
        /// Path to the workflow document
        #[arg(long)]
        workflow_path: PathBuf,

        /// Directory to write the zip into (defaults to the working directory)
        #[arg(long)]
        output_path: Option<PathBuf>,

        /// Overwrite an existing zip at the output path
        #[arg(long)]
        force: bool,
    },

    /// Produce the gzipped packed document from a zip bundle
    Pack {
        /// Path to a zip bundle produced by the bundle command
        #[arg(long)]
        zip_path: PathBuf,

        /// Output file (defaults to <bundle-name>.packed.json.gz beside the zip)
        #[arg(long)]
        output_path: Option<PathBuf>,
    },

    /// Launch a pipeline analysis from a launch json
    Launch {
        /// Path to the launch json document
        #[arg(long)]
        launch_json: PathBuf,

        /// Id of the pipeline to launch
        #[arg(long, conflicts_with = "pipeline_code")]
        pipeline_id: Option<String>,

        /// Code of the pipeline to launch
        #[arg(long)]
        pipeline_code: Option<String>,

        /// Id of the project context
        #[arg(long, conflicts_with = "project_name")]
        project_id: Option<String>,

        /// Name of the project context
        #[arg(long)]
        project_name: Option<String>,

        /// Id of the parent folder to write outputs to
        #[arg(long, conflicts_with = "output_parent_folder_path")]
        output_parent_folder_id: Option<String>,

        /// Path of the parent folder to write outputs to (created if missing)
        #[arg(long)]
        output_parent_folder_path: Option<String>,

        /// Analysis storage id, overrides any storage size
        #[arg(long, conflicts_with = "analysis_storage_size")]
        analysis_storage_id: Option<String>,

        /// Analysis storage size: Small, Medium or Large
        #[arg(long)]
        analysis_storage_size: Option<AnalysisStorageSize>,

        /// Activation id for the analysis
        #[arg(long)]
        activation_id: Option<String>,

        /// Dump the outbound create-analysis body to this path
        #[arg(long)]
        analysis_json_output_path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    match args.command {
        CliCommand::Bundle {
            workflow_path,
            output_path,
            force,
        } => run_bundle(workflow_path, output_path, force),
        CliCommand::Pack {
            zip_path,
            output_path,
        } => run_pack(zip_path, output_path),
        CliCommand::Launch {
            launch_json,
            pipeline_id,
            pipeline_code,
            project_id,
            project_name,
            output_parent_folder_id,
            output_parent_folder_path,
            analysis_storage_id,
            analysis_storage_size,
            activation_id,
            analysis_json_output_path,
        } => run_launch(LaunchArgs {
            launch_json,
            pipeline_id,
            pipeline_code,
            project_id,
            project_name,
            output_parent_folder_id,
            output_parent_folder_path,
            analysis_storage_id,
            analysis_storage_size,
            activation_id,
            analysis_json_output_path,
        }),
    }
}

/// Bundle a catalogue workflow into a deployable zip
fn run_bundle(workflow_path: PathBuf, output_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config = RepoConfig::from_env()?;

    if !workflow_path.is_file() {
        anyhow::bail!("Could not find the workflow {}", workflow_path.display());
    }
    let workflow_path = workflow_path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", workflow_path.display()))?;

    let output_dir = match output_path {
        Some(dir) => {
            if !dir.is_dir() {
                anyhow::bail!("--output-path {} does not exist", dir.display());
            }
            dir
        },
        None => std::env::current_dir()?,
    };

    let (name, version) = name_version_from_path(&workflow_path)?;
    let output_zip_path = output_dir.join(format!("{}__{}.zip", name, version));

    let root = CwlDocument::load(&workflow_path, DocumentKind::Workflow)?;
    tracing::info!(
        "Bundling {} {} (sha256 {})",
        root.name,
        root.version,
        &root.digest[..12]
    );

    let toolchain = CwltoolClient::new(&config);
    let assembler = BundleAssembler::new(&config, &toolchain);
    let zip_path = assembler.bundle(&root, &output_zip_path, force)?;

    println!("Wrote {}", zip_path.display());
    Ok(())
}

/// Derive the packed document artifact from a zip bundle
fn run_pack(zip_path: PathBuf, output_path: Option<PathBuf>) -> Result<()> {
    if !zip_path.is_file() {
        anyhow::bail!("Could not find the bundle {}", zip_path.display());
    }

    let output_path = match output_path {
        Some(path) => path,
        None => {
            let stem = zip_path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .with_context(|| format!("No bundle name in {}", zip_path.display()))?;
            zip_path.with_file_name(format!("{}.packed.json.gz", stem))
        },
    };

    // The packager only needs the toolchain binary, not the catalogue root
    let config = RepoConfig::from_env()
        .unwrap_or_else(|_| RepoConfig::new(std::env::temp_dir()));
    let toolchain = CwltoolClient::new(&config);

    ArchivePackager::new(&toolchain).package(&zip_path, &output_path)?;

    println!("Wrote {}", output_path.display());
    Ok(())
}

struct LaunchArgs {
    launch_json: PathBuf,
    pipeline_id: Option<String>,
    pipeline_code: Option<String>,
    project_id: Option<String>,
    project_name: Option<String>,
    output_parent_folder_id: Option<String>,
    output_parent_folder_path: Option<String>,
    analysis_storage_id: Option<String>,
    analysis_storage_size: Option<AnalysisStorageSize>,
    activation_id: Option<String>,
    analysis_json_output_path: Option<PathBuf>,
}

/// Launch a pipeline analysis in a project context
fn run_launch(args: LaunchArgs) -> Result<()> {
    let ica_config = IcaConfig::from_env()?;
    let api = IcaHttpClient::new(&ica_config)?;

    let mut launch = LaunchJson::from_file(&args.launch_json)?;

    let project_id = match (args.project_id, args.project_name) {
        (Some(project_id), None) => {
            if !is_uuid_format(&project_id) {
                anyhow::bail!("--project-id {} is not an id", project_id);
            }
            project_id
        },
        (None, Some(project_name)) => api.project_id_from_name(&project_name)?,
        _ => anyhow::bail!("Specify exactly one of --project-id and --project-name"),
    };

    let pipeline_id = match (args.pipeline_id, args.pipeline_code) {
        (Some(pipeline_id), None) => {
            if !is_uuid_format(&pipeline_id) {
                anyhow::bail!("--pipeline-id {} is not an id", pipeline_id);
            }
            pipeline_id
        },
        (None, Some(pipeline_code)) => api.pipeline_id_from_code(&pipeline_code)?,
        _ => anyhow::bail!("Specify exactly one of --pipeline-id and --pipeline-code"),
    };

    // CLI values override whatever the launch json carried
    if args.output_parent_folder_id.is_some() {
        launch.engine_parameters.output_parent_folder_id = args.output_parent_folder_id;
    }
    if args.output_parent_folder_path.is_some() {
        launch.engine_parameters.output_parent_folder_path = args.output_parent_folder_path;
    }
    if args.analysis_storage_id.is_some() {
        launch.engine_parameters.analysis_storage_id = args.analysis_storage_id;
    }
    if args.analysis_storage_size.is_some() {
        launch.engine_parameters.analysis_storage_size = args.analysis_storage_size;
    }
    if args.activation_id.is_some() {
        launch.engine_parameters.activation_id = args.activation_id;
    }

    // Overrides first, then dereferencing, then parameter resolution
    launch.collect_overrides_from_engine_parameters();
    launch.dereference_input_json(&api)?;
    launch.populate_empty_engine_parameters(&api, &project_id, &pipeline_id)?;

    let request = launch.create_cwl_analysis(&pipeline_id)?;

    if let Some(dump_path) = args.analysis_json_output_path {
        std::fs::write(&dump_path, serde_json::to_string_pretty(&request)? + "\n")
            .with_context(|| format!("Failed to write {}", dump_path.display()))?;
        tracing::info!("Wrote create-analysis body to {}", dump_path.display());
    }

    let analysis = api.launch_cwl_analysis(&project_id, &request)?;

    println!(
        "Launched analysis {} ({})",
        analysis.id, analysis.user_reference
    );
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cwl_ica_workflows={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
