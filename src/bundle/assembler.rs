// Bundle assembly for deployable workflow archives
//
// Copies a workflow's dependency closure into an isolated staging directory
// laid out repo-relative, rewrites the root document's references for the
// flattened layout, applies the platform's legacy vocabulary substitutions,
// revalidates with the external toolchain, and zips the result.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::RepoConfig;
use crate::cwl::{CwlDocument, CwlToolchain, DependencyWalker};

use super::rewrite::RewriteTable;

/// Fixed name of the root document inside a bundle
pub const WORKFLOW_FILE_NAME: &str = "workflow.cwl";

/// Fixed name of the placeholder parameters file
pub const PARAMS_XML_FILE_NAME: &str = "params.xml";

/// Placeholder parameters file content written into every bundle
pub const BLANK_PARAMS_XML: &str = "\
<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>
<pd:pipeline xmlns:pd=\"xsd://www.illumina.com/ica/cp/pipelinedefinition\" code=\"\" version=\"1.0\">
    <pd:dataInputs/>
    <pd:steps/>
</pd:pipeline>
";

/// Compute resource tier tokens renamed between platform generations
const RESOURCE_TIER_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("standardHiCpu", "hicpu"),
    ("standardHiMem", "himem"),
];

/// Container images relocated between platform generations
const CONTAINER_SUBSTITUTIONS: &[(&str, &str)] = &[(
    "699120554104.dkr.ecr.us-east-1.amazonaws.com/public/dragen:4.0.3",
    "079623148045.dkr.ecr.us-east-1.amazonaws.com/cp-prod/7ecddc68-f08b-4b43-99b6-aee3cbb34524:latest",
)];

/// Temp-space path token, substituted only in script include files
const TEMPSPACE_SUBSTITUTION: (&str, &str) = ("\"/ephemeral/\"", "\"/scratch/\"");

/// File extension identifying script includes
const SCRIPT_EXTENSION: &str = "cwljs";

/// Assembles self-contained workflow bundles
pub struct BundleAssembler<'a> {
    config: &'a RepoConfig,
    toolchain: &'a dyn CwlToolchain,
}

impl<'a> BundleAssembler<'a> {
    pub fn new(config: &'a RepoConfig, toolchain: &'a dyn CwlToolchain) -> Self {
        Self { config, toolchain }
    }

    /// Bundle the given root workflow into a zip at the output path
    ///
    /// On validation failure the staging directory is retained on disk for
    /// post-mortem inspection; on success it is deleted after zipping.
    pub fn bundle(
        &self,
        root: &CwlDocument,
        output_zip_path: &Path,
        force: bool,
    ) -> Result<PathBuf> {
        if output_zip_path.is_file() {
            if force {
                fs::remove_file(output_zip_path).with_context(|| {
                    format!("Failed to remove existing {}", output_zip_path.display())
                })?;
            } else {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite",
                    output_zip_path.display()
                );
            }
        }

        let bundle_name = output_zip_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .with_context(|| format!("No bundle name in {}", output_zip_path.display()))?
            .to_string();

        // The closure and rewrite table must both resolve before any
        // filesystem mutation happens
        let walker = DependencyWalker::new(self.config);
        let closure = walker.collect(root)?;
        let rewrite_table = RewriteTable::build(root, &self.config.repo_path)?;

        let staging_parent = tempfile::Builder::new()
            .prefix("cwl-bundle-")
            .tempdir()
            .context("Failed to create staging parent directory")?
            .into_path();
        let staging_dir = staging_parent.join(&bundle_name);
        fs::create_dir(&staging_dir).with_context(|| {
            format!("Staging directory collision at {}", staging_dir.display())
        })?;

        info!("Transferring {} files into {}", closure.len(), staging_dir.display());
        for dependency_path in closure.all_paths() {
            let relative = dependency_path
                .strip_prefix(&self.config.repo_path)
                .with_context(|| {
                    format!(
                        "{} is not under the catalogue repository",
                        dependency_path.display()
                    )
                })?;
            let staged_path = staging_dir.join(relative);
            if let Some(parent) = staged_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&dependency_path, &staged_path).with_context(|| {
                format!("Failed to copy {} into the bundle", dependency_path.display())
            })?;
        }

        let root_content = fs::read_to_string(&root.file_path)
            .with_context(|| format!("Failed to read {}", root.file_path.display()))?;
        let staged_workflow_path = staging_dir.join(WORKFLOW_FILE_NAME);
        fs::write(
            &staged_workflow_path,
            rewrite_table.rewrite_document(&root_content),
        )?;

        apply_legacy_substitutions(&staging_dir)?;

        info!("Revalidating staged workflow with the external toolchain");
        if let Err(validation_error) = self
            .toolchain
            .validate(&staged_workflow_path, Some(&staging_dir))
        {
            warn!(
                "Validation failed; staging directory retained at {}",
                staging_dir.display()
            );
            return Err(validation_error.context(format!(
                "Bundled workflow failed validation; staging directory retained at {} \
                 for inspection",
                staging_dir.display()
            )));
        }

        fs::write(staging_dir.join(PARAMS_XML_FILE_NAME), BLANK_PARAMS_XML)?;

        zip_directory(&staging_dir, &bundle_name, output_zip_path)?;

        fs::remove_dir_all(&staging_parent)
            .with_context(|| format!("Failed to remove {}", staging_parent.display()))?;

        info!("Wrote bundle {}", output_zip_path.display());
        Ok(output_zip_path.to_path_buf())
    }
}

/// Apply the fixed legacy-vocabulary substitutions to every staged file
///
/// Resource tier and container tokens are substituted everywhere; the
/// temp-space token only in script include files.
fn apply_legacy_substitutions(staging_dir: &Path) -> Result<()> {
    for entry in WalkDir::new(staging_dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read staged file {}", path.display()))?;

        let is_script = path
            .extension()
            .map_or(false, |extension| extension == SCRIPT_EXTENSION);

        let mut rewritten = String::with_capacity(content.len());
        for line in content.lines() {
            let mut line = line.trim_end().to_string();
            for (old_token, new_token) in RESOURCE_TIER_SUBSTITUTIONS {
                if line.contains(old_token) {
                    line = line.replace(old_token, new_token);
                }
            }
            for (old_token, new_token) in CONTAINER_SUBSTITUTIONS {
                if line.contains(old_token) {
                    line = line.replace(old_token, new_token);
                }
            }
            if is_script && line.contains(TEMPSPACE_SUBSTITUTION.0) {
                line = line.replace(TEMPSPACE_SUBSTITUTION.0, TEMPSPACE_SUBSTITUTION.1);
            }
            rewritten.push_str(&line);
            rewritten.push('\n');
        }

        fs::write(path, rewritten)
            .with_context(|| format!("Failed to rewrite staged file {}", path.display()))?;
    }

    Ok(())
}

/// Zip a staged directory with entries rooted at the bundle name
fn zip_directory(staging_dir: &Path, bundle_name: &str, output_zip_path: &Path) -> Result<()> {
    let zip_file = fs::File::create(output_zip_path)
        .with_context(|| format!("Failed to create {}", output_zip_path.display()))?;
    let mut zip_writer = ZipWriter::new(zip_file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(staging_dir)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        let relative = path
            .strip_prefix(staging_dir)
            .context("Staged entry outside staging directory")?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let archive_name = Path::new(bundle_name).join(relative);
        let archive_name = archive_name.to_string_lossy();

        if path.is_dir() {
            zip_writer.add_directory(archive_name, options)?;
        } else {
            zip_writer.start_file(archive_name, options)?;
            let content = fs::read(path)?;
            zip_writer.write_all(&content)?;
        }
    }

    zip_writer.finish().context("Failed to finalize the bundle zip")?;
    Ok(())
}
