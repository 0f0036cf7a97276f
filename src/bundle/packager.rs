// Packed-document generation from a workflow bundle
//
// The second release artifact: the zip bundle is extracted into a scratch
// directory, the external packer flattens the staged workflow into a single
// fragment-addressed JSON document, and the result is gzip-compressed.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::cwl::CwlToolchain;

use super::assembler::WORKFLOW_FILE_NAME;

/// Produces the gzipped packed-document artifact from a zip bundle
pub struct ArchivePackager<'a> {
    toolchain: &'a dyn CwlToolchain,
}

impl<'a> ArchivePackager<'a> {
    pub fn new(toolchain: &'a dyn CwlToolchain) -> Self {
        Self { toolchain }
    }

    /// Pack the bundle at `zipped_path` into a gzipped JSON at `output_path`
    pub fn package(&self, zipped_path: &Path, output_path: &Path) -> Result<()> {
        let output_parent = output_path
            .parent()
            .with_context(|| format!("No parent directory for {}", output_path.display()))?;
        if !output_parent.is_dir() {
            anyhow::bail!(
                "Could not write to {}, parent directory does not exist",
                output_path.display()
            );
        }

        let bundle_name = zipped_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .with_context(|| format!("No bundle name in {}", zipped_path.display()))?;

        let scratch_dir = tempfile::Builder::new()
            .prefix("cwl-pack-")
            .tempdir()
            .context("Failed to create scratch directory")?;

        let zip_file = fs::File::open(zipped_path)
            .with_context(|| format!("Failed to open bundle {}", zipped_path.display()))?;
        zip::ZipArchive::new(zip_file)
            .with_context(|| format!("Failed to read bundle {}", zipped_path.display()))?
            .extract(scratch_dir.path())
            .with_context(|| format!("Failed to extract bundle {}", zipped_path.display()))?;

        let extracted_workflow_path = scratch_dir
            .path()
            .join(bundle_name)
            .join(WORKFLOW_FILE_NAME);

        info!("Packing {}", extracted_workflow_path.display());
        let packed_stdout = self.toolchain.pack(&extracted_workflow_path)?;

        let packed_json: serde_json::Value = serde_json::from_str(&packed_stdout)
            .context("Packer output is not valid JSON")?;
        let pretty = serde_json::to_string_pretty(&packed_json)? + "\n";

        let output_file = fs::File::create(output_path)
            .with_context(|| format!("Failed to create {}", output_path.display()))?;
        let mut encoder = GzEncoder::new(output_file, Compression::default());
        encoder.write_all(pretty.as_bytes())?;
        encoder
            .finish()
            .with_context(|| format!("Failed to finish writing {}", output_path.display()))?;

        info!("Wrote packed document {}", output_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    struct FakePacker {
        output: String,
    }

    impl CwlToolchain for FakePacker {
        fn validate(&self, _workflow_path: &Path, _working_dir: Option<&Path>) -> Result<()> {
            Ok(())
        }

        fn pack(&self, workflow_path: &Path) -> Result<String> {
            if !workflow_path.is_file() {
                anyhow::bail!("no workflow at {}", workflow_path.display());
            }
            Ok(self.output.clone())
        }
    }

    fn write_bundle_zip(dir: &Path) -> std::path::PathBuf {
        let zip_path = dir.join("w__1.0.0.zip");
        let file = fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("w__1.0.0/workflow.cwl", FileOptions::default())
            .unwrap();
        writer.write_all(b"class: Workflow\nsteps: []\n").unwrap();
        writer.finish().unwrap();
        zip_path
    }

    #[test]
    fn test_package_writes_gzipped_pretty_json() {
        let dir = TempDir::new().unwrap();
        let zip_path = write_bundle_zip(dir.path());
        let output_path = dir.path().join("w__1.0.0.packed.json.gz");

        let packer = FakePacker {
            output: r#"{"cwlVersion":"v1.1","$graph":[]}"#.to_string(),
        };
        ArchivePackager::new(&packer)
            .package(&zip_path, &output_path)
            .unwrap();

        let mut decoder = GzDecoder::new(fs::File::open(&output_path).unwrap());
        let mut decoded = String::new();
        decoder.read_to_string(&mut decoded).unwrap();

        assert!(decoded.contains("\"cwlVersion\": \"v1.1\""));
        assert!(decoded.ends_with('\n'));
    }

    #[test]
    fn test_package_rejects_missing_output_parent() {
        let dir = TempDir::new().unwrap();
        let zip_path = write_bundle_zip(dir.path());
        let output_path = dir.path().join("nonexistent").join("out.json.gz");

        let packer = FakePacker {
            output: "{}".to_string(),
        };
        let err = ArchivePackager::new(&packer)
            .package(&zip_path, &output_path)
            .unwrap_err();
        assert!(err.to_string().contains("parent directory does not exist"));
    }

    #[test]
    fn test_package_surfaces_packer_failure() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("empty.zip");
        let file = fs::File::create(&zip_path).unwrap();
        zip::ZipWriter::new(file).finish().unwrap();
        let output_path = dir.path().join("out.json.gz");

        // The extracted bundle has no workflow.cwl, so the packer fails
        let packer = FakePacker {
            output: "{}".to_string(),
        };
        assert!(ArchivePackager::new(&packer)
            .package(&zip_path, &output_path)
            .is_err());
    }
}
