use crate::CoreError;
use cosi_archive::{write_cosi, AtomicOutput};
use cosi_schema::Manifest;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// A finished manifest whose image sources live in a staging directory.
///
/// The staging directory is removed when this value is dropped, whether or
/// not the container was written.
#[derive(Debug)]
pub struct StagedContainer {
    pub manifest: Manifest,
    staging: TempDir,
}

impl StagedContainer {
    pub(crate) fn new(manifest: Manifest, staging: TempDir) -> Self {
        Self { manifest, staging }
    }

    pub fn staging_dir(&self) -> &Path {
        self.staging.path()
    }

    /// Encode to `output` atomically. Returns the container size in bytes.
    pub fn write_to(&self, output: &Path) -> Result<u64, CoreError> {
        write_atomic(&self.manifest, output)
    }
}

/// Encode `manifest` to a temp file next to `output`, then rename it into place.
pub(crate) fn write_atomic(manifest: &Manifest, output: &Path) -> Result<u64, CoreError> {
    let mut out = AtomicOutput::create(output)?;
    let written = write_cosi(BufWriter::new(&mut out), manifest)?;
    let path: PathBuf = out.commit()?;
    info!("wrote {} ({written} bytes)", path.display());
    Ok(written)
}

/// Create a private staging directory under `scratch`.
pub(crate) fn staging_dir(scratch: &Path, prefix: &str) -> Result<TempDir, CoreError> {
    std::fs::create_dir_all(scratch)?;
    Ok(tempfile::Builder::new().prefix(prefix).tempdir_in(scratch)?)
}
