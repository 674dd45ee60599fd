//! Operations that derive a new container from an existing one.
//!
//! Every operation decodes the source, edits the manifest (and, for uuid
//! regeneration, one image), then re-encodes to a different path. Unchanged
//! images are copied entry-to-entry from the source without decompression.
//! Output goes through a temporary file, so a failed operation writes nothing.

use crate::concurrency::check_interrupted;
use crate::staging::{staging_dir, write_atomic};
use crate::CoreError;
use chrono::Utc;
use cosi_archive::{
    compress_stream, sha384_file, write_cosi, AtomicOutput, CompressionSettings, CosiReader,
};
use cosi_disk::VhdFooter;
use cosi_schema::{
    auxiliary_path, is_valid_auxiliary_name, AuxiliaryFile, ImageFile, ImageSource, Manifest,
    ManifestError,
};
use cosi_tools::{is_ext_family, set_ext_uuid, ToolRunner};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Attach `file` to the container as auxiliary file `name`.
pub fn insert_auxiliary(
    source: &Path,
    output: &Path,
    name: &str,
    file: &Path,
) -> Result<Manifest, CoreError> {
    ensure_distinct(source, output)?;
    if !is_valid_auxiliary_name(name) {
        return Err(ManifestError::InvalidAuxiliaryName(name.to_owned()).into());
    }

    let reader = CosiReader::open(source)?;
    let mut manifest = reader.manifest_with_sources()?;
    if manifest.auxiliary_files.iter().any(|a| a.name == name) {
        return Err(CoreError::AuxiliaryExists(name.to_owned()));
    }

    let (size, sha384) = sha384_file(file)?;
    debug!("auxiliary '{name}': {size} bytes from {}", file.display());
    manifest.auxiliary_files.push(AuxiliaryFile {
        name: name.to_owned(),
        image: ImageFile {
            path: auxiliary_path(name),
            compressed_size: size,
            uncompressed_size: size,
            sha384: Some(sha384),
            source: Some(ImageSource::File(file.to_path_buf())),
        },
    });

    write_atomic(&manifest, output)?;
    info!("inserted auxiliary file '{name}' into {}", output.display());
    Ok(manifest)
}

/// Drop the images mounted at `mount_points`. Every mount point must exist.
pub fn delete_mount_points(
    source: &Path,
    output: &Path,
    mount_points: &[String],
) -> Result<Manifest, CoreError> {
    ensure_distinct(source, output)?;
    let reader = CosiReader::open(source)?;
    let mut manifest = reader.manifest_with_sources()?;

    for mp in mount_points {
        if manifest.image_by_mount_point(mp).is_none() {
            return Err(CoreError::MountPointNotFound(mp.clone()));
        }
    }

    let before = manifest.images.len();
    manifest
        .images
        .retain(|image| !mount_points.iter().any(|mp| *mp == image.mount_point));
    info!(
        "removed {} of {before} images from {}",
        before - manifest.images.len(),
        source.display()
    );

    write_atomic(&manifest, output)?;
    Ok(manifest)
}

/// Give the ext filesystems at `mount_points` fresh random UUIDs.
///
/// GPT regions backed by the same image path are updated to match. Images
/// protected by dm-verity are refused, since rewriting them would
/// invalidate their hash tree.
pub fn randomize_fs_uuid(
    runner: &dyn ToolRunner,
    source: &Path,
    output: &Path,
    mount_points: &[String],
    scratch: &Path,
) -> Result<Manifest, CoreError> {
    ensure_distinct(source, output)?;
    let reader = CosiReader::open(source)?;
    let mut manifest = reader.manifest_with_sources()?;

    let mut targets = Vec::with_capacity(mount_points.len());
    for mp in mount_points {
        let index = manifest
            .images
            .iter()
            .position(|i| i.mount_point == *mp)
            .ok_or_else(|| CoreError::MountPointNotFound(mp.clone()))?;
        let image = &manifest.images[index];
        if !is_ext_family(&image.fs_type) {
            return Err(CoreError::Unsupported(format!(
                "cannot regenerate the uuid of {} filesystem at {mp}",
                image.fs_type
            )));
        }
        if image.verity.is_some() {
            return Err(CoreError::Unsupported(format!(
                "filesystem at {mp} is protected by dm-verity"
            )));
        }
        targets.push(index);
    }

    let staging = staging_dir(scratch, "cosi-uuid-")?;
    let settings = CompressionSettings {
        window_log: manifest
            .compression
            .map_or(CompressionSettings::default().window_log, |c| c.max_window_log),
        ..CompressionSettings::default()
    };

    for (n, index) in targets.into_iter().enumerate() {
        check_interrupted()?;
        let old = manifest.images[index].image.clone();
        let raw = staging.path().join(format!("uuid-{n}.raw"));
        {
            let mut out = BufWriter::new(File::create(&raw)?);
            std::io::copy(&mut reader.open_image(&old)?, &mut out)?;
            out.flush()?;
        }

        let uuid = Uuid::new_v4().to_string();
        set_ext_uuid(runner, &raw, &uuid)?;

        let dest = staging.path().join(format!("uuid-{n}.raw.zst"));
        let compressed = compress_stream(BufReader::new(File::open(&raw)?), &dest, settings)?;
        std::fs::remove_file(&raw)?;
        let new = compressed.into_image_file(old.path.clone(), &dest);

        if let Some(disk) = &mut manifest.disk {
            for region in disk.gpt_regions.iter_mut().filter(|r| r.image.path == old.path) {
                region.image = new.clone();
            }
        }
        let image = &mut manifest.images[index];
        info!("{}: filesystem uuid {} -> {uuid}", image.mount_point, image.fs_uuid);
        image.fs_uuid = uuid;
        image.image = new;
    }

    write_atomic(&manifest, output)?;
    Ok(manifest)
}

/// Re-encode `source` and append a fixed VHD footer describing the result.
pub fn append_vhd_footer(source: &Path, output: &Path) -> Result<VhdFooter, CoreError> {
    ensure_distinct(source, output)?;
    let reader = CosiReader::open(source)?;
    let manifest = reader.manifest_with_sources()?;

    let mut out = AtomicOutput::create(output)?;
    let written = write_cosi(BufWriter::new(&mut out), &manifest)?;
    let footer = VhdFooter::fixed(written, Utc::now(), Uuid::new_v4());
    out.write_all(&footer.to_bytes())?;
    let path = out.commit()?;
    info!("wrote {} ({written} bytes plus VHD footer)", path.display());
    Ok(footer)
}

/// Refuse to write a container over its own source.
fn ensure_distinct(source: &Path, output: &Path) -> Result<(), CoreError> {
    let src = source.canonicalize()?;
    if resolve(output) == src {
        return Err(CoreError::SameSourceAndOutput(output.to_path_buf()));
    }
    Ok(())
}

/// Best-effort absolute form of a path that may not exist yet.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}
