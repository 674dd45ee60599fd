//! Disk image to container pipeline.
//!
//! 1. Detect a VHD footer and parse the GPT.
//! 2. Copy the primary GPT region verbatim and compress it.
//! 3. For each partition by start address: extract, try to shrink, compress.
//! 4. Decompress each partition again to probe its filesystem, and mount every
//!    recognized non-swap filesystem read-only to collect os-release and
//!    packages from the root and look for a bootloader anywhere. A partition
//!    that cannot be probed or mounted is logged and skipped.
//! 5. Assemble the manifest. Encoding is left to [`StagedContainer::write_to`].
//!
//! Everything is staged in a temporary directory that disappears with the
//! returned [`StagedContainer`], or on the first error.

use crate::concurrency::check_interrupted;
use crate::config::GeneratorConfig;
use crate::staging::{staging_dir, StagedContainer};
use crate::CoreError;
use cosi_archive::{compress_stream, decompress_stream};
use cosi_disk::{effective_disk_size, Gpt, GptPartition, LBA_SIZE};
use cosi_schema::{
    Bootloader, Compression, Disk, DiskType, GptDiskRegion, Image, ImageFile, ImagePath, Manifest,
    OsArch, OsPackage, PartitionType, RegionType, SWAP_MOUNT_POINT,
};
use cosi_tools::{find_rpmdb, probe, read_packages, shrink_ext, FsProbe, LoopMount, ToolRunner};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PRIMARY_GPT_IMAGE: &str = "images/primary-gpt.raw.zst";

/// Paths, relative to the ESP or root mount, whose presence means GRUB is installed.
pub const GRUB_PATHS: &[&str] = &[
    "EFI/BOOT/grubx64.efi",
    "EFI/BOOT/grubaa64.efi",
    "EFI/BOOT/BOOTX64.EFI",
    "boot/grub2",
    "boot/grub",
    "grub2",
    "grub",
];

const OS_RELEASE_PATHS: &[&str] = &["etc/os-release", "usr/lib/os-release"];

/// One source partition, filled in across both passes.
#[derive(Debug)]
struct PartitionRecord {
    number: u32,
    part_type: PartitionType,
    file: ImageFile,
    probe: Option<FsProbe>,
}

impl PartitionRecord {
    fn mount_point(&self) -> String {
        match self.part_type.canonical_mount_point() {
            Some(mp) => mp.to_owned(),
            None => format!("/mnt/unknown-{}", self.number),
        }
    }
}

/// What the root and ESP mounts revealed.
#[derive(Debug, Default)]
struct Inspection {
    os_release: Option<String>,
    packages: Vec<OsPackage>,
    bootloader_found: bool,
}

pub struct Generator<'a> {
    runner: &'a dyn ToolRunner,
    config: GeneratorConfig,
}

impl<'a> Generator<'a> {
    pub fn new(runner: &'a dyn ToolRunner, config: GeneratorConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Stage every image of `source` and build its manifest.
    pub fn generate(&self, source: &Path) -> Result<StagedContainer, CoreError> {
        info!("generating container from {}", source.display());
        let mut disk = File::open(source)?;
        let file_size = disk.metadata()?.len();
        let disk_size = effective_disk_size(&mut disk, file_size)?;
        if disk_size != file_size {
            info!("{} carries a VHD footer, ignoring its last 512 bytes", source.display());
        }
        let gpt = Gpt::read(&mut disk, disk_size)?;
        info!("found {} partitions", gpt.partitions.len());

        let staging = staging_dir(&self.config.scratch_root(), "cosi-gen-")?;
        let mut regions = Vec::with_capacity(gpt.partitions.len() + 1);

        let primary = self.stage_primary(&mut disk, &gpt, staging.path())?;
        regions.push(GptDiskRegion {
            image: primary,
            region_type: RegionType::PrimaryGpt,
            number: None,
        });

        let mut records = Vec::with_capacity(gpt.partitions.len());
        for (i, partition) in gpt.partitions_by_start().into_iter().enumerate() {
            check_interrupted()?;
            let number = i as u32 + 1;
            let file = self.stage_partition(&mut disk, partition, number, staging.path())?;
            regions.push(GptDiskRegion {
                image: file.clone(),
                region_type: RegionType::Partition,
                number: Some(number),
            });
            records.push(PartitionRecord {
                number,
                part_type: PartitionType::from_uuid(&partition.type_guid),
                file,
                probe: None,
            });
        }
        drop(disk);

        let mut inspection = Inspection::default();
        for index in 0..records.len() {
            check_interrupted()?;
            self.introspect(&mut records, index, staging.path(), &mut inspection)?;
        }

        if !inspection.bootloader_found {
            return Err(CoreError::BootloaderNotFound);
        }

        let manifest = self.assemble(disk_size, regions, &records, inspection);
        manifest.validate()?;
        info!(
            "manifest ready: {} images, {} regions",
            manifest.images.len(),
            manifest.disk.as_ref().map_or(0, |d| d.gpt_regions.len())
        );
        Ok(StagedContainer::new(manifest, staging))
    }

    /// Generate and encode to `output` in one step.
    pub fn generate_to(&self, source: &Path, output: &Path) -> Result<Manifest, CoreError> {
        let staged = self.generate(source)?;
        staged.write_to(output)?;
        Ok(staged.manifest.clone())
    }

    fn stage_primary(
        &self,
        disk: &mut File,
        gpt: &Gpt,
        staging: &Path,
    ) -> Result<ImageFile, CoreError> {
        let len = gpt.primary_region_len();
        debug!("staging primary GPT region ({len} bytes)");
        disk.seek(SeekFrom::Start(0))?;
        let dest = staging.join("primary-gpt.raw.zst");
        let compressed = compress_stream(
            BufReader::new(&mut *disk).take(len),
            &dest,
            self.config.compression,
        )?;
        Ok(compressed.into_image_file(ImagePath::new(PRIMARY_GPT_IMAGE), &dest))
    }

    fn stage_partition(
        &self,
        disk: &mut File,
        partition: &GptPartition,
        number: u32,
        staging: &Path,
    ) -> Result<ImageFile, CoreError> {
        let original = partition.size_bytes();
        debug!(
            "extracting partition {number} ('{}', {original} bytes at {})",
            partition.name,
            partition.start_offset()
        );
        let raw = staging.join(format!("partition-{number}.raw"));
        disk.seek(SeekFrom::Start(partition.start_offset()))?;
        copy_exact(&mut *disk, &raw, original)?;

        let size = if self.config.shrink {
            self.try_shrink(&raw, number, original)
        } else {
            original
        };

        let dest = staging.join(format!("partition-{number}.raw.zst"));
        let reader = BufReader::new(File::open(&raw)?).take(size);
        let compressed = compress_stream(reader, &dest, self.config.compression)?;
        std::fs::remove_file(&raw)?;

        let path = ImagePath::new(format!("images/partition-{number}.raw.zst"));
        Ok(compressed.into_image_file(path, &dest))
    }

    /// Shrinking is best effort: any failure keeps the original size.
    fn try_shrink(&self, raw: &Path, number: u32, original: u64) -> u64 {
        match shrink_ext(self.runner, raw) {
            Ok(Some(shrunk)) if shrunk < original => {
                info!("partition {number}: shrunk from {original} to {shrunk} bytes");
                shrunk
            }
            Ok(_) => original,
            Err(e) => {
                warn!("partition {number}: shrink failed, keeping original size: {e}");
                original
            }
        }
    }

    fn introspect(
        &self,
        records: &mut [PartitionRecord],
        index: usize,
        staging: &Path,
        inspection: &mut Inspection,
    ) -> Result<(), CoreError> {
        let raw = staging.join("inspect.raw");
        {
            let record = &records[index];
            let mut out = BufWriter::new(File::create(&raw)?);
            let window = self.config.compression.window_log;
            let src = source_path(&record.file)?;
            decompress_stream(BufReader::new(File::open(src)?), &mut out, Some(window))?;
            out.flush()?;
        }

        let record = &mut records[index];
        let fs = match probe(self.runner, &raw) {
            Ok(fs) => fs,
            Err(e) => {
                warn!("partition {}: cannot probe filesystem: {e}", record.number);
                FsProbe::unknown()
            }
        };
        debug!(
            "partition {}: {} ({}) uuid {}",
            record.number,
            fs.fs_type,
            record.part_type.role_name(),
            fs.uuid
        );

        let mount_point = record.mount_point();
        let wants_mount = fs.is_known() && mount_point != SWAP_MOUNT_POINT;
        record.probe = Some(fs);

        if wants_mount {
            let mount = match LoopMount::new(self.runner, &raw, staging) {
                Ok(mount) => mount,
                Err(e) => {
                    warn!("partition {}: cannot mount, skipping inspection: {e}", record.number);
                    std::fs::remove_file(&raw)?;
                    return Ok(());
                }
            };
            if mount_point == "/" {
                inspect_root(self.runner, mount.path(), inspection);
            }
            if has_grub(mount.path()) {
                info!("GRUB found on partition {}", record.number);
                inspection.bootloader_found = true;
            }
            mount.unmount()?;
        }

        std::fs::remove_file(&raw)?;
        Ok(())
    }

    fn assemble(
        &self,
        disk_size: u64,
        regions: Vec<GptDiskRegion>,
        records: &[PartitionRecord],
        inspection: Inspection,
    ) -> Manifest {
        let os_arch = self.config.os_arch_override().unwrap_or_else(|| {
            if records.iter().any(|r| r.part_type == PartitionType::RootArm64) {
                OsArch::Arm64
            } else {
                OsArch::X86_64
            }
        });

        let mut manifest = Manifest::new(os_arch);
        manifest.os_release = inspection.os_release.unwrap_or_default();
        manifest.os_packages = inspection.packages;
        manifest.id = Some(Uuid::new_v4());
        manifest.bootloader = Some(Bootloader::grub());
        manifest.compression = Some(Compression {
            max_window_log: self.config.compression.window_log,
        });

        for record in records {
            let Some(fs) = record.probe.as_ref().filter(|fs| fs.is_known()) else {
                debug!("partition {} has no filesystem, region only", record.number);
                continue;
            };
            manifest.images.push(Image {
                image: record.file.clone(),
                mount_point: record.mount_point(),
                fs_type: fs.fs_type.clone(),
                fs_uuid: fs.uuid.clone(),
                part_type: record.part_type,
                verity: None,
            });
        }

        manifest.disk = Some(Disk {
            size: disk_size,
            disk_type: DiskType::Gpt,
            lba_size: LBA_SIZE as u32,
            gpt_regions: regions,
        });
        manifest
    }
}

fn source_path(file: &ImageFile) -> Result<&Path, CoreError> {
    match &file.source {
        Some(cosi_schema::ImageSource::File(path)) => Ok(path.as_path()),
        _ => Err(cosi_archive::ArchiveError::MissingSource(file.path.to_string()).into()),
    }
}

/// Copy exactly `len` bytes from `reader` into a new file at `dest`.
fn copy_exact<R: Read>(reader: R, dest: &Path, len: u64) -> Result<(), CoreError> {
    let mut out = BufWriter::new(File::create(dest)?);
    let copied = io::copy(&mut reader.take(len), &mut out)?;
    if copied != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{}: expected {len} bytes, source ended after {copied}", dest.display()),
        )
        .into());
    }
    out.flush()?;
    Ok(())
}

pub(crate) fn has_grub(mount: &Path) -> bool {
    GRUB_PATHS.iter().any(|p| mount.join(p).exists())
}

pub(crate) fn read_os_release(root: &Path) -> Option<String> {
    OS_RELEASE_PATHS
        .iter()
        .find_map(|p| std::fs::read_to_string(root.join(p)).ok())
}

fn inspect_root(runner: &dyn ToolRunner, root: &Path, inspection: &mut Inspection) {
    inspection.os_release = read_os_release(root);
    if inspection.os_release.is_none() {
        warn!("root filesystem has no os-release file");
    }
    inspection.packages = read_inventory(runner, root);
}

/// Package inventory of a mounted root. Failure leaves it empty.
pub(crate) fn read_inventory(runner: &dyn ToolRunner, root: &Path) -> Vec<OsPackage> {
    let Some(db) = find_rpmdb(root) else {
        warn!("no rpm database under {}, package list left empty", root.display());
        return Vec::new();
    };
    match read_packages(runner, &db) {
        Ok(packages) => {
            info!("found {} installed packages", packages.len());
            packages
        }
        Err(e) => {
            warn!("failed to read package database: {e}");
            Vec::new()
        }
    }
}
