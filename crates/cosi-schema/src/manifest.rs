use crate::partition_type::PartitionType;
use crate::types::{ImagePath, Sha384Hash};
use crate::version::MetadataVersion;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Default zstd window log used when compressing images.
pub const DEFAULT_WINDOW_LOG: u32 = 22;

/// Directory (under `images/`) holding auxiliary files.
pub const AUXILIARY_DIR: &str = "images/auxiliary/";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid metadata version '{0}', expected '<major>.<minor>'")]
    InvalidVersion(String),
    #[error("unsupported metadata version {0}, expected 1.x")]
    UnsupportedVersion(MetadataVersion),
    #[error("image path '{0}' is not under images/")]
    InvalidImagePath(String),
    #[error("image path '{0}' is referenced by more than one filesystem")]
    DuplicatePath(String),
    #[error("mount point '{0}' is declared more than once")]
    DuplicateMountPoint(String),
    #[error("invalid auxiliary file name '{0}'")]
    InvalidAuxiliaryName(String),
    #[error("auxiliary file '{0}' is declared more than once")]
    DuplicateAuxiliaryName(String),
}

/// Root document stored as `metadata.json` inside a container.
///
/// Unknown fields are ignored on read so newer writers stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: MetadataVersion,
    pub os_arch: OsArch,
    #[serde(default)]
    pub os_release: String,
    pub images: Vec<Image>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub os_packages: Vec<OsPackage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<Disk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootloader: Option<Bootloader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auxiliary_files: Vec<AuxiliaryFile>,
}

/// One mountable filesystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub image: ImageFile,
    pub mount_point: String,
    pub fs_type: String,
    pub fs_uuid: String,
    pub part_type: PartitionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verity: Option<Verity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verity {
    pub image: ImageFile,
    pub roothash: String,
}

/// A compressed payload stored in the container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFile {
    pub path: ImagePath,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha384: Option<Sha384Hash>,
    /// Where the compressed bytes live while a container is being built.
    #[serde(skip)]
    pub source: Option<ImageSource>,
}

// `source` is bookkeeping for the writer, not part of the document.
impl PartialEq for ImageFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.compressed_size == other.compressed_size
            && self.uncompressed_size == other.uncompressed_size
            && self.sha384 == other.sha384
    }
}

/// Backing bytes for an [`ImageFile`] during generation or mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// A standalone staging file holding exactly the compressed bytes.
    File(PathBuf),
    /// A byte range inside another file, typically an existing container.
    Slice { file: PathBuf, offset: u64, len: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsPackage {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsArch {
    #[default]
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "arm64")]
    Arm64,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for OsArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X86_64 => f.write_str("x86_64"),
            Self::Arm64 => f.write_str("arm64"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

impl From<&str> for OsArch {
    fn from(s: &str) -> Self {
        match s {
            "x86_64" | "amd64" => Self::X86_64,
            "arm64" | "aarch64" => Self::Arm64,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Physical layout of the source disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub size: u64,
    #[serde(rename = "type")]
    pub disk_type: DiskType,
    pub lba_size: u32,
    pub gpt_regions: Vec<GptDiskRegion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskType {
    Gpt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GptDiskRegion {
    pub image: ImageFile,
    #[serde(rename = "type")]
    pub region_type: RegionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionType {
    PrimaryGpt,
    Partition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compression {
    pub max_window_log: u32,
}

impl Default for Compression {
    fn default() -> Self {
        Self {
            max_window_log: DEFAULT_WINDOW_LOG,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bootloader {
    #[serde(rename = "type")]
    pub bootloader_type: BootloaderType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systemd_boot: Option<SystemdBoot>,
}

impl Bootloader {
    pub fn grub() -> Self {
        Self {
            bootloader_type: BootloaderType::Grub,
            systemd_boot: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootloaderType {
    Grub,
    SystemdBoot,
    #[serde(untagged)]
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemdBoot {
    pub entries: Vec<SystemdBootEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemdBootEntry {
    #[serde(rename = "type")]
    pub entry_type: String,
    pub kernel: String,
    pub path: String,
    pub cmdline: String,
}

/// A file carried verbatim alongside the filesystem images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryFile {
    pub name: String,
    pub image: ImageFile,
}

impl Manifest {
    /// Empty manifest at the current schema version.
    pub fn new(os_arch: OsArch) -> Self {
        Self {
            version: MetadataVersion::CURRENT,
            os_arch,
            os_release: String::new(),
            images: Vec::new(),
            os_packages: Vec::new(),
            id: None,
            disk: None,
            bootloader: None,
            compression: None,
            auxiliary_files: Vec::new(),
        }
    }

    /// Every file the container must carry, in write order: disk regions,
    /// then filesystem and verity images, then auxiliary files.
    ///
    /// Paths may repeat; a region and a filesystem image often share one.
    pub fn referenced_files(&self) -> Vec<&ImageFile> {
        let mut files = Vec::new();
        if let Some(disk) = &self.disk {
            files.extend(disk.gpt_regions.iter().map(|r| &r.image));
        }
        for image in &self.images {
            files.push(&image.image);
            if let Some(verity) = &image.verity {
                files.push(&verity.image);
            }
        }
        files.extend(self.auxiliary_files.iter().map(|a| &a.image));
        files
    }

    /// Mutable variant of [`Manifest::referenced_files`], same order.
    pub fn referenced_files_mut(&mut self) -> Vec<&mut ImageFile> {
        let mut files = Vec::new();
        if let Some(disk) = &mut self.disk {
            files.extend(disk.gpt_regions.iter_mut().map(|r| &mut r.image));
        }
        for image in &mut self.images {
            files.push(&mut image.image);
            if let Some(verity) = &mut image.verity {
                files.push(&mut verity.image);
            }
        }
        files.extend(self.auxiliary_files.iter_mut().map(|a| &mut a.image));
        files
    }

    pub fn image_by_mount_point(&self, mount_point: &str) -> Option<&Image> {
        self.images.iter().find(|i| i.mount_point == mount_point)
    }

    /// Collect every structural problem instead of stopping at the first.
    pub fn problems(&self) -> Vec<ManifestError> {
        let mut problems = Vec::new();

        if !self.version.is_supported() {
            problems.push(ManifestError::UnsupportedVersion(self.version));
        }

        for file in self.referenced_files() {
            if !file.path.is_under_images_dir() {
                problems.push(ManifestError::InvalidImagePath(file.path.to_string()));
            }
        }

        let mut paths = HashSet::new();
        let mut mount_points = HashSet::new();
        for image in &self.images {
            if !paths.insert(image.image.path.as_str()) {
                problems.push(ManifestError::DuplicatePath(image.image.path.to_string()));
            }
            if let Some(verity) = &image.verity {
                if !paths.insert(verity.image.path.as_str()) {
                    problems.push(ManifestError::DuplicatePath(verity.image.path.to_string()));
                }
            }
            if !mount_points.insert(image.mount_point.as_str()) {
                problems.push(ManifestError::DuplicateMountPoint(image.mount_point.clone()));
            }
        }

        let mut names = HashSet::new();
        for aux in &self.auxiliary_files {
            if !is_valid_auxiliary_name(&aux.name) {
                problems.push(ManifestError::InvalidAuxiliaryName(aux.name.clone()));
            }
            if !names.insert(aux.name.as_str()) {
                problems.push(ManifestError::DuplicateAuxiliaryName(aux.name.clone()));
            }
        }

        problems
    }

    /// Fail on the first structural problem.
    pub fn validate(&self) -> Result<(), ManifestError> {
        match self.problems().into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(()),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Auxiliary names become a single path component under `images/auxiliary/`.
pub fn is_valid_auxiliary_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}

pub fn auxiliary_path(name: &str) -> ImagePath {
    ImagePath::new(format!("{AUXILIARY_DIR}{name}"))
}

/// Parse a manifest document. Rejects major versions other than 1.
pub fn parse_manifest_slice(input: &[u8]) -> Result<Manifest, ManifestError> {
    let manifest: Manifest = serde_json::from_slice(input)?;
    if !manifest.version.is_supported() {
        return Err(ManifestError::UnsupportedVersion(manifest.version));
    }
    Ok(manifest)
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    parse_manifest_slice(input.as_bytes())
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read(path)?;
    parse_manifest_slice(&content)
}
