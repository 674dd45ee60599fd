//! Containers assembled from a directory of pre-compressed filesystem images.
//!
//! Each layout variant is a fixed table of the images it expects, so adding
//! a variant means adding rows, not code.

use crate::concurrency::check_interrupted;
use crate::generator::{read_inventory, read_os_release};
use crate::staging::{staging_dir, StagedContainer};
use crate::CoreError;
use cosi_archive::{decompress_stream, sha384_file};
use cosi_schema::{
    Image, ImageFile, ImagePath, ImageSource, Manifest, MetadataVersion, OsArch, PartitionType,
    Verity,
};
use cosi_tools::{probe, LoopMount, ToolRunner};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const DEFAULT_EXTENSION: &str = "rawzst";
const GRUB_CFG: &str = "grub2/grub.cfg";

/// One image a layout variant expects to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectedImage {
    pub name: &'static str,
    pub part_type: PartitionType,
    pub mount_point: &'static str,
    pub os_release: bool,
    pub grub_cfg: bool,
    pub rpm_db: bool,
    /// Name of the verity hash-tree image paired with this filesystem.
    pub verity: Option<&'static str>,
}

const fn plain(name: &'static str, part_type: PartitionType, mount_point: &'static str) -> ExpectedImage {
    ExpectedImage {
        name,
        part_type,
        mount_point,
        os_release: false,
        grub_cfg: false,
        rpm_db: false,
        verity: None,
    }
}

const REGULAR: &[ExpectedImage] = &[
    plain("esp", PartitionType::Esp, "/boot/efi"),
    ExpectedImage {
        os_release: true,
        rpm_db: true,
        ..plain("root", PartitionType::RootAmd64, "/")
    },
];

const VERITY: &[ExpectedImage] = &[
    plain("esp", PartitionType::Esp, "/boot/efi"),
    ExpectedImage {
        grub_cfg: true,
        ..plain("boot", PartitionType::Xbootldr, "/boot")
    },
    ExpectedImage {
        os_release: true,
        verity: Some("root-hash"),
        ..plain("root", PartitionType::RootAmd64, "/")
    },
    plain("var", PartitionType::Var, "/var"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutVariant {
    Regular,
    Verity,
}

impl LayoutVariant {
    pub const ALL: [LayoutVariant; 2] = [LayoutVariant::Regular, LayoutVariant::Verity];

    pub fn images(self) -> &'static [ExpectedImage] {
        match self {
            Self::Regular => REGULAR,
            Self::Verity => VERITY,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::Verity => "verity",
        }
    }
}

impl fmt::Display for LayoutVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LayoutVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.name() == s)
            .ok_or_else(|| format!("unknown layout variant '{s}', expected regular or verity"))
    }
}

/// Facts gathered from mounting an image.
#[derive(Debug, Default)]
struct Findings {
    os_release: Option<String>,
    roothash: Option<String>,
    packages: Vec<cosi_schema::OsPackage>,
}

pub struct DirectoryBuilder<'a> {
    runner: &'a dyn ToolRunner,
    scratch: PathBuf,
    extension: String,
}

impl<'a> DirectoryBuilder<'a> {
    pub fn new(runner: &'a dyn ToolRunner, scratch: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            scratch: scratch.into(),
            extension: DEFAULT_EXTENSION.to_owned(),
        }
    }

    #[must_use]
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_owned();
        self
    }

    fn image_path(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.{}", self.extension))
    }

    pub fn build(&self, variant: LayoutVariant, dir: &Path) -> Result<StagedContainer, CoreError> {
        info!("building {variant} container from {}", dir.display());
        for expected in variant.images() {
            for name in std::iter::once(expected.name).chain(expected.verity) {
                let path = self.image_path(dir, name);
                if !path.is_file() {
                    return Err(CoreError::MissingImage(path));
                }
            }
        }

        let staging = staging_dir(&self.scratch, "cosi-build-")?;
        let mut manifest = Manifest::new(OsArch::X86_64);
        manifest.version = MetadataVersion::V1_0;
        let mut findings = Findings::default();
        let mut grub_cfg = None;

        for expected in variant.images() {
            check_interrupted()?;
            let source = self.image_path(dir, expected.name);
            let (file, raw) = self.describe(&source, expected.name, staging.path())?;
            if expected.grub_cfg {
                grub_cfg = Some(source.join(GRUB_CFG));
            }

            let fs = probe(self.runner, &raw)?;
            debug!("{}: {} uuid {}", expected.name, fs.fs_type, fs.uuid);
            if expected.os_release || expected.grub_cfg || expected.rpm_db {
                let mount = LoopMount::new(self.runner, &raw, staging.path())?;
                self.inspect(expected, mount.path(), &mut findings);
                mount.unmount()?;
            }
            std::fs::remove_file(&raw)?;

            let verity = match expected.verity {
                Some(name) => {
                    let (hash_file, hash_raw) =
                        self.describe(&self.image_path(dir, name), name, staging.path())?;
                    std::fs::remove_file(&hash_raw)?;
                    Some(Verity {
                        image: hash_file,
                        roothash: String::new(),
                    })
                }
                None => None,
            };

            manifest.images.push(Image {
                image: file,
                mount_point: expected.mount_point.to_owned(),
                fs_type: fs.fs_type,
                fs_uuid: fs.uuid,
                part_type: expected.part_type,
                verity,
            });
        }

        // The roothash lives in the boot partition's grub.cfg, which may be
        // processed after the filesystem it protects.
        for image in &mut manifest.images {
            if let Some(verity) = &mut image.verity {
                verity.roothash = match &findings.roothash {
                    Some(hash) => hash.clone(),
                    None => {
                        return Err(CoreError::RoothashNotFound(
                            grub_cfg.clone().unwrap_or_else(|| dir.to_path_buf()),
                        ))
                    }
                };
            }
        }

        manifest.os_release = findings.os_release.unwrap_or_default();
        manifest.os_packages = findings.packages;
        manifest.validate()?;
        info!("{variant} manifest ready with {} images", manifest.images.len());
        Ok(StagedContainer::new(manifest, staging))
    }

    /// Hash a compressed image in place and decompress it to measure it.
    /// Returns the manifest entry and the path of the decompressed copy.
    fn describe(
        &self,
        source: &Path,
        name: &str,
        staging: &Path,
    ) -> Result<(ImageFile, PathBuf), CoreError> {
        let (compressed_size, sha384) = sha384_file(source)?;
        let raw = staging.join(format!("{name}.raw"));
        let mut out = BufWriter::new(File::create(&raw)?);
        let uncompressed_size = decompress_stream(BufReader::new(File::open(source)?), &mut out, None)?;
        out.flush()?;

        let file = ImageFile {
            path: ImagePath::new(format!("images/{name}.{}", self.extension)),
            compressed_size,
            uncompressed_size,
            sha384: Some(sha384),
            source: Some(ImageSource::File(source.to_path_buf())),
        };
        Ok((file, raw))
    }

    fn inspect(&self, expected: &ExpectedImage, mount: &Path, findings: &mut Findings) {
        if expected.os_release {
            findings.os_release = read_os_release(mount);
            if findings.os_release.is_none() {
                warn!("{}: no os-release file", expected.name);
            }
        }
        if expected.rpm_db {
            findings.packages = read_inventory(self.runner, mount);
        }
        if expected.grub_cfg {
            match std::fs::read_to_string(mount.join(GRUB_CFG)) {
                Ok(cfg) => findings.roothash = parse_roothash(&cfg),
                Err(e) => warn!("{}: cannot read {GRUB_CFG}: {e}", expected.name),
            }
        }
    }
}

/// Value of the first `roothash=` kernel argument in a GRUB config.
pub fn parse_roothash(cfg: &str) -> Option<String> {
    cfg.split_whitespace()
        .find_map(|token| token.strip_prefix("roothash="))
        .map(|v| v.trim_matches(|c| c == '"' || c == '\'').to_owned())
        .filter(|v| !v.is_empty())
}
