//! Orchestration layer for composable OS image (COSI) containers.
//!
//! This crate ties the disk parser, the container codec, and the external
//! tool boundary together: the `Generator` turns a GPT disk image into a
//! container, the `DirectoryBuilder` assembles one from pre-compressed
//! images laid out per a `LayoutVariant`, `explain` re-derives and
//! cross-checks a container's byte layout, and `mutate` rebuilds containers
//! after editing their manifest.

pub mod concurrency;
pub mod config;
pub mod explain;
pub mod generator;
pub mod mutate;
pub mod staging;
pub mod variants;

pub use concurrency::{check_interrupted, install_signal_handler, shutdown_requested};
pub use config::GeneratorConfig;
pub use explain::{explain, Category, ExplainOptions, ExplainReport, Finding, Severity};
pub use generator::Generator;
pub use mutate::{append_vhd_footer, delete_mount_points, insert_auxiliary, randomize_fs_uuid};
pub use staging::StagedContainer;
pub use variants::{DirectoryBuilder, ExpectedImage, LayoutVariant};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] cosi_schema::ManifestError),
    #[error("disk error: {0}")]
    Disk(#[from] cosi_disk::DiskError),
    #[error("container error: {0}")]
    Archive(#[from] cosi_archive::ArchiveError),
    #[error("tool error: {0}")]
    Tool(#[from] cosi_tools::ToolError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("mount point '{0}' not found in manifest")]
    MountPointNotFound(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("no GRUB bootloader found on the ESP or the root filesystem")]
    BootloaderNotFound,
    #[error("interrupted")]
    Interrupted,
    #[error("auxiliary file '{0}' already exists in the container")]
    AuxiliaryExists(String),
    #[error("output {} must differ from the source container", .0.display())]
    SameSourceAndOutput(PathBuf),
    #[error("expected image {} not found", .0.display())]
    MissingImage(PathBuf),
    #[error("no roothash= argument in {}", .0.display())]
    RoothashNotFound(PathBuf),
}
