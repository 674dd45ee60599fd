//! Manifest model for composable OS image (COSI) containers.
//!
//! This crate defines the schema shared by every other layer: the `Manifest`
//! document stored as `metadata.json`, its versioning (`MetadataVersion`),
//! the closed set of GPT partition-type roles (`PartitionType`), and string
//! newtypes for container paths and digests.

pub mod manifest;
pub mod partition_type;
pub mod types;
pub mod version;

pub use manifest::{
    auxiliary_path, is_valid_auxiliary_name, parse_manifest_file, parse_manifest_slice,
    parse_manifest_str, AuxiliaryFile, Bootloader, BootloaderType, Compression, Disk, DiskType,
    GptDiskRegion, Image, ImageFile, ImageSource, Manifest, ManifestError, OsArch, OsPackage,
    RegionType, SystemdBoot, SystemdBootEntry, Verity, AUXILIARY_DIR, DEFAULT_WINDOW_LOG,
};
pub use partition_type::{PartitionType, SWAP_MOUNT_POINT};
pub use types::{ImagePath, Sha384Hash, IMAGES_DIR};
pub use version::MetadataVersion;
