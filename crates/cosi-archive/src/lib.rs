//! Container codec for composable OS image (COSI) files.
//!
//! A COSI file is an uncompressed tar stream: a zero-length `cosi-marker`
//! entry, the `metadata.json` manifest, then one zstd-compressed entry per
//! referenced image under `images/`. This crate writes that layout
//! (`write_cosi`), reads it back without loading images into memory
//! (`CosiReader`), re-derives the raw byte layout for diagnostics
//! (`scan_layout`), and provides the streaming compress-while-hashing
//! primitives used to produce image entries.

pub mod builder;
pub mod compress;
pub mod hashing;
pub mod layout;
pub mod output;
pub mod reader;

pub use builder::write_cosi;
pub use compress::{
    compress_file, compress_stream, decoder_window_log, decompress_stream, CompressedImage,
    CompressionSettings,
};
pub use hashing::{sha384_file, sha384_reader, CountingWriter, HashingWriter};
pub use layout::{scan_layout, RawEntry, RawLayout, BLOCK_SIZE};
pub use output::AtomicOutput;
pub use reader::{CosiReader, EntryLocation};

use cosi_schema::ManifestError;
use thiserror::Error;

/// Zero-length entry that identifies a container as COSI. Always first.
pub const MARKER_NAME: &str = "cosi-marker";
/// Manifest entry name.
pub const METADATA_NAME: &str = "metadata.json";
/// Mode bits for every entry: read-only for the owner.
pub const ENTRY_MODE: u32 = 0o400;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("container has no 'cosi-marker' entry")]
    MissingMarker,
    #[error("container has no 'metadata.json' entry")]
    MissingManifest,
    #[error("entry '{0}' appears more than once in the container")]
    DuplicateEntry(String),
    #[error("entry '{0}' not found in container")]
    EntryNotFound(String),
    #[error("size mismatch for '{path}': manifest declares {expected} bytes, found {actual}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },
    #[error("sha384 mismatch for '{path}': expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("path '{0}' is referenced with conflicting sizes or hashes")]
    ConflictingEntry(String),
    #[error("no source bytes attached for '{0}'")]
    MissingSource(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_mismatch_names_path_and_values() {
        let e = ArchiveError::SizeMismatch {
            path: "images/root.raw.zst".to_owned(),
            expected: 10,
            actual: 12,
        };
        let msg = e.to_string();
        assert!(msg.contains("images/root.raw.zst"));
        assert!(msg.contains("10"));
        assert!(msg.contains("12"));
    }

    #[test]
    fn missing_entries_name_the_entry() {
        assert!(ArchiveError::MissingMarker.to_string().contains("cosi-marker"));
        assert!(ArchiveError::MissingManifest
            .to_string()
            .contains("metadata.json"));
    }
}
