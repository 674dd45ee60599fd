//! Streaming zstd compression with the digest computed over the compressed
//! bytes as they are written, in a single pass.

use crate::hashing::HashingWriter;
use crate::ArchiveError;
use cosi_schema::{ImageFile, ImagePath, ImageSource, Sha384Hash, DEFAULT_WINDOW_LOG};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Smallest window log the decoder accepts, whatever the manifest says.
const MIN_DECODER_WINDOW_LOG: u32 = 30;
const MAX_DECODER_WINDOW_LOG: u32 = 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CompressionSettings {
    pub level: i32,
    pub window_log: u32,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
            window_log: DEFAULT_WINDOW_LOG,
        }
    }
}

/// Sizes and digest of a freshly compressed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub sha384: Sha384Hash,
}

impl CompressedImage {
    /// Describe the image as a manifest entry backed by `staged`.
    pub fn into_image_file(self, path: ImagePath, staged: &Path) -> ImageFile {
        ImageFile {
            path,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            sha384: Some(self.sha384),
            source: Some(ImageSource::File(staged.to_path_buf())),
        }
    }
}

/// Compress everything `reader` yields into a new file at `dest`.
pub fn compress_stream<R: Read>(
    reader: R,
    dest: &Path,
    settings: CompressionSettings,
) -> Result<CompressedImage, ArchiveError> {
    let out = BufWriter::new(File::create(dest)?);
    let mut encoder = zstd::stream::write::Encoder::new(HashingWriter::new(out), settings.level)?;
    encoder.window_log(settings.window_log)?;

    let mut reader = reader;
    let uncompressed_size = io::copy(&mut reader, &mut encoder)?;
    let hashing = encoder.finish()?;
    let (mut out, sha384, compressed_size) = hashing.finish();
    out.flush()?;
    out.get_ref().sync_all()?;

    debug!(
        "compressed {uncompressed_size} bytes to {compressed_size} at {}",
        dest.display()
    );
    Ok(CompressedImage {
        compressed_size,
        uncompressed_size,
        sha384,
    })
}

pub fn compress_file(
    source: &Path,
    dest: &Path,
    settings: CompressionSettings,
) -> Result<CompressedImage, ArchiveError> {
    compress_stream(BufReader::new(File::open(source)?), dest, settings)
}

/// Window log limit to hand the decoder for a container compressed with `max_window_log`.
pub fn decoder_window_log(max_window_log: Option<u32>) -> u32 {
    max_window_log
        .unwrap_or(DEFAULT_WINDOW_LOG)
        .max(MIN_DECODER_WINDOW_LOG)
        .min(MAX_DECODER_WINDOW_LOG)
}

/// Decompress `reader` into `writer`, returning the number of bytes produced.
pub fn decompress_stream<R: Read, W: Write>(
    reader: R,
    writer: &mut W,
    max_window_log: Option<u32>,
) -> Result<u64, ArchiveError> {
    let mut decoder = zstd::stream::read::Decoder::new(reader)?;
    decoder.window_log_max(decoder_window_log(max_window_log))?;
    Ok(io::copy(&mut decoder, writer)?)
}
