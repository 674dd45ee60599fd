use crate::compress::decoder_window_log;
use crate::hashing::sha384_reader;
use crate::{ArchiveError, MARKER_NAME, METADATA_NAME};
use cosi_schema::{parse_manifest_slice, ImageFile, ImageSource, Manifest};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Take};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Manifests larger than this are rejected rather than buffered.
const MAX_MANIFEST_SIZE: u64 = 64 * 1024 * 1024;

/// Position of an entry's data inside the container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub offset: u64,
    pub size: u64,
}

/// An opened container.
///
/// Opening scans the tar headers once, parses the manifest, and remembers
/// where every entry's bytes live. Image data is only read on demand.
#[derive(Debug)]
pub struct CosiReader {
    path: PathBuf,
    manifest: Manifest,
    entries: BTreeMap<String, EntryLocation>,
    marker_first: bool,
}

impl CosiReader {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        let mut archive = tar::Archive::new(file);

        let mut entries = BTreeMap::new();
        let mut first_name = None;
        let mut metadata = None;

        for entry in archive.entries_with_seek()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = normalize_entry_name(&entry.path()?.to_string_lossy());
            first_name.get_or_insert_with(|| name.clone());

            let location = EntryLocation {
                offset: entry.raw_file_position(),
                size: entry.size(),
            };

            if name == METADATA_NAME {
                if location.size > MAX_MANIFEST_SIZE {
                    return Err(ArchiveError::SizeMismatch {
                        path: METADATA_NAME.to_owned(),
                        expected: MAX_MANIFEST_SIZE,
                        actual: location.size,
                    });
                }
                let mut buf = Vec::with_capacity(location.size as usize);
                entry.read_to_end(&mut buf)?;
                metadata = Some(buf);
            }

            if entries.insert(name.clone(), location).is_some() {
                return Err(ArchiveError::DuplicateEntry(name));
            }
        }

        let metadata = metadata.ok_or(ArchiveError::MissingManifest)?;
        let manifest = parse_manifest_slice(&metadata)?;

        let marker_first = first_name.as_deref() == Some(MARKER_NAME);
        if !entries.contains_key(MARKER_NAME) {
            if manifest.version.requires_marker() {
                return Err(ArchiveError::MissingMarker);
            }
            debug!(
                "{} has no marker entry (metadata version {})",
                path.display(),
                manifest.version
            );
        } else if !marker_first {
            warn!("{}: marker entry is not the first entry", path.display());
        }

        debug!(
            "opened {} with {} entries, {} images",
            path.display(),
            entries.len(),
            manifest.images.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            entries,
            marker_first,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn marker_first(&self) -> bool {
        self.marker_first
    }

    /// All regular-file entries keyed by normalized path.
    pub fn entries(&self) -> &BTreeMap<String, EntryLocation> {
        &self.entries
    }

    pub fn location(&self, path: &str) -> Result<EntryLocation, ArchiveError> {
        self.entries
            .get(path)
            .copied()
            .ok_or_else(|| ArchiveError::EntryNotFound(path.to_owned()))
    }

    /// Raw (still compressed) bytes of an entry.
    pub fn open_entry(&self, path: &str) -> Result<Take<BufReader<File>>, ArchiveError> {
        let location = self.location(path)?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(location.offset))?;
        Ok(BufReader::new(file).take(location.size))
    }

    /// Decompressed bytes of an image entry.
    pub fn open_image(
        &self,
        image: &ImageFile,
    ) -> Result<zstd::stream::read::Decoder<'static, BufReader<Take<BufReader<File>>>>, ArchiveError>
    {
        let raw = self.open_entry(image.path.as_str())?;
        let mut decoder = zstd::stream::read::Decoder::new(raw)?;
        let window = self.manifest.compression.map(|c| c.max_window_log);
        decoder.window_log_max(decoder_window_log(window))?;
        Ok(decoder)
    }

    /// Check an entry's size and, when recorded, its SHA-384.
    pub fn verify_image(&self, image: &ImageFile) -> Result<(), ArchiveError> {
        let location = self.location(image.path.as_str())?;
        if location.size != image.compressed_size {
            return Err(ArchiveError::SizeMismatch {
                path: image.path.to_string(),
                expected: image.compressed_size,
                actual: location.size,
            });
        }
        if let Some(expected) = &image.sha384 {
            let (_, actual) = sha384_reader(self.open_entry(image.path.as_str())?)?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(ArchiveError::HashMismatch {
                    path: image.path.to_string(),
                    expected: expected.to_string(),
                    actual: actual.into_inner(),
                });
            }
        }
        Ok(())
    }

    /// Clone the manifest with every referenced file backed by its bytes in
    /// this container, ready to be written into a new one.
    pub fn manifest_with_sources(&self) -> Result<Manifest, ArchiveError> {
        let mut manifest = self.manifest.clone();
        for file in manifest.referenced_files_mut() {
            let location = self.location(file.path.as_str())?;
            if location.size != file.compressed_size {
                return Err(ArchiveError::SizeMismatch {
                    path: file.path.to_string(),
                    expected: file.compressed_size,
                    actual: location.size,
                });
            }
            file.source = Some(ImageSource::Slice {
                file: self.path.clone(),
                offset: location.offset,
                len: location.size,
            });
        }
        Ok(manifest)
    }
}

/// Strip a leading `./` so entries written by different tar tools compare equal.
pub(crate) fn normalize_entry_name(name: &str) -> String {
    name.strip_prefix("./").unwrap_or(name).to_owned()
}
