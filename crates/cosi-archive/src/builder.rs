use crate::hashing::CountingWriter;
use crate::{ArchiveError, ENTRY_MODE, MARKER_NAME, METADATA_NAME};
use cosi_schema::{ImageFile, ImageSource, Manifest};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use tracing::{debug, info};

/// Write a complete container for `manifest` to `writer`.
///
/// Every referenced image must carry a `source`. Entries are written as the
/// marker, the manifest, then each distinct image path in
/// [`Manifest::referenced_files`] order. Returns the number of bytes written,
/// including the end-of-archive blocks.
pub fn write_cosi<W: Write>(writer: W, manifest: &Manifest) -> Result<u64, ArchiveError> {
    manifest.validate()?;
    let plan = plan_entries(manifest)?;
    let json = manifest.to_json_pretty()?;

    let mut ar = tar::Builder::new(CountingWriter::new(writer));
    append_bytes(&mut ar, MARKER_NAME, &[])?;
    append_bytes(&mut ar, METADATA_NAME, json.as_bytes())?;

    for file in plan {
        append_image(&mut ar, file)?;
    }

    let mut counting = ar.into_inner()?;
    counting.flush()?;
    let written = counting.count();
    info!(
        "wrote container with {} images ({written} bytes)",
        manifest.images.len()
    );
    Ok(written)
}

/// Deduplicate shared paths, rejecting references that disagree.
fn plan_entries(manifest: &Manifest) -> Result<Vec<&ImageFile>, ArchiveError> {
    let mut seen: HashMap<&str, &ImageFile> = HashMap::new();
    let mut plan = Vec::new();
    for file in manifest.referenced_files() {
        match seen.get(file.path.as_str()) {
            Some(prev) if *prev == file => {}
            Some(_) => return Err(ArchiveError::ConflictingEntry(file.path.to_string())),
            None => {
                seen.insert(file.path.as_str(), file);
                plan.push(file);
            }
        }
    }
    Ok(plan)
}

fn make_header(size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(ENTRY_MODE);
    header.set_size(size);
    header
}

fn append_bytes<W: Write>(
    ar: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
) -> Result<(), ArchiveError> {
    let mut header = make_header(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, path, data)?;
    Ok(())
}

fn append_image<W: Write>(ar: &mut tar::Builder<W>, file: &ImageFile) -> Result<(), ArchiveError> {
    let source = file
        .source
        .as_ref()
        .ok_or_else(|| ArchiveError::MissingSource(file.path.to_string()))?;

    let (reader, actual) = open_source(source)?;
    // The tar writer trusts the header size, so a stale manifest would
    // corrupt every entry after this one.
    if actual != file.compressed_size {
        return Err(ArchiveError::SizeMismatch {
            path: file.path.to_string(),
            expected: file.compressed_size,
            actual,
        });
    }

    debug!("adding {} ({actual} bytes)", file.path);
    let mut header = make_header(actual);
    header.set_cksum();
    ar.append_data(&mut header, file.path.as_str(), reader.take(actual))?;
    Ok(())
}

fn open_source(source: &ImageSource) -> Result<(BufReader<File>, u64), ArchiveError> {
    match source {
        ImageSource::File(path) => {
            let file = File::open(path)?;
            let len = file.metadata()?.len();
            Ok((BufReader::new(file), len))
        }
        ImageSource::Slice { file, offset, len } => {
            let mut f = File::open(file)?;
            let total = f.metadata()?.len();
            let available = total.saturating_sub(*offset).min(*len);
            f.seek(SeekFrom::Start(*offset))?;
            Ok((BufReader::new(f), available))
        }
    }
}
