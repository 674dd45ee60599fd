//! Raw byte layout of a container, for diagnostics.
//!
//! Unlike [`crate::CosiReader`] this never fails on a malformed archive: it
//! records what it could walk and keeps the error alongside.

use crate::reader::normalize_entry_name;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Tar block size. Headers and padded entry data are multiples of it.
pub const BLOCK_SIZE: u64 = 512;
const END_MARKER_LEN: u64 = 2 * BLOCK_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawEntry {
    pub index: usize,
    pub name: String,
    /// Tar type flag, `'0'` for regular files.
    pub entry_type: char,
    pub header_offset: u64,
    pub data_offset: u64,
    pub size: u64,
    pub padded_size: u64,
}

impl RawEntry {
    pub fn end_offset(&self) -> u64 {
        self.data_offset + self.padded_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawLayout {
    pub file_size: u64,
    pub entries: Vec<RawEntry>,
    /// Where the end-of-archive marker should start.
    pub expected_end_offset: u64,
    /// Offset of the two zero blocks, when they are where expected.
    pub end_of_archive: Option<u64>,
    /// Bytes after the end marker (or after the last entry when it is missing).
    pub trailing_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_error: Option<String>,
}

pub fn scan_layout(path: &Path) -> std::io::Result<RawLayout> {
    let file_size = std::fs::metadata(path)?.len();
    let mut entries = Vec::new();
    let scan_error = walk_entries(path, &mut entries).err().map(|e| e.to_string());

    let expected_end_offset = entries.last().map_or(0, RawEntry::end_offset);
    let end_of_archive = if has_zero_blocks(path, expected_end_offset, file_size)? {
        Some(expected_end_offset)
    } else {
        None
    };
    let consumed = match end_of_archive {
        Some(offset) => offset + END_MARKER_LEN,
        None => expected_end_offset,
    };

    debug!(
        "scanned {}: {} entries, end marker {:?}",
        path.display(),
        entries.len(),
        end_of_archive
    );
    Ok(RawLayout {
        file_size,
        entries,
        expected_end_offset,
        end_of_archive,
        trailing_bytes: file_size.saturating_sub(consumed),
        scan_error,
    })
}

fn walk_entries(path: &Path, out: &mut Vec<RawEntry>) -> std::io::Result<()> {
    let mut archive = tar::Archive::new(File::open(path)?);
    for (index, entry) in archive.entries_with_seek()?.enumerate() {
        let entry = entry?;
        let size = entry.size();
        out.push(RawEntry {
            index,
            name: normalize_entry_name(&entry.path()?.to_string_lossy()),
            entry_type: entry.header().entry_type().as_byte() as char,
            header_offset: entry.raw_header_position(),
            data_offset: entry.raw_file_position(),
            size,
            padded_size: size.div_ceil(BLOCK_SIZE) * BLOCK_SIZE,
        });
    }
    Ok(())
}

fn has_zero_blocks(path: &Path, offset: u64, file_size: u64) -> std::io::Result<bool> {
    if offset + END_MARKER_LEN > file_size {
        return Ok(false);
    }
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = [0u8; END_MARKER_LEN as usize];
    file.read_exact(&mut buf)?;
    Ok(buf.iter().all(|b| *b == 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tar(path: &Path, entries: &[(&str, usize)]) {
        let mut ar = tar::Builder::new(File::create(path).unwrap());
        for (name, len) in entries {
            let data = vec![7u8; *len];
            let mut header = tar::Header::new_gnu();
            header.set_size(*len as u64);
            header.set_mode(0o400);
            header.set_cksum();
            ar.append_data(&mut header, name, data.as_slice()).unwrap();
        }
        ar.finish().unwrap();
    }

    #[test]
    fn offsets_are_block_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cosi");
        write_tar(&path, &[("cosi-marker", 0), ("metadata.json", 700)]);

        let layout = scan_layout(&path).unwrap();
        assert_eq!(layout.entries.len(), 2);
        let meta = &layout.entries[1];
        assert_eq!(meta.name, "metadata.json");
        assert_eq!(meta.entry_type, '0');
        assert_eq!(meta.header_offset, 512);
        assert_eq!(meta.data_offset, 1024);
        assert_eq!(meta.padded_size, 1024);
        assert_eq!(layout.expected_end_offset, 2048);
        assert_eq!(layout.end_of_archive, Some(2048));
        assert!(layout.scan_error.is_none());
    }

    #[test]
    fn trailing_bytes_after_end_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cosi");
        write_tar(&path, &[("cosi-marker", 0)]);
        let base = std::fs::metadata(&path).unwrap().len();
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[0xAA; 512]).unwrap();

        let layout = scan_layout(&path).unwrap();
        assert_eq!(layout.file_size, base + 512);
        assert_eq!(layout.end_of_archive, Some(512));
        assert_eq!(layout.trailing_bytes, 512);
    }

    #[test]
    fn truncated_archive_reports_missing_end_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.cosi");
        write_tar(&path, &[("cosi-marker", 0), ("metadata.json", 10)]);
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(1536).unwrap();

        let layout = scan_layout(&path).unwrap();
        assert_eq!(layout.expected_end_offset, 1536);
        assert_eq!(layout.end_of_archive, None);
        assert_eq!(layout.trailing_bytes, 0);
    }
}
