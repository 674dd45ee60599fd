//! Package inventory from an rpm sqlite database.
//!
//! Header blobs are fetched with the `sqlite3` shell as hex text and decoded
//! here; no package manager runs against the image.

use crate::runner::{path_arg, run_checked, ToolRunner};
use crate::ToolError;
use cosi_schema::OsPackage;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Database locations relative to a mounted root filesystem, in lookup order.
pub const RPMDB_PATHS: &[&str] = &[
    "var/lib/rpm/rpmdb.sqlite",
    "usr/lib/sysimage/rpm/rpmdb.sqlite",
];

const QUERY: &str = "SELECT hex(blob) FROM Packages";

const HEADER_MAGIC: [u8; 4] = [0x8e, 0xad, 0xe8, 0x01];
const INDEX_ENTRY_LEN: usize = 16;
// Limits rpm itself enforces on header size.
const MAX_INDEX_ENTRIES: usize = 0x0000_ffff;
const MAX_DATA_LEN: usize = 256 * 1024 * 1024;

const TAG_NAME: i32 = 1000;
const TAG_VERSION: i32 = 1001;
const TAG_RELEASE: i32 = 1002;
const TAG_ARCH: i32 = 1022;

const TYPE_STRING: u32 = 6;
const TYPE_STRING_ARRAY: u32 = 8;
const TYPE_I18NSTRING: u32 = 9;

pub fn find_rpmdb(root: &Path) -> Option<PathBuf> {
    RPMDB_PATHS
        .iter()
        .map(|rel| root.join(rel))
        .find(|p| p.is_file())
}

/// Read every package in the database, sorted by name.
pub fn read_packages(runner: &dyn ToolRunner, db: &Path) -> Result<Vec<OsPackage>, ToolError> {
    let out = run_checked(runner, "sqlite3", &["-readonly", path_arg(db)?, QUERY])?;
    let mut packages = Vec::new();
    for line in out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let blob = hex::decode(line)
            .map_err(|e| ToolError::parse("rpm header blob", e.to_string()))?;
        packages.push(parse_header_blob(&blob)?);
    }
    packages.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.version.cmp(&b.version)));
    debug!("read {} packages from {}", packages.len(), db.display());
    Ok(packages)
}

/// Decode name, version, release and arch from one rpm header blob.
///
/// Layout: big-endian index entry count and data length, the index entries
/// (tag, type, offset, count), then the data store the offsets point into.
/// A leading header magic is tolerated.
pub fn parse_header_blob(blob: &[u8]) -> Result<OsPackage, ToolError> {
    let blob = match blob.get(..4) {
        Some(m) if m == HEADER_MAGIC => blob.get(8..).unwrap_or_default(),
        _ => blob,
    };

    let index_len = read_u32(blob, 0)? as usize;
    let data_len = read_u32(blob, 4)? as usize;
    if index_len > MAX_INDEX_ENTRIES || data_len > MAX_DATA_LEN {
        return Err(bad(format!(
            "implausible header ({index_len} entries, {data_len} data bytes)"
        )));
    }
    let data_start = 8 + index_len * INDEX_ENTRY_LEN;
    let data = blob
        .get(data_start..data_start + data_len)
        .ok_or_else(|| bad("header shorter than declared".to_owned()))?;

    let mut name = None;
    let mut version = None;
    let mut release = None;
    let mut arch = None;

    for i in 0..index_len {
        let at = 8 + i * INDEX_ENTRY_LEN;
        let tag = read_u32(blob, at)? as i32;
        let slot = match tag {
            TAG_NAME => &mut name,
            TAG_VERSION => &mut version,
            TAG_RELEASE => &mut release,
            TAG_ARCH => &mut arch,
            _ => continue,
        };
        let kind = read_u32(blob, at + 4)?;
        if !matches!(kind, TYPE_STRING | TYPE_STRING_ARRAY | TYPE_I18NSTRING) {
            return Err(bad(format!("tag {tag} has non-string type {kind}")));
        }
        let offset = read_u32(blob, at + 8)? as usize;
        *slot = Some(read_cstr(data, offset)?);
    }

    Ok(OsPackage {
        name: name.ok_or_else(|| bad("missing name tag".to_owned()))?,
        version: version.ok_or_else(|| bad("missing version tag".to_owned()))?,
        release,
        arch,
    })
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, ToolError> {
    buf.get(at..at + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| bad(format!("truncated at byte {at}")))
}

fn read_cstr(data: &[u8], offset: usize) -> Result<String, ToolError> {
    let tail = data
        .get(offset..)
        .ok_or_else(|| bad(format!("string offset {offset} out of range")))?;
    let end = tail
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| bad(format!("unterminated string at {offset}")))?;
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

fn bad(reason: String) -> ToolError {
    ToolError::parse("rpm header", reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunner;
    use crate::runner::ToolOutput;

    /// Build a header blob carrying the given string tags.
    fn header(tags: &[(i32, &str)]) -> Vec<u8> {
        let mut index = Vec::new();
        let mut data = Vec::new();
        for (tag, value) in tags {
            index.extend_from_slice(&(*tag as u32).to_be_bytes());
            index.extend_from_slice(&TYPE_STRING.to_be_bytes());
            index.extend_from_slice(&(data.len() as u32).to_be_bytes());
            index.extend_from_slice(&1u32.to_be_bytes());
            data.extend_from_slice(value.as_bytes());
            data.push(0);
        }
        let mut blob = Vec::new();
        blob.extend_from_slice(&(tags.len() as u32).to_be_bytes());
        blob.extend_from_slice(&(data.len() as u32).to_be_bytes());
        blob.extend(index);
        blob.extend(data);
        blob
    }

    fn bash() -> Vec<u8> {
        header(&[
            (TAG_NAME, "bash"),
            (TAG_VERSION, "5.2.15"),
            (TAG_RELEASE, "5.azl3"),
            (1004, "The GNU Bourne Again shell"),
            (TAG_ARCH, "x86_64"),
        ])
    }

    #[test]
    fn header_fields_are_decoded() {
        let p = parse_header_blob(&bash()).unwrap();
        assert_eq!(p.name, "bash");
        assert_eq!(p.version, "5.2.15");
        assert_eq!(p.release.as_deref(), Some("5.azl3"));
        assert_eq!(p.arch.as_deref(), Some("x86_64"));
    }

    #[test]
    fn leading_magic_is_skipped() {
        let mut blob = vec![0x8e, 0xad, 0xe8, 0x01, 0, 0, 0, 0];
        blob.extend(bash());
        assert_eq!(parse_header_blob(&blob).unwrap().name, "bash");
    }

    #[test]
    fn missing_optional_tags_are_none() {
        let p = parse_header_blob(&header(&[(TAG_NAME, "gpg-pubkey"), (TAG_VERSION, "3135ce90")]))
            .unwrap();
        assert_eq!(p.release, None);
        assert_eq!(p.arch, None);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let blob = bash();
        assert!(parse_header_blob(&blob[..blob.len() - 3]).is_err());
        assert!(parse_header_blob(&blob[..5]).is_err());
    }

    #[test]
    fn missing_name_is_rejected() {
        assert!(parse_header_blob(&header(&[(TAG_VERSION, "1")])).is_err());
    }

    #[test]
    fn query_output_is_decoded_and_sorted() {
        let zlib = header(&[(TAG_NAME, "zlib"), (TAG_VERSION, "1.3")]);
        let stdout = format!("{}\n{}\n", hex::encode_upper(zlib), hex::encode_upper(bash()));
        let mock = MockRunner::new().on("sqlite3", move |args| {
            assert_eq!(args[0], "-readonly");
            assert_eq!(args[2], QUERY);
            Ok(ToolOutput::success(stdout.clone()))
        });
        let pkgs = read_packages(&mock, Path::new("/mnt/var/lib/rpm/rpmdb.sqlite")).unwrap();
        let names: Vec<_> = pkgs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["bash", "zlib"]);
    }

    #[test]
    fn database_is_found_in_either_location() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(find_rpmdb(root.path()), None);
        let db = root.path().join(RPMDB_PATHS[1]);
        std::fs::create_dir_all(db.parent().unwrap()).unwrap();
        std::fs::write(&db, b"").unwrap();
        assert_eq!(find_rpmdb(root.path()), Some(db));
    }
}
