//! Filesystem probing and ext2/3/4 maintenance through e2fsprogs.

use crate::runner::{path_arg, run_checked, ToolRunner};
use crate::ToolError;
use std::path::Path;
use tracing::{debug, info};

/// Filesystem type reported when `blkid` recognizes nothing.
pub const UNKNOWN_FS_TYPE: &str = "UNKNOWN";
/// Identifier reported when the filesystem has none.
pub const NIL_FS_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// Highest `e2fsck` exit code that still means the filesystem is usable
/// (0 clean, 1 errors corrected, 2 corrected and reboot advised).
const E2FSCK_MAX_OK: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsProbe {
    pub fs_type: String,
    pub uuid: String,
}

impl FsProbe {
    pub fn unknown() -> Self {
        Self {
            fs_type: UNKNOWN_FS_TYPE.to_owned(),
            uuid: NIL_FS_UUID.to_owned(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.fs_type != UNKNOWN_FS_TYPE
    }
}

pub fn is_ext_family(fs_type: &str) -> bool {
    matches!(fs_type, "ext2" | "ext3" | "ext4")
}

/// Identify the filesystem inside a raw image file.
pub fn probe(runner: &dyn ToolRunner, image: &Path) -> Result<FsProbe, ToolError> {
    let out = runner.run("blkid", &["-o", "export", path_arg(image)?])?;
    // blkid exits 2 when it finds no recognizable signature.
    if out.code == Some(2) {
        debug!("blkid found no filesystem in {}", image.display());
        return Ok(FsProbe::unknown());
    }
    let out = out.into_checked("blkid")?;
    Ok(parse_blkid_export(&out.stdout))
}

fn parse_blkid_export(output: &str) -> FsProbe {
    let mut probe = FsProbe::unknown();
    for line in output.lines() {
        match line.trim().split_once('=') {
            Some(("TYPE", v)) if !v.is_empty() => probe.fs_type = v.to_owned(),
            Some(("UUID", v)) if !v.is_empty() => probe.uuid = v.to_owned(),
            _ => {}
        }
    }
    probe
}

/// Shrink an ext filesystem image to its minimum size.
///
/// Returns `Ok(None)` when the image is not ext2/3/4, otherwise the size in
/// bytes the filesystem now occupies. The image file itself is not truncated.
pub fn shrink_ext(runner: &dyn ToolRunner, image: &Path) -> Result<Option<u64>, ToolError> {
    let path = path_arg(image)?;
    let out = runner.run("blkid", &["-o", "value", "-s", "TYPE", path])?;
    let fs_type = out.stdout.trim();
    if !out.is_success() || !is_ext_family(fs_type) {
        debug!("not shrinking {} (type '{fs_type}')", image.display());
        return Ok(None);
    }

    check_ext(runner, path)?;
    run_checked(runner, "resize2fs", &["-M", path])?;
    let info = run_checked(runner, "dumpe2fs", &["-h", path])?;
    let size = parse_dumpe2fs_size(&info.stdout)?;
    info!("shrunk {} filesystem {} to {size} bytes", fs_type, image.display());
    Ok(Some(size))
}

/// Write a new filesystem UUID into an ext image.
pub fn set_ext_uuid(runner: &dyn ToolRunner, image: &Path, uuid: &str) -> Result<(), ToolError> {
    let path = path_arg(image)?;
    check_ext(runner, path)?;
    run_checked(runner, "tune2fs", &["-U", uuid, path])?;
    debug!("set filesystem uuid of {} to {uuid}", image.display());
    Ok(())
}

fn check_ext(runner: &dyn ToolRunner, path: &str) -> Result<(), ToolError> {
    let out = runner.run("e2fsck", &["-f", "-y", path])?;
    match out.code {
        Some(code) if (0..=E2FSCK_MAX_OK).contains(&code) => Ok(()),
        _ => Err(out.into_error("e2fsck")),
    }
}

/// Filesystem size from `dumpe2fs -h`: block count times block size.
pub fn parse_dumpe2fs_size(output: &str) -> Result<u64, ToolError> {
    let field = |name: &str| -> Result<u64, ToolError> {
        let value = output
            .lines()
            .find_map(|l| l.strip_prefix(name))
            .ok_or_else(|| ToolError::parse("dumpe2fs output", format!("no '{name}' line")))?;
        value
            .trim()
            .parse()
            .map_err(|e| ToolError::parse("dumpe2fs output", format!("{name} {e}")))
    };
    let count = field("Block count:")?;
    let size = field("Block size:")?;
    count
        .checked_mul(size)
        .ok_or_else(|| ToolError::parse("dumpe2fs output", "filesystem size overflows"))
}
