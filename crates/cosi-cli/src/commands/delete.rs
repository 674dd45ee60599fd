use super::{report_written, require_cosi_output, with_spinner};
use cosi_core::delete_mount_points;
use std::path::Path;

pub fn run(source: &Path, output: &Path, mount_points: &[String], json: bool) -> Result<u8, String> {
    require_cosi_output(output)?;
    let manifest = with_spinner(
        json,
        &format!("removing {}...", mount_points.join(", ")),
        "filesystems removed",
        || delete_mount_points(source, output, mount_points),
    )?;
    report_written(output, &manifest, json)
}
