use super::{report_written, require_cosi_output, scratch_or_default, with_spinner};
use cosi_core::randomize_fs_uuid;
use cosi_tools::SystemRunner;
use std::path::Path;

pub fn run(
    source: &Path,
    output: &Path,
    mount_points: &[String],
    scratch: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    require_cosi_output(output)?;
    let runner = SystemRunner::new();
    let scratch = scratch_or_default(scratch);
    let manifest = with_spinner(
        json,
        &format!("regenerating filesystem UUIDs for {}...", mount_points.join(", ")),
        "filesystem UUIDs regenerated",
        || randomize_fs_uuid(&runner, source, output, mount_points, &scratch),
    )?;
    if !json {
        for mp in mount_points {
            if let Some(image) = manifest.image_by_mount_point(mp) {
                println!("{mp}: {}", image.fs_uuid);
            }
        }
    }
    report_written(output, &manifest, json)
}
