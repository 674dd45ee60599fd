use super::{report_written, require_cosi_output, scratch_or_default, with_spinner};
use cosi_core::{DirectoryBuilder, LayoutVariant};
use cosi_tools::SystemRunner;
use std::path::Path;

pub fn run(
    variant: LayoutVariant,
    dir: &Path,
    output: &Path,
    extension: &str,
    scratch: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    require_cosi_output(output)?;
    if !dir.is_dir() {
        return Err(format!("image directory {} not found", dir.display()));
    }
    let runner = SystemRunner::new();
    let scratch = scratch_or_default(scratch);
    let builder = DirectoryBuilder::new(&runner, &scratch).with_extension(extension);

    let manifest = with_spinner(
        json,
        &format!("building {variant} container from {}...", dir.display()),
        "container built",
        || {
            let staged = builder.build(variant, dir)?;
            staged.write_to(output)?;
            Ok(staged.manifest.clone())
        },
    )?;
    report_written(output, &manifest, json)
}
