use super::{report_written, require_cosi_output, with_spinner};
use cosi_core::insert_auxiliary;
use std::path::Path;

/// Name used inside the container when `--name` is absent.
fn default_name(file: &Path) -> Result<String, String> {
    file.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| format!("cannot derive a name from {}", file.display()))
}

pub fn run(
    source: &Path,
    output: &Path,
    file: &Path,
    name: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    require_cosi_output(output)?;
    let name = match name {
        Some(n) => n.to_owned(),
        None => default_name(file)?,
    };
    let manifest = with_spinner(
        json,
        &format!("inserting '{name}'..."),
        "auxiliary file inserted",
        || insert_auxiliary(source, output, &name, file),
    )?;
    report_written(output, &manifest, json)
}
