pub mod build;
pub mod completions;
pub mod delete;
pub mod doctor;
pub mod explain;
pub mod generate;
pub mod insert;
pub mod inspect;
pub mod man_pages;
pub mod randomize_fs_uuid;
pub mod vhd_footer;

use cosi_core::CoreError;
use cosi_schema::Manifest;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_FORMAT_ERROR: u8 = 2;
pub const EXIT_FINDINGS: u8 = 3;

pub const COSI_EXTENSION: &str = "cosi";

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Exit code for an error message produced by a command.
pub fn exit_code_for(msg: &str) -> u8 {
    const FORMAT_PREFIXES: &[&str] = &[
        "manifest error:",
        "container error: manifest error:",
        "container error: container has no",
        "container error: archive I/O error",
        "disk error: invalid GPT signature",
        "disk error: GPT header size",
        "disk error: GPT partition entry size",
        "disk error: disk image truncated",
    ];
    if FORMAT_PREFIXES.iter().any(|p| msg.starts_with(p)) {
        EXIT_FORMAT_ERROR
    } else {
        EXIT_FAILURE
    }
}

pub fn core_err(e: CoreError) -> String {
    e.to_string()
}

/// Output containers must carry the `.cosi` extension.
pub fn require_cosi_output(path: &Path) -> Result<(), String> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(COSI_EXTENSION) => Ok(()),
        _ => Err(format!(
            "output {} must have the .{COSI_EXTENSION} extension",
            path.display()
        )),
    }
}

pub fn scratch_or_default(scratch: Option<&Path>) -> PathBuf {
    scratch.map_or_else(std::env::temp_dir, Path::to_path_buf)
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    let pb = ProgressBar::new_spinner();
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Run `op` under a spinner unless JSON output is requested.
pub fn with_spinner<T>(
    json: bool,
    msg: &str,
    done: &str,
    op: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, String> {
    let pb = if json { None } else { Some(spinner(msg)) };
    match op() {
        Ok(value) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, done);
            }
            Ok(value)
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "failed");
            }
            Err(core_err(e))
        }
    }
}

/// Report a freshly written container.
pub fn report_written(output: &Path, manifest: &Manifest, json: bool) -> Result<u8, String> {
    if json {
        let value = serde_json::json!({
            "output": output.display().to_string(),
            "manifest": manifest,
        });
        println!("{}", json_pretty(&value)?);
        return Ok(EXIT_SUCCESS);
    }
    println!("wrote {}", output.display());
    print_summary(manifest);
    Ok(EXIT_SUCCESS)
}

pub fn print_summary(manifest: &Manifest) {
    println!("version:     {}", manifest.version);
    println!("os_arch:     {}", manifest.os_arch);
    if let Some(id) = manifest.id {
        println!("id:          {id}");
    }
    println!("packages:    {}", manifest.os_packages.len());
    println!("images:");
    for image in &manifest.images {
        println!(
            "  {:<12} {:<6} {:<10} {} ({})",
            image.mount_point,
            image.fs_type,
            image.part_type.role_name(),
            image.image.path,
            human_size(image.image.uncompressed_size)
        );
        if let Some(ref verity) = image.verity {
            println!("  {:<12} verity {}", "", verity.image.path);
        }
    }
    if let Some(ref disk) = manifest.disk {
        println!(
            "disk:        {} ({} regions)",
            human_size(disk.size),
            disk.gpt_regions.len()
        );
    }
    for aux in &manifest.auxiliary_files {
        println!("auxiliary:   {} ({})", aux.name, human_size(aux.image.uncompressed_size));
    }
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
