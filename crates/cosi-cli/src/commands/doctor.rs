use super::{EXIT_FAILURE, EXIT_SUCCESS};
use cosi_tools::MissingPrereq;
use std::path::Path;

pub fn run(json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_tools(
        "generator_tools",
        "Generator tools available",
        &cosi_tools::check_generator_prereqs(),
        &mut checks,
        &mut all_pass,
    );
    check_tools(
        "uuid_tools",
        "Filesystem UUID tools available",
        &cosi_tools::check_uuid_prereqs(),
        &mut checks,
        &mut all_pass,
    );

    if cosi_tools::running_as_root() {
        checks.push(Check::pass("root", "Running as root (loop mounts allowed)"));
    } else {
        checks.push(Check::warn(
            "root",
            "Not running as root: generate and build need to loop-mount images",
        ));
    }

    check_disk_space(&std::env::temp_dir(), &mut checks);

    print_results(&checks, all_pass, json_output)
}

fn check_tools(
    name: &str,
    ok_message: &str,
    missing: &[&MissingPrereq],
    checks: &mut Vec<Check>,
    all_pass: &mut bool,
) {
    if missing.is_empty() {
        checks.push(Check::pass(name, ok_message));
    } else {
        *all_pass = false;
        let names: Vec<&str> = missing.iter().map(|m| m.name).collect();
        checks.push(Check::fail(
            name,
            &format!("Missing tools: {}", names.join(", ")),
        ));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("mkcosi doctor\n");
        for check in checks {
            let icon = match check.status.as_str() {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: String,
    status: String,
    message: String,
}

impl Check {
    fn pass(name: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: "pass".to_owned(),
            message: message.to_owned(),
        }
    }

    fn fail(name: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: "fail".to_owned(),
            message: message.to_owned(),
        }
    }

    fn warn(name: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: "warn".to_owned(),
            message: message.to_owned(),
        }
    }

    fn info(name: &str, message: &str) -> Self {
        Self {
            name: name.to_owned(),
            status: "info".to_owned(),
            message: message.to_owned(),
        }
    }
}

fn check_disk_space(scratch: &Path, checks: &mut Vec<Check>) {
    let Ok(c_path) = std::ffi::CString::new(scratch.to_string_lossy().as_bytes()) else {
        return;
    };

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: statvfs with a valid, NUL-terminated path and a properly
    // zeroed output struct is well-defined. The struct is stack-allocated
    // and only read after the call succeeds (ret == 0).
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if ret != 0 {
        checks.push(Check::warn(
            "scratch_space",
            &format!("Cannot query free space in {}", scratch.display()),
        ));
        return;
    }

    let avail_bytes = stat.f_bavail * stat.f_frsize;
    let avail_mb = avail_bytes / (1024 * 1024);
    let where_ = scratch.display();

    // Partitions are staged uncompressed, so a few GiB is the practical floor.
    if avail_mb < 1024 {
        checks.push(Check::fail(
            "scratch_space",
            &format!("Low scratch space in {where_}: {avail_mb} MB available"),
        ));
    } else if avail_mb < 8 * 1024 {
        checks.push(Check::warn(
            "scratch_space",
            &format!("Scratch space in {where_}: {avail_mb} MB available (large disks may not fit)"),
        ));
    } else {
        let free_gb = avail_mb / 1024;
        checks.push(Check::pass(
            "scratch_space",
            &format!("Scratch space in {where_}: {free_gb} GB available"),
        ));
    }
}
