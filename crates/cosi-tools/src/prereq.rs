use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

const E2FSPROGS_HINT: &str =
    "zypper install e2fsprogs | apt install e2fsprogs | dnf install e2fsprogs | tdnf install e2fsprogs";
const UTIL_LINUX_HINT: &str = "part of util-linux (usually pre-installed)";

const GENERATOR_TOOLS: &[MissingPrereq] = &[
    MissingPrereq {
        name: "blkid",
        purpose: "filesystem type and UUID detection",
        install_hint: UTIL_LINUX_HINT,
    },
    MissingPrereq {
        name: "mount",
        purpose: "read-only loop mounts of partition images",
        install_hint: UTIL_LINUX_HINT,
    },
    MissingPrereq {
        name: "umount",
        purpose: "releasing loop mounts",
        install_hint: UTIL_LINUX_HINT,
    },
    MissingPrereq {
        name: "e2fsck",
        purpose: "filesystem check before shrinking",
        install_hint: E2FSPROGS_HINT,
    },
    MissingPrereq {
        name: "resize2fs",
        purpose: "shrinking ext filesystems",
        install_hint: E2FSPROGS_HINT,
    },
    MissingPrereq {
        name: "dumpe2fs",
        purpose: "measuring shrunk ext filesystems",
        install_hint: E2FSPROGS_HINT,
    },
    MissingPrereq {
        name: "sqlite3",
        purpose: "reading the rpm package database",
        install_hint: "zypper install sqlite3 | apt install sqlite3 | dnf install sqlite | tdnf install sqlite",
    },
];

const UUID_TOOLS: &[MissingPrereq] = &[
    MissingPrereq {
        name: "e2fsck",
        purpose: "filesystem check before rewriting the UUID",
        install_hint: E2FSPROGS_HINT,
    },
    MissingPrereq {
        name: "tune2fs",
        purpose: "rewriting ext filesystem UUIDs",
        install_hint: E2FSPROGS_HINT,
    },
];

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Safe wrapper around libc::geteuid().
#[allow(unsafe_code)]
fn effective_uid() -> u32 {
    // SAFETY: geteuid() takes no arguments and cannot fail.
    unsafe { libc::geteuid() }
}

/// Loop mounts need root.
pub fn running_as_root() -> bool {
    effective_uid() == 0
}

fn missing_from(tools: &'static [MissingPrereq]) -> Vec<&'static MissingPrereq> {
    tools.iter().filter(|t| !command_exists(t.name)).collect()
}

/// Tools needed to generate a container from a disk image or a directory.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_generator_prereqs() -> Vec<&'static MissingPrereq> {
    missing_from(GENERATOR_TOOLS)
}

/// Tools needed to regenerate filesystem UUIDs.
pub fn check_uuid_prereqs() -> Vec<&'static MissingPrereq> {
    missing_from(UUID_TOOLS)
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[&MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nThese tools are invoked on the partition images while building a container.");
    msg
}
