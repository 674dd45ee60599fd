//! External tool boundary for COSI generation and mutation.
//!
//! Filesystem maintenance (consistency check, shrink, identifier rewrite),
//! loop mounts, and package database queries are delegated to system
//! utilities. Every invocation goes through the narrow [`ToolRunner`]
//! capability so tests can substitute [`MockRunner`] and run without root or
//! real filesystem images.

pub mod filesystem;
pub mod mock;
pub mod mount;
pub mod prereq;
pub mod rpmdb;
pub mod runner;

pub use filesystem::{
    is_ext_family, probe, set_ext_uuid, shrink_ext, FsProbe, NIL_FS_UUID, UNKNOWN_FS_TYPE,
};
pub use mock::{MockRunner, ToolCall};
pub use mount::LoopMount;
pub use prereq::{
    check_generator_prereqs, check_uuid_prereqs, format_missing, running_as_root, MissingPrereq,
};
pub use rpmdb::{find_rpmdb, parse_header_blob, read_packages, RPMDB_PATHS};
pub use runner::{path_arg, run_checked, SystemRunner, ToolOutput, ToolRunner};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("required tool '{0}' is not installed")]
    NotFound(String),
    #[error("'{tool}' failed ({status}): {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("could not parse {what}: {reason}")]
    Parse { what: String, reason: String },
    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),
}

impl ToolError {
    pub(crate) fn parse(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.into(),
        }
    }
}
