use crate::ToolError;
use std::io;
use std::path::Path;
use std::process::Command;
use tracing::{debug, trace};

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_owned(),
        }
    }

    /// Turn a non-zero exit into [`ToolError::Failed`].
    pub fn into_checked(self, tool: &str) -> Result<Self, ToolError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error(tool))
        }
    }

    pub fn into_error(self, tool: &str) -> ToolError {
        ToolError::Failed {
            tool: tool.to_owned(),
            status: self.status_text(),
            stderr: self.stderr.trim().to_owned(),
        }
    }
}

/// Synchronous capability for running an external program.
///
/// A non-zero exit is not an error at this level; callers decide which codes
/// they accept. Only failing to start the program is.
pub trait ToolRunner: Send + Sync {
    fn run(&self, tool: &str, args: &[&str]) -> Result<ToolOutput, ToolError>;
}

/// Runs tools as child processes of the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl ToolRunner for SystemRunner {
    fn run(&self, tool: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        debug!("running {tool} {}", args.join(" "));
        let output = Command::new(tool).args(args).output().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ToolError::NotFound(tool.to_owned())
            } else {
                ToolError::Io(e)
            }
        })?;
        let result = ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!("{tool} finished with {}", result.status_text());
        Ok(result)
    }
}

/// Run a tool and require a zero exit code.
pub fn run_checked(
    runner: &dyn ToolRunner,
    tool: &str,
    args: &[&str],
) -> Result<ToolOutput, ToolError> {
    runner.run(tool, args)?.into_checked(tool)
}

/// Borrow a path as a command-line argument.
pub fn path_arg(path: &Path) -> Result<&str, ToolError> {
    path.to_str()
        .ok_or_else(|| ToolError::NonUtf8Path(path.to_path_buf()))
}
