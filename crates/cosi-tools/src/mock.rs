use crate::runner::{ToolOutput, ToolRunner};
use crate::ToolError;
use std::collections::HashMap;
use std::sync::Mutex;

type Handler = Box<dyn Fn(&[&str]) -> Result<ToolOutput, ToolError> + Send + Sync>;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub tool: String,
    pub args: Vec<String>,
}

/// Scripted [`ToolRunner`] for tests.
///
/// Each tool gets a handler closure; tools without one behave as if not
/// installed. Every call is recorded, including calls to unknown tools.
#[derive(Default)]
pub struct MockRunner {
    handlers: HashMap<String, Handler>,
    calls: Mutex<Vec<ToolCall>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `tool`, replacing any previous one.
    #[must_use]
    pub fn on<F>(mut self, tool: &str, handler: F) -> Self
    where
        F: Fn(&[&str]) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
    {
        self.handlers.insert(tool.to_owned(), Box::new(handler));
        self
    }

    /// `tool` always succeeds and prints `stdout`.
    #[must_use]
    pub fn succeed(self, tool: &str, stdout: &str) -> Self {
        let stdout = stdout.to_owned();
        self.on(tool, move |_| Ok(ToolOutput::success(stdout.clone())))
    }

    /// `tool` always exits with `code`.
    #[must_use]
    pub fn fail(self, tool: &str, code: i32, stderr: &str) -> Self {
        let stderr = stderr.to_owned();
        self.on(tool, move |_| Ok(ToolOutput::failure(code, stderr.clone())))
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, tool: &str) -> Vec<ToolCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.tool == tool)
            .collect()
    }
}

impl ToolRunner for MockRunner {
    fn run(&self, tool: &str, args: &[&str]) -> Result<ToolOutput, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ToolCall {
                tool: tool.to_owned(),
                args: args.iter().map(|a| (*a).to_owned()).collect(),
            });
        }
        match self.handlers.get(tool) {
            Some(handler) => handler(args),
            None => Err(ToolError::NotFound(tool.to_owned())),
        }
    }
}
