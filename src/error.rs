use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QuickVmError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ── executor ─────────────────────────────────────────

    #[error("failed to launch {program}")]
    #[diagnostic(
        code(quickvm::exec::launch),
        help("is PowerShell installed and on PATH? set [shell] program in the config to override")
    )]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status})\n{output}")]
    #[diagnostic(code(quickvm::exec::failed))]
    ExecutionFailure {
        command: String,
        status: String,
        output: String,
    },

    #[error("`{command}` timed out after {}s", after.as_secs())]
    #[diagnostic(code(quickvm::exec::timeout), help("raise the limit with --timeout"))]
    Timeout { command: String, after: Duration },

    #[error("`{command}` was cancelled")]
    #[diagnostic(code(quickvm::exec::cancelled))]
    Cancelled { command: String },

    // ── decoder ──────────────────────────────────────────

    #[error("could not decode shell output: {message}")]
    #[diagnostic(code(quickvm::decode))]
    DecodeFailure { message: String, output: String },

    // ── target resolution ────────────────────────────────

    #[error("index {index} out of range (1-{bound})")]
    #[diagnostic(code(quickvm::target::out_of_bounds), help("run `quickvm list` to see current indices"))]
    IndexOutOfBounds { index: i64, bound: usize },

    #[error("invalid range segment '{segment}': {reason}")]
    #[diagnostic(code(quickvm::target::range), help("ranges look like 1-3,5,7-9"))]
    InvalidRangeSyntax { segment: String, reason: String },

    #[error("invalid index '{value}': must be a number")]
    #[diagnostic(code(quickvm::target::index))]
    InvalidIndex { value: String },

    #[error("no VMs specified")]
    #[diagnostic(code(quickvm::target::none), help("pass indices, --range or --all"))]
    NoTargetsSpecified,

    // ── hyper-v ──────────────────────────────────────────

    #[error("VM '{name}' not found")]
    VmNotFound { name: String },

    #[error("workspace '{name}' does not exist")]
    #[diagnostic(help("list workspaces with `quickvm ws list`"))]
    WorkspaceNotFound { name: String },

    #[error("this command requires Administrator privileges")]
    #[diagnostic(help("run it again from an elevated PowerShell or Command Prompt"))]
    NotAdmin,

    #[error("prompt failed: {message}")]
    #[diagnostic(help("pass --yes to skip confirmation prompts"))]
    Prompt { message: String },

    #[error("failed to render output: {message}")]
    Render { message: String },

    #[error("{failed} of {total} operations failed")]
    BatchFailed { failed: usize, total: usize },
}

impl QuickVmError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        QuickVmError::Io {
            context: context.into(),
            source,
        }
    }

    /// The command already printed a full result (a batch report) and the
    /// error only sets the exit status.
    pub fn already_reported(&self) -> bool {
        matches!(self, QuickVmError::BatchFailed { .. })
    }

    /// Raw diagnostic text from the external shell, when the error carries any.
    pub fn diagnostic_output(&self) -> Option<&str> {
        match self {
            QuickVmError::ExecutionFailure { output, .. }
            | QuickVmError::DecodeFailure { output, .. } => Some(output),
            _ => None,
        }
    }
}
