//! Command executor: the only place that spawns the management shell.
//!
//! Two request shapes exist. [`ExecutionRequest::Cmdlet`] carries typed
//! invocations whose values are rendered as inert single-quoted literals, so a
//! VM name like `x'; Remove-VM *` stays one string argument. Pipelines are
//! built from typed stages; callers never supply `|` themselves.
//! [`ExecutionRequest::Script`] carries a `&'static str` body. Values a script
//! needs are bound through a `param()` block, never spliced into the body.
//!
//! The rendered text reaches PowerShell through `-EncodedCommand`, so the host
//! command-line parser never re-tokenizes it.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio_util::sync::CancellationToken;

use crate::error::QuickVmError;

/// Statements prepended to every invocation: keep progress records and
/// non-UTF-8 console encodings out of the captured output.
const PRELUDE: &str = "$ProgressPreference = 'SilentlyContinue'; \
$ErrorActionPreference = 'Stop'; \
[Console]::OutputEncoding = [System.Text.Encoding]::UTF8; ";

/// One argument token of a cmdlet invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `-Name 'value'`
    Param { name: &'static str, value: String },
    /// `-Count 42`
    Number { name: &'static str, value: u64 },
    /// `-Force`
    Switch(&'static str),
    /// `-Confirm:$false`
    Flag { name: &'static str, value: bool },
}

/// A single cmdlet call with its typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    cmdlet: &'static str,
    tokens: Vec<Token>,
}

impl Invocation {
    pub fn new(cmdlet: &'static str) -> Self {
        debug_assert!(is_identifier(cmdlet), "invalid cmdlet name {cmdlet}");
        Self {
            cmdlet,
            tokens: Vec::new(),
        }
    }

    pub fn param(mut self, name: &'static str, value: impl Into<String>) -> Self {
        debug_assert!(is_identifier(name));
        self.tokens.push(Token::Param {
            name,
            value: value.into(),
        });
        self
    }

    /// Like [`param`](Self::param), for parameters that accept wildcards
    /// (`Get-VM -Name`, `Stop-VM -Name`, ...). `*?[]` are escaped so the
    /// value only ever matches itself.
    pub fn param_exact(self, name: &'static str, value: &str) -> Self {
        self.param(name, escape_wildcards(value))
    }

    pub fn number(mut self, name: &'static str, value: u64) -> Self {
        debug_assert!(is_identifier(name));
        self.tokens.push(Token::Number { name, value });
        self
    }

    pub fn switch(mut self, name: &'static str) -> Self {
        debug_assert!(is_identifier(name));
        self.tokens.push(Token::Switch(name));
        self
    }

    pub fn flag(mut self, name: &'static str, value: bool) -> Self {
        debug_assert!(is_identifier(name));
        self.tokens.push(Token::Flag { name, value });
        self
    }

    /// Pipe this invocation into `next`.
    pub fn pipe(self, next: Invocation) -> ExecutionRequest {
        ExecutionRequest::Cmdlet(vec![self, next])
    }

    fn render(&self, out: &mut String) {
        out.push_str(self.cmdlet);
        for token in &self.tokens {
            out.push(' ');
            match token {
                Token::Param { name, value } => {
                    out.push('-');
                    out.push_str(name);
                    out.push(' ');
                    out.push_str(&quote_literal(value));
                }
                Token::Number { name, value } => {
                    out.push_str(&format!("-{name} {value}"));
                }
                Token::Switch(name) => {
                    out.push('-');
                    out.push_str(name);
                }
                Token::Flag { name, value } => {
                    let literal = if *value { "$true" } else { "$false" };
                    out.push_str(&format!("-{name}:{literal}"));
                }
            }
        }
    }
}

/// A request handed to a [`ShellExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionRequest {
    /// Argument-list mode: one or more piped invocations.
    Cmdlet(Vec<Invocation>),
    /// Raw-script mode: a fixed body plus parameters bound by name.
    Script {
        body: &'static str,
        params: Vec<(&'static str, String)>,
    },
}

impl From<Invocation> for ExecutionRequest {
    fn from(invocation: Invocation) -> Self {
        ExecutionRequest::Cmdlet(vec![invocation])
    }
}

impl ExecutionRequest {
    pub fn script(body: &'static str) -> Self {
        ExecutionRequest::Script {
            body,
            params: Vec::new(),
        }
    }

    /// Bind `$name` inside a script body. No-op for cmdlet requests.
    pub fn bind(mut self, name: &'static str, value: impl Into<String>) -> Self {
        debug_assert!(is_identifier(name));
        if let ExecutionRequest::Script { params, .. } = &mut self {
            params.push((name, value.into()));
        }
        self
    }

    /// Append another pipeline stage. No-op for script requests.
    pub fn pipe(mut self, next: Invocation) -> Self {
        if let ExecutionRequest::Cmdlet(stages) = &mut self {
            stages.push(next);
        }
        self
    }

    /// The exact PowerShell text this request runs as (without the prelude).
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            ExecutionRequest::Cmdlet(stages) => {
                for (i, stage) in stages.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" | ");
                    }
                    stage.render(&mut out);
                }
            }
            ExecutionRequest::Script { body, params } => {
                out.push_str("& {");
                if !params.is_empty() {
                    let names: Vec<String> = params.iter().map(|(n, _)| format!("${n}")).collect();
                    out.push_str(&format!(" param({})", names.join(", ")));
                }
                out.push('\n');
                out.push_str(body.trim());
                out.push_str("\n}");
                for (name, value) in params {
                    out.push_str(&format!(" -{name} {}", quote_literal(value)));
                }
            }
        }
        out
    }

    /// Short label for logs and error messages. Never contains argument values.
    pub fn describe(&self) -> String {
        match self {
            ExecutionRequest::Cmdlet(stages) => stages
                .iter()
                .map(|s| s.cmdlet)
                .collect::<Vec<_>>()
                .join(" | "),
            ExecutionRequest::Script { body, .. } => {
                let first = body.trim().lines().next().unwrap_or_default().trim();
                let mut label: String = first.chars().take(48).collect();
                if first.chars().count() > 48 {
                    label.push_str("...");
                }
                format!("script: {label}")
            }
        }
    }
}

impl fmt::Display for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Render `value` as a PowerShell single-quoted literal.
///
/// PowerShell treats U+2018..U+201B as single quotes too; every quote
/// character is doubled, which is the only escape single-quoted strings have.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if is_single_quote(c) {
            out.push(c);
        }
        out.push(c);
    }
    out.push('\'');
    out
}

fn is_single_quote(c: char) -> bool {
    matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}')
}

/// Escape wildcard metacharacters with the PowerShell backtick.
pub fn escape_wildcards(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '`') {
            out.push('`');
        }
        out.push(c);
    }
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Encode a script for `-EncodedCommand` (base64 over UTF-16LE).
pub fn encode_command(script: &str) -> String {
    let bytes: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    STANDARD.encode(bytes)
}

// ── executor ─────────────────────────────────────────────

/// Runs requests against the management shell and returns its stdout.
#[allow(async_fn_in_trait)] // trait is internal-only
pub trait ShellExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<Vec<u8>, QuickVmError>;
}

/// The real executor: `powershell -NoProfile -NonInteractive -EncodedCommand`.
#[derive(Debug, Clone)]
pub struct PowerShell {
    program: String,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl PowerShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl ShellExecutor for PowerShell {
    async fn execute(&self, request: &ExecutionRequest) -> Result<Vec<u8>, QuickVmError> {
        let command = request.describe();
        if self.cancel.is_cancelled() {
            return Err(QuickVmError::Cancelled { command });
        }

        let script = format!("{PRELUDE}{}", request.render());
        tracing::debug!(%command, "invoking {}", self.program);
        tracing::trace!(%script, "rendered invocation");

        let child = tokio::process::Command::new(&self.program)
            .args(["-NoProfile", "-NonInteractive", "-EncodedCommand"])
            .arg(encode_command(&script))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| QuickVmError::Launch {
                program: self.program.clone(),
                source,
            })?;

        // Dropping `wait` on timeout or cancellation kills the child.
        let wait = child.wait_with_output();
        let bounded = async {
            match self.timeout {
                Some(after) => tokio::time::timeout(after, wait).await.map_err(|_| {
                    QuickVmError::Timeout {
                        command: command.clone(),
                        after,
                    }
                }),
                None => Ok(wait.await),
            }
        };

        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::warn!(%command, "cancelled, terminating shell");
                return Err(QuickVmError::Cancelled { command });
            }
            result = bounded => result?
                .map_err(|e| QuickVmError::io(format!("waiting for {}", self.program), e))?,
        };

        if !output.status.success() {
            return Err(QuickVmError::ExecutionFailure {
                command,
                status: output.status.to_string(),
                output: combined_output(&output.stdout, &output.stderr),
            });
        }

        Ok(output.stdout)
    }
}

/// stdout followed by stderr, lossily decoded and trimmed.
pub fn combined_output(stdout: &[u8], stderr: &[u8]) -> String {
    let out = String::from_utf8_lossy(stdout);
    let err = String::from_utf8_lossy(stderr);
    match (out.trim(), err.trim()) {
        ("", e) => e.to_string(),
        (o, "") => o.to_string(),
        (o, e) => format!("{o}\n{e}"),
    }
}

/// Scripted executor for tests: answers requests by command label and
/// records everything it was asked to run.
#[cfg(test)]
pub mod fake {
    use std::cell::RefCell;

    use super::{ExecutionRequest, ShellExecutor};
    use crate::error::QuickVmError;

    #[derive(Default)]
    pub struct FakeShell {
        responses: RefCell<Vec<(String, Result<Vec<u8>, QuickVmError>)>>,
        requests: RefCell<Vec<ExecutionRequest>>,
    }

    impl FakeShell {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue `stdout` for the next request whose label starts with `command`.
        pub fn ok(self, command: &str, stdout: &str) -> Self {
            self.responses
                .borrow_mut()
                .push((command.to_string(), Ok(stdout.as_bytes().to_vec())));
            self
        }

        /// Queue a non-zero exit for the next matching request.
        pub fn fail(self, command: &str, output: &str) -> Self {
            self.responses.borrow_mut().push((
                command.to_string(),
                Err(QuickVmError::ExecutionFailure {
                    command: command.to_string(),
                    status: "exit code: 1".into(),
                    output: output.to_string(),
                }),
            ));
            self
        }

        pub fn requests(&self) -> Vec<ExecutionRequest> {
            self.requests.borrow().clone()
        }

        pub fn rendered(&self) -> Vec<String> {
            self.requests.borrow().iter().map(|r| r.render()).collect()
        }

        pub fn labels(&self) -> Vec<String> {
            self.requests.borrow().iter().map(|r| r.describe()).collect()
        }
    }

    impl ShellExecutor for FakeShell {
        async fn execute(&self, request: &ExecutionRequest) -> Result<Vec<u8>, QuickVmError> {
            self.requests.borrow_mut().push(request.clone());
            let label = request.describe();
            let mut responses = self.responses.borrow_mut();
            match responses.iter().position(|(cmd, _)| label.starts_with(cmd.as_str())) {
                Some(i) => responses.remove(i).1,
                None => Ok(Vec::new()),
            }
        }
    }
}
