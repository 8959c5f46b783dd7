use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::{BatchObserver, Operation, OperationOutcome};
use crate::directory::Vm;

/// Controls how progress is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinners and checkmarks on a terminal.
    Normal,
    /// No ANSI: one plain line per event (for piped/non-TTY).
    Plain,
    /// No progress at all; stdout carries JSON only.
    Silent,
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn done_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2713} {msg:.green}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn failed_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2717} {msg:.red}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn spinner(prefix: String, label: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(spinner_style());
    bar.set_prefix(prefix);
    bar.set_message(label);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// One-line summary of an outcome; failures keep only the first line of
/// the error, the full text goes into the report.
fn outcome_line(outcome: &OperationOutcome) -> String {
    let name = if outcome.name.is_empty() {
        format!("#{}", outcome.index)
    } else {
        outcome.name.clone()
    };
    let message = outcome.message.lines().next().unwrap_or_default();
    format!("{name}: {message}")
}

/// Per-target spinner lines for a batch run, numbered `[i/n]`.
pub struct BatchProgress {
    operation: Operation,
    mode: OutputMode,
    bar: Option<ProgressBar>,
}

impl BatchProgress {
    pub fn new(operation: Operation, mode: OutputMode) -> Self {
        Self {
            operation,
            mode,
            bar: None,
        }
    }
}

impl BatchObserver for BatchProgress {
    fn on_start(&mut self, vm: &Vm, position: usize, total: usize) {
        let prefix = format!("{position}/{total}");
        let label = format!("{} {}", self.operation.active, vm.name);
        match self.mode {
            OutputMode::Normal => self.bar = Some(spinner(prefix, label)),
            OutputMode::Plain => println!("[{prefix}] {label}"),
            OutputMode::Silent => {}
        }
    }

    fn on_outcome(&mut self, outcome: &OperationOutcome, position: usize, total: usize) {
        let prefix = format!("{position}/{total}");
        let line = outcome_line(outcome);
        match self.mode {
            OutputMode::Normal => {
                let bar = self.bar.take().unwrap_or_else(|| {
                    let bar = ProgressBar::new_spinner();
                    bar.set_prefix(prefix);
                    bar
                });
                bar.set_style(if outcome.success {
                    done_style()
                } else {
                    failed_style()
                });
                bar.finish_with_message(line);
            }
            OutputMode::Plain => {
                let mark = if outcome.success { '\u{2713}' } else { '\u{2717}' };
                println!("[{prefix}] {mark} {line}");
            }
            OutputMode::Silent => {}
        }
    }
}

/// Spinner around a single long-running step (clone, export, ...).
/// Dropped without `finish` it is marked failed.
pub struct Task {
    bar: Option<ProgressBar>,
    mode: OutputMode,
}

impl Task {
    pub fn start(mode: OutputMode, label: impl Into<String>) -> Self {
        let label = label.into();
        let bar = match mode {
            OutputMode::Normal => Some(spinner("1/1".into(), label)),
            OutputMode::Plain => {
                println!("[1/1] {label}");
                None
            }
            OutputMode::Silent => None,
        };
        Self { bar, mode }
    }

    pub fn finish(mut self, message: impl Into<String>) {
        let message = message.into();
        match self.bar.take() {
            Some(bar) => {
                bar.set_style(done_style());
                bar.finish_with_message(message);
            }
            None if self.mode == OutputMode::Plain => println!("[1/1] \u{2713} {message}"),
            None => {}
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.set_style(failed_style());
            bar.abandon();
        }
    }
}
