use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::progress::OutputMode;

// ── DeferredFileWriter ───────────────────────────────────

/// A `MakeWriter` that discards writes until `handle.set_file(path)` is
/// called, then appends to that file.
///
/// The subscriber is installed before the command is known; only commands
/// that change host state turn the file log on.
#[derive(Clone)]
pub struct DeferredFileWriter {
    inner: Arc<Mutex<Option<File>>>,
}

/// Activates a [`DeferredFileWriter`].
#[derive(Clone)]
pub struct DeferredFileHandle {
    inner: Arc<Mutex<Option<File>>>,
}

impl DeferredFileWriter {
    pub fn new() -> (Self, DeferredFileHandle) {
        let inner = Arc::new(Mutex::new(None));
        (
            Self {
                inner: inner.clone(),
            },
            DeferredFileHandle { inner },
        )
    }
}

fn lock(inner: &Mutex<Option<File>>) -> MutexGuard<'_, Option<File>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeferredFileHandle {
    /// Open `path` in append mode, creating parent directories.
    pub fn set_file(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *lock(&self.inner) = Some(file);
        Ok(())
    }
}

pub struct DeferredWriter {
    inner: Arc<Mutex<Option<File>>>,
}

impl Write for DeferredWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match lock(&self.inner).as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match lock(&self.inner).as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for DeferredFileWriter {
    type Writer = DeferredWriter;

    fn make_writer(&'a self) -> Self::Writer {
        DeferredWriter {
            inner: self.inner.clone(),
        }
    }
}

// ── subscriber ───────────────────────────────────────────

/// Terminal filter for a given output mode.
///
/// Spinners own stderr in `Normal` mode, so tracing stays off there unless
/// `--verbose` asks for it. `RUST_LOG` overrides the default otherwise.
fn terminal_filter(mode: OutputMode, verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new("quickvm=debug");
    }
    match mode {
        OutputMode::Normal => EnvFilter::new("off"),
        OutputMode::Plain | OutputMode::Silent => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quickvm=warn"))
        }
    }
}

/// Install the global subscriber: a stderr layer filtered per `mode`, and a
/// file layer that captures `quickvm=debug` once activated.
pub fn init(mode: OutputMode, verbose: bool) -> DeferredFileHandle {
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(terminal_filter(mode, verbose));

    let (file_writer, file_handle) = DeferredFileWriter::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("quickvm=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    file_handle
}
