//! Serialized dependency installation.
//!
//! One worker task consumes an ordered channel, so installs run FIFO with at
//! most one in flight. The maintenance flag is raised by the enqueue that
//! leaves the queue idle and lowered when the last pending task finishes;
//! both transitions happen under the same lock as the pending counter.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::InstallError;

/// Bytes of stderr kept in [`InstallError::Failed`].
const STDERR_TAIL: usize = 2000;

// ---------------------------------------------------------------------------
// Installer
// ---------------------------------------------------------------------------

/// Runs the dependency installation for one pack directory.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, dir: &Path) -> Result<(), InstallError>;
}

/// Runs an external command (e.g. `npm install`) with the pack directory as
/// its working directory.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    program: String,
    args: Vec<String>,
}

impl CommandInstaller {
    pub fn from_argv(argv: &[String]) -> Result<Self, InstallError> {
        let (program, args) = argv.split_first().ok_or(InstallError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl Installer for CommandInstaller {
    async fn install(&self, dir: &Path) -> Result<(), InstallError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| InstallError::Spawn {
                program: self.program.clone(),
                dir: dir.to_path_buf(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }
        Err(InstallError::Failed {
            program: self.program.clone(),
            dir: dir.to_path_buf(),
            code: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_owned();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

// ---------------------------------------------------------------------------
// Maintenance flag
// ---------------------------------------------------------------------------

/// "Dependency installation in flight" signal.
///
/// Readable by anyone holding a clone; written only by [`InstallQueue`].
#[derive(Debug, Clone)]
pub struct MaintenanceFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl MaintenanceFlag {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolve once the flag is clear (immediately if it already is).
    pub async fn wait_clear(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|set| !*set).await;
    }

    fn set(&self, value: bool) {
        self.tx.send_replace(value);
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

struct Job {
    dir: PathBuf,
    respond_to: oneshot::Sender<Result<(), InstallError>>,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Enqueued and not yet finished, including the one in flight.
    pending: usize,
    /// Number of Idle → Draining transitions.
    activations: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    flag: MaintenanceFlag,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned counter is still a valid counter.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn finish_one(&self) {
        let mut state = self.lock();
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.flag.set(false);
            tracing::info!("install queue drained");
        }
    }
}

/// Completion handle for one enqueued installation.
#[derive(Debug)]
pub struct InstallTicket {
    pub dir: PathBuf,
    rx: oneshot::Receiver<Result<(), InstallError>>,
}

impl InstallTicket {
    /// Wait for this task's installation to finish.
    pub async fn wait(self) -> Result<(), InstallError> {
        let InstallTicket { dir, rx } = self;
        rx.await
            .unwrap_or_else(|_| Err(InstallError::QueueClosed { dir }))
    }
}

/// Handle to the single install worker. Cheap to clone.
#[derive(Clone)]
pub struct InstallQueue {
    tx: mpsc::UnboundedSender<Job>,
    shared: Arc<Shared>,
}

impl InstallQueue {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// The worker exits once every clone of the returned handle is dropped.
    pub fn spawn(installer: Arc<dyn Installer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            flag: MaintenanceFlag::new(),
        });
        tokio::spawn(worker(installer, rx, shared.clone()));
        Self { tx, shared }
    }

    /// Queue an installation for `dir`. Never fails; the outcome arrives on
    /// the returned ticket.
    pub fn enqueue(&self, dir: impl Into<PathBuf>) -> InstallTicket {
        let dir = dir.into();
        let (respond_to, rx) = oneshot::channel();

        let mut state = self.shared.lock();
        state.pending += 1;
        if state.pending == 1 {
            state.activations += 1;
            self.shared.flag.set(true);
        }
        let job = Job {
            dir: dir.clone(),
            respond_to,
        };
        if self.tx.send(job).is_err() {
            drop(state);
            tracing::warn!(dir = %dir.display(), "install queue closed; install dropped");
            self.shared.finish_one();
        } else {
            tracing::debug!(dir = %dir.display(), pending = state.pending, "install enqueued");
        }

        InstallTicket { dir, rx }
    }

    pub fn maintenance(&self) -> MaintenanceFlag {
        self.shared.flag.clone()
    }

    /// Tasks enqueued and not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending
    }

    /// How many times the queue went from idle to draining.
    pub fn activations(&self) -> u64 {
        self.shared.lock().activations
    }

    /// Resolve once nothing is pending.
    pub async fn drained(&self) {
        self.shared.flag.wait_clear().await;
    }
}

async fn worker(
    installer: Arc<dyn Installer>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    shared: Arc<Shared>,
) {
    while let Some(Job { dir, respond_to }) = rx.recv().await {
        tracing::info!(dir = %dir.display(), "installing dependencies");
        // A panicking installer fails its own ticket; the worker keeps draining.
        let task = {
            let installer = installer.clone();
            let dir = dir.clone();
            tokio::spawn(async move { installer.install(&dir).await })
        };
        let result = task.await.unwrap_or_else(|err| {
            Err(InstallError::Panicked {
                dir: dir.clone(),
                message: err.to_string(),
            })
        });
        match &result {
            Ok(()) => tracing::info!(dir = %dir.display(), "dependencies installed"),
            Err(err) => tracing::error!(dir = %dir.display(), error = %err, "install failed"),
        }
        // Lower the flag before reporting so a resolved last ticket implies a clear flag.
        shared.finish_one();
        let _ = respond_to.send(result);
    }
    tracing::debug!("install worker stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
