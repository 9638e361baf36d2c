use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use packsync_core::{PackName, PackSyncConfig};
use packsync_renderer::Renderer;
use packsync_sync::{
    inventory,
    pipeline::{self, SyncOptions},
    CommandInstaller, DesiredStateSource, HttpSource, InstallQueue, InstallTicket, Installer,
    SyncError, SyncReport,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{socket_path, state_dir};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// Everything the daemon needs to run syncs for one project.
#[derive(Clone)]
pub struct DaemonContext {
    pub project_dir: PathBuf,
    pub cache_root: PathBuf,
    pub poll_interval: Duration,
    pub source: Arc<dyn DesiredStateSource>,
    pub installer: Arc<dyn Installer>,
    pub renderer: Arc<Renderer>,
}

impl DaemonContext {
    /// Build from resolved config. `source` replaces the configured HTTP endpoint.
    pub fn from_config(
        project_dir: &Path,
        cwd: &Path,
        config: &PackSyncConfig,
        source: Option<Arc<dyn DesiredStateSource>>,
    ) -> Result<Self, DaemonError> {
        // Every poll is a full sync, which would prune the export directory.
        if config.export_mode {
            return Err(SyncError::ExportNeedsPack {
                root: config.cache_root(project_dir, cwd),
            }
            .into());
        }
        let source = match source {
            Some(source) => source,
            None => Arc::new(HttpSource::from_config(config)?),
        };
        let installer = Arc::new(CommandInstaller::from_argv(&config.install_command)?);
        let renderer = Renderer::with_templates(
            config.loader_module.clone(),
            config.template_dir_at(project_dir).as_deref(),
        )?;
        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            cache_root: config.cache_root(project_dir, cwd),
            poll_interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            source,
            installer,
            renderer: Arc::new(renderer),
        })
    }
}

/// Mutable bookkeeping reported by `status`.
#[derive(Debug, Default)]
struct DaemonState {
    last_sync_at_unix: u64,
    last_error: Option<String>,
    /// Pack name → error of its last failed reconcile.
    failures: BTreeMap<String, String>,
    /// Pack directory → error of its last failed install.
    install_failures: BTreeMap<String, String>,
}

type SharedState = Arc<RwLock<DaemonState>>;

struct SyncJob {
    /// `None` syncs every pack.
    pack: Option<String>,
    source: &'static str,
    respond_to: oneshot::Sender<Result<SyncSummary, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub target: String,
    pub source: String,
    pub packs: Vec<String>,
    pub changed: Vec<String>,
    pub pruned: usize,
    pub writes: usize,
    pub failures: BTreeMap<String, String>,
    pub installs_enqueued: usize,
    pub duration_ms: u128,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(ctx: DaemonContext) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(ctx))
}

/// Run the daemon until `stop` or ctrl-c.
pub async fn run(ctx: DaemonContext) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&ctx.project_dir)?;

    let queue = InstallQueue::spawn(ctx.installer.clone());
    let state: SharedState = Arc::new(RwLock::new(DaemonState::default()));
    let started_at_unix = unix_seconds_now();

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    tracing::info!(
        project = %ctx.project_dir.display(),
        cache_root = %ctx.cache_root.display(),
        source = %ctx.source.describe(),
        interval_secs = ctx.poll_interval.as_secs(),
        "daemon starting",
    );

    let poll_handle = {
        let shutdown = shutdown_tx.clone();
        let sync_tx = sync_tx.clone();
        let interval = ctx.poll_interval;
        tokio::spawn(async move {
            let result = poll_task(interval, sync_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        let queue = queue.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result =
                sync_processor_task(ctx, queue, state, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        let queue = queue.clone();
        let state = state.clone();
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                ctx,
                queue,
                state,
                sync_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (poll_result, processor_result, socket_result, signal_result) =
        tokio::join!(poll_handle, processor_handle, socket_handle, signal_handle);

    handle_join("poller", poll_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;

    if queue.pending() > 0 {
        tracing::warn!(pending = queue.pending(), "daemon stopped with installs still queued");
    }
    Ok(())
}

async fn poll_task(
    interval: Duration,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    // The first tick fires immediately, which gives the startup sync.
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                match enqueue_sync(&sync_tx, None, "poll").await {
                    Ok(summary) => tracing::info!(
                        changed = summary.changed.len(),
                        writes = summary.writes,
                        failures = summary.failures.len(),
                        duration_ms = summary.duration_ms,
                        "scheduled sync completed",
                    ),
                    Err(DaemonError::ChannelClosed(_)) => break,
                    Err(err) => tracing::error!(error = %err, "scheduled sync failed"),
                }
            }
        }
    }
    Ok(())
}

async fn sync_processor_task(
    ctx: DaemonContext,
    queue: InstallQueue,
    state: SharedState,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();
                let options = SyncOptions {
                    cache_root: ctx.cache_root.clone(),
                    dry_run: false,
                    only: job.pack.clone().map(PackName::from),
                    export: false,
                };

                let result =
                    pipeline::run(ctx.source.as_ref(), Some(&queue), ctx.renderer.clone(), &options)
                        .await;

                let outcome = match result {
                    Ok(mut report) => {
                        let tickets = std::mem::take(&mut report.tickets);
                        let summary = build_sync_summary(&job, &report, tickets.len(), started.elapsed());
                        record_sync(&state, &job, &summary, &pruned_packs(&report)).await;
                        track_installs(tickets, state.clone());
                        Ok(summary)
                    }
                    Err(err) => {
                        tracing::error!(source = job.source, error = %err, "sync failed");
                        state.write().await.last_error = Some(err.to_string());
                        Err(err.to_string())
                    }
                };

                let _ = job.respond_to.send(outcome);
            }
        }
    }

    Ok(())
}

fn pruned_packs(report: &SyncReport) -> Vec<String> {
    report
        .pruned
        .iter()
        .filter_map(|w| w.path().file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

async fn record_sync(state: &SharedState, job: &SyncJob, summary: &SyncSummary, pruned: &[String]) {
    let mut guard = state.write().await;
    guard.last_sync_at_unix = unix_seconds_now();
    guard.last_error = None;
    guard.install_failures.retain(|dir, _| {
        !Path::new(dir)
            .file_name()
            .is_some_and(|name| pruned.iter().any(|p| name == p.as_str()))
    });
    match &job.pack {
        None => guard.failures = summary.failures.clone(),
        Some(pack) => match summary.failures.get(pack) {
            Some(error) => {
                guard.failures.insert(pack.clone(), error.clone());
            }
            None => {
                guard.failures.remove(pack);
            }
        },
    }
}

/// Record install outcomes as they arrive, without holding up the processor.
fn track_installs(tickets: Vec<InstallTicket>, state: SharedState) {
    if tickets.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for ticket in tickets {
            let dir = ticket.dir.display().to_string();
            let result = ticket.wait().await;
            let mut guard = state.write().await;
            match result {
                Ok(()) => {
                    guard.install_failures.remove(&dir);
                }
                Err(err) => {
                    guard.install_failures.insert(dir, err.to_string());
                }
            }
        }
    });
}

async fn socket_server_task(
    ctx: DaemonContext,
    queue: InstallQueue,
    state: SharedState,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&ctx.project_dir);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let ctx = ctx.clone();
                let queue = queue.clone();
                let state = state.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        ctx,
                        queue,
                        state,
                        sync_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    ctx: DaemonContext,
    queue: InstallQueue,
    state: SharedState,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => {
                let payload = build_status_payload(&ctx, &queue, &state, started_at_unix).await;
                DaemonResponse::ok(payload)
            }
            "sync" => match enqueue_sync(&sync_tx, request.pack.clone(), "socket").await {
                Ok(summary) => DaemonResponse::ok(json!(summary)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(
    ctx: &DaemonContext,
    queue: &InstallQueue,
    state: &SharedState,
    started_at_unix: u64,
) -> Value {
    let root = ctx.cache_root.clone();
    let packs: Vec<String> =
        match tokio::task::spawn_blocking(move || inventory::list_cached_packs(&root)).await {
            Ok(Ok(packs)) => packs.into_iter().map(|p| p.name).collect(),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "could not list cached packs");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(error = %err, "cache listing task failed");
                Vec::new()
            }
        };

    let guard = state.read().await;
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": started_at_unix,
        "last_sync_at_unix": guard.last_sync_at_unix,
        "last_error": guard.last_error,
        "maintenance": queue.maintenance().is_set(),
        "pending_installs": queue.pending(),
        "packs": packs,
        "failures": guard.failures,
        "install_failures": guard.install_failures,
        "source": ctx.source.describe(),
        "cache_root": ctx.cache_root.display().to_string(),
        "socket": socket_path(&ctx.project_dir).display().to_string(),
    })
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    pack: Option<String>,
    source: &'static str,
) -> Result<SyncSummary, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            pack,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    let outcome = rx
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))?;
    outcome.map_err(DaemonError::Protocol)
}

fn build_sync_summary(
    job: &SyncJob,
    report: &SyncReport,
    installs_enqueued: usize,
    duration: Duration,
) -> SyncSummary {
    SyncSummary {
        target: job.pack.clone().unwrap_or_else(|| "all".to_string()),
        source: job.source.to_string(),
        packs: report.packs.iter().map(|p| p.pack.to_string()).collect(),
        changed: report.changed().map(|c| c.pack.to_string()).collect(),
        pruned: report.pruned.len(),
        writes: report.write_count(),
        failures: report
            .failures
            .iter()
            .map(|f| (f.pack.to_string(), f.error.to_string()))
            .collect(),
        installs_enqueued,
        duration_ms: duration.as_millis(),
    }
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(project_dir: &Path) -> Result<(), DaemonError> {
    let state = state_dir(project_dir);
    if !state.exists() {
        fs::create_dir_all(&state).map_err(|e| io_err(&state, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the global `tracing` subscriber on stderr. `RUST_LOG` overrides
/// the default `info` filter; set `PACKSYNC_LOG_FORMAT=json` for JSON lines.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("PACKSYNC_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
