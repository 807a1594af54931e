use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;

use glancesync_core::{config, Config, RegionId};
use glancesync_sync::pipeline::{load_master, sync_region};
use glancesync_sync::{LocalCatalogProvider, RepositoryProvider};

use crate::error::{io_err, DaemonError};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::tasks::{unix_seconds_now, TaskTracker};

struct SyncJob {
    task_id: String,
    region: RegionId,
}

/// State shared by the socket server and the sync processor.
#[derive(Clone)]
pub struct DaemonContext {
    pub config: Arc<Config>,
    pub provider: Arc<dyn RepositoryProvider>,
    pub tasks: Arc<RwLock<TaskTracker>>,
    pub socket: PathBuf,
    pub started_at_unix: u64,
}

impl DaemonContext {
    pub fn new(config: Config, provider: Arc<dyn RepositoryProvider>, socket: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            provider,
            tasks: Arc::new(RwLock::new(TaskTracker::new())),
            socket,
            started_at_unix: unix_seconds_now(),
        }
    }
}

/// Load the configuration and block the current thread until the daemon exits.
pub fn start_blocking(home: &Path, config_path: Option<PathBuf>) -> Result<(), DaemonError> {
    init_tracing();
    let config_path = config_path.unwrap_or_else(|| config::config_path_at(home));
    let config = config::load_at(&config_path)?;
    let provider = Arc::new(LocalCatalogProvider::new(config.catalog_root(home)));
    let context = DaemonContext::new(config, provider, crate::paths::socket_path(home));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(context))
}

/// Run the daemon until `stop` or ctrl-c.
pub async fn run(context: DaemonContext) -> Result<(), DaemonError> {
    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let context = context.clone();
        tokio::spawn(async move {
            let result = sync_processor_task(context, sync_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let context = context.clone();
        tokio::spawn(async move {
            let result =
                socket_server_task(context, sync_tx, shutdown.clone(), shutdown.subscribe()).await;
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

    let (processor_result, socket_result, signal_result) =
        tokio::join!(processor_handle, socket_handle, signal_handle);

    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn sync_processor_task(
    context: DaemonContext,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let permits = Arc::new(Semaphore::new(context.config.max_children));
    let mut jobs = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            Some(joined) = jobs.join_next(), if !jobs.is_empty() => log_job_exit(joined),
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let context = context.clone();
                let permits = Arc::clone(&permits);
                let span = tracing::info_span!("region", region = %job.region, task_id = %job.task_id);
                jobs.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    let outcome = run_sync_job(&context, &job.region).await;
                    match &outcome {
                        Ok(report) => tracing::info!(
                            uploads = report.execution.uploads,
                            metadata_updates = report.execution.metadata_updates,
                            "api-triggered sync completed",
                        ),
                        Err(err) => tracing::error!(error = %err, "api-triggered sync failed"),
                    }
                    context
                        .tasks
                        .write()
                        .await
                        .finish(&job.task_id, outcome.map_err(|e| e.to_string()));
                }.instrument(span));
            }
        }
    }

    // Started mutations run to completion before the runtime is dropped.
    if !jobs.is_empty() {
        tracing::info!(in_flight = jobs.len(), "waiting for running syncs before shutdown");
    }
    while let Some(joined) = jobs.join_next().await {
        log_job_exit(joined);
    }

    Ok(())
}

fn log_job_exit(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        tracing::error!(error = %err, "sync job aborted");
    }
}

async fn run_sync_job(
    context: &DaemonContext,
    region: &RegionId,
) -> Result<glancesync_sync::RegionReport, DaemonError> {
    let master = load_master(&context.config, context.provider.as_ref()).await?;
    let report = sync_region(
        &context.config,
        context.provider.as_ref(),
        &master,
        region,
        false,
    )
    .await?;
    Ok(report)
}

async fn socket_server_task(
    context: DaemonContext,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = context.socket.clone();
    if let Some(parent) = socket.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let context = context.clone();
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, context, sync_tx, shutdown_tx).await {
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
    context: DaemonContext,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
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

        let response = match dispatch(&context, &sync_tx, &request).await {
            Ok(data) => DaemonResponse::ok(data),
            Err(err) => DaemonResponse::error(err.to_string()),
        };
        let stopping = request.cmd == "stop" && response.ok;
        write_response(&mut writer, &response).await?;
        if stopping {
            let _ = shutdown_tx.send(());
            break;
        }
    }

    Ok(())
}

async fn dispatch(
    context: &DaemonContext,
    sync_tx: &mpsc::Sender<SyncJob>,
    request: &DaemonRequest,
) -> Result<Value, DaemonError> {
    match request.cmd.as_str() {
        "status" => Ok(build_status_payload(context).await),
        "sync" => {
            let id = required(&request.region, "region")?;
            let region = context.config.resolve_region(id)?;
            if region == context.config.master_region_id() {
                return Err(DaemonError::Protocol(format!(
                    "{region} is the master region"
                )));
            }
            let (task, created) = context.tasks.write().await.start(&region);
            if created {
                tracing::info!(region = %region, task_id = %task.task_id, "sync task created");
                let queued = sync_tx
                    .send(SyncJob {
                        task_id: task.task_id.clone(),
                        region,
                    })
                    .await;
                if queued.is_err() {
                    let err = DaemonError::ChannelClosed("sync queue");
                    context
                        .tasks
                        .write()
                        .await
                        .finish(&task.task_id, Err(err.to_string()));
                    return Err(err);
                }
            }
            Ok(json!({ "task_id": task.task_id, "status": task.status }))
        }
        "task" => {
            let task_id = required(&request.task_id, "task_id")?;
            let tasks = context.tasks.read().await;
            Ok(serde_json::to_value(tasks.get(task_id)?)?)
        }
        "forget" => {
            let task_id = required(&request.task_id, "task_id")?;
            let task = context.tasks.write().await.forget(task_id)?;
            Ok(json!({ "task_id": task.task_id, "forgotten": true }))
        }
        "stop" => Ok(json!({ "stopping": true })),
        other => Err(DaemonError::Protocol(format!("unknown command '{other}'"))),
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, DaemonError> {
    field
        .as_deref()
        .ok_or_else(|| DaemonError::Protocol(format!("missing field '{name}'")))
}

async fn build_status_payload(context: &DaemonContext) -> Value {
    let tasks = context.tasks.read().await;
    let listed: Vec<Value> = tasks
        .list()
        .into_iter()
        .map(|task| {
            json!({
                "task_id": task.task_id,
                "region": task.region,
                "status": task.status,
            })
        })
        .collect();

    json!({
        "running": true,
        "started_at_unix": context.started_at_unix,
        "master_region": context.config.master_region,
        "syncing": tasks.syncing_count(),
        "tasks": listed,
        "socket": context.socket.display().to_string(),
    })
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

/// Install the `tracing` subscriber used by the daemon and the CLI. Logs go to stderr.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use glancesync_core::{ConfigFile, Image, TargetConfig};
    use glancesync_sync::{MemoryProvider, MemoryRepository};
    use tempfile::TempDir;

    use crate::tasks::TaskStatus;

    fn context(dir: &Path) -> DaemonContext {
        context_with(dir, Arc::new(MemoryRepository::new("t")))
    }

    fn context_with(dir: &Path, repo: Arc<MemoryRepository>) -> DaemonContext {
        let mut file = ConfigFile {
            master_region: "Spain2".into(),
            max_children: 1,
            catalog_dir: None,
            backup_dir: None,
            targets: Default::default(),
        };
        file.targets.insert(
            "master".into(),
            TargetConfig {
                credential: "admin,secret,admin".into(),
                ..TargetConfig::default()
            },
        );
        let config = Config::from_file(file).expect("config");
        let provider = MemoryProvider::new().with_target("master", repo);
        DaemonContext::new(config, Arc::new(provider), dir.join("daemon.sock"))
    }

    fn request(cmd: &str, region: Option<&str>, task_id: Option<&str>) -> DaemonRequest {
        DaemonRequest {
            cmd: cmd.to_string(),
            region: region.map(str::to_string),
            task_id: task_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn sync_request_is_deduplicated_per_region() {
        let dir = TempDir::new().expect("dir");
        let context = context(dir.path());
        let (sync_tx, mut sync_rx) = mpsc::channel(8);

        let first = dispatch(&context, &sync_tx, &request("sync", Some("Trento"), None))
            .await
            .expect("first sync");
        let second = dispatch(&context, &sync_tx, &request("sync", Some("Trento"), None))
            .await
            .expect("second sync");
        assert_eq!(first["task_id"], second["task_id"]);
        assert_eq!(first["status"], json!("syncing"));

        let job = sync_rx.recv().await.expect("one job queued");
        assert_eq!(job.region, RegionId::new("master", "Trento"));
        assert!(sync_rx.try_recv().is_err(), "no second job");
    }

    #[tokio::test]
    async fn master_region_and_bad_requests_are_rejected() {
        let dir = TempDir::new().expect("dir");
        let context = context(dir.path());
        let (sync_tx, _sync_rx) = mpsc::channel(8);

        for req in [
            request("sync", Some("Spain2"), None),
            request("sync", None, None),
            request("sync", Some("nowhere:Trento"), None),
            request("task", None, Some("missing")),
            request("bogus", None, None),
        ] {
            assert!(
                dispatch(&context, &sync_tx, &req).await.is_err(),
                "{req:?} accepted"
            );
        }
    }

    #[tokio::test]
    async fn forget_while_syncing_is_refused() {
        let dir = TempDir::new().expect("dir");
        let context = context(dir.path());
        let (sync_tx, _sync_rx) = mpsc::channel(8);

        let started = dispatch(&context, &sync_tx, &request("sync", Some("Trento"), None))
            .await
            .expect("sync");
        let task_id = started["task_id"].as_str().expect("task id").to_string();
        let err = dispatch(&context, &sync_tx, &request("forget", None, Some(&task_id)))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::TaskBusy(_)));

        let status = build_status_payload(&context).await;
        assert_eq!(status["syncing"], json!(1));
        assert_eq!(status["tasks"][0]["task_id"], json!(task_id));
    }

    #[tokio::test]
    async fn closed_queue_fails_the_new_task() {
        let dir = TempDir::new().expect("dir");
        let context = context(dir.path());
        let (sync_tx, sync_rx) = mpsc::channel(8);
        drop(sync_rx);

        let err = dispatch(&context, &sync_tx, &request("sync", Some("Trento"), None))
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::ChannelClosed(_)));

        let tasks = context.tasks.read().await;
        assert_eq!(tasks.syncing_count(), 0, "region is free for a later request");
        let task = tasks.list()[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_running_sync() {
        let dir = TempDir::new().expect("dir");
        let repo = Arc::new(
            MemoryRepository::new("t").with_upload_delay(Duration::from_millis(500)),
        );
        let mut base = Image::new("m-1", "base");
        base.is_public = true;
        base.checksum = "c1".into();
        base.size = 10;
        repo.insert_image("Spain2", base).await;
        repo.add_region("Trento").await;

        let context = context_with(dir.path(), Arc::clone(&repo));
        let (sync_tx, sync_rx) = mpsc::channel(8);
        let (shutdown_tx, _) = broadcast::channel(4);
        let processor = tokio::spawn(sync_processor_task(
            context.clone(),
            sync_rx,
            shutdown_tx.subscribe(),
        ));

        let started = dispatch(&context, &sync_tx, &request("sync", Some("Trento"), None))
            .await
            .expect("sync");
        let task_id = started["task_id"].as_str().expect("task id").to_string();

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).expect("shutdown");
        processor.await.expect("join").expect("processor");

        let tasks = context.tasks.read().await;
        assert_eq!(tasks.get(&task_id).expect("task").status, TaskStatus::Synced);
        assert_eq!(repo.find("Trento", "base").await.len(), 1);
    }
}
