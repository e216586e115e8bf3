//! Process entry point: parses the CLI, loads the YAML configuration,
//! installs logging, takes the pidfile lock, spawns one pinned worker
//! thread per configured CPU, and serves `/metrics` until a SHUTDOWN
//! command (or SIGTERM/SIGINT) is observed. Orchestration shape follows
//! `src/bin/proxmox-backup-proxy.rs`'s "init logging, build the server,
//! run it forever" structure, generalized to cachegrand's worker-per-CPU
//! model (`spec.md` §4.5) instead of a single hyper server.

use std::sync::Arc;

use anyhow::{Context, Result};
use cachegrand_config::{Cli, Config};
use cachegrand_worker::{ShutdownState, SnapshotRequestState, Worker, WorkerConfig};

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    let config = Config::from_file(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    cachegrand_config::logging::init(&config.logs).context("initializing logging")?;

    let _pidfile_guard = match &config.pidfile_path {
        Some(path) => Some(cachegrand_config::PidfileGuard::acquire(path).context("acquiring pidfile lock")?),
        None => None,
    };

    log::info!("cachegrand starting up");

    let db = Arc::new(cachegrand_storage::StorageDb::new(config.storage_db_config()));
    let dispatcher_config = Arc::new(config.dispatcher_config());
    let shutdown = ShutdownState::new();
    let snapshot_requests = SnapshotRequestState::new();
    let epoch = cachegrand_epoch::Registry::<()>::new(|_discarded: Vec<()>| {});

    let worker_count = config.worker_count().max(1);
    // "auto" (no explicit `cpus` list) pins one worker per CPU in order;
    // an explicit list pins each worker to the CPU at the same index.
    let cpu_ids: Vec<Option<usize>> = if config.cpus.is_empty() {
        (0..worker_count).map(Some).collect()
    } else {
        config
            .cpus
            .iter()
            .map(|raw| raw.parse::<usize>().ok())
            .collect()
    };

    let mut handles = Vec::with_capacity(worker_count);
    let mut worker_stats = Vec::with_capacity(worker_count);

    for worker_id in 0..worker_count {
        let worker_config = WorkerConfig {
            worker_id,
            cpu_id: cpu_ids.get(worker_id).copied().flatten(),
            bind_addrs: config.network.bindings.clone(),
            max_clients: config.network.max_clients as usize,
            tick_interval_ms: 1_000,
            snapshot: config.snapshot_schedule(),
        };

        let worker = Worker::new(
            worker_config,
            db.clone(),
            dispatcher_config.clone(),
            shutdown.clone(),
            snapshot_requests.clone(),
            epoch.clone(),
        );
        worker_stats.push(worker.stats().clone());

        let handle = std::thread::Builder::new()
            .name(format!("cachegrand-worker-{worker_id}"))
            .spawn(move || worker.run())
            .with_context(|| format!("spawning worker thread {worker_id}"))?;
        handles.push(handle);
    }

    log::info!("cachegrand: {worker_count} worker(s) started");

    run_until_shutdown(db, worker_stats, shutdown.clone())?;

    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::error!("worker exited with an error: {err}"),
            Err(_) => log::error!("worker thread panicked"),
        }
    }

    log::info!("cachegrand: shutdown complete");
    Ok(())
}

/// Drives the metrics server and OS signal handling on a small
/// multi-thread tokio runtime until the shared [`ShutdownState`] latches,
/// mirroring the teacher's own top-level `hyper::rt::run(server)` call
/// in `proxmox-backup-proxy.rs`, generalized to also race against
/// `SIGTERM`/`SIGINT`.
fn run_until_shutdown(
    db: Arc<cachegrand_storage::StorageDb>,
    worker_stats: Vec<Arc<cachegrand_worker::WorkerStats>>,
    shutdown: Arc<ShutdownState>,
) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("building the main-thread tokio runtime")?;

    runtime.block_on(async move {
        let metrics_state = Arc::new(cachegrand_metrics::MetricsState::new(db, worker_stats));
        let metrics_config = cachegrand_metrics::MetricsConfig::default();

        let metrics_shutdown = shutdown.clone();
        let metrics_task = tokio::spawn(cachegrand_metrics::serve(metrics_config.bind_addr, metrics_state, async move {
            wait_for_shutdown(metrics_shutdown).await;
        }));

        wait_for_signal_or_shutdown(shutdown.clone()).await;
        shutdown.trigger(false);

        match metrics_task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("metrics server exited with an error: {err}"),
            Err(err) => log::warn!("metrics server task panicked: {err}"),
        }
    });

    Ok(())
}

async fn wait_for_shutdown(shutdown: Arc<ShutdownState>) {
    while !shutdown.is_requested() {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

/// Waits for whichever comes first: SIGTERM, SIGINT, or another part of
/// the process (e.g. a worker's SHUTDOWN command) already having
/// latched the shared shutdown state.
async fn wait_for_signal_or_shutdown(shutdown: Arc<ShutdownState>) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            log::warn!("failed to install SIGTERM handler: {err}");
            return wait_for_shutdown(shutdown).await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => log::info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => log::info!("received SIGINT"),
        _ = wait_for_shutdown(shutdown) => log::info!("shutdown requested by a worker"),
    }
}
