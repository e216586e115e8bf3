//! The worker itself: CPU affinity, the fiber scheduler, the listener and
//! timer fibers, and the teardown sequence. `spec.md` §4.5.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use cachegrand_dispatcher::{Connection, DispatcherConfig};
use cachegrand_fiber::{sleep_ms, Scheduler};
use cachegrand_protocol::{ParseOutcome, ProtocolError, Value};
use cachegrand_storage::StorageDb;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::shutdown::ShutdownState;
use crate::snapshot::write_snapshot;
use crate::snapshot_request::SnapshotRequestState;
use crate::stats::WorkerStats;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Pins the calling OS thread to `cpu_id`, per "Configure CPU affinity"
/// in `spec.md` §4.5's startup sequence.
fn pin_to_cpu(cpu_id: usize) -> std::io::Result<()> {
    let mut cpu_set = nix::sched::CpuSet::new();
    cpu_set
        .set(cpu_id)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    nix::sched::sched_setaffinity(nix::unistd::Pid::from_raw(0), &cpu_set)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

fn bind_reuseport(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// One pinned worker: owns a fiber scheduler, a shared handle to the
/// storage DB and dispatcher configuration, and its own stats block.
/// Construction is cheap; [`Worker::run`] blocks the calling OS thread
/// until the worker set is told to shut down.
pub struct Worker {
    config: WorkerConfig,
    db: Arc<StorageDb>,
    dispatcher_config: Arc<DispatcherConfig>,
    stats: Arc<WorkerStats>,
    shutdown: Arc<ShutdownState>,
    snapshot_requests: Arc<SnapshotRequestState>,
    epoch: Arc<cachegrand_epoch::Registry<()>>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        db: Arc<StorageDb>,
        dispatcher_config: Arc<DispatcherConfig>,
        shutdown: Arc<ShutdownState>,
        snapshot_requests: Arc<SnapshotRequestState>,
        epoch: Arc<cachegrand_epoch::Registry<()>>,
    ) -> Self {
        let stats = Arc::new(WorkerStats::new(now_millis()));
        Self {
            config,
            db,
            dispatcher_config,
            stats,
            shutdown,
            snapshot_requests,
            epoch,
        }
    }

    pub fn stats(&self) -> &Arc<WorkerStats> {
        &self.stats
    }

    /// Runs the worker to completion: binds listeners, spawns fibers,
    /// blocks until `shutdown` is requested, then tears down in the order
    /// `spec.md` §4.5 "Teardown" specifies.
    pub fn run(self) -> std::io::Result<()> {
        if let Some(cpu_id) = self.config.cpu_id {
            if let Err(err) = pin_to_cpu(cpu_id) {
                log::warn!("worker {}: failed to pin to cpu {cpu_id}: {err}", self.config.worker_id);
            }
        }

        let scheduler = Scheduler::new()?;
        let epoch_registration = self.epoch.register_thread();

        let mut listener_handles = Vec::new();
        for addr in self.config.bind_addrs.clone() {
            let db = self.db.clone();
            let dispatcher_config = self.dispatcher_config.clone();
            let stats = self.stats.clone();
            let shutdown = self.shutdown.clone();
            let snapshot_requests = self.snapshot_requests.clone();
            let max_clients = self.config.max_clients;
            let worker_id = self.config.worker_id;
            let handle = scheduler.spawn(move |cancel| {
                listener_fiber(
                    worker_id,
                    addr,
                    db,
                    dispatcher_config,
                    stats,
                    shutdown,
                    snapshot_requests,
                    max_clients,
                    cancel,
                )
            });
            listener_handles.push(handle);
        }

        let timer_handle = {
            let db = self.db.clone();
            let stats = self.stats.clone();
            let shutdown = self.shutdown.clone();
            let snapshot_requests = self.snapshot_requests.clone();
            let snapshot = self.config.snapshot.clone();
            let tick_interval_ms = self.config.tick_interval_ms;
            scheduler.spawn(move |cancel| {
                timer_fiber(db, stats, shutdown, snapshot_requests, snapshot, tick_interval_ms, cancel)
            })
        };

        let shutdown_wait = self.shutdown.clone();
        let poll_interval_ms = self.config.tick_interval_ms.max(1).min(250);
        scheduler.run_until(async move {
            loop {
                if shutdown_wait.is_requested() {
                    break;
                }
                sleep_ms(poll_interval_ms).await;
            }
        });

        scheduler.request_terminate();
        scheduler.run_until(async move {
            for handle in listener_handles {
                let _ = handle.join().await;
            }
            let _ = timer_handle.join().await;
        });

        if self.shutdown.save_requested() || self.config.snapshot.snapshot_at_shutdown {
            match write_snapshot(&self.db, &self.config.snapshot, now_millis()) {
                Ok(true) => self.snapshot_requests.record_success(),
                Ok(false) => {}
                Err(err) => log::error!("worker {}: shutdown snapshot failed: {err}", self.config.worker_id),
            }
        }

        epoch_registration.advance_epoch();
        drop(epoch_registration);
        self.epoch.collect();

        log::info!("worker {}: terminated", self.config.worker_id);
        Ok(())
    }
}

async fn listener_fiber(
    worker_id: usize,
    addr: SocketAddr,
    db: Arc<StorageDb>,
    dispatcher_config: Arc<DispatcherConfig>,
    stats: Arc<WorkerStats>,
    shutdown: Arc<ShutdownState>,
    snapshot_requests: Arc<SnapshotRequestState>,
    max_clients: usize,
    cancel: CancellationToken,
) {
    let listener = match bind_reuseport(addr) {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("worker {worker_id}: failed to bind {addr}: {err}");
            return;
        }
    };
    log::info!("worker {worker_id}: listening on {addr}");

    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = listener.accept() => res,
        };
        let (stream, _peer) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                log::warn!("worker {worker_id}: accept failed: {err}");
                continue;
            }
        };

        if stats.active_connection_count() >= max_clients {
            drop(stream);
            continue;
        }

        stats.record_connection_accepted(now_millis(), false);
        let db = db.clone();
        let dispatcher_config = dispatcher_config.clone();
        let conn_stats = stats.clone();
        let shutdown = shutdown.clone();
        let snapshot_requests = snapshot_requests.clone();
        let child_cancel = cancel.child_token();
        tokio::task::spawn_local(async move {
            serve_connection(
                stream,
                db,
                dispatcher_config,
                conn_stats.clone(),
                shutdown,
                snapshot_requests,
                child_cancel,
            )
            .await;
            conn_stats.record_connection_closed(false);
        });
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    db: Arc<StorageDb>,
    dispatcher_config: Arc<DispatcherConfig>,
    stats: Arc<WorkerStats>,
    shutdown: Arc<ShutdownState>,
    snapshot_requests: Arc<SnapshotRequestState>,
    cancel: CancellationToken,
) {
    let mut conn = Connection::new();
    let mut inbound = BytesMut::with_capacity(4096);
    let mut outbound = BytesMut::new();
    let mut allow_inline = true;

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = stream.read_buf(&mut inbound) => res,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                log::debug!("worker: connection read error: {err}");
                break;
            }
        };
        let now_ms = now_millis();
        stats.record_received(now_ms, n as u64);

        loop {
            match cachegrand_protocol::parse_command(&inbound, allow_inline) {
                Ok(ParseOutcome::Incomplete) => break,
                Ok(ParseOutcome::Complete(command, consumed)) => {
                    allow_inline = false;
                    let raw_len = consumed;
                    let _ = inbound.split_to(consumed);
                    if command.args.is_empty() {
                        continue;
                    }
                    let mut shutdown_flag: Option<bool> = None;
                    let mut snapshot_requested = false;
                    let args: Vec<Bytes> = command.args;
                    let reply = cachegrand_dispatcher::dispatch(
                        &mut conn,
                        &db,
                        &dispatcher_config,
                        &args,
                        raw_len,
                        now_millis(),
                        &mut shutdown_flag,
                        &mut snapshot_requested,
                    );
                    reply.encode(&mut outbound, conn.resp_version);
                    if let Some(save) = shutdown_flag {
                        shutdown.trigger(save);
                    }
                    if snapshot_requested {
                        snapshot_requests.request();
                    }
                    if conn.is_closed() {
                        break;
                    }
                }
                Err(err) => {
                    let offset = match err {
                        ProtocolError::ParsingError(offset) => offset,
                        _ => 0,
                    };
                    Value::Error(format!("ERR parsing error '{offset}'")).encode(&mut outbound, conn.resp_version);
                    conn.close();
                    break;
                }
            }
        }

        if !outbound.is_empty() {
            stats.record_sent(now_millis(), outbound.len() as u64);
            if let Err(err) = stream.write_all(&outbound).await {
                log::debug!("worker: connection write error: {err}");
                break;
            }
            outbound.clear();
        }

        if conn.is_closed() {
            break;
        }
    }
}

async fn timer_fiber(
    db: Arc<StorageDb>,
    stats: Arc<WorkerStats>,
    shutdown: Arc<ShutdownState>,
    snapshot_requests: Arc<SnapshotRequestState>,
    snapshot: crate::config::SnapshotSchedule,
    tick_interval_ms: u64,
    cancel: CancellationToken,
) {
    let mut last_snapshot_ms = now_millis();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep_ms(tick_interval_ms.max(1)) => {}
        }
        if shutdown.is_requested() {
            break;
        }

        let now_ms = now_millis();
        stats.maybe_reset_per_minute(now_ms);

        let swept = db.sweep_expired(now_ms);
        if swept > 0 {
            log::debug!("worker: swept {swept} expired keys");
        }

        let due_on_demand = snapshot_requests.take_requested();
        let due_on_interval = match snapshot.interval_ms {
            Some(interval_ms) => now_ms.saturating_sub(last_snapshot_ms) >= interval_ms,
            None => false,
        };
        if due_on_demand || due_on_interval {
            match write_snapshot(&db, &snapshot, now_ms) {
                Ok(true) => {
                    last_snapshot_ms = now_ms;
                    snapshot_requests.record_success();
                }
                Ok(false) => {}
                Err(err) => log::error!("worker: snapshot failed: {err}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachegrand_dispatcher::DispatcherConfig;
    use cachegrand_storage::StorageDbConfig;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT_PORT: AtomicU32 = AtomicU32::new(16_379);

    fn pick_addr() -> SocketAddr {
        let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed) as u16;
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn worker_serves_set_then_get_over_a_real_socket() {
        let addr = pick_addr();
        let db = Arc::new(StorageDb::new(StorageDbConfig::default()));
        let dispatcher_config = Arc::new(DispatcherConfig::default());
        let shutdown = ShutdownState::new();
        let snapshot_requests = SnapshotRequestState::new();
        let epoch = cachegrand_epoch::Registry::new(|_: Vec<()>| {});

        let mut config = WorkerConfig::default();
        config.bind_addrs = vec![addr];
        config.tick_interval_ms = 50;

        let worker = Worker::new(config, db, dispatcher_config, shutdown.clone(), snapshot_requests, epoch);
        let handle = std::thread::spawn(move || worker.run());

        // Give the listener fiber a moment to bind.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let mut stream = TcpStream::connect(addr).await.expect("connect to worker");
        stream.write_all(b"*3\r\n$3\r\nSET\r\n$5\r\na_key\r\n$7\r\nb_value\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        stream.write_all(b"*2\r\n$3\r\nGET\r\n$5\r\na_key\r\n").await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"$7\r\nb_value\r\n");

        stream.write_all(b"*1\r\n$8\r\nSHUTDOWN\r\n").await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n");

        drop(stream);
        handle.join().expect("worker thread panicked").expect("worker returned an error");
    }

    #[tokio::test]
    async fn bgsave_triggers_an_on_demand_snapshot_write() {
        let addr = pick_addr();
        let db = Arc::new(StorageDb::new(StorageDbConfig::default()));
        let dispatcher_config = Arc::new(DispatcherConfig::default());
        let shutdown = ShutdownState::new();
        let snapshot_requests = SnapshotRequestState::new();
        let epoch = cachegrand_epoch::Registry::new(|_: Vec<()>| {});

        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkerConfig::default();
        config.bind_addrs = vec![addr];
        config.tick_interval_ms = 20;
        config.snapshot.path = Some(dir.path().join("snap.bin"));

        let worker = Worker::new(
            config,
            db,
            dispatcher_config,
            shutdown.clone(),
            snapshot_requests.clone(),
            epoch,
        );
        let handle = std::thread::spawn(move || worker.run());

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let mut stream = TcpStream::connect(addr).await.expect("connect to worker");
        stream.write_all(b"*1\r\n$6\r\nBGSAVE\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+Background saving started\r\n");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while snapshot_requests.iteration() == 0 && std::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(snapshot_requests.iteration(), 1, "BGSAVE should have produced exactly one snapshot");

        stream.write_all(b"*1\r\n$8\r\nSHUTDOWN\r\n").await.unwrap();
        let _ = stream.read(&mut buf).await;

        drop(stream);
        handle.join().expect("worker thread panicked").expect("worker returned an error");
    }
}
