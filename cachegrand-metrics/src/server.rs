//! Wires a `hyper` server to the renderer. The teacher's own REST server
//! (`examples/proxmox-proxmox-backup/src/server/rest.rs`) is written
//! against hyper 0.12's `Service`/`NewService` traits and `futures` 0.1,
//! which don't exist in the workspace's `hyper = "0.14"` dependency; this
//! module instead uses 0.14's `service_fn`/`make_service_fn` idiom, which
//! is the idiomatic equivalent for the same "serve a handful of routes"
//! shape.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use cachegrand_storage::StorageDb;
use cachegrand_worker::WorkerStats;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use crate::render;

const NOT_FOUND_BODY: &str = "<html><head><title>404 Not Found</title></head>\
<body><h1>Not Found</h1></body></html>";

/// Everything a `/metrics` request needs to render a response: the
/// shared storage handle (for per-database key counts) and one
/// [`WorkerStats`] handle per worker thread (for the per-worker and
/// aggregated network/storage counters).
pub struct MetricsState {
    db: Arc<StorageDb>,
    workers: Vec<Arc<WorkerStats>>,
    env_labels: Vec<String>,
}

impl MetricsState {
    pub fn new(db: Arc<StorageDb>, workers: Vec<Arc<WorkerStats>>) -> Self {
        Self {
            db,
            workers,
            env_labels: render::collect_env_labels(),
        }
    }

    fn render(&self, now_ms: u64) -> String {
        let snapshots: Vec<_> = self.workers.iter().map(|w| w.snapshot()).collect();
        render::render(&self.db, &snapshots, now_ms, &self.env_labels)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

async fn handle(state: Arc<MetricsState>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() == Method::GET && req.uri().path() == "/metrics" {
        let body = state.render(now_millis());
        let response = Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; charset=ASCII")
            .body(Body::from(body))
            .expect("a fixed set of valid header values always builds a response");
        return Ok(response);
    }

    let response = Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("content-type", "text/html")
        .body(Body::from(NOT_FOUND_BODY))
        .expect("a fixed set of valid header values always builds a response");
    Ok(response)
}

/// Runs the metrics HTTP server until `shutdown` resolves. Returns once
/// the listener has stopped accepting new connections.
pub async fn serve(bind_addr: SocketAddr, state: Arc<MetricsState>, shutdown: impl std::future::Future<Output = ()>) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(state.clone(), req))) }
    });

    log::info!("metrics: listening on {bind_addr}");
    Server::bind(&bind_addr)
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachegrand_storage::StorageDbConfig;
    use hyper::body::to_bytes;

    #[tokio::test]
    async fn metrics_route_returns_plain_text_body() {
        let db = Arc::new(StorageDb::new(StorageDbConfig::default()));
        let state = Arc::new(MetricsState::new(db, vec![Arc::new(WorkerStats::new(0))]));

        let req = Request::builder().method(Method::GET).uri("/metrics").body(Body::empty()).unwrap();
        let response = handle(state, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("content-type").unwrap(), "text/plain; charset=ASCII");
        let body = to_bytes(response.into_body()).await.unwrap();
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("cachegrand_uptime"));
    }

    #[tokio::test]
    async fn unknown_route_returns_404_html() {
        let db = Arc::new(StorageDb::new(StorageDbConfig::default()));
        let state = Arc::new(MetricsState::new(db, vec![]));

        let req = Request::builder().method(Method::GET).uri("/").body(Body::empty()).unwrap();
        let response = handle(state, req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body()).await.unwrap();
        assert!(String::from_utf8(body.to_vec()).unwrap().contains("Not Found"));
    }
}
