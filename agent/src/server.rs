//! HTTP server that exposes the last measurements.
//!
//! - `GET /` answers `OK`, for health checks.
//! - `GET /stats` answers the last [`CycleSnapshot`] as JSON: `{"timestamp": ..., "data": {...}}`.

use std::{convert::Infallible, future::Future, net::SocketAddr};

use anyhow::Context;
use hyper::{
    Body, Method, Request, Response, Server, StatusCode,
    service::{make_service_fn, service_fn},
};
use machinestats::poll::CycleSnapshot;
use tokio::sync::watch;

/// Answers one request.
fn handle_request(req: &Request<Body>, snapshots: &watch::Receiver<CycleSnapshot>) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/stats") => {
            let body = {
                let snapshot = snapshots.borrow();
                serde_json::to_vec(&*snapshot)
            };
            match body {
                Ok(json) => response(StatusCode::OK, "application/json", Body::from(json)),
                Err(e) => {
                    log::error!("Failed to serialize the last measurements: {e}");
                    response(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", Body::from("Internal Server Error"))
                }
            }
        }
        (&Method::GET, "/") => response(StatusCode::OK, "text/plain", Body::from("OK\n")),
        _ => response(StatusCode::NOT_FOUND, "text/plain", Body::from("Not Found")),
    }
}

fn response(status: StatusCode, content_type: &'static str, body: Body) -> Response<Body> {
    let mut res = Response::new(body);
    *res.status_mut() = status;
    res.headers_mut()
        .insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static(content_type));
    res
}

/// A bound HTTP server, ready to serve.
pub struct StatusServer {
    addr: SocketAddr,
    serve: std::pin::Pin<Box<dyn Future<Output = hyper::Result<()>> + Send>>,
}

impl StatusServer {
    /// Binds the server to `addr`. Use port 0 to pick a free port.
    ///
    /// The server stops when `shutdown` completes.
    pub fn bind(
        addr: SocketAddr,
        snapshots: watch::Receiver<CycleSnapshot>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<Self> {
        let make_svc = make_service_fn(move |_conn| {
            let snapshots = snapshots.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let res = handle_request(&req, &snapshots);
                    async move { Ok::<_, Infallible>(res) }
                }))
            }
        });
        let server = Server::try_bind(&addr)
            .with_context(|| format!("failed to listen on {addr}"))?
            .serve(make_svc);
        let addr = server.local_addr();
        let serve = Box::pin(server.with_graceful_shutdown(shutdown));
        Ok(Self { addr, serve })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves requests until the shutdown signal.
    pub async fn run(self) -> anyhow::Result<()> {
        log::info!("HTTP server listening on http://{}", self.addr);
        self.serve.await.context("http server error")?;
        log::info!("HTTP server stopped gracefully.");
        Ok(())
    }
}
