//! The scrape endpoint.
//!
//! Paths map to collectors:
//!
//! * `/metrics` and `/metrics/all` translate every group,
//! * `/metrics/<group>` translates that group alone,
//! * `/metrics/exporter` renders the exporter's own telemetry.
//!
//! Any other path is a 404. Each request performs its own acquisition.

use std::{collections::BTreeMap, fmt, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::{Method, Request, Response, StatusCode, header};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{
    net::TcpListener,
    pin,
    sync::{Semaphore, TryAcquireError},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    collector::Collector,
    exposition,
    signals::Watcher,
    source::Source,
    translate::Group,
};

/// Errors produced by the server.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Body = BoxBody<Bytes, hyper::Error>;

fn full(body: impl Into<Bytes>) -> Body {
    Full::new(body.into())
        .map_err(|never| match never {})
        .boxed()
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Body> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static(content_type),
    );
    response
}

/// Routing table from request path to response.
pub struct Endpoints {
    collectors: BTreeMap<String, Collector>,
    telemetry: Option<PrometheusHandle>,
}

impl fmt::Debug for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoints")
            .field("collectors", &self.collectors)
            .field("telemetry", &self.telemetry.is_some())
            .finish_non_exhaustive()
    }
}

impl Endpoints {
    /// Build the routing table over `source`.
    ///
    /// `telemetry` backs `/metrics/exporter`, which is a 404 without it.
    #[must_use]
    pub fn new(source: &Source, telemetry: Option<PrometheusHandle>) -> Self {
        let mut collectors = BTreeMap::new();
        let all = Collector::all(source.clone());
        collectors.insert("/metrics".to_string(), all.clone());
        collectors.insert("/metrics/all".to_string(), all);
        for group in Group::ALL {
            collectors.insert(
                format!("/metrics/{group}"),
                Collector::group(source.clone(), group),
            );
        }
        Self {
            collectors,
            telemetry,
        }
    }

    #[cfg(test)]
    fn paths(&self) -> impl Iterator<Item = &str> {
        self.collectors.keys().map(String::as_str)
    }

    /// Produce the response for `method` on `path`.
    pub async fn respond(&self, method: &Method, path: &str) -> Response<Body> {
        if method != Method::GET && method != Method::HEAD {
            return respond(
                StatusCode::METHOD_NOT_ALLOWED,
                "text/plain",
                "method not allowed\n",
            );
        }

        if let ("/metrics/exporter", Some(handle)) = (path, &self.telemetry) {
            return respond(StatusCode::OK, exposition::CONTENT_TYPE, handle.render());
        }

        let Some(collector) = self.collectors.get(path) else {
            debug!("no collector for {path}");
            return respond(StatusCode::NOT_FOUND, "text/plain", "not found\n");
        };

        let families = collector.collect().await;
        match exposition::encode(&families) {
            Ok(text) => respond(StatusCode::OK, exposition::CONTENT_TYPE, text),
            Err(err) => {
                error!("failed to encode {} exposition: {err}", collector.name());
                respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "failed to encode metrics\n",
                )
            }
        }
    }
}

async fn srv(
    req: Request<hyper::body::Incoming>,
    endpoints: Arc<Endpoints>,
) -> Result<Response<Body>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    Ok(endpoints.respond(&method, &path).await)
}

/// Bind `addr` and serve `endpoints` until `shutdown` is signaled.
///
/// # Errors
///
/// Returns an error if `addr` cannot be bound.
pub async fn run_httpd(
    addr: SocketAddr,
    concurrency_limit: usize,
    shutdown: Watcher,
    endpoints: Arc<Endpoints>,
) -> Result<(), Error> {
    let listener = TcpListener::bind(addr).await?;
    info!("serving metrics on http://{addr}/metrics");
    serve(listener, concurrency_limit, shutdown, endpoints).await
}

/// Serve `endpoints` on an already bound `listener`.
///
/// At most `concurrency_limit` connections are served at once, excess
/// connections are dropped on accept.
///
/// # Errors
///
/// Currently infallible once bound.
pub async fn serve(
    listener: TcpListener,
    concurrency_limit: usize,
    shutdown: Watcher,
    endpoints: Arc<Endpoints>,
) -> Result<(), Error> {
    let sem = Arc::new(Semaphore::new(concurrency_limit));
    let mut join_set = JoinSet::new();

    gauge!("exporter_connection_limit").set(concurrency_limit as f64);

    let shutdown_fut = shutdown.recv();
    pin!(shutdown_fut);
    loop {
        while let Some(res) = join_set.try_join_next() {
            if let Err(err) = res {
                warn!("connection task failed: {err}");
            }
        }
        gauge!("exporter_connection_tasks").set(join_set.len() as f64);
        let claimed_permits = concurrency_limit - sem.available_permits();
        gauge!("exporter_connections_current").set(claimed_permits as f64);

        tokio::select! {
            () = &mut shutdown_fut => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }

            incoming = listener.accept() => {
                let (stream, addr) = match incoming {
                    Ok(sa) => sa,
                    Err(e) => {
                        error!("error accepting connection: {e}");
                        continue;
                    }
                };
                debug!("accepted connection from {addr}");

                let sem = Arc::clone(&sem);
                let endpoints = Arc::clone(&endpoints);

                join_set.spawn(async move {
                    let permit = match sem.try_acquire() {
                        Ok(p) => p,
                        Err(TryAcquireError::Closed) => {
                            error!("semaphore closed");
                            return;
                        }
                        Err(TryAcquireError::NoPermits) => {
                            warn!("httpd over connection capacity, load shedding");
                            drop(stream);
                            return;
                        }
                    };

                    let service = hyper::service::service_fn(move |req| {
                        srv(req, Arc::clone(&endpoints))
                    });
                    let builder = auto::Builder::new(TokioExecutor::new());
                    if let Err(e) = builder
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        error!("error serving {addr}: {e}");
                    }
                    drop(permit);
                });
            }
        }
    }

    drop(listener);
    while join_set.join_next().await.is_some() {}
    Ok(())
}
