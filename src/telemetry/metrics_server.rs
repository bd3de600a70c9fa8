// SPDX-License-Identifier: Apache-2.0

//! Prometheus text exposition of the pipeline counters at `GET /metrics`.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use tokio_util::sync::CancellationToken;
use tower::{BoxError, Service};
use tracing::{debug, error};

use crate::listener::Listener;

pub struct MetricsServer {
    exporter: PrometheusExporter,
}

impl MetricsServer {
    pub fn new(exporter: PrometheusExporter) -> Self {
        Self { exporter }
    }

    /// Serve scrapes until cancelled, then drain open connections.
    pub async fn serve(&self, listener: Listener, cancel: CancellationToken) -> Result<(), BoxError> {
        let svc = TowerToHyperService::new(MetricsService {
            exporter: self.exporter.clone(),
        });

        let graceful = GracefulShutdown::new();
        let mut builder = Builder::new(TokioExecutor::new());
        builder.http1().timer(TokioTimer::new());

        let listener = listener.into_async()?;
        debug!(addr = ?listener.local_addr().ok(), "Metrics server listening");

        loop {
            let stream = tokio::select! {
                r = listener.accept() => match r {
                    Ok((stream, _)) => stream,
                    Err(e) => return Err(e.into()),
                },
                _ = cancel.cancelled() => break,
            };

            let conn = builder.serve_connection(TokioIo::new(stream), svc.clone());
            let fut = graceful.watch(conn.into_owned());
            tokio::spawn(async move {
                if let Err(e) = fut.await {
                    error!(error = ?e, "Error serving metrics connection");
                }
            });
        }

        graceful.shutdown().await;
        Ok(())
    }
}

#[derive(Clone)]
struct MetricsService {
    exporter: PrometheusExporter,
}

impl MetricsService {
    fn respond(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        if path != "/metrics" {
            return text_response(StatusCode::NOT_FOUND, Bytes::from_static(b"Not Found"));
        }
        if method != Method::GET {
            return text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                Bytes::from_static(b"Method Not Allowed"),
            );
        }

        let mut output = Vec::new();
        match self.exporter.export(&mut output) {
            Ok(_) => text_response(StatusCode::OK, Bytes::from(output)),
            Err(e) => text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from(format!("Failed to export: {}", e)),
            ),
        }
    }
}

fn text_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

impl<B> Service<Request<B>> for MetricsService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let resp = self.respond(req.method(), req.uri().path());
        Box::pin(futures::future::ok(resp))
    }
}
