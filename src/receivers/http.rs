// SPDX-License-Identifier: Apache-2.0

//! HTTP ingestion: `POST /` with a JSON object body produces one event.

use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use tokio_util::sync::CancellationToken;
use tower::{BoxError, Service, ServiceBuilder};
use tower_http::limit::{RequestBodyLimit, RequestBodyLimitLayer};
use tower_http::trace::{HttpMakeClassifier, Trace, TraceLayer};
use tracing::{debug, error};

use crate::event::Event;
use crate::listener::Listener;
use crate::topology::EventHandler;

pub const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

const DEFAULT_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpReceiver<H> {
    handler: Arc<H>,
    max_body_size: usize,
    header_timeout: Duration,
}

impl<H: EventHandler> HttpReceiver<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            max_body_size: MAX_BODY_SIZE,
            header_timeout: DEFAULT_HEADER_TIMEOUT,
        }
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Accept connections until cancelled, then let in-flight requests finish.
    pub async fn serve(&self, listener: Listener, cancel: CancellationToken) -> Result<(), BoxError> {
        let svc = TowerToHyperService::new(build_service(
            self.handler.clone(),
            self.max_body_size,
        ));

        let timer = TokioTimer::new();
        let graceful = GracefulShutdown::new();
        let mut builder = Builder::new(TokioExecutor::new());
        builder
            .http1()
            .header_read_timeout(Some(self.header_timeout))
            .timer(timer.clone());
        builder.http2().timer(timer);

        let listener = listener.into_async()?;
        debug!(addr = ?listener.local_addr().ok(), "HTTP receiver listening");

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
                    // Clients dropping idle keep-alive connections is routine.
                    let msg = format!("{:?}", e);
                    if !msg.contains("NotConnected") && !msg.contains("HeaderTimeout") {
                        error!(error = %msg, "Error serving connection");
                    }
                }
            });
        }

        graceful.shutdown().await;
        Ok(())
    }
}

fn build_service<H: EventHandler>(
    handler: Arc<H>,
    max_body_size: usize,
) -> Trace<RequestBodyLimit<IngestService<H>>, HttpMakeClassifier> {
    ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .service(IngestService { handler })
}

struct IngestService<H> {
    handler: Arc<H>,
}

impl<H> Clone for IngestService<H> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
        }
    }
}

impl<H, B> Service<Request<B>> for IngestService<H>
where
    H: EventHandler,
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Display,
{
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        if req.uri().path() != "/" {
            return Box::pin(futures::future::ok(response(StatusCode::NOT_FOUND)));
        }
        if req.method() != Method::POST {
            return Box::pin(futures::future::ok(response(
                StatusCode::METHOD_NOT_ALLOWED,
            )));
        }

        let handler = self.handler.clone();
        Box::pin(async move { Ok(ingest(req, handler).await) })
    }
}

async fn ingest<H, B>(req: Request<B>, handler: Arc<H>) -> Response<Full<Bytes>>
where
    H: EventHandler,
    B: Body,
    B::Error: Display,
{
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let msg = e.to_string();
            if msg.contains("length limit exceeded") {
                return response(StatusCode::PAYLOAD_TOO_LARGE);
            }
            debug!(error = %msg, "Failed to read request body");
            return response(StatusCode::BAD_REQUEST);
        }
    };

    let event = match serde_json::from_slice::<serde_json::Value>(&body)
        .map_err(|e| e.to_string())
        .and_then(|v| Event::try_from(v).map_err(|_| "body is not a JSON object".to_string()))
    {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Rejected request body");
            return response(StatusCode::BAD_REQUEST);
        }
    };

    handler.handle(event).await;
    response(StatusCode::ACCEPTED)
}

fn response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::default());
    *resp.status_mut() = status;
    resp
}
