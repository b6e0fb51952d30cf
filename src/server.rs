use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use crate::metrics::Metrics;

static TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Clone)]
pub struct MetricsState {
    metrics: Arc<Metrics>,
    source_count: usize,
}

impl MetricsState {
    pub fn new(metrics: Arc<Metrics>, source_count: usize) -> Self {
        Self {
            metrics,
            source_count,
        }
    }
}

pub async fn serve(addr: SocketAddr, state: MetricsState) -> Result<(), hyper::Error> {
    let make_service = make_service_fn(move |_| {
        let state = state.clone();

        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let response = route(&req, &state);
                async move { Ok::<_, Infallible>(response) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_service);
    tracing::info!("serving metrics on http://{}/metrics", server.local_addr());
    server.await
}

pub fn route(req: &Request<Body>, state: &MetricsState) -> Response<Body> {
    if req.method() != Method::GET {
        return text(StatusCode::METHOD_NOT_ALLOWED, String::new());
    }

    match req.uri().path() {
        "/metrics" | "/metrics/" => {
            let lines = state.metrics.snapshot().render(state.source_count);
            text(StatusCode::OK, lines.join("\n") + "\n")
        }
        "/" => text(StatusCode::OK, "up 1\n".into()),
        _ => text(StatusCode::NOT_FOUND, String::new()),
    }
}

fn text(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    response
}
