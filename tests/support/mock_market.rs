use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    sync::{Arc, RwLock},
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Identifies one listings page: the window lower bound (`None` for the
/// unfiltered tip feed) plus the cursor.
pub type PageKey = (Option<i64>, Option<String>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub listed_after: Option<i64>,
    pub listed_before: Option<i64>,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Default)]
struct MarketState {
    pages: HashMap<PageKey, Value>,
    failures: HashMap<PageKey, VecDeque<u16>>,
    requests: Vec<RecordedRequest>,
}

/// Scripted listings feed shared between a test and its mock server.
#[derive(Clone, Default)]
pub struct MockMarket {
    state: Arc<RwLock<MarketState>>,
}

impl MockMarket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `orders` with `next` for the page at `key`. Unknown keys serve an
    /// empty, exhausted page.
    pub fn set_page(&self, key: PageKey, orders: Vec<Value>, next: Option<&str>) {
        let mut state = self.state.write().expect("mock market poisoned");
        state
            .pages
            .insert(key, json!({ "orders": orders, "next": next }));
    }

    /// Makes the next `count` requests for `key` answer with `status`.
    pub fn fail_page(&self, key: PageKey, status: u16, count: usize) {
        let mut state = self.state.write().expect("mock market poisoned");
        state
            .failures
            .entry(key)
            .or_default()
            .extend(std::iter::repeat(status).take(count));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state
            .read()
            .expect("mock market poisoned")
            .requests
            .clone()
    }

    pub fn requests_for(&self, listed_after: Option<i64>) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.listed_after == listed_after)
            .collect()
    }

    fn respond(&self, request: RecordedRequest) -> (StatusCode, Value) {
        let key = (request.listed_after, request.cursor.clone());
        let mut state = self.state.write().expect("mock market poisoned");
        state.requests.push(request);

        if let Some(status) = state.failures.get_mut(&key).and_then(VecDeque::pop_front) {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, json!({ "errors": ["scripted failure"] }));
        }

        let page = state
            .pages
            .get(&key)
            .cloned()
            .unwrap_or_else(|| json!({ "orders": [], "next": null }));
        (StatusCode::OK, page)
    }
}

pub struct MockMarketServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockMarketServer {
    pub async fn start(market: MockMarket) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock market listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let market = market.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(market.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock market server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(market: MockMarket, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(reply(StatusCode::METHOD_NOT_ALLOWED, json!("unsupported method")));
    }
    if !req.uri().path().ends_with("/seaport/listings") {
        return Ok(reply(StatusCode::NOT_FOUND, json!("unknown route")));
    }

    let params = query_params(req.uri().query().unwrap_or_default());
    let request = RecordedRequest {
        listed_after: params.get("listed_after").and_then(|v| v.parse().ok()),
        listed_before: params.get("listed_before").and_then(|v| v.parse().ok()),
        cursor: params.get("cursor").cloned(),
        limit: params.get("limit").and_then(|v| v.parse().ok()),
    };

    let (status, body) = market.respond(request);
    Ok(reply(status, body))
}

fn query_params(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

fn reply(status: StatusCode, body: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}
