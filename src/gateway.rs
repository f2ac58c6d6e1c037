use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::Router;
use bytes::Bytes;
use color_eyre::Report;
use http::header::{HeaderMap, HeaderName};
use http::{Request, Response, StatusCode};
use tracing::{info, warn};

use crate::intercept::{Chain, Upstream};

/// Connection-level headers that must not travel through the proxy.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// The front door: buffers every incoming request, runs it through the
/// interceptor chain and forwards to the upstream origin.
pub struct Gateway {
    chain: Chain,
    upstream: ProxyUpstream,
}

impl Gateway {
    pub fn new(chain: Chain, origin: &str) -> Result<Self, Report> {
        Ok(Self {
            chain,
            upstream: ProxyUpstream::new(origin)?,
        })
    }

    pub async fn run(self, addr: SocketAddr) -> Result<(), Report> {
        let gateway = Arc::new(self);
        let app = Router::new().fallback(proxy).with_state(gateway);

        info!("gateway listening on {addr}");
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}

async fn proxy(
    State(gateway): State<Arc<Gateway>>,
    req: Request<hyper::Body>,
) -> Response<hyper::Body> {
    let (parts, body) = req.into_parts();

    let body = match hyper::body::to_bytes(body).await {
        Ok(body) => body,
        Err(err) => {
            warn!("failed to buffer request body: {err}");
            let mut resp = Response::new(hyper::Body::empty());
            *resp.status_mut() = StatusCode::BAD_REQUEST;
            return resp;
        }
    };

    let req = Request::from_parts(parts, body);
    let resp = gateway.chain.handle(req, &gateway.upstream).await;

    resp.map(hyper::Body::from)
}

/// Forwards buffered requests to the configured origin. Redirects are not
/// followed; the client sees whatever the upstream answered.
struct ProxyUpstream {
    client: reqwest::Client,
    origin: String,
}

impl ProxyUpstream {
    fn new(origin: &str) -> Result<Self, Report> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            origin: origin.trim_end_matches('/').to_owned(),
        })
    }

    async fn forward(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Report> {
        let url = join_origin(&self.origin, &req);

        let mut headers = HeaderMap::new();
        for (name, value) in req.headers() {
            // host and content-length are recomputed for the new hop
            if is_hop_by_hop(name) || matches!(name.as_str(), "host" | "content-length") {
                continue;
            }
            headers.append(name, value.clone());
        }

        let upstream_resp = self
            .client
            .request(req.method().clone(), url)
            .headers(headers)
            .body(req.into_body())
            .send()
            .await?;

        let status = upstream_resp.status();
        let resp_headers = upstream_resp.headers().clone();
        let body = upstream_resp.bytes().await?;

        let mut resp = Response::new(body);
        *resp.status_mut() = status;
        for (name, value) in &resp_headers {
            if is_hop_by_hop(name) || name.as_str() == "content-length" {
                continue;
            }
            resp.headers_mut().append(name, value.clone());
        }

        Ok(resp)
    }
}

#[async_trait]
impl Upstream for ProxyUpstream {
    async fn handle(&self, req: Request<Bytes>) -> Response<Bytes> {
        match self.forward(req).await {
            Ok(resp) => resp,
            Err(err) => {
                warn!("upstream request failed: {err}");
                let mut resp = Response::new(Bytes::new());
                *resp.status_mut() = StatusCode::BAD_GATEWAY;
                resp
            }
        }
    }
}

fn join_origin(origin: &str, req: &Request<Bytes>) -> String {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{origin}{path_and_query}")
}
