//! Reverse proxy with path template rewriting
//!
//! On a path match the route target is filled from the captures, checked
//! for leftover placeholders, and the request is forwarded once. The
//! upstream response is relayed as-is; failures become a 500 for this
//! request only.

use super::context::BoxBody;
use super::{HttpResponse, Next, RequestContext, Route};
use crate::error::PipelineError;
use crate::server::router::Filled;
use http::header::{HeaderName, HeaderValue, CONNECTION, HOST, TRANSFER_ENCODING};
use http::uri::{Authority, PathAndQuery, Scheme};
use http::{Request, Uri};
use http_body_util::BodyExt;
use hyper::Response;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::fmt;
use tracing::{debug, warn};

/// Shared outbound client for `http://` and `https://` targets. Cloning is
/// cheap and shares the connection pool.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, BoxBody>;

pub fn upstream_client() -> UpstreamClient {
    let mut http = HttpConnector::new();
    http.set_nodelay(true);
    http.enforce_http(false);

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new()).build(https)
}

#[derive(Clone)]
pub struct ProxyHandler {
    route: Route,
    client: UpstreamClient,
}

impl fmt::Debug for ProxyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandler")
            .field("from", &self.route.pattern().as_str())
            .field("to", &self.route.target())
            .finish()
    }
}

impl ProxyHandler {
    pub fn new(route: Route, client: UpstreamClient) -> Self {
        Self { route, client }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HttpResponse {
        let resolved = match self.route.resolve(ctx.path()) {
            Some(resolved) => resolved,
            None => return next.run(ctx).await,
        };

        match self.forward(ctx, resolved).await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} (from {})", e, ctx.path());
                e.into_response()
            }
        }
    }

    /// Validate the filled target and send the request upstream
    async fn forward(
        &self,
        ctx: &mut RequestContext,
        resolved: Filled,
    ) -> Result<HttpResponse, PipelineError> {
        let url = resolved.value;
        if !resolved.unresolved.is_empty() {
            return Err(PipelineError::ProxyConfig {
                url,
                unresolved: resolved.unresolved,
            });
        }

        let invalid = || PipelineError::ProxyConfig {
            url: url.clone(),
            unresolved: Vec::new(),
        };

        let target: Uri = url.parse().map_err(|_| invalid())?;
        let authority = target
            .authority()
            .and_then(host_and_port)
            .ok_or_else(invalid)?;

        // Keep the inbound query string when the target has none
        let path_and_query = match (target.query(), ctx.query()) {
            (None, Some(query)) => format!("{}?{}", target.path(), query),
            _ => target
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
        };
        let path_and_query = PathAndQuery::try_from(path_and_query.as_str()).map_err(|_| invalid())?;

        let uri = Uri::builder()
            .scheme(target.scheme().cloned().unwrap_or(Scheme::HTTP))
            .authority(authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|_| invalid())?;

        let mut headers = ctx.headers.clone();
        remove_hop_headers(&mut headers);
        if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
            headers.insert(HOST, host);
        }

        let mut request = Request::builder()
            .method(ctx.method.clone())
            .uri(uri)
            .body(ctx.take_body())
            .map_err(|_| invalid())?;
        *request.headers_mut() = headers;

        debug!("Proxy request from {} to {}", ctx.url(), request.uri());

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| PipelineError::ProxyUpstream {
                message: describe(&e),
                url: url.clone(),
            })?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }
}

/// `host[:port]` of an authority, without any userinfo
fn host_and_port(authority: &Authority) -> Option<Authority> {
    let host = match authority.port_u16() {
        Some(port) => format!("{}:{}", authority.host(), port),
        None => authority.host().to_string(),
    };
    host.parse().ok()
}

fn remove_hop_headers(headers: &mut http::HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];

    for h in hop_headers {
        headers.remove(h);
    }
}

/// Error message including its source chain
fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
