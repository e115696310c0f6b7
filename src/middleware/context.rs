use bytes::Bytes;
use http::header::ACCEPT;
use http::request::Parts;
use http::uri::PathAndQuery;
use http::{HeaderMap, Method, Request, Uri, Version};
use http_body_util::{BodyExt, Full};
use std::net::SocketAddr;
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub type HttpResponse = hyper::Response<BoxBody>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request state threaded through the middleware chain.
///
/// Handlers may read everything; only rewrite stages change `uri`, and
/// only the proxy takes the body.
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
    pub start: Instant,
    body: Option<BoxBody>,
}

impl RequestContext {
    pub fn new(req: Request<BoxBody>, remote_addr: Option<SocketAddr>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body, remote_addr)
    }

    pub fn from_parts(parts: Parts, body: BoxBody, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            remote_addr,
            start: Instant::now(),
            body: Some(body),
        }
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Path plus query string
    pub fn url(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Take the request body, leaving an empty one behind
    pub fn take_body(&mut self) -> BoxBody {
        self.body.take().unwrap_or_else(empty_body)
    }

    /// Replace the path (and optionally query) of the request URI.
    ///
    /// The inbound query is kept when `path_and_query` has none.
    pub fn set_url(&mut self, path_and_query: &str) -> Result<(), http::Error> {
        let target = match (path_and_query.contains('?'), self.uri.query()) {
            (false, Some(query)) => format!("{}?{}", path_and_query, query),
            _ => path_and_query.to_string(),
        };
        let target = if target.starts_with('/') {
            target
        } else {
            format!("/{}", target)
        };

        let mut parts = self.uri.clone().into_parts();
        parts.path_and_query = Some(PathAndQuery::try_from(target.as_str())?);
        self.uri = Uri::from_parts(parts)?;
        Ok(())
    }

    /// Content negotiation against the Accept header.
    ///
    /// `ty` is a media type (`application/json`) or a file extension
    /// (`json`). A missing Accept header accepts everything.
    pub fn accepts(&self, ty: &str) -> bool {
        let wanted = if ty.contains('/') {
            ty.to_ascii_lowercase()
        } else {
            match mime_guess::from_ext(ty.trim_start_matches('.')).first_raw() {
                Some(mime) => mime.to_string(),
                None => return false,
            }
        };

        let accept = match self.headers.get(ACCEPT).and_then(|v| v.to_str().ok()) {
            Some(accept) if !accept.trim().is_empty() => accept,
            _ => return true,
        };

        let (wanted_type, wanted_sub) = wanted.split_once('/').unwrap_or((wanted.as_str(), "*"));

        // The most specific matching range decides; ties keep the first
        let mut best: Option<(u8, f32)> = None;
        for range in accept.split(',') {
            let mut params = range.split(';');
            let media = params.next().unwrap_or("").trim().to_ascii_lowercase();
            let quality = params
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);

            let specificity = match media.split_once('/') {
                Some(("*", "*")) => 0,
                Some((t, "*")) if t == wanted_type => 1,
                Some((t, s)) if t == wanted_type && s == wanted_sub => 2,
                _ => continue,
            };

            if best.map_or(true, |(current, _)| specificity > current) {
                best = Some((specificity, quality));
            }
        }

        best.map_or(false, |(_, quality)| quality > 0.0)
    }
}
