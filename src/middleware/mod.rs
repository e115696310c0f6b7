//! Request middleware
//!
//! An ordered chain of stages that may inspect, rewrite, short-circuit or
//! forward a request. Each stage receives the request context and a
//! [`Next`] continuation. It either produces the response itself (proxy,
//! blacklist, mock) or runs the continuation and optionally post-processes
//! its result (mime override). After the last stage, the continuation is the
//! [`Fallback`], normally the static file handler.
//!
//! Stages are built once from configuration and shared read-only between
//! concurrent requests.

pub mod blacklist;
pub mod context;
pub mod mime;
pub mod mock;
pub mod proxy;
pub mod rewrite;

pub use blacklist::BlacklistHandler;
pub use context::{BoxBody, HttpResponse, RequestContext};
pub use mime::MimeHandler;
pub use mock::{MockHandler, MockResponder, MockResponse, MockRoute, MockTarget, RequestMatcher};
pub use proxy::{upstream_client, ProxyHandler, UpstreamClient};
pub use rewrite::RewriteHandler;

use crate::server::router::{fill, Filled, PathPattern, PatternError};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Terminal stage invoked when no middleware produced a response
pub trait Fallback: Send + Sync {
    fn serve<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HttpResponse>;
}

/// A rewrite rule: source pattern plus target template
#[derive(Debug, Clone)]
pub struct Route {
    pattern: PathPattern,
    target: String,
}

impl Route {
    pub fn new(from: &str, to: &str) -> Result<Self, PatternError> {
        Ok(Self {
            pattern: PathPattern::compile(from)?,
            target: to.to_string(),
        })
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether the target is an absolute URL to proxy to
    pub fn is_remote(&self) -> bool {
        let lower = self.target.to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    /// Fill the target template from a matching path.
    ///
    /// For a remote target only the path and query are templated; the
    /// scheme and authority are copied as written.
    pub fn resolve(&self, path: &str) -> Option<Filled> {
        let captures = self.pattern.exec(path)?;
        if !self.is_remote() {
            return Some(fill(&self.target, &captures));
        }

        let (origin, rest) = split_origin(&self.target);
        let mut filled = fill(rest, &captures);
        filled.value.insert_str(0, origin);
        Some(filled)
    }
}

/// Split an absolute URL after its authority
fn split_origin(url: &str) -> (&str, &str) {
    let start = url.find("://").map_or(0, |i| i + 3);
    let end = url[start..]
        .find(|c| matches!(c, '/' | '?' | '#'))
        .map_or(url.len(), |i| start + i);
    url.split_at(end)
}

/// One stage of the pipeline.
///
/// Static dispatch over the stock handlers. Adding a stage means a new
/// variant plus its arm in [`Middleware::handle`].
pub enum Middleware {
    Rewrite(RewriteHandler),
    Proxy(ProxyHandler),
    Blacklist(BlacklistHandler),
    Mime(MimeHandler),
    Mock(MockHandler),
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Middleware::Rewrite(h) => f.debug_tuple("Rewrite").field(h).finish(),
            Middleware::Proxy(h) => f.debug_tuple("Proxy").field(h).finish(),
            Middleware::Blacklist(h) => f.debug_tuple("Blacklist").field(h).finish(),
            Middleware::Mime(h) => f.debug_tuple("Mime").field(h).finish(),
            Middleware::Mock(h) => f.debug_tuple("Mock").field(h).finish(),
        }
    }
}

impl Middleware {
    pub fn name(&self) -> &'static str {
        match self {
            Middleware::Rewrite(_) => "rewrite",
            Middleware::Proxy(_) => "proxy",
            Middleware::Blacklist(_) => "blacklist",
            Middleware::Mime(_) => "mime",
            Middleware::Mock(_) => "mock",
        }
    }

    pub async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HttpResponse {
        match self {
            Middleware::Rewrite(h) => h.handle(ctx, next).await,
            Middleware::Proxy(h) => h.handle(ctx, next).await,
            Middleware::Blacklist(h) => h.handle(ctx, next).await,
            Middleware::Mime(h) => h.handle(ctx, next).await,
            Middleware::Mock(h) => h.handle(ctx, next).await,
        }
    }
}

/// Continuation handed to each stage: the rest of the chain
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Middleware],
    fallback: &'a dyn Fallback,
}

impl<'a> Next<'a> {
    pub fn new(stages: &'a [Middleware], fallback: &'a dyn Fallback) -> Self {
        Self { stages, fallback }
    }

    /// Run the remaining stages, then the fallback
    pub fn run<'b>(self, ctx: &'b mut RequestContext) -> BoxFuture<'b, HttpResponse>
    where
        'a: 'b,
    {
        Box::pin(async move {
            match self.stages.split_first() {
                Some((stage, rest)) => {
                    let next = Next {
                        stages: rest,
                        fallback: self.fallback,
                    };
                    stage.handle(ctx, next).await
                }
                None => self.fallback.serve(ctx).await,
            }
        })
    }
}

/// Ordered stages composed into a single handler
pub struct Pipeline {
    stages: Vec<Middleware>,
    fallback: Arc<dyn Fallback>,
}

impl Pipeline {
    pub fn compose(stages: Vec<Middleware>, fallback: Arc<dyn Fallback>) -> Self {
        Self { stages, fallback }
    }

    pub fn stages(&self) -> &[Middleware] {
        &self.stages
    }

    pub async fn handle(&self, ctx: &mut RequestContext) -> HttpResponse {
        Next::new(&self.stages, self.fallback.as_ref()).run(ctx).await
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::context::{empty_body, full_body};
    use super::*;
    use http::header::HeaderValue;
    use http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const FALLBACK_HEADER: &str = "x-fallback";

    /// Fallback that records calls and echoes the path it saw
    #[derive(Default)]
    pub struct RecordingFallback {
        pub calls: AtomicUsize,
    }

    impl Fallback for RecordingFallback {
        fn serve<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HttpResponse> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let mut response = hyper::Response::new(full_body(ctx.url().to_string()));
                response.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                );
                response
                    .headers_mut()
                    .insert(FALLBACK_HEADER, HeaderValue::from_static("1"));
                response
            })
        }
    }

    impl RecordingFallback {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    pub fn request(method: &str, uri: &str) -> RequestContext {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(empty_body())
            .unwrap();
        RequestContext::new(req, None)
    }

    pub async fn body_string(response: HttpResponse) -> String {
        use http_body_util::BodyExt;
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
