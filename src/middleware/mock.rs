//! Mock responses
//!
//! A mock route pairs a path pattern with an ordered list of targets. The
//! first target whose request matcher accepts the request wins; failing
//! that, the first target without a matcher is used as a catch-all. When
//! neither exists the request falls through to the next stage.

use super::context::full_body;
use super::{HttpResponse, Next, RequestContext};
use crate::server::router::{PathPattern, PatternError};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Computes a response from the request and positional path captures
pub type ResponseGenerator = Arc<dyn Fn(&RequestContext, &mut MockResponse, &[String]) + Send + Sync>;

/// Predicate over the request, used for Accept negotiation
pub type AcceptPredicate = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// Response fields a mock may set. Unset fields keep their defaults when
/// the response is built.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    pub status: Option<StatusCode>,
    pub content_type: Option<HeaderValue>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl MockResponse {
    /// Set a text body. The content type follows the body (`text/html` for
    /// markup, `text/plain` otherwise) unless one is already set.
    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if self.content_type.is_none() {
            let mime = if text.trim_start().starts_with('<') {
                "text/html; charset=utf-8"
            } else {
                "text/plain; charset=utf-8"
            };
            self.content_type = Some(HeaderValue::from_static(mime));
        }
        self.body = Some(Bytes::from(text));
    }

    /// Set a JSON body, defaulting the content type to `application/json`
    pub fn set_json(&mut self, value: &serde_json::Value) {
        if self.content_type.is_none() {
            self.content_type = Some(HeaderValue::from_static("application/json; charset=utf-8"));
        }
        self.body = Some(Bytes::from(value.to_string()));
    }

    /// Copy every field set on `other` over this one
    pub fn merge(&mut self, other: &MockResponse) {
        if let Some(status) = other.status {
            self.status = Some(status);
        }
        if let Some(body) = &other.body {
            self.body = Some(body.clone());
        }
        if let Some(content_type) = &other.content_type {
            self.content_type = Some(content_type.clone());
        }
        for (name, value) in &other.headers {
            self.headers.insert(name.clone(), value.clone());
        }
    }

    /// Build the HTTP response. Without an explicit status, a response with
    /// a body is 200 and one without is 404.
    pub fn into_response(self) -> HttpResponse {
        let status = self.status.unwrap_or(if self.body.is_some() {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        });

        let mut response = Response::new(full_body(self.body.unwrap_or_default()));
        *response.status_mut() = status;
        *response.headers_mut() = self.headers;
        if let Some(content_type) = self.content_type {
            response.headers_mut().insert(CONTENT_TYPE, content_type);
        }
        response
    }
}

/// How a target produces its response
#[derive(Clone)]
pub enum MockResponder {
    Static(MockResponse),
    Generated(ResponseGenerator),
}

impl MockResponder {
    /// Generator that applies `base`, then sets the body from `template`
    /// with `$N` replaced by the Nth capture
    pub fn template(base: MockResponse, template: impl Into<String>) -> Self {
        let template = template.into();
        MockResponder::Generated(Arc::new(
            move |_: &RequestContext, response: &mut MockResponse, captures: &[String]| {
                response.merge(&base);
                response.set_text(render_template(&template, captures));
            },
        ))
    }
}

/// Replace `$N` (1-based) with the matching capture, or nothing
fn render_template(template: &str, captures: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let start = i + 1;
        let mut end = start;
        while let Some(&(j, d)) = chars.peek() {
            if !d.is_ascii_digit() {
                break;
            }
            end = j + 1;
            chars.next();
        }

        if end == start {
            out.push('$');
            continue;
        }

        if let Some(value) = template[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|n| captures.get(n))
        {
            out.push_str(value);
        }
    }

    out
}

impl fmt::Debug for MockResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MockResponder::Static(response) => f.debug_tuple("Static").field(response).finish(),
            MockResponder::Generated(_) => f.write_str("Generated"),
        }
    }
}

/// Request criteria for a target. Empty `methods` means any method.
#[derive(Clone, Default)]
pub struct RequestMatcher {
    pub methods: Vec<String>,
    pub accepts: Option<AcceptPredicate>,
}

impl RequestMatcher {
    pub fn methods<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            methods: methods.into_iter().map(Into::into).collect(),
            accepts: None,
        }
    }

    /// Require the request to accept `ty` (media type or extension)
    pub fn accepting(mut self, ty: impl Into<String>) -> Self {
        let ty = ty.into();
        self.accepts = Some(Arc::new(move |ctx: &RequestContext| ctx.accepts(&ty)));
        self
    }

    pub fn matches(&self, ctx: &RequestContext) -> bool {
        let method_ok = self.methods.is_empty()
            || self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(ctx.method.as_str()));

        method_ok && self.accepts.as_ref().map_or(true, |accepts| accepts(ctx))
    }
}

impl fmt::Debug for RequestMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMatcher")
            .field("methods", &self.methods)
            .field("accepts", &self.accepts.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MockTarget {
    pub request: Option<RequestMatcher>,
    pub response: MockResponder,
}

impl MockTarget {
    /// Target that applies to every request on the route
    pub fn catch_all(response: MockResponder) -> Self {
        Self {
            request: None,
            response,
        }
    }

    pub fn when(request: RequestMatcher, response: MockResponder) -> Self {
        Self {
            request: Some(request),
            response,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockRoute {
    pub pattern: PathPattern,
    pub targets: Vec<MockTarget>,
}

impl MockRoute {
    pub fn new(pattern: &str, targets: Vec<MockTarget>) -> Result<Self, PatternError> {
        Ok(Self {
            pattern: PathPattern::compile(pattern)?,
            targets,
        })
    }

    /// First target whose matcher accepts the request, else the first
    /// catch-all
    pub fn select(&self, ctx: &RequestContext) -> Option<&MockTarget> {
        self.targets
            .iter()
            .find(|target| {
                target
                    .request
                    .as_ref()
                    .map_or(false, |matcher| matcher.matches(ctx))
            })
            .or_else(|| self.targets.iter().find(|target| target.request.is_none()))
    }
}

#[derive(Debug, Clone)]
pub struct MockHandler {
    route: MockRoute,
}

impl MockHandler {
    pub fn new(route: MockRoute) -> Self {
        Self { route }
    }

    pub async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HttpResponse {
        let captures = match self.route.pattern.match_path(ctx.path()) {
            Some(captures) => captures,
            None => return next.run(ctx).await,
        };

        let target = match self.route.select(ctx) {
            Some(target) => target,
            None => {
                debug!("Mock route {} has no target for {}", self.route.pattern, ctx.method);
                return next.run(ctx).await;
            }
        };

        debug!("Mock response for {} {}: {:?}", ctx.method, ctx.path(), target.response);

        let mut response = MockResponse::default();
        match &target.response {
            MockResponder::Static(fields) => response.merge(fields),
            MockResponder::Generated(generate) => generate(ctx, &mut response, &captures),
        }
        response.into_response()
    }
}
