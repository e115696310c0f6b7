//! Path blacklist
//!
//! Rejects requests whose path matches any forbidden pattern with 403
//! before later stages run.

use super::{HttpResponse, Next, RequestContext};
use crate::error::PipelineError;
use crate::server::router::{PathPattern, PatternError};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BlacklistHandler {
    patterns: Vec<PathPattern>,
}

impl BlacklistHandler {
    pub fn new(patterns: &[String]) -> Result<Self, PatternError> {
        let patterns = patterns
            .iter()
            .map(|p| PathPattern::compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// First pattern matching `path`, if any. Order does not change the
    /// outcome, only which pattern gets logged.
    pub fn matching(&self, path: &str) -> Option<&PathPattern> {
        self.patterns.iter().find(|pattern| pattern.test(path))
    }

    pub fn is_forbidden(&self, path: &str) -> bool {
        self.matching(path).is_some()
    }

    pub async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HttpResponse {
        if let Some(pattern) = self.matching(ctx.path()) {
            debug!("Blacklisted path {} (pattern {})", ctx.path(), pattern);
            return PipelineError::BlacklistRejection {
                path: ctx.path().to_string(),
            }
            .into_response();
        }

        next.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::testing::*;
    use crate::middleware::{Middleware, Pipeline};
    use hyper::StatusCode;
    use std::sync::Arc;

    fn handler() -> BlacklistHandler {
        BlacklistHandler::new(&["/admin/*".to_string(), "/secret".to_string()]).unwrap()
    }

    #[test]
    fn test_is_forbidden() {
        let blacklist = handler();
        assert!(blacklist.is_forbidden("/admin/panel"));
        assert!(blacklist.is_forbidden("/secret"));
        assert!(!blacklist.is_forbidden("/public"));
        assert!(!blacklist.is_forbidden("/secret-ish"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(BlacklistHandler::new(&["/(unclosed".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_rejects_with_403() {
        let fallback = Arc::new(RecordingFallback::default());
        let pipeline = Pipeline::compose(vec![Middleware::Blacklist(handler())], fallback.clone());

        let mut ctx = request("GET", "/admin/panel");
        let response = pipeline.handle(&mut ctx).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, "Forbidden");
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_delegates_when_allowed() {
        let fallback = Arc::new(RecordingFallback::default());
        let pipeline = Pipeline::compose(vec![Middleware::Blacklist(handler())], fallback.clone());

        let mut ctx = request("GET", "/public");
        let response = pipeline.handle(&mut ctx).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(fallback.calls(), 1);
    }

    #[test]
    fn test_pattern_order_does_not_matter() {
        let forward = BlacklistHandler::new(&["/a".to_string(), "/b/*".to_string()]).unwrap();
        let reverse = BlacklistHandler::new(&["/b/*".to_string(), "/a".to_string()]).unwrap();
        for path in ["/a", "/b/c", "/c"] {
            assert_eq!(forward.is_forbidden(path), reverse.is_forbidden(path));
        }
    }
}
