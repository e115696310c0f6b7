//! HTTP Request Handler
//!
//! Builds the middleware pipeline from configuration once, then runs every
//! inbound request through it. The static file handler is the pipeline's
//! fallback.

use crate::config::{Config, ConfigError, Stage};
use crate::middleware::{
    BlacklistHandler, HttpResponse, Middleware, MimeHandler, MockHandler, Pipeline, ProxyHandler,
    RequestContext, RewriteHandler, UpstreamClient,
};
use crate::server::static_files::StaticFileHandler;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Request handler for localserve
pub struct RequestHandler {
    pipeline: Pipeline,
}

impl RequestHandler {
    /// Create a new request handler.
    ///
    /// `client` is shared by every proxy route.
    pub fn new(config: &Config, client: UpstreamClient) -> Result<Self, ConfigError> {
        let fallback = Arc::new(StaticFileHandler::from_config(&config.server));
        let stages = build_stages(config, &client)?;

        debug!(
            "Pipeline: {}",
            stages.iter().map(Middleware::name).collect::<Vec<_>>().join(" -> ")
        );

        Ok(Self {
            pipeline: Pipeline::compose(stages, fallback),
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Handle an incoming request
    pub async fn handle(&self, req: Request<Incoming>, remote_addr: Option<SocketAddr>) -> HttpResponse {
        let (parts, body) = req.into_parts();
        let mut ctx = RequestContext::from_parts(parts, body.boxed(), remote_addr);
        self.pipeline.handle(&mut ctx).await
    }
}

/// Middleware stages in the configured order. Each `[[rewrite]]` rule is
/// its own stage, so rules run in file order within the rewrite slot.
fn build_stages(config: &Config, client: &UpstreamClient) -> Result<Vec<Middleware>, ConfigError> {
    let mut stages = Vec::new();

    for stage in &config.server.pipeline {
        match stage {
            Stage::Rewrite => {
                for route in config.routes()? {
                    stages.push(if route.is_remote() {
                        Middleware::Proxy(ProxyHandler::new(route, client.clone()))
                    } else {
                        Middleware::Rewrite(RewriteHandler::new(route))
                    });
                }
            }
            Stage::Blacklist => {
                if !config.blacklist.is_empty() {
                    stages.push(Middleware::Blacklist(BlacklistHandler::new(&config.blacklist)?));
                }
            }
            Stage::Mime => {
                if !config.mime.is_empty() {
                    let handler = MimeHandler::new(&config.mime)
                        .map_err(|e| ConfigError::ValidationError(format!("invalid mime type: {}", e)))?;
                    stages.push(Middleware::Mime(handler));
                }
            }
            Stage::Mock => {
                for route in config.mock_routes()? {
                    stages.push(Middleware::Mock(MockHandler::new(route)));
                }
            }
        }
    }

    Ok(stages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::upstream_client;

    fn names(config: &Config) -> Vec<&'static str> {
        let handler = RequestHandler::new(config, upstream_client()).unwrap();
        handler.pipeline().stages().iter().map(Middleware::name).collect()
    }

    #[tokio::test]
    async fn test_default_config_has_no_stages() {
        assert!(names(&Config::default()).is_empty());
    }

    #[tokio::test]
    async fn test_stage_order_follows_config() {
        let config = Config::from_str(
            r#"
            blacklist = ["/secret"]

            [server]
            pipeline = ["mock", "blacklist", "rewrite", "mime"]

            [[rewrite]]
            from = "/api/*"
            to = "http://127.0.0.1:3000/$1"

            [[rewrite]]
            from = "/old"
            to = "/new"

            [[mime]]
            type = "text/plain"
            extensions = ["md"]

            [[mock]]
            route = "/ping"
            [[mock.target]]
            response = { body = "pong" }
            "#,
        )
        .unwrap();

        assert_eq!(names(&config), vec!["mock", "blacklist", "proxy", "rewrite", "mime"]);
    }

    #[tokio::test]
    async fn test_omitted_stage_is_skipped() {
        let config = Config::from_str(
            r#"
            blacklist = ["/secret"]

            [server]
            pipeline = ["rewrite"]
            "#,
        )
        .unwrap();

        assert!(names(&config).is_empty());
    }
}
