//! Configuration module for localserve
//!
//! Handles TOML-based configuration for the server and its middleware
//! stages. Everything is validated once at load; handlers built from a
//! loaded configuration never fail on configuration grounds.

use crate::middleware::{MockResponder, MockResponse, MockRoute, MockTarget, RequestMatcher, Route};
use crate::server::router::{PathPattern, PatternError};
use http::header::{HeaderName, HeaderValue};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Invalid path pattern: {0}")]
    PatternError(#[from] PatternError),
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Forbidden path patterns
    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Rewrite rules, local or proxied
    #[serde(default)]
    pub rewrite: Vec<RouteConfig>,

    /// Content type overrides, in override order
    #[serde(default)]
    pub mime: Vec<MimeOverride>,

    /// Mock routes
    #[serde(default)]
    pub mock: Vec<MockConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    /// Load configuration from a string
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Server settings
        self.listen_addr()?;

        if self.server.workers != "auto" {
            match self.server.workers.parse::<usize>() {
                Ok(n) if n > 0 => {}
                _ => {
                    return Err(ConfigError::ValidationError(format!(
                        "workers must be \"auto\" or a positive number, got '{}'",
                        self.server.workers
                    )))
                }
            }
        }

        let mut seen = HashSet::new();
        for stage in &self.server.pipeline {
            if !seen.insert(*stage) {
                return Err(ConfigError::ValidationError(format!(
                    "pipeline stage '{}' is listed more than once",
                    stage
                )));
            }
        }

        // Middleware settings
        for pattern in &self.blacklist {
            PathPattern::compile(pattern)?;
        }

        self.routes()?;
        self.mock_routes()?;

        for entry in &self.mime {
            if HeaderValue::from_str(&entry.mime).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "invalid mime type '{}'",
                    entry.mime
                )));
            }
        }

        Ok(())
    }

    /// Get the number of worker threads
    pub fn worker_threads(&self) -> usize {
        match self.server.workers.as_str() {
            "auto" => num_cpus::get(),
            n => n.parse().unwrap_or_else(|_| num_cpus::get()),
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.listen.parse().map_err(|_| {
            ConfigError::ValidationError(format!(
                "listen must be an address such as 127.0.0.1:8000, got '{}'",
                self.server.listen
            ))
        })
    }

    /// Replace the port of the listen address
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        let mut addr = self.listen_addr()?;
        addr.set_port(port);
        self.server.listen = addr.to_string();
        Ok(())
    }

    /// Compiled rewrite rules, in file order
    pub fn routes(&self) -> Result<Vec<Route>, ConfigError> {
        self.rewrite.iter().map(RouteConfig::build).collect()
    }

    /// Compiled mock routes, in file order
    pub fn mock_routes(&self) -> Result<Vec<MockRoute>, ConfigError> {
        self.mock.iter().map(MockConfig::build).collect()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Number of worker threads ("auto" or a number)
    #[serde(default = "default_workers")]
    pub workers: String,

    /// Root directory for static files
    #[serde(default = "default_directory")]
    pub directory: String,

    /// Index files tried for directory requests
    #[serde(default = "default_index_files")]
    pub index: Vec<String>,

    /// File served for extension-less paths that would otherwise 404
    #[serde(default)]
    pub spa: Option<String>,

    /// Cache-Control max-age for static files, in seconds
    #[serde(default)]
    pub max_age: u64,

    /// Middleware stages in execution order
    #[serde(default = "default_pipeline")]
    pub pipeline: Vec<Stage>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: default_workers(),
            directory: default_directory(),
            index: default_index_files(),
            spa: None,
            max_age: 0,
            pipeline: default_pipeline(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_workers() -> String {
    "auto".to_string()
}

fn default_directory() -> String {
    ".".to_string()
}

fn default_index_files() -> Vec<String> {
    vec!["index.html".to_string()]
}

fn default_pipeline() -> Vec<Stage> {
    vec![Stage::Rewrite, Stage::Blacklist, Stage::Mime, Stage::Mock]
}

/// A middleware stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Local rewrites and proxy routes from `[[rewrite]]`
    Rewrite,
    /// Forbidden paths from `blacklist`
    Blacklist,
    /// Content type overrides from `[[mime]]`
    Mime,
    /// Mock responses from `[[mock]]`
    Mock,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Rewrite => "rewrite",
            Stage::Blacklist => "blacklist",
            Stage::Mime => "mime",
            Stage::Mock => "mock",
        };
        f.write_str(name)
    }
}

/// Rewrite rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Source path pattern
    pub from: String,

    /// Target path or `http://` / `https://` URL template
    pub to: String,
}

impl RouteConfig {
    pub fn build(&self) -> Result<Route, ConfigError> {
        Ok(Route::new(&self.from, &self.to)?)
    }
}

/// Content type override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MimeOverride {
    /// Content type to set
    #[serde(rename = "type")]
    pub mime: String,

    /// Extensions it applies to
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Mock route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Path pattern
    pub route: String,

    /// Targets, in precedence order
    #[serde(default)]
    pub target: Vec<MockTargetConfig>,
}

impl MockConfig {
    pub fn build(&self) -> Result<MockRoute, ConfigError> {
        if self.target.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "mock route '{}' has no targets",
                self.route
            )));
        }

        let targets = self
            .target
            .iter()
            .map(|t| t.build(&self.route))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MockRoute::new(&self.route, targets)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockTargetConfig {
    /// Request criteria; absent means any request
    #[serde(default)]
    pub request: Option<MockRequestConfig>,

    #[serde(default)]
    pub response: MockResponseConfig,
}

impl MockTargetConfig {
    fn build(&self, route: &str) -> Result<MockTarget, ConfigError> {
        let invalid = |what: String| ConfigError::ValidationError(format!("mock route '{}': {}", route, what));

        let request = match &self.request {
            Some(request) => {
                let methods = request.method.as_ref().map(Methods::to_vec).unwrap_or_default();
                for method in &methods {
                    Method::from_bytes(method.as_bytes())
                        .map_err(|_| invalid(format!("invalid method '{}'", method)))?;
                }
                let matcher = RequestMatcher::methods(methods);
                Some(match &request.accepts {
                    Some(accepts) => matcher.accepting(accepts.clone()),
                    None => matcher,
                })
            }
            None => None,
        };

        let response = &self.response;
        let mut base = MockResponse::default();

        if let Some(status) = response.status {
            base.status = Some(
                StatusCode::from_u16(status).map_err(|_| invalid(format!("invalid status {}", status)))?,
            );
        }
        if let Some(content_type) = &response.content_type {
            base.content_type = Some(
                HeaderValue::from_str(content_type)
                    .map_err(|_| invalid(format!("invalid type '{}'", content_type)))?,
            );
        }
        for (name, value) in &response.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| invalid(format!("invalid header name '{}'", name)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| invalid(format!("invalid value for header '{}'", name)))?;
            base.headers.insert(name, value);
        }

        let responder = match (&response.template, &response.body) {
            (Some(_), Some(_)) => return Err(invalid("set either body or template, not both".to_string())),
            (Some(template), None) => MockResponder::template(base, template.clone()),
            (None, Some(body)) => {
                match body {
                    toml::Value::String(text) => base.set_text(text.clone()),
                    toml::Value::Datetime(dt) => base.set_text(dt.to_string()),
                    other => {
                        let json = serde_json::to_value(other)
                            .map_err(|e| invalid(format!("body is not valid JSON: {}", e)))?;
                        base.set_json(&json);
                    }
                }
                MockResponder::Static(base)
            }
            (None, None) => MockResponder::Static(base),
        };

        Ok(MockTarget {
            request,
            response: responder,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockRequestConfig {
    /// Method or methods to match; absent means any
    #[serde(default)]
    pub method: Option<Methods>,

    /// Media type or extension the client must accept
    #[serde(default)]
    pub accepts: Option<String>,
}

/// One method or a list of them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Methods {
    One(String),
    Many(Vec<String>),
}

impl Methods {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Methods::One(method) => vec![method.clone()],
            Methods::Many(methods) => methods.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockResponseConfig {
    /// Status code; defaults to 200 with a body, 404 without
    #[serde(default)]
    pub status: Option<u16>,

    /// Content type, overriding the one inferred from the body
    #[serde(default, rename = "type")]
    pub content_type: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// String (text or HTML) or table/array (JSON)
    #[serde(default)]
    pub body: Option<toml::Value>,

    /// Body text with `$N` filled from the path captures per request
    #[serde(default)]
    pub template: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen, "127.0.0.1:8000");
        assert_eq!(config.server.index, vec!["index.html"]);
        assert_eq!(config.server.pipeline, default_pipeline());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
            blacklist = ["/admin/*", "/secret"]

            [server]
            listen = "127.0.0.1:9000"
            workers = "4"
            directory = "public"
            pipeline = ["blacklist", "rewrite"]

            [[rewrite]]
            from = "/api/*"
            to = "http://localhost:3000/$1"

            [[rewrite]]
            from = "/old/:page"
            to = "/new/:page"

            [[mime]]
            type = "text/plain"
            extensions = ["md"]

            [[mock]]
            route = "/users/:id"

            [[mock.target]]
            request = { method = ["GET", "head"], accepts = "json" }
            response = { body = { id = 1, name = "a" } }

            [[mock.target]]
            response = { status = 405, body = "<h1>nope</h1>" }
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.pipeline, vec![Stage::Blacklist, Stage::Rewrite]);
        assert_eq!(config.blacklist.len(), 2);
        assert_eq!(config.mime[0].mime, "text/plain");

        let routes = config.routes().unwrap();
        assert!(routes[0].is_remote());
        assert!(!routes[1].is_remote());

        let mocks = config.mock_routes().unwrap();
        assert_eq!(mocks[0].targets.len(), 2);
        let matcher = mocks[0].targets[0].request.as_ref().unwrap();
        assert_eq!(matcher.methods, vec!["GET", "head"]);
        assert!(matcher.accepts.is_some());

        match &mocks[0].targets[1].response {
            MockResponder::Static(response) => {
                assert_eq!(response.status, Some(StatusCode::METHOD_NOT_ALLOWED));
                assert_eq!(response.content_type.as_ref().unwrap(), "text/html; charset=utf-8");
            }
            other => panic!("expected static response, got {:?}", other),
        }
    }

    #[test]
    fn test_json_body() {
        let config = Config::from_str(
            r#"
            [[mock]]
            route = "/list"
            [[mock.target]]
            response = { body = [1, 2, 3], headers = { x-mock = "1" } }
            "#,
        )
        .unwrap();

        match &config.mock_routes().unwrap()[0].targets[0].response {
            MockResponder::Static(response) => {
                assert_eq!(response.body.as_deref(), Some(&b"[1,2,3]"[..]));
                assert_eq!(response.content_type.as_ref().unwrap(), "application/json; charset=utf-8");
                assert_eq!(response.headers["x-mock"], "1");
            }
            other => panic!("expected static response, got {:?}", other),
        }
    }

    #[test]
    fn test_single_method_string() {
        let config = Config::from_str(
            r#"
            [[mock]]
            route = "/x"
            [[mock.target]]
            request = { method = "POST" }
            response = { template = "got $1" }
            "#,
        )
        .unwrap();

        let route = &config.mock_routes().unwrap()[0];
        assert_eq!(route.targets[0].request.as_ref().unwrap().methods, vec!["POST"]);
        assert!(matches!(route.targets[0].response, MockResponder::Generated(_)));
    }

    #[test]
    fn test_rejects_duplicate_stage() {
        let err = Config::from_str("[server]\npipeline = [\"mime\", \"mime\"]").unwrap_err();
        assert!(err.to_string().contains("more than once"), "{}", err);
    }

    #[test]
    fn test_rejects_unknown_stage() {
        assert!(matches!(
            Config::from_str("[server]\npipeline = [\"gzip\"]"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let err = Config::from_str("blacklist = [\"/a/(b\"]").unwrap_err();
        assert!(matches!(err, ConfigError::PatternError(_)), "{}", err);
    }

    #[test]
    fn test_accepts_https_target() {
        let config = Config::from_str(
            r#"
            [[rewrite]]
            from = "/api/*"
            to = "https://example.com/$1"
            "#,
        )
        .unwrap();
        let routes = config.routes().unwrap();
        assert!(routes[0].is_remote());
        assert_eq!(routes[0].resolve("/api/v2/users").unwrap().value, "https://example.com/v2/users");
    }

    #[test]
    fn test_rejects_bad_mock() {
        let no_targets = "[[mock]]\nroute = \"/x\"";
        assert!(Config::from_str(no_targets).is_err());

        let bad_status = r#"
            [[mock]]
            route = "/x"
            [[mock.target]]
            response = { status = 42 }
        "#;
        assert!(Config::from_str(bad_status).is_err());

        let both = r#"
            [[mock]]
            route = "/x"
            [[mock.target]]
            response = { body = "a", template = "b" }
        "#;
        assert!(Config::from_str(both).is_err());
    }

    #[test]
    fn test_worker_threads() {
        let mut config = Config::default();
        config.server.workers = "4".to_string();
        assert_eq!(config.worker_threads(), 4);

        config.server.workers = "auto".to_string();
        assert!(config.worker_threads() > 0);
    }

    #[test]
    fn test_set_port() {
        let mut config = Config::default();
        config.set_port(9999).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9999");
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("localserve.toml");
        std::fs::write(&path, "[server]\nmax_age = 60\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.max_age, 60);

        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(ConfigError::IoError(_))
        ));
    }
}
