//! Static File Handler
//!
//! Terminal stage of the pipeline. Serves files from the document root
//! with:
//! - MIME type detection
//! - ETag and Last-Modified headers
//! - Conditional requests (If-None-Match, If-Modified-Since)
//! - Directory index files and an optional single-page-app fallback

use crate::config::ServerConfig;
use crate::middleware::context::{empty_body, full_body};
use crate::middleware::mime::request_extension;
use crate::middleware::{Fallback, HttpResponse, RequestContext};

use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use http::header::{
    ALLOW, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED, SERVER,
};
use hyper::{Method, Response, StatusCode};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

/// Handler for serving static files
pub struct StaticFileHandler {
    root: PathBuf,
    index: Vec<String>,
    spa: Option<String>,
    max_age: u64,
    /// Maximum file size to serve (prevents memory issues)
    max_file_size: u64,
}

impl StaticFileHandler {
    /// Create a new static file handler
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: vec!["index.html".to_string()],
            spa: None,
            max_age: 0,
            max_file_size: 100 * 1024 * 1024, // 100MB
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(&config.directory)
            .with_index(config.index.clone())
            .with_spa(config.spa.clone())
            .with_max_age(config.max_age)
    }

    pub fn with_index(mut self, index: Vec<String>) -> Self {
        self.index = index;
        self
    }

    pub fn with_spa(mut self, spa: Option<String>) -> Self {
        self.spa = spa;
        self
    }

    pub fn with_max_age(mut self, max_age: u64) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serve the file addressed by the request path
    pub async fn handle(&self, ctx: &RequestContext) -> HttpResponse {
        if ctx.method != Method::GET && ctx.method != Method::HEAD {
            let mut response = error_page(StatusCode::METHOD_NOT_ALLOWED);
            response
                .headers_mut()
                .insert(ALLOW, http::HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let path = self.resolve_path(ctx.path());

        let target = match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => match self.find_index(&path).await {
                Some(index) => index,
                None => {
                    debug!("No index file in {:?}", path);
                    return error_page(StatusCode::FORBIDDEN);
                }
            },
            Ok(_) => path,
            Err(_) => match self.spa_fallback(ctx.path()).await {
                Some(spa) => spa,
                None => {
                    debug!("Not found: {:?}", path);
                    return error_page(StatusCode::NOT_FOUND);
                }
            },
        };

        match self.serve_file(&target, ctx).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to serve {:?}: {}", target, e);
                error_page(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// Resolve a request path to a file system path (with security checks)
    fn resolve_path(&self, path: &str) -> PathBuf {
        let clean_path = path.trim_start_matches('/');
        let decoded = percent_encoding::percent_decode_str(clean_path)
            .decode_utf8_lossy()
            .to_string();

        // Prevent directory traversal
        let normalized: PathBuf = PathBuf::from(&decoded)
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();

        self.root.join(normalized)
    }

    async fn find_index(&self, dir: &Path) -> Option<PathBuf> {
        for index in &self.index {
            let candidate = dir.join(index);
            if is_file(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    /// SPA entry point, only for paths without an extension
    async fn spa_fallback(&self, request_path: &str) -> Option<PathBuf> {
        let spa = self.spa.as_ref()?;
        if !request_extension(request_path).is_empty() {
            return None;
        }
        let candidate = self.resolve_path(spa);
        if is_file(&candidate).await {
            debug!("SPA fallback for {} -> {:?}", request_path, candidate);
            Some(candidate)
        } else {
            None
        }
    }

    /// Serve a file with conditional request support (304 Not Modified)
    async fn serve_file(&self, path: &Path, ctx: &RequestContext) -> Result<HttpResponse> {
        let metadata = fs::metadata(path).await?;
        let file_size = metadata.len();

        if file_size > self.max_file_size {
            return Err(anyhow!("File too large: {} bytes", file_size));
        }

        let modified = metadata.modified().ok();
        let etag = format!("\"{}\"", generate_etag(path, file_size, modified));
        let last_modified = modified.map(format_http_date);

        if is_not_modified(ctx, &etag, modified) {
            return Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(SERVER, crate::SERVER_NAME)
                .header(ETAG, &etag)
                .body(empty_body())
                .map_err(|e| anyhow!("Failed to build response: {}", e));
        }

        let mime_type = guess_mime_type(path);
        debug!("Serving {:?} ({}, {} bytes, etag={})", path, mime_type, file_size, etag);

        let body = if ctx.method == Method::HEAD {
            empty_body()
        } else {
            full_body(fs::read(path).await?)
        };

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, mime_type)
            .header(CONTENT_LENGTH, file_size)
            .header(SERVER, crate::SERVER_NAME)
            .header(ETAG, &etag)
            .header(CACHE_CONTROL, format!("public, max-age={}", self.max_age));

        if let Some(ref lm) = last_modified {
            builder = builder.header(LAST_MODIFIED, lm);
        }

        builder
            .body(body)
            .map_err(|e| anyhow!("Failed to build response: {}", e))
    }
}

impl Fallback for StaticFileHandler {
    fn serve<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, HttpResponse> {
        Box::pin(async move { self.handle(ctx).await })
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

fn is_not_modified(ctx: &RequestContext, etag: &str, modified: Option<SystemTime>) -> bool {
    // If-None-Match takes precedence over If-Modified-Since
    if let Some(client_etags) = ctx.header(IF_NONE_MATCH.as_str()) {
        return client_etags
            .split(',')
            .map(|t| t.trim().trim_start_matches("W/"))
            .any(|t| t == etag || t == "*");
    }

    if let (Some(ims), Some(file_modified)) = (ctx.header(IF_MODIFIED_SINCE.as_str()), modified) {
        if let Ok(client_time) = parse_http_date(ims) {
            // HTTP dates have second precision
            return truncate_to_secs(file_modified) <= client_time;
        }
    }

    false
}

/// Content type for a file, with a charset for text formats
fn guess_mime_type(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let essence = mime.essence_str();
    if mime.type_() == mime_guess::mime::TEXT
        || essence == "application/javascript"
        || essence == "application/json"
    {
        format!("{}; charset=utf-8", essence)
    } else {
        essence.to_string()
    }
}

/// Generate ETag from file metadata
fn generate_etag(path: &Path, size: u64, modified: Option<SystemTime>) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    size.hash(&mut hasher);

    if let Some(t) = modified {
        if let Ok(duration) = t.duration_since(SystemTime::UNIX_EPOCH) {
            duration.as_secs().hash(&mut hasher);
        }
    }

    format!("{:x}", hasher.finish())
}

fn truncate_to_secs(time: SystemTime) -> SystemTime {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(d.as_secs()),
        Err(_) => time,
    }
}

/// Format a SystemTime as an HTTP date (RFC 7231)
fn format_http_date(time: SystemTime) -> String {
    use chrono::{DateTime, Utc};

    let datetime: DateTime<Utc> = time.into();
    datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date string
fn parse_http_date(s: &str) -> Result<SystemTime> {
    use chrono::{DateTime, NaiveDateTime, Utc};

    // RFC 7231 IMF-fixdate
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%a, %d %b %Y %H:%M:%S GMT") {
        return Ok(dt.and_utc().into());
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt.with_timezone(&Utc).into());
    }

    Err(anyhow!("Invalid date format"))
}

fn error_page(status: StatusCode) -> HttpResponse {
    let reason = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>{code} {reason}</title></head>
<body>
<h1>{code} {reason}</h1>
<hr>
<p><em>{server}</em></p>
</body>
</html>"#,
        code = status.as_u16(),
        reason = reason,
        server = crate::SERVER_NAME
    );

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .header(SERVER, crate::SERVER_NAME)
        .body(full_body(body))
        .unwrap_or_else(|_| crate::error::plain_status(status))
}
