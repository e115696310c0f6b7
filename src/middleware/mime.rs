//! Content type overrides
//!
//! Runs the rest of the chain first, then replaces the response content
//! type when the request path's extension appears in the override map.
//! Overrides are checked in configuration order; when an extension is
//! listed under several types, the last one listed wins.

use super::{HttpResponse, Next, RequestContext};
use crate::config::MimeOverride;
use http::header::{HeaderValue, InvalidHeaderValue, CONTENT_TYPE};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct MimeHandler {
    overrides: Vec<(HeaderValue, Vec<String>)>,
}

impl MimeHandler {
    pub fn new(overrides: &[MimeOverride]) -> Result<Self, InvalidHeaderValue> {
        let overrides = overrides
            .iter()
            .map(|o| -> Result<_, InvalidHeaderValue> {
                let extensions: Vec<String> = o
                    .extensions
                    .iter()
                    .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                    .collect();
                Ok((HeaderValue::from_str(&o.mime)?, extensions))
            })
            .collect::<Result<Vec<_>, InvalidHeaderValue>>()?;

        Ok(Self { overrides })
    }

    /// Content type for an extension, if overridden
    pub fn resolve(&self, extension: &str) -> Option<&HeaderValue> {
        if extension.is_empty() {
            return None;
        }
        self.overrides
            .iter()
            .rev()
            .find(|(_, extensions)| extensions.iter().any(|e| e == extension))
            .map(|(mime, _)| mime)
    }

    pub async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HttpResponse {
        let mut response = next.run(ctx).await;

        let extension = request_extension(ctx.path());
        if let Some(mime) = self.resolve(&extension) {
            debug!("Content type override for {}: {:?}", ctx.path(), mime);
            response.headers_mut().insert(CONTENT_TYPE, mime.clone());
        }

        response
    }
}

/// Lowercase extension of the last path segment, empty if none.
/// Dotfiles such as `/.env` have no extension.
pub fn request_extension(path: &str) -> String {
    let segment = path.rsplit('/').next().unwrap_or("");
    Path::new(segment)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}
