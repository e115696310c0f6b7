//! Local rewrites
//!
//! A route whose target is a local path rewrites the request URL in place
//! and hands the request on; later stages and the static fallback see the
//! rewritten path.

use super::{HttpResponse, Next, RequestContext, Route};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RewriteHandler {
    route: Route,
}

impl RewriteHandler {
    pub fn new(route: Route) -> Self {
        Self { route }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> HttpResponse {
        if let Some(resolved) = self.route.resolve(ctx.path()) {
            if !resolved.is_complete() {
                debug!(
                    "Rewrite {} left placeholders empty: {:?}",
                    self.route.target(),
                    resolved.unresolved
                );
            }

            let from = ctx.url().to_string();
            match ctx.set_url(&resolved.value) {
                Ok(()) => debug!("Rewrite {} -> {}", from, ctx.url()),
                Err(e) => warn!("Rewrite of {} to {} failed: {}", from, resolved.value, e),
            }
        }

        next.run(ctx).await
    }
}
