//! localserve - Local development web server with a middleware pipeline
//!
//! Requests pass through an ordered chain of stages before reaching the
//! static file handler:
//! - Local rewrites and reverse proxying with path templates
//! - Path blacklisting
//! - Content type overrides
//! - Mock responses
//!
//! # Example
//!
//! ```rust,no_run
//! use localserve::config::Config;
//! use localserve::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("localserve.toml")?;
//!     let server = Server::new(config)?;
//!     server.run().await
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod middleware;
pub mod server;

pub use config::Config;
pub use error::PipelineError;
pub use server::Server;

/// localserve version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Server name for HTTP headers
pub const SERVER_NAME: &str = "localserve";
