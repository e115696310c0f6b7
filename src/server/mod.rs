//! HTTP Server module
//!
//! HTTP/1.1 server using Hyper and Tokio. Every request goes through the
//! middleware pipeline built by [`RequestHandler`].

mod handler;
pub mod router;
mod static_files;

pub use handler::RequestHandler;
pub use router::PathPattern;
pub use static_files::StaticFileHandler;

use crate::config::Config;
use crate::middleware::{upstream_client, BoxBody};

use anyhow::Result;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// localserve HTTP Server
pub struct Server {
    config: Arc<Config>,
    handler: Arc<RequestHandler>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self> {
        let handler = RequestHandler::new(&config, upstream_client())?;

        Ok(Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
        })
    }

    /// Run the server until Ctrl+C
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.listen_addr()?;
        let listener = TcpListener::bind(addr).await?;
        info!("Serving {} on http://{}", self.config.server.directory, addr);

        tokio::select! {
            result = self.serve(listener) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                Ok(())
            }
        }
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, remote_addr) = listener.accept().await?;
            debug!("Accepted connection from {}", remote_addr);

            let handler = self.handler.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let handler = handler.clone();
                    async move { handle_request(req, remote_addr, handler).await }
                });

                let conn = http1::Builder::new()
                    .keep_alive(true)
                    .serve_connection(io, service);

                if let Err(e) = conn.await {
                    if !is_connection_closed_error(&e) {
                        error!("Connection error: {}", e);
                    }
                }
            });
        }
    }
}

/// Check if error is just a closed connection (not worth logging)
fn is_connection_closed_error(e: &hyper::Error) -> bool {
    if e.is_incomplete_message() {
        return true;
    }
    if let Some(source) = e.source() {
        if let Some(io_err) = source.downcast_ref::<std::io::Error>() {
            return matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            );
        }
    }
    false
}

/// Handle incoming HTTP request
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
    handler: Arc<RequestHandler>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = std::time::Instant::now();

    let response = handler.handle(req, Some(remote_addr)).await;

    info!(
        "{} {} {} {} {:?}",
        remote_addr,
        method,
        uri,
        response.status().as_u16(),
        start.elapsed()
    );

    Ok(response)
}
