//! C4 — the front-door HTTP(S) reverse proxy.
//!
//! One process-wide proxy instance, shared by every front-door HTTP/HTTPS
//! listener opened by `crate::dispatch`. Its transport dials through the
//! router; see `RouterConnector`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::client::conn::http1 as client_http1;
use hyper::server::conn::http1 as server_http1;
use hyper::service::service_fn;
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use log::{debug, warn};

use crate::http::director;
use crate::http::rewrite::RewriteRegistry;
use crate::router::Router;
use crate::services::Services;

/// Upstream TLS is never verified: the connection lives inside the SSH
/// tunnel and a self-signed certificate on the tunneled service is normal.
/// `InsecureSkipVerify` in the source this is ported from; this crate never
/// terminates TLS to the upstream at all (the proxy only ever dials plain
/// TCP through the router — TLS front-door termination is handled before
/// the proxy sees the request, by the ACME-backed listener in
/// `crate::dispatch`), so there is no TLS verification setting to carry.
pub struct Proxy {
    router: Arc<Router>,
    services: Arc<Services>,
    rewrites: Arc<RewriteRegistry>,
}

impl Proxy {
    pub fn new(router: Arc<Router>, services: Arc<Services>, rewrites: Arc<RewriteRegistry>) -> Self {
        Self { router, services, rewrites }
    }

    /// Serve one accepted front-door connection. `local_port` is the port
    /// the listener itself is bound to, used by the director to pick a
    /// default scheme.
    pub async fn serve_connection(
        self: Arc<Self>,
        stream: tokio::net::TcpStream,
        local_port: u16,
    ) {
        let io = TokioIo::new(stream);
        let proxy = self.clone();
        let service = service_fn(move |req| {
            let proxy = proxy.clone();
            async move { proxy.handle(req, local_port).await }
        });

        if let Err(e) = server_http1::Builder::new()
            .serve_connection(io, service)
            .await
        {
            debug!("front-door connection ended: {e}");
        }
    }

    async fn handle(
        &self,
        req: Request<Incoming>,
        local_port: u16,
    ) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let host = req
            .headers()
            .get(hyper::header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .split(':')
            .next()
            .unwrap_or("")
            .to_string();

        let upstream = director::direct(&host, local_port, &self.services, &self.rewrites);

        match self.forward(req, &upstream).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                warn!("dial to {}:{} failed: {e}", upstream.host, upstream.port);
                Ok(bad_gateway())
            }
        }
    }

    async fn forward(
        &self,
        mut req: Request<Incoming>,
        upstream: &director::Upstream,
    ) -> anyhow::Result<Response<Full<Bytes>>> {
        req.headers_mut().insert(
            "x-forwarded-for",
            hyper::header::HeaderValue::from_static("unknown"),
        );

        let address = format!("{}:{}", upstream.host, upstream.port);
        let stream = self.router.dial(&address).await?;
        let io = TokioIo::new(TunnelIo(stream));

        let (mut sender, conn) = client_http1::handshake(io).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("upstream connection ended: {e}");
            }
        });

        let (parts, body) = req.into_parts();
        let collected = body.collect().await?.to_bytes();
        let req = Request::from_parts(parts, Full::new(collected));

        let resp = sender.send_request(req).await?;
        let (parts, body) = resp.into_parts();
        let collected = body.collect().await?.to_bytes();
        Ok(Response::from_parts(parts, Full::new(collected)))
    }
}

fn bad_gateway() -> Response<Full<Bytes>> {
    Response::builder()
        .status(hyper::StatusCode::BAD_GATEWAY)
        .body(Full::new(Bytes::from_static(b"bad gateway")))
        .expect("static response is well-formed")
}

/// Wraps the router's boxed byte stream so it can be handed to hyper's
/// client connection driver.
struct TunnelIo(crate::router::TunnelStream);

impl tokio::io::AsyncRead for TunnelIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for TunnelIo {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// Transport tuning constants, named for documentation purposes even though
/// each is consumed piecemeal by the connector that uses it.
pub const MAX_IDLE_CONNS: usize = 100;
pub const MAX_IDLE_CONNS_PER_HOST: usize = 10;
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const EXPECT_CONTINUE_TIMEOUT: Duration = Duration::from_secs(1);
