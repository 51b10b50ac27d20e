//! C5 — front-door TCP dispatch.
//!
//! Iterates the services table and starts one TCP listener per configured
//! port, handing accepted sockets to the HTTP(S) proxy or the SSH server.
//! Per-listener bind failures are logged and tolerated: a privileged-port
//! bind failing should not take the whole service down.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};

use crate::http::Proxy;
use crate::services::{Service, Services};

/// Abstraction over "accept a plaintext front-door connection and, if it's
/// HTTPS, terminate TLS on it first". The ACME/TLS integration is out of
/// scope here; this trait is the seam a real deployment plugs a
/// certificate-serving acceptor into. The default `PlaintextTerminator`
/// passes HTTP straight through and refuses HTTPS, which is enough to
/// exercise the dispatch loop without pulling in a TLS stack.
#[async_trait]
pub trait TlsTerminator: Send + Sync {
    async fn terminate(&self, stream: TcpStream) -> std::io::Result<TcpStream>;
}

pub struct PlaintextTerminator;

#[async_trait]
impl TlsTerminator for PlaintextTerminator {
    async fn terminate(&self, _stream: TcpStream) -> std::io::Result<TcpStream> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "no TLS terminator configured",
        ))
    }
}

/// Anything that can take ownership of an accepted SSH-bound socket. The
/// SSH server (C6) implements this.
#[async_trait]
pub trait SshAcceptor: Send + Sync {
    async fn accept(&self, stream: TcpStream, peer: SocketAddr);
}

pub async fn serve(
    services: Arc<Services>,
    proxy: Arc<Proxy>,
    ssh: Arc<dyn SshAcceptor>,
    tls: Arc<dyn TlsTerminator>,
) {
    let mut listeners = Vec::new();

    for (service, port) in services.all_ports() {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!("dispatch: listening on {addr} ({})", service.as_str());
                listeners.push((service, port, listener));
            }
            Err(e) => {
                warn!("dispatch: failed to bind {addr} ({}): {e}", service.as_str());
            }
        }
    }

    if listeners.is_empty() {
        error!("dispatch: no listeners bound, front door is unreachable");
    }

    let mut tasks = Vec::new();
    for (service, port, listener) in listeners {
        let proxy = proxy.clone();
        let ssh = ssh.clone();
        let tls = tls.clone();
        tasks.push(tokio::spawn(accept_loop(service, port, listener, proxy, ssh, tls)));
    }

    for task in tasks {
        let _ = task.await;
    }
}

async fn accept_loop(
    service: Service,
    port: u16,
    listener: TcpListener,
    proxy: Arc<Proxy>,
    ssh: Arc<dyn SshAcceptor>,
    tls: Arc<dyn TlsTerminator>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("dispatch: accept on port {port} failed: {e}");
                continue;
            }
        };

        let proxy = proxy.clone();
        let ssh = ssh.clone();
        let tls = tls.clone();

        tokio::spawn(async move {
            match service {
                Service::Ssh => ssh.accept(stream, peer).await,
                Service::Http => proxy.serve_connection(stream, port).await,
                Service::Https => match tls.terminate(stream).await {
                    Ok(plain) => proxy.serve_connection(plain, port).await,
                    Err(e) => warn!("dispatch: tls termination failed for {peer}: {e}"),
                },
            }
        });
    }
}
