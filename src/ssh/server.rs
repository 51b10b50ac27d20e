//! C6 — the SSH protocol front-end. Unlike a typical `russh` consumer, this
//! does not own a listener: `dispatch::serve` binds the sockets (C5) and
//! hands each accepted connection to `accept`, where the 10s
//! authentication-or-disconnect timer is applied around the handshake.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::net::TcpStream;

use crate::daemon::Daemon;
use crate::dispatch::SshAcceptor;
use crate::ssh::handler::SessionHandler;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TunnelServer {
    daemon: Arc<Daemon>,
    config: Arc<russh::server::Config>,
}

impl TunnelServer {
    pub fn new(daemon: Arc<Daemon>, config: Arc<russh::server::Config>) -> Self {
        Self { daemon, config }
    }
}

#[async_trait]
impl SshAcceptor for TunnelServer {
    async fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        let authenticated = Arc::new(AtomicBool::new(false));
        let handler = SessionHandler::new(self.daemon.clone(), peer, authenticated.clone());

        let run = russh::server::run_stream(self.config.clone(), stream, handler);
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => {
                if let Err(e) = result {
                    debug!("ssh: session from {peer} ended: {e}");
                }
            }
            _ = tokio::time::sleep(AUTH_TIMEOUT) => {
                if authenticated.load(Ordering::SeqCst) {
                    if let Err(e) = run.await {
                        debug!("ssh: session from {peer} ended: {e}");
                    }
                } else {
                    warn!("ssh: {peer} did not authenticate within {:?}, disconnecting", AUTH_TIMEOUT);
                }
            }
        }
    }
}
