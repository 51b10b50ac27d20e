//! The `russh::server::Handler` implementation: one instance per connection,
//! driving the global-request pump (`tcpip-forward`, `cancel-tcpip-forward`)
//! and the channel pump (`session` -> console, `forwarded-tcpip` dialed back
//! out by the router, `direct-tcpip` spliced through the router so a client
//! can `ssh -J` through this host to another registered one).

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use russh::keys::PublicKey;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId};
use russh_keys::HashAlg;

use crate::daemon::Daemon;
use crate::error::TunnelError;
use crate::fingerprint::canonical_fqdn;
use crate::ssh::console::Console;
use crate::ssh::session::{KeyExtensions, Session as TunnelSession};

pub struct SessionHandler {
    daemon: Arc<Daemon>,
    peer: SocketAddr,
    authenticated: Arc<std::sync::atomic::AtomicBool>,
    session: Option<Arc<TunnelSession>>,
    console_channel: Option<ChannelId>,
}

impl SessionHandler {
    pub fn new(
        daemon: Arc<Daemon>,
        peer: SocketAddr,
        authenticated: Arc<std::sync::atomic::AtomicBool>,
    ) -> Self {
        Self { daemon, peer, authenticated, session: None, console_channel: None }
    }

    fn session_or_err(&self) -> Result<&Arc<TunnelSession>, TunnelError> {
        self.session.as_ref().ok_or(TunnelError::AuthRejected)
    }

    /// Disconnects a session that authenticated but never registered a
    /// forward within the idle window. A no-op once `register_once`
    /// succeeds, since that call disables the timer first.
    fn spawn_idle_watchdog(session: Arc<TunnelSession>) {
        tokio::spawn(async move {
            session.idle_fired().await;
            warn!("session: {} idle with no forward registered, disconnecting", session.fqdn);
            session.disconnect_idle().await;
        });
    }
}

#[async_trait]
impl Handler for SessionHandler {
    type Error = TunnelError;

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let key_bytes = public_key.to_bytes().map_err(|_| TunnelError::AuthRejected)?;
        let allowed = self
            .daemon
            .auth
            .authorize(user, &key_bytes)
            .await
            .map_err(|_| TunnelError::AuthRejected)?;

        if !allowed {
            info!("ssh: {} rejected for user '{}'", self.peer, user);
            return Ok(Auth::Reject { proceed_with_methods: None });
        }

        let fqdn = canonical_fqdn(&key_bytes, self.daemon.services.hostname());
        let extensions = KeyExtensions {
            fingerprint_sha256: public_key.fingerprint(HashAlg::Sha256).to_string(),
            fingerprint_base32: crate::fingerprint::fingerprint(&key_bytes),
            openssh_authorized_key: public_key.to_openssh().unwrap_or_default(),
        };

        self.session = Some(TunnelSession::new(self.daemon.clone(), self.peer, fqdn, extensions));
        Ok(Auth::Accept)
    }

    async fn auth_succeeded(&mut self, session: &mut Session) -> Result<(), Self::Error> {
        self.authenticated.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(tunnel_session) = &self.session {
            tunnel_session.set_handle(session.handle()).await;
            info!("ssh: {} authenticated as {}", self.peer, tunnel_session.fqdn);
            Self::spawn_idle_watchdog(tunnel_session.clone());
        }
        Ok(())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let tunnel_session = self.session_or_err()?.clone();
        let channel_id = channel.id();
        self.console_channel = Some(channel_id);

        let console = Console::new(self.daemon.clone(), tunnel_session);
        tokio::spawn(async move {
            console.run(channel).await;
        });
        Ok(true)
    }

    /// Acked unconditionally, matching the original's "reply true to
    /// pty-req and shell, false to everything else": without this a
    /// standard `ssh -R80:localhost:80 host` (no `-N`) blocks forever
    /// waiting for `SSH_MSG_CHANNEL_SUCCESS` before the console it already
    /// opened ever becomes reachable.
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;
        Ok(())
    }

    /// Queues the command for the console's command loop, which picks it
    /// up and runs it exactly as if the user had typed it — the same
    /// `commands` queue a typed line feeds.
    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(tunnel_session) = &self.session {
            let command = String::from_utf8_lossy(data).to_string();
            tunnel_session.queue_exec(command);
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    /// The SSH-jump path: a client authenticates here and opens a
    /// `direct-tcpip` channel to some *other* registered host, the same
    /// way `ssh -J thishost otherhost` works. Resolved through the router
    /// exactly like the front-door proxy resolves a dial, then spliced
    /// bidirectionally with the opened channel.
    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let tunnel_session = match self.session_or_err() {
            Ok(s) => s.clone(),
            Err(_) => return Ok(false),
        };

        let address = format!("{host_to_connect}:{port_to_connect}");
        let mut upstream = match self.daemon.router.dial(&address).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("ssh: {} direct-tcpip to {} refused: {}", self.peer, address, e);
                return Ok(false);
            }
        };

        info!("ssh: {} direct-tcpip to {}", self.peer, address);
        // A splice in progress counts as activity for as long as it runs.
        tunnel_session.disable_idle();
        tokio::spawn(async move {
            let mut client = channel.into_stream();
            if let Err(e) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
                debug!("ssh: direct-tcpip splice to {} ended: {}", address, e);
            }
        });
        Ok(true)
    }

    async fn tcpip_forward(
        &mut self,
        _address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let tunnel_session = match self.session_or_err() {
            Ok(s) => s.clone(),
            Err(_) => return Ok(false),
        };

        let registered_port = *port as u16;
        tunnel_session.declare_port(registered_port);
        match tunnel_session.register_once().await {
            Ok(_) => {
                let urls: Vec<String> = self
                    .daemon
                    .services
                    .all_ports()
                    .filter(|(_, p)| *p == registered_port)
                    .map(|(service, p)| format!("{}://{}:{}", service.as_str(), tunnel_session.fqdn, p))
                    .collect();
                let urls = if urls.is_empty() {
                    vec![format!("tcp://{}:{}", tunnel_session.fqdn, registered_port)]
                } else {
                    urls
                };
                tunnel_session.notify(crate::terminal_ui::create_registration_box(
                    &tunnel_session.fqdn,
                    registered_port,
                    &urls,
                ));
                Ok(true)
            }
            Err(e) => {
                tunnel_session.notify(format!("*** could not register {}: {} ***", tunnel_session.fqdn, e));
                Ok(false)
            }
        }
    }

    async fn cancel_tcpip_forward(
        &mut self,
        _address: &str,
        _port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.console_channel == Some(channel) {
            if let Some(tunnel_session) = self.session.take() {
                tunnel_session.teardown().await;
            }
        }
        Ok(())
    }
}
