//! C7 — the per-connection session state machine.
//!
//! One `Session` exists per connected SSH client, constructed once the
//! client's public key is known (and therefore its canonical FQDN). It
//! tracks declared forwards, the buffered terminal message queue, the idle
//! timer, and the one-shot router registration guard. It also implements
//! `router::SessionHandle` so the router can dial back into it.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use parking_lot::RwLock;
use russh::server::Handle;
use russh::Disconnect;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::daemon::Daemon;
use crate::error::RouterError;
use crate::router::{SessionHandle, TunnelStream};
use crate::ssh::idle::IdleTimer;

/// Capacity of the outbound terminal message queue. Best-effort: a full
/// queue drops the newest message rather than blocking the pump that fills
/// it (these are advisory notices, not data the user can't live without).
const MSG_QUEUE_CAPACITY: usize = 50;

/// Capacity of the queued `exec` command channel. A handful is plenty: a
/// real client sends at most one `exec` per channel.
const EXEC_QUEUE_CAPACITY: usize = 8;

const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Public-key fingerprint extensions recorded by the auth callback, carried
/// forward for the console's `whoami`/`access` commands.
#[derive(Debug, Clone)]
pub struct KeyExtensions {
    pub fingerprint_sha256: String,
    pub fingerprint_base32: String,
    pub openssh_authorized_key: String,
}

pub struct Session {
    pub daemon: Arc<Daemon>,
    pub peer: SocketAddr,
    pub fqdn: String,
    pub key_extensions: KeyExtensions,

    forwarded_ports: RwLock<HashSet<u16>>,
    msgs_tx: mpsc::Sender<String>,
    msgs_rx: AsyncMutex<Option<mpsc::Receiver<String>>>,
    exec_tx: mpsc::Sender<String>,
    exec_rx: AsyncMutex<Option<mpsc::Receiver<String>>>,
    handle: AsyncMutex<Option<Handle>>,
    idle: IdleTimer,
    registered: AtomicBool,
}

impl Session {
    pub fn new(
        daemon: Arc<Daemon>,
        peer: SocketAddr,
        fqdn: String,
        key_extensions: KeyExtensions,
    ) -> Arc<Session> {
        let (msgs_tx, msgs_rx) = mpsc::channel(MSG_QUEUE_CAPACITY);
        let (exec_tx, exec_rx) = mpsc::channel(EXEC_QUEUE_CAPACITY);
        let idle = IdleTimer::spawn(IDLE_TIMEOUT);

        Arc::new(Session {
            daemon,
            peer,
            fqdn,
            key_extensions,
            forwarded_ports: RwLock::new(HashSet::new()),
            msgs_tx,
            msgs_rx: AsyncMutex::new(Some(msgs_rx)),
            exec_tx,
            exec_rx: AsyncMutex::new(Some(exec_rx)),
            handle: AsyncMutex::new(None),
            idle,
            registered: AtomicBool::new(false),
        })
    }

    pub async fn set_handle(&self, handle: Handle) {
        *self.handle.lock().await = Some(handle);
    }

    /// Taken exactly once by the console's terminal-writer pump.
    pub async fn take_msg_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.msgs_rx.lock().await.take()
    }

    /// Best-effort push to the user's terminal. Drops the message if the
    /// queue is full or nobody is listening yet.
    pub fn notify(&self, message: impl Into<String>) {
        let _ = self.msgs_tx.try_send(message.into());
    }

    /// Queues a command from an `exec` channel request for the console's
    /// command loop to pick up and run as though it had been typed.
    /// Best-effort, like `notify`: a client that somehow floods `exec`
    /// requests loses the overflow rather than blocking the SSH pump.
    pub fn queue_exec(&self, command: impl Into<String>) {
        let _ = self.exec_tx.try_send(command.into());
    }

    /// Taken exactly once by the console's command loop.
    pub async fn take_exec_receiver(&self) -> Option<mpsc::Receiver<String>> {
        self.exec_rx.lock().await.take()
    }

    pub fn declared_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.forwarded_ports.read().iter().copied().collect();
        ports.sort_unstable();
        ports
    }

    pub fn declare_port(&self, port: u16) {
        self.forwarded_ports.write().insert(port);
    }

    pub fn poke_idle(&self) {
        self.idle.poke();
    }

    pub fn disable_idle(&self) {
        self.idle.disable();
    }

    /// Resolves when the idle timer fires; the caller is responsible for
    /// tearing the transport down when it does.
    pub async fn idle_fired(&self) {
        self.idle.fired().await;
    }

    /// Runs the one-shot router registration. Returns `true` if an existing
    /// live session was displaced. A no-op (returns `false`, no error) on
    /// the second and subsequent calls within the same session's lifetime.
    pub async fn register_once(self: &Arc<Self>) -> Result<bool, RouterError> {
        if self.registered.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.disable_idle();
        let handle: Arc<dyn SessionHandle> = self.clone();
        let replaced = self.daemon.router.online(&self.fqdn, handle).await?;
        if replaced {
            warn!("session: {} was already registered, displacing prior session", self.fqdn);
        }
        Ok(replaced)
    }

    /// Disconnects the transport directly, for the idle watchdog rather
    /// than a router-driven replacement (see `notify_replaced`).
    pub async fn disconnect_idle(&self) {
        if let Some(handle) = self.handle.lock().await.as_ref() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "idle timeout".to_string(), "en".to_string())
                .await;
        }
    }

    pub async fn teardown(self: &Arc<Self>) {
        let handle: Arc<dyn SessionHandle> = self.clone();
        self.daemon.router.offline(&self.fqdn, &handle).await;
        let removed = self.daemon.rewrites.remove_all(&self.fqdn);
        if !removed.is_empty() {
            info!("session: {} tore down {} http rewrite(s)", self.fqdn, removed.len());
        }
    }
}

#[async_trait]
impl SessionHandle for Session {
    fn fqdn(&self) -> &str {
        &self.fqdn
    }

    /// Opens a `forwarded-tcpip` channel back to this session for `port`.
    /// Fails with *unavailable-port* unless the port was declared via
    /// `tcpip-forward`.
    async fn dial(&self, port: u16) -> Result<TunnelStream, RouterError> {
        if !self.forwarded_ports.read().contains(&port) {
            return Err(RouterError::UnavailablePort(port as u32));
        }

        let handle_guard = self.handle.lock().await;
        let handle = handle_guard
            .as_ref()
            .ok_or_else(|| RouterError::Offline(self.fqdn.clone()))?;

        let channel = handle
            .channel_open_forwarded_tcpip("localhost", port as u32, "localhost", 0)
            .await
            .map_err(|_| RouterError::Offline(self.fqdn.clone()))?;

        Ok(Box::new(channel.into_stream()))
    }

    /// Displaced by a newer session of the same identity: warn, flush, then
    /// close the transport.
    async fn notify_replaced(&self) {
        self.notify(crate::terminal_ui::create_replacement_warning());
        tokio::time::sleep(Duration::from_millis(250)).await;
        if let Some(handle) = self.handle.lock().await.as_ref() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "replaced by a newer session".to_string(), "en".to_string())
                .await;
        }
    }
}
