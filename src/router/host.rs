//! Host record: the router's wrapper around a live or formerly-live session.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::error::RouterError;
use crate::router::{SessionHandle, TunnelStream};

/// A name that has, at some point, had a live SSH session registered under
/// it. Distinguishes *offline* (host exists, no live session) from
/// *not found* (no host record at all).
pub struct Host {
    pub name: String,
    pub created: SystemTime,
    last_seen: Mutex<SystemTime>,
    live: Mutex<Option<Arc<dyn SessionHandle>>>,
}

impl Host {
    pub fn new_live(name: String, session: Arc<dyn SessionHandle>) -> Self {
        let now = SystemTime::now();
        Self::new_live_with_created(name, now, session)
    }

    pub fn new_live_with_created(
        name: String,
        created: SystemTime,
        session: Arc<dyn SessionHandle>,
    ) -> Self {
        Self {
            name,
            created,
            last_seen: Mutex::new(SystemTime::now()),
            live: Mutex::new(Some(session)),
        }
    }

    /// A fresh host record carrying this one's identity and timestamps but
    /// with its live reference cleared, as produced by `offline()`.
    pub fn as_offline(&self) -> Host {
        Host {
            name: self.name.clone(),
            created: self.created,
            last_seen: Mutex::new(*self.last_seen.lock()),
            live: Mutex::new(None),
        }
    }

    pub fn last_seen(&self) -> SystemTime {
        *self.last_seen.lock()
    }

    pub fn touch(&self) {
        *self.last_seen.lock() = SystemTime::now();
    }

    pub fn is_live(&self) -> bool {
        self.live.lock().is_some()
    }

    pub fn live_session(&self) -> Option<Arc<dyn SessionHandle>> {
        self.live.lock().clone()
    }

    /// True if `candidate` is (by pointer identity) the currently-live
    /// session. Used by `offline()` to guard against a stale call racing a
    /// newer `online()` for the same name.
    pub fn is_live_session(&self, candidate: &Arc<dyn SessionHandle>) -> bool {
        match &*self.live.lock() {
            Some(live) => Arc::ptr_eq(live, candidate),
            None => false,
        }
    }

    pub async fn dial(&self, port: u16) -> Result<TunnelStream, RouterError> {
        let live = self.live_session();
        match live {
            Some(session) => session.dial(port).await,
            None => Err(RouterError::Offline(self.name.clone())),
        }
    }

    pub async fn notify_replaced(&self) {
        if let Some(session) = self.live_session() {
            session.notify_replaced().await;
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("live", &self.is_live())
            .finish()
    }
}
