//! C2 — the name router.
//!
//! An in-memory name -> endpoint map with an atomic snapshot swap, backed by
//! durable aliases on disk. See the module-level docs on `Router` for the
//! concurrency contract.

mod host;
mod intermediate;
mod named_route;

pub use host::Host;
pub use intermediate::{Decoder, DecoderRegistry, Intermediate};
pub use named_route::{NamedRoute, PersistedNamedRoute};

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use log::info;
use parking_lot::RwLock as SyncRwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::RouterError;

/// Anything the router can open a byte stream to. Implemented by the SSH
/// session type; kept here (rather than depending on the `ssh` module) to
/// avoid a dependency cycle between router and session.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}
pub type TunnelStream = Box<dyn AsyncReadWrite>;

impl std::fmt::Debug for dyn AsyncReadWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AsyncReadWrite")
    }
}

#[async_trait]
pub trait SessionHandle: Send + Sync {
    fn fqdn(&self) -> &str;
    async fn dial(&self, port: u16) -> Result<TunnelStream, RouterError>;
    async fn notify_replaced(&self);
}

/// Tagged sum of the two things the router can route to. Modeled as an enum
/// rather than trait-object inheritance, per the design notes.
#[derive(Clone)]
pub enum Endpoint {
    Host(Arc<Host>),
    Named(Arc<NamedRoute>),
}

impl Endpoint {
    pub fn name(&self) -> &str {
        match self {
            Endpoint::Host(h) => &h.name,
            Endpoint::Named(n) => &n.name,
        }
    }
}

type Snapshot = Arc<HashMap<String, Endpoint>>;

/// The router. Readers (`dial`, `find`, `exists`) take a read lock over the
/// `active` pointer only and never block on writers beyond the instant of a
/// pointer flip. Writers (`online`, `offline`, `add_name`, `remove_name`)
/// serialize on `edit_lock`, build a fresh snapshot from a clone of the
/// current one, then swap the pointer under a brief write lock. This is the
/// copy-on-write variant of the two-map algorithm the design notes call out
/// as an equally valid alternative to keeping two long-lived maps.
pub struct Router {
    dir: PathBuf,
    active: SyncRwLock<Snapshot>,
    edit_lock: AsyncMutex<()>,
    name_index: SyncRwLock<HashMap<String, Vec<String>>>,
    decoders: SyncRwLock<DecoderRegistry>,
}

impl Router {
    /// Load every alias file in `dir`, installing the result as the initial
    /// snapshot. Missing `dir` is treated as an empty router, not an error.
    pub async fn load(dir: PathBuf) -> Result<Arc<Router>, RouterError> {
        let router = Arc::new(Router {
            dir: dir.clone(),
            active: SyncRwLock::new(Arc::new(HashMap::new())),
            edit_lock: AsyncMutex::new(()),
            name_index: SyncRwLock::new(HashMap::new()),
            decoders: SyncRwLock::new(DecoderRegistry::new()),
        });

        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(router),
            Err(e) => return Err(RouterError::Persistence(e)),
        };

        let mut map = HashMap::new();
        let mut index: HashMap<String, Vec<String>> = HashMap::new();

        for entry in entries {
            let entry = entry.map_err(RouterError::Persistence)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(RouterError::Persistence)?;
            let intermediate: Intermediate = serde_json::from_str(&raw)?;
            {
                let decoders = router.decoders.read();
                intermediate.validate_metadata(&decoders)?;
            }
            if let Some(persisted) = intermediate.namedroute {
                let route = Arc::new(persisted.into_named_route());
                index.entry(route.owner.clone()).or_default().push(route.name.clone());
                map.insert(route.name.clone(), Endpoint::Named(route));
            }
        }

        info!("router: loaded {} aliases from {}", map.len(), dir.display());
        *router.active.write() = Arc::new(map);
        *router.name_index.write() = index;
        Ok(router)
    }

    pub fn register_metadata_decoder(&self, name: impl Into<String>, decoder: Box<dyn Decoder>) {
        self.decoders.write().register(name, decoder);
    }

    fn snapshot(&self) -> Snapshot {
        self.active.read().clone()
    }

    fn install(&self, next: HashMap<String, Endpoint>) {
        *self.active.write() = Arc::new(next);
    }

    fn alias_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    // ---- readers ---------------------------------------------------------

    pub fn find(&self, name: &str) -> Option<Endpoint> {
        let name = name.to_lowercase();
        self.snapshot().get(&name).cloned()
    }

    pub fn exists(&self, name: &str) -> Result<(), RouterError> {
        if self.find(name).is_some() {
            Ok(())
        } else {
            Err(RouterError::NotFound(name.to_lowercase()))
        }
    }

    pub fn names(&self, owner: &str) -> Vec<String> {
        self.name_index.read().get(owner).cloned().unwrap_or_default()
    }

    /// `dial(ctx, network, "host:port")`. Splits the target, looks it up in
    /// the active snapshot, and delegates to the endpoint. A named-alias
    /// endpoint rewrites the host to its owner and re-enters `dial`.
    pub async fn dial(self: &Arc<Self>, address: &str) -> Result<TunnelStream, RouterError> {
        let (host, port) = split_host_port(address)?;
        self.dial_host_port(&host, port).await
    }

    fn dial_host_port<'a>(
        self: &'a Arc<Self>,
        host: &'a str,
        port: u16,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<TunnelStream, RouterError>> + Send + 'a>>
    {
        Box::pin(async move {
            let endpoint = self
                .find(host)
                .ok_or_else(|| RouterError::NotFound(host.to_lowercase()))?;
            match endpoint {
                Endpoint::Host(h) => h.dial(port).await,
                Endpoint::Named(n) => {
                    n.touch();
                    self.dial_host_port(&n.owner, port).await
                }
            }
        })
    }

    // ---- writers -----------------------------------------------------

    /// Installs `session` as the live endpoint for `fqdn`. If an existing
    /// record is a host, it is refreshed in place (preserving `created`),
    /// the previous live session (if any) is notified asynchronously that
    /// it has been replaced, and `replaced` is `true`. Fails if the name is
    /// currently held by an alias: aliases are never displaced by an online
    /// registration.
    pub async fn online(
        &self,
        fqdn: &str,
        session: Arc<dyn SessionHandle>,
    ) -> Result<bool, RouterError> {
        let fqdn = fqdn.to_lowercase();
        let _guard = self.edit_lock.lock().await;

        let mut next = (*self.snapshot()).clone();
        let mut replaced = false;
        let mut created = std::time::SystemTime::now();

        match next.get(&fqdn) {
            Some(Endpoint::Host(existing)) => {
                created = existing.created;
                if let Some(previous) = existing.live_session() {
                    replaced = true;
                    let previous = previous.clone();
                    tokio::spawn(async move {
                        previous.notify_replaced().await;
                    });
                }
            }
            Some(Endpoint::Named(_)) => {
                return Err(RouterError::Conflict(fqdn));
            }
            None => {}
        }

        let host = Arc::new(Host::new_live_with_created(fqdn.clone(), created, session));
        next.insert(fqdn, Endpoint::Host(host));
        self.install(next);
        Ok(replaced)
    }

    /// Clears the live reference for `fqdn` if it is currently `session`.
    /// A no-op if a newer session has already taken over (guarded by
    /// pointer identity), or if the name holds an alias.
    pub async fn offline(&self, fqdn: &str, session: &Arc<dyn SessionHandle>) {
        let fqdn = fqdn.to_lowercase();
        let _guard = self.edit_lock.lock().await;

        let mut next = (*self.snapshot()).clone();
        let replacement = match next.get(&fqdn) {
            Some(Endpoint::Host(existing)) if existing.is_live_session(session) => {
                existing.touch();
                Some(Arc::new(existing.as_offline()))
            }
            _ => None,
        };

        if let Some(offline_host) = replacement {
            next.insert(fqdn, Endpoint::Host(offline_host));
            self.install(next);
        }
    }

    /// Adds `name` as an alias owned by `owner`. Idempotent if `owner`
    /// already holds it; fails with *conflict* if a different owner holds
    /// it. Persists before making the alias visible.
    pub async fn add_name(&self, name: &str, owner: &str) -> Result<(), RouterError> {
        let name = name.to_lowercase();
        let _guard = self.edit_lock.lock().await;

        let snapshot = self.snapshot();
        if let Some(Endpoint::Named(existing)) = snapshot.get(&name) {
            if existing.owner == owner {
                return Ok(());
            }
            return Err(RouterError::Conflict(name));
        }
        if let Some(Endpoint::Host(_)) = snapshot.get(&name) {
            return Err(RouterError::Conflict(name));
        }

        let route = Arc::new(NamedRoute::new(name.clone(), owner.to_string()));
        self.persist(&route)?;

        let mut next = (*snapshot).clone();
        next.insert(name.clone(), Endpoint::Named(route));
        self.name_index.write().entry(owner.to_string()).or_default().push(name.clone());
        self.install(next);
        Ok(())
    }

    /// Removes `name` if `requester` owns it. Unlinks on disk first.
    pub async fn remove_name(&self, name: &str, requester: &str) -> Result<(), RouterError> {
        let name = name.to_lowercase();
        let _guard = self.edit_lock.lock().await;

        let snapshot = self.snapshot();
        match snapshot.get(&name) {
            Some(Endpoint::Named(route)) if route.owner == requester => {}
            Some(Endpoint::Named(_)) => {
                return Err(RouterError::Conflict(format!(
                    "{requester} does not own {name}"
                )))
            }
            _ => return Err(RouterError::NotFound(name)),
        }

        self.unlink(&name)?;

        let mut next = (*snapshot).clone();
        next.remove(&name);
        if let Some(names) = self.name_index.write().get_mut(requester) {
            names.retain(|n| n != &name);
        }
        self.install(next);
        Ok(())
    }

    /// Best-effort bulk removal: returns the prefix of names that were
    /// actually removed before the first failure (if any).
    pub async fn remove_names(&self, requester: &str) -> (Vec<String>, Option<RouterError>) {
        let names = self.names(requester);
        let mut removed = Vec::new();
        for name in names {
            match self.remove_name(&name, requester).await {
                Ok(()) => removed.push(name),
                Err(e) => return (removed, Some(e)),
            }
        }
        (removed, None)
    }

    fn persist(&self, route: &NamedRoute) -> Result<(), RouterError> {
        std::fs::create_dir_all(&self.dir).map_err(RouterError::Persistence)?;
        let intermediate = Intermediate::for_named_route(&route.to_persisted());
        let file = std::fs::File::create(self.alias_path(&route.name)).map_err(RouterError::Persistence)?;
        serde_json::to_writer_pretty(file, &intermediate)?;
        Ok(())
    }

    fn unlink(&self, name: &str) -> Result<(), RouterError> {
        match std::fs::remove_file(self.alias_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RouterError::Persistence(e)),
        }
    }
}

fn split_host_port(address: &str) -> Result<(String, u16), RouterError> {
    let idx = address
        .rfind(':')
        .ok_or_else(|| RouterError::NotFound(address.to_string()))?;
    let host = &address[..idx];
    let port: u16 = address[idx + 1..]
        .parse()
        .map_err(|_| RouterError::NotFound(address.to_string()))?;
    Ok((host.to_lowercase(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSession {
        fqdn: String,
        dial_calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionHandle for FakeSession {
        fn fqdn(&self) -> &str {
            &self.fqdn
        }
        async fn dial(&self, _port: u16) -> Result<TunnelStream, RouterError> {
            self.dial_calls.fetch_add(1, Ordering::SeqCst);
            Err(RouterError::UnavailablePort(0))
        }
        async fn notify_replaced(&self) {}
    }

    fn fake(fqdn: &str) -> Arc<dyn SessionHandle> {
        Arc::new(FakeSession {
            fqdn: fqdn.to_string(),
            dial_calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn find_returns_exactly_the_online_endpoint() {
        let dir = tempdir();
        let router = Router::load(dir.clone()).await.unwrap();
        let session = fake("f1.example.com");
        router.online("f1.example.com", session).await.unwrap();
        assert!(router.find("f1.example.com").is_some());
        assert!(router.find("unknown.example.com").is_none());
    }

    #[tokio::test]
    async fn offline_after_online_yields_offline_not_not_found() {
        let dir = tempdir();
        let router = Router::load(dir.clone()).await.unwrap();
        let session = fake("f1.example.com");
        router.online("f1.example.com", session.clone()).await.unwrap();
        router.offline("f1.example.com", &session).await;

        let err = router.dial("f1.example.com:80").await.unwrap_err();
        assert!(matches!(err, RouterError::Offline(_)));
    }

    #[tokio::test]
    async fn add_name_conflict_for_different_owner() {
        let dir = tempdir();
        let router = Router::load(dir.clone()).await.unwrap();
        router.add_name("alias.example.com", "owner-a").await.unwrap();
        let err = router.add_name("alias.example.com", "owner-b").await.unwrap_err();
        assert!(matches!(err, RouterError::Conflict(_)));
    }

    #[tokio::test]
    async fn add_name_is_idempotent_for_same_owner() {
        let dir = tempdir();
        let router = Router::load(dir.clone()).await.unwrap();
        router.add_name("alias.example.com", "owner-a").await.unwrap();
        router.add_name("alias.example.com", "owner-a").await.unwrap();
    }

    #[tokio::test]
    async fn remove_names_removes_exactly_the_owners_set() {
        let dir = tempdir();
        let router = Router::load(dir.clone()).await.unwrap();
        router.add_name("a.example.com", "owner-a").await.unwrap();
        router.add_name("b.example.com", "owner-a").await.unwrap();
        let before = router.names("owner-a");
        let (removed, err) = router.remove_names("owner-a").await;
        assert!(err.is_none());
        let mut before_sorted = before.clone();
        before_sorted.sort();
        let mut removed_sorted = removed.clone();
        removed_sorted.sort();
        assert_eq!(before_sorted, removed_sorted);
        assert!(router.names("owner-a").is_empty());
    }

    #[tokio::test]
    async fn restart_reloads_exactly_the_persisted_aliases() {
        let dir = tempdir();
        {
            let router = Router::load(dir.clone()).await.unwrap();
            router.add_name("alias.example.com", "owner-a").await.unwrap();
        }
        let router = Router::load(dir.clone()).await.unwrap();
        let endpoint = router.find("alias.example.com").unwrap();
        match endpoint {
            Endpoint::Named(route) => assert_eq!(route.owner, "owner-a"),
            _ => panic!("expected named route"),
        }
    }

    #[tokio::test]
    async fn named_route_dial_rewrites_to_owner() {
        let dir = tempdir();
        let router = Router::load(dir.clone()).await.unwrap();
        let session = fake("owner.example.com");
        router.online("owner.example.com", session).await.unwrap();
        router.add_name("alias.example.com", "owner.example.com").await.unwrap();

        let err = router.dial("alias.example.com:8080").await.unwrap_err();
        // FakeSession::dial always errors UnavailablePort, proving the
        // named route successfully re-entered dial against the owner.
        assert!(matches!(err, RouterError::UnavailablePort(_)));
    }

    #[tokio::test]
    async fn online_refuses_to_displace_an_alias() {
        let dir = tempdir();
        let router = Router::load(dir.clone()).await.unwrap();
        router.add_name("claimed.example.com", "owner-a").await.unwrap();
        let session = fake("claimed.example.com");
        let err = router.online("claimed.example.com", session).await.unwrap_err();
        assert!(matches!(err, RouterError::Conflict(_)));
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "tunnelmux-router-test-{}-{}",
            std::process::id(),
            rand_suffix()
        ));
        dir
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
    }
}
