//! C9 — the ACME host-existence predicate.
//!
//! The only interface between the core and a TLS-provisioning layer: "is
//! this name one this server will vouch for". Delegates entirely to the
//! router's `exists`.

use std::sync::Arc;

use crate::router::Router;

pub struct HostPolicy {
    router: Arc<Router>,
}

impl HostPolicy {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }

    /// `Ok(())` if `name` is known to the router (live or offline host, or
    /// an alias); a not-found error otherwise, which the TLS provider reads
    /// as "decline certificate issuance".
    pub fn exists(&self, name: &str) -> Result<(), crate::error::RouterError> {
        self.router.exists(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_host_is_declined() {
        let dir = std::env::temp_dir().join("tunnelmux-acme-test");
        let router = Router::load(dir).await.unwrap();
        let policy = HostPolicy::new(router);
        assert!(policy.exists("unknown.example.com").is_err());
    }
}
