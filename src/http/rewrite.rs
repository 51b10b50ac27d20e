//! C3 — the per-owner HTTP rewrite registry.
//!
//! A single process-wide store of `Direction -> Rewrite` entries, plus a
//! by-owner index so a session's rewrites can be torn down in bulk when it
//! closes. Validation (is the scheme sane, is the target well-formed) is
//! the console's job, not the registry's — see `crate::ssh::console`.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::RewriteError;

/// The `(scheme, host, port)` triple keying a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Direction {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Direction {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into().to_lowercase(),
            port,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// A `Direction` plus its upstream `(scheme, port)` override and the owner
/// who installed it.
#[derive(Debug, Clone)]
pub struct Rewrite {
    pub from: Direction,
    pub to_scheme: String,
    pub to_port: u16,
    pub owner: String,
}

#[derive(Default)]
struct Inner {
    by_key: HashMap<Direction, Rewrite>,
    by_owner: HashMap<String, Vec<Direction>>,
}

#[derive(Default)]
pub struct RewriteRegistry {
    inner: RwLock<Inner>,
}

impl RewriteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, rewrite: Rewrite) -> Result<(), RewriteError> {
        let mut inner = self.inner.write();
        if inner.by_key.contains_key(&rewrite.from) {
            return Err(RewriteError::Conflict(rewrite.from.to_string()));
        }
        inner
            .by_owner
            .entry(rewrite.owner.clone())
            .or_default()
            .push(rewrite.from.clone());
        inner.by_key.insert(rewrite.from.clone(), rewrite);
        Ok(())
    }

    pub fn remove(&self, from: &Direction, requester: &str) -> Result<(), RewriteError> {
        let mut inner = self.inner.write();
        match inner.by_key.get(from) {
            Some(rewrite) if rewrite.owner == requester => {}
            Some(_) => return Err(RewriteError::Validation(format!("{requester} does not own {from}"))),
            None => return Err(RewriteError::NotFound(from.to_string())),
        }
        inner.by_key.remove(from);
        if let Some(owned) = inner.by_owner.get_mut(requester) {
            owned.retain(|d| d != from);
        }
        Ok(())
    }

    /// Purges every rewrite owned by `owner`. Used on session teardown.
    pub fn remove_all(&self, owner: &str) -> Vec<Direction> {
        let mut inner = self.inner.write();
        let directions = inner.by_owner.remove(owner).unwrap_or_default();
        for d in &directions {
            inner.by_key.remove(d);
        }
        directions
    }

    pub fn list(&self, owner: &str) -> Vec<Rewrite> {
        let inner = self.inner.read();
        inner
            .by_owner
            .get(owner)
            .map(|directions| {
                directions
                    .iter()
                    .filter_map(|d| inner.by_key.get(d).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Lookup used by the director: does a rewrite exist for this Direction?
    pub fn find(&self, from: &Direction) -> Option<Rewrite> {
        self.inner.read().by_key.get(from).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(host: &str, port: u16, owner: &str) -> Rewrite {
        Rewrite {
            from: Direction::new("http", host, port),
            to_scheme: "https".into(),
            to_port: 8443,
            owner: owner.into(),
        }
    }

    #[test]
    fn add_refuses_duplicate_key() {
        let registry = RewriteRegistry::new();
        registry.add(rewrite("alias.example.com", 80, "owner-a")).unwrap();
        let err = registry.add(rewrite("alias.example.com", 80, "owner-b")).unwrap_err();
        assert!(matches!(err, RewriteError::Conflict(_)));
    }

    #[test]
    fn remove_verifies_ownership() {
        let registry = RewriteRegistry::new();
        registry.add(rewrite("alias.example.com", 80, "owner-a")).unwrap();
        let from = Direction::new("http", "alias.example.com", 80);
        let err = registry.remove(&from, "owner-b").unwrap_err();
        assert!(matches!(err, RewriteError::Validation(_)));
        registry.remove(&from, "owner-a").unwrap();
    }

    #[test]
    fn add_then_remove_restores_prior_list() {
        let registry = RewriteRegistry::new();
        let before = registry.list("owner-a");
        registry.add(rewrite("alias.example.com", 80, "owner-a")).unwrap();
        registry.remove(&Direction::new("http", "alias.example.com", 80), "owner-a").unwrap();
        assert_eq!(registry.list("owner-a").len(), before.len());
    }

    #[test]
    fn remove_all_purges_both_maps() {
        let registry = RewriteRegistry::new();
        registry.add(rewrite("a.example.com", 80, "owner-a")).unwrap();
        registry.add(rewrite("b.example.com", 80, "owner-a")).unwrap();
        let removed = registry.remove_all("owner-a");
        assert_eq!(removed.len(), 2);
        assert!(registry.list("owner-a").is_empty());
        assert!(registry.find(&Direction::new("http", "a.example.com", 80)).is_none());
    }
}
