//! C8 — pluggable, single-query public-key authorization.
//!
//! Exactly one source is active per process (the single-source form; see
//! DESIGN.md's Open Question resolution). Concrete sources beyond the
//! built-in "anyone" default are out of scope for the core.

use async_trait::async_trait;

#[async_trait]
pub trait AuthSource: Send + Sync {
    async fn authorize(&self, user: &str, public_key_bytes: &[u8]) -> anyhow::Result<bool>;
}

/// Accepts every key. Useful for local testing and for deployments that
/// gate access some other way (e.g. network-level).
pub struct AnyoneSource;

#[async_trait]
impl AuthSource for AnyoneSource {
    async fn authorize(&self, _user: &str, _public_key_bytes: &[u8]) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn anyone_source_allows_everything() {
        let source = AnyoneSource;
        assert!(source.authorize("anyone", b"key").await.unwrap());
    }
}
