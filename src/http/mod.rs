//! C3 (rewrite registry) and C4 (front-door HTTP proxy).

pub mod director;
pub mod proxy;
pub mod rewrite;

pub use proxy::Proxy;
pub use rewrite::{Direction, Rewrite, RewriteRegistry};
