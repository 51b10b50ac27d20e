//! Multi-tenant SSH reverse-tunnel server.
//!
//! A client authenticates over SSH, its public key derives a canonical
//! FQDN, and `tcpip-forward` requests register that identity with the
//! front-door proxy. See `daemon::Daemon` for the aggregate root tying the
//! router, service table, rewrite registry, and auth source together.

pub mod acme;
pub mod auth;
pub mod config;
pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod key;
pub mod router;
pub mod services;
pub mod ssh;
pub mod terminal_ui;

pub use daemon::Daemon;
pub use error::TunnelError;
pub use key::load_or_generate_server_key;
pub use ssh::TunnelServer;
