//! Multi-tenant SSH reverse-tunnel server entry point.
//!
//! Loads configuration and the durable alias set, wires the daemon's
//! components together, and runs the front-door dispatch loop alongside
//! the SSH acceptor.

use std::sync::Arc;

use log::info;
use russh::server::Config as SshConfig;
use russh::MethodSet;

use tunnelmux::auth::AnyoneSource;
use tunnelmux::daemon::Daemon;
use tunnelmux::dispatch::{self, PlaintextTerminator};
use tunnelmux::http::RewriteRegistry;
use tunnelmux::key::load_or_generate_server_key;
use tunnelmux::router::Router;
use tunnelmux::services::Services;
use tunnelmux::ssh::TunnelServer;
use tunnelmux::config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    env_logger::init();

    config::init();
    let cfg = config::get();

    let host_key = load_or_generate_server_key(&cfg.host_key_path())?;
    let router = Router::load(cfg.aliases_dir()).await?;
    let services = Arc::new(Services::default_with_hostname(cfg.hostname.clone()));
    let rewrites = Arc::new(RewriteRegistry::new());
    let auth = Arc::new(AnyoneSource);

    let daemon = Daemon::new(router, services.clone(), rewrites, auth);
    let proxy = Arc::new(daemon.proxy());

    let ssh_config = Arc::new(SshConfig {
        methods: MethodSet::PUBLICKEY,
        server_id: russh::SshId::Standard("SSH-2.0-tunnelmux".to_string()),
        keys: vec![host_key],
        auth_rejection_time: std::time::Duration::from_secs(1),
        auth_rejection_time_initial: Some(std::time::Duration::from_secs(0)),
        ..Default::default()
    });

    let ssh_server = Arc::new(TunnelServer::new(daemon.clone(), ssh_config));
    let tls = Arc::new(PlaintextTerminator);

    info!("tunnelmux: serving identities under *.{}", services.hostname());
    dispatch::serve(services, proxy, ssh_server, tls).await;

    Ok(())
}
