//! The root object. Where the original source used package-level globals
//! for the router, the rewrite registry, and the services table, this
//! groups them into one explicitly-constructed value threaded through the
//! SSH server and the HTTP proxy (see design notes on global mutable
//! state).

use std::sync::Arc;

use crate::auth::AuthSource;
use crate::http::{Proxy, RewriteRegistry};
use crate::router::Router;
use crate::services::Services;

pub struct Daemon {
    pub router: Arc<Router>,
    pub services: Arc<Services>,
    pub rewrites: Arc<RewriteRegistry>,
    pub auth: Arc<dyn AuthSource>,
}

impl Daemon {
    pub fn new(
        router: Arc<Router>,
        services: Arc<Services>,
        rewrites: Arc<RewriteRegistry>,
        auth: Arc<dyn AuthSource>,
    ) -> Arc<Daemon> {
        Arc::new(Daemon { router, services, rewrites, auth })
    }

    pub fn proxy(&self) -> Proxy {
        Proxy::new(self.router.clone(), self.services.clone(), self.rewrites.clone())
    }
}
