//! The front-door director: decides which upstream a public HTTP(S) request
//! should be dialed against.

use crate::http::rewrite::{Direction, RewriteRegistry};
use crate::services::Services;

/// Resolved upstream for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

/// Step 1: `url.host = requestHost:localPort`, `url.scheme =
/// servicesByPort[localPort]`. Step 2: build a `Direction` from the
/// resulting URL. Step 3: if the rewrite registry has a match, override
/// scheme and host/port with the rewrite's target. Never fails; an
/// unmatched request passes through unchanged.
pub fn direct(
    request_host: &str,
    local_port: u16,
    services: &Services,
    rewrites: &RewriteRegistry,
) -> Upstream {
    let scheme = services
        .service_for_port(local_port)
        .map(|s| s.as_str())
        .unwrap_or("http")
        .to_string();

    let host = request_host.to_lowercase();
    let mut upstream = Upstream {
        scheme: scheme.clone(),
        host: host.clone(),
        port: local_port,
    };

    let direction = Direction::new(scheme, host.clone(), local_port);
    if let Some(rewrite) = rewrites.find(&direction) {
        upstream.scheme = rewrite.to_scheme;
        upstream.host = host;
        upstream.port = rewrite.to_port;
    }

    upstream
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::rewrite::Rewrite;

    #[test]
    fn passes_through_when_no_rewrite_matches() {
        let services = Services::default_with_hostname("box".into());
        let rewrites = RewriteRegistry::new();
        let upstream = direct("f1.box", 80, &services, &rewrites);
        assert_eq!(upstream, Upstream { scheme: "http".into(), host: "f1.box".into(), port: 80 });
    }

    #[test]
    fn applies_matching_rewrite() {
        let services = Services::default_with_hostname("box".into());
        let rewrites = RewriteRegistry::new();
        rewrites
            .add(Rewrite {
                from: Direction::new("http", "f1.box", 80),
                to_scheme: "https".into(),
                to_port: 8443,
                owner: "f1.box".into(),
            })
            .unwrap();
        let upstream = direct("f1.box", 80, &services, &rewrites);
        assert_eq!(upstream.scheme, "https");
        assert_eq!(upstream.port, 8443);
    }
}
