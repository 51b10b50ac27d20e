//! C1 — static service/port table.
//!
//! Maps a service name ("http", "https", "ssh") to the set of ports it
//! listens on, and the inverse (port -> service name) for the director and
//! the console's access/forwards helpers.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Http,
    Https,
    Ssh,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Http => "http",
            Service::Https => "https",
            Service::Ssh => "ssh",
        }
    }

    /// Default port for this service, used when rendering access URLs.
    pub fn default_port(&self) -> u16 {
        match self {
            Service::Http => 80,
            Service::Https => 443,
            Service::Ssh => 22,
        }
    }
}

/// The service/port table. Overridable at construction; `default()` matches
/// the spec's default port table.
#[derive(Debug, Clone)]
pub struct Services {
    by_service: HashMap<Service, Vec<u16>>,
    by_port: HashMap<u16, Service>,
    hostname: String,
}

impl Services {
    pub fn new(hostname: String, by_service: HashMap<Service, Vec<u16>>) -> Self {
        let mut by_port = HashMap::new();
        for (service, ports) in &by_service {
            for &port in ports {
                by_port.insert(port, *service);
            }
        }
        Self {
            by_service,
            by_port,
            hostname: hostname.to_lowercase(),
        }
    }

    pub fn default_with_hostname(hostname: String) -> Self {
        let mut by_service = HashMap::new();
        by_service.insert(Service::Http, vec![80, 81, 3000, 8000, 8080]);
        by_service.insert(Service::Https, vec![443, 3443, 4443, 8443]);
        by_service.insert(Service::Ssh, vec![22, 2222]);
        Self::new(hostname, by_service)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn ports(&self, service: Service) -> &[u16] {
        self.by_service.get(&service).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn service_for_port(&self, port: u16) -> Option<Service> {
        self.by_port.get(&port).copied()
    }

    pub fn all_ports(&self) -> impl Iterator<Item = (Service, u16)> + '_ {
        self.by_service
            .iter()
            .flat_map(|(svc, ports)| ports.iter().map(move |p| (*svc, *p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_spec() {
        let services = Services::default_with_hostname("box.example.com".into());
        assert_eq!(services.ports(Service::Http), &[80, 81, 3000, 8000, 8080]);
        assert_eq!(services.ports(Service::Https), &[443, 3443, 4443, 8443]);
        assert_eq!(services.ports(Service::Ssh), &[22, 2222]);
    }

    #[test]
    fn inverse_lookup_round_trips() {
        let services = Services::default_with_hostname("host".into());
        assert_eq!(services.service_for_port(443), Some(Service::Https));
        assert_eq!(services.service_for_port(59999), None);
    }

    #[test]
    fn hostname_is_lowercased() {
        let services = Services::default_with_hostname("Box.Example.COM".into());
        assert_eq!(services.hostname(), "box.example.com");
    }
}
