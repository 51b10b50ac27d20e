//! Named alias endpoint: a user-chosen hostname forwarding to a session by
//! its owner's identity.

use std::time::SystemTime;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A durable, user-defined hostname. Dials against it are re-dispatched to
/// the router under the owner's fingerprint, so the route never stores a
/// back-reference to the router itself (the cyclic-ownership break noted in
/// the design notes: the router owns the alias, the alias borrows the
/// router only for the duration of a `dial` call).
pub struct NamedRoute {
    pub name: String,
    pub owner: String,
    pub created: SystemTime,
    last_seen: Mutex<SystemTime>,
}

impl NamedRoute {
    pub fn new(name: String, owner: String) -> Self {
        let now = SystemTime::now();
        Self {
            name: name.to_lowercase(),
            owner,
            created: now,
            last_seen: Mutex::new(now),
        }
    }

    pub fn last_seen(&self) -> SystemTime {
        *self.last_seen.lock()
    }

    pub fn touch(&self) {
        *self.last_seen.lock() = SystemTime::now();
    }

    pub(crate) fn to_persisted(&self) -> PersistedNamedRoute {
        PersistedNamedRoute {
            name: self.name.clone(),
            owner: self.owner.clone(),
            created: self.created,
            last_seen: self.last_seen(),
        }
    }
}

impl std::fmt::Debug for NamedRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedRoute")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .finish()
    }
}

/// On-disk shape of a `NamedRoute`. `SystemTime` is serialized as Unix
/// seconds since the type itself carries no serde impl.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedNamedRoute {
    pub name: String,
    pub owner: String,
    #[serde(with = "unix_seconds")]
    pub created: SystemTime,
    #[serde(with = "unix_seconds")]
    pub last_seen: SystemTime,
}

impl PersistedNamedRoute {
    pub fn into_named_route(self) -> NamedRoute {
        NamedRoute {
            name: self.name,
            owner: self.owner,
            created: self.created,
            last_seen: Mutex::new(self.last_seen),
        }
    }
}

mod unix_seconds {
    use super::SystemTime;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        s.serialize_u64(secs)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lowercases_name() {
        let route = NamedRoute::new("Alias.Example.COM".into(), "owner.example.com".into());
        assert_eq!(route.name, "alias.example.com");
    }

    #[test]
    fn persisted_round_trips() {
        let route = NamedRoute::new("alias.example.com".into(), "owner.example.com".into());
        let persisted = route.to_persisted();
        let json = serde_json::to_string(&persisted).unwrap();
        let decoded: PersistedNamedRoute = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.name, "alias.example.com");
        assert_eq!(decoded.owner, "owner.example.com");
    }
}
