//! Server host key management.

use std::fs;
use std::path::Path;

use log::info;
use russh_keys::{Algorithm, HashAlg};

/// Load the server's host key from `key_path`, or generate a new Ed25519
/// key and save it there.
pub fn load_or_generate_server_key(key_path: &Path) -> anyhow::Result<russh_keys::PrivateKey> {
    if key_path.exists() {
        info!("key: loading server key from {}", key_path.display());
        let key_data = fs::read_to_string(key_path)?;
        let key = russh_keys::PrivateKey::from_openssh(&key_data)?;
        info!("key: server fingerprint {}", key.public_key().fingerprint(HashAlg::Sha256));
        Ok(key)
    } else {
        info!("key: generating new Ed25519 server key");
        let key = russh_keys::PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)?;

        if let Some(parent) = key_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let key_data = key.to_openssh(russh_keys::ssh_key::LineEnding::LF)?;
        fs::write(key_path, key_data.as_bytes())?;
        info!("key: server key saved to {}", key_path.display());
        info!("key: server fingerprint {}", key.public_key().fingerprint(HashAlg::Sha256));

        Ok(key)
    }
}
