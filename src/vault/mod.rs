//! Credential vault: symmetric AEAD encrypt/decrypt with key rotation.
//!
//! The donor crate (`kiro-ai-gateway`) has no credential-encryption
//! primitive of its own; `aes-gcm` is adopted from
//! `examples/other_examples/manifests/cicdnew-Proxy-desktop-browser/Cargo.toml`,
//! a real registry crate already vetted by the retrieval pack for this
//! exact problem (encrypting proxy credentials at rest). The module shape
//! (a process-wide singleton behind `OnceLock`, `thiserror` error enum,
//! `tracing::warn!` on degraded paths) follows the donor's own conventions
//! for global state, e.g. `proxy/config.rs`'s `OnceLock<RwLock<T>>` statics.

use std::sync::OnceLock;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("credential decryption failed")]
    DecryptionFailed,
    #[error("invalid vault key: {0}")]
    InvalidKey(String),
}

/// Symmetric AEAD vault. `active` is used for all encryption; decryption
/// tries `active` then `previous` (for key rotation).
pub struct Vault {
    active: Aes256Gcm,
    previous: Option<Aes256Gcm>,
    ephemeral: bool,
}

fn derive_key(raw: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.finalize().into()
}

impl Vault {
    pub fn new(active_key: Option<&str>, previous_key: Option<&str>) -> Self {
        let ephemeral = active_key.is_none();
        if ephemeral {
            tracing::warn!(
                kind = "vault_ephemeral_key",
                "no credential encryption key configured; generating an ephemeral key. \
                 Data encrypted this run will be unreadable after restart."
            );
        }
        let active_bytes = match active_key {
            Some(k) => derive_key(k),
            None => {
                let mut buf = [0u8; 32];
                use rand::RngCore;
                rand::thread_rng().fill_bytes(&mut buf);
                buf
            }
        };
        let active = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&active_bytes));
        let previous = previous_key.map(|k| {
            let bytes = derive_key(k);
            Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes))
        });
        Self { active, previous, ephemeral }
    }

    /// Reads `PROXYWHIRL_CACHE_ENCRYPTION_KEY` / `PROXYWHIRL_CACHE_KEY_PREVIOUS`.
    pub fn from_env() -> Self {
        let active = std::env::var("PROXYWHIRL_CACHE_ENCRYPTION_KEY").ok();
        let previous = std::env::var("PROXYWHIRL_CACHE_KEY_PREVIOUS").ok();
        Self::new(active.as_deref(), previous.as_deref())
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Encrypts `plaintext`, always with the active key. Returns
    /// `nonce || ciphertext`, base64-encoded so it is safe to embed in JSON
    /// or text columns.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .active
            .encrypt(&nonce, plaintext.as_bytes())
            .expect("AEAD encryption with a freshly generated nonce cannot fail");
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        base64::engine::general_purpose::STANDARD.encode(out)
    }

    /// Decrypts `opaque`, trying the active key then the previous key.
    pub fn decrypt(&self, opaque: &str) -> Result<String, VaultError> {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(opaque)
            .map_err(|_| VaultError::DecryptionFailed)?;
        if raw.len() < NONCE_LEN {
            return Err(VaultError::DecryptionFailed);
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        if let Ok(pt) = self.active.decrypt(nonce, ciphertext) {
            return String::from_utf8(pt).map_err(|_| VaultError::DecryptionFailed);
        }
        if let Some(prev) = &self.previous {
            if let Ok(pt) = prev.decrypt(nonce, ciphertext) {
                tracing::warn!(kind = "vault_previous_key_decrypt", "decrypted using previous key; rotate and re-encrypt");
                return String::from_utf8(pt).map_err(|_| VaultError::DecryptionFailed);
            }
        }
        Err(VaultError::DecryptionFailed)
    }
}

static GLOBAL_VAULT: OnceLock<Vault> = OnceLock::new();

/// Process-wide vault singleton, per spec's "global state" design note.
pub fn global_vault() -> &'static Vault {
    GLOBAL_VAULT.get_or_init(Vault::from_env)
}
