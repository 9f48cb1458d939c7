//! Sealing at rest
//!
//! - [`KeyStore`]: owner-only master secret under the state directory
//! - [`ContentCipher`]: AES-256-GCM with a per-payload PBKDF2-derived key
//! - [`EncryptedPayload`]: versioned envelope, recognizable by prefix
//!
//! Envelope: `cgate-sealed:v1:` + base64(JSON payload). Nothing here ever
//! falls back to plaintext on failure.

use std::fmt;
use std::path::{Path, PathBuf};

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::CryptoError;

/// Prefix marking sealed content
pub const SEALED_PREFIX: &str = "cgate-sealed:v1:";

/// Algorithm identifier stored in every envelope
pub const ALGORITHM: &str = "AES-256-GCM/PBKDF2-HMAC-SHA256";

/// Default PBKDF2 iteration count
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

const ENVELOPE_VERSION: u8 = 1;
const MAX_KDF_ITERATIONS: u32 = 10_000_000;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Check whether content is a sealed envelope, without decrypting
#[inline]
#[must_use]
pub fn is_sealed(content: &str) -> bool {
    content.starts_with(SEALED_PREFIX)
}

/// 32-byte master secret
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Create from raw bytes
    #[inline]
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate from the OS random source
    ///
    /// # Errors
    /// [`CryptoError::Random`] if the OS source fails.
    pub fn generate() -> Result<Self, CryptoError> {
        use rand::TryRngCore;
        let mut bytes = [0u8; KEY_LEN];
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::Random(e.to_string()))?;
        Ok(Self(bytes))
    }

    fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let raw = hex::decode(text.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let bytes: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|v: Vec<u8>| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self(bytes))
    }

    fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn derive(&self, salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(&self.0, salt, iterations, &mut key);
        key
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Location of the master secret
#[derive(Debug, Clone)]
pub struct KeyStore {
    path: PathBuf,
}

impl KeyStore {
    /// Key store file name inside the keys directory
    pub const FILE_NAME: &'static str = "master.key";

    /// Key store under `<state_dir>/keys/master.key`
    #[must_use]
    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("keys").join(Self::FILE_NAME),
        }
    }

    /// Key file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the master secret, generating it on first use
    ///
    /// Existing files with loose permissions are tightened to owner-only.
    ///
    /// # Errors
    /// IO failure, malformed key material, or random source failure.
    pub fn load_or_create(&self) -> Result<MasterKey, CryptoError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                restrict_permissions(&self.path)?;
                MasterKey::from_hex(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = MasterKey::generate()?;
                self.write_new(&key)?;
                tracing::info!(path = %self.path.display(), "master key generated");
                Ok(key)
            }
            Err(e) => Err(CryptoError::key_store(&self.path, e)),
        }
    }

    fn write_new(&self, key: &MasterKey) -> Result<(), CryptoError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| CryptoError::key_store(dir, e))?;
            restrict_dir_permissions(dir)?;
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .map_err(|e| CryptoError::key_store(&self.path, e))?;
        std::io::Write::write_all(&mut file, key.to_hex().as_bytes())
            .map_err(|e| CryptoError::key_store(&self.path, e))?;
        restrict_permissions(&self.path)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), CryptoError> {
    use std::os::unix::fs::PermissionsExt;
    let meta = std::fs::metadata(path).map_err(|e| CryptoError::key_store(path, e))?;
    if meta.permissions().mode() & 0o777 != 0o600 {
        tracing::warn!(path = %path.display(), "tightening key file permissions");
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| CryptoError::key_store(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), CryptoError> {
    Ok(())
}

#[cfg(unix)]
fn restrict_dir_permissions(dir: &Path) -> Result<(), CryptoError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| CryptoError::key_store(dir, e))
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_dir: &Path) -> Result<(), CryptoError> {
    Ok(())
}

/// Sealed payload metadata and ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub version: u8,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    /// PBKDF2 rounds used for this payload
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Hex-encoded KDF salt
    pub salt: String,
    /// Hex-encoded GCM nonce
    pub nonce: String,
    /// Base64 ciphertext with appended tag
    pub ciphertext: String,
}

fn default_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

impl EncryptedPayload {
    /// Encode as an envelope string
    ///
    /// # Errors
    /// [`CryptoError::Envelope`] if serialization fails.
    pub fn to_envelope(&self) -> Result<String, CryptoError> {
        let json = serde_json::to_vec(self).map_err(|e| CryptoError::Envelope(e.to_string()))?;
        Ok(format!("{SEALED_PREFIX}{}", STANDARD.encode(json)))
    }

    /// Decode an envelope string
    ///
    /// # Errors
    /// [`CryptoError::Envelope`] if the prefix, encoding, or version is wrong.
    pub fn from_envelope(sealed: &str) -> Result<Self, CryptoError> {
        let body = sealed
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| CryptoError::Envelope("missing sealed prefix".into()))?;
        let json = STANDARD
            .decode(body.trim())
            .map_err(|e| CryptoError::Envelope(e.to_string()))?;
        let payload: Self =
            serde_json::from_slice(&json).map_err(|e| CryptoError::Envelope(e.to_string()))?;
        if payload.version != ENVELOPE_VERSION || payload.algorithm != ALGORITHM {
            return Err(CryptoError::Envelope(format!(
                "unsupported envelope v{} ({})",
                payload.version, payload.algorithm
            )));
        }
        if payload.iterations == 0 || payload.iterations > MAX_KDF_ITERATIONS {
            return Err(CryptoError::Envelope(format!("kdf iterations {}", payload.iterations)));
        }
        Ok(payload)
    }
}

/// Authenticated cipher for content at rest
#[derive(Debug, Clone)]
pub struct ContentCipher {
    master: MasterKey,
    iterations: u32,
}

impl ContentCipher {
    /// Create cipher with the default iteration count
    #[must_use]
    pub fn new(master: MasterKey) -> Self {
        Self {
            master,
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }

    /// With KDF iteration count
    #[inline]
    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.clamp(1, MAX_KDF_ITERATIONS);
        self
    }

    /// Open the project key store and build a cipher
    ///
    /// # Errors
    /// Key store failure.
    pub fn from_store(store: &KeyStore, iterations: u32) -> Result<Self, CryptoError> {
        Ok(Self::new(store.load_or_create()?).with_iterations(iterations))
    }

    /// Seal plaintext into an envelope string
    ///
    /// # Errors
    /// [`CryptoError::Encrypt`]; no plaintext is returned on failure.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let key = self.master.derive(&salt, self.iterations);
        let aead = Aes256Gcm::new_from_slice(&key).map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        let ciphertext = aead
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        EncryptedPayload {
            version: ENVELOPE_VERSION,
            algorithm: ALGORITHM.to_string(),
            created_at: Utc::now(),
            iterations: self.iterations,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        }
        .to_envelope()
    }

    /// Open an envelope string
    ///
    /// The key is derived with the iteration count recorded in the envelope,
    /// so entries sealed under an older setting stay readable.
    ///
    /// # Errors
    /// Malformed envelope, or [`CryptoError::Decrypt`] on wrong key or tampering.
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CryptoError> {
        let payload = EncryptedPayload::from_envelope(sealed)?;
        let salt = hex::decode(&payload.salt).map_err(|e| CryptoError::Envelope(e.to_string()))?;
        let nonce = hex::decode(&payload.nonce).map_err(|e| CryptoError::Envelope(e.to_string()))?;
        if nonce.len() != NONCE_LEN {
            return Err(CryptoError::Envelope(format!("nonce length {}", nonce.len())));
        }
        let ciphertext = STANDARD
            .decode(&payload.ciphertext)
            .map_err(|e| CryptoError::Envelope(e.to_string()))?;

        let key = self.master.derive(&salt, payload.iterations);
        let aead = Aes256Gcm::new_from_slice(&key).map_err(|e| CryptoError::Decrypt(e.to_string()))?;
        aead.decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }

    /// Open an envelope that must hold UTF-8 text
    ///
    /// # Errors
    /// As [`Self::open`], or [`CryptoError::Decrypt`] if the plaintext is not UTF-8.
    pub fn open_text(&self, sealed: &str) -> Result<String, CryptoError> {
        String::from_utf8(self.open(sealed)?).map_err(|e| CryptoError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> ContentCipher {
        ContentCipher::new(MasterKey::from_bytes([7u8; 32])).with_iterations(1_000)
    }

    #[test]
    fn seal_open_roundtrip() {
        let cipher = cipher();
        let sealed = cipher.seal(b"password = hunter2").unwrap();
        assert!(is_sealed(&sealed));
        assert!(!sealed.contains("hunter2"));
        assert_eq!(cipher.open(&sealed).unwrap(), b"password = hunter2");
    }

    #[test]
    fn seal_is_randomized() {
        let cipher = cipher();
        assert_ne!(cipher.seal(b"same").unwrap(), cipher.seal(b"same").unwrap());
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = cipher().seal(b"secret").unwrap();
        let other = ContentCipher::new(MasterKey::from_bytes([8u8; 32])).with_iterations(1_000);
        assert!(matches!(other.open(&sealed), Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn iteration_change_keeps_old_entries_readable() {
        let sealed = cipher().seal(b"token = abc").unwrap();
        assert_eq!(EncryptedPayload::from_envelope(&sealed).unwrap().iterations, 1_000);

        let reconfigured = ContentCipher::new(MasterKey::from_bytes([7u8; 32])).with_iterations(2_000);
        assert_eq!(reconfigured.open(&sealed).unwrap(), b"token = abc");
        let resealed = reconfigured.seal(b"token = abc").unwrap();
        assert_eq!(cipher().open(&resealed).unwrap(), b"token = abc");
    }

    #[test]
    fn absurd_iteration_count_is_rejected() {
        let mut payload = EncryptedPayload::from_envelope(&cipher().seal(b"x").unwrap()).unwrap();
        payload.iterations = u32::MAX;
        let envelope = payload.to_envelope().unwrap();
        assert!(matches!(cipher().open(&envelope), Err(CryptoError::Envelope(_))));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let cipher = cipher();
        let sealed = cipher.seal(b"secret").unwrap();
        let mut payload = EncryptedPayload::from_envelope(&sealed).unwrap();
        let mut raw = STANDARD.decode(&payload.ciphertext).unwrap();
        raw[0] ^= 0x01;
        payload.ciphertext = STANDARD.encode(raw);
        let tampered = payload.to_envelope().unwrap();
        assert!(matches!(cipher.open(&tampered), Err(CryptoError::Decrypt(_))));
    }

    #[test]
    fn plaintext_is_not_sealed() {
        assert!(!is_sealed("fn main() {}"));
        assert!(matches!(cipher().open("fn main() {}"), Err(CryptoError::Envelope(_))));
    }

    #[test]
    fn envelope_records_algorithm() {
        let sealed = cipher().seal(b"x").unwrap();
        let payload = EncryptedPayload::from_envelope(&sealed).unwrap();
        assert_eq!(payload.algorithm, ALGORITHM);
        assert_eq!(payload.version, 1);
    }

    #[test]
    fn key_store_generates_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::in_state_dir(dir.path());
        let first = store.load_or_create().unwrap();
        let second = store.load_or_create().unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read_to_string(store.path()).unwrap().len(), 64);
    }

    #[cfg(unix)]
    #[test]
    fn key_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::in_state_dir(dir.path());
        store.load_or_create().unwrap();
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        store.load_or_create().unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn key_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::in_state_dir(dir.path());
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "not hex").unwrap();
        assert!(matches!(store.load_or_create(), Err(CryptoError::InvalidKey(_))));
    }
}
