//! Encryption-at-rest for the wallet private key
//!
//! AES-256-GCM with a PBKDF2-HMAC-SHA256 derived key. The stored form is base64
//! text of:
//!
//! ```text
//!  0..1   version 0x01
//!  1..17  salt    16 bytes (random, per encryption)
//! 17..29  nonce   12 bytes (random, per encryption)
//! 29..    ciphertext + 16-byte GCM auth tag
//! ```
//!
//! Version 0 is the legacy form: base64 of the key itself with no encryption.
//! It is re-encrypted as version 1 the first time it is loaded with a password.
//! Decrypted keys and derived AES keys live in zeroizing buffers.

use aes_gcm::{
    aead::{Aead, OsRng},
    Aes256Gcm, KeyInit, Nonce,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};
use zeroize::Zeroizing;

const VERSION: u8 = 0x01;
const PBKDF2_ITERATIONS: u32 = 600_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + SALT_LEN + NONCE_LEN;
const MIN_ENCRYPTED_LEN: usize = HEADER_LEN + TAG_LEN;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MIN_GENERATED_PASSWORD_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Invalid encrypted key format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported key format version {0}")]
    UnsupportedVersion(u8),

    #[error("Decryption failed (wrong password or corrupted data)")]
    Authentication,

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Weak password: {0}")]
    WeakPassword(String),

    #[error("Key file error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, SecretError>;

/// Derives a 256-bit key from `password` and `salt` using PBKDF2-HMAC-SHA256.
fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut *key);
    key
}

fn cipher_for(key: &[u8; 32]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key).map_err(|_| SecretError::InvalidFormat("key length".into()))
}

/// `0x`-prefixed 64 hex digits, or the same without the prefix
fn check_private_key(private_key: &str) -> Result<()> {
    let digits = private_key.strip_prefix("0x").unwrap_or(private_key);
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SecretError::InvalidKey(
            "expected 32 bytes of hex".to_string(),
        ));
    }
    Ok(())
}

fn check_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SecretError::WeakPassword(format!(
            "must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Encrypt `private_key` under `password`, returning base64 text
pub fn encrypt_private_key(private_key: &str, password: &str) -> Result<String> {
    use aes_gcm::aead::rand_core::RngCore;

    check_private_key(private_key)?;
    check_password(password)?;

    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt);
    let cipher = cipher_for(&key)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), private_key.as_bytes())
        .map_err(|_| SecretError::Authentication)?;

    let mut envelope = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    envelope.push(VERSION);
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(envelope))
}

/// Decrypt base64 text produced by [`encrypt_private_key`]
pub fn decrypt_private_key(encoded: &str, password: &str) -> Result<Zeroizing<String>> {
    let envelope = STANDARD
        .decode(encoded.trim())
        .map_err(|e| SecretError::InvalidFormat(e.to_string()))?;
    if envelope.len() < MIN_ENCRYPTED_LEN {
        return Err(SecretError::InvalidFormat(format!(
            "{} bytes, need at least {}",
            envelope.len(),
            MIN_ENCRYPTED_LEN
        )));
    }
    if envelope[0] != VERSION {
        return Err(SecretError::UnsupportedVersion(envelope[0]));
    }

    let salt = &envelope[1..1 + SALT_LEN];
    let nonce = Nonce::from_slice(&envelope[1 + SALT_LEN..HEADER_LEN]);
    let key = derive_key(password, salt);
    let cipher = cipher_for(&key)?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(nonce, &envelope[HEADER_LEN..])
            .map_err(|_| SecretError::Authentication)?,
    );

    let text = std::str::from_utf8(&plaintext)
        .map_err(|_| SecretError::InvalidKey("decrypted key is not UTF-8".to_string()))?;
    Ok(Zeroizing::new(text.to_string()))
}

pub fn verify_password(encoded: &str, password: &str) -> bool {
    decrypt_private_key(encoded, password).is_ok()
}

/// Random URL-safe password of at least 12 characters
pub fn generate_strong_password(length: usize) -> String {
    use aes_gcm::aead::rand_core::RngCore;

    let length = length.max(MIN_GENERATED_PASSWORD_LEN);
    let mut bytes = Zeroizing::new(vec![0u8; length * 3 / 4 + 1]);
    OsRng.fill_bytes(bytes.as_mut_slice());
    let mut password = URL_SAFE.encode(bytes.as_slice());
    password.truncate(length);
    password
}

/// Version 1 envelope, as opposed to legacy or garbage
pub fn is_encrypted_format(encoded: &str) -> bool {
    match STANDARD.decode(encoded.trim()) {
        Ok(decoded) => decoded.len() >= MIN_ENCRYPTED_LEN && decoded[0] == VERSION,
        Err(_) => false,
    }
}

/// Legacy version 0 content, if `encoded` is one
fn decode_legacy(encoded: &str) -> Option<Zeroizing<String>> {
    let decoded = Zeroizing::new(STANDARD.decode(encoded.trim()).ok()?);
    let key = Zeroizing::new(std::str::from_utf8(&decoded).ok()?.to_string());
    (key.starts_with("0x") || key.len() == 64).then_some(key)
}

/// Re-encrypt a legacy version 0 key under `password`
pub fn migrate_legacy(encoded: &str, password: &str) -> Result<String> {
    let key = decode_legacy(encoded)
        .ok_or_else(|| SecretError::InvalidFormat("not a legacy key".to_string()))?;
    encrypt_private_key(&key, password)
}

/// Decrypted key plus the re-encrypted text when the input was legacy
pub struct OpenedKey {
    pub private_key: Zeroizing<String>,
    pub migrated: Option<String>,
}

/// Decrypt any supported version, migrating version 0
pub fn open_key(encoded: &str, password: &str) -> Result<OpenedKey> {
    if is_encrypted_format(encoded) {
        return Ok(OpenedKey {
            private_key: decrypt_private_key(encoded, password)?,
            migrated: None,
        });
    }
    match decode_legacy(encoded) {
        Some(private_key) => {
            warn!("🔐 Legacy unencrypted key found, migrating to encrypted format");
            let migrated = encrypt_private_key(&private_key, password)?;
            Ok(OpenedKey {
                private_key,
                migrated: Some(migrated),
            })
        }
        None => Err(SecretError::InvalidFormat(
            "neither encrypted nor legacy key".to_string(),
        )),
    }
}

/// Read a key file, rewriting it in the current format when it was legacy
pub fn open_key_file(path: &Path, password: &str) -> Result<Zeroizing<String>> {
    let contents = Zeroizing::new(std::fs::read_to_string(path)?);
    let opened = open_key(&contents, password)?;
    if let Some(migrated) = opened.migrated {
        replace_file(path, &migrated)?;
        info!("🔐 Key file {} migrated to version {}", path.display(), VERSION);
    }
    Ok(opened.private_key)
}

pub fn write_key_file(path: &Path, private_key: &str, password: &str) -> Result<()> {
    let encoded = encrypt_private_key(private_key, password)?;
    replace_file(path, &encoded)
}

/// Swap `path` for `contents` in one rename; readers see the old file or the new one
fn replace_file(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(contents.as_bytes())?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| SecretError::Io(e.error))?;
    Ok(())
}
