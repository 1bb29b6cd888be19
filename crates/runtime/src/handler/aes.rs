//! AES-256-GCM file encryption handler.
//!
//! Wire format: the 16-byte magic prefix, a 12-byte nonce, then the
//! GCM ciphertext with its 16-byte tag appended. Key references
//! resolve from the environment (`env:NAME`), a file (`file:path`), or
//! are used literally; in every case the material is expanded to the
//! 32-byte AES key through SHA-256.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use ensura_core::ResourceRef;

use super::{require_arg, require_subject, Handler, HandlerArgs, HandlerError, HandlerResult};

/// Identifies encrypted files.
pub const MAGIC: &[u8; 16] = b"ENSURA_AES256_V1";

const NONCE_LEN: usize = 12;

pub struct AesHandler;

#[async_trait]
impl Handler for AesHandler {
    fn name(&self) -> &'static str {
        "AES:256"
    }

    async fn check(
        &self,
        _cancel: &CancellationToken,
        subject: Option<&ResourceRef>,
        condition: &str,
        _args: &HandlerArgs,
    ) -> HandlerResult {
        let subject = match require_subject(subject) {
            Ok(subject) => subject,
            Err(err) => return err.into(),
        };
        if condition != "encrypted" {
            return HandlerError::UnknownCondition {
                condition: condition.to_owned(),
            }
            .into();
        }

        let data = match tokio::fs::read(&subject.path).await {
            Ok(data) => data,
            Err(err) => return HandlerError::Io(err).into(),
        };
        if data.starts_with(MAGIC) {
            HandlerResult::satisfied(format!("{} is encrypted", subject.path))
        } else {
            HandlerResult::violated(format!("{} is not encrypted", subject.path))
        }
    }

    async fn enforce(
        &self,
        _cancel: &CancellationToken,
        subject: Option<&ResourceRef>,
        condition: &str,
        args: &HandlerArgs,
    ) -> HandlerResult {
        let subject = match require_subject(subject) {
            Ok(subject) => subject,
            Err(err) => return err.into(),
        };
        if condition != "encrypted" {
            return HandlerError::Unenforceable {
                condition: condition.to_owned(),
            }
            .into();
        }

        let key = match require_arg(args, "key").and_then(resolve_key) {
            Ok(key) => key,
            Err(err) => return err.into(),
        };

        let data = match tokio::fs::read(&subject.path).await {
            Ok(data) => data,
            Err(err) => return HandlerError::Io(err).into(),
        };
        if data.starts_with(MAGIC) {
            return HandlerResult::satisfied(format!("{} is already encrypted", subject.path));
        }

        let sealed = match encrypt(&data, &key) {
            Ok(sealed) => sealed,
            Err(err) => return err.into(),
        };
        let mut output = MAGIC.to_vec();
        output.extend_from_slice(&sealed);

        match tokio::fs::write(&subject.path, output).await {
            Ok(()) => HandlerResult::satisfied(format!("encrypted {}", subject.path)),
            Err(err) => HandlerError::Io(err).into(),
        }
    }
}

/// Resolve a key reference to 32 bytes of AES key material.
pub fn resolve_key(key_ref: &str) -> Result<[u8; 32], HandlerError> {
    if let Some(var) = key_ref.strip_prefix("env:") {
        let value = std::env::var(var).map_err(|_| {
            HandlerError::Crypto(format!("environment variable {} is not set", var))
        })?;
        return Ok(digest_key(value.as_bytes()));
    }

    if let Some(path) = key_ref.strip_prefix("file:") {
        let data = std::fs::read(path)
            .map_err(|err| HandlerError::Crypto(format!("failed to read key file: {}", err)))?;
        return Ok(digest_key(&data));
    }

    Ok(digest_key(key_ref.as_bytes()))
}

fn digest_key(material: &[u8]) -> [u8; 32] {
    Sha256::digest(material).into()
}

/// Seal plaintext as `nonce || ciphertext || tag`.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, HandlerError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|err| HandlerError::Crypto(format!("encryption failed: {}", err)))?;

    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open `nonce || ciphertext || tag` produced by [`encrypt`]. The
/// magic prefix must already be stripped.
pub fn decrypt(sealed: &[u8], key: &[u8; 32]) -> Result<Vec<u8>, HandlerError> {
    if sealed.len() < NONCE_LEN {
        return Err(HandlerError::Crypto("ciphertext too short".to_owned()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|err| HandlerError::Crypto(format!("decryption failed: {}", err)))
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
