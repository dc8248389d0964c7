//! Client secret generation and hashing.
//!
//! The generator produces raw secrets; the hasher stores and verifies them.
//! Hashes are bound to the `(user_id, client_id)` pair that owns the client,
//! so a hash lifted from one row cannot be transplanted onto another.

use std::sync::Arc;

use anyhow::{Context, Result};
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng as SaltRng;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

/// Minimum raw secret size: 32 bytes ≈ 256 bits of entropy.
const MIN_SECRET_BYTES: usize = 32;

/// Argon2id time cost.
const ARGON2_TIME_COST: u32 = 3;
/// Argon2id memory cost in KiB (64 MiB).
const ARGON2_MEMORY_COST: u32 = 64 * 1024;
/// Argon2id lanes.
const ARGON2_PARALLELISM: u32 = 1;
/// Argon2id output length in bytes.
const ARGON2_HASH_LEN: usize = 32;

/// Generate an opaque token value: 32 CSPRNG bytes, base64url without
/// padding. Used for access and refresh token strings.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Raw client secret generator.
///
/// Stateless; draws from the OS CSPRNG and XOR-mixes the leading bytes with
/// `SHA-256(user_id)`. The mix does not reduce entropy and does not make the
/// output derivable from the user id.
#[derive(Debug, Clone)]
pub struct SecretGenerator {
    byte_length: usize,
}

impl SecretGenerator {
    /// `byte_length` below 32 bytes is refused.
    pub fn new(byte_length: usize) -> Result<Self> {
        if byte_length < MIN_SECRET_BYTES {
            anyhow::bail!("byte_length must be at least {MIN_SECRET_BYTES} bytes");
        }

        Ok(Self { byte_length })
    }

    /// Generate a new raw secret, URL-safe and unpadded.
    pub fn generate(&self, user_id: &str) -> String {
        let mut bytes = vec![0u8; self.byte_length];
        OsRng.fill_bytes(&mut bytes);

        let mix = Sha256::digest(user_id.as_bytes());
        for (b, m) in bytes.iter_mut().zip(mix.iter()) {
            *b ^= m;
        }

        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Argon2id hasher for client secrets.
///
/// Hashes are self-describing PHC strings, safe to persist verbatim.
pub struct Argon2SecretHasher {
    argon2: Argon2<'static>,
}

impl Argon2SecretHasher {
    pub fn new() -> Result<Self> {
        let params = Params::new(
            ARGON2_MEMORY_COST,
            ARGON2_TIME_COST,
            ARGON2_PARALLELISM,
            Some(ARGON2_HASH_LEN),
        )
        .map_err(|e| anyhow::anyhow!("invalid Argon2 parameters: {e}"))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash a raw secret for storage, bound to `(user_id, client_id)`.
    pub fn hash(&self, secret: &str, user_id: &str, client_id: &str) -> Result<String> {
        if secret.is_empty() {
            anyhow::bail!("secret must not be empty");
        }

        let contextual = contextualize(secret, user_id, client_id);
        // SaltString::generate produces the recommended 16-byte salt.
        let salt = SaltString::generate(&mut SaltRng);

        let hash = self
            .argon2
            .hash_password(contextual.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("failed to hash secret: {e}"))?;

        Ok(hash.to_string())
    }

    /// Verify a raw secret against a stored hash under the same context.
    ///
    /// Mismatch and malformed hash both verify as `false`.
    pub fn verify(&self, secret: &str, hashed: &str, user_id: &str, client_id: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hashed) else {
            return false;
        };

        let contextual = contextualize(secret, user_id, client_id);
        self.argon2
            .verify_password(contextual.as_bytes(), &parsed)
            .is_ok()
    }
}

impl std::fmt::Debug for Argon2SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argon2SecretHasher").finish()
    }
}

/// Bind the `(user_id, client_id)` pair to the secret before hashing.
///
/// The appended value is a digest, so neither identity appears in the
/// hashed input verbatim and the secret's entropy is untouched.
fn contextualize(secret: &str, user_id: &str, client_id: &str) -> String {
    let context_hash = hex::encode(Sha256::digest(format!("{user_id}:{client_id}").as_bytes()));
    format!("{secret}:{context_hash}")
}

/// Async facade over generator and hasher.
///
/// The KDF is memory-hard and takes hundreds of milliseconds on cold CPUs;
/// calls run on the blocking pool behind a semaphore so a burst of token
/// requests cannot exhaust memory.
#[derive(Clone)]
pub struct SecretService {
    generator: Arc<SecretGenerator>,
    hasher: Arc<Argon2SecretHasher>,
    kdf_permits: Arc<Semaphore>,
}

impl SecretService {
    pub fn new(hasher_concurrency: usize) -> Result<Self> {
        Ok(Self {
            generator: Arc::new(SecretGenerator::new(MIN_SECRET_BYTES)?),
            hasher: Arc::new(Argon2SecretHasher::new()?),
            kdf_permits: Arc::new(Semaphore::new(hasher_concurrency.max(1))),
        })
    }

    /// Generate a raw client secret. Cheap; runs inline.
    pub fn generate_secret(&self, user_id: &str) -> String {
        self.generator.generate(user_id)
    }

    pub async fn hash(&self, secret: &str, user_id: &str, client_id: &str) -> Result<String> {
        let permit = self
            .kdf_permits
            .clone()
            .acquire_owned()
            .await
            .context("hasher pool closed")?;

        let hasher = self.hasher.clone();
        let (secret, user_id, client_id) =
            (secret.to_string(), user_id.to_string(), client_id.to_string());

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            hasher.hash(&secret, &user_id, &client_id)
        })
        .await
        .context("hasher task failed")?
    }

    pub async fn verify(
        &self,
        secret: &str,
        hashed: &str,
        user_id: &str,
        client_id: &str,
    ) -> Result<bool> {
        let permit = self
            .kdf_permits
            .clone()
            .acquire_owned()
            .await
            .context("hasher pool closed")?;

        let hasher = self.hasher.clone();
        let (secret, hashed, user_id, client_id) = (
            secret.to_string(),
            hashed.to_string(),
            user_id.to_string(),
            client_id.to_string(),
        );

        let verified = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            hasher.verify(&secret, &hashed, &user_id, &client_id)
        })
        .await
        .context("hasher task failed")?;

        Ok(verified)
    }
}

impl std::fmt::Debug for SecretService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretService").finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn generator_refuses_short_lengths() {
        assert!(SecretGenerator::new(16).is_err());
        assert!(SecretGenerator::new(31).is_err());
        assert!(SecretGenerator::new(32).is_ok());
        assert!(SecretGenerator::new(64).is_ok());
    }

    #[test]
    fn generated_secrets_are_unique_and_urlsafe() {
        let generator = SecretGenerator::new(32).unwrap();
        let a = generator.generate("user_123");
        let b = generator.generate("user_123");
        assert_ne!(a, b);

        let decoded = URL_SAFE_NO_PAD.decode(a.as_bytes()).unwrap();
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn opaque_tokens_are_unique() {
        assert_ne!(generate_token(), generate_token());
        // 32 bytes -> 43 base64url chars, no padding
        assert_eq!(generate_token().len(), 43);
    }

    #[test]
    fn hash_is_context_bound() {
        let hasher = Argon2SecretHasher::new().unwrap();
        let hash = hasher.hash("s3cret", "user_1", "client_1").unwrap();
        assert!(hash.starts_with("$argon2id$"));

        assert!(hasher.verify("s3cret", &hash, "user_1", "client_1"));
        // Wrong secret, wrong user, wrong client all fail.
        assert!(!hasher.verify("wrong", &hash, "user_1", "client_1"));
        assert!(!hasher.verify("s3cret", &hash, "user_2", "client_1"));
        assert!(!hasher.verify("s3cret", &hash, "user_1", "client_2"));
    }

    #[test]
    fn malformed_hash_verifies_false() {
        let hasher = Argon2SecretHasher::new().unwrap();
        assert!(!hasher.verify("s3cret", "not-a-phc-string", "u", "c"));
        assert!(!hasher.verify("s3cret", "", "u", "c"));
    }

    #[test]
    fn empty_secret_refused() {
        let hasher = Argon2SecretHasher::new().unwrap();
        assert!(hasher.hash("", "u", "c").is_err());
    }

    #[tokio::test]
    async fn service_roundtrip() {
        let service = SecretService::new(2).unwrap();
        let secret = service.generate_secret("user_123");
        assert!(!secret.is_empty());

        let hash = service.hash(&secret, "user_123", "client_1").await.unwrap();
        assert!(service.verify(&secret, &hash, "user_123", "client_1").await.unwrap());
        assert!(!service.verify(&secret, &hash, "other", "client_1").await.unwrap());
    }
}
