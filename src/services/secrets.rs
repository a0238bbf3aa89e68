//! Secret checks: password hashes, TOTP codes and the emergency code.
//!
//! Argon2 work runs on the blocking pool and is bounded by a semaphore sized
//! from `security.hash_workers`, so a burst of logins cannot starve the
//! request-handling threads.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::{sync::Semaphore, task};
use totp_rs::{Algorithm as TotpAlgorithm, Secret, TOTP};
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::db::Account;

const NONCE_LEN: usize = 12;
const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECONDS: u64 = 30;
const TOTP_SKEW_STEPS: u8 = 1;

/// Hash a password using Argon2id with the configured parameters.
pub fn hash_password(password: &str, config: Option<&SecurityConfig>) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    let argon2 = if let Some(cfg) = config {
        let params = Params::new(
            cfg.argon2_memory_cost_kib,
            cfg.argon2_time_cost,
            cfg.argon2_parallelism,
            None,
        )
        .map_err(|e| anyhow!("Invalid Argon2 params: {e}"))?;
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    } else {
        Argon2::default()
    };

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {e}"))?
        .to_string();

    Ok(hash)
}

/// Constant-time comparison; the running time depends only on the lengths.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// SHA-256 hex digest used for reset tokens and login tickets.
#[must_use]
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// 32 random bytes, hex encoded.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

/// Authenticated encryption for TOTP secrets at rest.
///
/// Ciphertexts are `nonce (12 bytes) || ciphertext` with the owning account id
/// as associated data, so a secret copied onto another account fails to open.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(<redacted>)")
    }
}

impl SecretCipher {
    #[must_use]
    pub const fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        if config.secret_key.is_empty() {
            warn!(
                "security.secret_key is not set; second-factor secrets will not survive a restart"
            );
            return Ok(Self::new(rand::rng().random()));
        }

        let bytes = hex::decode(&config.secret_key).context("security.secret_key is not hex")?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow!("security.secret_key must decode to 32 bytes"))?;
        Ok(Self::new(key))
    }

    pub fn encrypt(&self, plaintext: &[u8], account_id: Uuid) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce_bytes: [u8; NONCE_LEN] = rand::rng().random();

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: account_id.as_bytes(),
                },
            )
            .map_err(|e| anyhow!("Encryption failure: {e}"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, data: &[u8], account_id: Uuid) -> Result<Vec<u8>> {
        if data.len() <= NONCE_LEN {
            return Err(anyhow!("Invalid ciphertext length"));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));

        cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: account_id.as_bytes(),
                },
            )
            .map_err(|e| anyhow!("Decryption failure: {e}"))
    }
}

/// A freshly generated second factor, shown to the user exactly once.
#[derive(Debug, Clone)]
pub struct TotpEnrollment {
    pub encrypted_secret: Vec<u8>,
    pub secret_base32: String,
    pub otpauth_url: String,
}

pub struct SecretVerifier {
    security: SecurityConfig,
    hashing: Arc<Semaphore>,
    cipher: SecretCipher,
}

impl SecretVerifier {
    pub fn new(security: &SecurityConfig) -> Result<Self> {
        Ok(Self::with_cipher(security, SecretCipher::from_config(security)?))
    }

    #[must_use]
    pub fn with_cipher(security: &SecurityConfig, cipher: SecretCipher) -> Self {
        Self {
            hashing: Arc::new(Semaphore::new(security.hash_workers.max(1))),
            security: security.clone(),
            cipher,
        }
    }

    /// Checks a plaintext password against the stored Argon2 hash.
    ///
    /// A malformed stored hash counts as a mismatch. Only a failure of the
    /// hashing worker itself is returned as an error.
    pub async fn verify_password(&self, account: &Account, plaintext: &str) -> Result<bool> {
        let _permit = self
            .hashing
            .acquire()
            .await
            .context("Password hashing pool closed")?;

        let password_hash = account.password_hash.clone();
        let password = plaintext.to_string();
        let account_id = account.id;

        task::spawn_blocking(move || match PasswordHash::new(&password_hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                error!(%account_id, "Stored password hash is malformed: {e}");
                false
            }
        })
        .await
        .context("Password verification task panicked")
    }

    pub async fn hash_password(&self, plaintext: &str) -> Result<String> {
        let _permit = self
            .hashing
            .acquire()
            .await
            .context("Password hashing pool closed")?;

        let password = plaintext.to_string();
        let security = self.security.clone();
        task::spawn_blocking(move || hash_password(&password, Some(&security)))
            .await
            .context("Password hashing task panicked")?
    }

    /// Accepts the code for the current 30 second step or one step either side.
    ///
    /// Returns false when second factor is enabled but no readable secret is
    /// stored.
    #[must_use]
    pub fn verify_totp(&self, account: &Account, code: &str, at: DateTime<Utc>) -> bool {
        let Some(encrypted) = account.totp_secret_enc.as_deref() else {
            warn!(account_id = %account.id, "Second factor enabled without a stored secret");
            return false;
        };

        let secret = match self.cipher.decrypt(encrypted, account.id) {
            Ok(secret) => secret,
            Err(e) => {
                error!(account_id = %account.id, "Failed to open second-factor secret: {e}");
                return false;
            }
        };

        let Ok(totp) = self.build_totp(secret, &account.login_name) else {
            return false;
        };

        let code = code.trim();
        if code.len() != TOTP_DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }

        let Ok(unix_seconds) = u64::try_from(at.timestamp()) else {
            return false;
        };
        totp.check(code, unix_seconds)
    }

    /// Only reachable when emergency access is enabled; an empty configured
    /// code never matches.
    #[must_use]
    pub fn verify_emergency_code(configured: &str, supplied: &str) -> bool {
        if configured.is_empty() {
            return false;
        }
        constant_time_eq(configured.as_bytes(), supplied.as_bytes())
    }

    pub fn enroll_totp(&self, account: &Account) -> Result<TotpEnrollment> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("Secret gen error: {e}"))?;

        let encrypted_secret = self.cipher.encrypt(&secret_bytes, account.id)?;
        let totp = self.build_totp(secret_bytes, &account.login_name)?;

        Ok(TotpEnrollment {
            encrypted_secret,
            secret_base32: totp.get_secret_base32(),
            otpauth_url: totp.get_url(),
        })
    }

    fn build_totp(&self, secret: Vec<u8>, account_name: &str) -> Result<TOTP> {
        TOTP::new(
            TotpAlgorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW_STEPS,
            TOTP_STEP_SECONDS,
            secret,
            Some(self.security.totp_issuer.clone()),
            account_name.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}
