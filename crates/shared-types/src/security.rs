//! # Worker Authentication Tokens
//!
//! A worker proves it was started by this runtime by presenting
//! `HMAC-SHA256(secret, "worker:<n>")`, hex encoded. The supervisor hands the
//! token to the worker process (argv or environment); the dispatch server
//! verifies it in constant time before the slot is touched.

use crate::entities::SlotNumber;
use crate::errors::TokenError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of the shared worker secret in bytes.
pub const WORKER_SECRET_LEN: usize = 32;

/// Issues and verifies per-slot worker tokens.
#[derive(Clone)]
pub struct WorkerTokenIssuer {
    secret: [u8; WORKER_SECRET_LEN],
}

impl WorkerTokenIssuer {
    pub fn new(secret: [u8; WORKER_SECRET_LEN]) -> Self {
        Self { secret }
    }

    /// Parses a 64-character hex secret.
    pub fn from_hex(secret_hex: &str) -> Result<Self, TokenError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| TokenError::InvalidSecret(e.to_string()))?;
        let secret: [u8; WORKER_SECRET_LEN] = bytes.try_into().map_err(|v: Vec<u8>| {
            TokenError::InvalidSecret(format!(
                "expected {WORKER_SECRET_LEN} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self::new(secret))
    }

    /// True if the secret is all zeros (the development default).
    #[must_use]
    pub fn is_insecure(&self) -> bool {
        self.secret.iter().all(|b| *b == 0)
    }

    fn mac_for(&self, worker_number: SlotNumber) -> Result<HmacSha256, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| TokenError::InvalidSecret(e.to_string()))?;
        mac.update(format!("worker:{worker_number}").as_bytes());
        Ok(mac)
    }

    /// Token for `worker_number`.
    pub fn issue(&self, worker_number: SlotNumber) -> Result<String, TokenError> {
        let mac = self.mac_for(worker_number)?;
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a presented token.
    #[must_use]
    pub fn verify(&self, worker_number: SlotNumber, token: &str) -> bool {
        let Ok(presented) = hex::decode(token) else {
            return false;
        };
        match self.mac_for(worker_number) {
            Ok(mac) => mac.verify_slice(&presented).is_ok(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for WorkerTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerTokenIssuer")
            .field("secret", &"<redacted>")
            .finish()
    }
}
