//! Configured API keys

use anyhow::{Context, Result};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::utils::api_key::hash_api_key;

const SECRET_LEN: usize = 32;

/// Accepted API keys, held only as HMAC digests
#[derive(Debug)]
pub struct ApiKeySet {
    secret: Vec<u8>,
    digests: Vec<String>,
    enabled: bool,
}

impl ApiKeySet {
    /// Digest the configured keys under a fresh per-process secret
    pub fn new(keys: &[String], enabled: bool) -> Result<Self> {
        let mut secret = vec![0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut secret);
        let digests = keys
            .iter()
            .map(|k| hash_api_key(k, &secret))
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to digest API keys")?;

        if enabled {
            tracing::debug!(keys = digests.len(), "API key authentication enabled");
        } else {
            tracing::warn!("Authentication DISABLED");
        }

        Ok(Self {
            secret,
            digests,
            enabled,
        })
    }

    pub fn disabled() -> Self {
        Self {
            secret: Vec::new(),
            digests: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check a presented key against every configured digest.
    /// All digests are compared so timing does not reveal which one matched.
    pub fn verify(&self, presented: &str) -> bool {
        let Ok(digest) = hash_api_key(presented, &self.secret) else {
            return false;
        };
        self.digests
            .iter()
            .fold(false, |matched, d| {
                bool::from(d.as_bytes().ct_eq(digest.as_bytes())) | matched
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "arb-aaaaaaaaaaaaaaaaaaaaaaaa";
    const KEY_B: &str = "arb-bbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn test_verify() {
        let keys = ApiKeySet::new(&[KEY_A.to_string(), KEY_B.to_string()], true).unwrap();
        assert!(keys.is_enabled());
        assert!(keys.verify(KEY_A));
        assert!(keys.verify(KEY_B));
        assert!(!keys.verify("arb-cccccccccccccccccccccccc"));
        assert!(!keys.verify(""));
    }

    #[test]
    fn test_digests_do_not_store_plaintext() {
        let keys = ApiKeySet::new(&[KEY_A.to_string()], true).unwrap();
        assert!(keys.digests.iter().all(|d| d != KEY_A && d.len() == 64));
    }

    #[test]
    fn test_disabled_accepts_nothing() {
        let keys = ApiKeySet::disabled();
        assert!(!keys.is_enabled());
        assert!(!keys.verify(KEY_A));
    }
}
