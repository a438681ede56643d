//! Heartbeat payload encryption.
//!
//! The rendezvous service treats heartbeat encryption as an opaque
//! `encrypt` / `decrypt` pair, expressed here as the [`PayloadCipher`] trait.
//!
//! [`HeartbeatCipher`] is the implementation the daemon ships with:
//! a BLAKE3 keystream (XOF keyed with the encryption key, seeded by a fresh
//! per-message nonce) and a BLAKE3 keyed MAC over nonce and ciphertext.
//!
//! ```text
//! [16-byte nonce][ciphertext][32-byte tag]
//! ```
//!
//! Both keys derive from one shared passphrase and are wiped on drop.

use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 32;

const ENCRYPTION_CONTEXT: &str = "junction 2024 heartbeat encryption";
const AUTHENTICATION_CONTEXT: &str = "junction 2024 heartbeat authentication";

/// Opaque encryption of heartbeat bodies.
pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8>;

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// Passphrase-keyed heartbeat cipher shared by a service and its reflectors.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HeartbeatCipher {
    encryption_key: [u8; 32],
    authentication_key: [u8; 32],
}

impl HeartbeatCipher {
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self {
            encryption_key: blake3::derive_key(ENCRYPTION_CONTEXT, passphrase.as_bytes()),
            authentication_key: blake3::derive_key(AUTHENTICATION_CONTEXT, passphrase.as_bytes()),
        }
    }

    fn apply_keystream(&self, nonce: &[u8], data: &mut [u8]) {
        let mut keystream = vec![0u8; data.len()];
        blake3::Hasher::new_keyed(&self.encryption_key)
            .update(nonce)
            .finalize_xof()
            .fill(&mut keystream);
        for (byte, key) in data.iter_mut().zip(&keystream) {
            *byte ^= key;
        }
    }

    fn tag(&self, nonce: &[u8], ciphertext: &[u8]) -> blake3::Hash {
        blake3::Hasher::new_keyed(&self.authentication_key)
            .update(nonce)
            .update(ciphertext)
            .finalize()
    }
}

impl PayloadCipher for HeartbeatCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut body = plaintext.to_vec();
        self.apply_keystream(&nonce, &mut body);
        let tag = self.tag(&nonce, &body);

        let mut out = Vec::with_capacity(NONCE_LEN + body.len() + TAG_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&body);
        out.extend_from_slice(tag.as_bytes());
        out
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Truncated(ciphertext.len()));
        }
        let (nonce, rest) = ciphertext.split_at(NONCE_LEN);
        let (body, tag) = rest.split_at(rest.len() - TAG_LEN);

        let mut received = [0u8; TAG_LEN];
        received.copy_from_slice(tag);
        // blake3::Hash equality is constant-time.
        if self.tag(nonce, body) != blake3::Hash::from(received) {
            return Err(CryptoError::BadTag);
        }

        let mut plaintext = body.to_vec();
        self.apply_keystream(nonce, &mut plaintext);
        Ok(plaintext)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("ciphertext too short: {0} bytes")]
    Truncated(usize),
    #[error("authentication tag mismatch")]
    BadTag,
}
