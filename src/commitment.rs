//! Commit-then-reveal binding of a participant to its public key material.
//!
//! Before any key combination happens, every participant publishes
//! `SHA3-256(tag || id || len(ctx) || ctx || nonce)` over the canonical bytes of
//! its public context. Peers later recompute the digest from the revealed
//! context and nonce; a participant that swaps its public key after seeing the
//! others' announcements is caught because the digest no longer matches.
//!
//! This is an anti-equivocation check, not a proof that the key is well formed.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

use crate::engine::{EngineError, HomomorphicEngine};
use crate::participant::ParticipantId;
use crate::security::constant_time_eq;

const COMMITMENT_DOMAIN: &[u8] = b"multiparty-he/commitment/v1";

/// Length in bytes of nonces and commitment digests.
pub const DIGEST_LEN: usize = 32;

/// SHA3-256 digest binding (identity, public context, nonce).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment([u8; DIGEST_LEN]);

/// 256-bit random opening value, single use.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce([u8; DIGEST_LEN]);

impl Commitment {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl Nonce {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; DIGEST_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(&self.0[..8]))
    }
}

/// Hashes `tag || identity || len(context) || context || nonce`.
///
/// Identity and length are fixed-width little-endian so no two distinct
/// inputs share an encoding.
pub fn commit_bytes(identity: ParticipantId, context_bytes: &[u8], nonce: &Nonce) -> Commitment {
    let mut hasher = Sha3_256::new();
    hasher.update(COMMITMENT_DOMAIN);
    hasher.update((identity as u64).to_le_bytes());
    hasher.update((context_bytes.len() as u64).to_le_bytes());
    hasher.update(context_bytes);
    hasher.update(nonce.as_bytes());
    let digest = hasher.finalize();

    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&digest);
    Commitment(out)
}

/// Commits to `public_context` (including its public key) under a fresh nonce.
///
/// # Errors
/// Returns an error if the engine cannot serialize the context
pub fn create_commitment<E: HomomorphicEngine, R: RngCore + CryptoRng>(
    engine: &E,
    identity: ParticipantId,
    public_context: &E::PublicContext,
    rng: &mut R,
) -> Result<(Commitment, Nonce), EngineError> {
    let context_bytes = engine.serialize_context(public_context, true)?;
    let nonce = Nonce::random(rng);
    Ok((commit_bytes(identity, &context_bytes, &nonce), nonce))
}

/// Recomputes the commitment and compares it in constant time.
///
/// Returns `false` on any mismatch, including a context the engine cannot
/// serialize.
pub fn verify_commitment<E: HomomorphicEngine>(
    engine: &E,
    identity: ParticipantId,
    public_context: &E::PublicContext,
    nonce: &Nonce,
    commitment: &Commitment,
) -> bool {
    match engine.serialize_context(public_context, true) {
        Ok(context_bytes) => {
            let recomputed = commit_bytes(identity, &context_bytes, nonce);
            constant_time_eq(recomputed.as_bytes(), commitment.as_bytes())
        }
        Err(_) => false,
    }
}
