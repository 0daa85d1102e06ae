//! Homomorphic encryption engine seam.
//!
//! The multiparty protocol never touches ring arithmetic directly. Everything
//! it needs from the encryption scheme goes through [`HomomorphicEngine`]:
//! key generation, stripping a context down to its public view, canonical
//! (de)serialization, public-key combination, encryption, decryption and the
//! two homomorphic operations used for aggregation.
//!
//! Secret and public contexts are distinct associated types. A public context
//! can be cloned, serialized and sent to peers; a secret context cannot be
//! serialized at all, so a public view can never carry secret fields.
//!
//! [`RlweEngine`] is the reference implementation shipped with the crate.

use rand::{CryptoRng, RngCore};
use std::fmt;

pub mod params;
pub(crate) mod poly;
pub mod rlwe;

pub use params::RlweParams;
pub use rlwe::{RlweCiphertext, RlweDecryptionShare, RlweEngine, RlwePublicContext, RlwePublicKey};

/// Fingerprint of a public context (parameters plus public key material).
pub type ContextFingerprint = [u8; 32];

/// Errors raised by an encryption engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("context parameters do not match the engine parameters")]
    ParameterMismatch,

    #[error("ciphertext was produced under a different context")]
    ContextMismatch,

    #[error("context carries no public key")]
    MissingPublicKey,

    #[error("plaintext has {len} values but the context only has {slots} slots")]
    PlaintextTooLong { len: usize, slots: usize },

    #[error("value {0} cannot be encoded at the configured scale")]
    ValueOutOfRange(f64),

    #[error("ciphertext scales differ (2^{left} vs 2^{right})")]
    ScaleMismatch { left: u32, right: u32 },

    #[error("expected {expected} decryption shares, got {got}")]
    ShareCountMismatch { expected: usize, got: usize },

    #[error("no decryption shares supplied")]
    EmptyShares,

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Capability surface of a homomorphic encryption scheme.
///
/// Public-key combination must be associative and commutative: folding the
/// same set of public keys in any order yields identical key material.
pub trait HomomorphicEngine: Send + Sync {
    /// Context holding a keypair. Owned by exactly one participant.
    type SecretContext: Send + Sync;
    /// Context with all secret material stripped.
    type PublicContext: Clone + fmt::Debug + Send + Sync;
    type PublicKey: Clone + fmt::Debug + Send + Sync;
    type Ciphertext: Clone + fmt::Debug + Send + Sync;
    type DecryptionShare: Clone + fmt::Debug + Send + Sync;

    /// Creates a context holding a fresh keypair.
    fn generate_context<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<Self::SecretContext, EngineError>;

    /// Derives the public view of a secret context.
    fn to_public(&self, ctx: &Self::SecretContext) -> Self::PublicContext;

    /// Canonical encoding of a public context. The encoding is deterministic so
    /// that re-serializing a deserialized context reproduces the same bytes.
    fn serialize_context(
        &self,
        ctx: &Self::PublicContext,
        include_public_key: bool,
    ) -> Result<Vec<u8>, EngineError>;

    fn deserialize_context(&self, bytes: &[u8]) -> Result<Self::PublicContext, EngineError>;

    fn public_key<'a>(
        &self,
        ctx: &'a Self::PublicContext,
    ) -> Result<&'a Self::PublicKey, EngineError>;

    /// Number of key shares folded into `key`; 1 for a freshly generated key.
    fn contributor_count(&self, key: &Self::PublicKey) -> usize;

    fn fingerprint(&self, ctx: &Self::PublicContext) -> ContextFingerprint;

    /// Folds `other` into the key material of `ctx`, returning a new context.
    fn combine_public_keys(
        &self,
        ctx: &Self::PublicContext,
        other: &Self::PublicKey,
    ) -> Result<Self::PublicContext, EngineError>;

    fn encrypt<R: RngCore + CryptoRng>(
        &self,
        ctx: &Self::PublicContext,
        plaintext: &[f64],
        rng: &mut R,
    ) -> Result<Self::Ciphertext, EngineError>;

    /// Decrypts a ciphertext produced under this context's own public key.
    fn decrypt(
        &self,
        ctx: &Self::SecretContext,
        ciphertext: &Self::Ciphertext,
    ) -> Result<Vec<f64>, EngineError>;

    /// One key holder's contribution to decrypting a ciphertext produced under
    /// a combined public key.
    fn partial_decrypt<R: RngCore + CryptoRng>(
        &self,
        ctx: &Self::SecretContext,
        ciphertext: &Self::Ciphertext,
        rng: &mut R,
    ) -> Result<Self::DecryptionShare, EngineError>;

    /// Combines the shares of every key holder behind `ctx`.
    fn combine_decryption_shares(
        &self,
        ctx: &Self::PublicContext,
        ciphertext: &Self::Ciphertext,
        shares: &[Self::DecryptionShare],
    ) -> Result<Vec<f64>, EngineError>;

    /// Checks that `ciphertext` belongs to `ctx`.
    fn link_context(
        &self,
        ciphertext: &Self::Ciphertext,
        ctx: &Self::PublicContext,
    ) -> Result<(), EngineError>;

    fn add(
        &self,
        left: &Self::Ciphertext,
        right: &Self::Ciphertext,
    ) -> Result<Self::Ciphertext, EngineError>;

    fn scalar_multiply(
        &self,
        ciphertext: &Self::Ciphertext,
        scalar: f64,
    ) -> Result<Self::Ciphertext, EngineError>;

    fn serialize_ciphertexts(
        &self,
        ciphertexts: &[Self::Ciphertext],
    ) -> Result<Vec<u8>, EngineError>;

    fn deserialize_ciphertexts(
        &self,
        bytes: &[u8],
    ) -> Result<Vec<Self::Ciphertext>, EngineError>;

    /// Number of plaintext values one ciphertext can hold.
    fn slot_count(&self) -> usize;
}
