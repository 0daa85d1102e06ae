//! Reference RLWE engine.
//!
//! Approximate fixed-point encryption over Z_{2^64}[X]/(X^n + 1), shaped for
//! multiparty key generation: every context of a run shares one reference
//! polynomial `a`, each party publishes `b_i = -a*s_i + e_i`, and public keys
//! combine by addition. A ciphertext under the combined key decrypts only with
//! the sum of all contributing secrets, which is why decryption under a
//! combined key goes through per-party shares.
//!
//! Values are coefficient-encoded: slot `j` of a plaintext is coefficient `j`
//! scaled by `2^scale_bits`. The scheme supports addition and multiplication
//! by plaintext scalars, which is what federated aggregation needs.

use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use blake2::{Blake2b512, Digest};
use rand::{CryptoRng, RngCore};
use std::fmt;

use super::params::{RlweParams, MAX_SCALE_HEADROOM_BITS};
use super::poly;
use super::{ContextFingerprint, EngineError, HomomorphicEngine};
use crate::security::{constant_time_eq, SensitivePoly};

const FINGERPRINT_DOMAIN: &[u8] = b"multiparty-he/context/v1:";

/// Public key material: `b = -a*s + e`, possibly summed over several parties.
#[derive(Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct RlwePublicKey {
    b: Vec<u64>,
    /// Number of secret shares folded into `b`.
    shares: u32,
}

impl RlwePublicKey {
    pub fn share_count(&self) -> usize {
        self.shares as usize
    }
}

impl fmt::Debug for RlwePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RlwePublicKey")
            .field("degree", &self.b.len())
            .field("shares", &self.shares)
            .finish()
    }
}

/// Public context: parameters plus (optionally) public key material.
#[derive(Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct RlwePublicContext {
    params: RlweParams,
    public_key: Option<RlwePublicKey>,
}

impl RlwePublicContext {
    pub fn params(&self) -> &RlweParams {
        &self.params
    }

    pub fn has_public_key(&self) -> bool {
        self.public_key.is_some()
    }
}

impl fmt::Debug for RlwePublicContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RlwePublicContext")
            .field("degree", &self.params.poly_modulus_degree)
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Context holding a keypair.
///
/// Deliberately neither `Clone` nor serializable.
pub struct RlweSecretContext {
    public: RlwePublicContext,
    secret: SensitivePoly,
}

impl fmt::Debug for RlweSecretContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RlweSecretContext")
            .field("public", &self.public)
            .field("secret", &self.secret)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct RlweCiphertext {
    c0: Vec<u64>,
    c1: Vec<u64>,
    scale_bits: u32,
    /// Number of meaningful slots.
    len: u32,
    context_fingerprint: Vec<u8>,
}

impl RlweCiphertext {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn scale_bits(&self) -> u32 {
        self.scale_bits
    }
}

impl fmt::Debug for RlweCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RlweCiphertext")
            .field("len", &self.len)
            .field("scale_bits", &self.scale_bits)
            .field(
                "context",
                &hex::encode(&self.context_fingerprint[..8.min(self.context_fingerprint.len())]),
            )
            .finish()
    }
}

/// `c1 * s_i` plus smudging noise.
#[derive(Clone, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct RlweDecryptionShare {
    d: Vec<u64>,
}

impl fmt::Debug for RlweDecryptionShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RlweDecryptionShare")
            .field("degree", &self.d.len())
            .finish()
    }
}

/// Reference engine bound to one parameter set.
#[derive(Clone, Debug)]
pub struct RlweEngine {
    params: RlweParams,
    crs: Vec<u64>,
}

impl RlweEngine {
    /// Creates an engine for `params`, expanding the common reference polynomial.
    ///
    /// # Errors
    /// Returns an error if the parameters do not validate
    pub fn new(params: RlweParams) -> Result<Self, EngineError> {
        params.validate()?;
        let crs = poly::expand_crs(params.crs_seed, params.degree());
        Ok(Self { params, crs })
    }

    pub fn params(&self) -> &RlweParams {
        &self.params
    }

    fn check_params(&self, ctx: &RlwePublicContext) -> Result<(), EngineError> {
        if ctx.params != self.params {
            return Err(EngineError::ParameterMismatch);
        }
        Ok(())
    }

    fn check_shape(&self, ciphertext: &RlweCiphertext) -> Result<(), EngineError> {
        let n = self.params.degree();
        if ciphertext.c0.len() != n || ciphertext.c1.len() != n || ciphertext.len() > n {
            return Err(EngineError::Decoding(format!(
                "ciphertext shape does not match ring degree {}",
                n
            )));
        }
        Ok(())
    }

    fn encode(&self, values: &[f64]) -> Result<Vec<u64>, EngineError> {
        let n = self.params.degree();
        if values.len() > n {
            return Err(EngineError::PlaintextTooLong {
                len: values.len(),
                slots: n,
            });
        }
        let scale = 2f64.powi(self.params.scale_bits as i32);
        let limit = 2f64.powi(MAX_SCALE_HEADROOM_BITS as i32);
        let mut encoded = vec![0u64; n];
        for (slot, &value) in encoded.iter_mut().zip(values) {
            let scaled = (value * scale).round();
            if !scaled.is_finite() || scaled.abs() >= limit {
                return Err(EngineError::ValueOutOfRange(value));
            }
            *slot = (scaled as i64) as u64;
        }
        Ok(encoded)
    }

    fn decode(&self, coeffs: &[u64], scale_bits: u32, len: usize) -> Vec<f64> {
        let scale = 2f64.powi(scale_bits as i32);
        coeffs
            .iter()
            .take(len)
            .map(|&c| poly::centered(c) as f64 / scale)
            .collect()
    }
}

impl HomomorphicEngine for RlweEngine {
    type SecretContext = RlweSecretContext;
    type PublicContext = RlwePublicContext;
    type PublicKey = RlwePublicKey;
    type Ciphertext = RlweCiphertext;
    type DecryptionShare = RlweDecryptionShare;

    fn generate_context<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<RlweSecretContext, EngineError> {
        let n = self.params.degree();
        let s = poly::sample_ternary(n, rng);
        let e = poly::sample_cbd(n, self.params.error_eta, rng);

        let mut b = poly::neg(&poly::mul_small(&self.crs, &s));
        poly::add_small_assign(&mut b, &e);

        Ok(RlweSecretContext {
            public: RlwePublicContext {
                params: self.params.clone(),
                public_key: Some(RlwePublicKey { b, shares: 1 }),
            },
            secret: SensitivePoly::new(s),
        })
    }

    fn to_public(&self, ctx: &RlweSecretContext) -> RlwePublicContext {
        ctx.public.clone()
    }

    fn serialize_context(
        &self,
        ctx: &RlwePublicContext,
        include_public_key: bool,
    ) -> Result<Vec<u8>, EngineError> {
        let mut bytes = Vec::new();
        let written = if include_public_key {
            ctx.serialize_compressed(&mut bytes)
        } else {
            RlwePublicContext {
                params: ctx.params.clone(),
                public_key: None,
            }
            .serialize_compressed(&mut bytes)
        };
        written.map_err(|e| EngineError::Serialization(e.to_string()))?;
        Ok(bytes)
    }

    fn deserialize_context(&self, bytes: &[u8]) -> Result<RlwePublicContext, EngineError> {
        let ctx = RlwePublicContext::deserialize_compressed(bytes)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        self.check_params(&ctx)?;
        if let Some(pk) = &ctx.public_key {
            if pk.b.len() != self.params.degree() || pk.shares == 0 {
                return Err(EngineError::Decoding(
                    "public key does not match ring degree".to_string(),
                ));
            }
        }
        Ok(ctx)
    }

    fn public_key<'a>(
        &self,
        ctx: &'a RlwePublicContext,
    ) -> Result<&'a RlwePublicKey, EngineError> {
        ctx.public_key.as_ref().ok_or(EngineError::MissingPublicKey)
    }

    fn contributor_count(&self, key: &RlwePublicKey) -> usize {
        key.share_count()
    }

    fn fingerprint(&self, ctx: &RlwePublicContext) -> ContextFingerprint {
        let mut hasher = Blake2b512::new();
        hasher.update(FINGERPRINT_DOMAIN);
        hasher.update(ctx.params.poly_modulus_degree.to_le_bytes());
        hasher.update(ctx.params.scale_bits.to_le_bytes());
        hasher.update(ctx.params.crs_seed.to_le_bytes());
        match &ctx.public_key {
            Some(pk) => {
                hasher.update(pk.shares.to_le_bytes());
                for c in &pk.b {
                    hasher.update(c.to_le_bytes());
                }
            }
            None => hasher.update([0u8]),
        }
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..32]);
        out
    }

    fn combine_public_keys(
        &self,
        ctx: &RlwePublicContext,
        other: &RlwePublicKey,
    ) -> Result<RlwePublicContext, EngineError> {
        self.check_params(ctx)?;
        let own = self.public_key(ctx)?;
        if other.b.len() != own.b.len() {
            return Err(EngineError::ParameterMismatch);
        }
        let shares = own.shares.checked_add(other.shares).ok_or_else(|| {
            EngineError::InvalidParameter(format!(
                "combined key would hold more than {} shares",
                u32::MAX
            ))
        })?;
        let mut b = own.b.clone();
        poly::add_assign(&mut b, &other.b);
        Ok(RlwePublicContext {
            params: ctx.params.clone(),
            public_key: Some(RlwePublicKey { b, shares }),
        })
    }

    fn encrypt<R: RngCore + CryptoRng>(
        &self,
        ctx: &RlwePublicContext,
        plaintext: &[f64],
        rng: &mut R,
    ) -> Result<RlweCiphertext, EngineError> {
        self.check_params(ctx)?;
        let pk = self.public_key(ctx)?;
        let n = self.params.degree();
        let m = self.encode(plaintext)?;

        let u = poly::sample_ternary(n, rng);
        let e0 = poly::sample_cbd(n, self.params.error_eta, rng);
        let e1 = poly::sample_cbd(n, self.params.error_eta, rng);

        let mut c0 = poly::mul_small(&pk.b, &u);
        poly::add_small_assign(&mut c0, &e0);
        poly::add_assign(&mut c0, &m);

        let mut c1 = poly::mul_small(&self.crs, &u);
        poly::add_small_assign(&mut c1, &e1);

        Ok(RlweCiphertext {
            c0,
            c1,
            scale_bits: self.params.scale_bits,
            len: plaintext.len() as u32,
            context_fingerprint: self.fingerprint(ctx).to_vec(),
        })
    }

    fn decrypt(
        &self,
        ctx: &RlweSecretContext,
        ciphertext: &RlweCiphertext,
    ) -> Result<Vec<f64>, EngineError> {
        self.link_context(ciphertext, &ctx.public)?;
        let mut m = poly::mul_small(&ciphertext.c1, ctx.secret.expose_secret());
        poly::add_assign(&mut m, &ciphertext.c0);
        Ok(self.decode(&m, ciphertext.scale_bits, ciphertext.len()))
    }

    fn partial_decrypt<R: RngCore + CryptoRng>(
        &self,
        ctx: &RlweSecretContext,
        ciphertext: &RlweCiphertext,
        rng: &mut R,
    ) -> Result<RlweDecryptionShare, EngineError> {
        self.check_params(&ctx.public)?;
        self.check_shape(ciphertext)?;
        let mut d = poly::mul_small(&ciphertext.c1, ctx.secret.expose_secret());
        let smudge = poly::sample_bounded(self.params.degree(), self.params.smudging_bits, rng);
        poly::add_small_assign(&mut d, &smudge);
        Ok(RlweDecryptionShare { d })
    }

    fn combine_decryption_shares(
        &self,
        ctx: &RlwePublicContext,
        ciphertext: &RlweCiphertext,
        shares: &[RlweDecryptionShare],
    ) -> Result<Vec<f64>, EngineError> {
        self.link_context(ciphertext, ctx)?;
        if shares.is_empty() {
            return Err(EngineError::EmptyShares);
        }
        let expected = self.public_key(ctx)?.share_count();
        if shares.len() != expected {
            return Err(EngineError::ShareCountMismatch {
                expected,
                got: shares.len(),
            });
        }
        let mut m = ciphertext.c0.clone();
        for share in shares {
            if share.d.len() != m.len() {
                return Err(EngineError::Decoding(
                    "decryption share does not match ring degree".to_string(),
                ));
            }
            poly::add_assign(&mut m, &share.d);
        }
        Ok(self.decode(&m, ciphertext.scale_bits, ciphertext.len()))
    }

    fn link_context(
        &self,
        ciphertext: &RlweCiphertext,
        ctx: &RlwePublicContext,
    ) -> Result<(), EngineError> {
        self.check_params(ctx)?;
        self.check_shape(ciphertext)?;
        if !constant_time_eq(&ciphertext.context_fingerprint, &self.fingerprint(ctx)) {
            return Err(EngineError::ContextMismatch);
        }
        Ok(())
    }

    fn add(
        &self,
        left: &RlweCiphertext,
        right: &RlweCiphertext,
    ) -> Result<RlweCiphertext, EngineError> {
        self.check_shape(left)?;
        self.check_shape(right)?;
        if left.context_fingerprint != right.context_fingerprint {
            return Err(EngineError::ContextMismatch);
        }
        if left.scale_bits != right.scale_bits {
            return Err(EngineError::ScaleMismatch {
                left: left.scale_bits,
                right: right.scale_bits,
            });
        }
        let mut sum = left.clone();
        poly::add_assign(&mut sum.c0, &right.c0);
        poly::add_assign(&mut sum.c1, &right.c1);
        sum.len = left.len.max(right.len);
        Ok(sum)
    }

    fn scalar_multiply(
        &self,
        ciphertext: &RlweCiphertext,
        scalar: f64,
    ) -> Result<RlweCiphertext, EngineError> {
        self.check_shape(ciphertext)?;
        let scale_bits = ciphertext.scale_bits + self.params.scalar_bits;
        if scale_bits >= MAX_SCALE_HEADROOM_BITS {
            return Err(EngineError::InvalidParameter(format!(
                "scalar multiplication would raise the scale to 2^{}",
                scale_bits
            )));
        }
        let factor = (scalar * 2f64.powi(self.params.scalar_bits as i32)).round();
        let headroom = 2f64.powi((MAX_SCALE_HEADROOM_BITS - ciphertext.scale_bits) as i32);
        if !factor.is_finite() || factor.abs() >= headroom {
            return Err(EngineError::ValueOutOfRange(scalar));
        }
        let factor = factor as i64;
        Ok(RlweCiphertext {
            c0: poly::scale(&ciphertext.c0, factor),
            c1: poly::scale(&ciphertext.c1, factor),
            scale_bits,
            len: ciphertext.len,
            context_fingerprint: ciphertext.context_fingerprint.clone(),
        })
    }

    fn serialize_ciphertexts(
        &self,
        ciphertexts: &[RlweCiphertext],
    ) -> Result<Vec<u8>, EngineError> {
        let mut bytes = Vec::new();
        ciphertexts
            .to_vec()
            .serialize_compressed(&mut bytes)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        Ok(bytes)
    }

    fn deserialize_ciphertexts(&self, bytes: &[u8]) -> Result<Vec<RlweCiphertext>, EngineError> {
        let ciphertexts = Vec::<RlweCiphertext>::deserialize_compressed(bytes)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        for ct in &ciphertexts {
            self.check_shape(ct)?;
        }
        Ok(ciphertexts)
    }

    fn slot_count(&self) -> usize {
        self.params.degree()
    }
}
