use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{Deserialize, Serialize};

use super::EngineError;

/// Smallest supported ring degree.
pub const MIN_POLY_MODULUS_DEGREE: u32 = 16;
/// Largest supported ring degree.
pub const MAX_POLY_MODULUS_DEGREE: u32 = 16384;

/// Encoded values must stay below 2^62 in magnitude so the centered lift out
/// of Z_{2^64} is unambiguous.
pub const MAX_SCALE_HEADROOM_BITS: u32 = 62;

const DEFAULT_CRS_SEED: u64 = 0x6d70_635f_6865_7631;

/// Parameters of the reference RLWE engine.
///
/// The coefficient modulus is fixed to 2^64; all contexts of one protocol run
/// must share the same parameter set, including the common reference seed.
#[derive(
    Clone, Debug, PartialEq, Eq, Serialize, Deserialize, CanonicalSerialize, CanonicalDeserialize,
)]
#[serde(default)]
pub struct RlweParams {
    /// Ring degree n of Z_q[X]/(X^n + 1). Also the number of slots.
    pub poly_modulus_degree: u32,
    /// Fresh ciphertexts encode values at scale 2^scale_bits.
    pub scale_bits: u32,
    /// Fixed-point precision of scalars in `scalar_multiply`.
    pub scalar_bits: u32,
    /// Width of the centered binomial error distribution.
    pub error_eta: u32,
    /// Bound (as a power of two) of the noise added to decryption shares.
    pub smudging_bits: u32,
    /// Seed of the common reference polynomial.
    pub crs_seed: u64,
}

impl Default for RlweParams {
    fn default() -> Self {
        Self {
            poly_modulus_degree: 8192,
            scale_bits: 30,
            scalar_bits: 20,
            error_eta: 2,
            smudging_bits: 12,
            crs_seed: DEFAULT_CRS_SEED,
        }
    }
}

impl RlweParams {
    pub fn with_degree(mut self, poly_modulus_degree: u32) -> Self {
        self.poly_modulus_degree = poly_modulus_degree;
        self
    }

    pub fn with_crs_seed(mut self, crs_seed: u64) -> Self {
        self.crs_seed = crs_seed;
        self
    }

    pub fn degree(&self) -> usize {
        self.poly_modulus_degree as usize
    }

    /// Checks the parameter set.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if the degree is not a power of two within
    /// range, or if scale, error or smudging widths leave no headroom.
    pub fn validate(&self) -> Result<(), EngineError> {
        let n = self.poly_modulus_degree;
        let in_range = (MIN_POLY_MODULUS_DEGREE..=MAX_POLY_MODULUS_DEGREE).contains(&n);
        if !n.is_power_of_two() || !in_range {
            return Err(EngineError::InvalidParameter(format!(
                "poly_modulus_degree must be a power of 2 in {}..={}, got {}",
                MIN_POLY_MODULUS_DEGREE, MAX_POLY_MODULUS_DEGREE, n
            )));
        }
        if !(10..=40).contains(&self.scale_bits) {
            return Err(EngineError::InvalidParameter(format!(
                "scale_bits must be in 10..=40, got {}",
                self.scale_bits
            )));
        }
        if self.scalar_bits > 30 || self.scale_bits + self.scalar_bits > MAX_SCALE_HEADROOM_BITS {
            return Err(EngineError::InvalidParameter(format!(
                "scalar_bits ({}) leaves no headroom above scale_bits ({})",
                self.scalar_bits, self.scale_bits
            )));
        }
        if !(1..=16).contains(&self.error_eta) {
            return Err(EngineError::InvalidParameter(format!(
                "error_eta must be in 1..=16, got {}",
                self.error_eta
            )));
        }
        if self.smudging_bits >= self.scale_bits {
            return Err(EngineError::InvalidParameter(format!(
                "smudging_bits ({}) must be below scale_bits ({})",
                self.smudging_bits, self.scale_bits
            )));
        }
        Ok(())
    }
}
