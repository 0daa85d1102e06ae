//! Security utilities for protecting sensitive key material
//!
//! This module provides:
//! - A zeroize-on-drop wrapper for secret polynomials
//! - Constant-time comparison of byte strings (commitments, fingerprints)

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Wrapper for secret polynomial coefficients that ensures zeroization on drop
///
/// # Security
/// - Automatically zeroizes memory when dropped
/// - Not `Clone` and not serializable: a secret share has exactly one owner
/// - Prevents accidental leakage through the Debug trait
pub struct SensitivePoly {
    coeffs: Vec<i64>,
}

impl SensitivePoly {
    pub fn new(coeffs: Vec<i64>) -> Self {
        Self { coeffs }
    }

    /// Get a reference to the coefficients
    ///
    /// # Security Warning
    /// The caller must ensure this reference is not used to leak the value
    pub fn expose_secret(&self) -> &[i64] {
        &self.coeffs
    }

    pub fn len(&self) -> usize {
        self.coeffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }
}

impl Zeroize for SensitivePoly {
    fn zeroize(&mut self) {
        self.coeffs.zeroize();
    }
}

impl ZeroizeOnDrop for SensitivePoly {}

impl Drop for SensitivePoly {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl std::fmt::Debug for SensitivePoly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensitivePoly")
            .field("len", &self.coeffs.len())
            .field("coeffs", &"[REDACTED]")
            .finish()
    }
}

/// Constant-time byte slice comparison
///
/// The length check may leak; digests compared here have public, fixed length.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }

    result == 0
}
