//! Arithmetic in Z_q[X]/(X^n + 1) with q = 2^64.
//!
//! Big polynomials are `Vec<u64>` with wrapping arithmetic. Small polynomials
//! (secrets, errors, ephemeral keys) are signed `i64` coefficients; every
//! product in the scheme is big-times-small, so there is no general
//! multiplication here.

use blake2::{Blake2b512, Digest};
use rand::{Rng, RngCore};

const CRS_DOMAIN: &[u8] = b"multiparty-he/crs/v1:";

pub(crate) fn add_assign(acc: &mut [u64], rhs: &[u64]) {
    for (a, b) in acc.iter_mut().zip(rhs) {
        *a = a.wrapping_add(*b);
    }
}

pub(crate) fn add_small_assign(acc: &mut [u64], rhs: &[i64]) {
    for (a, b) in acc.iter_mut().zip(rhs) {
        *a = a.wrapping_add(*b as u64);
    }
}

pub(crate) fn neg(p: &[u64]) -> Vec<u64> {
    p.iter().map(|c| c.wrapping_neg()).collect()
}

pub(crate) fn scale(p: &[u64], factor: i64) -> Vec<u64> {
    let factor = factor as u64;
    p.iter().map(|c| c.wrapping_mul(factor)).collect()
}

/// Negacyclic product of a big polynomial and a small one.
pub(crate) fn mul_small(big: &[u64], small: &[i64]) -> Vec<u64> {
    let n = big.len();
    debug_assert_eq!(n, small.len());
    let mut out = vec![0u64; n];
    for (j, &s) in small.iter().enumerate() {
        if s == 0 {
            continue;
        }
        let s = s as u64;
        // X^(i+j) wraps to -X^(i+j-n)
        for i in 0..n - j {
            out[i + j] = out[i + j].wrapping_add(big[i].wrapping_mul(s));
        }
        for i in n - j..n {
            out[i + j - n] = out[i + j - n].wrapping_sub(big[i].wrapping_mul(s));
        }
    }
    out
}

/// Uniform ternary polynomial.
pub(crate) fn sample_ternary<R: RngCore>(n: usize, rng: &mut R) -> Vec<i64> {
    (0..n).map(|_| rng.random_range(-1i64..=1)).collect()
}

/// Centered binomial polynomial with parameter `eta` (at most 16).
pub(crate) fn sample_cbd<R: RngCore>(n: usize, eta: u32, rng: &mut R) -> Vec<i64> {
    let mask = (1u32 << eta) - 1;
    (0..n)
        .map(|_| {
            let bits = rng.next_u32();
            let pos = (bits & mask).count_ones() as i64;
            let neg = ((bits >> eta) & mask).count_ones() as i64;
            pos - neg
        })
        .collect()
}

/// Uniform polynomial with coefficients in [-2^bits, 2^bits].
pub(crate) fn sample_bounded<R: RngCore>(n: usize, bits: u32, rng: &mut R) -> Vec<i64> {
    let bound = 1i64 << bits;
    (0..n).map(|_| rng.random_range(-bound..=bound)).collect()
}

/// Expands the common reference polynomial from a public seed.
pub(crate) fn expand_crs(seed: u64, n: usize) -> Vec<u64> {
    let mut out = Vec::with_capacity(n);
    let mut counter = 0u64;
    while out.len() < n {
        let mut hasher = Blake2b512::new();
        hasher.update(CRS_DOMAIN);
        hasher.update(seed.to_le_bytes());
        hasher.update(counter.to_le_bytes());
        let block = hasher.finalize();
        for chunk in block.chunks_exact(8) {
            if out.len() == n {
                break;
            }
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            out.push(u64::from_le_bytes(word));
        }
        counter += 1;
    }
    out
}

/// Centered lift of a coefficient out of Z_{2^64}.
pub(crate) fn centered(c: u64) -> i64 {
    c as i64
}
