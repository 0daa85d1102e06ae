//! Homomorphic aggregation of encrypted updates
//!
//! Used for federated averaging: each contributor's ciphertext is weighted by
//! a plaintext scalar and the results are summed, all without decrypting.

use crate::engine::{EngineError, HomomorphicEngine};

/// Sums ciphertexts produced under the same context and scale.
///
/// # Errors
/// Returns `EmptyShares` for an empty input, or the engine's error for
/// mismatched contexts or scales
pub fn sum<E: HomomorphicEngine>(
    engine: &E,
    ciphertexts: &[E::Ciphertext],
) -> Result<E::Ciphertext, EngineError> {
    let (first, rest) = ciphertexts.split_first().ok_or(EngineError::EmptyShares)?;
    rest.iter()
        .try_fold(first.clone(), |acc, ct| engine.add(&acc, ct))
}

/// `Σ weight_i * ciphertext_i`.
///
/// Every term is scalar-multiplied, so the result sits one scalar step above
/// the scale of fresh ciphertexts.
pub fn weighted_sum<E: HomomorphicEngine>(
    engine: &E,
    terms: &[(E::Ciphertext, f64)],
) -> Result<E::Ciphertext, EngineError> {
    let weighted = terms
        .iter()
        .map(|(ct, weight)| engine.scalar_multiply(ct, *weight))
        .collect::<Result<Vec<_>, _>>()?;
    sum(engine, &weighted)
}

/// Weighted sum with weights normalized to add up to one.
pub fn weighted_average<E: HomomorphicEngine>(
    engine: &E,
    terms: &[(E::Ciphertext, f64)],
) -> Result<E::Ciphertext, EngineError> {
    let total: f64 = terms.iter().map(|(_, w)| w).sum();
    if total == 0.0 || !total.is_finite() {
        return Err(EngineError::InvalidParameter(format!(
            "weights must have a finite, non-zero sum, got {}",
            total
        )));
    }
    let normalized: Vec<(E::Ciphertext, f64)> = terms
        .iter()
        .map(|(ct, w)| (ct.clone(), w / total))
        .collect();
    weighted_sum(engine, &normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::coordinator::Coordinator;
    use crate::test_support::{assert_close, seeded_rng, test_engine};
    use std::sync::Arc;

    #[test]
    fn test_federated_average_under_combined_key() {
        let mut rng = seeded_rng(300);
        let engine = Arc::new(test_engine(256));
        let mut coordinator = Coordinator::new(engine.clone(), CoordinatorConfig::new(3)).unwrap();
        coordinator.establish(&mut rng).unwrap();

        let updates = [vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0], vec![2.0, 2.0, 2.0]];
        let cts = coordinator
            .encrypt_matrix(&updates, &mut rng)
            .unwrap();

        let total = sum(engine.as_ref(), &cts).unwrap();
        assert_close(
            &coordinator.decrypt(&total, &[0, 1], &mut rng).unwrap(),
            &[6.0, 6.0, 6.0],
            1e-3,
        );

        let terms: Vec<_> = cts.into_iter().zip([0.5, 0.25, 0.25]).collect();
        let average = weighted_average(engine.as_ref(), &terms).unwrap();
        assert_close(
            &coordinator.decrypt(&average, &[1, 2], &mut rng).unwrap(),
            &[1.75, 2.0, 2.25],
            1e-3,
        );
    }

    #[test]
    fn test_weighted_sum_needs_input() {
        let engine = test_engine(64);
        assert_eq!(weighted_sum(&engine, &[]).unwrap_err(), EngineError::EmptyShares);
    }

    #[test]
    fn test_zero_weights_rejected() {
        let mut rng = seeded_rng(301);
        let engine = test_engine(64);
        let sk = engine.generate_context(&mut rng).unwrap();
        let ct = engine.encrypt(&engine.to_public(&sk), &[1.0], &mut rng).unwrap();
        assert!(matches!(
            weighted_average(&engine, &[(ct, 0.0)]),
            Err(EngineError::InvalidParameter(_))
        ));
    }
}
