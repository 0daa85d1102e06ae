//! Shared helpers for unit tests

use rand::{rngs::StdRng, SeedableRng};

use crate::engine::{RlweEngine, RlweParams};

/// Installs a fmt subscriber once per test binary. Set `RUST_LOG=debug` to
/// see per-participant events.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Small-ring engine so protocol tests stay fast.
pub fn test_engine(degree: u32) -> RlweEngine {
    RlweEngine::new(RlweParams::default().with_degree(degree)).expect("test parameters are valid")
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn assert_close(actual: &[f64], expected: &[f64], tolerance: f64) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < tolerance,
            "slot {}: got {}, expected {} (tolerance {})",
            i,
            a,
            e,
            tolerance
        );
    }
}
