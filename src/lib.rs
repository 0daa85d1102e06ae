//! Multiparty Homomorphic Encryption Key Coordination
//!
//! A group of participants jointly establishes one public encryption key
//! without any of them revealing a secret key share. The run proceeds in
//! committed phases:
//!
//! - **Setup**: every participant generates a keypair and commits to its public
//!   context with a SHA3-256 commitment over (identity, context, nonce)
//! - **Key sharing**: commitments are distributed to every other participant
//! - **Verification**: every participant checks every other participant's
//!   revealed context against its commitment, catching key substitution
//! - **Ready**: participants fold the verified public keys into one combined
//!   context, accepted once at least `threshold` participants agree on it
//!
//! Data encrypted under the combined context is opened by collecting a
//! decryption share from every key holder. The `threshold` check on
//! decryption is an authorization gate over participant identities, not a
//! threshold secret sharing of the key.
//!
//! [`chain::ChainCoordinator`] is an alternative protocol in which each
//! participant wraps the previous participant's ciphertext under its own key,
//! and layers come off in strict reverse order.
//!
//! The encryption scheme sits behind [`engine::HomomorphicEngine`];
//! [`engine::RlweEngine`] is the reference implementation.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use multiparty_he::{Coordinator, CoordinatorConfig, RlweEngine, RlweParams};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let engine = Arc::new(RlweEngine::new(RlweParams::default().with_degree(1024)).unwrap());
//! let config = CoordinatorConfig::new(3).with_threshold(2);
//! let mut coordinator = Coordinator::new(engine, config).unwrap();
//! let mut rng = StdRng::seed_from_u64(42);
//!
//! coordinator.setup_mpc_environment(&mut rng).unwrap();
//! coordinator.verify_key_shares().unwrap();
//! coordinator.combine_keys().unwrap();
//!
//! let ct = coordinator.encrypt(&[1.0, 2.0, 3.0], &mut rng).unwrap();
//! let pt = coordinator.decrypt(&ct, &[0, 1], &mut rng).unwrap();
//! assert!(pt.iter().zip([1.0, 2.0, 3.0]).all(|(a, b)| (a - b).abs() < 1e-3));
//!
//! // a single identity is below the threshold
//! assert!(coordinator.decrypt(&ct, &[0], &mut rng).is_err());
//! ```

pub mod aggregation;
pub mod chain;
pub mod commitment;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod messages;
pub mod participant;
pub mod security;

#[cfg(test)]
mod test_support;

pub use chain::{ChainCoordinator, LayeredCiphertext};
pub use commitment::{create_commitment, verify_commitment, Commitment, Nonce};
pub use config::{CoordinatorConfig, VerificationPolicy};
pub use coordinator::{Coordinator, ProtocolPhase};
pub use engine::{EngineError, HomomorphicEngine, RlweEngine, RlweParams};
pub use error::{MpcError, Result};
pub use messages::{KeyShareAnnouncement, ProtocolMessage};
pub use participant::{Participant, ParticipantId};
