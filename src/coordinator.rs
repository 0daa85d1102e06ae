//! Protocol orchestration
//!
//! The coordinator owns every participant of one run and drives them through
//! `Setup -> KeySharing -> Verification -> Ready`. Each step is a method that
//! matches on the current state and either advances it or returns a typed
//! error. A step that fails part way moves the coordinator to `Failed`; from
//! there nothing advances until [`Coordinator::reset`] starts a fresh run.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use multiparty_he::{Coordinator, CoordinatorConfig, RlweEngine, RlweParams};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let engine = Arc::new(RlweEngine::new(RlweParams::default().with_degree(256)).unwrap());
//! let mut coordinator = Coordinator::new(engine, CoordinatorConfig::new(3)).unwrap();
//! let mut rng = StdRng::seed_from_u64(7);
//!
//! coordinator.setup_mpc_environment(&mut rng).unwrap();
//! coordinator.verify_key_shares().unwrap();
//! coordinator.combine_keys().unwrap();
//!
//! let ciphertext = coordinator.encrypt(&[1.0, 2.0, 3.0], &mut rng).unwrap();
//! let plaintext = coordinator.decrypt(&ciphertext, &[0, 1], &mut rng).unwrap();
//! assert!((plaintext[1] - 2.0).abs() < 1e-3);
//! ```

use rand::{rngs::StdRng, CryptoRng, RngCore, SeedableRng};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{CoordinatorConfig, VerificationPolicy};
use crate::engine::HomomorphicEngine;
use crate::error::{MpcError, Result};
use crate::messages::{KeyShareAnnouncement, ProtocolMessage};
use crate::participant::{Participant, ParticipantId};

/// Observable phase of a protocol run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolPhase {
    Setup,
    KeySharing,
    Verification,
    Ready,
    /// A transition failed; only `reset` leaves this phase.
    Failed,
}

enum ProtocolState<E: HomomorphicEngine> {
    Setup,
    KeySharing {
        announcements: Vec<KeyShareAnnouncement>,
    },
    Verification {
        announcements: Vec<KeyShareAnnouncement>,
        excluded: BTreeSet<ParticipantId>,
    },
    Ready {
        announcements: Vec<KeyShareAnnouncement>,
        combined: Arc<E::PublicContext>,
        /// Participants whose secret shares are folded into `combined`
        key_holders: Vec<ParticipantId>,
    },
    Failed {
        phase: ProtocolPhase,
        reason: String,
    },
}

impl<E: HomomorphicEngine> ProtocolState<E> {
    fn phase(&self) -> ProtocolPhase {
        match self {
            ProtocolState::Setup => ProtocolPhase::Setup,
            ProtocolState::KeySharing { .. } => ProtocolPhase::KeySharing,
            ProtocolState::Verification { .. } => ProtocolPhase::Verification,
            ProtocolState::Ready { .. } => ProtocolPhase::Ready,
            ProtocolState::Failed { .. } => ProtocolPhase::Failed,
        }
    }
}

pub struct Coordinator<E: HomomorphicEngine> {
    engine: Arc<E>,
    config: CoordinatorConfig,
    threshold: usize,
    participants: Vec<Participant<E>>,
    state: ProtocolState<E>,
}

impl<E: HomomorphicEngine> Coordinator<E> {
    /// Creates a coordinator with `config.participants` fresh participants,
    /// identified `0..N`.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the participant count or threshold is out of range
    pub fn new(engine: Arc<E>, config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        let threshold = config.effective_threshold();
        let participants = Self::fresh_participants(&engine, config.participants);
        info!(
            "Coordinator created for {} participants (threshold {})",
            config.participants, threshold
        );
        Ok(Self {
            engine,
            config,
            threshold,
            participants,
            state: ProtocolState::Setup,
        })
    }

    fn fresh_participants(engine: &Arc<E>, n: usize) -> Vec<Participant<E>> {
        (0..n).map(|id| Participant::new(id, engine.clone())).collect()
    }

    pub fn phase(&self) -> ProtocolPhase {
        self.state.phase()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn participants(&self) -> &[Participant<E>] {
        &self.participants
    }

    /// The combined public context, once `Ready`.
    pub fn combined_context(&self) -> Option<&E::PublicContext> {
        match &self.state {
            ProtocolState::Ready { combined, .. } => Some(combined.as_ref()),
            _ => None,
        }
    }

    /// Participants whose key shares make up the combined key; empty before `Ready`.
    pub fn key_holders(&self) -> &[ParticipantId] {
        match &self.state {
            ProtocolState::Ready { key_holders, .. } => key_holders,
            _ => &[],
        }
    }

    /// What every participant broadcast during setup.
    pub fn key_share_announcements(&self) -> &[KeyShareAnnouncement] {
        match &self.state {
            ProtocolState::KeySharing { announcements }
            | ProtocolState::Verification { announcements, .. }
            | ProtocolState::Ready { announcements, .. } => announcements,
            _ => &[],
        }
    }

    /// Participants dropped by the exclusion policy during verification.
    pub fn excluded(&self) -> Vec<ParticipantId> {
        match &self.state {
            ProtocolState::Verification { excluded, .. } => excluded.iter().copied().collect(),
            ProtocolState::Ready { key_holders, .. } => (0..self.participants.len())
                .filter(|id| !key_holders.contains(id))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn require_phase(&self, operation: &'static str, expected: ProtocolPhase) -> Result<()> {
        match &self.state {
            ProtocolState::Failed { phase, reason } => Err(MpcError::Aborted {
                phase: *phase,
                reason: reason.clone(),
            }),
            state if state.phase() == expected => Ok(()),
            state => Err(MpcError::WrongPhase {
                operation,
                expected,
                actual: state.phase(),
            }),
        }
    }

    fn fail(&mut self, phase: ProtocolPhase, err: MpcError) -> MpcError {
        error!("Protocol run aborted during {:?}: {}", phase, err);
        self.state = ProtocolState::Failed {
            phase,
            reason: err.to_string(),
        };
        err
    }

    /// `Setup -> KeySharing`: every participant generates and commits to a key
    /// share, then every commitment is delivered to every other participant.
    ///
    /// # Errors
    /// - `WrongPhase` outside `Setup`
    /// - any key generation error, which aborts the run
    pub fn setup_mpc_environment<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<()> {
        self.require_phase("setup_mpc_environment", ProtocolPhase::Setup)?;

        let generated: Result<Vec<KeyShareAnnouncement>> = if self.config.parallel {
            // Seeds are drawn up front so the outcome depends only on `rng`,
            // not on how rayon schedules the participants.
            let seeds: Vec<[u8; 32]> = self
                .participants
                .iter()
                .map(|_| {
                    let mut seed = [0u8; 32];
                    rng.fill_bytes(&mut seed);
                    seed
                })
                .collect();
            self.participants
                .par_iter_mut()
                .zip(seeds.into_par_iter())
                .map(|(participant, seed)| {
                    let mut participant_rng = StdRng::from_seed(seed);
                    participant.generate_key_share(&mut participant_rng)
                })
                .collect()
        } else {
            self.participants
                .iter_mut()
                .map(|participant| participant.generate_key_share(rng))
                .collect()
        };

        let announcements = match generated {
            Ok(announcements) => announcements,
            Err(e) => return Err(self.fail(ProtocolPhase::Setup, e)),
        };

        for announcement in &announcements {
            for participant in self.participants.iter_mut() {
                participant.receive_peer_commitment(
                    announcement.identity,
                    announcement.commitment,
                    announcement.nonce,
                );
            }
            debug!(
                "Distributed commitment {} of participant {}",
                announcement.commitment, announcement.identity
            );
        }

        info!(
            "Key sharing started: {} key shares committed and distributed",
            announcements.len()
        );
        self.state = ProtocolState::KeySharing { announcements };
        Ok(())
    }

    /// `KeySharing -> Verification`: every participant checks every other
    /// participant's revealed context against its commitment.
    ///
    /// Under [`VerificationPolicy::Abort`] the first mismatch (lowest verifier,
    /// then lowest subject) is returned and the run fails. Under
    /// [`VerificationPolicy::Exclude`] every rejected subject (a commitment
    /// mismatch or a key that is not a single fresh share) is dropped by all
    /// participants and the run continues. A missing commitment is an ordering
    /// fault and always fails the run.
    pub fn verify_key_shares(&mut self) -> Result<()> {
        self.require_phase("verify_key_shares", ProtocolPhase::KeySharing)?;
        let announcements = match std::mem::replace(&mut self.state, ProtocolState::Setup) {
            ProtocolState::KeySharing { announcements } => announcements,
            other => {
                self.state = other;
                return Err(MpcError::WrongPhase {
                    operation: "verify_key_shares",
                    expected: ProtocolPhase::KeySharing,
                    actual: self.phase(),
                });
            }
        };

        let stop_at_first = self.config.verification_policy == VerificationPolicy::Abort;
        let failures: Vec<MpcError> = if self.config.parallel {
            self.participants
                .par_iter_mut()
                .map(|verifier| verify_announcements(verifier, &announcements, stop_at_first))
                .collect::<Vec<_>>()
                .into_iter()
                .flatten()
                .collect()
        } else {
            self.participants
                .iter_mut()
                .flat_map(|verifier| verify_announcements(verifier, &announcements, stop_at_first))
                .collect()
        };

        let fatal = match self.config.verification_policy {
            VerificationPolicy::Abort => failures.first(),
            VerificationPolicy::Exclude => failures.iter().find(|e| rejected_peer(e).is_none()),
        };
        if let Some(err) = fatal {
            return Err(self.fail(ProtocolPhase::KeySharing, err.clone()));
        }

        let excluded: BTreeSet<ParticipantId> = failures.iter().filter_map(rejected_peer).collect();
        for id in &excluded {
            warn!("Excluding participant {} after a rejected key share", id);
            for participant in self.participants.iter_mut() {
                participant.forget_peer(*id);
            }
        }

        info!(
            "Key shares verified: {} accepted, {} excluded",
            self.participants.len() - excluded.len(),
            excluded.len()
        );
        self.state = ProtocolState::Verification {
            announcements,
            excluded,
        };
        Ok(())
    }

    /// `Verification -> Ready`: every remaining participant combines its own
    /// public key with those of its verified peers.
    ///
    /// The first successful combination becomes the combined context; only
    /// participants that arrived at the same key material count towards the
    /// threshold.
    ///
    /// # Errors
    /// - `WrongPhase` outside `Verification`
    /// - `InsufficientParticipants` if fewer than `threshold` participants
    ///   agree on a combined key; the run fails
    pub fn combine_keys(&mut self) -> Result<()> {
        self.require_phase("combine_keys", ProtocolPhase::Verification)?;
        let excluded = match &self.state {
            ProtocolState::Verification { excluded, .. } => excluded.clone(),
            _ => BTreeSet::new(),
        };

        let candidates: Vec<&Participant<E>> = self
            .participants
            .iter()
            .filter(|p| !excluded.contains(&p.identity()))
            .collect();
        let attempts: Vec<(ParticipantId, Result<E::PublicContext>)> = if self.config.parallel {
            candidates
                .par_iter()
                .map(|p| (p.identity(), p.combine_public_keys()))
                .collect()
        } else {
            candidates
                .iter()
                .map(|p| (p.identity(), p.combine_public_keys()))
                .collect()
        };

        let mut selected: Option<(ParticipantId, E::PublicContext)> = None;
        let mut agreeing = 0usize;
        for (id, attempt) in attempts {
            match attempt {
                Ok(combined) => match &selected {
                    None => {
                        selected = Some((id, combined));
                        agreeing += 1;
                    }
                    Some((_, reference)) => {
                        let expected = self.engine.fingerprint(reference);
                        if expected == self.engine.fingerprint(&combined) {
                            agreeing += 1;
                        } else {
                            warn!("Participant {} combined a diverging key; not counted", id);
                        }
                    }
                },
                Err(e) => warn!("Participant {} could not combine keys: {}", id, e),
            }
        }

        if agreeing < self.threshold {
            let err = MpcError::InsufficientParticipants {
                available: agreeing,
                threshold: self.threshold,
            };
            return Err(self.fail(ProtocolPhase::Verification, err));
        }
        let Some((reference_id, combined)) = selected else {
            let err = MpcError::InsufficientParticipants {
                available: 0,
                threshold: self.threshold,
            };
            return Err(self.fail(ProtocolPhase::Verification, err));
        };

        let reference = &self.participants[reference_id];
        let mut key_holders: Vec<ParticipantId> = std::iter::once(reference_id)
            .chain(reference.verified_peers())
            .collect();
        key_holders.sort_unstable();

        let announcements = match std::mem::replace(&mut self.state, ProtocolState::Setup) {
            ProtocolState::Verification { announcements, .. } => announcements,
            _ => Vec::new(),
        };
        info!(
            "Protocol ready: {} of {} participants agree on the combined key",
            agreeing,
            self.participants.len()
        );
        self.state = ProtocolState::Ready {
            announcements,
            combined: Arc::new(combined),
            key_holders,
        };
        Ok(())
    }

    /// Runs setup, verification and combination back to back.
    pub fn establish<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<()> {
        self.setup_mpc_environment(rng)?;
        self.verify_key_shares()?;
        self.combine_keys()
    }

    /// Encrypts under the combined public key.
    ///
    /// # Errors
    /// Returns `NotReady` before the run reached `Ready`
    pub fn encrypt<R: RngCore + CryptoRng>(
        &self,
        plaintext: &[f64],
        rng: &mut R,
    ) -> Result<E::Ciphertext> {
        match &self.state {
            ProtocolState::Ready { combined, .. } => {
                Ok(self.engine.encrypt(&**combined, plaintext, rng)?)
            }
            state => Err(MpcError::NotReady(state.phase())),
        }
    }

    /// Decrypts a ciphertext produced under the combined key.
    ///
    /// `contributing` is an authorization gate: it must name at least
    /// `threshold` distinct key holders. The decryption itself gathers a share
    /// from every key holder, since the combined key is additive over all of them.
    ///
    /// # Errors
    /// - `NotReady` before `Ready`
    /// - `UnknownParticipant` for an identity outside this run
    /// - `InsufficientAuthorization` if too few distinct key holders are named
    /// - engine errors, e.g. a ciphertext from another context
    pub fn decrypt<R: RngCore + CryptoRng>(
        &self,
        ciphertext: &E::Ciphertext,
        contributing: &[ParticipantId],
        rng: &mut R,
    ) -> Result<Vec<f64>> {
        let (combined, key_holders) = match &self.state {
            ProtocolState::Ready {
                combined,
                key_holders,
                ..
            } => (combined, key_holders),
            state => return Err(MpcError::NotReady(state.phase())),
        };

        if let Some(unknown) = contributing.iter().find(|id| **id >= self.participants.len()) {
            return Err(MpcError::UnknownParticipant(*unknown));
        }
        let authorized: BTreeSet<ParticipantId> = contributing
            .iter()
            .copied()
            .filter(|id| key_holders.contains(id))
            .collect();
        if authorized.len() < self.threshold {
            return Err(MpcError::InsufficientAuthorization {
                provided: authorized.len(),
                threshold: self.threshold,
            });
        }

        self.engine.link_context(ciphertext, &**combined)?;
        let shares = key_holders
            .iter()
            .map(|id| self.participants[*id].partial_decrypt(ciphertext, rng))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "Decrypting with {} shares, authorized by {:?}",
            shares.len(),
            authorized
        );
        Ok(self.engine.combine_decryption_shares(&**combined, ciphertext, &shares)?)
    }

    /// Encrypts each row of a matrix into its own ciphertext.
    pub fn encrypt_matrix<R: RngCore + CryptoRng>(
        &self,
        rows: &[Vec<f64>],
        rng: &mut R,
    ) -> Result<Vec<E::Ciphertext>> {
        rows.iter().map(|row| self.encrypt(row, rng)).collect()
    }

    pub fn decrypt_matrix<R: RngCore + CryptoRng>(
        &self,
        ciphertexts: &[E::Ciphertext],
        contributing: &[ParticipantId],
        rng: &mut R,
    ) -> Result<Vec<Vec<f64>>> {
        ciphertexts
            .iter()
            .map(|ct| self.decrypt(ct, contributing, rng))
            .collect()
    }

    /// Packs ciphertexts and the identities authorizing their decryption into
    /// a message for the key holders.
    pub fn decryption_request(
        &self,
        ciphertexts: &[E::Ciphertext],
        contributing: &[ParticipantId],
    ) -> Result<ProtocolMessage> {
        Ok(ProtocolMessage::DecryptionRequest {
            ciphertext: self.engine.serialize_ciphertexts(ciphertexts)?,
            contributing: contributing.to_vec(),
        })
    }

    /// Opens every ciphertext of a [`ProtocolMessage::DecryptionRequest`],
    /// under the same authorization rules as [`Coordinator::decrypt`].
    ///
    /// # Errors
    /// - `UnexpectedMessage` for any other message kind
    /// - engine errors if the ciphertext batch does not decode
    /// - every error of [`Coordinator::decrypt`]
    pub fn handle_decryption_request<R: RngCore + CryptoRng>(
        &self,
        message: &ProtocolMessage,
        rng: &mut R,
    ) -> Result<Vec<Vec<f64>>> {
        let ProtocolMessage::DecryptionRequest {
            ciphertext,
            contributing,
        } = message
        else {
            return Err(MpcError::UnexpectedMessage {
                expected: "decryption request",
            });
        };
        let ciphertexts = self.engine.deserialize_ciphertexts(ciphertext)?;
        debug!(
            "Handling decryption request for {} ciphertexts from {:?}",
            ciphertexts.len(),
            contributing
        );
        self.decrypt_matrix(&ciphertexts, contributing, rng)
    }

    /// Discards the run and starts over in `Setup` with fresh participants.
    pub fn reset(&mut self) {
        info!("Resetting protocol run (was {:?})", self.phase());
        self.participants = Self::fresh_participants(&self.engine, self.config.participants);
        self.state = ProtocolState::Setup;
    }
}

/// The peer whose key share was rejected on its merits, as opposed to an
/// ordering fault.
fn rejected_peer(err: &MpcError) -> Option<ParticipantId> {
    match err {
        MpcError::CommitmentMismatch { peer, .. } | MpcError::InvalidKeyShare { peer, .. } => {
            Some(*peer)
        }
        _ => None,
    }
}

/// Verifies every announcement other than the verifier's own, in identity order.
fn verify_announcements<E: HomomorphicEngine>(
    verifier: &mut Participant<E>,
    announcements: &[KeyShareAnnouncement],
    stop_at_first: bool,
) -> Vec<MpcError> {
    let mut failures = Vec::new();
    for announcement in announcements {
        if announcement.identity == verifier.identity() {
            continue;
        }
        match verifier.verify_peer_key_share(announcement.identity, &announcement.public_context) {
            Ok(()) => debug!(
                "Participant {} verified participant {}",
                verifier.identity(),
                announcement.identity
            ),
            Err(e) => {
                warn!("{}", e);
                failures.push(e);
                if stop_at_first {
                    break;
                }
            }
        }
    }
    failures
}

impl<E: HomomorphicEngine> std::fmt::Debug for Coordinator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("participants", &self.participants.len())
            .field("threshold", &self.threshold)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::{commit_bytes, Nonce};
    use crate::engine::RlweEngine;
    use crate::test_support::{assert_close, init_tracing, seeded_rng, test_engine};

    fn coordinator(config: CoordinatorConfig) -> Coordinator<RlweEngine> {
        init_tracing();
        Coordinator::new(Arc::new(test_engine(256)), config).unwrap()
    }

    /// Replaces the announced context of `target` with a different, well-formed
    /// one after commitments went out.
    fn tamper(coordinator: &mut Coordinator<RlweEngine>, target: ParticipantId, seed: u64) {
        let mut rng = seeded_rng(seed);
        let mut impostor = Participant::new(target, coordinator.engine.clone());
        let swapped = impostor.generate_key_share(&mut rng).unwrap();
        match &mut coordinator.state {
            ProtocolState::KeySharing { announcements } => {
                announcements[target].public_context = swapped.public_context;
            }
            _ => panic!("tampering is only possible during key sharing"),
        }
    }

    /// Rewrites the share counter in the context `target` announced and
    /// redistributes a valid commitment to the forged bytes.
    fn announce_share_count(
        coordinator: &mut Coordinator<RlweEngine>,
        target: ParticipantId,
        shares: u32,
        seed: u64,
    ) {
        let mut rng = seeded_rng(seed);
        let ProtocolState::KeySharing { announcements } = &mut coordinator.state else {
            panic!("forging is only possible during key sharing");
        };
        let announcement = &mut announcements[target];
        let at = announcement.public_context.len() - 4;
        announcement.public_context[at..].copy_from_slice(&shares.to_le_bytes());
        announcement.nonce = Nonce::random(&mut rng);
        announcement.commitment =
            commit_bytes(target, &announcement.public_context, &announcement.nonce);

        let (commitment, nonce) = (announcement.commitment, announcement.nonce);
        for participant in coordinator.participants.iter_mut() {
            if participant.identity() != target {
                participant.forget_peer(target);
                participant.receive_peer_commitment(target, commitment, nonce);
            }
        }
    }

    #[test]
    fn test_three_party_round_trip() {
        let mut rng = seeded_rng(100);
        let mut coordinator = coordinator(CoordinatorConfig::new(3).with_threshold(2));
        assert_eq!(coordinator.phase(), ProtocolPhase::Setup);

        coordinator.setup_mpc_environment(&mut rng).unwrap();
        assert_eq!(coordinator.phase(), ProtocolPhase::KeySharing);
        assert_eq!(coordinator.key_share_announcements().len(), 3);
        coordinator.verify_key_shares().unwrap();
        assert_eq!(coordinator.phase(), ProtocolPhase::Verification);
        coordinator.combine_keys().unwrap();
        assert_eq!(coordinator.phase(), ProtocolPhase::Ready);
        assert_eq!(coordinator.key_holders(), &[0, 1, 2]);

        let plaintext = [1.0, 2.0, 3.0];
        let ciphertext = coordinator.encrypt(&plaintext, &mut rng).unwrap();
        let decrypted = coordinator.decrypt(&ciphertext, &[0, 1], &mut rng).unwrap();
        assert_close(&decrypted, &plaintext, 1e-3);

        assert_eq!(
            coordinator.decrypt(&ciphertext, &[0], &mut rng).unwrap_err(),
            MpcError::InsufficientAuthorization {
                provided: 1,
                threshold: 2
            }
        );
    }

    #[test]
    fn test_sequential_and_parallel_runs_both_reach_ready() {
        for parallel in [false, true] {
            let mut rng = seeded_rng(101);
            let mut coordinator = coordinator(CoordinatorConfig::new(4).with_parallel(parallel));
            coordinator.establish(&mut rng).unwrap();
            assert_eq!(coordinator.threshold(), 3);

            let ciphertext = coordinator.encrypt(&[-4.5, 0.25], &mut rng).unwrap();
            let decrypted = coordinator.decrypt(&ciphertext, &[1, 2, 3], &mut rng).unwrap();
            assert_close(&decrypted, &[-4.5, 0.25], 1e-3);
        }
    }

    #[test]
    fn test_every_participant_derives_the_same_combined_key() {
        let mut rng = seeded_rng(102);
        let mut coordinator = coordinator(CoordinatorConfig::new(4));
        coordinator.establish(&mut rng).unwrap();

        let engine = coordinator.engine().clone();
        let selected = engine.fingerprint(coordinator.combined_context().unwrap());
        for participant in coordinator.participants() {
            let combined = participant.combine_public_keys().unwrap();
            assert_eq!(engine.fingerprint(&combined), selected);
        }
    }

    #[test]
    fn test_duplicate_contributors_count_once() {
        let mut rng = seeded_rng(103);
        let mut coordinator = coordinator(CoordinatorConfig::new(3));
        coordinator.establish(&mut rng).unwrap();
        let ciphertext = coordinator.encrypt(&[1.0], &mut rng).unwrap();

        assert_eq!(
            coordinator.decrypt(&ciphertext, &[2, 2, 2], &mut rng).unwrap_err(),
            MpcError::InsufficientAuthorization {
                provided: 1,
                threshold: 2
            }
        );
        assert_eq!(
            coordinator.decrypt(&ciphertext, &[0, 7], &mut rng).unwrap_err(),
            MpcError::UnknownParticipant(7)
        );
    }

    #[test]
    fn test_operations_out_of_phase() {
        let mut rng = seeded_rng(104);
        let mut coordinator = coordinator(CoordinatorConfig::new(3));

        assert_eq!(
            coordinator.verify_key_shares().unwrap_err(),
            MpcError::WrongPhase {
                operation: "verify_key_shares",
                expected: ProtocolPhase::KeySharing,
                actual: ProtocolPhase::Setup
            }
        );
        assert!(matches!(
            coordinator.combine_keys(),
            Err(MpcError::WrongPhase { .. })
        ));
        assert_eq!(
            coordinator.encrypt(&[1.0], &mut rng).unwrap_err(),
            MpcError::NotReady(ProtocolPhase::Setup)
        );

        // a rejected call does not disturb the run
        assert_eq!(coordinator.phase(), ProtocolPhase::Setup);
        coordinator.setup_mpc_environment(&mut rng).unwrap();
        assert!(matches!(
            coordinator.setup_mpc_environment(&mut rng),
            Err(MpcError::WrongPhase { .. })
        ));
        assert!(matches!(
            coordinator.combine_keys(),
            Err(MpcError::WrongPhase { .. })
        ));
        coordinator.verify_key_shares().unwrap();
        coordinator.combine_keys().unwrap();
    }

    #[test]
    fn test_tampered_share_aborts_run() {
        let mut rng = seeded_rng(105);
        let mut coordinator = coordinator(CoordinatorConfig::new(3));
        coordinator.setup_mpc_environment(&mut rng).unwrap();
        tamper(&mut coordinator, 1, 9);

        assert_eq!(
            coordinator.verify_key_shares().unwrap_err(),
            MpcError::CommitmentMismatch { verifier: 0, peer: 1 }
        );
        assert_eq!(coordinator.phase(), ProtocolPhase::Failed);
        assert!(matches!(
            coordinator.combine_keys(),
            Err(MpcError::Aborted {
                phase: ProtocolPhase::KeySharing,
                ..
            })
        ));
        assert_eq!(
            coordinator.encrypt(&[1.0], &mut rng).unwrap_err(),
            MpcError::NotReady(ProtocolPhase::Failed)
        );

        coordinator.reset();
        assert_eq!(coordinator.phase(), ProtocolPhase::Setup);
        coordinator.establish(&mut rng).unwrap();
        assert_eq!(coordinator.phase(), ProtocolPhase::Ready);
    }

    #[test]
    fn test_exclusion_below_threshold_is_insufficient() {
        let mut rng = seeded_rng(106);
        let mut coordinator = coordinator(
            CoordinatorConfig::new(3)
                .with_threshold(3)
                .with_policy(VerificationPolicy::Exclude),
        );
        coordinator.setup_mpc_environment(&mut rng).unwrap();
        tamper(&mut coordinator, 2, 10);

        coordinator.verify_key_shares().unwrap();
        assert_eq!(coordinator.excluded(), vec![2]);

        assert_eq!(
            coordinator.combine_keys().unwrap_err(),
            MpcError::InsufficientParticipants {
                available: 2,
                threshold: 3
            }
        );
        assert_ne!(coordinator.phase(), ProtocolPhase::Ready);
        assert!(coordinator.combined_context().is_none());
    }

    #[test]
    fn test_exclusion_above_threshold_continues() {
        let mut rng = seeded_rng(107);
        let mut coordinator = coordinator(
            CoordinatorConfig::new(4).with_policy(VerificationPolicy::Exclude),
        );
        coordinator.setup_mpc_environment(&mut rng).unwrap();
        tamper(&mut coordinator, 0, 11);
        coordinator.verify_key_shares().unwrap();
        coordinator.combine_keys().unwrap();

        assert_eq!(coordinator.key_holders(), &[1, 2, 3]);
        assert_eq!(coordinator.excluded(), vec![0]);

        let ciphertext = coordinator.encrypt(&[8.0, -1.0], &mut rng).unwrap();
        let decrypted = coordinator.decrypt(&ciphertext, &[1, 2, 3], &mut rng).unwrap();
        assert_close(&decrypted, &[8.0, -1.0], 1e-3);

        // the excluded participant does not count towards authorization
        assert!(matches!(
            coordinator.decrypt(&ciphertext, &[0, 1, 2], &mut rng),
            Err(MpcError::InsufficientAuthorization { provided: 2, .. })
        ));
    }

    #[test]
    fn test_pre_combined_share_aborts_run() {
        let mut rng = seeded_rng(110);
        let mut coordinator = coordinator(CoordinatorConfig::new(3));
        coordinator.setup_mpc_environment(&mut rng).unwrap();
        announce_share_count(&mut coordinator, 2, u32::MAX, 12);

        assert_eq!(
            coordinator.verify_key_shares().unwrap_err(),
            MpcError::InvalidKeyShare { verifier: 0, peer: 2 }
        );
        assert_eq!(coordinator.phase(), ProtocolPhase::Failed);
    }

    #[test]
    fn test_pre_combined_share_is_excluded() {
        let mut rng = seeded_rng(111);
        let mut coordinator = coordinator(
            CoordinatorConfig::new(4).with_policy(VerificationPolicy::Exclude),
        );
        coordinator.setup_mpc_environment(&mut rng).unwrap();
        announce_share_count(&mut coordinator, 3, 2, 13);

        coordinator.verify_key_shares().unwrap();
        assert_eq!(coordinator.excluded(), vec![3]);
        coordinator.combine_keys().unwrap();
        assert_eq!(coordinator.key_holders(), &[0, 1, 2]);

        let ciphertext = coordinator.encrypt(&[2.5, -3.0], &mut rng).unwrap();
        let decrypted = coordinator.decrypt(&ciphertext, &[0, 1, 2], &mut rng).unwrap();
        assert_close(&decrypted, &[2.5, -3.0], 1e-3);
    }

    #[test]
    fn test_missing_commitment_fails_run_under_exclusion() {
        let mut rng = seeded_rng(112);
        let mut coordinator = coordinator(
            CoordinatorConfig::new(3).with_policy(VerificationPolicy::Exclude),
        );
        coordinator.setup_mpc_environment(&mut rng).unwrap();
        coordinator.participants[0].forget_peer(1);

        assert_eq!(
            coordinator.verify_key_shares().unwrap_err(),
            MpcError::MissingCommitment { verifier: 0, peer: 1 }
        );
        assert_eq!(coordinator.phase(), ProtocolPhase::Failed);
        assert!(coordinator.excluded().is_empty());
    }

    #[test]
    fn test_decryption_request_over_the_wire() {
        let mut rng = seeded_rng(113);
        let mut coordinator = coordinator(CoordinatorConfig::new(3));
        coordinator.establish(&mut rng).unwrap();

        let rows = vec![vec![1.5, -2.0], vec![0.75]];
        let ciphertexts = coordinator.encrypt_matrix(&rows, &mut rng).unwrap();
        let request = coordinator.decryption_request(&ciphertexts, &[1, 2]).unwrap();
        let received = ProtocolMessage::from_bytes(&request.to_bytes().unwrap()).unwrap();

        let decrypted = coordinator.handle_decryption_request(&received, &mut rng).unwrap();
        assert_eq!(decrypted.len(), rows.len());
        for (row, expected) in decrypted.iter().zip(&rows) {
            assert_close(row, expected, 1e-3);
        }

        let underauthorized = coordinator.decryption_request(&ciphertexts, &[1]).unwrap();
        assert_eq!(
            coordinator
                .handle_decryption_request(&underauthorized, &mut rng)
                .unwrap_err(),
            MpcError::InsufficientAuthorization {
                provided: 1,
                threshold: 2
            }
        );

        let announcement = ProtocolMessage::from(coordinator.key_share_announcements()[0].clone());
        assert_eq!(
            coordinator
                .handle_decryption_request(&announcement, &mut rng)
                .unwrap_err(),
            MpcError::UnexpectedMessage {
                expected: "decryption request"
            }
        );
    }

    #[test]
    fn test_foreign_ciphertext_is_rejected() {
        let mut rng = seeded_rng(108);
        let mut first = coordinator(CoordinatorConfig::new(2));
        let mut second = coordinator(CoordinatorConfig::new(2));
        first.establish(&mut rng).unwrap();
        second.establish(&mut rng).unwrap();

        let ciphertext = first.encrypt(&[1.0], &mut rng).unwrap();
        assert!(matches!(
            second.decrypt(&ciphertext, &[0, 1], &mut rng),
            Err(MpcError::Engine(_))
        ));
    }

    #[test]
    fn test_matrix_round_trip() {
        let mut rng = seeded_rng(109);
        let mut coordinator = coordinator(CoordinatorConfig::new(3));
        coordinator.establish(&mut rng).unwrap();

        let rows = vec![vec![0.1, 0.2, 0.3], vec![-1.0, 5.5], vec![]];
        let ciphertexts = coordinator.encrypt_matrix(&rows, &mut rng).unwrap();
        let decrypted = coordinator.decrypt_matrix(&ciphertexts, &[0, 2], &mut rng).unwrap();
        assert_eq!(decrypted.len(), rows.len());
        for (row, expected) in decrypted.iter().zip(&rows) {
            assert_close(row, expected, 1e-3);
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let engine = Arc::new(test_engine(64));
        assert!(matches!(
            Coordinator::new(engine.clone(), CoordinatorConfig::new(1)),
            Err(MpcError::InvalidConfig(_))
        ));
        assert!(matches!(
            Coordinator::new(engine, CoordinatorConfig::new(3).with_threshold(4)),
            Err(MpcError::InvalidConfig(_))
        ));
    }
}
