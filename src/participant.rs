//! A single protocol actor.
//!
//! A participant owns exactly one secret key share (inside its local context)
//! and never hands it out. What leaves the participant is its public context,
//! the commitment/nonce pair binding it, decryption shares and ciphertexts.

use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::commitment::{create_commitment, verify_commitment, Commitment, Nonce};
use crate::engine::HomomorphicEngine;
use crate::error::{MpcError, Result};
use crate::messages::KeyShareAnnouncement;

/// Participant identifier, unique within one protocol run.
pub type ParticipantId = usize;

pub struct Participant<E: HomomorphicEngine> {
    identity: ParticipantId,
    engine: Arc<E>,
    local_context: Option<E::SecretContext>,
    public_context: Option<E::PublicContext>,
    peer_commitments: HashMap<ParticipantId, Commitment>,
    peer_nonces: HashMap<ParticipantId, Nonce>,
    verified_peer_contexts: BTreeMap<ParticipantId, E::PublicContext>,
}

impl<E: HomomorphicEngine> Participant<E> {
    pub fn new(identity: ParticipantId, engine: Arc<E>) -> Self {
        Self {
            identity,
            engine,
            local_context: None,
            public_context: None,
            peer_commitments: HashMap::new(),
            peer_nonces: HashMap::new(),
            verified_peer_contexts: BTreeMap::new(),
        }
    }

    pub fn identity(&self) -> ParticipantId {
        self.identity
    }

    pub fn public_context(&self) -> Option<&E::PublicContext> {
        self.public_context.as_ref()
    }

    /// Identities whose key shares passed commitment verification.
    pub fn verified_peers(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.verified_peer_contexts.keys().copied()
    }

    pub fn has_commitment_for(&self, peer: ParticipantId) -> bool {
        self.peer_commitments.contains_key(&peer) && self.peer_nonces.contains_key(&peer)
    }

    pub fn commitment_for(&self, peer: ParticipantId) -> Option<&Commitment> {
        self.peer_commitments.get(&peer)
    }

    /// Generates a fresh keypair without committing to it.
    ///
    /// # Errors
    /// Returns an error if the engine fails to generate a context
    pub fn generate_keys<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<&E::PublicContext> {
        if self.local_context.is_some() {
            warn!(
                "Participant {} regenerating keys; distributed commitments are now stale",
                self.identity
            );
        }
        let local = self.engine.generate_context(rng)?;
        let public = self.engine.to_public(&local);
        self.local_context = Some(local);
        let public = self.public_context.insert(public);
        Ok(&*public)
    }

    /// Generates a keypair and commits to its public context.
    ///
    /// The commitment and nonce are also stored under this participant's own
    /// identity. Call once per run.
    ///
    /// # Errors
    /// Returns an error if key generation or context serialization fails
    pub fn generate_key_share<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
    ) -> Result<KeyShareAnnouncement> {
        self.generate_keys(rng)?;
        let public = self
            .public_context
            .as_ref()
            .ok_or(MpcError::KeysNotGenerated(self.identity))?;

        let (commitment, nonce) =
            create_commitment(self.engine.as_ref(), self.identity, public, rng)?;
        let public_context = self.engine.serialize_context(public, true)?;
        self.peer_commitments.insert(self.identity, commitment);
        self.peer_nonces.insert(self.identity, nonce);

        debug!("Participant {} committed to {}", self.identity, commitment);
        Ok(KeyShareAnnouncement {
            identity: self.identity,
            public_context,
            commitment,
            nonce,
        })
    }

    /// Stores a peer's commitment and nonce.
    ///
    /// A no-op for this participant's own identity. The first commitment
    /// received for a peer is kept; a different later one is ignored.
    pub fn receive_peer_commitment(
        &mut self,
        peer: ParticipantId,
        commitment: Commitment,
        nonce: Nonce,
    ) {
        if peer == self.identity {
            return;
        }
        match self.peer_commitments.get(&peer) {
            Some(existing) if *existing != commitment => {
                warn!(
                    "Participant {} ignoring replacement commitment from participant {}",
                    self.identity, peer
                );
            }
            Some(_) => {}
            None => {
                self.peer_commitments.insert(peer, commitment);
                self.peer_nonces.insert(peer, nonce);
            }
        }
    }

    /// Checks a peer's revealed public context against its stored commitment
    /// and records the context on success.
    ///
    /// Verifying this participant's own identity trivially succeeds.
    ///
    /// # Errors
    /// - `MissingCommitment` if no commitment was received for `peer`
    /// - `CommitmentMismatch` if the revealed context does not open the
    ///   commitment (or cannot be decoded at all); nothing is recorded
    /// - `InvalidKeyShare` if the committed context carries no key or a key
    ///   that already folds several shares
    pub fn verify_peer_key_share(
        &mut self,
        peer: ParticipantId,
        serialized_context: &[u8],
    ) -> Result<()> {
        if peer == self.identity {
            return Ok(());
        }
        let stored = (self.peer_commitments.get(&peer), self.peer_nonces.get(&peer));
        let (commitment, nonce) = match stored {
            (Some(c), Some(n)) => (*c, *n),
            _ => {
                return Err(MpcError::MissingCommitment {
                    verifier: self.identity,
                    peer,
                })
            }
        };

        let mismatch = MpcError::CommitmentMismatch {
            verifier: self.identity,
            peer,
        };
        let context = match self.engine.deserialize_context(serialized_context) {
            Ok(context) => context,
            Err(e) => {
                warn!(
                    "Participant {} could not decode the context of participant {}: {}",
                    self.identity, peer, e
                );
                return Err(mismatch);
            }
        };
        if !verify_commitment(self.engine.as_ref(), peer, &context, &nonce, &commitment) {
            return Err(mismatch);
        }
        // a peer announces exactly its own share, never a pre-combined key
        let count = self
            .engine
            .public_key(&context)
            .map(|key| self.engine.contributor_count(key))
            .unwrap_or(0);
        if count != 1 {
            warn!(
                "Participant {} rejecting participant {}: key folds {} shares",
                self.identity, peer, count
            );
            return Err(MpcError::InvalidKeyShare {
                verifier: self.identity,
                peer,
            });
        }

        self.verified_peer_contexts.insert(peer, context);
        Ok(())
    }

    /// Drops everything known about `peer`.
    pub fn forget_peer(&mut self, peer: ParticipantId) {
        self.peer_commitments.remove(&peer);
        self.peer_nonces.remove(&peer);
        self.verified_peer_contexts.remove(&peer);
    }

    /// Folds every verified peer's public key into a copy of this
    /// participant's own public context.
    ///
    /// # Errors
    /// - `KeysNotGenerated` before `generate_key_share`
    /// - `NoVerifiedPeers` if no peer has been verified
    pub fn combine_public_keys(&self) -> Result<E::PublicContext> {
        let own = self
            .public_context
            .as_ref()
            .ok_or(MpcError::KeysNotGenerated(self.identity))?;
        if self.verified_peer_contexts.is_empty() {
            return Err(MpcError::NoVerifiedPeers(self.identity));
        }

        let mut combined = own.clone();
        for context in self.verified_peer_contexts.values() {
            let peer_key = self.engine.public_key(context)?;
            combined = self.engine.combine_public_keys(&combined, peer_key)?;
        }
        Ok(combined)
    }

    /// This participant's share of decrypting a ciphertext under a combined key.
    pub fn partial_decrypt<R: RngCore + CryptoRng>(
        &self,
        ciphertext: &E::Ciphertext,
        rng: &mut R,
    ) -> Result<E::DecryptionShare> {
        let local = self
            .local_context
            .as_ref()
            .ok_or(MpcError::KeysNotGenerated(self.identity))?;
        Ok(self.engine.partial_decrypt(local, ciphertext, rng)?)
    }

    /// Encrypts under this participant's own key only.
    pub fn encrypt_layer<R: RngCore + CryptoRng>(
        &self,
        plaintext: &[f64],
        rng: &mut R,
    ) -> Result<E::Ciphertext> {
        let public = self
            .public_context
            .as_ref()
            .ok_or(MpcError::LayerNotEstablished(self.identity))?;
        Ok(self.engine.encrypt(public, plaintext, rng)?)
    }

    pub fn decrypt_layer(&self, ciphertext: &E::Ciphertext) -> Result<Vec<f64>> {
        let local = self
            .local_context
            .as_ref()
            .ok_or(MpcError::LayerNotEstablished(self.identity))?;
        Ok(self.engine.decrypt(local, ciphertext)?)
    }
}

impl<E: HomomorphicEngine> std::fmt::Debug for Participant<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("identity", &self.identity)
            .field("has_keys", &self.local_context.is_some())
            .field("commitments", &self.peer_commitments.len())
            .field("verified_peers", &self.verified_peer_contexts.len())
            .finish()
    }
}
