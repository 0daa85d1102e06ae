//! Layered encryption across independent keys
//!
//! Every participant keeps its own keypair; nothing is shared or committed.
//! Layer 0 encrypts the plaintext under participant 0. Each following layer
//! serializes the previous layer's ciphertexts, packs the bytes into slots and
//! encrypts them under the next participant. Unwinding goes in exact reverse.
//!
//! Packing puts three bytes in each slot (values below 2^24) behind a two-slot
//! length header, so every packed slot survives the approximate encoding
//! exactly after rounding.
//!
//! # Ciphertext growth
//!
//! Layers are not free. With [`RlweEngine`](crate::engine::RlweEngine) a
//! ciphertext over a degree-`n` ring serializes to two polynomials of `n`
//! 64-bit coefficients (about `16n` bytes), which pack into about `16n / 3`
//! slots, i.e. five to six ciphertexts of `n` slots. Every layer therefore
//! multiplies the ciphertext count by roughly 5.4, so `k` layers over one
//! plaintext ciphertext produce on the order of `5.4^(k-1)` ciphertexts.
//! Keep chains short, or pick a small ring degree when a chain has to be
//! long.

use rand::{CryptoRng, RngCore};
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::{EngineError, HomomorphicEngine};
use crate::error::{MpcError, Result};
use crate::participant::{Participant, ParticipantId};

const BYTES_PER_SLOT: usize = 3;
const SLOT_BITS: u32 = 24;
const HEADER_SLOTS: usize = 2;

/// Output of [`ChainCoordinator::chain_encrypt`]: the outermost layer's
/// ciphertexts and the order the layers were applied in.
pub struct LayeredCiphertext<E: HomomorphicEngine> {
    ciphertexts: Vec<E::Ciphertext>,
    encryption_order: Vec<ParticipantId>,
}

impl<E: HomomorphicEngine> LayeredCiphertext<E> {
    pub fn ciphertexts(&self) -> &[E::Ciphertext] {
        &self.ciphertexts
    }

    pub fn encryption_order(&self) -> &[ParticipantId] {
        &self.encryption_order
    }

    pub fn layer_count(&self) -> usize {
        self.encryption_order.len()
    }
}

impl<E: HomomorphicEngine> Clone for LayeredCiphertext<E> {
    fn clone(&self) -> Self {
        Self {
            ciphertexts: self.ciphertexts.clone(),
            encryption_order: self.encryption_order.clone(),
        }
    }
}

impl<E: HomomorphicEngine> std::fmt::Debug for LayeredCiphertext<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredCiphertext")
            .field("ciphertexts", &self.ciphertexts.len())
            .field("encryption_order", &self.encryption_order)
            .finish()
    }
}

/// Drives layered encryption over participants that each hold an
/// independent key. See the module docs for how fast layers grow.
pub struct ChainCoordinator<E: HomomorphicEngine> {
    engine: Arc<E>,
    participants: Vec<Participant<E>>,
    encryption_order: Vec<ParticipantId>,
}

impl<E: HomomorphicEngine> ChainCoordinator<E> {
    /// Creates `participants` layer holders, identified `0..participants` in
    /// layering order.
    pub fn new(engine: Arc<E>, participants: usize) -> Result<Self> {
        if participants == 0 {
            return Err(MpcError::InvalidConfig(
                "a chain needs at least one participant".to_string(),
            ));
        }
        let participants = (0..participants)
            .map(|id| Participant::new(id, engine.clone()))
            .collect();
        Ok(Self {
            engine,
            participants,
            encryption_order: Vec::new(),
        })
    }

    pub fn participants(&self) -> &[Participant<E>] {
        &self.participants
    }

    /// Order in which the most recent `chain_encrypt` applied its layers.
    pub fn encryption_order(&self) -> &[ParticipantId] {
        &self.encryption_order
    }

    /// Gives every participant its own independent keypair.
    pub fn setup<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<()> {
        for participant in self.participants.iter_mut() {
            participant.generate_keys(rng)?;
        }
        info!("Chain of {} independent layers established", self.participants.len());
        Ok(())
    }

    /// Applies every participant's layer in list order.
    ///
    /// # Errors
    /// - `LayerNotEstablished` if `setup` has not run
    /// - engine errors, e.g. a plaintext value that cannot be encoded
    pub fn chain_encrypt<R: RngCore + CryptoRng>(
        &mut self,
        plaintext: &[f64],
        rng: &mut R,
    ) -> Result<LayeredCiphertext<E>> {
        let mut order = Vec::with_capacity(self.participants.len());
        let mut ciphertexts = Vec::new();

        for participant in &self.participants {
            let values = if order.is_empty() {
                plaintext.to_vec()
            } else {
                pack_bytes(&self.engine.serialize_ciphertexts(&ciphertexts)?)
            };
            ciphertexts = self.encrypt_chunks(participant, &values, rng)?;
            order.push(participant.identity());
            debug!(
                "Layer {} applied by participant {}: {} ciphertexts",
                order.len() - 1,
                participant.identity(),
                ciphertexts.len()
            );
        }

        self.encryption_order = order.clone();
        Ok(LayeredCiphertext {
            ciphertexts,
            encryption_order: order,
        })
    }

    fn encrypt_chunks<R: RngCore + CryptoRng>(
        &self,
        participant: &Participant<E>,
        values: &[f64],
        rng: &mut R,
    ) -> Result<Vec<E::Ciphertext>> {
        if values.is_empty() {
            return Ok(vec![participant.encrypt_layer(&[], rng)?]);
        }
        values
            .chunks(self.engine.slot_count())
            .map(|chunk| participant.encrypt_layer(chunk, rng))
            .collect()
    }

    /// Removes the layers in reverse of the recorded encryption order.
    ///
    /// # Errors
    /// - `EmptyChain` if nothing has been encrypted yet
    /// - `LayerNotEstablished` if a layer's participant has no keys
    pub fn chain_decrypt(&self, layered: &LayeredCiphertext<E>) -> Result<Vec<f64>> {
        let unwind: Vec<ParticipantId> = self.encryption_order.iter().rev().copied().collect();
        self.decrypt_layers(layered, &unwind)
    }

    /// Removes layers in the given order, outermost first.
    ///
    /// Any order other than the exact reverse of the encryption order fails
    /// with a context mismatch or a decoding error.
    pub fn decrypt_layers(
        &self,
        layered: &LayeredCiphertext<E>,
        order: &[ParticipantId],
    ) -> Result<Vec<f64>> {
        let Some((innermost, outer)) = order.split_last() else {
            return Err(MpcError::EmptyChain);
        };

        let mut ciphertexts = layered.ciphertexts.clone();
        for id in outer {
            let packed = self.decrypt_all(*id, &ciphertexts)?;
            ciphertexts = self.engine.deserialize_ciphertexts(&unpack_bytes(&packed)?)?;
            debug!("Participant {} removed its layer", id);
        }
        self.decrypt_all(*innermost, &ciphertexts)
    }

    fn decrypt_all(&self, id: ParticipantId, ciphertexts: &[E::Ciphertext]) -> Result<Vec<f64>> {
        let participant = self
            .participants
            .get(id)
            .ok_or(MpcError::UnknownParticipant(id))?;
        let mut values = Vec::new();
        for ciphertext in ciphertexts {
            values.extend(participant.decrypt_layer(ciphertext)?);
        }
        Ok(values)
    }
}

fn pack_bytes(bytes: &[u8]) -> Vec<f64> {
    let len = bytes.len() as u64;
    let mask = (1u64 << SLOT_BITS) - 1;
    let mut values = Vec::with_capacity(HEADER_SLOTS + bytes.len().div_ceil(BYTES_PER_SLOT));
    values.push((len & mask) as f64);
    values.push((len >> SLOT_BITS) as f64);
    for chunk in bytes.chunks(BYTES_PER_SLOT) {
        let word = chunk
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)));
        values.push(f64::from(word));
    }
    values
}

fn unpack_bytes(values: &[f64]) -> Result<Vec<u8>> {
    let slot = |v: f64| -> Result<u64> {
        let rounded = v.round();
        if (v - rounded).abs() > 0.25 || rounded < 0.0 || rounded >= f64::from(1u32 << SLOT_BITS) {
            let reason = format!("slot value {} is not a packed byte group", v);
            return Err(EngineError::Decoding(reason).into());
        }
        Ok(rounded as u64)
    };

    if values.len() < HEADER_SLOTS {
        let reason = "packed layer is missing its length header".to_string();
        return Err(EngineError::Decoding(reason).into());
    }
    let len = (slot(values[0])? | (slot(values[1])? << SLOT_BITS)) as usize;
    let body = &values[HEADER_SLOTS..];
    if len > body.len() * BYTES_PER_SLOT {
        return Err(EngineError::Decoding(format!(
            "packed layer claims {} bytes but holds at most {}",
            len,
            body.len() * BYTES_PER_SLOT
        ))
        .into());
    }

    let mut bytes = Vec::with_capacity(len);
    for v in body {
        let word = slot(*v)?;
        for i in 0..BYTES_PER_SLOT {
            bytes.push((word >> (8 * i)) as u8);
        }
    }
    bytes.truncate(len);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RlweEngine;
    use crate::test_support::{assert_close, init_tracing, seeded_rng, test_engine};

    fn chain(n: usize) -> ChainCoordinator<RlweEngine> {
        init_tracing();
        ChainCoordinator::new(Arc::new(test_engine(64)), n).unwrap()
    }

    #[test]
    fn test_chain_round_trip() {
        let mut rng = seeded_rng(200);
        let mut chain = chain(3);
        chain.setup(&mut rng).unwrap();

        let plaintext = vec![1.0, -2.0, 3.5, 0.125];
        let layered = chain.chain_encrypt(&plaintext, &mut rng).unwrap();
        assert_eq!(layered.encryption_order(), &[0, 1, 2]);
        assert_eq!(chain.encryption_order(), &[0, 1, 2]);

        let decrypted = chain.chain_decrypt(&layered).unwrap();
        assert_close(&decrypted, &plaintext, 1e-3);
    }

    #[test]
    fn test_plaintext_longer_than_one_ciphertext() {
        let mut rng = seeded_rng(201);
        let mut chain = chain(2);
        chain.setup(&mut rng).unwrap();

        let plaintext: Vec<f64> = (0..150).map(|i| i as f64 * 0.5).collect();
        let layered = chain.chain_encrypt(&plaintext, &mut rng).unwrap();
        assert_close(&chain.chain_decrypt(&layered).unwrap(), &plaintext, 1e-3);
    }

    #[test]
    fn test_single_layer_chain() {
        let mut rng = seeded_rng(202);
        let mut chain = chain(1);
        chain.setup(&mut rng).unwrap();
        let layered = chain.chain_encrypt(&[42.0], &mut rng).unwrap();
        assert_eq!(layered.layer_count(), 1);
        assert_close(&chain.chain_decrypt(&layered).unwrap(), &[42.0], 1e-3);
    }

    #[test]
    fn test_out_of_order_unwind_never_yields_plaintext() {
        let mut rng = seeded_rng(203);
        let mut chain = chain(3);
        chain.setup(&mut rng).unwrap();
        let layered = chain.chain_encrypt(&[1.0, 2.0], &mut rng).unwrap();

        for order in [[0, 1, 2], [1, 2, 0], [2, 0, 1], [2, 2, 0]] {
            assert!(matches!(
                chain.decrypt_layers(&layered, &order),
                Err(MpcError::Engine(_))
            ));
        }
        // stopping one layer early leaves packed ciphertext bytes, not the plaintext
        let partial = chain.decrypt_layers(&layered, &[2, 1]).unwrap();
        assert_ne!(partial.len(), 2);
        assert_close(&chain.decrypt_layers(&layered, &[2, 1, 0]).unwrap(), &[1.0, 2.0], 1e-3);
    }

    #[test]
    fn test_decrypt_before_encrypt_is_empty_chain() {
        let mut rng = seeded_rng(204);
        let mut chain = chain(2);
        chain.setup(&mut rng).unwrap();
        let other = {
            let mut other = self::chain(2);
            other.setup(&mut rng).unwrap();
            other.chain_encrypt(&[1.0], &mut rng).unwrap()
        };
        assert_eq!(chain.chain_decrypt(&other).unwrap_err(), MpcError::EmptyChain);
        assert_eq!(chain.decrypt_layers(&other, &[]).unwrap_err(), MpcError::EmptyChain);
    }

    #[test]
    fn test_layers_need_setup() {
        let mut rng = seeded_rng(205);
        let mut chain = chain(2);
        assert_eq!(
            chain.chain_encrypt(&[1.0], &mut rng).unwrap_err(),
            MpcError::LayerNotEstablished(0)
        );
        assert!(chain.encryption_order().is_empty());
    }

    #[test]
    fn test_unknown_layer_holder() {
        let mut rng = seeded_rng(206);
        let mut chain = chain(2);
        chain.setup(&mut rng).unwrap();
        let layered = chain.chain_encrypt(&[1.0], &mut rng).unwrap();
        assert_eq!(
            chain.decrypt_layers(&layered, &[5, 0]).unwrap_err(),
            MpcError::UnknownParticipant(5)
        );
    }

    #[test]
    fn test_packing_round_trip_and_rejects_garbage() {
        let bytes: Vec<u8> = (0..=255u8).chain([0, 0, 7]).collect();
        let packed = pack_bytes(&bytes);
        assert_eq!(packed.len(), HEADER_SLOTS + bytes.len().div_ceil(BYTES_PER_SLOT));
        assert_eq!(unpack_bytes(&packed).unwrap(), bytes);

        assert!(unpack_bytes(&[1.0]).is_err());
        assert!(unpack_bytes(&[3.0, 0.0, 1.4]).is_err());
        assert!(unpack_bytes(&[9.0, 0.0, 1.0]).is_err());
        assert!(unpack_bytes(&[1.0, 0.0, -1.0]).is_err());
    }
}
