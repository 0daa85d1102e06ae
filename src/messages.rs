//! Envelope types for carrying protocol data between participants
//!
//! The crate defines no transport. Callers moving the protocol over a network
//! encode these with [`ProtocolMessage::to_bytes`] and hand the bytes to
//! whatever channel they use.

use serde::{Deserialize, Serialize};

use crate::commitment::{Commitment, Nonce};
use crate::error::{MpcError, Result};
use crate::participant::ParticipantId;

/// What a participant broadcasts after generating its key share.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KeyShareAnnouncement {
    pub identity: ParticipantId,
    /// Canonical public context bytes, public key included
    pub public_context: Vec<u8>,
    pub commitment: Commitment,
    pub nonce: Nonce,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolMessage {
    /// Key sharing: reveal of a committed public context
    KeyShareAnnouncement(KeyShareAnnouncement),

    /// Key sharing: commitment sent ahead of the reveal
    CommitmentNotice {
        identity: ParticipantId,
        commitment: Commitment,
        nonce: Nonce,
    },

    /// Decryption: ask the key holders to open a batch of ciphertexts,
    /// encoded with `HomomorphicEngine::serialize_ciphertexts`
    DecryptionRequest {
        ciphertext: Vec<u8>,
        contributing: Vec<ParticipantId>,
    },
}

impl ProtocolMessage {
    /// Identity of the sending participant, if the message carries one
    pub fn sender(&self) -> Option<ParticipantId> {
        match self {
            ProtocolMessage::KeyShareAnnouncement(announcement) => Some(announcement.identity),
            ProtocolMessage::CommitmentNotice { identity, .. } => Some(*identity),
            ProtocolMessage::DecryptionRequest { .. } => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| MpcError::Serialization(format!("Failed to serialize message: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| MpcError::Serialization(format!("Failed to deserialize message: {}", e)))
    }
}

impl From<KeyShareAnnouncement> for ProtocolMessage {
    fn from(announcement: KeyShareAnnouncement) -> Self {
        ProtocolMessage::KeyShareAnnouncement(announcement)
    }
}

impl KeyShareAnnouncement {
    /// The commitment half of the announcement, for sending ahead of the reveal
    pub fn notice(&self) -> ProtocolMessage {
        ProtocolMessage::CommitmentNotice {
            identity: self.identity,
            commitment: self.commitment,
            nonce: self.nonce,
        }
    }
}
