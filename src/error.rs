//! Error types for the multiparty key-coordination protocol

use crate::coordinator::ProtocolPhase;
use crate::engine::EngineError;
use crate::participant::ParticipantId;

/// Errors surfaced while running the protocol.
///
/// `MissingCommitment`, `CommitmentMismatch`, `InvalidKeyShare` and
/// `WrongPhase` signal protocol misuse or a dishonest peer and are never
/// retried. `InsufficientParticipants` is recovered by resetting and
/// re-running setup. `NotReady` and
/// `InsufficientAuthorization` are recovered by satisfying the precondition.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MpcError {
    #[error("participant {verifier} has no commitment for participant {peer}")]
    MissingCommitment {
        verifier: ParticipantId,
        peer: ParticipantId,
    },

    #[error(
        "commitment mismatch: participant {verifier} rejected the key share of participant {peer}"
    )]
    CommitmentMismatch {
        verifier: ParticipantId,
        peer: ParticipantId,
    },

    #[error("participant {verifier} rejected participant {peer}: key is not a single fresh share")]
    InvalidKeyShare {
        verifier: ParticipantId,
        peer: ParticipantId,
    },

    #[error("participant {0} has no verified peers to combine")]
    NoVerifiedPeers(ParticipantId),

    #[error("{operation} requires phase {expected:?}, but the protocol is in {actual:?}")]
    WrongPhase {
        operation: &'static str,
        expected: ProtocolPhase,
        actual: ProtocolPhase,
    },

    #[error("only {available} participants produced a combined key, threshold is {threshold}")]
    InsufficientParticipants { available: usize, threshold: usize },

    #[error("protocol is not ready (phase {0:?})")]
    NotReady(ProtocolPhase),

    #[error("decryption needs {threshold} contributing participants, got {provided}")]
    InsufficientAuthorization { provided: usize, threshold: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown participant {0}")]
    UnknownParticipant(ParticipantId),

    #[error("participant {0} has not generated its keys")]
    KeysNotGenerated(ParticipantId),

    #[error("protocol run aborted in {phase:?}: {reason}; reset before continuing")]
    Aborted { phase: ProtocolPhase, reason: String },

    #[error("no encryption layers have been applied")]
    EmptyChain,

    #[error("layer of participant {0} was never established")]
    LayerNotEstablished(ParticipantId),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("expected a {expected} message")]
    UnexpectedMessage { expected: &'static str },

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, MpcError>;
