//! Coordinator configuration

use serde::{Deserialize, Serialize};

use crate::error::{MpcError, Result};

/// Smallest number of participants a run can have.
pub const MIN_PARTICIPANTS: usize = 2;

/// What the coordinator does when a key share fails commitment verification.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPolicy {
    /// Any single mismatch ends the run.
    #[default]
    Abort,
    /// Drop every participant whose key share was rejected and continue if
    /// enough remain to meet the threshold.
    Exclude,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub participants: usize,
    /// Defaults to a simple majority when unset.
    pub threshold: Option<usize>,
    pub verification_policy: VerificationPolicy,
    /// Run per-participant key generation and verification on the rayon pool.
    pub parallel: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            participants: 3,
            threshold: None,
            verification_policy: VerificationPolicy::Abort,
            parallel: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(participants: usize) -> Self {
        Self {
            participants,
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_policy(mut self, policy: VerificationPolicy) -> Self {
        self.verification_policy = policy;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// `⌊N/2⌋ + 1` unless set explicitly.
    pub fn effective_threshold(&self) -> usize {
        self.threshold.unwrap_or(self.participants / 2 + 1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.participants < MIN_PARTICIPANTS {
            return Err(MpcError::InvalidConfig(format!(
                "at least {} participants are required, got {}",
                MIN_PARTICIPANTS, self.participants
            )));
        }
        let threshold = self.effective_threshold();
        if threshold == 0 || threshold > self.participants {
            return Err(MpcError::InvalidConfig(format!(
                "threshold must be in 1..={}, got {}",
                self.participants, threshold
            )));
        }
        Ok(())
    }
}
