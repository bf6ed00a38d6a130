//! Retry context handed to handlers on re-invocation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strand_core::StepKey;

use crate::error::StepError;

/// A record of one finished attempt to execute a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Which attempt this was (1-indexed).
    pub attempt_number: u32,
    /// The failure that ended the attempt.
    pub error: StepError,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt failed.
    pub completed_at: DateTime<Utc>,
}

/// Context describing the retry state of the current invocation.
///
/// Present on the step context only when the invocation is a retry
/// (attempt number two or later) so handlers can adapt — e.g. vary a
/// request or consult the previous failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryContext {
    /// The step being retried.
    pub step_id: StepKey,
    /// Current attempt number (1-indexed).
    pub attempt_number: u32,
    /// Maximum attempts the policy allows.
    pub max_attempts: u32,
    /// All previous failed attempts, oldest first.
    pub previous_attempts: Vec<AttemptRecord>,
    /// When the first attempt started.
    pub first_attempt_at: DateTime<Utc>,
    /// When the current attempt started.
    pub current_attempt_at: DateTime<Utc>,
}

impl RetryContext {
    /// Returns `true` if this is the final allowed attempt.
    #[must_use]
    pub fn is_last_attempt(&self) -> bool {
        self.attempt_number >= self.max_attempts
    }

    /// Attempts remaining after the current one.
    #[must_use]
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_number)
    }

    /// The most recent failure, if any attempt has completed.
    #[must_use]
    pub fn last_error(&self) -> Option<&StepError> {
        self.previous_attempts.last().map(|a| &a.error)
    }
}
