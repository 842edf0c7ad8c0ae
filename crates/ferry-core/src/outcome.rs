//! Answers returned by the bidding protocol.

use serde::{Deserialize, Serialize};

use crate::error::Reason;

/// Answer to "do you support this expectation / container".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportOutcome {
    /// Whether the worker can handle it.
    pub support: bool,
    /// Explanation.
    pub reason: Reason,
}

impl SupportOutcome {
    /// Supported, with an explanation.
    #[must_use]
    pub const fn supported(reason: Reason) -> Self {
        Self {
            support: true,
            reason,
        }
    }

    /// Not supported, with an explanation.
    #[must_use]
    pub const fn unsupported(reason: Reason) -> Self {
        Self {
            support: false,
            reason,
        }
    }
}

/// Answer to "is this expectation ready to start".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyOutcome {
    /// Whether work may start now.
    pub ready: bool,
    /// Whether the source was found, when the worker knows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_exists: Option<bool>,
    /// Explanation.
    pub reason: Reason,
}

impl ReadyOutcome {
    /// Ready, with an explanation.
    #[must_use]
    pub const fn ready(reason: Reason) -> Self {
        Self {
            ready: true,
            source_exists: Some(true),
            reason,
        }
    }

    /// Not ready, with an explanation.
    #[must_use]
    pub const fn not_ready(reason: Reason, source_exists: Option<bool>) -> Self {
        Self {
            ready: false,
            source_exists,
            reason,
        }
    }
}

/// Answer to "is this expectation already fulfilled".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfilledOutcome {
    /// Whether the target reflects the source.
    pub fulfilled: bool,
    /// Explanation.
    pub reason: Reason,
}

impl FulfilledOutcome {
    /// Fulfilled, with an explanation.
    #[must_use]
    pub const fn fulfilled(reason: Reason) -> Self {
        Self {
            fulfilled: true,
            reason,
        }
    }

    /// Not fulfilled, with an explanation.
    #[must_use]
    pub const fn not_fulfilled(reason: Reason) -> Self {
        Self {
            fulfilled: false,
            reason,
        }
    }
}

/// Answer to "remove what this expectation produced".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedOutcome {
    /// Whether the artifact or record was removed (or scheduled for removal).
    pub removed: bool,
    /// Explanation.
    pub reason: Reason,
}

impl RemovedOutcome {
    /// Removed, with an explanation.
    #[must_use]
    pub const fn removed(reason: Reason) -> Self {
        Self {
            removed: true,
            reason,
        }
    }

    /// Not removed, with an explanation.
    #[must_use]
    pub const fn not_removed(reason: Reason) -> Self {
        Self {
            removed: false,
            reason,
        }
    }
}
