use crate::error::LinkError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a client-side redirect chase ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChaseOutcome {
    /// The chain ended on a successful response at `target`.
    Reached { target: String },
    /// The chain ended on an HTTP 404.
    NotFound,
    /// The origin refused the client part way through the chain. `partial`
    /// is the last location observed before the refusal, if any hop was made.
    Blocked { partial: Option<String> },
    /// Anything else: transport errors, server errors, redirect loops.
    Unknown {
        partial: Option<String>,
        reason: String,
    },
}

impl ChaseOutcome {
    /// Outcomes that have to be handed to server-side fallback resolution.
    pub fn needs_fallback(&self) -> bool {
        matches!(self, ChaseOutcome::Blocked { .. } | ChaseOutcome::Unknown { .. })
    }

    /// The best known destination, confirmed or not.
    pub fn observed_target(&self) -> Option<&str> {
        match self {
            ChaseOutcome::Reached { target } => Some(target),
            ChaseOutcome::Blocked { partial } | ChaseOutcome::Unknown { partial, .. } => {
                partial.as_deref()
            }
            ChaseOutcome::NotFound => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaseResult {
    pub url: String,
    pub outcome: ChaseOutcome,
    pub status_code: u16,
    pub hops: Vec<String>,
    pub response_time: Duration,
}

impl ChaseResult {
    pub fn new(url: String, outcome: ChaseOutcome) -> Self {
        Self {
            url,
            outcome,
            status_code: 0,
            hops: Vec::new(),
            response_time: Duration::from_secs(0),
        }
    }

    pub fn with_error(url: String, reason: String) -> Self {
        Self::new(
            url,
            ChaseOutcome::Unknown {
                partial: None,
                reason,
            },
        )
    }

    /// The failure this chase represents, if it did not reach a target.
    pub fn error(&self) -> Option<LinkError> {
        match &self.outcome {
            ChaseOutcome::Reached { .. } => None,
            ChaseOutcome::NotFound => Some(LinkError::NotFound(self.url.clone())),
            ChaseOutcome::Blocked { .. } => Some(LinkError::CorsRestricted(self.url.clone())),
            ChaseOutcome::Unknown { reason, .. } => Some(LinkError::Unknown {
                url: self.url.clone(),
                reason: reason.clone(),
            }),
        }
    }
}
