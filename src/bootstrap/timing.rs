//! Delays between bootstrap steps.

use std::time::Duration;

use rand::seq::IndexedRandom;

/// Pauses taken during login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    /// Candidate delays before signing in; one is picked at random.
    pub jitter: Vec<Duration>,
    /// Pause after the DC check and after resolving the identity.
    pub settle: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            jitter: [4, 6, 8].into_iter().map(Duration::from_secs).collect(),
            settle: Duration::from_secs(5),
        }
    }
}

impl Timing {
    /// No delays at all.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            jitter: Vec::new(),
            settle: Duration::ZERO,
        }
    }

    /// Picks the pre-login delay.
    #[must_use]
    pub fn jitter(&self) -> Duration {
        self.jitter
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or_default()
    }
}
