// =============================================================================
// EMBERLINK v0.4 - Node Configuration
// =============================================================================
//
// Policy knobs consumed by the channel protocol engine when validating a
// peer's open proposal.
//
// =============================================================================

use serde::{Deserialize, Serialize};

/// Node policy configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Maximum relative locktime (seconds) we accept from a peer.
    pub rel_locktime_max: u32,

    /// Maximum anchor confirmation depth a peer may demand of us.
    pub anchor_confirms_max: u32,

    /// Minimum commitment fee (satoshis) we accept from a peer.
    pub commitment_fee_min: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            // One week of relative locktime.
            rel_locktime_max: 7 * 24 * 3600,
            anchor_confirms_max: 10,
            commitment_fee_min: 546,
        }
    }
}

/// Policy for combining both sides' commitment fee proposals.
pub fn commit_fee(ours: u64, theirs: u64) -> u64 {
    std::cmp::max(ours, theirs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_fee_takes_max() {
        assert_eq!(commit_fee(5000, 3000), 5000);
        assert_eq!(commit_fee(100, 7000), 7000);
        assert_eq!(commit_fee(42, 42), 42);
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert!(cfg.rel_locktime_max >= 3600);
        assert!(cfg.anchor_confirms_max >= 1);
    }
}
