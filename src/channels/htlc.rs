// =============================================================================
// EMBERLINK v0.4 - HTLC Records
// =============================================================================
//
// A hash time-locked contract inside a channel: claimable by revealing the
// preimage of `rhash` before `expiry`, refundable after. Multi-hop works
// by chaining HTLCs with the same hash and shrinking expiries:
//
//   Alice ──── HTLC(H, N) ────▶ Bob ──── HTLC(H, N-delta) ────▶ Carol
//   Alice ◀──────── R ───────── Bob ◀──────────── R ─────────── Carol
//
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::packets::Locktime;
use crate::sha256;

// =============================================================================
// Payment Preimage
// =============================================================================

/// The secret whose SHA-256 unlocks an HTLC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPreimage(pub [u8; 32]);

impl PaymentPreimage {
    /// Generate a fresh random preimage.
    pub fn generate() -> Self {
        PaymentPreimage(rand::random())
    }

    /// The hash an HTLC carrying this preimage locks on.
    pub fn rhash(&self) -> [u8; 32] {
        sha256(&self.0)
    }

    pub fn matches(&self, rhash: &[u8; 32]) -> bool {
        self.rhash() == *rhash
    }
}

// =============================================================================
// HTLC
// =============================================================================

/// A pending conditional payment on one side of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Htlc {
    /// Amount locked up, in millisatoshi.
    pub msatoshis: u64,
    /// SHA-256 the claiming preimage must match.
    pub rhash: [u8; 32],
    /// Absolute expiry after which the offerer takes the funds back.
    pub expiry: Locktime,
}

impl Htlc {
    pub fn new(msatoshis: u64, rhash: [u8; 32], expiry: Locktime) -> Self {
        Htlc {
            msatoshis,
            rhash,
            expiry,
        }
    }

    /// Whether the expiry has passed, judged against a block height or a
    /// unix timestamp depending on the locktime flavor.
    pub fn is_expired(&self, height: u32, now: u32) -> bool {
        match self.expiry {
            Locktime::Blocks(b) => height >= b,
            Locktime::Seconds(s) => now >= s,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
