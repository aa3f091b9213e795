// =============================================================================
// EMBERLINK v0.4 - Protocol Constants & Shared Helpers
// Off-chain payment channel node core: routing + channel protocol
// =============================================================================

pub mod channels;
pub mod config;
pub mod packets;
pub mod routing;
pub mod rpc;

use sha2::{Digest, Sha256};

// --- Units ---
pub const MSAT_PER_SATOSHI: u64 = 1000;

// --- Network ---
pub const RPC_PORT: u16 = 9735;
pub const PROTOCOL_VERSION: u32 = 1;

/// SHA-256 of arbitrary bytes, as a fixed array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Format a millisatoshi amount for display.
pub fn format_msat(msat: u64) -> String {
    let sat = msat / MSAT_PER_SATOSHI;
    let frac = msat % MSAT_PER_SATOSHI;
    if frac == 0 {
        format!("{} sat", sat)
    } else {
        format!("{}.{:03} sat", sat, frac)
    }
}
