// =============================================================================
// EMBERLINK v0.4 - Protocol Packets
// =============================================================================
//
// The tagged union of every message exchanged between two channel peers,
// plus the small fixed-width value types they share. Framing, encryption
// and transport live outside the core; this module only guarantees that
// decode(encode(m)) == m for every well-formed message.
//
// Lifecycle of a channel, in packets:
//
//   funder                          non-funder
//     │── Open ──────────────────────▶│
//     │◀───────────────────── Open ───│
//     │── OpenAnchor ────────────────▶│
//     │◀────────────── OpenCommitSig ─│
//     │── OpenComplete ──────────────▶│   (and symmetric)
//     │                               │
//     │── UpdateAddHtlc ─────────────▶│
//     │◀──────────────── UpdateAccept ─│
//     │── UpdateSignature ───────────▶│
//     │◀────────────── UpdateComplete ─│
//
// =============================================================================

use secp256k1::ecdsa;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

// =============================================================================
// Value Types
// =============================================================================

/// An ECDSA signature as its two 256-bit scalars (compact form split in two).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl WireSignature {
    pub fn from_ecdsa(sig: &ecdsa::Signature) -> Self {
        let compact = sig.serialize_compact();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);
        WireSignature { r, s }
    }

    /// Rebuild the secp256k1 signature. Fails on out-of-range scalars.
    pub fn to_ecdsa(&self) -> Result<ecdsa::Signature, secp256k1::Error> {
        let mut compact = [0u8; 64];
        compact[..32].copy_from_slice(&self.r);
        compact[32..].copy_from_slice(&self.s);
        ecdsa::Signature::from_compact(&compact)
    }
}

/// Absolute or relative locktime, seconds or blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locktime {
    Seconds(u32),
    Blocks(u32),
}

/// Threshold between block heights and unix timestamps in a locktime field.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

impl Locktime {
    /// Whether this value is a well-formed *absolute* locktime: block
    /// heights stay below the threshold, timestamps at or above it.
    pub fn is_valid_absolute(&self) -> bool {
        match *self {
            Locktime::Seconds(s) => s >= LOCKTIME_THRESHOLD,
            Locktime::Blocks(b) => b < LOCKTIME_THRESHOLD,
        }
    }
}

/// Does the sender intend to create the on-chain anchor?
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorOffer {
    WillCreateAnchor,
    WontCreateAnchor,
}

// =============================================================================
// Messages
// =============================================================================

/// Proposed channel parameters, sent by both sides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenChannel {
    /// Relative locktime for outputs going back to the sender.
    pub delay: Locktime,
    /// Revocation hash for the sender's first commitment tx.
    pub revocation_hash: [u8; 32],
    /// Revocation hash for the sender's second commitment tx.
    pub next_revocation_hash: [u8; 32],
    /// Key the anchor pays into the commitment tx with.
    pub commit_key: PublicKey,
    /// Key commitment outputs pay the sender at.
    pub final_key: PublicKey,
    pub anch: AnchorOffer,
    /// How deep the anchor must be buried before the channel is live.
    pub min_depth: u32,
    /// Commitment fee (satoshis) the sender wants.
    pub commitment_fee: u64,
}

/// The anchor funder announces the funding output and signs the
/// counterparty's initial commitment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenAnchor {
    pub txid: [u8; 32],
    pub output_index: u32,
    /// Anchor output value in satoshis.
    pub amount: u64,
    pub commit_sig: WireSignature,
}

/// Non-funder's signature over the funder's initial commitment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenCommitSig {
    pub sig: WireSignature,
}

/// The anchor reached min-depth on the sender's view of the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpenComplete {
    /// Block the anchor was buried in, if the sender cares to say.
    pub blockid: Option<[u8; 32]>,
}

/// Propose a new HTLC, sender -> receiver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateAddHtlc {
    /// Amount for the HTLC (millisatoshi).
    pub amount_msat: u32,
    /// SHA-256 the payment preimage must match.
    pub r_hash: [u8; 32],
    /// Absolute expiry of the HTLC.
    pub expiry: Locktime,
    /// Sender's revocation hash for the commitment pair being proposed.
    pub revocation_hash: [u8; 32],
}

/// Receiver accepts the proposal: signature over the sender's new
/// commitment plus the receiver's own next revocation hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateAccept {
    pub sig: WireSignature,
    pub revocation_hash: [u8; 32],
}

/// Sender commits: signature over the receiver's new commitment and the
/// preimage revoking the sender's previous commitment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateSignature {
    pub sig: WireSignature,
    pub revocation_preimage: [u8; 32],
}

/// Receiver completes: the symmetric revocation preimage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateComplete {
    pub revocation_preimage: [u8; 32],
}

/// Claim an HTLC by revealing its preimage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateFulfillHtlc {
    pub id: u64,
    pub r: [u8; 32],
}

/// Fail an HTLC back to its origin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateFailHtlc {
    pub id: u64,
    /// Opaque failure report, relayed towards the payment origin.
    pub reason: Vec<u8>,
}

/// Commit all staged changes (later protocol revision; carried for wire
/// compatibility, never legal input to this engine).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateCommit {
    pub sig: WireSignature,
}

/// Revoke an old commitment (later protocol revision; carried for wire
/// compatibility, never legal input to this engine).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateRevocation {
    pub revocation_preimage: [u8; 32],
    pub next_revocation_hash: [u8; 32],
}

/// Start clearing the channel for a mutual close.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloseShutdown {
    /// Output script for the mutual close tx.
    pub scriptpubkey: Vec<u8>,
}

/// Signature on a mutual close transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloseSignature {
    /// Fee in satoshis.
    pub close_fee: u64,
    pub sig: WireSignature,
}

/// We're hanging up; human-readable diagnosis only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPkt {
    pub problem: String,
}

/// Session authentication, handled by the transport layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Authenticate {
    pub node_id: PublicKey,
    pub session_sig: WireSignature,
}

/// Reconnection marker: how many updates the sender already received.
/// Replay from this point is the transport layer's job.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reconnect {
    pub ack: u64,
}

// =============================================================================
// The Packet Union
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Pkt {
    Auth(Authenticate),
    Reconnect(Reconnect),
    Open(OpenChannel),
    OpenAnchor(OpenAnchor),
    OpenCommitSig(OpenCommitSig),
    OpenComplete(OpenComplete),
    UpdateAddHtlc(UpdateAddHtlc),
    UpdateAccept(UpdateAccept),
    UpdateSignature(UpdateSignature),
    UpdateComplete(UpdateComplete),
    UpdateFulfillHtlc(UpdateFulfillHtlc),
    UpdateFailHtlc(UpdateFailHtlc),
    UpdateCommit(UpdateCommit),
    UpdateRevocation(UpdateRevocation),
    CloseShutdown(CloseShutdown),
    CloseSignature(CloseSignature),
    Error(ErrorPkt),
}

impl Pkt {
    /// Stable name for logs and "Unexpected packet" errors.
    pub fn name(&self) -> &'static str {
        match self {
            Pkt::Auth(_) => "auth",
            Pkt::Reconnect(_) => "reconnect",
            Pkt::Open(_) => "open",
            Pkt::OpenAnchor(_) => "open_anchor",
            Pkt::OpenCommitSig(_) => "open_commit_sig",
            Pkt::OpenComplete(_) => "open_complete",
            Pkt::UpdateAddHtlc(_) => "update_add_htlc",
            Pkt::UpdateAccept(_) => "update_accept",
            Pkt::UpdateSignature(_) => "update_signature",
            Pkt::UpdateComplete(_) => "update_complete",
            Pkt::UpdateFulfillHtlc(_) => "update_fulfill_htlc",
            Pkt::UpdateFailHtlc(_) => "update_fail_htlc",
            Pkt::UpdateCommit(_) => "update_commit",
            Pkt::UpdateRevocation(_) => "update_revocation",
            Pkt::CloseShutdown(_) => "close_shutdown",
            Pkt::CloseSignature(_) => "close_signature",
            Pkt::Error(_) => "error",
        }
    }

    /// Build an error packet from a human-readable reason.
    pub fn error(problem: impl Into<String>) -> Pkt {
        Pkt::Error(ErrorPkt {
            problem: problem.into(),
        })
    }

    /// Serialize for the transport layer.
    pub fn encode(&self) -> Vec<u8> {
        // Packets are plain data; this cannot fail.
        bincode::serialize(self).unwrap_or_default()
    }

    /// Parse a packet off the transport layer.
    pub fn decode(bytes: &[u8]) -> Result<Pkt, PacketError> {
        bincode::deserialize(bytes).map_err(|e| PacketError::Malformed(e.to_string()))
    }
}

/// A packet that could not be decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PacketError {
    Malformed(String),
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketError::Malformed(e) => write!(f, "Malformed packet: {}", e),
        }
    }
}

impl std::error::Error for PacketError {}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{Secp256k1, SecretKey};

    fn test_pubkey(byte: u8) -> PublicKey {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        PublicKey::from_secret_key(&secp, &sk)
    }

    fn test_sig() -> WireSignature {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[7; 32]).unwrap();
        let msg = secp256k1::Message::from_digest([0x42; 32]);
        WireSignature::from_ecdsa(&secp.sign_ecdsa(&msg, &sk))
    }

    fn roundtrip(pkt: Pkt) {
        let bytes = pkt.encode();
        let back = Pkt::decode(&bytes).unwrap();
        assert_eq!(pkt, back);
    }

    #[test]
    fn test_roundtrip_all_variants() {
        let sig = test_sig();
        let variants = vec![
            Pkt::Auth(Authenticate {
                node_id: test_pubkey(1),
                session_sig: sig,
            }),
            Pkt::Reconnect(Reconnect { ack: 17 }),
            Pkt::Open(OpenChannel {
                delay: Locktime::Seconds(3600),
                revocation_hash: [1; 32],
                next_revocation_hash: [2; 32],
                commit_key: test_pubkey(2),
                final_key: test_pubkey(3),
                anch: AnchorOffer::WillCreateAnchor,
                min_depth: 3,
                commitment_fee: 5000,
            }),
            Pkt::OpenAnchor(OpenAnchor {
                txid: [9; 32],
                output_index: 1,
                amount: 1_000_000,
                commit_sig: sig,
            }),
            Pkt::OpenCommitSig(OpenCommitSig { sig }),
            Pkt::OpenComplete(OpenComplete { blockid: None }),
            Pkt::OpenComplete(OpenComplete {
                blockid: Some([8; 32]),
            }),
            Pkt::UpdateAddHtlc(UpdateAddHtlc {
                amount_msat: 400_000,
                r_hash: [3; 32],
                expiry: Locktime::Blocks(1000),
                revocation_hash: [4; 32],
            }),
            Pkt::UpdateAccept(UpdateAccept {
                sig,
                revocation_hash: [5; 32],
            }),
            Pkt::UpdateSignature(UpdateSignature {
                sig,
                revocation_preimage: [6; 32],
            }),
            Pkt::UpdateComplete(UpdateComplete {
                revocation_preimage: [7; 32],
            }),
            Pkt::UpdateFulfillHtlc(UpdateFulfillHtlc { id: 4, r: [8; 32] }),
            Pkt::UpdateFailHtlc(UpdateFailHtlc {
                id: 5,
                reason: b"no route".to_vec(),
            }),
            Pkt::UpdateCommit(UpdateCommit { sig }),
            Pkt::UpdateRevocation(UpdateRevocation {
                revocation_preimage: [10; 32],
                next_revocation_hash: [11; 32],
            }),
            Pkt::CloseShutdown(CloseShutdown {
                scriptpubkey: vec![0x00, 0x14, 0xAB],
            }),
            Pkt::CloseSignature(CloseSignature {
                close_fee: 1000,
                sig,
            }),
            Pkt::error("Bad signature"),
        ];
        for pkt in variants {
            roundtrip(pkt);
        }
    }

    #[test]
    fn test_signature_scalars_roundtrip() {
        let sig = test_sig();
        let ecdsa = sig.to_ecdsa().unwrap();
        assert_eq!(WireSignature::from_ecdsa(&ecdsa), sig);
    }

    #[test]
    fn test_bogus_signature_scalars_rejected() {
        // r = group order is out of range
        let bad = WireSignature {
            r: [0xFF; 32],
            s: [1; 32],
        };
        assert!(bad.to_ecdsa().is_err());
    }

    #[test]
    fn test_absolute_locktime_validity() {
        assert!(Locktime::Blocks(1000).is_valid_absolute());
        assert!(!Locktime::Blocks(LOCKTIME_THRESHOLD).is_valid_absolute());
        assert!(Locktime::Seconds(1_700_000_000).is_valid_absolute());
        assert!(!Locktime::Seconds(3600).is_valid_absolute());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Pkt::decode(&[0xFF; 7]).is_err());
    }

    #[test]
    fn test_packet_names() {
        assert_eq!(Pkt::error("x").name(), "error");
        assert_eq!(
            Pkt::Reconnect(Reconnect { ack: 0 }).name(),
            "reconnect"
        );
    }
}
