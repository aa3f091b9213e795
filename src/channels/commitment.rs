// =============================================================================
// EMBERLINK v0.4 - Commitment Transactions & Revocation Secrets
// =============================================================================
//
// Each side holds a commitment transaction spending the anchor at the
// current balance snapshot. Updating the channel means building a new
// pair, cross-signing it, and revoking the old one by releasing its
// per-commitment secret: once the counterparty holds the preimage, an
// old commitment is only good for handing them everything.
//
// Structure (our version):
//   Input:   anchor output (2-of-2)
//   Output 1: to us    — revocable with our preimage, else delayed
//   Output 2: to them  — immediately spendable
//   Output 3+: one per pending HTLC, either side
//
// =============================================================================

use secp256k1::ecdsa;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

use super::state::ChannelBalances;
use crate::packets::Locktime;
use crate::sha256;

// =============================================================================
// Per-Commitment Secret Chain
// =============================================================================

/// Deterministic sequence of revocation preimages. The node can compute
/// `preimage(k)` for any k it has reached; the counterparty only ever
/// sees `revocation_hash(n)` until commitment n is revoked.
#[derive(Clone, Debug)]
pub struct SecretChain {
    seed: [u8; 32],
}

impl SecretChain {
    pub fn new(seed: [u8; 32]) -> Self {
        SecretChain { seed }
    }

    /// The n-th revocation preimage.
    pub fn preimage(&self, n: u64) -> [u8; 32] {
        let mut data = Vec::with_capacity(32 + 8 + 17);
        data.extend_from_slice(&self.seed);
        data.extend_from_slice(&n.to_le_bytes());
        data.extend_from_slice(b"revocation_secret");
        sha256(&data)
    }

    /// Hash the counterparty sees before commitment n is revoked.
    pub fn revocation_hash(&self, n: u64) -> [u8; 32] {
        sha256(&self.preimage(n))
    }
}

// =============================================================================
// Anchor
// =============================================================================

/// The on-chain 2-of-2 funding output every commitment spends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub txid: [u8; 32],
    pub output_index: u32,
    pub satoshis: u64,
    pub redeemscript: Vec<u8>,
}

/// 2-of-2 multisig redeem script over both commit keys.
pub fn redeem_2of2(a: &PublicKey, b: &PublicKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(71);
    script.push(0x52); // OP_2
    script.push(33);
    script.extend_from_slice(&a.serialize());
    script.push(33);
    script.extend_from_slice(&b.serialize());
    script.push(0x52); // OP_2
    script.push(0xAE); // OP_CHECKMULTISIG
    script
}

// =============================================================================
// Output Scripts
// =============================================================================

/// Encode a number for script the way bitcoin does.
fn encode_script_number(n: i64) -> Vec<u8> {
    if n == 0 {
        return vec![];
    }
    let negative = n < 0;
    let mut abs_n = n.unsigned_abs();
    let mut result = Vec::new();
    while abs_n > 0 {
        result.push((abs_n & 0xFF) as u8);
        abs_n >>= 8;
    }
    if result.last().map(|b| b & 0x80 != 0) == Some(true) {
        result.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        if let Some(last) = result.last_mut() {
            *last |= 0x80;
        }
    }
    result
}

/// Output going back to the holder: the counterparty can sweep it with
/// the revocation preimage, otherwise the holder spends after the delay.
fn script_to_self(
    self_final: &PublicKey,
    other_final: &PublicKey,
    revocation_hash: &[u8; 32],
    delay: u32,
) -> Vec<u8> {
    let mut script = Vec::new();
    script.push(0x63); // OP_IF
    script.push(0xA8); // OP_SHA256
    script.push(32);
    script.extend_from_slice(revocation_hash);
    script.push(0x88); // OP_EQUALVERIFY
    script.push(33);
    script.extend_from_slice(&other_final.serialize());
    script.push(0xAC); // OP_CHECKSIG
    script.push(0x67); // OP_ELSE
    let delay_bytes = encode_script_number(delay as i64);
    script.push(delay_bytes.len() as u8);
    script.extend_from_slice(&delay_bytes);
    script.push(0xB2); // OP_CSV
    script.push(0x75); // OP_DROP
    script.push(33);
    script.extend_from_slice(&self_final.serialize());
    script.push(0xAC); // OP_CHECKSIG
    script.push(0x68); // OP_ENDIF
    script
}

/// Output to the counterparty, immediately spendable.
fn script_to_other(other_final: &PublicKey) -> Vec<u8> {
    let mut script = Vec::with_capacity(35);
    script.push(33);
    script.extend_from_slice(&other_final.serialize());
    script.push(0xAC); // OP_CHECKSIG
    script
}

/// HTLC output: recipient claims with the payment preimage, offerer takes
/// it back after expiry, counterparty sweeps on revocation.
fn script_htlc(
    recipient: &PublicKey,
    offerer: &PublicKey,
    rhash: &[u8; 32],
    expiry: Locktime,
    revocation_hash: &[u8; 32],
) -> Vec<u8> {
    let expiry_value = match expiry {
        Locktime::Seconds(s) => s,
        Locktime::Blocks(b) => b,
    };
    let mut script = Vec::new();
    script.push(0x63); // OP_IF
    script.push(0xA8); // OP_SHA256
    script.push(32);
    script.extend_from_slice(rhash);
    script.push(0x88); // OP_EQUALVERIFY
    script.push(33);
    script.extend_from_slice(&recipient.serialize());
    script.push(0xAC); // OP_CHECKSIG
    script.push(0x67); // OP_ELSE
    let expiry_bytes = encode_script_number(expiry_value as i64);
    script.push(expiry_bytes.len() as u8);
    script.extend_from_slice(&expiry_bytes);
    script.push(0xB1); // OP_CLTV
    script.push(0x75); // OP_DROP
    // Revocation folds into the refund branch here; a broadcastable
    // script would split it out the way the to-self output does.
    script.push(0xA8); // OP_SHA256
    script.push(32);
    script.extend_from_slice(revocation_hash);
    script.push(0x87); // OP_EQUAL
    script.push(0x75); // OP_DROP
    script.push(33);
    script.extend_from_slice(&offerer.serialize());
    script.push(0xAC); // OP_CHECKSIG
    script.push(0x68); // OP_ENDIF
    script
}

// =============================================================================
// Commitment Transaction
// =============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitmentOutput {
    pub amount_msat: u64,
    pub script: Vec<u8>,
}

/// An unsigned commitment transaction for one side of the channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommitmentTx {
    pub funding_txid: [u8; 32],
    pub funding_output_index: u32,
    pub revocation_hash: [u8; 32],
    pub outputs: Vec<CommitmentOutput>,
}

impl CommitmentTx {
    /// Build the holder's commitment from their view of the balances.
    /// `view.ours` is the holder's side; its output is the revocable,
    /// delayed one.
    pub fn build(
        anchor: &Anchor,
        view: &ChannelBalances,
        self_final: &PublicKey,
        other_final: &PublicKey,
        revocation_hash: [u8; 32],
        self_delay: u32,
    ) -> Self {
        let mut outputs = Vec::new();

        if view.ours.pay_msat > 0 {
            outputs.push(CommitmentOutput {
                amount_msat: view.ours.pay_msat,
                script: script_to_self(self_final, other_final, &revocation_hash, self_delay),
            });
        }
        if view.theirs.pay_msat > 0 {
            outputs.push(CommitmentOutput {
                amount_msat: view.theirs.pay_msat,
                script: script_to_other(other_final),
            });
        }
        for htlc in &view.ours.htlcs {
            outputs.push(CommitmentOutput {
                amount_msat: htlc.msatoshis,
                script: script_htlc(
                    other_final,
                    self_final,
                    &htlc.rhash,
                    htlc.expiry,
                    &revocation_hash,
                ),
            });
        }
        for htlc in &view.theirs.htlcs {
            outputs.push(CommitmentOutput {
                amount_msat: htlc.msatoshis,
                script: script_htlc(
                    self_final,
                    other_final,
                    &htlc.rhash,
                    htlc.expiry,
                    &revocation_hash,
                ),
            });
        }

        CommitmentTx {
            funding_txid: anchor.txid,
            funding_output_index: anchor.output_index,
            revocation_hash,
            outputs,
        }
    }

    /// Transaction id over the full serialized content.
    pub fn txid(&self) -> [u8; 32] {
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&self.funding_txid);
        data.extend_from_slice(&self.funding_output_index.to_le_bytes());
        data.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for out in &self.outputs {
            data.extend_from_slice(&out.amount_msat.to_le_bytes());
            data.extend_from_slice(&(out.script.len() as u32).to_le_bytes());
            data.extend_from_slice(&out.script);
        }
        data.extend_from_slice(&self.revocation_hash);
        sha256(&data)
    }

    /// Digest a commitment signature commits to: the txid bound to the
    /// redeem script being satisfied.
    pub fn sighash(&self, redeemscript: &[u8]) -> [u8; 32] {
        let mut data = Vec::with_capacity(32 + redeemscript.len());
        data.extend_from_slice(&self.txid());
        data.extend_from_slice(redeemscript);
        sha256(&data)
    }

    /// Sum of everything the commitment pays out.
    pub fn total_output_msat(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount_msat).sum()
    }
}

// =============================================================================
// Signing Capabilities
// =============================================================================

/// sign(tx, key) -> sig, bound to the anchor redeem script.
pub fn sign_commitment(
    secp: &Secp256k1<All>,
    tx: &CommitmentTx,
    redeemscript: &[u8],
    key: &SecretKey,
) -> ecdsa::Signature {
    let msg = Message::from_digest(tx.sighash(redeemscript));
    secp.sign_ecdsa(&msg, key)
}

/// verify(tx, redeemscript, key, sig) -> bool.
pub fn check_commitment_sig(
    secp: &Secp256k1<All>,
    tx: &CommitmentTx,
    redeemscript: &[u8],
    key: &PublicKey,
    sig: &ecdsa::Signature,
) -> bool {
    let msg = Message::from_digest(tx.sighash(redeemscript));
    secp.verify_ecdsa(&msg, sig, key).is_ok()
}

// =============================================================================
// Tests
// =============================================================================
