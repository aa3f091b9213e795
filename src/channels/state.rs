// =============================================================================
// EMBERLINK v0.4 - Channel Balance State
// =============================================================================
//
// The two-sided per-commitment balance sheet. Each side owns spendable
// funds (`pay_msat`), a reservation for its half of the next on-chain
// commitment fee (`fee_msat`), and the HTLCs it has offered. The sum of
// both sides never changes after funding: every state transition is
// checked against that before it is committed.
//
// =============================================================================

use serde::{Deserialize, Serialize};

use super::htlc::Htlc;
use crate::packets::Locktime;
use crate::MSAT_PER_SATOSHI;

// =============================================================================
// Channel Error
// =============================================================================

/// Everything a peer can be told before we hang up on them. `Display`
/// output is the exact `problem` string sent in the Error packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelError {
    /// Open proposed a block-based relative locktime.
    DelayInBlocks,
    /// Open proposed a relative locktime above our policy limit.
    DelayTooGreat,
    /// Open demanded more anchor confirmations than we allow.
    MinDepthTooGreat,
    /// Open proposed a commitment fee below our floor.
    CommitmentFeeTooLow,
    /// Both sides, or neither side, offered the anchor.
    AnchorOfferConflict,
    /// Signature scalars out of range.
    MalformedSignature,
    /// Signature did not verify against the commitment tx.
    BadSignature,
    /// HTLC expiry is not a well-formed absolute locktime.
    InvalidHtlcExpiry,
    /// HTLC debit would overdraw the offering side.
    CannotAfford(u64),
    /// Revealed preimage does not hash to the recorded revocation hash.
    BadRevocationPreimage,
    /// Anchor value cannot cover the commitment fee.
    InsufficientFundsForFee,
    /// Packet arrived outside its legal state-machine position.
    UnexpectedPacket(&'static str),
    /// Local command issued against a session that cannot take it.
    InvalidState(&'static str),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::DelayInBlocks => write!(f, "Delay in blocks not accepted"),
            ChannelError::DelayTooGreat => write!(f, "Delay too great"),
            ChannelError::MinDepthTooGreat => write!(f, "min_depth too great"),
            ChannelError::CommitmentFeeTooLow => write!(f, "Commitment fee too low"),
            ChannelError::AnchorOfferConflict => write!(f, "Only one side can offer anchor"),
            ChannelError::MalformedSignature => write!(f, "Malformed signature"),
            ChannelError::BadSignature => write!(f, "Bad signature"),
            ChannelError::InvalidHtlcExpiry => write!(f, "Invalid HTLC expiry"),
            ChannelError::CannotAfford(msat) => {
                write!(f, "Cannot afford {} milli-satoshis", msat)
            }
            ChannelError::BadRevocationPreimage => write!(f, "Bad revocation preimage"),
            ChannelError::InsufficientFundsForFee => write!(f, "Insufficient funds for fee"),
            ChannelError::UnexpectedPacket(name) => write!(f, "Unexpected packet {}", name),
            ChannelError::InvalidState(what) => write!(f, "Invalid state: {}", what),
        }
    }
}

impl std::error::Error for ChannelError {}

// =============================================================================
// One Side of the Channel
// =============================================================================

/// What one party holds at the current commitment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSide {
    /// Spendable funds in millisatoshi.
    pub pay_msat: u64,
    /// Reserved for this side's share of the next commitment fee.
    pub fee_msat: u64,
    /// HTLCs this side has offered, in proposal order.
    pub htlcs: Vec<Htlc>,
}

impl ChannelSide {
    /// Everything this side has tied up in the channel.
    pub fn total_msat(&self) -> u64 {
        self.pay_msat
            + self.fee_msat
            + self.htlcs.iter().map(|h| h.msatoshis).sum::<u64>()
    }
}

// =============================================================================
// Both Sides
// =============================================================================

/// The channel balance sheet from our point of view: "ours" always means
/// us, whichever side funded the anchor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelBalances {
    pub ours: ChannelSide,
    pub theirs: ChannelSide,
}

impl ChannelBalances {
    /// Balance sheet right after the anchor confirms, from the *funder's*
    /// point of view: the funder keeps everything less the commitment fee,
    /// and each side's fee reservation holds half of it. Returns None when
    /// the anchor cannot cover the fee.
    pub fn initial_funding(anchor_satoshis: u64, fee_satoshis: u64) -> Option<Self> {
        let anchor_msat = anchor_satoshis.checked_mul(MSAT_PER_SATOSHI)?;
        let fee_msat = fee_satoshis.checked_mul(MSAT_PER_SATOSHI)?;
        if fee_msat > anchor_msat {
            return None;
        }
        let half = fee_msat / 2;
        Some(ChannelBalances {
            ours: ChannelSide {
                pay_msat: anchor_msat - fee_msat,
                fee_msat: half,
                htlcs: Vec::new(),
            },
            theirs: ChannelSide {
                pay_msat: 0,
                // The non-funder has nothing yet; the funder covers the
                // odd millisatoshi when the fee doesn't split evenly.
                fee_msat: fee_msat - half,
                htlcs: Vec::new(),
            },
        })
    }

    /// Swap points of view in place.
    pub fn invert(&mut self) {
        std::mem::swap(&mut self.ours, &mut self.theirs);
    }

    /// The counterparty's view of the same sheet.
    pub fn inverted(&self) -> Self {
        let mut flipped = self.clone();
        flipped.invert();
        flipped
    }

    /// Total channel funding. Invariant across every transition.
    pub fn total_msat(&self) -> u64 {
        self.ours.total_msat() + self.theirs.total_msat()
    }

    /// Stage an HTLC we offer: debit our funds, append the record.
    pub fn offer_htlc(
        &mut self,
        msatoshis: u64,
        expiry: Locktime,
        rhash: [u8; 32],
    ) -> Result<(), ChannelError> {
        if self.ours.pay_msat < msatoshis {
            return Err(ChannelError::CannotAfford(msatoshis));
        }
        self.ours.pay_msat -= msatoshis;
        self.ours.htlcs.push(Htlc::new(msatoshis, rhash, expiry));
        Ok(())
    }

    /// Stage an HTLC the counterparty offers: mirror of offer_htlc.
    pub fn receive_htlc(
        &mut self,
        msatoshis: u64,
        expiry: Locktime,
        rhash: [u8; 32],
    ) -> Result<(), ChannelError> {
        if self.theirs.pay_msat < msatoshis {
            return Err(ChannelError::CannotAfford(msatoshis));
        }
        self.theirs.pay_msat -= msatoshis;
        self.theirs.htlcs.push(Htlc::new(msatoshis, rhash, expiry));
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_funding_conserves_anchor() {
        let cs = ChannelBalances::initial_funding(1_000_000, 5000).unwrap();
        assert_eq!(cs.ours.pay_msat, 1_000_000_000 - 5_000_000);
        assert_eq!(cs.ours.fee_msat, 2_500_000);
        assert_eq!(cs.theirs.pay_msat, 0);
        assert_eq!(cs.theirs.fee_msat, 2_500_000);
        assert_eq!(cs.total_msat(), 1_000_000_000);
    }

    #[test]
    fn test_initial_funding_odd_fee() {
        // 5001 sat fee: halves differ by one msat-of-a-sat, funder covers.
        let cs = ChannelBalances::initial_funding(1_000_000, 5001).unwrap();
        assert_eq!(cs.ours.fee_msat + cs.theirs.fee_msat, 5_001_000);
        assert_eq!(cs.total_msat(), 1_000_000_000);
    }

    #[test]
    fn test_initial_funding_fee_exceeds_anchor() {
        assert!(ChannelBalances::initial_funding(1000, 2000).is_none());
    }

    #[test]
    fn test_invert_swaps_views() {
        let cs = ChannelBalances::initial_funding(1_000_000, 5000).unwrap();
        let flipped = cs.inverted();
        assert_eq!(flipped.theirs, cs.ours);
        assert_eq!(flipped.ours, cs.theirs);
        assert_eq!(flipped.inverted(), cs);
    }

    #[test]
    fn test_offer_htlc_moves_funds_into_escrow() {
        let mut cs = ChannelBalances::initial_funding(1000, 0).unwrap();
        cs.offer_htlc(400_000, Locktime::Blocks(1000), [3; 32]).unwrap();

        assert_eq!(cs.ours.pay_msat, 600_000);
        assert_eq!(cs.ours.htlcs.len(), 1);
        assert_eq!(cs.ours.htlcs[0].msatoshis, 400_000);
        // Escrowed funds still count toward the side's total.
        assert_eq!(cs.total_msat(), 1_000_000);
    }

    #[test]
    fn test_offer_htlc_cannot_overdraw() {
        let mut cs = ChannelBalances::initial_funding(1000, 0).unwrap();
        let err = cs
            .offer_htlc(2_000_000, Locktime::Blocks(1000), [3; 32])
            .unwrap_err();
        assert_eq!(err, ChannelError::CannotAfford(2_000_000));
        assert_eq!(err.to_string(), "Cannot afford 2000000 milli-satoshis");
        // Failed delta leaves the sheet untouched.
        assert_eq!(cs.ours.pay_msat, 1_000_000);
        assert!(cs.ours.htlcs.is_empty());
    }

    #[test]
    fn test_receive_htlc_mirrors_offer() {
        let mut cs = ChannelBalances::initial_funding(1000, 0).unwrap();
        cs.invert(); // now we are the unfunded side
        cs.receive_htlc(250_000, Locktime::Blocks(900), [4; 32]).unwrap();

        assert_eq!(cs.theirs.pay_msat, 750_000);
        assert_eq!(cs.theirs.htlcs.len(), 1);
        assert_eq!(cs.total_msat(), 1_000_000);
    }

    #[test]
    fn test_error_strings() {
        assert_eq!(
            ChannelError::DelayInBlocks.to_string(),
            "Delay in blocks not accepted"
        );
        assert_eq!(ChannelError::BadSignature.to_string(), "Bad signature");
        assert_eq!(
            ChannelError::UnexpectedPacket("open_anchor").to_string(),
            "Unexpected packet open_anchor"
        );
    }
}
