// =============================================================================
// EMBERLINK v0.4 - Channel Protocol Engine
// =============================================================================
//
// Drives one peer session through the bilateral channel protocol:
//
//   Init ──▶ OpenWaitAnchor ─┐
//        └─▶ OpenWaitSig ────┴─▶ OpenWaitComplete ──▶ Normal
//                                                      │  ▲
//                                   HtlcProposed ◀─────┘  │
//                                        │                │
//                                   HtlcAccepted ─────────┘
//                                                      │
//                                         Closing ──▶ Closed
//
// Inbound packets are validated by accept_* handlers; outbound packets
// come from make_* builders. Any packet outside its legal position, or
// any validation failure, is answered with an Error packet and the
// session is torn down. A balance-conservation violation inside the
// atomic commit is a bug in this engine, not peer misbehavior, and
// aborts outright.
//
// =============================================================================

use log::{debug, info, warn};
use secp256k1::{All, PublicKey, Secp256k1, SecretKey};

use super::commitment::{
    check_commitment_sig, redeem_2of2, sign_commitment, Anchor, CommitmentTx, SecretChain,
};
use super::state::{ChannelBalances, ChannelError};
use crate::config::{commit_fee, Config};
use crate::packets::{
    AnchorOffer, Locktime, OpenAnchor, OpenChannel, OpenCommitSig, OpenComplete, Pkt,
    UpdateAccept, UpdateAddHtlc, UpdateComplete, UpdateFailHtlc, UpdateSignature, WireSignature,
};
use crate::sha256;

// =============================================================================
// Peer State Machine
// =============================================================================

/// Where a peer session stands. Drives which packets are legal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    /// Exchanging open packets.
    Init,
    /// Non-funder, waiting for the anchor announcement.
    OpenWaitAnchor,
    /// Funder, waiting for the counterparty's commitment signature.
    OpenWaitSig,
    /// Waiting for the anchor to bury and the peer to say so.
    OpenWaitComplete,
    /// Channel operating, no update in flight.
    Normal,
    /// We proposed an HTLC, awaiting acceptance.
    HtlcProposed,
    /// An update is cross-signing: one side committed, one to go.
    HtlcAccepted,
    /// Local shutdown requested; HTLCs draining.
    Closing,
    /// Session over.
    Closed,
}

// =============================================================================
// Channel Parameters
// =============================================================================

/// One side's static channel parameters plus its live commitment.
#[derive(Clone, Debug)]
pub struct ChannelParams {
    /// Key the anchor 2-of-2 is built over.
    pub commit_key: PublicKey,
    /// Key commitment outputs pay this side at.
    pub final_key: PublicKey,
    /// Relative locktime (seconds) protecting this side's outputs.
    pub locktime_seconds: u32,
    /// Anchor depth this side demands before going live.
    pub min_depth: u32,
    /// Commitment fee proposal, satoshis.
    pub commit_fee: u64,
    pub offer_anchor: bool,
    /// Revocation hash for this side's current commitment.
    pub revocation_hash: [u8; 32],
    /// This side's current commitment transaction, once funded.
    pub commit: Option<CommitmentTx>,
}

// =============================================================================
// In-Flight Update
// =============================================================================

/// The single HTLC proposal allowed in flight, staged until both sides
/// have signed the new commitment pair.
#[derive(Clone, Debug)]
struct HtlcProposal {
    from_us: bool,
    msatoshis: u64,
    cstate: ChannelBalances,
    our_revocation_hash: [u8; 32],
    their_revocation_hash: Option<[u8; 32]>,
    our_commit: Option<CommitmentTx>,
    their_commit: Option<CommitmentTx>,
}

// =============================================================================
// Peer Session
// =============================================================================

/// Everything we track for one channel peer.
pub struct Peer {
    pub state: PeerState,
    config: Config,
    secp: Secp256k1<All>,
    chain: SecretChain,
    commit_secret: SecretKey,
    pub us: ChannelParams,
    pub them: Option<ChannelParams>,
    pub anchor: Option<Anchor>,
    /// Committed balance sheet; None until the anchor is accepted.
    pub cstate: Option<ChannelBalances>,
    current: Option<HtlcProposal>,
    /// Commitment counter, doubling as the secret-chain index.
    pub num_htlcs: u64,
    /// Remote revocation hash displaced by our last commit; what the
    /// counterparty's next revealed preimage must hash to.
    prev_their_revocation_hash: Option<[u8; 32]>,
    /// Decline unaffordable HTLCs instead of tearing the session down.
    pub decline_unaffordable: bool,
}

/// Derive a deterministic secret key from the session seed.
fn derive_key(seed: &[u8; 32], tag: &[u8]) -> SecretKey {
    let mut data = seed.to_vec();
    data.extend_from_slice(tag);
    let mut digest = sha256(&data);
    loop {
        match SecretKey::from_slice(&digest) {
            Ok(sk) => return sk,
            Err(_) => digest = sha256(&digest),
        }
    }
}

impl Peer {
    pub fn new(
        config: Config,
        seed: [u8; 32],
        offer_anchor: bool,
        locktime_seconds: u32,
        min_depth: u32,
        commit_fee: u64,
    ) -> Peer {
        let secp = Secp256k1::new();
        let commit_secret = derive_key(&seed, b"commit");
        let final_secret = derive_key(&seed, b"final");
        let chain = SecretChain::new(sha256(&[&seed[..], &b"chain"[..]].concat()));
        let us = ChannelParams {
            commit_key: PublicKey::from_secret_key(&secp, &commit_secret),
            final_key: PublicKey::from_secret_key(&secp, &final_secret),
            locktime_seconds,
            min_depth,
            commit_fee,
            offer_anchor,
            revocation_hash: chain.revocation_hash(0),
            commit: None,
        };
        Peer {
            state: PeerState::Init,
            config,
            secp,
            chain,
            commit_secret,
            us,
            them: None,
            anchor: None,
            cstate: None,
            current: None,
            num_htlcs: 0,
            prev_their_revocation_hash: None,
            decline_unaffordable: false,
        }
    }

    // =========================================================================
    // Packet Dispatch
    // =========================================================================

    /// Feed one inbound packet through the state machine. Returns the
    /// response to send, if any. Validation failures and out-of-state
    /// packets terminate the session with an Error packet.
    pub fn handle_packet(&mut self, pkt: &Pkt) -> Option<Pkt> {
        let result: Result<Option<Pkt>, ChannelError> = match (self.state, pkt) {
            (PeerState::Init, Pkt::Open(o)) => self.accept_open(o).map(|_| None),
            (PeerState::OpenWaitAnchor, Pkt::OpenAnchor(a)) => {
                self.accept_open_anchor(a).map(Some)
            }
            (PeerState::OpenWaitSig, Pkt::OpenCommitSig(s)) => {
                self.accept_open_commit_sig(s).map(|_| None)
            }
            (PeerState::OpenWaitComplete, Pkt::OpenComplete(c)) => {
                self.accept_open_complete(c).map(|_| None)
            }
            (PeerState::Normal, Pkt::UpdateAddHtlc(u)) => {
                match self.accept_update_add_htlc(u) {
                    Err(ChannelError::CannotAfford(msat)) if self.decline_unaffordable => {
                        info!("Declining HTLC of {} msat", msat);
                        let reason = ChannelError::CannotAfford(msat).to_string().into_bytes();
                        return Some(Pkt::UpdateFailHtlc(UpdateFailHtlc {
                            id: self.num_htlcs,
                            reason,
                        }));
                    }
                    other => other.map(Some),
                }
            }
            (PeerState::HtlcProposed, Pkt::UpdateAccept(a)) => {
                self.accept_update_accept(a).map(Some)
            }
            (PeerState::HtlcAccepted, Pkt::UpdateSignature(s)) => {
                self.accept_update_signature(s).map(Some)
            }
            (PeerState::HtlcAccepted, Pkt::UpdateComplete(c)) => {
                self.accept_update_complete(c).map(|_| None)
            }
            (_, Pkt::Error(e)) => {
                warn!("Peer sent error: {}", e.problem);
                self.state = PeerState::Closed;
                return None;
            }
            (_, other) => Err(ChannelError::UnexpectedPacket(other.name())),
        };

        match result {
            Ok(reply) => reply,
            Err(err) => {
                warn!("Terminating session: {}", err);
                self.state = PeerState::Closed;
                Some(Pkt::error(err.to_string()))
            }
        }
    }

    // =========================================================================
    // Opening
    // =========================================================================

    /// Our half of the open exchange.
    pub fn make_open(&self) -> Pkt {
        Pkt::Open(OpenChannel {
            delay: Locktime::Seconds(self.us.locktime_seconds),
            revocation_hash: self.us.revocation_hash,
            next_revocation_hash: self.chain.revocation_hash(1),
            commit_key: self.us.commit_key,
            final_key: self.us.final_key,
            anch: if self.us.offer_anchor {
                AnchorOffer::WillCreateAnchor
            } else {
                AnchorOffer::WontCreateAnchor
            },
            min_depth: self.us.min_depth,
            commitment_fee: self.us.commit_fee,
        })
    }

    /// Validate the peer's open against our policy and record their half
    /// of the channel parameters.
    pub fn accept_open(&mut self, o: &OpenChannel) -> Result<(), ChannelError> {
        let locktime_seconds = match o.delay {
            Locktime::Seconds(s) if s > self.config.rel_locktime_max => {
                return Err(ChannelError::DelayTooGreat)
            }
            Locktime::Seconds(s) => s,
            Locktime::Blocks(_) => return Err(ChannelError::DelayInBlocks),
        };
        if o.min_depth > self.config.anchor_confirms_max {
            return Err(ChannelError::MinDepthTooGreat);
        }
        if o.commitment_fee < self.config.commitment_fee_min {
            return Err(ChannelError::CommitmentFeeTooLow);
        }
        let them_offer = matches!(o.anch, AnchorOffer::WillCreateAnchor);
        if them_offer == self.us.offer_anchor {
            return Err(ChannelError::AnchorOfferConflict);
        }

        self.them = Some(ChannelParams {
            commit_key: o.commit_key,
            final_key: o.final_key,
            locktime_seconds,
            min_depth: o.min_depth,
            commit_fee: o.commitment_fee,
            offer_anchor: them_offer,
            revocation_hash: o.revocation_hash,
            commit: None,
        });

        if !self.us.offer_anchor {
            self.state = PeerState::OpenWaitAnchor;
        }
        debug!("Open accepted, they offer anchor: {}", them_offer);
        Ok(())
    }

    /// Funder only: record the anchor the funding capability produced and
    /// build the initial commitment pair from it.
    pub fn set_anchor(
        &mut self,
        txid: [u8; 32],
        output_index: u32,
        satoshis: u64,
    ) -> Result<(), ChannelError> {
        if self.state != PeerState::Init || !self.us.offer_anchor {
            return Err(ChannelError::InvalidState("we are not funding this channel"));
        }
        let (them_commit_key, them_commit_fee, them_rev) = match &self.them {
            Some(t) => (t.commit_key, t.commit_fee, t.revocation_hash),
            None => return Err(ChannelError::InvalidState("open not yet exchanged")),
        };

        let anchor = Anchor {
            txid,
            output_index,
            satoshis,
            redeemscript: redeem_2of2(&self.us.commit_key, &them_commit_key),
        };
        let fee = commit_fee(self.us.commit_fee, them_commit_fee);
        let cstate = ChannelBalances::initial_funding(satoshis, fee)
            .ok_or(ChannelError::InsufficientFundsForFee)?;
        let (our_commit, their_commit) =
            self.make_commit_txs(&anchor, &cstate, self.us.revocation_hash, them_rev)?;

        self.us.commit = Some(our_commit);
        if let Some(t) = self.them.as_mut() {
            t.commit = Some(their_commit);
        }
        self.anchor = Some(anchor);
        self.cstate = Some(cstate);
        Ok(())
    }

    /// Funder only: announce the anchor, signing the counterparty's
    /// initial commitment.
    pub fn make_open_anchor(&mut self) -> Result<Pkt, ChannelError> {
        let pkt = {
            let anchor = self
                .anchor
                .as_ref()
                .ok_or(ChannelError::InvalidState("anchor not set"))?;
            let their_commit = self
                .them
                .as_ref()
                .and_then(|t| t.commit.as_ref())
                .ok_or(ChannelError::InvalidState("commitments not built"))?;
            let sig = sign_commitment(
                &self.secp,
                their_commit,
                &anchor.redeemscript,
                &self.commit_secret,
            );
            Pkt::OpenAnchor(OpenAnchor {
                txid: anchor.txid,
                output_index: anchor.output_index,
                amount: anchor.satoshis,
                commit_sig: WireSignature::from_ecdsa(&sig),
            })
        };
        self.state = PeerState::OpenWaitSig;
        Ok(pkt)
    }

    /// Non-funder: take the anchor announcement, build the initial
    /// balance sheet and commitment pair, verify the funder's signature,
    /// and reply with ours.
    pub fn accept_open_anchor(&mut self, a: &OpenAnchor) -> Result<Pkt, ChannelError> {
        let (them_commit_key, them_commit_fee, them_rev) = match &self.them {
            Some(t) => (t.commit_key, t.commit_fee, t.revocation_hash),
            None => return Err(ChannelError::UnexpectedPacket("open_anchor")),
        };

        let anchor = Anchor {
            txid: a.txid,
            output_index: a.output_index,
            satoshis: a.amount,
            redeemscript: redeem_2of2(&self.us.commit_key, &them_commit_key),
        };

        // Funder's view of the opening balances, inverted so "ours" is us.
        let fee = commit_fee(them_commit_fee, self.us.commit_fee);
        let mut cstate = ChannelBalances::initial_funding(a.amount, fee)
            .ok_or(ChannelError::InsufficientFundsForFee)?;
        cstate.invert();

        let (our_commit, their_commit) =
            self.make_commit_txs(&anchor, &cstate, self.us.revocation_hash, them_rev)?;

        let their_sig = a
            .commit_sig
            .to_ecdsa()
            .map_err(|_| ChannelError::MalformedSignature)?;
        if !check_commitment_sig(
            &self.secp,
            &our_commit,
            &anchor.redeemscript,
            &them_commit_key,
            &their_sig,
        ) {
            return Err(ChannelError::BadSignature);
        }

        let reply = sign_commitment(
            &self.secp,
            &their_commit,
            &anchor.redeemscript,
            &self.commit_secret,
        );

        self.us.commit = Some(our_commit);
        if let Some(t) = self.them.as_mut() {
            t.commit = Some(their_commit);
        }
        self.anchor = Some(anchor);
        self.cstate = Some(cstate);
        self.state = PeerState::OpenWaitComplete;
        info!("Anchor accepted: {} sat", a.amount);

        Ok(Pkt::OpenCommitSig(OpenCommitSig {
            sig: WireSignature::from_ecdsa(&reply),
        }))
    }

    /// Funder: verify the non-funder's signature over our initial
    /// commitment.
    pub fn accept_open_commit_sig(&mut self, s: &OpenCommitSig) -> Result<(), ChannelError> {
        let their_sig = s
            .sig
            .to_ecdsa()
            .map_err(|_| ChannelError::MalformedSignature)?;
        {
            let anchor = self
                .anchor
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("open_commit_sig"))?;
            let our_commit = self
                .us
                .commit
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("open_commit_sig"))?;
            let them_key = self
                .them
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("open_commit_sig"))?
                .commit_key;
            if !check_commitment_sig(
                &self.secp,
                our_commit,
                &anchor.redeemscript,
                &them_key,
                &their_sig,
            ) {
                return Err(ChannelError::BadSignature);
            }
        }
        self.state = PeerState::OpenWaitComplete;
        Ok(())
    }

    /// Notify the peer our view of the anchor reached min-depth.
    pub fn make_open_complete(&self) -> Pkt {
        Pkt::OpenComplete(OpenComplete { blockid: None })
    }

    /// The peer saw the anchor bury; channel goes live.
    pub fn accept_open_complete(&mut self, _c: &OpenComplete) -> Result<(), ChannelError> {
        self.state = PeerState::Normal;
        info!("Channel open complete, entering normal operation");
        Ok(())
    }

    // =========================================================================
    // HTLC Update
    // =========================================================================

    /// Propose an HTLC to the peer. Stages the new balance sheet and our
    /// next revocation hash; commitments are built once the peer accepts.
    pub fn make_update_add_htlc(
        &mut self,
        msatoshis: u64,
        rhash: [u8; 32],
        expiry: Locktime,
    ) -> Result<Pkt, ChannelError> {
        if self.state != PeerState::Normal {
            return Err(ChannelError::InvalidState("channel not in normal operation"));
        }
        if !expiry.is_valid_absolute() {
            return Err(ChannelError::InvalidHtlcExpiry);
        }
        if msatoshis > u32::MAX as u64 {
            return Err(ChannelError::InvalidState("htlc amount exceeds wire range"));
        }
        let mut cstate = self
            .cstate
            .clone()
            .ok_or(ChannelError::InvalidState("channel not funded"))?;
        cstate.offer_htlc(msatoshis, expiry, rhash)?;

        let our_rev = self.chain.revocation_hash(self.num_htlcs + 1);
        self.current = Some(HtlcProposal {
            from_us: true,
            msatoshis,
            cstate,
            our_revocation_hash: our_rev,
            their_revocation_hash: None,
            our_commit: None,
            their_commit: None,
        });
        self.state = PeerState::HtlcProposed;

        Ok(Pkt::UpdateAddHtlc(UpdateAddHtlc {
            amount_msat: msatoshis as u32,
            r_hash: rhash,
            expiry,
            revocation_hash: our_rev,
        }))
    }

    /// Receiver side of update_add_htlc: stage the debit against the
    /// sender, build the tentative commitment pair, and accept.
    pub fn accept_update_add_htlc(&mut self, u: &UpdateAddHtlc) -> Result<Pkt, ChannelError> {
        if !u.expiry.is_valid_absolute() {
            return Err(ChannelError::InvalidHtlcExpiry);
        }
        let msatoshis = u.amount_msat as u64;
        let mut cstate = self
            .cstate
            .clone()
            .ok_or(ChannelError::UnexpectedPacket("update_add_htlc"))?;
        cstate.receive_htlc(msatoshis, u.expiry, u.r_hash)?;

        let our_rev = self.chain.revocation_hash(self.num_htlcs + 1);
        let their_rev = u.revocation_hash;

        let (our_commit, their_commit, sig) = {
            let anchor = self
                .anchor
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("update_add_htlc"))?;
            let (ours, theirs) = self.make_commit_txs(anchor, &cstate, our_rev, their_rev)?;
            let sig = sign_commitment(
                &self.secp,
                &theirs,
                &anchor.redeemscript,
                &self.commit_secret,
            );
            (ours, theirs, sig)
        };

        self.current = Some(HtlcProposal {
            from_us: false,
            msatoshis,
            cstate,
            our_revocation_hash: our_rev,
            their_revocation_hash: Some(their_rev),
            our_commit: Some(our_commit),
            their_commit: Some(their_commit),
        });
        self.state = PeerState::HtlcAccepted;
        debug!("HTLC of {} msat staged", msatoshis);

        Ok(Pkt::UpdateAccept(UpdateAccept {
            sig: WireSignature::from_ecdsa(&sig),
            revocation_hash: our_rev,
        }))
    }

    /// Sender side of update_accept: rebuild the commitment pair with the
    /// receiver's revocation hash, verify their signature over ours,
    /// commit, and revoke our previous commitment.
    pub fn accept_update_accept(&mut self, a: &UpdateAccept) -> Result<Pkt, ChannelError> {
        let their_sig = a
            .sig
            .to_ecdsa()
            .map_err(|_| ChannelError::MalformedSignature)?;

        let (our_commit, their_commit, reply_sig) = {
            let cur = self
                .current
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("update_accept"))?;
            if !cur.from_us {
                return Err(ChannelError::UnexpectedPacket("update_accept"));
            }
            let anchor = self
                .anchor
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("update_accept"))?;
            let them_key = self
                .them
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("update_accept"))?
                .commit_key;

            let (ours, theirs) = self.make_commit_txs(
                anchor,
                &cur.cstate,
                cur.our_revocation_hash,
                a.revocation_hash,
            )?;
            if !check_commitment_sig(
                &self.secp,
                &ours,
                &anchor.redeemscript,
                &them_key,
                &their_sig,
            ) {
                return Err(ChannelError::BadSignature);
            }
            let reply_sig = sign_commitment(
                &self.secp,
                &theirs,
                &anchor.redeemscript,
                &self.commit_secret,
            );
            (ours, theirs, reply_sig)
        };

        if let Some(cur) = self.current.as_mut() {
            cur.their_revocation_hash = Some(a.revocation_hash);
            cur.our_commit = Some(our_commit);
            cur.their_commit = Some(their_commit);
        }

        // From here the preimage goes out, so the new state must already
        // be the one we stand behind.
        self.commit_proposal();
        let preimage = self.chain.preimage(self.num_htlcs - 1);
        self.state = PeerState::HtlcAccepted;

        Ok(Pkt::UpdateSignature(UpdateSignature {
            sig: WireSignature::from_ecdsa(&reply_sig),
            revocation_preimage: preimage,
        }))
    }

    /// Receiver side of update_signature: verify their signature over our
    /// new commitment and their revocation of the old one, then commit
    /// and reveal our own preimage.
    pub fn accept_update_signature(&mut self, s: &UpdateSignature) -> Result<Pkt, ChannelError> {
        let their_sig = s
            .sig
            .to_ecdsa()
            .map_err(|_| ChannelError::MalformedSignature)?;
        {
            let cur = self
                .current
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("update_signature"))?;
            if cur.from_us {
                return Err(ChannelError::UnexpectedPacket("update_signature"));
            }
            let anchor = self
                .anchor
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("update_signature"))?;
            let them = self
                .them
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("update_signature"))?;
            let our_commit = cur
                .our_commit
                .as_ref()
                .ok_or(ChannelError::UnexpectedPacket("update_signature"))?;

            if !check_commitment_sig(
                &self.secp,
                our_commit,
                &anchor.redeemscript,
                &them.commit_key,
                &their_sig,
            ) {
                return Err(ChannelError::BadSignature);
            }
            // Preimage must revoke the commitment they are replacing.
            if sha256(&s.revocation_preimage) != them.revocation_hash {
                return Err(ChannelError::BadRevocationPreimage);
            }
        }

        self.commit_proposal();
        let preimage = self.chain.preimage(self.num_htlcs - 1);
        self.state = PeerState::Normal;

        Ok(Pkt::UpdateComplete(UpdateComplete {
            revocation_preimage: preimage,
        }))
    }

    /// Originator side of update_complete: the receiver's preimage must
    /// revoke the commitment our own commit displaced.
    pub fn accept_update_complete(&mut self, c: &UpdateComplete) -> Result<(), ChannelError> {
        if self.current.is_some() {
            return Err(ChannelError::UnexpectedPacket("update_complete"));
        }
        let expected = self
            .prev_their_revocation_hash
            .ok_or(ChannelError::UnexpectedPacket("update_complete"))?;
        if sha256(&c.revocation_preimage) != expected {
            return Err(ChannelError::BadRevocationPreimage);
        }
        self.state = PeerState::Normal;
        debug!("Update complete, {} commitments exchanged", self.num_htlcs);
        Ok(())
    }

    // =========================================================================
    // Closing (local command only; negotiation is not part of this engine)
    // =========================================================================

    pub fn shutdown(&mut self) -> Result<(), ChannelError> {
        if self.state != PeerState::Normal {
            return Err(ChannelError::InvalidState("can only shut down a normal channel"));
        }
        self.state = PeerState::Closing;
        Ok(())
    }

    pub fn mark_closed(&mut self) {
        self.state = PeerState::Closed;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Build the commitment pair for a balance sheet: ours from our view
    /// with our revocation hash, theirs inverted with theirs.
    fn make_commit_txs(
        &self,
        anchor: &Anchor,
        cstate: &ChannelBalances,
        our_rev: [u8; 32],
        their_rev: [u8; 32],
    ) -> Result<(CommitmentTx, CommitmentTx), ChannelError> {
        let them = self
            .them
            .as_ref()
            .ok_or(ChannelError::InvalidState("channel parameters incomplete"))?;
        let ours = CommitmentTx::build(
            anchor,
            cstate,
            &self.us.final_key,
            &them.final_key,
            our_rev,
            self.us.locktime_seconds,
        );
        let theirs = CommitmentTx::build(
            anchor,
            &cstate.inverted(),
            &them.final_key,
            &self.us.final_key,
            their_rev,
            them.locktime_seconds,
        );
        Ok((ours, theirs))
    }

    /// The atomic commit: check conservation, swap in the proposal, and
    /// remember which remote commitment just became revocable. A failed
    /// conservation check is a bug in this engine and aborts.
    fn commit_proposal(&mut self) {
        let cur = match self.current.take() {
            Some(c) => c,
            None => panic!("Atomic commit without a staged proposal"),
        };
        let old = match &self.cstate {
            Some(c) => c,
            None => panic!("Atomic commit without funding"),
        };

        // HTLCs can't change the total balance in the channel.
        if old.total_msat() != cur.cstate.total_msat() {
            panic!(
                "Illegal funding transition from {}/{} (total {}) to {}/{} (total {})",
                old.ours.pay_msat,
                old.theirs.pay_msat,
                old.total_msat(),
                cur.cstate.ours.pay_msat,
                cur.cstate.theirs.pay_msat,
                cur.cstate.total_msat()
            );
        }

        let them = match self.them.as_mut() {
            Some(t) => t,
            None => panic!("Atomic commit without channel parameters"),
        };
        let their_rev = match cur.their_revocation_hash {
            Some(h) => h,
            None => panic!("Atomic commit without remote revocation hash"),
        };

        self.prev_their_revocation_hash = Some(them.revocation_hash);
        them.revocation_hash = their_rev;
        them.commit = cur.their_commit;
        self.us.revocation_hash = cur.our_revocation_hash;
        self.us.commit = cur.our_commit;
        self.cstate = Some(cur.cstate);
        self.num_htlcs += 1;
        info!(
            "Committed update of {} msat, commitment #{}",
            cur.msatoshis, self.num_htlcs
        );
    }
}

// =============================================================================
// Tests
// =============================================================================
