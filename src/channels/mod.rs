// =============================================================================
// EMBERLINK v0.4 - Payment Channels
// =============================================================================
//
// The bilateral channel protocol: opening over a 2-of-2 anchor, HTLC
// updates across cross-signed commitment pairs, and revocation of old
// commitments through the per-commitment secret chain.
//
// Architecture:
// ┌─────────────────────────────────────────────────────────────────────────┐
// │                         PAYMENT CHANNELS                                │
// ├─────────────────────────────────────────────────────────────────────────┤
// │                                                                         │
// │  ┌──────────┐     ┌────────────┐     ┌──────────┐     ┌─────────────┐  │
// │  │ Balances │────▶│ Commitment │────▶│  Secret  │────▶│    Peer     │  │
// │  │ (2-sided)│     │   Pair     │     │  Chain   │     │  Protocol   │  │
// │  └──────────┘     └────────────┘     └──────────┘     └─────────────┘  │
// │       │                                                      │          │
// │       ▼                                                      ▼          │
// │  ┌──────────┐                                        ┌──────────────┐  │
// │  │  HTLCs   │                                        │ State machine│  │
// │  └──────────┘                                        └──────────────┘  │
// │                                                                         │
// └─────────────────────────────────────────────────────────────────────────┘
//
// =============================================================================

pub mod commitment;
pub mod htlc;
pub mod protocol;
pub mod state;

pub use commitment::{Anchor, CommitmentTx, SecretChain};
pub use htlc::{Htlc, PaymentPreimage};
pub use protocol::{ChannelParams, Peer, PeerState};
pub use state::{ChannelBalances, ChannelError, ChannelSide};
