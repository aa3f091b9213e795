// =============================================================================
// EMBERLINK v0.4 - Payment Routing
// =============================================================================
//
// Least-cost route discovery over the known channel graph.
//
// Architecture:
// ┌─────────────────────────────────────────────────────────────────────────┐
// │                            ROUTING ENGINE                               │
// ├─────────────────────────────────────────────────────────────────────────┤
// │                                                                         │
// │  ┌──────────┐      ┌─────────────┐      ┌──────────────────────────┐   │
// │  │  Nodes   │─────▶│ Connections │─────▶│  Bellman-Ford-Gibson     │   │
// │  │ (arena)  │      │  (directed) │      │  (per-hop-count slots)   │   │
// │  └──────────┘      └─────────────┘      └──────────────────────────┘   │
// │                                                                         │
// │  Fees depend on the amount routed, so costs cannot collapse to one      │
// │  value per node: the search keeps the best total per path length and    │
// │  walks backwards from the destination.                                  │
// │                                                                         │
// └─────────────────────────────────────────────────────────────────────────┘
//
// =============================================================================

pub mod graph;
pub mod route;

pub use graph::{ChannelInfo, Connection, Node, Router};
pub use route::{connection_fee, risk_fee, Route};

// =============================================================================
// Constants
// =============================================================================

/// Maximum supported payment path length.
pub const MAX_HOPS: usize = 20;

/// 365.25 * 24 * 60 / 10, for the time-lock risk premium.
pub const BLOCKS_PER_YEAR: u64 = 52596;

/// Too big to reach, small enough that additions don't wrap.
pub const INFINITE: i64 = 0x3FFF_FFFF_FFFF_FFFF;
