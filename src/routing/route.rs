// =============================================================================
// EMBERLINK v0.4 - Route Finding (Bellman-Ford-Gibson)
// =============================================================================
//
// Like Bellman-Ford, but fees depend on the amount passing through an
// edge, so per-node state cannot collapse to a single best cost. Every
// node keeps one slot per path length; the search starts at the
// destination with the amount that must arrive there and relaxes
// backwards until it reaches us.
//
// =============================================================================

use log::{debug, error, info};
use secp256k1::PublicKey;
use std::collections::HashSet;

use super::graph::{BfgSlot, Router};
use super::{Connection, BLOCKS_PER_YEAR, INFINITE, MAX_HOPS};

// =============================================================================
// Cost Model
// =============================================================================

/// Fee charged by a connection for forwarding `msatoshi`. Returns INFINITE
/// when the proportional term overflows: the edge is unusable at this
/// amount.
pub fn connection_fee(c: &Connection, msatoshi: i64) -> i64 {
    match (c.proportional_fee as i64).checked_mul(msatoshi) {
        Some(prop) => c.base_fee as i64 + prop / 1_000_000,
        None => INFINITE,
    }
}

/// Risk premium of hanging `amount` behind `delay` blocks of time-lock.
/// The constant 1 prefers shorter routes, all things equal. If fees are
/// so negative we're making money, ignore risk.
pub fn risk_fee(amount: i64, delay: u32, riskfactor: f64) -> u64 {
    if amount < 0 {
        return 1;
    }
    1 + (amount as f64 * delay as f64 * riskfactor / BLOCKS_PER_YEAR as f64 / 10000.0) as u64
}

// =============================================================================
// Route
// =============================================================================

/// A found route: the peer to hand the payment to, the total fee above
/// the amount that must arrive, and every edge from us to the destination.
#[derive(Clone, Debug)]
pub struct Route {
    pub peer: PublicKey,
    /// Total routing fee in millisatoshi. Negative when the route pays us.
    pub fee: i64,
    /// Edge ids from our first hop down to the destination.
    pub hops: Vec<usize>,
}

// =============================================================================
// Search
// =============================================================================

impl Router {
    fn clear_bfg(&mut self) {
        for node in &mut self.nodes {
            for slot in node.bfg.iter_mut() {
                *slot = BfgSlot::unreached();
            }
        }
    }

    /// Find the cheapest route delivering `msatoshi` to `dest`, judged by
    /// total amount plus time-lock risk. Returns None when the destination
    /// is unknown, unreachable, or the first hop is not a live peer.
    pub fn find_route(
        &mut self,
        dest: &PublicKey,
        msatoshi: u64,
        riskfactor: f64,
        live_peers: &HashSet<PublicKey>,
    ) -> Option<Route> {
        let local_id = *self.local_id();
        let dst = match self.node_index(dest) {
            Some(i) => i,
            None => {
                info!("find_route: cannot find {}", hex::encode(dest.serialize()));
                return None;
            }
        };
        let local = self.node_index(&local_id)?;

        // We map backwards: we know the amount wanted at the destination
        // and derive how much we must send.
        self.clear_bfg();
        self.nodes[dst].bfg[0] = BfgSlot {
            total: msatoshi as i64,
            risk: 0,
            prev: None,
        };

        for run in 0..MAX_HOPS {
            debug!("Run {}", run);
            for e in 0..self.edges.len() {
                let c = self.edges[e];
                for h in 0..MAX_HOPS {
                    let slot = self.nodes[c.dst].bfg[h];
                    if slot.total >= INFINITE {
                        continue;
                    }
                    let fee = connection_fee(&c, slot.total);
                    if fee >= INFINITE {
                        continue;
                    }
                    let total = slot.total + fee;
                    let risk = slot
                        .risk
                        .saturating_add(risk_fee(total, c.delay, riskfactor));
                    let cur = self.nodes[c.src].bfg[h + 1];
                    if (total as i128 + risk as i128) < (cur.total as i128 + cur.risk as i128) {
                        self.nodes[c.src].bfg[h + 1] = BfgSlot {
                            total,
                            risk,
                            prev: Some(e),
                        };
                    }
                }
            }
        }

        // Cheapest advertised amount wins; ties go to fewer hops.
        let mut best = 1;
        for i in 2..=MAX_HOPS {
            if self.nodes[local].bfg[i].total < self.nodes[local].bfg[best].total {
                best = i;
            }
        }
        if self.nodes[local].bfg[best].total >= INFINITE {
            info!("find_route: no route to {}", hex::encode(dest.serialize()));
            return None;
        }

        let fee = self.nodes[local].bfg[best].total - msatoshi as i64;

        // Walk the back-pointers from us down to the destination.
        let mut hops = Vec::with_capacity(best);
        let mut n = local;
        for i in 0..best {
            let e = match self.nodes[n].bfg[best - i].prev {
                Some(e) => e,
                None => panic!("Route reconstruction lost its back-pointer"),
            };
            hops.push(e);
            n = self.edges[e].dst;
        }
        debug_assert_eq!(n, dst);

        let peer = self.nodes[self.edges[hops[0]].dst].id;
        if !live_peers.contains(&peer) {
            error!("No peer {}", hex::encode(peer.serialize()));
            return None;
        }

        info!(
            "find_route: via {} fee {} over {} hop(s)",
            hex::encode(peer.serialize()),
            fee,
            best
        );
        Some(Route { peer, fee, hops })
    }
}

// =============================================================================
// Tests
// =============================================================================
