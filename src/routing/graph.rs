// =============================================================================
// EMBERLINK v0.4 - Channel Graph
// =============================================================================
//
// The directed graph of announced channels. Nodes and edges live in two
// arenas; adjacency lists and the path-finding scratch refer to them by
// index. Nodes are created on demand and outlive their edges; removing an
// edge unlinks it from both endpoints.
//
// =============================================================================

use log::{debug, info};
use secp256k1::PublicKey;
use std::collections::HashMap;

use super::{INFINITE, MAX_HOPS};

// =============================================================================
// Path-Finding Scratch
// =============================================================================

/// One slot of per-node search state: the best known amount and risk for a
/// path of exactly this many remaining hops, and the edge it came through.
#[derive(Clone, Copy, Debug)]
pub struct BfgSlot {
    /// Total millisatoshi to get here from the destination.
    pub total: i64,
    /// Accumulated risk premium of that path.
    pub risk: u64,
    /// Edge the total arrived through.
    pub prev: Option<usize>,
}

impl BfgSlot {
    pub(super) fn unreached() -> Self {
        BfgSlot {
            total: INFINITE,
            risk: 0,
            prev: None,
        }
    }
}

// =============================================================================
// Nodes & Connections
// =============================================================================

/// A node in the channel graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: PublicKey,
    /// Host and port are display-only metadata.
    pub hostname: Option<String>,
    pub port: u16,
    /// Edge ids pointing at us.
    pub incoming: Vec<usize>,
    /// Edge ids leaving us.
    pub outgoing: Vec<usize>,
    /// Search scratch, reset before every route lookup.
    pub(super) bfg: [BfgSlot; MAX_HOPS + 1],
}

impl Node {
    fn new(id: PublicKey) -> Self {
        Node {
            id,
            hostname: None,
            port: 0,
            incoming: Vec::new(),
            outgoing: Vec::new(),
            bfg: [BfgSlot::unreached(); MAX_HOPS + 1],
        }
    }
}

/// A directed channel edge with its advertised fee schedule.
#[derive(Clone, Copy, Debug)]
pub struct Connection {
    /// Node indices into the router's arena.
    pub src: usize,
    pub dst: usize,
    /// Base fee in millisatoshi.
    pub base_fee: u32,
    /// Fee per million millisatoshi routed. May be negative.
    pub proportional_fee: i32,
    /// Blocks of time-lock this hop adds.
    pub delay: u32,
    /// Minimum remaining time-lock this hop accepts. Recorded, not yet
    /// consulted by the search.
    pub min_blocks: u32,
}

/// One channel as reported over RPC.
#[derive(Clone, Debug)]
pub struct ChannelInfo {
    pub from: PublicKey,
    pub to: PublicKey,
    pub base_fee: u32,
    pub proportional_fee: i32,
    pub delay: u32,
    pub min_blocks: u32,
}

// =============================================================================
// Router
// =============================================================================

/// The channel graph plus our own identity in it.
#[derive(Clone, Debug)]
pub struct Router {
    local_id: PublicKey,
    pub(super) nodes: Vec<Node>,
    pub(super) edges: Vec<Connection>,
    index: HashMap<PublicKey, usize>,
    /// When set, un-routable HTLCs are forwarded instead of failed.
    /// Debug aid, flipped by the dev-routefail RPC.
    pub route_fail_disabled: bool,
}

impl Router {
    pub fn new(local_id: PublicKey) -> Self {
        let mut router = Router {
            local_id,
            nodes: Vec::new(),
            edges: Vec::new(),
            index: HashMap::new(),
            route_fail_disabled: false,
        };
        router.ensure_node(&local_id);
        router
    }

    pub fn local_id(&self) -> &PublicKey {
        &self.local_id
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get_node(&self, id: &PublicKey) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub(super) fn node_index(&self, id: &PublicKey) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Look up a node, creating it when first referenced.
    fn ensure_node(&mut self, id: &PublicKey) -> usize {
        if let Some(&i) = self.index.get(id) {
            return i;
        }
        debug!("Creating new node {}", hex::encode(id.serialize()));
        let i = self.nodes.len();
        self.nodes.push(Node::new(*id));
        self.index.insert(*id, i);
        i
    }

    /// Upsert display metadata for a node.
    pub fn add_node(&mut self, id: &PublicKey, hostname: Option<&str>, port: u16) {
        let i = self.ensure_node(id);
        let node = &mut self.nodes[i];
        node.hostname = hostname.map(str::to_owned);
        node.port = port;
    }

    /// Upsert the directed edge from -> to. Missing nodes are created
    /// silently; re-adding an existing edge updates it in place.
    pub fn add_connection(
        &mut self,
        from: &PublicKey,
        to: &PublicKey,
        base_fee: u32,
        proportional_fee: i32,
        delay: u32,
        min_blocks: u32,
    ) -> usize {
        let src = self.ensure_node(from);
        let dst = self.ensure_node(to);

        let existing = self.nodes[dst]
            .incoming
            .iter()
            .copied()
            .find(|&e| self.edges[e].src == src);

        let e = match existing {
            Some(e) => {
                debug!(
                    "Updating existing route from {} to {}",
                    hex::encode(from.serialize()),
                    hex::encode(to.serialize())
                );
                e
            }
            None => {
                debug!(
                    "Creating new route from {} to {}",
                    hex::encode(from.serialize()),
                    hex::encode(to.serialize())
                );
                let e = self.edges.len();
                self.edges.push(Connection {
                    src,
                    dst,
                    base_fee: 0,
                    proportional_fee: 0,
                    delay: 0,
                    min_blocks: 0,
                });
                self.nodes[dst].incoming.push(e);
                self.nodes[src].outgoing.push(e);
                e
            }
        };

        let c = &mut self.edges[e];
        c.base_fee = base_fee;
        c.proportional_fee = proportional_fee;
        c.delay = delay;
        c.min_blocks = min_blocks;
        e
    }

    /// Remove the directed edge from -> to. Idempotent: a missing edge or
    /// endpoint is logged, not an error.
    pub fn remove_connection(&mut self, from: &PublicKey, to: &PublicKey) {
        info!(
            "Removing route from {} to {}",
            hex::encode(from.serialize()),
            hex::encode(to.serialize())
        );

        let (src, dst) = match (self.node_index(from), self.node_index(to)) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                debug!("Not found: src or dst unknown");
                return;
            }
        };

        let found = self.nodes[src]
            .outgoing
            .iter()
            .copied()
            .find(|&e| self.edges[e].dst == dst);

        match found {
            Some(e) => self.remove_edge(e),
            None => debug!(
                "None of {} routes matched",
                self.nodes[src].outgoing.len()
            ),
        }
    }

    /// Unlink an edge from both endpoints and drop it from the arena.
    fn remove_edge(&mut self, e: usize) {
        let c = self.edges[e];
        Self::unlink(&mut self.nodes[c.src].outgoing, e);
        Self::unlink(&mut self.nodes[c.dst].incoming, e);

        let last = self.edges.len() - 1;
        self.edges.swap_remove(e);
        if e != last {
            // The former last edge now lives at index e; rewrite the ids
            // its endpoints hold.
            let moved = self.edges[e];
            Self::relink(&mut self.nodes[moved.src].outgoing, last, e);
            Self::relink(&mut self.nodes[moved.dst].incoming, last, e);
        }
    }

    fn unlink(list: &mut Vec<usize>, e: usize) {
        match list.iter().position(|&x| x == e) {
            Some(pos) => {
                list.remove(pos);
            }
            None => panic!("Connection not found in adjacency array"),
        }
    }

    fn relink(list: &mut [usize], old: usize, new: usize) {
        match list.iter().position(|&x| x == old) {
            Some(pos) => list[pos] = new,
            None => panic!("Connection not found in adjacency array"),
        }
    }

    pub fn connection(&self, e: usize) -> &Connection {
        &self.edges[e]
    }

    pub fn connection_count(&self) -> usize {
        self.edges.len()
    }

    /// All known channels, resolved to pubkeys for the RPC surface.
    pub fn list_channels(&self) -> Vec<ChannelInfo> {
        self.edges
            .iter()
            .map(|c| ChannelInfo {
                from: self.nodes[c.src].id,
                to: self.nodes[c.dst].id,
                base_fee: c.base_fee,
                proportional_fee: c.proportional_fee,
                delay: c.delay,
                min_blocks: c.min_blocks,
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{Secp256k1, SecretKey};

    fn key(byte: u8) -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    /// Every edge must appear exactly once in both endpoints' lists.
    fn check_symmetry(router: &Router) {
        for (e, c) in router.edges.iter().enumerate() {
            assert_eq!(
                router.nodes[c.src].outgoing.iter().filter(|&&x| x == e).count(),
                1
            );
            assert_eq!(
                router.nodes[c.dst].incoming.iter().filter(|&&x| x == e).count(),
                1
            );
        }
        for (i, node) in router.nodes.iter().enumerate() {
            for &e in &node.outgoing {
                assert_eq!(router.edges[e].src, i);
            }
            for &e in &node.incoming {
                assert_eq!(router.edges[e].dst, i);
            }
        }
    }

    #[test]
    fn test_add_creates_nodes_silently() {
        let mut router = Router::new(key(1));
        router.add_connection(&key(2), &key(3), 10, 100, 6, 0);
        assert_eq!(router.nodes().len(), 3);
        assert_eq!(router.connection_count(), 1);
        check_symmetry(&router);
    }

    #[test]
    fn test_add_is_upsert() {
        let mut router = Router::new(key(1));
        router.add_connection(&key(1), &key(2), 10, 100, 6, 0);
        router.add_connection(&key(1), &key(2), 99, -5, 12, 3);

        assert_eq!(router.connection_count(), 1);
        let c = router.connection(0);
        assert_eq!(c.base_fee, 99);
        assert_eq!(c.proportional_fee, -5);
        assert_eq!(c.delay, 12);
        assert_eq!(c.min_blocks, 3);
        check_symmetry(&router);
    }

    #[test]
    fn test_remove_leaves_orphan_nodes() {
        let mut router = Router::new(key(1));
        router.add_connection(&key(1), &key(2), 10, 100, 6, 0);
        router.remove_connection(&key(1), &key(2));

        assert_eq!(router.connection_count(), 0);
        // Orphan nodes remain.
        assert_eq!(router.nodes().len(), 2);
        assert!(router.get_node(&key(2)).unwrap().incoming.is_empty());
        check_symmetry(&router);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut router = Router::new(key(1));
        router.remove_connection(&key(7), &key(8));
        router.add_connection(&key(1), &key(2), 10, 100, 6, 0);
        router.remove_connection(&key(1), &key(2));
        router.remove_connection(&key(1), &key(2));
        assert_eq!(router.connection_count(), 0);
    }

    #[test]
    fn test_remove_only_requested_direction() {
        let mut router = Router::new(key(1));
        router.add_connection(&key(1), &key(2), 10, 100, 6, 0);
        router.add_connection(&key(2), &key(1), 20, 200, 6, 0);
        router.remove_connection(&key(1), &key(2));

        assert_eq!(router.connection_count(), 1);
        let c = router.connection(0);
        assert_eq!(router.nodes()[c.src].id, key(2));
        assert_eq!(router.nodes()[c.dst].id, key(1));
        check_symmetry(&router);
    }

    #[test]
    fn test_swap_remove_rewrites_edge_ids() {
        let mut router = Router::new(key(1));
        router.add_connection(&key(1), &key(2), 1, 0, 0, 0);
        router.add_connection(&key(2), &key(3), 2, 0, 0, 0);
        router.add_connection(&key(3), &key(4), 3, 0, 0, 0);
        // Removing the first edge swaps the last into its slot.
        router.remove_connection(&key(1), &key(2));
        assert_eq!(router.connection_count(), 2);
        check_symmetry(&router);
    }

    #[test]
    fn test_add_node_upserts_metadata() {
        let mut router = Router::new(key(1));
        router.add_node(&key(5), Some("ember.example"), 9735);
        router.add_node(&key(5), Some("other.example"), 9736);

        let node = router.get_node(&key(5)).unwrap();
        assert_eq!(node.hostname.as_deref(), Some("other.example"));
        assert_eq!(node.port, 9736);
        assert_eq!(router.nodes().len(), 2);
    }
}
