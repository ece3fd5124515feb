//! Bidirectional bookkeeping of stream paths to/from peers.

use log::error;

use std::collections::BTreeMap;

use crate::EndpointId;

/// Locally unique small integer naming a stream direction to/from one peer.
pub type Slot = u32;

/// Sentinel for "no slot". Pending connections start out with it.
pub const INVALID_SLOT: Slot = 0;

/// Four maps tying peer handles to inbound and outbound slots.
///
/// Invariants, for every peer `h`:
/// * `hdl_to_out[h] = s` iff `out_to_hdl[s] = h`, symmetrically for inbound.
/// * `h` is connected iff it appears in at least one direction.
/// * `h` is fully peered iff it appears in both.
pub struct PathTable {
    prefix: String,
    hdl_to_out: BTreeMap<EndpointId, Slot>,
    out_to_hdl: BTreeMap<Slot, EndpointId>,
    hdl_to_in: BTreeMap<EndpointId, Slot>,
    in_to_hdl: BTreeMap<Slot, EndpointId>,
}

impl PathTable {
    pub fn new(prefix: &str) -> PathTable {
        PathTable {
            prefix: prefix.to_string(),
            hdl_to_out: BTreeMap::default(),
            out_to_hdl: BTreeMap::default(),
            hdl_to_in: BTreeMap::default(),
            in_to_hdl: BTreeMap::default(),
        }
    }

    /// Add an outbound path `slot` towards `hdl`. Duplicate insertion is a
    /// bug in the caller, reported but not fatal.
    pub fn add_outbound(&mut self, slot: Slot, hdl: EndpointId) {
        if slot == INVALID_SLOT {
            error!("{} tried to add an invalid outbound path", self.prefix);
            return;
        }
        if self.out_to_hdl.contains_key(&slot) {
            error!("{} out_to_hdl entry already exists slot:{}", self.prefix, slot);
            return;
        }
        self.out_to_hdl.insert(slot, hdl);
        if self.hdl_to_out.contains_key(&hdl) {
            error!("{} hdl_to_out entry already exists hdl:{}", self.prefix, hdl);
            return;
        }
        self.hdl_to_out.insert(hdl, slot);
    }

    /// Add an inbound path `slot` from `hdl`. Duplicate insertion is a bug in
    /// the caller, reported but not fatal.
    pub fn add_inbound(&mut self, slot: Slot, hdl: EndpointId) {
        if slot == INVALID_SLOT {
            error!("{} tried to add an invalid inbound path", self.prefix);
            return;
        }
        if self.in_to_hdl.contains_key(&slot) {
            error!("{} in_to_hdl entry already exists slot:{}", self.prefix, slot);
            return;
        }
        self.in_to_hdl.insert(slot, hdl);
        if self.hdl_to_in.contains_key(&hdl) {
            error!("{} hdl_to_in entry already exists hdl:{}", self.prefix, hdl);
            return;
        }
        self.hdl_to_in.insert(hdl, slot);
    }

    pub fn outbound_slot(&self, hdl: &EndpointId) -> Option<Slot> {
        self.hdl_to_out.get(hdl).copied()
    }

    pub fn inbound_slot(&self, hdl: &EndpointId) -> Option<Slot> {
        self.hdl_to_in.get(hdl).copied()
    }

    pub fn outbound_peer(&self, slot: Slot) -> Option<EndpointId> {
        self.out_to_hdl.get(&slot).copied()
    }

    pub fn inbound_peer(&self, slot: Slot) -> Option<EndpointId> {
        self.in_to_hdl.get(&slot).copied()
    }

    /// Remove the outbound path towards `hdl`, and its paired reverse entry.
    pub fn remove_outbound(&mut self, hdl: &EndpointId) -> Option<Slot> {
        let slot = self.hdl_to_out.remove(hdl)?;
        self.out_to_hdl.remove(&slot);
        Some(slot)
    }

    /// Remove the inbound path from `hdl`, and its paired reverse entry.
    pub fn remove_inbound(&mut self, hdl: &EndpointId) -> Option<Slot> {
        let slot = self.hdl_to_in.remove(hdl)?;
        self.in_to_hdl.remove(&slot);
        Some(slot)
    }

    pub fn is_connected(&self, hdl: &EndpointId) -> bool {
        self.hdl_to_out.contains_key(hdl) || self.hdl_to_in.contains_key(hdl)
    }

    pub fn is_peered(&self, hdl: &EndpointId) -> bool {
        self.hdl_to_out.contains_key(hdl) && self.hdl_to_in.contains_key(hdl)
    }

    /// All known peers, connected through at least one direction.
    pub fn peers(&self) -> Vec<EndpointId> {
        let mut peers: Vec<EndpointId> = self.hdl_to_out.keys().copied().collect();
        peers.extend(self.hdl_to_in.keys().copied());
        peers.sort();
        peers.dedup();
        peers
    }

    pub fn outbound_is_empty(&self) -> bool {
        self.hdl_to_out.is_empty()
    }

    pub fn num_outbound(&self) -> usize {
        self.hdl_to_out.len()
    }

    pub fn num_inbound(&self) -> usize {
        self.hdl_to_in.len()
    }
}

#[cfg(test)]
#[path = "paths_test.rs"]
mod paths_test;
