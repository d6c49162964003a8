//! Storage for a session's DCC descriptors.
//!
//! Indices are reused once a slot is reaped, but [`DccId`] values are not:
//! the table hands out ids from a monotonically increasing counter
//! independent of which slot they land in, so a stale id from a destroyed
//! session never aliases a freshly inserted one.

use std::net::TcpListener;

use super::{DccId, DccSession, DccState};

/// A slab of DCC sessions plus a free list of reclaimed slots, the same
/// shape the rest of this pack uses in place of a linked list: cheap
/// indexed access, no per-node heap allocation for the list structure
/// itself, and stable indices across insertion/removal of *other* entries.
pub struct DccTable<Ctx> {
    slots: Vec<Option<DccSession<Ctx>>>,
    free: Vec<usize>,
    next_id: u32,
}

impl<Ctx> DccTable<Ctx> {
    pub fn new() -> Self {
        DccTable {
            slots: Vec::new(),
            free: Vec::new(),
            next_id: 1,
        }
    }

    /// Reserves the next id without storing anything yet, so the caller can
    /// construct the session (which needs its own id) before inserting it.
    pub fn next_id(&mut self) -> DccId {
        let id = DccId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, session: DccSession<Ctx>) {
        match self.free.pop() {
            Some(idx) => self.slots[idx] = Some(session),
            None => self.slots.push(Some(session)),
        }
    }

    pub fn get(&self, id: DccId) -> Option<&DccSession<Ctx>> {
        self.slots
            .iter()
            .flatten()
            .find(|dcc| dcc.id == id)
    }

    pub fn get_mut(&mut self, id: DccId) -> Option<&mut DccSession<Ctx>> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|dcc| dcc.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DccSession<Ctx>> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DccSession<Ctx>> {
        self.slots.iter_mut().flatten()
    }

    /// Two-phase destroy: drops the real socket now (by swapping in a
    /// throwaway bound-but-unconnected listener) and marks the slot a
    /// tombstone. The slot itself is only reclaimed by [`reap`](Self::reap),
    /// so a callback that destroys its own session mid-dispatch never
    /// invalidates an iterator the readiness loop still holds.
    pub fn destroy(&mut self, id: DccId) {
        if let Some(dcc) = self.get_mut(id) {
            dcc.close_transport();
            dcc.state = DccState::Removed;
            dcc.callback = None;
        }
    }

    /// Sweeps tombstoned entries out of the table. Called once per
    /// readiness pass, after all callbacks for that pass have fired.
    pub fn reap(&mut self) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let is_removed = matches!(slot, Some(dcc) if dcc.state == DccState::Removed);
            if is_removed {
                *slot = None;
                self.free.push(idx);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

impl<Ctx> Default for DccTable<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

/// A throwaway listener bound to an ephemeral loopback port, used as a
/// placeholder transport once a session's real socket has been closed but
/// the slot is still tombstoned awaiting reap.
pub(crate) fn closed_placeholder() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").expect("loopback bind for closed DCC placeholder")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcc::DccMode;
    use std::net::Ipv4Addr;

    #[test]
    fn insert_lookup_destroy_reap_cycle() {
        let mut table: DccTable<()> = DccTable::new();
        let id = table.next_id();
        table.insert(DccSession::new_init(
            id,
            DccMode::Chat,
            Ipv4Addr::new(127, 0, 0, 1),
            1234,
            None,
            None,
        ));
        assert!(table.get(id).is_some());

        table.destroy(id);
        // Still present (tombstoned) until reap runs...
        assert_eq!(table.get(id).unwrap().state, DccState::Removed);
        table.reap();
        assert!(table.get(id).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn ids_are_never_reused_across_reap() {
        let mut table: DccTable<()> = DccTable::new();
        let id1 = table.next_id();
        table.insert(DccSession::new_init(
            id1,
            DccMode::Chat,
            Ipv4Addr::new(127, 0, 0, 1),
            1234,
            None,
            None,
        ));
        table.destroy(id1);
        table.reap();

        let id2 = table.next_id();
        assert_ne!(id1, id2);
    }
}
