use crate::peer::rpc_api::MetaStateService;
use crate::peer::types::PeerId;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static membership of the cell: who we are, and a channel to everyone else.
pub(crate) struct CellManager {
    self_id: PeerId,
    others: BTreeMap<PeerId, Arc<dyn MetaStateService>>,
}

impl CellManager {
    pub(crate) fn new(self_id: PeerId, others: BTreeMap<PeerId, Arc<dyn MetaStateService>>) -> Self {
        assert!(!others.contains_key(&self_id), "Cell peers must not include self");
        CellManager { self_id, others }
    }

    pub(crate) fn self_id(&self) -> PeerId {
        self.self_id
    }

    /// Number of peers in the cell, including self.
    pub(crate) fn peer_count(&self) -> usize {
        self.others.len() + 1
    }

    pub(crate) fn quorum(&self) -> usize {
        majority_count(self.peer_count())
    }

    pub(crate) fn other_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.others.keys().copied()
    }

    pub(crate) fn others(&self) -> impl Iterator<Item = (PeerId, &Arc<dyn MetaStateService>)> + '_ {
        self.others.iter().map(|(id, channel)| (*id, channel))
    }

    pub(crate) fn channel(&self, peer_id: PeerId) -> Option<Arc<dyn MetaStateService>> {
        self.others.get(&peer_id).cloned()
    }
}

pub(crate) fn majority_count(peer_count: usize) -> usize {
    (peer_count / 2) + 1
}
