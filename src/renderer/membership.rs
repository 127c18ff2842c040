use std::collections::HashSet;

use crate::dom::NodeId;

/// Elements that already bear an overlay.
///
/// Holds generational handles only, so a destroyed element can never be
/// mistaken for a member; entries are pruned at removal points and sweeps.
#[derive(Debug, Default)]
pub struct MembershipSet {
    members: HashSet<NodeId>,
}

impl MembershipSet {
    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    pub fn insert(&mut self, id: NodeId) -> bool {
        self.members.insert(id)
    }

    pub fn remove(&mut self, id: NodeId) -> bool {
        self.members.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.members.clear();
    }
}
