use serde::{Deserialize, Serialize};

/// Dense 0-based index of a node in a compiled graph. Positions in every
/// per-node snapshot array line up with this index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIndex(pub u32);

/// Dense 0-based index of an edge in a compiled graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeIndex(pub u32);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl EdgeIndex {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
