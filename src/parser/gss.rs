//! Graph-structured stack: the shared representation of every call
//! stack the GLL algorithm explores. Nodes are keyed by (return
//! address, input position); edges point from later return addresses
//! toward earlier ones and carry the partial-parse forest node built so
//! far along that path.

use crate::grammar::Slot;
use crate::sppf::SppfId;
use crate::token::TokenId;
use hashbrown::HashMap;
use smallvec::SmallVec;

/// Handle of a GSS node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct GssId(u32);

/// An edge to an earlier stack node, labelled with the SPPF built
/// between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GssEdge {
    pub(crate) child: GssId,
    pub(crate) sppf: Option<SppfId>,
}

struct GssNode {
    /// `None` identifies the two distinguished bottom nodes.
    return_slot: Option<Slot>,
    input: Option<TokenId>,
    edges: SmallVec<[GssEdge; 2]>,
}

/// The stack graph, keyed by (return slot, input position).
#[derive(Default)]
pub(crate) struct Gss {
    nodes: Vec<GssNode>,
    index: HashMap<(Option<Slot>, Option<TokenId>), GssId, ahash::RandomState>,
}

impl Gss {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Find or insert the node labelled `(return_slot, input)`; the
    /// flag is `true` when the node was created by this call.
    pub(crate) fn node(&mut self, return_slot: Option<Slot>, input: Option<TokenId>) -> (GssId, bool) {
        if let Some(&existing) = self.index.get(&(return_slot, input)) {
            return (existing, false);
        }
        let id = GssId(u32::try_from(self.nodes.len()).expect("GSS overflow"));
        self.nodes.push(GssNode {
            return_slot,
            input,
            edges: SmallVec::new(),
        });
        self.index.insert((return_slot, input), id);
        (id, true)
    }

    pub(crate) fn return_slot(&self, id: GssId) -> Option<Slot> {
        self.nodes[id.0 as usize].return_slot
    }

    #[cfg(test)]
    pub(crate) fn input(&self, id: GssId) -> Option<TokenId> {
        self.nodes[id.0 as usize].input
    }

    pub(crate) fn edges(&self, id: GssId) -> &[GssEdge] {
        &self.nodes[id.0 as usize].edges
    }

    /// Add an edge `id -> child` labelled `sppf`; `false` if an
    /// identical edge already exists.
    pub(crate) fn add_edge(&mut self, id: GssId, child: GssId, sppf: Option<SppfId>) -> bool {
        let edge = GssEdge { child, sppf };
        let edges = &mut self.nodes[id.0 as usize].edges;
        if edges.contains(&edge) {
            return false;
        }
        edges.push(edge);
        true
    }
}
