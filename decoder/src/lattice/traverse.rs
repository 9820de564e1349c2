use std::collections::VecDeque;

use super::{Lattice, LatticeError, LinkId, NodeId};

/// Forward topological walk over links. Holds the lattice's traversal slot
/// until dropped.
pub struct EdgeTraversal<'a> {
    lattice: &'a Lattice,
    queue: VecDeque<LinkId>,
    start: NodeId,
    end: NodeId,
}

/// Backward topological walk over links, from the end node towards the start.
pub struct ReverseTraversal<'a> {
    lattice: &'a Lattice,
    queue: VecDeque<LinkId>,
    start: NodeId,
    end: NodeId,
}

impl Lattice {
    fn claim_traversal(&self) -> Result<(), LatticeError> {
        if self.traversal_active.replace(true) {
            return Err(LatticeError::TraversalActive);
        }
        Ok(())
    }

    fn anchors(
        &self,
        start: Option<NodeId>,
        end: Option<NodeId>,
    ) -> Result<(NodeId, NodeId), LatticeError> {
        match (start.or_else(|| self.start()), end.or_else(|| self.end())) {
            (Some(s), Some(e)) => Ok((s, e)),
            _ => Err(LatticeError::MissingAnchor),
        }
    }

    /// Starts a forward traversal of every link between `start` and `end`
    /// (the lattice anchors when `None`). Links come out in topological order.
    pub fn traverse_edges(
        &self,
        start: Option<NodeId>,
        end: Option<NodeId>,
    ) -> Result<EdgeTraversal<'_>, LatticeError> {
        let (start, end) = self.anchors(start, end)?;
        self.claim_traversal()?;

        let reachable = self.reachable_from(start, true);
        for node in &self.nodes {
            node.fan.set(0);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.alive || !reachable[i] {
                continue;
            }
            for l in self.exits(NodeId(i)) {
                let to = &self.nodes[self.links[l.0].to.0];
                to.fan.set(to.fan.get() + 1);
            }
        }

        Ok(EdgeTraversal {
            lattice: self,
            queue: self.exits(start).collect(),
            start,
            end,
        })
    }

    /// Starts a backward traversal of every link between `end` and `start`.
    pub fn reverse_edges(
        &self,
        start: Option<NodeId>,
        end: Option<NodeId>,
    ) -> Result<ReverseTraversal<'_>, LatticeError> {
        let (start, end) = self.anchors(start, end)?;
        self.claim_traversal()?;

        let reaches_end = self.reachable_from(end, false);
        for node in &self.nodes {
            node.fan.set(0);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.alive || !reaches_end[i] {
                continue;
            }
            for l in self.entries(NodeId(i)) {
                let from = &self.nodes[self.links[l.0].from.0];
                from.fan.set(from.fan.get() + 1);
            }
        }

        Ok(ReverseTraversal {
            lattice: self,
            queue: self.entries(end).collect(),
            start,
            end,
        })
    }
}

impl EdgeTraversal<'_> {
    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn end(&self) -> NodeId {
        self.end
    }
}

impl Iterator for EdgeTraversal<'_> {
    type Item = LinkId;

    fn next(&mut self) -> Option<LinkId> {
        let link = self.queue.pop_front()?;
        let lat = self.lattice;
        let to = lat.links[link.0].to;
        let node = &lat.nodes[to.0];
        node.fan.set(node.fan.get() - 1);
        if node.fan.get() == 0 {
            if to == self.end {
                self.queue.clear();
                return Some(link);
            }
            self.queue.extend(lat.exits(to));
        }
        Some(link)
    }
}

impl Drop for EdgeTraversal<'_> {
    fn drop(&mut self) {
        self.lattice.traversal_active.set(false);
    }
}

impl ReverseTraversal<'_> {
    pub fn start(&self) -> NodeId {
        self.start
    }

    pub fn end(&self) -> NodeId {
        self.end
    }
}

impl Iterator for ReverseTraversal<'_> {
    type Item = LinkId;

    fn next(&mut self) -> Option<LinkId> {
        let link = self.queue.pop_front()?;
        let lat = self.lattice;
        let from = lat.links[link.0].from;
        let node = &lat.nodes[from.0];
        node.fan.set(node.fan.get() - 1);
        if node.fan.get() == 0 {
            if from == self.start {
                self.queue.clear();
                return Some(link);
            }
            self.queue.extend(lat.entries(from));
        }
        Some(link)
    }
}

impl Drop for ReverseTraversal<'_> {
    fn drop(&mut self) {
        self.lattice.traversal_active.set(false);
    }
}
