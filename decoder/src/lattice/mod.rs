//! Word lattices: a DAG of competing word hypotheses.
//!
//! A node is every hypothesized instance of one word starting at one frame.
//! A link is one occurrence of its source node's word, ending (inclusive) at
//! `end_frame`, followed by the destination node's word.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::dict::{base_word, is_filler_word};
use crate::logmath::LogMath;

pub mod io;
mod search;
mod traverse;

pub use search::PathSegment;
pub use traverse::{EdgeTraversal, ReverseTraversal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl LinkId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Error, Debug)]
pub enum LatticeError {
    #[error("A traversal is already active on this lattice")]
    TraversalActive,
    #[error("Posterior probabilities have not been computed")]
    PosteriorNotComputed,
    #[error("Lattice has no start or end node")]
    MissingAnchor,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path}:{line}: {reason}")]
    Format {
        path: String,
        line: usize,
        reason: String,
    },
}

impl LatticeError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::TraversalActive => "Only one lattice traversal can run at a time.",
            Self::PosteriorNotComputed => "Run best-path and posterior computation before pruning.",
            Self::MissingAnchor => "The word lattice is incomplete.",
            Self::Io(_) => "Could not read or write the lattice file.",
            Self::Format { .. } => "The lattice file is malformed.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SearchState {
    Fresh,
    BestPath,
    Posterior,
}

#[derive(Debug, Clone)]
pub struct LatticeNode {
    word: usize,
    start_frame: i32,
    first_end_frame: i32,
    last_end_frame: i32,
    exits: Vec<LinkId>,
    entries: Vec<LinkId>,
    fan: Cell<i32>,
    alive: bool,
}

impl LatticeNode {
    pub fn start_frame(&self) -> i32 {
        self.start_frame
    }

    pub fn first_end_frame(&self) -> i32 {
        self.first_end_frame
    }

    pub fn last_end_frame(&self) -> i32 {
        self.last_end_frame
    }
}

#[derive(Debug, Clone)]
pub struct LatticeLink {
    from: NodeId,
    to: NodeId,
    ascr: i32,
    end_frame: i32,
    path_score: i32,
    lm_score: i32,
    best_prev: Option<LinkId>,
    alpha: i32,
    beta: i32,
    posterior: i32,
    alive: bool,
}

impl LatticeLink {
    pub fn from(&self) -> NodeId {
        self.from
    }

    pub fn to(&self) -> NodeId {
        self.to
    }

    pub fn acoustic_score(&self) -> i32 {
        self.ascr
    }

    pub fn end_frame(&self) -> i32 {
        self.end_frame
    }

    /// Best cumulative path score; valid after a best-path pass.
    pub fn path_score(&self) -> i32 {
        self.path_score
    }

    /// Weighted language model score of the best transition into this link.
    pub fn lm_score(&self) -> i32 {
        self.lm_score
    }

    pub fn best_prev(&self) -> Option<LinkId> {
        self.best_prev
    }

    /// Cumulative forward probability; valid after a best-path pass.
    pub fn alpha(&self) -> i32 {
        self.alpha
    }

    /// Log posterior; valid after a posterior pass.
    pub fn posterior(&self) -> i32 {
        self.posterior
    }
}

pub struct Lattice {
    lmath: Arc<LogMath>,
    n_frames: i32,
    words: Vec<String>,
    word_index: HashMap<String, usize>,
    nodes: Vec<LatticeNode>,
    node_index: HashMap<(usize, i32), NodeId>,
    links: Vec<LatticeLink>,
    start: Option<NodeId>,
    end: Option<NodeId>,
    best_end: Option<LinkId>,
    norm: i32,
    final_node_ascr: i32,
    state: SearchState,
    traversal_active: Cell<bool>,
}

impl std::fmt::Debug for Lattice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lattice")
            .field("n_frames", &self.n_frames)
            .field("nodes", &self.n_nodes())
            .field("links", &self.n_links())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

impl Lattice {
    pub fn new(lmath: Arc<LogMath>) -> Self {
        Self {
            lmath,
            n_frames: 0,
            words: Vec::new(),
            word_index: HashMap::new(),
            nodes: Vec::new(),
            node_index: HashMap::new(),
            links: Vec::new(),
            start: None,
            end: None,
            best_end: None,
            norm: 0,
            final_node_ascr: 0,
            state: SearchState::Fresh,
            traversal_active: Cell::new(false),
        }
    }

    pub fn log_math(&self) -> &Arc<LogMath> {
        &self.lmath
    }

    pub fn n_frames(&self) -> i32 {
        self.n_frames
    }

    pub fn set_n_frames(&mut self, n_frames: i32) {
        self.n_frames = n_frames;
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.alive).count()
    }

    pub fn n_links(&self) -> usize {
        self.links.iter().filter(|l| l.alive).count()
    }

    fn intern_word(&mut self, word: &str) -> usize {
        if let Some(&id) = self.word_index.get(word) {
            return id;
        }
        let id = self.words.len();
        self.words.push(word.to_string());
        self.word_index.insert(word.to_string(), id);
        id
    }

    /// Returns the node for `word` starting at `start_frame`, creating it if needed.
    pub fn add_node(&mut self, word: &str, start_frame: i32) -> NodeId {
        let wid = self.intern_word(word);
        if let Some(&id) = self.node_index.get(&(wid, start_frame)) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(LatticeNode {
            word: wid,
            start_frame,
            first_end_frame: start_frame,
            last_end_frame: start_frame,
            exits: Vec::new(),
            entries: Vec::new(),
            fan: Cell::new(0),
            alive: true,
        });
        self.node_index.insert((wid, start_frame), id);
        self.n_frames = self.n_frames.max(start_frame + 1);
        id
    }

    pub fn set_start(&mut self, node: NodeId) {
        self.start = Some(node);
    }

    pub fn set_end(&mut self, node: NodeId) {
        self.end = Some(node);
    }

    /// The designated start node, or else the earliest node with no entries.
    pub fn start(&self) -> Option<NodeId> {
        self.start.filter(|n| self.nodes[n.0].alive).or_else(|| {
            self.live_nodes()
                .filter(|(_, n)| n.entries.is_empty())
                .min_by_key(|(id, n)| (n.start_frame, *id))
                .map(|(id, _)| id)
        })
    }

    /// The designated end node, or else the latest node with no exits.
    pub fn end(&self) -> Option<NodeId> {
        self.end.filter(|n| self.nodes[n.0].alive).or_else(|| {
            self.live_nodes()
                .filter(|(_, n)| n.exits.is_empty())
                .max_by_key(|(id, n)| (n.start_frame, std::cmp::Reverse(*id)))
                .map(|(id, _)| id)
        })
    }

    pub fn set_final_node_score(&mut self, ascr: i32) {
        self.final_node_ascr = ascr;
    }

    /// Adds a link, or keeps the better-scoring one if `from -> to` already exists.
    pub fn new_link(&mut self, from: NodeId, to: NodeId, score: i32, end_frame: i32) -> LinkId {
        let (from_sf, to_sf) = (self.nodes[from.0].start_frame, self.nodes[to.0].start_frame);
        if end_frame < from_sf || to_sf < end_frame {
            log::warn!(
                "Link {} -> {} ending at frame {} is out of order (from starts {}, to starts {})",
                self.word(from),
                self.word(to),
                end_frame,
                from_sf,
                to_sf
            );
        }

        let existing = self.nodes[from.0]
            .exits
            .iter()
            .copied()
            .find(|l| self.links[l.0].to == to);

        let id = match existing {
            Some(id) => {
                let link = &mut self.links[id.0];
                if score > link.ascr {
                    link.ascr = score;
                    link.end_frame = end_frame;
                }
                id
            }
            None => {
                let id = LinkId(self.links.len());
                self.links.push(LatticeLink {
                    from,
                    to,
                    ascr: score,
                    end_frame,
                    path_score: i32::MIN,
                    lm_score: 0,
                    best_prev: None,
                    alpha: self.lmath.zero(),
                    beta: self.lmath.zero(),
                    posterior: self.lmath.zero(),
                    alive: true,
                });
                self.nodes[from.0].exits.push(id);
                self.nodes[to.0].entries.push(id);
                id
            }
        };

        self.refresh_end_frames(from);
        self.n_frames = self.n_frames.max(end_frame + 1);
        self.state = SearchState::Fresh;
        id
    }

    fn refresh_end_frames(&mut self, node: NodeId) {
        let frames: Vec<i32> = self.nodes[node.0]
            .exits
            .iter()
            .map(|l| self.links[l.0].end_frame)
            .collect();
        let n = &mut self.nodes[node.0];
        if let (Some(&first), Some(&last)) = (frames.iter().min(), frames.iter().max()) {
            n.first_end_frame = first;
            n.last_end_frame = last;
        } else {
            n.first_end_frame = n.start_frame;
            n.last_end_frame = n.start_frame;
        }
    }

    fn live_nodes(&self) -> impl Iterator<Item = (NodeId, &LatticeNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.alive)
            .map(|(i, n)| (NodeId(i), n))
    }

    /// All live nodes. The borrow keeps the lattice immutable while iterating.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.live_nodes().map(|(id, _)| id)
    }

    pub fn links(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.links
            .iter()
            .enumerate()
            .filter(|(_, l)| l.alive)
            .map(|(i, _)| LinkId(i))
    }

    pub fn node(&self, id: NodeId) -> &LatticeNode {
        &self.nodes[id.0]
    }

    pub fn link(&self, id: LinkId) -> &LatticeLink {
        &self.links[id.0]
    }

    pub fn exits(&self, node: NodeId) -> impl Iterator<Item = LinkId> + '_ {
        self.nodes[node.0]
            .exits
            .iter()
            .copied()
            .filter(|l| self.links[l.0].alive)
    }

    pub fn entries(&self, node: NodeId) -> impl Iterator<Item = LinkId> + '_ {
        self.nodes[node.0]
            .entries
            .iter()
            .copied()
            .filter(|l| self.links[l.0].alive)
    }

    pub fn find_node(&self, word: &str, start_frame: i32) -> Option<NodeId> {
        let wid = *self.word_index.get(word)?;
        self.node_index
            .get(&(wid, start_frame))
            .copied()
            .filter(|n| self.nodes[n.0].alive)
    }

    pub fn find_link(&self, from: NodeId, to: NodeId) -> Option<LinkId> {
        self.exits(from).find(|l| self.links[l.0].to == to)
    }

    /// Surface form, possibly a pronunciation variant such as `the(2)`.
    pub fn word(&self, node: NodeId) -> &str {
        &self.words[self.nodes[node.0].word]
    }

    pub fn base_word(&self, node: NodeId) -> &str {
        base_word(self.word(node))
    }

    pub fn link_word(&self, link: LinkId) -> &str {
        self.word(self.links[link.0].from)
    }

    pub fn link_base_word(&self, link: LinkId) -> &str {
        self.base_word(self.links[link.0].from)
    }

    pub fn is_filler(&self, node: NodeId) -> bool {
        is_filler_word(self.word(node))
    }

    /// Start and end frame (inclusive) of the word a link stands for.
    pub fn link_times(&self, link: LinkId) -> (i32, i32) {
        let l = &self.links[link.0];
        (self.nodes[l.from.0].start_frame, l.end_frame)
    }

    pub fn predecessor(&self, link: LinkId) -> Option<LinkId> {
        self.links[link.0].best_prev
    }

    /// Terminal link of the most recent best-path search.
    pub fn best_end(&self) -> Option<LinkId> {
        self.best_end.filter(|l| self.links[l.0].alive)
    }

    fn remove_link(&mut self, id: LinkId) {
        let (from, to) = {
            let l = &mut self.links[id.0];
            if !l.alive {
                return;
            }
            l.alive = false;
            (l.from, l.to)
        };
        self.nodes[from.0].exits.retain(|l| *l != id);
        self.nodes[to.0].entries.retain(|l| *l != id);
        self.refresh_end_frames(from);
    }

    fn remove_node(&mut self, id: NodeId) {
        let links: Vec<LinkId> = {
            let n = &self.nodes[id.0];
            n.exits.iter().chain(n.entries.iter()).copied().collect()
        };
        for l in links {
            self.remove_link(l);
        }
        let key = (self.nodes[id.0].word, self.nodes[id.0].start_frame);
        self.node_index.remove(&key);
        self.nodes[id.0].alive = false;
        if self.start == Some(id) {
            self.start = None;
        }
        if self.end == Some(id) {
            self.end = None;
        }
    }

    /// Removes nodes that lie on no path from the start node to the end node.
    /// The start and end nodes themselves are kept. Returns the number of
    /// nodes removed.
    pub fn delete_unreachable(&mut self) -> usize {
        let (Some(start), Some(end)) = (self.start(), self.end()) else {
            return 0;
        };
        let forward = self.reachable_from(start, true);
        let backward = self.reachable_from(end, false);
        let doomed: Vec<NodeId> = self
            .nodes()
            .filter(|&n| n != start && n != end)
            .filter(|n| !(forward[n.0] && backward[n.0]))
            .collect();
        for &n in &doomed {
            self.remove_node(n);
        }
        if !doomed.is_empty() {
            log::debug!("Removed {} unreachable lattice nodes", doomed.len());
        }
        doomed.len()
    }

    pub(crate) fn reachable_from(&self, origin: NodeId, forward: bool) -> Vec<bool> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![origin];
        seen[origin.0] = true;
        while let Some(n) = stack.pop() {
            let next: Vec<NodeId> = if forward {
                self.exits(n).map(|l| self.links[l.0].to).collect()
            } else {
                self.entries(n).map(|l| self.links[l.0].from).collect()
            };
            for m in next {
                if !seen[m.0] {
                    seen[m.0] = true;
                    stack.push(m);
                }
            }
        }
        seen
    }
}
