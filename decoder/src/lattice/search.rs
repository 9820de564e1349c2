use crate::dict::is_filler_word;
use crate::ngram::{NGramModel, WordId};

use super::{Lattice, LatticeError, LinkId, NodeId, SearchState};

/// One word on a backtraced path.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub word: String,
    pub start_frame: i32,
    pub end_frame: i32,
    pub acoustic_score: i32,
    pub lm_score: i32,
    pub posterior: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LmWord {
    /// Fillers missing from the model: free, and invisible to history.
    Transparent,
    Word(WordId),
    /// Out of a closed vocabulary.
    Impossible,
}

/// Two most recent LM words, most recent first.
type History = [Option<WordId>; 2];

fn history_slice(h: &History) -> Vec<WordId> {
    h.iter().map_while(|w| *w).collect()
}

fn push_history(h: &History, w: LmWord) -> History {
    match w {
        LmWord::Word(id) => [Some(id), h[0]],
        _ => *h,
    }
}

impl Lattice {
    fn lm_word(&self, lm: &NGramModel, node: NodeId) -> LmWord {
        let word = self.base_word(node);
        if let Some(id) = lm.lookup(word) {
            return LmWord::Word(id);
        }
        if is_filler_word(word) {
            return LmWord::Transparent;
        }
        match lm.word_id(word) {
            Some(id) => LmWord::Word(id),
            None => LmWord::Impossible,
        }
    }

    fn scale_acoustic(&self, ascr: i32, ascale: f32) -> i32 {
        if ascr <= self.lmath.zero() {
            return self.lmath.zero();
        }
        (ascr as f64 / ascale as f64) as i32
    }

    /// Raw transition probability from `link`'s word into its destination word.
    fn transition_prob(&self, lm: Option<&NGramModel>, link: LinkId) -> i32 {
        let Some(lm) = lm else {
            return 0;
        };
        let l = &self.links[link.0];
        match self.lm_word(lm, l.to) {
            LmWord::Transparent => 0,
            LmWord::Impossible => lm.zero(),
            LmWord::Word(w) => {
                let history: Vec<WordId> = match self.lm_word(lm, l.from) {
                    LmWord::Word(h) => vec![h],
                    _ => Vec::new(),
                };
                lm.quick_probability(w, &history).0
            }
        }
    }

    /// Finds the best-scoring path from the start node to the end node.
    ///
    /// Each link's cost is its acoustic score divided by `ascale` plus the
    /// model's weighted score rescaled to `lw`. Ties keep the link seen first
    /// in topological order. Fills in back-pointers, path scores and forward
    /// probabilities for every reachable link. Returns the link entering the
    /// end node on the best path, or `None` if no path exists.
    pub fn best_path(&mut self, lm: Option<&NGramModel>, lw: f32, ascale: f32) -> Option<LinkId> {
        let zero = self.lmath.zero();
        let lwf = lm.map(|m| lw as f64 / m.weights().0 as f64).unwrap_or(1.0);
        let weigh = |score: i32| -> i32 { (score as f64 * lwf).max(i32::MIN as f64 / 2.0) as i32 };

        for link in &mut self.links {
            link.path_score = i32::MIN;
            link.lm_score = 0;
            link.best_prev = None;
            link.alpha = zero;
            link.beta = zero;
            link.posterior = zero;
        }
        self.best_end = None;
        self.norm = zero;

        let order: Vec<LinkId> = match self.traverse_edges(None, None) {
            Ok(t) => t.collect(),
            Err(e) => {
                log::warn!("Best path search skipped: {}", e);
                return None;
            }
        };
        let (start, end) = (self.start()?, self.end()?);

        let sentence_start = lm.and_then(|m| m.lookup("<s>"));
        let mut history: Vec<History> = vec![[None, None]; self.links.len()];
        let start_exits: Vec<LinkId> = self.exits(start).collect();
        for x in start_exits {
            let mut lscr = 0;
            let mut h: History = [sentence_start, None];
            if let Some(m) = lm {
                let word = self.lm_word(m, start);
                lscr = match word {
                    LmWord::Word(w) if Some(w) == sentence_start => 0,
                    LmWord::Word(w) => m.score(w, &history_slice(&h)).0,
                    LmWord::Transparent => 0,
                    LmWord::Impossible => m.zero(),
                };
                h = match word {
                    LmWord::Word(w) if Some(w) == sentence_start => h,
                    other => push_history(&h, other),
                };
            }
            let ascr = self.scale_acoustic(self.links[x.0].ascr, ascale);
            let link = &mut self.links[x.0];
            link.lm_score = lscr;
            link.path_score = ascr.saturating_add(weigh(lscr));
            link.alpha = ascr;
            history[x.0] = h;
        }

        for &link in &order {
            let (path_score, mut alpha, from, to) = {
                let l = &self.links[link.0];
                (l.path_score, l.alpha, l.from, l.to)
            };
            // Until now alpha only summed the predecessors; start exits
            // already carry their own acoustic score.
            if from != start && alpha > zero {
                alpha = alpha.saturating_add(self.scale_acoustic(self.links[link.0].ascr, ascale));
                self.links[link.0].alpha = alpha;
            }
            if path_score == i32::MIN || to == end {
                continue;
            }
            let bprob = self.transition_prob(lm, link);
            let next_word = lm.map(|m| self.lm_word(m, to));
            let tscore = match (lm, next_word) {
                (Some(m), Some(LmWord::Word(w))) => m.score(w, &history_slice(&history[link.0])).0,
                (Some(m), Some(LmWord::Impossible)) => m.zero(),
                _ => 0,
            };
            let next_history = next_word
                .map(|w| push_history(&history[link.0], w))
                .unwrap_or(history[link.0]);

            let exits: Vec<LinkId> = self.exits(to).collect();
            for x in exits {
                let ascr = self.scale_acoustic(self.links[x.0].ascr, ascale);
                let incoming = self.lmath.add(self.links[x.0].alpha, alpha.saturating_add(bprob));
                let score = path_score
                    .saturating_add(weigh(tscore))
                    .saturating_add(ascr);
                let xl = &mut self.links[x.0];
                xl.alpha = incoming;
                if score > xl.path_score {
                    xl.path_score = score;
                    xl.lm_score = tscore;
                    xl.best_prev = Some(link);
                    history[x.0] = next_history;
                }
            }
        }

        let mut best: Option<(LinkId, i32)> = None;
        let mut norm = zero;
        let entries: Vec<LinkId> = self.entries(end).collect();
        for x in entries {
            let l = &self.links[x.0];
            if l.path_score == i32::MIN {
                continue;
            }
            let bprob = self.transition_prob(lm, x);
            norm = self.lmath.add(norm, l.alpha.saturating_add(bprob));
            if best.map_or(true, |(_, s)| l.path_score > s) {
                best = Some((x, l.path_score));
            }
        }
        if norm > zero {
            norm = norm.saturating_add(self.scale_acoustic(self.final_node_ascr, ascale));
        }
        self.norm = norm;
        self.best_end = best.map(|(l, _)| l);
        self.state = SearchState::BestPath;

        if let Some((l, score)) = best {
            log::debug!(
                "Best path ends at link {} ({}) with score {}, norm {}",
                l.0,
                self.link_word(l),
                score,
                norm
            );
        }
        self.best_end
    }

    /// Forward-backward posterior probability of every link. Expects
    /// [`Lattice::best_path`] to have run with the same model; otherwise the
    /// forward probabilities are stale and the results meaningless.
    ///
    /// Returns the total log probability of the lattice.
    pub fn posterior(&mut self, lm: Option<&NGramModel>, ascale: f32) -> i32 {
        let zero = self.lmath.zero();
        if self.state == SearchState::Fresh {
            log::warn!("Posterior computed before best path search; results are meaningless");
        }
        for link in &mut self.links {
            link.beta = zero;
            link.posterior = zero;
        }

        let order: Vec<LinkId> = match self.reverse_edges(None, None) {
            Ok(t) => t.collect(),
            Err(e) => {
                log::warn!("Posterior computation skipped: {}", e);
                return zero;
            }
        };
        let Some(end) = self.end() else {
            return zero;
        };
        let final_ascr = self.scale_acoustic(self.final_node_ascr, ascale);

        for &link in &order {
            let bprob = self.transition_prob(lm, link);
            let to = self.links[link.0].to;
            let beta = if to == end {
                bprob.saturating_add(final_ascr)
            } else {
                let mut beta = zero;
                for x in self.exits(to) {
                    let xl = &self.links[x.0];
                    if xl.beta <= zero {
                        continue;
                    }
                    let ascr = self.scale_acoustic(xl.ascr, ascale);
                    beta = self
                        .lmath
                        .add(beta, xl.beta.saturating_add(bprob).saturating_add(ascr));
                }
                beta
            };
            let l = &mut self.links[link.0];
            l.beta = beta;
            l.posterior = if l.alpha <= zero || beta <= zero {
                zero
            } else {
                l.alpha
                    .saturating_add(beta)
                    .saturating_sub(self.norm)
                    .min(0)
            };
        }

        self.state = SearchState::Posterior;
        log::debug!("Lattice posterior norm {}", self.norm);
        self.norm
    }

    /// Removes links whose posterior is below `threshold`, then every node
    /// that no longer lies on a start-to-end path. Returns the number of
    /// links removed, including those cut off with their nodes.
    pub fn posterior_prune(&mut self, threshold: i32) -> Result<usize, LatticeError> {
        if self.state != SearchState::Posterior {
            return Err(LatticeError::PosteriorNotComputed);
        }
        let doomed: Vec<LinkId> = self
            .links()
            .filter(|l| self.links[l.0].posterior < threshold)
            .collect();
        let before = self.n_links();
        for &l in &doomed {
            self.remove_link(l);
        }
        self.delete_unreachable();
        if self.best_end.is_some_and(|l| !self.links[l.0].alive) {
            self.best_end = None;
        }

        let removed = before - self.n_links();
        log::debug!(
            "Pruned {} links below posterior {} ({} cut off with them, {} remain)",
            doomed.len(),
            threshold,
            removed - doomed.len(),
            self.n_links()
        );
        Ok(removed)
    }

    /// Best exit of `node` and its probability normalized over that node's
    /// exits only. Uses posteriors when available, acoustic scores otherwise.
    pub fn probability_of(&self, node: NodeId) -> Option<(LinkId, i32)> {
        let use_posterior = self.state == SearchState::Posterior;
        let score = |l: LinkId| {
            let link = &self.links[l.0];
            if use_posterior {
                link.posterior
            } else {
                link.ascr
            }
        };

        let mut norm = self.lmath.zero();
        let mut best: Option<(LinkId, i32)> = None;
        for l in self.exits(node) {
            let s = score(l);
            norm = self.lmath.add(norm, s);
            if best.map_or(true, |(_, b)| s > b) {
                best = Some((l, s));
            }
        }
        best.map(|(l, s)| (l, s.saturating_sub(norm).min(0)))
    }

    /// Words on the best path ending at `link`, fillers removed.
    pub fn hyp(&self, link: LinkId) -> String {
        self.path(link)
            .into_iter()
            .filter(|seg| !is_filler_word(&seg.word))
            .map(|seg| crate::dict::base_word(&seg.word).to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Backtraces the best path ending at `link`, earliest word first.
    pub fn path(&self, link: LinkId) -> Vec<PathSegment> {
        let mut segments = Vec::new();
        let mut cursor = Some(link);
        while let Some(l) = cursor {
            let ll = &self.links[l.0];
            let (start_frame, end_frame) = self.link_times(l);
            segments.push(PathSegment {
                word: self.link_word(l).to_string(),
                start_frame,
                end_frame,
                acoustic_score: ll.ascr,
                lm_score: ll.lm_score,
                posterior: ll.posterior,
            });
            cursor = ll.best_prev;
            if segments.len() > self.links.len() {
                break;
            }
        }
        segments.reverse();
        segments
    }

    /// Total log probability from the last best-path pass.
    pub fn norm(&self) -> i32 {
        self.norm
    }
}
