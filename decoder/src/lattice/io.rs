//! Lattice files: the decoder's native text format (read and write) and
//! HTK standard lattice format (write only).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::dict::base_word;
use crate::logmath::LogMath;

use super::{Lattice, LatticeError, NodeId, SearchState};

fn format_err(path: &Path, line: usize, reason: impl Into<String>) -> LatticeError {
    LatticeError::Format {
        path: path.display().to_string(),
        line,
        reason: reason.into(),
    }
}

/// Pronunciation variant number: `the(2)` is 2, `the` is 1.
fn variant(word: &str) -> u32 {
    let base = base_word(word);
    if base.len() == word.len() {
        return 1;
    }
    word[base.len() + 1..word.len() - 1].parse().unwrap_or(1)
}

impl Lattice {
    /// Live nodes renumbered densely, in creation order.
    fn dense_ids(&self) -> HashMap<NodeId, usize> {
        self.nodes().enumerate().map(|(i, n)| (n, i)).collect()
    }

    /// Writes the native text format.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), LatticeError> {
        let path = path.as_ref();
        let (start, end) = match (self.start(), self.end()) {
            (Some(s), Some(e)) => (s, e),
            _ => return Err(LatticeError::MissingAnchor),
        };
        let ids = self.dense_ids();
        let mut out = BufWriter::new(File::create(path)?);

        writeln!(out, "# -logbase {:e}", self.lmath.base())?;
        writeln!(out, "#")?;
        writeln!(out, "Frames {}", self.n_frames)?;
        writeln!(out, "#")?;
        writeln!(
            out,
            "Nodes {} (NODEID WORD STARTFRAME FIRST-ENDFRAME LAST-ENDFRAME)",
            ids.len()
        )?;
        for node in self.nodes() {
            let n = self.node(node);
            writeln!(
                out,
                "{} {} {} {} {}",
                ids[&node],
                self.word(node),
                n.start_frame,
                n.first_end_frame,
                n.last_end_frame
            )?;
        }
        writeln!(out, "#")?;
        writeln!(out, "Initial {}", ids[&start])?;
        writeln!(out, "Final {}", ids[&end])?;
        writeln!(out, "#")?;
        writeln!(out, "BestSegAscr 0 (NODEID ENDFRAME ASCORE)")?;
        writeln!(out, "#")?;
        writeln!(out, "Edges (FROM-NODEID TO-NODEID ASCORE)")?;
        for link in self.links() {
            let l = self.link(link);
            writeln!(out, "{} {} {}", ids[&l.from], ids[&l.to], l.ascr)?;
        }
        writeln!(out, "End")?;
        out.flush()?;

        log::info!(
            "Wrote lattice ({} nodes, {} links) to {}",
            ids.len(),
            self.n_links(),
            path.display()
        );
        Ok(())
    }

    /// Reads the native text format. Scores written in another log base are
    /// converted to `lmath`'s base.
    pub fn read<P: AsRef<Path>>(path: P, lmath: Arc<LogMath>) -> Result<Self, LatticeError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut lines = reader.lines().enumerate();

        let mut file_base = lmath.base();
        let mut n_frames = None;
        let mut n_nodes = None;
        for (i, line) in lines.by_ref() {
            let line = line?;
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("#"), Some("-logbase")) => {
                    file_base = parts
                        .next()
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| format_err(path, i + 1, "bad -logbase"))?;
                }
                (Some("Frames"), Some(v)) => {
                    let n = v.parse::<i32>();
                    n_frames = Some(n.map_err(|_| format_err(path, i + 1, "bad frame count"))?);
                }
                (Some("Nodes"), Some(v)) => {
                    let n = v.parse::<usize>();
                    n_nodes = Some(n.map_err(|_| format_err(path, i + 1, "bad node count"))?);
                    break;
                }
                _ => {}
            }
        }
        let n_frames = n_frames.ok_or_else(|| format_err(path, 0, "missing Frames"))?;
        let n_nodes = n_nodes.ok_or_else(|| format_err(path, 0, "missing Nodes"))?;

        let mut lat = Lattice::new(lmath.clone());
        let mut by_file_id: Vec<NodeId> = Vec::with_capacity(n_nodes);
        while by_file_id.len() < n_nodes {
            let (i, line) = lines
                .next()
                .ok_or_else(|| format_err(path, 0, "truncated node list"))?;
            let line = line?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return Err(format_err(path, i + 1, "node needs id, word and start frame"));
            }
            let sf: i32 = fields[2]
                .parse()
                .map_err(|_| format_err(path, i + 1, "bad start frame"))?;
            by_file_id.push(lat.add_node(fields[1], sf));
        }

        let node_ref = |v: Option<&str>, line: usize| -> Result<NodeId, LatticeError> {
            v.and_then(|s| s.parse::<usize>().ok())
                .and_then(|id| by_file_id.get(id).copied())
                .ok_or_else(|| format_err(path, line, "bad node reference"))
        };

        let rescale = (file_base - lmath.base()).abs() > f64::EPSILON;
        let file_ln_base = file_base.ln();
        let mut in_edges = false;
        let mut finished = false;
        for (i, line) in lines {
            let line = line?;
            let mut parts = line.split_whitespace();
            let Some(first) = parts.next() else { continue };
            match first {
                "#" => {}
                "Initial" => {
                    let n = node_ref(parts.next(), i + 1)?;
                    lat.set_start(n);
                }
                "Final" => {
                    let n = node_ref(parts.next(), i + 1)?;
                    lat.set_end(n);
                }
                "BestSegAscr" => {
                    let count: usize = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                    if count > 0 {
                        log::debug!("Ignoring {} best segment scores", count);
                    }
                }
                "Edges" => in_edges = true,
                "End" => {
                    finished = true;
                    break;
                }
                _ if in_edges => {
                    let from = node_ref(Some(first), i + 1)?;
                    let to = node_ref(parts.next(), i + 1)?;
                    let mut ascr: i32 = parts
                        .next()
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| format_err(path, i + 1, "bad acoustic score"))?;
                    if rescale {
                        ascr = lmath.ln_to_log(ascr as f64 * file_ln_base);
                    }
                    let (from_sf, to_sf) = (lat.node(from).start_frame, lat.node(to).start_frame);
                    if to_sf <= from_sf {
                        return Err(format_err(path, i + 1, "edge goes backwards in time"));
                    }
                    lat.new_link(from, to, ascr, from_sf.max(to_sf - 1));
                }
                _ => {}
            }
        }
        if !finished {
            return Err(format_err(path, 0, "missing End"));
        }

        lat.n_frames = n_frames;
        lat.state = SearchState::Fresh;
        log::info!(
            "Read lattice {} ({} nodes, {} links)",
            path.display(),
            lat.n_nodes(),
            lat.n_links()
        );
        Ok(lat)
    }

    /// Writes an HTK standard lattice. Node times are in seconds at `frate`
    /// frames per second; scores are natural logarithms.
    pub fn write_htk<P: AsRef<Path>>(&self, path: P, frate: i32) -> Result<(), LatticeError> {
        let path = path.as_ref();
        let (start, end) = match (self.start(), self.end()) {
            (Some(s), Some(e)) => (s, e),
            _ => return Err(LatticeError::MissingAnchor),
        };
        let ids = self.dense_ids();
        let frate = frate.max(1) as f64;
        let utterance = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("utt");
        let mut out = BufWriter::new(File::create(path)?);

        writeln!(out, "# Lattice generated by sphinx-decoder")?;
        writeln!(out, "#")?;
        writeln!(out, "# Header")?;
        writeln!(out, "VERSION=1.0")?;
        writeln!(out, "UTTERANCE={}", utterance)?;
        writeln!(out, "start={}", ids[&start])?;
        writeln!(out, "end={}", ids[&end])?;
        writeln!(out, "#")?;
        writeln!(out, "N={}\tL={}", ids.len(), self.n_links())?;
        writeln!(out, "#")?;
        writeln!(out, "# Node definitions")?;
        for node in self.nodes() {
            let word = self.word(node);
            writeln!(
                out,
                "I={}\tt={:.2}\tW={}\tv={}",
                ids[&node],
                self.node(node).start_frame as f64 / frate,
                base_word(word),
                variant(word)
            )?;
        }
        writeln!(out, "#")?;
        writeln!(out, "# Link definitions")?;
        let with_posterior = self.state == SearchState::Posterior;
        for (j, link) in self.links().enumerate() {
            let l = self.link(link);
            write!(
                out,
                "J={}\tS={}\tE={}\ta={:.3}",
                j,
                ids[&l.from],
                ids[&l.to],
                self.lmath.log_to_ln(l.ascr)
            )?;
            if with_posterior {
                write!(out, "\tp={:e}", self.lmath.exp(l.posterior))?;
            }
            writeln!(out)?;
        }
        out.flush()?;
        log::info!("Wrote HTK lattice to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_numbers() {
        assert_eq!(variant("the"), 1);
        assert_eq!(variant("the(2)"), 2);
    }
}
