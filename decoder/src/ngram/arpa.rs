//! ARPA text format: log10 probabilities and backoff weights per N-gram.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::{NGramError, NGramModel, WordId};
use crate::logmath::LogMath;

/// ARPA's stand-in for log10(0).
const ARPA_ZERO: f64 = -99.0;

fn count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^ngram\s+(\d+)\s*=\s*(\d+)$").expect("valid ngram count regex"))
}

fn section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\\(\d+)-grams:$").expect("valid ngram section regex"))
}

fn parse_err(path: &Path, line: usize, reason: impl Into<String>) -> NGramError {
    NGramError::Parse {
        path: path.display().to_string(),
        line,
        reason: reason.into(),
    }
}

fn to_log(lmath: &LogMath, log10: f64) -> i32 {
    if log10 <= ARPA_ZERO {
        lmath.zero()
    } else {
        lmath.log10_to_log(log10)
    }
}

pub(crate) fn read(path: &Path, lmath: Arc<LogMath>) -> Result<NGramModel, NGramError> {
    let file = File::open(path).map_err(|e| NGramError::io(path, e))?;
    let mut lines = BufReader::new(file).lines().enumerate();

    let mut saw_data = false;
    for (_, line) in lines.by_ref() {
        let line = line.map_err(|e| NGramError::io(path, e))?;
        if line.trim() == "\\data\\" {
            saw_data = true;
            break;
        }
    }
    if !saw_data {
        return Err(NGramError::UnknownFormat(path.display().to_string()));
    }

    let mut declared: Vec<usize> = Vec::new();
    let mut pending_section: Option<usize> = None;
    for (i, line) in lines.by_ref() {
        let line = line.map_err(|e| NGramError::io(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(c) = count_re().captures(line) {
            let n: usize = c[1].parse().map_err(|_| parse_err(path, i + 1, "bad order"))?;
            let count: usize = c[2].parse().map_err(|_| parse_err(path, i + 1, "bad count"))?;
            if n != declared.len() + 1 {
                return Err(parse_err(path, i + 1, "ngram counts out of order"));
            }
            declared.push(count);
            continue;
        }
        if let Some(c) = section_re().captures(line) {
            pending_section = c[1].parse().ok();
            break;
        }
        return Err(parse_err(path, i + 1, format!("unexpected line in header: {}", line)));
    }
    if declared.is_empty() {
        return Err(parse_err(path, 0, "no ngram counts in \\data\\ section"));
    }

    let order = declared.len();
    let mut model = NGramModel::new(lmath.clone(), order);

    let mut section = pending_section;
    let mut seen = vec![0usize; order];
    let mut ended = false;
    let mut ids: Vec<WordId> = Vec::with_capacity(order);
    for (i, line) in lines {
        let line = line.map_err(|e| NGramError::io(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "\\end\\" {
            ended = true;
            break;
        }
        if let Some(c) = section_re().captures(line) {
            section = c[1].parse().ok();
            continue;
        }
        let n = match section {
            Some(n) if (1..=order).contains(&n) => n,
            _ => return Err(parse_err(path, i + 1, "N-gram outside a known section")),
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != n + 1 && fields.len() != n + 2 {
            return Err(parse_err(path, i + 1, format!("expected {}-gram entry", n)));
        }
        let prob: f64 = fields[0]
            .parse()
            .map_err(|_| parse_err(path, i + 1, "bad probability"))?;
        let backoff: f64 = match fields.get(n + 1) {
            Some(v) => v.parse().map_err(|_| parse_err(path, i + 1, "bad backoff"))?,
            None => 0.0,
        };

        ids.clear();
        for word in &fields[1..=n] {
            let id = if n == 1 {
                model.push_word(word)
            } else {
                model
                    .lookup(word)
                    .ok_or_else(|| parse_err(path, i + 1, format!("{} is not a unigram", word)))?
            };
            ids.push(id);
        }
        let backoff = if backoff == 0.0 { 0 } else { to_log(&lmath, backoff) };
        model.insert_gram(&ids, to_log(&lmath, prob), backoff);
        seen[n - 1] += 1;
    }
    if !ended {
        log::warn!("{}: missing \\end\\ marker", path.display());
    }
    for (n, (&want, &got)) in declared.iter().zip(&seen).enumerate() {
        if want != got {
            log::warn!(
                "{}: declared {} {}-grams but read {}",
                path.display(),
                want,
                n + 1,
                got
            );
        }
    }
    Ok(model)
}

pub(crate) fn write(model: &NGramModel, path: &Path) -> Result<(), NGramError> {
    let io_err = |e| NGramError::io(path, e);
    let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
    let lmath = &model.lmath;
    let log10 = |p: i32| -> f64 {
        if p <= lmath.zero() {
            ARPA_ZERO
        } else {
            lmath.log_to_log10(p)
        }
    };

    writeln!(out, "\\data\\").map_err(io_err)?;
    for (n, grams) in model.grams.iter().enumerate() {
        writeln!(out, "ngram {}={}", n + 1, grams.len()).map_err(io_err)?;
    }
    for (n, grams) in model.grams.iter().enumerate() {
        writeln!(out).map_err(io_err)?;
        writeln!(out, "\\{}-grams:", n + 1).map_err(io_err)?;
        let mut keys: Vec<&Box<[WordId]>> = grams.keys().collect();
        keys.sort();
        let last_order = n + 1 == model.order;
        for key in keys {
            let entry = grams[key];
            let words: Vec<&str> = key.iter().filter_map(|&w| model.word(w)).collect();
            write!(out, "{:.6} {}", log10(entry.prob), words.join(" ")).map_err(io_err)?;
            if !last_order {
                write!(out, " {:.6}", lmath.log_to_log10(entry.backoff)).map_err(io_err)?;
            }
            writeln!(out).map_err(io_err)?;
        }
    }
    writeln!(out).map_err(io_err)?;
    writeln!(out, "\\end\\").map_err(io_err)?;
    out.flush().map_err(io_err)?;
    log::info!("Wrote ARPA model to {}", path.display());
    Ok(())
}
