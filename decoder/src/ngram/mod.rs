//! N-gram language models: vocabulary, backoff scoring and weighting.
//!
//! Probabilities are stored raw, as read from the model file, in the log
//! base of the model's [`LogMath`]. The language weight and insertion
//! penalty are applied on the way out of [`NGramModel::score`], so
//! re-weighting replaces the previous weights instead of stacking on them.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logmath::LogMath;

pub mod arpa;
pub mod binary;
pub mod classes;

pub use classes::WordClass;

pub const UNKNOWN_WORD: &str = "<UNK>";

/// Language model shared between the session and lattice consumers. Scoring
/// takes the read lock; re-weighting and vocabulary changes take the write lock.
pub type SharedNGramModel = Arc<RwLock<NGramModel>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WordId(pub u32);

impl WordId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NGramFileType {
    Auto,
    Arpa,
    Binary,
}

impl NGramFileType {
    /// Picks a format for writing from the file extension.
    pub fn from_extension(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("bin") | Some("dmp") => Self::Binary,
            _ => Self::Arpa,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NGramCase {
    Upper,
    Lower,
}

#[derive(Error, Debug)]
pub enum NGramError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {reason}")]
    Parse {
        path: String,
        line: usize,
        reason: String,
    },
    #[error("Unrecognized language model format in {0}")]
    UnknownFormat(String),
    #[error("Invalid weight {0}")]
    InvalidWeight(f32),
    #[error("Class {0} already exists")]
    DuplicateClass(String),
    #[error("Unknown class {0}")]
    UnknownClass(String),
    #[error("Word {0} is already in the vocabulary")]
    DuplicateWord(String),
    #[error("Class {class} has {words} words but {weights} weights")]
    WeightCount {
        class: String,
        words: usize,
        weights: usize,
    },
}

impl NGramError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Io { .. } => "Could not read or write the language model file.",
            Self::Parse { .. } | Self::UnknownFormat(_) => {
                "The language model file is malformed or in an unknown format."
            }
            Self::InvalidWeight(_) | Self::WeightCount { .. } => {
                "Language model weights must be positive and match their words."
            }
            Self::DuplicateClass(_) | Self::UnknownClass(_) | Self::DuplicateWord(_) => {
                "The language model vocabulary could not be updated."
            }
        }
    }
}

/// Options for standalone model loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NGramOptions {
    /// Read binary models in one shot instead of streaming them.
    pub mmap: bool,
    pub lw: f32,
    pub wip: f32,
    /// Unigram weight, interpolated against a uniform distribution.
    pub uw: f32,
}

impl Default for NGramOptions {
    fn default() -> Self {
        Self {
            mmap: true,
            lw: 1.0,
            wip: 1.0,
            uw: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NGramEntry {
    pub(crate) prob: i32,
    pub(crate) backoff: i32,
}

pub struct NGramModel {
    pub(crate) lmath: Arc<LogMath>,
    pub(crate) order: usize,
    pub(crate) vocab: Vec<String>,
    pub(crate) vocab_index: HashMap<String, WordId>,
    pub(crate) grams: Vec<HashMap<Box<[WordId]>, NGramEntry>>,
    unknown: Option<WordId>,
    lw: f32,
    log_wip: i32,
    pub(crate) classes: Vec<WordClass>,
    pub(crate) class_words: HashMap<WordId, (usize, i32)>,
}

impl std::fmt::Debug for NGramModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NGramModel")
            .field("order", &self.order)
            .field("vocab", &self.vocab.len())
            .field("counts", &self.counts())
            .field("lw", &self.lw)
            .field("log_wip", &self.log_wip)
            .finish()
    }
}

impl NGramModel {
    pub fn new(lmath: Arc<LogMath>, order: usize) -> Self {
        let order = order.max(1);
        Self {
            lmath,
            order,
            vocab: Vec::new(),
            vocab_index: HashMap::new(),
            grams: vec![HashMap::new(); order],
            unknown: None,
            lw: 1.0,
            log_wip: 0,
            classes: Vec::new(),
            class_words: HashMap::new(),
        }
    }

    /// Reads a model from disk. `Auto` detects the format from the content.
    pub fn read<P: AsRef<Path>>(
        path: P,
        file_type: NGramFileType,
        lmath: Arc<LogMath>,
        options: Option<&NGramOptions>,
    ) -> Result<Self, NGramError> {
        let path = path.as_ref();
        let start = Instant::now();
        let defaults = NGramOptions::default();
        let options = options.unwrap_or(&defaults);

        let file_type = match file_type {
            NGramFileType::Auto => Self::detect(path)?,
            other => other,
        };
        let mut model = match file_type {
            NGramFileType::Binary => binary::read(path, lmath, options.mmap)?,
            _ => arpa::read(path, lmath)?,
        };

        model.apply_unigram_weight(options.uw)?;
        model.apply_weights(options.lw, options.wip)?;
        log::info!(
            "Loaded {}-gram model {} ({:?}, counts {:?}) in {:?}",
            model.order,
            path.display(),
            file_type,
            model.counts(),
            start.elapsed()
        );
        Ok(model)
    }

    fn detect(path: &Path) -> Result<NGramFileType, NGramError> {
        let mut head = [0u8; binary::MAGIC.len()];
        let mut file = File::open(path).map_err(|e| NGramError::io(path, e))?;
        let n = file.read(&mut head).map_err(|e| NGramError::io(path, e))?;
        if n == head.len() && head == binary::MAGIC {
            return Ok(NGramFileType::Binary);
        }
        Ok(NGramFileType::Arpa)
    }

    pub fn write_to<P: AsRef<Path>>(
        &self,
        path: P,
        format: NGramFileType,
    ) -> Result<(), NGramError> {
        let path = path.as_ref();
        let format = match format {
            NGramFileType::Auto => NGramFileType::from_extension(path),
            other => other,
        };
        match format {
            NGramFileType::Binary => binary::write(self, path),
            _ => arpa::write(self, path),
        }
    }

    pub fn log_math(&self) -> &Arc<LogMath> {
        &self.lmath
    }

    /// The "zero" log-probability returned for impossible words.
    pub fn zero(&self) -> i32 {
        self.lmath.zero()
    }

    /// Order of the model, the N in N-gram.
    pub fn size(&self) -> usize {
        self.order
    }

    pub fn counts(&self) -> Vec<usize> {
        self.grams.iter().map(HashMap::len).collect()
    }

    pub fn vocab_len(&self) -> usize {
        self.vocab.len()
    }

    pub(crate) fn push_word(&mut self, word: &str) -> WordId {
        if let Some(&id) = self.vocab_index.get(word) {
            return id;
        }
        let id = WordId(self.vocab.len() as u32);
        self.vocab.push(word.to_string());
        self.vocab_index.insert(word.to_string(), id);
        if word.eq_ignore_ascii_case(UNKNOWN_WORD) {
            self.unknown = Some(id);
        }
        id
    }

    pub(crate) fn insert_gram(&mut self, words: &[WordId], prob: i32, backoff: i32) {
        let n = words.len();
        if n == 0 || n > self.order {
            return;
        }
        self.grams[n - 1].insert(words.into(), NGramEntry { prob, backoff });
    }

    /// Exact vocabulary lookup; unknown words are not redirected.
    pub fn lookup(&self, word: &str) -> Option<WordId> {
        self.vocab_index.get(word).copied()
    }

    /// Word ID for `word`. Open-vocabulary models map unknown words to the
    /// unknown-word unigram; closed ones return `None`.
    pub fn word_id(&self, word: &str) -> Option<WordId> {
        self.lookup(word).or(self.unknown)
    }

    pub fn word(&self, wid: WordId) -> Option<&str> {
        self.vocab.get(wid.index()).map(String::as_str)
    }

    /// `None` for closed-vocabulary models.
    pub fn unknown_word_id(&self) -> Option<WordId> {
        self.unknown
    }

    pub fn is_open_vocabulary(&self) -> bool {
        self.unknown.is_some()
    }

    /// Sets the language weight and word insertion penalty used by
    /// [`NGramModel::score`]. `(1.0, 1.0)` removes all weighting.
    pub fn apply_weights(&mut self, lw: f32, wip: f32) -> Result<(), NGramError> {
        if !(lw > 0.0) || !lw.is_finite() {
            return Err(NGramError::InvalidWeight(lw));
        }
        if !(wip > 0.0) || !wip.is_finite() {
            return Err(NGramError::InvalidWeight(wip));
        }
        self.lw = lw;
        self.log_wip = self.lmath.log(wip as f64);
        log::debug!("Applied LM weights lw={} log_wip={}", lw, self.log_wip);
        Ok(())
    }

    /// Current language weight and log word insertion penalty.
    pub fn weights(&self) -> (f32, i32) {
        (self.lw, self.log_wip)
    }

    fn apply_unigram_weight(&mut self, uw: f32) -> Result<(), NGramError> {
        if !(uw > 0.0) || uw > 1.0 {
            return Err(NGramError::InvalidWeight(uw));
        }
        if uw >= 1.0 {
            return Ok(());
        }
        let n = self.grams[0].len().max(1);
        let log_uniform = self.lmath.log(1.0 / n as f64);
        let log_uw = self.lmath.log(uw as f64);
        let log_uniform_weight = self.lmath.log(1.0 - uw as f64);
        let sentence_start = self.lookup("<s>");
        let zero = self.zero();
        for (key, entry) in self.grams[0].iter_mut() {
            if Some(key[0]) == sentence_start || entry.prob <= zero {
                continue;
            }
            entry.prob = self
                .lmath
                .add(entry.prob + log_uw, log_uniform + log_uniform_weight);
        }
        Ok(())
    }

    fn weigh(&self, prob: i32) -> i32 {
        if prob <= self.zero() {
            return self.zero();
        }
        (prob as f64 * self.lw as f64) as i32 + self.log_wip
    }

    /// Converts a weighted score back to a raw log-probability.
    pub fn score_to_probability(&self, score: i32) -> i32 {
        if score <= self.zero() {
            return self.zero();
        }
        ((score - self.log_wip) as f64 / self.lw as f64).round() as i32
    }

    /// Weighted log-probability of `wid` after `history` (most recent word
    /// first), and the N-gram order that matched.
    pub fn score(&self, wid: WordId, history: &[WordId]) -> (i32, usize) {
        let (prob, n_used) = self.backoff_prob(wid, history, self.order);
        (self.weigh(prob), n_used)
    }

    pub fn trigram_score(&self, w3: WordId, w2: WordId, w1: WordId) -> (i32, usize) {
        let (prob, n_used) = self.backoff_prob(w3, &[w2, w1], 3);
        (self.weigh(prob), n_used)
    }

    pub fn bigram_score(&self, w2: WordId, w1: WordId) -> (i32, usize) {
        let (prob, n_used) = self.backoff_prob(w2, &[w1], 2);
        (self.weigh(prob), n_used)
    }

    /// String form of [`NGramModel::score`]; unknown words in a closed
    /// vocabulary score [`NGramModel::zero`].
    pub fn score_words(&self, word: &str, history: &[&str]) -> (i32, usize) {
        match self.word_id(word) {
            Some(wid) => self.score(wid, &self.history_ids(history)),
            None => (self.zero(), 0),
        }
    }

    /// Raw log-probability before weighting. `words[0]` is the predicted
    /// word, followed by its history, most recent first.
    pub fn probability(&self, words: &[&str]) -> i32 {
        let Some((word, history)) = words.split_first() else {
            return self.zero();
        };
        match self.word_id(word) {
            Some(wid) => self.quick_probability(wid, &self.history_ids(history)).0,
            None => self.zero(),
        }
    }

    pub fn quick_probability(&self, wid: WordId, history: &[WordId]) -> (i32, usize) {
        self.backoff_prob(wid, history, self.order)
    }

    fn history_ids(&self, history: &[&str]) -> Vec<WordId> {
        history.iter().map_while(|w| self.word_id(w)).collect()
    }

    fn backoff_prob(&self, wid: WordId, history: &[WordId], max_order: usize) -> (i32, usize) {
        if wid.index() >= self.vocab.len() {
            return (self.zero(), 0);
        }
        let (target, in_class) = match self.class_words.get(&wid) {
            Some(&(class, prob)) => (self.classes[class].tag, prob),
            None => (wid, 0),
        };
        let context: Vec<WordId> = history
            .iter()
            .take_while(|w| w.index() < self.vocab.len())
            .map(|w| self.class_words.get(w).map_or(*w, |&(c, _)| self.classes[c].tag))
            .collect();

        let max_ctx = context
            .len()
            .min(self.order.saturating_sub(1))
            .min(max_order.saturating_sub(1));
        let mut backoff = 0i32;
        let mut key: Vec<WordId> = Vec::with_capacity(max_ctx + 1);
        for n in (0..=max_ctx).rev() {
            key.clear();
            key.extend(context[..n].iter().rev());
            key.push(target);
            if let Some(entry) = self.grams[n].get(key.as_slice()) {
                if entry.prob <= self.zero() {
                    return (self.zero(), n + 1);
                }
                return (entry.prob + backoff + in_class, n + 1);
            }
            if n > 0 {
                key.pop();
                if let Some(ctx) = self.grams[n - 1].get(key.as_slice()) {
                    backoff += ctx.backoff;
                }
            }
        }
        (self.zero(), 0)
    }

    /// Adds a unigram with `weight` relative to the uniform distribution.
    /// Returns the existing ID if the word is already known.
    pub fn add_word(&mut self, word: &str, weight: f32) -> Result<WordId, NGramError> {
        if let Some(id) = self.lookup(word) {
            if !self.class_words.contains_key(&id) {
                return Ok(id);
            }
            return Err(NGramError::DuplicateWord(word.to_string()));
        }
        if !(weight > 0.0) {
            return Err(NGramError::InvalidWeight(weight));
        }
        let n = self.grams[0].len() + 1;
        let prob = self.lmath.log(weight as f64 / n as f64);
        let id = self.push_word(word);
        self.insert_gram(&[id], prob, 0);
        log::debug!("Added word {} to language model (id {})", word, id.0);
        Ok(id)
    }

    /// Folds the case of every vocabulary word. Words that collide after
    /// folding keep the first ID.
    pub fn case_fold(&mut self, case: NGramCase) {
        self.vocab_index.clear();
        for (i, word) in self.vocab.iter_mut().enumerate() {
            match case {
                NGramCase::Upper => word.make_ascii_uppercase(),
                NGramCase::Lower => word.make_ascii_lowercase(),
            }
            if self.vocab_index.contains_key(word.as_str()) {
                log::warn!("Case folding collapses duplicate word {}", word);
                continue;
            }
            self.vocab_index.insert(word.clone(), WordId(i as u32));
        }
        for class in &mut self.classes {
            match case {
                NGramCase::Upper => class.name.make_ascii_uppercase(),
                NGramCase::Lower => class.name.make_ascii_lowercase(),
            }
        }
    }
}
