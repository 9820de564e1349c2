//! Word classes: a tag word in the model whose probability mass is shared
//! among member words by in-class probabilities.
//!
//! Class definition files look like:
//!
//! ```text
//! LMCLASS [CITY]
//! boston 0.5
//! chicago
//! END [CITY]
//! ```
//!
//! Members without an explicit probability split whatever mass is left.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{NGramError, NGramModel, WordId};

#[derive(Debug, Clone)]
pub struct WordClass {
    pub(crate) name: String,
    pub(crate) tag: WordId,
    /// Members and their in-class log probabilities.
    pub(crate) words: Vec<(WordId, i32)>,
}

impl WordClass {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> WordId {
        self.tag
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl NGramModel {
    fn class_index(&self, name: &str) -> Option<usize> {
        self.classes.iter().position(|c| c.name == name)
    }

    pub fn class(&self, name: &str) -> Option<&WordClass> {
        self.class_index(name).map(|i| &self.classes[i])
    }

    /// Name of the class `wid` belongs to, if any.
    pub fn class_of(&self, wid: WordId) -> Option<&str> {
        self.class_words
            .get(&wid)
            .map(|&(c, _)| self.classes[c].name.as_str())
    }

    /// Adds a class of words. The tag is reused if it is already a unigram,
    /// otherwise added with `weight`. Member weights are normalized to sum
    /// to one within the class.
    pub fn add_class(
        &mut self,
        class_name: &str,
        weight: f32,
        words: &[&str],
        weights: &[f32],
    ) -> Result<(), NGramError> {
        if words.len() != weights.len() {
            return Err(NGramError::WeightCount {
                class: class_name.to_string(),
                words: words.len(),
                weights: weights.len(),
            });
        }
        if self.class_index(class_name).is_some() {
            return Err(NGramError::DuplicateClass(class_name.to_string()));
        }
        if let Some(w) = words.iter().find(|w| self.lookup(w).is_some()) {
            return Err(NGramError::DuplicateWord(w.to_string()));
        }
        if let Some(&w) = weights.iter().find(|&&w| !(w > 0.0)) {
            return Err(NGramError::InvalidWeight(w));
        }
        let total: f32 = weights.iter().sum();

        let tag = match self.lookup(class_name) {
            Some(id) => id,
            None => self.add_word(class_name, weight)?,
        };
        let class = self.classes.len();
        let mut members = Vec::with_capacity(words.len());
        for (word, &w) in words.iter().zip(weights) {
            let id = self.push_word(word);
            let prob = self.lmath.log((w / total) as f64);
            self.class_words.insert(id, (class, prob));
            members.push((id, prob));
        }
        self.classes.push(WordClass {
            name: class_name.to_string(),
            tag,
            words: members,
        });
        log::debug!("Added class {} with {} words", class_name, words.len());
        Ok(())
    }

    /// Adds a word to an existing class with in-class probability
    /// `weight / (n + 1)`, where `n` is the current class size. Existing
    /// members are scaled down so the class still sums to one.
    pub fn add_class_word(
        &mut self,
        class_name: &str,
        word: &str,
        weight: f32,
    ) -> Result<WordId, NGramError> {
        let class = self
            .class_index(class_name)
            .ok_or_else(|| NGramError::UnknownClass(class_name.to_string()))?;
        if self.lookup(word).is_some() {
            return Err(NGramError::DuplicateWord(word.to_string()));
        }
        let fprob = weight / (self.classes[class].words.len() + 1) as f32;
        if !(fprob > 0.0 && fprob < 1.0) {
            return Err(NGramError::InvalidWeight(weight));
        }

        let scale = self.lmath.log(1.0 - fprob as f64);
        let prob = self.lmath.log(fprob as f64);
        for (id, p) in self.classes[class].words.iter_mut() {
            *p += scale;
            if let Some(entry) = self.class_words.get_mut(id) {
                entry.1 = *p;
            }
        }
        let id = self.push_word(word);
        self.classes[class].words.push((id, prob));
        self.class_words.insert(id, (class, prob));
        Ok(id)
    }

    /// Loads class definitions from `path`. Returns the number of classes added.
    pub fn read_class_def<P: AsRef<Path>>(&mut self, path: P) -> Result<usize, NGramError> {
        let path = path.as_ref();
        let parse_err = |line: usize, reason: &str| NGramError::Parse {
            path: path.display().to_string(),
            line,
            reason: reason.to_string(),
        };
        let file = File::open(path).map_err(|e| NGramError::io(path, e))?;

        let mut current: Option<(String, Vec<(String, Option<f32>)>)> = None;
        let mut added = 0;
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| NGramError::io(path, e))?;
            let fields: Vec<&str> = line.split_whitespace().collect();
            let open = current.as_ref().map(|(name, _)| name.clone());
            match (fields.as_slice(), open.as_deref()) {
                ([], _) => {}
                (&["LMCLASS", name], None) => current = Some((name.to_string(), Vec::new())),
                (&["LMCLASS", ..], _) => return Err(parse_err(i + 1, "bad or nested LMCLASS")),
                (&["END", name], Some(open)) if name == open => {
                    if let Some((name, members)) = current.take() {
                        self.add_class_def(&name, &members)
                            .map_err(|e| parse_err(i + 1, &e.to_string()))?;
                        added += 1;
                    }
                }
                (&["END", ..], _) => return Err(parse_err(i + 1, "END without matching LMCLASS")),
                (&[word], Some(_)) => {
                    if let Some((_, members)) = current.as_mut() {
                        members.push((word.to_string(), None));
                    }
                }
                (&[word, prob], Some(_)) => {
                    let p: f32 = prob
                        .parse()
                        .map_err(|_| parse_err(i + 1, "bad class word probability"))?;
                    if let Some((_, members)) = current.as_mut() {
                        members.push((word.to_string(), Some(p)));
                    }
                }
                _ => return Err(parse_err(i + 1, "unexpected line outside a class")),
            }
        }
        if current.is_some() {
            return Err(parse_err(0, "unterminated LMCLASS"));
        }
        log::info!("Read {} classes from {}", added, path.display());
        Ok(added)
    }

    fn add_class_def(
        &mut self,
        name: &str,
        members: &[(String, Option<f32>)],
    ) -> Result<(), NGramError> {
        let explicit: f32 = members.iter().filter_map(|(_, p)| *p).sum();
        let unspecified = members.iter().filter(|(_, p)| p.is_none()).count();
        let share = if unspecified > 0 {
            let rest = 1.0 - explicit;
            if !(rest > 0.0) {
                return Err(NGramError::InvalidWeight(rest));
            }
            rest / unspecified as f32
        } else {
            0.0
        };
        let words: Vec<&str> = members.iter().map(|(w, _)| w.as_str()).collect();
        let weights: Vec<f32> = members.iter().map(|(_, p)| p.unwrap_or(share)).collect();
        self.add_class(name, 1.0, &words, &weights)
    }
}
