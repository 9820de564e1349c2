use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DictError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: malformed dictionary entry")]
    Malformed { path: String, line: usize },
    #[error("Word already in dictionary: {0}")]
    DuplicateWord(String),
    #[error("Word has no pronunciation: {0}")]
    EmptyPronunciation(String),
}

impl DictError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Io { .. } => "Could not read or write the pronunciation dictionary.",
            Self::Malformed { .. } => "The pronunciation dictionary contains a malformed line.",
            Self::DuplicateWord(_) => "That word is already in the dictionary.",
            Self::EmptyPronunciation(_) => "A word needs at least one phone.",
        }
    }
}

fn alternate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+)\((\d+)\)$").expect("valid alternate pronunciation regex"))
}

/// Strips a pronunciation variant marker: `the(2)` becomes `the`.
pub fn base_word(word: &str) -> &str {
    alternate_re()
        .captures(word)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(word)
}

/// Fillers are silence and noise tokens: `<sil>`, `<s>`, `[NOISE]`, `++BREATH++`.
pub fn is_filler_word(word: &str) -> bool {
    let word = base_word(word);
    (word.starts_with('<') && word.ends_with('>'))
        || (word.starts_with('[') && word.ends_with(']'))
        || (word.len() > 4 && word.starts_with("++") && word.ends_with("++"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct DictEntry {
    pub word: String,
    pub phones: Vec<String>,
    pub filler: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: Vec<DictEntry>,
    index: HashMap<String, usize>,
    case_sensitive: bool,
}

impl Dictionary {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            case_sensitive,
        }
    }

    /// Loads a main dictionary and, optionally, a filler dictionary.
    pub fn read<P: AsRef<Path>>(
        dict_file: P,
        filler_file: Option<&Path>,
        case_sensitive: bool,
    ) -> Result<Self, DictError> {
        let mut dict = Self::new(case_sensitive);
        dict.load_file(dict_file.as_ref(), false)?;
        if let Some(filler) = filler_file {
            dict.load_file(filler, true)?;
        }
        log::info!(
            "Loaded dictionary {} ({} words)",
            dict_file.as_ref().display(),
            dict.len()
        );
        Ok(dict)
    }

    /// Replaces the main words, keeping existing fillers unless a new filler
    /// file is given.
    pub fn reload(
        &mut self,
        dict_file: &Path,
        filler_file: Option<&Path>,
    ) -> Result<(), DictError> {
        let fillers: Vec<DictEntry> = if filler_file.is_some() {
            Vec::new()
        } else {
            self.entries.iter().filter(|e| e.filler).cloned().collect()
        };
        let mut fresh = Self::new(self.case_sensitive);
        for entry in fillers {
            fresh.insert(entry);
        }
        fresh.load_file(dict_file, false)?;
        if let Some(filler) = filler_file {
            fresh.load_file(filler, true)?;
        }
        *self = fresh;
        Ok(())
    }

    fn load_file(&mut self, path: &Path, filler: bool) -> Result<(), DictError> {
        let io_err = |source| DictError::Io {
            path: path.display().to_string(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);
        for (n, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(";;") || trimmed.starts_with('#') {
                continue;
            }
            let mut parts = trimmed.split_whitespace();
            let word = parts.next().ok_or_else(|| DictError::Malformed {
                path: path.display().to_string(),
                line: n + 1,
            })?;
            let phones: Vec<String> = parts.map(String::from).collect();
            if phones.is_empty() {
                return Err(DictError::Malformed {
                    path: path.display().to_string(),
                    line: n + 1,
                });
            }
            if self.contains(word) {
                log::warn!("{}:{}: duplicate word {} ignored", path.display(), n + 1, word);
                continue;
            }
            self.insert(DictEntry {
                word: word.to_string(),
                phones,
                filler: filler || is_filler_word(word),
            });
        }
        Ok(())
    }

    fn key(&self, word: &str) -> String {
        if self.case_sensitive {
            word.to_string()
        } else {
            word.to_ascii_lowercase()
        }
    }

    fn insert(&mut self, entry: DictEntry) -> usize {
        let id = self.entries.len();
        self.index.insert(self.key(&entry.word), id);
        self.entries.push(entry);
        id
    }

    pub fn add_word(&mut self, word: &str, phones: &str) -> Result<usize, DictError> {
        if self.contains(word) {
            return Err(DictError::DuplicateWord(word.to_string()));
        }
        let phones: Vec<String> = phones.split_whitespace().map(String::from).collect();
        if phones.is_empty() {
            return Err(DictError::EmptyPronunciation(word.to_string()));
        }
        Ok(self.insert(DictEntry {
            word: word.to_string(),
            phones,
            filler: is_filler_word(word),
        }))
    }

    pub fn contains(&self, word: &str) -> bool {
        self.index.contains_key(&self.key(word))
    }

    /// Whitespace-separated phones for `word`.
    pub fn lookup(&self, word: &str) -> Option<String> {
        self.entry(word).map(|e| e.phones.join(" "))
    }

    pub fn entry(&self, word: &str) -> Option<&DictEntry> {
        self.index.get(&self.key(word)).map(|&id| &self.entries[id])
    }

    pub fn is_filler(&self, word: &str) -> bool {
        self.entry(word)
            .map(|e| e.filler)
            .unwrap_or_else(|| is_filler_word(word))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn words(&self) -> impl Iterator<Item = &DictEntry> {
        self.entries.iter()
    }

    /// Writes the non-filler words in load order.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), DictError> {
        let path = path.as_ref();
        let io_err = |source| DictError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut out = BufWriter::new(File::create(path).map_err(io_err)?);
        for entry in self.entries.iter().filter(|e| !e.filler) {
            writeln!(out, "{} {}", entry.word, entry.phones.join(" ")).map_err(io_err)?;
        }
        out.flush().map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_word_strips_variant() {
        assert_eq!(base_word("the(2)"), "the");
        assert_eq!(base_word("the"), "the");
        assert_eq!(base_word("(2)"), "(2)");
    }

    #[test]
    fn filler_detection() {
        assert!(is_filler_word("<sil>"));
        assert!(is_filler_word("[NOISE]"));
        assert!(is_filler_word("++BREATH++"));
        assert!(!is_filler_word("hello"));
    }
}
