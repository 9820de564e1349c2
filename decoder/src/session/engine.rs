//! The acoustic search engine seam. Feature extraction, acoustic scoring and
//! the search itself live behind [`AcousticSearchEngine`]; the session only
//! drives its lifecycle.

use std::path::Path;
use std::sync::Arc;

use ndarray::ArrayView2;
use thiserror::Error;

use crate::config::Config;
use crate::dict::Dictionary;
use crate::lattice::Lattice;
use crate::logmath::LogMath;
use crate::ngram::SharedNGramModel;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to initialize acoustic engine ({what}): {reason}")]
    Init { what: String, reason: String },
    #[error("Failed to process audio: {0}")]
    Process(String),
    #[error("Utterance control failed: {0}")]
    Utterance(String),
}

impl EngineError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Init { .. } => "The speech engine could not be started. Check the model paths.",
            Self::Process(_) => "The speech engine failed while processing audio.",
            Self::Utterance(_) => "The speech engine could not start or finish an utterance.",
        }
    }
}

/// What an engine is built from. Everything is borrowed from the session,
/// which keeps ownership across rebuilds.
pub struct EngineContext<'a> {
    pub config: &'a Config,
    pub log_math: &'a Arc<LogMath>,
    pub language_model: Option<&'a SharedNGramModel>,
    pub dictionary: &'a Dictionary,
}

pub trait AcousticSearchEngine: Send {
    /// Marks the start of a new audio stream; timestamps restart at zero.
    fn start_stream(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn start_utt(&mut self) -> Result<(), EngineError>;

    fn end_utt(&mut self) -> Result<(), EngineError>;

    /// Feeds 16-bit PCM. With `no_search` only features are computed and the
    /// search is deferred. Returns the number of frames searched.
    fn process_raw(
        &mut self,
        samples: &[i16],
        no_search: bool,
        full_utt: bool,
    ) -> Result<usize, EngineError>;

    /// Feeds precomputed feature frames, one row per frame.
    fn process_cep(
        &mut self,
        features: ArrayView2<'_, f32>,
        no_search: bool,
        full_utt: bool,
    ) -> Result<usize, EngineError>;

    fn is_in_speech(&self) -> bool;

    /// Current best hypothesis and its path score.
    fn hypothesis(&self) -> Option<(String, i32)>;

    /// Posterior probability of the current hypothesis.
    fn probability(&self) -> i32;

    fn frames_searched(&self) -> usize;

    /// Word lattice of the last utterance, if the search produced one.
    fn word_lattice(&mut self) -> Option<Lattice>;

    /// Called after the dictionary changes.
    fn update_vocabulary(&mut self, _dictionary: &Dictionary) -> Result<(), EngineError> {
        Ok(())
    }

    /// Adapts the acoustic model with an MLLR transform read from `path`.
    /// `None` re-applies the transform already in use.
    fn update_mllr(&mut self, _path: Option<&Path>) -> Result<(), EngineError> {
        Ok(())
    }
}

pub type EngineResult = Result<Box<dyn AcousticSearchEngine>, EngineError>;

pub trait EngineFactory: Send {
    fn create(&self, ctx: &EngineContext<'_>) -> EngineResult;
}

impl<F> EngineFactory for F
where
    F: Fn(&EngineContext<'_>) -> EngineResult + Send,
{
    fn create(&self, ctx: &EngineContext<'_>) -> EngineResult {
        self(ctx)
    }
}
