//! Decoder session: owns the shared models and drives an acoustic search
//! engine through its stream and utterance lifecycle.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use cpu_time::ProcessTime;
use ndarray::ArrayView2;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::dict::{DictError, Dictionary};
use crate::lattice::Lattice;
use crate::logmath::{LogMath, LogMathError};
use crate::ngram::{NGramError, NGramFileType, NGramModel, NGramOptions, SharedNGramModel};

pub mod engine;
pub mod rawdata;

pub use engine::{AcousticSearchEngine, EngineContext, EngineError, EngineFactory};
pub use rawdata::RawDataBuffer;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Log math: {0}")]
    LogMath(#[from] LogMathError),
    #[error("Dictionary: {0}")]
    Dict(#[from] DictError),
    #[error("Language model: {0}")]
    NGram(#[from] NGramError),
    #[error("Engine: {0}")]
    Engine(#[from] EngineError),
    #[error("Session has been destroyed")]
    Destroyed,
    #[error("An utterance is already open")]
    UtteranceOpen,
    #[error("No utterance is open")]
    NoUtterance,
    #[error("Language model lock poisoned")]
    LockPoisoned,
}

impl SessionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Config(e) => e.user_message(),
            Self::LogMath(e) => e.user_message(),
            Self::Dict(e) => e.user_message(),
            Self::NGram(e) => e.user_message(),
            Self::Engine(e) => e.user_message(),
            Self::Destroyed => "The decoder has been shut down.",
            Self::UtteranceOpen | Self::NoUtterance => {
                "Decoder calls arrived out of order. Restart listening."
            }
            Self::LockPoisoned => "The language model is unavailable after an earlier failure.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UttState {
    Idle,
    InUtterance,
}

/// Audio, CPU and wall-clock time, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UttDuration {
    pub speech: f64,
    /// Process CPU time spent inside the engine.
    pub cpu: f64,
    pub wall: f64,
}

#[derive(Debug, Default)]
struct Timing {
    utt_speech: f64,
    utt_wall: Duration,
    total_speech: f64,
    total_wall: Duration,
    utt_cpu: Duration,
    total_cpu: Duration,
    utt_started: Option<Instant>,
}

struct Models {
    log_math: Arc<LogMath>,
    dictionary: Dictionary,
    language_model: Option<SharedNGramModel>,
}

fn load_models(config: &Config) -> Result<Models, SessionError> {
    let log_math = Arc::new(LogMath::new(config.logbase, 0, true)?);

    let dictionary = match &config.dict {
        Some(path) => Dictionary::read(path, config.fdict.as_deref(), config.dictcase)?,
        None => Dictionary::new(config.dictcase),
    };

    let language_model = match &config.lm {
        Some(path) => {
            let options = NGramOptions {
                mmap: config.mmap,
                lw: config.lw,
                wip: config.wip,
                uw: config.uw,
            };
            let mut lm =
                NGramModel::read(path, NGramFileType::Auto, log_math.clone(), Some(&options))?;
            if let Some(classdef) = &config.classdef {
                lm.read_class_def(classdef)?;
            }
            Some(Arc::new(RwLock::new(lm)))
        }
        None => None,
    };

    Ok(Models {
        log_math,
        dictionary,
        language_model,
    })
}

pub struct DecoderSession {
    config: Config,
    log_math: Arc<LogMath>,
    dictionary: Dictionary,
    language_model: Option<SharedNGramModel>,
    factory: Box<dyn EngineFactory>,
    engine: Option<Box<dyn AcousticSearchEngine>>,
    state: UttState,
    utt_count: u64,
    raw: RawDataBuffer,
    timing: Timing,
}

impl std::fmt::Debug for DecoderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderSession")
            .field("state", &self.state)
            .field("utt_count", &self.utt_count)
            .field("destroyed", &self.engine.is_none())
            .finish()
    }
}

impl DecoderSession {
    /// Loads the models named in `config` and builds an engine with `factory`.
    pub fn new<F>(config: Config, factory: F) -> Result<Self, SessionError>
    where
        F: EngineFactory + 'static,
    {
        config.validate()?;
        let start = Instant::now();
        let Models {
            log_math,
            dictionary,
            language_model,
        } = load_models(&config)?;

        let mut session = Self {
            config,
            log_math,
            dictionary,
            language_model,
            factory: Box::new(factory),
            engine: None,
            state: UttState::Idle,
            utt_count: 0,
            raw: RawDataBuffer::default(),
            timing: Timing::default(),
        };
        session.engine = Some(session.build_engine()?);
        log::info!("Decoder session ready in {:?}", start.elapsed());
        Ok(session)
    }

    fn build_engine(&self) -> Result<Box<dyn AcousticSearchEngine>, SessionError> {
        let ctx = EngineContext {
            config: &self.config,
            log_math: &self.log_math,
            language_model: self.language_model.as_ref(),
            dictionary: &self.dictionary,
        };
        Ok(self.factory.create(&ctx)?)
    }

    fn engine(&self) -> Result<&dyn AcousticSearchEngine, SessionError> {
        self.engine.as_deref().ok_or(SessionError::Destroyed)
    }

    fn engine_mut(&mut self) -> Result<&mut (dyn AcousticSearchEngine + 'static), SessionError> {
        self.engine.as_deref_mut().ok_or(SessionError::Destroyed)
    }

    /// Rebuilds the models and engine in place. `None` reloads the current
    /// configuration, picking up edits made through [`DecoderSession::config_mut`].
    /// On error the session keeps its previous models and engine.
    pub fn reconfigure(&mut self, config: Option<Config>) -> Result<(), SessionError> {
        let config = config.unwrap_or_else(|| self.config.clone());
        config.validate()?;
        let models = load_models(&config)?;
        let engine = self.factory.create(&EngineContext {
            config: &config,
            log_math: &models.log_math,
            language_model: models.language_model.as_ref(),
            dictionary: &models.dictionary,
        })?;

        if self.state == UttState::InUtterance {
            log::warn!("Reconfiguring with an open utterance; it is discarded");
        }
        self.engine = Some(engine);
        self.state = UttState::Idle;
        self.config = config;
        self.log_math = models.log_math;
        self.dictionary = models.dictionary;
        self.language_model = models.language_model;
        self.raw.clear();
        self.timing.utt_started = None;
        log::info!("Decoder reconfigured");
        Ok(())
    }

    /// Releases the engine. Returns `false` if it was already released.
    pub fn destroy(&mut self) -> bool {
        if self.engine.take().is_none() {
            return false;
        }
        self.state = UttState::Idle;
        self.raw.clear();
        log::debug!("Decoder session destroyed after {} utterances", self.utt_count);
        true
    }

    pub fn is_destroyed(&self) -> bool {
        self.engine.is_none()
    }

    pub fn utt_state(&self) -> UttState {
        self.state
    }

    pub fn utt_count(&self) -> u64 {
        self.utt_count
    }

    pub fn start_stream(&mut self) -> Result<(), SessionError> {
        self.engine_mut()?.start_stream()?;
        log::debug!("Audio stream started");
        Ok(())
    }

    pub fn start_utt(&mut self) -> Result<(), SessionError> {
        if self.state == UttState::InUtterance {
            return Err(SessionError::UtteranceOpen);
        }
        self.engine_mut()?.start_utt()?;
        self.state = UttState::InUtterance;
        self.utt_count += 1;
        self.raw.clear();
        self.timing.utt_speech = 0.0;
        self.timing.utt_wall = Duration::ZERO;
        self.timing.utt_cpu = Duration::ZERO;
        self.timing.utt_started = Some(Instant::now());
        log::debug!("Utterance {} started", self.utt_count);
        Ok(())
    }

    pub fn end_utt(&mut self) -> Result<(), SessionError> {
        if self.state != UttState::InUtterance {
            return Err(SessionError::NoUtterance);
        }
        let cpu = ProcessTime::now();
        let result = self.engine_mut()?.end_utt();
        self.timing.utt_cpu += cpu.elapsed();
        self.state = UttState::Idle;
        if let Some(started) = self.timing.utt_started.take() {
            self.timing.utt_wall = started.elapsed();
            self.timing.total_wall += self.timing.utt_wall;
        }
        self.timing.total_speech += self.timing.utt_speech;
        self.timing.total_cpu += self.timing.utt_cpu;
        result?;
        log::debug!(
            "Utterance {} ended ({:.2}s of audio)",
            self.utt_count,
            self.timing.utt_speech
        );
        Ok(())
    }

    fn require_utterance(&self) -> Result<(), SessionError> {
        self.engine()?;
        if self.state != UttState::InUtterance {
            return Err(SessionError::NoUtterance);
        }
        Ok(())
    }

    /// Feeds raw 16-bit PCM to the engine. Returns the frames searched.
    pub fn process_raw(
        &mut self,
        samples: &[i16],
        no_search: bool,
        full_utt: bool,
    ) -> Result<usize, SessionError> {
        self.require_utterance()?;
        let cpu = ProcessTime::now();
        let result = self.engine_mut()?.process_raw(samples, no_search, full_utt);
        self.timing.utt_cpu += cpu.elapsed();
        let frames = result?;
        self.raw.push(samples);
        self.timing.utt_speech += samples.len() as f64 / self.config.samprate as f64;
        Ok(frames)
    }

    /// Feeds feature frames, one row per frame.
    pub fn process_cep(
        &mut self,
        features: ArrayView2<'_, f32>,
        no_search: bool,
        full_utt: bool,
    ) -> Result<usize, SessionError> {
        self.require_utterance()?;
        let n_frames = features.nrows();
        let cpu = ProcessTime::now();
        let result = self.engine_mut()?.process_cep(features, no_search, full_utt);
        self.timing.utt_cpu += cpu.elapsed();
        let frames = result?;
        self.timing.utt_speech += n_frames as f64 / self.config.frate as f64;
        Ok(frames)
    }

    pub fn is_in_speech(&self) -> bool {
        self.engine.as_ref().is_some_and(|e| e.is_in_speech())
    }

    pub fn hypothesis(&self) -> Option<(String, i32)> {
        self.engine.as_ref()?.hypothesis()
    }

    pub fn probability(&self) -> i32 {
        self.engine
            .as_ref()
            .map(|e| e.probability())
            .unwrap_or_else(|| self.log_math.zero())
    }

    pub fn frames_searched(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.frames_searched())
    }

    pub fn word_lattice(&mut self) -> Option<Lattice> {
        self.engine.as_mut()?.word_lattice()
    }

    /// Caps the raw audio retained for the current utterance.
    pub fn set_raw_data_size(&mut self, samples: usize) {
        self.raw.set_capacity(samples);
    }

    /// Raw audio captured so far in the current or last utterance.
    pub fn raw_data(&self) -> Vec<i16> {
        self.raw.to_vec()
    }

    pub fn utt_duration(&self) -> UttDuration {
        let wall = match self.timing.utt_started {
            Some(started) => started.elapsed(),
            None => self.timing.utt_wall,
        };
        UttDuration {
            speech: self.timing.utt_speech,
            cpu: self.timing.utt_cpu.as_secs_f64(),
            wall: wall.as_secs_f64(),
        }
    }

    pub fn all_duration(&self) -> UttDuration {
        let open = self.timing.utt_started.map(|s| s.elapsed()).unwrap_or_default();
        let (open_speech, open_cpu) = if self.timing.utt_started.is_some() {
            (self.timing.utt_speech, self.timing.utt_cpu)
        } else {
            (0.0, Duration::ZERO)
        };
        UttDuration {
            speech: self.timing.total_speech + open_speech,
            cpu: (self.timing.total_cpu + open_cpu).as_secs_f64(),
            wall: (self.timing.total_wall + open).as_secs_f64(),
        }
    }

    /// Adds a word to the dictionary and, if missing, to the language model.
    /// With `update` the engine is told about the new vocabulary right away.
    pub fn add_word(
        &mut self,
        word: &str,
        phones: &str,
        update: bool,
    ) -> Result<usize, SessionError> {
        let id = self.dictionary.add_word(word, phones)?;
        if let Some(lm) = &self.language_model {
            let mut lm = lm.write().map_err(|_| SessionError::LockPoisoned)?;
            if lm.lookup(word).is_none() {
                lm.add_word(word, 1.0)?;
            }
        }
        if update {
            let dictionary = &self.dictionary;
            self.engine
                .as_deref_mut()
                .ok_or(SessionError::Destroyed)?
                .update_vocabulary(dictionary)?;
        }
        Ok(id)
    }

    /// Pronunciation of `word` as whitespace-separated phones.
    pub fn lookup_word(&self, word: &str) -> Option<String> {
        self.dictionary.lookup(word)
    }

    /// Replaces the dictionary, keeping the current fillers unless `fdict` is given.
    pub fn read_dict(&mut self, dict: &Path, fdict: Option<&Path>) -> Result<(), SessionError> {
        self.dictionary.reload(dict, fdict)?;
        let dictionary = &self.dictionary;
        self.engine
            .as_deref_mut()
            .ok_or(SessionError::Destroyed)?
            .update_vocabulary(dictionary)?;
        log::info!("Reloaded dictionary {} ({} words)", dict.display(), self.dictionary.len());
        Ok(())
    }

    pub fn write_dict(&self, path: &Path) -> Result<(), SessionError> {
        Ok(self.dictionary.write_to(path)?)
    }

    /// Adapts the acoustic model with the MLLR transform in `path`, or
    /// re-applies the current transform when `path` is `None`.
    pub fn update_mllr(&mut self, path: Option<&Path>) -> Result<(), SessionError> {
        self.engine_mut()?.update_mllr(path)?;
        if let Some(path) = path {
            self.config.mllr = Some(path.to_path_buf());
        }
        log::info!(
            "Applied MLLR transform {}",
            self.config
                .mllr
                .as_deref()
                .map_or_else(|| "(none)".into(), |p| p.display().to_string())
        );
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Edits take effect on the next `reconfigure(None)`.
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn log_math(&self) -> &Arc<LogMath> {
        &self.log_math
    }

    pub fn language_model(&self) -> Option<&SharedNGramModel> {
        self.language_model.as_ref()
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }
}
