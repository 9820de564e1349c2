use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rtrb::Consumer;
use serde::Serialize;

use super::{ListenerEvent, UtteranceHypothesis};
use crate::config::Config;
use crate::lattice::PathSegment;
use crate::ngram::SharedNGramModel;

#[derive(Debug, Clone)]
pub struct PostProcessConfig {
    pub bestpath: bool,
    pub bestpath_lw: f32,
    pub ascale: f32,
    /// Prune links below this log posterior after scoring.
    pub prune_threshold: Option<i32>,
    pub poll_interval: Duration,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PostProcessConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bestpath: config.bestpath,
            bestpath_lw: config.bestpathlw,
            ascale: config.ascale,
            prune_threshold: None,
            poll_interval: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UtteranceResult {
    pub utterance: u64,
    pub text: String,
    pub score: i32,
    /// Speech seconds in the utterance.
    pub duration: f64,
    /// Hypothesis rescored over the lattice, when one was available.
    pub best_path: Option<String>,
    /// Total lattice log probability from the posterior pass.
    pub lattice_probability: Option<i32>,
    #[serde(skip)]
    pub segments: Vec<PathSegment>,
}

#[derive(Debug, Clone)]
pub enum ProcessedEvent {
    ListeningStarted { utterance: u64 },
    Utterance(UtteranceResult),
}

/// Consumes listener events on its own thread so lattice rescoring never
/// runs on the audio callback.
pub struct PostProcessor {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessor {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start<F>(
        &mut self,
        events: Consumer<ListenerEvent>,
        language_model: Option<SharedNGramModel>,
        config: PostProcessConfig,
        on_event: F,
    ) where
        F: FnMut(ProcessedEvent) + Send + 'static,
    {
        if self.is_running() {
            log::warn!("Post-processor already running");
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        self.handle = Some(thread::spawn(move || {
            Self::run(running, events, language_model, config, on_event)
        }));
    }

    /// Stops the worker after it drains pending events, and waits for it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Post-processor thread panicked");
            }
        }
    }

    fn run<F>(
        running: Arc<AtomicBool>,
        mut events: Consumer<ListenerEvent>,
        language_model: Option<SharedNGramModel>,
        config: PostProcessConfig,
        mut on_event: F,
    ) where
        F: FnMut(ProcessedEvent),
    {
        log::info!("Post-processor thread started");
        let mut processed = 0usize;
        loop {
            match events.pop() {
                Ok(ListenerEvent::ListeningStarted { utterance }) => {
                    on_event(ProcessedEvent::ListeningStarted { utterance });
                }
                Ok(ListenerEvent::HypothesisReady(hyp)) => {
                    let result = process_utterance(hyp, language_model.as_ref(), &config);
                    processed += 1;
                    on_event(ProcessedEvent::Utterance(result));
                }
                Err(_) => {
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    thread::sleep(config.poll_interval);
                }
            }
        }
        log::info!("Post-processor thread stopped after {} utterances", processed);
    }
}

impl Drop for PostProcessor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Rescores an utterance's lattice with best-path and posterior passes.
pub fn process_utterance(
    hyp: UtteranceHypothesis,
    language_model: Option<&SharedNGramModel>,
    config: &PostProcessConfig,
) -> UtteranceResult {
    let mut result = UtteranceResult {
        utterance: hyp.utterance,
        text: hyp.text,
        score: hyp.score,
        duration: hyp.duration.speech,
        best_path: None,
        lattice_probability: None,
        segments: Vec::new(),
    };
    let Some(mut lattice) = hyp.lattice.filter(|_| config.bestpath) else {
        return result;
    };

    let start = Instant::now();
    let guard = match language_model.map(|lm| lm.read()) {
        Some(Ok(guard)) => Some(guard),
        Some(Err(_)) => {
            log::warn!("Language model lock poisoned; rescoring without it");
            None
        }
        None => None,
    };
    let lm = guard.as_deref();

    let Some(end) = lattice.best_path(lm, config.bestpath_lw, config.ascale) else {
        log::debug!("No path through lattice for utterance {}", result.utterance);
        return result;
    };
    let norm = lattice.posterior(lm, config.ascale);
    if let Some(threshold) = config.prune_threshold {
        if let Err(e) = lattice.posterior_prune(threshold) {
            log::warn!("Lattice pruning failed: {}", e);
        }
    }

    result.best_path = Some(lattice.hyp(end));
    result.segments = lattice.path(end);
    result.lattice_probability = Some(norm);
    log::debug!(
        "Rescored utterance {} in {:?}: {:?}",
        result.utterance,
        start.elapsed(),
        result.best_path
    );
    result
}
