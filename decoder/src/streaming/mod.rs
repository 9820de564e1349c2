//! Live decoding: an audio-callback-side listener that segments the stream
//! into utterances, and a worker thread that post-processes each one.

pub mod listener;
pub mod worker;

pub use listener::{ChunkStatus, ListenerConfig, UtteranceListener};
pub use worker::{PostProcessConfig, PostProcessor, ProcessedEvent, UtteranceResult};

use thiserror::Error;

use crate::lattice::Lattice;
use crate::session::{SessionError, UttDuration};

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Session: {0}")]
    Session(#[from] SessionError),
    #[error("Listener stopped after a fatal error")]
    Failed,
}

impl StreamError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Session(e) => e.user_message(),
            Self::Failed => "Listening stopped after an error. Start listening again.",
        }
    }
}

/// Hypothesis for one closed utterance, handed from the listener to the worker.
#[derive(Debug)]
pub struct UtteranceHypothesis {
    pub utterance: u64,
    pub text: String,
    pub score: i32,
    pub duration: UttDuration,
    pub lattice: Option<Lattice>,
}

#[derive(Debug)]
pub enum ListenerEvent {
    ListeningStarted { utterance: u64 },
    HypothesisReady(UtteranceHypothesis),
}
