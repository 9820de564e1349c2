use thiserror::Error;

use crate::config::ConfigError;
use crate::dict::DictError;
use crate::lattice::LatticeError;
use crate::logmath::LogMathError;
use crate::ngram::NGramError;
use crate::session::{EngineError, SessionError};
use crate::streaming::StreamError;

/// Unified decoder errors.
#[derive(Error, Debug)]
pub enum SphinxError {
    #[error("Log math: {0}")]
    LogMath(#[from] LogMathError),

    #[error("Lattice: {0}")]
    Lattice(#[from] LatticeError),

    #[error("Language model: {0}")]
    NGram(#[from] NGramError),

    #[error("Dictionary: {0}")]
    Dict(#[from] DictError),

    #[error("Configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine: {0}")]
    Engine(#[from] EngineError),

    #[error("Session: {0}")]
    Session(#[from] SessionError),

    #[error("Streaming: {0}")]
    Stream(#[from] StreamError),
}

impl SphinxError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::LogMath(e) => e.user_message(),
            Self::Lattice(e) => e.user_message(),
            Self::NGram(e) => e.user_message(),
            Self::Dict(e) => e.user_message(),
            Self::Config(e) => e.user_message(),
            Self::Engine(e) => e.user_message(),
            Self::Session(e) => e.user_message(),
            Self::Stream(e) => e.user_message(),
        }
    }
}

impl serde::Serialize for SphinxError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T, E = SphinxError> = std::result::Result<T, E>;
