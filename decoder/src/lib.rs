//! Speech decoding session control with word lattices and N-gram language
//! models over integer log-domain arithmetic.

pub mod config;
pub mod dict;
pub mod error;
pub mod lattice;
pub mod logmath;
pub mod ngram;
pub mod session;
pub mod streaming;

pub use config::{Config, ConfigValue};
pub use error::SphinxError;
pub use lattice::{Lattice, LinkId, NodeId};
pub use logmath::LogMath;
pub use ngram::{NGramModel, SharedNGramModel, WordId};
pub use session::{AcousticSearchEngine, DecoderSession, EngineContext, EngineFactory, UttState};
