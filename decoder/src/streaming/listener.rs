use rtrb::{Consumer, Producer, PushError, RingBuffer};

use super::{ListenerEvent, StreamError, UtteranceHypothesis};
use crate::session::{DecoderSession, UttState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Continue,
    /// Feeding the engine failed; the audio source should stop this stream.
    Abort,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Defer the search off the audio callback.
    pub no_search: bool,
    pub event_capacity: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            no_search: true,
            event_capacity: 64,
        }
    }
}

/// Drives a [`DecoderSession`] from an audio callback, one chunk at a time.
///
/// An utterance stays open for as long as the listener runs. Speech after
/// silence emits [`ListenerEvent::ListeningStarted`]; silence after speech
/// closes the utterance, emits its hypothesis and opens the next one. Events
/// go into a bounded ring that never blocks; when it is full the event is
/// dropped and counted.
pub struct UtteranceListener {
    session: DecoderSession,
    config: ListenerConfig,
    events: Producer<ListenerEvent>,
    listening: bool,
    failed: bool,
    chunks: u64,
    overruns: u64,
}

impl UtteranceListener {
    pub fn new(session: DecoderSession, config: ListenerConfig) -> (Self, Consumer<ListenerEvent>) {
        let (events, consumer) = RingBuffer::new(config.event_capacity.max(1));
        (
            Self {
                session,
                config,
                events,
                listening: false,
                failed: false,
                chunks: 0,
                overruns: 0,
            },
            consumer,
        )
    }

    /// Starts the stream and opens the first utterance.
    pub fn start(&mut self) -> Result<(), StreamError> {
        self.session.start_stream()?;
        if self.session.utt_state() == UttState::Idle {
            self.session.start_utt()?;
        }
        self.failed = false;
        self.listening = false;
        log::info!("Listening for utterances");
        Ok(())
    }

    pub fn session(&self) -> &DecoderSession {
        &self.session
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Events dropped because the ring was full.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    fn emit(&mut self, event: ListenerEvent) {
        if let Err(PushError::Full(dropped)) = self.events.push(event) {
            self.overruns += 1;
            log::warn!("Listener event ring full, dropping {:?}", dropped);
        }
    }

    pub fn on_chunk(&mut self, samples: &[i16]) -> Result<ChunkStatus, StreamError> {
        if self.failed {
            return Err(StreamError::Failed);
        }
        self.chunks += 1;

        if let Err(e) = self
            .session
            .process_raw(samples, self.config.no_search, false)
        {
            log::warn!("Aborting stream at chunk {}: {}", self.chunks, e);
            return Ok(ChunkStatus::Abort);
        }

        let in_speech = self.session.is_in_speech();
        if in_speech && !self.listening {
            if self.session.utt_state() == UttState::Idle {
                self.restart_utterance()?;
            }
            self.listening = true;
            let utterance = self.session.utt_count();
            log::debug!("Listening started (utterance {})", utterance);
            self.emit(ListenerEvent::ListeningStarted { utterance });
        } else if !in_speech && self.listening {
            self.listening = false;
            self.close_utterance()?;
            self.restart_utterance()?;
        }
        Ok(ChunkStatus::Continue)
    }

    fn close_utterance(&mut self) -> Result<(), StreamError> {
        if let Err(e) = self.session.end_utt() {
            self.failed = true;
            log::error!("Failed to end utterance: {}", e);
            return Err(e.into());
        }
        let (text, score) = self.session.hypothesis().unwrap_or_default();
        let hypothesis = UtteranceHypothesis {
            utterance: self.session.utt_count(),
            text,
            score,
            duration: self.session.utt_duration(),
            lattice: self.session.word_lattice(),
        };
        log::debug!(
            "Utterance {} closed: {:?}",
            hypothesis.utterance,
            hypothesis.text
        );
        self.emit(ListenerEvent::HypothesisReady(hypothesis));
        Ok(())
    }

    fn restart_utterance(&mut self) -> Result<(), StreamError> {
        if let Err(e) = self.session.start_utt() {
            self.failed = true;
            log::error!("Failed to reopen utterance: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Call once audio delivery has stopped. Closes any open utterance,
    /// emitting its hypothesis if speech was in progress, then releases the
    /// engine.
    pub fn shutdown(mut self) -> Result<DecoderSession, StreamError> {
        if self.session.utt_state() == UttState::InUtterance {
            if self.listening {
                self.listening = false;
                self.close_utterance()?;
            } else {
                self.session.end_utt()?;
            }
        }
        self.session.destroy();
        log::info!(
            "Listener shut down after {} chunks ({} dropped events)",
            self.chunks,
            self.overruns
        );
        Ok(self.session)
    }
}
