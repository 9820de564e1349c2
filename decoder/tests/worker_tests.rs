mod common;

use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use common::{sample_lattice, silence_chunk, speech_chunk, write_temp, Script, SAMPLE_ARPA};
use sphinx_decoder::config::Config;
use sphinx_decoder::logmath::LogMath;
use sphinx_decoder::ngram::{NGramFileType, NGramModel, SharedNGramModel};
use sphinx_decoder::session::{DecoderSession, UttDuration};
use sphinx_decoder::streaming::worker::process_utterance;
use sphinx_decoder::streaming::{
    ListenerConfig, PostProcessConfig, PostProcessor, ProcessedEvent, UtteranceHypothesis,
    UtteranceListener,
};

fn hypothesis(lmath: Arc<LogMath>) -> UtteranceHypothesis {
    UtteranceHypothesis {
        utterance: 7,
        text: "hallo word".to_string(),
        score: -1234,
        duration: UttDuration {
            speech: 0.6,
            wall: 0.01,
            ..Default::default()
        },
        lattice: Some(sample_lattice(lmath)),
    }
}

fn shared_model(lmath: Arc<LogMath>) -> SharedNGramModel {
    let file = write_temp(SAMPLE_ARPA, ".arpa");
    let lm = NGramModel::read(file.path(), NGramFileType::Arpa, lmath, None).unwrap();
    Arc::new(RwLock::new(lm))
}

#[test]
fn rescoring_finds_best_path() {
    let lmath = Arc::new(LogMath::default());
    let config = PostProcessConfig::default();
    let result = process_utterance(hypothesis(lmath), None, &config);
    assert_eq!(result.utterance, 7);
    assert_eq!(result.text, "hallo word");
    assert_eq!(result.best_path.as_deref(), Some("hello world"));
    assert!(result.lattice_probability.is_some());
    let words: Vec<&str> = result.segments.iter().map(|s| s.word.as_str()).collect();
    assert_eq!(words, vec!["<s>", "hello", "world"]);
}

#[test]
fn rescoring_with_language_model() {
    let lmath = Arc::new(LogMath::default());
    let lm = shared_model(lmath.clone());
    let config = PostProcessConfig {
        prune_threshold: Some(lmath.log(1e-6)),
        ..Default::default()
    };
    let result = process_utterance(hypothesis(lmath), Some(&lm), &config);
    assert_eq!(result.best_path.as_deref(), Some("hello world"));
}

#[test]
fn rescoring_can_be_disabled() {
    let lmath = Arc::new(LogMath::default());
    let config = PostProcessConfig {
        bestpath: false,
        ..Default::default()
    };
    let result = process_utterance(hypothesis(lmath), None, &config);
    assert_eq!(result.best_path, None);
    assert_eq!(result.lattice_probability, None);
    assert!(result.segments.is_empty());
}

#[test]
fn missing_lattice_passes_hypothesis_through() {
    let lmath = Arc::new(LogMath::default());
    let mut hyp = hypothesis(lmath);
    hyp.lattice = None;
    let result = process_utterance(hyp, None, &PostProcessConfig::default());
    assert_eq!(result.text, "hallo word");
    assert_eq!(result.best_path, None);
}

#[test]
fn result_serializes_without_segments() {
    let lmath = Arc::new(LogMath::default());
    let result = process_utterance(hypothesis(lmath), None, &PostProcessConfig::default());
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["best_path"], "hello world");
    assert_eq!(json["utterance"], 7);
    assert!(json.get("segments").is_none());
}

#[test]
fn config_follows_decoder_options() {
    let mut config = Config::default();
    config.set("bestpathlw", 11.0).unwrap();
    config.set("bestpath", false).unwrap();
    let post = PostProcessConfig::from_config(&config);
    assert_eq!(post.bestpath_lw, 11.0);
    assert!(!post.bestpath);
    assert_eq!(post.ascale, config.ascale);
}

#[test]
fn worker_processes_listener_events() {
    let script = Script::default();
    let session = DecoderSession::new(Config::default(), script.factory()).unwrap();
    let (mut listener, events) = UtteranceListener::new(session, ListenerConfig::default());
    listener.start().unwrap();

    let (tx, rx) = mpsc::channel();
    let mut worker = PostProcessor::new();
    let config = PostProcessConfig {
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    };
    worker.start(events, None, config, move |event| {
        let _ = tx.send(event);
    });
    assert!(worker.is_running());

    for _ in 0..3 {
        listener.on_chunk(&speech_chunk()).unwrap();
    }
    listener.on_chunk(&silence_chunk()).unwrap();

    let timeout = Duration::from_secs(5);
    assert!(matches!(
        rx.recv_timeout(timeout).unwrap(),
        ProcessedEvent::ListeningStarted { utterance: 1 }
    ));
    match rx.recv_timeout(timeout).unwrap() {
        ProcessedEvent::Utterance(result) => {
            assert_eq!(result.utterance, 1);
            assert_eq!(result.text, "hello world");
            assert_eq!(result.best_path.as_deref(), Some("hello world"));
        }
        other => panic!("expected an utterance, got {:?}", other),
    }

    worker.stop();
    assert!(!worker.is_running());
    listener.shutdown().unwrap();
}

#[test]
fn stop_drains_pending_events() {
    let script = Script::default();
    let session = DecoderSession::new(Config::default(), script.factory()).unwrap();
    let (mut listener, events) = UtteranceListener::new(session, ListenerConfig::default());
    listener.start().unwrap();
    listener.on_chunk(&speech_chunk()).unwrap();
    listener.on_chunk(&silence_chunk()).unwrap();

    let (tx, rx) = mpsc::channel();
    let mut worker = PostProcessor::new();
    worker.start(events, None, PostProcessConfig::default(), move |event| {
        let _ = tx.send(event);
    });
    worker.stop();
    assert_eq!(rx.try_iter().count(), 2);
}
