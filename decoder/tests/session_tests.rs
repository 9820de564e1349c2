mod common;

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use common::{silence_chunk, speech_chunk, write_temp, Script, SAMPLE_ARPA};
use ndarray::Array2;
use sphinx_decoder::config::Config;
use sphinx_decoder::session::{DecoderSession, SessionError, UttState};

fn session(script: &Script) -> DecoderSession {
    DecoderSession::new(Config::default(), script.factory()).unwrap()
}

#[test]
fn utterance_lifecycle() {
    let script = Script::default();
    let mut session = session(&script);
    assert_eq!(session.utt_state(), UttState::Idle);

    session.start_stream().unwrap();
    session.start_utt().unwrap();
    assert_eq!(session.utt_state(), UttState::InUtterance);
    assert_eq!(session.utt_count(), 1);
    session.process_raw(&speech_chunk(), false, false).unwrap();
    assert!(session.is_in_speech());
    session.end_utt().unwrap();
    assert_eq!(session.utt_state(), UttState::Idle);

    let (text, score) = session.hypothesis().unwrap();
    assert_eq!(text, "hello world");
    assert_eq!(score, -1000);
    assert_eq!(session.frames_searched(), 1);
    assert!(session.word_lattice().is_some());
    assert_eq!(
        script.calls(),
        vec!["start_stream", "start_utt", "process_raw", "end_utt"]
    );
}

#[test]
fn state_errors() {
    let script = Script::default();
    let mut session = session(&script);
    assert!(matches!(session.end_utt(), Err(SessionError::NoUtterance)));
    assert!(matches!(
        session.process_raw(&silence_chunk(), false, false),
        Err(SessionError::NoUtterance)
    ));

    session.start_utt().unwrap();
    assert!(matches!(session.start_utt(), Err(SessionError::UtteranceOpen)));
    assert_eq!(session.utt_count(), 1);
}

#[test]
fn destroy_is_idempotent() {
    let script = Script::default();
    let mut session = session(&script);
    assert!(session.destroy());
    assert!(!session.destroy());
    assert!(session.is_destroyed());
    assert!(matches!(session.start_utt(), Err(SessionError::Destroyed)));
    assert!(matches!(session.start_stream(), Err(SessionError::Destroyed)));
    assert!(session.hypothesis().is_none());
    assert_eq!(session.probability(), session.log_math().zero());
}

#[test]
fn failed_engine_start_keeps_session_idle() {
    let script = Script::default();
    let mut session = session(&script);
    script.fail_start_utt.store(true, Ordering::SeqCst);
    assert!(matches!(session.start_utt(), Err(SessionError::Engine(_))));
    assert_eq!(session.utt_state(), UttState::Idle);
    assert_eq!(session.utt_count(), 0);
}

#[test]
fn raw_data_keeps_most_recent_samples() {
    let script = Script::default();
    let mut session = session(&script);
    session.set_raw_data_size(200);
    session.start_utt().unwrap();
    session.process_raw(&silence_chunk(), true, false).unwrap();
    session.process_raw(&speech_chunk(), true, false).unwrap();

    let raw = session.raw_data();
    assert_eq!(raw.len(), 200);
    assert_eq!(&raw[40..], &speech_chunk()[..]);
    assert_eq!(raw[0], 3);

    session.end_utt().unwrap();
    assert_eq!(session.raw_data().len(), 200);
    session.start_utt().unwrap();
    assert!(session.raw_data().is_empty());
}

#[test]
fn rejected_audio_is_not_captured() {
    let script = Script::default();
    let mut session = session(&script);
    session.set_raw_data_size(1000);
    session.start_utt().unwrap();
    session.process_raw(&silence_chunk(), true, false).unwrap();

    script.fail_process.store(true, Ordering::SeqCst);
    assert!(matches!(
        session.process_raw(&speech_chunk(), true, false),
        Err(SessionError::Engine(_))
    ));
    assert_eq!(session.raw_data(), silence_chunk());
    assert!((session.utt_duration().speech - 0.01).abs() < 1e-9);
}

#[test]
fn durations_accumulate() {
    let script = Script::default();
    let mut session = session(&script);
    for _ in 0..2 {
        session.start_utt().unwrap();
        for _ in 0..100 {
            session.process_raw(&silence_chunk(), true, false).unwrap();
        }
        session.end_utt().unwrap();
    }
    // 100 chunks of 160 samples at 16 kHz.
    assert!((session.utt_duration().speech - 1.0).abs() < 1e-9);
    assert!((session.all_duration().speech - 2.0).abs() < 1e-9);
    assert!(session.all_duration().wall >= session.utt_duration().wall);
    assert!(session.utt_duration().cpu >= 0.0);
    assert!(session.all_duration().cpu >= session.utt_duration().cpu);
}

#[test]
fn cepstra_count_at_frame_rate() {
    let script = Script::default();
    let mut session = session(&script);
    session.start_utt().unwrap();
    let features = Array2::<f32>::zeros((50, 13));
    assert_eq!(session.process_cep(features.view(), false, true).unwrap(), 50);
    assert!((session.utt_duration().speech - 0.5).abs() < 1e-9);
    assert!(script.calls().contains(&"process_cep"));
}

#[test]
fn reconfigure_rebuilds_engine() {
    let script = Script::default();
    let mut session = session(&script);
    session.start_utt().unwrap();

    let mut config = Config::default();
    config.set("bestpathlw", 12.0).unwrap();
    session.reconfigure(Some(config)).unwrap();
    assert_eq!(script.engines_built.load(Ordering::SeqCst), 2);
    assert_eq!(session.config().bestpathlw, 12.0);
    assert_eq!(session.utt_state(), UttState::Idle);

    session.config_mut().ascale = 10.0;
    session.reconfigure(None).unwrap();
    assert_eq!(script.engines_built.load(Ordering::SeqCst), 3);
    assert_eq!(session.config().ascale, 10.0);
}

#[test]
fn reconfigure_rejects_invalid_config() {
    let script = Script::default();
    let mut session = session(&script);
    session.config_mut().ascale = 0.0;
    assert!(matches!(session.reconfigure(None), Err(SessionError::Config(_))));
}

#[test]
fn failed_reconfigure_keeps_previous_session() {
    let script = Script::default();
    let mut session = session(&script);

    let mut config = Config::default();
    config.set("lm", "/nonexistent/model.arpa").unwrap();
    assert!(matches!(session.reconfigure(Some(config)), Err(SessionError::NGram(_))));
    assert!(!session.is_destroyed());
    assert!(session.config().lm.is_none());

    script.fail_build.store(true, Ordering::SeqCst);
    let mut config = Config::default();
    config.set("bestpathlw", 12.0).unwrap();
    assert!(matches!(session.reconfigure(Some(config)), Err(SessionError::Engine(_))));
    assert!(!session.is_destroyed());
    assert_eq!(session.config().bestpathlw, Config::default().bestpathlw);
    assert_eq!(script.engines_built.load(Ordering::SeqCst), 1);

    session.start_utt().unwrap();
    assert_eq!(session.utt_state(), UttState::InUtterance);
}

#[test]
fn mllr_updates_reach_the_engine() {
    let script = Script::default();
    let mut session = session(&script);
    let transform = Path::new("/models/speaker.mllr");

    session.update_mllr(Some(transform)).unwrap();
    session.update_mllr(None).unwrap();
    assert_eq!(script.calls(), vec!["update_mllr", "update_mllr"]);
    assert_eq!(
        *script.mllr.lock().unwrap(),
        vec![Some(PathBuf::from("/models/speaker.mllr")), None]
    );
    assert_eq!(session.config().mllr.as_deref(), Some(transform));

    session.destroy();
    assert!(matches!(session.update_mllr(None), Err(SessionError::Destroyed)));
}

#[test]
fn reconfigure_revives_destroyed_session() {
    let script = Script::default();
    let mut session = session(&script);
    session.destroy();
    session.reconfigure(None).unwrap();
    assert!(!session.is_destroyed());
    session.start_utt().unwrap();
}

#[test]
fn loads_language_model_with_weights() {
    let lm_file = write_temp(SAMPLE_ARPA, ".arpa");
    let mut config = Config::default();
    config.set("lm", lm_file.path().to_str().unwrap()).unwrap();

    let script = Script::default();
    let session = DecoderSession::new(config, script.factory()).unwrap();
    let lm = session.language_model().unwrap().read().unwrap();
    let (lw, log_wip) = lm.weights();
    assert_eq!(lw, 6.5);
    assert_eq!(log_wip, session.log_math().log(0.65f32 as f64));
    assert!(lm.lookup("hello").is_some());
}

#[test]
fn missing_model_file_fails_construction() {
    let mut config = Config::default();
    config.set("lm", "/nonexistent/model.arpa").unwrap();
    let result = DecoderSession::new(config, Script::default().factory());
    assert!(matches!(result, Err(SessionError::NGram(_))));
}

#[test]
fn add_word_reaches_dictionary_model_and_engine() {
    let lm_file = write_temp(SAMPLE_ARPA, ".arpa");
    let mut config = Config::default();
    config.set("lm", lm_file.path().to_str().unwrap()).unwrap();
    let script = Script::default();
    let mut session = DecoderSession::new(config, script.factory()).unwrap();

    session.add_word("zebra", "Z IY B R AH", true).unwrap();
    assert_eq!(session.lookup_word("zebra").as_deref(), Some("Z IY B R AH"));
    assert!(session.language_model().unwrap().read().unwrap().lookup("zebra").is_some());
    assert_eq!(script.calls(), vec!["update_vocabulary"]);

    session.add_word("quagga", "K W AA G AH", false).unwrap();
    assert_eq!(script.calls().len(), 1);
    assert!(matches!(
        session.add_word("zebra", "Z EH B R AH", false),
        Err(SessionError::Dict(_))
    ));
}

#[test]
fn dictionary_round_trips_through_session() {
    let words = write_temp("hello HH AH L OW\nworld W ER L D\n", ".dict");
    let mut config = Config::default();
    config.set("dict", words.path().to_str().unwrap()).unwrap();
    let script = Script::default();
    let mut session = DecoderSession::new(config, script.factory()).unwrap();
    assert_eq!(session.lookup_word("world").as_deref(), Some("W ER L D"));

    session.add_word("goodbye", "G UH D B AY", false).unwrap();
    let out = tempfile::NamedTempFile::new().unwrap();
    session.write_dict(out.path()).unwrap();

    session.read_dict(out.path(), None).unwrap();
    assert_eq!(session.dictionary().len(), 3);
    assert_eq!(script.calls(), vec!["update_vocabulary"]);
}
