#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ndarray::ArrayView2;
use sphinx_decoder::dict::Dictionary;
use sphinx_decoder::lattice::Lattice;
use sphinx_decoder::logmath::LogMath;
use sphinx_decoder::session::engine::EngineResult;
use sphinx_decoder::session::{AcousticSearchEngine, EngineContext, EngineError};
use tempfile::NamedTempFile;

pub const SPEECH_LEVEL: i16 = 1000;
pub const CHUNK: usize = 160;

pub fn speech_chunk() -> Vec<i16> {
    (0..CHUNK).map(|i| if i % 2 == 0 { 4000 } else { -4000 }).collect()
}

pub fn silence_chunk() -> Vec<i16> {
    vec![3; CHUNK]
}

/// Shared handles for observing and steering a [`ScriptedEngine`].
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub calls: Arc<Mutex<Vec<&'static str>>>,
    pub fail_process: Arc<AtomicBool>,
    pub fail_start_utt: Arc<AtomicBool>,
    pub fail_build: Arc<AtomicBool>,
    pub engines_built: Arc<AtomicUsize>,
    /// Arguments of every `update_mllr` call, in order.
    pub mllr: Arc<Mutex<Vec<Option<PathBuf>>>>,
}

impl Script {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    /// Factory closure for `DecoderSession::new`.
    pub fn factory(&self) -> impl Fn(&EngineContext<'_>) -> EngineResult + Send + 'static {
        let script = self.clone();
        move |ctx: &EngineContext<'_>| {
            if script.fail_build.load(Ordering::SeqCst) {
                return Err(EngineError::Init {
                    what: "scripted engine".to_string(),
                    reason: "scripted failure".to_string(),
                });
            }
            script.engines_built.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedEngine {
                script: script.clone(),
                lmath: ctx.log_math.clone(),
                in_speech: false,
                heard_speech: false,
                frames: 0,
            }) as Box<dyn AcousticSearchEngine>)
        }
    }
}

/// Classifies chunks by amplitude and always hypothesizes "hello world".
pub struct ScriptedEngine {
    script: Script,
    lmath: Arc<LogMath>,
    in_speech: bool,
    heard_speech: bool,
    frames: usize,
}

impl AcousticSearchEngine for ScriptedEngine {
    fn start_stream(&mut self) -> Result<(), EngineError> {
        self.script.record("start_stream");
        Ok(())
    }

    fn start_utt(&mut self) -> Result<(), EngineError> {
        if self.script.fail_start_utt.load(Ordering::SeqCst) {
            return Err(EngineError::Utterance("scripted failure".to_string()));
        }
        self.script.record("start_utt");
        self.heard_speech = false;
        self.frames = 0;
        Ok(())
    }

    fn end_utt(&mut self) -> Result<(), EngineError> {
        self.script.record("end_utt");
        self.in_speech = false;
        Ok(())
    }

    fn process_raw(
        &mut self,
        samples: &[i16],
        _no_search: bool,
        _full_utt: bool,
    ) -> Result<usize, EngineError> {
        if self.script.fail_process.load(Ordering::SeqCst) {
            return Err(EngineError::Process("scripted failure".to_string()));
        }
        self.script.record("process_raw");
        self.in_speech = samples.iter().any(|s| s.unsigned_abs() > SPEECH_LEVEL as u16);
        self.heard_speech |= self.in_speech;
        let frames = samples.len() / CHUNK;
        self.frames += frames;
        Ok(frames)
    }

    fn process_cep(
        &mut self,
        features: ArrayView2<'_, f32>,
        _no_search: bool,
        _full_utt: bool,
    ) -> Result<usize, EngineError> {
        self.script.record("process_cep");
        self.frames += features.nrows();
        Ok(features.nrows())
    }

    fn is_in_speech(&self) -> bool {
        self.in_speech
    }

    fn hypothesis(&self) -> Option<(String, i32)> {
        let text = if self.heard_speech { "hello world" } else { "" };
        Some((text.to_string(), -1000))
    }

    fn probability(&self) -> i32 {
        -10
    }

    fn frames_searched(&self) -> usize {
        self.frames
    }

    fn word_lattice(&mut self) -> Option<Lattice> {
        self.heard_speech.then(|| sample_lattice(self.lmath.clone()))
    }

    fn update_vocabulary(&mut self, _dictionary: &Dictionary) -> Result<(), EngineError> {
        self.script.record("update_vocabulary");
        Ok(())
    }

    fn update_mllr(&mut self, path: Option<&Path>) -> Result<(), EngineError> {
        self.script.record("update_mllr");
        self.script.mllr.lock().unwrap().push(path.map(Path::to_path_buf));
        Ok(())
    }
}

/// `<s> (hello | hallo) (world | word) </s>`, where "hello world" is best.
pub fn sample_lattice(lmath: Arc<LogMath>) -> Lattice {
    let mut lat = Lattice::new(lmath);
    let s = lat.add_node("<s>", 0);
    let hello = lat.add_node("hello", 10);
    let hallo = lat.add_node("hallo", 10);
    let world = lat.add_node("world", 30);
    let word = lat.add_node("word", 30);
    let end = lat.add_node("</s>", 50);
    lat.new_link(s, hello, -100, 9);
    lat.new_link(s, hallo, -300, 9);
    lat.new_link(hello, world, -200, 29);
    lat.new_link(hello, word, -500, 29);
    lat.new_link(hallo, world, -400, 29);
    lat.new_link(world, end, -100, 49);
    lat.new_link(word, end, -100, 49);
    lat.set_start(s);
    lat.set_end(end);
    lat.set_n_frames(60);
    lat
}

pub const SAMPLE_ARPA: &str = "\
\\data\\
ngram 1=5
ngram 2=3

\\1-grams:
-1.0 </s>
-99 <s> -0.5
-0.7 hello -0.3
-0.9 world -0.2
-1.2 goodbye -0.1

\\2-grams:
-0.2 <s> hello
-0.1 hello world
-0.4 world </s>

\\end\\
";

pub fn write_temp(contents: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}
