//! Decoder configuration: every recognized option with its type and default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::logmath::DEFAULT_LOG_BASE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown option: {0}")]
    UnknownOption(String),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
    #[error("Option {name} out of range: {reason}")]
    OutOfRange { name: &'static str, reason: String },
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UnknownOption(_) => {
                "The configuration names an option the decoder does not know."
            }
            Self::InvalidValue { .. } | Self::OutOfRange { .. } => {
                "A configuration value has the wrong type or is out of range."
            }
            Self::Io { .. } => "Could not read the configuration file.",
            Self::Json(_) => "The configuration file is not valid JSON.",
        }
    }
}

/// A dynamically typed option value, as set by name.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Str(String),
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl From<ConfigValue> for Value {
    fn from(v: ConfigValue) -> Self {
        match v {
            ConfigValue::Str(s) => Value::String(s),
            ConfigValue::Float(f) => serde_json::json!(f),
            ConfigValue::Int(i) => Value::from(i),
            ConfigValue::Bool(b) => Value::Bool(b),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i32> for ConfigValue {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    // Model files
    pub hmm: Option<PathBuf>,
    pub dict: Option<PathBuf>,
    pub fdict: Option<PathBuf>,
    pub lm: Option<PathBuf>,
    pub lmctl: Option<PathBuf>,
    pub lmname: Option<String>,
    pub classdef: Option<PathBuf>,
    pub fsg: Option<PathBuf>,
    pub jsgf: Option<PathBuf>,
    pub allphone: Option<PathBuf>,
    pub allphone_ci: bool,
    pub mllr: Option<PathBuf>,

    // Acoustic model parts, overriding files under `hmm`
    pub featparams: Option<PathBuf>,
    pub mdef: Option<PathBuf>,
    pub tmat: Option<PathBuf>,
    pub tmatfloor: f32,
    pub mean: Option<PathBuf>,
    pub var: Option<PathBuf>,
    pub varfloor: f32,
    pub mixw: Option<PathBuf>,
    pub mixwfloor: f32,
    pub sendump: Option<PathBuf>,
    pub aw: i32,

    // Gaussian scoring
    pub ds: i32,
    pub topn: i32,
    /// A single width or one per feature stream, e.g. `"0"` or `"0,0,0"`.
    pub topn_beam: String,

    // Logging
    pub logfn: Option<PathBuf>,
    pub mfclogdir: Option<PathBuf>,
    pub rawlogdir: Option<PathBuf>,
    pub senlogdir: Option<PathBuf>,
    pub debug: i32,

    // Beams
    pub beam: f64,
    pub wbeam: f64,
    pub pbeam: f64,
    pub lpbeam: f64,
    pub lponlybeam: f64,
    pub fwdflatbeam: f64,
    pub fwdflatwbeam: f64,
    pub pl_window: i32,
    pub pl_beam: f64,
    pub pl_pbeam: f64,
    pub pl_weight: f64,
    pub pip: f32,

    // Search passes
    pub fwdtree: bool,
    pub fwdflat: bool,
    pub bestpath: bool,
    pub compallsen: bool,
    pub backtrace: bool,
    pub latsize: i32,
    pub maxwpf: i32,
    pub maxhmmpf: i32,
    pub min_endfr: i32,
    pub fwdflatefwid: i32,
    pub fwdflatsfwin: i32,

    // Language model weighting
    pub lw: f32,
    pub fwdflatlw: f32,
    pub bestpathlw: f32,
    pub ascale: f32,
    pub wip: f32,
    pub nwpen: f32,
    pub uw: f32,
    pub silprob: f32,
    pub fillprob: f32,

    // Keyword spotting
    pub keyphrase: Option<String>,
    pub kws: Option<PathBuf>,
    pub kws_plp: f64,
    pub kws_delay: i32,
    pub kws_threshold: f64,

    // Audio and arithmetic
    pub dictcase: bool,
    pub mmap: bool,
    pub logbase: f64,
    pub samprate: f32,
    pub input_endian: String,
    pub frate: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hmm: None,
            dict: None,
            fdict: None,
            lm: None,
            lmctl: None,
            lmname: None,
            classdef: None,
            fsg: None,
            jsgf: None,
            allphone: None,
            allphone_ci: false,
            mllr: None,

            featparams: None,
            mdef: None,
            tmat: None,
            tmatfloor: 1e-4,
            mean: None,
            var: None,
            varfloor: 1e-4,
            mixw: None,
            mixwfloor: 1e-7,
            sendump: None,
            aw: 1,

            ds: 1,
            topn: 4,
            topn_beam: "0".to_string(),

            logfn: None,
            mfclogdir: None,
            rawlogdir: None,
            senlogdir: None,
            debug: 0,

            beam: 1e-48,
            wbeam: 7e-29,
            pbeam: 1e-48,
            lpbeam: 1e-40,
            lponlybeam: 7e-29,
            fwdflatbeam: 1e-64,
            fwdflatwbeam: 7e-29,
            pl_window: 5,
            pl_beam: 1e-10,
            pl_pbeam: 1e-10,
            pl_weight: 3.0,
            pip: 1.0,

            fwdtree: true,
            fwdflat: true,
            bestpath: true,
            compallsen: false,
            backtrace: false,
            latsize: 5000,
            maxwpf: -1,
            maxhmmpf: 30000,
            min_endfr: 0,
            fwdflatefwid: 4,
            fwdflatsfwin: 25,

            lw: 6.5,
            fwdflatlw: 8.5,
            bestpathlw: 9.5,
            ascale: 20.0,
            wip: 0.65,
            nwpen: 1.0,
            uw: 1.0,
            silprob: 0.005,
            fillprob: 1e-8,

            keyphrase: None,
            kws: None,
            kws_plp: 1e-1,
            kws_delay: 10,
            kws_threshold: 1.0,

            dictcase: false,
            mmap: true,
            logbase: DEFAULT_LOG_BASE,
            samprate: 16000.0,
            input_endian: "little".to_string(),
            frate: 100,
        }
    }
}

/// `-lw` and `lw` name the same option.
fn normalize(name: &str) -> &str {
    name.trim_start_matches('-')
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded decoder configuration from {}", path.display());
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn as_object(&self) -> Result<serde_json::Map<String, Value>, ConfigError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(ConfigError::InvalidValue {
                name: "config".to_string(),
                reason: "not an object".to_string(),
            }),
        }
    }

    /// Sets one option by name. Unknown names and values of the wrong type
    /// are rejected and leave the configuration unchanged.
    pub fn set(&mut self, name: &str, value: impl Into<ConfigValue>) -> Result<(), ConfigError> {
        let key = normalize(name);
        let mut map = self.as_object()?;
        if !map.contains_key(key) {
            return Err(ConfigError::UnknownOption(name.to_string()));
        }
        map.insert(key.to_string(), value.into().into());
        let updated: Self =
            serde_json::from_value(Value::Object(map)).map_err(|e| ConfigError::InvalidValue {
                name: key.to_string(),
                reason: e.to_string(),
            })?;
        *self = updated;
        Ok(())
    }

    /// Current value of an option, `None` for unknown names and unset paths.
    pub fn get(&self, name: &str) -> Option<ConfigValue> {
        let map = self.as_object().ok()?;
        match map.get(normalize(name))? {
            Value::String(s) => Some(ConfigValue::Str(s.clone())),
            Value::Bool(b) => Some(ConfigValue::Bool(*b)),
            Value::Number(n) if n.is_f64() => n.as_f64().map(ConfigValue::Float),
            Value::Number(n) => n.as_i64().map(ConfigValue::Int),
            _ => None,
        }
    }

    /// Applies `PREFIX_NAME` environment overrides, e.g. `SPHINX_LW=7.0`.
    /// Unparseable values are logged and skipped.
    pub fn with_env_overrides(mut self, prefix: &str) -> Self {
        let Ok(map) = self.as_object() else {
            return self;
        };
        for (key, current) in map {
            let var = format!("{}{}", prefix, key.to_uppercase());
            let Ok(raw) = std::env::var(&var) else {
                continue;
            };
            let value = match current {
                Value::Bool(_) => raw.parse::<bool>().ok().map(ConfigValue::Bool),
                Value::Number(n) if n.is_f64() => raw.parse::<f64>().ok().map(ConfigValue::Float),
                Value::Number(_) => raw.parse::<i64>().ok().map(ConfigValue::Int),
                _ => Some(ConfigValue::Str(raw.clone())),
            };
            match value.map(|v| self.set(&key, v)) {
                Some(Ok(())) => log::debug!("Applied {}={}", var, raw),
                Some(Err(e)) => log::warn!("Ignoring {}: {}", var, e),
                None => log::warn!("Ignoring {}: cannot parse {:?}", var, raw),
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.logbase > 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "logbase",
                reason: format!("{} must be greater than 1", self.logbase),
            });
        }
        if !(self.samprate > 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "samprate",
                reason: format!("{} must be positive", self.samprate),
            });
        }
        if !(self.ascale > 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "ascale",
                reason: format!("{} must be positive", self.ascale),
            });
        }
        let weights = [
            ("lw", self.lw),
            ("fwdflatlw", self.fwdflatlw),
            ("bestpathlw", self.bestpathlw),
        ];
        for (name, lw) in weights {
            if !(lw > 0.0) {
                return Err(ConfigError::OutOfRange {
                    name,
                    reason: format!("{} must be positive", lw),
                });
            }
        }
        if !(self.wip > 0.0) {
            return Err(ConfigError::OutOfRange {
                name: "wip",
                reason: format!("{} must be positive", self.wip),
            });
        }
        if self.frate <= 0 {
            return Err(ConfigError::OutOfRange {
                name: "frate",
                reason: format!("{} must be positive", self.frate),
            });
        }
        if !matches!(self.input_endian.as_str(), "little" | "big") {
            return Err(ConfigError::OutOfRange {
                name: "input_endian",
                reason: format!("{:?} must be \"little\" or \"big\"", self.input_endian),
            });
        }
        Ok(())
    }
}
