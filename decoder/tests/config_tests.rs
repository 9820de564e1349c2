mod common;

use common::write_temp;
use rstest::rstest;
use sphinx_decoder::config::{Config, ConfigError, ConfigValue};

#[test]
fn defaults_are_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.lw, 6.5);
    assert_eq!(config.bestpathlw, 9.5);
    assert_eq!(config.ascale, 20.0);
    assert_eq!(config.latsize, 5000);
    assert!(config.bestpath);
    assert!(config.mmap);
    assert_eq!(config.input_endian, "little");
    assert!(config.hmm.is_none());
}

#[test]
fn set_accepts_dashed_names() {
    let mut config = Config::default();
    config.set("-lw", 7.5).unwrap();
    assert_eq!(config.lw, 7.5);
    config.set("latsize", 100).unwrap();
    assert_eq!(config.latsize, 100);
    config.set("bestpath", false).unwrap();
    assert!(!config.bestpath);
    config.set("-hmm", "/models/en-us").unwrap();
    assert_eq!(config.hmm.as_deref(), Some(std::path::Path::new("/models/en-us")));
}

#[test]
fn get_reports_typed_values() {
    let mut config = Config::default();
    config.set("lw", 7.5).unwrap();
    assert_eq!(config.get("-lw"), Some(ConfigValue::Float(7.5)));
    assert_eq!(config.get("latsize"), Some(ConfigValue::Int(5000)));
    assert_eq!(config.get("fwdflat"), Some(ConfigValue::Bool(true)));
    assert_eq!(config.get("input_endian"), Some(ConfigValue::Str("little".into())));
    assert_eq!(config.get("hmm"), None);
    assert_eq!(config.get("no_such_option"), None);
}

#[test]
fn unknown_option_is_rejected() {
    let mut config = Config::default();
    let err = config.set("-nosuch", 1).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownOption(ref name) if name == "-nosuch"));
}

#[rstest]
#[case("latsize", ConfigValue::Float(3.5))]
#[case("bestpath", ConfigValue::Str("yes".into()))]
#[case("lw", ConfigValue::Str("heavy".into()))]
fn wrongly_typed_values_leave_config_unchanged(#[case] name: &str, #[case] value: ConfigValue) {
    let mut config = Config::default();
    let err = config.set(name, value).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }));
    assert_eq!(config, Config::default());
}

#[test]
fn json_round_trips() {
    let mut config = Config::default();
    config.set("wip", 0.2).unwrap();
    config.set("dict", "/tmp/words.dict").unwrap();
    let json = config.to_json_string().unwrap();
    assert_eq!(Config::from_json_str(&json).unwrap(), config);
}

#[test]
fn json_fills_missing_fields_with_defaults() {
    let config = Config::from_json_str(r#"{ "lw": 10.0 }"#).unwrap();
    assert_eq!(config.lw, 10.0);
    assert_eq!(config.wip, Config::default().wip);
}

#[test]
fn json_with_unknown_key_fails() {
    let result = Config::from_json_str(r#"{ "lw": 10.0, "loudness": 11 }"#);
    assert!(matches!(result, Err(ConfigError::Json(_))));
}

#[test]
fn json_is_validated() {
    let result = Config::from_json_str(r#"{ "logbase": 1.0 }"#);
    assert!(matches!(result, Err(ConfigError::OutOfRange { name: "logbase", .. })));
}

#[test]
fn reads_from_file() {
    let file = write_temp(r#"{ "bestpathlw": 11.0, "frate": 50 }"#, ".json");
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.bestpathlw, 11.0);
    assert_eq!(config.frate, 50);
}

#[test]
fn missing_file_is_io_error() {
    let result = Config::from_file("/nonexistent/decoder.json");
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn environment_overrides_matching_options() {
    let prefix = "SPHINX_CFG_TEST_";
    std::env::set_var(format!("{prefix}LW"), "3.5");
    std::env::set_var(format!("{prefix}LATSIZE"), "42");
    std::env::set_var(format!("{prefix}FWDFLAT"), "false");
    std::env::set_var(format!("{prefix}MAXWPF"), "many");

    let config = Config::default().with_env_overrides(prefix);
    assert_eq!(config.lw, 3.5);
    assert_eq!(config.latsize, 42);
    assert!(!config.fwdflat);
    assert_eq!(config.maxwpf, Config::default().maxwpf);
}

#[rstest]
#[case("samprate", ConfigValue::Float(0.0))]
#[case("ascale", ConfigValue::Float(-1.0))]
#[case("bestpathlw", ConfigValue::Float(0.0))]
#[case("frate", ConfigValue::Int(0))]
#[case("input_endian", ConfigValue::Str("middle".into()))]
fn validate_rejects_out_of_range(#[case] name: &str, #[case] value: ConfigValue) {
    let mut config = Config::default();
    config.set(name, value).unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { .. })));
}

#[test]
fn errors_have_user_messages() {
    let err = ConfigError::UnknownOption("x".into());
    assert!(!err.user_message().is_empty());
}

#[test]
fn crate_error_wraps_and_serializes() {
    let err: sphinx_decoder::SphinxError = ConfigError::UnknownOption("-nosuch".into()).into();
    assert_eq!(err.user_message(), ConfigError::UnknownOption(String::new()).user_message());
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json, serde_json::Value::String(err.to_string()));
    assert!(err.to_string().contains("-nosuch"));
}

#[test]
fn acoustic_model_options_are_recognized() {
    let mut config = Config::default();
    config.set("-mdef", "/models/en-us/mdef").unwrap();
    config.set("-featparams", "/models/en-us/feat.params").unwrap();
    config.set("-lmname", "default").unwrap();
    config.set("-allphone_ci", true).unwrap();
    config.set("-topn_beam", "0,0,0").unwrap();
    assert_eq!(config.mdef.as_deref(), Some(std::path::Path::new("/models/en-us/mdef")));
    assert_eq!(config.lmname.as_deref(), Some("default"));
    assert!(config.allphone_ci);
    assert_eq!(config.topn_beam, "0,0,0");

    let defaults = Config::default();
    assert_eq!(defaults.get("topn"), Some(ConfigValue::Int(4)));
    assert_eq!(defaults.get("ds"), Some(ConfigValue::Int(1)));
    assert_eq!(defaults.get("aw"), Some(ConfigValue::Int(1)));
    assert_eq!(defaults.get("topn_beam"), Some(ConfigValue::Str("0".into())));
    assert_eq!(defaults.tmatfloor, 1e-4);
    assert_eq!(defaults.varfloor, 1e-4);
    assert_eq!(defaults.mixwfloor, 1e-7);
    for name in ["tmat", "mean", "var", "mixw", "sendump", "allphone"] {
        assert_eq!(defaults.get(name), None, "{name} has no default file");
    }
}
