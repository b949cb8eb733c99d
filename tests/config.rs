use std::io::Write;

use ftcycle::{config::CoreConfig, error::ConfigError};

#[test]
fn defaults_round_trip_through_json() {
    let cfg = CoreConfig::default();
    let json = cfg.to_json_string().expect("serialize");
    let back = CoreConfig::from_json_str(&json).expect("parse");
    assert_eq!(back, cfg);
    assert_eq!(back.runtime.poll_interval_ms, 20);
    assert_eq!(back.mixer.mixing_window_ms, 100);
    assert_eq!(back.automation.max_cycles_without_reply, 6);
}

#[test]
fn partial_document_keeps_defaults() {
    let cfg = CoreConfig::from_json_str(r#"{"mixer": {"mixing_window_ms": 80}}"#).expect("parse");
    assert_eq!(cfg.mixer.mixing_window_ms, 80);
    assert_eq!(cfg.mixer.playback_lead_ms, 50);
    assert_eq!(cfg.runtime, CoreConfig::default().runtime);
    assert!(cfg.automation.auto_resume_cq_after_success);
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(
        file,
        r#"{{"runtime": {{"reject_cycle_collisions": false}}, "automation": {{"auto_resume_cq_after_fail": true}}}}"#
    )
    .expect("write");

    let cfg = CoreConfig::load(file.path()).expect("load");
    assert!(!cfg.runtime.reject_cycle_collisions);
    assert!(cfg.automation.auto_resume_cq_after_fail);
}

#[test]
fn out_of_range_values_are_rejected() {
    let err = CoreConfig::from_json_str(r#"{"mixer": {"normalize_peak": 1.5}}"#).expect_err("invalid");
    assert!(matches!(err, ConfigError::Invalid { field: "mixer.normalize_peak", .. }));

    let err = CoreConfig::from_json_str(r#"{"runtime": {"poll_interval_ms": 0}}"#).expect_err("invalid");
    assert!(matches!(err, ConfigError::Invalid { .. }));

    let err = CoreConfig::from_json_str("{not json").expect_err("malformed");
    assert!(matches!(err, ConfigError::Json(_)));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = CoreConfig::load(dir.path().join("absent.json")).expect_err("missing");
    assert!(matches!(err, ConfigError::Io(_)));
}
