//! Telemetry module tests.

use std::path::PathBuf;
use std::time::Duration;

use tracing::Span;
use uuid::Uuid;

use spamflow::telemetry::{
    init_logging, init_metrics, record_batch_size, record_item_failed, record_item_filtered,
    record_item_forwarded, record_pipeline_run, record_quota_in_flight, record_stage_completed,
    LogConfig, LogError, LogFormat, PipelineSpan, SpanExt, StageSpan,
};

// =============================================================================
// LogConfig Tests
// =============================================================================

#[test]
fn log_config_default_is_json() {
    let config = LogConfig::default();
    assert_eq!(config.format, LogFormat::Json);
    assert_eq!(config.level, "info");
    assert!(config.output_path.is_none());
}

#[test]
fn log_format_parse_rejects_unknown() {
    assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
    assert_eq!(LogFormat::parse("yaml"), None);
}

// =============================================================================
// LogError Tests
// =============================================================================

#[test]
fn log_error_invalid_filter_display() {
    let error = LogError::InvalidFilter("bad filter".to_string());
    assert!(error.to_string().contains("Invalid log filter"));
    assert!(error.to_string().contains("bad filter"));
}

#[test]
fn log_error_already_initialized_display() {
    let error = LogError::AlreadyInitialized;
    assert!(error.to_string().contains("already initialized"));
}

#[test]
fn init_logging_reports_unwritable_path() {
    let config = LogConfig {
        format: LogFormat::Json,
        level: "info".to_string(),
        output_path: Some(PathBuf::from("/nonexistent-dir/spamflow/run.log")),
    };
    let err = init_logging(&config).unwrap_err();
    assert!(matches!(err, LogError::FileOpen(_)));
}

// The global subscriber can only be installed once per process, so both
// the first install and the rejected second one live in this test.
#[test]
fn init_logging_writes_json_to_file_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spamflow.log");
    let config = LogConfig {
        format: LogFormat::Json,
        level: "info".to_string(),
        output_path: Some(path.clone()),
    };

    init_logging(&config).unwrap();
    tracing::info!(stage = "dedup", "hello from the test");

    let second = init_logging(&LogConfig::default()).unwrap_err();
    assert!(matches!(second, LogError::AlreadyInitialized));

    let written = std::fs::read_to_string(&path).unwrap();
    let line = written.lines().next().unwrap();
    let json: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(json["fields"]["message"], "hello from the test");
    assert_eq!(json["fields"]["stage"], "dedup");
}

// =============================================================================
// Span Tests
// =============================================================================

#[test]
fn span_ext_record_result_ok_and_err() {
    let span = Span::none();
    span.record_result(&Ok::<u32, &str>(1));
    span.record_result(&Err::<u32, &str>("boom"));
}

#[test]
fn pipeline_and_stage_spans_nest() {
    let run_id = Uuid::new_v4();
    let run = PipelineSpan::new(&run_id, 4);
    let _run_guard = run.enter();
    let stage = StageSpan::new(&run_id, "collect");
    let _stage_guard = stage.enter();
    run.record_result(&Err::<(), &str>("stage failed"));
}

// =============================================================================
// Metrics Tests
// =============================================================================

#[test]
fn metrics_init_no_panic() {
    // Multiple calls should not panic
    init_metrics();
    init_metrics();
}

#[test]
fn metrics_record_without_recorder() {
    record_item_forwarded("dedup");
    record_item_filtered("dedup");
    record_item_failed("batch", "backend", 2);
    record_batch_size(2);
    record_quota_in_flight(3);
    record_quota_in_flight(0);
    record_stage_completed("classify", Duration::from_millis(12));
    record_pipeline_run(0, Duration::ZERO);
}
