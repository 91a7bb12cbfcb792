//! Pipeline metrics through the `metrics` facade.
//!
//! Without an installed recorder every call is a no-op.

use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

const ITEMS_FORWARDED: &str = "spamflow_items_forwarded_total";
const ITEMS_FILTERED: &str = "spamflow_items_filtered_total";
const ITEMS_FAILED: &str = "spamflow_items_failed_total";
const BATCH_SIZE: &str = "spamflow_batch_size";
const QUOTA_IN_FLIGHT: &str = "spamflow_quota_in_flight";
const STAGE_DURATION: &str = "spamflow_stage_duration_ms";
const PIPELINE_RUNS: &str = "spamflow_pipeline_runs_total";
const PIPELINE_EMITTED: &str = "spamflow_pipeline_emitted_total";

/// Register metric descriptions with the installed recorder.
pub fn init_metrics() {
    describe_counter!(ITEMS_FORWARDED, "Items a stage sent downstream");
    describe_counter!(ITEMS_FILTERED, "Items a stage dropped as duplicates");
    describe_counter!(ITEMS_FAILED, "Items lost to collaborator failures");
    describe_histogram!(BATCH_SIZE, "Records per dispatched batch");
    describe_gauge!(QUOTA_IN_FLIGHT, "Classifier calls holding a quota token");
    describe_histogram!(STAGE_DURATION, "Wall time of a stage task in milliseconds");
    describe_counter!(PIPELINE_RUNS, "Completed pipeline runs");
    describe_counter!(PIPELINE_EMITTED, "Items emitted by completed runs");
}

pub fn record_item_forwarded(stage: &'static str) {
    counter!(ITEMS_FORWARDED, "stage" => stage).increment(1);
}

pub fn record_item_filtered(stage: &'static str) {
    counter!(ITEMS_FILTERED, "stage" => stage).increment(1);
}

pub fn record_item_failed(stage: &'static str, reason: &'static str, count: u64) {
    counter!(ITEMS_FAILED, "stage" => stage, "reason" => reason).increment(count);
}

pub fn record_batch_size(size: usize) {
    histogram!(BATCH_SIZE).record(size as f64);
}

pub fn record_quota_in_flight(in_flight: usize) {
    gauge!(QUOTA_IN_FLIGHT).set(in_flight as f64);
}

pub fn record_stage_completed(stage: &'static str, elapsed: Duration) {
    histogram!(STAGE_DURATION, "stage" => stage).record(elapsed.as_secs_f64() * 1000.0);
}

pub fn record_pipeline_run(emitted: usize, elapsed: Duration) {
    counter!(PIPELINE_RUNS).increment(1);
    counter!(PIPELINE_EMITTED).increment(emitted as u64);
    tracing::trace!(emitted, elapsed_ms = elapsed.as_millis() as u64, "pipeline metrics recorded");
}
