//! Observability for the detector
//!
//! Provides:
//! - Prometheus metrics (inference latency, prediction and label counts,
//!   request errors, loaded generation)
//! - Structured event logging with tracing

use crate::serving::LeakAssessment;
use crate::training::TrainingSummary;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, GaugeVec, Histogram, IntCounter,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

static GLOBAL_METRICS: OnceLock<DetectorMetricsInner> = OnceLock::new();

struct DetectorMetricsInner {
    inference_latency_seconds: Histogram,
    predictions: IntCounter,
    leak_labels: IntCounter,
    above_safe: IntCounter,
    shape_errors: IntCounter,
    inference_errors: IntCounter,
    generation_info: GaugeVec,
}

impl DetectorMetricsInner {
    fn new() -> Self {
        Self {
            inference_latency_seconds: register_histogram!(
                "leak_detector_inference_latency_seconds",
                "Time spent scaling and classifying one window",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register inference_latency_seconds"),

            predictions: register_int_counter!(
                "leak_detector_predictions_total",
                "Windows evaluated successfully"
            )
            .expect("Failed to register predictions_total"),

            leak_labels: register_int_counter!(
                "leak_detector_leak_labels_total",
                "Windows the classifier labelled as leak"
            )
            .expect("Failed to register leak_labels_total"),

            above_safe: register_int_counter!(
                "leak_detector_above_safe_threshold_total",
                "Windows whose raw gas mean reached the safety threshold"
            )
            .expect("Failed to register above_safe_threshold_total"),

            shape_errors: register_int_counter!(
                "leak_detector_shape_errors_total",
                "Requests rejected for a wrong window shape"
            )
            .expect("Failed to register shape_errors_total"),

            inference_errors: register_int_counter!(
                "leak_detector_inference_errors_total",
                "Requests that failed inside the classifier"
            )
            .expect("Failed to register inference_errors_total"),

            generation_info: register_gauge_vec!(
                "leak_detector_generation_info",
                "Model generation being served",
                &["generation", "classifier", "label_policy", "thresholds"]
            )
            .expect("Failed to register generation_info"),
        }
    }
}

/// Cheap handle to the process-wide metrics; clones share the same series
#[derive(Clone)]
pub struct DetectorMetrics {
    _private: (),
}

impl Default for DetectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DetectorMetricsInner {
        GLOBAL_METRICS.get_or_init(DetectorMetricsInner::new)
    }

    pub fn observe_inference_latency(&self, duration_secs: f64) {
        self.inner().inference_latency_seconds.observe(duration_secs);
    }

    /// Count a successful assessment and its two signals
    pub fn record_assessment(&self, assessment: &LeakAssessment) {
        let inner = self.inner();
        inner.predictions.inc();
        if assessment.label == 1 {
            inner.leak_labels.inc();
        }
        if assessment.above_safe == Some(true) {
            inner.above_safe.inc();
        }
    }

    pub fn inc_shape_errors(&self) {
        self.inner().shape_errors.inc();
    }

    pub fn inc_inference_errors(&self) {
        self.inner().inference_errors.inc();
    }

    pub fn set_generation(
        &self,
        generation: &str,
        classifier: &str,
        label_policy: &str,
        thresholds: &str,
    ) {
        let gauge = &self.inner().generation_info;
        gauge.reset();
        gauge
            .with_label_values(&[generation, classifier, label_policy, thresholds])
            .set(1.0);
    }

    pub fn predictions_total(&self) -> u64 {
        self.inner().predictions.get()
    }
}

/// Event-style structured logs for the detector
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, generation: &str, listen_addr: &str) {
        info!(
            event = "detector_started",
            instance = %self.instance,
            detector_version = %version,
            generation = %generation,
            listen_addr = %listen_addr,
            "Leak detector started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "detector_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Leak detector shutting down"
        );
    }

    pub fn log_generation_loaded(
        &self,
        generation: &str,
        seq_len: usize,
        features: &[String],
        label_policy: &str,
        classifier: &str,
    ) {
        info!(
            event = "generation_loaded",
            instance = %self.instance,
            generation = %generation,
            seq_len = seq_len,
            features = ?features,
            label_policy = %label_policy,
            classifier = %classifier,
            "Model generation ready for serving"
        );
    }

    /// Serving with built-in thresholds because the file was missing
    pub fn log_threshold_fallback(&self, generation: &str, decision_threshold: f64) {
        warn!(
            event = "threshold_fallback",
            instance = %self.instance,
            generation = %generation,
            decision_threshold = decision_threshold,
            "Thresholds file missing, serving with default decision threshold and no safety threshold"
        );
    }

    pub fn log_prediction(&self, generation: &str, assessment: &LeakAssessment, latency_ms: f64) {
        info!(
            event = "window_assessed",
            instance = %self.instance,
            generation = %generation,
            prob_leak = assessment.prob_leak,
            label = assessment.label,
            gas_mean = assessment.raw_mean,
            gas_max = assessment.raw_max,
            above_safe_threshold = ?assessment.above_safe,
            latency_ms = latency_ms,
            "Window assessed"
        );
    }

    pub fn log_shape_rejected(&self, generation: &str, error: &str) {
        warn!(
            event = "window_rejected",
            instance = %self.instance,
            generation = %generation,
            error = %error,
            "Window rejected"
        );
    }

    pub fn log_training_summary(&self, generation: &str, summary: &TrainingSummary) {
        info!(
            event = "training_completed",
            instance = %self.instance,
            generation = %generation,
            rows = summary.dataset_rows,
            windows = summary.windows,
            train_windows = summary.split.train.windows,
            validation_windows = summary.split.validation.windows,
            test_windows = summary.split.test.windows,
            decision_threshold = summary.decision_threshold,
            validation_f1 = summary.validation_f1,
            safe_value_threshold = ?summary.safe_value_threshold,
            test_leak_f1 = ?summary.test_report.as_ref().map(|r| r.leak.f1),
            duration_ms = summary.duration_ms,
            "Training run completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessment(label: u8, above_safe: Option<bool>) -> LeakAssessment {
        LeakAssessment {
            prob_leak: if label == 1 { 0.8 } else { 0.2 },
            decision_threshold: 0.5,
            label,
            raw_mean: 300.0,
            raw_max: 420.0,
            safe_value_threshold: above_safe.map(|_| 250.0),
            above_safe,
        }
    }

    #[test]
    fn test_metrics_record_assessments() {
        // Global registry: other tests may record too, so compare deltas
        let metrics = DetectorMetrics::new();
        let before = metrics.predictions_total();
        metrics.record_assessment(&assessment(1, Some(true)));
        metrics.record_assessment(&assessment(0, None));
        assert!(metrics.predictions_total() >= before + 2);

        metrics.observe_inference_latency(0.002);
        metrics.inc_shape_errors();
        metrics.inc_inference_errors();
        metrics.set_generation("20240101T000000Z", "logistic", "last", "loaded");
    }

    #[test]
    fn test_structured_logger() {
        let logger = StructuredLogger::new("kitchen");
        assert_eq!(logger.instance(), "kitchen");
        logger.log_prediction("g1", &assessment(1, Some(true)), 1.5);
        logger.log_threshold_fallback("g1", 0.5);
    }
}
