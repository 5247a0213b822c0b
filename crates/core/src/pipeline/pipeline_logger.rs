use std::collections::HashMap;
use std::time::Instant;

/// Cross-cutting observer for pipeline events.
///
/// Decouples the pipeline from specific output mechanisms (log crate,
/// operator UI, test doubles).
pub trait PipelineLogger: Send {
    /// Report that another frame was submitted for inference.
    fn progress(&mut self, frames_submitted: u64);

    /// Record how long a named stage took for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. score, dropped frames).
    fn metric(&mut self, name: &str, value: f64);

    /// Log a human-readable status message.
    fn info(&mut self, message: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger that discards all events.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _frames_submitted: u64) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Running count, sum and maximum of one recorded series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Aggregate {
    pub count: u64,
    pub sum: f64,
    pub max: f64,
}

impl Aggregate {
    fn record(&mut self, value: f64) {
        if self.count == 0 || value > self.max {
            self.max = value;
        }
        self.count += 1;
        self.sum += value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Logger that aggregates per-stage timings and metrics and reports a
/// summary through the `log` crate when the pipeline shuts down.
///
/// Memory stays constant however long the stream runs: only one
/// [`Aggregate`] is kept per stage or metric name.
/// Progress lines are throttled to every `throttle_frames` frames.
pub struct LogPipelineLogger {
    throttle_frames: u64,
    timings: HashMap<String, Aggregate>,
    metrics: HashMap<String, Aggregate>,
    start_time: Instant,
    frames_submitted: u64,
}

impl LogPipelineLogger {
    pub fn new(throttle_frames: u64) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            frames_submitted: 0,
        }
    }

    /// Returns the formatted summary string, or `None` if no data recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let frames = self.frames_submitted;
        let mut lines = Vec::new();

        lines.push(format!(
            "Pipeline summary ({frames} frames inferred, {:.1}s total):",
            elapsed_ms / 1000.0
        ));

        let mut stages: Vec<_> = self.timings.iter().collect();
        stages.sort_by(|a, b| a.0.cmp(b.0));
        for (stage, agg) in stages {
            lines.push(format!(
                "  {stage:12}: avg {:6.1}ms  max {:6.1}ms  ({} samples)",
                agg.mean(),
                agg.max,
                agg.count
            ));
        }

        let mut metrics: Vec<_> = self.metrics.iter().collect();
        metrics.sort_by(|a, b| a.0.cmp(b.0));
        for (name, agg) in metrics {
            lines.push(format!("  {name}: avg {:.2}", agg.mean()));
        }

        if frames > 0 && elapsed_ms > 0.0 {
            let fps = frames as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Inference rate: {fps:.1} fps"));
        }

        Some(lines.join("\n"))
    }

    pub fn timing_for(&self, stage: &str) -> Option<Aggregate> {
        self.timings.get(stage).copied()
    }

    pub fn metric_for(&self, name: &str) -> Option<Aggregate> {
        self.metrics.get(name).copied()
    }
}

impl Default for LogPipelineLogger {
    fn default() -> Self {
        Self::new(30)
    }
}

impl PipelineLogger for LogPipelineLogger {
    fn progress(&mut self, frames_submitted: u64) {
        self.frames_submitted = frames_submitted;
        if frames_submitted % self.throttle_frames == 0 {
            log::info!("Inferred {frames_submitted} frames");
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        if let Some(agg) = self.timings.get_mut(stage) {
            agg.record(duration_ms);
        } else {
            let mut agg = Aggregate::default();
            agg.record(duration_ms);
            self.timings.insert(stage.to_string(), agg);
        }
    }

    fn metric(&mut self, name: &str, value: f64) {
        if let Some(agg) = self.metrics.get_mut(name) {
            agg.record(value);
        } else {
            let mut agg = Aggregate::default();
            agg.record(value);
            self.metrics.insert(name.to_string(), agg);
        }
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_null_logger_all_methods_are_noop() {
        let mut logger = NullPipelineLogger;
        logger.progress(1);
        logger.timing("inference", 5.0);
        logger.metric("score", 0.3);
        logger.info("hello");
        logger.summary();
    }

    #[test]
    fn test_timing_aggregates_values() {
        let mut logger = LogPipelineLogger::new(10);
        logger.timing("inference", 20.0);
        logger.timing("inference", 30.0);
        logger.timing("preprocess", 5.0);

        let inference = logger.timing_for("inference").unwrap();
        assert_eq!(inference.count, 2);
        assert_relative_eq!(inference.mean(), 25.0);
        assert_relative_eq!(inference.max, 30.0);
        assert_eq!(logger.timing_for("preprocess").unwrap().count, 1);
        assert!(logger.timing_for("dispatch").is_none());
    }

    #[test]
    fn test_metric_aggregates_values() {
        let mut logger = LogPipelineLogger::new(10);
        logger.metric("score", 0.25);
        logger.metric("score", 0.75);

        let score = logger.metric_for("score").unwrap();
        assert_relative_eq!(score.mean(), 0.5);
        assert_relative_eq!(score.max, 0.75);
    }

    #[test]
    fn test_negative_values_track_true_max() {
        let mut agg = Aggregate::default();
        agg.record(-3.0);
        agg.record(-1.0);
        assert_relative_eq!(agg.max, -1.0);
    }

    #[test]
    fn test_hour_long_stream_keeps_constant_state() {
        let mut logger = LogPipelineLogger::new(1_000);
        let frames = 60 * 60 * 30u64;
        for i in 1..=frames {
            logger.timing("preprocess", 1.0);
            logger.timing("inference", 20.0 + (i % 10) as f64);
            logger.metric("browInnerUp_score", 0.5);
            logger.progress(i);
        }

        assert_eq!(logger.timings.len(), 2);
        assert_eq!(logger.metrics.len(), 1);
        assert_eq!(logger.timing_for("inference").unwrap().count, frames);
        assert_relative_eq!(logger.timing_for("inference").unwrap().max, 29.0);
    }

    #[test]
    fn test_summary_includes_timing_and_metrics() {
        let mut logger = LogPipelineLogger::new(10);
        logger.progress(12);
        logger.timing("inference", 20.0);
        logger.timing("inference", 40.0);
        logger.metric("score", 0.5);

        let summary = logger.summary_string().unwrap();
        assert!(summary.contains("Pipeline summary (12 frames"));
        assert!(summary.contains("inference"));
        assert!(summary.contains("max   40.0ms"));
        assert!(summary.contains("score: avg 0.50"));
        assert!(summary.contains("fps"));
    }

    #[test]
    fn test_empty_summary_returns_none() {
        let logger = LogPipelineLogger::new(10);
        assert!(logger.summary_string().is_none());
    }

    #[test]
    fn test_progress_tracks_latest_count() {
        let mut logger = LogPipelineLogger::new(10);
        for i in 1..=25 {
            logger.progress(i);
        }
        assert_eq!(logger.frames_submitted, 25);
    }

    #[test]
    fn test_zero_throttle_is_clamped() {
        let logger = LogPipelineLogger::new(0);
        assert_eq!(logger.throttle_frames, 1);
    }
}
