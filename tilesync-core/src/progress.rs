//! Progress reporting for long-running operations.
//!
//! Components receive a [`ProgressReporter`] instead of writing to a global
//! sink, so callers decide whether progress goes to the log, a terminal or
//! nowhere.

/// Receiver for progress updates.
///
/// Implementations must be `Send + Sync` so a reporter can be shared with
/// worker threads.
pub trait ProgressReporter: Send + Sync {
    /// Report completion of `fraction` (`0.0..=1.0`) of the current task.
    fn report_progress(&self, fraction: f64, message: &str);

    /// Report a free-form status message.
    fn report_message(&self, message: &str);
}

/// Fraction of a task done after `done` of `total` steps.
///
/// An empty task counts as finished.
#[must_use]
#[expect(
    clippy::cast_precision_loss,
    clippy::float_arithmetic,
    reason = "step counts stay far below 2^52 and only feed progress display"
)]
pub fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    done as f64 / total as f64
}

/// Reporter forwarding updates to the `log` facade at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    #[expect(clippy::float_arithmetic, reason = "scaling a fraction to a percentage")]
    fn report_progress(&self, fraction: f64, message: &str) {
        log::info!("{:5.1}% {message}", fraction.clamp(0.0, 1.0) * 100.0);
    }

    fn report_message(&self, message: &str) {
        log::info!("{message}");
    }
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report_progress(&self, _fraction: f64, _message: &str) {}

    fn report_message(&self, _message: &str) {}
}
