/// Consumer of `(message, percent)` progress events. Owned by the caller and
/// invoked on the thread that runs the pipeline.
pub trait ProgressSink {
    fn on_progress(&mut self, message: &str, percent: f64);
}

impl<F> ProgressSink for F
where
    F: FnMut(&str, f64),
{
    fn on_progress(&mut self, message: &str, percent: f64) {
        self(message, percent)
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _message: &str, _percent: f64) {}
}

/// Emits each event as a `tracing` info record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_progress(&mut self, message: &str, percent: f64) {
        tracing::info!(percent, "{message}");
    }
}

/// Clamps percentages to `[0, 100]` and never lets them go backwards.
pub struct MonotonicProgress<'a> {
    inner: &'a mut dyn ProgressSink,
    last: f64,
}

impl<'a> MonotonicProgress<'a> {
    pub fn new(inner: &'a mut dyn ProgressSink) -> Self {
        Self { inner, last: 0.0 }
    }
}

impl ProgressSink for MonotonicProgress<'_> {
    fn on_progress(&mut self, message: &str, percent: f64) {
        let percent = if percent.is_finite() {
            percent.clamp(self.last, 100.0)
        } else {
            self.last
        };
        self.last = percent;
        self.inner.on_progress(message, percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clamps_backwards_and_overflow() {
        let mut seen = Vec::new();
        {
            let mut record = |_: &str, p: f64| seen.push(p);
            let mut sink = MonotonicProgress::new(&mut record);
            sink.on_progress("a", 10.0);
            sink.on_progress("b", 5.0);
            sink.on_progress("c", f64::NAN);
            sink.on_progress("d", 150.0);
        }
        assert_eq!(seen, vec![10.0, 10.0, 10.0, 100.0]);
    }
}
