//! Injected collaborators a reader reports to, mirroring the interfaces
//! spec.md keeps out of scope: a UI/logging consumer supplies these, the
//! readers only ever call them.

/// Progress and cooperative-cancellation sink. Readers call `set_task` once
/// per logical phase (e.g. "indexing", "parsing"), `set_percent` at fixed
/// increments (every ~0.5% of source bytes or every 100 spectra, whichever
/// is finer, per the concurrency model), and poll `aborted()` between those
/// calls.
pub trait ProgressSink {
    fn set_task(&mut self, name: &str);
    fn set_percent(&mut self, percent: f32);
    fn aborted(&self) -> bool {
        false
    }
}

/// A single append-only line sink. Distinct from the `log` crate's facade:
/// `log` is for library-internal diagnostics a consuming binary routes
/// wherever it likes, `Logger` is the spec's explicit per-run user log.
pub trait Logger {
    fn log_line(&mut self, line: &str);
}

/// A `ProgressSink`/`Logger` pair that does nothing, for callers who do not
/// care to observe progress or capture a log. This is the default collaborator
/// every reader is constructed with; call `set_progress_sink`/`set_logger` to
/// replace either half.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl ProgressSink for NullObserver {
    fn set_task(&mut self, _name: &str) {}
    fn set_percent(&mut self, _percent: f32) {}
}

impl Logger for NullObserver {
    fn log_line(&mut self, _line: &str) {}
}

/// Progress reported every `byte_stride` bytes consumed or `spectrum_stride`
/// spectra parsed, whichever comes first — the "every ~0.5% of file or every
/// 100 spectra" rule from the concurrency model. Every reader/accessor's
/// `read_and_cache_entire_file`/indexing pass routes through one of these
/// instead of re-deriving the stride arithmetic inline. Holds no reference to
/// the sink itself (callers pass it to `advance` each time) so a tracker can
/// live across a loop that also needs other `&mut self` access between calls.
pub struct ProgressTracker {
    total_bytes: u64,
    last_reported_bytes: u64,
    spectra_since_report: u64,
    byte_stride: u64,
    spectrum_stride: u64,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        let byte_stride = ((total_bytes as f64) * 0.005).max(1.0) as u64;
        ProgressTracker {
            total_bytes,
            last_reported_bytes: 0,
            spectra_since_report: 0,
            byte_stride,
            spectrum_stride: 100,
        }
    }

    /// Record that the reader has reached `bytes_position` in the stream and
    /// completed `spectra_done_delta` more spectra since the last call.
    /// Reports to `sink` once the finer of the two strides is crossed.
    /// Returns `true` if the sink says processing should abort.
    pub fn advance(&mut self, sink: &mut dyn ProgressSink, bytes_position: u64, spectra_done_delta: u64) -> bool {
        self.spectra_since_report += spectra_done_delta;
        let bytes_since_report = bytes_position.saturating_sub(self.last_reported_bytes);

        if bytes_since_report >= self.byte_stride || self.spectra_since_report >= self.spectrum_stride {
            self.last_reported_bytes = bytes_position;
            self.spectra_since_report = 0;
            let pct = if self.total_bytes > 0 {
                (bytes_position as f32 / self.total_bytes as f32).min(1.0) * 100.0
            } else {
                0.0
            };
            sink.set_percent(pct);
        }
        sink.aborted()
    }
}
