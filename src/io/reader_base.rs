//! State shared by all four sequential format readers: the spectrum cache,
//! the scan-number index, min/max tracking, and progress/abort bookkeeping.
//! Held as a field by composition rather than inherited, per spec.md §9 and
//! the way `mzdata`'s format readers each hold their own `OffsetIndex`/
//! `FileDescription` fields side by side instead of sharing a base class.

use std::collections::HashMap;

use crate::progress::{Logger, NullObserver, ProgressSink};
use crate::spectrum::Spectrum;

pub struct SequentialReaderState {
    pub cached_spectra: Vec<Spectrum>,
    pub scan_number_to_index: HashMap<i32, usize>,
    pub scan_number_min: Option<i32>,
    pub scan_number_max: Option<i32>,

    pub auto_shrink_data_lists: bool,
    pub parse_files_with_unknown_version: bool,

    pub eof_flag: bool,
    pub last_error: Option<String>,

    progress_sink: Box<dyn ProgressSink>,
    logger: Box<dyn Logger>,
    aborted: bool,
}

impl Default for SequentialReaderState {
    fn default() -> Self {
        SequentialReaderState {
            cached_spectra: Vec::new(),
            scan_number_to_index: HashMap::new(),
            scan_number_min: None,
            scan_number_max: None,
            auto_shrink_data_lists: true,
            parse_files_with_unknown_version: true,
            eof_flag: false,
            last_error: None,
            progress_sink: Box::new(NullObserver),
            logger: Box::new(NullObserver),
            aborted: false,
        }
    }
}

impl SequentialReaderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_progress_sink(&mut self, sink: Box<dyn ProgressSink>) {
        self.progress_sink = sink;
    }

    pub fn set_logger(&mut self, logger: Box<dyn Logger>) {
        self.logger = logger;
    }

    pub fn progress_sink(&mut self) -> &mut dyn ProgressSink {
        self.progress_sink.as_mut()
    }

    pub fn log_line(&mut self, line: &str) {
        self.logger.log_line(line);
    }

    pub fn abort_processing_now(&mut self) {
        self.aborted = true;
    }

    pub fn aborted(&self) -> bool {
        self.aborted || self.progress_sink.aborted()
    }

    /// Record a freshly-parsed spectrum into the cache, updating the index
    /// and min/max scan-number tracking, per §4.4's `read_and_cache_entire_file`.
    pub fn push_cached(&mut self, spectrum: Spectrum) {
        let scan_number = spectrum.scan_number;
        let index = self.cached_spectra.len();
        self.cached_spectra.push(spectrum);
        self.scan_number_to_index.insert(scan_number, index);
        self.scan_number_min = Some(self.scan_number_min.map_or(scan_number, |m| m.min(scan_number)));
        self.scan_number_max = Some(self.scan_number_max.map_or(scan_number, |m| m.max(scan_number)));
    }

    pub fn get_by_index(&self, index: usize, out: &mut Spectrum) -> bool {
        match self.cached_spectra.get(index) {
            Some(s) => {
                *out = s.clone();
                true
            }
            None => false,
        }
    }

    pub fn get_by_scan_number(&self, scan_number: i32, out: &mut Spectrum) -> bool {
        match self.scan_number_to_index.get(&scan_number) {
            Some(&index) => self.get_by_index(index, out),
            None => false,
        }
    }

    pub fn scan_number_list(&self) -> Vec<i32> {
        self.cached_spectra.iter().map(|s| s.scan_number).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_cached_tracks_index_and_min_max() {
        let mut state = SequentialReaderState::new();
        let mut a = Spectrum::new();
        a.scan_number = 5;
        let mut b = Spectrum::new();
        b.scan_number = 2;
        state.push_cached(a);
        state.push_cached(b);

        assert_eq!(state.scan_number_min, Some(2));
        assert_eq!(state.scan_number_max, Some(5));

        let mut out = Spectrum::new();
        assert!(state.get_by_scan_number(2, &mut out));
        assert_eq!(out.scan_number, 2);
        assert!(!state.get_by_scan_number(99, &mut out));
    }
}
