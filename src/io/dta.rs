//! Concatenated-DTA text reader (§4.5): each spectrum starts with `=====`
//! (five or more equals signs) followed by a header line
//! `<Base>.<StartScan>.<EndScan>.<Charge>.dta   <ParentMH>`; subsequent
//! non-blank lines are `<m/z> <intensity>` pairs until the next separator
//! or EOF. Files without `===` separators fall back to blank-line
//! separation.
//!
//! Grounded in shape on `mzdata::io::mgf::MGFReaderType`'s state-machine
//! parser (a `Start/Header/Peaks/Between` cycle driven by a `BufReader`),
//! adapted to DTA's simpler single-header-line grammar.

use std::path::Path;

use log::warn;

use crate::error::{Error, Result};
use crate::io::bidi_reader::{BidiByteReader, Direction};
use crate::io::reader_base::SequentialReaderState;
use crate::io::traits::SpectrumSource;
use crate::progress::{Logger, ProgressSink, ProgressTracker};
use crate::spectrum::Spectrum;

const SEPARATOR_MIN_EQUALS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    BeforeHeader,
    InPeaks,
}

pub struct DtaReader {
    reader: BidiByteReader,
    state: SequentialReaderState,
    parser_state: ParserState,
    next_spectrum_id: i32,
}

impl DtaReader {
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BidiByteReader::open(path)?;
        Ok(DtaReader {
            reader,
            state: SequentialReaderState::new(),
            parser_state: ParserState::BeforeHeader,
            next_spectrum_id: 0,
        })
    }

    pub fn open_text_stream(text: &str) -> Result<Self> {
        let reader = BidiByteReader::open_text_stream(text)?;
        Ok(DtaReader {
            reader,
            state: SequentialReaderState::new(),
            parser_state: ParserState::BeforeHeader,
            next_spectrum_id: 0,
        })
    }

    /// Parses `<Base>.<Start>.<End>.<Charge>.dta   <ParentMH>`. Returns
    /// `(start_scan, end_scan, charge, parent_mh)` or `None` if the line
    /// doesn't match the grammar.
    fn parse_header_line(line: &str) -> Option<(i32, i32, i32, Option<f64>)> {
        let mut parts = line.split_whitespace();
        let dotted = parts.next()?;
        let parent_mh = parts.next().and_then(|s| s.parse::<f64>().ok());

        let dotted = dotted.strip_suffix(".dta").unwrap_or(dotted);
        let fields: Vec<&str> = dotted.split('.').collect();
        if fields.len() < 4 {
            return None;
        }
        let n = fields.len();
        let charge: i32 = fields[n - 1].parse().ok()?;
        let end_scan: i32 = fields[n - 2].parse().ok()?;
        let start_scan: i32 = fields[n - 3].parse().ok()?;
        Some((start_scan, end_scan, charge, parent_mh))
    }

    fn is_separator(line: &str) -> bool {
        let trimmed = line.trim_end();
        trimmed.len() >= SEPARATOR_MIN_EQUALS && trimmed.chars().all(|c| c == '=')
    }

    fn parse_peak_line(line: &str) -> Option<(f64, f32)> {
        let mut parts = line.split_whitespace();
        let mz: f64 = parts.next()?.parse().ok()?;
        let intensity: f32 = parts.next()?.parse().ok()?;
        Some((mz, intensity))
    }

    fn build_next(&mut self) -> Result<Option<Spectrum>> {
        let mut spectrum: Option<Spectrum> = None;
        let mut saw_any_separator_ever = false;

        loop {
            if !self.reader.read_line(Direction::Forward)? {
                break;
            }
            let line = self.reader.current_line.clone();

            if Self::is_separator(&line) {
                saw_any_separator_ever = true;
                if spectrum.is_some() {
                    // next header line belongs to the following spectrum;
                    // push it back by breaking and letting the caller re-enter.
                    self.parser_state = ParserState::BeforeHeader;
                    return Ok(spectrum);
                }
                self.parser_state = ParserState::BeforeHeader;
                continue;
            }

            if line.trim().is_empty() {
                if spectrum.is_some() && !saw_any_separator_ever {
                    self.parser_state = ParserState::BeforeHeader;
                    return Ok(spectrum);
                }
                continue;
            }

            match self.parser_state {
                ParserState::BeforeHeader => {
                    match Self::parse_header_line(&line) {
                        Some((start_scan, end_scan, charge, parent_mh)) => {
                            let mut s = Spectrum::new();
                            s.ms_level = 2;
                            s.scan_number = start_scan;
                            s.scan_number_end = end_scan;
                            s.spectrum_id = self.next_spectrum_id;
                            self.next_spectrum_id += 1;
                            s.parent_ion_charge = Some(charge);
                            s.parent_ion_mh = parent_mh;
                            spectrum = Some(s);
                            self.parser_state = ParserState::InPeaks;
                        }
                        None => {
                            warn!("skipping unparsable DTA header line: {:?}", line);
                        }
                    }
                }
                ParserState::InPeaks => {
                    if let Some(s) = spectrum.as_mut() {
                        match Self::parse_peak_line(&line) {
                            Some((mz, intensity)) => {
                                s.mz_list.push(mz);
                                s.intensity_list.push(intensity);
                            }
                            None => {
                                warn!("skipping unparsable DTA peak line: {:?}", line);
                            }
                        }
                    }
                }
            }
        }

        if let Some(mut s) = spectrum.take() {
            if self.state.auto_shrink_data_lists {
                let n = s.mz_list.len();
                s.shrink_to_peaks_count(n);
            }
            return Ok(Some(s));
        }
        Ok(None)
    }
}

impl SpectrumSource for DtaReader {
    fn read_next_spectrum(&mut self, out: &mut Spectrum) -> Result<bool> {
        if self.state.aborted() {
            return Err(Error::Aborted);
        }
        match self.build_next()? {
            Some(s) => {
                *out = s;
                Ok(true)
            }
            None => {
                self.state.eof_flag = true;
                Ok(false)
            }
        }
    }

    fn read_and_cache_entire_file(&mut self) -> Result<()> {
        let total_bytes = self.reader.file_length_bytes();
        self.state.progress_sink().set_task("parsing");
        let mut tracker = ProgressTracker::new(total_bytes);
        loop {
            let mut s = Spectrum::new();
            if !self.read_next_spectrum(&mut s)? {
                break;
            }
            self.state.push_cached(s);
            let position = self.reader.current_line_byte_offset_end.min(total_bytes);
            if tracker.advance(self.state.progress_sink(), position, 1) {
                return Err(Error::Aborted);
            }
        }
        Ok(())
    }

    fn get_spectrum_by_index(&self, index: usize, out: &mut Spectrum) -> bool {
        self.state.get_by_index(index, out)
    }

    fn get_spectrum_by_scan_number(&self, scan_number: i32, out: &mut Spectrum) -> bool {
        self.state.get_by_scan_number(scan_number, out)
    }

    fn get_scan_number_list(&self) -> Vec<i32> {
        self.state.scan_number_list()
    }

    fn scan_count(&self) -> usize {
        self.state.cached_spectra.len()
    }

    fn cached_spectrum_count(&self) -> usize {
        self.state.cached_spectra.len()
    }

    fn cached_spectra_scan_number_min(&self) -> Option<i32> {
        self.state.scan_number_min
    }

    fn cached_spectra_scan_number_max(&self) -> Option<i32> {
        self.state.scan_number_max
    }

    fn set_auto_shrink_data_lists(&mut self, value: bool) {
        self.state.auto_shrink_data_lists = value;
    }

    fn set_parse_files_with_unknown_version(&mut self, value: bool) {
        self.state.parse_files_with_unknown_version = value;
    }

    fn set_progress_sink(&mut self, sink: Box<dyn ProgressSink>) {
        self.state.set_progress_sink(sink);
    }

    fn set_logger(&mut self, logger: Box<dyn Logger>) {
        self.state.set_logger(logger);
    }

    fn abort_processing_now(&mut self) {
        self.state.abort_processing_now();
    }

    fn close_file(&mut self) {
        self.reader.close();
    }
}
