//! MGF reader (§4.6): `BEGIN IONS`/`END IONS` blocks, a handful of recognized
//! header keys, and `mz intensity [charge]` peak lines.
//!
//! Grounded on `mzdata::io::mgf`'s `MGFParserState` state machine
//! (`Start/FileHeader/ScanHeaders/Peaks/Between/Done/Error`) and its
//! `parse_peak_from_line_flex`/`handle_scan_header_flex` helpers, which use
//! a `lazy_static` whitespace/tab regex to split peak lines and
//! `line.split_once('=')` to split header `KEY=value` lines. This reader
//! targets this crate's plain `Spectrum` record rather than `mzdata`'s
//! CV-parameterized one, so the header keys map directly onto scalar
//! fields instead of building up a `ParamList`.

use std::path::Path;
use std::sync::OnceLock;

use log::warn;
use regex::Regex;

use crate::error::{Error, Result};
use crate::io::bidi_reader::{BidiByteReader, Direction};
use crate::io::reader_base::SequentialReaderState;
use crate::io::traits::SpectrumSource;
use crate::progress::{Logger, ProgressSink, ProgressTracker};
use crate::spectrum::{Polarity, Spectrum};

fn peak_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\t|\s+").unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Between,
    ScanHeaders,
    Peaks,
}

pub struct MgfReader {
    reader: BidiByteReader,
    state: SequentialReaderState,
    parser_state: ParserState,
    next_spectrum_id: i32,
}

impl MgfReader {
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BidiByteReader::open(path)?;
        Ok(MgfReader {
            reader,
            state: SequentialReaderState::new(),
            parser_state: ParserState::Between,
            next_spectrum_id: 0,
        })
    }

    pub fn open_text_stream(text: &str) -> Result<Self> {
        let reader = BidiByteReader::open_text_stream(text)?;
        Ok(MgfReader {
            reader,
            state: SequentialReaderState::new(),
            parser_state: ParserState::Between,
            next_spectrum_id: 0,
        })
    }

    fn handle_header_line(spectrum: &mut Spectrum, line: &str) {
        let Some((key, value)) = line.split_once('=') else {
            warn!("skipping unrecognized MGF header line: {:?}", line);
            return;
        };
        let value = value.trim();
        match key.trim().to_uppercase().as_str() {
            "TITLE" => {}
            "PEPMASS" => {
                let mut parts = value.split_whitespace();
                if let Some(mz) = parts.next().and_then(|s| s.parse::<f64>().ok()) {
                    spectrum.parent_ion_mz = Some(mz);
                }
                // an optional second column is the precursor intensity; this
                // crate's common record has no slot for it, so it is dropped,
                // same as mzdata's flexible PEPMASS handling when no target
                // field exists for it.
            }
            "CHARGE" => {
                spectrum.parent_ion_charge = parse_charge(value);
            }
            "RTINSECONDS" => {
                if let Ok(seconds) = value.parse::<f64>() {
                    spectrum.retention_time_minutes = Some(seconds / 60.0);
                }
            }
            "SCANS" => {
                if let Ok(n) = value.parse::<i32>() {
                    spectrum.scan_number = n;
                    spectrum.scan_number_end = n;
                }
            }
            _ => {}
        }
    }

    fn parse_peak_line(line: &str) -> Option<(f64, f32, Option<i32>)> {
        let mut cols = peak_separator().split(line.trim());
        let mz: f64 = cols.next()?.parse().ok()?;
        let intensity: f32 = cols.next()?.parse().ok()?;
        let charge = cols.next().and_then(parse_charge);
        Some((mz, intensity, charge))
    }

    fn build_next(&mut self) -> Result<Option<Spectrum>> {
        loop {
            if !self.reader.read_line(Direction::Forward)? {
                return Ok(None);
            }
            let line = self.reader.current_line.trim().to_string();
            if line.is_empty() {
                continue;
            }

            match self.parser_state {
                ParserState::Between => {
                    if line.eq_ignore_ascii_case("BEGIN IONS") {
                        self.parser_state = ParserState::ScanHeaders;
                        return self.build_one_spectrum();
                    }
                    // lines outside any BEGIN/END IONS block (file-level
                    // headers, comments) are ignored.
                }
                ParserState::ScanHeaders | ParserState::Peaks => {
                    // only reached if a previous call returned early; should
                    // not happen given build_one_spectrum consumes a full block.
                    warn!("unexpected MGF parser state at top level, resetting");
                    self.parser_state = ParserState::Between;
                }
            }
        }
    }

    fn build_one_spectrum(&mut self) -> Result<Option<Spectrum>> {
        let mut spectrum = Spectrum::new();
        spectrum.ms_level = 2;
        spectrum.spectrum_id = self.next_spectrum_id;
        self.next_spectrum_id += 1;

        loop {
            if !self.reader.read_line(Direction::Forward)? {
                warn!("MGF file ended mid-spectrum (missing END IONS)");
                self.parser_state = ParserState::Between;
                break;
            }
            let line = self.reader.current_line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("END IONS") {
                self.parser_state = ParserState::Between;
                break;
            }

            if self.parser_state == ParserState::ScanHeaders {
                if line.contains('=') {
                    Self::handle_header_line(&mut spectrum, &line);
                    continue;
                }
                self.parser_state = ParserState::Peaks;
            }

            match Self::parse_peak_line(&line) {
                Some((mz, intensity, charge)) => {
                    spectrum.mz_list.push(mz);
                    spectrum.intensity_list.push(intensity);
                    if charge.is_some() {
                        spectrum.parent_ion_charge = charge.or(spectrum.parent_ion_charge);
                    }
                }
                None => warn!("skipping unparsable MGF peak line: {:?}", line),
            }
        }

        if self.state.auto_shrink_data_lists {
            let n = spectrum.mz_list.len();
            spectrum.shrink_to_peaks_count(n);
        }
        Ok(Some(spectrum))
    }
}

fn parse_charge(text: &str) -> Option<i32> {
    let text = text.trim();
    if let Some(stripped) = text.strip_suffix('+') {
        stripped.parse::<i32>().ok()
    } else if let Some(stripped) = text.strip_suffix('-') {
        stripped.parse::<i32>().ok().map(|v: i32| -v)
    } else {
        text.parse::<i32>().ok()
    }
}

impl SpectrumSource for MgfReader {
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

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
BEGIN IONS
TITLE=Angiotensin scan 3
PEPMASS=432.90 1.0E6
CHARGE=3+
RTINSECONDS=0.6
SCANS=3
110.071 2.3E+8
200.5 1.0E+6
END IONS
BEGIN IONS
SCANS=4
150.0 5.0E+5
END IONS
";

    #[test_log::test]
    fn parses_header_keys_and_peaks() {
        let mut reader = MgfReader::open_text_stream(SAMPLE).unwrap();
        let mut s = Spectrum::new();

        assert!(reader.read_next_spectrum(&mut s).unwrap());
        assert_eq!(s.scan_number, 3);
        assert_eq!(s.ms_level, 2);
        assert_eq!(s.parent_ion_mz, Some(432.90));
        assert_eq!(s.parent_ion_charge, Some(3));
        assert!((s.retention_time_minutes.unwrap() - 0.01).abs() < 1e-9);
        assert_eq!(s.peaks_count(), 2);

        assert!(reader.read_next_spectrum(&mut s).unwrap());
        assert_eq!(s.scan_number, 4);
        assert_eq!(s.peaks_count(), 1);

        assert!(!reader.read_next_spectrum(&mut s).unwrap());
    }

    #[test]
    fn negative_charge_suffix_is_parsed() {
        assert_eq!(parse_charge("2-"), Some(-2));
        assert_eq!(parse_charge("2+"), Some(2));
        assert_eq!(parse_charge("2"), Some(2));
    }

    #[test]
    fn peak_line_with_charge_column_is_parsed() {
        let (mz, intensity, charge) = MgfReader::parse_peak_line("100.5\t20.0\t2+").unwrap();
        assert_eq!(mz, 100.5);
        assert_eq!(intensity, 20.0);
        assert_eq!(charge, Some(2));
    }

    #[test_log::test]
    fn missing_end_ions_still_yields_the_partial_spectrum() {
        let text = "BEGIN IONS\nSCANS=9\n100.0 1.0\n";
        let mut reader = MgfReader::open_text_stream(text).unwrap();
        let mut s = Spectrum::new();
        assert!(reader.read_next_spectrum(&mut s).unwrap());
        assert_eq!(s.scan_number, 9);
        assert_eq!(s.peaks_count(), 1);
    }

    #[test]
    fn polarity_defaults_to_unknown() {
        let mut reader = MgfReader::open_text_stream(SAMPLE).unwrap();
        let mut s = Spectrum::new();
        reader.read_next_spectrum(&mut s).unwrap();
        assert_eq!(s.polarity, Polarity::Unknown);
    }
}
