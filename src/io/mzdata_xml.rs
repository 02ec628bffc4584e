//! mzData streaming reader (§4.8) and accessor (§4.9/§4.11).
//!
//! Element walk grounded the same way as `mzxml.rs`, on `mzdata`'s
//! `MzMLSAX`-style event loop; mzData's `cvParam name="..." value="..."`
//! shape (rather than mzXML's attributes-on-the-element-itself) is handled
//! by `SpectrumStackBuilder::handle_cv_param`, which reads a `<cvParam>`
//! element's own `name`/`value` attributes and dispatches on the name.
//! Unlike mzXML, mzData has no embedded index (§4.11), so the accessor
//! always performs a single streaming rescan, following the same
//! open/close offset tracking as the di-hardt-omicstools mzML indexer
//! adapted to `<spectrum id="N">`.

use std::collections::VecDeque;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};

use log::warn;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::codec::{decode_numeric_array, Endianness, Precision};
use crate::error::{Error, Result};
use crate::io::bidi_reader::BidiByteReader;
use crate::io::offset_index::{ScanIndex, ScanIndexEntry};
use crate::io::reader_base::SequentialReaderState;
use crate::io::traits::{ScanAccessor, SpectrumSource};
use crate::progress::{Logger, ProgressSink, ProgressTracker};
use crate::spectrum::{MzDataAttributes, Polarity, Spectrum};

fn attr_str(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes().filter_map(|a| a.ok()).find_map(|a| {
        if a.key.as_ref() == key {
            Some(String::from_utf8_lossy(&a.value).into_owned())
        } else {
            None
        }
    })
}

fn attr_i32(e: &BytesStart, key: &[u8]) -> Option<i32> {
    attr_str(e, key).and_then(|s| s.parse().ok())
}

/// mzData 1.05 is the only schema version spec.md §6 names as recognized;
/// unknown versions are accepted iff `parse_files_with_unknown_version`,
/// mirroring the mzXML `xmlns` suffix check in `mzxml.rs`.
fn is_known_mzdata_version(version: &str) -> bool {
    version == "1.05"
}

/// One `<spectrum>` element under construction, plus the array-builder
/// state needed to parse the two sibling `<mzArrayBinary>`/`<intenArrayBinary>`
/// trees, each with a single `<data>` child carrying the encoding attributes.
struct SpectrumBuilding {
    spectrum: Spectrum,
    in_mz_array: bool,
    in_intensity_array: bool,
    current_precision: Option<Precision>,
    current_endian: Option<Endianness>,
}

impl SpectrumBuilding {
    fn new() -> Self {
        SpectrumBuilding {
            spectrum: Spectrum::new(),
            in_mz_array: false,
            in_intensity_array: false,
            current_precision: None,
            current_endian: None,
        }
    }
}

#[derive(Default)]
struct SpectrumStackBuilder {
    current: Option<SpectrumBuilding>,
}

impl SpectrumStackBuilder {
    fn start_spectrum(&mut self, e: &BytesStart) {
        let mut building = SpectrumBuilding::new();
        let id = attr_i32(e, b"id").unwrap_or(0);
        building.spectrum.spectrum_id = id;
        building.spectrum.scan_number = id;
        building.spectrum.mzdata = Some(MzDataAttributes::new());
        self.current = Some(building);
    }

    fn start_array(&mut self, local_name: &[u8]) {
        if let Some(b) = self.current.as_mut() {
            match local_name {
                b"mzArrayBinary" => b.in_mz_array = true,
                b"intenArrayBinary" => b.in_intensity_array = true,
                _ => {}
            }
        }
    }

    fn end_array(&mut self, local_name: &[u8]) {
        if let Some(b) = self.current.as_mut() {
            match local_name {
                b"mzArrayBinary" => b.in_mz_array = false,
                b"intenArrayBinary" => b.in_intensity_array = false,
                _ => {}
            }
        }
    }

    /// mzData 1.05 carries `msLevel`/`mzRangeStart`/`mzRangeStop` as
    /// attributes directly on `<spectrumInstrument>`, not as `<cvParam>`
    /// children of it (those cvParams, e.g. `TimeInMinutes`, sit alongside
    /// as siblings and are handled by `handle_cv_param`).
    fn handle_spectrum_instrument_attrs(&mut self, e: &BytesStart) {
        if let Some(b) = self.current.as_mut() {
            let s = &mut b.spectrum;
            if let Some(level) = attr_i32(e, b"msLevel") {
                s.ms_level = level;
            }
            if let Some(v) = attr_str(e, b"mzRangeStart") {
                s.mz_range_start = v.parse().ok();
            }
            if let Some(v) = attr_str(e, b"mzRangeStop") {
                s.mz_range_end = v.parse().ok();
            }
        }
    }

    fn handle_data_attrs(&mut self, e: &BytesStart) {
        if let Some(b) = self.current.as_mut() {
            let precision = match attr_str(e, b"precision").as_deref() {
                Some("64") => Precision::Bits64,
                _ => Precision::Bits32,
            };
            let endian = match attr_str(e, b"endian").as_deref() {
                Some("big") => Endianness::Big,
                _ => Endianness::Little,
            };
            b.current_precision = Some(precision);
            b.current_endian = Some(endian);

            if let Some(mzdata) = b.spectrum.mzdata.as_mut() {
                if b.in_mz_array {
                    mzdata.numeric_precision_of_data_mz = Some(precision);
                    mzdata.peaks_endian_mz = Some(endian);
                } else if b.in_intensity_array {
                    mzdata.numeric_precision_of_data_intensity = Some(precision);
                    mzdata.peaks_endian_intensity = Some(endian);
                }
            }
        }
    }

    fn handle_data_text(&mut self, text: &str, offset: u64) -> Result<()> {
        let Some(b) = self.current.as_mut() else {
            return Ok(());
        };
        if !b.in_mz_array && !b.in_intensity_array {
            return Ok(());
        }
        let precision = b.current_precision.unwrap_or(Precision::Bits32);
        let endian = b.current_endian.unwrap_or(Endianness::Little);
        match decode_numeric_array(text, precision, endian, false) {
            Ok(values) => {
                if b.in_mz_array {
                    b.spectrum.mz_list = values;
                } else {
                    b.spectrum.intensity_list = values.into_iter().map(|v| v as f32).collect();
                }
                Ok(())
            }
            Err(e) => {
                let scan_number = b.spectrum.scan_number;
                self.current = None;
                warn!("skipping spectrum {}: malformed peaks: {}", scan_number, e);
                Err(Error::codec("data", offset, e))
            }
        }
    }

    /// mzData expresses most metadata as `<cvParam name="X" value="Y"/>`
    /// rather than attributes on the owning element, so both halves are
    /// read directly off the one element.
    fn handle_cv_param(&mut self, e: &BytesStart) {
        let Some(name) = attr_str(e, b"name") else {
            return;
        };
        let value = attr_str(e, b"value").unwrap_or_default();
        self.apply_cv_param(&name, &value);
    }

    fn apply_cv_param(&mut self, name: &str, value: &str) {
        let Some(b) = self.current.as_mut() else {
            return;
        };
        let s = &mut b.spectrum;
        match name {
            "msLevel" => {
                if let Ok(v) = value.parse() {
                    s.ms_level = v;
                }
            }
            "mzRangeStart" => s.mz_range_start = value.parse().ok(),
            "mzRangeStop" => s.mz_range_end = value.parse().ok(),
            "TimeInMinutes" => s.retention_time_minutes = value.parse().ok(),
            "TimeInSeconds" => {
                if let Ok(seconds) = value.parse::<f64>() {
                    s.retention_time_minutes = Some(seconds / 60.0);
                }
            }
            "Polarity" => {
                s.polarity = match value {
                    "Positive" | "+" => Polarity::Positive,
                    "Negative" | "-" => Polarity::Negative,
                    _ => Polarity::Unknown,
                };
            }
            "ScanMode" => {
                if let Some(mzdata) = s.mzdata.as_mut() {
                    mzdata.scan_mode = value.to_string();
                }
            }
            "MassToChargeRatio" => s.parent_ion_mz = value.parse().ok(),
            "ChargeState" => s.parent_ion_charge = value.parse().ok(),
            "CollisionEnergy" => {
                if let Some(mzdata) = s.mzdata.as_mut() {
                    mzdata.collision_energy = value.parse().ok();
                }
            }
            "CollisionEnergyUnits" => {
                if let Some(mzdata) = s.mzdata.as_mut() {
                    mzdata.collision_energy_units = value.to_string();
                }
            }
            "Method" => {
                if let Some(mzdata) = s.mzdata.as_mut() {
                    mzdata.collision_method = value.to_string();
                }
            }
            _ => {}
        }
    }

    fn set_parent_spectrum_ref(&mut self, spectrum_id: Option<i32>, ms_level: Option<i32>) {
        if let Some(b) = self.current.as_mut() {
            if let Some(mzdata) = b.spectrum.mzdata.as_mut() {
                if let Some(id) = spectrum_id {
                    mzdata.parent_ion_spectrum_id = Some(id);
                }
                if let Some(level) = ms_level {
                    mzdata.parent_ion_spectrum_ms_level = Some(level);
                }
            }
        }
    }

    fn end_spectrum(&mut self, auto_shrink: bool) -> Option<Spectrum> {
        let building = self.current.take()?;
        let mut spectrum = building.spectrum;
        if spectrum.scan_number == 0 && spectrum.spectrum_id != 0 {
            spectrum.scan_number = spectrum.spectrum_id;
        }
        if auto_shrink {
            let n = spectrum.mz_list.len().min(spectrum.intensity_list.len());
            spectrum.shrink_to_peaks_count(n);
        }
        Some(spectrum)
    }
}

pub struct MzDataReader {
    state: SequentialReaderState,
    xml: Reader<BufReader<std::fs::File>>,
    builder: SpectrumStackBuilder,
    pending: VecDeque<Spectrum>,
    buf: Vec<u8>,
    eof: bool,
    /// `<spectrumRef><spectrum id="N" msLevel="2"/></spectrumRef>`-style
    /// precursor reference spotted inside `precursorList/precursor`.
    pending_parent_ref: Option<(Option<i32>, Option<i32>)>,
    total_bytes: u64,
}

impl MzDataReader {
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path).map_err(|e| Error::IoPath { path, source: e })?;
        let total_bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(MzDataReader {
            state: SequentialReaderState::new(),
            xml: Reader::from_reader(BufReader::new(file)),
            builder: SpectrumStackBuilder::default(),
            pending: VecDeque::new(),
            buf: Vec::new(),
            eof: false,
            pending_parent_ref: None,
            total_bytes,
        })
    }

    fn pull_events(&mut self) -> Result<()> {
        loop {
            if !self.pending.is_empty() {
                return Ok(());
            }
            self.buf.clear();
            let offset = self.xml.buffer_position();
            let event = self
                .xml
                .read_event_into(&mut self.buf)
                .map_err(|e| Error::format("xml", offset, e.to_string()))?;

            match event {
                Event::Eof => {
                    self.eof = true;
                    return Ok(());
                }
                Event::Start(e) => {
                    let name = e.local_name().as_ref().to_vec();
                    match name.as_slice() {
                        b"mzData" => {
                            if !self.state.parse_files_with_unknown_version {
                                if let Some(v) = attr_str(&e, b"version") {
                                    if !is_known_mzdata_version(&v) {
                                        return Err(Error::UnrecognizedVersion(v));
                                    }
                                }
                            }
                        }
                        b"spectrum" => self.builder.start_spectrum(&e),
                        b"spectrumInstrument" => self.builder.handle_spectrum_instrument_attrs(&e),
                        b"mzArrayBinary" | b"intenArrayBinary" => self.builder.start_array(&name),
                        b"data" => self.builder.handle_data_attrs(&e),
                        b"cvParam" => self.builder.handle_cv_param(&e),
                        b"precursor" => {
                            if let Some(spec_id) = attr_i32(&e, b"spectrumRef") {
                                self.pending_parent_ref = Some((Some(spec_id), None));
                            }
                        }
                        _ => {}
                    }
                }
                Event::Empty(e) => {
                    let name = e.local_name().as_ref().to_vec();
                    match name.as_slice() {
                        b"spectrumInstrument" => self.builder.handle_spectrum_instrument_attrs(&e),
                        b"cvParam" => self.builder.handle_cv_param(&e),
                        b"precursor" => {
                            if let Some(spec_id) = attr_i32(&e, b"spectrumRef") {
                                self.pending_parent_ref = Some((Some(spec_id), None));
                            }
                        }
                        _ => {}
                    }
                }
                Event::End(e) => {
                    let name = e.local_name().as_ref().to_vec();
                    match name.as_slice() {
                        b"mzArrayBinary" | b"intenArrayBinary" => self.builder.end_array(&name),
                        b"spectrum" => {
                            if let Some((spec_id, level)) = self.pending_parent_ref.take() {
                                self.builder.set_parent_spectrum_ref(spec_id, level);
                            }
                            if let Some(spectrum) = self.builder.end_spectrum(self.state.auto_shrink_data_lists) {
                                self.pending.push_back(spectrum);
                                return Ok(());
                            }
                        }
                        _ => {}
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| Error::format("xml", offset, e.to_string()))?;
                    if let Err(e) = self.builder.handle_data_text(&text, offset) {
                        warn!("{}", e);
                    }
                }
                _ => {}
            }
        }
    }
}

impl SpectrumSource for MzDataReader {
    fn read_next_spectrum(&mut self, out: &mut Spectrum) -> Result<bool> {
        if self.state.aborted() {
            return Err(Error::Aborted);
        }
        loop {
            if let Some(s) = self.pending.pop_front() {
                *out = s;
                return Ok(true);
            }
            if self.eof {
                self.state.eof_flag = true;
                return Ok(false);
            }
            self.pull_events()?;
        }
    }

    fn read_and_cache_entire_file(&mut self) -> Result<()> {
        self.state.progress_sink().set_task("parsing");
        let mut tracker = ProgressTracker::new(self.total_bytes);
        loop {
            let mut s = Spectrum::new();
            if !self.read_next_spectrum(&mut s)? {
                break;
            }
            self.state.push_cached(s);
            let position = self.xml.buffer_position();
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

    fn close_file(&mut self) {}
}

/// mzData accessor (§4.9/§4.11): always a single streaming rescan, since
/// mzData carries no embedded index.
pub struct MzDataAccessor {
    path: PathBuf,
    byte_reader: BidiByteReader,
    index: ScanIndex,
    header_bytes: Vec<u8>,
    footer_bytes: Vec<u8>,
    ignore_embedded_index: bool,
    state: SequentialReaderState,
    read_cursor: usize,
}

impl MzDataAccessor {
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let byte_reader = BidiByteReader::open(&path)?;
        let mut accessor = MzDataAccessor {
            path,
            byte_reader,
            index: ScanIndex::new(),
            header_bytes: Vec::new(),
            footer_bytes: Vec::new(),
            ignore_embedded_index: false,
            state: SequentialReaderState::new(),
            read_cursor: 0,
        };
        accessor.rescan()?;
        Ok(accessor)
    }

    fn read_range_as_bytes(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = std::fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// §4.11: a single streaming rescan collecting `<spectrum id=` open and
    /// `</spectrum>` close offsets, with XML depth tracking via an explicit
    /// stack in case a future schema variant nests spectra (mzData 1.05
    /// itself never does, but the stack makes the rescan robust to that).
    fn rescan(&mut self) -> Result<()> {
        self.index.clear();
        let file = std::fs::File::open(&self.path)?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        let mut buf = Vec::new();
        let mut open_stack: Vec<(i32, u64)> = Vec::new();
        let total = self.byte_reader.file_length_bytes();
        self.state.progress_sink().set_task("indexing");
        let mut tracker = ProgressTracker::new(total);

        loop {
            let offset_before = reader.buffer_position();
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| Error::format("xml", offset_before, e.to_string()))?;
            let mut closed_one = false;
            match event {
                Event::Eof => break,
                Event::Start(e) if e.local_name().as_ref() == b"spectrum" => {
                    let id = attr_i32(&e, b"id").unwrap_or(0);
                    let start = reader.buffer_position() - e.len() as u64 - 2;
                    open_stack.push((id, start));
                }
                Event::End(e) if e.local_name().as_ref() == b"spectrum" => {
                    if let Some((id, start)) = open_stack.pop() {
                        let end = reader.buffer_position();
                        self.index.insert(
                            id,
                            ScanIndexEntry {
                                byte_start: start,
                                byte_end: end,
                                ms_level: 0,
                            },
                        );
                        closed_one = true;
                    }
                }
                _ => {}
            }
            buf.clear();
            let pos = reader.buffer_position();
            if tracker.advance(self.state.progress_sink(), pos, if closed_one { 1 } else { 0 }) {
                return Err(Error::Aborted);
            }
        }

        let file_len = self.byte_reader.file_length_bytes();
        let min_start = (0..self.index.len())
            .filter_map(|i| self.index.get_by_position(i).map(|(_, e)| e.byte_start))
            .min()
            .unwrap_or(0);
        let max_end = (0..self.index.len())
            .filter_map(|i| self.index.get_by_position(i).map(|(_, e)| e.byte_end))
            .max()
            .unwrap_or(file_len);
        self.header_bytes = self.read_range_as_bytes(0, min_start.min(file_len))?;
        self.footer_bytes = self.read_range_as_bytes(max_end.min(file_len), file_len)?;
        Ok(())
    }

    fn parse_fragment(&self, spectrum_id: i32, header_only: bool) -> Result<Option<Spectrum>> {
        let entry = match self.index.get(spectrum_id) {
            Some(e) => *e,
            None => return Ok(None),
        };
        let mut fragment = self.header_bytes.clone();
        fragment.extend_from_slice(&self.read_range_as_bytes(entry.byte_start, entry.byte_end)?);
        fragment.extend_from_slice(&self.footer_bytes);

        let mut builder = SpectrumStackBuilder::default();
        let mut xml_reader = Reader::from_reader(BufReader::new(Cursor::new(fragment)));
        let mut buf = Vec::new();
        let mut out = None;
        loop {
            let offset = xml_reader.buffer_position();
            let event = xml_reader
                .read_event_into(&mut buf)
                .map_err(|e| Error::format("xml", offset, e.to_string()))?;
            match event {
                Event::Eof => break,
                Event::Start(ref e) | Event::Empty(ref e) => {
                    match e.local_name().as_ref() {
                        b"spectrum" => builder.start_spectrum(e),
                        b"spectrumInstrument" => builder.handle_spectrum_instrument_attrs(e),
                        b"mzArrayBinary" => builder.start_array(b"mzArrayBinary"),
                        b"intenArrayBinary" => builder.start_array(b"intenArrayBinary"),
                        b"data" => builder.handle_data_attrs(e),
                        b"cvParam" => builder.handle_cv_param(e),
                        _ => {}
                    }
                }
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"mzArrayBinary" => builder.end_array(b"mzArrayBinary"),
                    b"intenArrayBinary" => builder.end_array(b"intenArrayBinary"),
                    b"spectrum" => {
                        out = builder.end_spectrum(true);
                    }
                    _ => {}
                },
                Event::Text(ref t) => {
                    if !header_only {
                        let text = t.unescape().map_err(|e| Error::format("xml", offset, e.to_string()))?;
                        builder.handle_data_text(&text, offset)?;
                    }
                }
                _ => {}
            }
            buf.clear();
        }
        Ok(out)
    }
}

impl SpectrumSource for MzDataAccessor {
    fn read_next_spectrum(&mut self, out: &mut Spectrum) -> Result<bool> {
        let numbers: Vec<i32> = self.index.scan_numbers().collect();
        if self.read_cursor >= numbers.len() {
            self.state.eof_flag = true;
            return Ok(false);
        }
        let spectrum_id = numbers[self.read_cursor];
        self.read_cursor += 1;
        match self.parse_fragment(spectrum_id, false)? {
            Some(s) => {
                *out = s;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn read_and_cache_entire_file(&mut self) -> Result<()> {
        let numbers: Vec<i32> = self.index.scan_numbers().collect();
        let total = self.byte_reader.file_length_bytes();
        self.state.progress_sink().set_task("parsing");
        let mut tracker = ProgressTracker::new(total);
        for n in numbers {
            if let Some(s) = self.parse_fragment(n, false)? {
                self.state.push_cached(s);
            }
            let position = self.index.get(n).map(|e| e.byte_end).unwrap_or(0);
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
        self.index.scan_numbers().collect()
    }

    fn scan_count(&self) -> usize {
        self.index.len()
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
        self.byte_reader.close();
    }
}

impl ScanAccessor for MzDataAccessor {
    fn set_ignore_embedded_index(&mut self, value: bool) {
        // mzData has no embedded index to ignore; kept for trait-object
        // compatibility with the mzXML accessor and so callers can treat
        // both readers uniformly without a special case.
        self.ignore_embedded_index = value;
    }

    fn indexed_spectrum_count(&self) -> usize {
        self.index.len()
    }

    fn get_spectrum_header_info_by_index(&self, index: usize, out: &mut Spectrum) -> bool {
        let Some((num, _)) = self.index.get_by_position(index) else {
            return false;
        };
        match self.parse_fragment(num, true) {
            Ok(Some(s)) => {
                *out = s;
                true
            }
            _ => false,
        }
    }

    fn get_source_xml_by_index(&mut self, index: usize) -> Result<String> {
        let Some((_num, entry)) = self.index.get_by_position(index) else {
            return Ok(String::new());
        };
        let entry = *entry;
        let mut fragment = self.header_bytes.clone();
        fragment.extend_from_slice(&self.read_range_as_bytes(entry.byte_start, entry.byte_end)?);
        fragment.extend_from_slice(&self.footer_bytes);
        Ok(String::from_utf8_lossy(&fragment).into_owned())
    }

    fn get_source_xml_header(&self) -> &str {
        std::str::from_utf8(&self.header_bytes).unwrap_or("")
    }

    fn get_source_xml_footer(&self) -> &str {
        std::str::from_utf8(&self.footer_bytes).unwrap_or("")
    }

    fn read_and_cache_entire_file_non_indexed(&mut self) -> Result<()> {
        let mut reader = MzDataReader::open_file(&self.path)?;
        reader.set_auto_shrink_data_lists(self.state.auto_shrink_data_lists);
        reader.read_and_cache_entire_file()?;
        self.state.cached_spectra = reader.state.cached_spectra;
        self.state.scan_number_to_index = reader.state.scan_number_to_index;
        self.state.scan_number_min = reader.state.scan_number_min;
        self.state.scan_number_max = reader.state.scan_number_max;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_mzdata() -> String {
        format!(
            r#"<?xml version="1.0"?>
<mzData version="1.05">
<spectrumList count="2">
<spectrum id="139">
<spectrumDesc>
<spectrumSettings>
<spectrumInstrument msLevel="1">
<cvParam name="TimeInMinutes" value="3.75"/>
</spectrumInstrument>
</spectrumSettings>
</spectrumDesc>
<mzArrayBinary>
<data precision="64" endian="little" length="2">{}</data>
</mzArrayBinary>
<intenArrayBinary>
<data precision="32" endian="little" length="2">{}</data>
</intenArrayBinary>
</spectrum>
<spectrum id="141">
<spectrumDesc>
<spectrumSettings>
<spectrumInstrument msLevel="2">
<cvParam name="TimeInMinutes" value="3.80"/>
</spectrumInstrument>
</spectrumSettings>
<precursorList count="1">
<precursor spectrumRef="139">
<ionSelection>
<cvParam name="MassToChargeRatio" value="661.65"/>
<cvParam name="ChargeState" value="2"/>
</ionSelection>
<activation>
<cvParam name="CollisionEnergy" value="28"/>
<cvParam name="CollisionEnergyUnits" value="Percent"/>
<cvParam name="Method" value="CID"/>
</activation>
</precursor>
</precursorList>
</spectrumDesc>
<mzArrayBinary>
<data precision="64" endian="little" length="1">{}</data>
</mzArrayBinary>
<intenArrayBinary>
<data precision="32" endian="little" length="1">{}</data>
</intenArrayBinary>
</spectrum>
</spectrumList>
</mzData>
"#,
            encode_le64(&[100.0, 200.0]),
            encode_le32(&[1.0, 2.0]),
            encode_le64(&[661.65]),
            encode_le32(&[5.0]),
        )
    }

    fn encode_le64(values: &[f64]) -> String {
        let mut bytes = Vec::new();
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        base64_simd::STANDARD.encode_to_string(&bytes)
    }

    fn encode_le32(values: &[f32]) -> String {
        let mut bytes = Vec::new();
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        base64_simd::STANDARD.encode_to_string(&bytes)
    }

    #[test_log::test]
    fn sequential_reader_applies_scan_number_override_and_cv_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.mzData");
        std::fs::File::create(&path).unwrap().write_all(sample_mzdata().as_bytes()).unwrap();
        let mut reader = MzDataReader::open_file(&path).unwrap();

        let mut s = Spectrum::new();
        assert!(reader.read_next_spectrum(&mut s).unwrap());
        assert_eq!(s.scan_number, 139);
        assert_eq!(s.ms_level, 1);
        assert_eq!(s.peaks_count(), 2);

        assert!(reader.read_next_spectrum(&mut s).unwrap());
        assert_eq!(s.scan_number, 141);
        assert_eq!(s.ms_level, 2);
        assert_eq!(s.parent_ion_mz, Some(661.65));
        assert_eq!(s.parent_ion_charge, Some(2));
        let mzdata = s.mzdata.as_ref().unwrap();
        assert_eq!(mzdata.collision_energy, Some(28.0));
        assert_eq!(mzdata.collision_energy_units, "Percent");
        assert_eq!(mzdata.collision_method, "CID");

        assert!(!reader.read_next_spectrum(&mut s).unwrap());
    }

    #[test]
    fn accessor_rescans_and_matches_scan_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.mzData");
        std::fs::File::create(&path).unwrap().write_all(sample_mzdata().as_bytes()).unwrap();

        let mut accessor = MzDataAccessor::open_file(&path).unwrap();
        assert_eq!(accessor.indexed_spectrum_count(), 2);

        let mut out = Spectrum::new();
        assert!(accessor.get_spectrum_by_scan_number(0, &mut out) == false); // not cached yet
        assert!(accessor.read_next_spectrum(&mut out).unwrap());
        assert_eq!(out.scan_number, 139);
    }

    #[test]
    fn unrecognized_version_is_rejected_unless_opted_in() {
        let text = sample_mzdata().replace("version=\"1.05\"", "version=\"2.00\"");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.mzData");
        std::fs::File::create(&path).unwrap().write_all(text.as_bytes()).unwrap();

        let mut strict = MzDataReader::open_file(&path).unwrap();
        strict.set_parse_files_with_unknown_version(false);
        let mut s = Spectrum::new();
        assert!(matches!(strict.read_next_spectrum(&mut s), Err(Error::UnrecognizedVersion(_))));

        let mut lenient = MzDataReader::open_file(&path).unwrap();
        assert!(lenient.read_next_spectrum(&mut s).unwrap());
    }
}
