//! The two public interfaces every reader/accessor implements, replacing
//! base-class polymorphism (Rust has no implementation inheritance) with
//! trait methods over composed state, per spec.md §9's design note and
//! `mzdata::io::traits::spectrum::SpectrumSource` for the shape of such a
//! trait — refined here to match spec.md §4.4/§6 rather than mzML's
//! iterator-of-groups API.

use crate::error::Result;
use crate::progress::{Logger, ProgressSink};
use crate::spectrum::Spectrum;

/// Shared contract of the four format readers (§4.4, §6).
pub trait SpectrumSource {
    fn read_next_spectrum(&mut self, out: &mut Spectrum) -> Result<bool>;

    fn read_and_cache_entire_file(&mut self) -> Result<()>;

    fn get_spectrum_by_index(&self, index: usize, out: &mut Spectrum) -> bool;

    fn get_spectrum_by_scan_number(&self, scan_number: i32, out: &mut Spectrum) -> bool;

    fn get_scan_number_list(&self) -> Vec<i32>;

    fn scan_count(&self) -> usize;

    fn cached_spectrum_count(&self) -> usize;

    fn cached_spectra_scan_number_min(&self) -> Option<i32>;

    fn cached_spectra_scan_number_max(&self) -> Option<i32>;

    fn set_auto_shrink_data_lists(&mut self, value: bool);

    fn set_parse_files_with_unknown_version(&mut self, value: bool);

    fn set_progress_sink(&mut self, sink: Box<dyn ProgressSink>);

    fn set_logger(&mut self, logger: Box<dyn Logger>);

    fn abort_processing_now(&mut self);

    fn close_file(&mut self);
}

/// Refines `SpectrumSource` with the index-backed random-access operations
/// of §4.9/§6. Only the mzXML and mzData readers implement this; MGF and DTA
/// are sequential-only per spec.md's component table.
pub trait ScanAccessor: SpectrumSource {
    fn set_ignore_embedded_index(&mut self, value: bool);

    fn indexed_spectrum_count(&self) -> usize;

    fn get_spectrum_header_info_by_index(&self, index: usize, out: &mut Spectrum) -> bool;

    fn get_source_xml_by_index(&mut self, index: usize) -> Result<String>;

    fn get_source_xml_header(&self) -> &str;

    fn get_source_xml_footer(&self) -> &str;

    fn read_and_cache_entire_file_non_indexed(&mut self) -> Result<()>;
}
