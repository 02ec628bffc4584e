//! `specscan` reads mass-spectrometry spectrum files in four formats: mzXML
//! and mzData (both XML, each with a sequential reader and an indexed
//! random-access accessor) and MGF and concatenated-DTA (both line-oriented
//! text, sequential only).
//!
//! Every format reader implements [`SpectrumSource`](io::SpectrumSource);
//! the mzXML and mzData accessors additionally implement
//! [`ScanAccessor`](io::ScanAccessor), which refines it with index-backed
//! random access by scan number or position without re-parsing the whole
//! file.
//!
//! ```rust
//! use specscan::io::SpectrumSource;
//! use specscan::io::mgf::MgfReader;
//! use specscan::spectrum::Spectrum;
//!
//! let mut reader = MgfReader::open_text_stream(
//!     "BEGIN IONS\nSCANS=1\n100.0 1.0\nEND IONS\n"
//! ).unwrap();
//! let mut spectrum = Spectrum::new();
//! while reader.read_next_spectrum(&mut spectrum).unwrap() {
//!     println!("scan {} has {} peaks", spectrum.scan_number, spectrum.peaks_count());
//! }
//! ```
//!
//! The foundation underneath every reader is the bidirectional
//! byte-addressable text reader in [`io::bidi_reader`], which can position
//! at any byte offset and read whole lines forward or backward over UTF-8
//! or UTF-16 text with mixed line terminators. The mzXML/mzData accessors
//! build on it by adding a scan-number index (embedded, when mzXML carries
//! one, or built by a full rescan) so individual spectra can be extracted
//! without re-parsing the whole file — see [`io::mzxml::MzXmlAccessor`] and
//! [`io::mzdata_xml::MzDataAccessor`].

pub mod codec;
pub mod error;
pub mod format;
pub mod io;
pub mod progress;
pub mod spectrum;

pub use crate::error::{Error, Result};
pub use crate::format::{infer_format, infer_from_content, infer_from_extension, SpectrumFormat};
pub use crate::io::{DtaReader, MgfReader, MzDataAccessor, MzDataReader, MzXmlAccessor, MzXmlReader};
pub use crate::io::{ScanAccessor, SpectrumSource};
pub use crate::progress::{Logger, NullObserver, ProgressSink};
pub use crate::spectrum::Spectrum;
