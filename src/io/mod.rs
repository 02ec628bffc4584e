//! Reading mass spectrometry spectrum files: the bidirectional byte reader
//! that underlies everything else, the two XML formats (each with a
//! sequential reader and an indexed accessor), and the two text formats
//! (sequential only, per spec.md's component table).

pub mod bidi_reader;
pub mod dta;
pub mod mgf;
pub mod mzdata_xml;
pub mod mzxml;
pub mod offset_index;
pub mod reader_base;
pub mod traits;

pub use crate::io::dta::DtaReader;
pub use crate::io::mgf::MgfReader;
pub use crate::io::mzdata_xml::{MzDataAccessor, MzDataReader};
pub use crate::io::mzxml::{MzXmlAccessor, MzXmlReader};
pub use crate::io::traits::{ScanAccessor, SpectrumSource};
