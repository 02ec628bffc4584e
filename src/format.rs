//! Format inference (SPEC_FULL §4.12): a thin convenience layer over the
//! four concrete readers, grounded on `mzdata::io::infer_format`'s
//! extension-then-content-sniff dispatch (`MassSpectrometryFormat`,
//! `infer_from_path`/`infer_from_stream`). This module owns no parsing
//! logic of its own; callers may always construct a concrete reader
//! directly instead.

use std::path::Path;

/// One of the four spectrum file formats this crate can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectrumFormat {
    MzXml,
    MzData,
    Mgf,
    Dta,
}

/// Sniff a format from a file extension, per spec.md §6's four recognized
/// extensions. Case-insensitive.
pub fn infer_from_extension(path: &Path) -> Option<SpectrumFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mzxml" => Some(SpectrumFormat::MzXml),
        "mzdata" | "mzdat" => Some(SpectrumFormat::MzData),
        "mgf" => Some(SpectrumFormat::Mgf),
        "dta" => Some(SpectrumFormat::Dta),
        "txt" => {
            // concatenated-DTA fixtures are conventionally named `*_dta.txt`.
            let stem = path.file_stem()?.to_str()?.to_ascii_lowercase();
            stem.ends_with("_dta").then_some(SpectrumFormat::Dta)
        }
        _ => None,
    }
}

/// Sniff a format from the first non-whitespace bytes of a stream, per
/// spec.md §4.12's content-sniffing fallback.
pub fn infer_from_content(bytes: &[u8]) -> Option<SpectrumFormat> {
    let text = std::str::from_utf8(bytes).ok()?;
    let trimmed = text.trim_start();
    if trimmed.starts_with("<?xml") || trimmed.starts_with("<mzXML") {
        // an XML declaration alone doesn't distinguish mzXML from mzData;
        // peek past it for the root element.
        let after_decl = trimmed.find("?>").map(|i| &trimmed[i + 2..]).unwrap_or(trimmed).trim_start();
        if after_decl.starts_with("<mzData") {
            return Some(SpectrumFormat::MzData);
        }
        return Some(SpectrumFormat::MzXml);
    }
    if trimmed.starts_with("<mzData") {
        return Some(SpectrumFormat::MzData);
    }
    if trimmed.starts_with("BEGIN IONS") {
        return Some(SpectrumFormat::Mgf);
    }
    if trimmed.starts_with("=====") {
        return Some(SpectrumFormat::Dta);
    }
    // a bare DTA file with no `===` separator still starts with a header
    // line of the form `<Base>.<Start>.<End>.<Charge>.dta<ws><ParentMH>`.
    if let Some(first_line) = trimmed.lines().next() {
        let mut cols = first_line.split_whitespace();
        if let (Some(dotted), Some(mh)) = (cols.next(), cols.next()) {
            if dotted.ends_with(".dta") && mh.parse::<f64>().is_ok() {
                return Some(SpectrumFormat::Dta);
            }
        }
    }
    None
}

/// Infer a spectrum format for `path`: extension first, falling back to
/// sniffing the first 4 KiB of file content.
pub fn infer_format(path: &Path) -> Option<SpectrumFormat> {
    if let Some(fmt) = infer_from_extension(path) {
        return Some(fmt);
    }
    let bytes = std::fs::read(path).ok()?;
    let sniff_len = bytes.len().min(4096);
    infer_from_content(&bytes[..sniff_len])
}
