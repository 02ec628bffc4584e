//! The common spectrum record every format parser produces, and the
//! validation pass that computes derived fields.
//!
//! Grounded on `mzdata::spectrum::spectrum_types`/`scan_properties` for the
//! shape of a spectrum type shared across formats, but simplified: this
//! crate has no controlled-vocabulary parameter model, so format-specific
//! detail is two plain nested structs rather than a generic `ParamList`.

/// Ion polarity of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    Positive,
    Negative,
    #[default]
    Unknown,
}

/// Validation lifecycle of a `Spectrum`, per spec.md invariant 5: any mutator
/// that touches peak data or scalar fields after a successful `validate` call
/// reverts the status to `DataDefined`, so callers can tell a validated
/// snapshot from one that has since been mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpectrumStatus {
    #[default]
    Initialized,
    DataDefined,
    Validated,
}

/// mzXML-only detail, populated solely by the mzXML reader/accessor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MzXmlAttributes {
    pub activation_method: Option<String>,
    pub spectrum_type: Option<String>,
    pub filter_line: Option<String>,
    pub peaks_endian: Option<crate::codec::Endianness>,
    pub peaks_precision: Option<crate::codec::Precision>,
    pub peaks_compressed: bool,
}

/// mzData-only detail, populated solely by the mzData reader/accessor.
#[derive(Debug, Clone, PartialEq)]
pub struct MzDataAttributes {
    pub collision_energy: Option<f64>,
    pub collision_energy_units: String,
    pub collision_method: String,
    pub scan_mode: String,
    pub parent_ion_spectrum_id: Option<i32>,
    pub parent_ion_spectrum_ms_level: Option<i32>,
    pub numeric_precision_of_data_mz: Option<crate::codec::Precision>,
    pub numeric_precision_of_data_intensity: Option<crate::codec::Precision>,
    pub peaks_endian_mz: Option<crate::codec::Endianness>,
    pub peaks_endian_intensity: Option<crate::codec::Endianness>,
}

impl Default for MzDataAttributes {
    fn default() -> Self {
        Self::new()
    }
}

impl MzDataAttributes {
    pub fn new() -> Self {
        MzDataAttributes {
            collision_energy: None,
            collision_energy_units: "Percent".to_string(),
            collision_method: "CID".to_string(),
            scan_mode: "MassScan".to_string(),
            parent_ion_spectrum_id: None,
            parent_ion_spectrum_ms_level: None,
            numeric_precision_of_data_mz: None,
            numeric_precision_of_data_intensity: None,
            peaks_endian_mz: None,
            peaks_endian_intensity: None,
        }
    }
}

/// One spectrum, as parsed from any of the four supported formats.
///
/// A clone is always a deep clone: `mz_list`/`intensity_list` are owned, and
/// there is no copy-on-write sharing across spectra (spec.md §9's "shared
/// decode buffer" note is an implementation detail of the parsers, not a
/// property of this type).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    pub scan_number: i32,
    pub scan_number_end: i32,
    pub scan_count: i32,
    pub ms_level: i32,
    pub retention_time_minutes: Option<f64>,
    pub mz_range_start: Option<f64>,
    pub mz_range_end: Option<f64>,
    pub base_peak_mz: Option<f64>,
    pub base_peak_intensity: Option<f32>,
    pub total_ion_current: Option<f64>,
    pub parent_ion_mz: Option<f64>,
    pub parent_ion_charge: Option<i32>,
    /// The parent ion's (M+H)+ mass as reported by a DTA header line (§4.5).
    /// Only the DTA reader populates this; deriving `parent_ion_mz` from it
    /// is left to the consumer, per spec.md §4.5.
    pub parent_ion_mh: Option<f64>,
    pub mz_list: Vec<f64>,
    pub intensity_list: Vec<f32>,
    pub polarity: Polarity,
    pub centroided: bool,
    pub spectrum_status: SpectrumStatus,
    pub spectrum_id: i32,

    pub mzxml: Option<MzXmlAttributes>,
    pub mzdata: Option<MzDataAttributes>,

    /// Peaks with `mz <= 0` or `intensity < 0`; recorded per spec.md §7's
    /// `InvalidScanData` policy (warning, not a raised error) rather than
    /// dropped, so a consumer logging warnings can report an offending index.
    pub invalid_peak_indices: Vec<usize>,
}

impl Spectrum {
    pub fn new() -> Self {
        Spectrum {
            ms_level: 1,
            scan_count: 1,
            ..Default::default()
        }
    }

    pub fn peaks_count(&self) -> usize {
        self.mz_list.len()
    }

    /// Truncate `mz_list`/`intensity_list` to `peaks_count`. Used by
    /// `auto_shrink_data_lists` after a format parser over-allocates a
    /// buffer based on a declared (and possibly optimistic) peak count.
    pub fn shrink_to_peaks_count(&mut self, peaks_count: usize) {
        self.mz_list.truncate(peaks_count);
        self.intensity_list.truncate(peaks_count);
        self.spectrum_status = SpectrumStatus::DataDefined;
    }

    /// Implements §4.3 `Validate(compute_base_peak_and_tic, update_mz_range)`.
    pub fn validate(&mut self, compute_base_peak_and_tic: bool, update_mz_range: bool) {
        debug_assert_eq!(self.mz_list.len(), self.intensity_list.len());

        self.invalid_peak_indices.clear();
        for (i, (&mz, &intensity)) in self.mz_list.iter().zip(self.intensity_list.iter()).enumerate() {
            if mz <= 0.0 || intensity < 0.0 {
                self.invalid_peak_indices.push(i);
            }
        }

        if self.mz_list.is_empty() {
            self.base_peak_mz = None;
            self.base_peak_intensity = None;
            self.total_ion_current = Some(0.0);
        } else if compute_base_peak_and_tic {
            let mut tic = 0.0f64;
            let mut best_idx = 0usize;
            for (i, &intensity) in self.intensity_list.iter().enumerate() {
                tic += intensity as f64;
                // ties favor the lowest mz: only replace on strictly greater
                // intensity, and the list is walked in ascending-index order,
                // so the first occurrence of the max wins automatically only
                // if indices already run low-to-high mz; guard explicitly.
                let better = intensity > self.intensity_list[best_idx]
                    || (intensity == self.intensity_list[best_idx]
                        && self.mz_list[i] < self.mz_list[best_idx]);
                if better {
                    best_idx = i;
                }
            }
            self.total_ion_current = Some(tic);
            self.base_peak_intensity = Some(self.intensity_list[best_idx]);
            self.base_peak_mz = Some(self.mz_list[best_idx]);
        }

        if update_mz_range && !self.mz_list.is_empty() {
            let mut min_mz = self.mz_list[0];
            let mut max_mz = self.mz_list[0];
            for &mz in &self.mz_list[1..] {
                if mz < min_mz {
                    min_mz = mz;
                }
                if mz > max_mz {
                    max_mz = mz;
                }
            }
            self.mz_range_start = Some(min_mz);
            self.mz_range_end = Some(max_mz);
        }

        if self.scan_number == 0 && self.spectrum_id != 0 {
            self.scan_number = self.spectrum_id;
        }

        self.spectrum_status = SpectrumStatus::Validated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum_with(mz: &[f64], intensity: &[f32]) -> Spectrum {
        let mut s = Spectrum::new();
        s.mz_list = mz.to_vec();
        s.intensity_list = intensity.to_vec();
        s
    }

    #[test]
    fn validate_computes_base_peak_tic_and_range() {
        let mut s = spectrum_with(&[100.0, 50.0, 200.0], &[1.0, 5.0, 5.0]);
        s.validate(true, true);
        assert_eq!(s.total_ion_current, Some(11.0));
        // ties between index 1 (mz 50) and index 2 (mz 200) favor lowest mz.
        assert_eq!(s.base_peak_mz, Some(50.0));
        assert_eq!(s.base_peak_intensity, Some(5.0));
        assert_eq!(s.mz_range_start, Some(50.0));
        assert_eq!(s.mz_range_end, Some(200.0));
        assert_eq!(s.spectrum_status, SpectrumStatus::Validated);
    }

    #[test]
    fn validate_empty_spectrum_zeroes_tic() {
        let mut s = Spectrum::new();
        s.validate(true, true);
        assert_eq!(s.total_ion_current, Some(0.0));
        assert_eq!(s.base_peak_mz, None);
        assert_eq!(s.base_peak_intensity, None);
    }

    #[test]
    fn validate_applies_mzdata_scan_number_override() {
        let mut s = spectrum_with(&[100.0], &[1.0]);
        s.spectrum_id = 42;
        s.scan_number = 0;
        s.validate(false, false);
        assert_eq!(s.scan_number, 42);
    }

    #[test]
    fn validate_flags_invalid_peaks_without_dropping_them() {
        let mut s = spectrum_with(&[0.0, 100.0], &[1.0, -1.0]);
        s.validate(true, true);
        assert_eq!(s.peaks_count(), 2);
        assert_eq!(s.invalid_peak_indices, vec![0, 1]);
    }

    #[test]
    fn shrink_reverts_status_to_data_defined() {
        let mut s = spectrum_with(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        s.validate(true, true);
        s.shrink_to_peaks_count(2);
        assert_eq!(s.peaks_count(), 2);
        assert_eq!(s.spectrum_status, SpectrumStatus::DataDefined);
    }
}
