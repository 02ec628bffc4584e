//! Base64/zlib numeric array codec shared by the mzXML `<peaks>` element and
//! the mzData `<data>` element. Grounded on
//! `mzdata::spectrum::bindata::array::DataArray::decode`, which performs the
//! same base64-then-optional-zlib decode for mzML's binary arrays.

use std::io::Read;

use base64_simd::STANDARD as BASE64;
use flate2::bufread::ZlibDecoder;

use crate::error::CodecError;

/// Numeric precision of an encoded peak array, in bits per value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Bits32,
    Bits64,
}

impl Precision {
    pub fn byte_width(self) -> usize {
        match self {
            Precision::Bits32 => 4,
            Precision::Bits64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Decode a base64-encoded, optionally zlib-compressed numeric array into a
/// sequence of `f64`. `text` is the raw element text node; leading/trailing
/// whitespace (common in pretty-printed XML) is stripped before decoding.
pub fn decode_numeric_array(
    text: &str,
    precision: Precision,
    endianness: Endianness,
    zlib_compressed: bool,
) -> Result<Vec<f64>, CodecError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let raw = BASE64
        .decode_to_vec(trimmed.as_bytes())
        .map_err(|_| CodecError::MalformedBase64)?;

    let bytes = if zlib_compressed {
        inflate_zlib(&raw)?
    } else {
        raw
    };

    let width = precision.byte_width();
    if bytes.len() % width != 0 {
        return Err(CodecError::MalformedPeaks(bytes.len(), width));
    }

    let mut out = Vec::with_capacity(bytes.len() / width);
    for chunk in bytes.chunks_exact(width) {
        let value = match (precision, endianness) {
            (Precision::Bits32, Endianness::Little) => {
                f32::from_le_bytes(chunk.try_into().unwrap()) as f64
            }
            (Precision::Bits32, Endianness::Big) => {
                f32::from_be_bytes(chunk.try_into().unwrap()) as f64
            }
            (Precision::Bits64, Endianness::Little) => {
                f64::from_le_bytes(chunk.try_into().unwrap())
            }
            (Precision::Bits64, Endianness::Big) => f64::from_be_bytes(chunk.try_into().unwrap()),
        };
        out.push(value);
    }
    Ok(out)
}

fn inflate_zlib(bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut out = Vec::with_capacity(bytes.len() * 3);
    decoder
        .read_to_end(&mut out)
        .map_err(|_| CodecError::MalformedZlib)?;
    Ok(out)
}

/// Split an interleaved `(mz, intensity)` array (as produced by mzXML's
/// `<peaks>`, where a single base64 blob holds both channels back to back)
/// into separate mz/intensity vectors.
pub fn split_interleaved(values: &[f64]) -> (Vec<f64>, Vec<f32>) {
    let pairs = values.len() / 2;
    let mut mz = Vec::with_capacity(pairs);
    let mut intensity = Vec::with_capacity(pairs);
    for chunk in values.chunks_exact(2) {
        mz.push(chunk[0]);
        intensity.push(chunk[1] as f32);
    }
    (mz, intensity)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_f64_le(values: &[f64]) -> String {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        BASE64.encode_to_string(&bytes)
    }

    #[test]
    fn roundtrips_uncompressed_64_bit_little_endian() {
        let values = [100.5, 200.25, 0.0, -3.5];
        let text = encode_f64_le(&values);
        let decoded =
            decode_numeric_array(&text, Precision::Bits64, Endianness::Little, false).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn roundtrips_zlib_compressed_32_bit_big_endian() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let values: [f32; 3] = [1.0, 2.5, -7.25];
        let mut raw = Vec::new();
        for v in values {
            raw.extend_from_slice(&v.to_be_bytes());
        }
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let compressed = encoder.finish().unwrap();
        let text = BASE64.encode_to_string(&compressed);

        let decoded =
            decode_numeric_array(&text, Precision::Bits32, Endianness::Big, true).unwrap();
        assert_eq!(decoded, vec![1.0, 2.5, -7.25]);
    }

    #[test]
    fn empty_text_decodes_to_empty_array() {
        let decoded =
            decode_numeric_array("   ", Precision::Bits64, Endianness::Little, false).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn mismatched_length_is_malformed_peaks() {
        // 3 bytes after base64 decode cannot split evenly into 8-byte doubles.
        let text = BASE64.encode_to_string(&[1u8, 2, 3]);
        let err =
            decode_numeric_array(&text, Precision::Bits64, Endianness::Little, false).unwrap_err();
        assert_eq!(err, CodecError::MalformedPeaks(3, 8));
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = decode_numeric_array("not valid base64!!", Precision::Bits64, Endianness::Little, false)
            .unwrap_err();
        assert_eq!(err, CodecError::MalformedBase64);
    }

    #[test]
    fn splits_interleaved_pairs() {
        let (mz, intensity) = split_interleaved(&[100.0, 1.0, 200.0, 2.0]);
        assert_eq!(mz, vec![100.0, 200.0]);
        assert_eq!(intensity, vec![1.0f32, 2.0f32]);
    }
}
