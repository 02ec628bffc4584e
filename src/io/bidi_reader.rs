//! A buffered reader over an arbitrary binary stream that can be positioned
//! at any byte offset and read whole lines in either direction, handling
//! UTF-8, UTF-16LE and UTF-16BE (with and without a BOM) and mixed line
//! terminators. This is the foundation every other reader in the crate is
//! built on.
//!
//! Grounded on `mzdata::io::traits::util::SeekRead` for the underlying stream
//! abstraction (a blanket trait over `Read + Seek`); the sliding-window
//! refill and terminator search are original to this crate, since `mzdata`
//! has no reverse-scanning reader of its own to draw on, but use the same
//! dependencies it reaches for elsewhere: `memchr` for terminator search and
//! `encoding_rs` for UTF-16 decode.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::BidiReaderError;

/// Blanket trait for anything the byte reader can drive: a file, an
/// in-memory cursor, anything `Read + Seek`.
pub trait SeekRead: io::Read + io::Seek {}
impl<T: io::Read + io::Seek> SeekRead for T {}

const DEFAULT_WINDOW: usize = 64 * 1024;
/// Longest terminator the reader must never split across a refill boundary:
/// two UTF-16 code units (CRLF, 4 bytes).
const MAX_TERMINATOR_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineTerminator {
    #[default]
    None,
    LF,
    CR,
    CRLF,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf16LE,
    Utf16BE,
}

impl TextEncoding {
    /// Size in bytes of one code unit: 1 for UTF-8 (treated byte-wise), 2 for UTF-16.
    fn code_unit_size(self) -> usize {
        match self {
            TextEncoding::Utf8 => 1,
            TextEncoding::Utf16LE | TextEncoding::Utf16BE => 2,
        }
    }

    fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Utf16LE => encoding_rs::UTF_16LE.decode(bytes).0.into_owned(),
            TextEncoding::Utf16BE => encoding_rs::UTF_16BE.decode(bytes).0.into_owned(),
        }
    }
}

/// A sliding window over the stream: `(window_start_byte, bytes_in_window,
/// file_length_bytes, logical_position_byte, encoding)`, per spec.md §3.
struct Window {
    start: u64,
    data: Vec<u8>,
}

impl Window {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end()
    }
}

pub struct BidiByteReader {
    stream: Box<dyn SeekRead>,
    file_length_bytes: u64,
    encoding: Option<TextEncoding>,
    window: Window,
    /// Logical cursor; for `Forward` reads this is the offset to resume
    /// scanning from, for `Reverse` the offset just past the end of the
    /// previously-read line.
    position: u64,

    pub current_line: String,
    pub current_line_byte_offset_start: u64,
    pub current_line_byte_offset_end: u64,
    pub current_line_terminator: LineTerminator,
    current_line_raw: Vec<u8>,

    pub last_error: Option<String>,
}

impl BidiByteReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BidiReaderError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Self::from_stream(Box::new(file), len)
    }

    /// Synthesize an in-memory 8-bit (UTF-8) stream, per spec.md's
    /// `open_text_stream`.
    pub fn open_text_stream(text: &str) -> Result<Self, BidiReaderError> {
        let bytes = text.as_bytes().to_vec();
        let len = bytes.len() as u64;
        let mut reader = Self::from_stream(Box::new(Cursor::new(bytes)), len)?;
        reader.encoding = Some(TextEncoding::Utf8);
        Ok(reader)
    }

    /// Synthesize an in-memory stream from raw bytes, used for arbitrary
    /// encodings (e.g. UTF-16 fixtures) in tests and by accessors that
    /// reconstruct a fragment of a larger file.
    pub fn open_bytes(bytes: Vec<u8>) -> Result<Self, BidiReaderError> {
        let len = bytes.len() as u64;
        Self::from_stream(Box::new(Cursor::new(bytes)), len)
    }

    fn from_stream(stream: Box<dyn SeekRead>, file_length_bytes: u64) -> Result<Self, BidiReaderError> {
        Ok(BidiByteReader {
            stream,
            file_length_bytes,
            encoding: None,
            window: Window {
                start: 0,
                data: Vec::new(),
            },
            position: 0,
            current_line: String::new(),
            current_line_byte_offset_start: 0,
            current_line_byte_offset_end: 0,
            current_line_terminator: LineTerminator::None,
            current_line_raw: Vec::new(),
            last_error: None,
        })
    }

    pub fn close(&mut self) {
        self.window.data.clear();
    }

    pub fn file_length_bytes(&self) -> u64 {
        self.file_length_bytes
    }

    pub fn encoding(&mut self) -> Result<TextEncoding, BidiReaderError> {
        if let Some(enc) = self.encoding {
            return Ok(enc);
        }
        let enc = self.detect_encoding()?;
        self.encoding = Some(enc);
        Ok(enc)
    }

    /// BOM check, then heuristic zero-byte-position scan over up to 4 KiB,
    /// per spec.md §4.2.
    fn detect_encoding(&mut self) -> Result<TextEncoding, BidiReaderError> {
        let sniff_len = self.file_length_bytes.min(4096) as usize;
        let mut buf = vec![0u8; sniff_len];
        self.stream.seek(SeekFrom::Start(0))?;
        let n = read_fully(&mut self.stream, &mut buf)?;
        buf.truncate(n);

        if buf.starts_with(&[0xEF, 0xBB, 0xBF]) {
            return Ok(TextEncoding::Utf8);
        }
        if buf.starts_with(&[0xFF, 0xFE]) {
            return Ok(TextEncoding::Utf16LE);
        }
        if buf.starts_with(&[0xFE, 0xFF]) {
            return Ok(TextEncoding::Utf16BE);
        }

        if buf.len() >= 4 {
            let mut even_zero = 0usize;
            let mut odd_zero = 0usize;
            for (i, &b) in buf.iter().enumerate() {
                if b == 0 {
                    if i % 2 == 0 {
                        even_zero += 1;
                    } else {
                        odd_zero += 1;
                    }
                }
            }
            let total_pairs = buf.len() / 2;
            if total_pairs > 0 {
                let threshold = total_pairs / 4;
                if odd_zero > threshold && odd_zero > even_zero {
                    return Ok(TextEncoding::Utf16BE);
                }
                if even_zero > threshold && even_zero > odd_zero {
                    return Ok(TextEncoding::Utf16LE);
                }
            }
        }
        Ok(TextEncoding::Utf8)
    }

    pub fn move_to_beginning(&mut self) -> Result<(), BidiReaderError> {
        self.position = 0;
        Ok(())
    }

    pub fn move_to_end(&mut self) -> Result<(), BidiReaderError> {
        self.position = self.file_length_bytes;
        Ok(())
    }

    pub fn move_to_byte_offset(&mut self, offset: u64) -> Result<(), BidiReaderError> {
        if offset > self.file_length_bytes {
            return Err(BidiReaderError::OffsetOutOfRange(offset, self.file_length_bytes));
        }
        self.position = offset;
        Ok(())
    }

    pub fn current_line_text_bytes(&self) -> &[u8] {
        &self.current_line_raw
    }

    /// Ensure the window covers `[target, target + min_len)` as far as the
    /// stream allows, refilling from `target` if the byte is outside the
    /// current window. Re-entrant: callers loop calling this and scanning
    /// until a terminator is found or EOF/start is hit.
    fn ensure_window_forward(&mut self, target: u64) -> Result<(), BidiReaderError> {
        if self.window.contains(target) && target + 1 <= self.window.end() {
            return Ok(());
        }
        self.refill_from(target, DEFAULT_WINDOW)
    }

    fn ensure_window_reverse(&mut self, target: u64) -> Result<(), BidiReaderError> {
        if self.window.start <= target && target < self.window.end() {
            return Ok(());
        }
        let start = target.saturating_sub(DEFAULT_WINDOW as u64 - MAX_TERMINATOR_BYTES as u64);
        self.refill_from(start, DEFAULT_WINDOW)
    }

    fn refill_from(&mut self, start: u64, len: usize) -> Result<(), BidiReaderError> {
        let start = start.min(self.file_length_bytes);
        let want = len.min((self.file_length_bytes - start) as usize);
        let mut buf = vec![0u8; want];
        self.stream.seek(SeekFrom::Start(start))?;
        let n = read_fully(&mut self.stream, &mut buf)?;
        buf.truncate(n);
        self.window = Window { start, data: buf };
        Ok(())
    }

    fn byte_at(&mut self, offset: u64) -> Result<Option<u8>, BidiReaderError> {
        if offset >= self.file_length_bytes {
            return Ok(None);
        }
        if !self.window.contains(offset) {
            self.refill_from(offset.saturating_sub(MAX_TERMINATOR_BYTES as u64), DEFAULT_WINDOW)?;
        }
        if !self.window.contains(offset) {
            return Ok(None);
        }
        Ok(Some(self.window.data[(offset - self.window.start) as usize]))
    }

    /// Advance/retreat one line; fills `current_line*` fields. Returns
    /// `false` when there is no line in that direction (empty file, or past
    /// the respective end).
    pub fn read_line(&mut self, direction: Direction) -> Result<bool, BidiReaderError> {
        self.last_error = None;
        let result = match direction {
            Direction::Forward => self.read_line_forward(),
            Direction::Reverse => self.read_line_reverse(),
        };
        if let Err(ref e) = result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    fn read_line_forward(&mut self) -> Result<bool, BidiReaderError> {
        let encoding = self.encoding()?;
        let unit = encoding.code_unit_size() as u64;

        if self.position >= self.file_length_bytes {
            return Ok(false);
        }

        let start = self.position;
        let mut cursor = start;
        let (line_end, terminator) = loop {
            self.ensure_window_forward(cursor)?;
            match self.code_unit_value(cursor, encoding)? {
                None => break (cursor, LineTerminator::None),
                Some(0x0A) => break (cursor, LineTerminator::LF),
                Some(0x0D) => {
                    let next = cursor + unit;
                    self.ensure_window_forward(next)?;
                    if self.code_unit_value(next, encoding)? == Some(0x0A) {
                        break (next, LineTerminator::CRLF);
                    } else {
                        break (cursor, LineTerminator::CR);
                    }
                }
                Some(_) => {
                    cursor += unit;
                }
            }
        };

        let terminator_len_units: u64 = match terminator {
            LineTerminator::None => 0,
            LineTerminator::LF | LineTerminator::CR => 1,
            LineTerminator::CRLF => 2,
        };
        let content_end = line_end; // offset of first code unit of the terminator (or EOF)
        let next_position = if terminator == LineTerminator::None {
            self.file_length_bytes
        } else {
            content_end + terminator_len_units * unit
        };
        let offset_end = if terminator == LineTerminator::None {
            self.file_length_bytes.saturating_sub(1)
        } else {
            next_position.saturating_sub(1)
        };

        self.load_line_content(start, content_end, offset_end, terminator)?;
        self.position = next_position;
        Ok(true)
    }

    fn read_line_reverse(&mut self) -> Result<bool, BidiReaderError> {
        let encoding = self.encoding()?;
        let unit = encoding.code_unit_size() as u64;

        let scan_from = self.position.min(self.file_length_bytes);
        if scan_from == 0 {
            return Ok(false);
        }

        // Step 1: find the terminator ending the line immediately before
        // `scan_from`, walking backward. If `scan_from` lands exactly on a
        // terminator boundary we already consumed, back up past it first so
        // repeated Reverse calls make progress.
        let mut end_search = scan_from;

        // skip a trailing terminator directly behind scan_from, if any,
        // treating CRLF as one unit.
        if end_search >= unit {
            let prior = end_search - unit;
            self.ensure_window_reverse(prior)?;
            if self.code_unit_value(prior, encoding)? == Some(0x0A) {
                if end_search >= 2 * unit {
                    let before_lf = prior - unit;
                    self.ensure_window_reverse(before_lf)?;
                    if self.code_unit_value(before_lf, encoding)? == Some(0x0D) {
                        end_search = before_lf;
                    } else {
                        end_search = prior;
                    }
                } else {
                    end_search = prior;
                }
            } else if self.code_unit_value(prior, encoding)? == Some(0x0D) {
                end_search = prior;
            }
        }

        if end_search == 0 {
            // the only line in the file, with a terminator right after it
            self.position = 0;
            return self.emit_line_between(0, self.first_terminator_after(0, encoding)?, encoding);
        }

        let line_end = end_search; // exclusive end of this line's content
        let mut cursor = line_end;
        let line_start = loop {
            if cursor == 0 {
                break 0;
            }
            let prior = cursor - unit;
            self.ensure_window_reverse(prior)?;
            match self.code_unit_value(prior, encoding)? {
                Some(0x0A) => break cursor,
                Some(0x0D) => break cursor,
                _ => cursor = prior,
            }
        };

        let terminator = self.terminator_at(line_end, encoding)?;
        let terminator_len_units: u64 = match terminator {
            LineTerminator::None => 0,
            LineTerminator::LF | LineTerminator::CR => 1,
            LineTerminator::CRLF => 2,
        };
        let offset_end = if terminator == LineTerminator::None {
            line_end.saturating_sub(1)
        } else {
            (line_end + terminator_len_units * unit).saturating_sub(1)
        };

        self.load_line_content(line_start, line_end, offset_end, terminator)?;
        self.position = line_start;
        Ok(true)
    }

    fn first_terminator_after(&mut self, offset: u64, encoding: TextEncoding) -> Result<LineTerminator, BidiReaderError> {
        self.terminator_at(offset, encoding)
    }

    fn emit_line_between(&mut self, start: u64, _unused: LineTerminator, encoding: TextEncoding) -> Result<bool, BidiReaderError> {
        let terminator = self.terminator_at(start, encoding)?;
        let unit = encoding.code_unit_size() as u64;
        let terminator_len_units: u64 = match terminator {
            LineTerminator::None => 0,
            LineTerminator::LF | LineTerminator::CR => 1,
            LineTerminator::CRLF => 2,
        };
        let offset_end = if terminator == LineTerminator::None {
            self.file_length_bytes.saturating_sub(1)
        } else {
            (start + terminator_len_units * unit).saturating_sub(1)
        };
        self.load_line_content(start, start, offset_end, terminator)?;
        Ok(true)
    }

    /// Determine what terminator (if any) begins at `offset`.
    fn terminator_at(&mut self, offset: u64, encoding: TextEncoding) -> Result<LineTerminator, BidiReaderError> {
        let unit = encoding.code_unit_size() as u64;
        self.ensure_window_forward(offset)?;
        match self.code_unit_value(offset, encoding)? {
            Some(0x0D) => {
                let next = offset + unit;
                self.ensure_window_forward(next)?;
                if self.code_unit_value(next, encoding)? == Some(0x0A) {
                    Ok(LineTerminator::CRLF)
                } else {
                    Ok(LineTerminator::CR)
                }
            }
            Some(0x0A) => Ok(LineTerminator::LF),
            _ => Ok(LineTerminator::None),
        }
    }

    fn load_line_content(
        &mut self,
        start: u64,
        content_end: u64,
        offset_end: u64,
        terminator: LineTerminator,
    ) -> Result<(), BidiReaderError> {
        let len = (content_end - start) as usize;
        let mut raw = vec![0u8; len];
        if len > 0 {
            self.stream.seek(SeekFrom::Start(start))?;
            let n = read_fully(&mut self.stream, &mut raw)?;
            raw.truncate(n);
        }
        let encoding = self.encoding()?;
        self.current_line = encoding.decode(&raw);
        self.current_line_raw = raw;
        self.current_line_byte_offset_start = start;
        self.current_line_byte_offset_end = offset_end;
        self.current_line_terminator = terminator;
        Ok(())
    }

    fn code_unit_value(&mut self, offset: u64, encoding: TextEncoding) -> Result<Option<u16>, BidiReaderError> {
        match encoding {
            TextEncoding::Utf8 => Ok(self.byte_at(offset)?.map(|b| b as u16)),
            TextEncoding::Utf16LE => {
                let lo = self.byte_at(offset)?;
                let hi = self.byte_at(offset + 1)?;
                match (lo, hi) {
                    (Some(lo), Some(hi)) => Ok(Some(u16::from_le_bytes([lo, hi]))),
                    _ => Ok(None),
                }
            }
            TextEncoding::Utf16BE => {
                let hi = self.byte_at(offset)?;
                let lo = self.byte_at(offset + 1)?;
                match (hi, lo) {
                    (Some(hi), Some(lo)) => Ok(Some(u16::from_be_bytes([hi, lo]))),
                    _ => Ok(None),
                }
            }
        }
    }
}

fn read_fully(stream: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match stream.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stream_has_no_lines() {
        let mut r = BidiByteReader::open_text_stream("").unwrap();
        assert!(!r.read_line(Direction::Forward).unwrap());
        r.move_to_end().unwrap();
        assert!(!r.read_line(Direction::Reverse).unwrap());
    }

    #[test]
    fn forward_reads_lf_cr_crlf_and_missing_terminator() {
        let mut r = BidiByteReader::open_text_stream("alpha\nbeta\rgamma\r\ndelta").unwrap();

        assert!(r.read_line(Direction::Forward).unwrap());
        assert_eq!(r.current_line, "alpha");
        assert_eq!(r.current_line_terminator, LineTerminator::LF);
        assert_eq!(r.current_line_byte_offset_start, 0);

        assert!(r.read_line(Direction::Forward).unwrap());
        assert_eq!(r.current_line, "beta");
        assert_eq!(r.current_line_terminator, LineTerminator::CR);

        assert!(r.read_line(Direction::Forward).unwrap());
        assert_eq!(r.current_line, "gamma");
        assert_eq!(r.current_line_terminator, LineTerminator::CRLF);

        assert!(r.read_line(Direction::Forward).unwrap());
        assert_eq!(r.current_line, "delta");
        assert_eq!(r.current_line_terminator, LineTerminator::None);

        assert!(!r.read_line(Direction::Forward).unwrap());
    }

    #[test]
    fn reverse_mirrors_forward_for_the_last_line() {
        let mut r = BidiByteReader::open_text_stream("one\ntwo\nthree").unwrap();
        r.move_to_end().unwrap();
        assert!(r.read_line(Direction::Reverse).unwrap());
        assert_eq!(r.current_line, "three");
        assert!(r.read_line(Direction::Reverse).unwrap());
        assert_eq!(r.current_line, "two");
        assert!(r.read_line(Direction::Reverse).unwrap());
        assert_eq!(r.current_line, "one");
        assert!(!r.read_line(Direction::Reverse).unwrap());
    }

    #[test]
    fn round_trip_reverse_then_forward_returns_to_start() {
        let mut r = BidiByteReader::open_text_stream("one\ntwo\nthree\n").unwrap();
        assert!(r.read_line(Direction::Forward).unwrap());
        assert!(r.read_line(Direction::Forward).unwrap());
        let (line, start, end) = (
            r.current_line.clone(),
            r.current_line_byte_offset_start,
            r.current_line_byte_offset_end,
        );
        assert_eq!(line, "two");

        // move just past the line we just read, then reverse back onto it,
        // then forward again: should land on the identical line/offsets.
        r.move_to_byte_offset(end + 1).unwrap();
        assert!(r.read_line(Direction::Reverse).unwrap());
        assert_eq!(r.current_line, "two");
        assert_eq!(r.current_line_byte_offset_start, start);
        assert_eq!(r.current_line_byte_offset_end, end);

        r.move_to_byte_offset(start).unwrap();
        assert!(r.read_line(Direction::Forward).unwrap());
        assert_eq!(r.current_line, line);
        assert_eq!(r.current_line_byte_offset_start, start);
        assert_eq!(r.current_line_byte_offset_end, end);
    }

    #[test]
    fn mid_line_offset_forward_reads_containing_line() {
        let mut r = BidiByteReader::open_text_stream("abcdef\nghij\n").unwrap();
        r.move_to_byte_offset(3).unwrap(); // lands inside "abcdef"
        assert!(r.read_line(Direction::Forward).unwrap());
        assert_eq!(r.current_line, "def");
    }

    #[test]
    fn detects_utf16le_bom_and_decodes_lines() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "ab\ncd".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let mut r = BidiByteReader::open_bytes(bytes).unwrap();
        assert_eq!(r.encoding().unwrap(), TextEncoding::Utf16LE);
        assert!(r.read_line(Direction::Forward).unwrap());
        assert_eq!(r.current_line, "ab");
        assert!(r.read_line(Direction::Forward).unwrap());
        assert_eq!(r.current_line, "cd");
    }

    #[test]
    fn detects_utf16be_bom_and_decodes_lines() {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in "xy\nzw".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let mut r = BidiByteReader::open_bytes(bytes).unwrap();
        assert_eq!(r.encoding().unwrap(), TextEncoding::Utf16BE);
        assert!(r.read_line(Direction::Forward).unwrap());
        assert_eq!(r.current_line, "xy");
    }

    #[test]
    fn move_to_byte_offset_past_end_is_rejected() {
        let mut r = BidiByteReader::open_text_stream("short").unwrap();
        assert!(r.move_to_byte_offset(1_000).is_err());
    }
}
