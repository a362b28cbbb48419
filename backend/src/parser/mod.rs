//! CSV format detection and reading.
//!
//! [`detect_format`] sniffs encoding and delimiter from a byte sample;
//! [`parse_bytes`] then reads the whole file into [`RawRecord`]s using the
//! sniffed format. No postal-specific logic here.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::{ParseError, ParseResult, SniffError, SniffResult};
use crate::models::RawRecord;

/// Default number of bytes inspected by the sniffer.
pub const DEFAULT_SAMPLE_BYTES: usize = 64 * 1024;

/// Default number of rows inspected per delimiter candidate.
pub const DEFAULT_MAX_SAMPLE_ROWS: usize = 50;

/// Delimiter candidates, in tie-break priority order.
pub const DELIMITER_CANDIDATES: [u8; 4] = [b';', b',', b'\t', b'|'];

/// Share of sampled rows that must agree on the modal field count.
const MIN_CONSISTENCY: f64 = 0.8;

/// UTF-8 byte order mark.
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

// =============================================================================
// Format
// =============================================================================

/// Text encodings the engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Encoding {
    Utf8,
    Utf8Bom,
    Latin1,
    Windows1252,
}

impl Encoding {
    /// IANA-style label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Utf8Bom => "utf-8-sig",
            Self::Latin1 => "iso-8859-1",
            Self::Windows1252 => "windows-1252",
        }
    }

    /// Charset parameter for a `Content-Type` header.
    pub fn charset(&self) -> &'static str {
        match self {
            Self::Utf8 | Self::Utf8Bom => "utf-8",
            Self::Latin1 => "iso-8859-1",
            Self::Windows1252 => "windows-1252",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Encoding and delimiter of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFormat {
    pub encoding: Encoding,
    pub delimiter: u8,
}

impl FileFormat {
    pub fn delimiter_char(&self) -> char {
        self.delimiter as char
    }
}

/// Human-readable delimiter for display.
pub fn format_delimiter(d: u8) -> &'static str {
    match d {
        b';' => ";",
        b',' => ",",
        b'\t' => "TAB",
        b'|' => "|",
        _ => "?",
    }
}

// =============================================================================
// Encoding detection
// =============================================================================

/// Ask chardet which single-byte encoding the bytes most likely use.
fn guess_single_byte(bytes: &[u8]) -> Encoding {
    let charset = chardet::detect(bytes).0;
    match charset.to_lowercase().as_str() {
        "windows-1252" | "cp1252" => Encoding::Windows1252,
        _ => Encoding::Latin1,
    }
}

/// Encodings to try for a sample, in priority order.
fn encoding_candidates(sample: &[u8]) -> Vec<Encoding> {
    let mut candidates = Vec::with_capacity(4);
    if sample.starts_with(UTF8_BOM) {
        candidates.push(Encoding::Utf8Bom);
    }
    candidates.push(Encoding::Utf8);
    let single_byte = guess_single_byte(sample);
    candidates.push(single_byte);
    if single_byte != Encoding::Latin1 {
        candidates.push(Encoding::Latin1);
    }
    candidates
}

/// Decode a sample, tolerating a multi-byte sequence cut at the end of it.
fn decode_sample(sample: &[u8], encoding: Encoding) -> Option<String> {
    let text = match encoding {
        Encoding::Utf8Bom => decode_utf8_prefix(sample.strip_prefix(UTF8_BOM)?)?,
        Encoding::Utf8 => decode_utf8_prefix(sample)?,
        _ => decode_content(sample, encoding).into_owned(),
    };
    if text.contains('\0') {
        return None;
    }
    Some(text)
}

fn decode_utf8_prefix(bytes: &[u8]) -> Option<String> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s.to_string()),
        // error_len() is None only for a sequence truncated by the end of input
        Err(e) if e.error_len().is_none() => {
            Some(String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned())
        }
        Err(_) => None,
    }
}

/// Decode bytes with a known encoding.
///
/// Single-byte encodings cannot fail; UTF-8 falls back to lossy decoding, so
/// callers that care should check with [`is_valid_for`] first.
pub fn decode_content(bytes: &[u8], encoding: Encoding) -> Cow<'_, str> {
    match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(bytes),
        Encoding::Utf8Bom => String::from_utf8_lossy(bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)),
        Encoding::Latin1 => encoding_rs::mem::decode_latin1(bytes),
        Encoding::Windows1252 => encoding_rs::WINDOWS_1252.decode_without_bom_handling(bytes).0,
    }
}

/// Whether the bytes decode without loss in this encoding.
pub fn is_valid_for(bytes: &[u8], encoding: Encoding) -> bool {
    match encoding {
        Encoding::Utf8 => std::str::from_utf8(bytes).is_ok(),
        Encoding::Utf8Bom => std::str::from_utf8(bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)).is_ok(),
        Encoding::Latin1 | Encoding::Windows1252 => true,
    }
}

// =============================================================================
// Delimiter detection
// =============================================================================

/// How well a delimiter splits the sample.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DelimiterScore {
    delimiter: u8,
    modal_fields: usize,
    consistency: f64,
}

/// Drop a final line that the sample boundary may have cut short.
fn complete_lines(text: &str) -> &str {
    if text.ends_with('\n') {
        return text;
    }
    match text.rfind('\n') {
        Some(pos) => &text[..=pos],
        None => text,
    }
}

fn score_delimiter(text: &str, delimiter: u8, max_rows: usize) -> Option<DelimiterScore> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let counts: Vec<usize> = reader
        .records()
        .take(max_rows)
        // an unparsable row counts as a row with zero fields
        .map(|r| r.map(|rec| rec.len()).unwrap_or(0))
        .collect();

    if counts.is_empty() {
        return None;
    }

    let mut tally: Vec<(usize, usize)> = Vec::new();
    for &c in &counts {
        match tally.iter_mut().find(|(n, _)| *n == c) {
            Some((_, freq)) => *freq += 1,
            None => tally.push((c, 1)),
        }
    }
    let (modal_fields, freq) = tally
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))?;

    Some(DelimiterScore {
        delimiter,
        modal_fields,
        consistency: freq as f64 / counts.len() as f64,
    })
}

/// Pick the delimiter with the most consistent column count.
///
/// Returns `None` when no candidate splits rows into at least two fields
/// consistently.
pub fn detect_delimiter(text: &str, max_rows: usize) -> Option<u8> {
    let text = complete_lines(text);
    let mut best: Option<DelimiterScore> = None;

    for &candidate in &DELIMITER_CANDIDATES {
        let Some(score) = score_delimiter(text, candidate, max_rows) else {
            continue;
        };
        if score.modal_fields < 2 || score.consistency < MIN_CONSISTENCY {
            continue;
        }
        // strict comparison: earlier candidates win ties
        if best.map_or(true, |b| score.consistency > b.consistency) {
            best = Some(score);
        }
    }

    best.map(|s| s.delimiter)
}

/// Detect encoding and delimiter from a byte sample.
///
/// Deterministic for a given sample. Fails with [`SniffError`] when no
/// candidate encoding yields text that some candidate delimiter splits
/// consistently.
///
/// # Example
/// ```ignore
/// let format = detect_format(b"NOME;CEP\nAna;01310-100\n")?;
/// assert_eq!(format.delimiter, b';');
/// ```
pub fn detect_format(sample: &[u8]) -> SniffResult<FileFormat> {
    detect_format_with(sample, DEFAULT_MAX_SAMPLE_ROWS)
}

/// [`detect_format`] with an explicit row budget.
pub fn detect_format_with(sample: &[u8], max_rows: usize) -> SniffResult<FileFormat> {
    if sample.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(SniffError::Empty);
    }

    let mut decoded_any = false;
    for encoding in encoding_candidates(sample) {
        let Some(text) = decode_sample(sample, encoding) else {
            continue;
        };
        decoded_any = true;
        if let Some(delimiter) = detect_delimiter(&text, max_rows) {
            tracing::debug!(%encoding, delimiter = format_delimiter(delimiter), "format detected");
            return Ok(FileFormat {
                encoding,
                delimiter,
            });
        }
    }

    if !decoded_any {
        return Err(SniffError::NoEncoding);
    }
    Err(SniffError::NoDelimiter {
        tried: DELIMITER_CANDIDATES
            .iter()
            .map(|d| format!("'{}'", format_delimiter(*d)))
            .collect::<Vec<_>>()
            .join(", "),
    })
}

// =============================================================================
// Reading
// =============================================================================

/// A fully read file.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    /// Effective format (may differ from the sniffed one, see [`parse_bytes`]).
    pub format: FileFormat,
    /// Column headers, trimmed.
    pub headers: Arc<Vec<String>>,
    /// Non-empty data rows in file order.
    pub records: Vec<RawRecord>,
}

/// Read all records with a known format.
///
/// The sniffer only sees a sample; if bytes past it turn out not to be valid
/// UTF-8 the whole file is read as Windows-1252 instead, and the returned
/// format says so.
pub fn parse_bytes(bytes: &[u8], format: FileFormat) -> ParseResult<ParsedFile> {
    let mut format = format;
    let mut bytes = bytes;
    if !is_valid_for(bytes, format.encoding) {
        tracing::warn!(
            sniffed = %format.encoding,
            "file is not valid {} past the sample, reading as windows-1252",
            format.encoding
        );
        // a BOM decoded as windows-1252 would end up in the first header
        if format.encoding == Encoding::Utf8Bom {
            bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        }
        format.encoding = Encoding::Windows1252;
    }
    let text = decode_content(bytes, format.encoding);
    parse_text(&text, format)
}

/// Read all records from already-decoded text.
pub fn parse_text(text: &str, format: FileFormat) -> ParseResult<ParsedFile> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(format.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error(&e))?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(ParseError::NoHeaders);
    }
    let headers = Arc::new(headers);

    let mut records = Vec::new();
    let mut fallback_line = 1usize;
    for result in reader.records() {
        let record = result.map_err(|e| csv_error(&e))?;
        fallback_line += 1;
        if record.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(fallback_line);
        let values = record.iter().map(str::to_string).collect();
        records.push(RawRecord::new(line, Arc::clone(&headers), values));
    }

    Ok(ParsedFile {
        format,
        headers,
        records,
    })
}

fn csv_error(err: &csv::Error) -> ParseError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    ParseError::Csv {
        line,
        message: err.to_string(),
    }
}

/// Sniff a prefix of the bytes, then read all of them.
pub fn parse_bytes_auto(bytes: &[u8], sample_bytes: usize) -> ParseResult<ParsedFile> {
    let sample = &bytes[..bytes.len().min(sample_bytes)];
    let format = detect_format(sample)?;
    parse_bytes(bytes, format)
}

/// Read a file from disk with auto-detection of encoding and delimiter.
pub fn parse_file_auto<P: AsRef<Path>>(path: P, sample_bytes: usize) -> ParseResult<ParsedFile> {
    let bytes = std::fs::read(path.as_ref())?;
    parse_bytes_auto(&bytes, sample_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_semicolon_utf8() {
        let format = detect_format(b"NOME;CEP;CIDADE\nAna;01310-100;S\xC3\xA3o Paulo\n").unwrap();
        assert_eq!(format.encoding, Encoding::Utf8);
        assert_eq!(format.delimiter, b';');
    }

    #[test]
    fn test_detect_comma() {
        let format = detect_format(b"a,b,c\n1,2,3\n4,5,6\n").unwrap();
        assert_eq!(format.delimiter, b',');
    }

    #[test]
    fn test_detect_tab() {
        let format = detect_format(b"a\tb\tc\n1\t2\t3").unwrap();
        assert_eq!(format.delimiter, b'\t');
    }

    #[test]
    fn test_detect_pipe() {
        let format = detect_format(b"a|b|c\n1|2|3").unwrap();
        assert_eq!(format.delimiter, b'|');
    }

    #[test]
    fn test_consistency_beats_frequency() {
        // commas appear more often but in varying numbers per row
        let sample = b"NOME;ENDERECO\nAna;Rua A, 10, fundos\nBia;Rua B\nCai;Rua C, 3\n";
        assert_eq!(detect_format(sample).unwrap().delimiter, b';');
    }

    #[test]
    fn test_tie_broken_by_priority() {
        let sample = b"a;b,c\n1;2,3\n";
        assert_eq!(detect_format(sample).unwrap().delimiter, b';');
    }

    #[test]
    fn test_quoted_delimiters_ignored() {
        let sample = b"NOME,ENDERECO\n\"Silva; Ana\",\"Rua A; 10\"\nBia,Rua B\n";
        assert_eq!(detect_format(sample).unwrap().delimiter, b',');
    }

    #[test]
    fn test_detect_utf8_bom() {
        let format = detect_format(b"\xEF\xBB\xBFNOME;CEP\nAna;01310100\n").unwrap();
        assert_eq!(format.encoding, Encoding::Utf8Bom);
    }

    #[test]
    fn test_detect_single_byte_fallback() {
        // "São" in ISO-8859-1 is not valid UTF-8
        let format = detect_format(b"NOME;CIDADE\nAna;S\xE3o Paulo\n").unwrap();
        assert!(matches!(format.encoding, Encoding::Latin1 | Encoding::Windows1252));
    }

    #[test]
    fn test_truncated_multibyte_at_sample_end() {
        // sample cut in the middle of "ã" (C3 A3)
        let sample = b"NOME;CIDADE\nAna;Paulo\nBia;S\xC3";
        assert_eq!(detect_format(sample).unwrap().encoding, Encoding::Utf8);
    }

    #[test]
    fn test_truncated_last_line_ignored() {
        let sample = b"a;b;c\n1;2;3\n4;5;6\n7;8";
        assert_eq!(detect_format(sample).unwrap().delimiter, b';');
    }

    #[test]
    fn test_empty_sample() {
        assert_eq!(detect_format(b""), Err(SniffError::Empty));
        assert_eq!(detect_format(b"  \n"), Err(SniffError::Empty));
    }

    #[test]
    fn test_single_column_is_unreadable() {
        assert!(matches!(
            detect_format(b"name\nAna\nBia\n"),
            Err(SniffError::NoDelimiter { .. })
        ));
    }

    #[test]
    fn test_binary_is_unreadable() {
        assert_eq!(detect_format(b"\x00\x01\x02;\x00"), Err(SniffError::NoEncoding));
    }

    #[test]
    fn test_detect_is_deterministic() {
        let sample = b"NOME;CEP\nAna;01310-100\nBia;20040-020\n";
        assert_eq!(detect_format(sample), detect_format(sample));
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        assert_eq!(decode_content(bytes, Encoding::Latin1), "Société");
    }

    #[test]
    fn test_parse_records_with_line_numbers() {
        let csv = "NOME;CEP\nAna;01310-100\n;\nBia;20040020\n";
        let format = FileFormat {
            encoding: Encoding::Utf8,
            delimiter: b';',
        };
        let parsed = parse_bytes(csv.as_bytes(), format).unwrap();

        assert_eq!(parsed.headers.as_slice(), ["NOME", "CEP"]);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].row_index, 2);
        assert_eq!(parsed.records[1].row_index, 4);
        assert_eq!(parsed.records[1].get("CEP"), Some("20040020"));
    }

    #[test]
    fn test_parse_quoted_multiline_field() {
        let csv = "NOME;OBS\n\"Ana\";\"linha 1\nlinha 2\"\nBia;x\n";
        let format = FileFormat {
            encoding: Encoding::Utf8,
            delimiter: b';',
        };
        let parsed = parse_bytes(csv.as_bytes(), format).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].get("OBS"), Some("linha 1\nlinha 2"));
        assert_eq!(parsed.records[1].row_index, 4);
    }

    #[test]
    fn test_parse_switches_encoding_past_sample() {
        let mut bytes = b"NOME;CIDADE\nAna;Paulo\n".to_vec();
        bytes.extend_from_slice(b"Bia;S\xE3o Paulo\n");
        let format = FileFormat {
            encoding: Encoding::Utf8,
            delimiter: b';',
        };
        let parsed = parse_bytes(&bytes, format).unwrap();
        assert_eq!(parsed.format.encoding, Encoding::Windows1252);
        assert_eq!(parsed.records[1].get("CIDADE"), Some("São Paulo"));
    }

    #[test]
    fn test_bom_file_switching_encoding_keeps_headers() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"NOME;CEP;CIDADE\n");
        for i in 0..3000 {
            bytes.extend_from_slice(format!("Ana {};01310-100;Sao Paulo\n", i).as_bytes());
        }
        assert!(bytes.len() > DEFAULT_SAMPLE_BYTES);
        bytes.extend_from_slice(b"Jo\xe3o;01310-100;S\xe3o Paulo\n");

        let parsed = parse_bytes_auto(&bytes, DEFAULT_SAMPLE_BYTES).unwrap();
        assert_eq!(parsed.format.encoding, Encoding::Windows1252);
        assert_eq!(parsed.headers.as_slice(), ["NOME", "CEP", "CIDADE"]);
        assert_eq!(parsed.records.len(), 3001);
        assert_eq!(parsed.records[3000].get("NOME"), Some("João"));
    }

    #[test]
    fn test_auto_parse() {
        let csv = "name;age\nAlice;30\nBob;25";
        let result = parse_bytes_auto(csv.as_bytes(), DEFAULT_SAMPLE_BYTES).unwrap();

        assert_eq!(result.format.delimiter, b';');
        assert_eq!(result.records.len(), 2);
        assert_eq!(result.headers.as_slice(), ["name", "age"]);
    }

    #[test]
    fn test_auto_parse_empty_file() {
        assert!(matches!(
            parse_bytes_auto(b"", DEFAULT_SAMPLE_BYTES),
            Err(ParseError::Unreadable(SniffError::Empty))
        ));
    }
}
