//! CSV Writer - serialise the (optionally corrected) rows back to bytes.
//!
//! The output mirrors the input file: same header, same row order, same
//! delimiter and encoding. A cell is written exactly as read unless a
//! Correction replaces it; whitespace cleanup is itself a format-rule
//! Correction. Corrections to identification fields (postal code, document,
//! phone, name) are always applied. Address fields (street, neighborhood,
//! city, state) are only rewritten when the caller opts in, whatever the
//! correction's source.

use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::borrow::Cow;
use std::collections::HashMap;

use crate::error::WriteResult;
use crate::models::{CanonicalField, RawRecord, Report};
use crate::normalize::strip_accent;
use crate::parser::{Encoding, FileFormat, ParsedFile, UTF8_BOM};

/// Serialise rows with the report's corrections.
pub fn write_csv(
    headers: &[String],
    rows: &[RawRecord],
    report: &Report,
    apply_address_corrections: bool,
    format: FileFormat,
) -> WriteResult<Vec<u8>> {
    // Report order puts a row's lookup corrections after its format ones,
    // so the lookup value wins when both touch a field.
    let mut replacements: HashMap<(usize, CanonicalField), &str> = HashMap::new();
    for correction in &report.corrections {
        if correction.field.is_address() && !apply_address_corrections {
            continue;
        }
        replacements.insert(
            (correction.row_index, correction.field),
            correction.suggested_value.as_str(),
        );
    }

    let mut writer = WriterBuilder::new()
        .delimiter(format.delimiter)
        .terminator(Terminator::CRLF)
        .quote_style(QuoteStyle::Necessary)
        .flexible(true)
        .from_writer(Vec::new());

    writer.write_record(headers)?;

    for row in rows {
        let width = headers.len().max(row.values().len());
        let cells = (0..width).map(|i| {
            let replaced = report
                .mapping
                .field_at(i)
                .and_then(|field| replacements.get(&(row.row_index, field)).copied());
            replaced.or(row.value_at(i)).unwrap_or("")
        });
        writer.write_record(cells)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(encode(&text, format.encoding))
}

/// [`write_csv`] for a file read by the parser.
pub fn write_file(file: &ParsedFile, report: &Report, apply_address_corrections: bool) -> WriteResult<Vec<u8>> {
    write_csv(
        &file.headers,
        &file.records,
        report,
        apply_address_corrections,
        file.format,
    )
}

fn representable(c: char, encoding: Encoding) -> bool {
    match encoding {
        Encoding::Utf8 | Encoding::Utf8Bom => true,
        Encoding::Latin1 => (c as u32) <= 0xFF,
        Encoding::Windows1252 => {
            c.is_ascii() || {
                let mut buf = [0u8; 4];
                let (_, _, had_errors) = encoding_rs::WINDOWS_1252.encode(c.encode_utf8(&mut buf));
                !had_errors
            }
        }
    }
}

/// Replace characters the target encoding lacks: accented letters lose
/// their accent, anything else becomes `?`.
fn transliterate(text: &str, encoding: Encoding) -> Cow<'_, str> {
    if text.chars().all(|c| representable(c, encoding)) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.chars()
            .map(|c| {
                if representable(c, encoding) {
                    return c;
                }
                let base = strip_accent(c);
                if base != c && representable(base, encoding) {
                    base
                } else {
                    '?'
                }
            })
            .collect(),
    )
}

/// Encode text for output in the file's original encoding.
pub fn encode(text: &str, encoding: Encoding) -> Vec<u8> {
    let text = transliterate(text, encoding);
    match encoding {
        Encoding::Utf8 => text.into_owned().into_bytes(),
        Encoding::Utf8Bom => {
            let mut out = Vec::with_capacity(UTF8_BOM.len() + text.len());
            out.extend_from_slice(UTF8_BOM);
            out.extend_from_slice(text.as_bytes());
            out
        }
        Encoding::Latin1 => encoding_rs::mem::encode_latin1_lossy(&text).into_owned(),
        Encoding::Windows1252 => encoding_rs::WINDOWS_1252.encode(&text).0.into_owned(),
    }
}
