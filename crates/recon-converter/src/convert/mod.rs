//! Tabular conversion: header validation and `;`-delimited serialization
//!
//! Everything here is pure. Bytes in, bytes out; the pipeline owns all I/O.

pub mod profile;

use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use thiserror::Error;

pub use profile::{ChannelProfile, ConversionRules, RenameRule};

/// Field delimiter expected by the destination partners
pub const DELIMITER: u8 = b';';

/// Errors raised while converting rows
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Header does not match the expected layout: got {actual:?}, expected {expected:?}")]
    HeaderMismatch {
        actual: Vec<String>,
        expected: Vec<String>,
    },

    #[error("Sheet has no data rows")]
    Empty,

    #[error("Delimited text error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Rows ready for serialization, plus the pre-conversion data row count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRows {
    /// Header first, then data rows
    pub rows: Vec<Vec<String>>,
    pub data_rows: usize,
}

/// Check a header row against the expected layout
///
/// The length must match exactly and every column except the last declared
/// one must be equal (ordered, case-sensitive). The last column is not
/// compared because partners ship it under varying titles.
pub fn validate_header<S: AsRef<str>>(rows: &[Vec<String>], expected: &[S]) -> bool {
    let Some(header) = rows.first() else {
        return false;
    };
    if header.len() != expected.len() {
        return false;
    }
    header
        .iter()
        .zip(expected)
        .take(expected.len().saturating_sub(1))
        .all(|(actual, wanted)| actual == wanted.as_ref())
}

/// Apply a profile's rules to the raw sheet rows
///
/// Validates the header when the profile declares one, drops the trailing
/// summary row when the profile has one, and counts the data rows.
pub fn prepare_rows(mut rows: Vec<Vec<String>>, rules: &ConversionRules) -> Result<PreparedRows> {
    if rows.is_empty() {
        return Err(ConvertError::Empty);
    }

    if let Some(expected) = rules.expected_header {
        if !validate_header(&rows, expected) {
            return Err(ConvertError::HeaderMismatch {
                actual: rows.first().cloned().unwrap_or_default(),
                expected: expected.iter().map(|s| s.to_string()).collect(),
            });
        }
    }

    if rules.drop_trailing_summary && rows.len() > 1 {
        rows.pop();
    }

    let data_rows = rows.len().saturating_sub(1);
    if data_rows == 0 {
        return Err(ConvertError::Empty);
    }

    Ok(PreparedRows { rows, data_rows })
}

/// Serialize rows as `;`-delimited text
///
/// The first row sets the column count. A later row with exactly one fewer
/// field gets an empty trailing field, since the workbook reader drops
/// trailing empty cells. A blank row (a gap in the sheet) is written as a
/// record of empty fields so it survives a re-read and is counted. Rows are
/// written in order, unchanged otherwise.
pub fn serialize(rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let columns = rows.first().map(Vec::len).unwrap_or(0);
    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER)
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .flexible(true)
        .from_writer(Vec::new());

    for row in rows {
        if row.is_empty() {
            writer.write_record(std::iter::repeat("").take(columns.max(1)))?;
        } else if row.len() + 1 == columns {
            writer.write_record(row.iter().map(String::as_str).chain(std::iter::once("")))?;
        } else {
            writer.write_record(row)?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| ConvertError::Io(e.into_error()))
}

/// Parse `;`-delimited text back into rows
pub fn deserialize(bytes: &[u8]) -> Result<Vec<Vec<String>>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    reader
        .records()
        .map(|record| -> Result<Vec<String>> { Ok(record?.iter().map(str::to_string).collect()) })
        .collect()
}

/// Count the data rows of delivered `;`-delimited text (all records minus the header)
pub fn count_data_rows<R: std::io::Read>(reader: R) -> Result<usize> {
    let mut reader = ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = 0usize;
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        records += 1;
    }
    Ok(records.saturating_sub(1))
}
