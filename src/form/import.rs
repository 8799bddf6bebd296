//! Coding-form import from delimited text and spreadsheet workbooks.
//!
//! Both paths reduce the source to a plain `Vec<Vec<String>>` table and hand
//! it to [`CodingForm::from_table`], so header normalisation and row shaping
//! live in one place regardless of where the table came from.

use super::CodingForm;
use crate::error::AideError;
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, info};

/// The recognised tabular source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    /// Delimited text with the given single-byte delimiter.
    Delimited(u8),
    /// xlsx / xlsm / xls / ods workbook; only the first sheet is read.
    Workbook,
}

impl TabularFormat {
    /// Detect the format from a file name's extension.
    pub fn from_file_name(name: &str) -> Result<Self, AideError> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Ok(TabularFormat::Delimited(b',')),
            "tsv" | "tab" => Ok(TabularFormat::Delimited(b'\t')),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Ok(TabularFormat::Workbook),
            _ => Err(AideError::UnsupportedFormat { extension: ext }),
        }
    }
}

/// Import a coding form from a file on disk, detecting the format by extension.
pub fn load_path(path: impl AsRef<Path>) -> Result<CodingForm, AideError> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let format = TabularFormat::from_file_name(&name)?;

    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AideError::FileNotFound {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::PermissionDenied => AideError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => AideError::Import {
            source_name: name.clone(),
            detail: e.to_string(),
        },
    })?;

    let form = load_bytes(&bytes, format, &name)?;
    info!(
        "Imported coding form '{}': {} prompts, {} rows",
        name,
        form.headers().len(),
        form.row_count()
    );
    Ok(form)
}

/// Import a coding form from in-memory bytes in a known format.
pub fn load_bytes(
    bytes: &[u8],
    format: TabularFormat,
    source_name: &str,
) -> Result<CodingForm, AideError> {
    let table = match format {
        TabularFormat::Delimited(delimiter) => read_delimited(bytes, delimiter, source_name)?,
        TabularFormat::Workbook => read_workbook(bytes, source_name)?,
    };
    CodingForm::from_table(table, source_name)
}

/// Import a coding form from any CSV reader.
pub fn load_csv<R: Read>(reader: R, source_name: &str) -> Result<CodingForm, AideError> {
    let table = read_delimited_from(reader, b',', source_name)?;
    CodingForm::from_table(table, source_name)
}

fn read_delimited(
    bytes: &[u8],
    delimiter: u8,
    source_name: &str,
) -> Result<Vec<Vec<String>>, AideError> {
    // Excel writes a UTF-8 BOM in front of CSV exports.
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    read_delimited_from(bytes, delimiter, source_name)
}

fn read_delimited_from<R: Read>(
    reader: R,
    delimiter: u8,
    source_name: &str,
) -> Result<Vec<Vec<String>>, AideError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader);

    let mut table = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| AideError::Import {
            source_name: source_name.to_string(),
            detail: e.to_string(),
        })?;
        table.push(record.iter().map(str::to_string).collect());
    }
    debug!("Read {} delimited records from '{}'", table.len(), source_name);
    Ok(table)
}

fn read_workbook(bytes: &[u8], source_name: &str) -> Result<Vec<Vec<String>>, AideError> {
    let import_err = |detail: String| AideError::Import {
        source_name: source_name.to_string(),
        detail,
    };

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| import_err(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| import_err("workbook has no worksheets".into()))?
        .map_err(|e| import_err(e.to_string()))?;

    let table: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();
    debug!("Read {} worksheet rows from '{}'", table.len(), source_name);
    Ok(table)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}
