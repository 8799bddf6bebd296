//! Coding-form export: delimited text and a single-sheet xlsx workbook.
//!
//! Both exports are rectangular: the header row first, then one row per
//! document, every row exactly `headers.len()` cells wide.

use super::CodingForm;
use crate::error::AideError;
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Worksheet name used in exported workbooks.
pub const SHEET_NAME: &str = "Final Coding Form";

/// Export format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

/// `aide_final_coding_form_<YYYY-MM-DD>.<ext>` for today's local date.
pub fn default_file_name(format: ExportFormat) -> String {
    format!(
        "aide_final_coding_form_{}.{}",
        chrono::Local::now().format("%Y-%m-%d"),
        format.extension()
    )
}

/// Serialise the form as delimited text.
///
/// Values containing the delimiter, a quote or a newline are quoted with
/// embedded quotes doubled; everything else is written bare.
pub fn to_delimited(form: &CodingForm, delimiter: u8) -> Result<String, AideError> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .flexible(false)
        .from_writer(Vec::new());

    for row in form.to_table() {
        wtr.write_record(&row)
            .map_err(|e| AideError::Export(e.to_string()))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| AideError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| AideError::Export(e.to_string()))
}

/// Serialise the form as an Office Open XML workbook with one worksheet.
pub fn to_xlsx(form: &CodingForm) -> Result<Vec<u8>, AideError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let parts: [(&str, String); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES.to_string()),
        ("_rels/.rels", ROOT_RELS.to_string()),
        ("xl/workbook.xml", workbook_xml()),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS.to_string()),
        ("xl/worksheets/sheet1.xml", sheet_xml(form)),
    ];

    for (name, body) in parts {
        zip.start_file(name, options)
            .map_err(|e| AideError::Export(e.to_string()))?;
        zip.write_all(body.as_bytes())
            .map_err(|e| AideError::Export(e.to_string()))?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| AideError::Export(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Write the form to `path` in the given format.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub fn write_to_path(
    form: &CodingForm,
    format: ExportFormat,
    path: impl AsRef<Path>,
) -> Result<(), AideError> {
    let path = path.as_ref();
    let bytes = match format {
        ExportFormat::Csv => to_delimited(form, b',')?.into_bytes(),
        ExportFormat::Xlsx => to_xlsx(form)?,
    };

    let write_err = |source: std::io::Error| AideError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&bytes).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    info!(
        "Exported {} rows × {} columns to {}",
        form.row_count(),
        form.headers().len(),
        path.display()
    );
    Ok(())
}

/// Fixed-width text rendering for terminal review, with 1-based row numbers.
pub fn to_text_table(form: &CodingForm, max_col_width: usize) -> String {
    let max_col_width = max_col_width.max(4);
    let clip = |s: &str| -> String {
        let flat = s.replace(['\n', '\r'], " ");
        if flat.chars().count() > max_col_width {
            let cut: String = flat.chars().take(max_col_width - 1).collect();
            format!("{cut}\u{2026}")
        } else {
            flat
        }
    };

    let mut widths: Vec<usize> = form
        .headers()
        .iter()
        .map(|h| clip(h).chars().count())
        .collect();
    for row in form.rows() {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(clip(cell).chars().count());
        }
    }
    let num_width = form.row_count().to_string().len().max(1);

    let line = |num: &str, cells: &[String]| -> String {
        let mut out = format!("{num:>num_width$} │");
        for (cell, w) in cells.iter().zip(&widths) {
            let c = clip(cell);
            let pad = w.saturating_sub(c.chars().count());
            out.push(' ');
            out.push_str(&c);
            out.push_str(&" ".repeat(pad));
            out.push_str(" │");
        }
        out
    };

    let mut out = line("#", form.headers());
    out.push('\n');
    for (i, row) in form.rows().iter().enumerate() {
        out.push_str(&line(&(i + 1).to_string(), row));
        out.push('\n');
    }
    out
}

// ── OOXML parts ──────────────────────────────────────────────────────────

const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#;

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

fn workbook_xml() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
        xml_escape(SHEET_NAME)
    )
}

fn sheet_xml(form: &CodingForm) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in form.to_table().iter().enumerate() {
        let row_num = r + 1;
        xml.push_str(&format!(r#"<row r="{row_num}">"#));
        // Empty cells are written too, so blank rows stay inside the sheet range.
        for (c, value) in row.iter().enumerate() {
            xml.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                column_letters(c),
                row_num,
                xml_escape(value)
            ));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

/// 0 → "A", 25 → "Z", 26 → "AA".
fn column_letters(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Control characters other than tab/newline are not allowed in XML 1.0.
            c if (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}
