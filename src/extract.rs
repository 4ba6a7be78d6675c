//! Text extraction for letter documents (PDF, DOCX, legacy DOC) and row
//! extraction for catalogue workbooks (XLSX).
//!
//! Callers supply bytes + content-type; this module returns plain UTF-8 text
//! or rows of cell strings. Nothing here panics on malformed input.

use std::io::Read;
use std::path::Path;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
/// Sized for a full IBcatalogue sheet (~340k rows).
const MAX_XML_ENTRY_BYTES: u64 = 200 * 1024 * 1024;
/// Cells kept from one worksheet before the import is refused.
const XLSX_MAX_CELLS_PER_SHEET: usize = 15_000_000;
/// Cells past this column are ignored.
const XLSX_MAX_COLUMNS: usize = 256;
/// Shortest run of printable characters kept from a legacy .doc body.
const DOC_MIN_RUN: usize = 6;
const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("DOC extraction failed: {0}")]
    Doc(String),
}

/// Map a letter file extension to the content-type used by [`extract_text`].
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "doc" => Some(MIME_DOC),
        "xlsx" => Some(MIME_XLSX),
        _ => None,
    }
}

/// Extracts plain text from a letter document.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_DOC => extract_doc(bytes),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_paragraph_text(&doc_xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => out.push('\t'),
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Best-effort text recovery from a Word 97-2003 binary document.
///
/// The body text of a `.doc` is stored either as UTF-16LE or as 8-bit
/// characters inside the OLE container; collect printable runs in both
/// encodings and keep whichever recovers more text.
fn extract_doc(bytes: &[u8]) -> Result<String, ExtractError> {
    if !bytes.starts_with(&OLE_MAGIC) {
        return Err(ExtractError::Doc(
            "not an OLE2 compound document".to_string(),
        ));
    }

    let wide = printable_runs_utf16(bytes);
    let narrow = printable_runs_8bit(bytes);
    let text = if letter_count(&wide) >= letter_count(&narrow) {
        wide
    } else {
        narrow
    };

    if text.trim().is_empty() {
        return Err(ExtractError::Doc("no text found".to_string()));
    }
    Ok(text)
}

fn is_text_char(c: char) -> bool {
    (c.is_alphanumeric() || c.is_ascii_punctuation() || c == ' ' || c == '\t')
        && !c.is_control()
}

fn push_run(out: &mut Vec<String>, run: &mut String) {
    let trimmed = run.trim();
    if trimmed.chars().count() >= DOC_MIN_RUN && trimmed.chars().any(|c| c.is_alphabetic()) {
        out.push(trimmed.to_string());
    }
    run.clear();
}

fn printable_runs_utf16(bytes: &[u8]) -> String {
    let mut runs = Vec::new();
    let mut run = String::new();
    for pair in bytes.chunks_exact(2) {
        let unit = u16::from_le_bytes([pair[0], pair[1]]);
        match char::from_u32(unit as u32) {
            Some(c) if is_text_char(c) => run.push(c),
            _ => push_run(&mut runs, &mut run),
        }
    }
    push_run(&mut runs, &mut run);
    runs.join("\n")
}

fn printable_runs_8bit(bytes: &[u8]) -> String {
    let mut runs = Vec::new();
    let mut run = String::new();
    for &b in bytes {
        // Latin-1 maps byte values straight onto code points.
        let c = char::from(b);
        if is_text_char(c) {
            run.push(c);
        } else {
            push_run(&mut runs, &mut run);
        }
    }
    push_run(&mut runs, &mut run);
    runs.join("\n")
}

fn letter_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_alphabetic()).count()
}

/// Reads the first worksheet of an XLSX workbook as rows of cell strings.
///
/// Column positions are preserved: a row with cells in A and C yields
/// `["a", "", "c"]`. Shared strings, inline strings and raw values are
/// all resolved to text.
///
/// The whole sheet is held in memory. Columns past `XLSX_MAX_COLUMNS` are
/// dropped and a sheet with more than `XLSX_MAX_CELLS_PER_SHEET` cells is an
/// error rather than a silently truncated import.
pub fn read_xlsx_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheet = list_worksheet_names(&archive)
        .into_iter()
        .next()
        .ok_or_else(|| ExtractError::Ooxml("workbook has no worksheets".to_string()))?;
    let sheet_xml = read_zip_entry_bounded(&mut archive, &sheet, MAX_XML_ENTRY_BYTES)?;
    parse_sheet_rows(&sheet_xml, &shared_strings, XLSX_MAX_CELLS_PER_SHEET)
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current.clear(),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                // Rich-text items split one string across several <t> runs.
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn list_worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Zero-based column index from a cell reference such as `"AB12"`.
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: String = cell_ref
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut idx = 0usize;
    for c in letters.chars() {
        idx = idx * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(idx - 1)
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Shared,
    Literal,
}

fn parse_sheet_rows(
    xml: &[u8],
    shared_strings: &[String],
    max_cells: usize,
) -> Result<Vec<Vec<String>>, ExtractError> {
    use quick_xml::events::Event;

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut cell_col = 0usize;
    let mut cell_kind = CellKind::Literal;
    let mut cell_text = String::new();
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    cell_col = row.len();
                    cell_kind = CellKind::Literal;
                    cell_text.clear();
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"r" => {
                                if let Some(col) = column_index(&String::from_utf8_lossy(&attr.value)) {
                                    cell_col = col;
                                }
                            }
                            b"t" if attr.value.as_ref() == b"s" => cell_kind = CellKind::Shared,
                            _ => {}
                        }
                    }
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => rows.push(Vec::new()),
            Ok(Event::Text(te)) if in_value => {
                cell_text.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" if cell_col >= XLSX_MAX_COLUMNS => {}
                b"c" => {
                    cell_count += 1;
                    if cell_count > max_cells {
                        return Err(ExtractError::Ooxml(format!(
                            "worksheet exceeds {} cells",
                            max_cells
                        )));
                    }
                    let value = match cell_kind {
                        CellKind::Shared => cell_text
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default(),
                        CellKind::Literal => cell_text.clone(),
                    };
                    if row.len() <= cell_col {
                        row.resize(cell_col + 1, String::new());
                    }
                    row[cell_col] = value;
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>\
            <w:p><w:r><w:t>End of commercialization</w:t></w:r></w:p>\
            <w:p><w:r><w:t>PIX 2B</w:t></w:r><w:r><w:t xml:space=\"preserve\"> switchgear</w:t></w:r></w:p>\
            </w:body></w:document>";
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let text = extract_text(&bytes, MIME_DOCX).unwrap();
        assert_eq!(text, "End of commercialization\nPIX 2B switchgear");
    }

    #[test]
    fn doc_requires_ole_container() {
        let err = extract_text(b"plain bytes", MIME_DOC).unwrap_err();
        assert!(matches!(err, ExtractError::Doc(_)));
    }

    #[test]
    fn doc_recovers_utf16_text() {
        let mut bytes = OLE_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 24]);
        for unit in "Withdrawal of Masterpact NT".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.extend_from_slice(&[0u8; 8]);
        let text = extract_text(&bytes, MIME_DOC).unwrap();
        assert!(text.contains("Withdrawal of Masterpact NT"), "got: {}", text);
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for_path(Path::new("a/b.PDF")), Some(MIME_PDF));
        assert_eq!(content_type_for_path(Path::new("x.doc")), Some(MIME_DOC));
        assert_eq!(content_type_for_path(Path::new("x.txt")), None);
    }

    #[test]
    fn column_letters_to_index() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("C7"), Some(2));
        assert_eq!(column_index("AA3"), Some(26));
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn xlsx_rows_preserve_columns() {
        let shared = "<sst><si><t>PRODUCT_IDENTIFIER</t></si><si><r><t>RANGE</t></r><r><t>_LABEL</t></r></si><si><t>PIX</t></si></sst>";
        let sheet = "<worksheet><sheetData>\
            <row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"B1\" t=\"s\"><v>1</v></c></row>\
            <row r=\"2\"><c r=\"A2\" t=\"inlineStr\"><is><t>PIX2B-001</t></is></c><c r=\"C2\"><v>42</v></c></row>\
            <row r=\"3\"><c r=\"B3\" t=\"s\"><v>2</v></c></row>\
            </sheetData></worksheet>";
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let rows = read_xlsx_rows(&bytes).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec!["PRODUCT_IDENTIFIER", "RANGE_LABEL"]);
        assert_eq!(rows[1], vec!["PIX2B-001", "", "42"]);
        assert_eq!(rows[2], vec!["", "PIX"]);
    }

    #[test]
    fn sheet_cell_cap_is_an_error() {
        let sheet = b"<worksheet><sheetData>\
            <row r=\"1\"><c r=\"A1\"><v>1</v></c><c r=\"B1\"><v>2</v></c></row>\
            <row r=\"2\"><c r=\"A2\"><v>3</v></c></row>\
            </sheetData></worksheet>";
        assert_eq!(parse_sheet_rows(sheet, &[], 3).unwrap().len(), 2);
        let err = parse_sheet_rows(sheet, &[], 2).unwrap_err();
        assert!(err.to_string().contains("exceeds 2 cells"), "{}", err);
    }

    #[test]
    fn far_columns_are_ignored() {
        let sheet = b"<worksheet><sheetData>\
            <row r=\"1\"><c r=\"A1\"><v>id</v></c><c r=\"XFD1\"><v>far</v></c></row>\
            </sheetData></worksheet>";
        let rows = parse_sheet_rows(sheet, &[], 10).unwrap();
        assert_eq!(rows, vec![vec!["id".to_string()]]);
    }
}
