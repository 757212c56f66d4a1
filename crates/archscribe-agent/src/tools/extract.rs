// ABOUTME: Turns a file on disk into text for the model: size guard, binary sniffing, encoding detection.
// ABOUTME: Notebooks, Word documents, spreadsheets, and PDFs go through format-specific extraction.

use std::fs;
use std::io::Read;
use std::path::Path;

use calamine::Reader as _;
use quick_xml::events::Event;
use thiserror::Error;

/// Files above this size are refused before any decoding.
pub const MAX_FILE_BYTES: u64 = 20 * 1000 * 1024;
const BINARY_SNIFF_BYTES: usize = 8 * 1024;
const MAX_SHEET_ROWS: usize = 500;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("File too large ({size} bytes, limit {MAX_FILE_BYTES} bytes)")]
    TooLarge { size: u64 },

    #[error("Cannot read binary file")]
    Binary,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("failed to extract {format} content: {message}")]
    Format {
        format: &'static str,
        message: String,
    },
}

impl ExtractError {
    fn format(format: &'static str, message: impl ToString) -> Self {
        ExtractError::Format {
            format,
            message: message.to_string(),
        }
    }
}

/// Read `path` as text, choosing an extractor by extension.
pub fn extract_text(path: &Path) -> Result<String, ExtractError> {
    let size = fs::metadata(path)?.len();
    if size > MAX_FILE_BYTES {
        return Err(ExtractError::TooLarge { size });
    }

    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "ipynb" => extract_notebook(path),
        "docx" => extract_docx(path),
        "xlsx" | "xls" | "ods" => extract_spreadsheet(path),
        "pdf" => pdf_extract::extract_text(path).map_err(|e| ExtractError::format("pdf", e)),
        _ => decode_text(&fs::read(path)?),
    }
}

/// Decode raw bytes: BOMs first, then UTF-8, then whatever legacy encoding
/// the detector settles on.
pub fn decode_text(bytes: &[u8]) -> Result<String, ExtractError> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return Ok(String::from_utf8_lossy(rest).into_owned());
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return Ok(decode_utf16(rest, u16::from_le_bytes));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return Ok(decode_utf16(rest, u16::from_be_bytes));
    }

    let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
    if sniff.contains(&0) {
        return Err(ExtractError::Binary);
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(text.to_string());
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, false);
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        tracing::debug!(encoding = encoding.name(), "lossy decode of legacy-encoded file");
    }
    Ok(text.into_owned())
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| to_unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn cell_source(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => parts.iter().filter_map(|p| p.as_str()).collect(),
        _ => String::new(),
    }
}

/// Markdown and code cell sources, in order.
fn extract_notebook(path: &Path) -> Result<String, ExtractError> {
    let raw = fs::read_to_string(path)?;
    let notebook: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| ExtractError::format("ipynb", e))?;
    let cells = notebook
        .get("cells")
        .and_then(|c| c.as_array())
        .ok_or_else(|| ExtractError::format("ipynb", "missing cells array"))?;

    let sections: Vec<String> = cells
        .iter()
        .filter(|cell| {
            matches!(
                cell.get("cell_type").and_then(|t| t.as_str()),
                Some("markdown") | Some("code")
            )
        })
        .map(|cell| cell.get("source").map(cell_source).unwrap_or_default())
        .filter(|source| !source.trim().is_empty())
        .collect();
    Ok(sections.join("\n\n"))
}

/// Paragraph text from `word/document.xml`.
fn extract_docx(path: &Path) -> Result<String, ExtractError> {
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| ExtractError::format("docx", e))?;
    let mut document = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::format("docx", "missing word/document.xml"))?
        .read_to_string(&mut document)?;

    let mut reader = quick_xml::Reader::from_str(&document);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !current.is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                let text = e.unescape().map_err(|e| ExtractError::format("docx", e))?;
                current.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::format("docx", e)),
            _ => {}
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}

/// Every sheet, rows tab-separated, each sheet capped at a fixed row count.
fn extract_spreadsheet(path: &Path) -> Result<String, ExtractError> {
    let mut workbook =
        calamine::open_workbook_auto(path).map_err(|e| ExtractError::format("spreadsheet", e))?;
    let names: Vec<String> = workbook.sheet_names().to_vec();

    let mut out = String::new();
    for name in names {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!(sheet = %name, error = %e, "skipping unreadable sheet");
                continue;
            }
        };
        out.push_str(&format!("--- Sheet: {name} ---\n"));
        let total = range.height();
        for row in range.rows().take(MAX_SHEET_ROWS) {
            let cells: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }
        if total > MAX_SHEET_ROWS {
            out.push_str(&format!("... {} more rows\n", total - MAX_SHEET_ROWS));
        }
        out.push('\n');
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn utf8_with_and_without_bom() {
        assert_eq!(decode_text(b"hello").unwrap(), "hello");
        assert_eq!(decode_text(b"\xEF\xBB\xBFhello").unwrap(), "hello");
    }

    #[test]
    fn utf16_boms_are_decoded() {
        let le = [0xFF, 0xFE, b'h', 0, b'i', 0];
        let be = [0xFE, 0xFF, 0, b'h', 0, b'i'];
        assert_eq!(decode_text(&le).unwrap(), "hi");
        assert_eq!(decode_text(&be).unwrap(), "hi");
    }

    #[test]
    fn western_legacy_text_is_detected() {
        let text = "Le café est très chaud, à déguster près du feu.";
        let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode(text);
        assert_eq!(decode_text(&bytes).unwrap(), text);
    }

    #[test]
    fn gbk_source_is_decoded() {
        let source = "// 这是一个用于测试编码检测的中文注释，里面包含足够多的汉字。\n\
                      fn main() {\n    println!(\"你好，世界！欢迎使用架构图生成工具。\");\n}\n";
        let (bytes, _, had_errors) = encoding_rs::GBK.encode(source);
        assert!(!had_errors);
        assert!(std::str::from_utf8(&bytes).is_err());
        assert_eq!(decode_text(&bytes).unwrap(), source);
    }

    #[test]
    fn nul_byte_marks_binary() {
        assert!(matches!(
            decode_text(b"\x7fELF\x02\x01\x00\x00"),
            Err(ExtractError::Binary)
        ));
    }

    #[test]
    fn oversize_file_is_refused_before_reading() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.log");
        let file = fs::File::create(&path).unwrap();
        file.set_len(MAX_FILE_BYTES + 1).unwrap();
        assert!(matches!(
            extract_text(&path),
            Err(ExtractError::TooLarge { size }) if size == MAX_FILE_BYTES + 1
        ));
    }

    #[test]
    fn notebook_cells_are_joined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("analysis.ipynb");
        fs::write(
            &path,
            r##"{"cells": [
                {"cell_type": "markdown", "source": ["# Title\n", "intro"]},
                {"cell_type": "raw", "source": "ignored"},
                {"cell_type": "code", "source": "import pandas as pd", "outputs": []}
            ]}"##,
        )
        .unwrap();
        assert_eq!(
            extract_text(&path).unwrap(),
            "# Title\nintro\n\nimport pandas as pd"
        );
    }

    #[test]
    fn docx_paragraphs_are_extracted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("design.docx");
        let file = fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(
            br#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Gateway</w:t></w:r><w:r><w:t> talks to</w:t></w:r></w:p><w:p><w:r><w:t>the &amp; store</w:t></w:r></w:p></w:body></w:document>"#,
        )
        .unwrap();
        zip.finish().unwrap();

        assert_eq!(extract_text(&path).unwrap(), "Gateway talks to\nthe & store");
    }

    #[test]
    fn docx_without_document_part_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.docx");
        let file = fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.finish().unwrap();
        assert!(matches!(
            extract_text(&path),
            Err(ExtractError::Format { format: "docx", .. })
        ));
    }
}
