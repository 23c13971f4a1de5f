//! Text extraction for indexed files.
//!
//! Dispatches on file extension. Plain-text formats are decoded as UTF-8
//! (lossily); PDF goes through `pdf-extract`; DOCX, PPTX and XLSX are read
//! as ZIP archives and their XML text runs collected with `quick-xml`.
//! Extraction never panics: failures come back as [`ExtractError`] and the
//! caller skips the document.

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::{BytesText, Event};
use thiserror::Error;

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Zip-bomb guard for a single archive entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("binary file with no text extractor")]
    Binary,
}

impl From<zip::result::ZipError> for ExtractError {
    fn from(e: zip::result::ZipError) -> Self {
        ExtractError::Ooxml(e.to_string())
    }
}

impl From<quick_xml::Error> for ExtractError {
    fn from(e: quick_xml::Error) -> Self {
        ExtractError::Ooxml(e.to_string())
    }
}

/// Document format inferred from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Pdf,
    Docx,
    Pptx,
    Xlsx,
}

impl Format {
    pub fn from_path(path: &Path) -> Format {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => Format::Pdf,
            "docx" => Format::Docx,
            "pptx" => Format::Pptx,
            "xlsx" => Format::Xlsx,
            _ => Format::Text,
        }
    }
}

/// Extract plain text from the raw bytes of the file at `path`.
pub fn extract_text(path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
    match Format::from_path(path) {
        Format::Text => decode_text(bytes),
        Format::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
        }
        Format::Docx => extract_docx(bytes),
        Format::Pptx => extract_pptx(bytes),
        Format::Xlsx => extract_xlsx(bytes),
    }
}

/// Decode text, rejecting content that looks binary (NUL in the first 8 KiB).
fn decode_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let head = &bytes[..bytes.len().min(8192)];
    if head.contains(&0) {
        return Err(ExtractError::Binary);
    }
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!("{} exceeds size limit", name)));
    }
    Ok(out)
}

/// Entries named `{prefix}{N}.xml`, sorted by N.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|n| {
        n[prefix.len()..n.len() - 4]
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn unescaped(text: &BytesText<'_>) -> Result<String, ExtractError> {
    text.unescape()
        .map(|t| t.into_owned())
        .map_err(|e| ExtractError::Ooxml(e.to_string()))
}

/// Concatenate the text of every `<*:t>` element.
fn text_runs(xml: &[u8], separator: &str) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut runs: Vec<String> = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_t = true,
            Event::End(e) if e.local_name().as_ref() == b"t" => in_t = false,
            Event::Text(t) if in_t => {
                let text = unescaped(&t)?;
                if !text.is_empty() {
                    runs.push(text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(runs.join(separator))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    text_runs(&xml, "")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut slides = Vec::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_entry(&mut archive, &name)?;
        let text = text_runs(&xml, " ")?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => shared_strings(&xml)?,
        Err(_) => Vec::new(),
    };
    let mut sheets = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry(&mut archive, &name)?;
        let cells = sheet_cells(&xml, &shared)?;
        if !cells.is_empty() {
            sheets.push(cells);
        }
    }
    Ok(sheets.join("\n\n"))
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Event::Text(t) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&unescaped(&t)?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell values of one worksheet. Shared-string cells are resolved; numeric
/// and inline values are kept verbatim.
fn sheet_cells(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut cells = Vec::new();
    let mut is_shared = false;
    let mut in_value = false;
    while cells.len() < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"c" => {
                    is_shared = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    })
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Event::End(e) => {
                if matches!(e.local_name().as_ref(), b"v" | b"t") {
                    in_value = false;
                }
            }
            Event::Text(t) if in_value => {
                let raw = unescaped(&t)?;
                let value = raw.trim();
                if is_shared {
                    if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                        cells.push(s.clone());
                    }
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}
