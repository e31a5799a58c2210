//! Document loading: raw uploaded bytes to [`TextUnit`]s.
//!
//! | Format     | Unit per              | Locator                        |
//! |------------|-----------------------|--------------------------------|
//! | PDF        | page with text        | 1-based page number            |
//! | DOCX       | non-empty paragraph   | 1-based paragraph ordinal      |
//! | Plain text | whole file            | none                           |
//!
//! Blank pages and paragraphs are skipped without renumbering the rest, so a
//! locator always points at the same place in the original document. There is
//! no OCR: an image-only PDF yields no units.

use crate::error::{LoadError, LoadErrorKind};
use quarry_context::TextUnit;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::Path;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Document formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    PlainText,
    Unknown,
}

impl DocumentFormat {
    /// Detect the format from the file extension, then the declared MIME type.
    pub fn detect(file_name: &str, declared_type: Option<&str>) -> Self {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("pdf") => return Self::Pdf,
            Some("docx") | Some("doc") => return Self::Docx,
            Some("txt") | Some("text") | Some("md") | Some("markdown") => return Self::PlainText,
            _ => {}
        }

        let mime = declared_type
            .and_then(|t| t.split(';').next())
            .map(|t| t.trim().to_ascii_lowercase());
        match mime.as_deref() {
            Some("application/pdf") => Self::Pdf,
            Some(DOCX_MIME) | Some("application/msword") => Self::Docx,
            Some(t) if t.starts_with("text/") => Self::PlainText,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::PlainText => "text",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One file of an upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub declared_type: Option<String>,
}

impl UploadedFile {
    pub fn new(bytes: impl Into<Vec<u8>>, file_name: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            file_name: file_name.into(),
            declared_type: None,
        }
    }

    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }

    /// Read a file from disk, naming it by its final path component.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(bytes, file_name))
    }
}

/// What to do when one file of a batch fails to load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure in the [`LoadReport`] and keep going
    #[default]
    SkipAndReport,
    /// Abort the batch on the first failure
    FailFast,
}

/// A document that was loaded successfully.
#[derive(Debug, Clone, Serialize)]
pub struct LoadedDocument {
    pub file_name: String,
    pub format: DocumentFormat,
    /// BLAKE3 digest of the raw bytes, hex encoded
    pub fingerprint: String,
    pub unit_count: usize,
}

/// Outcome of [`load_batch`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Units of every loaded document, in upload order
    pub units: Vec<TextUnit>,
    pub documents: Vec<LoadedDocument>,
    pub failures: Vec<LoadError>,
    /// Files skipped because their bytes matched an earlier file of the batch
    pub duplicates: Vec<String>,
}

/// Convert one uploaded file into text units.
pub fn load(
    bytes: &[u8],
    file_name: &str,
    declared_type: Option<&str>,
) -> Result<Vec<TextUnit>, LoadError> {
    load_as(bytes, file_name, DocumentFormat::detect(file_name, declared_type))
}

fn load_as(
    bytes: &[u8],
    file_name: &str,
    format: DocumentFormat,
) -> Result<Vec<TextUnit>, LoadError> {
    tracing::debug!("Loading {} as {} ({} bytes)", file_name, format, bytes.len());

    let units = match format {
        DocumentFormat::Pdf => load_pdf(bytes, file_name)?,
        DocumentFormat::Docx => load_docx(bytes, file_name)?,
        DocumentFormat::PlainText => load_plain_text(bytes, file_name),
        DocumentFormat::Unknown => match load_pdf(bytes, file_name) {
            Ok(units) => units,
            Err(err) => {
                tracing::debug!("{} is not a PDF ({}), reading as text", file_name, err.kind);
                load_plain_text(bytes, file_name)
            }
        },
    };

    tracing::debug!("Loaded {} text units from {}", units.len(), file_name);
    Ok(units)
}

/// Load every file of an upload.
///
/// Files whose bytes were already seen earlier in the same batch are skipped.
pub fn load_batch(files: &[UploadedFile], policy: FailurePolicy) -> Result<LoadReport, LoadError> {
    let mut report = LoadReport::default();
    let mut seen = HashSet::new();

    for file in files {
        let fingerprint = blake3::hash(&file.bytes).to_hex().to_string();
        if !seen.insert(fingerprint.clone()) {
            tracing::warn!("Skipping {}: duplicate of an earlier file", file.file_name);
            report.duplicates.push(file.file_name.clone());
            continue;
        }

        let format = DocumentFormat::detect(&file.file_name, file.declared_type.as_deref());
        match load_as(&file.bytes, &file.file_name, format) {
            Ok(units) => {
                if units.is_empty() {
                    tracing::warn!("{} contains no extractable text", file.file_name);
                }
                report.documents.push(LoadedDocument {
                    file_name: file.file_name.clone(),
                    format,
                    fingerprint,
                    unit_count: units.len(),
                });
                report.units.extend(units);
            }
            Err(err) if policy == FailurePolicy::SkipAndReport => {
                tracing::warn!("{}", err);
                report.failures.push(err);
            }
            Err(err) => return Err(err),
        }
    }

    tracing::info!(
        "Loaded {} documents ({} units), {} failed, {} duplicates",
        report.documents.len(),
        report.units.len(),
        report.failures.len(),
        report.duplicates.len()
    );
    Ok(report)
}

fn load_pdf(bytes: &[u8], file_name: &str) -> Result<Vec<TextUnit>, LoadError> {
    let document =
        lopdf::Document::load_mem(bytes).map_err(|e| LoadError::new(file_name, e))?;

    let mut units = Vec::new();
    for page_number in document.get_pages().into_keys() {
        let text = match document.extract_text(&[page_number]) {
            Ok(text) => normalize_text(&text),
            Err(err) => {
                tracing::warn!(
                    "{}: no extractable text on page {} ({})",
                    file_name,
                    page_number,
                    err
                );
                continue;
            }
        };
        if text.is_empty() {
            tracing::debug!("{}: page {} is blank, skipping", file_name, page_number);
            continue;
        }
        units.push(TextUnit::new(text, file_name, Some(page_number)));
    }
    Ok(units)
}

fn load_docx(bytes: &[u8], file_name: &str) -> Result<Vec<TextUnit>, LoadError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| LoadError::new(file_name, e))?;

    let mut xml = String::new();
    match archive.by_name("word/document.xml") {
        Ok(mut entry) => {
            entry
                .read_to_string(&mut xml)
                .map_err(|e| LoadError::new(file_name, e))?;
        }
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(LoadError::new(
                file_name,
                LoadErrorKind::MissingDocumentXml,
            ));
        }
        Err(e) => return Err(LoadError::new(file_name, e)),
    }

    let paragraphs = docx_paragraphs(&xml).map_err(|e| LoadError::new(file_name, e))?;
    let units = paragraphs
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(ordinal, text)| TextUnit::new(text, file_name, Some(ordinal as u32 + 1)))
        .collect();
    Ok(units)
}

/// Text of every `w:p` in document order, including empty ones.
fn docx_paragraphs(xml: &str) -> Result<Vec<String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:p" => depth += 1,
                b"w:t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:p" if depth == 0 => paragraphs.push(String::new()),
                b"w:tab" if depth > 0 => current.push('\t'),
                b"w:br" | b"w:cr" if depth > 0 => current.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text && depth > 0 => current.push_str(&t.unescape()?),
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(paragraphs)
}

fn load_plain_text(bytes: &[u8], file_name: &str) -> Vec<TextUnit> {
    let decoded = match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
        // Latin-1 maps every byte to the code point of the same value
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    };

    let text = decoded.replace("\r\n", "\n");
    if text.trim().is_empty() {
        return Vec::new();
    }
    vec![TextUnit::new(text, file_name, None)]
}

/// Normalize extracted page text: unified line endings, no trailing spaces,
/// no leading or trailing blank lines.
fn normalize_text(text: &str) -> String {
    let lines: Vec<&str> = text
        .split('\n')
        .map(|line| line.trim_end_matches(['\r', ' ', '\t']))
        .collect();
    lines.join("\n").trim().to_string()
}
