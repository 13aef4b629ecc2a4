//! Uploaded files: classification, local storage and text extraction.
//!
//! PDF and OCR extraction shell out to `pdftotext` and `tesseract`; DOCX is
//! read in-process from `word/document.xml`.

use std::{
    io::{Cursor, Read},
    path::{Path, PathBuf},
    process::Stdio,
    sync::OnceLock,
};

use regex::Regex;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::{errors::Error, Result};

/// Characters of extracted text kept in the thread history.
pub const HISTORY_TEXT_CHARS: usize = 8_000;
/// Characters of extracted document text sent to the model.
pub const MODEL_INPUT_CHARS: usize = 15_000;

pub const DOCUMENT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Briefly structure the recognized text: \
add a title, key points as a list and, if needed, clarifying questions. Use Markdown. \
Do not use # headers; make headers bold (**Header**) instead.";

pub const PHOTO_SYSTEM_PROMPT: &str = "You are a helpful assistant. Turn the text into a readable form: \
keep paragraphs and lists. Use Markdown. \
Do not use # headers; make headers bold (**Header**) instead.";

pub const DEFAULT_PHOTO_TASK: &str =
    "Transcribe the text from the photo into print and structure it.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Pdf,
    Docx,
    Image,
    Binary,
}

impl MediaKind {
    /// Classify by extension (with leading dot) and optional MIME type.
    pub fn guess(ext: &str, mime: Option<&str>) -> Self {
        if mime.is_some_and(|m| m.to_lowercase().contains("pdf")) {
            return MediaKind::Pdf;
        }
        match ext.to_lowercase().as_str() {
            ".pdf" => MediaKind::Pdf,
            ".docx" => MediaKind::Docx,
            ".png" | ".jpg" | ".jpeg" | ".webp" | ".tif" | ".tiff" => MediaKind::Image,
            _ => MediaKind::Binary,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Pdf => "pdf",
            MediaKind::Docx => "docx",
            MediaKind::Image => "image",
            MediaKind::Binary => "bin",
        }
    }
}

/// Lowercased extension of `name` including the dot, or `""`.
pub fn file_extension(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!(".{}", ext.to_lowercase())
        }
        _ => String::new(),
    }
}

/// MIME type for the vision data URL, from the file extension.
pub fn image_mime(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        ".png" => "image/png",
        ".webp" => "image/webp",
        ".tif" | ".tiff" => "image/tiff",
        _ => "image/jpeg",
    }
}

pub fn check_size(len: u64, max_mb: u64) -> Result<()> {
    if len > max_mb.saturating_mul(1024 * 1024) {
        return Err(Error::FileTooLarge {
            size: len,
            limit_mb: max_mb,
        });
    }
    Ok(())
}

/// `{prefix}_{unix}{ext}`.
pub fn stored_file_name(prefix: &str, ext: &str, unix_seconds: i64) -> String {
    format!("{prefix}_{unix_seconds}{ext}")
}

/// Write `bytes` to `dir/name`, creating `dir` if needed.
pub async fn save_local(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    debug!(path = %path.display(), size = bytes.len(), "Saved upload");
    Ok(path)
}

/// Text layer of a PDF via `pdftotext -layout - -`.
pub async fn extract_pdf(bytes: &[u8]) -> Result<String> {
    run_filter("pdftotext", &["-layout", "-", "-"], bytes).await
}

/// OCR via `tesseract stdin stdout -l <lang>`.
pub async fn ocr_tesseract(bytes: &[u8], lang: &str) -> Result<String> {
    run_filter("tesseract", &["stdin", "stdout", "-l", lang], bytes).await
}

/// Pipe `input` through an external program and return its stdout.
async fn run_filter(program: &str, args: &[&str], input: &[u8]) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::External(format!("{program} is not installed or not on PATH"))
            }
            _ => Error::Io(e),
        })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::External(format!("{program} stdin was not captured")))?;
    let input = input.to_vec();
    // Feed stdin concurrently so a full stdout pipe cannot deadlock us.
    let writer = tokio::spawn(async move {
        let res = stdin.write_all(&input).await;
        drop(stdin);
        res
    });

    let out = child.wait_with_output().await?;
    if let Ok(Err(e)) = writer.await {
        // The program may exit before reading everything (bad input).
        debug!(program, error = %e, "stdin write ended early");
    }

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr);
        let snippet: String = stderr.trim().chars().take(200).collect();
        warn!(program, status = %out.status, "External extractor failed");
        return Err(Error::External(format!(
            "{program} failed ({}): {snippet}",
            out.status
        )));
    }

    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

struct DocxRules {
    paragraph: Regex,
    run: Regex,
}

fn docx_rules() -> &'static DocxRules {
    static RULES: OnceLock<DocxRules> = OnceLock::new();
    RULES.get_or_init(|| DocxRules {
        // `<w:p>` or `<w:p .../>`; `<w:pPr>` and friends do not match.
        paragraph: Regex::new(r"(?s)<w:p(?:\s[^>]*?)?(?:/>|>(.*?)</w:p>)").expect("valid regex"),
        run: Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:(tab|br|cr)\b[^>]*/>")
            .expect("valid regex"),
    })
}

/// Paragraph text of a DOCX, one paragraph per line.
///
/// Only `<w:t>` runs count as text, so whitespace between elements in the
/// XML never leaks into the output.
pub fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut zip = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| Error::Unsupported(format!("not a DOCX archive: {e}")))?;
    let mut entry = zip
        .by_name("word/document.xml")
        .map_err(|e| Error::Unsupported(format!("DOCX has no document body: {e}")))?;

    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;

    let rules = docx_rules();
    let paragraphs: Vec<String> = rules
        .paragraph
        .captures_iter(&xml)
        .map(|p| {
            let body = p.get(1).map_or("", |m| m.as_str());
            let mut line = String::new();
            for run in rules.run.captures_iter(body) {
                match (run.get(1), run.get(2).map(|m| m.as_str())) {
                    (Some(text), _) => line.push_str(&decode_xml_entities(text.as_str())),
                    (None, Some("tab")) => line.push('\t'),
                    (None, _) => line.push('\n'),
                }
            }
            line.trim_end().to_string()
        })
        .collect();

    Ok(paragraphs.join("\n").trim().to_string())
}

fn decode_xml_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn take_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// User turn stored in history for an extracted document.
pub fn document_history_prompt(file_name: &str, text: &str) -> String {
    format!(
        "Recognized text from file {file_name}:\n\n{}",
        take_chars(text, HISTORY_TEXT_CHARS)
    )
}

/// What the model sees for a document (no history).
pub fn document_model_input(text: &str) -> String {
    take_chars(text, MODEL_INPUT_CHARS).to_string()
}

/// User turn for a photo: the caption (or the default task) plus OCR text.
pub fn photo_prompt(caption: Option<&str>, text: &str) -> String {
    let task = caption
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_PHOTO_TASK);
    format!(
        "{task}\n\nText from photo:\n{}",
        take_chars(text, HISTORY_TEXT_CHARS)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(body: &str) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zw = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::FileOptions::default();
            zw.start_file("[Content_Types].xml", opts).unwrap();
            zw.write_all(b"<Types/>").unwrap();
            zw.start_file("word/document.xml", opts).unwrap();
            zw.write_all(body.as_bytes()).unwrap();
            zw.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn guesses_kind_from_mime_then_extension() {
        assert_eq!(MediaKind::guess(".bin", Some("application/pdf")), MediaKind::Pdf);
        assert_eq!(MediaKind::guess(".PDF", None), MediaKind::Pdf);
        assert_eq!(MediaKind::guess(".docx", None), MediaKind::Docx);
        assert_eq!(MediaKind::guess(".JPeG", Some("image/jpeg")), MediaKind::Image);
        assert_eq!(MediaKind::guess(".tiff", None), MediaKind::Image);
        assert_eq!(MediaKind::guess(".doc", None), MediaKind::Binary);
        assert_eq!(MediaKind::guess("", None), MediaKind::Binary);
    }

    #[test]
    fn extension_is_lowercased_with_dot() {
        assert_eq!(file_extension("Report.Final.PDF"), ".pdf");
        assert_eq!(file_extension("photos/file_12.jpg"), ".jpg");
        assert_eq!(file_extension("README"), "");
        assert_eq!(file_extension(".env"), "");
    }

    #[test]
    fn size_limit_is_inclusive() {
        assert!(check_size(2 * 1024 * 1024, 2).is_ok());
        let err = check_size(2 * 1024 * 1024 + 1, 2).unwrap_err();
        assert!(matches!(err, Error::FileTooLarge { limit_mb: 2, .. }));
    }

    #[test]
    fn stored_names_use_prefix_and_timestamp() {
        assert_eq!(stored_file_name("doc", ".pdf", 1_700_000_000), "doc_1700000000.pdf");
        assert_eq!(stored_file_name("photo", "", 5), "photo_5");
    }

    #[tokio::test]
    async fn save_local_creates_directory() {
        let dir = std::env::temp_dir().join(format!("gtb-ingest-{}", std::process::id()));
        let path = save_local(&dir.join("nested"), "a.txt", b"hello").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = r#"<?xml version="1.0"?><w:document><w:body>
<w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p>
<w:p><w:r><w:t>A &amp; B &lt;ok&gt;</w:t></w:r></w:p></w:body></w:document>"#;
        let text = extract_docx(&docx_with(xml)).unwrap();
        assert_eq!(text, "Hello world\nA & B <ok>");
    }

    #[test]
    fn docx_word_layout_has_no_stray_lines() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\r\n\
<w:document xmlns:w=\"urn:w\"><w:body>\
<w:p><w:pPr><w:pStyle w:val=\"Title\"/></w:pPr><w:r><w:t>Hello</w:t></w:r></w:p>\
<w:p/>\
<w:p w:rsidR=\"00A0\"/>\
<w:p w:rsidR=\"00A1\"><w:r><w:t>A</w:t><w:tab/><w:t>B</w:t><w:br/><w:t>World</w:t></w:r></w:p>\
<w:sectPr/></w:body></w:document>";
        let text = extract_docx(&docx_with(xml)).unwrap();
        assert_eq!(text, "Hello\n\n\nA\tB\nWorld");
    }

    #[test]
    fn non_zip_bytes_are_unsupported() {
        let err = extract_docx(b"plain text").unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn prompts_truncate_on_characters() {
        let text = "я".repeat(20_000);
        let hist = document_history_prompt("a.pdf", &text);
        assert!(hist.starts_with("Recognized text from file a.pdf:\n\n"));
        assert_eq!(hist.chars().filter(|c| *c == 'я').count(), HISTORY_TEXT_CHARS);
        assert_eq!(document_model_input(&text).chars().count(), MODEL_INPUT_CHARS);
    }

    #[test]
    fn photo_prompt_prefers_caption() {
        assert_eq!(photo_prompt(Some(" summarize "), "abc"), "summarize\n\nText from photo:\nabc");
        assert!(photo_prompt(Some("  "), "abc").starts_with(DEFAULT_PHOTO_TASK));
        assert!(photo_prompt(None, "abc").starts_with(DEFAULT_PHOTO_TASK));
    }
}
