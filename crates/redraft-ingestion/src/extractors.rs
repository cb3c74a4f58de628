//! Document Text Extractors
//!
//! Converts stored uploads into plain UTF-8 text. Format-library errors never
//! leave this module; every decoder failure becomes
//! [`IngestionError::ExtractionFailed`].

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::Event;
use redraft_core::DocumentKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::upload::ArtifactGuard;
use crate::{IngestionError, Result};

/// Upper bound on the decompressed size of `word/document.xml`
const MAX_XML_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Result of text extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Extracted text content
    pub text: String,
    pub kind: DocumentKind,
    /// Length of `text` in characters
    pub char_count: usize,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ExtractionResult {
    pub fn new(text: impl Into<String>, kind: DocumentKind) -> Self {
        let text = text.into();
        let char_count = text.chars().count();
        Self {
            text,
            kind,
            char_count,
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Trait for document text extractors
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from document content
    async fn extract(&self, content: &[u8]) -> Result<ExtractionResult>;

    /// Document format this extractor decodes
    fn kind(&self) -> DocumentKind;

    /// Get extractor name
    fn name(&self) -> &'static str;
}

/// Plain text extractor. Input must be valid UTF-8.
#[derive(Debug, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, content: &[u8]) -> Result<ExtractionResult> {
        let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
        let text = std::str::from_utf8(content).map_err(|e| {
            IngestionError::ExtractionFailed(format!("text is not valid UTF-8: {}", e))
        })?;

        debug!(size = content.len(), "Extracted plain text");
        Ok(ExtractionResult::new(text, DocumentKind::PlainText))
    }

    fn kind(&self) -> DocumentKind {
        DocumentKind::PlainText
    }

    fn name(&self) -> &'static str {
        "plain_text"
    }
}

/// Word document (`.docx`) extractor.
///
/// Reads the text runs of `word/document.xml`, keeping paragraph breaks and
/// discarding all formatting.
#[derive(Debug, Default)]
pub struct DocxExtractor;

impl DocxExtractor {
    pub fn new() -> Self {
        Self
    }

    fn decode(bytes: &[u8]) -> Result<(String, usize)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(failed)?;
        let entry = archive.by_name("word/document.xml").map_err(failed)?;

        let mut xml = Vec::new();
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut xml)
            .map_err(failed)?;
        if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(IngestionError::ExtractionFailed(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }

        Self::collect_text(&xml)
    }

    /// Returns the text and the number of paragraphs seen
    fn collect_text(xml: &[u8]) -> Result<(String, usize)> {
        let mut reader = quick_xml::Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut out = String::new();
        let mut in_text = false;
        let mut paragraphs = 0usize;

        loop {
            match reader.read_event_into(&mut buf).map_err(failed)? {
                Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
                Event::End(e) => match e.local_name().as_ref() {
                    b"t" => in_text = false,
                    b"p" => {
                        paragraphs += 1;
                        out.push_str("\n\n");
                    }
                    _ => {}
                },
                Event::Empty(e) => match e.local_name().as_ref() {
                    b"tab" => out.push('\t'),
                    b"br" | b"cr" => out.push('\n'),
                    b"p" => {
                        paragraphs += 1;
                        out.push_str("\n\n");
                    }
                    _ => {}
                },
                Event::Text(te) if in_text => out.push_str(&te.unescape().map_err(failed)?),
                Event::CData(cd) if in_text => {
                    out.push_str(&String::from_utf8_lossy(cd.as_ref()));
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok((out.trim_end().to_string(), paragraphs))
    }
}

fn failed(err: impl std::fmt::Display) -> IngestionError {
    IngestionError::ExtractionFailed(err.to_string())
}

#[async_trait]
impl TextExtractor for DocxExtractor {
    async fn extract(&self, content: &[u8]) -> Result<ExtractionResult> {
        let bytes = content.to_vec();
        let (text, paragraphs) = tokio::task::spawn_blocking(move || Self::decode(&bytes))
            .await
            .map_err(|e| IngestionError::ExtractionFailed(format!("decoder task failed: {}", e)))??;

        debug!(paragraphs, "Extracted word document");
        Ok(ExtractionResult::new(text, DocumentKind::WordDocument)
            .with_metadata("paragraphs", serde_json::json!(paragraphs)))
    }

    fn kind(&self) -> DocumentKind {
        DocumentKind::WordDocument
    }

    fn name(&self) -> &'static str {
        "docx"
    }
}

/// Extractors keyed by document kind
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<DocumentKind, Arc<dyn TextExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the plain text and Word document extractors
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(PlainTextExtractor::new()))
            .register(Arc::new(DocxExtractor::new()))
    }

    pub fn register(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractors.insert(extractor.kind(), extractor);
        self
    }

    pub fn get(&self, kind: DocumentKind) -> Option<&Arc<dyn TextExtractor>> {
        self.extractors.get(&kind)
    }
}

/// Extracts the text of a stored upload
#[derive(Clone)]
pub struct ContentExtractor {
    registry: ExtractorRegistry,
}

impl ContentExtractor {
    pub fn new(registry: ExtractorRegistry) -> Self {
        Self { registry }
    }

    /// Read the artifact and decode it. Blank text is an error.
    pub async fn extract(&self, artifact: &ArtifactGuard) -> Result<ExtractionResult> {
        let kind = artifact.artifact().kind;
        let extractor = self.registry.get(kind).ok_or_else(|| {
            IngestionError::ExtractionFailed(format!("no extractor for {}", kind.mime_type()))
        })?;

        let bytes = artifact.read().await?;
        let result = extractor.extract(&bytes).await?;

        if result.is_blank() {
            return Err(IngestionError::EmptyContent);
        }

        debug!(
            extractor = extractor.name(),
            chars = result.char_count,
            "Content extracted"
        );
        Ok(result)
    }
}

impl Default for ContentExtractor {
    fn default() -> Self {
        Self::new(ExtractorRegistry::with_defaults())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Minimal .docx with one `<w:p>` per paragraph
    pub(crate) fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
             <w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">\
             <w:body>{}</w:body></w:document>",
            body
        );

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_plain_text() {
        let result = PlainTextExtractor::new()
            .extract("Hello, wörld!".as_bytes())
            .await
            .unwrap();
        assert_eq!(result.text, "Hello, wörld!");
        assert_eq!(result.char_count, 13);
        assert_eq!(result.kind, DocumentKind::PlainText);
    }

    #[tokio::test]
    async fn test_plain_text_strips_bom() {
        let mut content = UTF8_BOM.to_vec();
        content.extend_from_slice(b"text");
        let result = PlainTextExtractor::new().extract(&content).await.unwrap();
        assert_eq!(result.text, "text");
    }

    #[tokio::test]
    async fn test_plain_text_rejects_invalid_utf8() {
        let err = PlainTextExtractor::new()
            .extract(&[0x66, 0x6f, 0xff, 0xfe])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn test_docx_paragraphs() {
        let bytes = docx_bytes(&["First paragraph.", "Second &amp; last."]);
        let result = DocxExtractor::new().extract(&bytes).await.unwrap();

        assert_eq!(result.text, "First paragraph.\n\nSecond & last.");
        assert_eq!(result.metadata["paragraphs"], serde_json::json!(2));
    }

    #[test]
    fn test_docx_runs_tabs_and_breaks() {
        let xml = br#"<w:document xmlns:w="w"><w:body>
            <w:p><w:r><w:t>Split </w:t></w:r><w:r><w:t>run</w:t><w:tab/><w:t>tabbed</w:t></w:r></w:p>
            <w:p><w:r><w:t>line</w:t><w:br/><w:t>break</w:t></w:r></w:p>
            </w:body></w:document>"#;
        let (text, paragraphs) = DocxExtractor::collect_text(xml).unwrap();

        assert_eq!(text, "Split run\ttabbed\n\nline\nbreak");
        assert_eq!(paragraphs, 2);
    }

    #[tokio::test]
    async fn test_invalid_zip_is_extraction_failure() {
        let err = DocxExtractor::new().extract(b"not a zip").await.unwrap_err();
        assert!(matches!(err, IngestionError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn test_zip_without_document_is_extraction_failure() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/styles.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<styles/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = DocxExtractor::new().extract(&bytes).await.unwrap_err();
        assert!(matches!(err, IngestionError::ExtractionFailed(_)));
    }

    #[test]
    fn test_registry_defaults() {
        let registry = ExtractorRegistry::with_defaults();
        assert_eq!(registry.get(DocumentKind::PlainText).unwrap().name(), "plain_text");
        assert_eq!(registry.get(DocumentKind::WordDocument).unwrap().name(), "docx");
    }

    #[tokio::test]
    async fn test_missing_extractor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::FsArtifactStore::new(dir.path()).await.unwrap());
        let validator = crate::UploadValidator::new(
            crate::UploadPolicy::from(&redraft_core::UploadConfig::default()),
            store,
        );
        let data: crate::ByteStream<'static> = Box::pin(futures::stream::iter(vec![Ok(
            bytes::Bytes::from_static(b"plain"),
        )]));
        let guard = validator.accept("a.txt", None, data, None).await.unwrap();

        let extractor = ContentExtractor::new(ExtractorRegistry::new());
        let err = extractor.extract(&guard).await.unwrap_err();
        assert!(matches!(err, IngestionError::ExtractionFailed(_)));
        guard.release().await;
    }

    #[tokio::test]
    async fn test_blank_document_is_empty_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(crate::FsArtifactStore::new(dir.path()).await.unwrap());
        let validator = crate::UploadValidator::new(
            crate::UploadPolicy::from(&redraft_core::UploadConfig::default()),
            store,
        );
        let data: crate::ByteStream<'static> = Box::pin(futures::stream::iter(vec![Ok(
            bytes::Bytes::from_static(b"  \n\n \t "),
        )]));
        let guard = validator.accept("blank.txt", None, data, None).await.unwrap();

        let err = ContentExtractor::default().extract(&guard).await.unwrap_err();
        assert!(matches!(err, IngestionError::EmptyContent));
        guard.release().await;
    }
}
