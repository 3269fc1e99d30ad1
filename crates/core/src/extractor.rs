use crate::error::ParseError;
use lopdf::Document;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Upper bound on the decompressed size of `word/document.xml`.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, ParseError>;
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ParseError> {
    fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String, ParseError> {
        let document = Document::load(path).map_err(|error| ParseError::extract(path, error))?;

        let mut text = String::new();
        for (page_no, _page_id) in document.get_pages() {
            let page = document
                .extract_text(&[page_no])
                .map_err(|error| ParseError::extract(path, error))?;
            text.push_str(&page);
            text.push('\n');
        }

        Ok(text)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn extract(&self, path: &Path) -> Result<String, ParseError> {
        let bytes = read_bytes(path)?;
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|error| ParseError::extract(path, error))?;

        let entry = archive
            .by_name("word/document.xml")
            .map_err(|error| ParseError::extract(path, error))?;
        let mut xml = Vec::new();
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut xml)
            .map_err(|error| ParseError::extract(path, error))?;
        if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ParseError::extract(path, "word/document.xml exceeds size limit"));
        }

        docx_paragraphs(&xml).map_err(|error| ParseError::extract(path, error))
    }
}

/// Collects `w:t` runs, one line per `w:p` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, quick_xml::Error> {
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(element) if element.local_name().as_ref() == b"t" => in_text = true,
            Event::End(element) => match element.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Event::Empty(element) => match element.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" => current.push('\n'),
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Event::Text(text) if in_text => current.push_str(&text.unescape()?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String, ParseError> {
        let bytes = read_bytes(path)?;
        String::from_utf8(bytes).map_err(|error| ParseError::extract(path, error))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlExtractor;

impl TextExtractor for HtmlExtractor {
    fn extract(&self, path: &Path) -> Result<String, ParseError> {
        let bytes = read_bytes(path)?;
        let html = String::from_utf8(bytes).map_err(|error| ParseError::extract(path, error))?;
        html_text(&html).map_err(|error| ParseError::extract(path, error))
    }
}

fn html_text(html: &str) -> Result<String, String> {
    let soup = scrape_core::Soup::parse(html);
    let bodies = soup
        .find_all("body")
        .map_err(|error| format!("invalid selector: {error}"))?;

    let text = bodies
        .into_iter()
        .map(|tag| tag.text())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(text)
}

/// Maps lower-case file extensions (without the dot) to extractors.
#[derive(Clone)]
pub struct ExtractorRegistry {
    by_extension: HashMap<String, Arc<dyn TextExtractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("pdf", Arc::new(PdfExtractor));
        registry.register("docx", Arc::new(DocxExtractor));
        registry.register("txt", Arc::new(PlainTextExtractor));
        registry.register("html", Arc::new(HtmlExtractor));
        registry.register("htm", Arc::new(HtmlExtractor));
        registry
    }
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    pub fn register(&mut self, extension: &str, extractor: Arc<dyn TextExtractor>) {
        self.by_extension.insert(
            extension.trim_start_matches('.').to_lowercase(),
            extractor,
        );
    }

    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn TextExtractor>> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        self.by_extension.get(&extension).cloned()
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }

    pub fn extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.by_extension.keys().cloned().collect();
        extensions.sort_unstable();
        extensions
    }
}
