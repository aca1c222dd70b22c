//! HTML content extraction.
//!
//! Two strategies: a primary structured extractor targeting the main
//! article container with metadata enrichment (authors, language, keywords,
//! summary), and a simpler whole-document text fallback for pages the
//! primary cannot make sense of. The caller records which one succeeded.

use scraper::{Html, Selector};

/// Minimum plain-text length for an extraction to count as sufficient.
pub const MIN_TEXT_LEN: usize = 100;

/// CSS selectors targeting main article content across common platforms.
/// Order matters: more specific selectors first, generic fallbacks last.
const CONTENT_SELECTORS: &str = "article, [role=\"main\"], .entry-content, .post-content, \
     .article-content, .post-body, main .content, main";

/// Which strategy produced the content, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    Readability,
    Fallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Readability => "readability",
            Self::Fallback => "fallback",
        }
    }
}

/// The extracted article content plus page metadata.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub text: String,
    pub html: String,
    pub language: Option<String>,
    pub authors: Vec<String>,
    pub keywords: Vec<String>,
    pub summary: Option<String>,
    pub method: ExtractionMethod,
}

/// Primary structured extraction.
///
/// Returns `None` when no article container is found or the extracted text
/// is shorter than [`MIN_TEXT_LEN`] — the caller falls back to
/// [`extract_fallback`].
pub fn extract_content(html: &str) -> Option<ExtractedContent> {
    let doc = Html::parse_document(html);

    let container_sel = Selector::parse(CONTENT_SELECTORS).expect("static selector");
    let container = doc.select(&container_sel).next()?;

    // Paragraph-level walk skips nav/aside/script noise that lives outside
    // textual elements even inside the article container.
    let text_sel = Selector::parse("p, h1, h2, h3, h4, li, blockquote").expect("static selector");
    let mut paragraphs: Vec<String> = Vec::new();
    for el in container.select(&text_sel) {
        let t = collapse_whitespace(&el.text().collect::<String>());
        if !t.is_empty() {
            paragraphs.push(t);
        }
    }
    let text = paragraphs.join("\n\n");

    if text.len() < MIN_TEXT_LEN {
        return None;
    }

    Some(ExtractedContent {
        title: page_title(&doc),
        html: container.html(),
        language: page_language(&doc),
        authors: page_authors(&doc),
        keywords: page_keywords(&doc),
        summary: page_summary(&doc),
        text,
        method: ExtractionMethod::Readability,
    })
}

/// Fallback plain DOM-text extraction over the whole body.
pub fn extract_fallback(html: &str) -> ExtractedContent {
    let doc = Html::parse_document(html);
    let body_sel = Selector::parse("body").expect("static selector");

    let text = doc
        .select(&body_sel)
        .next()
        .map(|body| collapse_whitespace(&body.text().collect::<String>()))
        .unwrap_or_default();

    ExtractedContent {
        title: page_title(&doc),
        html: html.to_string(),
        language: page_language(&doc),
        authors: page_authors(&doc),
        keywords: page_keywords(&doc),
        summary: page_summary(&doc),
        text,
        method: ExtractionMethod::Fallback,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn page_title(doc: &Html) -> Option<String> {
    meta_content(doc, "meta[property=\"og:title\"]").or_else(|| {
        let sel = Selector::parse("title").ok()?;
        doc.select(&sel)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    })
}

fn page_language(doc: &Html) -> Option<String> {
    let sel = Selector::parse("html").ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("lang"))
        // "en-US" -> "en"
        .map(|l| l.split('-').next().unwrap_or(l).to_lowercase())
        .filter(|l| !l.is_empty())
}

fn page_authors(doc: &Html) -> Vec<String> {
    let mut authors = Vec::new();
    for selector in [
        "meta[name=\"author\"]",
        "meta[property=\"article:author\"]",
    ] {
        if let Some(a) = meta_content(doc, selector) {
            if !authors.contains(&a) {
                authors.push(a);
            }
        }
    }
    authors
}

fn page_keywords(doc: &Html) -> Vec<String> {
    meta_content(doc, "meta[name=\"keywords\"]")
        .map(|k| {
            k.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn page_summary(doc: &Html) -> Option<String> {
    meta_content(doc, "meta[property=\"og:description\"]")
        .or_else(|| meta_content(doc, "meta[name=\"description\"]"))
}
