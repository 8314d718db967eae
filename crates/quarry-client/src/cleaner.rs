use std::collections::HashSet;
use std::sync::Arc;

use htmd::HtmlToMarkdown;
use quarry_core::{AppError, CleanedContent, Cleaner, ScrapeOptions};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// HTML-to-Markdown cleaner using htmd.
///
/// Converts raw HTML into clean Markdown text, stripping non-content
/// elements (script, style, nav, etc.). The document title and, when asked
/// for, its outbound links are pulled out with `scraper`. A `css_selector`
/// in `extract_config` narrows the document before conversion.
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl Clone for HtmdCleaner {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
        }
    }
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
                "form",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleaner for HtmdCleaner {
    fn clean(
        &self,
        html: &str,
        base_url: &str,
        options: &ScrapeOptions,
    ) -> Result<CleanedContent, AppError> {
        let document = Html::parse_document(html);
        let title = extract_title(&document);

        let scope: Vec<ElementRef<'_>> = match options.css_selector() {
            Some(css) => {
                let selector = Selector::parse(css).map_err(|e| {
                    AppError::InvalidInput(format!("invalid css_selector '{css}': {e}"))
                })?;
                let matched: Vec<_> = document.select(&selector).collect();
                if matched.is_empty() {
                    return Err(AppError::ParseError(format!(
                        "css_selector '{css}' matched nothing"
                    )));
                }
                matched
            }
            None => vec![document.root_element()],
        };

        let links = if options.include_links {
            extract_links(&scope, base_url)
        } else {
            Vec::new()
        };

        let fragment = if options.css_selector().is_some() {
            scope.iter().map(|el| el.html()).collect::<Vec<_>>().join("\n")
        } else {
            html.to_string()
        };

        let markdown = self
            .converter
            .convert(&fragment)
            .map_err(|e| AppError::ParseError(format!("HTML conversion failed: {e}")))?;

        Ok(CleanedContent {
            markdown: markdown.trim().to_string(),
            title,
            links,
        })
    }
}

fn extract_title(document: &Html) -> Option<String> {
    ["title", "h1"].iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        let text = document
            .select(&selector)
            .next()?
            .text()
            .collect::<String>();
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    })
}

/// Absolute http(s) links in document order, deduplicated, fragments
/// dropped.
fn extract_links(scope: &[ElementRef<'_>], base_url: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for el in scope {
        for anchor in el.select(&selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let resolved = match &base {
                Some(base) => base.join(href),
                None => Url::parse(href),
            };
            let Ok(mut url) = resolved else {
                continue;
            };
            if !matches!(url.scheme(), "http" | "https") {
                continue;
            }
            url.set_fragment(None);
            let url = url.to_string();
            if seen.insert(url.clone()) {
                links.push(url);
            }
        }
    }
    links
}
