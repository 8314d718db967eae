use std::time::Duration;

use async_trait::async_trait;
use quarry_core::classify::looks_like_js_shell;
use quarry_core::{AppError, FetchStrategy, RawContent, ScrapeOptions, StrategyKind};
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, UPGRADE_INSECURE_REQUESTS};
use scraper::{Html, Selector};
use tokio::time::Instant;
use url::Url;

use crate::http::HttpCore;

/// Desktop Chrome on Linux; keeps simple bot filters from flagging us.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Extra document hops (meta refresh or AMP alternate) per fetch.
const MAX_HOPS: usize = 3;

/// HTTP crawl strategy (`framework`).
///
/// Sends a browser-like header set and follows the client-side hops a plain
/// GET stops at: `<meta http-equiv="refresh">` redirects, and the
/// `<link rel="amphtml">` alternate when the canonical page is an empty
/// JavaScript shell.
#[derive(Clone)]
pub struct FrameworkStrategy {
    core: HttpCore,
}

impl FrameworkStrategy {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let core = HttpCore::build(timeout, || {
            Client::builder()
                .user_agent(BROWSER_USER_AGENT)
                .default_headers(headers.clone())
                .timeout(timeout)
        })?;
        Ok(Self { core })
    }

    pub fn allow_private_urls(mut self) -> Self {
        self.core.ssrf_protection = false;
        self
    }
}

#[async_trait]
impl FetchStrategy for FrameworkStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Framework
    }

    async fn fetch(
        &self,
        target: &str,
        options: &ScrapeOptions,
        deadline: Option<Instant>,
    ) -> Result<RawContent, AppError> {
        let mut raw = self.core.get(target, options, deadline).await?;

        for _ in 0..MAX_HOPS {
            let Some(next) = next_hop(&raw.body, &raw.final_url) else {
                break;
            };
            if next == raw.final_url {
                break;
            }
            tracing::debug!(from = %raw.final_url, to = %next, "Following document hop");
            raw = self.core.get(&next, options, deadline).await?;
        }

        Ok(raw)
    }
}

/// Where the document points next, if anywhere.
///
/// `scraper::Html` is not `Send`, so the parse stays inside this sync helper.
fn next_hop(body: &str, base: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let base = Url::parse(base).ok()?;

    if let Some(target) = meta_refresh_target(&document) {
        return resolve(&base, &target);
    }

    if looks_like_js_shell(body) {
        let selector = Selector::parse("link[rel=amphtml][href]").ok()?;
        let href = document.select(&selector).next()?.value().attr("href")?;
        return resolve(&base, href);
    }

    None
}

fn meta_refresh_target(document: &Html) -> Option<String> {
    let selector = Selector::parse("meta[http-equiv][content]").ok()?;
    document.select(&selector).find_map(|el| {
        let value = el.value();
        if !value.attr("http-equiv")?.eq_ignore_ascii_case("refresh") {
            return None;
        }
        parse_refresh_content(value.attr("content")?)
    })
}

/// `"0; url=/next"` → `/next`. Quotes around the URL are tolerated.
fn parse_refresh_content(content: &str) -> Option<String> {
    let (_, rest) = content.split_once(';')?;
    let rest = rest.trim();
    let (key, url) = rest.split_once('=')?;
    if !key.trim().eq_ignore_ascii_case("url") {
        return None;
    }
    let url = url.trim().trim_matches(|c| c == '\'' || c == '"').trim();
    (!url.is_empty()).then(|| url.to_string())
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    let url = base.join(href).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::{response, serve};

    #[test]
    fn parses_refresh_content() {
        assert_eq!(parse_refresh_content("0; url=/next").as_deref(), Some("/next"));
        assert_eq!(
            parse_refresh_content("5;URL='https://example.com/x'").as_deref(),
            Some("https://example.com/x")
        );
        assert_eq!(parse_refresh_content("30"), None);
    }

    #[test]
    fn finds_meta_refresh_hop() {
        let body = r#"<html><head><meta http-equiv="Refresh" content="0; url=/moved"></head></html>"#;
        assert_eq!(
            next_hop(body, "https://example.com/old").as_deref(),
            Some("https://example.com/moved")
        );
    }

    #[test]
    fn follows_amp_only_for_shells() {
        let shell = r#"<html><head><link rel="amphtml" href="/amp/story"></head>
            <body><div id="root"></div></body></html>"#;
        assert_eq!(
            next_hop(shell, "https://news.example.com/story").as_deref(),
            Some("https://news.example.com/amp/story")
        );

        let full = r#"<html><head><link rel="amphtml" href="/amp/story"></head>
            <body><article>Plenty of server-rendered text.</article></body></html>"#;
        assert_eq!(next_hop(full, "https://news.example.com/story"), None);
    }

    #[test]
    fn ignores_non_http_targets() {
        let body = r#"<meta http-equiv="refresh" content="0; url=javascript:alert(1)">"#;
        assert_eq!(next_hop(body, "https://example.com"), None);
    }

    #[tokio::test]
    async fn follows_refresh_against_local_server() {
        let base = serve(vec![
            response(
                "200 OK",
                "text/html",
                r#"<html><head><meta http-equiv="refresh" content="0; url=/landing"></head></html>"#,
            ),
            response("200 OK", "text/html", "<html><body><p>Landed</p></body></html>"),
        ])
        .await;

        let strategy = FrameworkStrategy::new().unwrap().allow_private_urls();
        let raw = strategy
            .fetch(&format!("{base}/start"), &ScrapeOptions::default(), None)
            .await
            .unwrap();

        assert!(raw.body.contains("Landed"));
        assert!(raw.final_url.ends_with("/landing"));
    }
}
