//! `get_search_results`: web search with page-content extraction.
//!
//! Result URLs come from the HTML-only DuckDuckGo endpoint (no JavaScript,
//! tolerant of automated requests). Each result page is then fetched
//! concurrently and reduced to its title, meta description and a bounded
//! summary of its paragraph text.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use rand::seq::SliceRandom;
use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};
use url::Url;

use super::types::{Tool, ToolArgs, ToolError, required_str, truncate_chars};

/// Default DuckDuckGo HTML endpoint.
pub const DEFAULT_SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

/// Result pages fetched per query.
pub const MAX_RESULTS: usize = 5;

/// Characters of paragraph text kept per page.
pub const MAX_SUMMARY_CHARS: usize = 1500;

const PAGE_TIMEOUT: Duration = Duration::from_secs(15);

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// One fetched result page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub meta_snippet: String,
    pub page_content_summary: String,
}

/// Searches the web and summarizes the top result pages.
pub struct WebSearchTool {
    search_url: String,
}

impl WebSearchTool {
    /// Create a tool that posts queries to `search_url`.
    pub fn new(search_url: impl Into<String>) -> Self {
        Self {
            search_url: search_url.into(),
        }
    }

    fn client(timeout: Duration) -> Result<reqwest::Client, ToolError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(random_user_agent())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| ToolError::Upstream(format!("failed to build HTTP client: {e}")))
    }

    async fn result_urls(&self, query: &str) -> Result<Vec<String>, ToolError> {
        let client = Self::client(PAGE_TIMEOUT)?;
        let html = client
            .post(&self.search_url)
            .form(&[("q", query)])
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| ToolError::Upstream(format!("search request failed: {e}")))?
            .error_for_status()
            .map_err(|e| ToolError::Upstream(format!("search HTTP error: {e}")))?
            .text()
            .await
            .map_err(|e| ToolError::Upstream(format!("search response read failed: {e}")))?;
        trace!(bytes = html.len(), "search response received");
        parse_result_urls(&html, MAX_RESULTS)
    }

    async fn search(&self, query: &str) -> Result<Vec<PageSummary>, ToolError> {
        let urls = self.result_urls(query).await?;
        if urls.is_empty() {
            info!(query, "search returned no URLs");
            return Ok(Vec::new());
        }
        debug!(query, count = urls.len(), "fetching result pages");

        let client = Self::client(PAGE_TIMEOUT)?;
        let pages = join_all(urls.iter().map(|url| fetch_page(&client, url))).await;
        let summaries: Vec<PageSummary> = pages.into_iter().flatten().collect();
        info!(query, fetched = summaries.len(), "search complete");
        Ok(summaries)
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_URL)
    }
}

async fn fetch_page(client: &reqwest::Client, url: &str) -> Option<PageSummary> {
    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            debug!(url, "page fetch failed: {e}");
            return None;
        }
    };
    if !response.status().is_success() {
        debug!(url, status = %response.status(), "page fetch rejected");
        return None;
    }
    match response.text().await {
        Ok(html) => Some(summarize_page(url, &html)),
        Err(e) => {
            debug!(url, "page body read failed: {e}");
            None
        }
    }
}

/// Extract the result links from a DuckDuckGo HTML page.
pub(crate) fn parse_result_urls(html: &str, max_results: usize) -> Result<Vec<String>, ToolError> {
    let document = Html::parse_document(html);
    let result_sel = selector(
        ".result.results_links.results_links_deep:not(.result--ad), .web-result:not(.result--ad)",
    )?;
    let link_sel = selector(".result__a")?;

    let mut urls: Vec<String> = Vec::new();
    for element in document.select(&result_sel) {
        let Some(href) = element
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let Some(url) = unwrap_redirect(href) else {
            continue;
        };
        if !urls.contains(&url) {
            urls.push(url);
        }
        if urls.len() >= max_results {
            break;
        }
    }
    Ok(urls)
}

/// Resolve DuckDuckGo's `/l/?uddg=` redirect wrapper to the target URL.
fn unwrap_redirect(href: &str) -> Option<String> {
    let full = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_owned()
    };
    let parsed = Url::parse(&full).ok()?;
    if parsed.host_str() == Some("duckduckgo.com") && parsed.path().starts_with("/l/") {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, value)| value.into_owned())
    } else {
        Some(full)
    }
}

/// Reduce a result page to title, meta description and paragraph text.
pub(crate) fn summarize_page(url: &str, html: &str) -> PageSummary {
    let document = Html::parse_document(html);

    let title = first_text(&document, "title").unwrap_or_else(|| "No Title Found".into());
    let meta_snippet = selector("meta[name=\"description\"]")
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .find_map(|m| m.value().attr("content"))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| "No Description Found".into());

    let paragraphs = selector("p")
        .map(|sel| {
            document
                .select(&sel)
                .map(|p| collapse_whitespace(&p.text().collect::<String>()))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    let page_content_summary = if paragraphs.is_empty() {
        "No paragraph text found on page.".to_owned()
    } else {
        truncate_chars(&paragraphs, MAX_SUMMARY_CHARS)
    };

    PageSummary {
        url: url.to_owned(),
        title,
        meta_snippet,
        page_content_summary,
    }
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css).ok()?;
    document
        .select(&sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn selector(css: &str) -> Result<Selector, ToolError> {
    Selector::parse(css).map_err(|e| ToolError::Upstream(format!("invalid selector {css}: {e:?}")))
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "get_search_results"
    }

    fn description(&self) -> &str {
        "Performs a web search for a given query, fetches the top result pages and returns \
         each page's title, meta description and a summary of its text."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query string."
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let query = required_str(&args, "query")?;
        match self.search(query).await {
            Ok(results) => Ok(json!({ "results": results })),
            Err(e) => {
                warn!(query, "web search failed: {e}");
                Ok(json!({
                    "error": format!("Failed to execute web search with page content: {e}")
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    const RESULTS_HTML: &str = r#"
        <html><body>
        <div class="result results_links results_links_deep web-result">
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&rut=abc">Rust</a>
            <a class="result__snippet">A language empowering everyone.</a>
        </div>
        <div class="result results_links results_links_deep result--ad">
            <a class="result__a" href="https://ads.example.com">Ad</a>
        </div>
        <div class="result results_links results_links_deep web-result">
            <a class="result__a" href="https://doc.rust-lang.org/book/">The Book</a>
        </div>
        <div class="result results_links results_links_deep web-result">
            <a class="result__a" href="https://doc.rust-lang.org/book/">Duplicate</a>
        </div>
        </body></html>
    "#;

    // ── Result URL parsing ────────────────────────────────────

    #[test]
    fn parses_urls_skipping_ads_and_duplicates() {
        let urls = parse_result_urls(RESULTS_HTML, MAX_RESULTS).unwrap();
        assert_eq!(
            urls,
            vec!["https://www.rust-lang.org/", "https://doc.rust-lang.org/book/"]
        );
    }

    #[test]
    fn respects_max_results() {
        let urls = parse_result_urls(RESULTS_HTML, 1).unwrap();
        assert_eq!(urls.len(), 1);
    }

    #[test]
    fn empty_page_yields_no_urls() {
        assert!(parse_result_urls("<html></html>", 5).unwrap().is_empty());
    }

    #[test]
    fn unwrap_redirect_passes_direct_links() {
        assert_eq!(
            unwrap_redirect("https://example.com/a").as_deref(),
            Some("https://example.com/a")
        );
        assert_eq!(unwrap_redirect("not a url"), None);
    }

    // ── Page summaries ────────────────────────────────────────

    #[test]
    fn summarizes_title_meta_and_paragraphs() {
        let html = r#"<html><head><title> Rust  Lang </title>
            <meta name="description" content=" Fast and safe. "></head>
            <body><p>First   paragraph.</p><p></p><p>Second.</p></body></html>"#;
        let page = summarize_page("https://r.example", html);
        assert_eq!(page.title, "Rust Lang");
        assert_eq!(page.meta_snippet, "Fast and safe.");
        assert_eq!(page.page_content_summary, "First paragraph. Second.");
    }

    #[test]
    fn missing_fields_use_placeholders() {
        let page = summarize_page("https://r.example", "<html><body><div>x</div></body></html>");
        assert_eq!(page.title, "No Title Found");
        assert_eq!(page.meta_snippet, "No Description Found");
        assert_eq!(page.page_content_summary, "No paragraph text found on page.");
    }

    #[test]
    fn long_text_is_truncated() {
        let body = "word ".repeat(1000);
        let html = format!("<html><body><p>{body}</p></body></html>");
        let page = summarize_page("https://r.example", &html);
        assert_eq!(page.page_content_summary.chars().count(), MAX_SUMMARY_CHARS + 3);
        assert!(page.page_content_summary.ends_with("..."));
    }

    #[test]
    fn user_agent_is_a_browser() {
        assert!(random_user_agent().starts_with("Mozilla/5.0"));
    }
}
