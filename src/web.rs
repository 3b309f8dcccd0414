//! Site fetch collaborator: reads the front page of allow-listed domains.
//!
//! Best effort throughout: every requested domain yields one summary line,
//! `[SKIP]` for domains off the allow-list and `[ERROR]` for failed fetches.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, warn};

/// Per-site request timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Body bytes read per site.
const MAX_BODY_BYTES: usize = 100_000;

/// Characters of page text kept per site.
const MAX_SNIPPET_CHARS: usize = 2000;

/// Summary returned when no line was produced.
pub const NO_RESULTS: &str = "No internet results (no requested sites matched the allow list).";

/// Fetches requested sites and summarizes them as text.
#[async_trait]
pub trait SiteFetcher: Send + Sync {
    async fn fetch_sites(&self, allowed: &[String], requested: &[String], query: &str) -> String;
}

/// Normalize a domain or URL to a lower-cased host name.
///
/// Returns an empty string for blank input or URLs without a host.
pub fn normalize_domain(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains("://") {
        return Url::parse(raw)
            .ok()
            .and_then(|url| url.host_str().map(str::to_lowercase))
            .unwrap_or_default();
    }
    raw.to_lowercase()
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn snippet(text: &str) -> String {
    if text.chars().count() > MAX_SNIPPET_CHARS {
        let mut cut: String = text.chars().take(MAX_SNIPPET_CHARS).collect();
        cut.push_str("...");
        cut
    } else {
        text.to_string()
    }
}

/// HTTP implementation of [`SiteFetcher`].
pub struct HttpSiteFetcher {
    client: reqwest::Client,
    scheme: &'static str,
}

impl HttpSiteFetcher {
    /// Build the HTTP client. Fails when the TLS backend cannot initialise.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dt-core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            scheme: "https",
        })
    }

    /// Fetch over plain HTTP instead of HTTPS.
    pub fn with_plain_http(mut self) -> Self {
        self.scheme = "http";
        self
    }

    async fn fetch_page_text(&self, domain: &str) -> Result<String, reqwest::Error> {
        let url = format!("{}://{domain}/", self.scheme);
        let mut response = self.client.get(&url).timeout(FETCH_TIMEOUT).send().await?;

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = MAX_BODY_BYTES - body.len();
            body.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if body.len() >= MAX_BODY_BYTES {
                break;
            }
        }

        Ok(strip_html(&String::from_utf8_lossy(&body)))
    }
}

#[async_trait]
impl SiteFetcher for HttpSiteFetcher {
    async fn fetch_sites(&self, allowed: &[String], requested: &[String], query: &str) -> String {
        let allowed: Vec<String> = allowed.iter().map(|s| normalize_domain(s)).collect();
        debug!(requested = requested.len(), query, "Fetching sites");

        let mut lines = Vec::new();
        for domain in requested.iter().map(|d| normalize_domain(d)) {
            if domain.is_empty() {
                continue;
            }
            if !allowed.contains(&domain) {
                lines.push(format!("[SKIP] {domain} is not in allowed sites."));
                continue;
            }
            match self.fetch_page_text(&domain).await {
                Ok(text) => lines.push(format!("[{domain}] {}", snippet(&text))),
                Err(e) => {
                    warn!(domain = %domain, error = %e, "Site fetch failed");
                    lines.push(format!("[ERROR] {domain}: {e}"));
                }
            }
        }

        if lines.is_empty() {
            return NO_RESULTS.to_string();
        }
        lines.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn normalize_plain_and_url() {
        assert_eq!(normalize_domain("  SSA.gov "), "ssa.gov");
        assert_eq!(normalize_domain("https://www.VA.gov/jobs?x=1"), "www.va.gov");
        assert_eq!(normalize_domain("https://"), "");
        assert_eq!(normalize_domain("   "), "");
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
        assert_eq!(strip_html("<div class=\"x\">\n  a \n\n b</div>"), "a b");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn snippet_is_capped() {
        let long = "a".repeat(MAX_SNIPPET_CHARS + 10);
        let s = snippet(&long);
        assert_eq!(s.chars().count(), MAX_SNIPPET_CHARS + 3);
        assert!(s.ends_with("..."));
        assert_eq!(snippet("short"), "short");
    }

    #[test]
    fn client_construction_reports_result() {
        let fetcher = HttpSiteFetcher::new();
        assert!(fetcher.is_ok());
        assert_eq!(fetcher.unwrap().with_plain_http().scheme, "http");
    }

    #[tokio::test]
    async fn disallowed_domains_are_skipped_without_fetching() {
        let fetcher = HttpSiteFetcher::new().unwrap();
        let summary = fetcher
            .fetch_sites(&["ssa.gov".into()], &["Example.com".into()], "jobs")
            .await;
        assert_eq!(summary, "[SKIP] example.com is not in allowed sites.");
    }

    #[tokio::test]
    async fn nothing_requested_gives_no_results_message() {
        let fetcher = HttpSiteFetcher::new().unwrap();
        let summary = fetcher.fetch_sites(&[], &["  ".into()], "").await;
        assert_eq!(summary, NO_RESULTS);
    }

    #[tokio::test]
    async fn allowed_domain_is_fetched_and_stripped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let body = "<html><body><h1>Benefits</h1>\n<p>Apply online.</p></body></html>";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let fetcher = HttpSiteFetcher::new().unwrap().with_plain_http();
        let summary = fetcher
            .fetch_sites(&[addr.clone()], &[addr.clone()], "benefits")
            .await;
        assert_eq!(summary, format!("[{addr}] Benefits Apply online."));
    }

    #[tokio::test]
    async fn unreachable_domain_is_error_line() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let fetcher = HttpSiteFetcher::new().unwrap().with_plain_http();
        let summary = fetcher.fetch_sites(&[addr.clone()], &[addr.clone()], "").await;
        assert!(summary.starts_with(&format!("[ERROR] {addr}: ")));
    }
}
