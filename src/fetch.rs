//! Page fetching. The engine only needs "URL in, document text out"; the
//! HTTP details live here.

#[cfg(test)]
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;
use crate::source::SessionOptions;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    InvalidUrl(String),
    #[error("URL did not return HTML")]
    NotHtml,
    #[error("upstream returned {0}")]
    Upstream(u16),
    #[error("{0}")]
    Request(String),
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;

    /// Prime the session (cookies) before the listing is fetched. Failures
    /// are not reported.
    async fn warm_up(&self) {}
}

pub struct HttpFetcher {
    client: reqwest::Client,
    warmup_url: Option<String>,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig, session: &SessionOptions) -> Result<Self, FetchError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        if let Some(lang) = &session.accept_language {
            let value = lang
                .parse()
                .map_err(|_| FetchError::Request(format!("bad Accept-Language `{}`", lang)))?;
            headers.insert(reqwest::header::ACCEPT_LANGUAGE, value);
        }
        if let Some(referer) = &session.referer {
            let value = referer
                .parse()
                .map_err(|_| FetchError::Request(format!("bad Referer `{}`", referer)))?;
            headers.insert(reqwest::header::REFERER, value);
        }

        let mut builder = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .default_headers(headers);

        if !config.trust_env_proxies {
            builder = builder.no_proxy();
        }
        if config.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(Self {
            client,
            warmup_url: session.warmup_url.clone(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        validate_url(url)?;

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Request(format!("TimeoutError: {}", e))
            } else if e.is_connect() {
                FetchError::Request(format!("ConnectError: {}", e))
            } else {
                FetchError::Request(format!("RequestError: {}", e))
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Upstream(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        // Some sites omit the header entirely; only an explicit non-HTML type is refused.
        if !content_type.is_empty() && !content_type.contains("html") {
            return Err(FetchError::NotHtml);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(decode_html(&body, &content_type))
    }

    async fn warm_up(&self) {
        if let Some(url) = &self.warmup_url {
            if let Err(e) = self.client.get(url).send().await {
                debug!(url = %url, error = %e, "warm-up request failed");
            }
        }
    }
}

// ── Character sets ───────────────────────────────────────────────────────────

/// Matches both `<meta charset=..>` and the `http-equiv` content form.
static META_CHARSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i-u)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#).unwrap()
});

/// How far into the body a `<meta>` charset declaration is looked for.
const SNIFF_LIMIT: usize = 4096;

fn header_charset(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(value.trim().trim_matches(|c: char| c == '"' || c == '\'').as_bytes())
    })
}

fn meta_charset(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(SNIFF_LIMIT)];
    let caps = META_CHARSET_RE.captures(head)?;
    Encoding::for_label(caps.get(1)?.as_bytes())
}

/// Decode a page body: header charset, then `<meta>` declaration, then UTF-8.
/// A byte-order mark overrides all three.
pub fn decode_html(body: &[u8], content_type: &str) -> String {
    let encoding = header_charset(content_type)
        .or_else(|| meta_charset(body))
        .unwrap_or(UTF_8);
    let (text, used, had_errors) = encoding.decode(body);
    if had_errors {
        debug!(encoding = used.name(), "page contained undecodable bytes");
    }
    text.into_owned()
}

pub fn validate_url(url: &str) -> Result<Url, FetchError> {
    let parsed =
        Url::parse(url).map_err(|_| FetchError::InvalidUrl(format!("Invalid URL `{}`", url)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl(
            "Only http(s) URLs are allowed".to_string(),
        ));
    }
    Ok(parsed)
}

/// Serves canned pages; anything else is a 404.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct StaticFetcher {
    pages: HashMap<String, String>,
}

#[cfg(test)]
impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }
}

#[cfg(test)]
#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.pages.get(url).cloned().ok_or(FetchError::Upstream(404))
    }
}
