use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{ETAG, HeaderMap, LAST_MODIFIED};
use sha2::{Digest, Sha256};

pub const UNKNOWN_LAST_MODIFIED: &str = "Unknown";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub etag: String,
    pub last_modified: String,
}

pub trait UrlProbe {
    fn probe(&mut self, url: &str) -> Result<Fingerprint>;
}

/// Build a fingerprint from response headers and body. Without an ETag the
/// SHA-256 of the body stands in for one.
pub fn fingerprint(etag: Option<&str>, last_modified: Option<&str>, body: &[u8]) -> Fingerprint {
    let etag = match etag.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => value.to_string(),
        None => content_hash(body),
    };
    let last_modified = last_modified
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_LAST_MODIFIED)
        .to_string();
    Fingerprint {
        etag,
        last_modified,
    }
}

pub fn content_hash(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub struct HttpProbe {
    client: Client,
    user_agent: String,
}

impl HttpProbe {
    pub fn new(user_agent: &str, timeout_ms: Option<u64>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(
                timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            ))
            .build()
            .context("failed to build probe HTTP client")?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
        })
    }

    fn probe_http(&self, url: &str) -> Result<Fingerprint> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.user_agent.clone())
            .send()
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} while fetching {}", status.as_u16(), url);
        }
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .with_context(|| format!("failed to read response body of {url}"))?;
        Ok(fingerprint(
            header_value(&headers, ETAG).as_deref(),
            header_value(&headers, LAST_MODIFIED).as_deref(),
            &body,
        ))
    }
}

impl UrlProbe for HttpProbe {
    fn probe(&mut self, url: &str) -> Result<Fingerprint> {
        let parsed = Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
        match parsed.scheme() {
            "http" | "https" => self.probe_http(url),
            "file" => probe_file(&parsed),
            other => bail!("unsupported URL scheme `{other}` in {url}"),
        }
    }
}

fn probe_file(url: &Url) -> Result<Fingerprint> {
    let path = url
        .to_file_path()
        .map_err(|_| anyhow::anyhow!("not a local file URL: {url}"))?;
    let body = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let modified = fs::metadata(&path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .map(|time| http_date(DateTime::<Utc>::from(time)));
    Ok(fingerprint(None, modified.as_deref(), &body))
}

fn header_value(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}
