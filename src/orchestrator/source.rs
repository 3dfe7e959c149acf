//! Link sources
//!
//! A test source is either a subscription URL or a local file. Its content is
//! a plain list of links or a base64-encoded feed of the same. Each link
//! carries enough addressing information for a prober to dial it.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use std::time::Duration;
use url::{Host, ParseError, Url};

/// Timeout for fetching a subscription
const FETCH_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("subscription fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("subscription returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("link has no scheme")]
    MissingScheme,

    #[error("link has no host")]
    MissingHost,

    #[error("invalid port in link")]
    InvalidPort,

    #[error("invalid vmess payload")]
    InvalidVmess,

    #[error("malformed link: {0}")]
    Malformed(url::ParseError),
}

/// Read the raw content of a subscription URL or file
pub async fn fetch_source(client: &reqwest::Client, source: &str) -> Result<String, SourceError> {
    if source.starts_with("http://") || source.starts_with("https://") {
        let response = client
            .get(source)
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }

        return Ok(response.text().await?);
    }

    tokio::fs::read_to_string(source)
        .await
        .map_err(|source_err| SourceError::Read {
            path: source.to_string(),
            source: source_err,
        })
}

/// Extract links from plain or base64-encoded subscription content
pub fn parse_links(content: &str) -> Vec<String> {
    if !content.contains("://") {
        if let Some(decoded) = decode_base64(content) {
            return collect_links(&decoded);
        }
    }
    collect_links(content)
}

fn collect_links(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains("://"))
        .map(str::to_string)
        .collect()
}

fn decode_base64(content: &str) -> Option<String> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    [STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(compact.as_bytes()).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Addressing information pulled out of a proxy link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub name: String,
}

impl LinkTarget {
    /// Parse `scheme://[user@]host:port[/path][?query][#name]` or a vmess link
    pub fn parse(link: &str) -> Result<Self, TargetError> {
        let (scheme, payload) = link.split_once("://").ok_or(TargetError::MissingScheme)?;
        if scheme.eq_ignore_ascii_case("vmess") {
            return Self::parse_vmess(payload);
        }

        let url = Url::parse(link).map_err(|e| match e {
            ParseError::EmptyHost => TargetError::MissingHost,
            ParseError::InvalidPort => TargetError::InvalidPort,
            other => TargetError::Malformed(other),
        })?;

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(TargetError::MissingHost),
        };
        let port = url.port_or_known_default().ok_or(TargetError::InvalidPort)?;

        let name = url
            .fragment()
            .map(|fragment| match urlencoding::decode(fragment) {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => fragment.to_string(),
            })
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| host.clone());

        Ok(Self {
            protocol: url.scheme().to_string(),
            host,
            port,
            name,
        })
    }

    fn parse_vmess(payload: &str) -> Result<Self, TargetError> {
        let json = decode_base64(payload).ok_or(TargetError::InvalidVmess)?;
        let value: serde_json::Value =
            serde_json::from_str(&json).map_err(|_| TargetError::InvalidVmess)?;

        let host = value["add"]
            .as_str()
            .filter(|h| !h.is_empty())
            .ok_or(TargetError::MissingHost)?
            .to_string();

        // Port appears as a number or a string depending on the exporter
        let port = match &value["port"] {
            serde_json::Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .ok_or(TargetError::InvalidPort)?;

        let name = value["ps"]
            .as_str()
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| host.clone());

        Ok(Self {
            protocol: "vmess".to_string(),
            host,
            port,
            name,
        })
    }

    /// `host:port` suitable for dialing
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
