//! Proxy descriptors and their identity.

use crate::error::{Error, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Protocol spoken by a forward proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyScheme {
    #[serde(rename = "HTTP", alias = "http", alias = "Http")]
    Http,
    #[serde(rename = "SOCKS4", alias = "socks4", alias = "Socks4")]
    Socks4,
    #[serde(rename = "SOCKS5", alias = "socks5", alias = "Socks5")]
    Socks5,
}

impl ProxyScheme {
    /// URL scheme used when handing the proxy to an HTTP client.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Socks4 => "socks4",
            ProxyScheme::Socks5 => "socks5",
        }
    }

    /// Parse a URL scheme, case-insensitively.
    pub fn from_scheme(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "https" => Some(ProxyScheme::Http),
            "socks4" | "socks4a" => Some(ProxyScheme::Socks4),
            "socks5" | "socks5h" => Some(ProxyScheme::Socks5),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials for a proxy. Ignored unless `enabled` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAuth {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Identity of a proxy: scheme, host and port. Credentials are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyKey {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// A forward proxy endpoint plus the bookkeeping the pool keeps on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    #[serde(alias = "type")]
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ProxyAuth>,
    /// Seconds taken by the last successful probe.
    #[serde(default)]
    pub latency: f64,
    /// Consecutive failures since the last success.
    #[serde(default)]
    pub fail_count: u32,
    /// When the pool last handed this proxy out.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_last_used"
    )]
    pub last_used: Option<DateTime<Utc>>,
}

impl ProxyDescriptor {
    /// Create a descriptor without credentials.
    pub fn new(scheme: ProxyScheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
            auth: None,
            latency: 0.0,
            fail_count: 0,
            last_used: None,
        }
    }

    /// Local Burp Suite listener.
    pub fn burp() -> Self {
        Self::new(ProxyScheme::Http, "127.0.0.1", 8080)
    }

    /// Local OWASP ZAP listener.
    pub fn zap() -> Self {
        Self::new(ProxyScheme::Http, "127.0.0.1", 8090)
    }

    /// Local Tor SOCKS port.
    pub fn tor() -> Self {
        Self::new(ProxyScheme::Socks5, "127.0.0.1", 9050)
    }

    /// Look up a preset by name: `burp`, `zap` or `tor`.
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "burp" => Some(Self::burp()),
            "zap" => Some(Self::zap()),
            "tor" => Some(Self::tor()),
            _ => None,
        }
    }

    /// Attach enabled credentials.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(ProxyAuth {
            enabled: true,
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn key(&self) -> ProxyKey {
        ProxyKey {
            scheme: self.scheme,
            host: self.host.clone(),
            port: self.port,
        }
    }

    /// Username and password, if credentials are present and enabled.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.auth
            .as_ref()
            .filter(|a| a.enabled)
            .map(|a| (a.username.as_str(), a.password.as_str()))
    }

    /// Whether both descriptors route traffic identically: same identity and
    /// same effective credentials. Bookkeeping fields are ignored.
    pub fn same_endpoint(&self, other: &ProxyDescriptor) -> bool {
        self.scheme == other.scheme
            && self.host == other.host
            && self.port == other.port
            && self.credentials() == other.credentials()
    }

    /// Proxy URL in the form `scheme://[user:pass@]host:port`, with
    /// credentials percent-encoded.
    pub fn proxy_url(&self) -> Result<String> {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let raw = format!("{}://{}:{}", self.scheme, host, self.port);
        let mut url = Url::parse(&raw).map_err(|_| Error::InvalidProxy(raw.clone()))?;

        if let Some((username, password)) = self.credentials() {
            url.set_username(username)
                .map_err(|_| Error::InvalidProxy(self.to_string()))?;
            url.set_password(Some(password))
                .map_err(|_| Error::InvalidProxy(self.to_string()))?;
        }

        let mut url: String = url.into();
        if url.ends_with('/') {
            url.pop();
        }
        Ok(url)
    }

    /// Convert into a `reqwest::Proxy` covering every request scheme.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy> {
        reqwest::Proxy::all(self.proxy_url()?).map_err(Error::Client)
    }
}

/// Accepts RFC 3339 strings as well as Unix epoch seconds, where `0` means
/// never used.
fn deserialize_last_used<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LastUsed {
        Epoch(f64),
        Timestamp(DateTime<Utc>),
    }

    Ok(match Option::<LastUsed>::deserialize(deserializer)? {
        None => None,
        Some(LastUsed::Epoch(secs)) if secs <= 0.0 => None,
        Some(LastUsed::Epoch(secs)) => {
            DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
        }
        Some(LastUsed::Timestamp(at)) => Some(at),
    })
}

impl fmt::Display for ProxyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl FromStr for ProxyDescriptor {
    type Err = Error;

    /// Parse `scheme://[user:pass@]host:port` or a bare `host:port` (HTTP).
    /// Credentials are taken literally.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidProxy(s.to_string());
        let s = s.trim();

        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (ProxyScheme::from_scheme(scheme).ok_or_else(invalid)?, rest),
            None => (ProxyScheme::Http, s),
        };
        let rest = rest.trim_end_matches('/');

        let (userinfo, hostport) = match rest.rsplit_once('@') {
            Some((userinfo, hostport)) => (Some(userinfo), hostport),
            None => (None, rest),
        };

        let (host, port) = hostport.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if host.is_empty() {
            return Err(invalid());
        }

        let mut proxy = ProxyDescriptor::new(scheme, host, port);
        if let Some(userinfo) = userinfo {
            let (username, password) = userinfo.split_once(':').unwrap_or((userinfo, ""));
            proxy = proxy.with_auth(username, password);
        }
        Ok(proxy)
    }
}
