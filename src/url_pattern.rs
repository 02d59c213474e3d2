//! URL match patterns for content scripts and web-request filters.
//!
//! Supports the `<all_urls>` sentinel, `scheme://host/path` patterns with
//! `*` wildcards (`*` scheme covers http and https, `*.example.com` covers
//! the domain and its subdomains) and, for anything else, exact URL
//! equality.

use url::Url;

pub const ALL_URLS: &str = "<all_urls>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    Any,
    /// `*.example.com`: the domain itself and every subdomain.
    Suffix(String),
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlPattern {
    AllUrls,
    Match {
        scheme: String,
        host: HostPattern,
        path: String,
    },
    Exact(String),
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> Self {
        let pattern = pattern.trim();
        if pattern == ALL_URLS || pattern == "*" {
            return Self::AllUrls;
        }

        let Some((scheme, rest)) = pattern.split_once("://") else {
            return Self::Exact(pattern.to_string());
        };

        if !matches!(scheme, "*" | "http" | "https" | "ws" | "wss" | "ftp" | "file")
            && !scheme.ends_with("extension")
        {
            return Self::Exact(pattern.to_string());
        }

        let (host, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], &rest[slash..]),
            None => (rest, "/*"),
        };

        let host = if host == "*" {
            HostPattern::Any
        } else if let Some(domain) = host.strip_prefix("*.") {
            HostPattern::Suffix(domain.to_ascii_lowercase())
        } else if host.contains('*') {
            return Self::Exact(pattern.to_string());
        } else {
            HostPattern::Exact(host.to_ascii_lowercase())
        };

        Self::Match {
            scheme: scheme.to_string(),
            host,
            path: path.to_string(),
        }
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::AllUrls => true,
            Self::Exact(expected) => expected == url,
            Self::Match { scheme, host, path } => {
                let Ok(parsed) = Url::parse(url) else {
                    return false;
                };

                let scheme_ok = if scheme == "*" {
                    matches!(parsed.scheme(), "http" | "https")
                } else {
                    parsed.scheme() == scheme
                };
                if !scheme_ok {
                    return false;
                }

                let actual_host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
                let host_ok = match host {
                    HostPattern::Any => true,
                    HostPattern::Exact(expected) => *expected == actual_host,
                    HostPattern::Suffix(domain) => {
                        actual_host == *domain || actual_host.ends_with(&format!(".{domain}"))
                    }
                };
                if !host_ok {
                    return false;
                }

                let mut target = parsed.path().to_string();
                if let Some(query) = parsed.query() {
                    target.push('?');
                    target.push_str(query);
                }
                glob_match(path.as_bytes(), target.as_bytes())
            }
        }
    }
}

/// Whether any of `patterns` accepts `url`. An empty set accepts everything.
pub fn matches_any(patterns: &[UrlPattern], url: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|pattern| pattern.matches(url))
}

/// `*`-only glob over bytes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}
