//! Chrome-style URL match patterns (`http://localhost:5173/*`).
//!
//! Grammar: `<all_urls>` or `<scheme>://<host>[:port]<path>` where scheme is
//! `*`, `http`, `https` or `file`; host is `*`, `*.<domain>` or an exact
//! name; path is a glob in which `*` matches any run of characters. A
//! pattern without a port matches every port.

use crate::{BusError, BusResult};
use std::fmt;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SchemePattern {
    Any,
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Any,
    Subdomains(String),
    Exact(String),
}

/// A parsed match pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPattern {
    raw: String,
    all_urls: bool,
    scheme: SchemePattern,
    host: HostPattern,
    port: Option<u16>,
    path: String,
}

impl MatchPattern {
    /// Parse a match pattern.
    pub fn parse(raw: &str) -> BusResult<Self> {
        let invalid = |why: &str| BusError::InvalidPattern(format!("{}: {}", raw, why));

        if raw == "<all_urls>" {
            return Ok(Self {
                raw: raw.to_string(),
                all_urls: true,
                scheme: SchemePattern::Any,
                host: HostPattern::Any,
                port: None,
                path: "/*".to_string(),
            });
        }

        let (scheme, rest) = raw.split_once("://").ok_or_else(|| invalid("missing ://"))?;
        let scheme = match scheme {
            "*" => SchemePattern::Any,
            "http" | "https" | "file" => SchemePattern::Exact(scheme.to_string()),
            _ => return Err(invalid("unsupported scheme")),
        };

        let slash = rest.find('/').ok_or_else(|| invalid("missing path"))?;
        let (authority, path) = rest.split_at(slash);

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (host, Some(port))
            }
            None => (authority, None),
        };

        let host = if host == "*" {
            HostPattern::Any
        } else if let Some(domain) = host.strip_prefix("*.") {
            if domain.is_empty() || domain.contains('*') {
                return Err(invalid("bad wildcard host"));
            }
            HostPattern::Subdomains(domain.to_ascii_lowercase())
        } else if host.contains('*') {
            return Err(invalid("'*' must lead the host"));
        } else if host.is_empty() && !matches!(&scheme, SchemePattern::Exact(s) if s == "file") {
            return Err(invalid("empty host"));
        } else {
            HostPattern::Exact(host.to_ascii_lowercase())
        };

        Ok(Self {
            raw: raw.to_string(),
            all_urls: false,
            scheme,
            host,
            port,
            path: path.to_string(),
        })
    }

    /// Whether `url` matches. Unparsable URLs never match.
    pub fn matches(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(url) => self.matches_url(&url),
            Err(_) => false,
        }
    }

    /// Whether a parsed URL matches.
    pub fn matches_url(&self, url: &Url) -> bool {
        let scheme_ok = match &self.scheme {
            SchemePattern::Any => matches!(url.scheme(), "http" | "https"),
            SchemePattern::Exact(s) => url.scheme() == s,
        };
        if !scheme_ok {
            return self.all_urls && url.scheme() == "file";
        }
        if self.all_urls {
            return true;
        }

        let host = url.host_str().unwrap_or("").to_ascii_lowercase();
        let host_ok = match &self.host {
            HostPattern::Any => true,
            HostPattern::Subdomains(domain) => {
                host == *domain || host.ends_with(&format!(".{}", domain))
            }
            HostPattern::Exact(exact) => host == *exact,
        };
        if !host_ok {
            return false;
        }

        if let Some(port) = self.port {
            if url.port_or_known_default() != Some(port) {
                return false;
            }
        }

        let mut target = url.path().to_string();
        if let Some(query) = url.query() {
            target.push('?');
            target.push_str(query);
        }
        glob_match(&self.path, &target)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for MatchPattern {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse a list of patterns, failing on the first invalid one.
pub fn parse_patterns<S: AsRef<str>>(raw: &[S]) -> BusResult<Vec<MatchPattern>> {
    raw.iter().map(|p| MatchPattern::parse(p.as_ref())).collect()
}

/// `*`-only glob, iterative with single-star backtracking.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_pattern() {
        let p = MatchPattern::parse("http://localhost:5173/*").unwrap();
        assert!(p.matches("http://localhost:5173/"));
        assert!(p.matches("http://localhost:5173/chat/42?x=1"));
        assert!(!p.matches("http://localhost:3000/"));
        assert!(!p.matches("https://localhost:5173/"));
        assert!(!p.matches("chrome://extensions"));
    }

    #[test]
    fn test_wildcards() {
        let p = MatchPattern::parse("*://*.example.com/app/*").unwrap();
        assert!(p.matches("https://example.com/app/x"));
        assert!(p.matches("http://www.example.com/app/"));
        assert!(!p.matches("https://example.org/app/x"));
        assert!(!p.matches("https://example.com/other"));
    }

    #[test]
    fn test_port_omitted_matches_any_port() {
        let p = MatchPattern::parse("http://localhost/*").unwrap();
        assert!(p.matches("http://localhost:5173/"));
        assert!(p.matches("http://localhost/"));
    }

    #[test]
    fn test_all_urls() {
        let p = MatchPattern::parse("<all_urls>").unwrap();
        assert!(p.matches("https://anything.test/x"));
        assert!(p.matches("file:///tmp/a.html"));
        assert!(!p.matches("chrome://newtab"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(MatchPattern::parse("localhost:5173").is_err());
        assert!(MatchPattern::parse("ftp://host/*").is_err());
        assert!(MatchPattern::parse("http://host").is_err());
        assert!(MatchPattern::parse("http://ho*st/*").is_err());
        assert!(MatchPattern::parse("http://host:port/*").is_err());
    }

    #[test]
    fn test_glob() {
        assert!(glob_match("/*", "/"));
        assert!(glob_match("/a*c", "/abbbc"));
        assert!(glob_match("/a*b*c", "/axxbyyc"));
        assert!(!glob_match("/a*c", "/abd"));
        assert!(glob_match("/exact", "/exact"));
    }

    #[test]
    fn test_parse_patterns_from_config() {
        let patterns = parse_patterns(&["http://localhost:5173/*".to_string()]).unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].to_string(), "http://localhost:5173/*");
    }
}
