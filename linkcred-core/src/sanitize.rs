//! Link sanitization: turns the hrefs harvested from a page into canonical,
//! absolute URLs that can be used as lookup keys.
//!
//! Relative links are made absolute against the page, fragments are dropped
//! and query strings are stripped, except for the parameters that identify a
//! resource on sites listed in the [`QueryAllowList`] (video ids, post ids).
//! Several raw links may sanitize to the same canonical link; callers keep
//! the pairing in [`LinkEntry`] values rather than collapsing duplicates.

use crate::model::LinkEntry;
use linkcred_scanner::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

/// The page the links were harvested from.
#[derive(Debug, Clone)]
pub struct PageContext {
    url: Url,
}

impl PageContext {
    pub fn new(page_url: &str) -> Result<Self> {
        let url = Url::parse(page_url)
            .map_err(|e| LinkError::InvalidUrl(format!("{}: {}", page_url, e)))?;
        if !is_http(&url) {
            return Err(LinkError::InvalidUrl(format!(
                "page must be an http(s) URL: {}",
                page_url
            )));
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Scheme with trailing colon, e.g. `https:`.
    pub fn protocol(&self) -> String {
        format!("{}:", self.url.scheme())
    }

    /// Host including a non-default port.
    pub fn host(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    pub fn host_str(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

/// Per-site query parameters that are part of a resource's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryAllowList(BTreeMap<String, Vec<String>>);

impl Default for QueryAllowList {
    fn default() -> Self {
        Self::empty()
            .with_site("youtube.com", &["v"])
            .with_site("facebook.com", &["story_fbid", "id", "fbid"])
            .with_site("news.ycombinator.com", &["id"])
    }
}

impl QueryAllowList {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with_site(mut self, domain: &str, params: &[&str]) -> Self {
        self.0.insert(
            domain.to_lowercase(),
            params.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    /// Parameters kept for `host`; a listed domain also covers its subdomains.
    pub fn params_for(&self, host: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(domain, _)| host == domain.as_str() || host.ends_with(&format!(".{}", domain)))
            .map(|(_, params)| params.as_slice())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    allow_list: QueryAllowList,
}

impl Sanitizer {
    pub fn new(allow_list: QueryAllowList) -> Self {
        Self { allow_list }
    }

    /// Canonical form of one raw href as found on `page`.
    pub fn sanitize(&self, raw: &str, page: &PageContext) -> Result<String> {
        let trimmed = raw.trim();
        let link = trimmed.strip_prefix('.').unwrap_or(trimmed);

        let absolute = if link.starts_with("//") {
            format!("{}{}", page.protocol(), link)
        } else if link.starts_with('/') || link.starts_with('?') {
            format!("{}//{}{}", page.protocol(), page.host(), link)
        } else if link.starts_with('#') {
            format!("{}{}", self.canonicalize(page.url().as_str())?, link)
        } else {
            link.to_string()
        };

        self.canonicalize(&absolute)
    }

    /// Normalizes an absolute URL: http(s) only, no fragment, allow-listed
    /// query parameters only.
    pub fn canonicalize(&self, absolute: &str) -> Result<String> {
        let mut url = Url::parse(absolute)
            .map_err(|e| LinkError::InvalidUrl(format!("{}: {}", absolute, e)))?;
        if !is_http(&url) {
            return Err(LinkError::InvalidUrl(absolute.to_string()));
        }

        url.set_fragment(None);

        let host = url.host_str().unwrap_or_default().to_string();
        let kept: Vec<(String, String)> = match self.allow_list.params_for(&host) {
            Some(params) => url
                .query_pairs()
                .filter(|(key, _)| params.iter().any(|p| p == key))
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect(),
            None => Vec::new(),
        };

        url.set_query(None);
        if !kept.is_empty() {
            url.query_pairs_mut().extend_pairs(kept);
        }

        Ok(url.to_string())
    }

    /// Sanitizes a harvested sequence. Rejected links are dropped as a whole
    /// entry; the second value is the number dropped.
    pub fn sanitize_all(&self, raw_links: &[String], page: &PageContext) -> (Vec<LinkEntry>, usize) {
        let mut entries = Vec::with_capacity(raw_links.len());
        let mut rejected = 0;

        for raw in raw_links {
            match self.sanitize(raw, page) {
                Ok(canonical) => entries.push(LinkEntry {
                    raw: raw.clone(),
                    canonical,
                }),
                Err(e) => {
                    debug!("Dropping link: {}", e);
                    rejected += 1;
                }
            }
        }

        (entries, rejected)
    }
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
}

/// The part of a URL after the scheme separator, used when http and https
/// forms of a link must compare equal.
pub fn without_scheme(url: &str) -> &str {
    url.split_once("//").map(|(_, rest)| rest).unwrap_or(url)
}

/// Structural variants of `url` a service may have stored instead of the
/// exact string: other scheme, with or without `www.`, with or without a
/// trailing slash, without the query string. The input itself is excluded.
pub fn alternate_urls(url: &str) -> Vec<String> {
    let Ok(parsed) = Url::parse(url) else {
        return Vec::new();
    };
    if !is_http(&parsed) {
        return Vec::new();
    }

    let schemes = [parsed.scheme().to_string(), other_scheme(parsed.scheme()).to_string()];
    let host = parsed.host_str().unwrap_or_default().to_string();
    let hosts = match host.strip_prefix("www.") {
        Some(bare) => [host.clone(), bare.to_string()],
        None => [host.clone(), format!("www.{}", host)],
    };
    let path = parsed.path().to_string();
    let paths = if path == "/" {
        vec![path.clone()]
    } else if let Some(trimmed) = path.strip_suffix('/') {
        vec![path.clone(), trimmed.to_string()]
    } else {
        vec![path.clone(), format!("{}/", path)]
    };
    let queries = match parsed.query() {
        Some(q) => vec![Some(q.to_string()), None],
        None => vec![None],
    };

    let mut variants = Vec::new();
    for scheme in &schemes {
        for host in &hosts {
            for path in &paths {
                for query in &queries {
                    let mut variant = parsed.clone();
                    if variant.set_scheme(scheme).is_err() || variant.set_host(Some(host.as_str())).is_err() {
                        continue;
                    }
                    variant.set_path(path);
                    variant.set_query(query.as_deref());
                    let variant = variant.to_string();
                    if variant != url && !variants.contains(&variant) {
                        variants.push(variant);
                    }
                }
            }
        }
    }
    variants
}

fn other_scheme(scheme: &str) -> &'static str {
    if scheme == "https" { "http" } else { "https" }
}
