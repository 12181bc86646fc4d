use crate::error::{LinkError, Result};
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Downloads a page so its links can be harvested.
pub async fn fetch_document(url: &str, timeout_secs: u64, user_agent: &str) -> Result<String> {
    let client = Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(LinkError::Unknown {
            url: url.to_string(),
            reason: format!("HTTP {}", status),
        });
    }

    Ok(response.text().await?)
}

/// Collects the raw `href` values of a document's anchors, in document order,
/// without duplicates. Anchors inside `exclude_within` (e.g. an injected
/// overlay) are skipped.
pub fn harvest_links(html: &str, exclude_within: Option<&str>) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let link_selector = Selector::parse("a[href]")
        .map_err(|e| LinkError::InvalidUrl(format!("bad selector: {}", e)))?;

    let excluded = match exclude_within {
        Some(css) => {
            let selector = Selector::parse(css)
                .map_err(|e| LinkError::InvalidUrl(format!("bad selector '{}': {}", css, e)))?;
            document
                .select(&selector)
                .flat_map(|root| root.descendants().map(|node| node.id()))
                .collect::<HashSet<_>>()
        }
        None => HashSet::new(),
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&link_selector) {
        if excluded.contains(&element.id()) {
            continue;
        }
        if let Some(href) = element.value().attr("href")
            && is_candidate_href(href)
            && seen.insert(href.to_string())
        {
            links.push(href.to_string());
        }
    }

    debug!("Harvested {} candidate link(s)", links.len());
    Ok(links)
}

/// Hrefs that can never lead to an assessable resource.
pub fn is_candidate_href(href: &str) -> bool {
    let href = href.trim();
    !(href.is_empty()
        || href == "/"
        || href == "#"
        || href.starts_with("mailto:")
        || href.starts_with("javascript:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harvest_keeps_order_and_drops_duplicates() {
        let html = r#"<html><body>
            <a href="/a">A</a>
            <a href="https://x.com/a?utm=1">X</a>
            <a href="/a">A again</a>
        </body></html>"#;

        let links = harvest_links(html, None).unwrap();
        assert_eq!(links, vec!["/a", "https://x.com/a?utm=1"]);
    }

    #[test]
    fn test_harvest_filters_non_candidates() {
        let html = r##"<html><body>
            <a href="/">home</a>
            <a href="#">top</a>
            <a href="mailto:someone@example.com">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="">empty</a>
            <a>no href</a>
            <a href="#comments">comments</a>
        </body></html>"##;

        let links = harvest_links(html, None).unwrap();
        assert_eq!(links, vec!["#comments"]);
    }

    #[test]
    fn test_harvest_skips_excluded_subtree() {
        let html = r#"<html><body>
            <div data-overlay><a href="/badge">badge</a></div>
            <a href="/story">story</a>
        </body></html>"#;

        let links = harvest_links(html, Some("[data-overlay]")).unwrap();
        assert_eq!(links, vec!["/story"]);
    }

    #[tokio::test]
    async fn test_fetch_document() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<a href="/x">x</a>"#))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let html = fetch_document(&format!("{}/feed", server.uri()), 5, "test")
            .await
            .unwrap();
        assert_eq!(harvest_links(&html, None).unwrap(), vec!["/x"]);

        let missing = fetch_document(&format!("{}/missing", server.uri()), 5, "test").await;
        assert!(matches!(missing, Err(LinkError::Unknown { .. })));
    }
}
