use crate::error::{LinkError, Result};
use crate::wire::{FollowedRedirects, Post, RedirectLookup, ScheduledTarget};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

const ROUTE_REDIRECTS: &str = "urls/redirects";
const ROUTE_FOLLOW_REDIRECTS: &str = "urls/follow-redirects";
const ROUTE_SCHEDULE_REDIRECTS: &str = "urls/schedule-redirects";
const ROUTE_ASSESSMENTS: &str = "posts/assessments/urls";
const ROUTE_QUESTIONS: &str = "posts/questions/urls";

/// The remote service that owns redirect mappings and assessment records.
///
/// URL lists travel as a JSON array in the `urls` request header, so callers
/// keep each call to one batch.
#[async_trait]
pub trait LinkService: Send + Sync {
    /// Known targets, aligned by position with `urls`.
    async fn get_redirects(&self, urls: &[String]) -> Result<Vec<RedirectLookup>>;

    /// Server-side redirect chase for links the client could not follow.
    async fn follow_redirects(&self, urls: &[String]) -> Result<FollowedRedirects>;

    /// Stores newly discovered source -> target mappings.
    async fn send_redirects(&self, mappings: &BTreeMap<String, String>) -> Result<()>;

    /// Hands unresolved links to the service's own retry schedule.
    async fn schedule_redirects(&self, mappings: &BTreeMap<String, ScheduledTarget>)
    -> Result<()>;

    async fn get_assessments(&self, urls: &[String], exclude_poster: bool) -> Result<Vec<Post>>;

    async fn get_questions(&self, urls: &[String]) -> Result<Vec<Post>>;
}

pub struct HttpLinkService {
    client: Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl HttpLinkService {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, 10)
    }

    pub fn with_timeout(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| LinkError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        // Routes are joined relative to the base, which must read as a directory.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent("linkcred/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url,
            auth_token: None,
        })
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn route(&self, route: &str) -> Result<Url> {
        self.base_url
            .join(route)
            .map_err(|e| LinkError::InvalidUrl(format!("{}: {}", route, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, "application/json");
        match self.auth_token {
            Some(ref token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn get_with_urls<T: DeserializeOwned>(
        &self,
        route: &str,
        urls: &[String],
        extra_headers: &[(&str, String)],
    ) -> Result<T> {
        let mut request = self
            .client
            .get(self.route(route)?)
            .header("urls", serde_json::to_string(urls)?);
        for (name, value) in extra_headers {
            request = request.header(*name, value.as_str());
        }

        debug!("GET {} for {} url(s)", route, urls.len());
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| unavailable(route, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinkError::RemoteUnavailable(format!(
                "{} returned {}",
                route, status
            )));
        }

        response.json::<T>().await.map_err(|e| unavailable(route, e))
    }

    async fn post_json(&self, route: &str, body: serde_json::Value) -> Result<()> {
        let request = self.client.post(self.route(route)?).json(&body);

        debug!("POST {}", route);
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| unavailable(route, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinkError::RemoteUnavailable(format!(
                "{} returned {}",
                route, status
            )));
        }
        Ok(())
    }
}

fn unavailable(route: &str, error: reqwest::Error) -> LinkError {
    LinkError::RemoteUnavailable(format!("{}: {}", route, error))
}

#[async_trait]
impl LinkService for HttpLinkService {
    async fn get_redirects(&self, urls: &[String]) -> Result<Vec<RedirectLookup>> {
        let lookups: Option<Vec<RedirectLookup>> =
            self.get_with_urls(ROUTE_REDIRECTS, urls, &[]).await?;
        Ok(lookups.unwrap_or_default())
    }

    async fn follow_redirects(&self, urls: &[String]) -> Result<FollowedRedirects> {
        self.get_with_urls(ROUTE_FOLLOW_REDIRECTS, urls, &[]).await
    }

    async fn send_redirects(&self, mappings: &BTreeMap<String, String>) -> Result<()> {
        // The service expects the mapping serialized a second time as a string.
        let encoded = serde_json::to_string(mappings)?;
        self.post_json(ROUTE_REDIRECTS, json!({ "urlMappings": encoded }))
            .await
    }

    async fn schedule_redirects(
        &self,
        mappings: &BTreeMap<String, ScheduledTarget>,
    ) -> Result<()> {
        self.post_json(ROUTE_SCHEDULE_REDIRECTS, json!({ "urlMappings": mappings }))
            .await
    }

    async fn get_assessments(&self, urls: &[String], exclude_poster: bool) -> Result<Vec<Post>> {
        let posts: Option<Vec<Post>> = self
            .get_with_urls(
                ROUTE_ASSESSMENTS,
                urls,
                &[("excludeposter", exclude_poster.to_string())],
            )
            .await?;
        Ok(posts.unwrap_or_default())
    }

    async fn get_questions(&self, urls: &[String]) -> Result<Vec<Post>> {
        let posts: Option<Vec<Post>> = self.get_with_urls(ROUTE_QUESTIONS, urls, &[]).await?;
        Ok(posts.unwrap_or_default())
    }
}
