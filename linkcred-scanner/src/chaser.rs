use crate::error::Result;
use crate::result::{ChaseOutcome, ChaseResult};
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

/// Follows the redirect chain of a single link from the client side.
#[async_trait]
pub trait RedirectChaser: Send + Sync {
    async fn chase(&self, url: &str) -> ChaseResult;
}

pub struct HttpRedirectChaser {
    client: Client,
    max_hops: usize,
}

impl HttpRedirectChaser {
    pub fn new() -> Result<Self> {
        Self::with_timeout(10, "linkcred/0.1")
    }

    pub fn with_timeout(timeout_secs: u64, user_agent: &str) -> Result<Self> {
        // Redirects are walked by hand so every hop stays observable.
        let client = Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            max_hops: 10,
        })
    }

    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    async fn walk(&self, start: Url, result: &mut ChaseResult) -> ChaseOutcome {
        let mut current = start;

        for _ in 0..=self.max_hops {
            let response = match self.client.get(current.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    return ChaseOutcome::Unknown {
                        partial: result.hops.last().cloned(),
                        reason: e.to_string(),
                    };
                }
            };

            let status = response.status();
            result.status_code = status.as_u16();

            if status.is_redirection() {
                let next = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|location| current.join(location).ok());

                match next {
                    Some(next) if matches!(next.scheme(), "http" | "https") => {
                        debug!("{} -> {}", current, next);
                        result.hops.push(next.to_string());
                        current = next;
                        continue;
                    }
                    Some(next) => {
                        // e.g. an app deep link; the browser would stop here too
                        return ChaseOutcome::Blocked {
                            partial: Some(next.to_string()),
                        };
                    }
                    None => {
                        return ChaseOutcome::Reached {
                            target: current.to_string(),
                        };
                    }
                }
            }

            return classify_status(status, current, result.hops.last().cloned());
        }

        ChaseOutcome::Unknown {
            partial: Some(current.to_string()),
            reason: format!("more than {} redirects", self.max_hops),
        }
    }
}

fn classify_status(status: StatusCode, current: Url, partial: Option<String>) -> ChaseOutcome {
    match status.as_u16() {
        200..=299 => ChaseOutcome::Reached {
            target: current.to_string(),
        },
        404 => ChaseOutcome::NotFound,
        // Origin policy refusals: the server may still get through.
        401 | 403 | 407 | 429 | 451 => ChaseOutcome::Blocked { partial },
        _ => ChaseOutcome::Unknown {
            partial,
            reason: format!("HTTP {}", status),
        },
    }
}

#[async_trait]
impl RedirectChaser for HttpRedirectChaser {
    async fn chase(&self, url: &str) -> ChaseResult {
        let start = match Url::parse(url) {
            Ok(start) => start,
            Err(e) => return ChaseResult::with_error(url.to_string(), e.to_string()),
        };

        let mut result = ChaseResult::new(url.to_string(), ChaseOutcome::NotFound);
        let started = Instant::now();
        let outcome = self.walk(start, &mut result).await;
        result.outcome = outcome;
        result.response_time = started.elapsed();

        debug!(
            "Chased {} in {} hop(s): {:?}",
            url,
            result.hops.len(),
            result.outcome
        );
        result
    }
}
