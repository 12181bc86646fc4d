use crate::aggregate::aggregate;
use crate::batch::{BatchScheduler, DelayFn, tokio_sleep};
use crate::config::PipelineConfig;
use crate::fetch::AssessmentFetcher;
use crate::model::{LinkEntry, SessionAssessmentMap};
use crate::resolver::{RedirectMap, RedirectResolver, ResolutionReport};
use crate::sanitize::{PageContext, Sanitizer};
use crate::session::LinkSession;
use chrono::{DateTime, Utc};
use linkcred_scanner::error::{LinkError, Result};
use linkcred_scanner::{HttpLinkService, HttpRedirectChaser, LinkService, RedirectChaser};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Called with the session's non-empty assessment map whenever a pass changes it
pub type ChangeCallback = Arc<dyn Fn(&SessionAssessmentMap) + Send + Sync>;

/// Result of one scan pass
#[derive(Debug, Clone, Serialize)]
pub struct PassOutcome {
    pub pass_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Raw links processed by this pass (not answered from the session).
    pub new_links: usize,
    /// Assessed links answered from the session without network calls.
    pub replayed: SessionAssessmentMap,
    /// Bucket per new raw link.
    pub assessments: SessionAssessmentMap,
    pub report: ResolutionReport,
    /// Raw links left out because their assessment batch failed. They are
    /// not merged, so a later pass picks them up again.
    pub withheld: Vec<String>,
    pub fetch_errors: Vec<String>,
    pub non_empty_changed: bool,
}

impl PassOutcome {
    pub fn assessed_links(&self) -> usize {
        self.assessments.values().filter(|b| !b.is_empty()).count()
    }
}

/// Drives sanitize -> resolve -> fetch -> aggregate -> merge for each batch of
/// links harvested from a page.
pub struct AssessmentPipeline {
    config: PipelineConfig,
    sanitizer: Sanitizer,
    resolver: RedirectResolver,
    fetcher: AssessmentFetcher,
    delay: DelayFn,
    on_change: Option<ChangeCallback>,
}

impl AssessmentPipeline {
    pub fn new(
        config: PipelineConfig,
        service: Arc<dyn LinkService>,
        chaser: Arc<dyn RedirectChaser>,
    ) -> Self {
        let sanitizer = Sanitizer::new(config.query_allow_list.clone());
        Self {
            resolver: RedirectResolver::new(service.clone(), chaser)
                .with_sanitizer(sanitizer.clone()),
            fetcher: AssessmentFetcher::new(service),
            sanitizer,
            config,
            delay: tokio_sleep(),
            on_change: None,
        }
    }

    /// Pipeline talking to the configured service over HTTP and chasing
    /// redirects with a real client.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let service_url = config
            .service_url
            .clone()
            .ok_or_else(|| LinkError::InvalidUrl("no service url configured".to_string()))?;

        let service = HttpLinkService::with_timeout(&service_url, config.request_timeout_secs)?
            .with_auth_token(config.auth_token.clone());
        let chaser = HttpRedirectChaser::with_timeout(config.request_timeout_secs, &config.user_agent)?
            .with_max_hops(config.max_redirect_hops);

        Ok(Self::new(config, Arc::new(service), Arc::new(chaser)))
    }

    pub fn with_delay(mut self, delay: DelayFn) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_change_callback(mut self, callback: ChangeCallback) -> Self {
        self.on_change = Some(callback);
        self
    }

    /// Processes the links currently on `page`.
    ///
    /// Links the session has already seen are answered from it. Fails only
    /// when the known-redirect lookup fails, leaving the session's assessment
    /// map as it was.
    pub async fn run_pass(
        &self,
        session: &mut LinkSession,
        page: &PageContext,
        raw_links: &[String],
    ) -> Result<PassOutcome> {
        let started_at = Utc::now();
        let pass_id = Uuid::new_v4().to_string();

        let mut seen = HashSet::new();
        let mut replayed = SessionAssessmentMap::new();
        let mut fresh = Vec::new();
        for raw in raw_links {
            if !seen.insert(raw.as_str()) {
                continue;
            }
            match session.bucket(raw) {
                Some(bucket) => {
                    if !bucket.is_empty() {
                        replayed.insert(raw.clone(), bucket.clone());
                    }
                }
                None => fresh.push(raw.clone()),
            }
        }

        info!(
            "Pass {} on {}: {} new link(s), {} answered from session",
            pass_id,
            page.url(),
            fresh.len(),
            seen.len() - fresh.len()
        );

        let (entries, invalid) = self.sanitizer.sanitize_all(&fresh, page);
        let canonical: Vec<String> = entries.iter().map(|e| e.canonical.clone()).collect();

        let scheduler = BatchScheduler::new(self.config.batch_size)
            .with_pacing(self.config.pacing.bounds_for(page.host_str()))
            .with_delay(self.delay.clone());
        let persist = self.config.persistence_allowed(page.host_str());

        let (redirects, mut report) = self
            .resolver
            .resolve(session.cache_mut(), &canonical, &scheduler, persist)
            .await?;
        report.invalid_dropped = invalid;

        let posts = self.fetcher.fetch(&redirects.targets(), &scheduler).await;
        let mut assessments = aggregate(&entries, &redirects, &posts);
        let withheld = withheld_links(&entries, &redirects, &posts.failed_targets);
        if !withheld.is_empty() {
            warn!(
                "Withholding {} link(s) whose assessments could not be fetched",
                withheld.len()
            );
            for raw in &withheld {
                assessments.remove(raw);
            }
        }

        let non_empty_changed = session.merge(assessments.clone());
        if non_empty_changed {
            debug!("Session now has {} assessed link(s)", session.non_empty().len());
            if let Some(callback) = &self.on_change {
                callback(session.non_empty());
            }
        }

        let outcome = PassOutcome {
            pass_id,
            started_at,
            finished_at: Utc::now(),
            new_links: fresh.len(),
            replayed,
            assessments,
            report,
            withheld,
            fetch_errors: posts.errors,
            non_empty_changed,
        };
        info!(
            "Pass {} finished: {} of {} new link(s) assessed",
            outcome.pass_id,
            outcome.assessed_links(),
            outcome.new_links
        );
        Ok(outcome)
    }
}

/// Raw links whose canonical form leads to any of `failed_targets`, in entry
/// order.
fn withheld_links(
    entries: &[LinkEntry],
    redirects: &RedirectMap,
    failed_targets: &BTreeSet<String>,
) -> Vec<String> {
    if failed_targets.is_empty() {
        return Vec::new();
    }

    let failed_origins: HashSet<&str> = failed_targets
        .iter()
        .filter_map(|target| redirects.origins(target))
        .flatten()
        .map(String::as_str)
        .collect();

    let mut withheld = Vec::new();
    for entry in entries {
        if failed_origins.contains(entry.canonical.as_str()) && !withheld.contains(&entry.raw) {
            withheld.push(entry.raw.clone());
        }
    }
    withheld
}
