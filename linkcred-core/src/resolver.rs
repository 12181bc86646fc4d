//! Tiered redirect resolution.
//!
//! Each canonical link is resolved at most once per session:
//!
//! 1. the link service is asked whether it already knows where the link goes;
//! 2. links it does not know are chased from the client, in paced batches;
//! 3. links the client could not follow because the origin refused it are
//!    handed back to the service, which follows them server side.
//!
//! Whatever stays unresolved is reported to the service so it can retry
//! later. Mappings discovered on the client are pushed to the service so the
//! next visitor gets them from the first tier.

use crate::batch::BatchScheduler;
use crate::cache::ResolutionCache;
use crate::model::ResolutionState;
use crate::sanitize::Sanitizer;
use futures::future::join_all;
use linkcred_scanner::error::Result;
use linkcred_scanner::result::ChaseResult;
use linkcred_scanner::service::LinkService;
use linkcred_scanner::wire::{RedirectLookup, ScheduledTarget};
use linkcred_scanner::RedirectChaser;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Resolved target -> the canonical links that lead to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedirectMap(BTreeMap<String, BTreeSet<String>>);

impl RedirectMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target: &str, origin: &str) {
        self.0
            .entry(target.to_string())
            .or_default()
            .insert(origin.to_string());
    }

    /// Drops `origin` from `target`, removing the target once nothing leads there.
    pub fn remove_origin(&mut self, target: &str, origin: &str) {
        if let Some(origins) = self.0.get_mut(target) {
            origins.remove(origin);
            if origins.is_empty() {
                self.0.remove(target);
            }
        }
    }

    pub fn origins(&self, target: &str) -> Option<&BTreeSet<String>> {
        self.0.get(target)
    }

    pub fn contains_target(&self, target: &str) -> bool {
        self.0.contains_key(target)
    }

    pub fn targets(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What happened to the links of one pass, by tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub server_known: Vec<String>,
    pub client_resolved: Vec<String>,
    pub cache_hits: Vec<String>,
    /// Chased to a 404.
    pub unavailable: Vec<String>,
    /// Refused by the origin during the client chase.
    pub cors_blocked: Vec<String>,
    pub fallback_resolved: Vec<String>,
    pub scheduled_failed: Vec<String>,
    pub invalid_dropped: usize,
}

impl ResolutionReport {
    pub fn resolved_count(&self) -> usize {
        self.server_known.len() + self.client_resolved.len() + self.fallback_resolved.len()
    }
}

pub struct RedirectResolver {
    service: Arc<dyn LinkService>,
    chaser: Arc<dyn RedirectChaser>,
    sanitizer: Sanitizer,
}

impl RedirectResolver {
    pub fn new(service: Arc<dyn LinkService>, chaser: Arc<dyn RedirectChaser>) -> Self {
        Self {
            service,
            chaser,
            sanitizer: Sanitizer::default(),
        }
    }

    /// Sanitizer applied to targets found by the client chase, so they share
    /// a form with the links harvested from pages.
    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Resolves `links` (canonical form) against the session cache.
    ///
    /// Fails only when the known-mapping lookup fails; transitions made
    /// before that point are kept in `cache`.
    pub async fn resolve(
        &self,
        cache: &mut ResolutionCache,
        links: &[String],
        scheduler: &BatchScheduler,
        persist: bool,
    ) -> Result<(RedirectMap, ResolutionReport)> {
        let mut map = RedirectMap::new();
        let mut report = ResolutionReport::default();

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for link in links {
            if !seen.insert(link.as_str()) {
                continue;
            }
            if cache.is_visited(link) {
                if let Some(target) = cache.target(link) {
                    map.insert(target, link);
                }
                report.cache_hits.push(link.clone());
            } else {
                cache.observe(link);
                pending.push(link.clone());
            }
        }

        if pending.is_empty() {
            debug!("All {} link(s) answered from cache", report.cache_hits.len());
            return Ok((map, report));
        }

        let to_chase = self
            .lookup_known(cache, &pending, scheduler, &mut map, &mut report)
            .await?;

        let (fallback, discovered) = self
            .chase(cache, &to_chase, scheduler, &mut map, &mut report)
            .await;

        if persist && !discovered.is_empty() {
            if let Err(e) = self.service.send_redirects(&discovered).await {
                warn!("Failed to store {} redirect(s): {}", discovered.len(), e);
            }
        }

        self.follow_remotely(cache, &fallback, scheduler, &mut map, &mut report)
            .await;

        info!(
            "Resolved {} link(s): {} known, {} chased, {} followed remotely, {} from cache, {} failed",
            links.len(),
            report.server_known.len(),
            report.client_resolved.len(),
            report.fallback_resolved.len(),
            report.cache_hits.len(),
            report.unavailable.len() + report.scheduled_failed.len()
        );

        Ok((map, report))
    }

    /// First tier. Returns the links the service had no mapping for.
    async fn lookup_known(
        &self,
        cache: &mut ResolutionCache,
        pending: &[String],
        scheduler: &BatchScheduler,
        map: &mut RedirectMap,
        report: &mut ResolutionReport,
    ) -> Result<Vec<String>> {
        let service = self.service.as_ref();
        let answers = scheduler
            .run_concurrent(pending, move |chunk| service.get_redirects(chunk))
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        let mut unknown = Vec::new();
        for (chunk, lookups) in scheduler.chunks(pending).zip(answers) {
            for (position, link) in chunk.iter().enumerate() {
                match lookups.get(position) {
                    Some(RedirectLookup::Target(target)) => {
                        cache.resolve(link, target);
                        map.insert(target, link);
                        report.server_known.push(link.clone());
                    }
                    _ => unknown.push(link.clone()),
                }
            }
        }

        debug!(
            "Service knew {} of {} link(s)",
            report.server_known.len(),
            pending.len()
        );
        Ok(unknown)
    }

    /// Second tier. Returns the links that need the remote fallback and the
    /// mappings worth persisting.
    async fn chase(
        &self,
        cache: &mut ResolutionCache,
        links: &[String],
        scheduler: &BatchScheduler,
        map: &mut RedirectMap,
        report: &mut ResolutionReport,
    ) -> (Vec<String>, BTreeMap<String, String>) {
        let mut fallback = Vec::new();
        let mut discovered = BTreeMap::new();
        if links.is_empty() {
            return (fallback, discovered);
        }

        let chaser = self.chaser.as_ref();
        let results: Vec<ChaseResult> = scheduler
            .run_paced(links, move |chunk| {
                join_all(chunk.iter().map(move |link| chaser.chase(link)))
            })
            .await
            .into_iter()
            .flatten()
            .collect();

        for (link, result) in links.iter().zip(results) {
            debug!(
                "Chased {} in {:?} over {} hop(s)",
                link,
                result.response_time,
                result.hops.len()
            );
            if let Some(e) = result.error() {
                debug!("Chase of {} ended early: {}", link, e);
            }

            let observed = result
                .outcome
                .observed_target()
                .map(|target| self.normalize_target(target));

            if result.outcome.needs_fallback() {
                cache.block(link, observed.as_deref());
                if let Some(partial) = &observed {
                    map.insert(partial, link);
                }
                report.cors_blocked.push(link.clone());
                fallback.push(link.clone());
                continue;
            }

            match observed {
                Some(target) => {
                    cache.resolve(link, &target);
                    map.insert(&target, link);
                    discovered.insert(link.clone(), target);
                    report.client_resolved.push(link.clone());
                }
                None => {
                    cache.fail(link);
                    report.unavailable.push(link.clone());
                }
            }
        }

        (fallback, discovered)
    }

    /// Third tier, plus scheduling of whatever is still unresolved.
    async fn follow_remotely(
        &self,
        cache: &mut ResolutionCache,
        blocked: &[String],
        scheduler: &BatchScheduler,
        map: &mut RedirectMap,
        report: &mut ResolutionReport,
    ) {
        if blocked.is_empty() {
            return;
        }

        let service = self.service.as_ref();
        let answers = scheduler
            .run_concurrent(blocked, move |chunk| service.follow_redirects(chunk))
            .await;

        for (chunk, answer) in scheduler.chunks(blocked).zip(answers) {
            let followed = match answer {
                Ok(followed) => followed,
                Err(e) => {
                    warn!("Remote follow failed for {} link(s): {}", chunk.len(), e);
                    continue;
                }
            };
            for (target, sources) in followed.iter() {
                for source in sources {
                    if !chunk.contains(source)
                        || cache.state(source) != ResolutionState::CorsBlocked
                    {
                        continue;
                    }
                    if let Some(partial) = cache.target(source).map(str::to_string) {
                        map.remove_origin(&partial, source);
                    }
                    cache.resolve(source, target);
                    map.insert(target, source);
                    report.fallback_resolved.push(source.clone());
                }
            }
        }

        let mut scheduled = BTreeMap::new();
        for link in blocked {
            if cache.state(link) != ResolutionState::CorsBlocked {
                continue;
            }
            cache.fail(link);
            let target = match cache.target(link) {
                Some(partial) => ScheduledTarget::Partial(partial.to_string()),
                None => ScheduledTarget::Failed,
            };
            scheduled.insert(link.clone(), target);
            report.scheduled_failed.push(link.clone());
        }

        if !scheduled.is_empty() {
            debug!("Scheduling {} unresolved link(s)", scheduled.len());
            if let Err(e) = self.service.schedule_redirects(&scheduled).await {
                warn!("Failed to schedule {} link(s): {}", scheduled.len(), e);
            }
        }
    }

    fn normalize_target(&self, target: &str) -> String {
        self.sanitizer
            .canonicalize(target)
            .unwrap_or_else(|_| target.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkcred_scanner::result::ChaseOutcome;
    use crate::batch::no_delay;
    use async_trait::async_trait;
    use linkcred_scanner::error::LinkError;
    use linkcred_scanner::wire::{FollowedRedirects, Post};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubService {
        known: HashMap<String, RedirectLookup>,
        followed: HashMap<String, String>,
        lookup_down: bool,
        lookups: Mutex<usize>,
        sent: Mutex<Vec<BTreeMap<String, String>>>,
        scheduled: Mutex<Vec<BTreeMap<String, ScheduledTarget>>>,
    }

    #[async_trait]
    impl LinkService for StubService {
        async fn get_redirects(&self, urls: &[String]) -> Result<Vec<RedirectLookup>> {
            *self.lookups.lock().unwrap() += 1;
            if self.lookup_down {
                return Err(LinkError::RemoteUnavailable("down".to_string()));
            }
            Ok(urls
                .iter()
                .map(|u| self.known.get(u).cloned().unwrap_or(RedirectLookup::Unknown))
                .collect())
        }

        async fn follow_redirects(&self, urls: &[String]) -> Result<FollowedRedirects> {
            let mut answer = BTreeMap::new();
            for url in urls {
                if let Some(target) = self.followed.get(url) {
                    answer
                        .entry(target.clone())
                        .or_insert_with(Vec::new)
                        .push(url.clone());
                }
            }
            Ok(FollowedRedirects(answer))
        }

        async fn send_redirects(&self, mappings: &BTreeMap<String, String>) -> Result<()> {
            self.sent.lock().unwrap().push(mappings.clone());
            Ok(())
        }

        async fn schedule_redirects(
            &self,
            mappings: &BTreeMap<String, ScheduledTarget>,
        ) -> Result<()> {
            self.scheduled.lock().unwrap().push(mappings.clone());
            Ok(())
        }

        async fn get_assessments(&self, _: &[String], _: bool) -> Result<Vec<Post>> {
            Ok(Vec::new())
        }

        async fn get_questions(&self, _: &[String]) -> Result<Vec<Post>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct StubChaser {
        outcomes: HashMap<String, ChaseOutcome>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RedirectChaser for StubChaser {
        async fn chase(&self, url: &str) -> ChaseResult {
            self.calls.lock().unwrap().push(url.to_string());
            let outcome = self
                .outcomes
                .get(url)
                .cloned()
                .unwrap_or(ChaseOutcome::Unknown {
                    partial: None,
                    reason: "unreachable".to_string(),
                });
            ChaseResult::new(url.to_string(), outcome)
        }
    }

    fn links(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    fn scheduler() -> BatchScheduler {
        BatchScheduler::new(20).with_delay(no_delay())
    }

    #[tokio::test]
    async fn test_known_mapping_and_failed_marker() {
        let mut service = StubService::default();
        service.known.insert(
            "https://site.com/a".to_string(),
            RedirectLookup::Target("https://site.com/a".to_string()),
        );
        service
            .known
            .insert("https://x.com/a".to_string(), RedirectLookup::Failed);
        let mut chaser = StubChaser::default();
        chaser.outcomes.insert(
            "https://x.com/a".to_string(),
            ChaseOutcome::Reached {
                target: "https://x.com/a".to_string(),
            },
        );
        let service = Arc::new(service);
        let chaser = Arc::new(chaser);
        let resolver = RedirectResolver::new(service.clone(), chaser.clone());
        let mut cache = ResolutionCache::new();

        let (map, report) = resolver
            .resolve(
                &mut cache,
                &links(&["https://site.com/a", "https://x.com/a"]),
                &scheduler(),
                true,
            )
            .await
            .unwrap();

        assert_eq!(report.server_known, links(&["https://site.com/a"]));
        assert_eq!(report.client_resolved, links(&["https://x.com/a"]));
        assert_eq!(*chaser.calls.lock().unwrap(), links(&["https://x.com/a"]));
        assert!(map.origins("https://site.com/a").unwrap().contains("https://site.com/a"));
        assert_eq!(cache.state("https://x.com/a"), ResolutionState::Resolved);

        let sent = service.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].get("https://x.com/a").map(String::as_str), Some("https://x.com/a"));
    }

    #[tokio::test]
    async fn test_blocked_link_followed_remotely_replaces_partial() {
        let mut service = StubService::default();
        service.followed.insert(
            "https://t.co/abc".to_string(),
            "https://news.com/story".to_string(),
        );
        let mut chaser = StubChaser::default();
        chaser.outcomes.insert(
            "https://t.co/abc".to_string(),
            ChaseOutcome::Blocked {
                partial: Some("https://mid.com/hop".to_string()),
            },
        );
        let resolver = RedirectResolver::new(Arc::new(service), Arc::new(chaser));
        let mut cache = ResolutionCache::new();

        let (map, report) = resolver
            .resolve(&mut cache, &links(&["https://t.co/abc"]), &scheduler(), true)
            .await
            .unwrap();

        assert_eq!(report.cors_blocked, links(&["https://t.co/abc"]));
        assert_eq!(report.fallback_resolved, links(&["https://t.co/abc"]));
        assert!(!map.contains_target("https://mid.com/hop"));
        assert!(map.contains_target("https://news.com/story"));
        assert_eq!(cache.target("https://t.co/abc"), Some("https://news.com/story"));
    }

    #[tokio::test]
    async fn test_unresolved_links_are_scheduled() {
        let service = Arc::new(StubService::default());
        let mut chaser = StubChaser::default();
        chaser.outcomes.insert(
            "https://a.com/".to_string(),
            ChaseOutcome::Blocked {
                partial: Some("https://b.com/".to_string()),
            },
        );
        chaser.outcomes.insert("https://gone.com/".to_string(), ChaseOutcome::NotFound);
        let resolver = RedirectResolver::new(service.clone(), Arc::new(chaser));
        let mut cache = ResolutionCache::new();

        let (map, report) = resolver
            .resolve(
                &mut cache,
                &links(&["https://a.com/", "https://c.com/", "https://gone.com/"]),
                &scheduler(),
                true,
            )
            .await
            .unwrap();

        assert_eq!(report.unavailable, links(&["https://gone.com/"]));
        assert_eq!(report.scheduled_failed, links(&["https://a.com/", "https://c.com/"]));
        assert!(map.contains_target("https://b.com/"));
        assert_eq!(cache.state("https://a.com/"), ResolutionState::Failed);
        assert_eq!(cache.state("https://gone.com/"), ResolutionState::Failed);

        let scheduled = service.scheduled.lock().unwrap();
        assert_eq!(
            scheduled[0].get("https://a.com/"),
            Some(&ScheduledTarget::Partial("https://b.com/".to_string()))
        );
        assert_eq!(scheduled[0].get("https://c.com/"), Some(&ScheduledTarget::Failed));
        assert!(!scheduled[0].contains_key("https://gone.com/"));
    }

    #[tokio::test]
    async fn test_second_resolution_is_a_cache_hit() {
        let mut chaser = StubChaser::default();
        chaser.outcomes.insert(
            "https://a.com/".to_string(),
            ChaseOutcome::Reached {
                target: "https://a.com/final".to_string(),
            },
        );
        let service = Arc::new(StubService::default());
        let chaser = Arc::new(chaser);
        let resolver = RedirectResolver::new(service.clone(), chaser.clone());
        let mut cache = ResolutionCache::new();
        let input = links(&["https://a.com/"]);

        resolver.resolve(&mut cache, &input, &scheduler(), true).await.unwrap();
        let (map, report) = resolver.resolve(&mut cache, &input, &scheduler(), true).await.unwrap();

        assert_eq!(report.cache_hits, input);
        assert!(map.contains_target("https://a.com/final"));
        assert_eq!(*service.lookups.lock().unwrap(), 1);
        assert_eq!(chaser.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_opted_out_pages_do_not_persist() {
        let mut chaser = StubChaser::default();
        chaser.outcomes.insert(
            "https://a.com/".to_string(),
            ChaseOutcome::Reached {
                target: "https://a.com/".to_string(),
            },
        );
        let service = Arc::new(StubService::default());
        let resolver = RedirectResolver::new(service.clone(), Arc::new(chaser));

        resolver
            .resolve(&mut ResolutionCache::new(), &links(&["https://a.com/"]), &scheduler(), false)
            .await
            .unwrap();

        assert!(service.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_aborts() {
        let service = StubService {
            lookup_down: true,
            ..Default::default()
        };
        let chaser = Arc::new(StubChaser::default());
        let resolver = RedirectResolver::new(Arc::new(service), chaser.clone());
        let mut cache = ResolutionCache::new();

        let result = resolver
            .resolve(&mut cache, &links(&["https://a.com/"]), &scheduler(), true)
            .await;

        assert!(matches!(result, Err(LinkError::RemoteUnavailable(_))));
        assert!(chaser.calls.lock().unwrap().is_empty());
        assert_eq!(cache.state("https://a.com/"), ResolutionState::Unvisited);
    }

    #[test]
    fn test_redirect_map_remove_origin() {
        let mut map = RedirectMap::new();
        map.insert("https://t/", "https://a/");
        map.insert("https://t/", "https://b/");
        map.remove_origin("https://t/", "https://a/");
        assert_eq!(map.origins("https://t/").unwrap().len(), 1);
        map.remove_origin("https://t/", "https://b/");
        assert!(map.is_empty());
    }
}
