// Batched retrieval of assessment and question posts for resolved targets

use crate::batch::BatchScheduler;
use futures::future::try_join;
use linkcred_scanner::service::LinkService;
use linkcred_scanner::wire::Post;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct FetchedPosts {
    pub assessments: Vec<Post>,
    pub questions: Vec<Post>,
    /// Targets whose batch failed. Nothing is known about them this pass.
    pub failed_targets: BTreeSet<String>,
    pub errors: Vec<String>,
}

impl FetchedPosts {
    pub fn is_empty(&self) -> bool {
        self.assessments.is_empty() && self.questions.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_targets.is_empty()
    }
}

pub struct AssessmentFetcher {
    service: Arc<dyn LinkService>,
}

impl AssessmentFetcher {
    pub fn new(service: Arc<dyn LinkService>) -> Self {
        Self { service }
    }

    /// Fetches assessments (excluding the caller's own) and questions for
    /// `targets`. A failed batch contributes no posts; its targets are listed
    /// in `failed_targets` and the other batches still count.
    pub async fn fetch(&self, targets: &[String], scheduler: &BatchScheduler) -> FetchedPosts {
        let mut posts = FetchedPosts::default();
        if targets.is_empty() {
            return posts;
        }

        let service = self.service.as_ref();
        let batches = scheduler
            .run_concurrent(targets, move |chunk| {
                try_join(
                    service.get_assessments(chunk, true),
                    service.get_questions(chunk),
                )
            })
            .await;

        for (chunk, batch) in scheduler.chunks(targets).zip(batches) {
            match batch {
                Ok((assessments, questions)) => {
                    posts.assessments.extend(assessments);
                    posts.questions.extend(questions);
                }
                Err(e) => {
                    warn!("Assessment fetch failed for {} target(s): {}", chunk.len(), e);
                    posts.failed_targets.extend(chunk.iter().cloned());
                    posts.errors.push(e.to_string());
                }
            }
        }

        debug!(
            "Fetched {} assessment post(s) and {} question post(s) for {} target(s)",
            posts.assessments.len(),
            posts.questions.len(),
            targets.len()
        );
        posts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::no_delay;
    use async_trait::async_trait;
    use linkcred_scanner::error::{LinkError, Result};
    use linkcred_scanner::wire::{FollowedRedirects, RedirectLookup, ScheduledTarget};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct PostService {
        questions_down: bool,
        failing_url: Option<String>,
        batches: Mutex<Vec<(usize, bool)>>,
    }

    fn post(url: &str) -> Post {
        Post {
            id: None,
            url: url.to_string(),
            source_id: None,
            assessments: Vec::new(),
        }
    }

    #[async_trait]
    impl LinkService for PostService {
        async fn get_redirects(&self, _: &[String]) -> Result<Vec<RedirectLookup>> {
            Ok(Vec::new())
        }

        async fn follow_redirects(&self, _: &[String]) -> Result<FollowedRedirects> {
            Ok(FollowedRedirects::default())
        }

        async fn send_redirects(&self, _: &BTreeMap<String, String>) -> Result<()> {
            Ok(())
        }

        async fn schedule_redirects(&self, _: &BTreeMap<String, ScheduledTarget>) -> Result<()> {
            Ok(())
        }

        async fn get_assessments(&self, urls: &[String], exclude_poster: bool) -> Result<Vec<Post>> {
            self.batches.lock().unwrap().push((urls.len(), exclude_poster));
            if self.failing_url.as_ref().is_some_and(|bad| urls.contains(bad)) {
                return Err(LinkError::RemoteUnavailable("assessments".to_string()));
            }
            Ok(urls.iter().map(|u| post(u)).collect())
        }

        async fn get_questions(&self, urls: &[String]) -> Result<Vec<Post>> {
            if self.questions_down {
                return Err(LinkError::RemoteUnavailable("questions".to_string()));
            }
            Ok(urls.first().map(|u| vec![post(u)]).unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_fetch_batches_and_excludes_poster() {
        let service = Arc::new(PostService::default());
        let fetcher = AssessmentFetcher::new(service.clone());
        let targets: Vec<String> = (0..45).map(|i| format!("https://a.com/{}", i)).collect();

        let posts = fetcher
            .fetch(&targets, &BatchScheduler::new(20).with_delay(no_delay()))
            .await;

        assert!(posts.is_complete());
        assert_eq!(posts.assessments.len(), 45);
        assert_eq!(posts.questions.len(), 3);
        let mut batches = service.batches.lock().unwrap().clone();
        batches.sort();
        assert_eq!(batches, vec![(5, true), (20, true), (20, true)]);
    }

    #[tokio::test]
    async fn test_failed_batch_marks_only_its_targets() {
        let service = Arc::new(PostService {
            failing_url: Some("https://a.com/3".to_string()),
            ..Default::default()
        });
        let fetcher = AssessmentFetcher::new(service);
        let targets: Vec<String> = (0..4).map(|i| format!("https://a.com/{}", i)).collect();

        let posts = fetcher
            .fetch(&targets, &BatchScheduler::new(2).with_delay(no_delay()))
            .await;

        assert!(!posts.is_complete());
        assert_eq!(posts.assessments.len(), 2);
        assert_eq!(
            posts.failed_targets.iter().cloned().collect::<Vec<_>>(),
            vec!["https://a.com/2".to_string(), "https://a.com/3".to_string()]
        );
        assert_eq!(posts.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_questions_fail_their_batch() {
        let service = Arc::new(PostService {
            questions_down: true,
            ..Default::default()
        });
        let fetcher = AssessmentFetcher::new(service);

        let posts = fetcher
            .fetch(&["https://a.com/".to_string()], &BatchScheduler::default())
            .await;

        assert!(posts.assessments.is_empty());
        assert!(posts.failed_targets.contains("https://a.com/"));
    }

    #[tokio::test]
    async fn test_no_targets_no_calls() {
        let service = Arc::new(PostService::default());
        let fetcher = AssessmentFetcher::new(service.clone());

        let posts = fetcher.fetch(&[], &BatchScheduler::default()).await;

        assert!(posts.is_empty());
        assert!(service.batches.lock().unwrap().is_empty());
    }
}
