// In-memory link service and redirect chaser for pipeline tests

#![allow(dead_code)]

use async_trait::async_trait;
use linkcred_core::batch::no_delay;
use linkcred_core::{AssessmentPipeline, PipelineConfig};
use linkcred_scanner::error::{LinkError, Result};
use linkcred_scanner::result::{ChaseOutcome, ChaseResult};
use linkcred_scanner::wire::{
    FollowedRedirects, Post, PostAssessment, RedirectLookup, ScheduledTarget,
};
use linkcred_scanner::{LinkService, RedirectChaser};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct FakeService {
    pub known: HashMap<String, RedirectLookup>,
    pub followed: HashMap<String, String>,
    pub assessments: HashMap<String, Vec<Post>>,
    pub questions: HashMap<String, Vec<Post>>,
    pub redirects_down: bool,
    pub assessments_down: bool,
    pub failing_assessments: HashSet<String>,
    pub calls: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<BTreeMap<String, String>>>,
    pub scheduled: Mutex<Vec<BTreeMap<String, ScheduledTarget>>>,
}

impl FakeService {
    pub fn knows(mut self, source: &str, lookup: RedirectLookup) -> Self {
        self.known.insert(source.to_string(), lookup);
        self
    }

    pub fn follows(mut self, source: &str, target: &str) -> Self {
        self.followed.insert(source.to_string(), target.to_string());
        self
    }

    pub fn with_assessment(mut self, url: &str, credibility: Option<i64>) -> Self {
        self.assessments
            .entry(url.to_string())
            .or_default()
            .push(post(url, credibility, 1));
        self
    }

    pub fn with_question(mut self, url: &str) -> Self {
        self.questions
            .entry(url.to_string())
            .or_default()
            .push(post(url, None, 1));
        self
    }

    /// Any assessment batch containing `url` fails.
    pub fn fails_assessments_for(mut self, url: &str) -> Self {
        self.failing_assessments.insert(url.to_string());
        self
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }
}

pub fn post(url: &str, credibility: Option<i64>, version: i32) -> Post {
    Post {
        id: Some(1),
        url: url.to_string(),
        source_id: Some(100),
        assessments: vec![PostAssessment {
            source_id: Some(200),
            version,
            post_credibility: credibility,
            body: Some(format!("about {}", url)),
        }],
    }
}

#[async_trait]
impl LinkService for FakeService {
    async fn get_redirects(&self, urls: &[String]) -> Result<Vec<RedirectLookup>> {
        self.record("get_redirects");
        if self.redirects_down {
            return Err(LinkError::RemoteUnavailable("redirects".to_string()));
        }
        Ok(urls
            .iter()
            .map(|u| self.known.get(u).cloned().unwrap_or(RedirectLookup::Unknown))
            .collect())
    }

    async fn follow_redirects(&self, urls: &[String]) -> Result<FollowedRedirects> {
        self.record("follow_redirects");
        let mut answer: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for url in urls {
            if let Some(target) = self.followed.get(url) {
                answer.entry(target.clone()).or_default().push(url.clone());
            }
        }
        Ok(FollowedRedirects(answer))
    }

    async fn send_redirects(&self, mappings: &BTreeMap<String, String>) -> Result<()> {
        self.record("send_redirects");
        self.sent.lock().unwrap().push(mappings.clone());
        Ok(())
    }

    async fn schedule_redirects(&self, mappings: &BTreeMap<String, ScheduledTarget>) -> Result<()> {
        self.record("schedule_redirects");
        self.scheduled.lock().unwrap().push(mappings.clone());
        Ok(())
    }

    async fn get_assessments(&self, urls: &[String], _exclude_poster: bool) -> Result<Vec<Post>> {
        self.record("get_assessments");
        if self.assessments_down || urls.iter().any(|u| self.failing_assessments.contains(u)) {
            return Err(LinkError::RemoteUnavailable("assessments".to_string()));
        }
        Ok(urls
            .iter()
            .filter_map(|u| self.assessments.get(u))
            .flatten()
            .cloned()
            .collect())
    }

    async fn get_questions(&self, urls: &[String]) -> Result<Vec<Post>> {
        self.record("get_questions");
        Ok(urls
            .iter()
            .filter_map(|u| self.questions.get(u))
            .flatten()
            .cloned()
            .collect())
    }
}

/// Chaser that answers from a table; unknown links reach themselves.
#[derive(Default)]
pub struct FakeChaser {
    pub outcomes: HashMap<String, ChaseOutcome>,
    pub chased: Mutex<Vec<String>>,
}

impl FakeChaser {
    pub fn answers(mut self, url: &str, outcome: ChaseOutcome) -> Self {
        self.outcomes.insert(url.to_string(), outcome);
        self
    }

    pub fn chased(&self) -> Vec<String> {
        self.chased.lock().unwrap().clone()
    }
}

#[async_trait]
impl RedirectChaser for FakeChaser {
    async fn chase(&self, url: &str) -> ChaseResult {
        self.chased.lock().unwrap().push(url.to_string());
        let outcome = self.outcomes.get(url).cloned().unwrap_or(ChaseOutcome::Reached {
            target: url.to_string(),
        });
        ChaseResult::new(url.to_string(), outcome)
    }
}

pub fn pipeline(service: &Arc<FakeService>, chaser: &Arc<FakeChaser>) -> AssessmentPipeline {
    pipeline_with(PipelineConfig::default(), service, chaser)
}

pub fn pipeline_with(
    config: PipelineConfig,
    service: &Arc<FakeService>,
    chaser: &Arc<FakeChaser>,
) -> AssessmentPipeline {
    AssessmentPipeline::new(config, service.clone(), chaser.clone()).with_delay(no_delay())
}

pub fn links(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|u| u.to_string()).collect()
}
