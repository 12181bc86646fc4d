// Data model shared by the resolution and aggregation stages

use linkcred_scanner::wire::{Post, PostAssessment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw link -> bucket for every link seen on the page.
pub type SessionAssessmentMap = BTreeMap<String, LinkAssessmentBucket>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Credibility {
    Confirmed,
    Refuted,
    Questioned,
}

impl Credibility {
    /// Maps the service's numeric `postCredibility`.
    pub fn from_post_credibility(value: Option<i64>) -> Self {
        match value {
            Some(1) => Credibility::Confirmed,
            Some(0) => Credibility::Refuted,
            _ => Credibility::Questioned,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Credibility::Confirmed => "confirmed",
            Credibility::Refuted => "refuted",
            Credibility::Questioned => "questioned",
        }
    }
}

/// Which endpoint a post came back from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    Assessment,
    Question,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub source_id: Option<i64>,
    pub version: i32,
    pub credibility: Credibility,
    pub content: Option<String>,
    pub target_url: String,
}

impl AssessmentRecord {
    pub fn from_post(post: &Post, assessment: &PostAssessment, kind: PostKind) -> Self {
        let credibility = match kind {
            PostKind::Assessment => Credibility::from_post_credibility(assessment.post_credibility),
            PostKind::Question => Credibility::Questioned,
        };

        Self {
            source_id: assessment.source_id,
            version: assessment.version,
            credibility,
            content: assessment.body.clone(),
            target_url: post.url.clone(),
        }
    }

    /// Version 1 is the active assessment; higher versions are history.
    pub fn is_current(&self) -> bool {
        self.version == 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkAssessmentBucket {
    pub confirmed: Vec<AssessmentRecord>,
    pub refuted: Vec<AssessmentRecord>,
    pub questioned: Vec<AssessmentRecord>,
}

impl LinkAssessmentBucket {
    pub fn push(&mut self, record: AssessmentRecord) {
        self.records_mut(record.credibility).push(record);
    }

    pub fn records(&self, credibility: Credibility) -> &[AssessmentRecord] {
        match credibility {
            Credibility::Confirmed => &self.confirmed,
            Credibility::Refuted => &self.refuted,
            Credibility::Questioned => &self.questioned,
        }
    }

    fn records_mut(&mut self, credibility: Credibility) -> &mut Vec<AssessmentRecord> {
        match credibility {
            Credibility::Confirmed => &mut self.confirmed,
            Credibility::Refuted => &mut self.refuted,
            Credibility::Questioned => &mut self.questioned,
        }
    }

    pub fn contains(&self, record: &AssessmentRecord) -> bool {
        self.records(record.credibility).contains(record)
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.refuted.is_empty() && self.questioned.is_empty()
    }

    pub fn len(&self) -> usize {
        self.confirmed.len() + self.refuted.len() + self.questioned.len()
    }
}

/// One harvested link paired with its sanitized form. A pass keeps these in
/// harvest order, so a position always names one link on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub raw: String,
    pub canonical: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionState {
    Unvisited,
    Resolved,
    Failed,
    CorsBlocked,
}

impl ResolutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionState::Unvisited => "unvisited",
            ResolutionState::Resolved => "resolved",
            ResolutionState::Failed => "failed",
            ResolutionState::CorsBlocked => "cors_blocked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionEntry {
    pub canonical: String,
    pub target: Option<String>,
    pub state: ResolutionState,
}

impl ResolutionEntry {
    pub fn new(canonical: String) -> Self {
        Self {
            canonical,
            target: None,
            state: ResolutionState::Unvisited,
        }
    }

    pub fn is_visited(&self) -> bool {
        self.state != ResolutionState::Unvisited
    }
}
