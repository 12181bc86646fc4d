// Page-wide state carried across scan passes

use crate::cache::ResolutionCache;
use crate::model::{LinkAssessmentBucket, SessionAssessmentMap};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Everything a page accumulates while it is open: the resolution cache and
/// the assessment map for every raw link seen so far. A pass borrows it
/// mutably, so passes on the same page never overlap.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSession {
    pub id: String,
    pub started_at: DateTime<Utc>,
    cache: ResolutionCache,
    full: SessionAssessmentMap,
    non_empty: SessionAssessmentMap,
}

impl Default for LinkSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            cache: ResolutionCache::new(),
            full: SessionAssessmentMap::new(),
            non_empty: SessionAssessmentMap::new(),
        }
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ResolutionCache {
        &mut self.cache
    }

    /// Bucket per raw link, including links with no assessments.
    pub fn full(&self) -> &SessionAssessmentMap {
        &self.full
    }

    pub fn non_empty(&self) -> &SessionAssessmentMap {
        &self.non_empty
    }

    pub fn bucket(&self, raw: &str) -> Option<&LinkAssessmentBucket> {
        self.full.get(raw)
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.full.contains_key(raw)
    }

    /// Folds a pass result into the session. Returns true when the set of
    /// links with assessments, or their assessments, changed.
    pub fn merge(&mut self, pass: SessionAssessmentMap) -> bool {
        self.full = merge_maps(std::mem::take(&mut self.full), pass);
        let non_empty = non_empty_subset(&self.full);
        let changed = non_empty != self.non_empty;
        self.non_empty = non_empty;
        changed
    }
}

/// Links only in `old` are kept as they are; links in both take the new
/// bucket whole.
pub fn merge_maps(
    mut old: SessionAssessmentMap,
    new: SessionAssessmentMap,
) -> SessionAssessmentMap {
    old.extend(new);
    old
}

pub fn non_empty_subset(full: &SessionAssessmentMap) -> SessionAssessmentMap {
    full.iter()
        .filter(|(_, bucket)| !bucket.is_empty())
        .map(|(raw, bucket)| (raw.clone(), bucket.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AssessmentRecord, Credibility};

    fn bucket_with(credibility: Credibility) -> LinkAssessmentBucket {
        let mut bucket = LinkAssessmentBucket::default();
        bucket.push(AssessmentRecord {
            source_id: Some(1),
            version: 1,
            credibility,
            content: None,
            target_url: "https://t.com/".to_string(),
        });
        bucket
    }

    fn map(entries: Vec<(&str, LinkAssessmentBucket)>) -> SessionAssessmentMap {
        entries
            .into_iter()
            .map(|(raw, bucket)| (raw.to_string(), bucket))
            .collect()
    }

    #[test]
    fn test_merge_retains_old_and_overwrites_shared() {
        let old = map(vec![
            ("/only-old", bucket_with(Credibility::Confirmed)),
            ("/both", bucket_with(Credibility::Confirmed)),
        ]);
        let new = map(vec![
            ("/both", LinkAssessmentBucket::default()),
            ("/only-new", bucket_with(Credibility::Refuted)),
        ]);

        let merged = merge_maps(old.clone(), new);

        assert_eq!(merged["/only-old"], old["/only-old"]);
        assert!(merged["/both"].is_empty());
        assert_eq!(merged["/only-new"].refuted.len(), 1);
    }

    #[test]
    fn test_session_merge_reports_changes() {
        let mut session = LinkSession::new();

        assert!(session.merge(map(vec![("/a", bucket_with(Credibility::Confirmed))])));
        assert_eq!(session.non_empty().len(), 1);

        assert!(!session.merge(map(vec![("/b", LinkAssessmentBucket::default())])));
        assert_eq!(session.full().len(), 2);
        assert_eq!(session.non_empty().len(), 1);

        assert!(session.merge(map(vec![("/a", LinkAssessmentBucket::default())])));
        assert!(session.non_empty().is_empty());
        assert!(session.contains("/a"));
    }

    #[test]
    fn test_new_sessions_are_distinct() {
        assert_ne!(LinkSession::new().id, LinkSession::new().id);
    }
}
