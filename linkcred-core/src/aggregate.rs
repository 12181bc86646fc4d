//! Re-attaches fetched assessment records to the raw links of a pass.
//!
//! A post is keyed by its resolved target. The redirect map leads back from
//! that target to the canonical links that resolve to it, and the pass's link
//! entries lead from a canonical link back to every raw href that produced it.

use crate::fetch::FetchedPosts;
use crate::model::{AssessmentRecord, LinkEntry, PostKind, SessionAssessmentMap};
use crate::resolver::RedirectMap;
use crate::sanitize::{alternate_urls, without_scheme};
use linkcred_scanner::wire::Post;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Builds the pass's assessment map. Every raw link in `entries` gets a
/// bucket, empty when nothing matched.
pub fn aggregate(
    entries: &[LinkEntry],
    redirects: &RedirectMap,
    posts: &FetchedPosts,
) -> SessionAssessmentMap {
    let mut result = SessionAssessmentMap::new();
    let mut raw_by_canonical: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for entry in entries {
        result.entry(entry.raw.clone()).or_default();
        let raws = raw_by_canonical
            .entry(without_scheme(&entry.canonical))
            .or_default();
        if !raws.contains(&entry.raw.as_str()) {
            raws.push(&entry.raw);
        }
    }

    let tagged = posts
        .assessments
        .iter()
        .map(|post| (post, PostKind::Assessment))
        .chain(posts.questions.iter().map(|post| (post, PostKind::Question)));

    for (post, kind) in tagged {
        let Some(origins) = origins_for(redirects, post) else {
            debug!("No link on the page leads to {}", post.url);
            continue;
        };

        let raws: BTreeSet<&str> = origins
            .iter()
            .filter_map(|origin| raw_by_canonical.get(without_scheme(origin)))
            .flatten()
            .copied()
            .collect();

        for assessment in post.assessments.iter() {
            let record = AssessmentRecord::from_post(post, assessment, kind);
            if !record.is_current() {
                continue;
            }
            for raw in &raws {
                if let Some(bucket) = result.get_mut(*raw) {
                    bucket.push(record.clone());
                }
            }
        }
    }

    result
}

/// Origins for a post's url, trying structural variants when the service
/// stored the target in a slightly different form.
fn origins_for<'a>(redirects: &'a RedirectMap, post: &Post) -> Option<&'a BTreeSet<String>> {
    redirects.origins(&post.url).or_else(|| {
        alternate_urls(&post.url)
            .iter()
            .find_map(|variant| redirects.origins(variant))
    })
}
