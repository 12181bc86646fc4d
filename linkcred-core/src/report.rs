// Report generation from scan passes

use crate::model::{Credibility, LinkAssessmentBucket, SessionAssessmentMap};
use crate::pipeline::PassOutcome;
use crate::resolver::ResolutionReport;
use crate::session::LinkSession;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportData {
    pub session_id: String,
    pub page_url: String,
    pub started_at: String,
    pub passes: Vec<PassSummary>,
    pub resolution_counts: ResolutionCounts,
    /// Raw link -> bucket, links with assessments only.
    pub links: SessionAssessmentMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassSummary {
    pub pass_id: String,
    pub started_at: String,
    pub duration_ms: i64,
    pub new_links: usize,
    pub replayed_links: usize,
    pub assessed_links: usize,
    pub changed: bool,
    pub withheld_links: usize,
    pub resolution: ResolutionReport,
}

/// Cache states at the end of the last pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionCounts {
    pub resolved: usize,
    pub failed: usize,
    pub cors_blocked: usize,
    pub unvisited: usize,
}

impl From<&PassOutcome> for PassSummary {
    fn from(outcome: &PassOutcome) -> Self {
        Self {
            pass_id: outcome.pass_id.clone(),
            started_at: format_timestamp(&outcome.started_at),
            duration_ms: (outcome.finished_at - outcome.started_at).num_milliseconds(),
            new_links: outcome.new_links,
            replayed_links: outcome.replayed.len(),
            assessed_links: outcome.assessed_links(),
            changed: outcome.non_empty_changed,
            withheld_links: outcome.withheld.len(),
            resolution: outcome.report.clone(),
        }
    }
}

pub fn gather_report_data(session: &LinkSession, page_url: &str, passes: &[PassOutcome]) -> ReportData {
    use crate::model::ResolutionState;

    let cache = session.cache();
    ReportData {
        session_id: session.id.clone(),
        page_url: page_url.to_string(),
        started_at: format_timestamp(&session.started_at),
        passes: passes.iter().map(PassSummary::from).collect(),
        resolution_counts: ResolutionCounts {
            resolved: cache.count(ResolutionState::Resolved),
            failed: cache.count(ResolutionState::Failed),
            cors_blocked: cache.count(ResolutionState::CorsBlocked),
            unvisited: cache.count(ResolutionState::Unvisited),
        },
        links: session.non_empty().clone(),
    }
}

pub fn generate_text_report(data: &ReportData) -> String {
    let mut report = String::new();

    report.push_str(RULE);
    report.push_str("                       LINKCRED ASSESSMENT REPORT\n");
    report.push_str(RULE);
    report.push('\n');

    report.push_str(&format!("Session ID:   {}\n", data.session_id));
    report.push_str(&format!("Page:         {}\n", data.page_url));
    report.push_str(&format!("Started:      {}\n", data.started_at));
    report.push_str(&format!("Passes:       {}\n", data.passes.len()));
    report.push_str(&format!("Assessed:     {} link(s)\n", data.links.len()));
    report.push('\n');

    report.push_str(RULE);
    report.push_str("RESOLUTION\n");
    report.push_str(RULE);
    report.push('\n');

    let counts = &data.resolution_counts;
    report.push_str(&format!("  Resolved:      {}\n", counts.resolved));
    report.push_str(&format!("  Failed:        {}\n", counts.failed));
    if counts.cors_blocked > 0 {
        report.push_str(&format!("  Blocked:       {}\n", counts.cors_blocked));
    }
    if counts.unvisited > 0 {
        report.push_str(&format!("  Unvisited:     {}\n", counts.unvisited));
    }
    report.push('\n');

    for (idx, pass) in data.passes.iter().enumerate() {
        let r = &pass.resolution;
        report.push_str(&format!(
            "[pass {}] {} ({} ms)\n",
            idx + 1,
            pass.started_at,
            pass.duration_ms
        ));
        report.push_str(&format!(
            "  {} new, {} replayed, {} assessed{}\n",
            pass.new_links,
            pass.replayed_links,
            pass.assessed_links,
            if pass.changed { "" } else { ", no change" }
        ));
        report.push_str(&format!(
            "  known {} / chased {} / remote {} / cached {}\n",
            r.server_known.len(),
            r.client_resolved.len(),
            r.fallback_resolved.len(),
            r.cache_hits.len()
        ));
        if !r.unavailable.is_empty() {
            report.push_str(&format!("  unavailable: {}\n", r.unavailable.join(", ")));
        }
        if !r.scheduled_failed.is_empty() {
            report.push_str(&format!("  unresolved:  {}\n", r.scheduled_failed.join(", ")));
        }
        if pass.withheld_links > 0 {
            report.push_str(&format!(
                "  {} link(s) withheld, assessments unavailable\n",
                pass.withheld_links
            ));
        }
        if r.invalid_dropped > 0 {
            report.push_str(&format!("  {} invalid link(s) dropped\n", r.invalid_dropped));
        }
    }
    report.push('\n');

    if !data.links.is_empty() {
        report.push_str(RULE);
        report.push_str("ASSESSED LINKS\n");
        report.push_str(RULE);
        report.push('\n');

        for (raw, bucket) in &data.links {
            report.push_str(&format!("{}\n", raw));
            report.push_str(&format!("  {}\n", summarize_bucket(bucket)));
            for credibility in [Credibility::Confirmed, Credibility::Refuted, Credibility::Questioned] {
                for record in bucket.records(credibility) {
                    report.push_str(&format!("  [{}] {}\n", credibility.as_str().to_uppercase(), record.target_url));
                    if let Some(content) = record.content.as_deref().filter(|c| !c.trim().is_empty()) {
                        report.push_str(&wrap_text(content, 80, "      "));
                    }
                }
            }
            report.push_str("────────────────────────────────────────────────────────────────────────────────\n");
        }
        report.push('\n');
    }

    report.push_str(RULE);
    report.push_str("                          End of Report\n");
    report.push_str(RULE);

    report
}

pub fn generate_json_report(data: &ReportData) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(data)
}

pub fn save_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

/// One-line count summary, e.g. `2 confirmed, 1 refuted`.
pub fn summarize_bucket(bucket: &LinkAssessmentBucket) -> String {
    let parts: Vec<String> = [Credibility::Confirmed, Credibility::Refuted, Credibility::Questioned]
        .iter()
        .filter_map(|c| {
            let n = bucket.records(*c).len();
            (n > 0).then(|| format!("{} {}", n, c.as_str()))
        })
        .collect();

    if parts.is_empty() {
        "no assessments".to_string()
    } else {
        parts.join(", ")
    }
}

fn format_timestamp(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn wrap_text(text: &str, width: usize, indent: &str) -> String {
    let mut result = String::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        if !line.is_empty() && line.len() + word.len() + 1 > width.saturating_sub(indent.len()) {
            result.push_str(indent);
            result.push_str(&line);
            result.push('\n');
            line.clear();
        }
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(word);
    }

    if !line.is_empty() {
        result.push_str(indent);
        result.push_str(&line);
        result.push('\n');
    }

    result
}
