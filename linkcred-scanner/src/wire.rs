//! JSON shapes exchanged with the link service.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker the service uses for links it already knows it cannot resolve.
pub const FAILED_MARKER: &str = "failed";

/// One position of a `get_redirects` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectLookup {
    Target(String),
    Failed,
    Unknown,
}

impl<'de> Deserialize<'de> for RedirectLookup {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<String> = Option::deserialize(deserializer)?;
        Ok(match value {
            None => RedirectLookup::Unknown,
            Some(v) if v.is_empty() => RedirectLookup::Unknown,
            Some(v) if v == FAILED_MARKER => RedirectLookup::Failed,
            Some(v) => RedirectLookup::Target(v),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

/// `follow_redirects` answer: target url -> source url(s).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowedRedirects(pub BTreeMap<String, Vec<String>>);

impl FollowedRedirects {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for FollowedRedirects {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<BTreeMap<String, OneOrMany>> = Option::deserialize(deserializer)?;
        let map = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(target, sources)| {
                let sources = match sources {
                    OneOrMany::One(source) => vec![source],
                    OneOrMany::Many(sources) => sources,
                };
                (target, sources)
            })
            .collect();
        Ok(FollowedRedirects(map))
    }
}

/// Value side of a `schedule_redirects` mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledTarget {
    Partial(String),
    Failed,
}

impl Serialize for ScheduledTarget {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            ScheduledTarget::Partial(target) => serializer.serialize_str(target),
            ScheduledTarget::Failed => serializer.serialize_str(FAILED_MARKER),
        }
    }
}

/// A post returned by the assessment and question endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub id: Option<i64>,
    pub url: String,
    #[serde(rename = "SourceId", default)]
    pub source_id: Option<i64>,
    #[serde(rename = "PostAssessments", default)]
    pub assessments: Vec<PostAssessment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostAssessment {
    #[serde(rename = "SourceId", default)]
    pub source_id: Option<i64>,
    pub version: i32,
    #[serde(rename = "postCredibility", default, deserialize_with = "lenient_credibility")]
    pub post_credibility: Option<i64>,
    #[serde(default)]
    pub body: Option<String>,
}

// The service has sent credibility both as a number and as a numeric string.
fn lenient_credibility<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.trim().parse().map(Some).map_err(de::Error::custom),
    }
}
