// Pipeline configuration

use crate::sanitize::QueryAllowList;
use linkcred_scanner::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/linkcred/config.json";
pub const DEFAULT_BATCH_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub service_url: Option<String>,
    pub auth_token: Option<String>,
    pub batch_size: usize,
    pub pacing: PacingConfig,
    pub query_allow_list: QueryAllowList,
    /// Page hosts whose resolved redirects are never pushed to the service.
    pub persistence_opt_out: Vec<String>,
    pub request_timeout_secs: u64,
    pub max_redirect_hops: usize,
    pub user_agent: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            auth_token: None,
            batch_size: DEFAULT_BATCH_SIZE,
            pacing: PacingConfig::default(),
            query_allow_list: QueryAllowList::default(),
            persistence_opt_out: Vec::new(),
            request_timeout_secs: 10,
            max_redirect_hops: 10,
            user_agent: format!("linkcred/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Randomized pause between client-side chase batches, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub min_ms: u64,
    pub max_ms: u64,
    pub rate_limited_max_ms: u64,
    pub rate_limited_hosts: Vec<String>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_ms: 10,
            max_ms: 70,
            rate_limited_max_ms: 130,
            rate_limited_hosts: vec!["twitter.com".to_string(), "x.com".to_string()],
        }
    }
}

impl PacingConfig {
    /// Inclusive delay bounds for chase batches issued from `page_host`.
    pub fn bounds_for(&self, page_host: &str) -> (u64, u64) {
        let max = if host_matches(page_host, &self.rate_limited_hosts) {
            self.rate_limited_max_ms
        } else {
            self.max_ms
        };
        (self.min_ms.min(max), max)
    }
}

impl PipelineConfig {
    /// Reads a JSON config file. `~` in the path is expanded.
    pub fn load(path: &str) -> Result<Self> {
        let path = expand_path(path);
        debug!("Loading config from {}", path.display());
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Like [`PipelineConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if expand_path(path).exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let path = expand_path(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn with_service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_query_allow_list(mut self, allow_list: QueryAllowList) -> Self {
        self.query_allow_list = allow_list;
        self
    }

    pub fn with_persistence_opt_out(mut self, hosts: Vec<String>) -> Self {
        self.persistence_opt_out = hosts;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_max_redirect_hops(mut self, hops: usize) -> Self {
        self.max_redirect_hops = hops;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn persistence_allowed(&self, page_host: &str) -> bool {
        !host_matches(page_host, &self.persistence_opt_out)
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    Path::new(shellexpand::tilde(path).as_ref()).to_path_buf()
}

/// True when `host` is one of `domains` or a subdomain of one.
fn host_matches(host: &str, domains: &[String]) -> bool {
    let host = host.to_lowercase();
    domains.iter().any(|domain| {
        let domain = domain.to_lowercase();
        host == domain || host.ends_with(&format!(".{}", domain))
    })
}
