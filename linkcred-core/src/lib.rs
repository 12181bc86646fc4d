pub mod aggregate;
pub mod batch;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod sanitize;
pub mod session;

pub use config::PipelineConfig;
pub use pipeline::{AssessmentPipeline, ChangeCallback, PassOutcome};
pub use resolver::{RedirectMap, ResolutionReport};
pub use sanitize::{PageContext, QueryAllowList, Sanitizer};
pub use session::LinkSession;
