pub mod chaser;
pub mod error;
pub mod harvest;
pub mod result;
pub mod service;
pub mod wire;

pub use chaser::{HttpRedirectChaser, RedirectChaser};
pub use error::LinkError;
pub use harvest::{fetch_document, harvest_links};
pub use result::{ChaseOutcome, ChaseResult};
pub use service::{HttpLinkService, LinkService};
