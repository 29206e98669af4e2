//! The replay-and-analysis pipeline.
//!
//! Per action: replay executes it, [`change`] classifies the DOM delta,
//! [`policy`] decides whether to capture and [`capture`] takes the snapshot.
//! After replay, [`manifest`] enriches every step, [`analyzer`] feeds
//! token-bounded batches to the text-analysis service and [`violations`]
//! deduplicates scanner findings. [`session::Pipeline::run_session`] ties it
//! together.

pub mod analyzer;
pub mod batch;
pub mod capture;
pub mod change;
pub mod consolidate;
pub mod deadline;
pub mod manifest;
pub mod policy;
pub mod progress;
pub mod progressive;
pub mod prompts;
pub mod replay;
pub mod rules;
pub mod service;
pub mod session;
pub mod static_sections;
pub mod violations;

#[cfg(test)]
pub(crate) mod test_support;

pub use analyzer::{AnalysisResult, HierarchicalAnalyzer};
pub use capture::CaptureEngine;
pub use change::detect_change;
pub use manifest::ManifestBuilder;
pub use policy::should_capture;
pub use progress::{Phase, Progress, ProgressEvent};
pub use replay::ReplayEngine;
pub use service::{AnalysisFailure, AnalysisService};
pub use session::{Pipeline, SessionOptions, SessionResult};
