//! Chapter approval engine.
//!
//! A submission flows through rule resolution, attempt numbering, error
//! carryover, the approve/reject decision and feedback generation before it is
//! recorded. Calls for the same (user, chapter) are serialized; calls for
//! different keys run independently.

pub mod attempts;
pub mod carryover;
pub mod decision;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod locks;
pub mod recorder;
pub mod rules;
pub mod types;
pub mod validation;

pub use engine::{ApprovalEngine, BatchItem, BatchSummary, EngineConfig};
pub use error::ApprovalError;
pub use recorder::MetricsMode;
pub use rules::CriticalChapters;
pub use types::{
    AttemptHistory, ChapterStats, EvaluateRequest, Evaluation, EvaluationOutcome,
    EvaluationStatus, MetricSample, MetricType, Rule, RuleFilter,
};
