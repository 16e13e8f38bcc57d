//! Issue diagnosis for the mend pipeline core
//!
//! Three cooperating components: the issue classifier maps failure signals
//! to structured classifications, the pattern recognizer matches them
//! against learned templates, and the root-cause analyzer builds a bounded
//! causality graph to rank candidate causes.

pub mod classifier;
pub mod features;
pub mod issue;
pub mod model;
pub mod recognizer;
pub mod rootcause;

pub use classifier::{IssueClassifier, PredictionMode};
pub use issue::{IssueClassification, IssueDescriptor};
pub use model::{ModelArtifact, ModelHandle};
pub use recognizer::{PatternMatch, PatternRecognizer};
pub use rootcause::{RootCause, RootCauseAnalysis, RootCauseAnalyzer};
