//! Learning subsystem for the mend pipeline core
//!
//! Closes the loop behind the correction engines: collect feedback on
//! healing outcomes, measure pattern and action effectiveness, accumulate
//! a knowledge base, and retrain the local model artifacts.

pub mod effectiveness;
pub mod feedback;
pub mod knowledge;
pub mod trainer;

pub use effectiveness::{EffectivenessAnalyzer, ImprovementRecommendation, RecommendationKind};
pub use feedback::{FeedbackCollector, FeedbackKind, FeedbackRecord};
pub use knowledge::{KnowledgeBase, KnowledgeEntry, KnowledgeFlavor};
pub use trainer::{ModelTrainer, TrainingReport};
