//! Core data model shared by every pipeline stage.

pub mod flow;
pub mod item;
pub mod result;

pub use flow::{FlowId, RawFlow, FEATURE_NAMES, NUM_FEATURES};
pub use item::StreamItem;
pub use result::{ClassificationResult, PreparedVector, RankedClass, ThreatLevel, TOP_K};
