pub mod error;
pub mod insight;
pub mod query;

pub use error::{ConversionError, InsightError};
pub use insight::{Insight, InsightPatch, InsightUpdate, LegacyFilters, UpdateIntent};
pub use query::{NodeKind, QueryNode};
