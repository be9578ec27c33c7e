use crate::query::QueryNode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type LegacyFilters = Map<String, Value>;

/// Report definition as loaded from storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Insight {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<LegacyFilters>,
}

impl Insight {
    /// Returns the insight with every field present in `patch` replaced.
    pub fn merged(&self, patch: &InsightPatch) -> Self {
        Self {
            query: patch.query.clone().or_else(|| self.query.clone()),
            filters: patch.filters.clone().or_else(|| self.filters.clone()),
        }
    }
}

/// Partial update. Absent fields leave the stored insight untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InsightPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<LegacyFilters>,
}

impl InsightPatch {
    pub fn query(query: QueryNode) -> Self {
        Self {
            query: Some(query),
            filters: None,
        }
    }

    pub fn filters(filters: LegacyFilters) -> Self {
        Self {
            query: None,
            filters: Some(filters),
        }
    }

    /// Filters that carry at least one key. An empty object is treated as
    /// "no valid filters".
    pub fn usable_filters(&self) -> Option<&LegacyFilters> {
        self.filters.as_ref().filter(|filters| !filters.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIntent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_filter: Option<bool>,
}

impl UpdateIntent {
    pub fn override_filter() -> Self {
        Self {
            override_filter: Some(true),
        }
    }

    pub fn overrides_filter(self) -> bool {
        self.override_filter.unwrap_or(false)
    }
}

/// One mutation as seen by listeners of the insight holder.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightUpdate {
    pub patch: InsightPatch,
    pub insight: Insight,
    pub intent: UpdateIntent,
}
