use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeKind {
    InsightVizNode,
    DataTableNode,
    DataVisualizationNode,
    EventsNode,
    ActionsNode,
    EventsQuery,
    HogQLQuery,
    TrendsQuery,
    FunnelsQuery,
    RetentionQuery,
    PathsQuery,
    StickinessQuery,
    LifecycleQuery,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsightVizNode => "InsightVizNode",
            Self::DataTableNode => "DataTableNode",
            Self::DataVisualizationNode => "DataVisualizationNode",
            Self::EventsNode => "EventsNode",
            Self::ActionsNode => "ActionsNode",
            Self::EventsQuery => "EventsQuery",
            Self::HogQLQuery => "HogQLQuery",
            Self::TrendsQuery => "TrendsQuery",
            Self::FunnelsQuery => "FunnelsQuery",
            Self::RetentionQuery => "RetentionQuery",
            Self::PathsQuery => "PathsQuery",
            Self::StickinessQuery => "StickinessQuery",
            Self::LifecycleQuery => "LifecycleQuery",
        }
    }

    /// Report queries that the HogQL insight backend can execute.
    pub fn is_insight_query(self) -> bool {
        matches!(
            self,
            Self::TrendsQuery
                | Self::FunnelsQuery
                | Self::RetentionQuery
                | Self::PathsQuery
                | Self::StickinessQuery
                | Self::LifecycleQuery
        )
    }

    /// Wrapper nodes that carry a nested `source` query.
    pub fn wraps_source(self) -> bool {
        matches!(
            self,
            Self::InsightVizNode | Self::DataTableNode | Self::DataVisualizationNode
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "InsightVizNode" => Ok(Self::InsightVizNode),
            "DataTableNode" => Ok(Self::DataTableNode),
            "DataVisualizationNode" => Ok(Self::DataVisualizationNode),
            "EventsNode" => Ok(Self::EventsNode),
            "ActionsNode" => Ok(Self::ActionsNode),
            "EventsQuery" => Ok(Self::EventsQuery),
            "HogQLQuery" => Ok(Self::HogQLQuery),
            "TrendsQuery" => Ok(Self::TrendsQuery),
            "FunnelsQuery" => Ok(Self::FunnelsQuery),
            "RetentionQuery" => Ok(Self::RetentionQuery),
            "PathsQuery" => Ok(Self::PathsQuery),
            "StickinessQuery" => Ok(Self::StickinessQuery),
            "LifecycleQuery" => Ok(Self::LifecycleQuery),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

/// Structured query. The payload is opaque apart from `kind` and `source.kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct QueryNode(Value);

impl QueryNode {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn kind(&self) -> Option<NodeKind> {
        self.0.get("kind")?.as_str()?.parse().ok()
    }

    pub fn source(&self) -> Option<&Value> {
        self.0.get("source")
    }

    /// Kind of the nested source, only when the top-level node wraps one.
    pub fn source_kind(&self) -> Option<NodeKind> {
        if !self.kind()?.wraps_source() {
            return None;
        }
        self.source()?.get("kind")?.as_str()?.parse().ok()
    }

    /// Whether this query is an insight the HogQL backend serves: an
    /// `InsightVizNode` wrapping one of the report queries.
    pub fn targets_alternate_backend(&self) -> bool {
        self.kind() == Some(NodeKind::InsightVizNode)
            && self.source_kind().is_some_and(NodeKind::is_insight_query)
    }

    /// Query shown for an insight that has none yet.
    pub fn default_insight() -> Self {
        Self(json!({
            "kind": NodeKind::InsightVizNode.as_str(),
            "source": {
                "kind": NodeKind::TrendsQuery.as_str(),
                "series": [{
                    "kind": NodeKind::EventsNode.as_str(),
                    "event": "$pageview",
                    "name": "$pageview",
                    "math": "total",
                }],
                "trendsFilter": {},
            },
        }))
    }
}

impl From<Value> for QueryNode {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
